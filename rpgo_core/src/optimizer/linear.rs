// rpgo_core/src/optimizer/linear.rs

use nalgebra::{DMatrix, DVector};
use std::collections::BTreeMap;

use super::NUMERICAL_DIFF_EPS;
use crate::factors::{Factor, FactorGraph};
use crate::types::Key;
use crate::values::{Value, Values};

/// Column offsets of every optimized variable in the stacked tangent vector.
pub(super) struct Ordering {
    offsets: BTreeMap<Key, usize>,
    dim: usize,
}

impl Ordering {
    /// Orders the variables that are both referenced by `graph` and estimated in `values`.
    pub(super) fn new(graph: &FactorGraph, values: &Values) -> Self {
        let mut offsets = BTreeMap::new();
        let mut dim = 0;
        for key in graph.keys() {
            if let Some(value) = values.get(&key) {
                offsets.insert(key, dim);
                dim += value.dim();
            }
        }
        Self { offsets, dim }
    }

    pub(super) fn dim(&self) -> usize {
        self.dim
    }

    /// Returns `values` moved by the stacked tangent step `delta`.
    pub(super) fn retract(&self, values: &Values, delta: &DVector<f64>) -> Values {
        let mut out = values.clone();
        for (key, &offset) in &self.offsets {
            if let Some(value) = values.get(key) {
                let step = delta.rows(offset, value.dim()).into_owned();
                out.update(*key, value.retract(&step));
            }
        }
        out
    }
}

/// Gauss-Newton normal equations `H δ = -g` around the current estimate.
pub(super) struct LinearSystem {
    pub hessian: DMatrix<f64>,
    pub gradient: DVector<f64>,
    /// Number of factors that could not be evaluated and were left out.
    pub skipped: usize,
}

pub(super) fn linearize(graph: &FactorGraph, values: &Values, ordering: &Ordering) -> LinearSystem {
    let n = ordering.dim();
    let mut hessian = DMatrix::zeros(n, n);
    let mut gradient = DVector::zeros(n);
    let mut skipped = 0;

    for factor in graph {
        let keys = factor.keys();
        let Some(estimates) = keys
            .iter()
            .map(|key| values.get(key).copied())
            .collect::<Option<Vec<Value>>>()
        else {
            skipped += 1;
            continue;
        };
        let Some((residual, jacobians)) = linearize_factor(factor, &estimates) else {
            skipped += 1;
            continue;
        };

        let omega = factor.noise().information();
        let weighted_residual = omega * &residual;
        for (i, (key_i, j_i)) in keys.iter().zip(&jacobians).enumerate() {
            let row = ordering.offsets[key_i];
            let jt_omega = j_i.transpose() * omega;
            let mut g_block = gradient.rows_mut(row, j_i.ncols());
            g_block += j_i.transpose() * &weighted_residual;
            for (key_j, j_j) in keys.iter().zip(&jacobians).skip(i) {
                let col = ordering.offsets[key_j];
                let block = &jt_omega * j_j;
                let mut h_block = hessian.view_mut((row, col), (block.nrows(), block.ncols()));
                h_block += &block;
                if row != col {
                    let mut h_sym = hessian.view_mut((col, row), (block.ncols(), block.nrows()));
                    h_sym += block.transpose();
                }
            }
        }
    }

    LinearSystem {
        hessian,
        gradient,
        skipped,
    }
}

/// Residual plus one central-difference Jacobian block per variable.
fn linearize_factor(
    factor: &Factor,
    estimates: &[Value],
) -> Option<(DVector<f64>, Vec<DMatrix<f64>>)> {
    let refs: Vec<&Value> = estimates.iter().collect();
    let residual = factor.residual_from(&refs)?;
    let eps = NUMERICAL_DIFF_EPS;

    let mut jacobians = Vec::with_capacity(estimates.len());
    for (idx, estimate) in estimates.iter().enumerate() {
        let dim = estimate.dim();
        let mut jacobian = DMatrix::zeros(residual.len(), dim);
        let mut perturbed = estimates.to_vec();
        for axis in 0..dim {
            let mut delta = DVector::zeros(dim);
            delta[axis] = eps;
            perturbed[idx] = estimate.retract(&delta);
            let plus = factor.residual_from(&perturbed.iter().collect::<Vec<_>>())?;
            delta[axis] = -eps;
            perturbed[idx] = estimate.retract(&delta);
            let minus = factor.residual_from(&perturbed.iter().collect::<Vec<_>>())?;
            jacobian.set_column(axis, &((plus - minus) / (2.0 * eps)));
        }
        jacobians.push(jacobian);
    }
    Some((residual, jacobians))
}
