// rpgo_core/src/optimizer/levenberg_marquardt.rs

use nalgebra::DMatrix;
use tracing::{debug, warn};

use super::linear::{linearize, Ordering};
use super::{check_convergence, OptimizationResult, OptimizerBackend};
use crate::factors::FactorGraph;
use crate::values::Values;

/// Bounds applied to the Hessian diagonal when it is used as the damping term.
const MIN_DIAGONAL: f64 = 1e-6;
const MAX_DIAGONAL: f64 = 1e32;

#[derive(Debug, Clone, Copy)]
pub struct LevenbergMarquardtParams {
    pub max_iterations: usize,
    pub relative_error_tol: f64,
    pub absolute_error_tol: f64,
    pub lambda_initial: f64,
    pub lambda_factor: f64,
    pub lambda_upper_bound: f64,
    pub lambda_lower_bound: f64,
    /// Damp with `λ·diag(H)` instead of `λ·I`.
    pub diagonal_damping: bool,
    /// Log the error and damping after every iteration.
    pub verbose: bool,
}

impl Default for LevenbergMarquardtParams {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            relative_error_tol: 1e-5,
            absolute_error_tol: 1e-5,
            lambda_initial: 1e-5,
            lambda_factor: 10.0,
            lambda_upper_bound: 1e5,
            lambda_lower_bound: 0.0,
            diagonal_damping: false,
            verbose: false,
        }
    }
}

/// Trust-region style damped Gauss-Newton.
#[derive(Debug, Clone, Default)]
pub struct LevenbergMarquardtOptimizer {
    params: LevenbergMarquardtParams,
}

impl LevenbergMarquardtOptimizer {
    pub fn new(params: LevenbergMarquardtParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &LevenbergMarquardtParams {
        &self.params
    }

    fn damped(&self, hessian: &DMatrix<f64>, lambda: f64) -> DMatrix<f64> {
        let mut damped = hessian.clone();
        for i in 0..damped.nrows() {
            let scale = if self.params.diagonal_damping {
                hessian[(i, i)].clamp(MIN_DIAGONAL, MAX_DIAGONAL)
            } else {
                1.0
            };
            damped[(i, i)] += lambda * scale;
        }
        damped
    }
}

impl OptimizerBackend for LevenbergMarquardtOptimizer {
    fn optimize(&self, graph: &FactorGraph, initial: &Values) -> OptimizationResult {
        let p = &self.params;
        let ordering = Ordering::new(graph, initial);
        let initial_error = graph.error(initial);
        if ordering.dim() == 0 {
            return OptimizationResult::unchanged(initial.clone(), initial_error);
        }

        let mut values = initial.clone();
        let mut error = initial_error;
        let mut lambda = p.lambda_initial;
        let mut iterations = 0;
        let mut converged = false;

        'outer: for iter in 0..p.max_iterations {
            iterations = iter + 1;
            let system = linearize(graph, &values, &ordering);
            if iter == 0 && system.skipped > 0 {
                warn!(
                    "Levenberg-Marquardt skipped {} unevaluable factors",
                    system.skipped
                );
            }
            let rhs = -&system.gradient;

            // Raise the damping until a step decreases the error.
            let (new_values, new_error) = loop {
                let step = self
                    .damped(&system.hessian, lambda)
                    .cholesky()
                    .map(|c| c.solve(&rhs));
                if let Some(delta) = step {
                    let candidate = ordering.retract(&values, &delta);
                    let candidate_error = graph.error(&candidate);
                    if candidate_error <= error {
                        lambda = (lambda / p.lambda_factor).max(p.lambda_lower_bound);
                        break (candidate, candidate_error);
                    }
                }
                lambda *= p.lambda_factor;
                if lambda > p.lambda_upper_bound {
                    if p.verbose {
                        debug!("LM: damping exceeded upper bound, no further decrease possible");
                    }
                    converged = true;
                    break 'outer;
                }
            };

            if p.verbose {
                debug!(
                    "LM iteration {}: error {} -> {}, lambda {}",
                    iterations, error, new_error, lambda
                );
            }

            let done = check_convergence(p.relative_error_tol, p.absolute_error_tol, error, new_error);
            values = new_values;
            error = new_error;
            if done {
                converged = true;
                break;
            }
        }

        if !converged {
            warn!(
                "Levenberg-Marquardt did not converge after {} iterations (error {})",
                iterations, error
            );
        }

        OptimizationResult {
            values,
            iterations,
            initial_error,
            final_error: error,
            converged,
        }
    }
}
