// rpgo_core/src/factors.rs

use nalgebra::{DMatrix, DVector};
use std::collections::BTreeSet;

use crate::types::Key;
use crate::values::{Value, Values};

// =========================================================================
// == Noise Model ==
// =========================================================================

/// Gaussian noise on a measurement, stored both as information `Ω` and
/// covariance `Σ = Ω⁻¹`.
#[derive(Debug, Clone, PartialEq)]
pub struct NoiseModel {
    information: DMatrix<f64>,
    covariance: DMatrix<f64>,
}

impl NoiseModel {
    /// Same standard deviation `sigma` on every tangent axis.
    pub fn isotropic(dim: usize, sigma: f64) -> Self {
        Self::diagonal(&vec![sigma; dim])
    }

    /// Independent standard deviations per tangent axis.
    pub fn diagonal(sigmas: &[f64]) -> Self {
        let variances = DVector::from_iterator(sigmas.len(), sigmas.iter().map(|s| s * s));
        Self {
            information: DMatrix::from_diagonal(&variances.map(|v| 1.0 / v)),
            covariance: DMatrix::from_diagonal(&variances),
        }
    }

    /// Returns `None` if the covariance is not square or singular.
    pub fn from_covariance(covariance: DMatrix<f64>) -> Option<Self> {
        if !covariance.is_square() {
            return None;
        }
        let information = covariance.clone().try_inverse()?;
        Some(Self {
            information,
            covariance,
        })
    }

    /// Returns `None` if the information matrix is not square or singular.
    pub fn from_information(information: DMatrix<f64>) -> Option<Self> {
        if !information.is_square() {
            return None;
        }
        let covariance = information.clone().try_inverse()?;
        Some(Self {
            information,
            covariance,
        })
    }

    pub fn dim(&self) -> usize {
        self.information.nrows()
    }

    pub fn information(&self) -> &DMatrix<f64> {
        &self.information
    }

    pub fn covariance(&self) -> &DMatrix<f64> {
        &self.covariance
    }
}

// =========================================================================
// == Factor ==
// =========================================================================

/// Where a factor came from, derived from its keys and the set of special
/// (landmark) prefixes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FactorKind {
    Prior,
    /// Between consecutive poses of one robot.
    Odometry,
    /// Non-sequential measurement between poses of one robot.
    LoopClosure,
    /// Measurement between poses of two different robots.
    InterRobotLoopClosure,
    /// Measurement touching a landmark variable.
    Landmark,
}

impl FactorKind {
    pub fn is_loop_closure(&self) -> bool {
        matches!(
            self,
            FactorKind::LoopClosure | FactorKind::InterRobotLoopClosure
        )
    }
}

/// An immutable measurement constraint on one or two variables.
#[derive(Debug, Clone, PartialEq)]
pub enum Factor {
    Prior {
        key: Key,
        prior: Value,
        noise: NoiseModel,
    },
    Between {
        key1: Key,
        key2: Key,
        measured: Value,
        noise: NoiseModel,
    },
}

impl Factor {
    pub fn prior(key: Key, prior: impl Into<Value>, noise: NoiseModel) -> Self {
        Factor::Prior {
            key,
            prior: prior.into(),
            noise,
        }
    }

    pub fn between(key1: Key, key2: Key, measured: impl Into<Value>, noise: NoiseModel) -> Self {
        Factor::Between {
            key1,
            key2,
            measured: measured.into(),
            noise,
        }
    }

    /// The variables this factor constrains, in residual order.
    pub fn keys(&self) -> Vec<Key> {
        match self {
            Factor::Prior { key, .. } => vec![*key],
            Factor::Between { key1, key2, .. } => vec![*key1, *key2],
        }
    }

    pub fn noise(&self) -> &NoiseModel {
        match self {
            Factor::Prior { noise, .. } | Factor::Between { noise, .. } => noise,
        }
    }

    /// The measurement carried by the factor.
    pub fn measured(&self) -> &Value {
        match self {
            Factor::Prior { prior, .. } => prior,
            Factor::Between { measured, .. } => measured,
        }
    }

    pub fn dim(&self) -> usize {
        self.measured().dim()
    }

    /// Whether the noise model lives in the measurement's tangent space.
    /// Factors failing this cannot be evaluated.
    pub fn is_well_formed(&self) -> bool {
        self.noise().dim() == self.dim()
    }

    pub fn kind(&self, special_symbols: &BTreeSet<char>) -> FactorKind {
        match self {
            Factor::Prior { .. } => FactorKind::Prior,
            Factor::Between { key1, key2, .. } => {
                if special_symbols.contains(&key1.chr) || special_symbols.contains(&key2.chr) {
                    FactorKind::Landmark
                } else if key1.chr != key2.chr {
                    FactorKind::InterRobotLoopClosure
                } else if key1.next() == Some(*key2) {
                    FactorKind::Odometry
                } else {
                    FactorKind::LoopClosure
                }
            }
        }
    }

    /// Residual for the given variable estimates, passed in `keys()` order.
    /// `None` if the estimates are missing or of the wrong type, or the
    /// factor is not well formed.
    pub fn residual_from(&self, estimates: &[&Value]) -> Option<DVector<f64>> {
        if !self.is_well_formed() {
            return None;
        }
        match (self, estimates) {
            (Factor::Prior { prior, .. }, [x]) => prior.local(x),
            (Factor::Between { measured, .. }, [x1, x2]) => {
                let predicted = x1.between(x2)?;
                measured.local(&predicted)
            }
            _ => None,
        }
    }

    pub fn residual(&self, values: &Values) -> Option<DVector<f64>> {
        let estimates = self
            .keys()
            .iter()
            .map(|key| values.get(key))
            .collect::<Option<Vec<_>>>()?;
        self.residual_from(&estimates)
    }

    /// `½ rᵀ Ω r`, or `None` if the factor cannot be evaluated.
    pub fn error(&self, values: &Values) -> Option<f64> {
        let r = self.residual(values)?;
        Some(0.5 * (r.transpose() * self.noise().information() * &r)[(0, 0)])
    }
}

// =========================================================================
// == Factor Graph ==
// =========================================================================

/// The ordered collection of factors making up the estimation problem.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FactorGraph {
    factors: Vec<Factor>,
}

impl FactorGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, factor: Factor) {
        self.factors.push(factor);
    }

    pub fn extend(&mut self, other: &FactorGraph) {
        self.factors.extend(other.factors.iter().cloned());
    }

    /// Removes and returns the most recently appended factor.
    pub fn pop(&mut self) -> Option<Factor> {
        self.factors.pop()
    }

    pub fn remove(&mut self, index: usize) -> Option<Factor> {
        (index < self.factors.len()).then(|| self.factors.remove(index))
    }

    /// Replaces the contents in place with `factors`.
    pub fn assign(&mut self, factors: impl IntoIterator<Item = Factor>) {
        self.factors.clear();
        self.factors.extend(factors);
    }

    pub fn len(&self) -> usize {
        self.factors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factors.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Factor> {
        self.factors.get(index)
    }

    pub fn last(&self) -> Option<&Factor> {
        self.factors.last()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Factor> {
        self.factors.iter()
    }

    /// Every variable referenced by some factor.
    pub fn keys(&self) -> BTreeSet<Key> {
        self.factors.iter().flat_map(|f| f.keys()).collect()
    }

    /// Total error over all evaluable factors.
    pub fn error(&self, values: &Values) -> f64 {
        self.factors.iter().filter_map(|f| f.error(values)).sum()
    }
}

impl<'a> IntoIterator for &'a FactorGraph {
    type Item = &'a Factor;
    type IntoIter = std::slice::Iter<'a, Factor>;

    fn into_iter(self) -> Self::IntoIter {
        self.factors.iter()
    }
}

impl FromIterator<Factor> for FactorGraph {
    fn from_iter<I: IntoIterator<Item = Factor>>(iter: I) -> Self {
        Self {
            factors: iter.into_iter().collect(),
        }
    }
}
