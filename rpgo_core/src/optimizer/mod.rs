// rpgo_core/src/optimizer/mod.rs

//! Nonlinear least-squares backends that turn a factor graph plus an initial
//! guess into a refined value assignment.

use crate::factors::FactorGraph;
use crate::values::Values;

/// Step size for numerical Jacobian computation via central differences.
const NUMERICAL_DIFF_EPS: f64 = 1e-6;

/// The outcome of one optimizer run.
#[derive(Debug, Clone)]
pub struct OptimizationResult {
    pub values: Values,
    pub iterations: usize,
    pub initial_error: f64,
    pub final_error: f64,
    /// `false` if the run hit the iteration cap or an indeterminate system.
    /// The values are still the best found.
    pub converged: bool,
}

impl OptimizationResult {
    fn unchanged(values: Values, error: f64) -> Self {
        Self {
            values,
            iterations: 0,
            initial_error: error,
            final_error: error,
            converged: true,
        }
    }
}

/// The contract for any algorithm that minimizes total factor error.
pub trait OptimizerBackend {
    fn optimize(&self, graph: &FactorGraph, initial: &Values) -> OptimizationResult;
}

/// Termination test shared by both backends.
fn check_convergence(
    relative_error_tol: f64,
    absolute_error_tol: f64,
    current_error: f64,
    new_error: f64,
) -> bool {
    if new_error <= 0.0 {
        return true;
    }
    let absolute_decrease = current_error - new_error;
    let relative_decrease = absolute_decrease / current_error;
    (absolute_decrease >= 0.0 && absolute_decrease <= absolute_error_tol)
        || (relative_decrease >= 0.0 && relative_decrease <= relative_error_tol)
}

mod gauss_newton;
mod levenberg_marquardt;
mod linear;

pub use gauss_newton::{GaussNewtonOptimizer, GaussNewtonParams};
pub use levenberg_marquardt::{LevenbergMarquardtOptimizer, LevenbergMarquardtParams};
