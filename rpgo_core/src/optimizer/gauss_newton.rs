// rpgo_core/src/optimizer/gauss_newton.rs

use tracing::{debug, warn};

use super::linear::{linearize, Ordering};
use super::{check_convergence, OptimizationResult, OptimizerBackend};
use crate::factors::FactorGraph;
use crate::values::Values;

#[derive(Debug, Clone, Copy)]
pub struct GaussNewtonParams {
    pub max_iterations: usize,
    pub relative_error_tol: f64,
    pub absolute_error_tol: f64,
    /// Log the error after every iteration.
    pub verbose: bool,
}

impl Default for GaussNewtonParams {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            relative_error_tol: 1e-5,
            absolute_error_tol: 1e-5,
            verbose: false,
        }
    }
}

/// Undamped Gauss-Newton iterations on the dense normal equations.
#[derive(Debug, Clone, Default)]
pub struct GaussNewtonOptimizer {
    params: GaussNewtonParams,
}

impl GaussNewtonOptimizer {
    pub fn new(params: GaussNewtonParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &GaussNewtonParams {
        &self.params
    }
}

impl OptimizerBackend for GaussNewtonOptimizer {
    fn optimize(&self, graph: &FactorGraph, initial: &Values) -> OptimizationResult {
        let ordering = Ordering::new(graph, initial);
        let initial_error = graph.error(initial);
        if ordering.dim() == 0 {
            return OptimizationResult::unchanged(initial.clone(), initial_error);
        }

        let mut values = initial.clone();
        let mut error = initial_error;
        let mut iterations = 0;
        let mut converged = false;

        for iter in 0..self.params.max_iterations {
            let system = linearize(graph, &values, &ordering);
            if iter == 0 && system.skipped > 0 {
                warn!(
                    "Gauss-Newton skipped {} unevaluable factors",
                    system.skipped
                );
            }
            let Some(cholesky) = system.hessian.cholesky() else {
                warn!("Gauss-Newton: indeterminant linear system, keeping current estimate");
                break;
            };
            let delta = cholesky.solve(&(-system.gradient));
            let new_values = ordering.retract(&values, &delta);
            let new_error = graph.error(&new_values);
            iterations = iter + 1;

            if self.params.verbose {
                debug!("GN iteration {}: error {} -> {}", iterations, error, new_error);
            }

            let done = check_convergence(
                self.params.relative_error_tol,
                self.params.absolute_error_tol,
                error,
                new_error,
            );
            values = new_values;
            error = new_error;
            if done {
                converged = true;
                break;
            }
        }

        if !converged {
            warn!(
                "Gauss-Newton did not converge after {} iterations (error {})",
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
