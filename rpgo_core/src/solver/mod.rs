// rpgo_core/src/solver/mod.rs

//! The robust solver: owns the graph state, delegates admission to an
//! optional outlier-rejection strategy and decides when to re-optimize.

mod params;

pub use params::{OutlierRemovalMethod, RobustSolverParams, SolverMode, Verbosity};

use std::collections::BTreeSet;
use std::path::Path;

use tracing::{debug, info, warn};

use crate::error::{ConfigError, RpgoError};
use crate::factors::{Factor, FactorGraph, FactorKind};
use crate::io::write_g2o;
use crate::logging::{FileStatsLogger, StatsLogger, UpdateRecord};
use crate::optimizer::{
    GaussNewtonOptimizer, GaussNewtonParams, LevenbergMarquardtOptimizer,
    LevenbergMarquardtParams, OptimizerBackend,
};
use crate::outlier::{
    DistanceTest, MahalanobisTest, OutlierRemoval, Pcm2D, Pcm3D, PcmSimple2D, PcmSimple3D,
    RejectionStats,
};
use crate::types::ObservationId;
use crate::values::Values;

/// Builds the strategy selected by `params`, or `None` for unconditional admission.
pub fn make_outlier_removal(
    params: &RobustSolverParams,
) -> Result<Option<Box<dyn OutlierRemoval>>, ConfigError> {
    params.validate()?;
    let symbols = params.special_symbols.iter().copied();
    let mahalanobis = MahalanobisTest::new(params.odom_threshold, params.lc_threshold);
    let distance = DistanceTest::new(params.trans_threshold, params.rot_threshold);
    let strategy: Option<Box<dyn OutlierRemoval>> = match params.outlier_removal {
        OutlierRemovalMethod::None => None,
        OutlierRemovalMethod::Pcm2D => Some(Box::new(Pcm2D::new(mahalanobis, symbols))),
        OutlierRemovalMethod::Pcm3D => Some(Box::new(Pcm3D::new(mahalanobis, symbols))),
        OutlierRemovalMethod::PcmSimple2D => Some(Box::new(PcmSimple2D::new(distance, symbols))),
        OutlierRemovalMethod::PcmSimple3D => Some(Box::new(PcmSimple3D::new(distance, symbols))),
    };
    Ok(strategy)
}

/// Incremental, outlier-robust pose graph solver.
///
/// Every operation runs to completion, including any re-optimization, before
/// returning. The solver is `Send` but not internally synchronized; wrap it in
/// a `Mutex` to share it across threads.
pub struct RobustSolver {
    graph: FactorGraph,
    values: Values,
    solver: SolverMode,
    special_symbols: BTreeSet<char>,
    outlier_removal: Option<Box<dyn OutlierRemoval>>,
    stats_logger: Option<Box<dyn StatsLogger>>,
    /// Solver-level informational output.
    debug: bool,
    /// Per-iteration optimizer output.
    verbose: bool,
    optimization_count: usize,
}

impl RobustSolver {
    pub fn new(params: &RobustSolverParams) -> Result<Self, RpgoError> {
        let mut outlier_removal = make_outlier_removal(params)?;
        let mut debug = true;
        let mut verbose = false;
        match params.verbosity {
            Verbosity::Update => {
                if let Some(strategy) = outlier_removal.as_mut() {
                    strategy.set_quiet();
                }
            }
            Verbosity::Quiet => {
                if let Some(strategy) = outlier_removal.as_mut() {
                    strategy.set_quiet();
                }
                debug = false;
            }
            Verbosity::Verbose => {
                verbose = true;
                info!(
                    "Starting RobustSolver (outlier removal: {}, solver: {:?})",
                    params.outlier_removal, params.solver
                );
            }
        }

        let mut solver = Self {
            graph: FactorGraph::new(),
            values: Values::new(),
            solver: params.solver,
            special_symbols: params.special_symbols.clone(),
            outlier_removal,
            stats_logger: None,
            debug,
            verbose,
            optimization_count: 0,
        };
        if let Some(folder) = &params.log_folder {
            solver.enable_logging(folder)?;
        }
        Ok(solver)
    }

    /// Admits a batch of factors and their new variables, re-optimizing if
    /// the admission calls for it, then records stats if logging is enabled.
    pub fn update(&mut self, factors: &FactorGraph, values: &Values) {
        if self.admit(factors, values) {
            self.optimize();
        }
        self.record_stats();
    }

    /// Like `update`, but always re-optimizes and never records stats.
    pub fn force_update(&mut self, factors: &FactorGraph, values: &Values) {
        self.admit(factors, values);
        self.optimize();
    }

    /// Removes the most recently accepted loop closure, within `scope` if
    /// given, and re-optimizes. Without a strategy the last factor of the
    /// graph is removed regardless of scope.
    pub fn remove_last_loop_closure(&mut self, scope: Option<ObservationId>) -> Option<Factor> {
        let removed = match self.outlier_removal.as_mut() {
            Some(strategy) => strategy.remove_last_loop_closure(scope, &mut self.graph),
            None => self.remove_last_factor(),
        };
        self.optimize();
        removed
    }

    /// Disables all loop closures involving `prefix` and re-optimizes.
    pub fn ignore_prefix(&mut self, prefix: char) {
        match self.outlier_removal.as_mut() {
            Some(strategy) => strategy.ignore_loop_closure_with_prefix(prefix, &mut self.graph),
            None => warn!("'ignore_prefix' is not available without outlier rejection"),
        }
        self.optimize();
    }

    /// Re-enables loop closures disabled by `ignore_prefix` and re-optimizes.
    pub fn revive_prefix(&mut self, prefix: char) {
        match self.outlier_removal.as_mut() {
            Some(strategy) => strategy.revive_loop_closure_with_prefix(prefix, &mut self.graph),
            None => warn!("'revive_prefix' is not available without outlier rejection"),
        }
        self.optimize();
    }

    pub fn ignored_prefixes(&self) -> Vec<char> {
        match &self.outlier_removal {
            Some(strategy) => strategy.ignored_prefixes(),
            None => {
                warn!("'ignored_prefixes' is not available without outlier rejection");
                Vec::new()
            }
        }
    }

    /// Writes `result.g2o` into `folder`, then the strategy's own data.
    pub fn save_data(&self, folder: impl AsRef<Path>) -> Result<(), RpgoError> {
        let folder = folder.as_ref();
        write_g2o(&folder.join("result.g2o"), &self.graph, &self.values)?;
        if let Some(strategy) = &self.outlier_removal {
            strategy.save_data(folder)?;
        }
        Ok(())
    }

    /// Starts per-update file logging in `folder`, truncating earlier logs.
    pub fn enable_logging(&mut self, folder: impl AsRef<Path>) -> Result<(), RpgoError> {
        let logger = FileStatsLogger::create(folder)?;
        self.stats_logger = Some(Box::new(logger));
        Ok(())
    }

    /// Replaces the stats sink, e.g. with an in-memory one.
    pub fn set_stats_logger(&mut self, logger: Box<dyn StatsLogger>) {
        self.stats_logger = Some(logger);
    }

    pub fn is_logging(&self) -> bool {
        self.stats_logger.is_some()
    }

    pub fn factors(&self) -> &FactorGraph {
        &self.graph
    }

    pub fn values(&self) -> &Values {
        &self.values
    }

    /// Total graph error at the current values.
    pub fn error(&self) -> f64 {
        self.graph.error(&self.values)
    }

    /// Number of optimizer runs since construction.
    pub fn optimization_count(&self) -> usize {
        self.optimization_count
    }

    pub fn solver_mode(&self) -> SolverMode {
        self.solver
    }

    /// Silences the solver's own informational output.
    pub fn set_quiet(&mut self) {
        self.debug = false;
        self.verbose = false;
    }

    pub fn has_outlier_removal(&self) -> bool {
        self.outlier_removal.is_some()
    }

    /// The strategy, for downcasting through `as_any`.
    pub fn outlier_removal(&self) -> Option<&dyn OutlierRemoval> {
        self.outlier_removal.as_deref()
    }

    pub fn rejection_stats(&self) -> Option<&RejectionStats> {
        self.outlier_removal.as_ref().map(|s| s.rejection_stats())
    }

    fn admit(&mut self, factors: &FactorGraph, values: &Values) -> bool {
        match self.outlier_removal.as_mut() {
            Some(strategy) => {
                strategy.remove_outliers(factors, values, &mut self.graph, &mut self.values)
            }
            None => self.add_and_check_if_optimize(factors, values),
        }
    }

    /// Unconditional admission. Any factor other than odometry warrants an optimization.
    fn add_and_check_if_optimize(&mut self, factors: &FactorGraph, values: &Values) -> bool {
        self.values.insert_missing(values);
        let mut do_optimize = false;
        for factor in factors {
            if factor.kind(&self.special_symbols) != FactorKind::Odometry {
                do_optimize = true;
            }
            self.graph.push(factor.clone());
        }
        do_optimize
    }

    fn remove_last_factor(&mut self) -> Option<Factor> {
        let removed = self.graph.pop();
        if removed.is_none() && self.debug {
            info!("No factor to remove");
        }
        removed
    }

    fn optimize(&mut self) {
        let result = match self.solver {
            SolverMode::LevenbergMarquardt => {
                if self.debug {
                    debug!("Running LM");
                }
                let params = LevenbergMarquardtParams {
                    diagonal_damping: true,
                    verbose: self.verbose,
                    ..Default::default()
                };
                LevenbergMarquardtOptimizer::new(params).optimize(&self.graph, &self.values)
            }
            SolverMode::GaussNewton => {
                if self.debug {
                    debug!("Running GN");
                }
                let params = GaussNewtonParams {
                    verbose: self.verbose,
                    ..Default::default()
                };
                GaussNewtonOptimizer::new(params).optimize(&self.graph, &self.values)
            }
        };
        if self.debug {
            info!(
                "Optimized {} factors over {} values: error {:.6} -> {:.6} in {} iterations",
                self.graph.len(),
                result.values.len(),
                result.initial_error,
                result.final_error,
                result.iterations
            );
        }
        self.values = result.values;
        self.optimization_count += 1;
    }

    fn record_stats(&mut self) {
        let Some(logger) = self.stats_logger.as_mut() else {
            return;
        };
        let Some(strategy) = &self.outlier_removal else {
            warn!("Stats logging requires outlier rejection; skipping record");
            return;
        };
        let record = UpdateRecord {
            stats: strategy.rejection_stats().clone(),
            error: self.graph.error(&self.values),
        };
        logger.record(&record);
    }
}
