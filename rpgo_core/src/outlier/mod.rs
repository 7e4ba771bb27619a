// rpgo_core/src/outlier/mod.rs

//! Outlier rejection: the pluggable policy deciding which incoming
//! measurements are admitted into the estimation graph.

use std::any::Any;
use std::path::Path;

use crate::error::IoError;
use crate::factors::{Factor, FactorGraph};
use crate::types::ObservationId;
use crate::values::Values;

/// Counters describing what the rejection policy has seen and admitted,
/// plus the consistency errors computed during the latest batch.
///
/// `lc`, `odom_consistent_lc`, `multirobot_lc` and `landmark_measurements`
/// count every measurement ever ingested and never decrease; the `good_*`
/// counters reflect the currently accepted sets.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RejectionStats {
    pub lc: usize,
    pub good_lc: usize,
    pub odom_consistent_lc: usize,
    pub multirobot_lc: usize,
    pub good_multirobot_lc: usize,
    pub landmark_measurements: usize,
    pub good_landmark_measurements: usize,
    pub consistency_error: Vec<f64>,
}

// --- The OutlierRemoval Trait ("Contract") ---
/// The contract for any algorithm that performs the outlier rejection role.
///
/// Methods taking `graph`/`values` get exclusive access to the solver's graph
/// state for the duration of the call only; implementations must not retain it.
pub trait OutlierRemoval: Send + Sync {
    /// Admits the trustworthy part of a new batch into `graph`/`values`.
    /// Returns `true` if the graph should be re-optimized now.
    fn remove_outliers(
        &mut self,
        new_factors: &FactorGraph,
        new_values: &Values,
        graph: &mut FactorGraph,
        values: &mut Values,
    ) -> bool;

    /// Detaches the most recently accepted loop closure, globally or within
    /// one observation channel. `None` if there is nothing to remove.
    fn remove_last_loop_closure(
        &mut self,
        scope: Option<ObservationId>,
        graph: &mut FactorGraph,
    ) -> Option<Factor>;

    /// Disables every loop closure whose channel involves `prefix`, keeping history.
    fn ignore_loop_closure_with_prefix(&mut self, prefix: char, graph: &mut FactorGraph);

    /// Re-enables loop closures disabled by `ignore_loop_closure_with_prefix`.
    fn revive_loop_closure_with_prefix(&mut self, prefix: char, graph: &mut FactorGraph);

    fn ignored_prefixes(&self) -> Vec<char>;

    fn rejection_stats(&self) -> &RejectionStats;

    /// Persists auxiliary data (e.g. rejection history) into `folder`.
    fn save_data(&self, folder: &Path) -> Result<(), IoError>;

    /// Suppresses the strategy's own informational output.
    fn set_quiet(&mut self);

    /// Allows for dynamic downcasting to access algorithm-specific methods.
    fn as_any(&self) -> &dyn Any;
}

// --- Implementation sub-modules ---
mod clique;
mod consistency;
mod pcm;
mod trajectory;

pub use consistency::{ConsistencyTest, DistanceTest, MahalanobisTest};
pub use pcm::{Pcm, Pcm2D, Pcm3D, PcmSimple2D, PcmSimple3D};
pub use trajectory::PoseWithCovariance;
