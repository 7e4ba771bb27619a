// rpgo_core/src/prelude.rs

// --- Core Abstractions (The main contracts of the library) ---
pub use crate::logging::StatsLogger;
pub use crate::optimizer::OptimizerBackend;
pub use crate::outlier::{ConsistencyTest, OutlierRemoval};
pub use crate::values::Pose;

// --- Core Data Structures (The "nouns" of the library) ---
pub use crate::factors::{Factor, FactorGraph, FactorKind, NoiseModel};
pub use crate::outlier::RejectionStats;
pub use crate::types::{Key, ObservationId};
pub use crate::values::{Pose2, Pose3, Value, Values};

// --- The Solver and its configuration ---
pub use crate::error::{ConfigError, IoError, RpgoError};
pub use crate::logging::{FileStatsLogger, UpdateRecord};
pub use crate::solver::{
    OutlierRemovalMethod, RobustSolver, RobustSolverParams, SolverMode, Verbosity,
};

// --- Concrete implementations (Export common ones for convenience) ---
pub use crate::io::{read_g2o, write_g2o};
pub use crate::optimizer::{GaussNewtonOptimizer, LevenbergMarquardtOptimizer};
pub use crate::outlier::{Pcm2D, Pcm3D, PcmSimple2D, PcmSimple3D};
