// rpgo_sim/src/prelude.rs

pub use crate::cli::Cli;
pub use crate::simulation::dataset::{Batch, Dataset, SyntheticConfig};
pub use crate::simulation::prng::SimulationRng;
pub use crate::simulation::runner::{run, RunSummary};
