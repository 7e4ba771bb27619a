// rpgo_core/src/lib.rs

// This file defines the public modules of the library.
pub mod error;
pub mod factors;
pub mod io;
pub mod logging;
pub mod optimizer;
pub mod outlier;
pub mod prelude;
pub mod solver;
pub mod types;
pub mod values;
