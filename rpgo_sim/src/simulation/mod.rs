// rpgo_sim/src/simulation/mod.rs

pub mod dataset;
pub mod prng;
pub mod runner;
