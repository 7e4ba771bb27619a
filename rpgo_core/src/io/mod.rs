// rpgo_core/src/io/mod.rs

//! Graph interchange files.

mod g2o;

pub use g2o::{read_g2o, write_g2o};
