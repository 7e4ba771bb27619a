use clap::Parser;
use std::path::PathBuf;

/// rpgo: streams a pose graph into an outlier-robust solver.
///
/// Without `--input`, a synthetic square-loop dataset with injected outlier
/// loop closures is generated from `--seed`.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// TOML file with the solver parameters. Defaults to planar PCM.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// A g2o file to stream instead of a synthetic dataset.
    #[arg(short, long)]
    pub input: Option<PathBuf>,

    /// Folder receiving `result.g2o`, the rejection data and the logs.
    #[arg(short, long, default_value = "rpgo_output")]
    pub output: PathBuf,

    /// Seed of the synthetic dataset.
    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Number of poses in the synthetic trajectory.
    #[arg(long, default_value_t = 100)]
    pub poses: usize,

    /// Number of outlier loop closures injected into the synthetic dataset.
    #[arg(long, default_value_t = 10)]
    pub outliers: usize,

    /// Write per-update rejection stats into the output folder.
    #[arg(long, default_value_t = false)]
    pub log: bool,

    /// Robot prefix of the synthetic trajectory, and of plain g2o ids.
    #[arg(long, default_value_t = 'a')]
    pub prefix: char,
}
