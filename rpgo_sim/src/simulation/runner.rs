// rpgo_sim/src/simulation/runner.rs

//! Drives a `RobustSolver` through a dataset, one batch per `update`.

use std::path::Path;

use tracing::info;

use super::dataset::{self, Dataset, SyntheticConfig};
use super::prng::SimulationRng;
use crate::cli::Cli;
use rpgo_core::prelude::*;

/// What a run produced.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub updates: usize,
    pub factors: usize,
    pub values: usize,
    pub optimizations: usize,
    pub error: f64,
    pub stats: Option<RejectionStats>,
    /// Mean translation error against ground truth, for synthetic datasets.
    pub translation_error: Option<f64>,
    pub inliers: usize,
    pub outliers: usize,
}

/// Builds the dataset requested on the command line.
pub fn load_dataset(cli: &Cli) -> Result<Dataset, RpgoError> {
    match &cli.input {
        Some(path) => {
            info!("Loading pose graph from {:?}", path);
            let (graph, values) = read_g2o(path, cli.prefix)?;
            info!("Loaded {} factors over {} variables", graph.len(), values.len());
            Ok(dataset::from_graph(&graph, &values))
        }
        None => {
            let config = SyntheticConfig {
                poses: cli.poses,
                outliers: cli.outliers,
                prefix: cli.prefix,
                ..Default::default()
            };
            info!(
                "Generating synthetic dataset: {} poses, {} outliers, seed {}",
                config.poses, config.outliers, cli.seed
            );
            let mut rng = SimulationRng::from_seed(cli.seed);
            Ok(dataset::generate_synthetic(&config, &mut rng))
        }
    }
}

/// Solver parameters from `--config`, or PCM matching the dataset's dimension.
pub fn load_params(cli: &Cli, dataset: &Dataset) -> Result<RobustSolverParams, RpgoError> {
    if let Some(path) = &cli.config {
        info!("Loading solver parameters from {:?}", path);
        return Ok(RobustSolverParams::from_toml_file(path)?);
    }
    let spatial = dataset
        .batches
        .iter()
        .flat_map(|b| b.values.iter())
        .any(|(_, v)| matches!(v, Value::Pose3(_)));
    let mut params = RobustSolverParams::default();
    if spatial {
        params.set_pcm_3d_params(10.0, 10.0, Verbosity::Update);
    } else {
        params.set_pcm_2d_params(10.0, 10.0, Verbosity::Update);
    }
    Ok(params)
}

/// Feeds every batch to the solver. Returns the number of updates.
pub fn stream(solver: &mut RobustSolver, dataset: &Dataset) -> usize {
    for batch in &dataset.batches {
        solver.update(&batch.factors, &batch.values);
    }
    dataset.batches.len()
}

pub fn run(cli: &Cli) -> Result<RunSummary, RpgoError> {
    let dataset = load_dataset(cli)?;
    let params = load_params(cli, &dataset)?;
    prepare_output(&cli.output)?;

    let mut solver = RobustSolver::new(&params)?;
    if cli.log {
        solver.enable_logging(&cli.output)?;
    }
    let updates = stream(&mut solver, &dataset);
    solver.save_data(&cli.output)?;

    let summary = RunSummary {
        updates,
        factors: solver.factors().len(),
        values: solver.values().len(),
        optimizations: solver.optimization_count(),
        error: solver.error(),
        stats: solver.rejection_stats().cloned(),
        translation_error: dataset
            .ground_truth
            .as_ref()
            .and_then(|truth| dataset::mean_translation_error(solver.values(), truth)),
        inliers: dataset.inliers,
        outliers: dataset.outliers,
    };
    report(&summary, &cli.output);
    Ok(summary)
}

fn prepare_output(folder: &Path) -> Result<(), IoError> {
    std::fs::create_dir_all(folder).map_err(|e| IoError::file(folder, e))
}

fn report(summary: &RunSummary, output: &Path) {
    info!(
        "Streamed {} updates: {} factors, {} values, {} optimizations, final error {:.6}",
        summary.updates, summary.factors, summary.values, summary.optimizations, summary.error
    );
    if let Some(stats) = &summary.stats {
        info!(
            "Loop closures: {} accepted of {} ({} odometry-consistent); landmarks: {} of {}",
            stats.good_lc,
            stats.lc,
            stats.odom_consistent_lc,
            stats.good_landmark_measurements,
            stats.landmark_measurements
        );
    }
    if summary.inliers + summary.outliers > 0 {
        info!(
            "Dataset held {} correct and {} outlier loop closures",
            summary.inliers, summary.outliers
        );
    }
    if let Some(error) = summary.translation_error {
        info!("Mean translation error against ground truth: {:.4} m", error);
    }
    info!("Results written to {:?}", output);
}
