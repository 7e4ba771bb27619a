// rpgo_sim/src/simulation/dataset.rs

//! Pose graph datasets, arranged as the sequence of batches a robot would
//! send to the solver while driving.

use std::collections::BTreeMap;
use std::f64::consts::{FRAC_PI_2, PI};

use nalgebra::{Vector2, Vector3};
use rand::Rng;
use tracing::warn;

use super::prng::SimulationRng;
use rpgo_core::prelude::*;

/// One `update` call worth of measurements.
#[derive(Debug, Clone, Default)]
pub struct Batch {
    pub factors: FactorGraph,
    pub values: Values,
}

#[derive(Debug, Clone, Default)]
pub struct Dataset {
    pub batches: Vec<Batch>,
    /// True poses, when known.
    pub ground_truth: Option<Values>,
    /// Number of injected outlier loop closures.
    pub outliers: usize,
    /// Number of correct loop closures.
    pub inliers: usize,
}

impl Dataset {
    pub fn factor_count(&self) -> usize {
        self.batches.iter().map(|b| b.factors.len()).sum()
    }
}

/// Parameters of the synthetic square-loop dataset.
#[derive(Debug, Clone)]
pub struct SyntheticConfig {
    pub poses: usize,
    pub outliers: usize,
    pub prefix: char,
    /// Unit steps per side of the square.
    pub side: usize,
    /// Actual odometry noise `[x, y, θ]`.
    pub odometry_noise: [f64; 3],
    /// Noise model attached to odometry factors. Wider than the actual
    /// noise, since composed odometry covariances ignore heading coupling.
    pub odometry_sigmas: [f64; 3],
    pub closure_noise: [f64; 3],
    pub closure_sigmas: [f64; 3],
    /// Add a revisit loop closure every `closure_stride` poses.
    pub closure_stride: usize,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            poses: 100,
            outliers: 10,
            prefix: 'a',
            side: 10,
            odometry_noise: [0.01, 0.01, 0.001],
            odometry_sigmas: [0.05, 0.05, 0.01],
            closure_noise: [0.01, 0.01, 0.001],
            closure_sigmas: [0.05, 0.05, 0.01],
            closure_stride: 2,
        }
    }
}

/// Step from pose `i - 1` to pose `i` on the square: one meter forward,
/// turning left at each corner.
fn square_step(i: usize, side: usize) -> Pose2 {
    let turn = if i % side == 0 { FRAC_PI_2 } else { 0.0 };
    Pose2::new(Vector2::new(1.0, 0.0), turn)
}

fn perturb(pose: &Pose2, noise: [f64; 3]) -> Pose2 {
    Pose2::new(
        pose.translation.vector + Vector2::new(noise[0], noise[1]),
        pose.rotation.angle() + noise[2],
    )
}

/// Generates a trajectory that laps a square, revisit loop closures between
/// poses one lap apart, and uniformly random outlier loop closures.
pub fn generate_synthetic(config: &SyntheticConfig, rng: &mut SimulationRng) -> Dataset {
    if config.poses == 0 {
        return Dataset::default();
    }
    let side = config.side.max(1);
    let lap = 4 * side;
    let key = |i: usize| Key::new(config.prefix, i as u64);
    let odometry_noise = NoiseModel::diagonal(&config.odometry_sigmas);
    let closure_noise = NoiseModel::diagonal(&config.closure_sigmas);

    let mut truth = vec![Pose2::identity()];
    for i in 1..config.poses {
        truth.push(truth[i - 1] * square_step(i, side));
    }

    // Outliers attach to random later poses.
    let mut outliers_at: BTreeMap<usize, usize> = BTreeMap::new();
    if config.poses > 2 {
        for _ in 0..config.outliers {
            *outliers_at.entry(rng.0.gen_range(2..config.poses)).or_default() += 1;
        }
    }

    let mut dataset = Dataset {
        ground_truth: Some(
            truth
                .iter()
                .enumerate()
                .map(|(i, p)| (key(i), Value::from(*p)))
                .collect(),
        ),
        ..Default::default()
    };

    let mut first = Batch::default();
    first.factors.push(Factor::prior(
        key(0),
        Pose2::identity(),
        NoiseModel::isotropic(3, 0.01),
    ));
    first.values.insert(key(0), Pose2::identity());
    dataset.batches.push(first);

    let mut estimate = Pose2::identity();
    for i in 1..config.poses {
        let mut batch = Batch::default();
        let step = perturb(&square_step(i, side), rng.gaussian(&config.odometry_noise));
        estimate *= step;
        batch
            .factors
            .push(Factor::between(key(i - 1), key(i), step, odometry_noise.clone()));
        batch.values.insert(key(i), estimate);

        if i >= lap && i % config.closure_stride.max(1) == 0 {
            let j = i - lap;
            let measured = perturb(
                &(truth[j].inverse() * truth[i]),
                rng.gaussian(&config.closure_noise),
            );
            batch
                .factors
                .push(Factor::between(key(j), key(i), measured, closure_noise.clone()));
            dataset.inliers += 1;
        }

        for _ in 0..outliers_at.get(&i).copied().unwrap_or(0) {
            let j = rng.0.gen_range(0..i - 1);
            let measured = Pose2::new(
                Vector2::new(rng.0.gen_range(-5.0..5.0), rng.0.gen_range(-5.0..5.0)),
                rng.0.gen_range(-PI..PI),
            );
            batch
                .factors
                .push(Factor::between(key(j), key(i), measured, closure_noise.clone()));
            dataset.outliers += 1;
        }
        dataset.batches.push(batch);
    }
    dataset
}

/// Arranges a loaded graph for streaming: a prior on the first variable,
/// then one batch per variable holding every factor that variable completes.
pub fn from_graph(graph: &FactorGraph, values: &Values) -> Dataset {
    let mut by_key: BTreeMap<Key, FactorGraph> = BTreeMap::new();
    let mut dropped = 0;
    for factor in graph {
        let keys = factor.keys();
        if !keys.iter().all(|k| values.contains(k)) {
            dropped += 1;
            continue;
        }
        if let Some(last) = keys.into_iter().max() {
            by_key.entry(last).or_default().push(factor.clone());
        }
    }
    if dropped > 0 {
        warn!("Dropped {} factors referencing unknown variables", dropped);
    }

    let mut dataset = Dataset::default();
    for (idx, (key, value)) in values.iter().enumerate() {
        let mut batch = Batch::default();
        if idx == 0 {
            let noise = NoiseModel::isotropic(value.dim(), 0.01);
            batch.factors.push(Factor::prior(*key, value.clone(), noise));
        }
        batch.values.insert(*key, value.clone());
        if let Some(factors) = by_key.remove(key) {
            batch.factors.extend(&factors);
        }
        dataset.batches.push(batch);
    }
    dataset
}

fn position(value: &Value) -> Vector3<f64> {
    match value {
        Value::Pose2(p) => Vector3::new(p.translation.x, p.translation.y, 0.0),
        Value::Pose3(p) => p.translation.vector,
    }
}

/// Mean translation error of `estimate` against `truth` over shared keys.
pub fn mean_translation_error(estimate: &Values, truth: &Values) -> Option<f64> {
    let errors: Vec<f64> = truth
        .iter()
        .filter_map(|(key, t)| Some((position(estimate.get(key)?) - position(t)).norm()))
        .collect();
    if errors.is_empty() {
        return None;
    }
    Some(errors.iter().sum::<f64>() / errors.len() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn small() -> SyntheticConfig {
        SyntheticConfig {
            poses: 30,
            outliers: 3,
            side: 5,
            ..Default::default()
        }
    }

    #[test]
    fn square_trajectory_closes() {
        let config = small();
        let dataset = generate_synthetic(&config, &mut SimulationRng::from_seed(1));
        let truth = dataset.ground_truth.unwrap();
        let p0 = truth.pose::<Pose2>(&Key::new('a', 0)).unwrap();
        let p20 = truth.pose::<Pose2>(&Key::new('a', 20)).unwrap();
        assert_abs_diff_eq!(p0.translation.vector, p20.translation.vector, epsilon = 1e-9);
        assert_abs_diff_eq!(p20.rotation.angle(), 0.0, epsilon = 1e-9);
    }

    #[test]
    fn one_batch_per_pose_with_all_measurements() {
        let config = small();
        let dataset = generate_synthetic(&config, &mut SimulationRng::from_seed(1));
        assert_eq!(dataset.batches.len(), 30);
        // Closures at poses 20, 22, ..., 28.
        assert_eq!(dataset.inliers, 5);
        assert_eq!(dataset.outliers, 3);
        assert_eq!(dataset.factor_count(), 1 + 29 + 5 + 3);
        assert!(dataset.batches.iter().all(|b| b.values.len() == 1));
    }

    #[test]
    fn same_seed_same_dataset() {
        let config = small();
        let d1 = generate_synthetic(&config, &mut SimulationRng::from_seed(7));
        let d2 = generate_synthetic(&config, &mut SimulationRng::from_seed(7));
        let d3 = generate_synthetic(&config, &mut SimulationRng::from_seed(8));
        let factors = |d: &Dataset| -> Vec<Factor> {
            d.batches.iter().flat_map(|b| b.factors.iter().cloned()).collect()
        };
        assert_eq!(factors(&d1), factors(&d2));
        assert_ne!(factors(&d1), factors(&d3));
    }

    #[test]
    fn loaded_graph_streams_by_latest_variable() {
        let config = SyntheticConfig {
            outliers: 0,
            ..small()
        };
        let synthetic = generate_synthetic(&config, &mut SimulationRng::from_seed(3));
        let mut graph = FactorGraph::new();
        let mut values = Values::new();
        for batch in &synthetic.batches {
            // Without the prior, as a g2o file would hold it.
            for factor in batch.factors.iter().filter(|f| f.keys().len() == 2) {
                graph.push(factor.clone());
            }
            values.insert_missing(&batch.values);
        }
        graph.push(Factor::between(
            Key::new('a', 0),
            Key::new('z', 0),
            Pose2::identity(),
            NoiseModel::isotropic(3, 0.1),
        ));

        let dataset = from_graph(&graph, &values);
        assert_eq!(dataset.batches.len(), 30);
        assert_eq!(dataset.factor_count(), synthetic.factor_count());
        let last = &dataset.batches[29];
        // Odometry 28-29 only; closures land on even poses.
        assert_eq!(last.factors.len(), 1);
        assert!(matches!(dataset.batches[0].factors.get(0), Some(Factor::Prior { .. })));
    }

    #[test]
    fn translation_error_against_truth() {
        let mut truth = Values::new();
        let mut estimate = Values::new();
        truth.insert(Key::new('a', 0), Pose2::identity());
        truth.insert(Key::new('a', 1), Pose2::new(Vector2::new(1.0, 0.0), 0.0));
        estimate.insert(Key::new('a', 0), Pose2::new(Vector2::new(0.3, 0.4), 0.0));
        estimate.insert(Key::new('a', 1), Pose2::new(Vector2::new(1.0, 0.0), 0.0));
        let error = mean_translation_error(&estimate, &truth).unwrap();
        assert_abs_diff_eq!(error, 0.25, epsilon = 1e-12);
        assert!(mean_translation_error(&Values::new(), &truth).is_none());
    }
}
