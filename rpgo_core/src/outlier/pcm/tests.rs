use nalgebra::{Vector2, Vector3};

use super::*;
use crate::factors::NoiseModel;
use crate::io::read_g2o;

fn pose(x: f64, y: f64, theta: f64) -> Pose2 {
    Pose2::new(Vector2::new(x, y), theta)
}

fn noise() -> NoiseModel {
    NoiseModel::isotropic(3, 0.1)
}

fn between(k1: Key, k2: Key, measured: Pose2) -> Factor {
    Factor::between(k1, k2, measured, noise())
}

/// Prior on `chr0` at `start`, then `n - 1` unit steps along x.
fn chain(chr: char, n: u64, start: Pose2) -> (FactorGraph, Values) {
    let mut graph = FactorGraph::new();
    let mut values = Values::new();
    graph.push(Factor::prior(Key::new(chr, 0), start, noise()));
    values.insert(Key::new(chr, 0), start);
    for i in 1..n {
        graph.push(between(Key::new(chr, i - 1), Key::new(chr, i), pose(1.0, 0.0, 0.0)));
        values.insert(Key::new(chr, i), start * pose(i as f64, 0.0, 0.0));
    }
    (graph, values)
}

struct Fixture<T: ConsistencyTest> {
    pcm: Pcm<Pose2, T>,
    graph: FactorGraph,
    values: Values,
}

impl<T: ConsistencyTest> Fixture<T> {
    fn new(test: T, special: &[char]) -> Self {
        Self {
            pcm: Pcm::new(test, special.iter().copied()),
            graph: FactorGraph::new(),
            values: Values::new(),
        }
    }

    fn feed(&mut self, factors: FactorGraph, values: Values) -> bool {
        self.pcm
            .remove_outliers(&factors, &values, &mut self.graph, &mut self.values)
    }

    fn feed_factor(&mut self, factor: Factor) -> bool {
        self.feed([factor].into_iter().collect(), Values::new())
    }

    fn with_chain(mut self, chr: char, n: u64, start: Pose2) -> Self {
        let (graph, values) = chain(chr, n, start);
        self.feed(graph, values);
        self
    }
}

fn mahalanobis() -> Fixture<MahalanobisTest> {
    Fixture::new(MahalanobisTest::new(10.0, 10.0), &['l'])
}

fn a(i: u64) -> Key {
    Key::new('a', i)
}

fn b(i: u64) -> Key {
    Key::new('b', i)
}

#[test]
fn odometry_alone_does_not_request_optimization() {
    let mut fx = mahalanobis();
    let mut graph = FactorGraph::new();
    let mut values = Values::new();
    values.insert(a(0), Pose2::identity());
    values.insert(a(1), pose(1.0, 0.0, 0.0));
    graph.push(between(a(0), a(1), pose(1.0, 0.0, 0.0)));
    assert!(!fx.feed(graph, values));
    assert_eq!(fx.graph.len(), 1);
    assert_eq!(fx.values.len(), 2);
}

#[test]
fn prior_requests_optimization() {
    let mut fx = mahalanobis();
    let (graph, values) = chain('a', 3, Pose2::identity());
    assert!(fx.feed(graph, values));
    assert_eq!(fx.graph.len(), 3);
    assert_eq!(fx.values.len(), 3);
}

#[test]
fn consistent_loop_closure_is_accepted() {
    let mut fx = mahalanobis().with_chain('a', 5, Pose2::identity());
    assert!(fx.feed_factor(between(a(0), a(4), pose(4.0, 0.0, 0.0))));
    assert_eq!(fx.graph.len(), 6);

    let stats = fx.pcm.rejection_stats();
    assert_eq!(stats.lc, 1);
    assert_eq!(stats.good_lc, 1);
    assert_eq!(stats.odom_consistent_lc, 1);
    assert_eq!(stats.consistency_error.len(), 1);
    assert!(stats.consistency_error[0] < 1e-6);
}

#[test]
fn loop_closure_contradicting_odometry_is_rejected() {
    let mut fx = mahalanobis().with_chain('a', 5, Pose2::identity());
    assert!(!fx.feed_factor(between(a(0), a(4), pose(0.0, 3.0, 1.0))));
    assert_eq!(fx.graph.len(), 5);

    let stats = fx.pcm.rejection_stats();
    assert_eq!(stats.lc, 1);
    assert_eq!(stats.good_lc, 0);
    assert_eq!(stats.odom_consistent_lc, 0);
    assert!(stats.consistency_error[0] > 10.0);
}

#[test]
fn loop_closures_in_the_same_batch_as_their_odometry_are_checked() {
    let mut fx = mahalanobis();
    let (mut graph, values) = chain('a', 4, Pose2::identity());
    graph.push(between(a(3), a(0), pose(-3.0, 0.0, 0.0)));
    assert!(fx.feed(graph, values));
    assert_eq!(fx.pcm.rejection_stats().good_lc, 1);
}

#[test]
fn inter_robot_outlier_is_excluded_from_clique() {
    let mut fx = mahalanobis()
        .with_chain('a', 5, Pose2::identity())
        .with_chain('b', 5, pose(0.0, 2.0, 0.0));

    let batch: FactorGraph = [
        between(a(1), b(1), pose(0.0, 2.0, 0.0)),
        between(a(3), b(2), pose(-1.0, 2.0, 0.0)),
        between(a(2), b(4), pose(5.0, -3.0, 0.5)),
    ]
    .into_iter()
    .collect();
    assert!(fx.feed(batch, Values::new()));

    let stats = fx.pcm.rejection_stats();
    assert_eq!(stats.lc, 3);
    assert_eq!(stats.multirobot_lc, 3);
    assert_eq!(stats.good_multirobot_lc, 2);
    assert_eq!(stats.good_lc, 2);
    // Inter-robot closures have no odometry path to contradict.
    assert_eq!(stats.odom_consistent_lc, 3);

    let accepted = fx.pcm.accepted_loop_closures(ObservationId::new('a', 'b'));
    assert_eq!(accepted.len(), 2);
    assert_eq!(accepted[0].keys(), vec![a(1), b(1)]);
    assert_eq!(accepted[1].keys(), vec![a(3), b(2)]);
}

#[test]
fn reversed_inter_robot_measurements_are_oriented() {
    let mut fx = mahalanobis()
        .with_chain('a', 3, Pose2::identity())
        .with_chain('b', 3, pose(0.0, 2.0, 0.0));
    fx.feed_factor(between(a(1), b(1), pose(0.0, 2.0, 0.0)));
    // Same geometry expressed from b's side.
    fx.feed_factor(between(b(2), a(0), pose(-2.0, -2.0, 0.0)));
    assert_eq!(fx.pcm.rejection_stats().good_multirobot_lc, 2);
}

#[test]
fn remove_last_loop_closure_pops_in_acceptance_order() {
    let mut fx = mahalanobis().with_chain('a', 6, Pose2::identity());
    let first = between(a(0), a(4), pose(4.0, 0.0, 0.0));
    let second = between(a(1), a(5), pose(4.0, 0.0, 0.0));
    fx.feed_factor(first.clone());
    fx.feed_factor(second.clone());
    assert_eq!(fx.graph.len(), 8);

    assert_eq!(fx.pcm.remove_last_loop_closure(None, &mut fx.graph), Some(second));
    assert_eq!(fx.graph.len(), 7);
    assert_eq!(fx.pcm.remove_last_loop_closure(None, &mut fx.graph), Some(first));
    assert_eq!(fx.graph.len(), 6);
    assert_eq!(fx.pcm.remove_last_loop_closure(None, &mut fx.graph), None);
    assert_eq!(fx.graph.len(), 6);
    let stats = fx.pcm.rejection_stats();
    assert_eq!((stats.lc, stats.odom_consistent_lc), (2, 2));
    assert_eq!(stats.good_lc, 0);
}

#[test]
fn remove_last_loop_closure_without_any_is_a_no_op() {
    let mut fx = mahalanobis().with_chain('a', 3, Pose2::identity());
    let before = fx.graph.clone();
    assert!(fx.pcm.remove_last_loop_closure(None, &mut fx.graph).is_none());
    assert_eq!(fx.graph, before);
}

#[test]
fn remove_last_loop_closure_respects_scope() {
    let mut fx = mahalanobis()
        .with_chain('a', 5, Pose2::identity())
        .with_chain('b', 5, pose(0.0, 2.0, 0.0));
    let intra = between(a(0), a(4), pose(4.0, 0.0, 0.0));
    let inter = between(a(1), b(1), pose(0.0, 2.0, 0.0));
    fx.feed_factor(intra.clone());
    fx.feed_factor(inter.clone());

    let removed = fx
        .pcm
        .remove_last_loop_closure(Some(ObservationId::new('a', 'a')), &mut fx.graph);
    assert_eq!(removed, Some(intra));
    assert_eq!(
        fx.pcm.accepted_loop_closures(ObservationId::new('a', 'b')),
        vec![inter]
    );
    assert!(fx
        .pcm
        .remove_last_loop_closure(Some(ObservationId::new('a', 'a')), &mut fx.graph)
        .is_none());
}

#[test]
fn ignore_and_revive_toggle_channel_membership() {
    let mut fx = mahalanobis()
        .with_chain('a', 5, Pose2::identity())
        .with_chain('b', 5, pose(0.0, 2.0, 0.0));
    fx.feed_factor(between(a(0), a(4), pose(4.0, 0.0, 0.0)));
    fx.feed_factor(between(a(1), b(1), pose(0.0, 2.0, 0.0)));
    let full = fx.graph.clone();
    assert_eq!(full.len(), 12);

    fx.pcm.ignore_loop_closure_with_prefix('b', &mut fx.graph);
    assert_eq!(fx.pcm.ignored_prefixes(), vec!['b']);
    assert_eq!(fx.graph.len(), 11);
    // Ignored channels are out of reach of removal.
    assert!(fx
        .pcm
        .remove_last_loop_closure(Some(ObservationId::new('a', 'b')), &mut fx.graph)
        .is_none());

    fx.pcm.revive_loop_closure_with_prefix('b', &mut fx.graph);
    assert!(fx.pcm.ignored_prefixes().is_empty());
    assert_eq!(fx.graph, full);
}

#[test]
fn landmark_measurements_are_checked_against_each_other() {
    let mut fx = mahalanobis().with_chain('a', 5, Pose2::identity());
    let l0 = Key::new('l', 0);
    // Landmark sits at (1, 1) in the world frame.
    assert!(fx.feed_factor(between(a(1), l0, pose(0.0, 1.0, 0.0))));
    fx.feed_factor(between(a(3), l0, pose(-2.0, 1.0, 0.0)));
    fx.feed_factor(between(a(4), l0, pose(5.0, 5.0, 0.0)));

    let stats = fx.pcm.rejection_stats();
    assert_eq!(stats.landmark_measurements, 3);
    assert_eq!(stats.good_landmark_measurements, 2);
    assert_eq!(stats.lc, 0);
    assert_eq!(fx.graph.len(), 5 + 2);
}

#[test]
fn distance_variant_uses_geometric_thresholds() {
    let mut fx = Fixture::new(DistanceTest::new(0.5, 0.2), &[]).with_chain(
        'a',
        5,
        Pose2::identity(),
    );
    assert!(fx.feed_factor(between(a(0), a(4), pose(4.3, 0.0, 0.1))));
    assert!(!fx.feed_factor(between(a(0), a(3), pose(3.0, 0.0, 0.5))));

    let stats = fx.pcm.rejection_stats();
    assert_eq!(stats.lc, 2);
    assert_eq!(stats.good_lc, 1);
    assert!((stats.consistency_error[0] - 0.0).abs() < 1e-9);
}

#[test]
fn mismatched_pose_type_is_discarded() {
    let mut fx = mahalanobis().with_chain('a', 3, Pose2::identity());
    let spatial = Factor::between(
        a(0),
        a(2),
        Pose3::new(Vector3::new(2.0, 0.0, 0.0), Vector3::zeros()),
        NoiseModel::isotropic(6, 0.1),
    );
    assert!(!fx.feed_factor(spatial));
    assert_eq!(fx.pcm.rejection_stats().lc, 0);
    assert_eq!(fx.graph.len(), 3);
}

#[test]
fn mismatched_noise_dimension_is_discarded() {
    let mut fx = mahalanobis().with_chain('a', 3, Pose2::identity());
    let odometry = Factor::between(a(2), a(3), pose(1.0, 0.0, 0.0), NoiseModel::isotropic(6, 0.1));
    let closure = Factor::between(a(0), a(2), pose(2.0, 0.0, 0.0), NoiseModel::isotropic(2, 0.1));
    assert!(!fx.feed([odometry, closure].into_iter().collect(), Values::new()));
    assert_eq!(fx.pcm.rejection_stats().lc, 0);
    assert_eq!(fx.graph.len(), 3);
}

#[test]
fn save_data_writes_accepted_and_rejected_closures() {
    let mut fx = mahalanobis().with_chain('a', 5, Pose2::identity());
    fx.feed_factor(between(a(0), a(4), pose(4.0, 0.0, 0.0)));
    fx.feed_factor(between(a(0), a(3), pose(-7.0, 2.0, 0.0)));

    let dir = tempfile::tempdir().unwrap();
    fx.pcm.save_data(dir.path()).unwrap();

    let (accepted, _) = read_g2o(&dir.path().join("loop_closures.g2o"), 'a').unwrap();
    let (rejected, _) = read_g2o(&dir.path().join("rejected_loop_closures.g2o"), 'a').unwrap();
    assert_eq!(accepted.len(), 1);
    assert_eq!(rejected.len(), 1);
    assert_eq!(rejected.get(0).unwrap().keys(), vec![a(0), a(3)]);
}

#[test]
fn as_any_exposes_concrete_type() {
    let fx = mahalanobis();
    let strategy: &dyn OutlierRemoval = &fx.pcm;
    let pcm = strategy.as_any().downcast_ref::<Pcm2D>().unwrap();
    assert_eq!(pcm.test().odom_threshold, 10.0);
}
