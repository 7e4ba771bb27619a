// rpgo_core/src/outlier/pcm.rs

use std::any::Any;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;

use tracing::{debug, info, warn};

use super::clique::max_clique;
use super::consistency::{ConsistencyTest, DistanceTest, MahalanobisTest};
use super::trajectory::{PoseWithCovariance, Trajectory};
use super::{OutlierRemoval, RejectionStats};
use crate::error::IoError;
use crate::factors::{Factor, FactorGraph, FactorKind};
use crate::io::write_g2o;
use crate::types::{Key, ObservationId};
use crate::values::{Pose, Pose2, Pose3, Values};

/// Planar PCM with Mahalanobis-distance consistency checks.
pub type Pcm2D = Pcm<Pose2, MahalanobisTest>;
/// Spatial PCM with Mahalanobis-distance consistency checks.
pub type Pcm3D = Pcm<Pose3, MahalanobisTest>;
/// Planar PCM with translation/rotation distance checks.
pub type PcmSimple2D = Pcm<Pose2, DistanceTest>;
/// Spatial PCM with translation/rotation distance checks.
pub type PcmSimple3D = Pcm<Pose3, DistanceTest>;

/// One loop closure or landmark measurement under consideration.
#[derive(Debug, Clone)]
struct Measurement<P: Pose> {
    factor: Factor,
    /// Keys oriented to the group convention (`from` on the group's first
    /// prefix for loop closures, `to` on the landmark for landmarks).
    from: Key,
    to: Key,
    /// The measured `from → to` transform.
    relative: PoseWithCovariance<P>,
    /// Arrival order across all groups.
    seq: u64,
    odom_consistent: bool,
}

/// Measurements that can be checked against each other, with their pairwise
/// consistency graph and the currently accepted maximum clique.
#[derive(Debug, Clone)]
struct MeasurementGroup<P: Pose> {
    members: Vec<Measurement<P>>,
    adjacency: Vec<Vec<bool>>,
    accepted: Vec<usize>,
}

impl<P: Pose> Default for MeasurementGroup<P> {
    fn default() -> Self {
        Self {
            members: Vec::new(),
            adjacency: Vec::new(),
            accepted: Vec::new(),
        }
    }
}

impl<P: Pose> MeasurementGroup<P> {
    /// `consistent_with[i]` is the pairwise verdict against member `i`.
    fn push(&mut self, measurement: Measurement<P>, consistent_with: Vec<bool>) {
        for (row, &consistent) in self.adjacency.iter_mut().zip(&consistent_with) {
            row.push(consistent);
        }
        let mut own_row = consistent_with;
        own_row.push(false);
        self.adjacency.push(own_row);
        self.members.push(measurement);
    }

    /// Recomputes the accepted set. Returns `true` if it changed.
    fn refresh(&mut self) -> bool {
        let candidates: Vec<usize> = self
            .members
            .iter()
            .enumerate()
            .filter(|(_, m)| m.odom_consistent)
            .map(|(i, _)| i)
            .collect();
        let accepted = max_clique(&self.adjacency, &candidates);
        let changed = accepted != self.accepted;
        self.accepted = accepted;
        changed
    }

    fn remove(&mut self, index: usize) -> Measurement<P> {
        self.adjacency.remove(index);
        for row in &mut self.adjacency {
            row.remove(index);
        }
        self.accepted.retain(|&i| i != index);
        for i in &mut self.accepted {
            if *i > index {
                *i -= 1;
            }
        }
        self.members.remove(index)
    }

    fn accepted_members(&self) -> impl Iterator<Item = &Measurement<P>> {
        self.accepted.iter().map(|&i| &self.members[i])
    }

    fn rejected_members(&self) -> impl Iterator<Item = &Measurement<P>> {
        self.members
            .iter()
            .enumerate()
            .filter(|(i, _)| !self.accepted.contains(i))
            .map(|(_, m)| m)
    }
}

/// Pairwise Consistency Maximization.
///
/// Loop closures are grouped per observation channel. Each one must agree with
/// odometry (intra-robot only), and the accepted set of a channel is the
/// largest subset whose members are all pairwise consistent. Landmark
/// measurements are grouped per landmark and handled the same way, except that
/// there is no odometry check and a lone measurement is always accepted.
#[derive(Debug)]
pub struct Pcm<P: Pose, T: ConsistencyTest> {
    test: T,
    special_symbols: BTreeSet<char>,
    quiet: bool,
    trajectories: HashMap<char, Trajectory<P>>,
    priors: Vec<Factor>,
    odometry: Vec<Factor>,
    loop_closures: BTreeMap<ObservationId, MeasurementGroup<P>>,
    landmarks: BTreeMap<Key, MeasurementGroup<P>>,
    ignored_prefixes: BTreeSet<char>,
    next_seq: u64,
    stats: RejectionStats,
}

impl<P: Pose, T: ConsistencyTest> Pcm<P, T> {
    pub fn new(test: T, special_symbols: impl IntoIterator<Item = char>) -> Self {
        Self {
            test,
            special_symbols: special_symbols.into_iter().collect(),
            quiet: false,
            trajectories: HashMap::new(),
            priors: Vec::new(),
            odometry: Vec::new(),
            loop_closures: BTreeMap::new(),
            landmarks: BTreeMap::new(),
            ignored_prefixes: BTreeSet::new(),
            next_seq: 0,
            stats: RejectionStats::default(),
        }
    }

    pub fn test(&self) -> &T {
        &self.test
    }

    pub fn is_quiet(&self) -> bool {
        self.quiet
    }

    /// Accepted loop closures of one channel, oldest first.
    pub fn accepted_loop_closures(&self, id: ObservationId) -> Vec<Factor> {
        self.loop_closures
            .get(&id)
            .map(|group| {
                let mut accepted: Vec<_> = group.accepted_members().collect();
                accepted.sort_by_key(|m| m.seq);
                accepted.into_iter().map(|m| m.factor.clone()).collect()
            })
            .unwrap_or_default()
    }

    fn is_ignored(&self, id: &ObservationId) -> bool {
        self.ignored_prefixes.iter().any(|&p| id.contains(p))
    }

    fn ingest_prior(&mut self, factor: &Factor) {
        self.priors.push(factor.clone());
        let Factor::Prior { key, prior, .. } = factor else {
            return;
        };
        if self.special_symbols.contains(&key.chr) || self.trajectories.contains_key(&key.chr) {
            return;
        }
        if let Some(pose) = P::from_value(prior) {
            self.trajectories
                .insert(key.chr, Trajectory::new(key.index, pose));
        }
    }

    fn ingest_odometry(&mut self, factor: &Factor, values: &Values) {
        self.odometry.push(factor.clone());
        let Factor::Between { key1, key2, measured, noise } = factor else {
            return;
        };
        let Some(step) = P::from_value(measured) else {
            warn!("Odometry {}-{} has an unexpected pose type", key1, key2);
            return;
        };
        let step = PoseWithCovariance::new(step, noise.covariance().clone());
        let trajectory = self.trajectories.entry(key1.chr).or_insert_with(|| {
            let start = values.pose::<P>(key1).unwrap_or_else(P::identity);
            Trajectory::new(key1.index, start)
        });
        if trajectory.last_index() == key1.index {
            trajectory.extend(&step);
        } else if trajectory.contains(key2.index) {
            debug!("Odometry {}-{} already part of the trajectory", key1, key2);
        } else {
            warn!(
                "Odometry {}-{} does not continue trajectory '{}' (last index {})",
                key1,
                key2,
                key1.chr,
                trajectory.last_index()
            );
        }
    }

    /// The `from → to` transform implied by odometry, falling back to the
    /// current estimates when no odometry chain connects the two keys.
    fn relative(&self, from: Key, to: Key, values: &Values) -> Option<PoseWithCovariance<P>> {
        if from == to {
            return Some(PoseWithCovariance::identity());
        }
        if from.chr == to.chr {
            if let Some(rel) = self
                .trajectories
                .get(&from.chr)
                .and_then(|t| t.between(from.index, to.index))
            {
                return Some(rel);
            }
        }
        let a = values.pose::<P>(&from)?;
        let b = values.pose::<P>(&to)?;
        Some(PoseWithCovariance::certain(a.between(&b)))
    }

    /// Checks `m1⁻¹ ∘ odom(m1.from → m2.from) ∘ m2 ∘ odom(m2.to → m1.to) ≈ I`.
    fn pairwise_consistent(
        &self,
        m1: &Measurement<P>,
        m2: &Measurement<P>,
        values: &Values,
    ) -> bool {
        let Some(head) = self.relative(m1.from, m2.from, values) else {
            return false;
        };
        let Some(tail) = self.relative(m2.to, m1.to, values) else {
            return false;
        };
        let cycle = m1
            .relative
            .inverse()
            .compose(&head)
            .compose(&m2.relative)
            .compose(&tail);
        self.test.check_pairwise(&cycle)
    }

    fn make_measurement(&mut self, factor: &Factor, from: Key, to: Key) -> Option<Measurement<P>> {
        let measured = P::from_value(factor.measured())?;
        let covariance = factor.noise().covariance().clone();
        let oriented = if factor.keys().first() == Some(&from) {
            measured
        } else {
            measured.inverse()
        };
        let seq = self.next_seq;
        self.next_seq += 1;
        Some(Measurement {
            factor: factor.clone(),
            from,
            to,
            relative: PoseWithCovariance::new(oriented, covariance),
            seq,
            odom_consistent: true,
        })
    }

    fn ingest_loop_closure(
        &mut self,
        factor: &Factor,
        kind: FactorKind,
        values: &Values,
    ) -> Option<ObservationId> {
        let Factor::Between { key1, key2, .. } = factor else {
            return None;
        };
        let id = ObservationId::from_keys(key1, key2);
        let (from, to) = if key1.chr == id.first() {
            (*key1, *key2)
        } else {
            (*key2, *key1)
        };
        let Some(mut measurement) = self.make_measurement(factor, from, to) else {
            warn!("Loop closure {}-{} has an unexpected pose type, discarding", key1, key2);
            return None;
        };

        if kind == FactorKind::LoopClosure {
            measurement.odom_consistent = match self.relative(from, to, values) {
                Some(odom) => {
                    let cycle = measurement.relative.inverse().compose(&odom);
                    let (consistent, error) = self.test.check_odometry(&cycle);
                    self.stats.consistency_error.push(error);
                    consistent
                }
                None => {
                    debug!("No odometry connects {} and {}", from, to);
                    false
                }
            };
        }

        self.stats.lc += 1;
        self.stats.odom_consistent_lc += usize::from(measurement.odom_consistent);
        if id.is_multi_robot() {
            self.stats.multirobot_lc += 1;
        }

        let consistent_with = self.consistency_row(self.loop_closures.get(&id), &measurement, values);
        self.loop_closures
            .entry(id)
            .or_default()
            .push(measurement, consistent_with);
        Some(id)
    }

    fn ingest_landmark(&mut self, factor: &Factor, values: &Values) -> Option<Key> {
        let Factor::Between { key1, key2, .. } = factor else {
            return None;
        };
        let (from, to) = if self.special_symbols.contains(&key2.chr) {
            (*key1, *key2)
        } else {
            (*key2, *key1)
        };
        let Some(measurement) = self.make_measurement(factor, from, to) else {
            warn!("Landmark measurement {}-{} has an unexpected pose type, discarding", key1, key2);
            return None;
        };
        self.stats.landmark_measurements += 1;
        let consistent_with = self.consistency_row(self.landmarks.get(&to), &measurement, values);
        self.landmarks
            .entry(to)
            .or_default()
            .push(measurement, consistent_with);
        Some(to)
    }

    fn consistency_row(
        &self,
        group: Option<&MeasurementGroup<P>>,
        measurement: &Measurement<P>,
        values: &Values,
    ) -> Vec<bool> {
        group
            .map(|g| {
                g.members
                    .iter()
                    .map(|other| self.pairwise_consistent(other, measurement, values))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Recounts the accepted totals. The seen totals are running counts kept
    /// at ingestion and survive removals.
    fn refresh_stats(&mut self) {
        let stats = &mut self.stats;
        stats.good_lc = 0;
        stats.good_multirobot_lc = 0;
        stats.good_landmark_measurements = 0;
        for (id, group) in &self.loop_closures {
            stats.good_lc += group.accepted.len();
            if id.is_multi_robot() {
                stats.good_multirobot_lc += group.accepted.len();
            }
        }
        for group in self.landmarks.values() {
            stats.good_landmark_measurements += group.accepted.len();
        }
    }

    fn accepted_loop_closure_graph(&self, include_ignored: bool) -> FactorGraph {
        let mut accepted: Vec<&Measurement<P>> = self
            .loop_closures
            .iter()
            .filter(|(id, _)| include_ignored || !self.is_ignored(id))
            .flat_map(|(_, group)| group.accepted_members())
            .collect();
        accepted.sort_by_key(|m| m.seq);
        accepted.into_iter().map(|m| m.factor.clone()).collect()
    }

    /// Rewrites `graph` in place from the bookkeeping lists.
    fn rebuild(&self, graph: &mut FactorGraph) {
        let mut landmarks: Vec<&Measurement<P>> = self
            .landmarks
            .values()
            .flat_map(|group| group.accepted_members())
            .collect();
        landmarks.sort_by_key(|m| m.seq);

        let loop_closures = self.accepted_loop_closure_graph(false);
        graph.assign(
            self.priors
                .iter()
                .chain(self.odometry.iter())
                .chain(landmarks.into_iter().map(|m| &m.factor))
                .chain(loop_closures.iter())
                .cloned(),
        );
    }
}

impl<P: Pose, T: ConsistencyTest> OutlierRemoval for Pcm<P, T> {
    fn remove_outliers(
        &mut self,
        new_factors: &FactorGraph,
        new_values: &Values,
        graph: &mut FactorGraph,
        values: &mut Values,
    ) -> bool {
        self.stats.consistency_error.clear();
        values.insert_missing(new_values);

        // Odometry first so loop closures in the same batch can be checked against it.
        let mut do_optimize = false;
        let mut deferred = Vec::new();
        for factor in new_factors {
            if !factor.is_well_formed() {
                warn!(
                    "Discarding factor with {}-dimensional noise on a {}-dimensional measurement",
                    factor.noise().dim(),
                    factor.dim()
                );
                continue;
            }
            match factor.kind(&self.special_symbols) {
                FactorKind::Prior => {
                    self.ingest_prior(factor);
                    do_optimize = true;
                }
                FactorKind::Odometry => self.ingest_odometry(factor, values),
                kind => deferred.push((factor, kind)),
            }
        }

        let mut touched_channels = BTreeSet::new();
        let mut touched_landmarks = BTreeSet::new();
        for (factor, kind) in deferred {
            if kind == FactorKind::Landmark {
                if let Some(key) = self.ingest_landmark(factor, values) {
                    touched_landmarks.insert(key);
                }
            } else if let Some(id) = self.ingest_loop_closure(factor, kind, values) {
                touched_channels.insert(id);
            }
        }

        for id in &touched_channels {
            if let Some(group) = self.loop_closures.get_mut(id) {
                do_optimize |= group.refresh();
            }
        }
        for key in &touched_landmarks {
            if let Some(group) = self.landmarks.get_mut(key) {
                do_optimize |= group.refresh();
            }
        }

        self.refresh_stats();
        self.rebuild(graph);

        if !self.quiet && !touched_channels.is_empty() {
            info!(
                "PCM: {} of {} loop closures accepted ({} odometry-consistent)",
                self.stats.good_lc, self.stats.lc, self.stats.odom_consistent_lc
            );
        }
        do_optimize
    }

    fn remove_last_loop_closure(
        &mut self,
        scope: Option<ObservationId>,
        graph: &mut FactorGraph,
    ) -> Option<Factor> {
        let target = self
            .loop_closures
            .iter()
            .filter(|(id, _)| scope.map_or(true, |s| s == **id) && !self.is_ignored(id))
            .flat_map(|(id, group)| {
                group
                    .accepted
                    .iter()
                    .map(move |&index| (*id, index, group.members[index].seq))
            })
            .max_by_key(|&(_, _, seq)| seq);

        let Some((id, index, _)) = target else {
            if !self.quiet {
                info!("PCM: no accepted loop closure to remove");
            }
            return None;
        };

        let group = self.loop_closures.get_mut(&id)?;
        let removed = group.remove(index);
        if group.members.is_empty() {
            self.loop_closures.remove(&id);
        }
        self.refresh_stats();
        self.rebuild(graph);
        if !self.quiet {
            info!("PCM: removed loop closure {}-{} on channel {}", removed.from, removed.to, id);
        }
        Some(removed.factor)
    }

    fn ignore_loop_closure_with_prefix(&mut self, prefix: char, graph: &mut FactorGraph) {
        if self.ignored_prefixes.insert(prefix) && !self.quiet {
            info!("PCM: ignoring loop closures involving '{}'", prefix);
        }
        self.rebuild(graph);
    }

    fn revive_loop_closure_with_prefix(&mut self, prefix: char, graph: &mut FactorGraph) {
        if self.ignored_prefixes.remove(&prefix) && !self.quiet {
            info!("PCM: reviving loop closures involving '{}'", prefix);
        }
        self.rebuild(graph);
    }

    fn ignored_prefixes(&self) -> Vec<char> {
        self.ignored_prefixes.iter().copied().collect()
    }

    fn rejection_stats(&self) -> &RejectionStats {
        &self.stats
    }

    fn save_data(&self, folder: &Path) -> Result<(), IoError> {
        let accepted = self.accepted_loop_closure_graph(true);
        let mut rejected: Vec<&Measurement<P>> = self
            .loop_closures
            .values()
            .flat_map(|group| group.rejected_members())
            .collect();
        rejected.sort_by_key(|m| m.seq);
        let rejected: FactorGraph = rejected.into_iter().map(|m| m.factor.clone()).collect();

        let empty = Values::new();
        write_g2o(&folder.join("loop_closures.g2o"), &accepted, &empty)?;
        write_g2o(&folder.join("rejected_loop_closures.g2o"), &rejected, &empty)?;
        Ok(())
    }

    fn set_quiet(&mut self) {
        self.quiet = true;
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests;
