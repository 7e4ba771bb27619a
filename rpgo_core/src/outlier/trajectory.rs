// rpgo_core/src/outlier/trajectory.rs

use nalgebra::DMatrix;

use crate::values::Pose;

/// A relative pose together with its (first-order) covariance.
///
/// Composition sums covariances and ignores the adjoint rotation of the
/// second operand, which keeps chained odometry cheap to query.
#[derive(Debug, Clone)]
pub struct PoseWithCovariance<P: Pose> {
    pub pose: P,
    pub covariance: DMatrix<f64>,
}

impl<P: Pose> PoseWithCovariance<P> {
    pub fn new(pose: P, covariance: DMatrix<f64>) -> Self {
        Self { pose, covariance }
    }

    /// An exactly known pose.
    pub fn certain(pose: P) -> Self {
        Self::new(pose, DMatrix::zeros(P::DIM, P::DIM))
    }

    pub fn identity() -> Self {
        Self::certain(P::identity())
    }

    pub fn compose(&self, other: &Self) -> Self {
        Self::new(
            self.pose.compose(&other.pose),
            &self.covariance + &other.covariance,
        )
    }

    pub fn inverse(&self) -> Self {
        Self::new(self.pose.inverse(), self.covariance.clone())
    }
}

/// The odometry chain of one robot: absolute poses indexed by key index, each
/// with the covariance accumulated from the start of the chain.
#[derive(Debug, Clone)]
pub(super) struct Trajectory<P: Pose> {
    start: u64,
    poses: Vec<PoseWithCovariance<P>>,
}

impl<P: Pose> Trajectory<P> {
    pub(super) fn new(start: u64, pose: P) -> Self {
        Self {
            start,
            poses: vec![PoseWithCovariance::certain(pose)],
        }
    }

    pub(super) fn last_index(&self) -> u64 {
        self.start + self.poses.len() as u64 - 1
    }

    pub(super) fn contains(&self, index: u64) -> bool {
        index >= self.start && index <= self.last_index()
    }

    /// Appends the pose reached by applying `odometry` to the last pose.
    pub(super) fn extend(&mut self, odometry: &PoseWithCovariance<P>) {
        if let Some(last) = self.poses.last() {
            let next = last.compose(odometry);
            self.poses.push(next);
        }
    }

    /// Relative pose from index `i` to index `j` along the chain.
    pub(super) fn between(&self, i: u64, j: u64) -> Option<PoseWithCovariance<P>> {
        if !self.contains(i) || !self.contains(j) {
            return None;
        }
        let pi = &self.poses[(i - self.start) as usize];
        let pj = &self.poses[(j - self.start) as usize];
        // Accumulated covariances grow monotonically along the chain.
        let covariance = if j >= i {
            &pj.covariance - &pi.covariance
        } else {
            &pi.covariance - &pj.covariance
        };
        Some(PoseWithCovariance::new(pi.pose.between(&pj.pose), covariance))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::values::Pose2;
    use approx::assert_abs_diff_eq;
    use nalgebra::Vector2;

    #[test]
    fn between_accumulates_intermediate_covariance() {
        let step = PoseWithCovariance::new(
            Pose2::new(Vector2::new(1.0, 0.0), 0.0),
            DMatrix::identity(3, 3) * 0.01,
        );
        let mut trajectory = Trajectory::new(5, Pose2::identity());
        for _ in 0..3 {
            trajectory.extend(&step);
        }
        assert_eq!(trajectory.last_index(), 8);

        let rel = trajectory.between(6, 8).unwrap();
        assert_abs_diff_eq!(rel.pose.translation.x, 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(rel.covariance[(0, 0)], 0.02, epsilon = 1e-12);

        let back = trajectory.between(8, 6).unwrap();
        assert_abs_diff_eq!(back.pose.translation.x, -2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(back.covariance[(2, 2)], 0.02, epsilon = 1e-12);

        assert!(trajectory.between(4, 6).is_none());
    }
}
