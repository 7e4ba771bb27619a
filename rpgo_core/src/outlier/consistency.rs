// rpgo_core/src/outlier/consistency.rs

use nalgebra::DMatrix;
use std::fmt::Debug;

use super::trajectory::PoseWithCovariance;
use crate::values::Pose;

/// Regularization added to cycle covariances before inversion.
const COVARIANCE_REGULARIZATION: f64 = 1e-9;

/// Decides whether a measurement cycle closes well enough to be trusted.
///
/// The cycle residual is the composition of measurements that should come
/// back to the identity if all of them are inliers.
pub trait ConsistencyTest: Debug + Send + Sync + 'static {
    /// Loop closure vs. odometry. Returns the verdict and the scalar error
    /// reported in the consistency statistics.
    fn check_odometry<P: Pose>(&self, cycle: &PoseWithCovariance<P>) -> (bool, f64);

    /// Loop closure vs. loop closure.
    fn check_pairwise<P: Pose>(&self, cycle: &PoseWithCovariance<P>) -> bool;
}

/// Chi-squared style test: the squared Mahalanobis distance of the cycle
/// residual must stay below the threshold.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MahalanobisTest {
    pub odom_threshold: f64,
    pub lc_threshold: f64,
}

impl MahalanobisTest {
    pub fn new(odom_threshold: f64, lc_threshold: f64) -> Self {
        Self {
            odom_threshold,
            lc_threshold,
        }
    }

    fn squared_distance<P: Pose>(cycle: &PoseWithCovariance<P>) -> f64 {
        let r = cycle.pose.logmap();
        let n = r.len();
        let covariance = &cycle.covariance + DMatrix::identity(n, n) * COVARIANCE_REGULARIZATION;
        match covariance.cholesky() {
            Some(chol) => r.dot(&chol.solve(&r)),
            None => f64::INFINITY,
        }
    }
}

impl ConsistencyTest for MahalanobisTest {
    fn check_odometry<P: Pose>(&self, cycle: &PoseWithCovariance<P>) -> (bool, f64) {
        let d2 = Self::squared_distance(cycle);
        (d2 < self.odom_threshold, d2)
    }

    fn check_pairwise<P: Pose>(&self, cycle: &PoseWithCovariance<P>) -> bool {
        Self::squared_distance(cycle) < self.lc_threshold
    }
}

/// Geometric test: translation and rotation of the cycle residual must stay
/// below fixed bounds (meters, radians). Ignores covariances.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DistanceTest {
    pub trans_threshold: f64,
    pub rot_threshold: f64,
}

impl DistanceTest {
    pub fn new(trans_threshold: f64, rot_threshold: f64) -> Self {
        Self {
            trans_threshold,
            rot_threshold,
        }
    }

    fn within<P: Pose>(&self, cycle: &PoseWithCovariance<P>) -> bool {
        cycle.pose.translation_norm() < self.trans_threshold
            && cycle.pose.rotation_angle() < self.rot_threshold
    }
}

impl ConsistencyTest for DistanceTest {
    fn check_odometry<P: Pose>(&self, cycle: &PoseWithCovariance<P>) -> (bool, f64) {
        (self.within(cycle), cycle.pose.translation_norm())
    }

    fn check_pairwise<P: Pose>(&self, cycle: &PoseWithCovariance<P>) -> bool {
        self.within(cycle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::values::Pose2;
    use nalgebra::Vector2;

    fn cycle(x: f64, theta: f64, sigma: f64) -> PoseWithCovariance<Pose2> {
        PoseWithCovariance::new(
            Pose2::new(Vector2::new(x, 0.0), theta),
            DMatrix::identity(3, 3) * sigma * sigma,
        )
    }

    #[test]
    fn mahalanobis_scales_with_uncertainty() {
        let test = MahalanobisTest::new(9.0, 9.0);
        // 0.2 m off with 0.1 m sigma: d² = 4
        let (ok, d2) = test.check_odometry(&cycle(0.2, 0.0, 0.1));
        assert!(ok);
        assert!((d2 - 4.0).abs() < 1e-3);
        // 0.5 m off with 0.1 m sigma: d² = 25
        assert!(!test.check_pairwise(&cycle(0.5, 0.0, 0.1)));
        // Same offset is fine once the cycle is uncertain enough.
        assert!(test.check_pairwise(&cycle(0.5, 0.0, 1.0)));
    }

    #[test]
    fn distance_test_checks_both_components() {
        let test = DistanceTest::new(0.5, 0.1);
        assert!(test.check_pairwise(&cycle(0.3, 0.05, 0.0)));
        assert!(!test.check_pairwise(&cycle(0.6, 0.0, 0.0)));
        assert!(!test.check_pairwise(&cycle(0.0, -0.2, 0.0)));
        let (ok, err) = test.check_odometry(&cycle(0.3, 0.0, 0.0));
        assert!(ok);
        assert!((err - 0.3).abs() < 1e-12);
    }
}
