// rpgo_sim/src/simulation/prng.rs

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};

/// A newtype wrapper around `ChaCha8Rng`.
/// This is the central, deterministic pseudo-random number generator for dataset generation.
pub struct SimulationRng(pub ChaCha8Rng);

impl SimulationRng {
    pub fn from_seed(seed: u64) -> Self {
        Self(ChaCha8Rng::seed_from_u64(seed))
    }

    /// One zero-mean Gaussian sample per standard deviation.
    pub fn gaussian<const N: usize>(&mut self, stddev: &[f64; N]) -> [f64; N] {
        let mut out = [0.0; N];
        for (o, &sigma) in out.iter_mut().zip(stddev) {
            // `Normal::new` only fails for negative or non-finite deviations.
            *o = match Normal::new(0.0, sigma) {
                Ok(dist) => dist.sample(&mut self.0),
                Err(_) => 0.0,
            };
        }
        out
    }
}
