use ndarray::{Array1, ArrayView1};
use rand::{Rng, prelude::Distribution};
use statrs::distribution::{Normal, Uniform};

/// Unified interface for the base draws used by the sampler, simulator and
/// restart perturbations.
pub(crate) trait RngDraw<R: Rng + ?Sized> {
    fn sample_norm(&self, rng: &mut R) -> f64;
    fn sample_unif(&self, rng: &mut R) -> f64;
    fn sample_scaled_norm(&self, rng: &mut R, scale: ArrayView1<'_, f64>) -> Array1<f64>;
}

/// Standard normal and standard uniform distributions, built once.
#[derive(Debug, Clone)]
pub(crate) struct BaseDraws {
    std_norm: Normal,
    unif: Uniform,
}

impl BaseDraws {
    pub(crate) fn new() -> Self {
        Self { std_norm: Normal::standard(), unif: Uniform::standard() }
    }
}

impl<R: Rng + ?Sized> RngDraw<R> for BaseDraws {
    /// Sample from the standard normal distribution
    #[inline(always)]
    fn sample_norm(&self, rng: &mut R) -> f64 {
        self.std_norm.sample(rng)
    }

    /// Sample from the standard uniform distribution
    #[inline(always)]
    fn sample_unif(&self, rng: &mut R) -> f64 {
        self.unif.sample(rng)
    }

    /// Independent `N(0, scale[k]^2)` draws, one per dimension, in index order.
    fn sample_scaled_norm(&self, rng: &mut R, scale: ArrayView1<'_, f64>) -> Array1<f64> {
        scale.mapv(|s| s * self.sample_norm(rng))
    }
}

/// Seeds for `n` independent streams derived from one base seed.
pub(crate) fn stream_seeds(seed: u64, n: usize) -> Vec<u64> {
    (0..n).map(|i| seed.wrapping_add(i as u64)).collect()
}
