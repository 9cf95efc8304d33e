//! Random-walk Metropolis–Hastings over the MNL posterior.
//!
//! # Model
//! - Likelihood: conditional multinomial logit, see [`crate::LogLikelihoodEngine`]
//! - Prior: \( \beta_k \sim \mathcal{N}(\mu_k, \sigma_k^2) \), independent across `k`
//! - Proposal: \( \beta' = \beta + \varepsilon,\ \varepsilon_k \sim \mathcal{N}(0, s_k^2) \),
//!   diagonal and symmetric, so the acceptance ratio is the posterior ratio
//!
//! Every iteration records the current state, whether or not the proposal was
//! accepted, so rejected proposals repeat the previous draw.

use log::{debug, warn};
use ndarray::{Array1, Array2, ArrayView1};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use statrs::distribution::{Continuous, Normal};

#[cfg(feature = "rayon")]
use rayon::prelude::*;

use crate::dataset::ChoiceDataset;
use crate::error::{ChoiceError, ChoiceResult};
use crate::likelihood::LogLikelihoodEngine;
use crate::rng::{BaseDraws, RngDraw, stream_seeds};

/// Acceptance rate below which the proposal is considered too wide.
pub const LOW_ACCEPTANCE: f64 = 0.1;
/// Acceptance rate above which the proposal is considered too narrow.
pub const HIGH_ACCEPTANCE: f64 = 0.6;

/// Independent normal prior, one component per coefficient.
///
/// Densities are evaluated through one standard normal:
/// `ln N(b; μ, σ²) = ln φ((b - μ) / σ) - ln σ`.
#[derive(Debug, Clone)]
pub struct NormalPrior {
    means: Vec<f64>,
    sds: Vec<f64>,
    std_norm: Normal,
}

impl NormalPrior {
    /// # Errors
    /// [`ChoiceError::InvalidConfig`] if the lengths differ, a mean is not
    /// finite, or a standard deviation is not finite and positive.
    pub fn new(means: &[f64], sds: &[f64]) -> ChoiceResult<Self> {
        if means.len() != sds.len() {
            return Err(ChoiceError::config(
                "prior",
                format!("{} means but {} standard deviations", means.len(), sds.len()),
            ));
        }
        if let Some((mean, sd)) = means
            .iter()
            .zip(sds)
            .find(|&(m, s)| !m.is_finite() || !s.is_finite() || *s <= 0.0)
        {
            return Err(ChoiceError::config(
                "prior",
                format!("N({mean}, {sd}^2) is not a proper normal prior"),
            ));
        }
        Ok(Self::from_parts(means.to_vec(), sds.to_vec()))
    }

    /// Zero-mean prior with the given standard deviations.
    pub fn centered(sds: &[f64]) -> ChoiceResult<Self> {
        Self::new(&vec![0.0; sds.len()], sds)
    }

    /// Zero-mean prior for the streaming layout: sd √5 for the brand and ads
    /// indicators, sd 1 for the per-dollar price effect.
    pub fn conjoint_default() -> Self {
        let wide = 5.0f64.sqrt();
        Self::from_parts(vec![0.0; 4], vec![wide, wide, wide, 1.0])
    }

    fn from_parts(means: Vec<f64>, sds: Vec<f64>) -> Self {
        Self { means, sds, std_norm: Normal::standard() }
    }

    pub fn dim(&self) -> usize {
        self.means.len()
    }

    pub fn means(&self) -> &[f64] {
        &self.means
    }

    pub fn sds(&self) -> &[f64] {
        &self.sds
    }

    /// Sum of the component log-densities at `beta`.
    pub fn log_density(&self, beta: ArrayView1<'_, f64>) -> f64 {
        self.means
            .iter()
            .zip(&self.sds)
            .zip(beta)
            .map(|((mean, sd), &b)| self.std_norm.ln_pdf((b - mean) / sd) - sd.ln())
            .sum()
    }
}

/// Tuning signal derived from the acceptance rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptanceDiagnostic {
    /// Proposals too wide.
    TooLow,
    Healthy,
    /// Proposals too narrow.
    TooHigh,
}

impl AcceptanceDiagnostic {
    pub fn from_rate(rate: f64) -> Self {
        if rate < LOW_ACCEPTANCE {
            AcceptanceDiagnostic::TooLow
        } else if rate > HIGH_ACCEPTANCE {
            AcceptanceDiagnostic::TooHigh
        } else {
            AcceptanceDiagnostic::Healthy
        }
    }
}

/// Draws from one sampler run, in iteration order.
#[derive(Debug, Clone, PartialEq)]
pub struct Chain {
    draws: Vec<Array1<f64>>,
    log_posterior: Vec<f64>,
    accepted: usize,
    burn_in: usize,
    dim: usize,
}

impl Chain {
    pub(crate) fn with_capacity(dim: usize, n_iterations: usize, burn_in: usize) -> Self {
        Self {
            draws: Vec::with_capacity(n_iterations),
            log_posterior: Vec::with_capacity(n_iterations),
            accepted: 0,
            burn_in,
            dim,
        }
    }

    pub(crate) fn push(&mut self, draw: Array1<f64>, log_posterior: f64, accepted: bool) {
        self.draws.push(draw);
        self.log_posterior.push(log_posterior);
        if accepted {
            self.accepted += 1;
        }
    }

    /// Number of recorded iterations.
    pub fn len(&self) -> usize {
        self.draws.len()
    }

    pub fn is_empty(&self) -> bool {
        self.draws.is_empty()
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn accepted(&self) -> usize {
        self.accepted
    }

    /// Burn-in requested when the chain was sampled.
    pub fn burn_in(&self) -> usize {
        self.burn_in
    }

    /// Accepted proposals over total iterations.
    pub fn acceptance_rate(&self) -> f64 {
        if self.draws.is_empty() {
            0.0
        } else {
            self.accepted as f64 / self.draws.len() as f64
        }
    }

    pub fn diagnostic(&self) -> AcceptanceDiagnostic {
        AcceptanceDiagnostic::from_rate(self.acceptance_rate())
    }

    pub fn draws(&self) -> &[Array1<f64>] {
        &self.draws
    }

    /// Log posterior (up to a constant) of every recorded state.
    pub fn log_posterior(&self) -> &[f64] {
        &self.log_posterior
    }

    /// Draws after the first `skip`, as an `(n, dim)` array.
    pub fn to_array(&self, skip: usize) -> Array2<f64> {
        let kept = &self.draws[skip.min(self.draws.len())..];
        Array2::from_shape_fn((kept.len(), self.dim), |(i, k)| kept[i][k])
    }

    /// Full trace of one coefficient.
    pub fn trace(&self, param_idx: usize) -> Option<Vec<f64>> {
        if param_idx >= self.dim {
            return None;
        }
        Some(self.draws.iter().map(|d| d[param_idx]).collect())
    }
}

/// Random-walk Metropolis–Hastings sampler.
///
/// # Type Parameters
/// * `R` - The random number generator type (defaults to `ChaCha8Rng`)
///
/// # Example
/// ```rust
/// use conjoint_mnl::{MetropolisSampler, NormalPrior};
/// use conjoint_mnl::simulate::ConjointSimulator;
/// use ndarray::array;
/// use rand::SeedableRng;
/// use rand_chacha::ChaCha8Rng;
///
/// let mut rng = ChaCha8Rng::seed_from_u64(7);
/// let beta = array![1.0, 0.5, -0.8, -0.1];
/// let data = ConjointSimulator::streaming()
///     .simulate(&mut rng, 50, 10, beta.view())
///     .expect("simulation succeeds")
///     .dataset;
///
/// let mut sampler = MetropolisSampler::new(
///     NormalPrior::conjoint_default(),
///     array![0.1, 0.1, 0.1, 0.01],
///     42,
/// )
/// .expect("valid sampler");
/// let chain = sampler.sample(&data, array![0.0, 0.0, 0.0, 0.0].view(), 2_000, 500).unwrap();
/// assert_eq!(chain.len(), 2_000);
/// ```
#[derive(Debug, Clone)]
pub struct MetropolisSampler<R = ChaCha8Rng>
where
    R: Rng,
{
    prior: NormalPrior,
    proposal_scale: Array1<f64>,
    draws: BaseDraws,
    rng: R,
}

impl MetropolisSampler<ChaCha8Rng> {
    /// Create a sampler whose `ChaCha8Rng` is seeded with `seed`.
    ///
    /// # Errors
    /// [`ChoiceError::InvalidConfig`] if `proposal_scale` and the prior differ
    /// in length or a scale is not finite and positive.
    pub fn new(prior: NormalPrior, proposal_scale: Array1<f64>, seed: u64) -> ChoiceResult<Self> {
        Self::from_rng(ChaCha8Rng::seed_from_u64(seed), prior, proposal_scale)
    }
}

impl<R: Rng> MetropolisSampler<R> {
    /// Create a sampler that owns the given generator.
    pub fn from_rng(rng: R, prior: NormalPrior, proposal_scale: Array1<f64>) -> ChoiceResult<Self> {
        if proposal_scale.len() != prior.dim() {
            return Err(ChoiceError::config(
                "proposal_scale",
                format!("{} scales for a {}-dimensional prior", proposal_scale.len(), prior.dim()),
            ));
        }
        if let Some(s) = proposal_scale.iter().find(|s| !s.is_finite() || **s <= 0.0) {
            return Err(ChoiceError::config(
                "proposal_scale",
                format!("scales must be finite and > 0, got {s}"),
            ));
        }
        Ok(Self { prior, proposal_scale, draws: BaseDraws::new(), rng })
    }

    pub fn prior(&self) -> &NormalPrior {
        &self.prior
    }

    pub fn proposal_scale(&self) -> ArrayView1<'_, f64> {
        self.proposal_scale.view()
    }

    /// `ℓ(β) + log p(β)`.
    pub fn log_posterior(
        &self,
        engine: &LogLikelihoodEngine<'_>,
        beta: ArrayView1<'_, f64>,
    ) -> ChoiceResult<f64> {
        Ok(engine.log_likelihood(beta)? + self.prior.log_density(beta))
    }

    /// Run `n_iterations` Metropolis–Hastings steps from `initial_beta`.
    ///
    /// `burn_in` is recorded on the chain for summarisation; the draws
    /// themselves are all kept.
    ///
    /// # Errors
    /// - [`ChoiceError::InvalidParameter`] if `initial_beta` or the prior does
    ///   not match the covariate count.
    /// - [`ChoiceError::InvalidConfig`] if `n_iterations` is zero, `burn_in`
    ///   is not smaller than `n_iterations`, or the initial posterior is not finite.
    pub fn sample(
        &mut self,
        data: &ChoiceDataset,
        initial_beta: ArrayView1<'_, f64>,
        n_iterations: usize,
        burn_in: usize,
    ) -> ChoiceResult<Chain> {
        let engine = LogLikelihoodEngine::new(data);
        engine.check(initial_beta)?;
        if self.prior.dim() != data.n_covariates() {
            return Err(ChoiceError::InvalidParameter {
                expected: data.n_covariates(),
                found: self.prior.dim(),
            });
        }
        if n_iterations == 0 {
            return Err(ChoiceError::config("n_iterations", "must be greater than zero"));
        }
        if burn_in >= n_iterations {
            return Err(ChoiceError::config(
                "burn_in",
                format!("burn-in ({burn_in}) must be smaller than iterations ({n_iterations})"),
            ));
        }

        let mut current = initial_beta.to_owned();
        let mut current_lp = self.log_posterior(&engine, current.view())?;
        if !current_lp.is_finite() {
            return Err(ChoiceError::config(
                "initial_beta",
                format!("log posterior at the initial point is {current_lp}"),
            ));
        }

        let mut chain = Chain::with_capacity(current.len(), n_iterations, burn_in);
        for _ in 0..n_iterations {
            let step = self.draws.sample_scaled_norm(&mut self.rng, self.proposal_scale.view());
            let proposal = &current + &step;
            let proposal_lp = self.log_posterior(&engine, proposal.view())?;

            let log_alpha = proposal_lp - current_lp;
            let accepted =
                log_alpha >= 0.0 || self.draws.sample_unif(&mut self.rng).ln() < log_alpha;
            if accepted {
                current = proposal;
                current_lp = proposal_lp;
            }
            chain.push(current.clone(), current_lp, accepted);
        }

        let rate = chain.acceptance_rate();
        match chain.diagnostic() {
            AcceptanceDiagnostic::Healthy => {
                debug!("Metropolis–Hastings finished {n_iterations} iterations, acceptance {rate:.3}")
            }
            AcceptanceDiagnostic::TooLow => warn!(
                "acceptance rate {rate:.3} is below {LOW_ACCEPTANCE}; proposal scales are likely too large"
            ),
            AcceptanceDiagnostic::TooHigh => warn!(
                "acceptance rate {rate:.3} is above {HIGH_ACCEPTANCE}; proposal scales are likely too small"
            ),
        }
        Ok(chain)
    }
}

/// Everything a sampler run needs besides the data and the start point.
#[derive(Debug, Clone)]
pub struct SamplerConfig {
    /// Total Metropolis–Hastings steps, burn-in included.
    pub n_iterations: usize,
    /// Leading draws to drop before summarising; must be below `n_iterations`.
    pub burn_in: usize,
    /// Per-coefficient proposal standard deviations.
    pub proposal_scale: Array1<f64>,
    /// Independent normal prior on the coefficients.
    pub prior: NormalPrior,
    /// Seed of the `ChaCha8Rng`; chain `i` of [`sample_chains`] uses `seed + i`.
    pub seed: u64,
}

impl SamplerConfig {
    /// Defaults for the streaming layout: 20 000 iterations, 2 000 burn-in,
    /// the [`NormalPrior::conjoint_default`] prior.
    pub fn conjoint_default(proposal_scale: Array1<f64>, seed: u64) -> Self {
        Self {
            n_iterations: 20_000,
            burn_in: 2_000,
            proposal_scale,
            prior: NormalPrior::conjoint_default(),
            seed,
        }
    }

    pub fn sampler(&self) -> ChoiceResult<MetropolisSampler> {
        MetropolisSampler::new(self.prior.clone(), self.proposal_scale.clone(), self.seed)
    }

    /// One chain seeded with `self.seed`.
    pub fn run(&self, data: &ChoiceDataset, initial_beta: ArrayView1<'_, f64>) -> ChoiceResult<Chain> {
        self.sampler()?.sample(data, initial_beta, self.n_iterations, self.burn_in)
    }
}

/// Run `n_chains` independent chains from the same start.
///
/// Chain `i` owns a `ChaCha8Rng` seeded with `config.seed + i`, so results do
/// not depend on scheduling. With the `rayon` feature the chains run in parallel.
pub fn sample_chains(
    data: &ChoiceDataset,
    config: &SamplerConfig,
    initial_beta: ArrayView1<'_, f64>,
    n_chains: usize,
) -> ChoiceResult<Vec<Chain>> {
    if n_chains == 0 {
        return Err(ChoiceError::config("n_chains", "must be greater than zero"));
    }
    let seeds = stream_seeds(config.seed, n_chains);
    let run = |chain_seed: &u64| {
        MetropolisSampler::new(config.prior.clone(), config.proposal_scale.clone(), *chain_seed)?
            .sample(data, initial_beta, config.n_iterations, config.burn_in)
    };

    #[cfg(feature = "rayon")]
    let chains = seeds.par_iter().map(run).collect();
    #[cfg(not(feature = "rayon"))]
    let chains = seeds.iter().map(run).collect();

    chains
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::ChoiceRecord;
    use approx::assert_relative_eq;
    use ndarray::array;

    fn toy_data() -> ChoiceDataset {
        let rows = [
            ([1.0, 4.0], true),
            ([0.0, 8.0], false),
            ([0.0, 4.0], false),
            ([1.0, 12.0], true),
            ([1.0, 8.0], true),
            ([0.0, 4.0], false),
            ([0.0, 12.0], true),
            ([1.0, 16.0], false),
        ];
        let records: Vec<ChoiceRecord> = rows
            .iter()
            .enumerate()
            .map(|(i, &(x, chosen))| ChoiceRecord {
                respondent: 1,
                task: (i / 2) as u64,
                alternative: (i % 2) as u64,
                covariates: x.to_vec(),
                chosen,
            })
            .collect();
        ChoiceDataset::from_records(&records).unwrap()
    }

    fn sampler(seed: u64) -> MetropolisSampler {
        let prior = NormalPrior::centered(&[5.0f64.sqrt(), 1.0]).unwrap();
        MetropolisSampler::new(prior, array![0.8, 0.1], seed).unwrap()
    }

    #[test]
    fn prior_log_density_is_a_sum_of_normals() {
        let prior = NormalPrior::conjoint_default();
        let at_zero = prior.log_density(array![0.0, 0.0, 0.0, 0.0].view());
        let half_ln_two_pi = 0.5 * (2.0 * std::f64::consts::PI).ln();
        let expected = -4.0 * half_ln_two_pi - 3.0 * 0.5 * 5.0f64.ln();
        assert_relative_eq!(at_zero, expected, epsilon = 1e-12);
        assert_eq!(prior.means(), &[0.0; 4]);
        assert_relative_eq!(prior.sds()[0], 5.0f64.sqrt(), epsilon = 1e-12);
        assert_relative_eq!(prior.sds()[3], 1.0, epsilon = 1e-12);

        assert!(NormalPrior::new(&[0.0], &[0.0]).is_err());
        assert!(NormalPrior::new(&[f64::NAN], &[1.0]).is_err());

        // Shifted and scaled components match the closed-form density.
        let shifted = NormalPrior::new(&[1.0, -2.0], &[2.0, 0.5]).unwrap();
        let at = shifted.log_density(array![3.0, -2.0].view());
        let expected = -2.0 * half_ln_two_pi - 0.5 - 2.0f64.ln() - 0.5f64.ln();
        assert_relative_eq!(at, expected, epsilon = 1e-12);
        assert!(NormalPrior::new(&[0.0, 1.0], &[1.0]).is_err());
    }

    #[test]
    fn every_iteration_is_recorded() {
        let data = toy_data();
        let chain = sampler(1).sample(&data, array![0.0, 0.0].view(), 3_000, 500).unwrap();
        assert_eq!(chain.len(), 3_000);
        assert_eq!(chain.burn_in(), 500);
        assert!(chain.accepted() > 0 && chain.accepted() < 3_000);
        let rate = chain.acceptance_rate();
        assert!(rate > 0.0 && rate < 1.0);

        // Rejections repeat the previous state exactly.
        let repeats = chain.draws().windows(2).filter(|w| w[0] == w[1]).count();
        let first_rejected = usize::from(chain.draws()[0] == array![0.0, 0.0]);
        assert_eq!(repeats + first_rejected, 3_000 - chain.accepted());
    }

    #[test]
    fn same_seed_gives_identical_chain() {
        let data = toy_data();
        let a = sampler(11).sample(&data, array![0.0, 0.0].view(), 1_000, 100).unwrap();
        let b = sampler(11).sample(&data, array![0.0, 0.0].view(), 1_000, 100).unwrap();
        let c = sampler(12).sample(&data, array![0.0, 0.0].view(), 1_000, 100).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn multi_chain_streams_match_single_chain_runs() {
        let data = toy_data();
        let config = SamplerConfig {
            n_iterations: 500,
            burn_in: 100,
            proposal_scale: array![0.8, 0.1],
            prior: NormalPrior::centered(&[5.0f64.sqrt(), 1.0]).unwrap(),
            seed: 20,
        };
        let chains = sample_chains(&data, &config, array![0.0, 0.0].view(), 3).unwrap();
        assert_eq!(chains.len(), 3);
        assert_eq!(chains[0], config.run(&data, array![0.0, 0.0].view()).unwrap());
        let second = sampler(21).sample(&data, array![0.0, 0.0].view(), 500, 100).unwrap();
        assert_eq!(chains[1], second);
        assert!(sample_chains(&data, &config, array![0.0, 0.0].view(), 0).is_err());
    }

    #[test]
    fn invalid_configuration_is_rejected() {
        let data = toy_data();
        let err = sampler(0).sample(&data, array![0.0].view(), 100, 10).unwrap_err();
        assert_eq!(err, ChoiceError::InvalidParameter { expected: 2, found: 1 });

        let err = sampler(0).sample(&data, array![0.0, 0.0].view(), 100, 100).unwrap_err();
        assert!(matches!(err, ChoiceError::InvalidConfig { field: "burn_in", .. }));

        let prior = NormalPrior::centered(&[1.0, 1.0]).unwrap();
        assert!(MetropolisSampler::new(prior.clone(), array![0.1, -0.1], 0).is_err());
        assert!(MetropolisSampler::new(prior, array![0.1], 0).is_err());

        let mut wide = MetropolisSampler::new(NormalPrior::conjoint_default(), Array1::from_elem(4, 0.1), 0).unwrap();
        let err = wide.sample(&data, array![0.0, 0.0].view(), 100, 10).unwrap_err();
        assert!(matches!(err, ChoiceError::InvalidParameter { .. }));
    }

    #[test]
    fn acceptance_thresholds() {
        assert_eq!(AcceptanceDiagnostic::from_rate(0.05), AcceptanceDiagnostic::TooLow);
        assert_eq!(AcceptanceDiagnostic::from_rate(0.3), AcceptanceDiagnostic::Healthy);
        assert_eq!(AcceptanceDiagnostic::from_rate(0.9), AcceptanceDiagnostic::TooHigh);
    }

    #[test]
    fn trace_and_export_shapes() {
        let data = toy_data();
        let chain = sampler(5).sample(&data, array![0.0, 0.0].view(), 400, 100).unwrap();
        assert_eq!(chain.trace(1).unwrap().len(), 400);
        assert!(chain.trace(2).is_none());
        assert_eq!(chain.to_array(100).dim(), (300, 2));
        assert_eq!(chain.to_array(1_000).dim(), (0, 2));
    }
}
