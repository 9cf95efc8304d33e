//! Parameter recovery on a simulated streaming-service conjoint survey:
//! 100 respondents × 10 tasks × 3 offers, β* = (1.0, 0.5, -0.8, -0.1).

use approx::assert_relative_eq;
use conjoint_mnl::simulate::{ConjointSimulator, SimulatedConjoint};
use conjoint_mnl::{
    ChoiceDataset, CovarianceSource, LogLikelihoodEngine, MleFit, MleOptimizer, MleOptions,
    PosteriorSummary, SamplerConfig, sample_chains,
};
use ndarray::{Array1, array};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

fn true_beta() -> Array1<f64> {
    array![1.0, 0.5, -0.8, -0.1]
}

fn survey(seed: u64) -> SimulatedConjoint {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    ConjointSimulator::streaming()
        .simulate(&mut rng, 100, 10, true_beta().view())
        .expect("simulation succeeds")
}

fn fit(data: &ChoiceDataset, covariance: CovarianceSource) -> MleFit {
    let options = MleOptions { covariance, ..MleOptions::default() };
    MleOptimizer::new(options)
        .fit(data, Array1::zeros(4).view())
        .expect("MLE runs")
}

#[test]
fn scenario_dimensions() {
    let data = survey(2024).dataset;
    assert_eq!(data.n_groups(), 1000);
    assert_eq!(data.n_rows(), 3000);
    assert_eq!(data.n_alternatives(), 3);
    assert_eq!(
        data.column_names().unwrap(),
        ["brand=Netflix", "brand=Prime", "ads=true", "price"]
    );
}

#[test]
fn mle_recovers_true_parameters() {
    for seed in [2024, 7, 99] {
        let data = survey(seed).dataset;
        let mle = fit(&data, CovarianceSource::ObservedInformation);
        assert!(mle.converged, "seed {seed}: {}", mle.message);

        for k in 0..4 {
            let z = (mle.beta_hat[k] - true_beta()[k]) / mle.std_errors[k];
            assert!(z.abs() < 3.0, "seed {seed}, coefficient {k}: z = {z:.2}");
        }
        // 1000 three-offer tasks pin the indicator effects to about 0.11-0.12.
        for k in 0..3 {
            assert!(mle.std_errors[k] < 0.13, "seed {seed}: se[{k}] = {}", mle.std_errors[k]);
        }
        assert!(mle.std_errors[3] < 0.02, "seed {seed}: price se = {}", mle.std_errors[3]);

        let engine = LogLikelihoodEngine::new(&data);
        let at_hat = engine.neg_log_likelihood(mle.beta_hat.view()).unwrap();
        assert_relative_eq!(at_hat, mle.neg_log_likelihood, epsilon = 1e-8);
        assert!(at_hat <= engine.neg_log_likelihood(true_beta().view()).unwrap());
    }
}

#[test]
fn bfgs_covariance_tracks_observed_information() {
    let data = survey(2024).dataset;
    let bfgs = fit(&data, CovarianceSource::InverseBfgs);
    let exact = fit(&data, CovarianceSource::ObservedInformation);
    assert!(bfgs.converged);
    assert!(bfgs.iterations >= 4, "only {} BFGS iterations", bfgs.iterations);
    assert!(!bfgs.approximate_covariance);
    for k in 0..4 {
        assert_relative_eq!(bfgs.beta_hat[k], exact.beta_hat[k], epsilon = 1e-4);
        let ratio = bfgs.std_errors[k] / exact.std_errors[k];
        assert!((0.6..1.6).contains(&ratio), "coefficient {k}: ratio {ratio:.3}");
    }
}

#[test]
fn restart_at_optimum_flags_bfgs_covariance() {
    let data = survey(2024).dataset;
    let exact = fit(&data, CovarianceSource::ObservedInformation);
    let warm = MleOptimizer::new(MleOptions::default())
        .fit(&data, exact.beta_hat.view())
        .expect("MLE runs");
    assert!(warm.iterations < 4, "{} iterations from the optimum", warm.iterations);
    assert!(warm.approximate_covariance);
    assert!(!exact.approximate_covariance);
}

#[test]
fn likelihood_ignores_row_order() {
    let sim = survey(5);
    let mut reversed = sim.records.clone();
    reversed.reverse();
    let shuffled = ChoiceDataset::from_raw(ConjointSimulator::streaming().layout(), &reversed).unwrap();

    let beta = array![0.3, -0.2, 0.1, -0.05];
    let a = LogLikelihoodEngine::new(&sim.dataset).log_likelihood(beta.view()).unwrap();
    let b = LogLikelihoodEngine::new(&shuffled).log_likelihood(beta.view()).unwrap();
    assert_relative_eq!(a, b, max_relative = 1e-12);
}

#[test]
fn posterior_mean_agrees_with_mle() {
    let data = survey(2024).dataset;
    let mle = fit(&data, CovarianceSource::ObservedInformation);
    let config = SamplerConfig::conjoint_default(&mle.std_errors * 1.2, 31);

    let chain = config.run(&data, mle.beta_hat.view()).unwrap();
    assert_eq!(chain.len(), config.n_iterations);
    let rate = chain.acceptance_rate();
    assert!((0.1..=0.6).contains(&rate), "acceptance rate {rate:.3}");

    let posterior = PosteriorSummary::new(&chain, config.burn_in)
        .unwrap()
        .with_column_names(data.column_names());
    assert_eq!(posterior.n_draws(), config.n_iterations - config.burn_in);
    for k in 0..4 {
        let gap = (posterior.posterior_means[k] - mle.beta_hat[k]).abs();
        assert!(gap < 0.05, "coefficient {k}: posterior mean off MLE by {gap:.4}");
        let (lo, hi) = posterior.credible_intervals[k];
        assert!(lo < mle.beta_hat[k] && mle.beta_hat[k] < hi);
        assert!(posterior.posterior_sds[k] > 0.0);
    }
}

#[test]
fn sampler_is_reproducible() {
    let data = survey(11).dataset;
    let mut config = SamplerConfig::conjoint_default(array![0.08, 0.08, 0.08, 0.005], 123);
    config.n_iterations = 1_500;
    config.burn_in = 500;

    let first = config.run(&data, Array1::zeros(4).view()).unwrap();
    let second = config.run(&data, Array1::zeros(4).view()).unwrap();
    assert_eq!(first, second);

    let chains = sample_chains(&data, &config, Array1::zeros(4).view(), 2).unwrap();
    assert_eq!(chains[0], first);
    assert_ne!(chains[0], chains[1]);
    let pooled = PosteriorSummary::from_chains(&chains, config.burn_in).unwrap();
    assert_eq!(pooled.n_draws(), 2_000);
}
