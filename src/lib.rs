//! # Conjoint Multinomial Logit Estimation
//!
//! This crate estimates conditional multinomial logit (MNL) models on
//! choice-based conjoint data, by maximum likelihood and by Bayesian
//! Metropolis–Hastings sampling over the same likelihood.
//!
//! ## Features
//!
//! - **Choice data:**
//!   - [`ChoiceDataset`] validates a long-format table (one row per respondent, task and
//!     alternative) and groups rows into choice tasks of uniform size.
//!   - [`DesignLayout`] encodes raw attributes (categorical, binary, numeric) into covariate
//!     columns with reference levels dropped.
//!
//! - **Likelihood:**
//!   - [`LogLikelihoodEngine`] evaluates the grouped log-sum-exp log-likelihood, its score and
//!     Hessian, and per-row choice probabilities.
//!
//! - **Estimation:**
//!   - [`MleOptimizer`] minimises the negative log-likelihood with BFGS (via `argmin`),
//!     restarting from perturbed points when an attempt does not converge.
//!   - [`MetropolisSampler`] draws from the posterior under an independent normal prior;
//!     [`sample_chains`] runs independently seeded chains in parallel under the `rayon` feature.
//!   - [`PosteriorSummary`] reports posterior means, standard deviations and 95% credible intervals.
//!
//! - **Simulation:**
//!   - [`simulate::ConjointSimulator`] draws synthetic streaming-service surveys from a known
//!     parameter vector.
//!
//! ## Usage Example
//!
//! ```rust
//! # use ndarray::{Array1, array};
//! # use rand::SeedableRng;
//! # use rand_chacha::ChaCha8Rng;
//! use conjoint_mnl::{MleOptimizer, MleOptions};
//! use conjoint_mnl::simulate::ConjointSimulator;
//!
//! let mut rng = ChaCha8Rng::seed_from_u64(0);
//! let truth = array![1.0, 0.5, -0.8, -0.1];
//! let survey = ConjointSimulator::streaming()
//!     .simulate(&mut rng, 100, 10, truth.view())
//!     .unwrap();
//!
//! let fit = MleOptimizer::new(MleOptions::default())
//!     .fit(&survey.dataset, Array1::zeros(4).view())
//!     .unwrap();
//! assert!(fit.converged);
//! assert_eq!(fit.beta_hat.len(), 4);
//! ```
//!
//! See `demos/streaming_conjoint.rs` for the full MLE versus posterior comparison.

pub mod dataset;
pub mod design;
pub mod error;
pub mod estimation;
pub mod likelihood;
pub mod simulate;

mod rng;

pub use dataset::{ChoiceDataset, ChoiceRecord, GroupKey, RawAlternative};
pub use design::{Attribute, AttributeValue, DesignLayout};
pub use error::{ChoiceError, ChoiceResult, DataError};
pub use estimation::{
    AcceptanceDiagnostic, Chain, CovarianceSource, LineSearcher, MetropolisSampler, MleFit,
    MleOptimizer, MleOptions, NormalPrior, Perturbation, PosteriorSummary, RetryPolicy,
    SamplerConfig, Tolerances, sample_chains,
};
pub use likelihood::{LogLikelihoodEngine, log_sum_exp, predict_shares};
