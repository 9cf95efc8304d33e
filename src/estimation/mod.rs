//! Estimators for the conditional multinomial logit.
//!
//! Both paths consume the same [`crate::LogLikelihoodEngine`], so their point
//! estimates are directly comparable.
//!
//! # Available Estimators
//! - [`MleOptimizer`]: BFGS maximum likelihood with a restart policy and
//!   inverse-Hessian standard errors
//! - [`MetropolisSampler`]: random-walk Metropolis–Hastings under an
//!   independent normal prior, summarised by [`PosteriorSummary`]
//!
//! # Examples
//! See `demos/streaming_conjoint.rs` for both estimators on a simulated survey.

pub use metropolis::{
    AcceptanceDiagnostic, Chain, HIGH_ACCEPTANCE, LOW_ACCEPTANCE, MetropolisSampler, NormalPrior,
    SamplerConfig, sample_chains,
};
pub use mle::{
    CovarianceSource, LineSearcher, MleFit, MleOptimizer, MleOptions, Perturbation, RetryPolicy,
    Tolerances,
};
pub use posterior::{MIN_POSTERIOR_DRAWS, PosteriorSummary};

mod metropolis;
mod mle;
mod posterior;
