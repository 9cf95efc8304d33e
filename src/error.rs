//! Error surface shared by the dataset, likelihood, optimiser and sampler.
//!
//! Validation failures ([`DataError`], [`ChoiceError::InvalidParameter`],
//! [`ChoiceError::InvalidConfig`]) are raised before any numerical work starts.
//! Optimiser non-convergence is *not* an error; it is reported through
//! [`crate::MleFit::converged`].

use thiserror::Error;

/// Crate-wide result alias.
pub type ChoiceResult<T> = Result<T, ChoiceError>;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ChoiceError {
    #[error("malformed choice data: {0}")]
    Data(#[from] DataError),

    #[error("parameter vector has length {found}, design matrix has {expected} covariates")]
    InvalidParameter { expected: usize, found: usize },

    #[error("invalid configuration for `{field}`: {reason}")]
    InvalidConfig { field: &'static str, reason: String },

    #[error("need at least {required} post burn-in draws, found {available}")]
    InsufficientSamples { required: usize, available: usize },

    #[error("optimizer backend failed: {0}")]
    Optimizer(String),

    #[error("linear algebra failure: {0}")]
    Linalg(String),
}

/// Problems with the long-format choice table.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DataError {
    #[error("choice table has no rows")]
    Empty,

    #[error("covariate ({row}, {col}) is not finite: {value}")]
    NonFiniteCovariate { row: usize, col: usize, value: f64 },

    #[error("row {row} has {found} covariates, expected {expected}")]
    RaggedRow { row: usize, expected: usize, found: usize },

    #[error("row {row} has chosen flag {value}, expected 0 or 1")]
    InvalidChosenFlag { row: usize, value: f64 },

    #[error("respondent {respondent}, task {task}: {count} chosen alternatives, expected exactly 1")]
    ChosenCount { respondent: u64, task: u64, count: usize },

    #[error("respondent {respondent}, task {task}: {found} alternatives, expected {expected}")]
    UnevenGroups { respondent: u64, task: u64, expected: usize, found: usize },

    #[error("respondent {respondent}, task {task}: alternative {alternative} appears more than once")]
    DuplicateAlternative { respondent: u64, task: u64, alternative: u64 },

    #[error("level `{level}` is not declared for attribute `{attribute}`")]
    UnknownLevel { attribute: String, level: String },

    #[error("record carries {found} attribute values, layout declares {expected}")]
    AttributeMismatch { expected: usize, found: usize },

    #[error("value kind does not match attribute `{attribute}`")]
    AttributeKind { attribute: String },

    #[error("within-task design has rank {rank}, {expected} parameters are not identified")]
    RankDeficient { rank: usize, expected: usize },
}

impl ChoiceError {
    pub(crate) fn config(field: &'static str, reason: impl Into<String>) -> Self {
        ChoiceError::InvalidConfig { field, reason: reason.into() }
    }
}

impl From<argmin::core::Error> for ChoiceError {
    fn from(err: argmin::core::Error) -> Self {
        ChoiceError::Optimizer(err.to_string())
    }
}
