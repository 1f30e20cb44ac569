//! Error taxonomy.
//!
//! Only configuration errors are fatal: they are raised before any work is
//! done. Numerical trouble during a solve (floored covariance diagonals, inner
//! optimizer failures, rank-deficient interpolation designs) is recovered locally
//! and reported through [`crate::types::SolveWarning`] instead.

use thiserror::Error;

/// Rejected model or solver configuration.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("num_periods must be positive")]
    NoPeriods,

    #[error("edu_max ({edu_max}) must not be smaller than edu_start ({edu_start})")]
    EducationBounds { edu_start: i32, edu_max: i32 },

    #[error("edu_start must be non-negative, got {0}")]
    NegativeEducation(i32),

    #[error("{field} must be positive")]
    NonPositiveCount { field: &'static str },

    #[error("ambiguity level must be finite and non-negative, got {0}")]
    InvalidAmbiguityLevel(f64),

    #[error("shocks_cholesky must be lower triangular (entry [{row}][{col}] = {value})")]
    NotLowerTriangular { row: usize, col: usize, value: f64 },

    #[error("parameter vector has {actual} entries, expected {expected}")]
    ParameterLength { expected: usize, actual: usize },

    #[error("non-finite value in {field}")]
    NonFinite { field: &'static str },

    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: &'static str, message: String },
}

/// Failure of a solve request.
#[derive(Error, Debug)]
pub enum SolveError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

pub type ConfigResult<T> = Result<T, ConfigError>;
