//! Error types for the dose_core library.

use std::io;

use crate::equation::EvalError;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for dose_core operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// IO error occurred
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// TOML parsing error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Configuration validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Formulary validation error
    #[error("Formulary validation error: {0}")]
    FormularyValidation(String),

    /// A single-record calculation failed
    #[error(transparent)]
    Calculation(#[from] CalcError),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

/// Per-record calculation failure.
///
/// These are carried inside a [`crate::CalculationResult`] rather than
/// propagated, so a batch over the whole table survives a single bad record.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CalcError {
    /// Weight missing, non-finite, not positive, or above the configured maximum
    #[error("invalid weight {weight} kg: must be greater than 0 and at most {max} kg")]
    InvalidWeight { weight: f64, max: f64 },

    /// The record needs a secondary dose and none was supplied
    #[error("dose input required for {name}")]
    MissingDoseInput { name: String },

    /// A secondary dose was supplied but is not a positive finite number
    #[error("invalid dose input {dose} for {name}")]
    InvalidDose { name: String, dose: f64 },

    /// The equation could not be evaluated
    #[error("calculation error: {0}")]
    Evaluation(#[from] EvalError),
}
