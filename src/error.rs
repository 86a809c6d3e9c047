//! Error types for retention-flux

use thiserror::Error;

/// Errors that can abort a pipeline run
#[derive(Debug, Error)]
pub enum FeatureError {
    #[error("Missing required column: {0}")]
    MissingColumn(String),

    #[error("Score out of range: {field}={value} (expected {min}..={max})")]
    OutOfRangeScore {
        field: &'static str,
        value: i64,
        min: i64,
        max: i64,
    },

    #[error("Failed to parse input: {0}")]
    ParseError(String),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Duplicate customer id: {0}")]
    DuplicateCustomer(String),

    #[error("Feature table invariant violated: {0}")]
    InvariantViolation(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Feature mismatch: {0}")]
    FeatureMismatch(String),
}
