use thiserror::Error;

/// Validation and contract errors exposed by `rankscout-core`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("item id cannot be empty")]
    EmptyItemId,
    #[error("item id length {len} must be exactly {expected}")]
    ItemIdLength { len: usize, expected: usize },
    #[error("item id contains invalid character '{ch}' at index {index}")]
    ItemIdInvalidChar { ch: char, index: usize },

    #[error("invalid strategy '{value}', expected one of velocity, balanced, patient")]
    InvalidStrategy { value: String },

    #[error("timestamp must be RFC3339: '{value}'")]
    InvalidTimestamp { value: String },

    #[error("{field} range is inverted: min {min} > max {max}")]
    InvertedRange {
        field: &'static str,
        min: String,
        max: String,
    },
    #[error("field '{field}' must be finite")]
    NonFiniteValue { field: &'static str },
    #[error("field '{field}' must be non-negative")]
    NegativeValue { field: &'static str },
    #[error("max_results must be greater than zero")]
    ZeroMaxResults,
    #[error("category id must be greater than zero")]
    InvalidCategory,
}

/// Top-level error type for core operations that are neither gateway nor discovery calls.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
