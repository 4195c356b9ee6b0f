//! Error types for Meterline
//!
//! Provides a unified error type and domain-specific error variants

use thiserror::Error;

/// Result type alias using MeterlineError
pub type Result<T> = std::result::Result<T, MeterlineError>;

/// Unified error type for Meterline operations
#[derive(Debug, Error)]
pub enum MeterlineError {
    // Decimal arithmetic / parsing errors
    #[error("Quantity error: {0}")]
    Quantity(#[from] QuantityError),

    // Window construction errors
    #[error("Window error: {0}")]
    Window(#[from] WindowError),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // Storage / IO errors
    #[error("IO error: {0}")]
    Io(String),

    // Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Decimal quantity errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QuantityError {
    #[error("Invalid quantity: {0:?}")]
    Invalid(String),

    #[error("Decimal arithmetic overflow")]
    Overflow,

    #[error("Division by zero")]
    DivisionByZero,

    #[error("Result needs more than 28 decimal places")]
    Inexact,

    #[error("Cannot allocate into zero parts")]
    EmptyAllocation,

    #[error("Allocation weights must be non-negative with a positive total")]
    InvalidWeights,
}

/// Time window construction errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WindowError {
    #[error("end must be after start")]
    EndNotAfterStart,

    #[error("Window start {start} is later than end {end}")]
    Inverted { start: String, end: String },

    #[error("Window size must be positive")]
    NonPositiveSize,

    #[error("Window duration overflows supported range")]
    Overflow,
}

/// Metering configuration errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Extraction rule #{index} has an empty source property")]
    EmptySourceProperty { index: usize },

    #[error("Extraction rule #{index} has an empty unit")]
    EmptyUnit { index: usize },

    #[error("Extraction rule #{index} has a filter with an empty property")]
    EmptyFilterProperty { index: usize },

    #[error("Invalid setting: {0}")]
    Invalid(String),
}

// Implement From for common external error types
impl From<serde_json::Error> for MeterlineError {
    fn from(err: serde_json::Error) -> Self {
        MeterlineError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for MeterlineError {
    fn from(err: std::io::Error) -> Self {
        MeterlineError::Io(err.to_string())
    }
}

impl From<anyhow::Error> for MeterlineError {
    fn from(err: anyhow::Error) -> Self {
        MeterlineError::Internal(err.to_string())
    }
}
