//! Error types for Entwine Core

use thiserror::Error;

/// Result type alias using Entwine's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Entwine error types
///
/// Entities left with a dangling reference after a delete are not reported
/// through this type; see [`crate::graph::DeleteReport`].
#[derive(Error, Debug)]
pub enum Error {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Cardinality violation: {0}")]
    CardinalityViolation(String),

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl Error {
    pub(crate) fn not_found(what: impl std::fmt::Display) -> Self {
        Self::NotFound(what.to_string())
    }

    /// True for errors raised while building a schema
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }
}
