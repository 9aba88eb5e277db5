use thiserror::Error;

/// Top-level error type for the Recap system.
///
/// Subsystem crates define their own error types and wrap this one with
/// `#[from]` so that the `?` operator works across crate boundaries.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RecapError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Rejection reasons for externally submitted events.
///
/// Validation happens before anything is persisted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("payload must be a JSON object")]
    NotAnObject,

    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("field {field} must be a non-empty string")]
    EmptyField { field: &'static str },

    #[error("unknown report status: {0}")]
    UnknownStatus(String),
}

impl From<toml::de::Error> for RecapError {
    fn from(err: toml::de::Error) -> Self {
        RecapError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for RecapError {
    fn from(err: toml::ser::Error) -> Self {
        RecapError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for RecapError {
    fn from(err: serde_json::Error) -> Self {
        RecapError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for Recap operations.
pub type Result<T> = std::result::Result<T, RecapError>;
