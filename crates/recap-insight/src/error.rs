use thiserror::Error;

use recap_core::error::RecapError;

/// Errors that can occur while building report summaries.
#[derive(Error, Debug)]
pub enum InsightError {
    #[error(transparent)]
    Core(#[from] RecapError),
    #[error("narrative unavailable: {0}")]
    Narrative(String),
    #[error("missing credential: {0}")]
    MissingCredential(String),
    #[error("insufficient data: {0}")]
    InsufficientData(String),
}
