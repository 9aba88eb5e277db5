//! Error types for the reporting pipeline.

use recap_core::error::{RecapError, ValidationError};
use recap_core::types::ReportStatus;
use uuid::Uuid;

/// Errors from tracking, freezing and dispatching.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Invalid submission: {0}")]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error("Report not found: {0}")]
    ReportNotFound(Uuid),
    #[error("Window of report {0} kept changing during freeze")]
    WindowUnsettled(Uuid),
    #[error("Storage error: {0}")]
    Storage(#[from] RecapError),
}

/// A report status change that the lifecycle does not allow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Invalid state transition: {from} -> {to}")]
pub struct TransitionError {
    pub from: ReportStatus,
    pub to: ReportStatus,
}

/// Errors from an outbound transport. Any of these is a failed attempt.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("Transport failed: {0}")]
    Transport(String),
    #[error("Invalid recipient: {0}")]
    InvalidRecipient(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from the job scheduler.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("Invalid interval for job {0}")]
    InvalidInterval(String),
}
