//! Reporting pipeline for Recap.
//!
//! Records activity through the throttle and magnitude gates, freezes
//! collecting windows into summarized reports, and dispatches them to
//! recipients through pluggable senders on a background schedule.

pub mod dispatch;
pub mod error;
pub mod lifecycle;
pub mod render;
pub mod scheduler;
pub mod sender;
pub mod state_machine;
pub mod throttle;
pub mod tracker;

pub use dispatch::{DispatchPolicy, Dispatcher};
pub use error::{PipelineError, SchedulerError, SendError, TransitionError};
pub use lifecycle::{FreezeOutcome, ReportLifecycle};
pub use render::{RenderedReport, ReportRenderer};
pub use scheduler::{DeliverJob, FreezeJob, Job, JobScheduler, PurgeJob, RetryJob};
pub use sender::{sender_from_config, LogSender, MessageSender, OutboundMessage, OutboxSender};
pub use state_machine::validate_transition;
pub use throttle::ThrottleGate;
pub use tracker::{ActivityTracker, TrackOutcome};
