//! In-process job loop.
//!
//! Runs each registered job on its own interval until shut down. Jobs run
//! to completion one at a time; a failing job is logged and retried on its
//! next tick.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{error, info};

use recap_core::config::RetentionConfig;
use recap_storage::{Database, RetentionSweeper};

use crate::dispatch::Dispatcher;
use crate::error::{PipelineError, SchedulerError};
use crate::lifecycle::{FreezeOutcome, ReportLifecycle};

/// A re-triggerable unit of work.
#[async_trait]
pub trait Job: Send + Sync {
    fn name(&self) -> &str;

    /// Run once, returning a short description of what happened.
    async fn run(&self) -> Result<String, PipelineError>;
}

struct ScheduledJob {
    job: Arc<dyn Job>,
    interval: Duration,
}

/// Background loop that fires jobs on fixed intervals.
pub struct JobScheduler {
    jobs: Vec<ScheduledJob>,
    shutdown: Arc<Notify>,
}

impl JobScheduler {
    pub fn new() -> Self {
        Self {
            jobs: Vec::new(),
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Register a job. The first run happens one interval after `run` starts.
    pub fn add(&mut self, job: Arc<dyn Job>, interval: Duration) -> Result<(), SchedulerError> {
        if interval.is_zero() {
            return Err(SchedulerError::InvalidInterval(job.name().to_string()));
        }
        self.jobs.push(ScheduledJob { job, interval });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Run until `shutdown` is signalled.
    pub async fn run(&self) {
        let start = Instant::now();
        let mut next_due: Vec<Instant> = self.jobs.iter().map(|j| start + j.interval).collect();
        info!(jobs = self.jobs.len(), "Scheduler started");

        loop {
            let Some(wake_at) = next_due.iter().min().copied() else {
                // Nothing scheduled; just wait for shutdown.
                self.shutdown.notified().await;
                info!("Scheduler stopped");
                return;
            };

            tokio::select! {
                _ = tokio::time::sleep_until(wake_at) => {}
                _ = self.shutdown.notified() => {
                    info!("Scheduler stopped");
                    return;
                }
            }

            let now = Instant::now();
            for (entry, due) in self.jobs.iter().zip(next_due.iter_mut()) {
                if *due > now {
                    continue;
                }
                match entry.job.run().await {
                    Ok(result) => info!(job = entry.job.name(), result = %result, "Job finished"),
                    Err(e) => error!(job = entry.job.name(), error = %e, "Job failed"),
                }
                *due = Instant::now() + entry.interval;
            }
        }
    }

    /// Signal the loop to stop. Safe to call before `run`.
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }

    pub fn shutdown_handle(&self) -> Arc<Notify> {
        Arc::clone(&self.shutdown)
    }
}

impl Default for JobScheduler {
    fn default() -> Self {
        Self::new()
    }
}

/// Freezes the collecting window.
pub struct FreezeJob(pub Arc<ReportLifecycle>);

#[async_trait]
impl Job for FreezeJob {
    fn name(&self) -> &str {
        "freeze"
    }

    async fn run(&self) -> Result<String, PipelineError> {
        Ok(match self.0.freeze().await? {
            FreezeOutcome::Frozen { report, .. } => {
                format!("froze report {} ({} events)", report.id, report.event_count)
            }
            FreezeOutcome::NoCollectingReport => "no collecting report".to_string(),
        })
    }
}

/// Delivers the latest frozen report.
pub struct DeliverJob(pub Arc<Dispatcher>);

#[async_trait]
impl Job for DeliverJob {
    fn name(&self) -> &str {
        "deliver"
    }

    async fn run(&self) -> Result<String, PipelineError> {
        Ok(match self.0.deliver_latest_frozen().await? {
            Some((id, true)) => format!("report {} delivered", id),
            Some((id, false)) => format!("report {} not fully delivered", id),
            None => "nothing to deliver".to_string(),
        })
    }
}

/// Re-sends failed delivery attempts.
pub struct RetryJob(pub Arc<Dispatcher>);

#[async_trait]
impl Job for RetryJob {
    fn name(&self) -> &str {
        "retry"
    }

    async fn run(&self) -> Result<String, PipelineError> {
        let recovered = self.0.retry_pending().await?;
        Ok(format!("{} attempts recovered", recovered))
    }
}

/// Applies the event retention policy.
pub struct PurgeJob {
    db: Arc<Database>,
    config: RetentionConfig,
}

impl PurgeJob {
    pub fn new(db: Arc<Database>, config: RetentionConfig) -> Self {
        Self { db, config }
    }
}

#[async_trait]
impl Job for PurgeJob {
    fn name(&self) -> &str {
        "purge"
    }

    async fn run(&self) -> Result<String, PipelineError> {
        let result = RetentionSweeper::run_purge(&self.db, &self.config)?;
        Ok(format!("{} events purged", result.events_deleted))
    }
}
