//! Report lifecycle: collecting -> frozen -> delivered.
//!
//! This module owns the first transition. Delivery is the dispatcher's job.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use recap_core::types::{Report, ReportKind, ReportStatus, TypeTotals};
use recap_insight::SummaryBuilder;
use recap_storage::{EventFilter, EventRepository, FreezeClaim, ReportRepository};

use crate::error::PipelineError;
use crate::state_machine::validate_transition;

/// Summaries built before the window settles.
const FREEZE_ATTEMPTS: usize = 3;

/// Result of a freeze trigger.
#[derive(Debug, Clone, PartialEq)]
pub enum FreezeOutcome {
    /// The collecting report was closed and a new one opened.
    Frozen { report: Report, next: Report },
    /// Nothing to freeze: not bootstrapped, or another trigger won the race.
    NoCollectingReport,
}

impl FreezeOutcome {
    pub fn frozen_report(&self) -> Option<&Report> {
        match self {
            Self::Frozen { report, .. } => Some(report),
            Self::NoCollectingReport => None,
        }
    }
}

/// Orchestrates report windows.
pub struct ReportLifecycle {
    events: Arc<EventRepository>,
    reports: Arc<ReportRepository>,
    builder: SummaryBuilder,
    kind: ReportKind,
}

impl ReportLifecycle {
    pub fn new(
        events: Arc<EventRepository>,
        reports: Arc<ReportRepository>,
        builder: SummaryBuilder,
        kind: ReportKind,
    ) -> Self {
        Self {
            events,
            reports,
            builder,
            kind,
        }
    }

    /// Make sure a collecting report exists. Idempotent.
    pub fn bootstrap(&self) -> Result<Report, PipelineError> {
        self.bootstrap_at(Utc::now())
    }

    pub fn bootstrap_at(&self, now: DateTime<Utc>) -> Result<Report, PipelineError> {
        if let Some(current) = self.reports.current_collecting()? {
            return Ok(current);
        }
        match self.reports.create_collecting(self.kind, now) {
            Ok(report) => {
                info!(report_id = %report.id, kind = %self.kind, "Bootstrapped collecting report");
                Ok(report)
            }
            // Lost a race with another bootstrap; the unique index kept one.
            Err(e) => self.reports.current_collecting()?.ok_or(e.into()),
        }
    }

    pub async fn freeze(&self) -> Result<FreezeOutcome, PipelineError> {
        self.freeze_at(Utc::now()).await
    }

    /// Close the collecting window at `now`.
    ///
    /// Every unassigned event with a timestamp at or before `now` moves into
    /// the frozen report; later events stay in the next window.
    pub async fn freeze_at(&self, now: DateTime<Utc>) -> Result<FreezeOutcome, PipelineError> {
        let Some(current) = self.reports.current_collecting()? else {
            warn!("Freeze requested but no collecting report exists");
            return Ok(FreezeOutcome::NoCollectingReport);
        };
        validate_transition(current.status, ReportStatus::Frozen)?;

        let previous: Option<TypeTotals> = self
            .reports
            .latest_completed()?
            .and_then(|r| r.summary)
            .map(|s| s.totals);

        // An event saved with a past timestamp while the summary is being
        // built would be frozen without being counted. The checked freeze
        // rolls back in that case and the summary is rebuilt.
        for attempt in 1..=FREEZE_ATTEMPTS {
            let window_events = self.events.all(&EventFilter::unassigned().until(now))?;
            let summary = self.builder.build(&window_events, previous.as_ref()).await;

            let summarized = window_events.len() as u64;
            let commit = match self
                .reports
                .freeze_checked(current.id, now, &summary, self.kind, summarized)?
            {
                FreezeClaim::Committed(commit) => commit,
                FreezeClaim::AlreadyClosed => {
                    warn!(report_id = %current.id, "Report already frozen by another trigger");
                    return Ok(FreezeOutcome::NoCollectingReport);
                }
                FreezeClaim::WindowChanged { expected, found } => {
                    warn!(
                        report_id = %current.id,
                        attempt,
                        expected,
                        found,
                        "Window changed while summarizing, rebuilding"
                    );
                    continue;
                }
            };

            let report = self
                .reports
                .find_by_id(current.id)?
                .ok_or(PipelineError::ReportNotFound(current.id))?;

            info!(
                report_id = %report.id,
                event_count = commit.event_count,
                types = summary.totals.len(),
                "Window frozen"
            );
            return Ok(FreezeOutcome::Frozen {
                report,
                next: commit.next_report,
            });
        }
        Err(PipelineError::WindowUnsettled(current.id))
    }

    /// The open window.
    pub fn current(&self) -> Result<Option<Report>, PipelineError> {
        Ok(self.reports.current_collecting()?)
    }

    pub fn latest_frozen(&self) -> Result<Option<Report>, PipelineError> {
        Ok(self.reports.latest_frozen()?)
    }

    pub fn get(&self, id: Uuid) -> Result<Report, PipelineError> {
        self.reports
            .find_by_id(id)?
            .ok_or(PipelineError::ReportNotFound(id))
    }

    pub fn recent(&self, limit: usize) -> Result<Vec<Report>, PipelineError> {
        Ok(self.reports.recent(limit)?)
    }

    /// Number of events waiting in the open window.
    pub fn pending_events(&self) -> Result<u64, PipelineError> {
        Ok(self.events.count(&EventFilter::unassigned())?)
    }
}
