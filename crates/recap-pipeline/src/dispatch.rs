//! Delivery of frozen reports.
//!
//! Each recipient is handled independently and every first send is logged
//! as a delivery attempt. Failed attempts are retried by a separate bounded
//! sweep; a report only becomes delivered once every recipient has a sent
//! attempt.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use recap_core::config::DeliveryConfig;
use recap_core::types::{AttemptOutcome, Report, ReportStatus};
use recap_storage::{DeliveryRepository, ReportRepository};

use crate::error::PipelineError;
use crate::render::{RenderedReport, ReportRenderer};
use crate::sender::{MessageSender, OutboundMessage};
use crate::state_machine::validate_transition;

/// Delivery policy knobs.
#[derive(Debug, Clone)]
pub struct DispatchPolicy {
    pub recipients: Vec<String>,
    pub send_empty_reports: bool,
    pub max_retries: u32,
    pub retry_batch_size: usize,
}

impl DispatchPolicy {
    pub fn from_config(delivery: &DeliveryConfig, send_empty_reports: bool) -> Self {
        let mut recipients: Vec<String> = Vec::new();
        for r in &delivery.recipients {
            let r = r.trim();
            if !r.is_empty() && !recipients.iter().any(|existing| existing == r) {
                recipients.push(r.to_string());
            }
        }
        Self {
            recipients,
            send_empty_reports,
            max_retries: delivery.max_retries,
            retry_batch_size: delivery.retry_batch_size,
        }
    }
}

/// Sends frozen reports and maintains the attempt log.
pub struct Dispatcher {
    reports: Arc<ReportRepository>,
    deliveries: Arc<DeliveryRepository>,
    sender: Box<dyn MessageSender>,
    renderer: ReportRenderer,
    policy: DispatchPolicy,
}

impl Dispatcher {
    pub fn new(
        reports: Arc<ReportRepository>,
        deliveries: Arc<DeliveryRepository>,
        sender: Box<dyn MessageSender>,
        renderer: ReportRenderer,
        policy: DispatchPolicy,
    ) -> Self {
        Self {
            reports,
            deliveries,
            sender,
            renderer,
            policy,
        }
    }

    /// Deliver a report to every recipient.
    ///
    /// Returns `true` iff the report is delivered when the call returns.
    pub async fn deliver(&self, report_id: Uuid) -> Result<bool, PipelineError> {
        let report = self
            .reports
            .find_by_id(report_id)?
            .ok_or(PipelineError::ReportNotFound(report_id))?;

        match report.status {
            ReportStatus::Delivered => return Ok(true),
            ReportStatus::Collecting => {
                validate_transition(report.status, ReportStatus::Delivered)?;
            }
            ReportStatus::Frozen => {}
        }

        if report.event_count == 0 && !self.policy.send_empty_reports {
            self.reports.mark_delivered(report.id, Utc::now())?;
            info!(report_id = %report.id, "Empty report marked delivered without sending");
            return Ok(true);
        }

        if self.policy.recipients.is_empty() {
            warn!(report_id = %report.id, "No recipients configured, report left frozen");
            return Ok(false);
        }

        let rendered = self.renderer.render(&report);
        let mut all_sent = true;

        for recipient in &self.policy.recipients {
            let existing = self.deliveries.latest_for_recipient(report.id, recipient)?;
            match existing.map(|a| a.outcome) {
                Some(AttemptOutcome::Sent) => continue,
                Some(AttemptOutcome::Failed) => {
                    // Owned by the retry sweep.
                    all_sent = false;
                    continue;
                }
                None => {}
            }

            let message = self.message(&report, &rendered, recipient);
            match self.sender.send(&message).await {
                Ok(()) => {
                    self.deliveries.record(
                        report.id,
                        recipient,
                        AttemptOutcome::Sent,
                        None,
                        Utc::now(),
                    )?;
                }
                Err(e) => {
                    warn!(
                        report_id = %report.id,
                        recipient = %recipient,
                        sender = self.sender.name(),
                        error = %e,
                        "Delivery attempt failed"
                    );
                    self.deliveries.record(
                        report.id,
                        recipient,
                        AttemptOutcome::Failed,
                        Some(e.to_string().as_str()),
                        Utc::now(),
                    )?;
                    all_sent = false;
                }
            }
        }

        if !all_sent {
            info!(report_id = %report.id, "Report not fully delivered, stays frozen");
            return Ok(false);
        }

        validate_transition(report.status, ReportStatus::Delivered)?;
        self.reports.mark_delivered(report.id, Utc::now())?;
        info!(
            report_id = %report.id,
            recipients = self.policy.recipients.len(),
            "Report delivered"
        );
        Ok(true)
    }

    /// Deliver the most recently frozen report. `None` when nothing is
    /// waiting.
    pub async fn deliver_latest_frozen(&self) -> Result<Option<(Uuid, bool)>, PipelineError> {
        let Some(report) = self.reports.latest_frozen()? else {
            return Ok(None);
        };
        let delivered = self.deliver(report.id).await?;
        Ok(Some((report.id, delivered)))
    }

    /// Re-send a bounded batch of failed attempts.
    ///
    /// Returns how many attempts flipped to sent. Never marks a report
    /// delivered; the next `deliver` pass does that.
    pub async fn retry_pending(&self) -> Result<usize, PipelineError> {
        let pending = self
            .deliveries
            .pending_retries(self.policy.max_retries, self.policy.retry_batch_size)?;
        if pending.is_empty() {
            return Ok(0);
        }

        let mut rendered: HashMap<Uuid, (Report, RenderedReport)> = HashMap::new();
        let mut recovered = 0;

        for attempt in pending {
            if !rendered.contains_key(&attempt.report_id) {
                let Some(report) = self.reports.find_by_id(attempt.report_id)? else {
                    warn!(attempt_id = %attempt.id, "Attempt references a missing report");
                    continue;
                };
                let r = self.renderer.render(&report);
                rendered.insert(attempt.report_id, (report, r));
            }
            let Some((report, r)) = rendered.get(&attempt.report_id) else {
                continue;
            };

            let message = self.message(report, r, &attempt.recipient);
            match self.sender.send(&message).await {
                Ok(()) => {
                    self.deliveries.mark_sent(attempt.id, Utc::now())?;
                    recovered += 1;
                    info!(
                        attempt_id = %attempt.id,
                        recipient = %attempt.recipient,
                        "Retry succeeded"
                    );
                }
                Err(e) => {
                    self.deliveries
                        .record_retry_failure(attempt.id, &e.to_string(), Utc::now())?;
                    warn!(
                        attempt_id = %attempt.id,
                        recipient = %attempt.recipient,
                        retry_count = attempt.retry_count + 1,
                        error = %e,
                        "Retry failed"
                    );
                }
            }
        }

        Ok(recovered)
    }

    fn message(
        &self,
        report: &Report,
        rendered: &RenderedReport,
        recipient: &str,
    ) -> OutboundMessage {
        let mut headers = BTreeMap::new();
        headers.insert("X-Recap-Report".to_string(), report.id.to_string());
        headers.insert("X-Recap-Kind".to_string(), report.kind.as_str().to_string());
        OutboundMessage {
            recipient: recipient.to_string(),
            subject: rendered.subject.clone(),
            body: rendered.body.clone(),
            headers,
        }
    }
}
