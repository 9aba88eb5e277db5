//! Activity ingestion: validation, filters, throttling and persistence.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info};

use recap_core::config::TrackingConfig;
use recap_core::error::ValidationError;
use recap_core::types::{Event, EventPayload, NewEvent};
use recap_insight::magnitude::{MagnitudeScorer, BUCKET_KEY, MAGNITUDE_KEY};
use recap_insight::transform::{apply_filters, IgnoredTypes, IngestFilter};
use recap_insight::EditMagnitude;
use recap_storage::EventRepository;

use crate::error::PipelineError;
use crate::throttle::ThrottleGate;

/// What happened to a tracked event.
#[derive(Debug, Clone, PartialEq)]
pub enum TrackOutcome {
    /// Stored in the open window.
    Recorded(Event),
    /// Same signature seen within the throttle window.
    Throttled,
    /// Dropped by an ingest filter.
    Ignored,
    /// Edit too small to be worth recording.
    BelowMagnitude { score: u8 },
}

impl TrackOutcome {
    pub fn is_recorded(&self) -> bool {
        matches!(self, Self::Recorded(_))
    }
}

/// Entry point for recording activity.
pub struct ActivityTracker {
    events: Arc<EventRepository>,
    throttle: ThrottleGate,
    filters: Vec<Box<dyn IngestFilter>>,
    scorer: MagnitudeScorer,
    min_edit_magnitude: u8,
}

impl ActivityTracker {
    /// Tracker with the configured throttle window and ignored types.
    pub fn new(events: Arc<EventRepository>, config: &TrackingConfig) -> Self {
        let mut filters: Vec<Box<dyn IngestFilter>> = Vec::new();
        if !config.ignored_types.is_empty() {
            filters.push(Box::new(IgnoredTypes::new(config.ignored_types.clone())));
        }
        Self {
            throttle: ThrottleGate::new(events.clone(), config.throttle_window_secs),
            events,
            filters,
            scorer: MagnitudeScorer::new().with_max_chars(config.max_edit_chars),
            min_edit_magnitude: config.min_edit_magnitude,
        }
    }

    /// Append an ingest filter; filters run in the order they were added.
    pub fn with_filter(mut self, filter: Box<dyn IngestFilter>) -> Self {
        self.filters.push(filter);
        self
    }

    /// Filter, throttle and store one event.
    pub fn track(&self, event: NewEvent) -> Result<TrackOutcome, PipelineError> {
        if event.event_type.trim().is_empty() {
            return Err(ValidationError::EmptyField { field: "type" }.into());
        }

        let event_type = event.event_type.clone();
        let Some(event) = apply_filters(&self.filters, event) else {
            debug!(event_type = %event_type, "Event dropped by filter");
            return Ok(TrackOutcome::Ignored);
        };

        if !self
            .throttle
            .accept(&event.event_type, &event.object_id, event.timestamp)?
        {
            return Ok(TrackOutcome::Throttled);
        }

        let stored = self.events.save(&event)?;
        info!(
            event_id = %stored.id,
            event_type = %stored.event_type,
            object_id = %stored.object_id,
            origin = %stored.origin,
            "Event recorded"
        );
        Ok(TrackOutcome::Recorded(stored))
    }

    /// Validate an externally submitted JSON payload and track it.
    ///
    /// Nothing is stored when validation fails.
    pub fn track_submission(
        &self,
        event_type: &str,
        submission: Value,
        actor_id: Option<String>,
        origin: &str,
    ) -> Result<TrackOutcome, PipelineError> {
        let payload = EventPayload::from_submission(submission)?;
        self.track(NewEvent::from_payload(event_type, payload, actor_id, origin))
    }

    /// Track a content edit, scored by how much the text changed.
    ///
    /// The score and its bucket are stored in the payload metadata.
    pub fn track_edit(
        &self,
        event: NewEvent,
        old_text: &str,
        new_text: &str,
    ) -> Result<TrackOutcome, PipelineError> {
        let score = self.scorer.score(old_text, new_text);
        if score < self.min_edit_magnitude {
            debug!(
                event_type = %event.event_type,
                object_id = %event.object_id,
                score = score,
                "Edit below minimum magnitude"
            );
            return Ok(TrackOutcome::BelowMagnitude { score });
        }

        let mut event = event;
        event
            .payload
            .metadata
            .insert(MAGNITUDE_KEY.to_string(), Value::from(score));
        event.payload.metadata.insert(
            BUCKET_KEY.to_string(),
            Value::from(EditMagnitude::from_score(score).as_str()),
        );
        self.track(event)
    }
}
