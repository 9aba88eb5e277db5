//! Sliding-window throttle keyed by (event type, object id).
//!
//! Backed by the event store rather than in-memory state, so a restart does
//! not reset the window.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use recap_core::error::RecapError;
use recap_storage::EventRepository;

// chrono durations are bounded by i64 milliseconds.
const MAX_WINDOW_SECS: u64 = i64::MAX as u64 / 1_000;

/// Accepts or rejects a new event based on when its signature was last seen.
pub struct ThrottleGate {
    events: Arc<EventRepository>,
    window: Duration,
}

impl ThrottleGate {
    pub fn new(events: Arc<EventRepository>, window_secs: u64) -> Self {
        Self {
            events,
            window: Duration::seconds(window_secs.min(MAX_WINDOW_SECS) as i64),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// `true` if no event with this signature is stored, or the latest one is
    /// at least one window old at `now`.
    pub fn accept(
        &self,
        event_type: &str,
        object_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, RecapError> {
        let Some(last) = self.events.latest_for_signature(event_type, object_id)? else {
            return Ok(true);
        };

        let elapsed = now.signed_duration_since(last.timestamp);
        let accepted = elapsed >= self.window;
        if !accepted {
            debug!(
                event_type = event_type,
                object_id = object_id,
                elapsed_secs = elapsed.num_seconds(),
                "Throttled"
            );
        }
        Ok(accepted)
    }
}
