//! Retention sweep.
//!
//! Deletes events that belong to a closed report and are older than the
//! configured retention period. Open-window events, reports and delivery
//! attempts are never purged.

use chrono::{DateTime, Duration, Utc};
use tracing::info;

use recap_core::config::RetentionConfig;
use recap_core::error::RecapError;

use crate::db::{sql_err, to_millis, Database};

/// Result of a purge operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurgeResult {
    /// Number of events deleted.
    pub events_deleted: usize,
    /// Events strictly older than this were eligible. `None` when retention
    /// is disabled or the period reaches past the earliest representable time.
    pub cutoff: Option<DateTime<Utc>>,
}

/// Runs retention purges against the event table.
pub struct RetentionSweeper;

impl RetentionSweeper {
    /// Oldest timestamp kept for a given "now", or `None` if it underflows.
    pub fn cutoff(now: DateTime<Utc>, config: &RetentionConfig) -> Option<DateTime<Utc>> {
        Duration::try_days(i64::from(config.event_retention_days))
            .and_then(|period| now.checked_sub_signed(period))
    }

    pub fn run_purge(db: &Database, config: &RetentionConfig) -> Result<PurgeResult, RecapError> {
        Self::run_purge_at(db, config, Utc::now())
    }

    pub fn run_purge_at(
        db: &Database,
        config: &RetentionConfig,
        now: DateTime<Utc>,
    ) -> Result<PurgeResult, RecapError> {
        if config.event_retention_days == 0 {
            info!("Retention disabled, nothing purged");
            return Ok(PurgeResult {
                events_deleted: 0,
                cutoff: None,
            });
        }

        let Some(cutoff) = Self::cutoff(now, config) else {
            info!(
                days = config.event_retention_days,
                "Retention period predates every timestamp, nothing purged"
            );
            return Ok(PurgeResult {
                events_deleted: 0,
                cutoff: None,
            });
        };
        let events_deleted = db.with_conn(|conn| {
            conn.execute(
                "DELETE FROM events WHERE report_id IS NOT NULL AND timestamp < ?1",
                rusqlite::params![to_millis(cutoff)],
            )
            .map_err(sql_err("Retention purge failed"))
        })?;

        info!(
            events_deleted = events_deleted,
            cutoff = %cutoff,
            "Retention purge complete"
        );

        Ok(PurgeResult {
            events_deleted,
            cutoff: Some(cutoff),
        })
    }
}
