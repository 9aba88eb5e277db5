//! Delivery attempt log.
//!
//! One row per (report, recipient) first send. Rows are never deleted; the
//! retry sweep updates them in place.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension;
use uuid::Uuid;

use recap_core::error::RecapError;
use recap_core::types::{AttemptOutcome, DeliveryAttempt};

use crate::db::{from_millis, sql_err, to_millis, Database};

const ATTEMPT_COLUMNS: &str =
    "id, report_id, recipient, outcome, attempted_at, error, retry_count";

/// Repository for delivery attempts.
pub struct DeliveryRepository {
    db: Arc<Database>,
}

impl DeliveryRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Log the first attempt to send a report to one recipient.
    pub fn record(
        &self,
        report_id: Uuid,
        recipient: &str,
        outcome: AttemptOutcome,
        error: Option<&str>,
        attempted_at: DateTime<Utc>,
    ) -> Result<DeliveryAttempt, RecapError> {
        let attempt = DeliveryAttempt {
            id: Uuid::new_v4(),
            report_id,
            recipient: recipient.to_string(),
            outcome,
            attempted_at: from_millis(to_millis(attempted_at)),
            error: error.map(|e| e.to_string()),
            retry_count: 0,
        };

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO delivery_attempts (id, report_id, recipient, outcome, attempted_at, error, retry_count)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0)",
                rusqlite::params![
                    attempt.id.to_string(),
                    report_id.to_string(),
                    attempt.recipient,
                    outcome.as_str(),
                    to_millis(attempt.attempted_at),
                    attempt.error,
                ],
            )
            .map_err(sql_err("Failed to record delivery attempt"))?;
            Ok(())
        })?;

        Ok(attempt)
    }

    pub fn find_by_id(&self, id: Uuid) -> Result<Option<DeliveryAttempt>, RecapError> {
        self.db.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM delivery_attempts WHERE id = ?1",
                ATTEMPT_COLUMNS
            );
            let result = conn
                .query_row(&sql, rusqlite::params![id.to_string()], |row| {
                    Ok(row_to_attempt(row))
                })
                .optional()
                .map_err(sql_err("Attempt lookup"))?;

            match result {
                Some(attempt) => Ok(Some(attempt?)),
                None => Ok(None),
            }
        })
    }

    /// All attempts for a report, oldest first.
    pub fn for_report(&self, report_id: Uuid) -> Result<Vec<DeliveryAttempt>, RecapError> {
        let sql = format!(
            "SELECT {} FROM delivery_attempts WHERE report_id = ?1 ORDER BY attempted_at ASC",
            ATTEMPT_COLUMNS
        );
        self.select(&sql, rusqlite::params![report_id.to_string()])
    }

    /// The latest attempt for one recipient of a report.
    pub fn latest_for_recipient(
        &self,
        report_id: Uuid,
        recipient: &str,
    ) -> Result<Option<DeliveryAttempt>, RecapError> {
        let sql = format!(
            "SELECT {} FROM delivery_attempts
             WHERE report_id = ?1 AND recipient = ?2
             ORDER BY attempted_at DESC LIMIT 1",
            ATTEMPT_COLUMNS
        );
        Ok(self
            .select(&sql, rusqlite::params![report_id.to_string(), recipient])?
            .into_iter()
            .next())
    }

    /// Failed attempts still under the retry cap, most recent first.
    pub fn pending_retries(
        &self,
        max_retries: u32,
        limit: usize,
    ) -> Result<Vec<DeliveryAttempt>, RecapError> {
        let sql = format!(
            "SELECT {} FROM delivery_attempts
             WHERE outcome = 'failed' AND retry_count < ?1
             ORDER BY attempted_at DESC LIMIT ?2",
            ATTEMPT_COLUMNS
        );
        self.select(&sql, rusqlite::params![max_retries as i64, limit as i64])
    }

    /// Flip a failed attempt to sent and clear its error.
    pub fn mark_sent(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), RecapError> {
        self.update(
            "UPDATE delivery_attempts
             SET outcome = 'sent', error = NULL, attempted_at = ?2
             WHERE id = ?1",
            rusqlite::params![id.to_string(), to_millis(at)],
            id,
        )
    }

    /// Count one more failed retry against an attempt.
    pub fn record_retry_failure(
        &self,
        id: Uuid,
        error: &str,
        at: DateTime<Utc>,
    ) -> Result<(), RecapError> {
        self.update(
            "UPDATE delivery_attempts
             SET retry_count = retry_count + 1, error = ?2, attempted_at = ?3
             WHERE id = ?1",
            rusqlite::params![id.to_string(), error, to_millis(at)],
            id,
        )
    }

    pub fn count_by_outcome(&self, outcome: AttemptOutcome) -> Result<u64, RecapError> {
        self.db.with_conn(|conn| {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM delivery_attempts WHERE outcome = ?1",
                    rusqlite::params![outcome.as_str()],
                    |row| row.get(0),
                )
                .map_err(sql_err("Attempt count"))?;
            Ok(count as u64)
        })
    }

    fn update(
        &self,
        sql: &str,
        params: &[&dyn rusqlite::types::ToSql],
        id: Uuid,
    ) -> Result<(), RecapError> {
        self.db.with_conn(|conn| {
            let changed = conn
                .execute(sql, params)
                .map_err(sql_err("Attempt update"))?;
            if changed == 0 {
                return Err(RecapError::NotFound(format!("delivery attempt {}", id)));
            }
            Ok(())
        })
    }

    fn select(
        &self,
        sql: &str,
        params: &[&dyn rusqlite::types::ToSql],
    ) -> Result<Vec<DeliveryAttempt>, RecapError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(sql).map_err(sql_err("Attempt query prepare"))?;
            let rows = stmt
                .query_map(params, |row| Ok(row_to_attempt(row)))
                .map_err(sql_err("Attempt query"))?;

            let mut attempts = Vec::new();
            for row in rows {
                let attempt = row.map_err(|e| RecapError::Storage(e.to_string()))??;
                attempts.push(attempt);
            }
            Ok(attempts)
        })
    }
}

fn row_to_attempt(row: &rusqlite::Row<'_>) -> Result<DeliveryAttempt, RecapError> {
    let get_err = |e: rusqlite::Error| RecapError::Storage(e.to_string());

    let id_str: String = row.get(0).map_err(get_err)?;
    let report_str: String = row.get(1).map_err(get_err)?;
    let outcome_str: String = row.get(3).map_err(get_err)?;
    let retry_count: i64 = row.get(6).map_err(get_err)?;

    Ok(DeliveryAttempt {
        id: Uuid::parse_str(&id_str)
            .map_err(|e| RecapError::Storage(format!("Invalid attempt id: {}", e)))?,
        report_id: Uuid::parse_str(&report_str)
            .map_err(|e| RecapError::Storage(format!("Invalid report id: {}", e)))?,
        recipient: row.get(2).map_err(get_err)?,
        outcome: AttemptOutcome::parse(&outcome_str)
            .ok_or_else(|| RecapError::Storage(format!("Invalid outcome: {}", outcome_str)))?,
        attempted_at: from_millis(row.get(4).map_err(get_err)?),
        error: row.get(5).map_err(get_err)?,
        retry_count: retry_count.max(0) as u32,
    })
}
