//! Reporting windows and the freeze transaction.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension;
use tracing::{debug, info};
use uuid::Uuid;

use recap_core::error::RecapError;
use recap_core::types::{Report, ReportKind, ReportStatus, ReportSummary};

use crate::db::{from_millis, sql_err, to_millis, Database};

const REPORT_COLUMNS: &str =
    "id, kind, status, window_start, window_end, event_count, summary, frozen_at, delivered_at";

/// Result of a committed freeze.
#[derive(Debug, Clone, PartialEq)]
pub struct FreezeCommit {
    /// Events moved from the open window into the frozen report.
    pub event_count: u64,
    /// The collecting report opened in the same transaction.
    pub next_report: Report,
}

/// Outcome of a freeze that checks the window against its summary.
#[derive(Debug, Clone, PartialEq)]
pub enum FreezeClaim {
    Committed(FreezeCommit),
    /// The report was no longer collecting.
    AlreadyClosed,
    /// The window held a different number of events than were summarized.
    /// Nothing was written.
    WindowChanged { expected: u64, found: u64 },
}

/// Repository for reports.
pub struct ReportRepository {
    db: Arc<Database>,
}

impl ReportRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Open a new collecting window.
    ///
    /// Fails with a storage error if one is already open.
    pub fn create_collecting(
        &self,
        kind: ReportKind,
        window_start: DateTime<Utc>,
    ) -> Result<Report, RecapError> {
        let report = new_collecting(kind, window_start);
        self.db.with_conn(|conn| insert_collecting(conn, &report))?;
        debug!(report_id = %report.id, kind = %kind, "Opened collecting report");
        Ok(report)
    }

    /// The open window, if the system has been bootstrapped.
    pub fn current_collecting(&self) -> Result<Option<Report>, RecapError> {
        self.find_one(
            "WHERE status = 'collecting' ORDER BY window_start DESC LIMIT 1",
            rusqlite::params![],
        )
    }

    pub fn find_by_id(&self, id: Uuid) -> Result<Option<Report>, RecapError> {
        self.find_one("WHERE id = ?1", rusqlite::params![id.to_string()])
    }

    /// Most recently closed report, frozen or delivered.
    pub fn latest_completed(&self) -> Result<Option<Report>, RecapError> {
        self.find_one(
            "WHERE status IN ('frozen', 'delivered')
             ORDER BY window_end DESC, frozen_at DESC LIMIT 1",
            rusqlite::params![],
        )
    }

    /// Most recently frozen report still awaiting delivery.
    pub fn latest_frozen(&self) -> Result<Option<Report>, RecapError> {
        self.find_one(
            "WHERE status = 'frozen' ORDER BY window_end DESC, frozen_at DESC LIMIT 1",
            rusqlite::params![],
        )
    }

    /// Latest reports of any status, newest window first.
    pub fn recent(&self, limit: usize) -> Result<Vec<Report>, RecapError> {
        self.db.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM reports ORDER BY window_start DESC, created_at DESC LIMIT ?1",
                REPORT_COLUMNS
            );
            let mut stmt = conn.prepare(&sql).map_err(sql_err("Recent reports prepare"))?;
            let rows = stmt
                .query_map(rusqlite::params![limit as i64], |row| Ok(row_to_report(row)))
                .map_err(sql_err("Recent reports"))?;

            let mut reports = Vec::new();
            for row in rows {
                let report = row.map_err(|e| RecapError::Storage(e.to_string()))??;
                reports.push(report);
            }
            Ok(reports)
        })
    }

    /// Close `report_id` at `boundary` and open the next window.
    ///
    /// Runs in one transaction guarded by `status = 'collecting'`. Returns
    /// `None` without touching anything when the report is no longer
    /// collecting (a concurrent or repeated freeze got there first).
    pub fn freeze(
        &self,
        report_id: Uuid,
        boundary: DateTime<Utc>,
        summary: &ReportSummary,
        next_kind: ReportKind,
    ) -> Result<Option<FreezeCommit>, RecapError> {
        match self.freeze_inner(report_id, boundary, summary, next_kind, None)? {
            FreezeClaim::Committed(commit) => Ok(Some(commit)),
            FreezeClaim::AlreadyClosed | FreezeClaim::WindowChanged { .. } => Ok(None),
        }
    }

    /// Like [`freeze`](Self::freeze), but rolls back unless exactly
    /// `expected_events` events move into the report.
    pub fn freeze_checked(
        &self,
        report_id: Uuid,
        boundary: DateTime<Utc>,
        summary: &ReportSummary,
        next_kind: ReportKind,
        expected_events: u64,
    ) -> Result<FreezeClaim, RecapError> {
        self.freeze_inner(report_id, boundary, summary, next_kind, Some(expected_events))
    }

    fn freeze_inner(
        &self,
        report_id: Uuid,
        boundary: DateTime<Utc>,
        summary: &ReportSummary,
        next_kind: ReportKind,
        expected_events: Option<u64>,
    ) -> Result<FreezeClaim, RecapError> {
        let summary_json = serde_json::to_string(summary)?;
        let boundary_ms = to_millis(boundary);
        let id = report_id.to_string();

        self.db.with_conn(|conn| {
            let tx = conn
                .unchecked_transaction()
                .map_err(sql_err("Freeze begin"))?;

            let claimed = tx
                .execute(
                    "UPDATE reports
                     SET status = 'frozen', window_end = ?2, summary = ?3, frozen_at = ?2
                     WHERE id = ?1 AND status = 'collecting'",
                    rusqlite::params![id, boundary_ms, summary_json],
                )
                .map_err(sql_err("Freeze claim"))?;
            if claimed == 0 {
                // Dropping the transaction rolls it back.
                return Ok(FreezeClaim::AlreadyClosed);
            }

            let moved = tx
                .execute(
                    "UPDATE events SET report_id = ?1
                     WHERE report_id IS NULL AND timestamp <= ?2",
                    rusqlite::params![id, boundary_ms],
                )
                .map_err(sql_err("Freeze reassign"))? as u64;
            if let Some(expected) = expected_events.filter(|&e| e != moved) {
                debug!(report_id = %report_id, expected, found = moved, "Freeze window changed");
                return Ok(FreezeClaim::WindowChanged {
                    expected,
                    found: moved,
                });
            }

            tx.execute(
                "UPDATE reports SET event_count = ?2 WHERE id = ?1",
                rusqlite::params![id, moved as i64],
            )
            .map_err(sql_err("Freeze event count"))?;

            let next_report = new_collecting(next_kind, from_millis(boundary_ms));
            insert_collecting(&tx, &next_report)?;

            tx.commit().map_err(sql_err("Freeze commit"))?;

            info!(
                report_id = %report_id,
                event_count = moved,
                next_report_id = %next_report.id,
                "Report frozen"
            );
            Ok(FreezeClaim::Committed(FreezeCommit {
                event_count: moved,
                next_report,
            }))
        })
    }

    /// Move a frozen report to delivered. Returns false if it was not frozen.
    pub fn mark_delivered(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool, RecapError> {
        self.db.with_conn(|conn| {
            let changed = conn
                .execute(
                    "UPDATE reports SET status = 'delivered', delivered_at = ?2
                     WHERE id = ?1 AND status = 'frozen'",
                    rusqlite::params![id.to_string(), to_millis(at)],
                )
                .map_err(sql_err("Mark delivered"))?;
            Ok(changed > 0)
        })
    }

    fn find_one(
        &self,
        clause: &str,
        params: &[&dyn rusqlite::types::ToSql],
    ) -> Result<Option<Report>, RecapError> {
        self.db.with_conn(|conn| {
            let sql = format!("SELECT {} FROM reports {}", REPORT_COLUMNS, clause);
            let result = conn
                .query_row(&sql, params, |row| Ok(row_to_report(row)))
                .optional()
                .map_err(sql_err("Report lookup"))?;

            match result {
                Some(report) => Ok(Some(report?)),
                None => Ok(None),
            }
        })
    }
}

fn new_collecting(kind: ReportKind, window_start: DateTime<Utc>) -> Report {
    Report {
        id: Uuid::new_v4(),
        kind,
        status: ReportStatus::Collecting,
        window_start: from_millis(to_millis(window_start)),
        window_end: None,
        event_count: 0,
        summary: None,
        frozen_at: None,
        delivered_at: None,
    }
}

fn insert_collecting(conn: &rusqlite::Connection, report: &Report) -> Result<(), RecapError> {
    conn.execute(
        "INSERT INTO reports (id, kind, status, window_start) VALUES (?1, ?2, 'collecting', ?3)",
        rusqlite::params![
            report.id.to_string(),
            report.kind.as_str(),
            to_millis(report.window_start),
        ],
    )
    .map_err(sql_err("Failed to create collecting report"))?;
    Ok(())
}

fn row_to_report(row: &rusqlite::Row<'_>) -> Result<Report, RecapError> {
    let get_err = |e: rusqlite::Error| RecapError::Storage(e.to_string());

    let id_str: String = row.get(0).map_err(get_err)?;
    let kind_str: String = row.get(1).map_err(get_err)?;
    let status_str: String = row.get(2).map_err(get_err)?;
    let summary_str: Option<String> = row.get(6).map_err(get_err)?;

    let id = Uuid::parse_str(&id_str)
        .map_err(|e| RecapError::Storage(format!("Invalid report id {}: {}", id_str, e)))?;
    let kind = ReportKind::parse(&kind_str)
        .ok_or_else(|| RecapError::Storage(format!("Invalid report kind: {}", kind_str)))?;
    let status: ReportStatus = status_str.parse()?;
    let summary = summary_str
        .map(|s| serde_json::from_str::<ReportSummary>(&s))
        .transpose()?;
    let event_count: i64 = row.get(5).map_err(get_err)?;

    Ok(Report {
        id,
        kind,
        status,
        window_start: from_millis(row.get(3).map_err(get_err)?),
        window_end: row
            .get::<_, Option<i64>>(4)
            .map_err(get_err)?
            .map(from_millis),
        event_count: event_count.max(0) as u64,
        summary,
        frozen_at: row
            .get::<_, Option<i64>>(7)
            .map_err(get_err)?
            .map(from_millis),
        delivered_at: row
            .get::<_, Option<i64>>(8)
            .map_err(get_err)?
            .map(from_millis),
    })
}
