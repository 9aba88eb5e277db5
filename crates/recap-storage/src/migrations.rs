//! Database schema migrations.
//!
//! Applies the schema for the events, reports, and delivery_attempts tables,
//! tracked in schema_migrations.

use rusqlite::Connection;
use tracing::info;

use recap_core::error::RecapError;

/// Run all pending database migrations.
pub fn run_migrations(conn: &Connection) -> Result<(), RecapError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL,
            applied_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );",
    )
    .map_err(|e| RecapError::Storage(format!("Failed to create migrations table: {}", e)))?;

    let current_version: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .map_err(|e| RecapError::Storage(format!("Failed to query migration version: {}", e)))?;

    if current_version < 1 {
        apply_v1(conn)?;
        info!("Applied migration v1: initial_schema");
    }

    Ok(())
}

/// Version 1: Initial schema.
fn apply_v1(conn: &Connection) -> Result<(), RecapError> {
    conn.execute_batch(
        "
        -- Reporting windows.
        CREATE TABLE IF NOT EXISTS reports (
            id              TEXT PRIMARY KEY NOT NULL,
            kind            TEXT NOT NULL
                            CHECK (kind IN ('weekly', 'daily', 'custom')),
            status          TEXT NOT NULL
                            CHECK (status IN ('collecting', 'frozen', 'delivered')),
            window_start    INTEGER NOT NULL,
            window_end      INTEGER,
            event_count     INTEGER NOT NULL DEFAULT 0,
            summary         TEXT,
            frozen_at       INTEGER,
            delivered_at    INTEGER,
            created_at      INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );

        -- At most one open window.
        CREATE UNIQUE INDEX IF NOT EXISTS idx_reports_single_collecting
            ON reports (status)
            WHERE status = 'collecting';

        CREATE INDEX IF NOT EXISTS idx_reports_status_window_end
            ON reports (status, window_end DESC);

        -- Activity events.
        CREATE TABLE IF NOT EXISTS events (
            id              TEXT PRIMARY KEY NOT NULL,
            event_type      TEXT NOT NULL,
            subtype         TEXT,
            object_id       TEXT NOT NULL DEFAULT '',
            actor_id        TEXT,
            payload         TEXT NOT NULL,
            timestamp       INTEGER NOT NULL,
            report_id       TEXT,
            origin          TEXT NOT NULL DEFAULT 'hook',
            created_at      INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),
            FOREIGN KEY (report_id) REFERENCES reports(id)
        );

        CREATE INDEX IF NOT EXISTS idx_events_signature
            ON events (event_type, object_id, timestamp DESC);

        CREATE INDEX IF NOT EXISTS idx_events_report
            ON events (report_id, timestamp ASC);

        CREATE INDEX IF NOT EXISTS idx_events_unassigned
            ON events (timestamp ASC)
            WHERE report_id IS NULL;

        -- Delivery audit log.
        CREATE TABLE IF NOT EXISTS delivery_attempts (
            id              TEXT PRIMARY KEY NOT NULL,
            report_id       TEXT NOT NULL,
            recipient       TEXT NOT NULL,
            outcome         TEXT NOT NULL
                            CHECK (outcome IN ('sent', 'failed')),
            attempted_at    INTEGER NOT NULL,
            error           TEXT,
            retry_count     INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY (report_id) REFERENCES reports(id)
        );

        CREATE INDEX IF NOT EXISTS idx_delivery_report_recipient
            ON delivery_attempts (report_id, recipient);

        CREATE INDEX IF NOT EXISTS idx_delivery_pending
            ON delivery_attempts (outcome, retry_count, attempted_at DESC);

        INSERT OR IGNORE INTO schema_migrations (version, name) VALUES (1, 'initial_schema');
        ",
    )
    .map_err(|e| RecapError::Storage(format!("Failed to apply migration v1: {}", e)))?;

    Ok(())
}
