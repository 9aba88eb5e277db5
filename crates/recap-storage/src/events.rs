//! Append-only event store.
//!
//! Events are written once by the tracker and touched exactly once more,
//! when a freeze assigns them to a report (see `ReportRepository::freeze`).

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::types::ToSql;
use rusqlite::OptionalExtension;
use uuid::Uuid;

use recap_core::error::RecapError;
use recap_core::types::{Event, EventPayload, NewEvent, TypeTotals};

use crate::db::{from_millis, sql_err, to_millis, Database};

const EVENT_COLUMNS: &str =
    "id, event_type, subtype, object_id, actor_id, payload, timestamp, report_id, origin";

/// Which window an event belongs to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Assignment {
    #[default]
    Any,
    /// Still in the open window.
    Unassigned,
    Report(Uuid),
}

/// Predicate for event queries and counts.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub assignment: Assignment,
    pub event_type: Option<String>,
    pub object_id: Option<String>,
    /// Inclusive lower bound on the event timestamp.
    pub since: Option<DateTime<Utc>>,
    /// Inclusive upper bound on the event timestamp.
    pub until: Option<DateTime<Utc>>,
}

impl EventFilter {
    pub fn unassigned() -> Self {
        Self {
            assignment: Assignment::Unassigned,
            ..Self::default()
        }
    }

    pub fn for_report(report_id: Uuid) -> Self {
        Self {
            assignment: Assignment::Report(report_id),
            ..Self::default()
        }
    }

    pub fn until(mut self, ts: DateTime<Utc>) -> Self {
        self.until = Some(ts);
        self
    }

    pub fn since(mut self, ts: DateTime<Utc>) -> Self {
        self.since = Some(ts);
        self
    }

    pub fn of_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    fn where_clause(&self) -> (String, Vec<Box<dyn ToSql>>) {
        let mut clauses: Vec<String> = Vec::new();
        let mut params: Vec<Box<dyn ToSql>> = Vec::new();

        match &self.assignment {
            Assignment::Any => {}
            Assignment::Unassigned => clauses.push("report_id IS NULL".to_string()),
            Assignment::Report(id) => {
                params.push(Box::new(id.to_string()));
                clauses.push(format!("report_id = ?{}", params.len()));
            }
        }
        if let Some(t) = &self.event_type {
            params.push(Box::new(t.clone()));
            clauses.push(format!("event_type = ?{}", params.len()));
        }
        if let Some(o) = &self.object_id {
            params.push(Box::new(o.clone()));
            clauses.push(format!("object_id = ?{}", params.len()));
        }
        if let Some(since) = self.since {
            params.push(Box::new(to_millis(since)));
            clauses.push(format!("timestamp >= ?{}", params.len()));
        }
        if let Some(until) = self.until {
            params.push(Box::new(to_millis(until)));
            clauses.push(format!("timestamp <= ?{}", params.len()));
        }

        let sql = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };
        (sql, params)
    }
}

/// Repository for activity events.
pub struct EventRepository {
    db: Arc<Database>,
}

impl EventRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Persist a new, unassigned event.
    pub fn save(&self, event: &NewEvent) -> Result<Event, RecapError> {
        let id = Uuid::new_v4();
        let payload = serde_json::to_string(&event.payload)?;
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO events (id, event_type, subtype, object_id, actor_id, payload, timestamp, origin)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                rusqlite::params![
                    id.to_string(),
                    event.event_type,
                    event.subtype,
                    event.object_id,
                    event.actor_id,
                    payload,
                    to_millis(event.timestamp),
                    event.origin,
                ],
            )
            .map_err(sql_err("Failed to save event"))?;
            Ok(())
        })?;

        Ok(Event {
            id,
            event_type: event.event_type.clone(),
            subtype: event.subtype.clone(),
            object_id: event.object_id.clone(),
            actor_id: event.actor_id.clone(),
            payload: event.payload.clone(),
            timestamp: from_millis(to_millis(event.timestamp)),
            report_id: None,
            origin: event.origin.clone(),
        })
    }

    pub fn find_by_id(&self, id: Uuid) -> Result<Option<Event>, RecapError> {
        self.db.with_conn(|conn| {
            let sql = format!("SELECT {} FROM events WHERE id = ?1", EVENT_COLUMNS);
            let result = conn
                .query_row(&sql, rusqlite::params![id.to_string()], |row| {
                    Ok(row_to_event(row))
                })
                .optional()
                .map_err(sql_err("Event lookup"))?;

            match result {
                Some(event) => Ok(Some(event?)),
                None => Ok(None),
            }
        })
    }

    /// Most recent stored event with the given (type, object) signature.
    pub fn latest_for_signature(
        &self,
        event_type: &str,
        object_id: &str,
    ) -> Result<Option<Event>, RecapError> {
        self.db.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM events
                 WHERE event_type = ?1 AND object_id = ?2
                 ORDER BY timestamp DESC
                 LIMIT 1",
                EVENT_COLUMNS
            );
            let result = conn
                .query_row(&sql, rusqlite::params![event_type, object_id], |row| {
                    Ok(row_to_event(row))
                })
                .optional()
                .map_err(sql_err("Signature lookup"))?;

            match result {
                Some(event) => Ok(Some(event?)),
                None => Ok(None),
            }
        })
    }

    /// Page through matching events, most recent first.
    pub fn query(
        &self,
        filter: &EventFilter,
        limit: u64,
        offset: u64,
    ) -> Result<Vec<Event>, RecapError> {
        let (where_sql, mut params) = filter.where_clause();
        params.push(Box::new(limit as i64));
        let limit_idx = params.len();
        params.push(Box::new(offset as i64));
        let offset_idx = params.len();

        let sql = format!(
            "SELECT {} FROM events {} ORDER BY timestamp DESC LIMIT ?{} OFFSET ?{}",
            EVENT_COLUMNS, where_sql, limit_idx, offset_idx
        );
        self.select(&sql, params)
    }

    /// Every matching event in chronological order.
    pub fn all(&self, filter: &EventFilter) -> Result<Vec<Event>, RecapError> {
        let (where_sql, params) = filter.where_clause();
        let sql = format!(
            "SELECT {} FROM events {} ORDER BY timestamp ASC",
            EVENT_COLUMNS, where_sql
        );
        self.select(&sql, params)
    }

    pub fn count(&self, filter: &EventFilter) -> Result<u64, RecapError> {
        let (where_sql, params) = filter.where_clause();
        let sql = format!("SELECT COUNT(*) FROM events {}", where_sql);
        self.db.with_conn(|conn| {
            let refs: Vec<&dyn ToSql> = params.iter().map(|p| p.as_ref()).collect();
            let count: i64 = conn
                .query_row(&sql, refs.as_slice(), |row| row.get(0))
                .map_err(sql_err("Event count"))?;
            Ok(count as u64)
        })
    }

    /// Matching events grouped by type.
    pub fn count_by_type(&self, filter: &EventFilter) -> Result<TypeTotals, RecapError> {
        let (where_sql, params) = filter.where_clause();
        let sql = format!(
            "SELECT event_type, COUNT(*) FROM events {} GROUP BY event_type",
            where_sql
        );
        self.db.with_conn(|conn| {
            let refs: Vec<&dyn ToSql> = params.iter().map(|p| p.as_ref()).collect();
            let mut stmt = conn.prepare(&sql).map_err(sql_err("Count by type prepare"))?;
            let rows = stmt
                .query_map(refs.as_slice(), |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
                })
                .map_err(sql_err("Count by type"))?;

            let mut counts = Vec::new();
            for row in rows {
                let (event_type, count) = row.map_err(sql_err("Count by type row"))?;
                counts.push((event_type, count as u64));
            }
            Ok(TypeTotals::from_counts(counts))
        })
    }

    fn select(&self, sql: &str, params: Vec<Box<dyn ToSql>>) -> Result<Vec<Event>, RecapError> {
        self.db.with_conn(|conn| {
            let refs: Vec<&dyn ToSql> = params.iter().map(|p| p.as_ref()).collect();
            let mut stmt = conn.prepare(sql).map_err(sql_err("Event query prepare"))?;
            let rows = stmt
                .query_map(refs.as_slice(), |row| Ok(row_to_event(row)))
                .map_err(sql_err("Event query"))?;

            let mut events = Vec::new();
            for row in rows {
                let event = row.map_err(|e| RecapError::Storage(e.to_string()))??;
                events.push(event);
            }
            Ok(events)
        })
    }
}

fn row_to_event(row: &rusqlite::Row<'_>) -> Result<Event, RecapError> {
    let get_err = |e: rusqlite::Error| RecapError::Storage(e.to_string());

    let id_str: String = row.get(0).map_err(get_err)?;
    let payload_str: String = row.get(5).map_err(get_err)?;
    let report_str: Option<String> = row.get(7).map_err(get_err)?;

    let id = Uuid::parse_str(&id_str)
        .map_err(|e| RecapError::Storage(format!("Invalid event id {}: {}", id_str, e)))?;
    let report_id = report_str
        .map(|s| Uuid::parse_str(&s))
        .transpose()
        .map_err(|e| RecapError::Storage(format!("Invalid report id: {}", e)))?;
    let payload: EventPayload = serde_json::from_str(&payload_str)?;

    Ok(Event {
        id,
        event_type: row.get(1).map_err(get_err)?,
        subtype: row.get(2).map_err(get_err)?,
        object_id: row.get(3).map_err(get_err)?,
        actor_id: row.get(4).map_err(get_err)?,
        payload,
        timestamp: from_millis(row.get(6).map_err(get_err)?),
        report_id,
        origin: row.get(8).map_err(get_err)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use recap_core::types::ObjectRef;

    fn make_repo() -> EventRepository {
        EventRepository::new(Arc::new(Database::in_memory().unwrap()))
    }

    fn post_event(event_type: &str, post_id: &str, ts: DateTime<Utc>) -> NewEvent {
        let payload = EventPayload::new(
            "updated",
            ObjectRef::Post {
                id: post_id.to_string(),
                title: Some(format!("Post {}", post_id)),
                post_type: None,
                extra: Default::default(),
            },
        );
        NewEvent::from_payload(event_type, payload, Some("1".to_string()), "hook").at(ts)
    }

    #[test]
    fn test_save_and_find() {
        let repo = make_repo();
        let saved = repo
            .save(&post_event("post_updated", "10", Utc::now()))
            .unwrap();
        let found = repo.find_by_id(saved.id).unwrap().unwrap();
        assert_eq!(found, saved);
        assert_eq!(found.object_id, "10");
        assert!(found.report_id.is_none());
    }

    #[test]
    fn test_find_missing_returns_none() {
        let repo = make_repo();
        assert!(repo.find_by_id(Uuid::new_v4()).unwrap().is_none());
    }

    #[test]
    fn test_latest_for_signature() {
        let repo = make_repo();
        let base = Utc::now() - Duration::hours(3);
        repo.save(&post_event("post_updated", "1", base)).unwrap();
        let newest = repo
            .save(&post_event("post_updated", "1", base + Duration::hours(1)))
            .unwrap();
        repo.save(&post_event("post_updated", "2", base + Duration::hours(2)))
            .unwrap();
        repo.save(&post_event("post_deleted", "1", base + Duration::hours(2)))
            .unwrap();

        let latest = repo.latest_for_signature("post_updated", "1").unwrap().unwrap();
        assert_eq!(latest.id, newest.id);
        assert!(repo.latest_for_signature("post_updated", "99").unwrap().is_none());
    }

    #[test]
    fn test_query_filters_and_paging() {
        let repo = make_repo();
        let base = Utc::now() - Duration::hours(10);
        for i in 0..5 {
            repo.save(&post_event("post_updated", &i.to_string(), base + Duration::hours(i)))
                .unwrap();
        }
        repo.save(&post_event("comment_posted", "c", base)).unwrap();

        let filter = EventFilter::unassigned().of_type("post_updated");
        let page = repo.query(&filter, 2, 0).unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].object_id, "4");
        let next = repo.query(&filter, 2, 2).unwrap();
        assert_eq!(next[0].object_id, "2");

        let bounded = EventFilter::unassigned().until(base + Duration::hours(1));
        assert_eq!(repo.count(&bounded).unwrap(), 3);
        assert_eq!(repo.all(&bounded).unwrap()[0].timestamp.timestamp(), base.timestamp());
    }

    #[test]
    fn test_count_by_type() {
        let repo = make_repo();
        let now = Utc::now();
        repo.save(&post_event("post_updated", "1", now)).unwrap();
        repo.save(&post_event("post_updated", "2", now)).unwrap();
        repo.save(&post_event("comment_posted", "3", now)).unwrap();

        let totals = repo.count_by_type(&EventFilter::default()).unwrap();
        assert_eq!(totals.get("post_updated"), 2);
        assert_eq!(totals.get("comment_posted"), 1);
        assert_eq!(totals.iter().next().unwrap().event_type, "post_updated");
    }
}
