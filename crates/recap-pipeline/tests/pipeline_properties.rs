//! End-to-end properties of the reporting pipeline.
//!
//! Each test builds its own on-disk database in a temp directory and wires
//! the real repositories, tracker, lifecycle and dispatcher together.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use tempfile::TempDir;

use recap_core::config::{DeliveryConfig, RetentionConfig, TrackingConfig};
use recap_core::registry::EventTypeRegistry;
use recap_core::types::{
    AttemptOutcome, Event, EventPayload, NewEvent, ObjectRef, ReportKind, ReportStatus,
    TrendDirection, TrendRecord, TypeTotals,
};
use recap_insight::{InsightError, MagnitudeScorer, Narrator, SummaryBuilder};
use recap_pipeline::{
    ActivityTracker, DispatchPolicy, Dispatcher, FreezeOutcome, OutboxSender, ReportLifecycle,
    ReportRenderer, TrackOutcome,
};
use recap_storage::{
    Database, DeliveryRepository, EventFilter, EventRepository, ReportRepository,
    RetentionSweeper,
};

// =============================================================================
// Helpers
// =============================================================================

struct Harness {
    tmp: TempDir,
    db: Arc<Database>,
    events: Arc<EventRepository>,
    reports: Arc<ReportRepository>,
    deliveries: Arc<DeliveryRepository>,
}

impl Harness {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(Database::new(&dir.path().join("recap.db")).unwrap());
        Self {
            events: Arc::new(EventRepository::new(db.clone())),
            reports: Arc::new(ReportRepository::new(db.clone())),
            deliveries: Arc::new(DeliveryRepository::new(db.clone())),
            db,
            tmp: dir,
        }
    }

    fn dir(&self) -> &Path {
        self.tmp.path()
    }

    fn tracker(&self) -> ActivityTracker {
        ActivityTracker::new(self.events.clone(), &TrackingConfig::default())
    }

    fn lifecycle(&self) -> ReportLifecycle {
        self.lifecycle_with(SummaryBuilder::new(EventTypeRegistry::with_defaults(), 5, 5))
    }

    fn lifecycle_with(&self, builder: SummaryBuilder) -> ReportLifecycle {
        ReportLifecycle::new(
            self.events.clone(),
            self.reports.clone(),
            builder,
            ReportKind::Weekly,
        )
    }

    fn dispatcher(&self, recipients: &[&str], max_retries: u32) -> Dispatcher {
        let delivery = DeliveryConfig {
            recipients: recipients.iter().map(|s| s.to_string()).collect(),
            max_retries,
            ..DeliveryConfig::default()
        };
        Dispatcher::new(
            self.reports.clone(),
            self.deliveries.clone(),
            Box::new(OutboxSender::new(self.outbox(), "recap@example.com")),
            ReportRenderer::new(EventTypeRegistry::with_defaults(), "[Recap]"),
            DispatchPolicy::from_config(&delivery, false),
        )
    }

    fn outbox(&self) -> std::path::PathBuf {
        self.dir().join("outbox")
    }

    fn outbox_files(&self) -> Vec<String> {
        match std::fs::read_dir(self.outbox()) {
            Ok(entries) => entries
                .map(|e| std::fs::read_to_string(e.unwrap().path()).unwrap())
                .collect(),
            Err(_) => Vec::new(),
        }
    }
}

fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 4, 9, 0, 0).unwrap()
}

fn post_updated(post_id: &str, actor: &str, ts: DateTime<Utc>) -> NewEvent {
    let payload = EventPayload::new(
        "updated",
        ObjectRef::Post {
            id: post_id.to_string(),
            title: Some(format!("Post {}", post_id)),
            post_type: Some("post".to_string()),
            extra: Default::default(),
        },
    );
    NewEvent::from_payload("post_updated", payload, Some(actor.to_string()), "hook").at(ts)
}

fn user_login(user_id: &str, ts: DateTime<Utc>) -> NewEvent {
    let payload = EventPayload::new(
        "login",
        ObjectRef::User {
            id: user_id.to_string(),
            login: None,
            extra: Default::default(),
        },
    );
    NewEvent::from_payload("user_login", payload, Some(user_id.to_string()), "hook").at(ts)
}

// =============================================================================
// Throttle
// =============================================================================

#[test]
fn throttle_window_edges() {
    let h = Harness::new();
    let tracker = h.tracker();
    let t = base_time();

    assert!(tracker.track(post_updated("9", "1", t)).unwrap().is_recorded());
    assert_eq!(
        tracker
            .track(post_updated("9", "1", t + Duration::seconds(1800)))
            .unwrap(),
        TrackOutcome::Throttled
    );
    // Another object with the same type is independent.
    assert!(tracker
        .track(post_updated("10", "1", t + Duration::seconds(1800)))
        .unwrap()
        .is_recorded());
    assert!(tracker
        .track(post_updated("9", "1", t + Duration::seconds(3601)))
        .unwrap()
        .is_recorded());

    let stored = h.events.count_by_type(&EventFilter::default()).unwrap();
    assert_eq!(stored.get("post_updated"), 3);
}

#[test]
fn invalid_submission_stores_nothing() {
    let h = Harness::new();
    let tracker = h.tracker();

    let missing_type = serde_json::json!({"action": "updated", "object": {"id": 3}});
    assert!(tracker
        .track_submission("post_updated", missing_type, None, "api")
        .is_err());
    let blank_action = serde_json::json!({"action": "  ", "object": {"type": "post", "id": 3}});
    assert!(tracker
        .track_submission("post_updated", blank_action, None, "api")
        .is_err());

    assert_eq!(h.events.count(&EventFilter::default()).unwrap(), 0);
}

// =============================================================================
// Magnitude
// =============================================================================

#[test]
fn magnitude_identities() {
    let scorer = MagnitudeScorer::new();
    let body = "<p>The quick brown fox jumps over the lazy dog.</p>";

    assert_eq!(scorer.score(body, body), 0);
    assert_eq!(scorer.score("", ""), 0);
    assert_eq!(scorer.score("", body), 100);
    assert_eq!(scorer.score(body, ""), 100);
    // Markup and whitespace alone do not count as change.
    assert_eq!(
        scorer.score(body, "The  quick brown fox jumps over the <b>lazy</b> dog."),
        0
    );

    let edited = "The quick brown cat sleeps under the lazy dog.";
    let forward = scorer.score(body, edited);
    assert_eq!(forward, scorer.score(edited, body));
    assert!(forward > 0 && forward < 100);
}

#[test]
fn trivial_edit_is_not_recorded() {
    let h = Harness::new();
    let tracker = h.tracker();
    let text = "A long paragraph about the weekly gardening club meeting.";

    let outcome = tracker
        .track_edit(post_updated("4", "2", base_time()), text, text)
        .unwrap();
    assert_eq!(outcome, TrackOutcome::BelowMagnitude { score: 0 });

    let outcome = tracker
        .track_edit(post_updated("4", "2", base_time()), text, "Completely new.")
        .unwrap();
    let TrackOutcome::Recorded(event) = outcome else {
        panic!("expected the rewrite to be recorded");
    };
    assert_eq!(event.payload.metadata["magnitude_bucket"], "major");
}

// =============================================================================
// Freeze
// =============================================================================

/// Yields once so two overlapping freezes interleave inside summary building.
struct YieldingNarrator;

#[async_trait]
impl Narrator for YieldingNarrator {
    fn name(&self) -> &str {
        "yielding"
    }

    async fn narrate(
        &self,
        _events: &[Event],
        _totals: &TypeTotals,
        _trends: &BTreeMap<String, TrendRecord>,
    ) -> Result<Option<String>, InsightError> {
        tokio::task::yield_now().await;
        Ok(None)
    }
}

#[tokio::test]
async fn overlapping_freezes_produce_one_frozen_report() {
    let h = Harness::new();
    let builder = SummaryBuilder::new(EventTypeRegistry::with_defaults(), 5, 5)
        .with_narrator(Box::new(YieldingNarrator));
    let lifecycle = h.lifecycle_with(builder);
    let t = base_time();
    let opened = lifecycle.bootstrap_at(t).unwrap();
    h.events.save(&post_updated("1", "1", t + Duration::hours(1))).unwrap();

    let boundary = t + Duration::days(7);
    let (a, b) = tokio::join!(lifecycle.freeze_at(boundary), lifecycle.freeze_at(boundary));
    let outcomes = [a.unwrap(), b.unwrap()];

    let frozen: Vec<_> = outcomes.iter().filter_map(|o| o.frozen_report()).collect();
    assert_eq!(frozen.len(), 1);
    assert_eq!(frozen[0].id, opened.id);
    assert!(outcomes.contains(&FreezeOutcome::NoCollectingReport));

    // Exactly one frozen and one new collecting report.
    let all = lifecycle.recent(10).unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(
        all.iter().filter(|r| r.status == ReportStatus::Collecting).count(),
        1
    );
}

#[tokio::test]
async fn freeze_reassigns_exactly_the_window() {
    let h = Harness::new();
    let lifecycle = h.lifecycle();
    let t = base_time();
    lifecycle.bootstrap_at(t).unwrap();
    let boundary = t + Duration::days(7);

    let before = h.events.save(&user_login("1", boundary - Duration::seconds(1))).unwrap();
    let at = h.events.save(&user_login("2", boundary)).unwrap();
    let after = h
        .events
        .save(&user_login("3", boundary + Duration::milliseconds(1)))
        .unwrap();

    let outcome = lifecycle.freeze_at(boundary).await.unwrap();
    let report = outcome.frozen_report().unwrap().clone();
    assert_eq!(report.event_count, 2);
    assert_eq!(report.window_end, Some(boundary));

    let owner = |id| h.events.find_by_id(id).unwrap().unwrap().report_id;
    assert_eq!(owner(before.id), Some(report.id));
    assert_eq!(owner(at.id), Some(report.id));
    assert_eq!(owner(after.id), None);
    assert_eq!(lifecycle.pending_events().unwrap(), 1);

    // The next window opens where the last one closed.
    let next = lifecycle.current().unwrap().unwrap();
    assert_eq!(next.window_start, boundary);
}

#[tokio::test]
async fn trends_are_deterministic() {
    let h = Harness::new();
    let lifecycle = h.lifecycle();
    let t = base_time();
    lifecycle.bootstrap_at(t).unwrap();

    for i in 0..4 {
        h.events
            .save(&user_login(&i.to_string(), t + Duration::hours(i + 1)))
            .unwrap();
    }
    h.events.save(&post_updated("1", "1", t + Duration::hours(2))).unwrap();
    lifecycle.freeze_at(t + Duration::days(7)).await.unwrap();

    let week2 = t + Duration::days(7);
    h.events.save(&user_login("1", week2 + Duration::hours(1))).unwrap();
    for i in 0..3 {
        h.events
            .save(&post_updated(&i.to_string(), "1", week2 + Duration::hours(i + 1)))
            .unwrap();
    }
    let outcome = lifecycle.freeze_at(week2 + Duration::days(7)).await.unwrap();
    let report = outcome.frozen_report().unwrap().clone();
    let summary = report.summary.clone().unwrap();

    let logins = &summary.trends["user_login"];
    assert_eq!((logins.current, logins.previous), (1, 4));
    assert_eq!(logins.change_percent, -75.0);
    assert_eq!(logins.direction, TrendDirection::Down);
    let posts = &summary.trends["post_updated"];
    assert_eq!((posts.current, posts.previous), (3, 1));
    assert_eq!(posts.change_percent, 200.0);
    assert_eq!(posts.direction, TrendDirection::Up);

    // Rebuilding from the same stored events gives the same summary.
    let events = h.events.all(&EventFilter::for_report(report.id)).unwrap();
    let previous = TypeTotals::from_counts(vec![
        ("post_updated".to_string(), 1),
        ("user_login".to_string(), 4),
    ]);
    let builder = SummaryBuilder::new(EventTypeRegistry::with_defaults(), 5, 5);
    let rebuilt = builder.build(&events, Some(&previous)).await;
    assert_eq!(rebuilt, summary);
    assert_eq!(rebuilt, builder.build(&events, Some(&previous)).await);
}

// =============================================================================
// Delivery
// =============================================================================

async fn frozen_with_events(h: &Harness, lifecycle: &ReportLifecycle) -> uuid::Uuid {
    let t = base_time();
    lifecycle.bootstrap_at(t).unwrap();
    h.events.save(&post_updated("1", "7", t + Duration::hours(1))).unwrap();
    h.events.save(&user_login("7", t + Duration::hours(2))).unwrap();
    let outcome = lifecycle.freeze_at(t + Duration::days(7)).await.unwrap();
    outcome.frozen_report().unwrap().id
}

#[tokio::test]
async fn recipients_are_delivered_independently() {
    let h = Harness::new();
    let lifecycle = h.lifecycle();
    let id = frozen_with_events(&h, &lifecycle).await;
    let dispatcher = h.dispatcher(&["ops@example.com", "broken-address", "dev@example.com"], 3);

    assert!(!dispatcher.deliver(id).await.unwrap());

    let attempts = h.deliveries.for_report(id).unwrap();
    assert_eq!(attempts.len(), 3);
    let outcome_of = |recipient: &str| {
        attempts
            .iter()
            .find(|a| a.recipient == recipient)
            .map(|a| a.outcome)
    };
    assert_eq!(outcome_of("ops@example.com"), Some(AttemptOutcome::Sent));
    assert_eq!(outcome_of("broken-address"), Some(AttemptOutcome::Failed));
    assert_eq!(outcome_of("dev@example.com"), Some(AttemptOutcome::Sent));

    let files = h.outbox_files();
    assert_eq!(files.len(), 2);
    assert!(files.iter().all(|f| f.contains("Subject: [Recap] Weekly activity report")));
    assert_eq!(lifecycle.get(id).unwrap().status, ReportStatus::Frozen);
}

#[tokio::test]
async fn retries_stop_at_the_cap() {
    let h = Harness::new();
    let lifecycle = h.lifecycle();
    let id = frozen_with_events(&h, &lifecycle).await;
    let dispatcher = h.dispatcher(&["broken-address"], 2);

    assert!(!dispatcher.deliver(id).await.unwrap());
    for _ in 0..5 {
        assert_eq!(dispatcher.retry_pending().await.unwrap(), 0);
    }

    let attempts = h.deliveries.for_report(id).unwrap();
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].outcome, AttemptOutcome::Failed);
    assert_eq!(attempts[0].retry_count, 2);
    assert!(h.deliveries.pending_retries(2, 10).unwrap().is_empty());
    assert_eq!(lifecycle.get(id).unwrap().status, ReportStatus::Frozen);
}

#[tokio::test]
async fn empty_report_is_not_sent_by_default() {
    let h = Harness::new();
    let lifecycle = h.lifecycle();
    let t = base_time();
    lifecycle.bootstrap_at(t).unwrap();
    lifecycle.freeze_at(t + Duration::days(7)).await.unwrap();

    let dispatcher = h.dispatcher(&["ops@example.com"], 3);
    let (id, delivered) = dispatcher.deliver_latest_frozen().await.unwrap().unwrap();
    assert!(delivered);
    assert_eq!(lifecycle.get(id).unwrap().status, ReportStatus::Delivered);
    assert!(h.deliveries.for_report(id).unwrap().is_empty());
    assert!(h.outbox_files().is_empty());

    // Nothing left to deliver.
    assert!(dispatcher.deliver_latest_frozen().await.unwrap().is_none());
}

// =============================================================================
// Retention
// =============================================================================

#[tokio::test]
async fn purge_keeps_the_open_window() {
    let h = Harness::new();
    let lifecycle = h.lifecycle();
    let t = base_time();
    lifecycle.bootstrap_at(t).unwrap();
    h.events.save(&user_login("1", t + Duration::hours(1))).unwrap();
    lifecycle.freeze_at(t + Duration::days(7)).await.unwrap();
    // Old but still unassigned: arrived late with a back-dated timestamp.
    let straggler = h.events.save(&user_login("2", t - Duration::days(400))).unwrap();

    let config = RetentionConfig {
        event_retention_days: 30,
    };
    let result = RetentionSweeper::run_purge_at(&h.db, &config, t + Duration::days(60)).unwrap();
    assert_eq!(result.events_deleted, 1);
    assert!(h.events.find_by_id(straggler.id).unwrap().is_some());
    assert_eq!(lifecycle.recent(10).unwrap().len(), 2);
}
