//! Recap application binary - composition root.
//!
//! Ties together all Recap crates into a single executable:
//! 1. Load configuration from TOML
//! 2. Open storage (SQLite) and make sure a collecting report exists
//! 3. Build the tracker, lifecycle manager and dispatcher from config
//! 4. Run one job from the command line, or loop all jobs with `recap run`

mod cli;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use recap_core::config::RecapConfig;
use recap_core::registry::EventTypeRegistry;
use recap_core::types::{EventPayload, NewEvent, Report};
use recap_insight::{narrator_from_config, SummaryBuilder};
use recap_pipeline::{
    sender_from_config, ActivityTracker, DeliverJob, DispatchPolicy, Dispatcher, FreezeJob,
    FreezeOutcome, Job, JobScheduler, PurgeJob, ReportLifecycle, ReportRenderer, RetryJob,
    TrackOutcome,
};
use recap_storage::{
    Database, DeliveryRepository, EventRepository, ReportRepository, RetentionSweeper,
};

use cli::{CliArgs, Command};

type AppResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Everything a subcommand needs, built once from config.
struct App {
    config: RecapConfig,
    db: Arc<Database>,
    tracker: ActivityTracker,
    lifecycle: Arc<ReportLifecycle>,
    dispatcher: Arc<Dispatcher>,
    renderer: ReportRenderer,
}

impl App {
    fn build(config: RecapConfig, data_dir: &Path) -> AppResult<Self> {
        let db_path = data_dir.join("recap.db");
        let db = Arc::new(Database::new(&db_path)?);
        tracing::info!(path = %db_path.display(), "SQLite database opened");

        let events = Arc::new(EventRepository::new(Arc::clone(&db)));
        let reports = Arc::new(ReportRepository::new(Arc::clone(&db)));
        let deliveries = Arc::new(DeliveryRepository::new(Arc::clone(&db)));
        let registry = EventTypeRegistry::with_defaults();

        let tracker = ActivityTracker::new(Arc::clone(&events), &config.tracking);

        let builder = SummaryBuilder::new(
            registry.clone(),
            config.report.max_highlights,
            config.report.top_contributors,
        )
        .with_narrator(narrator_from_config(&config.narrative, &registry));
        let lifecycle = Arc::new(ReportLifecycle::new(
            events,
            Arc::clone(&reports),
            builder,
            config.report.kind,
        ));

        let sender = sender_from_config(&config.delivery, data_dir)?;
        tracing::info!(transport = sender.name(), "Sender ready");
        let renderer = ReportRenderer::new(registry.clone(), config.report.subject_prefix.clone());
        let dispatcher = Arc::new(Dispatcher::new(
            reports,
            deliveries,
            sender,
            ReportRenderer::new(registry, config.report.subject_prefix.clone()),
            DispatchPolicy::from_config(&config.delivery, config.report.send_empty_reports),
        ));

        Ok(Self {
            config,
            db,
            tracker,
            lifecycle,
            dispatcher,
            renderer,
        })
    }

    fn track(
        &self,
        event_type: &str,
        payload: &str,
        actor: Option<String>,
        origin: &str,
    ) -> AppResult<()> {
        let submission: serde_json::Value = serde_json::from_str(payload)?;
        let outcome = self
            .tracker
            .track_submission(event_type, submission, actor, origin)?;
        print_outcome(&outcome);
        Ok(())
    }

    fn edit(
        &self,
        event_type: &str,
        payload: &str,
        old_file: &Path,
        new_file: &Path,
        actor: Option<String>,
        origin: &str,
    ) -> AppResult<()> {
        let submission: serde_json::Value = serde_json::from_str(payload)?;
        let payload = EventPayload::from_submission(submission)?;
        let old_text = std::fs::read_to_string(old_file)?;
        let new_text = std::fs::read_to_string(new_file)?;
        let event = NewEvent::from_payload(event_type, payload, actor, origin);
        let outcome = self.tracker.track_edit(event, &old_text, &new_text)?;
        print_outcome(&outcome);
        Ok(())
    }

    async fn freeze(&self) -> AppResult<()> {
        match self.lifecycle.freeze().await? {
            FreezeOutcome::Frozen { report, next } => {
                println!(
                    "Froze report {} ({} events); collecting into {}",
                    report.id, report.event_count, next.id
                );
            }
            FreezeOutcome::NoCollectingReport => println!("No collecting report to freeze"),
        }
        Ok(())
    }

    async fn deliver(&self, report: Option<uuid::Uuid>) -> AppResult<()> {
        let result = match report {
            Some(id) => Some((id, self.dispatcher.deliver(id).await?)),
            None => self.dispatcher.deliver_latest_frozen().await?,
        };
        match result {
            Some((id, true)) => println!("Report {} delivered", id),
            Some((id, false)) => println!(
                "Report {} not fully delivered; failed attempts will be retried",
                id
            ),
            None => println!("No frozen report waiting for delivery"),
        }
        Ok(())
    }

    async fn retry(&self) -> AppResult<()> {
        let recovered = self.dispatcher.retry_pending().await?;
        println!("{} attempts recovered", recovered);
        Ok(())
    }

    fn purge(&self) -> AppResult<()> {
        let result = RetentionSweeper::run_purge(&self.db, &self.config.retention)?;
        match result.cutoff {
            Some(cutoff) => println!(
                "Purged {} events older than {}",
                result.events_deleted,
                cutoff.format("%Y-%m-%d %H:%M UTC")
            ),
            None => println!("Nothing purged, retention period not in effect"),
        }
        Ok(())
    }

    fn status(&self, limit: usize) -> AppResult<()> {
        if let Some(current) = self.lifecycle.current()? {
            println!(
                "Collecting: {} since {} ({} events pending)",
                current.id,
                current.window_start.format("%Y-%m-%d %H:%M UTC"),
                self.lifecycle.pending_events()?
            );
        } else {
            println!("Collecting: none");
        }
        for report in self.lifecycle.recent(limit)? {
            println!("{}", status_line(&report));
        }
        Ok(())
    }

    fn show(&self, report: Option<uuid::Uuid>) -> AppResult<()> {
        let report = match report {
            Some(id) => self.lifecycle.get(id)?,
            None => match self
                .lifecycle
                .recent(50)?
                .into_iter()
                .find(|r| r.window_end.is_some())
            {
                Some(r) => r,
                None => {
                    println!("No frozen report yet");
                    return Ok(());
                }
            },
        };
        let rendered = self.renderer.render(&report);
        println!("Subject: {}\n", rendered.subject);
        print!("{}", rendered.body);
        Ok(())
    }

    /// Loop every job on its configured interval until Ctrl-C.
    async fn run(&self) -> AppResult<()> {
        let schedule = &self.config.schedule;
        let jobs: Vec<(Arc<dyn Job>, Duration)> = vec![
            (
                Arc::new(FreezeJob(Arc::clone(&self.lifecycle))),
                Duration::from_secs(schedule.freeze_interval_hours.saturating_mul(3600)),
            ),
            (
                Arc::new(DeliverJob(Arc::clone(&self.dispatcher))),
                Duration::from_secs(schedule.deliver_interval_minutes.saturating_mul(60)),
            ),
            (
                Arc::new(RetryJob(Arc::clone(&self.dispatcher))),
                Duration::from_secs(schedule.retry_interval_minutes.saturating_mul(60)),
            ),
            (
                Arc::new(PurgeJob::new(Arc::clone(&self.db), self.config.retention.clone())),
                Duration::from_secs(schedule.purge_interval_hours.saturating_mul(3600)),
            ),
        ];

        let mut scheduler = JobScheduler::new();
        for (job, interval) in jobs {
            let name = job.name().to_string();
            match scheduler.add(job, interval) {
                Ok(()) => {
                    tracing::info!(job = %name, interval_secs = interval.as_secs(), "Job scheduled")
                }
                Err(e) => tracing::warn!(error = %e, "Job disabled"),
            }
        }

        let shutdown = scheduler.shutdown_handle();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    tracing::info!("Shutdown requested");
                    shutdown.notify_one();
                }
                Err(e) => tracing::error!(error = %e, "Failed to listen for Ctrl-C"),
            }
        });

        scheduler.run().await;
        Ok(())
    }
}

fn print_outcome(outcome: &TrackOutcome) {
    match outcome {
        TrackOutcome::Recorded(event) => println!("Recorded event {}", event.id),
        TrackOutcome::Throttled => println!("Throttled: same event seen within the window"),
        TrackOutcome::Ignored => println!("Ignored by filter"),
        TrackOutcome::BelowMagnitude { score } => {
            println!("Edit too small to record (magnitude {})", score)
        }
    }
}

fn status_line(report: &Report) -> String {
    let end = report
        .window_end
        .map(|e| e.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "now".to_string());
    format!(
        "{}  {:<10} {:<6} {} to {}  {:>5} events",
        report.id,
        report.status.as_str(),
        report.kind.as_str(),
        report.window_start.format("%Y-%m-%d"),
        end,
        report.event_count
    )
}

/// Expand ~ to home directory in a path string.
fn resolve_data_dir(data_dir: &str) -> PathBuf {
    if data_dir.starts_with("~/") || data_dir.starts_with("~\\") {
        #[cfg(target_os = "windows")]
        let home = std::env::var("USERPROFILE").unwrap_or_else(|_| ".".to_string());
        #[cfg(not(target_os = "windows"))]
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join(&data_dir[2..])
    } else {
        PathBuf::from(data_dir)
    }
}

fn init_config(path: &Path, force: bool) -> AppResult<()> {
    if path.exists() && !force {
        println!("{} already exists (use --force to overwrite)", path.display());
        return Ok(());
    }
    RecapConfig::default().save(path)?;
    println!("Wrote default configuration to {}", path.display());
    Ok(())
}

#[tokio::main]
async fn main() -> AppResult<()> {
    let args = CliArgs::parse();

    // Config.
    let config_file = args.resolve_config_path();
    let mut config = RecapConfig::load_or_default(&config_file);
    if let Some(dir) = args.resolve_data_dir() {
        config.general.data_dir = dir;
    }

    // Tracing.
    let level = args.resolve_log_level(&config.general.log_level);
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&level)),
        )
        .init();

    tracing::info!("Starting Recap v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(path = %config_file.display(), "Configuration resolved");

    if let Command::Init { force } = args.command {
        return init_config(&config_file, force);
    }

    // Storage.
    let data_dir = resolve_data_dir(&config.general.data_dir);
    if let Err(e) = std::fs::create_dir_all(&data_dir) {
        tracing::error!(path = %data_dir.display(), error = %e, "Failed to create data directory");
        return Err(e.into());
    }

    let app = App::build(config, &data_dir)?;
    app.lifecycle.bootstrap()?;

    match args.command {
        Command::Init { .. } => Ok(()),
        Command::Track {
            event_type,
            payload,
            actor,
            origin,
        } => app.track(&event_type, &payload, actor, &origin),
        Command::Edit {
            event_type,
            payload,
            old_file,
            new_file,
            actor,
            origin,
        } => app.edit(&event_type, &payload, &old_file, &new_file, actor, &origin),
        Command::Freeze => app.freeze().await,
        Command::Deliver { report } => app.deliver(report).await,
        Command::Retry => app.retry().await,
        Command::Purge => app.purge(),
        Command::Status { limit } => app.status(limit),
        Command::Show { report } => app.show(report),
        Command::Run => app.run().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_data_dir_plain_path() {
        assert_eq!(resolve_data_dir("/var/lib/recap"), PathBuf::from("/var/lib/recap"));
    }

    #[test]
    fn test_resolve_data_dir_expands_home() {
        let resolved = resolve_data_dir("~/.recap/data");
        assert!(resolved.ends_with(".recap/data"));
        assert!(!resolved.starts_with("~"));
    }

    #[tokio::test]
    async fn test_app_track_freeze_show() {
        let dir = tempfile::tempdir().unwrap();
        let app = App::build(RecapConfig::default(), dir.path()).unwrap();
        app.lifecycle.bootstrap().unwrap();

        app.track(
            "post_published",
            r#"{"action":"published","object":{"type":"post","id":12,"title":"Launch"}}"#,
            Some("3".to_string()),
            "test",
        )
        .unwrap();
        assert!(app.track("post_published", "not json", None, "test").is_err());
        assert_eq!(app.lifecycle.pending_events().unwrap(), 1);

        app.freeze().await.unwrap();
        let frozen = app.lifecycle.latest_frozen().unwrap().unwrap();
        assert_eq!(frozen.event_count, 1);
        app.show(None).unwrap();
        app.status(5).unwrap();
    }

    #[test]
    fn test_init_config_does_not_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        init_config(&path, false).unwrap();
        std::fs::write(&path, "[general]\nlog_level = \"debug\"\n").unwrap();

        init_config(&path, false).unwrap();
        assert_eq!(RecapConfig::load(&path).unwrap().general.log_level, "debug");

        init_config(&path, true).unwrap();
        assert_eq!(RecapConfig::load(&path).unwrap().general.log_level, "info");
    }
}
