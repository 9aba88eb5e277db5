//! CLI argument definitions for the Recap application.
//!
//! Uses `clap` with derive macros for ergonomic argument parsing.
//! Priority resolution: CLI args > env vars > config file > defaults.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use uuid::Uuid;

/// Recap - collects site activity events and sends periodic digest reports.
#[derive(Parser, Debug)]
#[command(name = "recap", version, about)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// Data directory for the SQLite database and outbox.
    #[arg(short = 'd', long = "data-dir", global = true)]
    pub data_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level", global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Command {
    /// Write a default configuration file.
    Init {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
    /// Record one activity event from a JSON payload.
    Track {
        /// Event type, e.g. `post_updated`.
        event_type: String,
        /// Payload JSON with at least `action` and `object.type`.
        payload: String,
        /// Acting user id.
        #[arg(long)]
        actor: Option<String>,
        #[arg(long, default_value = "cli")]
        origin: String,
    },
    /// Record a content edit, scored by how much the text changed.
    Edit {
        event_type: String,
        payload: String,
        /// File holding the previous text.
        #[arg(long = "old")]
        old_file: PathBuf,
        /// File holding the new text.
        #[arg(long = "new")]
        new_file: PathBuf,
        #[arg(long)]
        actor: Option<String>,
        #[arg(long, default_value = "cli")]
        origin: String,
    },
    /// Close the collecting window and open the next one.
    Freeze,
    /// Send a frozen report (the latest one by default).
    Deliver {
        #[arg(long)]
        report: Option<Uuid>,
    },
    /// Re-send failed delivery attempts.
    Retry,
    /// Delete assigned events past the retention period.
    Purge,
    /// Show the open window and recent reports.
    Status {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Print a rendered report (the latest frozen or delivered by default).
    Show {
        report: Option<Uuid>,
    },
    /// Run freeze, deliver, retry and purge on the configured intervals.
    Run,
}

impl CliArgs {
    /// Resolve the configuration file path.
    ///
    /// Priority: --config flag > RECAP_CONFIG env var > platform default (~/.recap/config.toml).
    pub fn resolve_config_path(&self) -> PathBuf {
        if let Some(ref p) = self.config {
            return p.clone();
        }
        if let Ok(p) = std::env::var("RECAP_CONFIG") {
            return PathBuf::from(p);
        }
        default_config_path()
    }

    /// Resolve the data directory path.
    ///
    /// Priority: --data-dir flag > config file value.
    /// Returns `None` if not overridden.
    pub fn resolve_data_dir(&self) -> Option<String> {
        self.data_dir
            .as_ref()
            .map(|p| p.to_string_lossy().to_string())
    }

    /// Resolve the log level.
    ///
    /// Priority: --log-level flag > config file value.
    pub fn resolve_log_level(&self, config_level: &str) -> String {
        self.log_level
            .clone()
            .unwrap_or_else(|| config_level.to_string())
    }
}

/// Default config file path for the current platform.
fn default_config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    if let Ok(home) = std::env::var("USERPROFILE") {
        return PathBuf::from(home).join(".recap").join("config.toml");
    }
    #[cfg(not(target_os = "windows"))]
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".recap").join("config.toml");
    }
    PathBuf::from("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_track() {
        let args = CliArgs::try_parse_from([
            "recap",
            "track",
            "post_updated",
            r#"{"action":"updated","object":{"type":"post","id":1}}"#,
            "--actor",
            "7",
        ])
        .unwrap();
        let Command::Track {
            event_type,
            actor,
            origin,
            ..
        } = args.command
        else {
            panic!("expected track");
        };
        assert_eq!(event_type, "post_updated");
        assert_eq!(actor.as_deref(), Some("7"));
        assert_eq!(origin, "cli");
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let args =
            CliArgs::try_parse_from(["recap", "freeze", "--config", "/tmp/recap.toml"]).unwrap();
        assert_eq!(args.command, Command::Freeze);
        assert_eq!(args.resolve_config_path(), PathBuf::from("/tmp/recap.toml"));
        assert_eq!(args.resolve_log_level("warn"), "warn");
    }

    #[test]
    fn test_deliver_rejects_bad_uuid() {
        assert!(CliArgs::try_parse_from(["recap", "deliver", "--report", "nope"]).is_err());
    }

    #[test]
    fn test_subcommand_required() {
        assert!(CliArgs::try_parse_from(["recap"]).is_err());
    }
}
