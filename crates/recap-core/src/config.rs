use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{RecapError, Result};
use crate::types::ReportKind;

/// Top-level configuration for Recap.
///
/// Loaded from `~/.recap/config.toml` by default. Each section corresponds
/// to one stage of the pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecapConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub tracking: TrackingConfig,
    #[serde(default)]
    pub report: ReportConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub narrative: NarrativeConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
}

impl RecapConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: RecapConfig = toml::from_str(&content)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| RecapError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Data directory holding the SQLite database and the outbox.
    pub data_dir: String,
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: "~/.recap/data".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Event ingestion settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    /// Minimum seconds between two recorded events of the same (type, object).
    pub throttle_window_secs: u64,
    /// Edits scoring below this magnitude are not recorded.
    pub min_edit_magnitude: u8,
    /// Characters of each edited text compared beyond the shared prefix
    /// and suffix when scoring an edit.
    pub max_edit_chars: usize,
    /// Event types rejected before throttling.
    pub ignored_types: Vec<String>,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            throttle_window_secs: 3600,
            min_edit_magnitude: 5,
            max_edit_chars: 2000,
            ignored_types: Vec::new(),
        }
    }
}

/// Report building settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    /// Kind stamped on every new collecting report.
    pub kind: ReportKind,
    /// Transmit reports that collected zero events.
    pub send_empty_reports: bool,
    /// Number of actors listed in the top-contributor section.
    pub top_contributors: usize,
    /// Maximum number of highlight lines.
    pub max_highlights: usize,
    /// Prefix for the outbound subject line.
    pub subject_prefix: String,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            kind: ReportKind::Weekly,
            send_empty_reports: false,
            top_contributors: 5,
            max_highlights: 5,
            subject_prefix: "[Recap]".to_string(),
        }
    }
}

/// Outbound delivery settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    /// Recipient addresses; each is attempted independently.
    pub recipients: Vec<String>,
    /// Transport: "log" or "outbox".
    pub transport: String,
    /// Directory for the outbox transport. Relative paths resolve against
    /// `general.data_dir`.
    pub outbox_dir: String,
    /// Retry cap for failed attempts.
    pub max_retries: u32,
    /// Attempts re-sent per retry sweep.
    pub retry_batch_size: usize,
    /// Sender address written into outbound headers.
    pub from_address: String,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            recipients: Vec::new(),
            transport: "log".to_string(),
            outbox_dir: "outbox".to_string(),
            max_retries: 3,
            retry_batch_size: 10,
            from_address: "recap@localhost".to_string(),
        }
    }
}

/// Narrative generation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NarrativeConfig {
    /// Mode: "off" or "template".
    pub mode: String,
    /// Environment variable that must hold a credential for the narrator to
    /// run. Empty disables the check.
    pub credential_env: String,
}

impl Default for NarrativeConfig {
    fn default() -> Self {
        Self {
            mode: "off".to_string(),
            credential_env: String::new(),
        }
    }
}

/// Retention settings for the purge sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// Days an assigned event is kept before deletion.
    pub event_retention_days: u32,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            event_retention_days: 90,
        }
    }
}

/// Intervals used by the in-process job loop (`recap run`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub freeze_interval_hours: u64,
    pub deliver_interval_minutes: u64,
    pub retry_interval_minutes: u64,
    pub purge_interval_hours: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            freeze_interval_hours: 168,
            deliver_interval_minutes: 60,
            retry_interval_minutes: 30,
            purge_interval_hours: 24,
        }
    }
}
