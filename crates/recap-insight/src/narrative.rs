//! Optional free-text narrative for a report.
//!
//! A narrator may fail or be unconfigured; callers treat any error as "no
//! narrative" and carry on with the freeze.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tracing::{debug, warn};

use recap_core::config::NarrativeConfig;
use recap_core::registry::EventTypeRegistry;
use recap_core::types::{Event, TrendDirection, TrendRecord, TypeTotals};

use crate::error::InsightError;

/// Text shown when a summary carries no narrative.
pub const NO_NARRATIVE: &str = "No narrative available.";

/// Produces a short prose summary of a window.
#[async_trait]
pub trait Narrator: Send + Sync {
    fn name(&self) -> &str;

    async fn narrate(
        &self,
        events: &[Event],
        totals: &TypeTotals,
        trends: &BTreeMap<String, TrendRecord>,
    ) -> Result<Option<String>, InsightError>;
}

/// Never produces a narrative.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledNarrator;

#[async_trait]
impl Narrator for DisabledNarrator {
    fn name(&self) -> &str {
        "disabled"
    }

    async fn narrate(
        &self,
        _events: &[Event],
        _totals: &TypeTotals,
        _trends: &BTreeMap<String, TrendRecord>,
    ) -> Result<Option<String>, InsightError> {
        Ok(None)
    }
}

/// Local extractive narrative assembled from the window's statistics.
pub struct TemplateNarrator {
    registry: EventTypeRegistry,
    max_sentences: usize,
}

impl TemplateNarrator {
    pub fn new(registry: EventTypeRegistry, max_sentences: usize) -> Self {
        Self {
            registry,
            max_sentences,
        }
    }

    fn compose(
        &self,
        events: &[Event],
        totals: &TypeTotals,
        trends: &BTreeMap<String, TrendRecord>,
    ) -> Option<String> {
        if totals.is_empty() {
            return None;
        }

        let mut sentences: Vec<String> = Vec::new();

        let types = totals.len();
        sentences.push(format!(
            "{} {} recorded across {} {}.",
            totals.total(),
            if totals.total() == 1 { "event was" } else { "events were" },
            types,
            if types == 1 { "activity type" } else { "activity types" },
        ));

        if let Some(top) = totals.iter().next() {
            sentences.push(format!(
                "Most activity came from {} ({}).",
                self.registry.plural(&top.event_type),
                top.count
            ));
        }

        // Largest absolute movements first.
        let mut moves: Vec<(&String, &TrendRecord)> = trends
            .iter()
            .filter(|(_, t)| t.direction != TrendDirection::Same)
            .collect();
        moves.sort_by(|a, b| {
            b.1.change_percent
                .abs()
                .partial_cmp(&a.1.change_percent.abs())
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(b.0))
        });
        for (event_type, trend) in moves.into_iter().take(2) {
            let verb = match trend.direction {
                TrendDirection::Up => "rose",
                _ => "fell",
            };
            sentences.push(capitalize(&format!(
                "{} {} {}% compared with the previous period.",
                self.registry.plural(event_type),
                verb,
                trend.change_percent.abs()
            )));
        }

        let actors = events
            .iter()
            .filter_map(|e| e.actor_id.as_deref())
            .collect::<std::collections::HashSet<_>>()
            .len();
        if actors > 0 {
            sentences.push(format!(
                "{} {} contributed.",
                actors,
                if actors == 1 { "person" } else { "people" }
            ));
        }

        sentences.truncate(self.max_sentences.max(1));
        Some(sentences.join(" "))
    }
}

#[async_trait]
impl Narrator for TemplateNarrator {
    fn name(&self) -> &str {
        "template"
    }

    async fn narrate(
        &self,
        events: &[Event],
        totals: &TypeTotals,
        trends: &BTreeMap<String, TrendRecord>,
    ) -> Result<Option<String>, InsightError> {
        Ok(self.compose(events, totals, trends))
    }
}

/// Runs the inner narrator only when a credential variable is set.
pub struct CredentialGated<N> {
    inner: N,
    env_var: String,
}

impl<N: Narrator> CredentialGated<N> {
    pub fn new(inner: N, env_var: impl Into<String>) -> Self {
        Self {
            inner,
            env_var: env_var.into(),
        }
    }
}

#[async_trait]
impl<N: Narrator> Narrator for CredentialGated<N> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn narrate(
        &self,
        events: &[Event],
        totals: &TypeTotals,
        trends: &BTreeMap<String, TrendRecord>,
    ) -> Result<Option<String>, InsightError> {
        match std::env::var(&self.env_var) {
            Ok(value) if !value.trim().is_empty() => {
                self.inner.narrate(events, totals, trends).await
            }
            _ => Err(InsightError::MissingCredential(self.env_var.clone())),
        }
    }
}

/// Build the narrator selected by configuration.
pub fn narrator_from_config(
    config: &NarrativeConfig,
    registry: &EventTypeRegistry,
) -> Box<dyn Narrator> {
    let narrator: Box<dyn Narrator> = match config.mode.as_str() {
        "off" | "" => return Box::new(DisabledNarrator),
        "template" => {
            let template = TemplateNarrator::new(registry.clone(), 4);
            if config.credential_env.is_empty() {
                Box::new(template)
            } else {
                Box::new(CredentialGated::new(template, config.credential_env.clone()))
            }
        }
        other => {
            warn!(mode = other, "Unknown narrative mode, narrative disabled");
            return Box::new(DisabledNarrator);
        }
    };
    debug!(narrator = narrator.name(), "Narrator configured");
    narrator
}

fn capitalize(s: &str) -> String {
    let mut c = s.chars();
    match c.next() {
        None => String::new(),
        Some(f) => f.to_uppercase().collect::<String>() + c.as_str(),
    }
}
