//! Report summary assembly.
//!
//! Combines aggregation, trends, highlights, top contributors, registered
//! transforms and the optional narrative into the summary frozen with a
//! report.

use std::collections::{BTreeMap, HashMap};

use tracing::{debug, warn};

use recap_core::registry::EventTypeRegistry;
use recap_core::types::{Event, ReportSummary, TrendDirection, TrendRecord, TypeTotals};

use crate::aggregate::{aggregate, top_contributors};
use crate::magnitude::{EditMagnitude, BUCKET_KEY};
use crate::narrative::{DisabledNarrator, Narrator};
use crate::transform::{apply_transforms, SummaryTransform};
use crate::trend::compare;

/// Builds report summaries from a window's events.
pub struct SummaryBuilder {
    registry: EventTypeRegistry,
    max_highlights: usize,
    top_contributors: usize,
    transforms: Vec<Box<dyn SummaryTransform>>,
    narrator: Box<dyn Narrator>,
}

impl SummaryBuilder {
    pub fn new(registry: EventTypeRegistry, max_highlights: usize, top_contributors: usize) -> Self {
        Self {
            registry,
            max_highlights,
            top_contributors,
            transforms: Vec::new(),
            narrator: Box::new(DisabledNarrator),
        }
    }

    pub fn with_narrator(mut self, narrator: Box<dyn Narrator>) -> Self {
        self.narrator = narrator;
        self
    }

    /// Append a transform; transforms run in the order they were added.
    pub fn with_transform(mut self, transform: Box<dyn SummaryTransform>) -> Self {
        self.transforms.push(transform);
        self
    }

    pub fn registry(&self) -> &EventTypeRegistry {
        &self.registry
    }

    /// Summarize `events` against the previous window's totals.
    ///
    /// Narrator failures are logged and leave the narrative empty.
    pub async fn build(&self, events: &[Event], previous: Option<&TypeTotals>) -> ReportSummary {
        let totals = aggregate(events);
        let trends = compare(&totals, previous);
        let highlights = self.highlights(events, &totals, &trends);
        let contributors = top_contributors(events, self.top_contributors);

        let narrative = match self.narrator.narrate(events, &totals, &trends).await {
            Ok(text) => text.filter(|t| !t.trim().is_empty()),
            Err(e) => {
                warn!(narrator = self.narrator.name(), error = %e, "Narrative unavailable");
                None
            }
        };

        let summary = ReportSummary {
            totals,
            trends,
            highlights,
            top_contributors: contributors,
            narrative,
        };
        let summary = apply_transforms(&self.transforms, summary, events);

        debug!(
            events = events.len(),
            types = summary.totals.len(),
            highlights = summary.highlights.len(),
            "Summary built"
        );
        summary
    }

    /// Human-readable highlight lines, most notable first.
    pub fn highlights(
        &self,
        events: &[Event],
        totals: &TypeTotals,
        trends: &BTreeMap<String, TrendRecord>,
    ) -> Vec<String> {
        let mut lines = Vec::new();

        if let Some(top) = totals.iter().next() {
            lines.push(format!(
                "Most active: {} ({})",
                self.registry.plural(&top.event_type),
                top.count
            ));
        }

        if let Some((event_type, trend)) = extreme_trend(trends, TrendDirection::Up) {
            lines.push(format!(
                "Biggest increase: {} up {}% ({} -> {})",
                self.registry.plural(event_type),
                trend.change_percent,
                trend.previous,
                trend.current
            ));
        }
        if let Some((event_type, trend)) = extreme_trend(trends, TrendDirection::Down) {
            lines.push(format!(
                "Biggest decrease: {} down {}% ({} -> {})",
                self.registry.plural(event_type),
                trend.change_percent.abs(),
                trend.previous,
                trend.current
            ));
        }

        let major_edits = events
            .iter()
            .filter(|e| {
                e.payload.metadata.get(BUCKET_KEY).and_then(|v| v.as_str())
                    == Some(EditMagnitude::Major.as_str())
            })
            .count();
        if major_edits > 0 {
            lines.push(format!(
                "{} major {}",
                major_edits,
                if major_edits == 1 { "edit" } else { "edits" }
            ));
        }

        if let Some((name, count)) = busiest_object(events) {
            lines.push(format!("Most changed: {} ({} events)", name, count));
        }

        lines.truncate(self.max_highlights);
        lines
    }
}

/// The trend with the largest movement in one direction (ties by type).
fn extreme_trend(
    trends: &BTreeMap<String, TrendRecord>,
    direction: TrendDirection,
) -> Option<(&String, &TrendRecord)> {
    trends
        .iter()
        .filter(|(_, t)| t.direction == direction)
        .max_by(|a, b| {
            a.1.change_percent
                .abs()
                .partial_cmp(&b.1.change_percent.abs())
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.0.cmp(a.0))
        })
}

/// The object touched by the most events, if any was touched more than once.
fn busiest_object(events: &[Event]) -> Option<(String, usize)> {
    let mut freq: HashMap<(&str, &str), (usize, &Event)> = HashMap::new();
    for e in events.iter().filter(|e| !e.object_id.is_empty()) {
        let entry = freq
            .entry((e.payload.object.object_type(), e.object_id.as_str()))
            .or_insert((0, e));
        entry.0 += 1;
    }

    let mut sorted: Vec<_> = freq.into_iter().collect();
    sorted.sort_by(|a, b| b.1 .0.cmp(&a.1 .0).then_with(|| a.0.cmp(&b.0)));
    sorted
        .into_iter()
        .next()
        .filter(|(_, (count, _))| *count > 1)
        .map(|(_, (count, event))| (event.payload.object.display_name(), count))
}
