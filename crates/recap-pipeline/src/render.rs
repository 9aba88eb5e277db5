//! Plain-text rendering of a frozen report.

use std::fmt::Write as _;

use recap_core::registry::EventTypeRegistry;
use recap_core::types::{Report, ReportSummary, TrendRecord};
use recap_insight::NO_NARRATIVE;

/// Subject and body ready to hand to a sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedReport {
    pub subject: String,
    pub body: String,
}

/// Renders reports using the registry's type labels.
pub struct ReportRenderer {
    registry: EventTypeRegistry,
    subject_prefix: String,
}

impl ReportRenderer {
    pub fn new(registry: EventTypeRegistry, subject_prefix: impl Into<String>) -> Self {
        Self {
            registry,
            subject_prefix: subject_prefix.into(),
        }
    }

    pub fn render(&self, report: &Report) -> RenderedReport {
        RenderedReport {
            subject: self.subject(report),
            body: self.body(report),
        }
    }

    pub fn subject(&self, report: &Report) -> String {
        let kind = capitalize(report.kind.as_str());
        let start = report.window_start.format("%Y-%m-%d");
        let subject = match report.window_end {
            Some(end) => format!(
                "{} activity report: {} to {}",
                kind,
                start,
                end.format("%Y-%m-%d")
            ),
            None => format!("{} activity report: since {}", kind, start),
        };
        if self.subject_prefix.is_empty() {
            subject
        } else {
            format!("{} {}", self.subject_prefix, subject)
        }
    }

    pub fn body(&self, report: &Report) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{} activity report", capitalize(report.kind.as_str()));
        let _ = writeln!(
            out,
            "Window: {} to {}",
            report.window_start.format("%Y-%m-%d %H:%M UTC"),
            report
                .window_end
                .map(|e| e.format("%Y-%m-%d %H:%M UTC").to_string())
                .unwrap_or_else(|| "now".to_string())
        );
        let _ = writeln!(out, "Events: {}", report.event_count);

        let empty = ReportSummary::default();
        let summary = report.summary.as_ref().unwrap_or(&empty);

        out.push_str("\nActivity by type\n");
        if summary.totals.is_empty() {
            out.push_str("  No activity recorded.\n");
        } else {
            let rows: Vec<(String, u64, String)> = summary
                .totals
                .iter()
                .map(|c| {
                    (
                        self.registry.label(&c.event_type),
                        c.count,
                        summary
                            .trends
                            .get(&c.event_type)
                            .map(format_trend)
                            .unwrap_or_default(),
                    )
                })
                .collect();
            let width = rows.iter().map(|r| r.0.chars().count()).max().unwrap_or(0);
            for (label, count, trend) in rows {
                let line = format!("  {:<width$}  {:>5}  {}", label, count, trend, width = width);
                let _ = writeln!(out, "{}", line.trim_end());
            }
            // Types that disappeared since the previous window.
            for (event_type, trend) in &summary.trends {
                if summary.totals.get(event_type) == 0 && trend.previous > 0 {
                    let line = format!(
                        "  {:<width$}  {:>5}  {}",
                        self.registry.label(event_type),
                        0,
                        format_trend(trend),
                        width = width
                    );
                    let _ = writeln!(out, "{}", line.trim_end());
                }
            }
        }

        if !summary.highlights.is_empty() {
            out.push_str("\nHighlights\n");
            for line in &summary.highlights {
                let _ = writeln!(out, "  - {}", line);
            }
        }

        if !summary.top_contributors.is_empty() {
            out.push_str("\nTop contributors\n");
            for c in &summary.top_contributors {
                let _ = writeln!(
                    out,
                    "  - user {}: {} {}",
                    c.actor_id,
                    c.event_count,
                    if c.event_count == 1 { "event" } else { "events" }
                );
            }
        }

        out.push_str("\nNarrative\n");
        let _ = writeln!(
            out,
            "  {}",
            summary.narrative.as_deref().unwrap_or(NO_NARRATIVE)
        );
        out
    }
}

fn format_trend(trend: &TrendRecord) -> String {
    let sign = if trend.change_percent > 0.0 { "+" } else { "" };
    format!(
        "{} {}{}% (was {})",
        trend.direction.arrow(),
        sign,
        trend.change_percent,
        trend.previous
    )
}

fn capitalize(s: &str) -> String {
    let mut c = s.chars();
    match c.next() {
        None => String::new(),
        Some(f) => f.to_uppercase().collect::<String>() + c.as_str(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use recap_core::types::{Contributor, ReportKind, ReportStatus, TrendDirection, TypeTotals};
    use std::collections::BTreeMap;
    use uuid::Uuid;

    fn report(summary: Option<ReportSummary>, event_count: u64) -> Report {
        Report {
            id: Uuid::new_v4(),
            kind: ReportKind::Weekly,
            status: ReportStatus::Frozen,
            window_start: Utc.with_ymd_and_hms(2024, 3, 4, 0, 0, 0).unwrap(),
            window_end: Some(Utc.with_ymd_and_hms(2024, 3, 11, 0, 0, 0).unwrap()),
            event_count,
            summary,
            frozen_at: None,
            delivered_at: None,
        }
    }

    fn renderer() -> ReportRenderer {
        ReportRenderer::new(EventTypeRegistry::with_defaults(), "[Recap]")
    }

    #[test]
    fn test_subject() {
        let subject = renderer().subject(&report(None, 0));
        assert_eq!(
            subject,
            "[Recap] Weekly activity report: 2024-03-04 to 2024-03-11"
        );
        let bare = ReportRenderer::new(EventTypeRegistry::new(), "").subject(&report(None, 0));
        assert!(bare.starts_with("Weekly"));
    }

    #[test]
    fn test_body_with_summary() {
        let mut trends = BTreeMap::new();
        trends.insert(
            "post_updated".to_string(),
            TrendRecord {
                current: 3,
                previous: 2,
                change_percent: 50.0,
                direction: TrendDirection::Up,
            },
        );
        trends.insert(
            "user_login".to_string(),
            TrendRecord {
                current: 0,
                previous: 4,
                change_percent: -100.0,
                direction: TrendDirection::Down,
            },
        );
        let summary = ReportSummary {
            totals: TypeTotals::from_counts(vec![("post_updated".to_string(), 3)]),
            trends,
            highlights: vec!["Most active: post updates (3)".to_string()],
            top_contributors: vec![Contributor {
                actor_id: "7".to_string(),
                event_count: 3,
            }],
            narrative: Some("A quiet week.".to_string()),
        };
        let body = renderer().body(&report(Some(summary), 3));

        assert!(body.contains("Window: 2024-03-04 00:00 UTC to 2024-03-11 00:00 UTC"));
        assert!(body.contains("Events: 3"));
        assert!(body.contains("Post updated"));
        assert!(body.contains("↑ +50% (was 2)"));
        assert!(body.contains("User login"));
        assert!(body.contains("↓ -100% (was 4)"));
        assert!(body.contains("  - Most active: post updates (3)"));
        assert!(body.contains("  - user 7: 3 events"));
        assert!(body.contains("A quiet week."));
    }

    #[test]
    fn test_body_without_summary() {
        let body = renderer().body(&report(None, 0));
        assert!(body.contains("No activity recorded."));
        assert!(body.contains(NO_NARRATIVE));
        assert!(!body.contains("Highlights"));
    }
}
