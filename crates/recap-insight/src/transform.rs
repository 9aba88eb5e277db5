//! Ordered extension points for ingestion and summaries.

use std::collections::HashSet;

use recap_core::types::{Event, NewEvent, ReportSummary};

/// Inspects or rewrites an event before it is throttled and stored.
/// Returning `None` drops the event.
pub trait IngestFilter: Send + Sync {
    fn name(&self) -> &str;
    fn filter(&self, event: NewEvent) -> Option<NewEvent>;
}

/// Adjusts a computed summary at freeze time.
pub trait SummaryTransform: Send + Sync {
    fn name(&self) -> &str;
    fn apply(&self, summary: ReportSummary, events: &[Event]) -> ReportSummary;
}

/// Run filters in registration order, stopping at the first drop.
pub fn apply_filters(filters: &[Box<dyn IngestFilter>], event: NewEvent) -> Option<NewEvent> {
    filters
        .iter()
        .try_fold(event, |event, filter| filter.filter(event))
}

/// Run transforms in registration order.
pub fn apply_transforms(
    transforms: &[Box<dyn SummaryTransform>],
    summary: ReportSummary,
    events: &[Event],
) -> ReportSummary {
    transforms
        .iter()
        .fold(summary, |summary, t| t.apply(summary, events))
}

/// Drops events whose type is configured as ignored.
#[derive(Debug, Clone, Default)]
pub struct IgnoredTypes {
    types: HashSet<String>,
}

impl IgnoredTypes {
    pub fn new<I, S>(types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            types: types.into_iter().map(Into::into).collect(),
        }
    }

    pub fn contains(&self, event_type: &str) -> bool {
        self.types.contains(event_type)
    }
}

impl IngestFilter for IgnoredTypes {
    fn name(&self) -> &str {
        "ignored_types"
    }

    fn filter(&self, event: NewEvent) -> Option<NewEvent> {
        if self.contains(&event.event_type) {
            None
        } else {
            Some(event)
        }
    }
}

/// Caps the number of highlight lines.
#[derive(Debug, Clone, Copy)]
pub struct HighlightLimit(pub usize);

impl SummaryTransform for HighlightLimit {
    fn name(&self) -> &str {
        "highlight_limit"
    }

    fn apply(&self, mut summary: ReportSummary, _events: &[Event]) -> ReportSummary {
        summary.highlights.truncate(self.0);
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use recap_core::types::{EventPayload, ObjectRef};

    fn new_event(event_type: &str) -> NewEvent {
        let payload = EventPayload::new(
            "x",
            ObjectRef::Setting {
                id: "blogname".into(),
                extra: Default::default(),
            },
        );
        NewEvent::from_payload(event_type, payload, None, "api")
    }

    struct Tagger;

    impl IngestFilter for Tagger {
        fn name(&self) -> &str {
            "tagger"
        }

        fn filter(&self, event: NewEvent) -> Option<NewEvent> {
            Some(event.with_subtype("tagged"))
        }
    }

    struct AppendHighlight(&'static str);

    impl SummaryTransform for AppendHighlight {
        fn name(&self) -> &str {
            "append"
        }

        fn apply(&self, mut summary: ReportSummary, _events: &[Event]) -> ReportSummary {
            summary.highlights.push(self.0.to_string());
            summary
        }
    }

    #[test]
    fn test_filters_run_in_order_and_short_circuit() {
        let filters: Vec<Box<dyn IngestFilter>> = vec![
            Box::new(Tagger),
            Box::new(IgnoredTypes::new(["user_login"])),
        ];
        let kept = apply_filters(&filters, new_event("setting_changed")).unwrap();
        assert_eq!(kept.subtype.as_deref(), Some("tagged"));
        assert!(apply_filters(&filters, new_event("user_login")).is_none());
        assert!(apply_filters(&[], new_event("user_login")).is_some());
    }

    #[test]
    fn test_transforms_run_in_order() {
        let transforms: Vec<Box<dyn SummaryTransform>> = vec![
            Box::new(AppendHighlight("first")),
            Box::new(AppendHighlight("second")),
            Box::new(HighlightLimit(1)),
        ];
        let summary = apply_transforms(&transforms, ReportSummary::default(), &[]);
        assert_eq!(summary.highlights, vec!["first".to_string()]);
    }
}
