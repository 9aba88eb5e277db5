//! Grouping of a window's events.

use std::collections::HashMap;

use recap_core::types::{Contributor, Event, TypeTotals};

/// Count events per type, in descending count order.
pub fn aggregate(events: &[Event]) -> TypeTotals {
    let counts = events
        .iter()
        .fold(HashMap::<&str, u64>::new(), |mut acc, e| {
            *acc.entry(e.event_type.as_str()).or_insert(0) += 1;
            acc
        });
    TypeTotals::from_counts(counts.into_iter().map(|(t, c)| (t.to_string(), c)))
}

/// Actors ranked by event count (ties by actor id). Anonymous events are
/// not attributed to anyone.
pub fn top_contributors(events: &[Event], limit: usize) -> Vec<Contributor> {
    let mut freq: HashMap<&str, u64> = HashMap::new();
    for e in events {
        if let Some(actor) = e.actor_id.as_deref().filter(|a| !a.is_empty()) {
            *freq.entry(actor).or_insert(0) += 1;
        }
    }

    let mut sorted: Vec<_> = freq.into_iter().collect();
    sorted.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    sorted
        .into_iter()
        .take(limit)
        .map(|(actor, count)| Contributor {
            actor_id: actor.to_string(),
            event_count: count,
        })
        .collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::Utc;
    use recap_core::types::{EventPayload, ObjectRef};
    use uuid::Uuid;

    pub(crate) fn make_event(event_type: &str, object_id: &str, actor: Option<&str>) -> Event {
        Event {
            id: Uuid::new_v4(),
            event_type: event_type.to_string(),
            subtype: None,
            object_id: object_id.to_string(),
            actor_id: actor.map(|a| a.to_string()),
            payload: EventPayload::new(
                "updated",
                ObjectRef::Post {
                    id: object_id.to_string(),
                    title: Some(format!("Post {}", object_id)),
                    post_type: None,
                    extra: Default::default(),
                },
            ),
            timestamp: Utc::now(),
            report_id: None,
            origin: "hook".to_string(),
        }
    }

    #[test]
    fn test_aggregate_counts_and_orders() {
        let events = vec![
            make_event("comment_posted", "1", None),
            make_event("post_updated", "2", None),
            make_event("post_updated", "3", None),
            make_event("user_login", "4", None),
        ];
        let totals = aggregate(&events);
        let order: Vec<(&str, u64)> = totals
            .iter()
            .map(|c| (c.event_type.as_str(), c.count))
            .collect();
        assert_eq!(
            order,
            vec![("post_updated", 2), ("comment_posted", 1), ("user_login", 1)]
        );
        assert_eq!(totals.total(), 4);
    }

    #[test]
    fn test_aggregate_empty() {
        assert!(aggregate(&[]).is_empty());
    }

    #[test]
    fn test_top_contributors() {
        let events = vec![
            make_event("post_updated", "1", Some("7")),
            make_event("post_updated", "2", Some("3")),
            make_event("post_updated", "3", Some("7")),
            make_event("post_updated", "4", Some("9")),
            make_event("post_updated", "5", None),
        ];
        let top = top_contributors(&events, 2);
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].actor_id, "7");
        assert_eq!(top[0].event_count, 2);
        assert_eq!(top[1].actor_id, "3");
        assert!(top_contributors(&events, 0).is_empty());
    }
}
