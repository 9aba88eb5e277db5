//! Window-over-window trend comparison.

use std::collections::BTreeMap;

use recap_core::types::{TrendDirection, TrendRecord, TypeTotals};

/// Compare the current window's totals with the previous completed window.
///
/// Keys are the union of both windows' types. Without a previous window the
/// result is empty.
pub fn compare(
    current: &TypeTotals,
    previous: Option<&TypeTotals>,
) -> BTreeMap<String, TrendRecord> {
    let Some(previous) = previous else {
        return BTreeMap::new();
    };

    let mut keys: Vec<&str> = current.iter().map(|c| c.event_type.as_str()).collect();
    keys.extend(previous.iter().map(|c| c.event_type.as_str()));

    keys.into_iter()
        .map(|key| {
            let record = trend_record(current.get(key), previous.get(key));
            (key.to_string(), record)
        })
        .collect()
}

pub fn trend_record(current: u64, previous: u64) -> TrendRecord {
    let change_percent = change_percent(current, previous);
    let direction = if change_percent > 0.0 {
        TrendDirection::Up
    } else if change_percent < 0.0 {
        TrendDirection::Down
    } else {
        TrendDirection::Same
    };
    TrendRecord {
        current,
        previous,
        change_percent,
        direction,
    }
}

/// Percent change rounded to one decimal. Growth from zero counts as +100.
pub fn change_percent(current: u64, previous: u64) -> f64 {
    if previous == 0 {
        return if current > 0 { 100.0 } else { 0.0 };
    }
    let raw = (current as f64 - previous as f64) / previous as f64 * 100.0;
    (raw * 10.0).round() / 10.0
}
