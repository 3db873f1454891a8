//! Aggregate statistics over stored predictions.

use crate::store::StoredRecord;
use chrono::{DateTime, Duration, Utc};
use itertools::Itertools;
use serde::Serialize;

/// Length of the default reporting window.
pub const RECENT_WINDOW_DAYS: i64 = 30;

/// Count and mean predictions over a set of records. Averages are `0` when the set is empty.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct PredictionSummary {
    pub count: usize,
    pub avg_production: f64,
    pub avg_yield: f64,
    pub avg_price: f64,
}

/// Start of the default reporting window ending at `now`.
pub fn recent_window_start(now: DateTime<Utc>) -> DateTime<Utc> {
    now - Duration::days(RECENT_WINDOW_DAYS)
}

/// Summarizes the records created at or after `since`.
pub fn summarize(records: &[StoredRecord], since: DateTime<Utc>) -> PredictionSummary {
    let window: Vec<&StoredRecord> = records.iter().filter(|r| r.created_at >= since).collect();
    if window.is_empty() {
        return PredictionSummary::default();
    }

    let n = window.len() as f64;
    let mean = |pick: fn(&StoredRecord) -> f64| window.iter().map(|r| pick(r)).sum::<f64>() / n;
    PredictionSummary {
        count: window.len(),
        avg_production: mean(|r| r.estimate.predicted_production),
        avg_yield: mean(|r| r.estimate.predicted_yield),
        avg_price: mean(|r| r.estimate.predicted_price),
    }
}

/// The `n` most frequently recorded crops with their counts.
///
/// Ties are broken alphabetically so the result is deterministic.
pub fn top_crops(records: &[StoredRecord], n: usize) -> Vec<(String, usize)> {
    records
        .iter()
        .map(|r| r.observation.crop.as_str())
        .counts()
        .into_iter()
        .sorted_by(|(crop_a, count_a), (crop_b, count_b)| {
            count_b.cmp(count_a).then_with(|| crop_a.cmp(crop_b))
        })
        .take(n)
        .map(|(crop, count)| (crop.to_string(), count))
        .collect()
}

/// The `n` newest records by creation time. Ids break ties, higher first.
pub fn most_recent(records: &[StoredRecord], n: usize) -> Vec<StoredRecord> {
    records
        .iter()
        .sorted_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)))
        .take(n)
        .cloned()
        .collect()
}
