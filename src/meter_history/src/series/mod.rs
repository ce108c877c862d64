//! Series derivation: cumulative readings → per-span hourly rates.
//!
//! Two raw algorithms, picked by the span size:
//! - [`sampled`]: fixed spans over the period, each bounded by the last
//!   reading at or before its start and end;
//! - [`unsampled`] (span = 0): one point per change in the counter.
//!
//! Either raw series then goes through [`fill::normalize_and_fill`], which
//! turns deltas into units/hour, nulls out incomplete spans, and bridges
//! interior null runs with linear interpolation.

pub mod fill;
pub mod sampled;
pub mod unsampled;

use chrono::{DateTime, Duration, Utc};
use history_client::ReadingRecord;
use serde::{Deserialize, Serialize};

use crate::window::DesiredWindow;

/// One reporting interval before normalization.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpanPoint {
    /// End of the interval (sampled) or time of the changed reading (unsampled).
    pub x: DateTime<Utc>,
    /// Raw usage delta across the interval.
    pub y: f64,
    /// Missing bound, negative delta, or non-positive elapsed time.
    pub incomplete: bool,
    /// Time actually elapsed between the two bounding readings.
    pub span_duration_actual: Duration,
}

/// Final per-span rate, units per hour.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OutputPoint {
    /// Epoch milliseconds.
    pub x: i64,
    /// Rate, or `None` when the span is incomplete and could not be bridged.
    pub y: Option<f64>,
    /// Filled by interpolation.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub predicted: bool,
}

/// Pick the raw algorithm for the window's span size.
pub fn derive_raw(records: &[ReadingRecord], window: &DesiredWindow) -> Vec<SpanPoint> {
    if window.is_sampled() {
        sampled::sampled_series(records, window)
    } else {
        unsampled::unsampled_series(records, window)
    }
}

/// Raw series, normalized and gap-filled.
pub fn derive_series(records: &[ReadingRecord], window: &DesiredWindow) -> Vec<OutputPoint> {
    fill::normalize_and_fill(&derive_raw(records, window))
}

/// Index of the last record at or before `t`, searching from `from`.
///
/// Records are ascending, so callers walking forward in time can pass the
/// previous answer back in as `from` and keep the whole walk linear.
pub(crate) fn last_at_or_before(
    records: &[ReadingRecord],
    from: usize,
    t: DateTime<Utc>,
) -> Option<usize> {
    let mut i = from;
    while i < records.len() && records[i].record_time <= t {
        i += 1;
    }
    i.checked_sub(1)
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn last_at_or_before_is_inclusive() {
        let t0 = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let recs: Vec<_> = (0..3)
            .map(|i| ReadingRecord::usage_at(t0 + Duration::hours(i), 0.0))
            .collect();
        assert_eq!(last_at_or_before(&recs, 0, t0 - Duration::seconds(1)), None);
        assert_eq!(last_at_or_before(&recs, 0, t0), Some(0));
        assert_eq!(last_at_or_before(&recs, 0, t0 + Duration::minutes(90)), Some(1));
        assert_eq!(last_at_or_before(&recs, 1, t0 + Duration::hours(5)), Some(2));
    }

    #[test]
    fn output_point_serializes_compactly() {
        let p = OutputPoint {
            x: 1_000,
            y: Some(2.5),
            predicted: false,
        };
        assert_eq!(serde_json::to_string(&p).unwrap(), r#"{"x":1000,"y":2.5}"#);
        let q = OutputPoint {
            x: 2_000,
            y: None,
            predicted: true,
        };
        assert_eq!(
            serde_json::to_string(&q).unwrap(),
            r#"{"x":2000,"y":null,"predicted":true}"#
        );
    }
}
