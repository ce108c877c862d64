//! Canonical in-memory representation of a cumulative meter reading.
//!
//! Every [`HistoryProvider`](crate::providers::HistoryProvider) maps its wire
//! format onto this struct, regardless of how the upstream nests the fields.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A point-in-time cumulative counter reading.
///
/// `usage` and `produced` are running totals, not deltas. Consumers derive
/// per-interval consumption by differencing two readings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadingRecord {
    /// When the meter was read (UTC).
    pub record_time: DateTime<Utc>,

    /// Cumulative consumed units.
    pub usage: f64,

    /// Cumulative produced units (e.g. on-site generation). Zero when the
    /// meter does not report production.
    #[serde(default)]
    pub produced: f64,
}

impl ReadingRecord {
    pub fn new(record_time: DateTime<Utc>, usage: f64, produced: f64) -> Self {
        Self {
            record_time,
            usage,
            produced,
        }
    }

    /// Shorthand for a consumption-only meter.
    pub fn usage_at(record_time: DateTime<Utc>, usage: f64) -> Self {
        Self::new(record_time, usage, 0.0)
    }
}
