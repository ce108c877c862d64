//! Desired window and the timing rules derived from its span size.
//!
//! The caller asks for `[period_start, period_end]` at a given `span_size`.
//! Two margins come from the span:
//! - **lookback**: `max(span × lookback_spans, min_lookback)` is prepended to
//!   `period_start` so the first span has a reading to difference against.
//! - **fetch period**: `max(span / fetch_period_divisor, min_fetch_period)` is
//!   the minimum refresh cadence.

use std::num::NonZeroU32;

use chrono::{DateTime, Duration, Utc};
use nonzero_ext::nonzero;
use serde::{Deserialize, Serialize};

/// Most spans a sampled window may cover.
pub const MAX_SPANS: i64 = 100_000;

/// What the caller wants to see.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesiredWindow {
    /// First instant of the reporting period.
    pub period_start: DateTime<Utc>,
    /// Last instant of the reporting period.
    pub period_end: DateTime<Utc>,
    /// Reporting interval. Zero selects change-driven (unsampled) series.
    #[serde(with = "shared_utils::duration::compact")]
    pub span_size: Duration,
}

impl DesiredWindow {
    /// Build a window; no validation, an inverted period simply yields no gaps and no spans.
    pub fn new(period_start: DateTime<Utc>, period_end: DateTime<Utc>, span_size: Duration) -> Self {
        Self {
            period_start,
            period_end,
            span_size,
        }
    }

    /// Fixed-span sampling is used when the span is positive.
    pub fn is_sampled(&self) -> bool {
        self.span_size > Duration::zero()
    }

    /// Whether the period is non-empty.
    pub fn is_valid(&self) -> bool {
        self.period_start <= self.period_end
    }

    /// Number of spans the period is cut into; 0 when unsampled or inverted.
    pub fn span_count(&self) -> i64 {
        let span_ms = self.span_size.num_milliseconds();
        let period_ms = (self.period_end - self.period_start).num_milliseconds();
        if span_ms <= 0 || period_ms <= 0 {
            return 0;
        }
        period_ms / span_ms + i64::from(period_ms % span_ms != 0)
    }

    /// Whether the span is too fine for the period.
    pub fn exceeds_span_limit(&self) -> bool {
        self.span_count() > MAX_SPANS
    }
}

/// A closed `[start, end]` interval of instants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    /// Inclusive start.
    pub start: DateTime<Utc>,
    /// Inclusive end.
    pub end: DateTime<Utc>,
}

impl TimeRange {
    /// Construct a range.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// Inclusive containment.
    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        self.start <= t && t <= self.end
    }
}

/// Tunables for lookback and refresh cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    /// Lower bound for the fetch period.
    pub min_fetch_period: Duration,
    /// `fetch_period = span / fetch_period_divisor` before clamping.
    pub fetch_period_divisor: NonZeroU32,
    /// Lower bound for the lookback margin.
    pub min_lookback: Duration,
    /// `lookback = span × lookback_spans` before clamping.
    pub lookback_spans: u32,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            min_fetch_period: Duration::minutes(10),
            fetch_period_divisor: nonzero!(4u32),
            min_lookback: Duration::minutes(20),
            lookback_spans: 2,
        }
    }
}

impl Timing {
    /// `max(span × lookback_spans, min_lookback)`.
    pub fn lookback(&self, span: Duration) -> Duration {
        (span * self.lookback_spans as i32).max(self.min_lookback)
    }

    /// `max(span / fetch_period_divisor, min_fetch_period)`.
    pub fn fetch_period(&self, span: Duration) -> Duration {
        (span / self.fetch_period_divisor.get() as i32).max(self.min_fetch_period)
    }

    /// The range actually requested from the server: the period with the
    /// lookback margin prepended.
    pub fn query_range(&self, window: &DesiredWindow) -> TimeRange {
        TimeRange::new(
            window.period_start - self.lookback(window.span_size),
            window.period_end,
        )
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn span_count_rounds_up_and_flags_tiny_spans() {
        let t0 = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        let w = DesiredWindow::new(t0, t0 + Duration::minutes(150), Duration::hours(1));
        assert_eq!(w.span_count(), 3);
        assert!(!w.exceeds_span_limit());

        let unsampled = DesiredWindow::new(t0, t0 + Duration::hours(1), Duration::zero());
        assert_eq!(unsampled.span_count(), 0);

        let tiny = DesiredWindow::new(t0, t0 + Duration::days(30), Duration::milliseconds(1));
        assert!(tiny.exceeds_span_limit());
    }

    #[test]
    fn lookback_is_clamped_below() {
        let t = Timing::default();
        assert_eq!(t.lookback(Duration::minutes(5)), Duration::minutes(20));
        assert_eq!(t.lookback(Duration::zero()), Duration::minutes(20));
        assert_eq!(t.lookback(Duration::hours(1)), Duration::hours(2));
    }

    #[test]
    fn fetch_period_is_clamped_below() {
        let t = Timing::default();
        assert_eq!(t.fetch_period(Duration::minutes(15)), Duration::minutes(10));
        assert_eq!(t.fetch_period(Duration::zero()), Duration::minutes(10));
        assert_eq!(t.fetch_period(Duration::hours(1)), Duration::minutes(15));
        assert_eq!(t.fetch_period(Duration::days(1)), Duration::hours(6));
    }

    #[test]
    fn query_range_prepends_lookback() {
        let t0 = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let w = DesiredWindow::new(t0, t0 + Duration::hours(2), Duration::hours(1));
        let q = Timing::default().query_range(&w);
        assert_eq!(q.start, t0 - Duration::hours(2));
        assert_eq!(q.end, t0 + Duration::hours(2));
        assert!(w.is_sampled());
        assert!(!DesiredWindow::new(t0, t0, Duration::zero()).is_sampled());
    }
}
