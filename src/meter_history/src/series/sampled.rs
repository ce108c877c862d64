use chrono::{DateTime, Duration, Utc};
use history_client::ReadingRecord;
use tracing::warn;

use crate::{
    series::{SpanPoint, last_at_or_before},
    window::{DesiredWindow, MAX_SPANS},
};

/// Fixed-span series over `[period_start, period_end]`.
///
/// Spans are `span_size` long starting at `period_start`; the last one may
/// extend past `period_end`. Each span is bounded by the last reading at or
/// before its start and the last reading at or before its end, and the end
/// reading carries over as the next span's start. `x` is the span's end.
///
/// A window cut into more than [`MAX_SPANS`] spans yields nothing.
pub fn sampled_series(records: &[ReadingRecord], window: &DesiredWindow) -> Vec<SpanPoint> {
    if !window.is_sampled() || !window.is_valid() {
        return Vec::new();
    }
    if window.exceeds_span_limit() {
        warn!(spans = window.span_count(), limit = MAX_SPANS, "span too fine for period");
        return Vec::new();
    }

    let mut out = Vec::new();
    let mut before_start = last_at_or_before(records, 0, window.period_start);
    let mut cursor = before_start.unwrap_or(0);
    let mut span_start = window.period_start;

    while span_start < window.period_end {
        let span_end = span_start + window.span_size;
        let before_end = last_at_or_before(records, cursor, span_end);
        if let Some(i) = before_end {
            cursor = i;
        }

        out.push(span_point(
            span_end,
            before_start.map(|i| &records[i]),
            before_end.map(|i| &records[i]),
        ));

        before_start = before_end;
        span_start = span_end;
    }
    out
}

fn span_point(
    x: DateTime<Utc>,
    start: Option<&ReadingRecord>,
    end: Option<&ReadingRecord>,
) -> SpanPoint {
    let (Some(start), Some(end)) = (start, end) else {
        return SpanPoint {
            x,
            y: 0.0,
            incomplete: true,
            span_duration_actual: Duration::zero(),
        };
    };

    let y = end.usage - start.usage;
    let actual = end.record_time - start.record_time;
    SpanPoint {
        x,
        y,
        incomplete: y < 0.0 || actual <= Duration::zero(),
        span_duration_actual: actual,
    }
}
