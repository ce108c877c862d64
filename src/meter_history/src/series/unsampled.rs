use history_client::ReadingRecord;

use crate::{
    series::{SpanPoint, last_at_or_before},
    window::DesiredWindow,
};

/// Change-driven series: one point per reading whose counter moved.
///
/// The walk starts from the last reading at or before `period_start` (or
/// the first buffered reading if none precedes it), so the first change
/// inside the period has a left neighbour, and stops at the last reading at
/// or before `period_end`. Consecutive readings with equal usage emit nothing.
pub fn unsampled_series(records: &[ReadingRecord], window: &DesiredWindow) -> Vec<SpanPoint> {
    if !window.is_valid() {
        return Vec::new();
    }
    let anchor = last_at_or_before(records, 0, window.period_start).unwrap_or(0);
    let Some(last) = last_at_or_before(records, anchor, window.period_end) else {
        return Vec::new();
    };
    let Some(walk) = records.get(anchor..=last) else {
        return Vec::new();
    };

    walk.windows(2)
        .filter(|pair| pair[1].usage != pair[0].usage)
        .map(|pair| SpanPoint {
            x: pair[1].record_time,
            y: pair[1].usage - pair[0].usage,
            incomplete: false,
            span_duration_actual: pair[1].record_time - pair[0].record_time,
        })
        .collect()
}
