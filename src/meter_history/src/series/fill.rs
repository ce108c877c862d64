use chrono::Duration;

use crate::series::{OutputPoint, SpanPoint};

/// Hourly rate of one raw point, or `None` if it can't be trusted.
pub fn hourly_rate(point: &SpanPoint) -> Option<f64> {
    if point.incomplete {
        return None;
    }
    let actual_ms = point.span_duration_actual.num_milliseconds();
    if actual_ms <= 0 {
        return None;
    }
    Some(point.y / actual_ms as f64 * Duration::hours(1).num_milliseconds() as f64)
}

/// Normalize to units/hour and bridge interior null runs.
///
/// A run of nulls with a known value on both sides is filled by linear
/// interpolation over the point index and marked `predicted`. Runs at either
/// end stay null.
pub fn normalize_and_fill(points: &[SpanPoint]) -> Vec<OutputPoint> {
    let mut out: Vec<OutputPoint> = points
        .iter()
        .map(|p| OutputPoint {
            x: p.x.timestamp_millis(),
            y: hourly_rate(p),
            predicted: false,
        })
        .collect();

    let mut last_known: Option<(usize, f64)> = None;
    for i in 0..out.len() {
        let Some(y) = out[i].y else { continue };
        if let Some((k, ky)) = last_known {
            let span = (i - k) as f64;
            let step = (y - ky) / span;
            for (offset, p) in out[k + 1..i].iter_mut().enumerate() {
                p.y = Some(ky + step * (offset + 1) as f64);
                p.predicted = true;
            }
        }
        last_known = Some((i, y));
    }
    out
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, TimeZone, Utc};

    use super::*;

    fn x(i: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap() + Duration::hours(i)
    }

    fn known(i: i64, y: f64) -> SpanPoint {
        SpanPoint {
            x: x(i),
            y,
            incomplete: false,
            span_duration_actual: Duration::hours(1),
        }
    }

    fn hole(i: i64) -> SpanPoint {
        SpanPoint {
            x: x(i),
            y: 0.0,
            incomplete: true,
            span_duration_actual: Duration::zero(),
        }
    }

    fn ys(out: &[OutputPoint]) -> Vec<Option<f64>> {
        out.iter().map(|p| p.y).collect()
    }

    #[test]
    fn delta_over_an_hour_is_the_rate() {
        let out = normalize_and_fill(&[known(1, 5.0)]);
        assert_eq!(out[0].y, Some(5.0));
        assert_eq!(out[0].x, x(1).timestamp_millis());
    }

    #[test]
    fn short_span_is_scaled_up() {
        let p = SpanPoint {
            span_duration_actual: Duration::minutes(30),
            ..known(0, 3.0)
        };
        assert_eq!(hourly_rate(&p), Some(6.0));
    }

    #[test]
    fn interior_nulls_are_interpolated() {
        let out = normalize_and_fill(&[known(0, 10.0), hole(1), hole(2), known(3, 40.0)]);
        assert_eq!(ys(&out), vec![Some(10.0), Some(20.0), Some(30.0), Some(40.0)]);
        let predicted: Vec<bool> = out.iter().map(|p| p.predicted).collect();
        assert_eq!(predicted, vec![false, true, true, false]);
    }

    #[test]
    fn edge_nulls_stay_null() {
        let out = normalize_and_fill(&[hole(0), known(1, 10.0), known(2, 20.0), hole(3)]);
        assert_eq!(ys(&out), vec![None, Some(10.0), Some(20.0), None]);
        assert!(out.iter().all(|p| !p.predicted));
    }

    #[test]
    fn zero_elapsed_is_null_even_if_marked_complete() {
        let p = SpanPoint {
            span_duration_actual: Duration::zero(),
            ..known(0, 1.0)
        };
        assert_eq!(hourly_rate(&p), None);
    }

    #[test]
    fn empty_in_empty_out() {
        assert!(normalize_and_fill(&[]).is_empty());
    }
}
