use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Duration;
use history_client::{
    HistoryPage, HistoryProvider, ListHistoryRequest, ProviderError, ReadingRecord,
    providers::memory::InMemoryHistory,
};
use meter_history::{
    buffer::RecordBuffer,
    gap::{Gap, MergeStrategy, compute_gaps},
    retriever::acquire,
    series::{derive_raw, derive_series},
    window::Timing,
};

mod common;

use common::{hourly_window, t0};

/// Answers every request with the same readings, including ones past the
/// requested end.
struct Canned {
    records: Vec<ReadingRecord>,
    requests: Mutex<Vec<ListHistoryRequest>>,
}

#[async_trait]
impl HistoryProvider for Canned {
    async fn list_history(&self, req: ListHistoryRequest) -> Result<HistoryPage, ProviderError> {
        self.requests.lock().unwrap().push(req);
        Ok(HistoryPage {
            records: self.records.clone(),
            next_page_token: None,
        })
    }
}

fn hour(h: i64, usage: f64) -> ReadingRecord {
    ReadingRecord::usage_at(t0() + Duration::hours(h), usage)
}

fn hourly_readings() -> Vec<ReadingRecord> {
    vec![
        hour(-2, 0.0),
        hour(-1, 10.0),
        hour(0, 20.0),
        hour(1, 35.0),
        hour(2, 50.0),
    ]
}

#[tokio::test]
async fn empty_buffer_to_hourly_rates() {
    let window = hourly_window(0, 2);
    let timing = Timing::default();
    let query = timing.query_range(&window);
    let mut buffer = RecordBuffer::new();

    let plan = compute_gaps(query, &buffer);
    assert_eq!(
        plan.gaps,
        vec![Gap {
            start: t0() - Duration::hours(2),
            end: t0() + Duration::hours(2),
            merge: MergeStrategy::Replace,
        }]
    );

    let provider = Canned {
        records: hourly_readings(),
        requests: Mutex::new(Vec::new()),
    };
    let opts = common::config().retrieve_options();
    let report = acquire(&provider, "meters/e2e", &plan, &mut buffer, query, opts)
        .await
        .unwrap();
    assert_eq!(report.gaps, 1);
    assert_eq!(report.pages, 1);
    assert_eq!(buffer.len(), 5);

    let sent = provider.requests.lock().unwrap()[0].clone();
    assert_eq!(sent.name, "meters/e2e");
    assert_eq!(sent.page_size, 1000);
    assert_eq!(sent.period.start_time, t0() - Duration::hours(2));
    assert_eq!(sent.period.end_time, t0() + Duration::hours(2) - Duration::milliseconds(1));

    let raw = derive_raw(buffer.as_slice(), &window);
    assert_eq!(raw.len(), 2);
    assert_eq!(raw[0].x, t0() + Duration::hours(1));
    assert_eq!(raw[1].x, t0() + Duration::hours(2));
    for p in &raw {
        assert_eq!(p.y, 15.0);
        assert!(!p.incomplete);
    }

    let series = derive_series(buffer.as_slice(), &window);
    let ys: Vec<_> = series.iter().map(|p| p.y).collect();
    assert_eq!(ys, vec![Some(15.0), Some(15.0)]);
    assert!(series.iter().all(|p| !p.predicted));
}

#[tokio::test]
async fn period_end_reading_waits_for_the_window_to_move() {
    let window = hourly_window(0, 2);
    let query = Timing::default().query_range(&window);
    let provider = InMemoryHistory::new().with_records("meters/e2e", hourly_readings());
    let mut buffer = RecordBuffer::new();

    let plan = compute_gaps(query, &buffer);
    let opts = common::config().retrieve_options();
    acquire(&provider, "meters/e2e", &plan, &mut buffer, query, opts)
        .await
        .unwrap();

    // the request stops 1ms short of T0+2h, so that reading is not served
    assert_eq!(buffer.len(), 4);
    assert_eq!(buffer.last_time(), Some(t0() + Duration::hours(1)));

    let series = derive_series(buffer.as_slice(), &window);
    let ys: Vec<_> = series.iter().map(|p| p.y).collect();
    assert_eq!(ys, vec![Some(15.0), None]);

    let next = compute_gaps(query, &buffer);
    assert_eq!(
        next.gaps,
        vec![Gap {
            start: t0() + Duration::hours(1),
            end: t0() + Duration::hours(2),
            merge: MergeStrategy::AppendUnique,
        }]
    );

    // once the period moves past T0+2h the reading is fetched and the span completes
    let later = hourly_window(0, 3);
    let query = Timing::default().query_range(&later);
    let plan = compute_gaps(query, &buffer);
    acquire(&provider, "meters/e2e", &plan, &mut buffer, query, opts)
        .await
        .unwrap();
    assert_eq!(buffer.len(), 5);
    let ys: Vec<_> = derive_series(buffer.as_slice(), &later)
        .iter()
        .map(|p| p.y)
        .collect();
    assert_eq!(ys, vec![Some(15.0), Some(15.0), None]);
}

#[tokio::test]
async fn counter_reset_is_bridged_by_neighbours() {
    let window = hourly_window(0, 4);
    let buffer = RecordBuffer::from_records(vec![
        hour(0, 0.0),
        hour(1, 10.0),
        hour(2, 3.0), // meter swapped
        hour(3, 13.0),
        hour(4, 23.0),
    ]);

    let series = derive_series(buffer.as_slice(), &window);
    let ys: Vec<_> = series.iter().map(|p| p.y).collect();
    assert_eq!(ys, vec![Some(10.0), Some(10.0), Some(10.0), Some(10.0)]);
    let predicted: Vec<_> = series.iter().map(|p| p.predicted).collect();
    assert_eq!(predicted, vec![false, true, false, false]);
}

#[tokio::test]
async fn unsampled_window_skips_flat_readings() {
    let mut window = hourly_window(0, 3);
    window.span_size = Duration::zero();
    let buffer = RecordBuffer::from_records(vec![
        hour(0, 5.0),
        hour(1, 5.0),
        hour(2, 7.0),
        hour(3, 7.0),
    ]);

    let series = derive_series(buffer.as_slice(), &window);
    assert_eq!(series.len(), 1);
    assert_eq!(series[0].x, (t0() + Duration::hours(2)).timestamp_millis());
    assert_eq!(series[0].y, Some(2.0));
}
