#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use history_client::{ReadingRecord, providers::memory::InMemoryHistory};
use meter_history::{DesiredWindow, HistoryInputs, clock::ManualClock, config::EngineConfig};

/// Fixed reference instant used across the integration tests.
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 9, 1, 12, 0, 0).unwrap()
}

pub fn at_min(min: i64) -> DateTime<Utc> {
    t0() + Duration::minutes(min)
}

/// One reading every `step` minutes over `[from, to]`, usage rising by `rate` per step.
pub fn ramp(from: i64, to: i64, step: i64, rate: f64) -> Vec<ReadingRecord> {
    (from..=to)
        .step_by(step as usize)
        .enumerate()
        .map(|(i, m)| ReadingRecord::usage_at(at_min(m), i as f64 * rate))
        .collect()
}

pub fn hourly_window(from_h: i64, to_h: i64) -> DesiredWindow {
    DesiredWindow::new(
        t0() + Duration::hours(from_h),
        t0() + Duration::hours(to_h),
        Duration::hours(1),
    )
}

pub fn inputs(name: &str, window: DesiredWindow) -> HistoryInputs {
    HistoryInputs::new(name, window)
}

pub fn history(name: &str, records: Vec<ReadingRecord>) -> Arc<InMemoryHistory> {
    Arc::new(InMemoryHistory::new().with_records(name, records))
}

pub fn manual_clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(t0() + Duration::hours(3)))
}

pub fn config() -> EngineConfig {
    EngineConfig::default()
}
