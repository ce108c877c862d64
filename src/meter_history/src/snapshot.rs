//! Read-only views published by the engine.
//!
//! The engine swaps in a fresh [`HistorySnapshot`] after every event. Readers
//! hold an `Arc` to whichever snapshot they loaded; nothing in it ever
//! changes afterwards.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use history_client::ReadingRecord;

use crate::{
    buffer::records_within, gap::GapPlan, scheduler::HistoryInputs, series::OutputPoint,
    window::DesiredWindow,
};

/// Everything a consumer can observe at one instant.
#[derive(Debug, Clone, PartialEq)]
pub struct HistorySnapshot {
    /// Meter resource name.
    pub name: String,
    /// Requested period and span.
    pub window: DesiredWindow,
    /// Final hourly-rate series.
    pub series: Arc<[OutputPoint]>,
    /// Buffered readings, lookback margin included.
    pub records: Arc<[ReadingRecord]>,
    /// Gaps between the query window and the buffer right now.
    pub gaps: GapPlan,
    /// An acquisition cycle is in flight.
    pub fetching: bool,
    /// When the last cycle was requested.
    pub last_fetch_time: Option<DateTime<Utc>>,
    /// Current refresh cadence.
    pub fetch_period: Duration,
    /// Clock reading at publish time.
    pub now: DateTime<Utc>,
    /// Oldest buffered reading inside the period.
    pub first_record_time: Option<DateTime<Utc>>,
    /// Newest buffered reading inside the period.
    pub last_record_time: Option<DateTime<Utc>>,
    /// Bumped whenever the name or span changes.
    pub generation: u64,
    /// Cycles finished so far, failed ones included.
    pub completed_cycles: u64,
    /// Cycles that ended in a fetch error.
    pub failed_cycles: u64,
}

impl HistorySnapshot {
    /// Nothing buffered, nothing fetched.
    pub fn empty(inputs: &HistoryInputs, now: DateTime<Utc>, fetch_period: Duration) -> Self {
        Self {
            name: inputs.name.clone(),
            window: inputs.window,
            series: Arc::from(Vec::new()),
            records: Arc::from(Vec::new()),
            gaps: GapPlan::default(),
            fetching: false,
            last_fetch_time: None,
            fetch_period,
            now,
            first_record_time: None,
            last_record_time: None,
            generation: 0,
            completed_cycles: 0,
            failed_cycles: 0,
        }
    }

    /// Buffered readings inside `[period_start, period_end]`.
    pub fn period_records(&self) -> &[ReadingRecord] {
        records_within(&self.records, self.window.period_start, self.window.period_end)
    }

    /// Idle with at least one finished cycle.
    pub fn is_settled(&self) -> bool {
        !self.fetching && self.completed_cycles > 0
    }
}
