//! When to start an acquisition cycle.
//!
//! A cycle is due when none is in flight and either nothing has been fetched
//! yet or a full fetch period has passed since the last trigger. Input
//! changes reset the schedule; see [`InputChange`].

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::window::DesiredWindow;

/// Everything the caller controls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryInputs {
    /// Resource name of the meter. Empty means "nothing selected".
    pub name: String,
    /// Requested period and span.
    pub window: DesiredWindow,
}

impl HistoryInputs {
    /// Bundle a name and window.
    pub fn new(name: impl Into<String>, window: DesiredWindow) -> Self {
        Self {
            name: name.into(),
            window,
        }
    }

    /// Acquisition only runs for a non-blank name.
    pub fn has_name(&self) -> bool {
        !self.name.trim().is_empty()
    }
}

/// How an input update affects buffered state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputChange {
    /// Nothing relevant moved.
    Unchanged,
    /// Only the period edges moved: refetch gaps but keep the buffer.
    Window,
    /// Name or span size changed: the buffer no longer describes the request.
    Series,
}

impl InputChange {
    /// Compare two input sets.
    pub fn classify(old: &HistoryInputs, new: &HistoryInputs) -> Self {
        if old.name != new.name || old.window.span_size != new.window.span_size {
            InputChange::Series
        } else if old.window != new.window {
            InputChange::Window
        } else {
            InputChange::Unchanged
        }
    }
}

/// In-flight flag plus last trigger time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchScheduler {
    fetching: bool,
    last_fetch_time: Option<DateTime<Utc>>,
    fetch_period: Duration,
}

impl FetchScheduler {
    /// Idle scheduler that will fire on the first check.
    pub fn new(fetch_period: Duration) -> Self {
        Self {
            fetching: false,
            last_fetch_time: None,
            fetch_period,
        }
    }

    /// `!fetching && (last_fetch_time is unset || now >= last + fetch_period)`.
    pub fn should_fetch(&self, now: DateTime<Utc>) -> bool {
        if self.fetching {
            return false;
        }
        match self.last_fetch_time {
            None => true,
            Some(last) => now >= last + self.fetch_period,
        }
    }

    /// Record that a cycle was requested at `now`.
    pub fn mark_triggered(&mut self, now: DateTime<Utc>) {
        self.last_fetch_time = Some(now);
    }

    /// A cycle started.
    pub fn begin_cycle(&mut self) {
        self.fetching = true;
    }

    /// A cycle finished, successfully or not.
    pub fn end_cycle(&mut self) {
        self.fetching = false;
    }

    /// Forget the last trigger so the next check fires.
    pub fn reset(&mut self) {
        self.last_fetch_time = None;
    }

    /// Change the refresh cadence.
    pub fn set_fetch_period(&mut self, period: Duration) {
        self.fetch_period = period;
    }

    /// Whether a cycle is in flight.
    pub fn is_fetching(&self) -> bool {
        self.fetching
    }

    /// When the last cycle was requested.
    pub fn last_fetch_time(&self) -> Option<DateTime<Utc>> {
        self.last_fetch_time
    }

    /// Current refresh cadence.
    pub fn fetch_period(&self) -> Duration {
        self.fetch_period
    }

    /// Earliest instant a new cycle becomes due, if one is scheduled.
    pub fn next_due(&self) -> Option<DateTime<Utc>> {
        self.last_fetch_time.map(|t| t + self.fetch_period)
    }
}
