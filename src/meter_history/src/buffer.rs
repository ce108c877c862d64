//! The record buffer: cumulative readings, strictly ascending by time.
//!
//! Every mutation keeps `record_time[i] < record_time[i + 1]`. Callers only get
//! shared slices or an `Arc<[ReadingRecord]>` copy; the engine is the single
//! writer.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use history_client::ReadingRecord;
use tracing::debug;

/// Ordered, timestamp-unique reading buffer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordBuffer {
    records: Vec<ReadingRecord>,
}

impl RecordBuffer {
    /// Empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from arbitrary records; sorts and drops duplicate timestamps
    /// (the last occurrence wins).
    pub fn from_records(records: Vec<ReadingRecord>) -> Self {
        let mut buf = Self::new();
        buf.replace(records);
        buf
    }

    /// Number of buffered readings.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True when nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Borrow the readings.
    pub fn as_slice(&self) -> &[ReadingRecord] {
        &self.records
    }

    /// Owned copy for publishing in snapshots.
    pub fn to_shared(&self) -> Arc<[ReadingRecord]> {
        Arc::from(self.records.as_slice())
    }

    /// Timestamp of the oldest reading.
    pub fn first_time(&self) -> Option<DateTime<Utc>> {
        self.records.first().map(|r| r.record_time)
    }

    /// Timestamp of the newest reading.
    pub fn last_time(&self) -> Option<DateTime<Utc>> {
        self.records.last().map(|r| r.record_time)
    }

    /// Drop everything.
    pub fn clear(&mut self) {
        self.records.clear();
    }

    /// Replace the whole buffer with `records`.
    ///
    /// Server pages arrive ascending, so the sort only runs when they don't.
    pub fn replace(&mut self, mut records: Vec<ReadingRecord>) {
        if !is_strictly_ascending(&records) {
            debug!(len = records.len(), "normalizing out-of-order records");
            // stable sort, then keep the last of each equal-time run
            records.sort_by_key(|r| r.record_time);
            records.reverse();
            records.dedup_by_key(|r| r.record_time);
            records.reverse();
        }
        self.records = records;
    }

    /// Prepend records that end before the current first reading.
    ///
    /// Trailing fetched records at or after the buffer's first timestamp are
    /// dropped first, so re-fetching the shared boundary never duplicates it.
    /// Returns how many records were added.
    pub fn prepend_unique(&mut self, mut fetched: Vec<ReadingRecord>) -> usize {
        let Some(first) = self.first_time() else {
            let n = fetched.len();
            self.replace(fetched);
            return n;
        };
        while fetched.last().is_some_and(|r| r.record_time >= first) {
            fetched.pop();
        }
        if fetched.is_empty() {
            return 0;
        }
        if !is_strictly_ascending(&fetched) {
            fetched = Self::from_records(fetched).records;
        }
        let n = fetched.len();
        fetched.append(&mut self.records);
        self.records = fetched;
        n
    }

    /// Append records after the current last reading.
    ///
    /// With `dedupe`, leading fetched records at or before the buffer's last
    /// timestamp are skipped. Without it the fetched set is appended as-is,
    /// which is only safe when the server never echoes the lower boundary.
    /// Returns how many records were added.
    pub fn append_unique(&mut self, fetched: Vec<ReadingRecord>, dedupe: bool) -> usize {
        let Some(last) = self.last_time() else {
            let n = fetched.len();
            self.replace(fetched);
            return n;
        };
        let skip = if dedupe {
            fetched
                .iter()
                .take_while(|r| r.record_time <= last)
                .count()
        } else {
            0
        };
        let n = fetched.len() - skip;
        self.records.extend(fetched.into_iter().skip(skip));
        n
    }

    /// Keep only readings inside `[start, end]` (inclusive).
    ///
    /// Scans inward from both ends; when nothing is out of range the vector
    /// is left untouched. Returns how many records were removed.
    pub fn trim_to(&mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> usize {
        let len = self.records.len();
        let mut lo = 0;
        while lo < len && self.records[lo].record_time < start {
            lo += 1;
        }
        let mut hi = len;
        while hi > lo && self.records[hi - 1].record_time > end {
            hi -= 1;
        }
        if lo == 0 && hi == len {
            return 0;
        }
        self.records.truncate(hi);
        self.records.drain(..lo);
        len - self.records.len()
    }

    /// Whether the ordering invariant holds. Always true for a buffer only
    /// mutated through this API; exposed for tests and debug assertions.
    pub fn is_strictly_ascending(&self) -> bool {
        is_strictly_ascending(&self.records)
    }
}

/// The part of ascending `records` inside `[start, end]` (inclusive).
pub fn records_within(
    records: &[ReadingRecord],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> &[ReadingRecord] {
    let lo = records.partition_point(|r| r.record_time < start);
    let hi = records.partition_point(|r| r.record_time <= end).max(lo);
    &records[lo..hi]
}

fn is_strictly_ascending(records: &[ReadingRecord]) -> bool {
    records
        .windows(2)
        .all(|w| w[0].record_time < w[1].record_time)
}
