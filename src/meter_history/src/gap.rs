//! Gap calculation: what is missing between the query window and the buffer.
//!
//! ## Shape of a plan
//! - empty buffer, or buffer disjoint from the window: one `Replace` gap over
//!   the whole query window;
//! - partial overlap: a `PrependUnique` gap before the first reading and/or an
//!   `AppendUnique` gap after the last one;
//! - full coverage: no gaps.
//!
//! Gaps are half-open `[start, end)`. The request sent for a gap ends at
//! `end - 1ms` so a reading sitting exactly on `end` is not fetched twice.

use std::fmt;

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use history_client::Period;
use serde::{Deserialize, Serialize};

use crate::{buffer::RecordBuffer, window::TimeRange};

/// How fetched records are folded into the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    /// Discard the buffer and use the fetched set.
    Replace,
    /// Put the fetched set in front, minus any boundary duplicate.
    PrependUnique,
    /// Put the fetched set at the back, minus any boundary duplicate.
    AppendUnique,
}

impl fmt::Display for MergeStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MergeStrategy::Replace => "replace",
            MergeStrategy::PrependUnique => "prepend",
            MergeStrategy::AppendUnique => "append",
        })
    }
}

/// One missing sub-range of the query window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gap {
    /// Inclusive start.
    pub start: DateTime<Utc>,
    /// Exclusive end.
    pub end: DateTime<Utc>,
    /// Where the fetched records go.
    pub merge: MergeStrategy,
}

impl Gap {
    /// The closed period actually requested: `[start, end - 1ms]`.
    pub fn request_period(&self) -> Period {
        Period::new(self.start, self.end - Duration::milliseconds(1))
    }
}

impl fmt::Display for Gap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<7} [{}, {})",
            self.merge.to_string(),
            self.start.to_rfc3339_opts(SecondsFormat::Secs, true),
            self.end.to_rfc3339_opts(SecondsFormat::Secs, true)
        )
    }
}

/// The ordered gaps for one acquisition cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GapPlan {
    /// At most two entries; see the module docs.
    pub gaps: Vec<Gap>,
}

impl GapPlan {
    /// True if the buffer already covers the window.
    pub fn is_noop(&self) -> bool {
        self.gaps.is_empty()
    }

    /// Iterate in fetch order.
    pub fn iter(&self) -> std::slice::Iter<'_, Gap> {
        self.gaps.iter()
    }
}

impl fmt::Display for GapPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.gaps.is_empty() {
            return write!(f, "No gaps");
        }
        for (i, gap) in self.gaps.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{gap}")?;
        }
        Ok(())
    }
}

/// Compare the query window against the buffer and list what to fetch.
///
/// An inverted or empty query window yields no gaps.
pub fn compute_gaps(query: TimeRange, buffer: &RecordBuffer) -> GapPlan {
    if query.end <= query.start {
        return GapPlan::default();
    }

    let whole = Gap {
        start: query.start,
        end: query.end,
        merge: MergeStrategy::Replace,
    };

    let (Some(first), Some(last)) = (buffer.first_time(), buffer.last_time()) else {
        return GapPlan { gaps: vec![whole] };
    };

    if first > query.end || last < query.start {
        return GapPlan { gaps: vec![whole] };
    }

    let mut gaps = Vec::with_capacity(2);
    if first > query.start {
        gaps.push(Gap {
            start: query.start,
            end: first,
            merge: MergeStrategy::PrependUnique,
        });
    }
    if last < query.end {
        gaps.push(Gap {
            start: last,
            end: query.end,
            merge: MergeStrategy::AppendUnique,
        });
    }
    GapPlan { gaps }
}
