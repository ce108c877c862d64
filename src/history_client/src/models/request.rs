use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::reading::ReadingRecord;

/// Closed time filter sent with a history request.
///
/// Both bounds are inclusive, matching the gateway's filter semantics. Callers
/// that want a half-open `[start, end)` range pass `end - 1ms` as `end_time`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Period {
    /// First instant included.
    pub start_time: DateTime<Utc>,
    /// Last instant included.
    pub end_time: DateTime<Utc>,
}

impl Period {
    pub fn new(start_time: DateTime<Utc>, end_time: DateTime<Utc>) -> Self {
        Self {
            start_time,
            end_time,
        }
    }

    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        self.start_time <= t && t <= self.end_time
    }
}

/// One page request against `ListHistory`.
///
/// Vendor-agnostic: providers translate this into their own query encoding.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListHistoryRequest {
    /// Resource (device/meter) name, e.g. `"building/floor-1/meter-7"`.
    pub name: String,

    /// Time filter for the records.
    pub period: Period,

    /// Maximum number of records the server may return in this page.
    pub page_size: u32,

    /// Continuation token from the previous page; `None` for the first page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_token: Option<String>,
}

impl ListHistoryRequest {
    pub fn first_page(name: impl Into<String>, period: Period, page_size: u32) -> Self {
        Self {
            name: name.into(),
            period,
            page_size,
            page_token: None,
        }
    }

    /// Same query, pointed at the page after `token`.
    pub fn next_page(&self, token: impl Into<String>) -> Self {
        Self {
            page_token: Some(token.into()),
            ..self.clone()
        }
    }
}

/// One page of results, ordered ascending by `record_time`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryPage {
    pub records: Vec<ReadingRecord>,

    /// Token for the next page. Absent or empty means this was the last page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_page_token: Option<String>,
}

impl HistoryPage {
    /// The continuation token, with the empty string treated as "no more pages".
    pub fn continuation(&self) -> Option<&str> {
        self.next_page_token.as_deref().filter(|t| !t.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn empty_token_ends_pagination() {
        let mut page = HistoryPage::default();
        assert_eq!(page.continuation(), None);
        page.next_page_token = Some(String::new());
        assert_eq!(page.continuation(), None);
        page.next_page_token = Some("2000".into());
        assert_eq!(page.continuation(), Some("2000"));
    }

    #[test]
    fn next_page_keeps_the_query() {
        let t = Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap();
        let first = ListHistoryRequest::first_page("meter-1", Period::new(t, t), 1000);
        let second = first.next_page("abc");
        assert_eq!(second.name, "meter-1");
        assert_eq!(second.page_size, 1000);
        assert_eq!(second.page_token.as_deref(), Some("abc"));
        assert_eq!(first.page_token, None);
    }

    #[test]
    fn period_is_closed() {
        let a = Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap();
        let b = Utc.with_ymd_and_hms(2025, 3, 1, 1, 0, 0).unwrap();
        let p = Period::new(a, b);
        assert!(p.contains(a));
        assert!(p.contains(b));
        assert!(!p.contains(b + chrono::Duration::milliseconds(1)));
    }
}
