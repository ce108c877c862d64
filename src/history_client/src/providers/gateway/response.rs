use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::models::{reading::ReadingRecord, request::HistoryPage};

#[derive(Deserialize, Debug, Default)]
pub struct GatewayMeterReading {
    #[serde(default)]
    pub usage: f64,
    #[serde(default)]
    pub produced: f64,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct GatewayRecord {
    pub record_time: DateTime<Utc>,
    #[serde(default)]
    pub meter_reading: GatewayMeterReading,
}

/// Body of a `ListMeterReadingHistory` response as the gateway renders it.
///
/// Proto3 JSON omits default values, so every field may be missing.
#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct GatewayResponse {
    #[serde(default)]
    pub meter_reading_records: Vec<GatewayRecord>,
    #[serde(default)]
    pub next_page_token: String,
    #[serde(default)]
    pub total_size: u64,
}

impl From<GatewayResponse> for HistoryPage {
    fn from(resp: GatewayResponse) -> Self {
        let records = resp
            .meter_reading_records
            .into_iter()
            .map(|r| ReadingRecord {
                record_time: r.record_time,
                usage: r.meter_reading.usage,
                produced: r.meter_reading.produced,
            })
            .collect();

        HistoryPage {
            records,
            next_page_token: Some(resp.next_page_token).filter(|t| !t.is_empty()),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn decodes_proto3_json() {
        let body = r#"{
            "meterReadingRecords": [
                {"recordTime": "2025-02-01T00:00:00Z", "meterReading": {"usage": 12.5}},
                {"recordTime": "2025-02-01T00:15:00.250Z", "meterReading": {"usage": 13.0, "produced": 2.0}}
            ],
            "nextPageToken": "page-2",
            "totalSize": 40
        }"#;
        let resp: GatewayResponse = serde_json::from_str(body).unwrap();
        assert_eq!(resp.total_size, 40);

        let page = HistoryPage::from(resp);
        assert_eq!(page.records.len(), 2);
        assert_eq!(
            page.records[0].record_time,
            Utc.with_ymd_and_hms(2025, 2, 1, 0, 0, 0).unwrap()
        );
        assert_eq!(page.records[0].produced, 0.0);
        assert_eq!(page.records[1].produced, 2.0);
        assert_eq!(page.continuation(), Some("page-2"));
    }

    #[test]
    fn last_page_omits_token() {
        let resp: GatewayResponse = serde_json::from_str("{}").unwrap();
        let page = HistoryPage::from(resp);
        assert!(page.records.is_empty());
        assert_eq!(page.next_page_token, None);
    }
}
