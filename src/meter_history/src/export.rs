//! CSV projection of the record buffer.
//!
//! The buffer is downsampled to one row per reporting span: spans start at
//! the first record's timestamp, and for every span boundary a later record
//! crosses, the last record at or before that boundary becomes a row. The
//! buffer's final record always closes the table. A non-positive span keeps
//! every record.
//!
//! Rows are handed to an [`ExportSink`] together with the header labels. Two
//! sinks ship here: [`CsvFileSink`] writes RFC 4180 files into a directory,
//! [`MemorySink`] keeps them for inspection.

use std::{
    path::{Path, PathBuf},
    sync::Mutex,
};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use history_client::ReadingRecord;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use snafu::{Backtrace, ResultExt, Snafu};
use thiserror::Error;
use tracing::info;

/// Timestamp layout used in the `recordTime` column.
pub const RECORD_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Header label for one record field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldLabel {
    /// Human-readable column title.
    pub label: String,
    /// Unit appended in parentheses, if any.
    #[serde(default)]
    pub unit: Option<String>,
}

impl FieldLabel {
    /// `"Usage (kWh)"`, or just the label without a unit.
    pub fn title(&self) -> String {
        match &self.unit {
            Some(unit) if !unit.is_empty() => format!("{} ({unit})", self.label),
            _ => self.label.clone(),
        }
    }
}

/// Field path → header label, in declaration order.
pub type FieldDictionary = IndexMap<String, FieldLabel>;

/// What to put in the value column and how to render times.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportOptions {
    /// Dotted path into the record's JSON form, e.g. `usage`.
    pub field_path: String,
    /// Zone used for the `recordTime` column.
    pub timezone: Tz,
    /// Column titles.
    pub labels: FieldDictionary,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            field_path: "usage".to_string(),
            timezone: Tz::UTC,
            labels: FieldDictionary::new(),
        }
    }
}

/// One exported row.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CsvRow {
    /// Resource name of the meter.
    pub device_name: String,
    /// Value found at the configured field path.
    pub usage: Value,
    /// Local date and time.
    pub record_time: String,
}

/// Everything a sink needs to produce one file.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportData {
    /// Resource name of the meter.
    pub device_name: String,
    /// Column titles, in row order.
    pub header: Vec<String>,
    /// Downsampled rows.
    pub rows: Vec<CsvRow>,
}

impl ExportData {
    /// Render as CSV text with a header line and CRLF line endings.
    pub fn to_csv(&self) -> String {
        let mut out = String::new();
        push_line(&mut out, self.header.iter().map(String::as_str));
        for row in &self.rows {
            let usage = value_cell(&row.usage);
            push_line(
                &mut out,
                [row.device_name.as_str(), usage.as_str(), row.record_time.as_str()],
            );
        }
        out
    }
}

/// Projection failed.
#[derive(Debug, Error)]
pub enum ExportError {
    /// The sink could not take the data.
    #[error("export sink failed")]
    Sink(#[from] SinkError),

    /// The field path does not resolve on a record.
    #[error("field path {path:?} not found on record at {record_time}")]
    UnknownField {
        /// The configured path.
        path: String,
        /// The first record it failed on.
        record_time: DateTime<Utc>,
    },

    /// No sink was configured for this engine.
    #[error("no export sink configured")]
    NoSink,
}

/// Sink failures.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SinkError {
    /// File names must be a single path component.
    #[snafu(display("Invalid export file name {name:?}"))]
    InvalidFileName {
        /// The rejected name.
        name: String,
        backtrace: Backtrace,
    },

    /// Could not create the output directory or write the file.
    #[snafu(display("Failed to write {}: {source}", path.display()))]
    Write {
        /// File or directory being written.
        path: PathBuf,
        source: std::io::Error,
        backtrace: Backtrace,
    },
}

/// Consumer of finished export tables.
#[async_trait]
pub trait ExportSink: Send + Sync {
    /// Deliver `data` under `file_name`.
    async fn write(&self, file_name: &str, data: &ExportData) -> Result<(), SinkError>;
}

/// Indices of the records that become rows.
pub fn select_rows(records: &[ReadingRecord], span: Duration) -> Vec<usize> {
    let Some(first) = records.first() else {
        return Vec::new();
    };
    let span_ms = span.num_milliseconds();
    if span_ms <= 0 {
        return (0..records.len()).collect();
    }

    let mut picked = Vec::new();
    let mut boundary = first.record_time + span;
    for (i, pair) in records.windows(2).enumerate() {
        let next = pair[1].record_time;
        if next <= boundary {
            continue;
        }
        picked.push(i);
        // jump straight past every boundary this record crossed
        let behind = (next - boundary).num_milliseconds();
        let steps = behind / span_ms + i64::from(behind % span_ms != 0);
        boundary += Duration::milliseconds(span_ms * steps);
    }
    picked.push(records.len() - 1);
    picked
}

/// Build the export table for `records`.
pub fn project_rows(
    device_name: &str,
    records: &[ReadingRecord],
    span: Duration,
    opts: &ExportOptions,
) -> Result<ExportData, ExportError> {
    let rows = select_rows(records, span)
        .into_iter()
        .map(|i| {
            let record = &records[i];
            Ok(CsvRow {
                device_name: device_name.to_string(),
                usage: extract_field(record, &opts.field_path).ok_or_else(|| {
                    ExportError::UnknownField {
                        path: opts.field_path.clone(),
                        record_time: record.record_time,
                    }
                })?,
                record_time: record
                    .record_time
                    .with_timezone(&opts.timezone)
                    .format(RECORD_TIME_FORMAT)
                    .to_string(),
            })
        })
        .collect::<Result<Vec<_>, ExportError>>()?;

    Ok(ExportData {
        device_name: device_name.to_string(),
        header: header(opts),
        rows,
    })
}

fn header(opts: &ExportOptions) -> Vec<String> {
    let value = opts
        .labels
        .get(&opts.field_path)
        .map(FieldLabel::title)
        .unwrap_or_else(|| opts.field_path.clone());
    vec!["Device".to_string(), value, "Record time".to_string()]
}

/// Walk a dotted path through the record's JSON form.
pub fn extract_field(record: &ReadingRecord, path: &str) -> Option<Value> {
    let root = serde_json::to_value(record).ok()?;
    path.split('.')
        .try_fold(&root, |node, key| node.get(key))
        .cloned()
}

fn value_cell(v: &Value) -> String {
    match v {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn push_line<'a>(out: &mut String, cells: impl IntoIterator<Item = &'a str>) {
    for (i, cell) in cells.into_iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        if cell.contains([',', '"', '\r', '\n']) {
            out.push('"');
            out.push_str(&cell.replace('"', "\"\""));
            out.push('"');
        } else {
            out.push_str(cell);
        }
    }
    out.push_str("\r\n");
}

/// Writes `<dir>/<file_name>.csv`.
#[derive(Debug, Clone)]
pub struct CsvFileSink {
    dir: PathBuf,
}

impl CsvFileSink {
    /// Files land in `dir`, created on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Target directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Full path for `file_name`, adding `.csv` when missing.
    pub fn path_for(&self, file_name: &str) -> Result<PathBuf, SinkError> {
        let trimmed = file_name.trim();
        if trimmed.is_empty()
            || trimmed.contains(['/', '\\'])
            || trimmed == "."
            || trimmed == ".."
        {
            return InvalidFileNameSnafu { name: file_name }.fail();
        }
        let mut name = trimmed.to_string();
        if !name.to_ascii_lowercase().ends_with(".csv") {
            name.push_str(".csv");
        }
        Ok(self.dir.join(name))
    }
}

#[async_trait]
impl ExportSink for CsvFileSink {
    async fn write(&self, file_name: &str, data: &ExportData) -> Result<(), SinkError> {
        let path = self.path_for(file_name)?;
        tokio::fs::create_dir_all(&self.dir)
            .await
            .context(WriteSnafu { path: &self.dir })?;
        tokio::fs::write(&path, data.to_csv())
            .await
            .context(WriteSnafu { path: &path })?;
        info!(path = %path.display(), rows = data.rows.len(), "export written");
        Ok(())
    }
}

/// Keeps every export in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    files: Mutex<Vec<(String, ExportData)>>,
}

impl MemorySink {
    /// Empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything written so far, oldest first.
    pub fn files(&self) -> Vec<(String, ExportData)> {
        self.files.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl ExportSink for MemorySink {
    async fn write(&self, file_name: &str, data: &ExportData) -> Result<(), SinkError> {
        self.files
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((file_name.to_string(), data.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn t(min: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 2, 3, 10, 0, 0).unwrap() + Duration::minutes(min)
    }

    fn recs(mins: &[i64]) -> Vec<ReadingRecord> {
        mins.iter()
            .map(|m| ReadingRecord::new(t(*m), *m as f64, 0.5))
            .collect()
    }

    #[test]
    fn one_row_per_crossed_span_plus_last() {
        // spans: (0,60] (60,120] (120,180] ...
        let r = recs(&[0, 20, 50, 70, 110, 130, 140]);
        assert_eq!(select_rows(&r, Duration::hours(1)), vec![2, 4, 6]);
    }

    #[test]
    fn record_on_boundary_belongs_to_earlier_span() {
        let r = recs(&[0, 60, 90]);
        assert_eq!(select_rows(&r, Duration::hours(1)), vec![1, 2]);
    }

    #[test]
    fn long_silence_crosses_many_boundaries_once() {
        let r = recs(&[0, 10, 550, 560]);
        assert_eq!(select_rows(&r, Duration::hours(1)), vec![1, 3]);
    }

    #[test]
    fn zero_span_keeps_everything() {
        let r = recs(&[0, 1, 2]);
        assert_eq!(select_rows(&r, Duration::zero()), vec![0, 1, 2]);
        assert!(select_rows(&[], Duration::hours(1)).is_empty());
        assert_eq!(select_rows(&recs(&[5]), Duration::hours(1)), vec![0]);
    }

    #[test]
    fn projects_field_and_local_time() {
        let mut labels = FieldDictionary::new();
        labels.insert(
            "produced".into(),
            FieldLabel {
                label: "Produced".into(),
                unit: Some("kWh".into()),
            },
        );
        let opts = ExportOptions {
            field_path: "produced".into(),
            timezone: chrono_tz::Europe::Berlin,
            labels,
        };
        let data = project_rows("meters/m1", &recs(&[0]), Duration::hours(1), &opts).unwrap();
        assert_eq!(data.header, vec!["Device", "Produced (kWh)", "Record time"]);
        assert_eq!(data.rows[0].usage, serde_json::json!(0.5));
        assert_eq!(data.rows[0].record_time, "2025-02-03 11:00:00");
    }

    #[test]
    fn unknown_field_is_an_error() {
        let opts = ExportOptions {
            field_path: "meterReading.usage".into(),
            ..ExportOptions::default()
        };
        let err = project_rows("m", &recs(&[0]), Duration::hours(1), &opts).unwrap_err();
        assert!(matches!(err, ExportError::UnknownField { .. }));
    }

    #[test]
    fn csv_quotes_awkward_cells() {
        let data = ExportData {
            device_name: "a,b".into(),
            header: vec!["Device".into(), "Usage".into(), "Record time".into()],
            rows: vec![CsvRow {
                device_name: "say \"hi\", meter".into(),
                usage: serde_json::json!(1.5),
                record_time: "2025-01-01 00:00:00".into(),
            }],
        };
        assert_eq!(
            data.to_csv(),
            "Device,Usage,Record time\r\n\"say \"\"hi\"\", meter\",1.5,2025-01-01 00:00:00\r\n"
        );
    }

    #[test]
    fn file_names_are_single_components() {
        let sink = CsvFileSink::new("/tmp/out");
        assert_eq!(sink.path_for("jan").unwrap(), PathBuf::from("/tmp/out/jan.csv"));
        assert_eq!(sink.path_for("jan.CSV").unwrap(), PathBuf::from("/tmp/out/jan.CSV"));
        assert!(sink.path_for("../x").is_err());
        assert!(sink.path_for(" ").is_err());
    }

    #[tokio::test]
    async fn file_sink_writes_csv() {
        let dir = tempfile::tempdir().unwrap();
        let sink = CsvFileSink::new(dir.path().join("nested"));
        let data = project_rows("m", &recs(&[0, 90]), Duration::hours(1), &ExportOptions::default())
            .unwrap();
        sink.write("report", &data).await.unwrap();

        let text = std::fs::read_to_string(dir.path().join("nested/report.csv")).unwrap();
        insta::assert_snapshot!(text.replace("\r\n", "\n"), @r"
        Device,usage,Record time
        m,0.0,2025-02-03 10:00:00
        m,90.0,2025-02-03 11:30:00
        ");
    }
}
