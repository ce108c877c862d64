//! In-process history source.
//!
//! Serves records from memory with the same pagination contract as the
//! gateway: ascending order, offset-based page tokens, empty token on the
//! last page. Used by tests and by the CLI's `--fixture` mode.
//!
//! Failures can be scripted with [`InMemoryHistory::fail_on_call`] to exercise
//! the engine's error path.

use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::{
    models::{
        reading::ReadingRecord,
        request::{HistoryPage, ListHistoryRequest},
    },
    providers::{HistoryProvider, InternalSnafu, ProviderError, ValidationSnafu, validate_request},
};

#[derive(Default)]
pub struct InMemoryHistory {
    series: Mutex<BTreeMap<String, Vec<ReadingRecord>>>,
    calls: Mutex<Vec<ListHistoryRequest>>,
    failing_calls: Mutex<HashSet<usize>>,
}

impl InMemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style [`InMemoryHistory::insert`].
    pub fn with_records(self, name: &str, records: impl IntoIterator<Item = ReadingRecord>) -> Self {
        self.insert(name, records);
        self
    }

    /// Add records for `name`; kept sorted and unique by `record_time`
    /// (later inserts win).
    pub fn insert(&self, name: &str, records: impl IntoIterator<Item = ReadingRecord>) {
        let mut series = self.series.lock().expect("history fixture lock poisoned");
        let entry = series.entry(name.to_string()).or_default();
        let mut by_time: BTreeMap<_, _> = entry.drain(..).map(|r| (r.record_time, r)).collect();
        for r in records {
            by_time.insert(r.record_time, r);
        }
        entry.extend(by_time.into_values());
    }

    /// Make the `n`-th call (zero-based, counting every call) fail with an
    /// internal error.
    pub fn fail_on_call(&self, n: usize) {
        self.failing_calls
            .lock()
            .expect("history fixture lock poisoned")
            .insert(n);
    }

    /// Every request served so far, in order.
    pub fn calls(&self) -> Vec<ListHistoryRequest> {
        self.calls
            .lock()
            .expect("history fixture lock poisoned")
            .clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().expect("history fixture lock poisoned").len()
    }
}

#[async_trait]
impl HistoryProvider for InMemoryHistory {
    async fn list_history(&self, req: ListHistoryRequest) -> Result<HistoryPage, ProviderError> {
        let call_index = {
            let mut calls = self.calls.lock().expect("history fixture lock poisoned");
            calls.push(req.clone());
            calls.len() - 1
        };
        if self
            .failing_calls
            .lock()
            .expect("history fixture lock poisoned")
            .contains(&call_index)
        {
            return InternalSnafu {
                message: format!("scripted failure on call {call_index}"),
            }
            .fail();
        }

        validate_request(&req)?;

        let offset = match &req.page_token {
            None => 0,
            Some(t) => t.parse::<usize>().map_err(|_| {
                ValidationSnafu {
                    message: format!("unknown page token {t:?}"),
                }
                .build()
            })?,
        };

        let series = self.series.lock().expect("history fixture lock poisoned");
        let matching: Vec<ReadingRecord> = series
            .get(&req.name)
            .map(|all| {
                all.iter()
                    .filter(|r| req.period.contains(r.record_time))
                    .copied()
                    .collect()
            })
            .unwrap_or_default();

        let page_size = req.page_size as usize;
        let end = (offset + page_size).min(matching.len());
        let records = matching.get(offset..end).map(<[_]>::to_vec).unwrap_or_default();
        let next_page_token = (end < matching.len()).then(|| end.to_string());

        Ok(HistoryPage {
            records,
            next_page_token,
        })
    }
}
