//! Paginated retrieval per gap, and merging the results into the buffer.
//!
//! Gaps are fetched one after another, never concurrently: the dedup step of
//! a later gap looks at the buffer as the earlier gap left it.
//!
//! A failing page aborts the rest of the cycle. Whatever was merged before the
//! failure stays in the buffer; there is no rollback.

use std::num::NonZeroU32;

use history_client::{HistoryProvider, ListHistoryRequest, ProviderError, ReadingRecord};
use thiserror::Error;
use tracing::{debug, info};

use crate::{
    buffer::RecordBuffer,
    gap::{Gap, GapPlan, MergeStrategy},
    window::TimeRange,
};

/// Knobs for one acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrieveOptions {
    /// Records per page.
    pub page_size: NonZeroU32,
    /// Skip fetched records at or before the buffer's last reading on append.
    pub dedupe_append: bool,
}

/// A gap could not be fetched.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The provider failed on one of the gap's pages.
    #[error("fetching {gap} failed after {pages} page(s)")]
    Provider {
        /// The gap being fetched.
        gap: Gap,
        /// Pages already received for this gap.
        pages: usize,
        /// Underlying provider error.
        #[source]
        source: ProviderError,
    },

    /// The server handed back the token it was just given.
    #[error("fetching {gap} stalled: page token {token:?} repeated")]
    StalledPagination {
        /// The gap being fetched.
        gap: Gap,
        /// The repeated token.
        token: String,
    },
}

/// What an acquisition did to the buffer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AcquireReport {
    /// Gaps fetched and merged.
    pub gaps: usize,
    /// Page requests issued.
    pub pages: usize,
    /// Records received from the provider.
    pub fetched: usize,
    /// Records that made it into the buffer.
    pub merged: usize,
    /// Records removed by the final trim.
    pub trimmed: usize,
}

/// Records for one gap plus how many pages that took.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GapFetch {
    /// All pages concatenated, ascending.
    pub records: Vec<ReadingRecord>,
    /// Page requests issued.
    pub pages: usize,
}

/// Walk every page of `gap` and concatenate them.
pub async fn fetch_gap<P>(
    provider: &P,
    name: &str,
    gap: &Gap,
    page_size: NonZeroU32,
) -> Result<GapFetch, FetchError>
where
    P: HistoryProvider + ?Sized,
{
    let first = ListHistoryRequest::first_page(name, gap.request_period(), page_size.get());
    let mut req = first.clone();
    let mut out = GapFetch::default();

    loop {
        let sent_token = req.page_token.clone();
        let page = provider
            .list_history(req)
            .await
            .map_err(|source| FetchError::Provider {
                gap: *gap,
                pages: out.pages,
                source,
            })?;
        out.pages += 1;

        let next = page.continuation().map(str::to_string);
        out.records.extend(page.records);

        let Some(token) = next else { break };
        if sent_token.as_deref() == Some(token.as_str()) {
            return Err(FetchError::StalledPagination { gap: *gap, token });
        }
        debug!(%gap, pages = out.pages, records = out.records.len(), "following page token");
        req = first.next_page(token);
    }

    Ok(out)
}

/// Fold one gap's records into the buffer according to its strategy.
/// Returns how many records were added.
pub fn merge_gap(
    buffer: &mut RecordBuffer,
    merge: MergeStrategy,
    records: Vec<ReadingRecord>,
    dedupe_append: bool,
) -> usize {
    match merge {
        MergeStrategy::Replace => {
            buffer.replace(records);
            buffer.len()
        }
        MergeStrategy::PrependUnique => buffer.prepend_unique(records),
        MergeStrategy::AppendUnique => buffer.append_unique(records, dedupe_append),
    }
}

/// Fetch every gap in order, merge, then trim the buffer to `retain`.
///
/// On error the buffer keeps whatever earlier gaps merged, and is not trimmed.
pub async fn acquire<P>(
    provider: &P,
    name: &str,
    plan: &GapPlan,
    buffer: &mut RecordBuffer,
    retain: TimeRange,
    opts: RetrieveOptions,
) -> Result<AcquireReport, FetchError>
where
    P: HistoryProvider + ?Sized,
{
    let mut report = AcquireReport::default();

    for gap in plan.iter() {
        let fetched = fetch_gap(provider, name, gap, opts.page_size).await?;
        report.gaps += 1;
        report.pages += fetched.pages;
        report.fetched += fetched.records.len();
        report.merged += merge_gap(buffer, gap.merge, fetched.records, opts.dedupe_append);
    }

    report.trimmed = buffer.trim_to(retain.start, retain.end);
    info!(
        name,
        gaps = report.gaps,
        pages = report.pages,
        fetched = report.fetched,
        merged = report.merged,
        trimmed = report.trimmed,
        buffered = buffer.len(),
        "acquisition complete"
    );
    Ok(report)
}
