//! The meter-history engine: a single-writer actor and its handle.
//!
//! ## Event loop
//! The actor owns the buffer and the scheduler. It wakes on:
//! - a caller command (new name, window or span);
//! - a message from the in-flight fetch task (one gap's records, or the end
//!   of the cycle);
//! - the refresh deadline (`last_fetch_time + fetch_period`);
//! - the debounce deadline.
//!
//! After every event it re-checks whether a cycle is due, and publishes a new
//! [`HistorySnapshot`].
//!
//! ## Fetch cycles
//! When the debounce fires, gaps are computed from the buffer as it is at
//! that moment and handed to a spawned task. The task walks the gaps in order
//! and sends each gap's records back; the actor merges them in arrival order.
//! The task always reports the end of the cycle, even on error or panic, so
//! `fetching` can't get stuck.
//!
//! A name or span change bumps the generation and clears the buffer. Results
//! from an older generation are dropped on arrival. A window-only change
//! trims the buffer to the new query window and forces a new cycle.

use std::sync::Arc;

use arc_swap::ArcSwap;
use chrono::{DateTime, Duration, Utc};
use history_client::HistoryProvider;
use thiserror::Error;
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
    time::Instant,
};
use tracing::{debug, info, warn};

use crate::{
    buffer::{RecordBuffer, records_within},
    clock::Clock,
    config::EngineConfig,
    debounce::{Debounce, wait_deadline},
    export::{ExportError, ExportOptions, ExportSink, project_rows},
    gap::{Gap, GapPlan, compute_gaps},
    retriever::{FetchError, GapFetch, RetrieveOptions, fetch_gap, merge_gap},
    scheduler::{FetchScheduler, HistoryInputs, InputChange},
    series::{OutputPoint, derive_series},
    snapshot::HistorySnapshot,
    window::Timing,
};

/// The engine task is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("meter history engine has shut down")]
pub struct EngineClosed;

#[derive(Debug)]
enum Command {
    Update(InputUpdate),
    Shutdown,
}

#[derive(Debug)]
enum InputUpdate {
    Name(String),
    Window {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
    Span(Duration),
    All(HistoryInputs),
}

#[derive(Debug)]
enum Internal {
    GapFetched {
        generation: u64,
        gap: Gap,
        fetch: GapFetch,
    },
    CycleDone {
        generation: u64,
        error: Option<FetchError>,
    },
}

enum Event {
    Command(Command),
    Internal(Internal),
    Due,
    DebounceFired,
    Closed,
}

/// Handle to a running engine.
///
/// Dropping the handle stops the actor once it next wakes; a fetch already
/// in flight runs to completion and its results are discarded.
pub struct MeterHistory {
    commands: mpsc::UnboundedSender<Command>,
    snapshot: Arc<ArcSwap<HistorySnapshot>>,
    version: watch::Receiver<u64>,
    task: Option<JoinHandle<()>>,
    sink: Option<Arc<dyn ExportSink>>,
    export: ExportOptions,
}

impl MeterHistory {
    /// Start the actor on the current tokio runtime.
    pub fn spawn(
        provider: Arc<dyn HistoryProvider>,
        clock: Arc<dyn Clock>,
        config: &EngineConfig,
        inputs: HistoryInputs,
    ) -> Self {
        let timing = config.timing();
        let now = clock.now();
        let fetch_period = timing.fetch_period(inputs.window.span_size);
        let snapshot = Arc::new(ArcSwap::from_pointee(HistorySnapshot::empty(
            &inputs,
            now,
            fetch_period,
        )));
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let (version_tx, version) = watch::channel(0);

        let actor = Actor {
            provider,
            clock,
            timing,
            retrieve: config.retrieve_options(),
            inputs,
            buffer: RecordBuffer::new(),
            scheduler: FetchScheduler::new(fetch_period),
            debounce: Debounce::new(config.debounce_delay()),
            due_at: None,
            generation: 0,
            completed_cycles: 0,
            failed_cycles: 0,
            series: Arc::from(Vec::new()),
            dirty: true,
            commands: command_rx,
            internal_tx,
            internal_rx,
            snapshot: Arc::clone(&snapshot),
            version: version_tx,
        };
        let task = tokio::spawn(actor.run());

        Self {
            commands,
            snapshot,
            version,
            task: Some(task),
            sink: None,
            export: ExportOptions::default(),
        }
    }

    /// Where [`MeterHistory::export_data`] delivers.
    pub fn with_sink(mut self, sink: Arc<dyn ExportSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Value column, timezone and labels for exports.
    pub fn with_export_options(mut self, export: ExportOptions) -> Self {
        self.export = export;
        self
    }

    /// Select a different meter. Clears the buffer.
    pub fn set_name(&self, name: impl Into<String>) -> Result<(), EngineClosed> {
        self.send(Command::Update(InputUpdate::Name(name.into())))
    }

    /// Move the period edges. Keeps the buffer.
    pub fn set_window(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<(), EngineClosed> {
        self.send(Command::Update(InputUpdate::Window { start, end }))
    }

    /// Change the span size. Clears the buffer.
    pub fn set_span(&self, span: Duration) -> Result<(), EngineClosed> {
        self.send(Command::Update(InputUpdate::Span(span)))
    }

    /// Replace every input at once; resets follow the strongest change.
    pub fn set_inputs(&self, inputs: HistoryInputs) -> Result<(), EngineClosed> {
        self.send(Command::Update(InputUpdate::All(inputs)))
    }

    /// Latest published state.
    pub fn snapshot(&self) -> Arc<HistorySnapshot> {
        self.snapshot.load_full()
    }

    /// Latest output series.
    pub fn series(&self) -> Arc<[OutputPoint]> {
        Arc::clone(&self.snapshot.load().series)
    }

    /// Wait for the next publish.
    pub async fn changed(&mut self) -> Result<Arc<HistorySnapshot>, EngineClosed> {
        self.version.changed().await.map_err(|_| EngineClosed)?;
        Ok(self.snapshot())
    }

    /// Wait until a published snapshot satisfies `pred`.
    pub async fn wait_until(
        &mut self,
        mut pred: impl FnMut(&HistorySnapshot) -> bool,
    ) -> Result<Arc<HistorySnapshot>, EngineClosed> {
        loop {
            let snap = self.snapshot();
            if pred(&snap) {
                return Ok(snap);
            }
            self.changed().await?;
        }
    }

    /// Project the buffered readings inside the period to CSV rows and hand
    /// them to the sink.
    ///
    /// Reads the latest snapshot only, so it never waits for or disturbs a
    /// fetch in progress. The lookback margin is never exported. Returns the
    /// number of rows written.
    pub async fn export_data(&self, file_name: &str) -> Result<usize, ExportError> {
        let sink = self.sink.as_ref().ok_or(ExportError::NoSink)?;
        let snap = self.snapshot();
        let data = project_rows(
            &snap.name,
            snap.period_records(),
            snap.window.span_size,
            &self.export,
        )?;
        sink.write(file_name, &data).await?;
        Ok(data.rows.len())
    }

    /// Stop the actor and wait for it to exit.
    pub async fn shutdown(mut self) {
        let _ = self.commands.send(Command::Shutdown);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "meter history task ended abnormally");
            }
        }
    }

    fn send(&self, cmd: Command) -> Result<(), EngineClosed> {
        self.commands.send(cmd).map_err(|_| EngineClosed)
    }
}

struct Actor {
    provider: Arc<dyn HistoryProvider>,
    clock: Arc<dyn Clock>,
    timing: Timing,
    retrieve: RetrieveOptions,
    inputs: HistoryInputs,
    buffer: RecordBuffer,
    scheduler: FetchScheduler,
    debounce: Debounce,
    due_at: Option<Instant>,
    generation: u64,
    completed_cycles: u64,
    failed_cycles: u64,
    series: Arc<[OutputPoint]>,
    dirty: bool,
    commands: mpsc::UnboundedReceiver<Command>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    internal_rx: mpsc::UnboundedReceiver<Internal>,
    snapshot: Arc<ArcSwap<HistorySnapshot>>,
    version: watch::Sender<u64>,
}

impl Actor {
    async fn run(mut self) {
        info!(name = %self.inputs.name, "meter history engine started");
        self.evaluate();
        self.publish();

        loop {
            let event = tokio::select! {
                cmd = self.commands.recv() => match cmd {
                    Some(cmd) => Event::Command(cmd),
                    None => Event::Closed,
                },
                Some(msg) = self.internal_rx.recv() => Event::Internal(msg),
                _ = wait_deadline(self.due_at) => Event::Due,
                _ = wait_deadline(self.debounce.deadline()) => Event::DebounceFired,
            };

            match event {
                Event::Command(Command::Update(update)) => self.apply(update),
                Event::Command(Command::Shutdown) | Event::Closed => break,
                Event::Internal(msg) => self.on_internal(msg),
                Event::Due => self.due_at = None,
                Event::DebounceFired => self.start_cycle(),
            }

            self.evaluate();
            self.publish();
        }

        info!(name = %self.inputs.name, "meter history engine stopped");
    }

    fn apply(&mut self, update: InputUpdate) {
        let mut next = self.inputs.clone();
        match update {
            InputUpdate::Name(name) => next.name = name,
            InputUpdate::Window { start, end } => {
                next.window.period_start = start;
                next.window.period_end = end;
            }
            InputUpdate::Span(span) => next.window.span_size = span,
            InputUpdate::All(inputs) => next = inputs,
        }

        match InputChange::classify(&self.inputs, &next) {
            InputChange::Unchanged => {}
            InputChange::Window => {
                let retain = self.timing.query_range(&next.window);
                let trimmed = self.buffer.trim_to(retain.start, retain.end);
                debug!(window = ?next.window, trimmed, "window moved");
                self.scheduler.reset();
                self.dirty = true;
            }
            InputChange::Series => {
                self.generation += 1;
                info!(
                    name = %next.name,
                    span = %shared_utils::duration::format_duration(next.window.span_size),
                    generation = self.generation,
                    "series inputs changed, clearing buffer"
                );
                self.buffer.clear();
                self.scheduler.reset();
                self.scheduler
                    .set_fetch_period(self.timing.fetch_period(next.window.span_size));
                self.dirty = true;
            }
        }
        self.inputs = next;
    }

    fn query_plan(&self) -> GapPlan {
        compute_gaps(self.timing.query_range(&self.inputs.window), &self.buffer)
    }

    /// Arm the debounce if a cycle is due, and schedule the next due check.
    fn evaluate(&mut self) {
        let now = self.clock.now();
        if self.inputs.has_name() && self.scheduler.should_fetch(now) {
            self.scheduler.mark_triggered(now);
            self.debounce.trigger(Instant::now());
            debug!(
                name = %self.inputs.name,
                delay = ?self.debounce.delay(),
                "fetch due, debouncing"
            );
        }

        self.due_at = match self.scheduler.next_due() {
            Some(due) if self.inputs.has_name() && !self.scheduler.is_fetching() => {
                let wait = (due - now).to_std().unwrap_or_default();
                Some(Instant::now() + wait)
            }
            _ => None,
        };
    }

    fn start_cycle(&mut self) {
        self.debounce.cancel();
        if self.scheduler.is_fetching() || !self.inputs.has_name() {
            return;
        }

        let plan = self.query_plan();
        if plan.is_noop() {
            debug!(name = %self.inputs.name, "buffer covers window, nothing to fetch");
            return;
        }
        debug!(name = %self.inputs.name, "gaps:\n{plan}");

        self.scheduler.begin_cycle();
        let provider = Arc::clone(&self.provider);
        let name = self.inputs.name.clone();
        let page_size = self.retrieve.page_size;
        let mut guard = CycleGuard {
            tx: self.internal_tx.clone(),
            generation: self.generation,
            error: None,
        };

        tokio::spawn(async move {
            for gap in plan.gaps {
                match fetch_gap(&*provider, &name, &gap, page_size).await {
                    Ok(fetch) => {
                        let _ = guard.tx.send(Internal::GapFetched {
                            generation: guard.generation,
                            gap,
                            fetch,
                        });
                    }
                    Err(e) => {
                        guard.error = Some(e);
                        return;
                    }
                }
            }
        });
    }

    fn on_internal(&mut self, msg: Internal) {
        match msg {
            Internal::GapFetched {
                generation,
                gap,
                fetch,
            } => {
                if generation != self.generation {
                    debug!(generation, current = self.generation, %gap, "dropping stale gap");
                    return;
                }
                let fetched = fetch.records.len();
                let merged = merge_gap(
                    &mut self.buffer,
                    gap.merge,
                    fetch.records,
                    self.retrieve.dedupe_append,
                );
                debug!(%gap, pages = fetch.pages, fetched, merged, "gap merged");
                self.dirty = true;
            }
            Internal::CycleDone { generation, error } => {
                self.scheduler.end_cycle();
                self.completed_cycles += 1;

                if let Some(e) = error {
                    self.failed_cycles += 1;
                    warn!(name = %self.inputs.name, error = %e, "acquisition failed");
                    return;
                }
                if generation != self.generation {
                    return;
                }

                let retain = self.timing.query_range(&self.inputs.window);
                let trimmed = self.buffer.trim_to(retain.start, retain.end);
                if trimmed > 0 {
                    self.dirty = true;
                }
                info!(
                    name = %self.inputs.name,
                    buffered = self.buffer.len(),
                    trimmed,
                    "acquisition complete"
                );
            }
        }
    }

    fn publish(&mut self) {
        if self.dirty {
            self.series = Arc::from(derive_series(self.buffer.as_slice(), &self.inputs.window));
        }

        let prev = self.snapshot.load();
        let records = if self.dirty {
            self.buffer.to_shared()
        } else {
            Arc::clone(&prev.records)
        };
        self.dirty = false;

        let window = self.inputs.window;
        let in_period =
            records_within(self.buffer.as_slice(), window.period_start, window.period_end);
        let snap = HistorySnapshot {
            name: self.inputs.name.clone(),
            window,
            series: Arc::clone(&self.series),
            records,
            gaps: self.query_plan(),
            fetching: self.scheduler.is_fetching(),
            last_fetch_time: self.scheduler.last_fetch_time(),
            fetch_period: self.scheduler.fetch_period(),
            now: self.clock.now(),
            first_record_time: in_period.first().map(|r| r.record_time),
            last_record_time: in_period.last().map(|r| r.record_time),
            generation: self.generation,
            completed_cycles: self.completed_cycles,
            failed_cycles: self.failed_cycles,
        };
        self.snapshot.store(Arc::new(snap));
        self.version.send_modify(|v| *v += 1);
    }
}

/// Reports the end of a fetch cycle however the task exits.
struct CycleGuard {
    tx: mpsc::UnboundedSender<Internal>,
    generation: u64,
    error: Option<FetchError>,
}

impl Drop for CycleGuard {
    fn drop(&mut self) {
        let _ = self.tx.send(Internal::CycleDone {
            generation: self.generation,
            error: self.error.take(),
        });
    }
}
