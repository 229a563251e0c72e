use crate::api::ControlApi;
use crate::error::ClientError;
use bpfdeck_core::{StreamHistory, StreamKind, Visualizer, DEFAULT_CHART_WINDOW};
use bpfdeck_storage::StreamStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

pub const DEFAULT_POLL_INTERVAL_MS: u64 = 2000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncConfig {
    pub poll_interval: Duration,
    pub chart_window: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            chart_window: DEFAULT_CHART_WINDOW,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Stopped,
    Running,
}

/// One fetched batch, tagged with the polling run that produced it.
#[derive(Debug)]
pub struct PollTick {
    pub stream: StreamKind,
    pub generation: u64,
    pub result: Result<Vec<String>, ClientError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Merged { added: usize, total: usize },
    Unchanged,
    Skipped,
    Discarded,
}

/// Keeps the local, persisted, charted history of one server stream.
pub struct StreamSynchronizer {
    stream: StreamKind,
    api: Arc<dyn ControlApi>,
    store: Arc<dyn StreamStore>,
    config: SyncConfig,
    history: StreamHistory,
    visualizer: Visualizer,
    generation: u64,
    cancel: Option<watch::Sender<bool>>,
}

impl StreamSynchronizer {
    /// Restores the persisted history for `stream` before any polling.
    pub fn new(
        stream: StreamKind,
        api: Arc<dyn ControlApi>,
        store: Arc<dyn StreamStore>,
        config: SyncConfig,
    ) -> Self {
        let history = StreamHistory::from_entries(store.get(stream.storage_key()));
        if !history.is_empty() {
            info!(%stream, entries = history.len(), "history_restored");
        }
        Self {
            stream,
            api,
            store,
            config,
            history,
            visualizer: Visualizer::new(stream.title(), config.chart_window),
            generation: 0,
            cancel: None,
        }
    }

    pub fn stream(&self) -> StreamKind {
        self.stream
    }

    pub fn state(&self) -> PollState {
        if self.cancel.is_some() {
            PollState::Running
        } else {
            PollState::Stopped
        }
    }

    pub fn is_running(&self) -> bool {
        self.state() == PollState::Running
    }

    pub fn history(&self) -> &StreamHistory {
        &self.history
    }

    pub fn visualizer(&self) -> &Visualizer {
        &self.visualizer
    }

    /// Adds the current count as first chart sample when the chart is opened late.
    pub fn seed_chart(&mut self) {
        self.visualizer.seed(self.history.len());
    }

    /// Lines in display order for this stream.
    pub fn rendered_lines(&self) -> Vec<&str> {
        if self.stream.newest_first() {
            self.history.newest_first().collect()
        } else {
            self.history.entries().iter().map(String::as_str).collect()
        }
    }

    /// Spawns the poll loop; batches arrive on `ticks`. Returns `false` if already running.
    pub fn start(&mut self, ticks: mpsc::Sender<PollTick>) -> bool {
        if self.cancel.is_some() {
            return false;
        }
        self.generation += 1;
        let (cancel_tx, cancel_rx) = watch::channel(false);
        self.cancel = Some(cancel_tx);
        tokio::spawn(run_poll_loop(
            self.stream,
            self.generation,
            self.api.clone(),
            self.config.poll_interval,
            ticks,
            cancel_rx,
        ));
        info!(stream = %self.stream, generation = self.generation, "polling_started");
        true
    }

    /// Cancels the poll loop. Returns `false` if it was not running.
    pub fn stop(&mut self) -> bool {
        let Some(cancel) = self.cancel.take() else {
            return false;
        };
        let _ = cancel.send(true);
        info!(stream = %self.stream, generation = self.generation, "polling_stopped");
        true
    }

    /// Applies a batch from the poll loop; results from a stopped run are dropped.
    pub fn apply(&mut self, tick: PollTick) -> TickOutcome {
        if tick.stream != self.stream || !self.is_running() || tick.generation != self.generation
        {
            debug!(
                stream = %self.stream,
                tick_generation = tick.generation,
                generation = self.generation,
                "late_poll_result_discarded"
            );
            return TickOutcome::Discarded;
        }
        self.absorb(tick.result)
    }

    /// Fetches and applies one batch directly, outside the poll loop.
    pub async fn poll_once(&mut self) -> TickOutcome {
        let result = self.api.stream_batch(self.stream).await;
        self.absorb(result)
    }

    fn absorb(&mut self, result: Result<Vec<String>, ClientError>) -> TickOutcome {
        let batch = match result {
            Ok(batch) => batch,
            Err(err) => {
                warn!(stream = %self.stream, "poll_tick_skipped: {err}");
                return TickOutcome::Skipped;
            }
        };
        if batch.is_empty() {
            return TickOutcome::Unchanged;
        }

        let added = self.history.merge_batch(&batch);
        if let Err(err) = self
            .store
            .put(self.stream.storage_key(), self.history.entries())
        {
            warn!(stream = %self.stream, "history_persist_failed: {err}");
        }
        self.visualizer.update(self.history.len());
        debug!(
            stream = %self.stream,
            batch = batch.len(),
            added,
            total = self.history.len(),
            "poll_tick_merged"
        );
        if added == 0 {
            TickOutcome::Unchanged
        } else {
            TickOutcome::Merged {
                added,
                total: self.history.len(),
            }
        }
    }
}

impl Drop for StreamSynchronizer {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_poll_loop(
    stream: StreamKind,
    generation: u64,
    api: Arc<dyn ControlApi>,
    interval: Duration,
    ticks: mpsc::Sender<PollTick>,
    mut cancel: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.changed() => break,
            _ = ticker.tick() => {}
        }
        let result = api.stream_batch(stream).await;
        if *cancel.borrow() {
            break;
        }
        let tick = PollTick {
            stream,
            generation,
            result,
        };
        if ticks.send(tick).await.is_err() {
            break;
        }
    }
    debug!(%stream, generation, "poll_loop_exited");
}
