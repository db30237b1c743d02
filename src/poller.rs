//! Per-log polling with a monotonic cursor.
//!
//! A [`LogPoller`] starts at the log's size at first contact, then follows the
//! growing frontier in bounded batches. The cursor only moves after a batch
//! has been fetched and every certificate in it handed to the [`Pipeline`], so
//! a failed fetch is retried over the identical range and coverage has no
//! gaps. Each poller is independent: its failures only ever delay itself.

use crate::{
    config::PollingConfig,
    core::{CertificateParser, LogClient, RawEntry},
    ct_client::LogClientError,
    internal_metrics::Metrics,
    pipeline::Pipeline,
};
use std::{fmt, future::Future, sync::Arc, time::Duration};
use tokio::{sync::watch, time::Instant};
use tracing::{debug, error, info, instrument, warn};

/// Lifecycle of one log source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// The starting size has not been learned yet.
    Initializing,
    Polling,
    /// The last fetch failed; the next one retries it.
    Backoff,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunState::Initializing => "initializing",
            RunState::Polling => "polling",
            RunState::Backoff => "backoff",
        };
        f.write_str(name)
    }
}

/// Result of one poll iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// The cursor was set to the log's current size.
    Initialized { cursor: u64 },
    /// Nothing new.
    Idle { cursor: u64, size: u64 },
    /// Entries `[from, to)` were processed.
    Advanced { from: u64, to: u64 },
    Failed,
}

pub struct LogPoller {
    client: Arc<dyn LogClient>,
    parser: Arc<dyn CertificateParser>,
    pipeline: Arc<Pipeline>,
    config: PollingConfig,
    metrics: Arc<Metrics>,
    cursor: Option<u64>,
    size: u64,
    state: RunState,
}

impl LogPoller {
    pub fn new(
        client: Arc<dyn LogClient>,
        parser: Arc<dyn CertificateParser>,
        pipeline: Arc<Pipeline>,
        config: PollingConfig,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            client,
            parser,
            pipeline,
            config,
            metrics,
            cursor: None,
            size: 0,
            state: RunState::Initializing,
        }
    }

    /// The next index to read, once initialized.
    pub fn cursor(&self) -> Option<u64> {
        self.cursor
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    fn set_state(&mut self, state: RunState) {
        if self.state != state {
            info!(log = %self.client.url(), from = %self.state, to = %state, "Log state changed");
            self.state = state;
        }
    }

    async fn with_deadline<T>(
        &self,
        call: impl Future<Output = Result<T, LogClientError>>,
    ) -> Result<T, LogClientError> {
        let deadline = self.config.request_timeout();
        match tokio::time::timeout(deadline, call).await {
            Ok(result) => result,
            Err(_) => Err(LogClientError::Timeout(deadline)),
        }
    }

    fn fail(&mut self, kind: &'static str, error: LogClientError) -> Step {
        self.metrics.increment_fetch_error(kind);
        error!(log = %self.client.url(), cursor = ?self.cursor, kind, "Fetch failed: {}", error);
        self.set_state(RunState::Backoff);
        Step::Failed
    }

    async fn fetch_size(&mut self) -> Result<u64, Step> {
        let client = self.client.clone();
        match self.with_deadline(client.current_size()).await {
            Ok(size) => Ok(size),
            Err(e) => Err(self.fail("size", e)),
        }
    }

    /// Runs one iteration: learn the starting point, or read the next batch.
    pub async fn poll_once(&mut self) -> Step {
        let size = match self.fetch_size().await {
            Ok(size) => size,
            Err(step) => return step,
        };

        let Some(cursor) = self.cursor else {
            self.cursor = Some(size);
            self.size = size;
            self.metrics.set_log_cursor(self.client.url(), size);
            self.set_state(RunState::Polling);
            info!(log = %self.client.url(), cursor = size, "Following log from its current size");
            return Step::Initialized { cursor: size };
        };

        if size < self.size {
            warn!(log = %self.client.url(), previous = self.size, size, "Log reported a smaller size; ignoring");
            self.set_state(RunState::Polling);
            return Step::Idle { cursor, size: self.size };
        }
        self.size = size;

        if cursor >= size {
            self.set_state(RunState::Polling);
            return Step::Idle { cursor, size };
        }

        let end = size.min(cursor.saturating_add(self.config.batch_size));
        let client = self.client.clone();
        let started = Instant::now();
        let entries = match self.with_deadline(client.entries(cursor, end)).await {
            Ok(entries) if entries.is_empty() => {
                return self.fail("entries", LogClientError::EmptyBatch { start: cursor, end })
            }
            Ok(entries) => entries,
            Err(e) => return self.fail("entries", e),
        };
        self.metrics
            .fetch_duration_seconds
            .record(started.elapsed().as_secs_f64());

        let wanted = (end - cursor) as usize;
        if entries.len() > wanted {
            warn!(log = %self.client.url(), wanted, got = entries.len(), "Log returned more entries than asked for; extra ignored");
        }
        let count = entries.len().min(wanted);
        for (offset, entry) in entries.iter().take(count).enumerate() {
            self.handle_entry(cursor + offset as u64, entry).await;
        }

        let to = cursor + count as u64;
        self.cursor = Some(to);
        self.metrics.entries_fetched_total.increment(count as u64);
        self.metrics.set_log_cursor(self.client.url(), to);
        self.set_state(RunState::Polling);
        debug!(log = %self.client.url(), from = cursor, to, size, "Batch processed");
        Step::Advanced { from: cursor, to }
    }

    async fn handle_entry(&self, index: u64, entry: &RawEntry) {
        let Some(der) = entry.certificate() else {
            self.metrics.certificates_unparseable_total.increment(1);
            debug!(log = %self.client.url(), index, "Entry carries no certificate");
            return;
        };
        match self.parser.parse(der) {
            Ok(cert) => {
                self.pipeline.process_certificate(&cert).await;
            }
            Err(e) => {
                self.metrics.certificates_unparseable_total.increment(1);
                debug!(log = %self.client.url(), index, "Skipping unparseable certificate: {}", e);
            }
        }
    }

    fn pause_after(&self, step: Step) -> Duration {
        match step {
            // Nothing can be new right after first contact, so it waits like an idle poll.
            Step::Initialized { .. } | Step::Idle { .. } => self.config.idle_interval(),
            Step::Advanced { .. } => self.config.batch_interval(),
            Step::Failed => self.config.backoff(),
        }
    }

    /// Polls until shutdown. Shutdown is observed during fetches as well as
    /// during sleeps.
    #[instrument(name = "poller", skip_all, fields(log = %self.client.url()))]
    pub async fn run(mut self, mut shutdown_rx: watch::Receiver<bool>) {
        info!("Poller started.");
        loop {
            let step = tokio::select! {
                biased;
                _ = shutdown_rx.changed() => break,
                step = self.poll_once() => step,
            };
            let pause = self.pause_after(step);
            tokio::select! {
                biased;
                _ = shutdown_rx.changed() => break,
                _ = tokio::time::sleep(pause) => {}
            }
        }
        info!(cursor = ?self.cursor, "Poller stopped.");
    }
}
