//! Best-effort append of new domains to a file.

use crate::internal_metrics::Metrics;
use anyhow::{Context, Result};
use async_channel::{Receiver, Sender, TrySendError};
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::{
    fs::{self, File, OpenOptions},
    io::AsyncWriteExt,
    sync::watch,
};
use tracing::{debug, error, info, warn};

/// The hot-path handle: hands domains to the writer without waiting.
#[derive(Debug, Clone)]
pub struct FileSink {
    tx: Sender<String>,
    metrics: Arc<Metrics>,
}

/// Owns the file and appends whatever the sink queues.
pub struct SinkWriter {
    path: PathBuf,
    file: File,
    rx: Receiver<String>,
    metrics: Arc<Metrics>,
}

impl FileSink {
    /// Opens `path` for appending, creating it and its parent directory if
    /// needed.
    pub async fn open(
        path: &Path,
        capacity: usize,
        metrics: Arc<Metrics>,
    ) -> Result<(Self, SinkWriter)> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .with_context(|| format!("failed to open output file {}", path.display()))?;
        info!(path = %path.display(), "Appending new domains to file.");

        let (tx, rx) = async_channel::bounded(capacity);
        let writer = SinkWriter {
            path: path.to_path_buf(),
            file,
            rx,
            metrics: metrics.clone(),
        };
        Ok((Self { tx, metrics }, writer))
    }

    /// Queues `domain` for writing. Drops it if the writer is behind.
    pub fn submit(&self, domain: &str) {
        match self.tx.try_send(domain.to_string()) {
            Ok(()) => {}
            Err(TrySendError::Full(domain)) => {
                self.metrics.sink_write_failures_total.increment(1);
                warn!(%domain, "Output queue is full; domain not written.");
            }
            Err(TrySendError::Closed(_)) => debug!("Output writer has stopped."),
        }
    }
}

impl SinkWriter {
    async fn append(&mut self, domain: &str) {
        let line = format!("{}\n", domain);
        let result = match self.file.write_all(line.as_bytes()).await {
            Ok(()) => self.file.flush().await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            self.metrics.sink_write_failures_total.increment(1);
            error!(path = %self.path.display(), %domain, "Failed to append domain: {}", e);
        }
    }

    /// Appends queued domains until shutdown, then writes what is already
    /// queued and stops.
    pub async fn run(mut self, mut shutdown_rx: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.changed() => break,
                received = self.rx.recv() => match received {
                    Ok(domain) => self.append(&domain).await,
                    Err(_) => break,
                },
            }
        }
        let mut drained = 0usize;
        while let Ok(domain) = self.rx.try_recv() {
            self.append(&domain).await;
            drained += 1;
        }
        info!(drained, "Output writer stopped.");
    }
}
