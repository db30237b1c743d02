//! Windowed event-rate observation on the broadcast intake.

use crate::{core::Payload, internal_metrics::Metrics};
use std::{sync::Arc, time::Duration};
use tokio::{
    sync::{broadcast::{self, error::RecvError}, mpsc, watch},
    time::{self, Instant, MissedTickBehavior},
};
use tracing::{debug, info};

/// A fixed-width counting window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateWindow {
    pub started: Instant,
    pub count: u64,
}

impl RateWindow {
    pub fn new(started: Instant) -> Self {
        Self { started, count: 0 }
    }

    pub fn record(&mut self, events: u64) {
        self.count += events;
    }

    /// Closes the window at `now` and returns its count.
    pub fn roll(&mut self, now: Instant) -> u64 {
        let count = self.count;
        *self = Self::new(now);
        count
    }
}

/// Counts events per window and reports each closed window.
pub struct RateMonitor {
    window: Duration,
    tap: broadcast::Receiver<Payload>,
    metrics: Arc<Metrics>,
    reports: Option<mpsc::Sender<u64>>,
}

impl RateMonitor {
    pub fn new(window: Duration, tap: broadcast::Receiver<Payload>, metrics: Arc<Metrics>) -> Self {
        Self {
            window,
            tap,
            metrics,
            reports: None,
        }
    }

    /// Also sends every closed window's count to `reports`. A full or closed
    /// channel loses the report.
    pub fn with_reports(mut self, reports: mpsc::Sender<u64>) -> Self {
        self.reports = Some(reports);
        self
    }

    fn report(&self, count: u64) {
        self.metrics
            .set_domains_per_second(count as f64 / self.window.as_secs_f64());
        debug!(count, window_ms = self.window.as_millis() as u64, "Rate window closed");
        if let Some(reports) = &self.reports {
            let _ = reports.try_send(count);
        }
    }

    pub async fn run(mut self, mut shutdown_rx: watch::Receiver<bool>) {
        let start = Instant::now();
        let mut ticker = time::interval_at(start + self.window, self.window);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut current = RateWindow::new(start);
        info!("Rate monitor started.");

        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.changed() => {
                    info!("Rate monitor received shutdown signal.");
                    break;
                }
                now = ticker.tick() => {
                    let count = current.roll(now);
                    self.report(count);
                }
                received = self.tap.recv() => match received {
                    Ok(_) => current.record(1),
                    // Lost events still happened.
                    Err(RecvError::Lagged(missed)) => current.record(missed),
                    Err(RecvError::Closed) => {
                        info!("Intake closed; rate monitor stopping.");
                        break;
                    }
                },
            }
        }
    }
}
