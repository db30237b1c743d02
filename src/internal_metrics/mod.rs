//! # Internal Metrics Module
//!
//! This module provides the infrastructure for collecting and exposing
//! pipeline metrics.
//!
//! ## Components:
//!
//! - **`MetricsBuilder`**: The entry point for initializing the metrics system.
//!   It installs the Prometheus recorder, binds the metrics listener, and
//!   constructs the `Metrics` handle.
//!
//! - **`Metrics`**: A lightweight, cloneable struct that serves as the public
//!   API for the rest of the application. It holds handles to the hot-path
//!   counters and helpers for the labelled ones.
//!
//! - **`MetricsServer`**: (Defined in `server.rs`) An `axum`-based web server
//!   that exposes the `/metrics` endpoint for Prometheus to scrape.
//!
//! - **`SystemCollector`**: (Defined in `system.rs`) A background task that
//!   periodically records process CPU and memory usage.

use crate::config::MetricsConfig;
use crate::internal_metrics::server::MetricsServer;
use crate::internal_metrics::system::SystemCollector;
use crate::task_manager::TaskManager;
use metrics::{Counter, Histogram, Unit};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::error;

pub mod server;
pub mod system;

/// The public API for the metrics system.
///
/// This struct holds cloneable handles to the metrics collectors.
#[derive(Clone)]
pub struct Metrics {
    pub entries_fetched_total: Counter,
    pub certificates_unparseable_total: Counter,
    pub domains_deduplicated_total: Counter,
    pub events_published_total: Counter,
    pub broadcast_intake_dropped_total: Counter,
    pub subscriber_delivery_failures_total: Counter,
    pub sink_write_failures_total: Counter,
    pub fetch_duration_seconds: Histogram,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics").finish_non_exhaustive()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    /// Creates a new `Metrics` instance and registers descriptions for all
    /// supported metrics with the global recorder.
    pub fn new() -> Self {
        metrics::describe_counter!("ct_entries_fetched_total", Unit::Count, "Total number of log entries fetched across all logs.");
        metrics::describe_counter!("ct_fetch_errors_total", Unit::Count, "Failed size or entry fetches, labelled by kind.");
        metrics::describe_counter!("ct_certificates_unparseable_total", Unit::Count, "Entries skipped because no certificate could be parsed.");
        metrics::describe_counter!("domains_rejected_total", Unit::Count, "Candidate domains rejected by the sanitizer, labelled by reason.");
        metrics::describe_counter!("domains_deduplicated_total", Unit::Count, "Sightings suppressed by the deduplication window.");
        metrics::describe_counter!("events_published_total", Unit::Count, "Events handed to the broadcast intake.");
        metrics::describe_counter!("broadcast_intake_dropped_total", Unit::Count, "Events dropped from the intake because dispatch fell behind.");
        metrics::describe_counter!("subscriber_delivery_failures_total", Unit::Count, "Deliveries that failed and removed a subscriber.");
        metrics::describe_counter!("sink_write_failures_total", Unit::Count, "Domains that could not be appended to the output file.");
        metrics::describe_gauge!("subscribers_connected", Unit::Count, "The number of currently registered subscribers.");
        metrics::describe_gauge!("dedup_cache_entries", Unit::Count, "The approximate number of domains remembered by the deduplicator.");
        metrics::describe_gauge!("domains_per_second", Unit::Count, "Events seen by the rate monitor in the last window.");
        metrics::describe_gauge!("ct_log_cursor", Unit::Count, "Next index to be read, per log.");
        metrics::describe_histogram!("ct_fetch_duration_seconds", Unit::Seconds, "Latency of get-entries calls.");
        metrics::describe_gauge!("process_cpu_usage_percent", Unit::Percent, "The percentage of CPU time the process is currently using.");
        metrics::describe_gauge!("process_memory_usage_bytes", Unit::Bytes, "The resident set size of the process, in bytes.");

        Self {
            entries_fetched_total: metrics::counter!("ct_entries_fetched_total"),
            certificates_unparseable_total: metrics::counter!("ct_certificates_unparseable_total"),
            domains_deduplicated_total: metrics::counter!("domains_deduplicated_total"),
            events_published_total: metrics::counter!("events_published_total"),
            broadcast_intake_dropped_total: metrics::counter!("broadcast_intake_dropped_total"),
            subscriber_delivery_failures_total: metrics::counter!("subscriber_delivery_failures_total"),
            sink_write_failures_total: metrics::counter!("sink_write_failures_total"),
            fetch_duration_seconds: metrics::histogram!("ct_fetch_duration_seconds"),
        }
    }

    /// Creates a `Metrics` instance that performs no operations.
    /// Used when metrics are disabled in the configuration.
    pub fn disabled() -> Self {
        Self {
            entries_fetched_total: Counter::noop(),
            certificates_unparseable_total: Counter::noop(),
            domains_deduplicated_total: Counter::noop(),
            events_published_total: Counter::noop(),
            broadcast_intake_dropped_total: Counter::noop(),
            subscriber_delivery_failures_total: Counter::noop(),
            sink_write_failures_total: Counter::noop(),
            fetch_duration_seconds: Histogram::noop(),
        }
    }

    /// Increments the fetch error counter for one kind of request.
    pub fn increment_fetch_error(&self, kind: &'static str) {
        metrics::counter!("ct_fetch_errors_total", "kind" => kind).increment(1);
    }

    /// Increments the sanitizer rejection counter for one reason.
    pub fn increment_rejected(&self, reason: &'static str) {
        metrics::counter!("domains_rejected_total", "reason" => reason).increment(1);
    }

    /// Sets the gauge for the number of connected subscribers.
    pub fn set_subscribers_connected(&self, count: usize) {
        metrics::gauge!("subscribers_connected").set(count as f64);
    }

    pub fn set_domains_per_second(&self, rate: f64) {
        metrics::gauge!("domains_per_second").set(rate);
    }

    /// Sets the per-log cursor gauge.
    pub fn set_log_cursor(&self, log: &str, cursor: u64) {
        metrics::gauge!("ct_log_cursor", "log" => log.to_string()).set(cursor as f64);
    }

    /// Creates a `Metrics` instance suitable for testing.
    ///
    /// No recorder is installed in tests, so every handle is a no-op.
    pub fn new_for_test() -> Self {
        Self::new()
    }
}

/// Builder for the metrics system.
///
/// This builder is responsible for installing the `PrometheusRecorder`,
/// binding the `MetricsServer`, and creating the `Metrics` handle.
pub struct MetricsBuilder {
    config: MetricsConfig,
}

impl MetricsBuilder {
    /// Creates a new `MetricsBuilder` with the given configuration.
    pub fn new(config: MetricsConfig) -> Self {
        Self { config }
    }

    /// Initializes the metrics system and returns a `Metrics` handle and an
    /// optional `MetricsServer` with its bound address.
    ///
    /// Metrics are never fatal: if the exporter cannot be set up, the error is
    /// logged and a disabled `Metrics` instance is returned.
    pub async fn build(self, task_manager: &TaskManager) -> (Metrics, Option<(MetricsServer, SocketAddr)>) {
        if !self.config.enabled {
            return (Metrics::disabled(), None);
        }

        let builder = match PrometheusBuilder::new().set_buckets_for_metric(
            Matcher::Suffix("duration_seconds".to_string()),
            &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0],
        ) {
            Ok(builder) => builder,
            Err(e) => {
                error!("Failed to configure Prometheus buckets: {}", e);
                return (Metrics::disabled(), None);
            }
        };
        let recorder = builder.build_recorder();
        let handle = recorder.handle();

        // A port clash must not leave a recorder installed.
        let listener = match TcpListener::bind(self.config.listen_address).await {
            Ok(listener) => listener,
            Err(e) => {
                error!(
                    "Failed to bind metrics server to {}: {}",
                    self.config.listen_address, e
                );
                return (Metrics::disabled(), None);
            }
        };

        let addr = match listener.local_addr() {
            Ok(addr) => addr,
            Err(e) => {
                error!("Failed to get local address for metrics server: {}", e);
                return (Metrics::disabled(), None);
            }
        };

        if let Err(e) = metrics::set_global_recorder(recorder) {
            error!("Failed to install Prometheus recorder: {}", e);
            return (Metrics::disabled(), None);
        }

        let metrics = Metrics::new();
        let server = MetricsServer::new(listener, handle, task_manager.get_shutdown_rx());

        if self.config.system_metrics_enabled {
            let collector = SystemCollector::new();
            task_manager.spawn("SystemCollector", collector.run(task_manager.get_shutdown_rx()));
        }

        (metrics, Some((server, addr)))
    }
}
