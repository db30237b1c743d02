//! The main application logic, decoupled from the entry point.

use crate::{
    broadcast::{BroadcastHub, ConnectionRegistry},
    config::Config,
    core::{CertificateParser, LogClient},
    ct_client::HttpLogClient,
    directory::LogDirectory,
    internal_metrics::{Metrics, MetricsBuilder},
    pipeline::Pipeline,
    poller::LogPoller,
    rate::RateMonitor,
    server::SubscriberServer,
    sink::FileSink,
    task_manager::TaskManager,
    x509::X509CertificateParser,
};
use anyhow::{Context, Result};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

/// Time tasks get to finish after the shutdown signal before they are aborted.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// A handle to the running application.
pub struct App {
    task_manager: TaskManager,
    server_addr: SocketAddr,
    metrics_addr: Option<SocketAddr>,
    registry: ConnectionRegistry,
    log_count: usize,
    grace: Duration,
}

impl App {
    /// Creates a new `AppBuilder` to construct an `App`.
    pub fn builder(config: Config) -> AppBuilder {
        AppBuilder::new(config)
    }

    /// The address the subscriber endpoint is bound to.
    pub fn server_addr(&self) -> SocketAddr {
        self.server_addr
    }

    pub fn metrics_addr(&self) -> Option<SocketAddr> {
        self.metrics_addr
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Number of logs being followed.
    pub fn log_count(&self) -> usize {
        self.log_count
    }

    /// Waits for the shutdown signal, then for every task to stop.
    pub async fn run(self) -> Result<()> {
        let mut shutdown_rx = self.task_manager.get_shutdown_rx();
        // A dropped sender counts as a shutdown request too.
        let _ = shutdown_rx.wait_for(|stop| *stop).await;
        info!("Shutdown signal received. Waiting for tasks to complete...");

        let aborted = self.task_manager.shutdown(self.grace).await;
        if !aborted.is_empty() {
            warn!(tasks = ?aborted, "Some tasks had to be aborted.");
        }
        info!("All tasks shut down.");
        Ok(())
    }
}

/// Builder for the main application.
///
/// Tests replace the collaborators that would otherwise reach the network:
/// the log clients (which also skips the log list fetch), the certificate
/// parser, and the metrics handle.
pub struct AppBuilder {
    config: Config,
    log_clients_override: Option<Vec<Arc<dyn LogClient>>>,
    parser_override: Option<Arc<dyn CertificateParser>>,
    metrics_override: Option<Metrics>,
    grace: Duration,
}

impl AppBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            log_clients_override: None,
            parser_override: None,
            metrics_override: None,
            grace: SHUTDOWN_GRACE,
        }
    }

    /// Follows these logs instead of the ones in the published log list.
    pub fn log_clients_override(mut self, clients: Vec<Arc<dyn LogClient>>) -> Self {
        self.log_clients_override = Some(clients);
        self
    }

    pub fn parser_override(mut self, parser: Arc<dyn CertificateParser>) -> Self {
        self.parser_override = Some(parser);
        self
    }

    /// Overrides the metrics system for testing.
    pub fn metrics_override(mut self, metrics: Metrics) -> Self {
        self.metrics_override = Some(metrics);
        self
    }

    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    async fn log_clients(config: &Config) -> Result<Vec<Arc<dyn LogClient>>> {
        let directory = LogDirectory::new(
            &config.directory.url,
            Duration::from_millis(config.directory.timeout_ms),
        )?;
        let urls = directory
            .fetch_usable_logs()
            .await
            .context("failed to load the CT log list")?;

        urls.iter()
            .map(|url| {
                let client = HttpLogClient::new(url, config.polling.request_timeout())
                    .with_context(|| format!("failed to create client for {}", url))?;
                Ok(Arc::new(client) as Arc<dyn LogClient>)
            })
            .collect()
    }

    /// Builds and starts every component, returning a runnable `App`.
    #[instrument(skip_all)]
    pub async fn build(self, shutdown_rx: watch::Receiver<bool>) -> Result<App> {
        let config = self.config;
        let task_manager = TaskManager::new(shutdown_rx);

        // Metrics
        let (metrics, metrics_server_info) = match self.metrics_override {
            Some(m) => (m, None),
            None => MetricsBuilder::new(config.metrics.clone()).build(&task_manager).await,
        };
        let metrics = Arc::new(metrics);
        let metrics_addr = if let Some((server, addr)) = metrics_server_info {
            info!(%addr, "Serving metrics");
            task_manager.spawn("MetricsServer", server.run());
            Some(addr)
        } else {
            None
        };

        // Collaborators
        let log_clients = match self.log_clients_override {
            Some(clients) => clients,
            None => Self::log_clients(&config).await?,
        };
        if log_clients.is_empty() {
            anyhow::bail!("no logs to follow");
        }
        let parser = self
            .parser_override
            .unwrap_or_else(|| Arc::new(X509CertificateParser));

        // Shared pipeline context
        let registry = ConnectionRegistry::new(metrics.clone());
        let (hub, dispatcher) =
            BroadcastHub::new(config.broadcast.queue_capacity, registry.clone(), metrics.clone());

        let sink = match &config.output.file {
            Some(path) => {
                let (sink, writer) =
                    FileSink::open(path, config.output.queue_capacity, metrics.clone()).await?;
                task_manager.spawn("SinkWriter", writer.run(task_manager.get_shutdown_rx()));
                Some(sink)
            }
            None => None,
        };

        let rate_monitor = RateMonitor::new(
            Duration::from_millis(config.rate.window_ms),
            hub.tap(),
            metrics.clone(),
        );
        let pipeline = Arc::new(Pipeline::from_config(&config, hub, sink, metrics.clone()));

        task_manager.spawn("Dispatcher", dispatcher.run(task_manager.get_shutdown_rx()));
        task_manager.spawn("RateMonitor", rate_monitor.run(task_manager.get_shutdown_rx()));

        // Subscriber endpoint
        let (server, server_addr) =
            SubscriberServer::bind(&config.server, registry.clone(), task_manager.get_shutdown_rx())
                .await?;
        task_manager.spawn("SubscriberServer", server.run());

        // One poller per log
        let log_count = log_clients.len();
        for client in log_clients {
            debug!(log = %client.url(), "Starting poller");
            let poller = LogPoller::new(
                client,
                parser.clone(),
                pipeline.clone(),
                config.polling.clone(),
                metrics.clone(),
            );
            task_manager.spawn("LogPoller", poller.run(task_manager.get_shutdown_rx()));
        }
        info!(logs = log_count, %server_addr, "certfeed started");

        Ok(App {
            task_manager,
            server_addr,
            metrics_addr,
            registry,
            log_count,
            grace: self.grace,
        })
    }
}
