#![allow(dead_code)]
//! Test helpers for running the full application instance.

use anyhow::Result;
use certfeed::{
    app::AppBuilder,
    broadcast::ConnectionRegistry,
    config::Config,
    core::{CertificateParser, LogClient},
    internal_metrics::Metrics,
};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::{sync::watch, task::JoinHandle, time::timeout};

use super::fake_log::NameParser;

/// A running instance of the application.
pub struct TestApp {
    pub shutdown_tx: watch::Sender<bool>,
    pub app_handle: Option<JoinHandle<Result<()>>>,
    pub server_addr: SocketAddr,
    pub metrics_addr: Option<SocketAddr>,
    pub log_count: usize,
    pub registry: ConnectionRegistry,
}

impl TestApp {
    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.server_addr)
    }

    /// Waits until exactly `count` subscribers are registered.
    pub async fn wait_for_subscribers(&self, count: usize) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while self.registry.len() != count {
            if tokio::time::Instant::now() > deadline {
                panic!(
                    "expected {} subscribers, found {}",
                    count,
                    self.registry.len()
                );
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Shuts down the application and waits for it to terminate.
    pub async fn shutdown(self, timeout_duration: Duration) -> Result<()> {
        self.shutdown_tx.send(true)?;
        if let Some(handle) = self.app_handle {
            match timeout(timeout_duration, handle).await {
                Ok(Ok(result)) => result,
                Ok(Err(e)) => Err(e.into()),
                Err(_) => Err(anyhow::anyhow!("App failed to shut down within the timeout")),
            }
        } else {
            Ok(())
        }
    }
}

/// Builds a `TestApp` with fast polling and an ephemeral port.
pub struct TestAppBuilder {
    pub config: Config,
    log_clients: Vec<Arc<dyn LogClient>>,
    parser: Arc<dyn CertificateParser>,
    metrics: Option<Metrics>,
}

impl TestAppBuilder {
    pub fn new() -> Self {
        let mut config = Config::default();
        config.server.listen_address = "127.0.0.1:0".parse().unwrap();
        config.polling.idle_interval_ms = 20;
        config.polling.batch_interval_ms = 5;
        config.polling.backoff_ms = 20;
        config.polling.request_timeout_ms = 1_000;
        Self {
            config,
            log_clients: Vec::new(),
            parser: Arc::new(NameParser),
            metrics: Some(Metrics::disabled()),
        }
    }

    pub fn with_log(mut self, client: Arc<dyn LogClient>) -> Self {
        self.log_clients.push(client);
        self
    }

    pub fn with_parser(mut self, parser: Arc<dyn CertificateParser>) -> Self {
        self.parser = parser;
        self
    }

    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Builds metrics from the config instead of injecting a disabled handle.
    pub fn with_exporter(mut self) -> Self {
        self.metrics = None;
        self
    }

    pub fn with_config_modifier(mut self, modifier: impl FnOnce(&mut Config)) -> Self {
        modifier(&mut self.config);
        self
    }

    /// Builds the app and spawns its run loop.
    pub async fn start(self) -> Result<TestApp> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut builder = AppBuilder::new(self.config)
            .parser_override(self.parser)
            .shutdown_grace(Duration::from_secs(2));
        if !self.log_clients.is_empty() {
            builder = builder.log_clients_override(self.log_clients);
        }
        if let Some(metrics) = self.metrics {
            builder = builder.metrics_override(metrics);
        }

        let app = builder.build(shutdown_rx).await?;
        let server_addr = app.server_addr();
        let metrics_addr = app.metrics_addr();
        let log_count = app.log_count();
        let registry = app.registry().clone();
        let app_handle = tokio::spawn(app.run());

        Ok(TestApp {
            shutdown_tx,
            app_handle: Some(app_handle),
            server_addr,
            metrics_addr,
            log_count,
            registry,
        })
    }
}

impl Default for TestAppBuilder {
    fn default() -> Self {
        Self::new()
    }
}
