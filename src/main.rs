//! certfeed - Certificate Transparency domain feed

use anyhow::Result;
use certfeed::{app::App, cli::Cli, config::Config};
use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[cfg(unix)]
async fn terminate() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            error!("Failed to install SIGTERM handler: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await;
}

async fn shutdown_signal() {
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!("Failed to listen for Ctrl-C: {}", e);
            }
        }
        _ = terminate() => {}
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match Config::load(&cli) {
        Ok(config) => config,
        Err(err) => {
            init_tracing("error");
            error!("Failed to load configuration: {:#}", err);
            std::process::exit(1);
        }
    };
    init_tracing(&config.log_level);

    info!("certfeed starting up...");
    info!("-------------------- Configuration --------------------");
    info!("Log List URL: {}", config.directory.url);
    info!(
        "Batch Size: {} (idle {}ms, pacing {}ms, backoff {}ms, timeout {}ms)",
        config.polling.batch_size,
        config.polling.idle_interval_ms,
        config.polling.batch_interval_ms,
        config.polling.backoff_ms,
        config.polling.request_timeout_ms
    );
    info!("Dedup Window: {}s", config.deduplication.window_seconds);
    info!("Dedup Cache Size: {}", config.deduplication.cache_size);
    info!("Blocklist Entries: {}", config.filter.blocklist.len());
    info!("Listen: {}{}", config.server.listen_address, config.server.path);
    match &config.output.file {
        Some(path) => info!("Output File: {}", path.display()),
        None => info!("Output File: disabled"),
    }
    info!(
        "Metrics: {}",
        if config.metrics.enabled {
            config.metrics.listen_address.to_string()
        } else {
            "disabled".to_string()
        }
    );
    info!("-------------------------------------------------------");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let app = match App::builder(config).build(shutdown_rx).await {
        Ok(app) => app,
        Err(err) => {
            error!("Startup failed: {:#}", err);
            std::process::exit(1);
        }
    };

    let app_handle = tokio::spawn(app.run());

    shutdown_signal().await;
    info!("Shutdown signal received. Shutting down gracefully...");
    let _ = shutdown_tx.send(true);

    match app_handle.await {
        Ok(result) => result?,
        Err(e) => error!("Application task panicked: {}", e),
    }
    info!("Exiting.");
    Ok(())
}
