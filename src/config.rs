//! Configuration management for certfeed
//!
//! This module defines the main `Config` struct and its sub-structs,
//! responsible for holding all application settings. It uses the `figment`
//! crate to layer compiled-in defaults, a `certfeed.toml` file, environment
//! variables and command-line flags.

use anyhow::{bail, Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, path::PathBuf, time::Duration};

use crate::cli::Cli;

/// Config file read when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "certfeed.toml";

/// The v3 log list published by Google.
pub const DEFAULT_LOG_LIST_URL: &str = "https://www.gstatic.com/ct/log_list/v3/log_list.json";

/// The main configuration struct for the application.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    /// The logging level for the application, unless `RUST_LOG` is set.
    pub log_level: String,
    /// Where the list of logs to watch comes from.
    pub directory: DirectoryConfig,
    /// Per-log polling cadence.
    pub polling: PollingConfig,
    /// Domain sanitizing rules.
    pub filter: FilterConfig,
    /// Repeat-sighting suppression.
    pub deduplication: DeduplicationConfig,
    /// The subscriber-facing WebSocket server.
    pub server: ServerConfig,
    /// The broadcast intake queue.
    pub broadcast: BroadcastConfig,
    /// The rate monitor.
    pub rate: RateConfig,
    /// Optional append-only domain file.
    pub output: OutputConfig,
    /// Prometheus exporter.
    pub metrics: MetricsConfig,
}

/// Configuration for the log directory fetch.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DirectoryConfig {
    /// URL of the JSON log list.
    pub url: String,
    /// Deadline for fetching the log list, in milliseconds.
    pub timeout_ms: u64,
}

/// Configuration for the per-log pollers.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PollingConfig {
    /// Maximum number of entries requested per `get-entries` call.
    pub batch_size: u64,
    /// Sleep when a log has no new entries.
    pub idle_interval_ms: u64,
    /// Pause between two consecutive batches.
    pub batch_interval_ms: u64,
    /// Sleep after a failed fetch before retrying the same range.
    pub backoff_ms: u64,
    /// Deadline for any single request against a log.
    pub request_timeout_ms: u64,
}

impl PollingConfig {
    pub fn idle_interval(&self) -> Duration {
        Duration::from_millis(self.idle_interval_ms)
    }

    pub fn batch_interval(&self) -> Duration {
        Duration::from_millis(self.batch_interval_ms)
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Configuration for domain sanitizing.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct FilterConfig {
    /// Normalized domains shorter than this are rejected.
    pub min_length: usize,
    /// Substrings of infrastructure hostnames that are never reported.
    pub blocklist: Vec<String>,
}

/// Configuration for domain deduplication.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DeduplicationConfig {
    /// Repeat sightings within this many seconds are suppressed.
    pub window_seconds: u64,
    /// Upper bound on the number of remembered domains.
    pub cache_size: u64,
}

/// Configuration for the WebSocket server.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    /// The address the server binds to.
    pub listen_address: SocketAddr,
    /// The path that upgrades to a WebSocket.
    pub path: String,
    /// Outbound messages buffered per subscriber before it is dropped as too slow.
    pub subscriber_buffer: usize,
}

/// Configuration for the broadcast intake.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct BroadcastConfig {
    /// Events held before the oldest are dropped. Must be a power of two,
    /// which is the only size the intake channel allocates exactly.
    pub queue_capacity: usize,
}

/// Configuration for the rate monitor.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RateConfig {
    /// Width of a counting window in milliseconds.
    pub window_ms: u64,
}

/// Configuration for the persistence sink.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct OutputConfig {
    /// Append every new domain to this file when set.
    pub file: Option<PathBuf>,
    /// Domains buffered for the file writer before new ones are dropped.
    pub queue_capacity: usize,
}

/// Configuration for the metrics system.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct MetricsConfig {
    /// Serve Prometheus metrics.
    pub enabled: bool,
    /// The address the metrics server binds to.
    pub listen_address: SocketAddr,
    /// Collect process CPU and memory usage.
    pub system_metrics_enabled: bool,
}

impl Config {
    /// Loads the application configuration by layering defaults, the TOML
    /// file, `CERTFEED_` environment variables and the command line.
    pub fn load(cli: &Cli) -> Result<Self> {
        let config_path = cli
            .config
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_path))
            // Nested keys use a double underscore, e.g. CERTFEED_SERVER__PATH=/feed
            .merge(Env::prefixed("CERTFEED_").split("__"))
            .merge(cli.clone())
            .extract()
            .with_context(|| format!("invalid configuration (file: {})", config_path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects settings that would stall or disable the pipeline.
    pub fn validate(&self) -> Result<()> {
        if self.polling.batch_size == 0 {
            bail!("polling.batch_size must be greater than zero");
        }
        if self.deduplication.window_seconds == 0 {
            bail!("deduplication.window_seconds must be greater than zero");
        }
        if !self.broadcast.queue_capacity.is_power_of_two() {
            bail!(
                "broadcast.queue_capacity must be a power of two, got {}",
                self.broadcast.queue_capacity
            );
        }
        if self.server.subscriber_buffer == 0 {
            bail!("server.subscriber_buffer must be greater than zero");
        }
        if self.output.queue_capacity == 0 {
            bail!("output.queue_capacity must be greater than zero");
        }
        if self.rate.window_ms == 0 {
            bail!("rate.window_ms must be greater than zero");
        }
        if !self.server.path.starts_with('/') {
            bail!("server.path must start with '/', got {:?}", self.server.path);
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            directory: DirectoryConfig {
                url: DEFAULT_LOG_LIST_URL.to_string(),
                timeout_ms: 10_000,
            },
            polling: PollingConfig {
                batch_size: 100,
                idle_interval_ms: 1_000,
                batch_interval_ms: 100,
                backoff_ms: 2_000,
                request_timeout_ms: 15_000,
            },
            filter: FilterConfig {
                min_length: 4,
                blocklist: [
                    "cloudfront",
                    "amazonaws.com",
                    "googleusercontent.com",
                    "gvt1.com",
                    "akadns.net",
                    "windows.net",
                    "azureedge.net",
                ]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            },
            deduplication: DeduplicationConfig {
                window_seconds: 300,
                cache_size: 1_000_000,
            },
            server: ServerConfig {
                listen_address: SocketAddr::from(([0, 0, 0, 0], 8080)),
                path: "/ws".to_string(),
                subscriber_buffer: 256,
            },
            broadcast: BroadcastConfig {
                queue_capacity: 4096,
            },
            rate: RateConfig { window_ms: 1_000 },
            output: OutputConfig {
                file: None,
                queue_capacity: 10_000,
            },
            metrics: MetricsConfig {
                enabled: false,
                listen_address: SocketAddr::from(([127, 0, 0, 1], 9090)),
                system_metrics_enabled: false,
            },
        }
    }
}
