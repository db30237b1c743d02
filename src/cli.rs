//! Command-Line Interface (CLI) argument parsing.
//!
//! This module defines the command-line arguments for the application using the
//! `clap` crate. These arguments are parsed at startup and then merged on top
//! of the `certfeed.toml` file and environment variables.

use clap::Parser;
use figment::{
    value::{Dict, Map, Value},
    Error, Metadata, Profile, Provider,
};
use std::{net::SocketAddr, path::PathBuf};

/// Streams newly issued domain names from Certificate Transparency logs to
/// WebSocket subscribers.
#[derive(Parser, Debug, Clone, Default)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Address the WebSocket server listens on.
    #[arg(short, long, value_name = "ADDR")]
    pub listen: Option<SocketAddr>,

    /// Deduplication window duration in seconds.
    #[arg(long, value_name = "SECONDS")]
    pub dedup_window: Option<u64>,

    /// URL of the CT log list to watch.
    #[arg(long, value_name = "URL")]
    pub log_list_url: Option<String>,

    /// Append every new domain to this file.
    #[arg(short, long, value_name = "FILE")]
    pub output_file: Option<PathBuf>,

    /// Logging level (error, warn, info, debug, trace).
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Serve Prometheus metrics.
    #[arg(long)]
    pub metrics: bool,
}

impl Provider for Cli {
    fn metadata(&self) -> Metadata {
        Metadata::named("Command-Line Arguments")
    }

    fn data(&self) -> Result<Map<Profile, Dict>, Error> {
        let mut dict = Dict::new();

        if let Some(level) = &self.log_level {
            dict.insert("log_level".into(), Value::from(level.clone()));
        }

        let mut server = Dict::new();
        if let Some(addr) = self.listen {
            server.insert("listen_address".into(), Value::from(addr.to_string()));
        }
        if !server.is_empty() {
            dict.insert("server".into(), Value::from(server));
        }

        if let Some(window) = self.dedup_window {
            let mut dedup = Dict::new();
            dedup.insert("window_seconds".into(), Value::from(window));
            dict.insert("deduplication".into(), Value::from(dedup));
        }

        if let Some(url) = &self.log_list_url {
            let mut directory = Dict::new();
            directory.insert("url".into(), Value::from(url.clone()));
            dict.insert("directory".into(), Value::from(directory));
        }

        if let Some(path) = &self.output_file {
            let mut output = Dict::new();
            output.insert(
                "file".into(),
                Value::from(path.to_string_lossy().into_owned()),
            );
            dict.insert("output".into(), Value::from(output));
        }

        // Only an explicit flag turns metrics on; absence leaves the file/env value alone.
        if self.metrics {
            let mut metrics = Dict::new();
            metrics.insert("enabled".into(), Value::from(true));
            dict.insert("metrics".into(), Value::from(metrics));
        }

        let mut map = Map::new();
        map.insert(Profile::Default, dict);
        Ok(map)
    }
}
