//! certfeed - a live feed of newly certified domains
//!
//! Follows the public Certificate Transparency logs, extracts one domain per
//! new certificate, suppresses repeats within a time window, and pushes every
//! new sighting to connected WebSocket subscribers.

pub mod app;
pub mod broadcast;
pub mod cli;
pub mod config;
pub mod core;
pub mod ct_client;
pub mod deduplication;
pub mod directory;
pub mod internal_metrics;
pub mod pipeline;
pub mod poller;
pub mod rate;
pub mod sanitizer;
pub mod server;
pub mod sink;
pub mod task_manager;
pub mod x509;

// Re-export core types for convenience
pub use self::core::*;
