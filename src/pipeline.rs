//! The shared processing context every poller hands certificates to.

use crate::{
    broadcast::BroadcastHub,
    config::Config,
    core::ParsedCertificate,
    deduplication::Deduplicator,
    internal_metrics::Metrics,
    sanitizer::{DomainFilter, Rejection},
    sink::FileSink,
};
use chrono::Utc;
use std::{sync::Arc, time::Duration};
use tracing::{debug, error, trace};

/// What happened to one certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Published,
    Rejected(Rejection),
    /// Seen within the dedup window.
    Duplicate,
    /// The event could not be serialized.
    Dropped,
}

/// Sanitizer, dedup cache, broadcast intake and optional file sink, owned once
/// and shared by reference.
pub struct Pipeline {
    filter: DomainFilter,
    deduplicator: Deduplicator,
    hub: BroadcastHub,
    sink: Option<FileSink>,
    metrics: Arc<Metrics>,
}

impl Pipeline {
    pub fn new(
        filter: DomainFilter,
        deduplicator: Deduplicator,
        hub: BroadcastHub,
        sink: Option<FileSink>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            filter,
            deduplicator,
            hub,
            sink,
            metrics,
        }
    }

    /// Builds the filter and the dedup cache from `config`.
    pub fn from_config(
        config: &Config,
        hub: BroadcastHub,
        sink: Option<FileSink>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let deduplicator = Deduplicator::new(
            Duration::from_secs(config.deduplication.window_seconds),
            config.deduplication.cache_size,
            metrics.clone(),
        );
        Self::new(
            DomainFilter::new(&config.filter),
            deduplicator,
            hub,
            sink,
            metrics,
        )
    }

    pub async fn process_certificate(&self, cert: &ParsedCertificate) -> Outcome {
        let now = Utc::now();
        let event = match self.filter.extract(cert, now) {
            Ok(event) => event,
            Err(rejection) => {
                self.metrics.increment_rejected(rejection.as_str());
                trace!(common_name = %cert.common_name, %rejection, "Domain rejected");
                return Outcome::Rejected(rejection);
            }
        };

        if !self.deduplicator.allow(&event.domain, now).await {
            trace!(domain = %event.domain, "Duplicate sighting suppressed");
            return Outcome::Duplicate;
        }

        let payload = match event.to_payload() {
            Ok(payload) => payload,
            Err(e) => {
                error!(domain = %event.domain, "Failed to serialize event: {}", e);
                return Outcome::Dropped;
            }
        };
        self.hub.publish(payload);
        if let Some(sink) = &self.sink {
            sink.submit(&event.domain);
        }
        debug!(domain = %event.domain, issuer = %event.issuer, "New domain");
        Outcome::Published
    }
}
