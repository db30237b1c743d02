// Time-windowed suppression of repeat domain sightings.

use crate::internal_metrics::Metrics;
use chrono::{DateTime, Utc};
use moka::future::Cache;
use moka::ops::compute::{CompResult, Op};
use std::sync::Arc;
use std::time::Duration;

/// Remembers when each domain was last let through.
///
/// Entries expire from the cache once they are older than the window, and
/// the cache never holds more than `max_capacity` domains, so memory stays
/// bounded for the lifetime of the process.
pub struct Deduplicator {
    cache: Cache<String, DateTime<Utc>>,
    window: chrono::Duration,
    metrics: Arc<Metrics>,
}

impl Deduplicator {
    /// Creates a new `Deduplicator`.
    ///
    /// # Arguments
    /// * `window` - Repeat sightings closer together than this are suppressed.
    /// * `max_capacity` - The maximum number of domains remembered at once.
    pub fn new(window: Duration, max_capacity: u64, metrics: Arc<Metrics>) -> Self {
        let cache = Cache::builder()
            .time_to_live(window)
            .max_capacity(max_capacity)
            .build();
        Self {
            cache,
            window: chrono::Duration::from_std(window).unwrap_or(chrono::Duration::MAX),
            metrics,
        }
    }

    /// Checks `domain` and records `now` as its last sighting, as one step.
    ///
    /// # Returns
    /// * `true` if the domain was never seen, or was last let through at
    ///   least one window before `now`.
    /// * `false` otherwise; the stored sighting is left untouched.
    pub async fn allow(&self, domain: &str, now: DateTime<Utc>) -> bool {
        let window = self.window;
        let result = self
            .cache
            .entry_by_ref(domain)
            .and_compute_with(|existing| {
                let op = match existing {
                    Some(entry) if now.signed_duration_since(*entry.value()) < window => Op::Nop,
                    _ => Op::Put(now),
                };
                std::future::ready(op)
            })
            .await;

        let allowed = matches!(result, CompResult::Inserted(_) | CompResult::ReplacedWith(_));
        if !allowed {
            self.metrics.domains_deduplicated_total.increment(1);
        }
        metrics::gauge!("dedup_cache_entries").set(self.cache.entry_count() as f64);
        allowed
    }

}
