//! Event fan-out to live subscribers.
//!
//! Producers publish serialized events into one bounded intake. A single
//! [`Dispatcher`] drains the intake in order and offers each payload to every
//! subscriber currently held by the [`ConnectionRegistry`]. Each subscriber
//! owns a bounded outbox; a subscriber whose outbox is full or closed is
//! removed on the spot, so one slow or dead connection never holds up the
//! others.

use crate::{core::Payload, internal_metrics::Metrics};
use chrono::{DateTime, Utc};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};
use tokio::sync::{
    broadcast::{self, error::RecvError},
    mpsc::{self, error::TrySendError},
    watch,
};
use tracing::{debug, info, instrument, warn};

pub type SubscriberId = u64;

/// A registered subscriber.
#[derive(Debug, Clone)]
pub struct Subscriber {
    outbox: mpsc::Sender<Payload>,
    pub joined_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Members {
    next_id: SubscriberId,
    subscribers: HashMap<SubscriberId, Subscriber>,
}

/// The set of live subscribers, shared by the server and the dispatcher.
#[derive(Debug, Clone)]
pub struct ConnectionRegistry {
    members: Arc<Mutex<Members>>,
    metrics: Arc<Metrics>,
}

impl ConnectionRegistry {
    pub fn new(metrics: Arc<Metrics>) -> Self {
        Self {
            members: Arc::new(Mutex::new(Members::default())),
            metrics,
        }
    }

    fn members(&self) -> std::sync::MutexGuard<'_, Members> {
        self.members.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds a subscriber that receives payloads through `outbox`.
    pub fn register(&self, outbox: mpsc::Sender<Payload>) -> SubscriberId {
        let mut members = self.members();
        let id = members.next_id;
        members.next_id += 1;
        members.subscribers.insert(
            id,
            Subscriber {
                outbox,
                joined_at: Utc::now(),
            },
        );
        self.metrics.set_subscribers_connected(members.subscribers.len());
        id
    }

    /// Removes a subscriber. Returns `false` if it was already gone.
    pub fn unregister(&self, id: SubscriberId) -> bool {
        let mut members = self.members();
        let removed = members.subscribers.remove(&id);
        self.metrics.set_subscribers_connected(members.subscribers.len());
        if let Some(subscriber) = &removed {
            let connected_for = Utc::now().signed_duration_since(subscriber.joined_at);
            info!(
                subscriber = id,
                connected_secs = connected_for.num_seconds(),
                "Subscriber left"
            );
        }
        removed.is_some()
    }

    pub fn contains(&self, id: SubscriberId) -> bool {
        self.members().subscribers.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.members().subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A copy of the current membership. The lock is released before any
    /// delivery is attempted.
    pub fn snapshot(&self) -> Vec<(SubscriberId, mpsc::Sender<Payload>)> {
        self.members()
            .subscribers
            .iter()
            .map(|(id, subscriber)| (*id, subscriber.outbox.clone()))
            .collect()
    }
}

/// The producer side of the intake.
#[derive(Debug, Clone)]
pub struct BroadcastHub {
    intake: broadcast::Sender<Payload>,
    metrics: Arc<Metrics>,
}

impl BroadcastHub {
    /// Creates the hub and its dispatcher.
    ///
    /// The intake holds at most `capacity` undispatched events; when the
    /// dispatcher falls further behind, the oldest events are dropped. A
    /// `capacity` that is not a power of two is rounded up to one.
    pub fn new(
        capacity: usize,
        registry: ConnectionRegistry,
        metrics: Arc<Metrics>,
    ) -> (Self, Dispatcher) {
        let (intake, rx) = broadcast::channel(capacity);
        let hub = Self {
            intake,
            metrics: metrics.clone(),
        };
        let dispatcher = Dispatcher {
            rx,
            registry,
            metrics,
        };
        (hub, dispatcher)
    }

    /// Enqueues a payload. Never waits.
    pub fn publish(&self, payload: Payload) {
        self.metrics.events_published_total.increment(1);
        if self.intake.send(payload).is_err() {
            debug!("Dispatcher is gone; event discarded.");
        }
    }

    /// A passive view of the intake. Observers that fall behind lose events
    /// themselves without affecting dispatch.
    pub fn tap(&self) -> broadcast::Receiver<Payload> {
        self.intake.subscribe()
    }
}

/// Drains the intake and fans each payload out to the registry.
pub struct Dispatcher {
    rx: broadcast::Receiver<Payload>,
    registry: ConnectionRegistry,
    metrics: Arc<Metrics>,
}

impl Dispatcher {
    /// Offers `payload` to every registered subscriber and returns how many
    /// accepted it.
    pub fn deliver(&self, payload: &Payload) -> usize {
        let mut delivered = 0;
        for (id, outbox) in self.registry.snapshot() {
            match outbox.try_send(payload.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(subscriber = id, "Subscriber outbox is full; dropping subscriber.");
                    self.drop_subscriber(id);
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(subscriber = id, "Subscriber outbox is closed; dropping subscriber.");
                    self.drop_subscriber(id);
                }
            }
        }
        delivered
    }

    fn drop_subscriber(&self, id: SubscriberId) {
        self.metrics.subscriber_delivery_failures_total.increment(1);
        self.registry.unregister(id);
    }

    /// Waits for the next event and delivers it.
    ///
    /// Returns `None` once every producer is gone and the intake is empty.
    pub async fn dispatch_next(&mut self) -> Option<usize> {
        loop {
            match self.rx.recv().await {
                Ok(payload) => return Some(self.deliver(&payload)),
                Err(RecvError::Lagged(missed)) => {
                    self.metrics.broadcast_intake_dropped_total.increment(missed);
                    warn!(missed, "Dispatcher fell behind; oldest events dropped.");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    #[instrument(name = "dispatcher", skip_all)]
    pub async fn run(mut self, mut shutdown_rx: watch::Receiver<bool>) {
        info!("Dispatcher started.");
        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.changed() => {
                    info!("Dispatcher received shutdown signal.");
                    break;
                }
                next = self.dispatch_next() => {
                    if next.is_none() {
                        info!("Intake closed; dispatcher stopping.");
                        break;
                    }
                }
            }
        }
    }
}
