//! # Subscriber Server
//!
//! Serves the WebSocket endpoint subscribers connect to. Each connection is
//! registered with the [`ConnectionRegistry`] and gets two tasks: a writer
//! that drains the subscriber's outbox onto the socket, and a passive watcher
//! that only looks for the peer going away. Whichever ends first takes the
//! other down and the subscriber is unregistered.

use crate::{
    broadcast::{ConnectionRegistry, SubscriberId},
    config::ServerConfig,
    core::Payload,
};
use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
    routing::get,
    Router,
};
use futures::{SinkExt, StreamExt};
use std::{future::Future, net::SocketAddr};
use tokio::{
    net::TcpListener,
    sync::{mpsc, watch},
};
use tracing::{debug, error, info, warn};

#[derive(Clone)]
struct ServerState {
    registry: ConnectionRegistry,
    subscriber_buffer: usize,
    shutdown_rx: watch::Receiver<bool>,
}

/// The WebSocket server, bound but not yet running.
pub struct SubscriberServer {
    listener: TcpListener,
    router: Router,
    shutdown_rx: watch::Receiver<bool>,
}

impl SubscriberServer {
    /// Binds `config.listen_address` and returns the server with the address
    /// actually bound.
    pub async fn bind(
        config: &ServerConfig,
        registry: ConnectionRegistry,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Result<(Self, SocketAddr)> {
        let listener = TcpListener::bind(config.listen_address)
            .await
            .with_context(|| format!("failed to bind {}", config.listen_address))?;
        let addr = listener
            .local_addr()
            .context("failed to read the server's bound address")?;

        let state = ServerState {
            registry,
            subscriber_buffer: config.subscriber_buffer,
            shutdown_rx: shutdown_rx.clone(),
        };
        let router = Router::new()
            .route(&config.path, get(subscribe))
            .with_state(state);
        info!(%addr, path = %config.path, "Subscriber endpoint ready");

        Ok((
            Self {
                listener,
                router,
                shutdown_rx,
            },
            addr,
        ))
    }

    /// Returns a future that serves connections until shutdown.
    pub fn run(self) -> impl Future<Output = ()> {
        let Self {
            listener,
            router,
            mut shutdown_rx,
        } = self;
        async move {
            let shutdown = async move {
                let _ = shutdown_rx.changed().await;
            };
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(shutdown)
                .await
            {
                error!("Subscriber server error: {}", e);
            }
            info!("Subscriber server stopped.");
        }
    }
}

async fn subscribe(ws: WebSocketUpgrade, State(state): State<ServerState>) -> Response {
    ws.on_failed_upgrade(|e| warn!("WebSocket upgrade failed: {}", e))
        .on_upgrade(move |socket| serve_subscriber(socket, state))
}

async fn serve_subscriber(socket: WebSocket, state: ServerState) {
    let (outbox, inbox) = mpsc::channel(state.subscriber_buffer);
    let id = state.registry.register(outbox);
    info!(subscriber = id, connected = state.registry.len(), "Subscriber joined");

    let (sender, receiver) = socket.split();
    let mut writer = tokio::spawn(write_payloads(id, sender, inbox));
    let mut watcher = tokio::spawn(watch_peer(id, receiver));
    let mut shutdown_rx = state.shutdown_rx;

    tokio::select! {
        biased;
        _ = shutdown_rx.changed() => {
            watcher.abort();
            writer.abort();
        }
        _ = &mut writer => watcher.abort(),
        _ = &mut watcher => writer.abort(),
    }

    state.registry.unregister(id);
}

/// Sends queued payloads until the outbox closes or the socket fails.
async fn write_payloads<S>(id: SubscriberId, mut sender: S, mut inbox: mpsc::Receiver<Payload>)
where
    S: futures::Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    while let Some(payload) = inbox.recv().await {
        if let Err(e) = sender.send(Message::Text(payload.as_ref().into())).await {
            debug!(subscriber = id, "Write failed: {}", e);
            return;
        }
    }
    debug!(subscriber = id, "Outbox closed");
    let _ = sender.send(Message::Close(None)).await;
}

/// Ignores inbound frames and returns once the peer is gone.
async fn watch_peer<R, E>(id: SubscriberId, mut receiver: R)
where
    R: futures::Stream<Item = Result<Message, E>> + Unpin,
    E: std::fmt::Display,
{
    while let Some(frame) = receiver.next().await {
        match frame {
            Ok(Message::Close(_)) => {
                debug!(subscriber = id, "Peer closed the connection");
                return;
            }
            Ok(_) => {}
            Err(e) => {
                debug!(subscriber = id, "Read failed: {}", e);
                return;
            }
        }
    }
    debug!(subscriber = id, "Connection ended");
}
