//! Graceful shutdown of the whole application.

use async_trait::async_trait;
use certfeed::{
    core::{LogClient, RawEntry},
    ct_client::LogClientError,
    task_manager::TaskManager,
};
use std::{
    sync::{
        atomic::{AtomicBool, AtomicU32, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{net::TcpListener, sync::watch, time::Instant};

#[path = "../helpers/mod.rs"]
mod helpers;
use helpers::{app::TestAppBuilder, fake_log::FakeLogClient, ws_client::Subscriber};

const WAIT: Duration = Duration::from_secs(5);

/// A log that grows from 10 to 20 entries after first contact and never
/// answers an entry fetch.
#[derive(Default)]
struct StalledLog {
    contacted: AtomicBool,
    fetches: AtomicU32,
}

#[async_trait]
impl LogClient for StalledLog {
    fn url(&self) -> &str {
        "https://stalled.test/"
    }

    async fn current_size(&self) -> Result<u64, LogClientError> {
        if self.contacted.swap(true, Ordering::SeqCst) {
            Ok(20)
        } else {
            Ok(10)
        }
    }

    async fn entries(&self, _start: u64, _end: u64) -> Result<Vec<RawEntry>, LogClientError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        std::future::pending().await
    }
}

#[tokio::test]
async fn test_connected_subscribers_are_closed_on_shutdown() {
    let log = FakeLogClient::new("https://log.test/", 0);
    let app = TestAppBuilder::new().with_log(log.clone()).start().await.unwrap();
    let mut first = Subscriber::connect(&app.ws_url()).await;
    let mut second = Subscriber::connect(&app.ws_url()).await;
    app.wait_for_subscribers(2).await;
    let registry = app.registry.clone();

    let started = Instant::now();
    app.shutdown(WAIT).await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(2));

    assert!(first.wait_for_close(WAIT).await);
    assert!(second.wait_for_close(WAIT).await);
    assert!(registry.is_empty());
}

#[tokio::test]
async fn test_shutdown_interrupts_an_outstanding_fetch() {
    let stalled = Arc::new(StalledLog::default());
    let app = TestAppBuilder::new()
        .with_log(stalled.clone())
        .with_config_modifier(|config| config.polling.request_timeout_ms = 60_000)
        .start()
        .await
        .unwrap();

    let deadline = Instant::now() + WAIT;
    while stalled.fetches.load(Ordering::SeqCst) == 0 {
        assert!(Instant::now() < deadline, "entries were never requested");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let started = Instant::now();
    app.shutdown(WAIT).await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[tokio::test]
async fn test_listen_address_is_released() {
    let log = FakeLogClient::new("https://log.test/", 0);
    let app = TestAppBuilder::new().with_log(log).start().await.unwrap();
    let addr = app.server_addr;

    app.shutdown(WAIT).await.unwrap();

    assert!(TcpListener::bind(addr).await.is_ok());
}

#[tokio::test]
async fn test_task_manager_aborts_tasks_that_ignore_shutdown() {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let manager = TaskManager::new(shutdown_rx);

    let mut rx = manager.get_shutdown_rx();
    manager.spawn("Cooperative", async move {
        let _ = rx.wait_for(|stop| *stop).await;
    });
    manager.spawn("Stubborn", std::future::pending::<()>());
    assert_eq!(manager.len(), 2);

    shutdown_tx.send(true).unwrap();
    let aborted = manager.shutdown(Duration::from_millis(200)).await;
    assert_eq!(aborted, vec!["Stubborn"]);
}
