//! The Prometheus exporter, scraped over HTTP.

use std::time::Duration;

#[path = "../helpers/mod.rs"]
mod helpers;
use helpers::{app::TestAppBuilder, fake_log::FakeLogClient};

const WAIT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn test_metrics_endpoint_reports_published_events() {
    let log = FakeLogClient::new("https://log.test/", 0);
    let app = TestAppBuilder::new()
        .with_log(log.clone())
        .with_exporter()
        .with_config_modifier(|config| {
            config.metrics.enabled = true;
            config.metrics.listen_address = "127.0.0.1:0".parse().unwrap();
        })
        .start()
        .await
        .unwrap();
    assert_eq!(app.log_count, 1);
    let url = format!("http://{}/metrics", app.metrics_addr.expect("exporter is bound"));

    log.wait_until_polled(2).await;
    log.set_size(2);

    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        let body = reqwest::get(&url).await.unwrap().text().await.unwrap();
        if body.contains("events_published_total 2") && body.contains("ct_entries_fetched_total 2") {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "metrics never caught up:\n{}", body);
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    app.shutdown(WAIT).await.unwrap();
}

#[tokio::test]
async fn test_disabled_exporter_binds_nothing() {
    let app = TestAppBuilder::new()
        .with_log(FakeLogClient::new("https://a.test/", 0))
        .with_log(FakeLogClient::new("https://b.test/", 0))
        .with_exporter()
        .start()
        .await
        .unwrap();
    assert_eq!(app.log_count, 2);
    assert!(app.metrics_addr.is_none());

    app.shutdown(WAIT).await.unwrap();
}
