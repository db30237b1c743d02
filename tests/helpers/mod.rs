pub mod app;
pub mod fake_log;
pub mod test_metrics;
pub mod ws_client;
