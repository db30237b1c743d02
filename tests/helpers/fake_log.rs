#![allow(dead_code)]
//! In-memory stand-ins for a CT log and the certificate parser.

use async_trait::async_trait;
use certfeed::{
    core::{CertificateParser, LogClient, ParsedCertificate, RawEntry},
    ct_client::LogClientError,
    x509::CertificateError,
};
use std::sync::{
    atomic::{AtomicU32, AtomicU64, Ordering},
    Arc, Mutex,
};

type Naming = Arc<dyn Fn(u64) -> String + Send + Sync>;

/// A log whose size is set by the test. Entry `i` carries the bytes of the
/// domain name the naming function returns for `i`.
pub struct FakeLogClient {
    url: String,
    size: AtomicU64,
    failing_size_calls: AtomicU32,
    failing_entry_calls: AtomicU32,
    naming: Naming,
    requests: Mutex<Vec<(u64, u64)>>,
    served: AtomicU64,
    size_queries: AtomicU32,
}

impl FakeLogClient {
    pub fn new(url: &str, initial_size: u64) -> Arc<Self> {
        Self::with_naming(url, initial_size, |i| format!("host-{}.example.com", i))
    }

    pub fn with_naming(
        url: &str,
        initial_size: u64,
        naming: impl Fn(u64) -> String + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            url: url.to_string(),
            size: AtomicU64::new(initial_size),
            failing_size_calls: AtomicU32::new(0),
            failing_entry_calls: AtomicU32::new(0),
            naming: Arc::new(naming),
            requests: Mutex::new(Vec::new()),
            served: AtomicU64::new(0),
            size_queries: AtomicU32::new(0),
        })
    }

    pub fn set_size(&self, size: u64) {
        self.size.store(size, Ordering::SeqCst);
    }

    /// Makes the next `n` size queries fail.
    pub fn fail_size_calls(&self, n: u32) {
        self.failing_size_calls.store(n, Ordering::SeqCst);
    }

    /// Makes the next `n` entry fetches fail.
    pub fn fail_entry_calls(&self, n: u32) {
        self.failing_entry_calls.store(n, Ordering::SeqCst);
    }

    /// Every `[start, end)` range asked for, failed ones included.
    pub fn requests(&self) -> Vec<(u64, u64)> {
        self.requests.lock().unwrap().clone()
    }

    /// The highest index successfully served, plus one.
    pub fn served_up_to(&self) -> u64 {
        self.served.load(Ordering::SeqCst)
    }

    /// Waits until the size has been asked for at least `n` times, failed
    /// queries included.
    pub async fn wait_until_polled(&self, n: u32) {
        let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(5);
        while self.size_queries.load(Ordering::SeqCst) < n {
            assert!(
                tokio::time::Instant::now() < deadline,
                "{} was polled fewer than {} times",
                self.url,
                n
            );
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
    }

    fn take_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl LogClient for FakeLogClient {
    fn url(&self) -> &str {
        &self.url
    }

    async fn current_size(&self) -> Result<u64, LogClientError> {
        self.size_queries.fetch_add(1, Ordering::SeqCst);
        if Self::take_failure(&self.failing_size_calls) {
            return Err(LogClientError::Status {
                url: self.url.clone(),
                status: 503,
            });
        }
        Ok(self.size.load(Ordering::SeqCst))
    }

    async fn entries(&self, start: u64, end: u64) -> Result<Vec<RawEntry>, LogClientError> {
        self.requests.lock().unwrap().push((start, end));
        if Self::take_failure(&self.failing_entry_calls) {
            return Err(LogClientError::Status {
                url: self.url.clone(),
                status: 500,
            });
        }
        self.served.fetch_max(end, Ordering::SeqCst);
        Ok((start..end)
            .map(|i| RawEntry::leaf((self.naming)(i).into_bytes()))
            .collect())
    }
}

/// Treats the certificate bytes as the subject common name.
pub struct NameParser;

impl CertificateParser for NameParser {
    fn parse(&self, der: &[u8]) -> Result<ParsedCertificate, CertificateError> {
        let name = std::str::from_utf8(der)
            .map_err(|e| CertificateError::Malformed(e.to_string()))?;
        Ok(ParsedCertificate {
            common_name: name.to_string(),
            dns_names: vec![name.to_string()],
            issuer_common_name: "Fake CA".to_string(),
            ..Default::default()
        })
    }
}
