//! Core domain types and service traits for certfeed
//!
//! This module defines the data that flows through the pipeline and the
//! trait contracts of the external collaborators: the per-log client and the
//! certificate parser.

use crate::{ct_client::LogClientError, x509::CertificateError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A serialized event, shared by every subscriber it is delivered to.
pub type Payload = Arc<str>;

/// A newly sighted domain, as pushed to subscribers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CertificateEvent {
    /// The normalized domain name
    pub domain: String,
    /// Subject alternative DNS names, in certificate order
    pub sans: Vec<String>,
    /// Issuer common name
    pub issuer: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    /// UTC time at which the domain was detected
    #[serde(rename = "timestamp")]
    pub observed_at: DateTime<Utc>,
}

impl CertificateEvent {
    /// Serializes the event into the JSON wire payload.
    pub fn to_payload(&self) -> serde_json::Result<Payload> {
        Ok(serde_json::to_string(self)?.into())
    }
}

/// The certificate fields the pipeline cares about.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParsedCertificate {
    /// Subject common name, empty when absent
    pub common_name: String,
    /// DNS entries of the subject alternative name extension
    pub dns_names: Vec<String>,
    /// Issuer common name, empty when absent
    pub issuer_common_name: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
}

/// One log entry as returned by a log client.
///
/// A plain certificate entry carries the leaf; a precertificate entry carries
/// no leaf and a chain that starts with the submitted precertificate.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawEntry {
    /// DER bytes of a directly logged leaf certificate
    pub leaf: Option<Vec<u8>>,
    /// DER bytes of the accompanying chain
    pub chain: Vec<Vec<u8>>,
}

impl RawEntry {
    /// Creates an entry for a directly logged certificate.
    pub fn leaf(der: Vec<u8>) -> Self {
        Self {
            leaf: Some(der),
            chain: Vec::new(),
        }
    }

    /// Creates an entry that only has a chain (the precertificate case).
    pub fn chain(chain: Vec<Vec<u8>>) -> Self {
        Self { leaf: None, chain }
    }

    /// Returns the certificate to inspect: the leaf if present, otherwise the
    /// first certificate of the chain.
    pub fn certificate(&self) -> Option<&[u8]> {
        self.leaf
            .as_deref()
            .or_else(|| self.chain.first().map(Vec::as_slice))
    }
}

// =============================================================================
// Service Traits
// =============================================================================

/// Talks to a single append-only log.
#[async_trait]
pub trait LogClient: Send + Sync {
    /// The base URL of the log, used to identify it in logs and metrics.
    fn url(&self) -> &str;

    /// Fetches the log's current size (its tree size).
    async fn current_size(&self) -> Result<u64, LogClientError>;

    /// Fetches entries in the half-open range `[start, end)`.
    ///
    /// Logs may return fewer entries than asked for; they are always the
    /// leading entries of the range, in index order.
    async fn entries(&self, start: u64, end: u64) -> Result<Vec<RawEntry>, LogClientError>;
}

/// Turns DER bytes into the fields of a certificate.
pub trait CertificateParser: Send + Sync {
    fn parse(&self, der: &[u8]) -> Result<ParsedCertificate, CertificateError>;
}
