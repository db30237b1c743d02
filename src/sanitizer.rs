//! Domain extraction and sanitizing.
//!
//! Picks one candidate name per certificate, normalizes it, and rejects names
//! that are too short, malformed, or belong to shared infrastructure.

use crate::{
    config::FilterConfig,
    core::{CertificateEvent, ParsedCertificate},
};
use chrono::{DateTime, Utc};
use std::fmt;

/// Why a candidate domain was not reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// The certificate has neither a common name nor a DNS SAN.
    NoCandidate,
    Empty,
    TooShort,
    Whitespace,
    /// Matched the contained blocklist entry.
    Blocklisted(String),
}

impl Rejection {
    /// A short label, suitable for metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Rejection::NoCandidate => "no_candidate",
            Rejection::Empty => "empty",
            Rejection::TooShort => "too_short",
            Rejection::Whitespace => "whitespace",
            Rejection::Blocklisted(_) => "blocklisted",
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::Blocklisted(entry) => write!(f, "blocklisted ({})", entry),
            other => f.write_str(other.as_str()),
        }
    }
}

/// Turns certificates into reportable domains.
#[derive(Debug, Clone)]
pub struct DomainFilter {
    min_length: usize,
    blocklist: Vec<String>,
}

impl DomainFilter {
    pub fn new(config: &FilterConfig) -> Self {
        let blocklist = config
            .blocklist
            .iter()
            .map(|entry| entry.trim().to_lowercase())
            .filter(|entry| !entry.is_empty())
            .collect();
        Self {
            min_length: config.min_length,
            blocklist,
        }
    }

    /// Trims, lowercases and strips one leading wildcard label.
    pub fn normalize(raw: &str) -> String {
        let lowered = raw.trim().to_lowercase();
        match lowered.strip_prefix("*.") {
            Some(rest) => rest.to_string(),
            None => lowered,
        }
    }

    /// Normalizes `raw` and applies the rejection rules.
    pub fn sanitize(&self, raw: &str) -> Result<String, Rejection> {
        let domain = Self::normalize(raw);
        if domain.is_empty() {
            return Err(Rejection::Empty);
        }
        if domain.chars().count() < self.min_length {
            return Err(Rejection::TooShort);
        }
        if domain.chars().any(char::is_whitespace) {
            return Err(Rejection::Whitespace);
        }
        if let Some(entry) = self.blocklist.iter().find(|entry| domain.contains(entry.as_str())) {
            return Err(Rejection::Blocklisted(entry.clone()));
        }
        Ok(domain)
    }

    /// The subject common name if set, else the first DNS SAN.
    pub fn candidate(cert: &ParsedCertificate) -> Option<&str> {
        if !cert.common_name.is_empty() {
            return Some(&cert.common_name);
        }
        // Blank SAN entries are passed over in favour of the next one.
        cert.dns_names
            .iter()
            .map(String::as_str)
            .find(|name| !name.is_empty())
    }

    /// Builds the event for `cert`, or says why it is not reportable.
    pub fn extract(
        &self,
        cert: &ParsedCertificate,
        observed_at: DateTime<Utc>,
    ) -> Result<CertificateEvent, Rejection> {
        let candidate = Self::candidate(cert).ok_or(Rejection::NoCandidate)?;
        let domain = self.sanitize(candidate)?;
        Ok(CertificateEvent {
            domain,
            sans: cert.dns_names.clone(),
            issuer: cert.issuer_common_name.clone(),
            not_before: cert.not_before,
            not_after: cert.not_after,
            observed_at,
        })
    }
}
