//! RFC 6962 client for a single Certificate Transparency log
//!
//! Implements `get-sth` and `get-entries` over HTTP and decodes each entry's
//! `MerkleTreeLeaf` and `extra_data` into a [`RawEntry`].

use crate::core::{LogClient, RawEntry};
use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Errors raised while talking to a log.
#[derive(Debug, Error)]
pub enum LogClientError {
    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("request to {url} returned status {status}")]
    Status { url: String, status: u16 },
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("failed to decode response from {url}: {reason}")]
    Decode { url: String, reason: String },
    #[error("log returned no entries for [{start}, {end})")]
    EmptyBatch { start: u64, end: u64 },
}

/// Errors raised while decoding a single entry.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EntryError {
    #[error("invalid base64: {0}")]
    Base64(String),
    #[error("truncated structure: needed {needed} bytes at offset {offset}")]
    Truncated { offset: usize, needed: usize },
    #[error("unsupported leaf version {0}")]
    Version(u8),
    #[error("unsupported leaf type {0}")]
    LeafType(u8),
    #[error("unknown entry type {0}")]
    EntryType(u16),
}

/// Signed tree head as returned by `get-sth`.
#[derive(Debug, Deserialize)]
struct SignedTreeHead {
    tree_size: u64,
}

/// Body of a `get-entries` response.
#[derive(Debug, Deserialize)]
struct EntriesResponse {
    entries: Vec<EntryResponse>,
}

#[derive(Debug, Deserialize)]
struct EntryResponse {
    leaf_input: String,
    #[serde(default)]
    extra_data: String,
}

/// HTTP client for one log's RFC 6962 API.
#[derive(Debug, Clone)]
pub struct HttpLogClient {
    url: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl HttpLogClient {
    /// Creates a client for the log at `url`; every request is bounded by `timeout`.
    pub fn new(url: &str, timeout: Duration) -> Result<Self, LogClientError> {
        let url = url.trim_end_matches('/').to_string();
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|source| LogClientError::Http {
                url: url.clone(),
                source,
            })?;
        Ok(Self {
            url,
            timeout,
            client,
        })
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, endpoint: &str) -> Result<T, LogClientError> {
        let url = format!("{}/ct/v1/{}", self.url, endpoint);
        let response = self.client.get(&url).send().await.map_err(|e| self.classify(&url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(LogClientError::Status {
                url,
                status: status.as_u16(),
            });
        }

        response.json::<T>().await.map_err(|e| {
            if e.is_timeout() {
                LogClientError::Timeout(self.timeout)
            } else {
                LogClientError::Decode {
                    url,
                    reason: e.to_string(),
                }
            }
        })
    }

    fn classify(&self, url: &str, source: reqwest::Error) -> LogClientError {
        if source.is_timeout() {
            LogClientError::Timeout(self.timeout)
        } else {
            LogClientError::Http {
                url: url.to_string(),
                source,
            }
        }
    }
}

#[async_trait]
impl LogClient for HttpLogClient {
    fn url(&self) -> &str {
        &self.url
    }

    async fn current_size(&self) -> Result<u64, LogClientError> {
        let sth: SignedTreeHead = self.get("get-sth").await?;
        Ok(sth.tree_size)
    }

    async fn entries(&self, start: u64, end: u64) -> Result<Vec<RawEntry>, LogClientError> {
        if end <= start {
            return Ok(Vec::new());
        }
        // The wire protocol's `end` is inclusive.
        let endpoint = format!("get-entries?start={}&end={}", start, end - 1);
        debug!(log = %self.url, start, end, "Fetching entries");
        let response: EntriesResponse = self.get(&endpoint).await?;

        let entries = response
            .entries
            .iter()
            .enumerate()
            .map(|(offset, entry)| {
                decode_entry(&entry.leaf_input, &entry.extra_data).unwrap_or_else(|e| {
                    warn!(
                        log = %self.url,
                        index = start + offset as u64,
                        error = %e,
                        "Skipping undecodable entry"
                    );
                    RawEntry::default()
                })
            })
            .collect();
        Ok(entries)
    }
}

/// Decodes one `get-entries` item into its certificates.
///
/// `x509_entry` leaves carry the certificate directly; `precert_entry` leaves
/// only carry a TBSCertificate, so the submitted precertificate and its chain
/// are read from `extra_data` instead.
pub fn decode_entry(leaf_input: &str, extra_data: &str) -> Result<RawEntry, EntryError> {
    let engine = base64::engine::general_purpose::STANDARD;
    let leaf = engine
        .decode(leaf_input)
        .map_err(|e| EntryError::Base64(e.to_string()))?;
    let extra = engine
        .decode(extra_data)
        .map_err(|e| EntryError::Base64(e.to_string()))?;

    let mut reader = Reader::new(&leaf);
    let version = reader.u8()?;
    if version != 0 {
        return Err(EntryError::Version(version));
    }
    let leaf_type = reader.u8()?;
    if leaf_type != 0 {
        return Err(EntryError::LeafType(leaf_type));
    }
    let _timestamp = reader.take(8)?;

    match reader.u16()? {
        0 => {
            let cert = reader.opaque24()?.to_vec();
            // The chain is informational; a damaged chain must not lose the leaf.
            let chain = decode_chain(&mut Reader::new(&extra)).unwrap_or_default();
            Ok(RawEntry {
                leaf: Some(cert),
                chain,
            })
        }
        1 => {
            let mut extra = Reader::new(&extra);
            let precert = extra.opaque24()?.to_vec();
            let mut chain = vec![precert];
            chain.extend(decode_chain(&mut extra)?);
            Ok(RawEntry::chain(chain))
        }
        other => Err(EntryError::EntryType(other)),
    }
}

/// Reads a 24-bit-length-prefixed list of 24-bit-length-prefixed certificates.
fn decode_chain(reader: &mut Reader<'_>) -> Result<Vec<Vec<u8>>, EntryError> {
    if reader.remaining() == 0 {
        return Ok(Vec::new());
    }
    let mut list = Reader::new(reader.opaque24()?);
    let mut chain = Vec::new();
    while list.remaining() > 0 {
        chain.push(list.opaque24()?.to_vec());
    }
    Ok(chain)
}

/// Big-endian cursor over TLS-encoded structures.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], EntryError> {
        if self.remaining() < n {
            return Err(EntryError::Truncated {
                offset: self.pos,
                needed: n,
            });
        }
        let bytes = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(bytes)
    }

    fn u8(&mut self) -> Result<u8, EntryError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, EntryError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn opaque24(&mut self) -> Result<&'a [u8], EntryError> {
        let b = self.take(3)?;
        let len = u32::from_be_bytes([0, b[0], b[1], b[2]]) as usize;
        self.take(len)
    }
}

/// Helpers for building TLS-encoded entries, shared with the tests.
pub mod encode {
    use base64::Engine;

    fn push24(out: &mut Vec<u8>, bytes: &[u8]) {
        let len = bytes.len() as u32;
        out.extend_from_slice(&len.to_be_bytes()[1..]);
        out.extend_from_slice(bytes);
    }

    fn leaf_header(out: &mut Vec<u8>, entry_type: u16) {
        out.push(0); // version v1
        out.push(0); // timestamped_entry
        out.extend_from_slice(&0u64.to_be_bytes());
        out.extend_from_slice(&entry_type.to_be_bytes());
    }

    fn chain(certs: &[Vec<u8>]) -> Vec<u8> {
        let mut list = Vec::new();
        for cert in certs {
            push24(&mut list, cert);
        }
        let mut out = Vec::new();
        push24(&mut out, &list);
        out
    }

    /// Returns `(leaf_input, extra_data)` for an `x509_entry`.
    pub fn x509_entry(cert: &[u8], issuers: &[Vec<u8>]) -> (String, String) {
        let mut leaf = Vec::new();
        leaf_header(&mut leaf, 0);
        push24(&mut leaf, cert);
        leaf.extend_from_slice(&0u16.to_be_bytes()); // no extensions
        let engine = base64::engine::general_purpose::STANDARD;
        (engine.encode(leaf), engine.encode(chain(issuers)))
    }

    /// Returns `(leaf_input, extra_data)` for a `precert_entry`.
    pub fn precert_entry(precert: &[u8], issuers: &[Vec<u8>]) -> (String, String) {
        let mut leaf = Vec::new();
        leaf_header(&mut leaf, 1);
        leaf.extend_from_slice(&[0u8; 32]); // issuer_key_hash
        push24(&mut leaf, b"tbs");
        leaf.extend_from_slice(&0u16.to_be_bytes());
        let mut extra = Vec::new();
        push24(&mut extra, precert);
        extra.extend(chain(issuers));
        let engine = base64::engine::general_purpose::STANDARD;
        (engine.encode(leaf), engine.encode(extra))
    }
}
