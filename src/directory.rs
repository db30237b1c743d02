//! The published list of CT logs and the selection of usable ones.

use serde::{de::IgnoredAny, Deserialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("failed to fetch log list from {url}: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("log list at {url} returned status {status}")]
    Status { url: String, status: u16 },
    #[error("log list at {url} is malformed: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("log list at {url} contains no usable logs")]
    NoUsableLogs { url: String },
}

/// The log list document. Unknown fields are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogList {
    #[serde(default)]
    pub operators: Vec<Operator>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Operator {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub logs: Vec<LogDescriptor>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogDescriptor {
    #[serde(default)]
    pub description: Option<String>,
    pub url: String,
    #[serde(default)]
    pub state: Option<LogState>,
}

/// Only the presence of a state key matters; its timestamp is ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogState {
    #[serde(default)]
    pub usable: Option<IgnoredAny>,
}

impl LogDescriptor {
    pub fn is_usable(&self) -> bool {
        self.state
            .as_ref()
            .is_some_and(|state| state.usable.is_some())
    }
}

impl LogList {
    pub fn from_json(url: &str, body: &str) -> Result<Self, DirectoryError> {
        serde_json::from_str(body).map_err(|source| DirectoryError::Decode {
            url: url.to_string(),
            source,
        })
    }
}

/// URLs of usable logs in list order, without duplicates.
pub fn usable_log_urls(list: &LogList) -> Vec<String> {
    let mut urls: Vec<String> = Vec::new();
    for log in list.operators.iter().flat_map(|op| &op.logs) {
        if !log.is_usable() {
            continue;
        }
        if !urls.contains(&log.url) {
            urls.push(log.url.clone());
        }
    }
    urls
}

/// Fetches the log list over HTTP.
#[derive(Debug, Clone)]
pub struct LogDirectory {
    url: String,
    client: reqwest::Client,
}

impl LogDirectory {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, DirectoryError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|source| DirectoryError::Http {
                url: url.to_string(),
                source,
            })?;
        Ok(Self {
            url: url.to_string(),
            client,
        })
    }

    pub async fn fetch(&self) -> Result<LogList, DirectoryError> {
        let http_error = |source| DirectoryError::Http {
            url: self.url.clone(),
            source,
        };
        debug!(url = %self.url, "Fetching log list");
        let response = self.client.get(&self.url).send().await.map_err(http_error)?;
        let status = response.status();
        if !status.is_success() {
            return Err(DirectoryError::Status {
                url: self.url.clone(),
                status: status.as_u16(),
            });
        }
        let body = response.text().await.map_err(http_error)?;
        LogList::from_json(&self.url, &body)
    }

    /// Fetches the list and returns the usable log URLs; none is an error.
    pub async fn fetch_usable_logs(&self) -> Result<Vec<String>, DirectoryError> {
        let list = self.fetch().await?;
        let urls = usable_log_urls(&list);
        if urls.is_empty() {
            return Err(DirectoryError::NoUsableLogs {
                url: self.url.clone(),
            });
        }
        info!(
            operators = list.operators.len(),
            usable = urls.len(),
            "Log list loaded"
        );
        Ok(urls)
    }
}
