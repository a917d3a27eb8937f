//! HTTP and filesystem sources for the feed and the boundary dataset.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use pipeline::{BoundarySource, FeedSource, RetrievalError};
use reqwest::Client;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::USER_AGENT;

/// Suffix identifying the events export in the discovery listing.
const EXPORT_SUFFIX: &str = ".export.csv.zip";

pub fn http_client(timeout: Duration) -> reqwest::Result<Client> {
    Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .build()
}

/// One line of the discovery listing: `<size> <checksum> <url>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingEntry {
    pub size: u64,
    pub checksum: String,
    pub url: String,
}

/// Pick the export entry out of a discovery listing.
///
/// The listing also advertises mentions and knowledge-graph archives; those
/// and unparseable lines are ignored.
pub fn parse_last_update(body: &str, discovery_url: &str) -> Result<ListingEntry, RetrievalError> {
    body.lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let size = parts.next()?.parse::<u64>().ok()?;
            let checksum = parts.next()?;
            let url = parts.next()?;
            if parts.next().is_some() {
                return None;
            }
            Some(ListingEntry {
                size,
                checksum: checksum.to_string(),
                url: url.to_string(),
            })
        })
        .find(|entry| entry.url.to_ascii_lowercase().ends_with(EXPORT_SUFFIX))
        .ok_or_else(|| RetrievalError::NoExportEntry {
            url: discovery_url.to_string(),
        })
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

async fn get_bytes(client: &Client, url: &str) -> Result<Vec<u8>, RetrievalError> {
    let request_failed = |e: reqwest::Error| RetrievalError::Request {
        url: url.to_string(),
        reason: e.to_string(),
    };

    let resp = client
        .get(url)
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(request_failed)?;
    let bytes = resp.bytes().await.map_err(request_failed)?;
    Ok(bytes.to_vec())
}

// =============================================================================
// Feed
// =============================================================================

pub struct HttpFeedSource {
    client: Client,
    discovery_url: String,
    /// Entry from the most recent discovery, used to check the download size.
    advertised: Mutex<Option<ListingEntry>>,
}

impl HttpFeedSource {
    pub fn new(client: Client, discovery_url: impl Into<String>) -> Self {
        Self {
            client,
            discovery_url: discovery_url.into(),
            advertised: Mutex::new(None),
        }
    }
}

#[async_trait]
impl FeedSource for HttpFeedSource {
    async fn latest_export_url(&self) -> Result<String, RetrievalError> {
        let body = get_bytes(&self.client, &self.discovery_url).await?;
        let body = String::from_utf8_lossy(&body);
        let entry = parse_last_update(&body, &self.discovery_url)?;

        info!(
            url = %entry.url,
            size = entry.size,
            checksum = %entry.checksum,
            "Discovery listing read"
        );
        let url = entry.url.clone();
        *self.advertised.lock().await = Some(entry);
        Ok(url)
    }

    async fn fetch_export(&self, url: &str) -> Result<Vec<u8>, RetrievalError> {
        let bytes = get_bytes(&self.client, url).await?;
        let actual = bytes.len() as u64;

        if let Some(entry) = self.advertised.lock().await.as_ref() {
            if entry.url == url && entry.size != actual {
                return Err(RetrievalError::SizeMismatch {
                    url: url.to_string(),
                    expected: entry.size,
                    actual,
                });
            }
        }

        info!(
            url = %url,
            bytes = actual,
            sha256 = %sha256_hex(&bytes),
            "Export downloaded"
        );
        Ok(bytes)
    }
}

// =============================================================================
// Boundaries
// =============================================================================

pub struct HttpBoundarySource {
    client: Client,
    url: String,
}

impl HttpBoundarySource {
    pub fn new(client: Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl BoundarySource for HttpBoundarySource {
    async fn fetch_boundaries(&self) -> Result<Vec<u8>, RetrievalError> {
        let bytes = get_bytes(&self.client, &self.url).await?;
        info!(
            url = %self.url,
            bytes = bytes.len(),
            sha256 = %sha256_hex(&bytes),
            "Boundary dataset downloaded"
        );
        Ok(bytes)
    }
}

/// Boundary dataset already on disk.
pub struct FileBoundarySource {
    path: PathBuf,
}

impl FileBoundarySource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl BoundarySource for FileBoundarySource {
    async fn fetch_boundaries(&self) -> Result<Vec<u8>, RetrievalError> {
        let bytes = tokio::fs::read(&self.path)
            .await
            .map_err(|source| RetrievalError::File {
                path: self.path.display().to_string(),
                source,
            })?;
        if bytes.is_empty() {
            warn!(path = %self.path.display(), "boundary file is empty");
        }
        info!(path = %self.path.display(), bytes = bytes.len(), "Boundary dataset read");
        Ok(bytes)
    }
}
