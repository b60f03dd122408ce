// SPDX-License-Identifier: GPL-3.0-or-later

//! HTTP adapter for the Nicotine+ web API.
//!
//! Nicotine+ fronts the Soulseek network; its web API plugin exposes
//! synchronous search and download endpoints on localhost. Network and
//! server-side failures both surface as [`BackendError`]; the acquisition
//! engine decides whether to retry.

use async_trait::async_trait;
use recotine_application::collab::{BackendError, SoulseekClient, TransferReceipt};
use recotine_domain::{AudioFormat, NormalizedKey, SearchResult};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, trace, warn};

const DEFAULT_API_BASE: &str = "http://localhost:7770";
const USER_AGENT: &str = concat!("Recotine/", env!("CARGO_PKG_VERSION"));

/// One result row as the web API reports it.
#[derive(Debug, Deserialize)]
struct WireResult {
    user: String,
    file_name: String,
    file_extension: String,
    file_size: u64,
    bitrate: Option<u32>,
    #[serde(default)]
    inqueue: u32,
}

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    query: &'a str,
}

#[derive(Debug, Serialize)]
struct DownloadRequest<'a> {
    user: &'a str,
    file_name: &'a str,
    file_size: u64,
    destination: &'a str,
}

#[derive(Debug, Serialize)]
struct AbortRequest<'a> {
    user: &'a str,
    file_name: &'a str,
}

#[derive(Debug, Deserialize)]
struct DownloadResponse {
    bytes_transferred: u64,
}

#[derive(Debug, Clone)]
pub struct NicotineClient {
    client: Client,
    base_url: String,
}

impl NicotineClient {
    pub fn new() -> Result<Self, BackendError> {
        Self::builder().build()
    }

    pub fn builder() -> NicotineClientBuilder {
        NicotineClientBuilder::default()
    }

    pub fn from_config(config: &recotine_config::SoulseekConfig) -> Result<Self, BackendError> {
        Self::builder()
            .base_url(&config.api_url)
            .timeout(Duration::from_secs(config.download_timeout_secs))
            .build()
    }

    /// Probe the API root. Used once at startup so a stopped Nicotine+
    /// fails the run before any task is scheduled.
    pub async fn check_available(&self) -> Result<(), BackendError> {
        let response = self
            .client
            .get(&self.base_url)
            .send()
            .await
            .map_err(|e| BackendError::Unavailable(e.to_string()))?;
        if !response.status().is_success() {
            return Err(BackendError::Unavailable(format!(
                "api root returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl SoulseekClient for NicotineClient {
    async fn search(
        &self,
        candidate_key: &NormalizedKey,
        query: &str,
    ) -> Result<Vec<SearchResult>, BackendError> {
        let url = format!("{}/searches", self.base_url);
        trace!(target: "nicotine", %query, "POST {url}");

        let response = self
            .client
            .post(&url)
            .json(&SearchRequest { query })
            .send()
            .await
            .map_err(connect_error)?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(BackendError::Request(format!(
                "search returned {status}: {message}"
            )));
        }

        let rows: Vec<WireResult> = response
            .json()
            .await
            .map_err(|e| BackendError::Request(format!("malformed search response: {e}")))?;
        debug!(target: "nicotine", %query, results = rows.len(), "search finished");

        Ok(rows
            .into_iter()
            .map(|row| SearchResult {
                candidate_key: candidate_key.clone(),
                peer_id: row.user,
                filename: row.file_name,
                format: AudioFormat::from_extension(&row.file_extension),
                bitrate_kbps: row.bitrate,
                file_size_bytes: row.file_size,
                queue_position: row.inqueue,
            })
            .collect())
    }

    async fn download(
        &self,
        result: &SearchResult,
        destination: &Path,
    ) -> Result<TransferReceipt, BackendError> {
        let url = format!("{}/downloads", self.base_url);
        trace!(target: "nicotine", peer = %result.peer_id, file = %result.filename, "POST {url}");

        let destination = destination.to_string_lossy();
        let response = self
            .client
            .post(&url)
            .json(&DownloadRequest {
                user: &result.peer_id,
                file_name: &result.filename,
                file_size: result.file_size_bytes,
                destination: &destination,
            })
            .send()
            .await
            .map_err(connect_error)?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(BackendError::Request(format!(
                "download returned {status}: {message}"
            )));
        }

        let receipt: DownloadResponse = response
            .json()
            .await
            .map_err(|e| BackendError::Request(format!("malformed download response: {e}")))?;
        Ok(TransferReceipt {
            bytes_transferred: receipt.bytes_transferred,
        })
    }

    async fn abort_and_clean(
        &self,
        result: &SearchResult,
        destination: &Path,
    ) -> Result<(), BackendError> {
        let url = format!("{}/downloads/abortandclean", self.base_url);
        trace!(target: "nicotine", peer = %result.peer_id, file = %result.filename, "DELETE {url}");

        // Best effort: the local file still has to go even when the
        // server-side abort fails (the transfer may already be gone there).
        let abort = self
            .client
            .delete(&url)
            .json(&AbortRequest {
                user: &result.peer_id,
                file_name: &result.filename,
            })
            .send()
            .await;
        match abort {
            Ok(response) if !response.status().is_success() => {
                warn!(target: "nicotine", peer = %result.peer_id, status = %response.status(), "abort returned error status");
            }
            Err(err) => {
                warn!(target: "nicotine", peer = %result.peer_id, %err, "abort request failed");
            }
            Ok(_) => {}
        }

        match tokio::fs::remove_file(destination).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(BackendError::Request(err.to_string())),
        }
    }
}

fn connect_error(err: reqwest::Error) -> BackendError {
    if err.is_connect() || err.is_timeout() {
        BackendError::Unavailable(err.to_string())
    } else {
        BackendError::Request(err.to_string())
    }
}

#[derive(Debug)]
pub struct NicotineClientBuilder {
    base_url: String,
    timeout: Duration,
}

impl Default for NicotineClientBuilder {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_BASE.to_string(),
            timeout: Duration::from_secs(300),
        }
    }
}

impl NicotineClientBuilder {
    /// Set a custom base URL (useful for testing with mock servers).
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn build(self) -> Result<NicotineClient, BackendError> {
        let client = Client::builder()
            .timeout(self.timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| BackendError::Request(e.to_string()))?;
        Ok(NicotineClient {
            client,
            base_url: self.base_url,
        })
    }
}
