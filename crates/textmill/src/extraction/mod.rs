//! Remote text-extraction service client (text mode).
//!
//! Speaks the Tika server protocol: `PUT /tika` returns plain text,
//! `PUT /meta` returns a JSON metadata mapping. The service is consulted
//! only on a file-cache miss, so one round-trip per distinct file and
//! option set.

use crate::error::{Result, TextmillError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Remote text-extraction capability.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    /// Extract the full plain text of a document.
    async fn extract_text(&self, path: &Path) -> Result<String>;

    /// Extract document metadata as a flat mapping.
    async fn extract_metadata(&self, path: &Path) -> Result<HashMap<String, serde_json::Value>>;
}

/// HTTP client for a Tika-protocol extraction server.
pub struct ExtractionClient {
    base_url: String,
    http: reqwest::Client,
}

impl ExtractionClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                TextmillError::extraction(format!("Failed to build HTTP client: {}", e))
            })?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
        })
    }
}

#[async_trait]
impl TextExtractor for ExtractionClient {
    async fn extract_text(&self, path: &Path) -> Result<String> {
        let body = tokio::fs::read(path).await?;
        let response = self
            .http
            .put(format!("{}/tika", self.base_url))
            .header(reqwest::header::ACCEPT, "text/plain")
            .body(body)
            .send()
            .await?
            .error_for_status()?;

        Ok(response.text().await?.trim().to_string())
    }

    async fn extract_metadata(&self, path: &Path) -> Result<HashMap<String, serde_json::Value>> {
        let body = tokio::fs::read(path).await?;
        let response = self
            .http
            .put(format!("{}/meta", self.base_url))
            .header(reqwest::header::ACCEPT, "application/json")
            .body(body)
            .send()
            .await?
            .error_for_status()?;

        Ok(response.json().await?)
    }
}
