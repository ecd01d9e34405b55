//! Content-addressed storage for schema documents.
//!
//! [`PinningClient`] is the capability the schema service depends on;
//! [`PinataClient`] implements it against a Pinata-compatible HTTP API:
//!
//! - `POST {endpoint}/pinFileToIPFS`, multipart field `file` plus
//!   `pinataMetadata` / `pinataOptions`, answered by
//!   `{ IpfsHash, PinSize, Timestamp }`
//! - `DELETE {endpoint}/unpin/{cid}`
//!
//! Any non-2xx answer becomes [`PinningError::Status`] carrying the
//! provider's status code and body.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::PinningError;

/// Default connect and request timeout.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// A file pinned by the backend.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinnedFile {
    #[serde(rename = "IpfsHash")]
    pub cid: String,
    #[serde(rename = "PinSize", default)]
    pub size: u64,
    #[serde(rename = "Timestamp", default)]
    pub timestamp: String,
}

#[async_trait]
pub trait PinningClient: Send + Sync {
    /// Pin `content` under the display name `name`.
    async fn pin(&self, name: &str, content: Vec<u8>) -> Result<PinnedFile, PinningError>;

    async fn unpin(&self, cid: &str) -> Result<(), PinningError>;

    /// Public URL of a pinned CID.
    fn gateway_url(&self, cid: &str) -> String;
}

#[derive(Clone, Debug)]
pub struct PinataConfig {
    /// API base, e.g. `https://api.pinata.cloud/pinning`.
    pub endpoint: String,
    /// Bearer token.
    pub jwt_key: String,
    /// Gateway base, e.g. `https://gateway.pinata.cloud/ipfs`.
    pub gateway_url: String,
    pub timeout_secs: u64,
}

impl PinataConfig {
    pub fn new(endpoint: impl Into<String>, jwt_key: impl Into<String>, gateway_url: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            jwt_key: jwt_key.into(),
            gateway_url: gateway_url.into(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug)]
pub struct PinataClient {
    client: reqwest::Client,
    endpoint: String,
    jwt_key: String,
    gateway_url: String,
}

impl PinataClient {
    pub fn new(config: PinataConfig) -> Result<Self, PinningError> {
        if config.jwt_key.is_empty() {
            return Err(PinningError::Config("missing JWT key".into()));
        }
        let timeout = Duration::from_secs(config.timeout_secs);
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()
            .map_err(|e| PinningError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            jwt_key: config.jwt_key,
            gateway_url: config.gateway_url.trim_end_matches('/').to_string(),
        })
    }

    async fn check(endpoint: &str, resp: reqwest::Response) -> Result<reqwest::Response, PinningError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(PinningError::Status {
            endpoint: endpoint.to_string(),
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl PinningClient for PinataClient {
    async fn pin(&self, name: &str, content: Vec<u8>) -> Result<PinnedFile, PinningError> {
        let url = format!("{}/pinFileToIPFS", self.endpoint);
        let size = content.len();
        let file = reqwest::multipart::Part::bytes(content)
            .file_name(name.to_string())
            .mime_str("application/json")
            .map_err(|e| PinningError::Config(format!("invalid content type: {e}")))?;
        let form = reqwest::multipart::Form::new()
            .part("file", file)
            .text("pinataMetadata", serde_json::json!({ "name": name }).to_string())
            .text("pinataOptions", serde_json::json!({ "cidVersion": 1 }).to_string());

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.jwt_key)
            .multipart(form)
            .send()
            .await
            .map_err(|source| PinningError::Http { endpoint: url.clone(), source })?;
        let resp = Self::check(&url, resp).await?;
        let pinned: PinnedFile = resp
            .json()
            .await
            .map_err(|source| PinningError::Deserialization { endpoint: url.clone(), source })?;

        info!(name, cid = %pinned.cid, bytes = size, "pinned document");
        Ok(pinned)
    }

    async fn unpin(&self, cid: &str) -> Result<(), PinningError> {
        let url = format!("{}/unpin/{}", self.endpoint, cid);
        let resp = self
            .client
            .delete(&url)
            .bearer_auth(&self.jwt_key)
            .send()
            .await
            .map_err(|source| PinningError::Http { endpoint: url.clone(), source })?;
        // Already gone.
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            debug!(cid, "unpin target not pinned");
            return Ok(());
        }
        Self::check(&url, resp).await?;
        debug!(cid, "unpinned document");
        Ok(())
    }

    fn gateway_url(&self, cid: &str) -> String {
        format!("{}/{}", self.gateway_url, cid)
    }
}
