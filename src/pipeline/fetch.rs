//! Result materialization: download the bytes a finished job points at.
//!
//! No transformation happens here. The bytes are returned exactly as served,
//! together with the `Content-Type` header when the server sends one.

use crate::error::{ConfigError, StageError};
use crate::pipeline::service::http_client;
use async_trait::async_trait;
use tracing::debug;

/// Downloaded result payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Materialized {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

/// Something that can fetch a result reference.
#[async_trait]
pub trait ResultFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Materialized, StageError>;
}

/// Plain HTTP GET fetcher.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(timeout_secs: u64) -> Result<Self, ConfigError> {
        Ok(Self {
            client: http_client(timeout_secs)?,
        })
    }
}

#[async_trait]
impl ResultFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Materialized, StageError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| StageError::Download {
                status: None,
                detail: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(StageError::Download {
                status: Some(status.as_u16()),
                detail: format!("GET {url}"),
            });
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let bytes = response.bytes().await.map_err(|e| StageError::Download {
            status: Some(status.as_u16()),
            detail: e.to_string(),
        })?;
        if bytes.is_empty() {
            return Err(StageError::Download {
                status: Some(status.as_u16()),
                detail: format!("GET {url} returned an empty body"),
            });
        }

        debug!("Downloaded {} bytes from {}", bytes.len(), url);
        Ok(Materialized {
            bytes: bytes.to_vec(),
            content_type,
        })
    }
}
