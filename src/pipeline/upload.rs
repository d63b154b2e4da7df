//! Upload adapter: turn image bytes into a publicly retrievable URL.
//!
//! Reference-based job services only accept URLs, so each input is first
//! pushed to an image host. The host (ImgBB-compatible) takes the API key and
//! the base64-encoded image as form fields and answers with
//! `{"data": {"url": "…"}, "success": true}`.

use crate::config::UploadConfig;
use crate::error::{ConfigError, StageError};
use crate::pipeline::normalize::ImageAsset;
use crate::pipeline::service::{http_client, json_str, parse_json, truncate};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::path::Path;
use tracing::debug;

/// Something that can host an image and hand back its public URL.
#[async_trait]
pub trait Uploader: Send + Sync {
    async fn upload(&self, asset: &ImageAsset) -> Result<String, StageError>;
}

/// Uploader for ImgBB-compatible hosts.
pub struct ImageHostUploader {
    client: reqwest::Client,
    config: UploadConfig,
}

impl ImageHostUploader {
    pub fn new(config: UploadConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            client: http_client(config.timeout_secs)?,
            config,
        })
    }
}

#[async_trait]
impl Uploader for ImageHostUploader {
    async fn upload(&self, asset: &ImageAsset) -> Result<String, StageError> {
        if asset.bytes.is_empty() {
            return Err(StageError::Validation(format!(
                "refusing to upload empty image '{}'",
                asset.filename
            )));
        }

        let encoded = STANDARD.encode(&asset.bytes);
        let name = Path::new(&asset.filename)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("image")
            .to_string();
        debug!(
            "Uploading {} ({} bytes → {} bytes base64)",
            asset.filename,
            asset.bytes.len(),
            encoded.len()
        );

        let response = self
            .client
            .post(&self.config.endpoint)
            .form(&[
                ("key", self.config.api_key.as_str()),
                ("image", encoded.as_str()),
                ("name", name.as_str()),
            ])
            .send()
            .await
            .map_err(|e| StageError::Upload {
                status: None,
                body: e.to_string(),
            })?;
        let status = response.status().as_u16();
        let text = response.text().await.map_err(|e| StageError::Upload {
            status: Some(status),
            body: e.to_string(),
        })?;

        let url = parse_upload_response(status, &text)?;
        debug!("Uploaded {} → {}", asset.filename, url);
        Ok(url)
    }
}

/// Extract `data.url` from an upload response.
pub fn parse_upload_response(status: u16, body: &str) -> Result<String, StageError> {
    if !(200..300).contains(&status) {
        return Err(StageError::Upload {
            status: Some(status),
            body: truncate(body),
        });
    }
    let v = parse_json(body, |m| StageError::Upload {
        status: Some(status),
        body: m,
    })?;

    if v.get("success").and_then(|s| s.as_bool()) == Some(false) {
        return Err(StageError::Upload {
            status: Some(status),
            body: format!("host reported failure: {}", truncate(body)),
        });
    }

    json_str(&v, &["data", "url"]).ok_or_else(|| StageError::Upload {
        status: Some(status),
        body: format!("response lacks data.url: {}", truncate(body)),
    })
}
