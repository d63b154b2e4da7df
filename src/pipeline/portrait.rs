//! Portrait-animation adapter: inline submission, synchronous result.
//!
//! This RapidAPI endpoint renders the cartoon within the request itself and
//! answers with the result URL directly, so there is no job to poll:
//!
//! ```text
//! POST {endpoint}   x-rapidapi-key, x-rapidapi-host
//!   multipart: image=<bytes>, type=<style name>
//!   → {"data": {"image_url": "…"}}
//! ```

use crate::config::PortraitConfig;
use crate::error::{ConfigError, StageError};
use crate::pipeline::service::{
    http_client, json_str, parse_json, truncate, JobService, StageRequest, StatusReport,
    Submission, SubmissionShape,
};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use tracing::debug;

/// Synchronous-style portrait animation service.
pub struct PortraitService {
    client: reqwest::Client,
    config: PortraitConfig,
}

impl PortraitService {
    pub fn new(config: PortraitConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            client: http_client(config.timeout_secs)?,
            config,
        })
    }
}

#[async_trait]
impl JobService for PortraitService {
    fn name(&self) -> &str {
        "portrait"
    }

    fn submission_shape(&self) -> SubmissionShape {
        SubmissionShape::Inline
    }

    async fn submit(&self, request: &StageRequest) -> Result<Submission, StageError> {
        let asset = request.inline_at(0)?;
        let style = request
            .style
            .clone()
            .unwrap_or_else(|| self.config.style.clone());

        let part = Part::bytes(asset.bytes.clone())
            .file_name(asset.filename.clone())
            .mime_str(&asset.content_type)
            .map_err(|e| StageError::Validation(format!("content type: {e}")))?;
        let form = Form::new().part("image", part).text("type", style);

        let response = self
            .client
            .post(&self.config.endpoint)
            .header("x-rapidapi-key", &self.config.api_key)
            .header("x-rapidapi-host", &self.config.api_host)
            .multipart(form)
            .send()
            .await
            .map_err(|e| StageError::Submission {
                status: None,
                body: e.to_string(),
            })?;
        let status = response.status().as_u16();
        let text = response.text().await.map_err(|e| StageError::Submission {
            status: Some(status),
            body: e.to_string(),
        })?;

        let result_url = parse_submit_response(status, &text)?;
        debug!("portrait: result ready at {}", result_url);
        Ok(Submission::Immediate { result_url })
    }

    async fn check_status(&self, job_id: &str) -> Result<StatusReport, StageError> {
        Err(StageError::PollTransport(format!(
            "portrait service has no job status endpoint (job '{job_id}')"
        )))
    }
}

/// Extract `data.image_url` from the synchronous response.
pub fn parse_submit_response(status: u16, body: &str) -> Result<String, StageError> {
    if !(200..300).contains(&status) {
        return Err(StageError::Submission {
            status: Some(status),
            body: truncate(body),
        });
    }
    let v = parse_json(body, |m| StageError::Submission {
        status: Some(status),
        body: m,
    })?;
    json_str(&v, &["data", "image_url"]).ok_or_else(|| {
        StageError::MalformedResult(format!("response lacks data.image_url: {}", truncate(body)))
    })
}
