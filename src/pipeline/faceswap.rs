//! Face-swap adapter: reference-based submission, asynchronous job.
//!
//! The service cannot take inline bytes, so both images must be uploaded
//! first (see [`crate::pipeline::upload`]) and referenced by URL.
//!
//! ```text
//! POST {base}/api/v1/task           x-api-key: …
//!   {"model", "task_type", "input": {"target_image_url", "swap_image_url"}}
//!   → {"code": 200, "data": {"task_id": "…"}}
//!
//! GET  {base}/api/v1/task/{task_id} x-api-key: …
//!   → {"data": {"status": "completed", "output": {"image_url": "…"}}}
//!   → {"data": {"status": "failed", "error": {"message": "…"}}}
//! ```

use crate::config::FaceSwapConfig;
use crate::error::{ConfigError, StageError};
use crate::pipeline::service::{
    http_client, json_str, parse_json, truncate, JobHandle, JobService, StageRequest,
    StatusReport, Submission, SubmissionShape,
};
use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

const API_KEY_HEADER: &str = "x-api-key";

/// Reference-based face-swap job service.
pub struct FaceSwapService {
    client: reqwest::Client,
    config: FaceSwapConfig,
}

impl FaceSwapService {
    pub fn new(config: FaceSwapConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            client: http_client(config.timeout_secs)?,
            config,
        })
    }

    fn task_url(&self) -> String {
        format!("{}/api/v1/task", self.config.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl JobService for FaceSwapService {
    fn name(&self) -> &str {
        "faceswap"
    }

    fn submission_shape(&self) -> SubmissionShape {
        SubmissionShape::Reference
    }

    /// Input #1 is the target image, input #2 supplies the face.
    fn required_inputs(&self) -> usize {
        2
    }

    async fn submit(&self, request: &StageRequest) -> Result<Submission, StageError> {
        let body = json!({
            "model": self.config.model,
            "task_type": self.config.task_type,
            "input": {
                "target_image_url": request.url_at(0)?,
                "swap_image_url": request.url_at(1)?,
            }
        });

        let response = self
            .client
            .post(self.task_url())
            .header(API_KEY_HEADER, &self.config.api_key)
            .json(&body)
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

        let job_id = parse_submit_response(status, &text)?;
        debug!("faceswap: submitted task {}", job_id);
        Ok(Submission::Job(JobHandle {
            job_id,
            polling: self.config.polling.clone(),
        }))
    }

    async fn check_status(&self, job_id: &str) -> Result<StatusReport, StageError> {
        let response = self
            .client
            .get(format!("{}/{}", self.task_url(), job_id))
            .header(API_KEY_HEADER, &self.config.api_key)
            .send()
            .await
            .map_err(|e| StageError::PollTransport(e.to_string()))?;
        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| StageError::PollTransport(e.to_string()))?;
        parse_status_response(status, &text)
    }
}

/// Extract `data.task_id` from a submission response.
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

    if let Some(code) = v.get("code").and_then(|c| c.as_i64()) {
        if code != 200 {
            return Err(StageError::Submission {
                status: Some(status),
                body: format!("vendor code {code}: {}", truncate(body)),
            });
        }
    }

    json_str(&v, &["data", "task_id"]).ok_or_else(|| StageError::Submission {
        status: Some(status),
        body: format!("response lacks data.task_id: {}", truncate(body)),
    })
}

/// Parse a task status response.
pub fn parse_status_response(status: u16, body: &str) -> Result<StatusReport, StageError> {
    if !(200..300).contains(&status) {
        return Err(StageError::PollTransport(format!(
            "HTTP {status}: {}",
            truncate(body)
        )));
    }
    let v = parse_json(body, StageError::PollTransport)?;
    let status = json_str(&v, &["data", "status"]).ok_or_else(|| {
        StageError::PollTransport(format!("response lacks data.status: {}", truncate(body)))
    })?;

    Ok(StatusReport {
        status,
        result_url: json_str(&v, &["data", "output", "image_url"]),
        error_message: json_str(&v, &["data", "error", "message"]),
    })
}
