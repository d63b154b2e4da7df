//! Cartoon-stylization adapter: inline multipart submission, asynchronous job.
//!
//! ```text
//! POST {base}/api/image/effects/generate-cartoonized-image   ailabapi-api-key: …
//!   multipart: image=<bytes>, type=<style index>
//!   → {"error_code": 0, "request_id": "…"}
//!
//! GET  {base}/api/common/query-async-task-result?job_id=…&type=…
//!   → {"error_code": 0, "data": {"status": "PROCESS_SUCCESS", "result_url": "…"}}
//! ```
//!
//! Jobs routinely take minutes, which is why the default polling budget for
//! this service is much larger than the face-swap one.

use crate::config::CartoonConfig;
use crate::error::{ConfigError, StageError};
use crate::pipeline::service::{
    http_client, json_str, parse_json, truncate, JobHandle, JobService, StageRequest,
    StatusReport, Submission, SubmissionShape,
};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde_json::Value;
use tracing::debug;

const API_KEY_HEADER: &str = "ailabapi-api-key";

/// Inline cartoon-stylization job service.
pub struct CartoonService {
    client: reqwest::Client,
    config: CartoonConfig,
}

impl CartoonService {
    pub fn new(config: CartoonConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            client: http_client(config.timeout_secs)?,
            config,
        })
    }

    fn base(&self) -> &str {
        self.config.base_url.trim_end_matches('/')
    }
}

#[async_trait]
impl JobService for CartoonService {
    fn name(&self) -> &str {
        "cartoon"
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
            .post(format!("{}/api/image/effects/generate-cartoonized-image", self.base()))
            .header(API_KEY_HEADER, &self.config.api_key)
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

        let job_id = parse_submit_response(status, &text)?;
        debug!("cartoon: submitted job {}", job_id);
        Ok(Submission::Job(JobHandle {
            job_id,
            polling: self.config.polling.clone(),
        }))
    }

    async fn check_status(&self, job_id: &str) -> Result<StatusReport, StageError> {
        let response = self
            .client
            .get(format!("{}/api/common/query-async-task-result", self.base()))
            .query(&[("job_id", job_id), ("type", self.config.task_type.as_str())])
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

fn error_code(v: &Value) -> i64 {
    v.get("error_code").and_then(Value::as_i64).unwrap_or(0)
}

fn vendor_message(v: &Value) -> Option<String> {
    json_str(v, &["error_msg"]).or_else(|| json_str(v, &["error_detail", "message"]))
}

/// Extract `request_id` from a submission response.
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

    let code = error_code(&v);
    if code != 0 {
        return Err(StageError::Submission {
            status: Some(status),
            body: format!(
                "error_code {code}: {}",
                vendor_message(&v).unwrap_or_else(|| truncate(body))
            ),
        });
    }

    json_str(&v, &["request_id"])
        .or_else(|| json_str(&v, &["task_id"]))
        .ok_or_else(|| StageError::Submission {
            status: Some(status),
            body: format!("response lacks request_id: {}", truncate(body)),
        })
}

/// Parse an async-task status response.
pub fn parse_status_response(status: u16, body: &str) -> Result<StatusReport, StageError> {
    if !(200..300).contains(&status) {
        return Err(StageError::PollTransport(format!(
            "HTTP {status}: {}",
            truncate(body)
        )));
    }
    let v = parse_json(body, StageError::PollTransport)?;

    let code = error_code(&v);
    if code != 0 {
        return Err(StageError::PollTransport(format!(
            "error_code {code}: {}",
            vendor_message(&v).unwrap_or_else(|| truncate(body))
        )));
    }

    let status = json_str(&v, &["data", "status"]).ok_or_else(|| {
        StageError::PollTransport(format!("response lacks data.status: {}", truncate(body)))
    })?;

    Ok(StatusReport {
        status,
        result_url: json_str(&v, &["data", "result_url"]),
        error_message: vendor_message(&v),
    })
}
