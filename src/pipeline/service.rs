//! The job-service abstraction shared by every vendor adapter.
//!
//! Vendors disagree on almost everything: field names for the job id, the
//! status vocabulary, where the result URL lives, whether the input is a URL
//! or a multipart upload. [`JobService`] hides those differences behind two
//! operations, `submit` and `check_status`, so the polling engine and the
//! orchestrator never parse vendor JSON themselves.

use crate::config::PollingConfig;
use crate::error::{ConfigError, StageError};
use crate::pipeline::normalize::ImageAsset;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

/// How a service expects its input images.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionShape {
    /// JSON body referencing already-uploaded public URLs.
    Reference,
    /// Multipart body carrying the raw bytes.
    Inline,
}

/// A resolved input reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetRef {
    Url(String),
    Inline(ImageAsset),
}

impl AssetRef {
    pub fn as_url(&self) -> Option<&str> {
        match self {
            AssetRef::Url(u) => Some(u),
            AssetRef::Inline(_) => None,
        }
    }

    pub fn as_inline(&self) -> Option<&ImageAsset> {
        match self {
            AssetRef::Inline(a) => Some(a),
            AssetRef::Url(_) => None,
        }
    }
}

/// Normalized input to [`JobService::submit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageRequest {
    /// Ordered inputs; the meaning of each position is service-specific.
    pub assets: Vec<AssetRef>,
    /// Opaque style selector; `None` uses the service's configured default.
    pub style: Option<String>,
}

impl StageRequest {
    /// The reference at `index` as a URL, or a validation error.
    pub fn url_at(&self, index: usize) -> Result<&str, StageError> {
        self.assets
            .get(index)
            .and_then(AssetRef::as_url)
            .filter(|u| !u.is_empty())
            .ok_or_else(|| StageError::Validation(format!("input #{} is not an uploaded URL", index + 1)))
    }

    /// The reference at `index` as inline bytes, or a validation error.
    pub fn inline_at(&self, index: usize) -> Result<&ImageAsset, StageError> {
        self.assets
            .get(index)
            .and_then(AssetRef::as_inline)
            .filter(|a| !a.bytes.is_empty())
            .ok_or_else(|| StageError::Validation(format!("input #{} has no inline image bytes", index + 1)))
    }
}

/// A submitted, still-running job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    pub job_id: String,
    pub polling: PollingConfig,
}

/// What a submission returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    /// Asynchronous flavor: poll this handle.
    Job(JobHandle),
    /// Synchronous flavor: the result is already available.
    Immediate { result_url: String },
}

/// One parsed status response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusReport {
    /// Raw vendor status, e.g. `"processing"` or `"PROCESS_SUCCESS"`.
    pub status: String,
    pub result_url: Option<String>,
    pub error_message: Option<String>,
}

/// A remote, job-based image transformation service.
#[async_trait]
pub trait JobService: Send + Sync {
    /// Stage name used in logs and errors.
    fn name(&self) -> &str;

    fn submission_shape(&self) -> SubmissionShape;

    /// Number of input images a request must carry.
    fn required_inputs(&self) -> usize {
        1
    }

    async fn submit(&self, request: &StageRequest) -> Result<Submission, StageError>;

    async fn check_status(&self, job_id: &str) -> Result<StatusReport, StageError>;
}

// ── Shared HTTP helpers ──────────────────────────────────────────────────

/// Build a `reqwest::Client` with a per-request timeout.
pub(crate) fn http_client(timeout_secs: u64) -> Result<reqwest::Client, ConfigError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| ConfigError::Invalid(format!("HTTP client: {e}")))
}

/// Read a string at `path`, accepting numbers too. Empty strings are `None`.
pub(crate) fn json_str(value: &Value, path: &[&str]) -> Option<String> {
    let mut v = value;
    for key in path {
        v = v.get(key)?;
    }
    match v {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Parse a body as JSON, mapping failure with `err`.
pub(crate) fn parse_json<E>(body: &str, err: E) -> Result<Value, StageError>
where
    E: FnOnce(String) -> StageError,
{
    serde_json::from_str(body).map_err(|e| err(format!("invalid JSON ({e}): {}", truncate(body))))
}

/// Shorten a response body for error messages.
pub(crate) fn truncate(body: &str) -> String {
    const MAX: usize = 300;
    if body.len() <= MAX {
        return body.to_string();
    }
    let mut end = MAX;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &body[..end])
}
