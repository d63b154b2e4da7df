//! Output types returned by a successful pipeline run.

use serde::{Deserialize, Serialize};

/// The final artifact of a run: bytes of the last stage plus per-stage stats.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineOutput {
    /// Final image bytes, exactly as downloaded from the last stage.
    #[serde(skip)]
    pub bytes: Vec<u8>,

    /// MIME type of `bytes`, e.g. `image/png`.
    pub content_type: String,

    /// One report per completed stage, in execution order.
    pub stages: Vec<StageReport>,

    /// Wall-clock duration of the whole run.
    pub total_duration_ms: u64,
}

impl PipelineOutput {
    /// File extension matching `content_type`, without the dot.
    pub fn extension(&self) -> &'static str {
        extension_for(&self.content_type)
    }
}

/// Statistics for one completed stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageReport {
    pub stage: String,
    /// Remote job id; `None` when the service answered synchronously.
    pub job_id: Option<String>,
    /// Number of status queries issued (0 for synchronous services).
    pub poll_attempts: u32,
    /// Whether the input was downscaled before submission.
    pub resized: bool,
    /// Size of the materialized output in bytes.
    pub output_bytes: usize,
    pub duration_ms: u64,
}

/// Map a MIME type to a conventional file extension.
pub fn extension_for(content_type: &str) -> &'static str {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();
    match essence.as_str() {
        "image/png" => "png",
        "image/jpeg" | "image/jpg" => "jpg",
        "image/webp" => "webp",
        "image/bmp" => "bmp",
        _ => "bin",
    }
}
