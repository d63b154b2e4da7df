//! Error types for the toonswap library.
//!
//! Three error types cover three distinct failure modes:
//!
//! * [`StageError`]: what went wrong inside one stage (bad input, an upstream
//!   HTTP failure, a job that failed or never finished, cancellation).
//!
//! * [`PipelineError`]: a [`StageError`] tagged with the name of the stage
//!   that produced it. This is the only error returned by the orchestrator;
//!   [`PipelineError::class`] tells the caller whether the input was bad, an
//!   upstream service failed, or the job never finished in time.
//!
//! * [`ConfigError`]: configuration could not be built (missing API key,
//!   invalid polling budget). Raised before any pipeline runs.
//!
//! [`ToonswapError`] is what the top-level entry points return: any of the
//! above, or a failure writing the result to disk.

use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

/// All errors returned by the top-level `swap_and_cartoonify*` / `cartoonify`
/// entry points.
#[derive(Debug, Error)]
pub enum ToonswapError {
    /// The configuration is missing a service or holds invalid values.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A stage failed; the run stopped there.
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    /// Could not create or write the output image file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ToonswapError {
    /// The stage failure, if this error came from a pipeline run.
    pub fn as_pipeline(&self) -> Option<&PipelineError> {
        match self {
            ToonswapError::Pipeline(e) => Some(e),
            _ => None,
        }
    }
}

/// Everything that can go wrong within a single stage.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StageError {
    // ── Caller errors ─────────────────────────────────────────────────────
    /// Input was rejected before any network call (format, size, arity).
    #[error("Invalid input: {0}")]
    Validation(String),

    /// Image bytes could not be decoded.
    #[error("Could not decode image: {0}")]
    Decode(String),

    // ── Remote / transport errors ─────────────────────────────────────────
    /// The image host rejected the upload or answered with an unusable body.
    #[error("Upload failed{}: {body}", fmt_status(.status))]
    Upload { status: Option<u16>, body: String },

    /// The job service rejected the submission or omitted the job id.
    #[error("Job submission failed{}: {body}", fmt_status(.status))]
    Submission { status: Option<u16>, body: String },

    /// A status query failed at the transport level. Never retried.
    #[error("Status query failed: {0}")]
    PollTransport(String),

    /// The result asset could not be downloaded.
    #[error("Result download failed{}: {detail}", fmt_status(.status))]
    Download { status: Option<u16>, detail: String },

    /// The remote reported success but the response carried no usable result.
    #[error("Remote reported success but the result is unusable: {0}")]
    MalformedResult(String),

    // ── Job outcomes ──────────────────────────────────────────────────────
    /// The remote explicitly reported the job as failed.
    #[error("Job failed: {reason}")]
    TaskFailed { reason: String },

    /// The attempt budget was exhausted without reaching a terminal state.
    #[error("Job did not finish after {attempts} status checks")]
    TimedOut { attempts: u32 },

    /// The caller cancelled, or the end-to-end deadline elapsed.
    #[error("Cancelled: {0}")]
    Cancelled(String),
}

fn fmt_status(status: &Option<u16>) -> String {
    match status {
        Some(code) => format!(" (HTTP {code})"),
        None => String::new(),
    }
}

/// Coarse classification of a failure for user-facing reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// The caller's input was invalid; retrying the same input will not help.
    InvalidInput,
    /// An upstream service failed or returned garbage.
    Upstream,
    /// A job never reached a terminal state within its attempt budget.
    TimedOut,
    /// The invocation was cancelled or ran past its deadline.
    Cancelled,
}

impl StageError {
    /// Classify this error for the caller.
    pub fn class(&self) -> FailureClass {
        match self {
            StageError::Validation(_) | StageError::Decode(_) => FailureClass::InvalidInput,
            StageError::TimedOut { .. } => FailureClass::TimedOut,
            StageError::Cancelled(_) => FailureClass::Cancelled,
            StageError::Upload { .. }
            | StageError::Submission { .. }
            | StageError::PollTransport(_)
            | StageError::Download { .. }
            | StageError::MalformedResult(_)
            | StageError::TaskFailed { .. } => FailureClass::Upstream,
        }
    }

    /// Short machine-readable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            StageError::Validation(_) => "validation",
            StageError::Decode(_) => "decode",
            StageError::Upload { .. } => "upload",
            StageError::Submission { .. } => "submission",
            StageError::PollTransport(_) => "poll_transport",
            StageError::Download { .. } => "download",
            StageError::MalformedResult(_) => "malformed_result",
            StageError::TaskFailed { .. } => "task_failed",
            StageError::TimedOut { .. } => "timed_out",
            StageError::Cancelled(_) => "cancelled",
        }
    }
}

/// A stage failure as seen by the orchestrator's caller.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Stage '{stage}' failed: {source}")]
pub struct PipelineError {
    /// Name of the stage that failed (e.g. `"faceswap"`).
    pub stage: String,
    /// The underlying cause.
    #[source]
    pub source: StageError,
}

impl PipelineError {
    pub fn new(stage: impl Into<String>, source: StageError) -> Self {
        Self {
            stage: stage.into(),
            source,
        }
    }

    pub fn class(&self) -> FailureClass {
        self.source.class()
    }

    /// Serialisable failure descriptor (stage, kind, class, message).
    pub fn describe(&self) -> FailureDescriptor {
        FailureDescriptor {
            stage: self.stage.clone(),
            kind: self.source.kind(),
            class: self.class(),
            message: self.source.to_string(),
        }
    }
}

/// Flat failure description suitable for a JSON error body.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FailureDescriptor {
    pub stage: String,
    pub kind: &'static str,
    pub class: FailureClass,
    pub message: String,
}

/// Configuration could not be assembled.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A required API key was empty or not set in the environment.
    #[error("Missing API key for '{service}'.\nSet {env_var} or pass it explicitly.")]
    MissingApiKey {
        service: &'static str,
        env_var: &'static str,
    },

    /// A value was out of range or inconsistent.
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
