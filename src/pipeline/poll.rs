//! Polling engine: drive a submitted job to a terminal state.
//!
//! ## State machine
//!
//! ```text
//!            ┌──── non-terminal status, sleep `interval` ───┐
//!            ▼                                               │
//!        Pending ── status query ──► classify ───────────────┘
//!            │                          │ success set  → Succeeded (needs result URL)
//!            │                          │ failure set  → Failed
//!            └── `max_attempts` queries without a terminal status → TimedOut
//! ```
//!
//! Only *status values* are retried. A query that fails at the transport
//! level ends polling immediately with [`StageError::PollTransport`]; blindly
//! re-querying a service that is down only delays the inevitable error.
//!
//! Status strings are matched case-insensitively against the stage's success
//! and failure sets: vendors are inconsistent (`"Failed"`, `"FAILED"`,
//! `"PROCESS_FAILED"`), and the vocabulary is configuration, not code.

use crate::cancel::Suspend;
use crate::config::PollingConfig;
use crate::error::StageError;
use crate::pipeline::service::{JobHandle, JobService};
use crate::progress::PipelineProgressCallback;
use tracing::{debug, warn};

/// Terminal result of polling one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// `result_reference` is never empty.
    Success { result_reference: String },
    Failure { reason: String },
    TimedOut { attempts: u32 },
}

impl JobOutcome {
    /// The result reference, or the matching [`StageError`].
    pub fn into_result(self) -> Result<String, StageError> {
        match self {
            JobOutcome::Success { result_reference } => Ok(result_reference),
            JobOutcome::Failure { reason } => Err(StageError::TaskFailed { reason }),
            JobOutcome::TimedOut { attempts } => Err(StageError::TimedOut { attempts }),
        }
    }
}

/// Outcome plus the number of status queries it took.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Polled {
    pub outcome: JobOutcome,
    pub attempts: u32,
}

/// Classification of a single status string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    Succeeded,
    Failed,
    Pending,
}

/// Classify `status` against the configured vocabularies.
pub fn classify(status: &str, config: &PollingConfig) -> StatusClass {
    let status = status.trim();
    if config
        .success_statuses
        .iter()
        .any(|s| s.eq_ignore_ascii_case(status))
    {
        StatusClass::Succeeded
    } else if config
        .failure_statuses
        .iter()
        .any(|s| s.eq_ignore_ascii_case(status))
    {
        StatusClass::Failed
    } else {
        StatusClass::Pending
    }
}

/// Poll `handle` until it succeeds, fails, or runs out of attempts.
///
/// Performs at most `max_attempts` status queries with exactly one
/// `interval` sleep between consecutive queries (never after the last one).
/// Every query and every sleep is a cancellable suspension point.
pub async fn poll_job(
    service: &dyn JobService,
    handle: &JobHandle,
    suspend: &Suspend,
    progress: &dyn PipelineProgressCallback,
) -> Result<Polled, StageError> {
    let stage = service.name();
    let polling = &handle.polling;
    let max_attempts = polling.max_attempts.max(1);

    for attempt in 1..=max_attempts {
        let report = suspend.run(service.check_status(&handle.job_id)).await??;
        debug!(
            "{}: job {} attempt {}/{} → {}",
            stage, handle.job_id, attempt, max_attempts, report.status
        );
        progress.on_poll_attempt(stage, attempt, max_attempts, &report.status);

        match classify(&report.status, polling) {
            StatusClass::Succeeded => {
                let result_reference = report
                    .result_url
                    .filter(|u| !u.trim().is_empty())
                    .ok_or_else(|| {
                        StageError::MalformedResult(format!(
                            "job {} reported '{}' without a result URL",
                            handle.job_id, report.status
                        ))
                    })?;
                return Ok(Polled {
                    outcome: JobOutcome::Success { result_reference },
                    attempts: attempt,
                });
            }
            StatusClass::Failed => {
                let reason = report
                    .error_message
                    .unwrap_or_else(|| format!("remote status '{}'", report.status));
                warn!("{}: job {} failed: {}", stage, handle.job_id, reason);
                return Ok(Polled {
                    outcome: JobOutcome::Failure { reason },
                    attempts: attempt,
                });
            }
            StatusClass::Pending => {
                if attempt < max_attempts {
                    progress.on_poll_wait(stage, attempt, polling.interval);
                    suspend.sleep(polling.interval).await?;
                }
            }
        }
    }

    warn!(
        "{}: job {} still pending after {} checks",
        stage, handle.job_id, max_attempts
    );
    Ok(Polled {
        outcome: JobOutcome::TimedOut {
            attempts: max_attempts,
        },
        attempts: max_attempts,
    })
}
