//! Progress-callback trait for stage and polling events.
//!
//! Inject an [`Arc<dyn PipelineProgressCallback>`] into
//! [`crate::orchestrate::Pipeline::with_progress`] to receive events as the
//! pipeline moves through its stages. Cartoon jobs can poll for many minutes,
//! so a caller usually wants to show *something* while waiting.
//!
//! # Example
//!
//! ```rust
//! use toonswap::PipelineProgressCallback;
//! use std::sync::atomic::{AtomicU32, Ordering};
//! use std::time::Duration;
//!
//! struct WaitCounter(AtomicU32);
//!
//! impl PipelineProgressCallback for WaitCounter {
//!     fn on_poll_wait(&self, stage: &str, attempt: u32, delay: Duration) {
//!         self.0.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{stage}: attempt {attempt} pending, next check in {delay:?}");
//!     }
//! }
//! ```

use crate::error::StageError;
use crate::output::StageReport;
use std::sync::Arc;
use std::time::Duration;

/// Called by the orchestrator and the polling engine as a run progresses.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. Implementations must be `Send + Sync`: independent
/// runs may share one callback across tasks.
pub trait PipelineProgressCallback: Send + Sync {
    /// Called once before the first stage starts.
    fn on_pipeline_start(&self, stages: &[String]) {
        let _ = stages;
    }

    /// Called when a stage begins (`index` is 1-based).
    fn on_stage_start(&self, stage: &str, index: usize, total: usize) {
        let _ = (stage, index, total);
    }

    /// Called after every status query with the raw status string.
    fn on_poll_attempt(&self, stage: &str, attempt: u32, max_attempts: u32, status: &str) {
        let _ = (stage, attempt, max_attempts, status);
    }

    /// Called right before the polling engine sleeps between two queries.
    fn on_poll_wait(&self, stage: &str, attempt: u32, delay: Duration) {
        let _ = (stage, attempt, delay);
    }

    /// Called when a stage has materialized its output.
    fn on_stage_complete(&self, stage: &str, report: &StageReport) {
        let _ = (stage, report);
    }

    /// Called when a stage fails; the run stops afterwards.
    fn on_stage_error(&self, stage: &str, error: &StageError) {
        let _ = (stage, error);
    }

    /// Called once when the run ends, successfully or not.
    fn on_pipeline_complete(&self, success: bool) {
        let _ = success;
    }
}

/// A no-op implementation; the default when no callback is configured.
pub struct NoopProgressCallback;

impl PipelineProgressCallback for NoopProgressCallback {}

/// Convenience alias for the shared callback type.
pub type ProgressCallback = Arc<dyn PipelineProgressCallback>;
