//! # toonswap
//!
//! Swap a face onto a photo, then turn the result into a cartoon, by driving
//! remote asynchronous image-processing services.
//!
//! ## Why this crate?
//!
//! Face-swap and cartoonization APIs are job-based: you submit a request,
//! receive a job id, and poll until the job finishes (or doesn't). Each
//! vendor has its own request shape, status vocabulary and timing. Chaining
//! two of them means juggling uploads, bounded polling loops, downloads and
//! error attribution by hand. This crate runs that chain as a typed pipeline
//! of stages with one uniform error model.
//!
//! ## Pipeline Overview
//!
//! ```text
//! target + swap images
//!  │
//!  ├─ Stage 1: faceswap  normalize → upload → submit → poll → fetch
//!  │                                                           │ bytes
//!  └─ Stage 2: cartoon   normalize ─────────→ submit → poll → fetch
//!                                                              │
//!                                                        final image
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use toonswap::{swap_and_cartoonify, PipelineConfig, RawImage};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Keys come from TOONSWAP_{UPLOAD,FACESWAP,CARTOON}_API_KEY
//!     let config = PipelineConfig::from_env()?;
//!     let target = RawImage::new(std::fs::read("group.jpg")?, "group.jpg");
//!     let swap = RawImage::new(std::fs::read("me.png")?, "me.png");
//!
//!     match swap_and_cartoonify(target, swap, None, &config).await {
//!         Ok(out) => std::fs::write(format!("toon.{}", out.extension()), &out.bytes)?,
//!         Err(e) => eprintln!("{e}"),
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `toonswap` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! toonswap = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod cancel;
pub mod config;
pub mod error;
pub mod orchestrate;
pub mod output;
pub mod pipeline;
pub mod progress;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use cancel::CancelSignal;
pub use config::{
    CartoonConfig, FaceSwapConfig, NormalizeConfig, PipelineConfig, PipelineConfigBuilder,
    PollingConfig, PortraitConfig, UploadConfig,
};
pub use error::{ConfigError, FailureClass, FailureDescriptor, PipelineError, StageError, ToonswapError};
pub use orchestrate::{
    cartoon_only_pipeline, cartoonify, faceswap_cartoon_pipeline, swap_and_cartoonify,
    swap_and_cartoonify_sync, swap_and_cartoonify_to_file, swap_and_cartoonify_with_cancel,
    Pipeline, StageSpec,
};
pub use output::{PipelineOutput, StageReport};
pub use pipeline::fetch::{Materialized, ResultFetcher};
pub use pipeline::normalize::{ImageAsset, RawImage};
pub use pipeline::service::{
    AssetRef, JobHandle, JobService, StageRequest, StatusReport, Submission, SubmissionShape,
};
pub use pipeline::upload::Uploader;
pub use progress::{NoopProgressCallback, PipelineProgressCallback, ProgressCallback};
