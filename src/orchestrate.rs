//! Pipeline orchestration and the top-level entry points.
//!
//! A [`Pipeline`] is an ordered list of stages. Each stage runs
//!
//! ```text
//! normalize ─▶ upload (reference-based services only) ─▶ submit ─▶ poll ─▶ fetch
//! ```
//!
//! and its downloaded bytes become the single input of the next stage. The
//! run stops at the first failing stage and reports which one failed; there
//! are no retries across stage boundaries.
//!
//! Everything a run touches (bytes, job handles, outcomes) is owned by that
//! run. A `Pipeline` holds only configuration and shared HTTP clients, so one
//! instance can serve any number of concurrent invocations.

use crate::cancel::{CancelSignal, Suspend};
use crate::config::{NormalizeConfig, PipelineConfig};
use crate::error::{ConfigError, PipelineError, StageError, ToonswapError};
use crate::output::{PipelineOutput, StageReport};
use crate::pipeline::cartoon::CartoonService;
use crate::pipeline::faceswap::FaceSwapService;
use crate::pipeline::fetch::{HttpFetcher, Materialized, ResultFetcher};
use crate::pipeline::normalize::{self, ImageAsset, RawImage};
use crate::pipeline::poll::poll_job;
use crate::pipeline::portrait::PortraitService;
use crate::pipeline::service::{AssetRef, JobService, StageRequest, Submission, SubmissionShape};
use crate::pipeline::upload::{ImageHostUploader, Uploader};
use crate::progress::{NoopProgressCallback, ProgressCallback};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Timeout for result downloads, in seconds.
const DOWNLOAD_TIMEOUT_SECS: u64 = 120;

/// One stage of a pipeline.
#[derive(Clone)]
pub struct StageSpec {
    pub service: Arc<dyn JobService>,
    /// Run the normalizer on this stage's inputs. Default: `true`.
    pub normalize: bool,
    /// Style selector passed to the service; `None` uses its default.
    pub style: Option<String>,
}

impl StageSpec {
    pub fn new(service: Arc<dyn JobService>) -> Self {
        Self {
            service,
            normalize: true,
            style: None,
        }
    }

    pub fn style(mut self, style: impl Into<String>) -> Self {
        self.style = Some(style.into());
        self
    }

    pub fn normalize(mut self, v: bool) -> Self {
        self.normalize = v;
        self
    }

    pub fn name(&self) -> &str {
        self.service.name()
    }
}

/// An ordered chain of job-service stages.
pub struct Pipeline {
    stages: Vec<StageSpec>,
    uploader: Option<Arc<dyn Uploader>>,
    fetcher: Arc<dyn ResultFetcher>,
    normalize: NormalizeConfig,
    deadline: Option<Duration>,
    progress: ProgressCallback,
}

impl Pipeline {
    /// An empty pipeline that materializes results with `fetcher`.
    pub fn new(fetcher: Arc<dyn ResultFetcher>) -> Self {
        Self {
            stages: Vec::new(),
            uploader: None,
            fetcher,
            normalize: NormalizeConfig::default(),
            deadline: None,
            progress: Arc::new(NoopProgressCallback),
        }
    }

    /// Append a stage.
    pub fn stage(mut self, spec: StageSpec) -> Self {
        self.stages.push(spec);
        self
    }

    /// Uploader used by reference-based stages.
    pub fn with_uploader(mut self, uploader: Arc<dyn Uploader>) -> Self {
        self.uploader = Some(uploader);
        self
    }

    pub fn with_normalize(mut self, config: NormalizeConfig) -> Self {
        self.normalize = config;
        self
    }

    /// End-to-end wall-clock budget applied to every run.
    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = progress;
        self
    }

    /// Set the style selector of the last stage.
    ///
    /// The style belongs to the stylization step that produces the final
    /// image, never to the stages before it. `None` leaves the pipeline as is.
    pub fn with_style(mut self, style: Option<&str>) -> Self {
        if let (Some(style), Some(last)) = (style, self.stages.last_mut()) {
            last.style = Some(style.to_string());
        }
        self
    }

    pub fn stage_names(&self) -> Vec<String> {
        self.stages.iter().map(|s| s.name().to_string()).collect()
    }

    /// Run every stage in order.
    ///
    /// `inputs` feed the first stage; each later stage receives exactly the
    /// bytes the previous stage downloaded.
    ///
    /// # Errors
    /// The first stage failure, tagged with the stage's name. A run that is
    /// cancelled (or passes its deadline) fails with [`StageError::Cancelled`]
    /// at the next suspension point and makes no further remote calls.
    pub async fn run(
        &self,
        inputs: Vec<RawImage>,
        cancel: &CancelSignal,
    ) -> Result<PipelineOutput, PipelineError> {
        let started = Instant::now();
        let result = self.run_inner(inputs, cancel, started).await;
        self.progress.on_pipeline_complete(result.is_ok());
        match &result {
            Ok(out) => info!(
                "Pipeline complete: {} stages, {} bytes of {}, {}ms",
                out.stages.len(),
                out.bytes.len(),
                out.content_type,
                out.total_duration_ms
            ),
            Err(e) => warn!("Pipeline failed: {}", e),
        }
        result
    }

    async fn run_inner(
        &self,
        inputs: Vec<RawImage>,
        cancel: &CancelSignal,
        started: Instant,
    ) -> Result<PipelineOutput, PipelineError> {
        if self.stages.is_empty() {
            return Err(PipelineError::new(
                "pipeline",
                StageError::Validation("pipeline has no stages".into()),
            ));
        }
        for spec in &self.stages {
            if spec.service.submission_shape() == SubmissionShape::Reference && self.uploader.is_none() {
                return Err(PipelineError::new(
                    spec.name(),
                    StageError::Validation("reference-based stage needs an uploader".into()),
                ));
            }
        }

        let suspend = Suspend::new(cancel.clone(), self.deadline);
        let names = self.stage_names();
        self.progress.on_pipeline_start(&names);

        let total = self.stages.len();
        let mut inputs = inputs;
        let mut reports = Vec::with_capacity(total);
        let mut last: Option<Materialized> = None;

        for (i, spec) in self.stages.iter().enumerate() {
            let stage = spec.name();
            info!("Stage {}/{}: {}", i + 1, total, stage);
            self.progress.on_stage_start(stage, i + 1, total);

            match self.run_stage(spec, inputs, i > 0, &suspend).await {
                Ok((materialized, report)) => {
                    info!(
                        "Stage {} done: {} bytes in {}ms ({} status checks)",
                        stage, report.output_bytes, report.duration_ms, report.poll_attempts
                    );
                    self.progress.on_stage_complete(stage, &report);
                    reports.push(report);
                    inputs = vec![RawImage::new(
                        materialized.bytes.clone(),
                        normalize::result_filename(
                            materialized.content_type.as_deref(),
                            &materialized.bytes,
                        ),
                    )];
                    last = Some(materialized);
                }
                Err(e) => {
                    self.progress.on_stage_error(stage, &e);
                    return Err(PipelineError::new(stage, e));
                }
            }
        }

        let Some(last) = last else {
            return Err(PipelineError::new(
                "pipeline",
                StageError::Validation("pipeline produced no output".into()),
            ));
        };
        let content_type = final_content_type(last.content_type.as_deref(), &last.bytes);

        Ok(PipelineOutput {
            bytes: last.bytes,
            content_type,
            stages: reports,
            total_duration_ms: started.elapsed().as_millis() as u64,
        })
    }

    async fn run_stage(
        &self,
        spec: &StageSpec,
        inputs: Vec<RawImage>,
        chained: bool,
        suspend: &Suspend,
    ) -> Result<(Materialized, StageReport), StageError> {
        let stage_start = Instant::now();
        let service = spec.service.as_ref();

        let required = service.required_inputs();
        if inputs.len() != required {
            return Err(StageError::Validation(format!(
                "{} expects {} input image(s), got {}",
                service.name(),
                required,
                inputs.len()
            )));
        }

        // ── Normalize ────────────────────────────────────────────────────
        let normalized = if spec.normalize {
            let cfg = self.normalize.clone();
            tokio::task::spawn_blocking(move || {
                inputs
                    .into_iter()
                    .map(|raw| normalize::normalize(raw.bytes, &raw.filename, &cfg))
                    .collect::<Result<Vec<ImageAsset>, StageError>>()
            })
            .await
            .map_err(|e| StageError::Decode(format!("normalizer task failed: {e}")))?
        } else {
            inputs
                .into_iter()
                .map(normalize::passthrough)
                .collect::<Result<Vec<_>, _>>()
        };
        let assets = if chained {
            normalized.map_err(upstream_result_error)?
        } else {
            normalized?
        };
        let resized = assets.iter().any(|a| a.resized);

        // ── Resolve references ───────────────────────────────────────────
        let refs = match service.submission_shape() {
            SubmissionShape::Inline => assets.into_iter().map(AssetRef::Inline).collect(),
            SubmissionShape::Reference => {
                let uploader = self.uploader.as_ref().ok_or_else(|| {
                    StageError::Validation("reference-based stage needs an uploader".into())
                })?;
                let mut urls = Vec::with_capacity(assets.len());
                for asset in &assets {
                    let url = suspend.run(uploader.upload(asset)).await??;
                    urls.push(AssetRef::Url(url));
                }
                urls
            }
        };
        let request = StageRequest {
            assets: refs,
            style: spec.style.clone(),
        };

        // ── Submit / poll ────────────────────────────────────────────────
        let (job_id, poll_attempts, result_url) =
            match suspend.run(service.submit(&request)).await?? {
                Submission::Immediate { result_url } => {
                    debug!("{}: immediate result", service.name());
                    (None, 0, result_url)
                }
                Submission::Job(handle) => {
                    let polled = poll_job(service, &handle, suspend, self.progress.as_ref()).await?;
                    let attempts = polled.attempts;
                    let url = polled.outcome.into_result()?;
                    (Some(handle.job_id), attempts, url)
                }
            };

        // ── Materialize ──────────────────────────────────────────────────
        let materialized = suspend.run(self.fetcher.fetch(&result_url)).await??;

        let report = StageReport {
            stage: service.name().to_string(),
            job_id,
            poll_attempts,
            resized,
            output_bytes: materialized.bytes.len(),
            duration_ms: stage_start.elapsed().as_millis() as u64,
        };
        Ok((materialized, report))
    }

    /// Run the pipeline and write the result to `output_path`.
    ///
    /// The bytes go to an invocation-unique temp file next to the target
    /// and are renamed into place only on success, so a failed or cancelled
    /// run never leaves a partial file behind.
    pub async fn run_to_file(
        &self,
        inputs: Vec<RawImage>,
        output_path: impl AsRef<Path>,
        cancel: &CancelSignal,
    ) -> Result<PipelineOutput, ToonswapError> {
        let output = self.run(inputs, cancel).await?;
        write_atomic(output_path.as_ref(), &output.bytes).await?;
        Ok(output)
    }
}

/// Re-attribute a normalizer failure on bytes a previous stage downloaded.
///
/// Those bytes came from an upstream service, not from the caller, so a
/// bad format or corrupt payload is a malformed result.
fn upstream_result_error(e: StageError) -> StageError {
    match e {
        StageError::Validation(m) | StageError::Decode(m) => {
            StageError::MalformedResult(format!("previous stage returned an unusable image: {m}"))
        }
        other => other,
    }
}

/// Pick the MIME type of the final output.
fn final_content_type(header: Option<&str>, bytes: &[u8]) -> String {
    if let Some(ct) = header {
        let essence = ct.split(';').next().unwrap_or("").trim();
        if essence.starts_with("image/") {
            return essence.to_ascii_lowercase();
        }
    }
    image::guess_format(bytes)
        .map(|f| f.to_mime_type().to_string())
        .unwrap_or_else(|_| "application/octet-stream".to_string())
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), ToonswapError> {
    let path = path.to_path_buf();
    let bytes = bytes.to_vec();
    tokio::task::spawn_blocking(move || -> Result<(), ToonswapError> {
        let fail = |source: std::io::Error| ToonswapError::OutputWriteFailed {
            path: path.clone(),
            source,
        };
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => std::path::PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir).map_err(fail)?;

        // Dropped (and deleted) on any early return below.
        let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(fail)?;
        tmp.write_all(&bytes).map_err(fail)?;
        tmp.as_file().sync_all().map_err(fail)?;
        tmp.persist(&path).map_err(|e| fail(e.error))?;
        Ok(())
    })
    .await
    .map_err(|e| ToonswapError::Internal(format!("write task failed: {e}")))?
}

// ── Pipeline factories ───────────────────────────────────────────────────

fn base_pipeline(config: &PipelineConfig) -> Result<Pipeline, ConfigError> {
    let mut pipeline = Pipeline::new(Arc::new(HttpFetcher::new(DOWNLOAD_TIMEOUT_SECS)?))
        .with_normalize(config.normalize.clone())
        .with_deadline(config.deadline);
    if let Some(ref cb) = config.progress_callback {
        pipeline = pipeline.with_progress(Arc::clone(cb));
    }
    Ok(pipeline)
}

/// The two-stage face-swap → cartoon pipeline.
pub fn faceswap_cartoon_pipeline(config: &PipelineConfig) -> Result<Pipeline, ConfigError> {
    let upload = config.require_upload()?.clone();
    let faceswap = config.require_faceswap()?.clone();
    let cartoon = config.require_cartoon()?.clone();

    Ok(base_pipeline(config)?
        .with_uploader(Arc::new(ImageHostUploader::new(upload)?))
        .stage(StageSpec::new(Arc::new(FaceSwapService::new(faceswap)?)))
        .stage(StageSpec::new(Arc::new(CartoonService::new(cartoon)?))))
}

/// A single-stage cartoon pipeline.
///
/// Uses the synchronous portrait service when it is configured, otherwise
/// the asynchronous cartoon service.
pub fn cartoon_only_pipeline(config: &PipelineConfig) -> Result<Pipeline, ConfigError> {
    let service: Arc<dyn JobService> = if let Some(ref portrait) = config.portrait {
        Arc::new(PortraitService::new(portrait.clone())?)
    } else {
        Arc::new(CartoonService::new(config.require_cartoon()?.clone())?)
    };
    Ok(base_pipeline(config)?.stage(StageSpec::new(service)))
}

// ── Entry points ─────────────────────────────────────────────────────────

/// Swap the face of `swap` onto `target`, then cartoonify the result.
///
/// This is the primary entry point for the library.
///
/// # Example
/// ```rust,no_run
/// use toonswap::{swap_and_cartoonify, PipelineConfig, RawImage};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = PipelineConfig::from_env()?;
/// let target = RawImage::new(std::fs::read("group.jpg")?, "group.jpg");
/// let swap = RawImage::new(std::fs::read("me.png")?, "me.png");
/// let output = swap_and_cartoonify(target, swap, Some("3"), &config).await?;
/// std::fs::write(format!("toon.{}", output.extension()), &output.bytes)?;
/// # Ok(())
/// # }
/// ```
///
/// # Errors
/// [`ToonswapError::Config`] when a required service is not configured,
/// [`ToonswapError::Pipeline`] naming the failed stage otherwise.
pub async fn swap_and_cartoonify(
    target: RawImage,
    swap: RawImage,
    style: Option<&str>,
    config: &PipelineConfig,
) -> Result<PipelineOutput, ToonswapError> {
    swap_and_cartoonify_with_cancel(target, swap, style, config, &CancelSignal::new()).await
}

/// [`swap_and_cartoonify`] with an external cancellation signal.
pub async fn swap_and_cartoonify_with_cancel(
    target: RawImage,
    swap: RawImage,
    style: Option<&str>,
    config: &PipelineConfig,
    cancel: &CancelSignal,
) -> Result<PipelineOutput, ToonswapError> {
    let pipeline = faceswap_cartoon_pipeline(config)?.with_style(style);
    Ok(pipeline.run(vec![target, swap], cancel).await?)
}

/// Run [`swap_and_cartoonify`] and write the result atomically to `output_path`.
pub async fn swap_and_cartoonify_to_file(
    target: RawImage,
    swap: RawImage,
    style: Option<&str>,
    output_path: impl AsRef<Path>,
    config: &PipelineConfig,
) -> Result<PipelineOutput, ToonswapError> {
    let pipeline = faceswap_cartoon_pipeline(config)?.with_style(style);
    pipeline
        .run_to_file(vec![target, swap], output_path, &CancelSignal::new())
        .await
}

/// Synchronous wrapper around [`swap_and_cartoonify`].
///
/// Creates a temporary tokio runtime internally.
pub fn swap_and_cartoonify_sync(
    target: RawImage,
    swap: RawImage,
    style: Option<&str>,
    config: &PipelineConfig,
) -> Result<PipelineOutput, ToonswapError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| ToonswapError::Internal(format!("Failed to create tokio runtime: {e}")))?
        .block_on(swap_and_cartoonify(target, swap, style, config))
}

/// Cartoonify a single image (no face swap).
pub async fn cartoonify(
    image: RawImage,
    style: Option<&str>,
    config: &PipelineConfig,
) -> Result<PipelineOutput, ToonswapError> {
    let pipeline = cartoon_only_pipeline(config)?.with_style(style);
    Ok(pipeline.run(vec![image], &CancelSignal::new()).await?)
}
