//! Integration tests for the polling engine and the orchestrator.
//!
//! Every remote service is replaced by a scripted in-memory fake, and the
//! tests run on a paused tokio clock, so poll intervals of several seconds
//! complete instantly and elapsed time can be asserted exactly.
//!
//! Run with:
//!   cargo test --test pipeline

use async_trait::async_trait;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use std::collections::{HashMap, VecDeque};
use std::io::Cursor;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use toonswap::cancel::Suspend;
use toonswap::pipeline::poll::{poll_job, JobOutcome};
use toonswap::{
    CancelSignal, FailureClass, ImageAsset, JobHandle, JobService, Materialized,
    NoopProgressCallback, Pipeline, PipelineProgressCallback, PollingConfig, RawImage,
    ResultFetcher, StageError, StageReport, StageRequest, StageSpec, StatusReport, Submission,
    SubmissionShape, Uploader,
};

// ── Test helpers ─────────────────────────────────────────────────────────────

fn png(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
    let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb(color)));
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .expect("png encode");
    buf
}

fn jpeg(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
    let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb(color)));
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Jpeg)
        .expect("jpeg encode");
    buf
}

fn status(s: &str) -> Result<StatusReport, StageError> {
    Ok(StatusReport {
        status: s.to_string(),
        ..StatusReport::default()
    })
}

fn done(s: &str, url: &str) -> Result<StatusReport, StageError> {
    Ok(StatusReport {
        status: s.to_string(),
        result_url: Some(url.to_string()),
        error_message: None,
    })
}

fn polling(max_attempts: u32, interval_secs: u64) -> PollingConfig {
    PollingConfig::new(max_attempts, Duration::from_secs(interval_secs))
        .success_statuses(["completed", "PROCESS_SUCCESS"])
        .failure_statuses(["Failed", "PROCESS_FAILED"])
}

/// A job service that replays a scripted list of status responses.
///
/// Once the script is exhausted every further query reports `processing`.
struct ScriptedService {
    name: &'static str,
    shape: SubmissionShape,
    inputs: usize,
    submission: Result<Submission, StageError>,
    script: Mutex<VecDeque<Result<StatusReport, StageError>>>,
    submits: AtomicU32,
    checks: AtomicU32,
    requests: Mutex<Vec<StageRequest>>,
}

impl ScriptedService {
    fn new(
        name: &'static str,
        shape: SubmissionShape,
        polling: PollingConfig,
        job_id: &str,
        script: Vec<Result<StatusReport, StageError>>,
    ) -> Self {
        Self {
            name,
            shape,
            inputs: 1,
            submission: Ok(Submission::Job(JobHandle {
                job_id: job_id.to_string(),
                polling,
            })),
            script: Mutex::new(script.into()),
            submits: AtomicU32::new(0),
            checks: AtomicU32::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    fn inputs(mut self, n: usize) -> Self {
        self.inputs = n;
        self
    }

    fn submission(mut self, submission: Result<Submission, StageError>) -> Self {
        self.submission = submission;
        self
    }

    fn handle(&self) -> JobHandle {
        match &self.submission {
            Ok(Submission::Job(h)) => h.clone(),
            _ => panic!("not a job-based script"),
        }
    }

    fn submits(&self) -> u32 {
        self.submits.load(Ordering::SeqCst)
    }

    fn checks(&self) -> u32 {
        self.checks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobService for ScriptedService {
    fn name(&self) -> &str {
        self.name
    }

    fn submission_shape(&self) -> SubmissionShape {
        self.shape
    }

    fn required_inputs(&self) -> usize {
        self.inputs
    }

    async fn submit(&self, request: &StageRequest) -> Result<Submission, StageError> {
        self.submits.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        self.submission.clone()
    }

    async fn check_status(&self, _job_id: &str) -> Result<StatusReport, StageError> {
        self.checks.fetch_add(1, Ordering::SeqCst);
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| status("processing"))
    }
}

/// Uploader that hands out sequential fake URLs and remembers what it saw.
#[derive(Default)]
struct FakeUploader {
    uploaded: Mutex<Vec<ImageAsset>>,
}

impl FakeUploader {
    fn calls(&self) -> usize {
        self.uploaded.lock().unwrap().len()
    }
}

#[async_trait]
impl Uploader for FakeUploader {
    async fn upload(&self, asset: &ImageAsset) -> Result<String, StageError> {
        let mut uploaded = self.uploaded.lock().unwrap();
        uploaded.push(asset.clone());
        Ok(format!("https://img.example/{}", uploaded.len()))
    }
}

/// Fetcher serving fixed bytes per URL.
#[derive(Default)]
struct FakeFetcher {
    files: HashMap<String, Materialized>,
    calls: AtomicU32,
}

impl FakeFetcher {
    fn serve(mut self, url: &str, bytes: Vec<u8>, content_type: Option<&str>) -> Self {
        self.files.insert(
            url.to_string(),
            Materialized {
                bytes,
                content_type: content_type.map(str::to_string),
            },
        );
        self
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ResultFetcher for FakeFetcher {
    async fn fetch(&self, url: &str) -> Result<Materialized, StageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.files.get(url).cloned().ok_or_else(|| StageError::Download {
            status: Some(404),
            detail: format!("GET {url}"),
        })
    }
}

/// Progress callback recording every event as a short string.
#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<String>>,
}

impl Recorder {
    fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    fn count(&self, prefix: &str) -> usize {
        self.events().iter().filter(|e| e.starts_with(prefix)).count()
    }
}

impl PipelineProgressCallback for Recorder {
    fn on_stage_start(&self, stage: &str, index: usize, total: usize) {
        self.events
            .lock()
            .unwrap()
            .push(format!("start {stage} {index}/{total}"));
    }

    fn on_poll_attempt(&self, stage: &str, attempt: u32, _max: u32, status: &str) {
        self.events
            .lock()
            .unwrap()
            .push(format!("poll {stage} #{attempt} {status}"));
    }

    fn on_poll_wait(&self, stage: &str, attempt: u32, _delay: Duration) {
        self.events
            .lock()
            .unwrap()
            .push(format!("wait {stage} #{attempt}"));
    }

    fn on_stage_complete(&self, stage: &str, _report: &StageReport) {
        self.events.lock().unwrap().push(format!("done {stage}"));
    }

    fn on_stage_error(&self, stage: &str, error: &StageError) {
        self.events
            .lock()
            .unwrap()
            .push(format!("error {stage} {}", error.kind()));
    }

    fn on_pipeline_complete(&self, success: bool) {
        self.events.lock().unwrap().push(format!("complete {success}"));
    }
}

fn suspend() -> Suspend {
    Suspend::new(CancelSignal::new(), None)
}

// ── Polling engine ───────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn success_on_third_query_waits_twice() {
    let svc = ScriptedService::new(
        "faceswap",
        SubmissionShape::Reference,
        polling(5, 2),
        "job-1",
        vec![status("queued"), status("queued"), done("completed", "https://r/1.png")],
    );
    let recorder = Recorder::default();

    let start = tokio::time::Instant::now();
    let polled = poll_job(&svc, &svc.handle(), &suspend(), &recorder).await.unwrap();

    assert_eq!(
        polled.outcome,
        JobOutcome::Success {
            result_reference: "https://r/1.png".into()
        }
    );
    assert_eq!(polled.attempts, 3);
    assert_eq!(svc.checks(), 3);
    assert_eq!(recorder.count("wait"), 2);
    assert_eq!(start.elapsed(), Duration::from_secs(4));
}

#[tokio::test(start_paused = true)]
async fn never_terminal_times_out_after_max_attempts() {
    let svc = ScriptedService::new(
        "cartoon",
        SubmissionShape::Inline,
        polling(5, 3),
        "job-2",
        Vec::new(),
    );
    let recorder = Recorder::default();

    let start = tokio::time::Instant::now();
    let polled = poll_job(&svc, &svc.handle(), &suspend(), &recorder).await.unwrap();

    assert_eq!(polled.outcome, JobOutcome::TimedOut { attempts: 5 });
    assert_eq!(svc.checks(), 5);
    // No sleep after the last query.
    assert_eq!(recorder.count("wait"), 4);
    assert_eq!(start.elapsed(), Duration::from_secs(12));
}

#[tokio::test(start_paused = true)]
async fn failure_status_matches_any_case() {
    for failed in ["Failed", "FAILED", "failed"] {
        let svc = ScriptedService::new(
            "faceswap",
            SubmissionShape::Reference,
            polling(5, 1),
            "job-3",
            vec![status("processing"), status(failed)],
        );
        let polled = poll_job(&svc, &svc.handle(), &suspend(), &NoopProgressCallback)
            .await
            .unwrap();
        assert_eq!(
            polled.outcome,
            JobOutcome::Failure {
                reason: format!("remote status '{failed}'")
            },
            "status {failed:?}"
        );
        assert_eq!(svc.checks(), 2);
    }
}

#[tokio::test(start_paused = true)]
async fn failure_prefers_vendor_message() {
    let svc = ScriptedService::new(
        "faceswap",
        SubmissionShape::Reference,
        polling(5, 1),
        "job-4",
        vec![Ok(StatusReport {
            status: "failed".into(),
            result_url: None,
            error_message: Some("no face detected".into()),
        })],
    );
    let polled = poll_job(&svc, &svc.handle(), &suspend(), &NoopProgressCallback)
        .await
        .unwrap();
    assert_eq!(
        polled.outcome,
        JobOutcome::Failure {
            reason: "no face detected".into()
        }
    );
}

#[tokio::test(start_paused = true)]
async fn success_without_url_is_malformed() {
    let svc = ScriptedService::new(
        "cartoon",
        SubmissionShape::Inline,
        polling(5, 1),
        "job-5",
        vec![status("PROCESS_SUCCESS")],
    );
    let err = poll_job(&svc, &svc.handle(), &suspend(), &NoopProgressCallback)
        .await
        .unwrap_err();
    assert!(matches!(err, StageError::MalformedResult(_)), "got {err:?}");
}

#[tokio::test(start_paused = true)]
async fn transport_failure_is_not_retried() {
    let svc = ScriptedService::new(
        "cartoon",
        SubmissionShape::Inline,
        polling(10, 1),
        "job-6",
        vec![
            status("processing"),
            Err(StageError::PollTransport("connection reset".into())),
            done("PROCESS_SUCCESS", "https://r/never.png"),
        ],
    );
    let err = poll_job(&svc, &svc.handle(), &suspend(), &NoopProgressCallback)
        .await
        .unwrap_err();
    assert_eq!(err, StageError::PollTransport("connection reset".into()));
    assert_eq!(svc.checks(), 2);
}

#[tokio::test(start_paused = true)]
async fn cancel_during_wait_stops_polling() {
    let svc = ScriptedService::new(
        "cartoon",
        SubmissionShape::Inline,
        polling(100, 2),
        "job-7",
        Vec::new(),
    );
    let signal = CancelSignal::new();
    let guard = Suspend::new(signal.clone(), None);

    let canceller = {
        let signal = signal.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            signal.cancel("user abort");
        })
    };

    let err = poll_job(&svc, &svc.handle(), &guard, &NoopProgressCallback)
        .await
        .unwrap_err();
    canceller.await.unwrap();

    assert_eq!(err, StageError::Cancelled("user abort".into()));
    // Queries at t=0, 2, 4; the cancel lands in the 4→6 sleep.
    assert_eq!(svc.checks(), 3);
}

#[tokio::test(start_paused = true)]
async fn deadline_stops_polling() {
    let svc = ScriptedService::new(
        "cartoon",
        SubmissionShape::Inline,
        polling(100, 2),
        "job-8",
        Vec::new(),
    );
    let guard = Suspend::new(CancelSignal::new(), Some(Duration::from_secs(5)));

    let err = poll_job(&svc, &svc.handle(), &guard, &NoopProgressCallback)
        .await
        .unwrap_err();
    assert!(matches!(err, StageError::Cancelled(_)));
    assert_eq!(svc.checks(), 3);
}

// ── Orchestrator ─────────────────────────────────────────────────────────────

struct TwoStage {
    faceswap: Arc<ScriptedService>,
    cartoon: Arc<ScriptedService>,
    uploader: Arc<FakeUploader>,
    fetcher: Arc<FakeFetcher>,
    recorder: Arc<Recorder>,
    pipeline: Pipeline,
}

fn two_stage(
    faceswap_script: Vec<Result<StatusReport, StageError>>,
    cartoon_script: Vec<Result<StatusReport, StageError>>,
    fetcher: FakeFetcher,
) -> TwoStage {
    let faceswap = Arc::new(
        ScriptedService::new(
            "faceswap",
            SubmissionShape::Reference,
            polling(30, 2),
            "abc123",
            faceswap_script,
        )
        .inputs(2),
    );
    let cartoon = Arc::new(ScriptedService::new(
        "cartoon",
        SubmissionShape::Inline,
        polling(120, 5),
        "req-9",
        cartoon_script,
    ));
    let uploader = Arc::new(FakeUploader::default());
    let fetcher = Arc::new(fetcher);
    let recorder = Arc::new(Recorder::default());

    let pipeline = Pipeline::new(fetcher.clone())
        .with_uploader(uploader.clone())
        .with_progress(recorder.clone())
        .stage(StageSpec::new(faceswap.clone()))
        .stage(StageSpec::new(cartoon.clone()).style("3"));

    TwoStage {
        faceswap,
        cartoon,
        uploader,
        fetcher,
        recorder,
        pipeline,
    }
}

fn inputs() -> Vec<RawImage> {
    vec![
        RawImage::new(png(64, 48, [10, 20, 30]), "target.png"),
        RawImage::new(png(32, 32, [200, 100, 50]), "swap.png"),
    ]
}

#[tokio::test(start_paused = true)]
async fn swap_then_cartoon_end_to_end() {
    let swapped = png(64, 48, [1, 2, 3]);
    let final_bytes = png(64, 48, [250, 250, 0]);
    let fetcher = FakeFetcher::default()
        .serve("https://cdn.example/swapped.png", swapped.clone(), Some("image/png"))
        .serve("https://cdn.example/toon.png", final_bytes.clone(), Some("image/png"));

    let t = two_stage(
        vec![status("pending"), done("completed", "https://cdn.example/swapped.png")],
        vec![
            status("PROCESS_QUEUING"),
            status("PROCESSING"),
            done("PROCESS_SUCCESS", "https://cdn.example/toon.png"),
        ],
        fetcher,
    );

    let out = t.pipeline.run(inputs(), &CancelSignal::new()).await.unwrap();

    assert_eq!(out.bytes, final_bytes, "final output must be byte-exact");
    assert_eq!(out.content_type, "image/png");
    assert_eq!(out.extension(), "png");

    // Stage 1 got both uploads, in order.
    assert_eq!(t.uploader.calls(), 2);
    let fs_req = t.faceswap.requests.lock().unwrap()[0].clone();
    assert_eq!(fs_req.url_at(0).unwrap(), "https://img.example/1");
    assert_eq!(fs_req.url_at(1).unwrap(), "https://img.example/2");
    assert_eq!(fs_req.style, None);

    // Stage 2 received exactly stage 1's downloaded bytes, inline.
    let cartoon_req = t.cartoon.requests.lock().unwrap()[0].clone();
    assert_eq!(cartoon_req.inline_at(0).unwrap().bytes, swapped);
    assert_eq!(cartoon_req.style.as_deref(), Some("3"));

    assert_eq!(t.faceswap.checks(), 2);
    assert_eq!(t.cartoon.checks(), 3);
    assert_eq!(t.fetcher.calls(), 2);

    assert_eq!(out.stages.len(), 2);
    assert_eq!(out.stages[0].job_id.as_deref(), Some("abc123"));
    assert_eq!(out.stages[0].poll_attempts, 2);
    assert_eq!(out.stages[1].job_id.as_deref(), Some("req-9"));
    assert_eq!(out.stages[1].poll_attempts, 3);

    let events = t.recorder.events();
    assert_eq!(events.first().map(String::as_str), Some("start faceswap 1/2"));
    assert_eq!(events.last().map(String::as_str), Some("complete true"));
    assert_eq!(t.recorder.count("wait faceswap"), 1);
    assert_eq!(t.recorder.count("wait cartoon"), 2);
}

#[tokio::test(start_paused = true)]
async fn invalid_input_makes_no_network_calls() {
    let t = two_stage(Vec::new(), Vec::new(), FakeFetcher::default());
    let bad = vec![
        RawImage::new(png(8, 8, [0, 0, 0]), "target.gif"),
        RawImage::new(png(8, 8, [0, 0, 0]), "swap.png"),
    ];

    let err = t.pipeline.run(bad, &CancelSignal::new()).await.unwrap_err();

    assert_eq!(err.stage, "faceswap");
    assert_eq!(err.class(), FailureClass::InvalidInput);
    assert!(matches!(err.source, StageError::Validation(_)));
    assert_eq!(t.uploader.calls(), 0);
    assert_eq!(t.faceswap.submits(), 0);
    assert_eq!(t.cartoon.submits(), 0);
    assert_eq!(t.fetcher.calls(), 0);
    assert_eq!(t.recorder.count("error faceswap validation"), 1);
}

#[tokio::test(start_paused = true)]
async fn corrupt_input_is_decode_failure() {
    let t = two_stage(Vec::new(), Vec::new(), FakeFetcher::default());
    let bad = vec![
        RawImage::new(b"not an image".to_vec(), "target.png"),
        RawImage::new(png(8, 8, [0, 0, 0]), "swap.png"),
    ];
    let err = t.pipeline.run(bad, &CancelSignal::new()).await.unwrap_err();
    assert!(matches!(err.source, StageError::Decode(_)));
    assert_eq!(err.class(), FailureClass::InvalidInput);
    assert_eq!(t.uploader.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn wrong_input_count_is_rejected() {
    let t = two_stage(Vec::new(), Vec::new(), FakeFetcher::default());
    let one = vec![RawImage::new(png(8, 8, [0, 0, 0]), "target.png")];
    let err = t.pipeline.run(one, &CancelSignal::new()).await.unwrap_err();
    assert_eq!(err.stage, "faceswap");
    assert!(matches!(err.source, StageError::Validation(ref m) if m.contains("expects 2")));
}

#[tokio::test(start_paused = true)]
async fn second_stage_failure_is_attributed() {
    let fetcher = FakeFetcher::default().serve(
        "https://cdn.example/swapped.png",
        png(16, 16, [9, 9, 9]),
        Some("image/png"),
    );
    let t = two_stage(
        vec![done("completed", "https://cdn.example/swapped.png")],
        vec![Ok(StatusReport {
            status: "PROCESS_FAILED".into(),
            result_url: None,
            error_message: Some("image contains no face".into()),
        })],
        fetcher,
    );

    let err = t.pipeline.run(inputs(), &CancelSignal::new()).await.unwrap_err();

    assert_eq!(err.stage, "cartoon");
    assert_eq!(err.class(), FailureClass::Upstream);
    assert_eq!(
        err.source,
        StageError::TaskFailed {
            reason: "image contains no face".into()
        }
    );
    // The failed job's result is never fetched.
    assert_eq!(t.fetcher.calls(), 1);

    let d = err.describe();
    assert_eq!(d.stage, "cartoon");
    assert_eq!(d.class, FailureClass::Upstream);
}

#[tokio::test(start_paused = true)]
async fn unusable_intermediate_result_is_an_upstream_failure() {
    let fetcher = FakeFetcher::default().serve(
        "https://cdn.example/swapped.png",
        b"<html>503 Service Unavailable</html>".to_vec(),
        Some("text/html"),
    );
    let t = two_stage(
        vec![done("completed", "https://cdn.example/swapped.png")],
        Vec::new(),
        fetcher,
    );

    let err = t.pipeline.run(inputs(), &CancelSignal::new()).await.unwrap_err();

    assert_eq!(err.stage, "cartoon");
    assert_eq!(err.class(), FailureClass::Upstream);
    assert!(matches!(err.source, StageError::MalformedResult(_)));
    assert_eq!(err.describe().class, FailureClass::Upstream);
    assert_eq!(t.cartoon.submits(), 0);
}

#[tokio::test(start_paused = true)]
async fn jpeg_inputs_flow_end_to_end() {
    let target = jpeg(64, 48, [10, 20, 30]);
    let swap = jpeg(32, 32, [200, 100, 50]);
    let swapped = jpeg(64, 48, [1, 2, 3]);
    let final_bytes = jpeg(64, 48, [250, 250, 0]);
    let fetcher = FakeFetcher::default()
        .serve("https://cdn.example/swapped.jpg", swapped.clone(), Some("image/jpeg"))
        .serve("https://cdn.example/toon.jpg", final_bytes.clone(), Some("image/jpeg"));

    let t = two_stage(
        vec![done("completed", "https://cdn.example/swapped.jpg")],
        vec![done("PROCESS_SUCCESS", "https://cdn.example/toon.jpg")],
        fetcher,
    );
    let jpegs = vec![
        RawImage::new(target, "target.jpg"),
        RawImage::new(swap, "swap.jpeg"),
    ];

    let out = t.pipeline.run(jpegs, &CancelSignal::new()).await.unwrap();

    assert_eq!(out.bytes, final_bytes);
    assert_eq!(out.content_type, "image/jpeg");
    assert_eq!(out.extension(), "jpg");
    assert_eq!(t.uploader.calls(), 2);
    let cartoon_req = t.cartoon.requests.lock().unwrap()[0].clone();
    assert_eq!(cartoon_req.inline_at(0).unwrap().bytes, swapped);
}

#[tokio::test(start_paused = true)]
async fn huge_deadline_does_not_limit_the_run() {
    let fetcher = FakeFetcher::default()
        .serve("https://cdn.example/swapped.png", png(8, 8, [1, 2, 3]), Some("image/png"))
        .serve("https://cdn.example/toon.png", png(8, 8, [4, 5, 6]), Some("image/png"));
    let t = two_stage(
        vec![done("completed", "https://cdn.example/swapped.png")],
        vec![done("PROCESS_SUCCESS", "https://cdn.example/toon.png")],
        fetcher,
    );
    let pipeline = t.pipeline.with_deadline(Some(Duration::from_secs(u64::MAX)));

    let out = pipeline.run(inputs(), &CancelSignal::new()).await.unwrap();
    assert_eq!(out.stages.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn first_stage_timeout_stops_the_run() {
    let t = two_stage(Vec::new(), Vec::new(), FakeFetcher::default());
    let err = t.pipeline.run(inputs(), &CancelSignal::new()).await.unwrap_err();

    assert_eq!(err.stage, "faceswap");
    assert_eq!(err.source, StageError::TimedOut { attempts: 30 });
    assert_eq!(err.class(), FailureClass::TimedOut);
    assert_eq!(t.faceswap.checks(), 30);
    assert_eq!(t.cartoon.submits(), 0);
}

#[tokio::test(start_paused = true)]
async fn download_failure_is_reported() {
    let t = two_stage(
        vec![done("completed", "https://cdn.example/missing.png")],
        Vec::new(),
        FakeFetcher::default(),
    );
    let err = t.pipeline.run(inputs(), &CancelSignal::new()).await.unwrap_err();
    assert_eq!(err.stage, "faceswap");
    assert!(matches!(err.source, StageError::Download { status: Some(404), .. }));
}

#[tokio::test(start_paused = true)]
async fn cancelled_before_start_makes_no_calls() {
    let t = two_stage(Vec::new(), Vec::new(), FakeFetcher::default());
    let signal = CancelSignal::new();
    signal.cancel("shutdown");

    let err = t.pipeline.run(inputs(), &signal).await.unwrap_err();

    assert_eq!(err.class(), FailureClass::Cancelled);
    assert_eq!(err.source, StageError::Cancelled("shutdown".into()));
    assert_eq!(t.uploader.calls(), 0);
    assert_eq!(t.faceswap.submits(), 0);
}

#[tokio::test(start_paused = true)]
async fn immediate_submission_skips_polling() {
    let result = png(20, 20, [5, 5, 5]);
    let svc = Arc::new(
        ScriptedService::new(
            "portrait",
            SubmissionShape::Inline,
            PollingConfig::new(1, Duration::ZERO),
            "unused",
            Vec::new(),
        )
        .submission(Ok(Submission::Immediate {
            result_url: "https://cdn.example/portrait".into(),
        })),
    );
    // No content type: the output type is sniffed from the bytes.
    let fetcher = Arc::new(FakeFetcher::default().serve(
        "https://cdn.example/portrait",
        result.clone(),
        None,
    ));
    let pipeline = Pipeline::new(fetcher).stage(StageSpec::new(svc.clone()).style("hongkong"));

    let out = pipeline
        .run(vec![RawImage::new(png(10, 10, [1, 1, 1]), "me.png")], &CancelSignal::new())
        .await
        .unwrap();

    assert_eq!(out.bytes, result);
    assert_eq!(out.content_type, "image/png");
    assert_eq!(svc.checks(), 0);
    assert_eq!(out.stages[0].job_id, None);
    assert_eq!(out.stages[0].poll_attempts, 0);
}

#[tokio::test(start_paused = true)]
async fn reference_stage_without_uploader_is_rejected() {
    let svc = Arc::new(
        ScriptedService::new(
            "faceswap",
            SubmissionShape::Reference,
            polling(3, 1),
            "x",
            Vec::new(),
        )
        .inputs(2),
    );
    let pipeline = Pipeline::new(Arc::new(FakeFetcher::default())).stage(StageSpec::new(svc.clone()));

    let err = pipeline.run(inputs(), &CancelSignal::new()).await.unwrap_err();
    assert!(matches!(err.source, StageError::Validation(_)));
    assert_eq!(svc.submits(), 0);
}

#[tokio::test(start_paused = true)]
async fn oversized_input_is_downscaled_before_upload() {
    let fetcher = FakeFetcher::default()
        .serve("https://cdn.example/s.png", png(8, 8, [1, 1, 1]), Some("image/png"))
        .serve("https://cdn.example/t.png", png(8, 8, [2, 2, 2]), Some("image/png"));
    let mut t = two_stage(
        vec![done("completed", "https://cdn.example/s.png")],
        vec![done("PROCESS_SUCCESS", "https://cdn.example/t.png")],
        fetcher,
    );
    t.pipeline = t.pipeline.with_normalize(toonswap::NormalizeConfig {
        max_dimension: 40,
        ..Default::default()
    });

    let out = t.pipeline.run(inputs(), &CancelSignal::new()).await.unwrap();

    let uploaded = t.uploader.uploaded.lock().unwrap().clone();
    assert_eq!((uploaded[0].width, uploaded[0].height), (40, 30));
    assert!(uploaded[0].resized);
    assert!(!uploaded[1].resized, "32x32 is within the bound");
    assert!(out.stages[0].resized);
    assert!(!out.stages[1].resized);
}

#[tokio::test(start_paused = true)]
async fn run_to_file_writes_only_on_success() {
    let dir = tempfile::tempdir().unwrap();

    let final_bytes = png(12, 12, [7, 7, 7]);
    let fetcher = FakeFetcher::default()
        .serve("https://cdn.example/s.png", png(8, 8, [1, 1, 1]), Some("image/png"))
        .serve("https://cdn.example/t.png", final_bytes.clone(), Some("image/png"));
    let ok = two_stage(
        vec![done("completed", "https://cdn.example/s.png")],
        vec![done("PROCESS_SUCCESS", "https://cdn.example/t.png")],
        fetcher,
    );
    let path = dir.path().join("toon.png");
    ok.pipeline
        .run_to_file(inputs(), &path, &CancelSignal::new())
        .await
        .unwrap();
    assert_eq!(std::fs::read(&path).unwrap(), final_bytes);

    let failing = two_stage(
        vec![status("failed")],
        Vec::new(),
        FakeFetcher::default(),
    );
    let bad_path = dir.path().join("never.png");
    let err = failing
        .pipeline
        .run_to_file(inputs(), &bad_path, &CancelSignal::new())
        .await
        .unwrap_err();
    assert_eq!(err.as_pipeline().map(|p| p.stage.as_str()), Some("faceswap"));
    assert!(!bad_path.exists());
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
}

#[tokio::test(start_paused = true)]
async fn concurrent_runs_are_independent() {
    let fetcher = FakeFetcher::default()
        .serve("https://cdn.example/s.png", png(8, 8, [1, 1, 1]), Some("image/png"))
        .serve("https://cdn.example/t.png", png(8, 8, [2, 2, 2]), Some("image/png"));
    let t = two_stage(
        vec![
            done("completed", "https://cdn.example/s.png"),
            done("completed", "https://cdn.example/s.png"),
        ],
        vec![
            done("PROCESS_SUCCESS", "https://cdn.example/t.png"),
            done("PROCESS_SUCCESS", "https://cdn.example/t.png"),
        ],
        fetcher,
    );
    let a = CancelSignal::new();
    let b = CancelSignal::new();
    b.cancel("only b");

    let (ra, rb) = tokio::join!(t.pipeline.run(inputs(), &a), t.pipeline.run(inputs(), &b));

    assert!(ra.is_ok());
    assert_eq!(rb.unwrap_err().class(), FailureClass::Cancelled);
}
