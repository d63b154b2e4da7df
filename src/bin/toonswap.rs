//! CLI binary for toonswap.
//!
//! A thin shim over the library crate that maps CLI flags to a
//! `PipelineConfig`, runs the pipeline and writes the result.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use toonswap::{
    cartoon_only_pipeline, faceswap_cartoon_pipeline, CancelSignal, PipelineConfig,
    PipelineProgressCallback, RawImage, StageError, StageReport, ToonswapError,
};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: a spinner showing the current stage and the
/// latest remote status, plus one log line per finished stage.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}  {elapsed:.dim}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("Preparing");
        bar.set_message("reading images…");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }
}

impl PipelineProgressCallback for CliProgressCallback {
    fn on_pipeline_start(&self, stages: &[String]) {
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Running {}", stages.join(" → ")))
        ));
    }

    fn on_stage_start(&self, stage: &str, index: usize, total: usize) {
        self.bar.set_prefix(format!("[{index}/{total}] {stage}"));
        self.bar.set_message("submitting…");
    }

    fn on_poll_attempt(&self, _stage: &str, attempt: u32, max_attempts: u32, status: &str) {
        self.bar
            .set_message(format!("{status}  {}", dim(&format!("check {attempt}/{max_attempts}"))));
    }

    fn on_stage_complete(&self, stage: &str, report: &StageReport) {
        let job = report.job_id.as_deref().unwrap_or("sync");
        self.bar.println(format!(
            "  {} {:<10} {:<12} {}  {}",
            green("✓"),
            stage,
            dim(job),
            dim(&format!("{:>8} bytes", report.output_bytes)),
            dim(&format!("{:.1}s", report.duration_ms as f64 / 1000.0)),
        ));
    }

    fn on_stage_error(&self, stage: &str, error: &StageError) {
        let msg = error.to_string();
        let msg = match msg.char_indices().nth(100) {
            Some((i, _)) => format!("{}\u{2026}", &msg[..i]),
            None => msg,
        };
        self.bar
            .println(format!("  {} {:<10} {}", red("✗"), stage, red(&msg)));
    }

    fn on_pipeline_complete(&self, _success: bool) {
        self.bar.finish_and_clear();
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Swap the face from me.png onto group.jpg, then cartoonify
  toonswap group.jpg me.png -o toon.png

  # Pick a cartoon style
  toonswap group.jpg me.png -o toon.png --style 3

  # Cartoonify a single image (no face swap)
  toonswap selfie.jpg -o selfie-toon.png

  # Single image through the synchronous portrait service
  toonswap selfie.jpg -o selfie-toon.png --portrait --style hongkong

  # Give up after 10 minutes, print the result as JSON
  toonswap group.jpg me.png -o toon.png --deadline 600 --json

ENVIRONMENT VARIABLES:
  TOONSWAP_UPLOAD_API_KEY     Image host key (needed for face swap)
  TOONSWAP_FACESWAP_API_KEY   Face-swap service key
  TOONSWAP_CARTOON_API_KEY    Cartoon service key
  TOONSWAP_PORTRAIT_API_KEY   Portrait service key (--portrait)
"#;

/// Face-swap and cartoonify images using remote image APIs.
#[derive(Parser, Debug)]
#[command(
    name = "toonswap",
    version,
    about = "Face-swap and cartoonify images using remote image APIs",
    long_about = "Swap the face from SWAP onto TARGET, then turn the result into a cartoon. \
With a single input image only the cartoon stage runs.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Image that receives the face (or the only image to cartoonify).
    target: PathBuf,

    /// Image that provides the face. Enables the face-swap stage.
    swap: Option<PathBuf>,

    /// Where to write the final image.
    #[arg(short, long, env = "TOONSWAP_OUTPUT")]
    output: PathBuf,

    /// Style selector passed to the cartoon stage.
    #[arg(long, env = "TOONSWAP_STYLE")]
    style: Option<String>,

    /// Use the synchronous portrait service for single-image runs.
    #[arg(long)]
    portrait: bool,

    /// End-to-end deadline in seconds.
    #[arg(long, env = "TOONSWAP_DEADLINE", value_parser = clap::value_parser!(u64).range(1..))]
    deadline: Option<u64>,

    /// Maximum status checks for the face-swap job.
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    faceswap_attempts: Option<u32>,

    /// Maximum status checks for the cartoon job.
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    cartoon_attempts: Option<u32>,

    /// Longest allowed image side in pixels before downscaling.
    #[arg(long, default_value_t = 2000, value_parser = clap::value_parser!(u32).range(1..))]
    max_dimension: u32,

    /// Print a JSON report (or failure descriptor) on stdout.
    #[arg(long)]
    json: bool,

    /// Disable the progress spinner.
    #[arg(long, env = "TOONSWAP_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "TOONSWAP_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "TOONSWAP_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The spinner covers what INFO logs would say; keep stderr clean.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    if cli.portrait && cli.swap.is_some() {
        anyhow::bail!("--portrait runs a single-image pipeline; drop the SWAP image");
    }

    // ── Build config ─────────────────────────────────────────────────────
    let progress: Option<Arc<dyn PipelineProgressCallback>> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn PipelineProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress)?;

    // ── Read inputs ──────────────────────────────────────────────────────
    let mut inputs = vec![read_image(&cli.target).await?];
    if let Some(ref swap) = cli.swap {
        inputs.push(read_image(swap).await?);
    }

    let pipeline = if cli.swap.is_some() {
        faceswap_cartoon_pipeline(&config)
    } else {
        cartoon_only_pipeline(&config)
    }
    .context("Invalid configuration")?
    .with_style(cli.style.as_deref());

    // ── Ctrl-C → cancel ──────────────────────────────────────────────────
    let cancel = CancelSignal::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel("interrupted by user");
            }
        });
    }

    // ── Run ──────────────────────────────────────────────────────────────
    match pipeline.run_to_file(inputs, &cli.output, &cancel).await {
        Ok(output) => {
            if cli.json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&output).context("Failed to serialise output")?
                );
            } else if !cli.quiet {
                eprintln!(
                    "{}  {} stage(s)  {}  {}ms  →  {}",
                    green("✔"),
                    output.stages.len(),
                    dim(&output.content_type),
                    output.total_duration_ms,
                    bold(&cli.output.display().to_string()),
                );
            }
            Ok(())
        }
        Err(e) => {
            if cli.json {
                if let ToonswapError::Pipeline(ref failure) = e {
                    println!(
                        "{}",
                        serde_json::to_string_pretty(&failure.describe())
                            .context("Failed to serialise failure")?
                    );
                }
            }
            Err(e).context("Pipeline failed")
        }
    }
}

/// Map CLI args and environment to a `PipelineConfig`.
fn build_config(
    cli: &Cli,
    progress: Option<Arc<dyn PipelineProgressCallback>>,
) -> Result<PipelineConfig> {
    let mut config = PipelineConfig::from_env().context("Failed to read API keys")?;

    if cli.portrait {
        config.require_portrait().context("--portrait needs a portrait key")?;
    } else {
        config.portrait = None;
    }
    config.normalize.max_dimension = cli.max_dimension;
    config.deadline = cli.deadline.map(Duration::from_secs);
    config.progress_callback = progress;

    if let Some(n) = cli.faceswap_attempts {
        if let Some(ref mut faceswap) = config.faceswap {
            faceswap.polling.max_attempts = n;
        }
    }
    if let Some(n) = cli.cartoon_attempts {
        if let Some(ref mut cartoon) = config.cartoon {
            cartoon.polling.max_attempts = n;
        }
    }

    Ok(config)
}

async fn read_image(path: &Path) -> Result<RawImage> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read image {:?}", path))?;
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok(RawImage::new(bytes, filename))
}
