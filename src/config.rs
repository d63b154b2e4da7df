//! Configuration types for the face-swap → cartoon pipeline.
//!
//! Every external service gets its own configuration struct (API key, base
//! URL, timeouts and, for job services, polling parameters). The structs are
//! handed to each adapter at construction; nothing is read from global state
//! after that, so two pipelines with different keys can run side by side in
//! the same process.
//!
//! [`PipelineConfig`] aggregates them and is built via
//! [`PipelineConfig::builder()`] or [`PipelineConfig::from_env()`].

use crate::error::ConfigError;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Environment variable holding the image-host API key.
pub const ENV_UPLOAD_API_KEY: &str = "TOONSWAP_UPLOAD_API_KEY";
/// Environment variable holding the face-swap API key.
pub const ENV_FACESWAP_API_KEY: &str = "TOONSWAP_FACESWAP_API_KEY";
/// Environment variable holding the cartoon API key.
pub const ENV_CARTOON_API_KEY: &str = "TOONSWAP_CARTOON_API_KEY";
/// Environment variable holding the portrait (RapidAPI) key.
pub const ENV_PORTRAIT_API_KEY: &str = "TOONSWAP_PORTRAIT_API_KEY";

// ── Normalizer ───────────────────────────────────────────────────────────

/// Limits enforced on every image before it reaches a remote service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizeConfig {
    /// Maximum payload size in bytes. Default: 10 MiB.
    pub max_bytes: usize,

    /// Maximum width and height in pixels. Default: 2000.
    ///
    /// Larger images are downscaled so that the longest side equals this
    /// bound; smaller ones pass through byte-for-byte.
    pub max_dimension: u32,

    /// Accepted file extensions, lower-case and without the dot.
    pub accepted_extensions: Vec<String>,
}

impl Default for NormalizeConfig {
    fn default() -> Self {
        Self {
            max_bytes: 10 * 1024 * 1024,
            max_dimension: 2000,
            accepted_extensions: ["jpg", "jpeg", "png", "bmp", "webp"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

// ── Polling ──────────────────────────────────────────────────────────────

/// Per-stage polling budget and status vocabulary.
///
/// The budget is an attempt count, not a wall-clock deadline: worst-case
/// latency is `max_attempts × interval` plus the request time, whatever the
/// clocks say. Face-swap jobs finish in seconds while cartoon jobs can take
/// many minutes, so each job service carries its own `PollingConfig`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollingConfig {
    /// Maximum number of status queries. Must be ≥ 1.
    pub max_attempts: u32,

    /// Fixed delay between two consecutive status queries.
    #[serde(with = "duration_millis")]
    pub interval: Duration,

    /// Statuses meaning "done, result available". Compared case-insensitively.
    pub success_statuses: Vec<String>,

    /// Statuses meaning "done, job failed". Compared case-insensitively.
    pub failure_statuses: Vec<String>,
}

impl PollingConfig {
    pub fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval,
            success_statuses: Vec::new(),
            failure_statuses: Vec::new(),
        }
    }

    pub fn success_statuses<I, S>(mut self, statuses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.success_statuses = statuses.into_iter().map(Into::into).collect();
        self
    }

    pub fn failure_statuses<I, S>(mut self, statuses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.failure_statuses = statuses.into_iter().map(Into::into).collect();
        self
    }

    /// Default budget for the face-swap service: 30 checks, 2 s apart.
    pub fn faceswap_default() -> Self {
        Self::new(30, Duration::from_secs(2))
            .success_statuses(["completed"])
            .failure_statuses(["failed"])
    }

    /// Default budget for the cartoon service: 120 checks, 5 s apart.
    pub fn cartoon_default() -> Self {
        Self::new(120, Duration::from_secs(5))
            .success_statuses(["PROCESS_SUCCESS"])
            .failure_statuses(["PROCESS_FAILED", "TIMEOUT_FAILED", "LIMIT_RETRY_FAILED"])
    }

    fn validate(&self, service: &str) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid(format!(
                "{service}: max_attempts must be ≥ 1"
            )));
        }
        if self.success_statuses.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "{service}: at least one success status is required"
            )));
        }
        Ok(())
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

// ── Services ─────────────────────────────────────────────────────────────

/// Image host (ImgBB-compatible) used to turn bytes into public URLs.
#[derive(Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    pub api_key: String,
    /// Upload endpoint. Default: `https://api.imgbb.com/1/upload`.
    pub endpoint: String,
    /// Per-request timeout in seconds. Default: 60.
    pub timeout_secs: u64,
}

impl UploadConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            endpoint: "https://api.imgbb.com/1/upload".to_string(),
            timeout_secs: 60,
        }
    }
}

/// Reference-based face-swap job service.
#[derive(Clone, Serialize, Deserialize)]
pub struct FaceSwapConfig {
    pub api_key: String,
    /// Base URL. Default: `https://api.piapi.ai`.
    pub base_url: String,
    /// Model identifier sent with each task. Default: `Qubico/image-toolkit`.
    pub model: String,
    /// Task type sent with each task. Default: `face-swap`.
    pub task_type: String,
    /// Per-request timeout in seconds. Default: 60.
    pub timeout_secs: u64,
    pub polling: PollingConfig,
}

impl FaceSwapConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: "https://api.piapi.ai".to_string(),
            model: "Qubico/image-toolkit".to_string(),
            task_type: "face-swap".to_string(),
            timeout_secs: 60,
            polling: PollingConfig::faceswap_default(),
        }
    }
}

/// Inline (multipart) cartoon-stylization job service.
#[derive(Clone, Serialize, Deserialize)]
pub struct CartoonConfig {
    pub api_key: String,
    /// Base URL. Default: `https://www.ailabapi.com`.
    pub base_url: String,
    /// Numeric style index sent as the multipart `type` field. Default: `"0"`.
    pub style: String,
    /// Task type passed to the status query. Default: `GENERATE_CARTOONIZED_IMAGE`.
    pub task_type: String,
    /// Per-request timeout in seconds. Default: 60.
    pub timeout_secs: u64,
    pub polling: PollingConfig,
}

impl CartoonConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: "https://www.ailabapi.com".to_string(),
            style: "0".to_string(),
            task_type: "GENERATE_CARTOONIZED_IMAGE".to_string(),
            timeout_secs: 60,
            polling: PollingConfig::cartoon_default(),
        }
    }
}

/// Synchronous-style portrait animation service (RapidAPI "cartoon-yourself").
#[derive(Clone, Serialize, Deserialize)]
pub struct PortraitConfig {
    pub api_key: String,
    /// Value of the `x-rapidapi-host` header.
    pub api_host: String,
    pub endpoint: String,
    /// Style name sent as `type`. Default: `hongkong`.
    pub style: String,
    /// Per-request timeout in seconds. Default: 120.
    pub timeout_secs: u64,
}

impl PortraitConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_host: "cartoon-yourself.p.rapidapi.com".to_string(),
            endpoint: "https://cartoon-yourself.p.rapidapi.com/facebody/api/portrait-animation/portrait-animation".to_string(),
            style: "hongkong".to_string(),
            timeout_secs: 120,
        }
    }
}

fn redact(key: &str) -> &'static str {
    if key.is_empty() {
        "<unset>"
    } else {
        "<redacted>"
    }
}

impl fmt::Debug for UploadConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadConfig")
            .field("api_key", &redact(&self.api_key))
            .field("endpoint", &self.endpoint)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl fmt::Debug for FaceSwapConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FaceSwapConfig")
            .field("api_key", &redact(&self.api_key))
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("task_type", &self.task_type)
            .field("polling", &self.polling)
            .finish()
    }
}

impl fmt::Debug for CartoonConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CartoonConfig")
            .field("api_key", &redact(&self.api_key))
            .field("base_url", &self.base_url)
            .field("style", &self.style)
            .field("task_type", &self.task_type)
            .field("polling", &self.polling)
            .finish()
    }
}

impl fmt::Debug for PortraitConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PortraitConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_host", &self.api_host)
            .field("endpoint", &self.endpoint)
            .field("style", &self.style)
            .finish()
    }
}

// ── Pipeline ─────────────────────────────────────────────────────────────

/// Configuration for one pipeline deployment.
///
/// Services that a given run does not use may be left as `None`; the entry
/// points check for what they need and fail with [`ConfigError`] otherwise.
///
/// # Example
/// ```rust
/// use toonswap::{FaceSwapConfig, CartoonConfig, PipelineConfig, UploadConfig};
/// use std::time::Duration;
///
/// let config = PipelineConfig::builder()
///     .upload(UploadConfig::new("imgbb-key"))
///     .faceswap(FaceSwapConfig::new("piapi-key"))
///     .cartoon(CartoonConfig::new("ailab-key"))
///     .deadline(Duration::from_secs(900))
///     .build()
///     .unwrap();
/// assert_eq!(config.normalize.max_dimension, 2000);
/// ```
#[derive(Clone, Default)]
pub struct PipelineConfig {
    pub normalize: NormalizeConfig,
    pub upload: Option<UploadConfig>,
    pub faceswap: Option<FaceSwapConfig>,
    pub cartoon: Option<CartoonConfig>,
    pub portrait: Option<PortraitConfig>,

    /// Optional end-to-end wall-clock budget for one invocation.
    ///
    /// Stage time-outs are attempt-count based; this is an outer guard on top
    /// of them. When it elapses the run stops at the next suspension point
    /// with a `Cancelled` error.
    pub deadline: Option<Duration>,

    /// Optional observer for stage and polling events.
    pub progress_callback: Option<ProgressCallback>,
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("normalize", &self.normalize)
            .field("upload", &self.upload)
            .field("faceswap", &self.faceswap)
            .field("cartoon", &self.cartoon)
            .field("portrait", &self.portrait)
            .field("deadline", &self.deadline)
            .field(
                "progress_callback",
                &self
                    .progress_callback
                    .as_ref()
                    .map(|_| "<dyn PipelineProgressCallback>"),
            )
            .finish()
    }
}

impl PipelineConfig {
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }

    /// Build a configuration from `TOONSWAP_*_API_KEY` environment variables.
    ///
    /// Every service whose key is set and non-empty is enabled with its
    /// defaults. At least one job service must be configured.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`PipelineConfig::from_env`] with an injectable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let key = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let mut builder = Self::builder();
        if let Some(k) = key(ENV_UPLOAD_API_KEY) {
            builder = builder.upload(UploadConfig::new(k));
        }
        if let Some(k) = key(ENV_FACESWAP_API_KEY) {
            builder = builder.faceswap(FaceSwapConfig::new(k));
        }
        if let Some(k) = key(ENV_CARTOON_API_KEY) {
            builder = builder.cartoon(CartoonConfig::new(k));
        }
        if let Some(k) = key(ENV_PORTRAIT_API_KEY) {
            builder = builder.portrait(PortraitConfig::new(k));
        }

        let config = builder.build()?;
        if config.faceswap.is_none() && config.cartoon.is_none() && config.portrait.is_none() {
            return Err(ConfigError::MissingApiKey {
                service: "cartoon",
                env_var: ENV_CARTOON_API_KEY,
            });
        }
        Ok(config)
    }

    /// The upload config, or an error naming the missing variable.
    pub fn require_upload(&self) -> Result<&UploadConfig, ConfigError> {
        self.upload.as_ref().ok_or(ConfigError::MissingApiKey {
            service: "upload",
            env_var: ENV_UPLOAD_API_KEY,
        })
    }

    pub fn require_faceswap(&self) -> Result<&FaceSwapConfig, ConfigError> {
        self.faceswap.as_ref().ok_or(ConfigError::MissingApiKey {
            service: "faceswap",
            env_var: ENV_FACESWAP_API_KEY,
        })
    }

    pub fn require_cartoon(&self) -> Result<&CartoonConfig, ConfigError> {
        self.cartoon.as_ref().ok_or(ConfigError::MissingApiKey {
            service: "cartoon",
            env_var: ENV_CARTOON_API_KEY,
        })
    }

    pub fn require_portrait(&self) -> Result<&PortraitConfig, ConfigError> {
        self.portrait.as_ref().ok_or(ConfigError::MissingApiKey {
            service: "portrait",
            env_var: ENV_PORTRAIT_API_KEY,
        })
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn normalize(mut self, normalize: NormalizeConfig) -> Self {
        self.config.normalize = normalize;
        self
    }

    pub fn max_dimension(mut self, px: u32) -> Self {
        self.config.normalize.max_dimension = px.max(1);
        self
    }

    pub fn max_bytes(mut self, bytes: usize) -> Self {
        self.config.normalize.max_bytes = bytes;
        self
    }

    pub fn upload(mut self, upload: UploadConfig) -> Self {
        self.config.upload = Some(upload);
        self
    }

    pub fn faceswap(mut self, faceswap: FaceSwapConfig) -> Self {
        self.config.faceswap = Some(faceswap);
        self
    }

    pub fn cartoon(mut self, cartoon: CartoonConfig) -> Self {
        self.config.cartoon = Some(cartoon);
        self
    }

    pub fn portrait(mut self, portrait: PortraitConfig) -> Self {
        self.config.portrait = Some(portrait);
        self
    }

    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.config.deadline = Some(deadline);
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, ConfigError> {
        let c = &self.config;
        if c.normalize.max_bytes == 0 {
            return Err(ConfigError::Invalid("max_bytes must be > 0".into()));
        }
        if c.normalize.accepted_extensions.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one accepted extension is required".into(),
            ));
        }
        if let Some(ref u) = c.upload {
            if u.api_key.trim().is_empty() {
                return Err(ConfigError::MissingApiKey {
                    service: "upload",
                    env_var: ENV_UPLOAD_API_KEY,
                });
            }
        }
        if let Some(ref f) = c.faceswap {
            if f.api_key.trim().is_empty() {
                return Err(ConfigError::MissingApiKey {
                    service: "faceswap",
                    env_var: ENV_FACESWAP_API_KEY,
                });
            }
            f.polling.validate("faceswap")?;
        }
        if let Some(ref k) = c.cartoon {
            if k.api_key.trim().is_empty() {
                return Err(ConfigError::MissingApiKey {
                    service: "cartoon",
                    env_var: ENV_CARTOON_API_KEY,
                });
            }
            k.polling.validate("cartoon")?;
        }
        if let Some(ref p) = c.portrait {
            if p.api_key.trim().is_empty() {
                return Err(ConfigError::MissingApiKey {
                    service: "portrait",
                    env_var: ENV_PORTRAIT_API_KEY,
                });
            }
        }
        if c.deadline == Some(Duration::ZERO) {
            return Err(ConfigError::Invalid("deadline must be > 0".into()));
        }
        Ok(self.config)
    }
}
