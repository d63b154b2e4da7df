//! Asset normalization: validate an input image and downscale it if needed.
//!
//! Every remote service in the pipeline has upload limits, and most of them
//! reject (or silently mangle) very large photos. The normalizer enforces
//! those limits locally, before a single byte hits the network:
//!
//! 1. the declared extension must be one of the accepted formats;
//! 2. the payload must be non-empty and at most `max_bytes`;
//! 3. the bytes must decode as an image;
//! 4. images larger than `max_dimension` on either side are downscaled so the
//!    longest side equals the bound, and re-encoded as JPEG.
//!
//! Images within the limits are returned byte-for-byte: no decode/re-encode
//! round trip ever touches an image that does not need it.
//!
//! Decoding is CPU-bound; the orchestrator calls [`normalize`] from
//! `spawn_blocking`.

use crate::config::NormalizeConfig;
use crate::error::StageError;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::ImageFormat;
use std::io::Cursor;
use std::path::Path;
use tracing::{debug, info};

/// JPEG quality used when a downscaled image is re-encoded.
pub const RESIZE_JPEG_QUALITY: u8 = 90;

/// An input image as handed over by the caller: bytes plus declared filename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawImage {
    pub bytes: Vec<u8>,
    /// Used only to infer the format; never touches the file system.
    pub filename: String,
}

impl RawImage {
    pub fn new(bytes: impl Into<Vec<u8>>, filename: impl Into<String>) -> Self {
        Self {
            bytes: bytes.into(),
            filename: filename.into(),
        }
    }
}

/// An image ready for a network stage.
///
/// `bytes` is never empty: both constructors used by the pipeline,
/// [`normalize`] and [`passthrough`], reject empty payloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageAsset {
    pub bytes: Vec<u8>,
    pub filename: String,
    pub width: u32,
    pub height: u32,
    /// MIME type of `bytes`, e.g. `image/jpeg`.
    pub content_type: String,
    /// `true` when the bytes were re-encoded after downscaling.
    pub resized: bool,
}

/// Validate `bytes` and downscale if either dimension exceeds the bound.
pub fn normalize(
    bytes: Vec<u8>,
    filename: &str,
    config: &NormalizeConfig,
) -> Result<ImageAsset, StageError> {
    let ext = extension_of(filename).ok_or_else(|| {
        StageError::Validation(format!("'{filename}' has no file extension"))
    })?;
    if !config.accepted_extensions.iter().any(|a| a.eq_ignore_ascii_case(&ext)) {
        return Err(StageError::Validation(format!(
            "unsupported format '.{ext}' (accepted: {})",
            config.accepted_extensions.join(", ")
        )));
    }

    if bytes.is_empty() {
        return Err(StageError::Validation(format!("'{filename}' is empty")));
    }
    if bytes.len() > config.max_bytes {
        return Err(StageError::Validation(format!(
            "'{filename}' is {} bytes, limit is {} bytes",
            bytes.len(),
            config.max_bytes
        )));
    }

    let format = image::guess_format(&bytes).map_err(|e| StageError::Decode(e.to_string()))?;
    let img = image::load_from_memory_with_format(&bytes, format)
        .map_err(|e| StageError::Decode(e.to_string()))?;
    let (width, height) = (img.width(), img.height());
    let bound = config.max_dimension;

    if width <= bound && height <= bound {
        debug!("{}: {}x{} within {} px, unchanged", filename, width, height, bound);
        return Ok(ImageAsset {
            bytes,
            filename: filename.to_string(),
            width,
            height,
            content_type: format.to_mime_type().to_string(),
            resized: false,
        });
    }

    let scaled = img.resize(bound, bound, FilterType::Lanczos3);
    let rgb = scaled.to_rgb8();
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, RESIZE_JPEG_QUALITY)
        .encode_image(&rgb)
        .map_err(|e| StageError::Decode(format!("re-encoding failed: {e}")))?;

    info!(
        "{}: downscaled {}x{} → {}x{} ({} → {} bytes)",
        filename,
        width,
        height,
        rgb.width(),
        rgb.height(),
        bytes.len(),
        out.len()
    );

    Ok(ImageAsset {
        bytes: out,
        filename: with_extension(filename, "jpg"),
        width: rgb.width(),
        height: rgb.height(),
        content_type: ImageFormat::Jpeg.to_mime_type().to_string(),
        resized: true,
    })
}

/// Wrap `raw` as an asset without validating or decoding it.
///
/// Used for stages that opt out of normalization. Only the non-empty
/// invariant is enforced; dimensions come from the image header when it can
/// be read and are 0 otherwise.
pub fn passthrough(raw: RawImage) -> Result<ImageAsset, StageError> {
    if raw.bytes.is_empty() {
        return Err(StageError::Validation(format!("'{}' is empty", raw.filename)));
    }
    let format = image::guess_format(&raw.bytes).ok();
    let (width, height) = image::ImageReader::new(Cursor::new(&raw.bytes))
        .with_guessed_format()
        .ok()
        .and_then(|r| r.into_dimensions().ok())
        .unwrap_or((0, 0));
    Ok(ImageAsset {
        content_type: format
            .map(|f| f.to_mime_type())
            .unwrap_or("application/octet-stream")
            .to_string(),
        bytes: raw.bytes,
        filename: raw.filename,
        width,
        height,
        resized: false,
    })
}

/// Pick a filename for an intermediate result that arrived without one.
///
/// The downloaded `Content-Type` wins; otherwise the bytes are sniffed.
pub fn result_filename(content_type: Option<&str>, bytes: &[u8]) -> String {
    let from_header = content_type
        .map(crate::output::extension_for)
        .filter(|ext| *ext != "bin");
    let ext = from_header.unwrap_or_else(|| match image::guess_format(bytes) {
        Ok(ImageFormat::Png) => "png",
        Ok(ImageFormat::WebP) => "webp",
        Ok(ImageFormat::Bmp) => "bmp",
        _ => "jpg",
    });
    format!("result.{ext}")
}

fn extension_of(filename: &str) -> Option<String> {
    Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty())
        .map(|e| e.to_ascii_lowercase())
}

fn with_extension(filename: &str, ext: &str) -> String {
    Path::new(filename)
        .with_extension(ext)
        .to_string_lossy()
        .into_owned()
}
