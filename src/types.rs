//! Core data types for the Henkan conversion library.
//!
//! This module defines the fundamental data structures used throughout Henkan:
//! - Page-level data (`Page`, `ProcessedPage`)
//! - Processing settings (`ImageProcessingOptions`, `UpscaleMethod`)
//! - Package-level metadata (`PackageMetadata`)
//! - The conversion request consumed by the orchestrator (`ConversionRequest`)
//! - Enumerations for output formats and extraction modes

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::naming;

/// Output format(s) requested for a conversion.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Epub,
    Mobi,
    Both,
}

impl OutputFormat {
    /// Whether the fixed-layout EPUB is part of the requested deliverables.
    pub fn wants_epub(self) -> bool {
        matches!(self, OutputFormat::Epub | OutputFormat::Both)
    }

    /// Whether the legacy MOBI transcode is part of the requested deliverables.
    pub fn wants_mobi(self) -> bool {
        matches!(self, OutputFormat::Mobi | OutputFormat::Both)
    }
}

/// How pages are pulled out of an input archive.
///
/// `Flatten` ignores internal directory structure and orders pages by file
/// name; `Preserve` keeps the archive's directory grouping (chapter folders)
/// as the primary sort key.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractMode {
    #[default]
    Flatten,
    Preserve,
}

/// Upscaling strategy applied to pages smaller than the target dimensions.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpscaleMethod {
    #[default]
    None,
    Lanczos,
    Ai,
}

/// Per-job image processing settings, copied into each conversion job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageProcessingOptions {
    /// Target device profile id (see [`crate::device`]), or `"custom"`.
    pub device_profile_id: String,
    /// Explicit width when `device_profile_id` is `"custom"`.
    pub custom_width: Option<u32>,
    /// Explicit height when `device_profile_id` is `"custom"`.
    pub custom_height: Option<u32>,
    pub upscale_method: UpscaleMethod,
    /// Treat images wider than 1.3x their height as two-page spreads.
    pub detect_spreads: bool,
    /// Rotate detected spreads 90 degrees clockwise for portrait reading.
    pub rotate_spreads: bool,
    /// Scale every page to fit the device bounds (`true`) instead of only
    /// downscaling oversized pages (`false`).
    pub fill_screen: bool,
}

impl Default for ImageProcessingOptions {
    fn default() -> Self {
        Self {
            device_profile_id: crate::device::DEFAULT_PROFILE_ID.to_string(),
            custom_width: None,
            custom_height: None,
            upscale_method: UpscaleMethod::None,
            detect_spreads: true,
            rotate_spreads: true,
            fill_screen: true,
        }
    }
}

/// A single source page, ordered within its job run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    /// Zero-based position in the final reading order.
    pub sequence_index: usize,
    /// Path to the raw image bytes on disk.
    pub source: PathBuf,
}

impl Page {
    pub fn new(sequence_index: usize, source: impl Into<PathBuf>) -> Self {
        Self {
            sequence_index,
            source: source.into(),
        }
    }

    /// File name of the source image, for error reporting.
    pub fn source_name(&self) -> String {
        self.source
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.source.to_string_lossy().to_string())
    }
}

/// The encoded result of transforming one [`Page`].
#[derive(Debug, Clone)]
pub struct ProcessedPage {
    pub sequence_index: usize,
    /// JPEG-encoded page, ready for packaging.
    pub encoded_bytes: Vec<u8>,
    /// Byte length of `encoded_bytes`, recorded for capacity accounting.
    pub estimated_size: usize,
}

/// Series/volume metadata embedded into generated packages.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PackageMetadata {
    pub title: String,
    pub author: Option<String>,
    pub series: Option<String>,
    #[serde(default)]
    pub series_index: u32,
    pub description: Option<String>,
    /// Chapter descriptor used by the naming template (e.g. "12" or "1-16").
    pub chapter: Option<String>,
    /// Volume descriptor used by the naming template.
    pub volume: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl PackageMetadata {
    /// Creates a default `PackageMetadata` with the given title.
    pub fn default_with_title(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            series_index: 1,
            ..Default::default()
        }
    }

    /// Human-visible title, including the chapter descriptor when present.
    pub fn display_title(&self) -> String {
        match &self.chapter {
            Some(chapter) => format!("{} - Chapter {}", self.title, chapter),
            None => self.title.clone(),
        }
    }
}

/// A request to convert one or more inputs, built declaratively.
///
/// Use [`ConversionRequest::builder()`] to construct one; validation runs in
/// the builder so malformed requests are rejected before any job is created.
///
/// ```rust,no_run
/// # use henkan::prelude::*;
/// # use std::path::PathBuf;
/// let request = ConversionRequest::builder()
///     .session_id("session-1")
///     .inputs(vec![PathBuf::from("./chapter_01.cbz")])
///     .metadata(PackageMetadata::default_with_title("My Series"))
///     .output_dir(PathBuf::from("./output"))
///     .build()
///     .expect("invalid request");
/// ```
#[derive(Debug, Clone, derive_builder::Builder, Serialize)]
#[builder(setter(into, strip_option), build_fn(validate = "Self::validate"))]
pub struct ConversionRequest {
    /// Session the inputs belong to; recorded on the job for filtering.
    pub session_id: String,

    /// Ordered list of input files (CBZ/ZIP archives or image directories).
    pub inputs: Vec<PathBuf>,

    /// Explicit merge order as indices into `inputs`. Must be a permutation
    /// of `0..inputs.len()` when present.
    #[builder(default)]
    pub merge_order: Option<Vec<usize>>,

    pub metadata: PackageMetadata,

    #[builder(default)]
    pub output_format: OutputFormat,

    /// Output filename template; see [`crate::naming`] for the placeholder set.
    #[builder(default = "naming::DEFAULT_TEMPLATE.to_string()")]
    pub naming_template: String,

    /// Combine all inputs into one package set (splitting on the byte budget)
    /// instead of converting each input separately.
    #[builder(default)]
    pub merge_files: bool,

    /// Byte budget per output package, in megabytes.
    #[builder(default = "200")]
    pub max_output_size_mb: u64,

    #[builder(default)]
    pub image_options: ImageProcessingOptions,

    #[builder(default)]
    pub extract_mode: ExtractMode,

    /// JPEG quality for encoded pages (1-100).
    #[builder(default = "85")]
    pub quality: u8,

    /// Optional explicit cover image; defaults to the first page.
    #[builder(default)]
    pub cover_image: Option<PathBuf>,

    /// Directory generated packages are written to.
    pub output_dir: PathBuf,
}

impl ConversionRequest {
    pub fn builder() -> ConversionRequestBuilder {
        ConversionRequestBuilder::default()
    }

    /// Effective byte budget per output package.
    pub fn max_output_size_bytes(&self) -> u64 {
        self.max_output_size_mb * 1024 * 1024
    }

    /// Inputs reordered by `merge_order` when one was supplied.
    pub fn ordered_inputs(&self) -> Vec<PathBuf> {
        match &self.merge_order {
            Some(order) => order.iter().map(|&i| self.inputs[i].clone()).collect(),
            None => self.inputs.clone(),
        }
    }
}

impl ConversionRequestBuilder {
    fn validate(&self) -> std::result::Result<(), String> {
        if let Some(inputs) = &self.inputs {
            if inputs.is_empty() {
                return Err("At least one input file is required".to_string());
            }
            if let Some(Some(order)) = &self.merge_order {
                if order.len() != inputs.len() {
                    return Err(format!(
                        "Merge order has {} entries but there are {} inputs",
                        order.len(),
                        inputs.len()
                    ));
                }
                let mut seen = vec![false; inputs.len()];
                for &idx in order {
                    if idx >= inputs.len() || seen[idx] {
                        return Err(format!("Invalid merge order index: {}", idx));
                    }
                    seen[idx] = true;
                }
            }
        }
        if let Some(quality) = self.quality {
            if quality == 0 || quality > 100 {
                return Err("Quality must be between 1 and 100".to_string());
            }
        }
        if let Some(template) = &self.naming_template {
            naming::validate_template(template).map_err(|e| e.to_string())?;
        }
        Ok(())
    }
}

/// Utility function: determines file extension and MIME type for an image path.
///
/// # Supported formats
///
/// - JPEG/JPG: image/jpeg
/// - PNG: image/png
/// - WebP: image/webp
/// - GIF: image/gif
/// - BMP: image/bmp
pub fn image_file_info(image_path: &Path) -> Result<(&'static str, &'static str)> {
    let ext = image_path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match ext.as_deref() {
        Some("jpg") | Some("jpeg") => Ok(("jpg", "image/jpeg")),
        Some("png") => Ok(("png", "image/png")),
        Some("webp") => Ok(("webp", "image/webp")),
        Some("gif") => Ok(("gif", "image/gif")),
        Some("bmp") => Ok(("bmp", "image/bmp")),
        _ => Err(Error::Unsupported(format!("Image format {:#?}", ext))),
    }
}

/// Whether a path carries a recognized image extension.
pub fn is_image_file(path: &Path) -> bool {
    image_file_info(path).is_ok()
}
