//! Per-page image transform pipeline.
//!
//! Every page runs through the same fixed sequence: decode, RGB
//! normalization, spread handling, optional upscaling, device-fit resizing,
//! and JPEG encoding. The pipeline is configured once per job so target
//! dimensions and upscaler availability are resolved a single time, then
//! pages are transformed concurrently on the blocking thread pool and
//! reassembled in reading order.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::future::try_join_all;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::DynamicImage;
use log::{debug, warn};
use tokio::spawn;
use tokio::sync::Semaphore;
use tokio::task::{spawn_blocking, JoinHandle};

use crate::device;
use crate::error::{Error, Result};
use crate::job::CancelToken;
use crate::types::{ImageProcessingOptions, Page, ProcessedPage, UpscaleMethod};
use crate::upscale::{clamp_scale, Upscaler};

/// Aspect ratio above which a page is treated as a two-page spread.
pub const SPREAD_ASPECT_THRESHOLD: f64 = 1.3;

/// Configured transform pipeline for one conversion job.
pub struct TransformPipeline {
    options: ImageProcessingOptions,
    target_width: u32,
    target_height: u32,
    quality: u8,
    upscaler: Arc<dyn Upscaler>,
    /// Probed once at construction; a backend that goes away mid-job is not
    /// re-detected.
    upscaler_available: bool,
}

impl TransformPipeline {
    pub fn new(
        options: ImageProcessingOptions,
        quality: u8,
        upscaler: Arc<dyn Upscaler>,
    ) -> Self {
        let (target_width, target_height) = device::resolve_dimensions(
            &options.device_profile_id,
            options.custom_width,
            options.custom_height,
        );
        let upscaler_available =
            options.upscale_method == UpscaleMethod::Ai && upscaler.is_available();
        if options.upscale_method == UpscaleMethod::Ai && !upscaler_available {
            warn!("AI upscaler unavailable; falling back to Lanczos resampling");
        }
        Self {
            options,
            target_width,
            target_height,
            quality,
            upscaler,
            upscaler_available,
        }
    }

    /// Effective output bounds the pipeline resizes toward.
    pub fn target_dimensions(&self) -> (u32, u32) {
        (self.target_width, self.target_height)
    }

    /// Whether `width` x `height` reads as a two-page spread.
    pub fn is_spread(width: u32, height: u32) -> bool {
        height > 0 && width as f64 / height as f64 > SPREAD_ASPECT_THRESHOLD
    }

    /// Transforms one page through the full step sequence.
    ///
    /// Synchronous and CPU-bound; callers are expected to run it via
    /// `spawn_blocking`. Any decode or encode failure is fatal for the page
    /// and reported against its source file name.
    pub fn process_page(&self, page: &Page) -> Result<ProcessedPage> {
        let fail = |message: String| Error::Processing {
            source_name: page.source_name(),
            message,
        };

        let bytes = crate::reader::read_file_bytes(&page.source)?;
        let decoded = image::load_from_memory(&bytes)
            .map_err(|e| fail(format!("Failed to decode image: {}", e)))?;

        // Normalize early so every later step sees 8-bit RGB.
        let mut img = DynamicImage::ImageRgb8(decoded.to_rgb8());

        if self.options.detect_spreads && Self::is_spread(img.width(), img.height()) {
            if self.options.rotate_spreads {
                debug!(
                    "Rotating spread page {} ({}x{})",
                    page.sequence_index,
                    img.width(),
                    img.height()
                );
                img = img.rotate90();
            }
        }

        if self.options.upscale_method != UpscaleMethod::None
            && (img.width() < self.target_width || img.height() < self.target_height)
        {
            img = self.upscale(img)?;
        }

        img = self.resize_to_device(img);

        let mut encoded = Vec::new();
        let mut encoder = JpegEncoder::new_with_quality(&mut encoded, self.quality);
        encoder
            .encode_image(&img)
            .map_err(|e| fail(format!("Failed to encode JPEG: {}", e)))?;

        let estimated_size = encoded.len();
        Ok(ProcessedPage {
            sequence_index: page.sequence_index,
            encoded_bytes: encoded,
            estimated_size,
        })
    }

    /// Upscales an undersized page toward the target bounds.
    ///
    /// The scale factor is the larger of the two axis ratios so the result
    /// covers the target in both dimensions; the device-fit resize then
    /// brings it back down to the exact bounds.
    fn upscale(&self, img: DynamicImage) -> Result<DynamicImage> {
        let ratio = f64::max(
            self.target_width as f64 / img.width() as f64,
            self.target_height as f64 / img.height() as f64,
        );
        if ratio <= 1.0 {
            return Ok(img);
        }

        match self.options.upscale_method {
            UpscaleMethod::Ai if self.upscaler_available => {
                let scale = clamp_scale(ratio);
                match self.upscaler.upscale(&img, scale) {
                    Ok(upscaled) => Ok(upscaled),
                    Err(e) => {
                        warn!("AI upscale failed ({}); falling back to Lanczos", e);
                        Ok(Self::lanczos_by_ratio(&img, ratio))
                    }
                }
            }
            UpscaleMethod::Ai | UpscaleMethod::Lanczos => Ok(Self::lanczos_by_ratio(&img, ratio)),
            UpscaleMethod::None => Ok(img),
        }
    }

    /// Lanczos resize by an exact ratio, rounding up so the result covers
    /// the target in both axes.
    fn lanczos_by_ratio(img: &DynamicImage, ratio: f64) -> DynamicImage {
        let new_width = (img.width() as f64 * ratio).ceil() as u32;
        let new_height = (img.height() as f64 * ratio).ceil() as u32;
        img.resize_exact(new_width, new_height, FilterType::Lanczos3)
    }

    /// Scales a page to the device bounds, preserving aspect ratio.
    ///
    /// `fill_screen` resizes in both directions so the page spans the screen;
    /// otherwise only oversized pages are brought down and small pages keep
    /// their native resolution.
    fn resize_to_device(&self, img: DynamicImage) -> DynamicImage {
        let (width, height) = (img.width(), img.height());
        let oversized = width > self.target_width || height > self.target_height;

        if !self.options.fill_screen && !oversized {
            return img;
        }

        let ratio = f64::min(
            self.target_width as f64 / width as f64,
            self.target_height as f64 / height as f64,
        );
        let new_width = ((width as f64 * ratio).round() as u32).max(1);
        let new_height = ((height as f64 * ratio).round() as u32).max(1);
        if new_width == width && new_height == height {
            return img;
        }
        img.resize_exact(new_width, new_height, FilterType::Lanczos3)
    }

    /// Runs an explicit cover image through the page pipeline, returning its
    /// encoded bytes.
    pub async fn process_cover(self: Arc<Self>, path: &std::path::Path) -> Result<Vec<u8>> {
        let page = Page::new(0, path.to_path_buf());
        let pipeline = self;
        let processed = spawn_blocking(move || pipeline.process_page(&page)).await??;
        Ok(processed.encoded_bytes)
    }

    /// Transforms a batch of pages concurrently, bounded by the CPU count,
    /// and returns them ordered by `sequence_index`.
    ///
    /// `on_page_done` is invoked with `(done, total)` from inside each page's
    /// task as it finishes, so callers see progress while the batch is still
    /// running. Completion order is not reading order; `done` is the running
    /// count of finished pages.
    ///
    /// The cancel token is checked before each page is dispatched; a
    /// triggered token aborts the remaining pages with `Error::Cancelled`.
    pub async fn process_pages(
        self: Arc<Self>,
        pages: Vec<Page>,
        cancel: &CancelToken,
        on_page_done: impl Fn(usize, usize) + Send + Sync + 'static,
    ) -> Result<Vec<ProcessedPage>> {
        let total = pages.len();
        let semaphore = Arc::new(Semaphore::new(num_cpus::get()));
        let on_page_done = Arc::new(on_page_done);
        let completed = Arc::new(AtomicUsize::new(0));
        let mut handles: Vec<JoinHandle<Result<ProcessedPage>>> = Vec::with_capacity(total);

        for page in pages {
            cancel.checkpoint()?;

            let pipeline = Arc::clone(&self);
            let semaphore = Arc::clone(&semaphore);
            let cancel = cancel.clone();
            let on_page_done = Arc::clone(&on_page_done);
            let completed = Arc::clone(&completed);

            handles.push(spawn(async move {
                let _permit = semaphore.acquire().await?;
                cancel.checkpoint()?;
                let processed = spawn_blocking(move || pipeline.process_page(&page)).await??;
                let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                on_page_done(done, total);
                Ok(processed)
            }));
        }

        let results = try_join_all(handles)
            .await
            .map_err(|e| Error::AsyncTaskError(format!("Failed to join page tasks: {}", e)))?;

        let mut processed = results.into_iter().collect::<Result<Vec<ProcessedPage>>>()?;
        processed.sort_by_key(|p| p.sequence_index);
        Ok(processed)
    }
}
