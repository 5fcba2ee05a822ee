//! Upscaler backends for pages smaller than the target device.
//!
//! The pipeline talks to a [`Upscaler`] trait so an AI model backend can be
//! plugged in without touching the transform steps. Availability is probed
//! once per pipeline; when the model backend is missing the pipeline falls
//! back to Lanczos resampling, which is deterministic and always available.

use image::imageops::FilterType;
use image::DynamicImage;
use log::warn;

use crate::error::Result;

/// Integer scale factors a model backend accepts.
pub const SUPPORTED_SCALES: &[u32] = &[2, 3, 4];

/// Clamps an arbitrary ratio to the nearest supported model scale, rounding
/// up so the result is never smaller than the target.
pub fn clamp_scale(ratio: f64) -> u32 {
    let needed = ratio.ceil() as u32;
    match needed {
        0 | 1 | 2 => 2,
        3 => 3,
        _ => 4,
    }
}

/// A pluggable upscaling backend.
pub trait Upscaler: Send + Sync {
    /// Whether the backend can run on this host. Probed once and cached by
    /// the pipeline; implementations may perform I/O here.
    fn is_available(&self) -> bool;

    /// Upscales `image` by an integer `scale` factor (one of
    /// [`SUPPORTED_SCALES`]).
    fn upscale(&self, image: &DynamicImage, scale: u32) -> Result<DynamicImage>;
}

/// Backend used when no AI model is configured. Never available, so the
/// pipeline always takes the Lanczos fallback.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledUpscaler;

impl Upscaler for DisabledUpscaler {
    fn is_available(&self) -> bool {
        false
    }

    fn upscale(&self, image: &DynamicImage, scale: u32) -> Result<DynamicImage> {
        warn!("AI upscaler invoked while disabled; using Lanczos");
        Ok(lanczos_upscale(image, scale))
    }
}

/// Deterministic Lanczos3 upscale by an integer factor.
pub fn lanczos_upscale(image: &DynamicImage, scale: u32) -> DynamicImage {
    image.resize_exact(
        image.width() * scale,
        image.height() * scale,
        FilterType::Lanczos3,
    )
}
