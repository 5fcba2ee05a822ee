//! Capacity-aware batching: splitting a page run into package-sized groups.
//!
//! Packages carry a fixed container overhead plus a per-page overhead on top
//! of the image payload. The split itself is a pure greedy pass over
//! estimated sizes, which keeps it order-preserving and easy to reason
//! about: a batch closes when the next page would push it over budget, and a
//! single page larger than the whole budget still gets its own batch rather
//! than failing the job.

use std::collections::HashMap;
use std::ops::Range;
use std::path::{Path, PathBuf};

use log::debug;

use crate::error::Result;
use crate::types::ProcessedPage;

/// Container overhead charged once per generated package.
pub const PACKAGE_OVERHEAD_BYTES: u64 = 50_000;

/// Wrapper overhead charged per page (XHTML page document, manifest entry).
pub const PER_PAGE_OVERHEAD_BYTES: u64 = 500;

/// Expected payload shrink from re-encoding pages to device-sized JPEG.
pub const COMPRESSION_FACTOR: f64 = 0.7;

/// Dimensions above which raw inputs are assumed to be downscaled, for
/// estimation purposes only.
pub const ESTIMATE_MAX_WIDTH: u32 = 1600;
pub const ESTIMATE_MAX_HEIGHT: u32 = 2400;

/// Splits `estimates` into contiguous index ranges whose accumulated size
/// (plus [`PACKAGE_OVERHEAD_BYTES`] per range) stays within `max_bytes`.
///
/// Order-preserving: concatenating the ranges yields `0..estimates.len()`
/// exactly. An empty input produces no ranges.
pub fn split_with_estimates(estimates: &[u64], max_bytes: u64) -> Vec<Range<usize>> {
    let mut ranges: Vec<Range<usize>> = Vec::new();
    let mut start = 0usize;
    let mut current = PACKAGE_OVERHEAD_BYTES;

    for (i, &estimate) in estimates.iter().enumerate() {
        let page_cost = estimate + PER_PAGE_OVERHEAD_BYTES;
        if i > start && current + page_cost > max_bytes {
            ranges.push(start..i);
            start = i;
            current = PACKAGE_OVERHEAD_BYTES;
        }
        current += page_cost;
    }

    if start < estimates.len() {
        ranges.push(start..estimates.len());
    }

    ranges
}

/// Pre-flight estimator and splitter for one conversion job.
///
/// Raw input sizes are adjusted for the expected downscale and re-encode
/// before splitting, so the pre-flight split count matches the final one
/// closely enough to report early. Estimates are memoized per path because
/// merge jobs consult the same files more than once.
pub struct CapacityBatcher {
    max_bytes: u64,
    estimate_cache: HashMap<PathBuf, u64>,
}

impl CapacityBatcher {
    pub fn new(max_bytes: u64) -> Self {
        Self {
            max_bytes,
            estimate_cache: HashMap::new(),
        }
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    /// Estimated packaged size of one raw input image.
    ///
    /// The raw byte size is scaled by the pixel reduction a downscale to the
    /// estimation bounds would apply, then by [`COMPRESSION_FACTOR`], plus
    /// the per-page overhead. Unreadable dimensions degrade to a raw-size
    /// estimate instead of failing, since estimation must never abort a job
    /// the pipeline itself could finish.
    pub fn estimate_page_size(&mut self, path: &Path) -> Result<u64> {
        if let Some(&cached) = self.estimate_cache.get(path) {
            return Ok(cached);
        }

        let raw_size = std::fs::metadata(path)?.len();
        let adjusted = match image::image_dimensions(path) {
            Ok((width, height)) if width > ESTIMATE_MAX_WIDTH || height > ESTIMATE_MAX_HEIGHT => {
                let ratio = f64::min(
                    ESTIMATE_MAX_WIDTH as f64 / width as f64,
                    ESTIMATE_MAX_HEIGHT as f64 / height as f64,
                );
                let pixel_ratio = ratio * ratio;
                (raw_size as f64 * pixel_ratio) as u64
            }
            Ok(_) => raw_size,
            Err(e) => {
                debug!(
                    "Could not read dimensions of {} ({}); using raw size",
                    path.display(),
                    e
                );
                raw_size
            }
        };

        let estimate =
            (adjusted as f64 * COMPRESSION_FACTOR) as u64 + PER_PAGE_OVERHEAD_BYTES;
        self.estimate_cache.insert(path.to_path_buf(), estimate);
        Ok(estimate)
    }

    /// Pre-flight split count for a set of raw inputs, reported on the job
    /// before any page is transformed.
    pub fn suggest_split_count(&mut self, paths: &[PathBuf]) -> Result<usize> {
        let mut estimates = Vec::with_capacity(paths.len());
        for path in paths {
            // The per-page overhead is added inside the splitter.
            estimates.push(
                self.estimate_page_size(path)?
                    .saturating_sub(PER_PAGE_OVERHEAD_BYTES),
            );
        }
        Ok(split_with_estimates(&estimates, self.max_bytes).len().max(1))
    }

    /// Total estimated output size across all packages for a set of raw
    /// inputs, container overhead included.
    pub fn estimate_output_size(&mut self, paths: &[PathBuf]) -> Result<u64> {
        let mut estimates = Vec::with_capacity(paths.len());
        let mut total = 0u64;
        for path in paths {
            let estimate = self
                .estimate_page_size(path)?
                .saturating_sub(PER_PAGE_OVERHEAD_BYTES);
            total += estimate + PER_PAGE_OVERHEAD_BYTES;
            estimates.push(estimate);
        }
        let batches = split_with_estimates(&estimates, self.max_bytes).len() as u64;
        Ok(total + batches * PACKAGE_OVERHEAD_BYTES)
    }

    /// Splits transformed pages into package ranges using their actual
    /// encoded sizes.
    pub fn split_pages(&self, pages: &[ProcessedPage]) -> Vec<Range<usize>> {
        let sizes: Vec<u64> = pages.iter().map(|p| p.estimated_size as u64).collect();
        split_with_estimates(&sizes, self.max_bytes)
    }
}
