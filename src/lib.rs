//! Henkan - Comic Archive to E-Reader Package Converter
//!
//! This crate converts comic/manga archives (CBZ/ZIP) and image directories
//! into fixed-layout EPUB packages sized for a target e-reader, with optional
//! MOBI transcoding through Calibre's `ebook-convert`. Conversions run as
//! asynchronous background jobs with phase and progress reporting, and large
//! outputs are split into multiple packages against a byte budget.
//!
//! # Getting Started
//!
//! Build a [`ConversionRequest`] with its builder, hand it to an
//! [`Orchestrator`], and poll the returned job id.
//!
//! ```rust,no_run
//! use henkan::prelude::*;
//! use std::path::PathBuf;
//!
//! #[tokio::main]
//! async fn main() -> henkan::error::Result<()> {
//!     let orchestrator = Orchestrator::new("./staging");
//!
//!     let request = ConversionRequest::builder()
//!         .session_id("session-1")
//!         .inputs(vec![PathBuf::from("./chapter_01.cbz")])
//!         .metadata(PackageMetadata::default_with_title("My Series"))
//!         .output_dir(PathBuf::from("./output"))
//!         .build()?;
//!
//!     let job_id = orchestrator.start(request)?;
//!
//!     loop {
//!         let job = orchestrator.status(job_id)?;
//!         println!("{}: {:.0}%", job.phase, job.progress);
//!         if job.is_terminal() {
//!             break;
//!         }
//!         tokio::time::sleep(std::time::Duration::from_millis(250)).await;
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! The device catalog lives in [`device`], the per-page transform steps in
//! [`pipeline`], and the splitting rules in [`batcher`].

pub mod batcher;
pub mod device;
pub mod error;
pub mod generator;
pub mod job;
pub mod naming;
pub mod orchestrator;
pub mod pipeline;
pub mod reader;
pub mod types;
pub mod upscale;

pub use orchestrator::Orchestrator;

pub use types::{
    ConversionRequest, ConversionRequestBuilder, ExtractMode, ImageProcessingOptions,
    OutputFormat, PackageMetadata, Page, ProcessedPage, UpscaleMethod,
};

pub use job::{ConversionJob, JobRegistry, Phase};

/// Prelude module for convenient imports.
///
/// Re-exports the types needed to build requests and drive conversions with
/// a single `use henkan::prelude::*;` statement.
pub mod prelude {
    pub use super::{
        ConversionJob, ConversionRequest, ConversionRequestBuilder, ExtractMode,
        ImageProcessingOptions, Orchestrator, OutputFormat, PackageMetadata, Page, Phase,
        ProcessedPage, UpscaleMethod, device, error, generator, types,
    };
    pub use crate::device::DeviceProfile;
    pub use std::path::{Path, PathBuf};
    pub use std::sync::Arc;
}
