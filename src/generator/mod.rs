//! Package assembly: turning batches of transformed pages into output files.
//!
//! The assembler owns the EPUB build plus the optional MOBI transcode for
//! one job. MOBI failures are survivable when an EPUB was also requested
//! (the package completes with a warning); a MOBI-only request fails.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::warn;

use crate::error::{Error, Result};
use crate::types::{OutputFormat, PackageMetadata, ProcessedPage};

pub mod epub;
pub mod transcode;

pub use epub::FixedLayoutEpub;
pub use transcode::{EbookConvert, Transcoder, DEFAULT_TRANSCODE_TIMEOUT};

/// Identity of one output package within a (possibly split) job.
#[derive(Debug, Clone)]
pub struct PackagePlan {
    /// Output file name without extension, already sanitized.
    pub filename_base: String,
    /// Package title, carrying the part annotation for split jobs.
    pub title: String,
}

impl PackagePlan {
    /// Plan for package `part` (1-based) of `total_parts`. Single-package
    /// jobs carry no part annotation in either title or filename.
    pub fn for_part(filename_base: &str, title: &str, part: usize, total_parts: usize) -> Self {
        if total_parts <= 1 {
            Self {
                filename_base: filename_base.to_string(),
                title: title.to_string(),
            }
        } else {
            Self {
                filename_base: format!("{}_part{:02}", filename_base, part),
                title: format!("{} (Part {}/{})", title, part, total_parts),
            }
        }
    }
}

/// Result of assembling one package.
#[derive(Debug, Clone, Default)]
pub struct AssembledPackage {
    /// Paths of the files written for this package.
    pub files: Vec<PathBuf>,
    /// Non-fatal problems (currently only MOBI transcode failures).
    pub warnings: Vec<String>,
}

/// Assembles output packages for one conversion job.
pub struct PackageAssembler {
    output_dir: PathBuf,
    format: OutputFormat,
    page_width: u32,
    page_height: u32,
    transcoder: Arc<dyn Transcoder>,
}

impl PackageAssembler {
    pub fn new(
        output_dir: &Path,
        format: OutputFormat,
        page_dimensions: (u32, u32),
        transcoder: Arc<dyn Transcoder>,
    ) -> Self {
        Self {
            output_dir: output_dir.to_path_buf(),
            format,
            page_width: page_dimensions.0,
            page_height: page_dimensions.1,
            transcoder,
        }
    }

    /// Builds one package from its pages.
    ///
    /// The EPUB is always generated first (MOBI is transcoded from it);
    /// `cover_bytes` defaults to the first page when absent.
    pub async fn assemble(
        &self,
        plan: &PackagePlan,
        pages: &[ProcessedPage],
        metadata: &PackageMetadata,
        cover_bytes: Option<&[u8]>,
    ) -> Result<AssembledPackage> {
        if pages.is_empty() {
            return Err(Error::Other(format!(
                "Package '{}' has no pages",
                plan.filename_base
            )));
        }

        let mut builder = FixedLayoutEpub::new(
            &self.output_dir,
            &plan.filename_base,
            self.page_width,
            self.page_height,
        )?;
        builder.set_metadata(&plan.title, metadata)?;

        let cover = cover_bytes.unwrap_or(pages[0].encoded_bytes.as_slice());
        builder.set_cover(cover)?;

        for page in pages {
            builder.add_page(page)?;
        }
        let epub_path = builder.save()?;

        let mut assembled = AssembledPackage::default();

        if self.format.wants_mobi() {
            let mobi_path = epub_path.with_extension("mobi");
            match self.transcoder.transcode(&epub_path, &mobi_path).await {
                Ok(()) => {
                    assembled.files.push(mobi_path);
                    if self.format.wants_epub() {
                        assembled.files.insert(0, epub_path);
                    } else {
                        // MOBI-only: the EPUB was only an intermediate.
                        tokio::fs::remove_file(&epub_path).await?;
                    }
                }
                Err(e) if self.format.wants_epub() => {
                    warn!(
                        "MOBI transcode failed for '{}', keeping EPUB: {}",
                        plan.filename_base, e
                    );
                    assembled
                        .warnings
                        .push(format!("MOBI generation failed: {}", e));
                    assembled.files.push(epub_path);
                }
                Err(e) => {
                    tokio::fs::remove_file(&epub_path).await.ok();
                    return Err(e);
                }
            }
        } else {
            assembled.files.push(epub_path);
        }

        Ok(assembled)
    }
}
