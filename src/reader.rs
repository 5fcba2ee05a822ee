//! Input extraction: turning archives and directories into ordered page lists.
//!
//! A [`SourceReader`] resolves one input (a CBZ/ZIP archive or a plain image
//! directory) into pages staged on disk. Pages are ordered by the numeric
//! content of their file names, falling back to lexicographic order when no
//! number is present, so `page2.jpg` sorts before `page10.jpg`.

use std::cmp::Ordering;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use lazy_static::lazy_static;
use log::debug;
use memmap2::Mmap;
use rayon::prelude::*;
use regex::Regex;
use tokio::fs::read_dir;
use tokio::task::spawn_blocking;

use crate::error::{Error, Result};
use crate::types::{is_image_file, ExtractMode, Page};

lazy_static! {
    /// Matches numeric runs in page filenames ("001", "1", "1.5").
    static ref PAGE_NUMBER_REGEX: Regex = Regex::new(r"\d+\.?\d*").unwrap();
}

/// Extracts the last numeric run from a filename for natural ordering.
fn filename_number(path: &Path) -> Option<f64> {
    let file_name = path.file_name()?.to_str()?;
    PAGE_NUMBER_REGEX
        .captures_iter(file_name)
        .last()
        .and_then(|cap| cap.get(0))
        .and_then(|m| {
            let s = m.as_str();
            if s.contains('.') {
                s.parse::<f64>().ok()
            } else {
                s.trim_start_matches('0').parse::<f64>().ok()
            }
        })
}

/// Natural page ordering: numeric when both names carry numbers, otherwise
/// lexicographic on the full path.
pub fn compare_page_paths(a: &PathBuf, b: &PathBuf) -> Ordering {
    match (filename_number(a), filename_number(b)) {
        (Some(an), Some(bn)) => an.partial_cmp(&bn).unwrap_or(Ordering::Equal),
        _ => a.cmp(b),
    }
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .map(|name| name.to_string_lossy().starts_with('.'))
        .unwrap_or(false)
}

/// Reads a file fully into memory, memory-mapping it when possible.
pub fn read_file_bytes(path: &Path) -> Result<Vec<u8>> {
    let file = File::open(path)?;
    let metadata = file.metadata()?;
    if metadata.len() == 0 {
        return Ok(Vec::new());
    }
    // Safety: the mapping is dropped before this function returns and the
    // staged files are never written to concurrently.
    match unsafe { Mmap::map(&file) } {
        Ok(mmap) => Ok(mmap.to_vec()),
        Err(_) => {
            let mut file = file;
            let mut buf = Vec::with_capacity(metadata.len() as usize);
            file.read_to_end(&mut buf)?;
            Ok(buf)
        }
    }
}

/// Resolves a single input into an ordered list of [`Page`]s.
#[async_trait]
pub trait SourceReader: Send + Sync {
    /// Whether this reader recognizes the input path.
    fn supports(&self, input: &Path) -> bool;

    /// Extracts the input into `staging_dir` (archives only; directories are
    /// read in place) and returns its pages in reading order.
    async fn read_pages(&self, input: &Path, staging_dir: &Path) -> Result<Vec<Page>>;
}

/// Reader for local image directories and CBZ/ZIP archives.
///
/// CBR/RAR and nested EPUB inputs are rejected with an explicit
/// `Unsupported` error rather than a generic decode failure.
#[derive(Debug, Clone, Default)]
pub struct LocalSourceReader {
    extract_mode: ExtractMode,
}

impl LocalSourceReader {
    pub fn new(extract_mode: ExtractMode) -> Self {
        Self { extract_mode }
    }

    /// Collects image files from a directory, recursing one level in
    /// `Preserve` mode so chapter subfolders stay grouped.
    async fn collect_directory(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let mut files: Vec<PathBuf> = Vec::new();
        let mut subdirs: Vec<PathBuf> = Vec::new();

        let mut entries = read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if is_hidden(&path) {
                continue;
            }
            if path.is_dir() {
                subdirs.push(path);
            } else if is_image_file(&path) {
                files.push(path);
            }
        }

        subdirs.par_sort_by(compare_page_paths);
        match self.extract_mode {
            ExtractMode::Flatten => {
                for subdir in &subdirs {
                    files.extend(self.collect_flat(subdir).await?);
                }
                files.par_sort_by(compare_page_paths);
            }
            ExtractMode::Preserve => {
                // Directory grouping is the primary key: pages of each
                // subfolder stay contiguous, sorted within the folder.
                files.par_sort_by(compare_page_paths);
                for subdir in &subdirs {
                    let mut chapter = self.collect_flat(subdir).await?;
                    chapter.par_sort_by(compare_page_paths);
                    files.extend(chapter);
                }
            }
        }

        Ok(files)
    }

    /// Non-recursive image listing of one directory.
    async fn collect_flat(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        let mut entries = read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !is_hidden(&path) && path.is_file() && is_image_file(&path) {
                files.push(path);
            }
        }
        Ok(files)
    }

    /// Unpacks image entries of a ZIP/CBZ archive into `staging_dir`.
    ///
    /// Entry names are flattened to their file name so archive-internal
    /// directory layout cannot escape the staging directory.
    fn extract_zip(archive_path: &Path, staging_dir: &Path) -> Result<Vec<PathBuf>> {
        let file = File::open(archive_path)?;
        let mut archive = zip::ZipArchive::new(file)?;

        std::fs::create_dir_all(staging_dir)?;

        let mut extracted = Vec::new();
        for i in 0..archive.len() {
            let mut entry = archive.by_index(i)?;
            if entry.is_dir() {
                continue;
            }
            let entry_path = match entry.enclosed_name() {
                Some(p) => p,
                None => continue,
            };
            if is_hidden(&entry_path) || !is_image_file(&entry_path) {
                continue;
            }

            // Keep the parent folder in the staged name so Preserve-mode
            // ordering and duplicate basenames across chapters survive.
            let staged_name = entry_path
                .iter()
                .map(|c| c.to_string_lossy().to_string())
                .collect::<Vec<_>>()
                .join("__");
            let staged_path = staging_dir.join(staged_name);

            let mut out = File::create(&staged_path)?;
            std::io::copy(&mut entry, &mut out)?;
            extracted.push(staged_path);
        }

        extracted.par_sort_by(compare_page_paths);
        Ok(extracted)
    }
}

#[async_trait]
impl SourceReader for LocalSourceReader {
    fn supports(&self, input: &Path) -> bool {
        if input.is_dir() {
            return true;
        }
        matches!(
            input
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e.to_ascii_lowercase())
                .as_deref(),
            Some("cbz") | Some("zip")
        )
    }

    async fn read_pages(&self, input: &Path, staging_dir: &Path) -> Result<Vec<Page>> {
        if !input.exists() {
            return Err(Error::NotFound(format!(
                "Input does not exist: {}",
                input.display()
            )));
        }

        let files = if input.is_dir() {
            debug!("Reading image directory: {}", input.display());
            self.collect_directory(input).await?
        } else {
            let ext = input
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e.to_ascii_lowercase())
                .unwrap_or_default();
            match ext.as_str() {
                "cbz" | "zip" => {
                    debug!("Extracting archive: {}", input.display());
                    let archive_path = input.to_path_buf();
                    let staging = staging_dir.to_path_buf();
                    spawn_blocking(move || Self::extract_zip(&archive_path, &staging)).await??
                }
                "cbr" | "rar" => {
                    return Err(Error::Unsupported(
                        "RAR/CBR archives are not supported; repack as CBZ".to_string(),
                    ));
                }
                "epub" => {
                    return Err(Error::Unsupported(
                        "EPUB inputs are not supported as conversion sources".to_string(),
                    ));
                }
                other => {
                    return Err(Error::Unsupported(format!(
                        "Unrecognized input type: .{}",
                        other
                    )));
                }
            }
        };

        if files.is_empty() {
            return Err(Error::Processing {
                source_name: input
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_else(|| input.display().to_string()),
                message: "No images found".to_string(),
            });
        }

        Ok(files
            .into_iter()
            .enumerate()
            .map(|(i, path)| Page::new(i, path))
            .collect())
    }
}
