//! Common test utilities and constants for the Henkan crate.
//!
//! Provides functions for setting up and tearing down test directories,
//! creating dummy page images and CBZ archives, and polling jobs to
//! completion.

use henkan::error::{Error, Result};
use henkan::Orchestrator;
use image::{Rgb, RgbImage};
use rand::{distributions::Alphanumeric, Rng};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use uuid::Uuid;

#[allow(dead_code)]
pub const TEST_TMP_DIR: &str = "tests/tmp";
#[allow(dead_code)]
pub const TEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Directory layout for one test: a unique base with source, staging, and
/// output subdirectories.
#[allow(dead_code)]
pub struct TestDirs {
    pub test_dir: PathBuf,
    pub source_dir: PathBuf,
    pub staging_dir: PathBuf,
    pub output_dir: PathBuf,
}

/// Creates a clean, uniquely named test directory tree.
#[allow(dead_code)]
pub async fn setup_test_dirs(sub_path: &str) -> TestDirs {
    let rand_string: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(char::from)
        .collect();
    let unique_sub_path = format!("{}-{}", sub_path, rand_string);
    let test_dir = PathBuf::from(TEST_TMP_DIR).join(unique_sub_path);
    if test_dir.exists() {
        fs::remove_dir_all(&test_dir).await.unwrap();
    }
    let source_dir = test_dir.join("source");
    let staging_dir = test_dir.join("staging");
    let output_dir = test_dir.join("output");

    fs::create_dir_all(&source_dir).await.unwrap();
    fs::create_dir_all(&staging_dir).await.unwrap();
    fs::create_dir_all(&output_dir).await.unwrap();

    TestDirs {
        test_dir,
        source_dir,
        staging_dir,
        output_dir,
    }
}

/// Creates a solid-color JPEG page of the given dimensions.
#[allow(dead_code)]
pub async fn create_sized_image(
    path: &Path,
    width: u32,
    height: u32,
    color: Rgb<u8>,
) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let img = RgbImage::from_pixel(width, height, color);
    let path_clone = path.to_path_buf();
    tokio::task::spawn_blocking(move || img.save_with_format(path_clone, image::ImageFormat::Jpeg))
        .await
        .map_err(|e| Error::AsyncTaskError(e.to_string()))?
        .map_err(Error::Image)?;
    Ok(())
}

/// Creates a minimal 100x100 dummy JPEG page.
#[allow(dead_code)]
pub async fn create_dummy_image(path: &Path, color: Rgb<u8>) -> Result<()> {
    create_sized_image(path, 100, 100, color).await
}

/// In-memory JPEG encode of a solid-color image, for building archives.
#[allow(dead_code)]
pub fn encode_jpeg(width: u32, height: u32, color: Rgb<u8>) -> Vec<u8> {
    let img = RgbImage::from_pixel(width, height, color);
    let mut bytes = Vec::new();
    image::codecs::jpeg::JpegEncoder::new(&mut bytes)
        .encode_image(&image::DynamicImage::ImageRgb8(img))
        .unwrap();
    bytes
}

/// Builds a CBZ archive containing the named solid-color JPEG entries.
#[allow(dead_code)]
pub fn create_cbz(path: &Path, entries: &[(&str, u32, u32)]) {
    let file = std::fs::File::create(path).unwrap();
    let mut zip = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Stored);
    for (name, width, height) in entries {
        zip.start_file(name.to_string(), options).unwrap();
        zip.write_all(&encode_jpeg(*width, *height, Rgb([90, 90, 90])))
            .unwrap();
    }
    zip.finish().unwrap();
}

/// Checks that a ZIP container (CBZ or EPUB) exists and has entries.
#[allow(dead_code)]
pub fn assert_valid_zip_file(path: &Path) {
    assert!(path.exists(), "Output ZIP file does not exist: {:?}", path);
    assert!(path.is_file(), "Output ZIP path is not a file: {:?}", path);

    let file = std::fs::File::open(path).unwrap();
    let zip = zip::ZipArchive::new(file).unwrap();
    assert!(zip.len() > 0, "Output ZIP file is empty: {:?}", path);
}

/// Polls a job until it reaches a terminal phase, panicking on timeout.
#[allow(dead_code)]
pub async fn wait_for_terminal(
    orchestrator: &Orchestrator,
    job_id: Uuid,
) -> henkan::ConversionJob {
    let deadline = tokio::time::Instant::now() + TEST_TIMEOUT;
    loop {
        let job = orchestrator.status(job_id).unwrap();
        if job.is_terminal() {
            return job;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "Job {} did not finish within {:?} (phase {}, {:.0}%)",
            job_id,
            TEST_TIMEOUT,
            job.phase,
            job.progress
        );
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}
