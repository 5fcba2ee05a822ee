//! MOBI transcoding through the external `ebook-convert` tool.
//!
//! MOBI is produced by transcoding the generated EPUB rather than being
//! built natively. The tool is invoked per package with a hard timeout so a
//! wedged conversion cannot hold a job open forever.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, warn};
use tokio::process::Command;
use tokio::time::timeout;

use crate::error::{Error, Result};

/// Default wall-clock limit for one transcode invocation.
pub const DEFAULT_TRANSCODE_TIMEOUT: Duration = Duration::from_secs(600);

/// External EPUB-to-MOBI transcoder.
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Converts `epub_path` into a MOBI file at `mobi_path`.
    async fn transcode(&self, epub_path: &Path, mobi_path: &Path) -> Result<()>;
}

/// [`Transcoder`] backed by Calibre's `ebook-convert` binary.
#[derive(Debug, Clone)]
pub struct EbookConvert {
    binary: PathBuf,
    timeout: Duration,
}

impl Default for EbookConvert {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("ebook-convert"),
            timeout: DEFAULT_TRANSCODE_TIMEOUT,
        }
    }
}

impl EbookConvert {
    pub fn new(binary: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }
}

#[async_trait]
impl Transcoder for EbookConvert {
    async fn transcode(&self, epub_path: &Path, mobi_path: &Path) -> Result<()> {
        debug!(
            "Transcoding {} -> {}",
            epub_path.display(),
            mobi_path.display()
        );

        let mut command = Command::new(&self.binary);
        command
            .arg(epub_path)
            .arg(mobi_path)
            .arg("--output-profile=kindle")
            .arg("--no-inline-toc")
            .arg("--mobi-file-type=both")
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = command.output();
        let output = match timeout(self.timeout, output).await {
            Ok(result) => result.map_err(|e| {
                Error::ExternalTool(format!(
                    "Failed to run {}: {} (is Calibre installed?)",
                    self.binary.display(),
                    e
                ))
            })?,
            Err(_) => {
                warn!(
                    "Transcode of {} exceeded {}s; killing",
                    epub_path.display(),
                    self.timeout.as_secs()
                );
                return Err(Error::ExternalTool(format!(
                    "ebook-convert timed out after {}s",
                    self.timeout.as_secs()
                )));
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::ExternalTool(format!(
                "ebook-convert exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        if !mobi_path.exists() {
            return Err(Error::ExternalTool(
                "ebook-convert reported success but produced no output".to_string(),
            ));
        }

        Ok(())
    }
}
