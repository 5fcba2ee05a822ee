//! Custom error types and result handling for Henkan operations.
//!
//! All fallible operations return a [`Result<T>`], a type alias for
//! `std::result::Result<T, Error>`. Page- and phase-level errors abort the
//! enclosing conversion job; the only designed recovery path is the external
//! transcode fallback handled in `generator`.

use crate::job::Phase;

/// Type alias for Results with Henkan errors.
pub type Result<T> = std::result::Result<T, Error>;

/// Comprehensive error type for all Henkan operations.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// I/O errors from the standard library
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// Regular expression parsing errors
    #[error(transparent)]
    Regex(#[from] regex::Error),
    /// Image decoding/encoding errors
    #[error(transparent)]
    Image(#[from] image::ImageError),
    /// EPUB generation errors
    #[error(transparent)]
    Epub(#[from] epub_builder::Error),
    /// ZIP archive operation errors
    #[error(transparent)]
    Zip(#[from] zip::result::ZipError),
    /// Async task join errors
    #[error(transparent)]
    Join(#[from] tokio::task::JoinError),
    #[error(transparent)]
    Semaphore(#[from] tokio::sync::AcquireError),
    #[error(transparent)]
    RequestBuilder(#[from] crate::types::ConversionRequestBuilderError),
    /// A referenced input, session, or job is absent
    #[error("Not found: {0}")]
    NotFound(String),
    /// Malformed request, rejected before any job starts
    #[error("Invalid request: {0}")]
    Validation(String),
    /// Decode/encode failure on a specific page, or an empty extraction;
    /// fatal to the enclosing job
    #[error("Processing failed for '{source_name}': {message}")]
    Processing {
        source_name: String,
        message: String,
    },
    /// External transcode tool failed, timed out, or is missing
    #[error("External tool failure: {0}")]
    ExternalTool(String),
    /// The job's cancel token was triggered
    #[error("Conversion cancelled")]
    Cancelled,
    /// An illegal job phase transition was attempted
    #[error("Invalid phase transition: {0} -> {1}")]
    PhaseTransition(Phase, Phase),
    /// Unsupported operation or format (e.g. unknown image extension)
    #[error("Unsupported: {0}")]
    Unsupported(String),
    /// Error for failed asynchronous tasks
    #[error("Asynchronous task failed: {0}")]
    AsyncTaskError(String),
    /// Other errors that don't fit into specific categories
    #[error("Other error: {0}")]
    Other(String),
}

// Basic From<String> conversion for convenience
impl From<String> for Error {
    fn from(error: String) -> Self {
        Error::Other(error)
    }
}

impl From<&str> for Error {
    fn from(error: &str) -> Self {
        Error::Other(error.to_string())
    }
}

impl serde::Serialize for Error {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.to_string().as_ref())
    }
}
