use std::path::PathBuf;

use thiserror::Error;

pub type ConvertResult<T> = Result<T, ConvertError>;

/// Failures inside the conversion pipeline. The orchestrator converts every
/// variant into terminal job state; none of these cross the HTTP boundary
/// as a panic or an unhandled error.
#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("yt-dlp not found in PATH")]
    YtDlpNotFound,

    #[error("metadata extraction failed: {0}")]
    Extraction(String),

    #[error("download failed: {0}")]
    Download(String),

    #[error("no matching audio file found in {}", .0.display())]
    Resolution(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ConvertError {
    pub fn extraction(message: impl Into<String>) -> Self {
        Self::Extraction(message.into())
    }

    pub fn download(message: impl Into<String>) -> Self {
        Self::Download(message.into())
    }
}
