use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image unreadable: {0}")]
    Decode(String),

    #[error("Raster surface unavailable for {0}x{1}")]
    Surface(u32, u32),

    #[error("Image encoding failed: {0}")]
    Encode(String),

    #[error("Video compression is not supported: {0}")]
    Unsupported(String),

    #[error("Video transcoding failed: {0}")]
    Transcode(String),

    #[error("Upload failed with status {status}")]
    Http { status: u16 },

    #[error("Network error during upload: {0}")]
    Network(String),

    #[error("Upload cancelled")]
    Abort,

    #[error("Invalid quality value: {0}. Must be greater than 0 and at most 1")]
    InvalidQuality(f32),

    #[error("Invalid CRF value: {0}. Must be between 0 and 51")]
    InvalidCrf(u8),

    #[error("Invalid {0}: must be greater than 0")]
    InvalidDimension(&'static str),

    #[error("Invalid virtual file name: {0}")]
    InvalidFileName(String),

    #[error("File not found: {}", .0.display())]
    FileNotFound(PathBuf),
}

impl IngestError {
    /// True for failures the caller may reasonably retry (transport-level
    /// problems and server-side rejections).
    pub fn is_retryable(&self) -> bool {
        match self {
            IngestError::Network(_) => true,
            IngestError::Http { status } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, IngestError>;
