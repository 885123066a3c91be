use miette::Diagnostic;
use thiserror::Error;

/// Every payload is a `String` so a failure can be cloned onto the dataset
/// that owns it.
#[derive(Debug, Clone, PartialEq, Eq, Error, Diagnostic)]
pub enum QlError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("metadata request failed: {0}")]
    MetadataFetchFailed(String),

    #[error("metadata service returned status {status}: {message}")]
    MetadataStatus { status: u16, message: String },

    #[error("failed to parse VOTable: {0}")]
    MetadataParseFailed(String),

    #[error("image request failed: {0}")]
    ImageFetchFailed(String),

    #[error("file server returned status {status}: {message}")]
    ImageStatus { status: u16, message: String },

    #[error("image size mismatch: expected {expected} bytes, received {received}")]
    ImageSizeMismatch { expected: u64, received: u64 },

    #[error("unsupported BITPIX {0}, only -32 is supported")]
    UnsupportedImageFormat(i64),

    #[error("failed to decode image: {0}")]
    ImageDecodeFailed(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(String),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("dataset not registered: {0}")]
    Unknown(String),
}

impl QlError {
    pub fn is_network(&self) -> bool {
        matches!(
            self,
            QlError::MetadataFetchFailed(_)
                | QlError::MetadataStatus { .. }
                | QlError::ImageFetchFailed(_)
                | QlError::ImageStatus { .. }
        )
    }
}
