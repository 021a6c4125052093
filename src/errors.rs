// src/errors.rs
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RegionEditError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Empty canvas: {width}x{height}")]
    EmptyCanvas { width: u32, height: u32 },

    #[error("Invalid region {id}: {reason}")]
    InvalidRegion { id: String, reason: String },

    #[error("Image processing error: {0}")]
    ImageProcessing(String),

    #[error("Edit service error: {0}")]
    Service(String),

    #[error("Request timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl RegionEditError {
    /// User-initiated stops are reported separately from failures.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, RegionEditError::Cancelled)
    }

    /// Whether a remote call that produced this error may be attempted again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RegionEditError::Service(_) | RegionEditError::Timeout(_))
    }
}

impl From<image::ImageError> for RegionEditError {
    fn from(err: image::ImageError) -> Self {
        RegionEditError::ImageProcessing(err.to_string())
    }
}

impl From<serde_json::Error> for RegionEditError {
    fn from(err: serde_json::Error) -> Self {
        RegionEditError::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RegionEditError>;
