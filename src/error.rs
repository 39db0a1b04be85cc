//! Error taxonomy for the image build pipeline.
//!
//! Source and transform resolution errors abort a call before any job is issued.
//! Everything raised inside a worker is reported back as a fatal job result, which
//! the dispatcher surfaces as [`PipelineError::BuildCancelled`].

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Invalid source: {0}")]
    InvalidSource(String),

    #[error("Transform not found: {0}")]
    TransformNotFound(String),

    #[error("Invalid transform: {0}")]
    InvalidTransform(String),

    #[error("Unsupported extension: {0}")]
    UnsupportedExtension(String),

    #[error("Invalid output path: {0}")]
    InvalidOutputPath(String),

    #[error("Invalid option: {0}")]
    InvalidOption(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// One or more jobs in the batch failed. Which job failed is only logged.
    #[error("Build cancelled.")]
    BuildCancelled,

    #[error("Image codec error: {0}")]
    Codec(#[from] image::ImageError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PipelineError {
    pub(crate) fn invalid_option(message: impl Into<String>) -> Self {
        Self::InvalidOption(message.into())
    }
}
