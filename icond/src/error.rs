//! Error taxonomy shared by the generation pipeline and the download paths

use thiserror::Error;

/// Errors surfaced by icon generation, derivation, encoding and bundling
#[derive(Debug, Error)]
pub enum IconError {
    /// Bad step count, format, prompt or size label. Nothing has been mutated.
    #[error("{0}")]
    InvalidParameter(String),

    /// The accelerator ran out of memory during synthesis. Retryable.
    #[error("insufficient accelerator memory: {0}")]
    ResourceExhaustion(String),

    #[error("generation not found or expired")]
    NotFound,

    #[error("encoding error: {0}")]
    Encoding(String),

    #[error("bundle too large: {size_mb:.2}MB (max: {max_mb}MB)")]
    BundleTooLarge { size_mb: f64, max_mb: f64 },

    /// The synthesis ceiling is reached and the queue policy rejects
    #[error("a generation is already in progress, try again shortly")]
    Busy,

    #[error("synthesis failed: {0}")]
    Synthesis(String),

    /// Backend not configured, unreachable, or the engine failed to load
    #[error("synthesis backend unavailable: {0}")]
    Unavailable(String),

    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<image::ImageError> for IconError {
    fn from(e: image::ImageError) -> Self {
        IconError::Encoding(e.to_string())
    }
}

impl IconError {
    /// Whether the caller may retry the same request later
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            IconError::ResourceExhaustion(_) | IconError::Busy | IconError::Unavailable(_)
        )
    }
}
