//! Error types for ocular-eye

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EyeError {
    #[error("Decode error: frame {index}: {reason}")]
    Decode { index: usize, reason: String },

    #[error("Model error: {0}")]
    Model(String),

    #[error("Inference error: {0}")]
    Inference(String),

    #[error("Batch mismatch: engine returned {actual} results for {expected} frames")]
    BatchMismatch { expected: usize, actual: usize },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("ONNX Runtime error: {0}")]
    Ort(String),

    #[error("Worker error: {0}")]
    Join(String),
}

impl EyeError {
    /// Errors that break the one-result-per-frame contract and must end the
    /// connection instead of being reported as a failed batch.
    pub fn is_fatal(&self) -> bool {
        matches!(self, EyeError::BatchMismatch { .. })
    }
}

impl From<tokio::task::JoinError> for EyeError {
    fn from(err: tokio::task::JoinError) -> Self {
        EyeError::Join(err.to_string())
    }
}
