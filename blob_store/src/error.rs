//! Error types for sink construction and uploads.

use thiserror::Error;

/// Result type for sink operations.
pub type SinkResult<T> = Result<T, SinkError>;

#[derive(Debug, Error)]
pub enum SinkError {
    /// Required backend settings or credentials are missing or rejected.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Sink settings are present but out of range.
    #[error("invalid sink configuration: {0}")]
    InvalidConfig(String),

    /// The backend failed while the stream was being uploaded.
    #[error("transport error: {0}")]
    Transport(#[source] anyhow::Error),

    /// Reported by `await_completion` when the tracked upload failed.
    #[error("upload failed: {0}")]
    UploadFailed(String),
}

impl SinkError {
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            SinkError::Configuration(_) | SinkError::InvalidConfig(_)
        )
    }
}

impl From<object_store::Error> for SinkError {
    fn from(err: object_store::Error) -> Self {
        SinkError::Transport(anyhow::Error::from(err))
    }
}
