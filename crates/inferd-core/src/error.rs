//! Error taxonomy for the server core.
//!
//! Low-level failures (downloads, engine loads, function execution) are
//! captured as values and never propagate past their subsystem boundary;
//! only the HTTP adapter maps these to status codes.

use thiserror::Error;

/// Canonical error type for semantic domain errors.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Malformed input, missing required field, schema mismatch.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Unknown engine/agent/workflow/job id.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Duplicate id on create.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Model path missing, unreadable, wrong format, or runtime load failure.
    #[error("Model loading error: {0}")]
    ModelLoading(String),

    /// Network/HTTP failure while acquiring a model.
    #[error(transparent)]
    Download(#[from] DownloadError),

    /// A function raised or returned `success = false`.
    #[error("Execution error: {0}")]
    Execution(String),

    /// Workflow-level timeout.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Cooperative cancellation.
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// Unexpected condition.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<EngineError> for CoreError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::NotFound(id) => Self::NotFound(format!("engine {id}")),
            other => Self::ModelLoading(other.to_string()),
        }
    }
}

/// Errors raised by the download subsystem.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("Download already in progress: {0}")]
    AlreadyActive(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Download cancelled")]
    Cancelled,

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

impl From<std::io::Error> for DownloadError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Errors raised by engine loading and inference.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Engine not found: {0}")]
    NotFound(String),

    #[error("Model load failed: {0}")]
    LoadFailed(String),

    #[error("Inference failed: {0}")]
    Inference(String),

    #[error("Invalid model path: {0}")]
    InvalidModelPath(String),
}
