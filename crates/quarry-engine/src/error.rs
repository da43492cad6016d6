//! Engine error types.

use quarry_core::{BackendError, ConfigError};
use thiserror::Error;

/// Errors raised by page operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Widget wiring failed.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The backend failed a request.
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// No widget with this id is registered.
    #[error("Unknown {kind} '{id}'")]
    UnknownWidget { kind: &'static str, id: String },

    /// A download is already polling.
    #[error("Download '{0}' is already running")]
    DownloadInProgress(String),

    /// The download's source has no request to run.
    #[error("Download '{0}' has nothing to download")]
    NothingToDownload(String),

    /// A download chunk arrived incomplete without a scroll id to continue from.
    #[error("Download '{0}' stopped before completion")]
    DownloadStalled(String),
}

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;
