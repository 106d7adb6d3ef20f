//! Error types for pipegen-artifacts

use std::path::PathBuf;

use pipegen_core::ExecError;
use thiserror::Error;

/// Errors from a [`crate::store::BlobStore`] backend.
#[derive(Error, Debug)]
pub enum StorageError {
    /// No object stored under the key
    #[error("no bundle stored under key: {key}")]
    NotFound { key: String },

    /// Key component would break the `<pipeline>/<stage>/<job>` layout
    #[error("invalid bundle key component `{component}`: {reason}")]
    InvalidKey { component: String, reason: String },

    /// Object-storage CLI failed
    #[error("object storage command failed: {0}")]
    Exec(#[from] ExecError),

    /// Backend returned output we could not interpret
    #[error("unexpected backend response: {0}")]
    Backend(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors from the download/upload staging protocol.
#[derive(Error, Debug)]
pub enum StagingError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Archive entry outside the internal prefix or escaping the workspace
    #[error("refusing unsafe archive entry: {path}")]
    UnsafeEntry { path: String },

    /// Timestamp marker was never recorded before the build ran
    #[error("timestamp marker not found: {0}")]
    MarkerMissing(PathBuf),

    /// Named artifact path does not exist
    #[error("artifact path not found: {0}")]
    ArtifactMissing(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("walk error: {0}")]
    Walk(#[from] walkdir::Error),
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;
pub type StagingResult<T> = std::result::Result<T, StagingError>;
