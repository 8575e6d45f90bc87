//! Error types shared by the archive services.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by archive, catalog, ingestion and export operations.
///
/// Integrity mismatches are not errors: the verifier reports them as a
/// [`VerifyStatus`](crate::core::VerifyStatus).
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Corrupt data in {path}: {reason}")]
    DataCorruption { path: PathBuf, reason: String },

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Package failed validation: {0}")]
    PackageInvalid(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Catalog error: {0}")]
    Catalog(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl ArchiveError {
    pub(crate) fn corrupt(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::DataCorruption {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

impl From<walkdir::Error> for ArchiveError {
    fn from(err: walkdir::Error) -> Self {
        Self::Io(err.into())
    }
}

/// Result alias used throughout the library.
pub type Result<T, E = ArchiveError> = std::result::Result<T, E>;
