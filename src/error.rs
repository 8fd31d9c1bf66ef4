//! Centralized error types for emlx2mbox.

use std::path::PathBuf;
use thiserror::Error;

/// All errors produced by the emlx2mbox library.
#[derive(Error, Debug)]
pub enum ConvertError {
    /// The source directory does not exist.
    #[error("Source folder not found: {0}")]
    SourceNotFound(PathBuf),

    /// Another writer already holds the archive.
    #[error("Archive is locked by another writer: {0}")]
    LockUnavailable(PathBuf),

    /// A source message file could not be read.
    #[error("Cannot read message file '{path}': {source}")]
    ContainerRead {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A source message could not be parsed.
    #[error("Cannot parse message '{path}': {reason}")]
    Parse { path: PathBuf, reason: String },

    /// Appending an entry to the archive failed.
    #[error("Cannot append to archive '{path}': {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    /// I/O error with the associated file path.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// An invalid path was provided.
    #[error("Invalid path: {0}")]
    InvalidPath(String),
}

/// Convenience alias for `Result<T, ConvertError>`.
pub type Result<T> = std::result::Result<T, ConvertError>;

impl ConvertError {
    /// Create an `Io` variant from a path and an `io::Error`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a `ContainerRead` variant from a path and an `io::Error`.
    pub fn read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::ContainerRead {
            path: path.into(),
            source,
        }
    }

    /// Create a `Parse` variant from a path and a reason.
    pub fn parse(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Parse {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Whether this error aborts the whole run.
    ///
    /// Per-file kinds (`ContainerRead`, `Parse`, `Write`) only count
    /// the file as failed; everything else stops the conversion.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Self::ContainerRead { .. } | Self::Parse { .. } | Self::Write { .. }
        )
    }
}
