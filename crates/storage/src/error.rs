//! Storage Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};
use std::io::Error as IoError;
use std::path::{Path, PathBuf};

/// A storage error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for storage operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
/// Missing articles, versions and pointers on the read path are not errors at
/// all; they come back as `Ok(None)`.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// File or directory does not exist
    #[display("file not found: {}", _0.display())]
    NotFound(#[error(not(source))] PathBuf),
    /// Access denied by the filesystem
    #[display("permission denied: {}", _0.display())]
    PermissionDenied(#[error(not(source))] PathBuf),
    /// File already exists (for operations that require new files)
    #[display("file already exists: {}", _0.display())]
    AlreadyExists(#[error(not(source))] PathBuf),
    /// Path is not usable as given, e.g. a relative storage root
    #[display("invalid path: {}", _0.display())]
    InvalidPath(#[error(not(source))] PathBuf),
    /// Underlying I/O error
    #[display("I/O error: {_0}")]
    Io(IoError),
    /// Journal or article identifier is empty or not a single path segment
    #[display("invalid identifier: {_0:?}")]
    InvalidIdentifier(#[error(not(source))] String),
    /// String is not a `v<N>` version label
    #[display("invalid version label: {_0:?}")]
    InvalidVersion(#[error(not(source))] String),
    /// String is not an `<algorithm>:<hex>` checksum
    #[display("invalid checksum: {_0:?}")]
    InvalidChecksum(#[error(not(source))] String),
    /// Metadata or ledger could not be encoded/decoded
    #[display("serialization error")]
    Serialization,
    /// The directory for a freshly allocated version already exists. Only
    /// possible when writers bypass the article lock.
    #[display("version collision: {_0}")]
    VersionCollision(#[error(not(source))] String),
    /// Article lock could not be acquired
    #[display("could not acquire article lock")]
    Lock,
}
impl From<IoError> for ErrorKind {
    fn from(err: IoError) -> Self {
        Self::Io(err)
    }
}

impl ErrorKind {
    /// Classify an I/O error against the path it happened on.
    pub(crate) fn io(e: IoError, path: &Path) -> Self {
        match e.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound(path.to_path_buf()),
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied(path.to_path_buf()),
            std::io::ErrorKind::AlreadyExists => Self::AlreadyExists(path.to_path_buf()),
            _ => Self::Io(e),
        }
    }

    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Lock)
    }

    /// Returns `true` for invariant violations that should never happen while
    /// the locking discipline is honoured. Callers should escalate these
    /// instead of showing "try again".
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::VersionCollision(_))
    }
}
