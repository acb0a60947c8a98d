//! Cache Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.
//!
//! Only the synchronous serve-or-generate path surfaces errors. Eviction is
//! best-effort and never returns one.

use derive_more::{Display, Error};
use shelf_models::FileType;
use std::path::PathBuf;

/// A cache error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for cache operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// No generator can turn this source type into the requested format.
    /// This is a caller error (HTTP 4xx), not a server fault.
    #[display("cannot produce {format} from {file_type} files")]
    Unsupported { file_type: FileType, format: String },
    /// A format generator failed; the cache was left untouched.
    #[display("artifact generation failed")]
    Generate,
    /// Generation was cancelled by the caller.
    #[display("generation cancelled")]
    Cancelled,
    /// Filesystem operation on a cache path failed.
    #[display("I/O error: {}", _0.display())]
    Io(#[error(not(source))] PathBuf),
    /// No metadata exists for the requested cache entry.
    #[display("cache entry not found: {}", _0.display())]
    NotFound(#[error(not(source))] PathBuf),
    /// A sidecar exists but could not be understood.
    #[display("invalid cache metadata: {}", _0.display())]
    InvalidData(#[error(not(source))] PathBuf),
    /// A plugin format identifier is not safe to use in a file name.
    #[display("invalid format identifier: {_0:?}")]
    InvalidFormat(#[error(not(source))] String),
    /// The cache directory is relative or not a directory.
    #[display("invalid cache directory: {}", _0.display())]
    InvalidDirectory(#[error(not(source))] PathBuf),
    /// The fingerprint could not be serialized for hashing.
    #[display("fingerprint serialization failed")]
    Serialization,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Generate)
    }
}
