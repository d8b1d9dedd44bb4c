//! Error taxonomy for filesystem operations.
//!
//! Backends speak `io::Error`; the filesystem layer folds those into
//! [`FsError`] so callers can branch on kind (e.g. `NotFound` vs
//! `AlreadyExists` after a rename) without parsing messages.

use std::io;

use thiserror::Error;

/// Result alias used across the kernel.
pub type Result<T> = std::result::Result<T, FsError>;

/// Errors surfaced by lookups and entry operations.
#[derive(Debug, Error)]
pub enum FsError {
    /// The path could not be normalized (escapes root, relative, empty).
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// The target does not exist on the backend.
    #[error("not found: {0}")]
    NotFound(String),

    /// The destination already resolves to an existing entry.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// The backend does not implement this operation.
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    /// The file changed on the backend since it was last read.
    #[error("contents modified since last read: {0}")]
    ContentsModified(String),

    /// A file operation hit a directory on the backend.
    #[error("not a file: {0}")]
    NotAFile(String),

    /// A directory operation hit a file on the backend.
    #[error("not a directory: {0}")]
    NotADirectory(String),

    /// File contents are not valid UTF-8.
    #[error("unsupported encoding: {0}")]
    UnsupportedEncoding(String),

    /// `watch` was called for a root that is already armed.
    #[error("already watched: {0}")]
    AlreadyWatched(String),

    /// `unwatch` was called for a root that is not armed.
    #[error("not watched: {0}")]
    NotWatched(String),

    /// The owning filesystem has been dropped or closed.
    #[error("filesystem closed")]
    Closed,

    /// Backend-specific failure, passed through.
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
}

impl FsError {
    /// Map a backend error for `path` onto the taxonomy.
    pub fn from_io(path: &str, err: io::Error) -> Self {
        let path = path.to_string();
        match err.kind() {
            io::ErrorKind::NotFound => FsError::NotFound(path),
            io::ErrorKind::AlreadyExists => FsError::AlreadyExists(path),
            io::ErrorKind::Unsupported => FsError::Unsupported(path),
            io::ErrorKind::InvalidInput => FsError::InvalidPath(path),
            io::ErrorKind::IsADirectory => FsError::NotAFile(path),
            io::ErrorKind::NotADirectory => FsError::NotADirectory(path),
            _ => FsError::Io { path, source: err },
        }
    }

    /// True for `NotFound`.
    pub fn is_not_found(&self) -> bool {
        matches!(self, FsError::NotFound(_))
    }

    /// True for `AlreadyExists`.
    pub fn is_already_exists(&self) -> bool {
        matches!(self, FsError::AlreadyExists(_))
    }
}
