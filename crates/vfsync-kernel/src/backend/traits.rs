//! Backend capability contract.

use async_trait::async_trait;
use std::io;
use std::time::SystemTime;
use tokio::sync::mpsc;

/// Kind of entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    File,
    Directory,
}

/// Metadata reported by a backend for a file or directory.
///
/// Two stats describe the same version of an entry when kind, size and mtime
/// all agree; write-conflict detection compares them with `==`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stats {
    /// Kind of entry.
    pub kind: EntryKind,
    /// Size in bytes (0 for directories).
    pub size: u64,
    /// Last modification time, if available.
    pub modified: Option<SystemTime>,
}

impl Stats {
    /// Stats for a file of `size` bytes.
    pub fn file(size: u64, modified: Option<SystemTime>) -> Self {
        Self {
            kind: EntryKind::File,
            size,
            modified,
        }
    }

    /// Stats for a directory.
    pub fn directory(modified: Option<SystemTime>) -> Self {
        Self {
            kind: EntryKind::Directory,
            size: 0,
            modified,
        }
    }

    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File
    }

    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }
}

/// A directory listing entry: child name (no separators) plus its stats.
#[derive(Debug, Clone)]
pub struct DirEntry {
    pub name: String,
    pub stats: Stats,
}

/// Notification emitted by a backend watcher.
///
/// Paths are absolute. A directory path may or may not carry a trailing
/// separator; when `stats` is present its kind wins.
#[derive(Debug, Clone, PartialEq)]
pub enum WatchEvent {
    /// Something at `path` changed (contents, existence or children).
    Changed { path: String, stats: Option<Stats> },
    /// Unknown or bulk change; every cached listing is suspect.
    Rescan,
}

impl WatchEvent {
    /// Change notification for `path` without stats.
    pub fn changed(path: impl Into<String>) -> Self {
        WatchEvent::Changed {
            path: path.into(),
            stats: None,
        }
    }
}

/// Sending half of the watch channel handed to [`Backend::init_watchers`].
pub type WatchSink = mpsc::UnboundedSender<WatchEvent>;

/// Asynchronous storage backend.
///
/// Paths are normalized absolute strings as produced by
/// [`crate::path::normalize`]; directory paths end in `/`. Backends report
/// failures as `io::Error` and the filesystem maps the `ErrorKind`.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Get metadata for a file or directory.
    async fn stat(&self, path: &str) -> io::Result<Stats>;

    /// Read the entire contents of a file, with the stats they were read at.
    async fn read_file(&self, path: &str) -> io::Result<(Vec<u8>, Stats)>;

    /// Write data to a file, creating it if it doesn't exist.
    async fn write_file(&self, path: &str, data: &[u8]) -> io::Result<Stats>;

    /// Rename (move) a file or directory.
    async fn rename(&self, from: &str, to: &str) -> io::Result<()>;

    /// List the children of a directory, in backend order.
    async fn read_dir(&self, path: &str) -> io::Result<Vec<DirEntry>>;

    /// Create a directory.
    async fn mkdir(&self, path: &str) -> io::Result<Stats> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            format!("mkdir not supported by this backend: {path}"),
        ))
    }

    /// Remove a file or directory (recursively).
    async fn unlink(&self, path: &str) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            format!("unlink not supported by this backend: {path}"),
        ))
    }

    /// Start delivering change notifications into `sink`.
    ///
    /// Called once when the filesystem is created. Backends without a watch
    /// facility keep the default, and the filesystem runs without external
    /// change events.
    async fn init_watchers(&self, sink: WatchSink) -> io::Result<()> {
        let _ = sink;
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "watching not supported by this backend",
        ))
    }

    /// Arm the watcher for the subtree rooted at `path`.
    async fn watch_path(&self, path: &str) -> io::Result<()> {
        let _ = path;
        Ok(())
    }

    /// Disarm the watcher for `path`.
    async fn unwatch_path(&self, path: &str) -> io::Result<()> {
        let _ = path;
        Ok(())
    }
}
