//! File and directory handles.
//!
//! A handle is a cheap clone of an `Arc` owned by the entry cache. Every
//! lookup of the same normalized path yields the same record, so a handle
//! held across a rename sees the new path:
//!
//! ```ignore
//! let a = fs.file_for_path("/src/main.rs")?;
//! a.rename("/src/lib.rs", |r| r.unwrap()).await;
//! let b = fs.file_for_path("/src/lib.rs")?;
//! assert!(a == b);
//! assert_eq!(a.full_path(), "/src/lib.rs");
//! ```
//!
//! Read-only operations are plain `async fn`s. Mutating operations take a
//! completion callback and resolve only after it has run and any change
//! events the operation caused have been delivered; the callback is always
//! observed first.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};

use crate::backend::{EntryKind, Stats};
use crate::error::{FsError, Result};
use crate::filesystem::Shared;
use crate::path;

/// Shared record behind a handle. Owned by the cache.
pub(crate) struct EntryInner {
    kind: EntryKind,
    path: RwLock<String>,
    /// Freshest known stats, from any source.
    stats: Mutex<Option<Stats>>,
    /// Bumped on every stats update.
    version: AtomicU64,
    /// Stats of the version this client last read or wrote (files only).
    synced: Mutex<Option<Stats>>,
    /// Cached listing (directories under an active watch only).
    contents: Mutex<Option<Vec<Entry>>>,
    fs: Weak<Shared>,
}

impl EntryInner {
    pub(crate) fn new(path: String, kind: EntryKind, fs: Weak<Shared>) -> Self {
        Self {
            kind,
            path: RwLock::new(path),
            stats: Mutex::new(None),
            version: AtomicU64::new(0),
            synced: Mutex::new(None),
            contents: Mutex::new(None),
            fs,
        }
    }

    pub(crate) fn kind(&self) -> EntryKind {
        self.kind
    }

    pub(crate) fn path(&self) -> String {
        self.path.read().clone()
    }

    /// Relabel in place. Only the cache calls this, under its own lock.
    pub(crate) fn set_path(&self, path: String) {
        *self.path.write() = path;
    }

    pub(crate) fn stats(&self) -> Option<Stats> {
        self.stats.lock().clone()
    }

    pub(crate) fn set_stats(&self, stats: Option<Stats>) {
        *self.stats.lock() = stats;
        self.version.fetch_add(1, Ordering::AcqRel);
    }

    /// Stats version; changes whenever the stats are replaced.
    pub(crate) fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    pub(crate) fn synced(&self) -> Option<Stats> {
        self.synced.lock().clone()
    }

    /// Record a version read or written by this client.
    pub(crate) fn set_synced(&self, stats: Stats) {
        *self.synced.lock() = Some(stats.clone());
        self.set_stats(Some(stats));
    }

    pub(crate) fn contents(&self) -> Option<Vec<Entry>> {
        self.contents.lock().clone()
    }

    pub(crate) fn set_contents(&self, contents: Vec<Entry>) {
        *self.contents.lock() = Some(contents);
    }

    pub(crate) fn clear_contents(&self) {
        *self.contents.lock() = None;
    }

    fn fs(&self) -> Result<Arc<Shared>> {
        self.fs.upgrade().ok_or(FsError::Closed)
    }
}

/// Options for [`File::write`].
#[derive(Debug, Clone, Default)]
pub struct WriteOptions {
    /// Skip the conflict check and overwrite unconditionally.
    pub blind: bool,
    /// Version the caller believes is on the backend. Defaults to the version
    /// this client last read or wrote.
    pub expected: Option<Stats>,
}

impl WriteOptions {
    /// Overwrite without checking for concurrent modification.
    pub fn blind() -> Self {
        Self {
            blind: true,
            expected: None,
        }
    }
}

/// Handle to a file.
#[derive(Clone)]
pub struct File(pub(crate) Arc<EntryInner>);

/// Handle to a directory.
#[derive(Clone)]
pub struct Directory(pub(crate) Arc<EntryInner>);

/// Handle to either kind of entry.
#[derive(Clone, PartialEq)]
pub enum Entry {
    File(File),
    Directory(Directory),
}

macro_rules! common_entry_methods {
    ($ty:ty) => {
        impl $ty {
            /// Current normalized path. Changes if this entry or an ancestor
            /// is renamed.
            pub fn full_path(&self) -> String {
                self.0.path()
            }

            /// Last path segment.
            pub fn name(&self) -> String {
                path::file_name(&self.0.path()).to_string()
            }

            /// Normalized path of the containing directory; `None` at the root.
            pub fn parent_path(&self) -> Option<String> {
                path::parent_path(&self.0.path()).map(str::to_string)
            }

            /// Most recent stats seen for this entry, without I/O.
            pub fn cached_stats(&self) -> Option<Stats> {
                self.0.stats()
            }

            /// Fetch stats from the backend.
            pub async fn stat(&self) -> Result<Stats> {
                self.0.fs()?.stat(&self.0).await
            }

            /// True if the backend has something at this path.
            pub async fn exists(&self) -> Result<bool> {
                match self.stat().await {
                    Ok(_) => Ok(true),
                    Err(FsError::NotFound(_)) => Ok(false),
                    Err(e) => Err(e),
                }
            }

            /// Rename to `new_path` (normalized as this entry's kind).
            ///
            /// Fails with `NotFound` if this entry doesn't exist and
            /// `AlreadyExists` if the destination does.
            pub async fn rename(
                &self,
                new_path: &str,
                callback: impl FnOnce(Result<()>) + Send,
            ) {
                match self.0.fs() {
                    Ok(fs) => fs.rename(&self.0, new_path, callback).await,
                    Err(e) => callback(Err(e)),
                }
            }

            /// Remove from the backend (directories recursively).
            pub async fn unlink(&self, callback: impl FnOnce(Result<()>) + Send) {
                match self.0.fs() {
                    Ok(fs) => fs.unlink(&self.0, callback).await,
                    Err(e) => callback(Err(e)),
                }
            }

            /// Wrap as an [`Entry`].
            pub fn to_entry(&self) -> Entry {
                Entry::from(self.clone())
            }
        }

        impl PartialEq for $ty {
            fn eq(&self, other: &Self) -> bool {
                Arc::ptr_eq(&self.0, &other.0)
            }
        }

        impl Eq for $ty {}

        impl fmt::Debug for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_tuple(stringify!($ty)).field(&self.0.path()).finish()
            }
        }
    };
}

common_entry_methods!(File);
common_entry_methods!(Directory);

impl File {
    /// Read the whole file.
    pub async fn read(&self) -> Result<(Vec<u8>, Stats)> {
        self.0.fs()?.read(&self.0).await
    }

    /// Read the whole file as UTF-8 text.
    pub async fn read_as_text(&self) -> Result<String> {
        let (data, _) = self.read().await?;
        String::from_utf8(data).map_err(|_| FsError::UnsupportedEncoding(self.full_path()))
    }

    /// Replace the file contents, creating the file if needed.
    ///
    /// Unless `options.blind`, fails with `ContentsModified` when the file
    /// changed on the backend since this client last read or wrote it.
    pub async fn write(
        &self,
        data: impl Into<Vec<u8>>,
        options: WriteOptions,
        callback: impl FnOnce(Result<Stats>) + Send,
    ) {
        match self.0.fs() {
            Ok(fs) => fs.write(&self.0, data.into(), options, callback).await,
            Err(e) => callback(Err(e)),
        }
    }
}

impl Directory {
    /// List children, in backend order.
    ///
    /// Under a watched root, children rejected by the watch filter are left
    /// out and the listing is cached until a change notification arrives.
    pub async fn get_contents(&self) -> Result<Vec<Entry>> {
        self.0.fs()?.get_contents(&self.0).await
    }

    /// Create this directory on the backend.
    pub async fn create(&self, callback: impl FnOnce(Result<Stats>) + Send) {
        match self.0.fs() {
            Ok(fs) => fs.mkdir(&self.0, callback).await,
            Err(e) => callback(Err(e)),
        }
    }
}

impl Entry {
    pub(crate) fn from_inner(inner: Arc<EntryInner>) -> Self {
        match inner.kind() {
            EntryKind::File => Entry::File(File(inner)),
            EntryKind::Directory => Entry::Directory(Directory(inner)),
        }
    }

    pub(crate) fn inner(&self) -> &Arc<EntryInner> {
        match self {
            Entry::File(f) => &f.0,
            Entry::Directory(d) => &d.0,
        }
    }

    pub fn kind(&self) -> EntryKind {
        self.inner().kind()
    }

    pub fn is_file(&self) -> bool {
        self.kind() == EntryKind::File
    }

    pub fn is_directory(&self) -> bool {
        self.kind() == EntryKind::Directory
    }

    pub fn full_path(&self) -> String {
        self.inner().path()
    }

    pub fn name(&self) -> String {
        path::file_name(&self.inner().path()).to_string()
    }

    pub fn cached_stats(&self) -> Option<Stats> {
        self.inner().stats()
    }

    pub fn as_file(&self) -> Option<&File> {
        match self {
            Entry::File(f) => Some(f),
            Entry::Directory(_) => None,
        }
    }

    pub fn as_directory(&self) -> Option<&Directory> {
        match self {
            Entry::Directory(d) => Some(d),
            Entry::File(_) => None,
        }
    }

    pub async fn stat(&self) -> Result<Stats> {
        match self {
            Entry::File(f) => f.stat().await,
            Entry::Directory(d) => d.stat().await,
        }
    }

    pub async fn exists(&self) -> Result<bool> {
        match self {
            Entry::File(f) => f.exists().await,
            Entry::Directory(d) => d.exists().await,
        }
    }

    pub async fn rename(&self, new_path: &str, callback: impl FnOnce(Result<()>) + Send) {
        match self {
            Entry::File(f) => f.rename(new_path, callback).await,
            Entry::Directory(d) => d.rename(new_path, callback).await,
        }
    }

    pub async fn unlink(&self, callback: impl FnOnce(Result<()>) + Send) {
        match self {
            Entry::File(f) => f.unlink(callback).await,
            Entry::Directory(d) => d.unlink(callback).await,
        }
    }
}

impl From<File> for Entry {
    fn from(file: File) -> Self {
        Entry::File(file)
    }
}

impl From<Directory> for Entry {
    fn from(dir: Directory) -> Self {
        Entry::Directory(dir)
    }
}

impl fmt::Debug for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Entry::File(file) => file.fmt(f),
            Entry::Directory(dir) => dir.fmt(f),
        }
    }
}
