//! The filesystem: entry lookup, operations, watches and change events.
//!
//! One `FileSystem` is bound to one backend for its whole life. It owns the
//! entry cache, the pending-operation table and the watch state; nothing is
//! global, so several instances can run side by side in one process.
//!
//! # Change events
//!
//! Backend watchers push [`WatchEvent`]s into a channel drained by a pump
//! task. Each notification is normalized, checked against the watched roots,
//! and then offered to the [`ChangeReconciler`]: if a mutating operation on
//! the same path is in flight it waits, otherwise it is delivered to
//! listeners at once. Mutating operations hold a change guard from just
//! before the backend call until just after their callback returns.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::backend::{Backend, EntryKind, Stats, WatchEvent};
use crate::cache::EntryCache;
use crate::config::FsConfig;
use crate::entry::{Directory, Entry, EntryInner, File, WriteOptions};
use crate::error::{FsError, Result};
use crate::path;
use crate::reconcile::ChangeReconciler;

/// Event delivered to change listeners.
#[derive(Debug, Clone)]
pub enum ChangeEvent {
    /// Something at `entry` changed. `stats` is what the watcher reported,
    /// `None` when it reported none (e.g. the entry was removed).
    Changed { entry: Entry, stats: Option<Stats> },
    /// Unknown or bulk change; re-read whatever you care about.
    Rescan,
}

/// Filter applied below a watched root: `(name, parent_path) -> keep`.
pub type WatchFilter = Arc<dyn Fn(&str, &str) -> bool + Send + Sync>;

/// Token returned by [`FileSystem::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Arc<dyn Fn(&ChangeEvent) + Send + Sync>;

/// A normalized watcher notification waiting for delivery.
#[derive(Clone)]
pub(crate) struct Notification {
    path: String,
    stats: Option<Stats>,
    /// Record cached at `path` when the notification arrived, with its stats
    /// version at that moment.
    baseline: Option<(Arc<EntryInner>, u64)>,
}

struct WatchedRoot {
    filter: Option<WatchFilter>,
}

/// Result of checking a path against the watched roots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WatchStatus {
    Unwatched,
    Watched,
    Filtered,
}

/// State shared between the `FileSystem`, its entries and the pump task.
pub(crate) struct Shared {
    backend: Arc<dyn Backend>,
    config: FsConfig,
    self_ref: Weak<Shared>,
    cache: Mutex<EntryCache>,
    reconciler: Mutex<ChangeReconciler<Notification>>,
    listeners: Mutex<Vec<(ListenerId, Listener)>>,
    next_listener: AtomicU64,
    watched: Mutex<BTreeMap<String, WatchedRoot>>,
    /// Backend accepted `init_watchers`.
    watching: AtomicBool,
}

/// Registration of in-flight mutating operations on a set of paths.
///
/// Each target's parent directory is registered as well: backends report an
/// entry appearing, disappearing or moving as a change to its parent.
///
/// Dropping the guard ends the operations and delivers whatever
/// notifications were held back, so a future dropped mid-operation cannot
/// leave a path gated forever.
struct ChangeGuard {
    shared: Arc<Shared>,
    paths: Vec<String>,
}

impl ChangeGuard {
    fn begin(shared: &Arc<Shared>, targets: &[&str]) -> Self {
        let mut paths: Vec<String> = Vec::with_capacity(targets.len() * 2);
        for target in targets {
            paths.push(target.to_string());
            if let Some(parent) = path::parent_path(target) {
                paths.push(parent.to_string());
            }
        }
        paths.sort_unstable();
        paths.dedup();
        let mut reconciler = shared.reconciler.lock();
        for path in &paths {
            reconciler.begin(path);
        }
        drop(reconciler);
        Self {
            shared: shared.clone(),
            paths,
        }
    }
}

impl Drop for ChangeGuard {
    fn drop(&mut self) {
        let flushed: Vec<Notification> = {
            let mut reconciler = self.shared.reconciler.lock();
            self.paths
                .iter()
                .flat_map(|p| reconciler.end(p))
                .collect()
        };
        for note in flushed {
            self.shared.deliver(note);
        }
    }
}

impl Shared {
    fn fs_error(path: &str, err: std::io::Error) -> FsError {
        FsError::from_io(path, err)
    }

    fn entry_for(&self, path: &str, kind: EntryKind) -> Arc<EntryInner> {
        self.cache.lock().get_or_create(path, kind, &self.self_ref)
    }

    fn invalidate_parent(&self, path: &str) {
        let parent = path::parent_path(path).and_then(|p| self.cache.lock().get(p));
        if let Some(parent) = parent {
            parent.clear_contents();
        }
    }

    fn watch_status(&self, path: &str) -> WatchStatus {
        let watched = self.watched.lock();
        // Longest matching root wins for nested watches.
        let Some((root, watch)) = watched
            .iter()
            .filter(|(root, _)| path::is_within(path, root))
            .max_by_key(|(root, _)| root.len())
        else {
            return WatchStatus::Unwatched;
        };

        let Some(filter) = &watch.filter else {
            return WatchStatus::Watched;
        };
        let relative = path[root.len()..].trim_end_matches(path::SEPARATOR);
        let mut parent = root.clone();
        for name in relative.split(path::SEPARATOR).filter(|s| !s.is_empty()) {
            if !filter(name, &parent) {
                return WatchStatus::Filtered;
            }
            parent.push_str(name);
            parent.push(path::SEPARATOR);
        }
        WatchStatus::Watched
    }

    fn caches_contents(&self, path: &str) -> bool {
        self.config.cache_contents
            && self.config.watch_enabled
            && self.watching.load(Ordering::Acquire)
            && self.watch_status(path) == WatchStatus::Watched
    }

    fn emit(&self, event: ChangeEvent) {
        // Snapshot so listeners may subscribe/unsubscribe reentrantly.
        let listeners: Vec<Listener> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, l)| l.clone())
            .collect();
        for listener in listeners {
            listener(&event);
        }
    }

    /// Apply a notification to cached state and tell listeners.
    ///
    /// A held-back notification's stats are dropped if the record's stats
    /// were replaced after it arrived (typically by the operation it was
    /// waiting on); listeners then get the record's current stats.
    fn deliver(&self, note: Notification) {
        let kind = path::kind_of(&note.path);
        let inner = self.entry_for(&note.path, kind);
        let current = match &note.baseline {
            Some((seen, version)) => Arc::ptr_eq(seen, &inner) && inner.version() == *version,
            None => true,
        };
        let stats = if current {
            if let Some(stats) = &note.stats {
                inner.set_stats(Some(stats.clone()));
            }
            note.stats
        } else {
            tracing::trace!(path = %note.path, "keeping newer stats over queued notification");
            inner.stats()
        };
        if kind == EntryKind::Directory {
            inner.clear_contents();
        }
        self.invalidate_parent(&note.path);

        tracing::debug!(path = %note.path, "change");
        self.emit(ChangeEvent::Changed {
            entry: Entry::from_inner(inner),
            stats,
        });
    }

    /// Kind for a notification that came without stats, usually because the
    /// path is gone. A bare path with only a directory cached under it is
    /// taken to be that directory.
    fn kind_without_stats(&self, raw: &str) -> EntryKind {
        let kind = path::kind_of(raw);
        if kind == EntryKind::Directory {
            return kind;
        }
        let (Ok(file), Ok(dir)) = (
            path::normalize(raw, EntryKind::File),
            path::normalize(raw, EntryKind::Directory),
        ) else {
            return kind;
        };
        let cache = self.cache.lock();
        if cache.get(&file).is_none() && cache.get(&dir).is_some() {
            EntryKind::Directory
        } else {
            kind
        }
    }

    /// Entry point for everything the backend watcher reports.
    pub(crate) fn handle_watch_event(&self, event: WatchEvent) {
        let (raw, stats) = match event {
            WatchEvent::Rescan => {
                tracing::debug!("bulk change, dropping cached listings");
                for inner in self.cache.lock().all() {
                    inner.clear_contents();
                }
                self.emit(ChangeEvent::Rescan);
                return;
            }
            WatchEvent::Changed { path, stats } => (path, stats),
        };

        let kind = match &stats {
            Some(s) => s.kind,
            None => self.kind_without_stats(&raw),
        };
        let path = match path::normalize(&raw, kind) {
            Ok(path) => path,
            Err(e) => {
                tracing::warn!(path = %raw, error = %e, "dropping unnormalizable watcher path");
                return;
            }
        };

        if self.watch_status(&path) != WatchStatus::Watched {
            tracing::trace!(path, "ignoring change outside watched roots");
            return;
        }

        let baseline = self.cache.lock().get(&path).map(|inner| {
            let version = inner.version();
            (inner, version)
        });
        let note = Notification {
            path: path.clone(),
            stats,
            baseline,
        };
        let ready = self.reconciler.lock().notify(&path, note);
        if let Some(note) = ready {
            self.deliver(note);
        }
    }

    pub(crate) async fn stat(&self, inner: &Arc<EntryInner>) -> Result<Stats> {
        let path = inner.path();
        let stats = self
            .backend
            .stat(&path)
            .await
            .map_err(|e| Self::fs_error(&path, e))?;
        inner.set_stats(Some(stats.clone()));
        Ok(stats)
    }

    pub(crate) async fn read(&self, inner: &Arc<EntryInner>) -> Result<(Vec<u8>, Stats)> {
        let path = inner.path();
        let (data, stats) = self
            .backend
            .read_file(&path)
            .await
            .map_err(|e| Self::fs_error(&path, e))?;
        inner.set_synced(stats.clone());
        Ok((data, stats))
    }

    pub(crate) async fn write(
        self: &Arc<Self>,
        inner: &Arc<EntryInner>,
        data: Vec<u8>,
        options: WriteOptions,
        callback: impl FnOnce(Result<Stats>) + Send,
    ) {
        let path = inner.path();
        let guard = ChangeGuard::begin(self, &[path.as_str()]);
        let result = self.write_checked(inner, &path, &data, options).await;
        callback(result);
        drop(guard);
    }

    async fn write_checked(
        &self,
        inner: &Arc<EntryInner>,
        path: &str,
        data: &[u8],
        options: WriteOptions,
    ) -> Result<Stats> {
        if !options.blind {
            if let Some(expected) = options.expected.or_else(|| inner.synced()) {
                match self.backend.stat(path).await {
                    Ok(current) if current != expected => {
                        tracing::debug!(path, "write refused, contents modified");
                        return Err(FsError::ContentsModified(path.to_string()));
                    }
                    Ok(_) => {}
                    // Deleted since last read; writing recreates it.
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(Self::fs_error(path, e)),
                }
            }
        }

        let stats = self
            .backend
            .write_file(path, data)
            .await
            .map_err(|e| Self::fs_error(path, e))?;
        inner.set_synced(stats.clone());
        self.invalidate_parent(path);
        Ok(stats)
    }

    pub(crate) async fn rename(
        self: &Arc<Self>,
        inner: &Arc<EntryInner>,
        new_path: &str,
        callback: impl FnOnce(Result<()>) + Send,
    ) {
        let old = inner.path();
        let new = match path::normalize(new_path, inner.kind()) {
            Ok(new) => new,
            Err(e) => {
                callback(Err(e));
                return;
            }
        };

        let guard = ChangeGuard::begin(self, &[old.as_str(), new.as_str()]);
        let result = self.rename_checked(&old, &new).await;
        callback(result);
        drop(guard);
    }

    async fn rename_checked(&self, old: &str, new: &str) -> Result<()> {
        match self.backend.stat(new).await {
            Ok(_) => return Err(FsError::AlreadyExists(new.to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(Self::fs_error(new, e)),
        }

        self.backend.rename(old, new).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::AlreadyExists => FsError::AlreadyExists(new.to_string()),
            _ => Self::fs_error(old, e),
        })?;

        // Relabel before the callback runs so it sees the new paths.
        self.cache.lock().rename(old, new);
        self.invalidate_parent(old);
        self.invalidate_parent(new);
        Ok(())
    }

    pub(crate) async fn unlink(
        self: &Arc<Self>,
        inner: &Arc<EntryInner>,
        callback: impl FnOnce(Result<()>) + Send,
    ) {
        let path = inner.path();
        let guard = ChangeGuard::begin(self, &[path.as_str()]);
        let result = self
            .backend
            .unlink(&path)
            .await
            .map_err(|e| Self::fs_error(&path, e));
        if result.is_ok() {
            inner.set_stats(None);
            inner.clear_contents();
            self.invalidate_parent(&path);
        }
        callback(result);
        drop(guard);
    }

    pub(crate) async fn mkdir(
        self: &Arc<Self>,
        inner: &Arc<EntryInner>,
        callback: impl FnOnce(Result<Stats>) + Send,
    ) {
        let path = inner.path();
        let guard = ChangeGuard::begin(self, &[path.as_str()]);
        let result = self
            .backend
            .mkdir(&path)
            .await
            .map_err(|e| Self::fs_error(&path, e));
        if let Ok(stats) = &result {
            inner.set_stats(Some(stats.clone()));
            self.invalidate_parent(&path);
        }
        callback(result);
        drop(guard);
    }

    pub(crate) async fn get_contents(&self, inner: &Arc<EntryInner>) -> Result<Vec<Entry>> {
        let path = inner.path();
        if let Some(cached) = inner.contents() {
            return Ok(cached);
        }

        let listing = self
            .backend
            .read_dir(&path)
            .await
            .map_err(|e| Self::fs_error(&path, e))?;

        let mut children = Vec::with_capacity(listing.len());
        for child in listing {
            let child_path = path::join(&path, &child.name, child.stats.kind);
            if self.watch_status(&child_path) == WatchStatus::Filtered {
                continue;
            }
            let child_inner = self.entry_for(&child_path, child.stats.kind);
            child_inner.set_stats(Some(child.stats));
            children.push(Entry::from_inner(child_inner));
        }

        // Only trust a cached listing while a watcher will invalidate it, and
        // only if the directory wasn't renamed while we were listing.
        if self.caches_contents(&path) && inner.path() == path {
            inner.set_contents(children.clone());
        }
        Ok(children)
    }
}

/// A cached, watched view of one backend.
pub struct FileSystem {
    shared: Arc<Shared>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for FileSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileSystem")
            .field("config", &self.shared.config)
            .field("entries", &self.shared.cache.lock().len())
            .field("watching", &self.shared.watching.load(Ordering::Acquire))
            .finish()
    }
}

impl FileSystem {
    /// Bind `backend` with the default configuration.
    pub async fn new(backend: Arc<dyn Backend>) -> Self {
        Self::with_config(backend, FsConfig::default()).await
    }

    /// Bind `backend` and start listening to its watcher.
    ///
    /// Must be called inside a tokio runtime. A backend that cannot watch is
    /// not an error; the filesystem simply sees no external changes.
    pub async fn with_config(backend: Arc<dyn Backend>, config: FsConfig) -> Self {
        let shared = Arc::new_cyclic(|self_ref| Shared {
            backend: backend.clone(),
            config,
            self_ref: self_ref.clone(),
            cache: Mutex::new(EntryCache::new()),
            reconciler: Mutex::new(ChangeReconciler::new()),
            listeners: Mutex::new(Vec::new()),
            next_listener: AtomicU64::new(1),
            watched: Mutex::new(BTreeMap::new()),
            watching: AtomicBool::new(false),
        });

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let pump = match backend.init_watchers(event_tx).await {
            Ok(()) => {
                shared.watching.store(true, Ordering::Release);
                Some(tokio::spawn(Self::pump(Arc::downgrade(&shared), event_rx)))
            }
            Err(e) => {
                tracing::warn!(error = %e, "backend watcher unavailable, no external change events");
                None
            }
        };

        Self {
            shared,
            pump: Mutex::new(pump),
        }
    }

    /// Background task: feeds watcher notifications into the reconciler.
    async fn pump(shared: Weak<Shared>, mut event_rx: mpsc::UnboundedReceiver<WatchEvent>) {
        while let Some(event) = event_rx.recv().await {
            // Weak ref: the task must not keep a dropped filesystem alive.
            let Some(shared) = shared.upgrade() else {
                break;
            };
            shared.handle_watch_event(event);
        }
        tracing::debug!("watch pump stopped");
    }

    /// Handle for the file at `path`. No I/O; the file need not exist.
    pub fn file_for_path(&self, path: &str) -> Result<File> {
        let path = path::normalize(path, EntryKind::File)?;
        Ok(File(self.shared.entry_for(&path, EntryKind::File)))
    }

    /// Handle for the directory at `path`. No I/O; it need not exist.
    pub fn directory_for_path(&self, path: &str) -> Result<Directory> {
        let path = path::normalize(path, EntryKind::Directory)?;
        Ok(Directory(self.shared.entry_for(&path, EntryKind::Directory)))
    }

    /// Ask the backend what is at `path` and return the matching entry.
    pub async fn resolve(&self, path: &str) -> Result<Entry> {
        let kind = path::kind_of(path);
        let candidate = path::normalize(path, kind)?;
        let stats = self
            .shared
            .backend
            .stat(&candidate)
            .await
            .map_err(|e| Shared::fs_error(&candidate, e))?;

        let normalized = if stats.kind == kind {
            candidate
        } else {
            path::normalize(path, stats.kind)?
        };
        let inner = self.shared.entry_for(&normalized, stats.kind);
        inner.set_stats(Some(stats));
        Ok(Entry::from_inner(inner))
    }

    /// Call `listener` for every change event until unsubscribed.
    pub fn subscribe(&self, listener: impl Fn(&ChangeEvent) + Send + Sync + 'static) -> ListenerId {
        let id = ListenerId(self.shared.next_listener.fetch_add(1, Ordering::Relaxed));
        self.shared.listeners.lock().push((id, Arc::new(listener)));
        id
    }

    /// Remove a listener. Returns `false` if it was not registered.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self.shared.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        listeners.len() != before
    }

    /// Change events as a channel, for consumers running their own loop.
    pub fn change_stream(&self) -> (ListenerId, mpsc::UnboundedReceiver<ChangeEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.subscribe(move |event| {
            // Receiver dropped: the consumer stopped listening.
            let _ = tx.send(event.clone());
        });
        (id, rx)
    }

    /// Start delivering change events for the subtree at `root`.
    ///
    /// `filter(name, parent_path)` is applied to every path segment below the
    /// root; a rejected segment hides the whole subtree from change events
    /// and directory listings.
    pub async fn watch(&self, root: &Directory, filter: Option<WatchFilter>) -> Result<()> {
        let path = root.full_path();
        {
            let mut watched = self.shared.watched.lock();
            if watched.contains_key(&path) {
                return Err(FsError::AlreadyWatched(path));
            }
            watched.insert(path.clone(), WatchedRoot { filter });
        }

        if self.shared.config.watch_enabled {
            if let Err(e) = self.shared.backend.watch_path(&path).await {
                self.shared.watched.lock().remove(&path);
                return Err(Shared::fs_error(&path, e));
            }
        }

        tracing::info!(root = %path, "watching");
        Ok(())
    }

    /// Stop delivering change events for `root`.
    pub async fn unwatch(&self, root: &Directory) -> Result<()> {
        let path = root.full_path();
        if self.shared.watched.lock().remove(&path).is_none() {
            return Err(FsError::NotWatched(path));
        }
        self.forget_root(&path).await;
        tracing::info!(root = %path, "unwatched");
        Ok(())
    }

    async fn forget_root(&self, path: &str) {
        if self.shared.config.watch_enabled {
            if let Err(e) = self.shared.backend.unwatch_path(path).await {
                tracing::warn!(root = %path, error = %e, "unwatch failed");
            }
        }
        for inner in self.shared.cache.lock().all() {
            if path::is_within(&inner.path(), path) {
                inner.clear_contents();
            }
        }
    }

    /// Unregister every watch and stop the watch pump.
    pub async fn close(&self) {
        let roots: Vec<String> = {
            let mut watched = self.shared.watched.lock();
            let roots = watched.keys().cloned().collect();
            watched.clear();
            roots
        };
        for root in roots {
            self.forget_root(&root).await;
        }
        if let Some(pump) = self.pump.lock().take() {
            pump.abort();
        }
        self.shared.watching.store(false, Ordering::Release);
        tracing::debug!("filesystem closed");
    }

    /// True while the backend watcher is feeding events.
    pub fn is_watching(&self) -> bool {
        self.shared.watching.load(Ordering::Acquire)
    }

    /// Number of in-flight mutating operations on `path`.
    pub fn pending_operations(&self, path: &str) -> usize {
        self.shared.reconciler.lock().pending(path)
    }

    /// Number of cached entries.
    pub fn cached_entries(&self) -> usize {
        self.shared.cache.lock().len()
    }
}

impl Drop for FileSystem {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.lock().take() {
            pump.abort();
        }
    }
}
