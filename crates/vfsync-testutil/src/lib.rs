//! Test utilities for vfsync.
//!
//! Ordering bugs between operation callbacks and watcher notifications only
//! show up under particular interleavings. Instead of sleeping and hoping,
//! [`ScriptedBackend`] parks every mutating call until the test releases it,
//! and lets the test push watcher notifications whenever it likes:
//!
//! ```ignore
//! let backend = ScriptedBackend::gated();
//! let fs = FileSystem::new(backend.clone()).await;
//!
//! let write = tokio::spawn(async move { file.write("x", opts, cb).await });
//! backend.wait_for_call("/a").await;   // write is now in flight
//! backend.notify("/a");                // watcher fires first
//! settle().await;
//! backend.release("/a");               // then the backend completes
//! write.await.unwrap();
//! ```

use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{Notify, oneshot};
use vfsync_kernel::{Backend, DirEntry, MemoryBackend, Stats, WatchEvent, WatchSink};

/// Backend whose mutating calls complete only when the test says so.
///
/// Storage is a [`MemoryBackend`] whose own watcher is never armed; the only
/// notifications the filesystem sees are the ones pushed with
/// [`ScriptedBackend::notify`].
pub struct ScriptedBackend {
    storage: MemoryBackend,
    gated: AtomicBool,
    sink: Mutex<Option<WatchSink>>,
    parked: Mutex<HashMap<String, VecDeque<oneshot::Sender<()>>>>,
    arrived: Notify,
    watched: Mutex<Vec<String>>,
}

impl ScriptedBackend {
    /// Backend that runs every call straight through.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            storage: MemoryBackend::new(),
            gated: AtomicBool::new(false),
            sink: Mutex::new(None),
            parked: Mutex::new(HashMap::new()),
            arrived: Notify::new(),
            watched: Mutex::new(Vec::new()),
        })
    }

    /// Backend that parks mutating calls until released.
    pub fn gated() -> Arc<Self> {
        let backend = Self::new();
        backend.set_gated(true);
        backend
    }

    /// Turn parking of mutating calls on or off.
    pub fn set_gated(&self, gated: bool) {
        self.gated.store(gated, Ordering::SeqCst);
    }

    /// Put a file in storage directly: no parking, no notification.
    pub async fn seed(&self, path: &str, data: &[u8]) {
        if let Err(e) = self.storage.write_file(path, data).await {
            panic!("seeding {path} failed: {e}");
        }
    }

    /// Create a directory in storage directly.
    pub async fn seed_dir(&self, path: &str) {
        if let Err(e) = self.storage.mkdir(path).await {
            panic!("seeding {path} failed: {e}");
        }
    }

    /// Number of calls parked on `path`.
    pub fn parked(&self, path: &str) -> usize {
        self.parked.lock().get(path).map_or(0, VecDeque::len)
    }

    /// Wait until at least one call on `path` is parked.
    pub async fn wait_for_call(&self, path: &str) {
        loop {
            let arrived = self.arrived.notified();
            if self.parked(path) > 0 {
                return;
            }
            arrived.await;
        }
    }

    /// Let the oldest parked call on `path` complete. Returns `false` when
    /// nothing was parked there.
    pub fn release(&self, path: &str) -> bool {
        let sender = self
            .parked
            .lock()
            .get_mut(path)
            .and_then(VecDeque::pop_front);
        match sender {
            // The call's future may have been dropped; that's fine.
            Some(tx) => {
                let _ = tx.send(());
                true
            }
            None => false,
        }
    }

    /// Push a watcher notification for `path`.
    pub fn notify(&self, path: &str) {
        self.send(WatchEvent::changed(path));
    }

    /// Push a notification carrying `stats`.
    pub fn notify_with_stats(&self, path: &str, stats: Stats) {
        self.send(WatchEvent::Changed {
            path: path.to_string(),
            stats: Some(stats),
        });
    }

    /// Push a bulk-change notification.
    pub fn notify_rescan(&self) {
        self.send(WatchEvent::Rescan);
    }

    /// Roots the filesystem asked the backend to watch.
    pub fn watched_roots(&self) -> Vec<String> {
        self.watched.lock().clone()
    }

    fn send(&self, event: WatchEvent) {
        match self.sink.lock().as_ref() {
            Some(sink) => {
                let _ = sink.send(event);
            }
            None => panic!("notify before init_watchers"),
        }
    }

    async fn gate(&self, path: &str) {
        if !self.gated.load(Ordering::SeqCst) {
            return;
        }
        let (tx, rx) = oneshot::channel();
        self.parked
            .lock()
            .entry(path.to_string())
            .or_default()
            .push_back(tx);
        self.arrived.notify_waiters();
        // Sender dropped only if the backend itself is dropped.
        let _ = rx.await;
    }
}

#[async_trait]
impl Backend for ScriptedBackend {
    async fn stat(&self, path: &str) -> io::Result<Stats> {
        self.storage.stat(path).await
    }

    async fn read_file(&self, path: &str) -> io::Result<(Vec<u8>, Stats)> {
        self.storage.read_file(path).await
    }

    async fn write_file(&self, path: &str, data: &[u8]) -> io::Result<Stats> {
        self.gate(path).await;
        self.storage.write_file(path, data).await
    }

    async fn rename(&self, from: &str, to: &str) -> io::Result<()> {
        self.gate(from).await;
        self.storage.rename(from, to).await
    }

    async fn read_dir(&self, path: &str) -> io::Result<Vec<DirEntry>> {
        self.storage.read_dir(path).await
    }

    async fn mkdir(&self, path: &str) -> io::Result<Stats> {
        self.gate(path).await;
        self.storage.mkdir(path).await
    }

    async fn unlink(&self, path: &str) -> io::Result<()> {
        self.gate(path).await;
        self.storage.unlink(path).await
    }

    async fn init_watchers(&self, sink: WatchSink) -> io::Result<()> {
        *self.sink.lock() = Some(sink);
        Ok(())
    }

    async fn watch_path(&self, path: &str) -> io::Result<()> {
        self.watched.lock().push(path.to_string());
        Ok(())
    }

    async fn unwatch_path(&self, path: &str) -> io::Result<()> {
        self.watched.lock().retain(|p| p != path);
        Ok(())
    }
}

/// Let every ready task on the current-thread runtime run to its next
/// suspension point.
pub async fn settle() {
    for _ in 0..32 {
        tokio::task::yield_now().await;
    }
}

/// Ordered log of what a test observed, shared between callbacks and
/// listeners.
#[derive(Clone, Default)]
pub struct Recorder {
    log: Arc<Mutex<Vec<String>>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, entry: impl Into<String>) {
        self.log.lock().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.log.lock().clone()
    }

    /// Index of the first entry equal to `entry`.
    pub fn position(&self, entry: &str) -> Option<usize> {
        self.log.lock().iter().position(|e| e == entry)
    }

    /// Number of entries equal to `entry`.
    pub fn count(&self, entry: &str) -> usize {
        self.log.lock().iter().filter(|e| *e == entry).count()
    }
}
