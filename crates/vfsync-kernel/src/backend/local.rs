//! Local filesystem backend.
//!
//! Maps VFS paths onto a real directory and reports changes through a
//! `notify` watcher.

use super::traits::{Backend, DirEntry, EntryKind, Stats, WatchEvent, WatchSink};
use async_trait::async_trait;
use notify::event::{CreateKind, RemoveKind};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use std::io;
use std::path::{Component, Path, PathBuf};
use tokio::fs;

/// Local filesystem backend.
///
/// All operations are relative to `root`. If `root` is `/home/amy/project`,
/// then `read_file("/src/main.rs")` reads `/home/amy/project/src/main.rs`.
pub struct LocalBackend {
    root: PathBuf,
    watcher: Mutex<Option<RecommendedWatcher>>,
}

impl std::fmt::Debug for LocalBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalBackend")
            .field("root", &self.root)
            .field("watching", &self.watcher.lock().is_some())
            .finish()
    }
}

impl LocalBackend {
    /// Create a backend rooted at `root`.
    ///
    /// The root is canonicalized when possible so watcher paths line up with
    /// what `notify` reports.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let root = std::fs::canonicalize(&root).unwrap_or(root);
        Self {
            root,
            watcher: Mutex::new(None),
        }
    }

    /// Get the root path.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a normalized VFS path onto the real filesystem.
    fn resolve(&self, path: &str) -> PathBuf {
        let relative = path.trim_start_matches('/').trim_end_matches('/');
        if relative.is_empty() {
            self.root.clone()
        } else {
            self.root.join(relative)
        }
    }

    /// Map a real path reported by the watcher back to a VFS path.
    ///
    /// Directories get a trailing separator. A path that no longer exists gets
    /// one only when `hint` says it was a directory.
    fn to_vfs_path(
        root: &Path,
        real: &Path,
        hint: Option<EntryKind>,
    ) -> Option<(String, Option<Stats>)> {
        let relative = real.strip_prefix(root).ok()?;
        let mut out = String::from("/");
        let mut first = true;
        for component in relative.components() {
            if let Component::Normal(s) = component {
                if !first {
                    out.push('/');
                }
                out.push_str(&s.to_string_lossy());
                first = false;
            }
        }
        let stats = std::fs::metadata(real).ok().map(|m| stats_from(&m));
        let is_dir = match &stats {
            Some(s) => s.is_dir(),
            None => hint == Some(EntryKind::Directory),
        };
        if is_dir && !out.ends_with('/') {
            out.push('/');
        }
        Some((out, stats))
    }

    fn create_watcher(root: PathBuf, sink: WatchSink) -> io::Result<RecommendedWatcher> {
        notify::recommended_watcher(move |res: Result<notify::Event, notify::Error>| match res {
            Ok(event) => {
                if event.need_rescan() {
                    let _ = sink.send(WatchEvent::Rescan);
                    return;
                }
                let hint = match event.kind {
                    EventKind::Create(CreateKind::Folder) | EventKind::Remove(RemoveKind::Folder) => {
                        Some(EntryKind::Directory)
                    }
                    EventKind::Create(CreateKind::File) | EventKind::Remove(RemoveKind::File) => {
                        Some(EntryKind::File)
                    }
                    _ => None,
                };
                for real in &event.paths {
                    if let Some((path, stats)) = Self::to_vfs_path(&root, real, hint) {
                        // Receiver gone means the filesystem was closed.
                        let _ = sink.send(WatchEvent::Changed { path, stats });
                    }
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "File watcher error");
            }
        })
        .map_err(io::Error::other)
    }
}

fn stats_from(meta: &std::fs::Metadata) -> Stats {
    if meta.is_dir() {
        Stats::directory(meta.modified().ok())
    } else {
        // Special files (sockets, pipes, devices) are treated as files.
        Stats::file(meta.len(), meta.modified().ok())
    }
}

#[async_trait]
impl Backend for LocalBackend {
    async fn stat(&self, path: &str) -> io::Result<Stats> {
        let meta = fs::metadata(self.resolve(path)).await?;
        Ok(stats_from(&meta))
    }

    async fn read_file(&self, path: &str) -> io::Result<(Vec<u8>, Stats)> {
        let full_path = self.resolve(path);
        let meta = fs::metadata(&full_path).await?;
        if meta.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::IsADirectory,
                format!("is a directory: {path}"),
            ));
        }
        let data = fs::read(&full_path).await?;
        Ok((data, stats_from(&meta)))
    }

    async fn write_file(&self, path: &str, data: &[u8]) -> io::Result<Stats> {
        let full_path = self.resolve(path);

        // Ensure parent directory exists
        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        fs::write(&full_path, data).await?;
        let meta = fs::metadata(&full_path).await?;
        Ok(stats_from(&meta))
    }

    async fn rename(&self, from: &str, to: &str) -> io::Result<()> {
        let from_path = self.resolve(from);
        let to_path = self.resolve(to);

        if !fs::try_exists(&from_path).await? {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("not found: {from}"),
            ));
        }
        // std::fs::rename silently replaces files on unix.
        if fs::try_exists(&to_path).await? {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("already exists: {to}"),
            ));
        }

        if let Some(parent) = to_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        fs::rename(&from_path, &to_path).await
    }

    async fn read_dir(&self, path: &str) -> io::Result<Vec<DirEntry>> {
        let mut entries = Vec::new();
        let mut dir = fs::read_dir(self.resolve(path)).await?;

        while let Some(entry) = dir.next_entry().await? {
            let metadata = fs::metadata(entry.path()).await?;
            entries.push(DirEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                stats: stats_from(&metadata),
            });
        }

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn mkdir(&self, path: &str) -> io::Result<Stats> {
        let full_path = self.resolve(path);
        fs::create_dir(&full_path).await?;
        let meta = fs::metadata(&full_path).await?;
        Ok(stats_from(&meta))
    }

    async fn unlink(&self, path: &str) -> io::Result<()> {
        let full_path = self.resolve(path);
        let meta = fs::metadata(&full_path).await?;

        if meta.is_dir() {
            fs::remove_dir_all(&full_path).await
        } else {
            fs::remove_file(&full_path).await
        }
    }

    async fn init_watchers(&self, sink: WatchSink) -> io::Result<()> {
        let watcher = Self::create_watcher(self.root.clone(), sink)?;
        *self.watcher.lock() = Some(watcher);
        Ok(())
    }

    async fn watch_path(&self, path: &str) -> io::Result<()> {
        let real = self.resolve(path);
        let mut guard = self.watcher.lock();
        let Some(watcher) = guard.as_mut() else {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "watchers not initialized",
            ));
        };
        watcher
            .watch(&real, RecursiveMode::Recursive)
            .map_err(io::Error::other)
    }

    async fn unwatch_path(&self, path: &str) -> io::Result<()> {
        let real = self.resolve(path);
        if let Some(watcher) = self.watcher.lock().as_mut() {
            // Unwatch failure is harmless (path may already be gone)
            let _ = watcher.unwatch(&real);
        }
        Ok(())
    }
}
