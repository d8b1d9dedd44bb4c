//! In-memory backend.
//!
//! Used for tests and scratch mounts. All data is ephemeral. Mutations report
//! themselves on the watch channel synchronously, before the operation
//! returns, which is the worst case for callback/notification ordering.

use super::traits::{Backend, DirEntry, EntryKind, Stats, WatchEvent, WatchSink};
use crate::path;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::io;
use std::time::SystemTime;
use tokio::sync::RwLock;

/// Entry in the memory backend.
#[derive(Debug, Clone)]
enum Node {
    File { data: Vec<u8>, modified: SystemTime },
    Directory { modified: SystemTime },
}

impl Node {
    fn stats(&self) -> Stats {
        match self {
            Node::File { data, modified } => Stats::file(data.len() as u64, Some(*modified)),
            Node::Directory { modified } => Stats::directory(Some(*modified)),
        }
    }
}

/// In-memory backend.
///
/// Nodes are keyed by path without a trailing separator (`/` for the root).
#[derive(Debug)]
pub struct MemoryBackend {
    nodes: RwLock<HashMap<String, Node>>,
    sink: Mutex<Option<WatchSink>>,
    watched: Mutex<BTreeSet<String>>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    /// Create a new backend holding only the root directory.
    pub fn new() -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(
            "/".to_string(),
            Node::Directory {
                modified: SystemTime::now(),
            },
        );
        Self {
            nodes: RwLock::new(nodes),
            sink: Mutex::new(None),
            watched: Mutex::new(BTreeSet::new()),
        }
    }

    fn key(path: &str) -> String {
        if path == "/" {
            return path.to_string();
        }
        path.strip_suffix('/').unwrap_or(path).to_string()
    }

    fn not_found(path: &str) -> io::Error {
        io::Error::new(io::ErrorKind::NotFound, format!("not found: {path}"))
    }

    /// Ensure all parent directories of `key` exist.
    fn ensure_parents(nodes: &mut HashMap<String, Node>, key: &str) -> io::Result<()> {
        let mut current = key;
        let mut missing = Vec::new();
        while let Some(parent) = path::parent_path(current) {
            let parent_key = Self::key(parent);
            match nodes.get(&parent_key) {
                Some(Node::Directory { .. }) => break,
                Some(Node::File { .. }) => {
                    return Err(io::Error::new(
                        io::ErrorKind::NotADirectory,
                        format!("not a directory: {parent}"),
                    ));
                }
                None => missing.push(parent_key),
            }
            current = parent;
        }
        for dir in missing {
            nodes.insert(
                dir,
                Node::Directory {
                    modified: SystemTime::now(),
                },
            );
        }
        Ok(())
    }

    /// Send a change notification if `path` lies under an armed root.
    fn emit(&self, path: &str, stats: Option<Stats>) {
        let watched = self
            .watched
            .lock()
            .iter()
            .any(|root| path::is_within(path, root) || path == Self::key(root));
        if !watched {
            return;
        }
        if let Some(sink) = self.sink.lock().as_ref() {
            // Receiver gone means the filesystem was closed.
            let _ = sink.send(WatchEvent::Changed {
                path: path.to_string(),
                stats,
            });
        }
    }

    /// Notify the parent directory of `path` that its children changed.
    fn emit_parent(&self, nodes: &HashMap<String, Node>, path: &str) {
        if let Some(parent) = path::parent_path(path) {
            let stats = nodes.get(&Self::key(parent)).map(Node::stats);
            self.emit(parent, stats);
        }
    }

    /// Simulate an external modification, as if another process touched the
    /// file. Emits a notification like any other write.
    pub async fn touch_external(&self, path: &str, data: &[u8]) -> io::Result<()> {
        self.write_file(path, data).await.map(|_| ())
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn stat(&self, path: &str) -> io::Result<Stats> {
        let nodes = self.nodes.read().await;
        nodes
            .get(&Self::key(path))
            .map(Node::stats)
            .ok_or_else(|| Self::not_found(path))
    }

    async fn read_file(&self, path: &str) -> io::Result<(Vec<u8>, Stats)> {
        let nodes = self.nodes.read().await;
        match nodes.get(&Self::key(path)) {
            Some(node @ Node::File { data, .. }) => Ok((data.clone(), node.stats())),
            Some(Node::Directory { .. }) => Err(io::Error::new(
                io::ErrorKind::IsADirectory,
                format!("is a directory: {path}"),
            )),
            None => Err(Self::not_found(path)),
        }
    }

    async fn write_file(&self, path: &str, data: &[u8]) -> io::Result<Stats> {
        let key = Self::key(path);
        let mut nodes = self.nodes.write().await;

        if let Some(Node::Directory { .. }) = nodes.get(&key) {
            return Err(io::Error::new(
                io::ErrorKind::IsADirectory,
                format!("is a directory: {path}"),
            ));
        }

        Self::ensure_parents(&mut nodes, &key)?;
        let created = !nodes.contains_key(&key);

        let node = Node::File {
            data: data.to_vec(),
            modified: SystemTime::now(),
        };
        let stats = node.stats();
        nodes.insert(key.clone(), node);

        self.emit(&key, Some(stats.clone()));
        if created {
            self.emit_parent(&nodes, &key);
        }
        Ok(stats)
    }

    async fn rename(&self, from: &str, to: &str) -> io::Result<()> {
        let from_key = Self::key(from);
        let to_key = Self::key(to);

        if from_key == "/" {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "cannot rename root directory",
            ));
        }

        let mut nodes = self.nodes.write().await;

        if !nodes.contains_key(&from_key) {
            return Err(Self::not_found(from));
        }
        if nodes.contains_key(&to_key) {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("already exists: {to}"),
            ));
        }
        Self::ensure_parents(&mut nodes, &to_key)?;

        // Move the node and, for directories, everything below it.
        let child_prefix = format!("{from_key}/");
        let moved: Vec<String> = nodes
            .keys()
            .filter(|k| **k == from_key || k.starts_with(&child_prefix))
            .cloned()
            .collect();
        for old in moved {
            if let Some(node) = nodes.remove(&old) {
                let new = format!("{to_key}{}", &old[from_key.len()..]);
                nodes.insert(new, node);
            }
        }

        self.emit_parent(&nodes, &from_key);
        self.emit_parent(&nodes, &to_key);
        Ok(())
    }

    async fn read_dir(&self, path: &str) -> io::Result<Vec<DirEntry>> {
        let key = Self::key(path);
        let nodes = self.nodes.read().await;

        match nodes.get(&key) {
            Some(Node::Directory { .. }) => {}
            Some(Node::File { .. }) => {
                return Err(io::Error::new(
                    io::ErrorKind::NotADirectory,
                    format!("not a directory: {path}"),
                ));
            }
            None => return Err(Self::not_found(path)),
        }

        let mut result: Vec<DirEntry> = nodes
            .iter()
            .filter(|(k, _)| k.as_str() != "/" && path::parent_path(k).map(Self::key) == Some(key.clone()))
            .map(|(k, node)| DirEntry {
                name: path::file_name(k).to_string(),
                stats: node.stats(),
            })
            .collect();

        // Sort for consistent ordering
        result.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(result)
    }

    async fn mkdir(&self, path: &str) -> io::Result<Stats> {
        let key = Self::key(path);
        let mut nodes = self.nodes.write().await;

        if nodes.contains_key(&key) {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("already exists: {path}"),
            ));
        }
        Self::ensure_parents(&mut nodes, &key)?;

        let node = Node::Directory {
            modified: SystemTime::now(),
        };
        let stats = node.stats();
        nodes.insert(key.clone(), node);

        self.emit_parent(&nodes, &key);
        Ok(stats)
    }

    async fn unlink(&self, path: &str) -> io::Result<()> {
        let key = Self::key(path);
        if key == "/" {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "cannot remove root directory",
            ));
        }

        let mut nodes = self.nodes.write().await;
        if nodes.remove(&key).is_none() {
            return Err(Self::not_found(path));
        }
        let child_prefix = format!("{key}/");
        nodes.retain(|k, _| !k.starts_with(&child_prefix));

        self.emit_parent(&nodes, &key);
        Ok(())
    }

    async fn init_watchers(&self, sink: WatchSink) -> io::Result<()> {
        *self.sink.lock() = Some(sink);
        Ok(())
    }

    async fn watch_path(&self, path: &str) -> io::Result<()> {
        self.watched.lock().insert(path.to_string());
        Ok(())
    }

    async fn unwatch_path(&self, path: &str) -> io::Result<()> {
        self.watched.lock().remove(path);
        Ok(())
    }
}
