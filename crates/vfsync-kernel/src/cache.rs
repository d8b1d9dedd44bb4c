//! Identity-preserving registry of entries.
//!
//! One record per normalized path. Lookups never touch the backend and nothing
//! is evicted: a record for a path that no longer exists is still a valid
//! handle, and operations on it re-check the backend.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use crate::backend::EntryKind;
use crate::entry::EntryInner;
use crate::filesystem::Shared;
use crate::path;

/// Map from normalized path to the entry record for that path.
pub(crate) struct EntryCache {
    entries: HashMap<String, Arc<EntryInner>>,
}

impl EntryCache {
    pub(crate) fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Return the record for `path`, creating it on first lookup.
    ///
    /// `path` must already be normalized for `kind`; the trailing separator
    /// keeps file and directory keys apart.
    pub(crate) fn get_or_create(
        &mut self,
        path: &str,
        kind: EntryKind,
        fs: &Weak<Shared>,
    ) -> Arc<EntryInner> {
        debug_assert_eq!(path::kind_of(path), kind, "unnormalized key {path}");
        if let Some(existing) = self.entries.get(path) {
            return existing.clone();
        }
        tracing::trace!(path, ?kind, "entry created");
        let inner = Arc::new(EntryInner::new(path.to_string(), kind, fs.clone()));
        self.entries.insert(path.to_string(), inner.clone());
        inner
    }

    /// Cached record for `path`, if any.
    pub(crate) fn get(&self, path: &str) -> Option<Arc<EntryInner>> {
        self.entries.get(path).cloned()
    }

    /// Relabel the record at `old` (and, for a directory, every cached record
    /// beneath it) to live at `new`.
    ///
    /// Record identity is kept; only paths and keys change. A stale record
    /// already cached at a destination key is displaced. Returns `false` when
    /// nothing is cached at `old`.
    pub(crate) fn rename(&mut self, old: &str, new: &str) -> bool {
        if !self.entries.contains_key(old) {
            return false;
        }

        let moved: Vec<String> = if path::is_directory_path(old) {
            self.entries
                .keys()
                .filter(|k| path::is_within(k, old))
                .cloned()
                .collect()
        } else {
            vec![old.to_string()]
        };

        // Pull everything out first so a destination key that is also a
        // source key can't be clobbered mid-move.
        let records: Vec<(String, Arc<EntryInner>)> = moved
            .into_iter()
            .filter_map(|k| self.entries.remove(&k).map(|inner| (k, inner)))
            .collect();

        for (old_key, inner) in records {
            let new_key = format!("{new}{}", &old_key[old.len()..]);
            inner.set_path(new_key.clone());
            self.entries.insert(new_key, inner);
        }

        tracing::debug!(old, new, "cache relabeled");
        true
    }

    /// Every cached record.
    pub(crate) fn all(&self) -> impl Iterator<Item = &Arc<EntryInner>> {
        self.entries.values()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
