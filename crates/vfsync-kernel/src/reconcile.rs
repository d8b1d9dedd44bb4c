//! Ordering of operation completions against watcher notifications.
//!
//! A backend reports completion of a write through the operation's result and,
//! independently, reports the same write through its watcher. Either may
//! arrive first. Callers expect to see their own completion before the change
//! event it caused, so notifications for a path are held back while any
//! mutating operation on that path is in flight:
//!
//! ```text
//!            begin(p)                 end(p), count > 0
//!   idle ─────────────▶ pending(n) ◀──────────────────┐
//!    ▲                   │   │  begin(p)               │
//!    │                   │   └─────────────────────────┘
//!    │   end(p), n == 1  │   notify(p) → queue
//!    └───── flush ◀──────┘
//! ```
//!
//! State is kept per path; a pending operation on one path never holds back
//! another path. There are no timers: the queue drains when, and only when,
//! the last in-flight operation on the path finishes.

use std::collections::{HashMap, VecDeque};

/// Per-path bookkeeping.
#[derive(Debug)]
struct PathState<T> {
    /// Mutating operations in flight.
    pending: usize,
    /// Notifications received while `pending > 0`, in arrival order.
    deferred: VecDeque<T>,
}

impl<T> Default for PathState<T> {
    fn default() -> Self {
        Self {
            pending: 0,
            deferred: VecDeque::new(),
        }
    }
}

/// Pending-operation table keyed by normalized path.
///
/// Generic over the notification payload so the gating rules can be driven
/// without a backend. Paths with no in-flight operations have no entry.
#[derive(Debug)]
pub struct ChangeReconciler<T> {
    table: HashMap<String, PathState<T>>,
}

impl<T> Default for ChangeReconciler<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ChangeReconciler<T> {
    pub fn new() -> Self {
        Self {
            table: HashMap::new(),
        }
    }

    /// Record that a mutating operation on `path` is about to be issued.
    pub fn begin(&mut self, path: &str) {
        let state = self.table.entry(path.to_string()).or_default();
        state.pending += 1;
        tracing::trace!(path, pending = state.pending, "operation begin");
    }

    /// Offer a watcher notification for `path`.
    ///
    /// Returns the payload back when it may be delivered now; returns `None`
    /// when it was queued behind an in-flight operation.
    pub fn notify(&mut self, path: &str, payload: T) -> Option<T> {
        match self.table.get_mut(path) {
            Some(state) if state.pending > 0 => {
                state.deferred.push_back(payload);
                tracing::debug!(
                    path,
                    pending = state.pending,
                    queued = state.deferred.len(),
                    "change deferred behind pending operation"
                );
                None
            }
            _ => Some(payload),
        }
    }

    /// Record that a mutating operation on `path` has delivered its result.
    ///
    /// When this was the last in-flight operation, returns the deferred
    /// notifications in arrival order; otherwise returns nothing. Unbalanced
    /// calls are logged and ignored.
    pub fn end(&mut self, path: &str) -> Vec<T> {
        let Some(state) = self.table.get_mut(path) else {
            tracing::warn!(path, "operation end without matching begin");
            return Vec::new();
        };

        state.pending = state.pending.saturating_sub(1);
        tracing::trace!(path, pending = state.pending, "operation end");
        if state.pending > 0 {
            return Vec::new();
        }

        match self.table.remove(path) {
            Some(state) => state.deferred.into(),
            None => Vec::new(),
        }
    }

    /// Number of in-flight operations on `path`.
    pub fn pending(&self, path: &str) -> usize {
        self.table.get(path).map_or(0, |s| s.pending)
    }

    /// Number of notifications queued for `path`.
    pub fn deferred(&self, path: &str) -> usize {
        self.table.get(path).map_or(0, |s| s.deferred.len())
    }

    /// True when no path has an operation in flight.
    pub fn is_idle(&self) -> bool {
        self.table.is_empty()
    }
}
