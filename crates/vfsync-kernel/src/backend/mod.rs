//! Storage backends.
//!
//! The filesystem layer talks to storage only through the [`Backend`] trait:
//!
//! - **MemoryBackend**: in-memory ephemeral storage (tests, scratch)
//! - **LocalBackend**: real directory on disk, watched with `notify`
//!   (requires the `native` feature)

#[cfg(feature = "native")]
mod local;
mod memory;
mod traits;

#[cfg(feature = "native")]
pub use local::LocalBackend;
pub use memory::MemoryBackend;
pub use traits::{Backend, DirEntry, EntryKind, Stats, WatchEvent, WatchSink};
