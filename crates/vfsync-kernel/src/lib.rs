//! vfsync-kernel: a cached, identity-preserving view over a storage backend.
//!
//! This crate provides:
//!
//! - **Paths**: lexical normalization (`path`)
//! - **Entries**: `File`/`Directory` handles, one per normalized path
//! - **Reconciler**: orders operation callbacks before the change events they cause
//! - **FileSystem**: lookups, watches and the change-event stream
//! - **Backends**: the `Backend` trait plus in-memory and local-disk implementations
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use vfsync_kernel::{FileSystem, MemoryBackend, WriteOptions};
//!
//! let fs = FileSystem::new(Arc::new(MemoryBackend::new())).await;
//! fs.watch(&fs.directory_for_path("/")?, None).await?;
//! fs.subscribe(|event| println!("{event:?}"));
//!
//! let file = fs.file_for_path("/notes.txt")?;
//! file.write("hello", WriteOptions::default(), |r| println!("written: {r:?}")).await;
//! // prints "written: ..." before the change event
//! ```

pub mod backend;
mod cache;
pub mod config;
mod entry;
pub mod error;
mod filesystem;
pub mod path;
pub mod reconcile;

#[cfg(feature = "native")]
pub use backend::LocalBackend;
pub use backend::{Backend, DirEntry, EntryKind, MemoryBackend, Stats, WatchEvent, WatchSink};
pub use config::FsConfig;
pub use entry::{Directory, Entry, File, WriteOptions};
pub use error::{FsError, Result};
pub use filesystem::{ChangeEvent, FileSystem, ListenerId, WatchFilter};
