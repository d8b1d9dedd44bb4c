//! Path normalization.
//!
//! Every path the kernel hands out is absolute and canonical for its kind:
//!
//! ```text
//! //foo///bar     (file)       → /foo/bar
//! //foo///bar     (directory)  → /foo/bar/
//! /a/one/../b     (directory)  → /a/b/
//! C:/x//y         (file)       → C:/x/y
//! ```
//!
//! Normalization is purely lexical: `..` is resolved against the string, never
//! against the backend, so symlinks are not followed. `.` segments are left
//! alone.

use crate::backend::EntryKind;
use crate::error::{FsError, Result};

/// Path separator.
pub const SEPARATOR: char = '/';

/// Normalize `raw` into the canonical form for `kind`.
///
/// Fails with [`FsError::InvalidPath`] for empty or relative input, for a
/// `..` that would climb above the root, and for a file path that reduces to
/// the root.
pub fn normalize(raw: &str, kind: EntryKind) -> Result<String> {
    let Some(root_at) = raw.find(SEPARATOR) else {
        return Err(FsError::InvalidPath(raw.to_string()));
    };
    let (prefix, rest) = raw.split_at(root_at);

    // Only a drive/volume designator ("C:") may precede the root separator.
    if !prefix.is_empty() && !prefix.ends_with(':') {
        return Err(FsError::InvalidPath(raw.to_string()));
    }

    let mut segments: Vec<&str> = Vec::new();
    for segment in rest.split(SEPARATOR) {
        match segment {
            "" => {}
            ".." => {
                if segments.pop().is_none() {
                    return Err(FsError::InvalidPath(raw.to_string()));
                }
            }
            s => segments.push(s),
        }
    }

    let mut out = String::with_capacity(raw.len() + 1);
    out.push_str(prefix);
    out.push(SEPARATOR);
    out.push_str(&segments.join("/"));

    match kind {
        EntryKind::Directory => {
            if !segments.is_empty() {
                out.push(SEPARATOR);
            }
        }
        EntryKind::File => {
            if segments.is_empty() {
                return Err(FsError::InvalidPath(raw.to_string()));
            }
        }
    }

    Ok(out)
}

/// Kind implied by the trailing-separator convention.
pub fn kind_of(path: &str) -> EntryKind {
    if path.ends_with(SEPARATOR) {
        EntryKind::Directory
    } else {
        EntryKind::File
    }
}

/// True if `path` is a directory path (ends with a separator).
pub fn is_directory_path(path: &str) -> bool {
    kind_of(path) == EntryKind::Directory
}

/// Parent directory of a normalized path, or `None` for the root.
pub fn parent_path(path: &str) -> Option<&str> {
    let trimmed = path.strip_suffix(SEPARATOR).unwrap_or(path);
    let idx = trimmed.rfind(SEPARATOR)?;
    Some(&path[..=idx])
}

/// Last segment of a normalized path; empty for the root.
pub fn file_name(path: &str) -> &str {
    let trimmed = path.strip_suffix(SEPARATOR).unwrap_or(path);
    match trimmed.rfind(SEPARATOR) {
        Some(idx) => &trimmed[idx + 1..],
        None => "",
    }
}

/// Child path of directory `dir` named `name`.
pub fn join(dir: &str, name: &str, kind: EntryKind) -> String {
    let mut out = String::with_capacity(dir.len() + name.len() + 1);
    out.push_str(dir);
    if !out.ends_with(SEPARATOR) {
        out.push(SEPARATOR);
    }
    out.push_str(name);
    if kind == EntryKind::Directory {
        out.push(SEPARATOR);
    }
    out
}

/// True if `path` is `root` itself or lies beneath it. `root` must be a
/// directory path.
pub fn is_within(path: &str, root: &str) -> bool {
    path.starts_with(root)
}
