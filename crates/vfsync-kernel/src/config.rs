//! Filesystem configuration.
//!
//! Loaded from `$XDG_CONFIG_HOME/vfsync/config.toml` when present:
//!
//! ```toml
//! # Arm backend watchers for watched roots.
//! watch_enabled = true
//! # Cache directory listings under active watches.
//! cache_contents = true
//! ```

use std::io;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

/// Errors loading a config file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Tunables for a [`crate::FileSystem`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FsConfig {
    /// Arm the backend's watcher for roots passed to `watch`. When off, roots
    /// still gate which notifications are delivered, but none are requested.
    pub watch_enabled: bool,
    /// Cache directory listings for directories under an active watch.
    pub cache_contents: bool,
}

impl Default for FsConfig {
    fn default() -> Self {
        Self {
            watch_enabled: true,
            cache_contents: true,
        }
    }
}

impl FsConfig {
    /// Load from the user config file, or defaults when there is none.
    #[cfg(feature = "native")]
    pub fn load() -> Result<Self, ConfigError> {
        let path = config_path();
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    /// Load from an explicit TOML file.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Location of the user config file.
///
/// Uses `$XDG_CONFIG_HOME/vfsync` or falls back to `~/.config/vfsync`.
#[cfg(feature = "native")]
pub fn config_path() -> PathBuf {
    directories::BaseDirs::new()
        .map(|d| d.config_dir().to_path_buf())
        .unwrap_or_else(|| {
            std::env::var("HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("/tmp"))
                .join(".config")
        })
        .join("vfsync")
        .join("config.toml")
}
