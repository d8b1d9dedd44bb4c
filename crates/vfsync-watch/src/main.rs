//! vfsync: command-line front end for the vfsync kernel.
//!
//! Every command runs against a directory on local disk (`--root`, default
//! the current directory). Paths given to commands are VFS paths relative to
//! that root, e.g. `/src/main.rs`.
//!
//! # Usage
//!
//! ```bash
//! vfsync watch                      # print change events until Ctrl-C
//! vfsync --root ~/project ls /src
//! vfsync cat /README.md
//! vfsync write /notes.txt "hello"
//! vfsync mv /notes.txt /archive/notes.txt
//! ```
//!
//! Logs go to stderr; set `RUST_LOG=vfsync_kernel=debug` to see reconciler
//! decisions.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tokio::sync::oneshot;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use vfsync_kernel::{ChangeEvent, FileSystem, FsConfig, LocalBackend, WatchFilter, WriteOptions};

/// Cached, watched view of a local directory.
#[derive(Parser, Debug)]
#[command(name = "vfsync")]
#[command(about = "Watch and edit a directory through the vfsync cache")]
struct Args {
    /// Directory the VFS root maps onto
    #[arg(long, default_value = ".")]
    root: PathBuf,

    /// Config file (defaults to $XDG_CONFIG_HOME/vfsync/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print change events under a directory until interrupted
    Watch {
        /// Directory to watch
        #[arg(default_value = "/")]
        path: String,

        /// Include dot-files and dot-directories
        #[arg(short, long)]
        all: bool,
    },
    /// Print a file as text
    Cat { path: String },
    /// List a directory
    Ls {
        #[arg(default_value = "/")]
        path: String,
    },
    /// Replace a file's contents
    Write {
        path: String,
        text: String,

        /// Overwrite even if the file changed since it was last read
        #[arg(long)]
        blind: bool,
    },
    /// Rename a file or directory
    Mv { from: String, to: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(log_filter()?)
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => FsConfig::load_from(path),
        None => FsConfig::load(),
    }
    .context("Failed to load configuration")?;

    if !args.root.is_dir() {
        bail!("{} is not a directory", args.root.display());
    }
    let backend = Arc::new(LocalBackend::new(&args.root));
    tracing::debug!(root = %backend.root().display(), ?config, "opening");
    let fs = FileSystem::with_config(backend, config).await;

    match args.command {
        Command::Watch { path, all } => watch(&fs, &path, all).await,
        Command::Cat { path } => {
            let text = fs.file_for_path(&path)?.read_as_text().await?;
            print!("{text}");
            Ok(())
        }
        Command::Ls { path } => {
            for entry in fs.directory_for_path(&path)?.get_contents().await? {
                let suffix = if entry.is_directory() { "/" } else { "" };
                println!("{}{suffix}", entry.name());
            }
            Ok(())
        }
        Command::Write { path, text, blind } => {
            let file = fs.file_for_path(&path)?;
            if !blind && file.exists().await? {
                // Establish the version we're overwriting.
                file.read().await?;
            }
            let options = if blind {
                WriteOptions::blind()
            } else {
                WriteOptions::default()
            };
            let (tx, rx) = oneshot::channel();
            file.write(text, options, move |r| {
                let _ = tx.send(r);
            })
            .await;
            let stats = rx.await.context("write did not complete")??;
            tracing::info!(path = %file.full_path(), size = stats.size, "written");
            Ok(())
        }
        Command::Mv { from, to } => {
            let entry = fs.resolve(&from).await?;
            let (tx, rx) = oneshot::channel();
            entry
                .rename(&to, move |r| {
                    let _ = tx.send(r);
                })
                .await;
            rx.await.context("rename did not complete")??;
            println!("{from} -> {}", entry.full_path());
            Ok(())
        }
    }
}

/// `RUST_LOG` plus info-level output from this binary and the kernel.
fn log_filter() -> Result<EnvFilter> {
    Ok(EnvFilter::from_default_env()
        .add_directive("vfsync=info".parse()?)
        .add_directive("vfsync_kernel=info".parse()?))
}

async fn watch(fs: &FileSystem, path: &str, all: bool) -> Result<()> {
    if !fs.is_watching() {
        bail!("backend watcher unavailable");
    }
    let root = fs.directory_for_path(path)?;
    let filter: Option<WatchFilter> = if all {
        None
    } else {
        Some(Arc::new(|name: &str, _parent: &str| !name.starts_with('.')))
    };

    let (_id, mut events) = fs.change_stream();
    fs.watch(&root, filter).await?;
    tracing::info!(root = %root.full_path(), "watching, Ctrl-C to stop");

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(ChangeEvent::Changed { entry, stats: Some(stats) }) => {
                    println!("changed {} ({} bytes)", entry.full_path(), stats.size);
                }
                Some(ChangeEvent::Changed { entry, stats: None }) => {
                    println!("removed {}", entry.full_path());
                }
                Some(ChangeEvent::Rescan) => println!("rescan"),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    fs.close().await;
    tracing::info!("stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_filter_covers_kernel() {
        let filter = log_filter().unwrap().to_string();
        assert!(filter.contains("vfsync_kernel=info"), "{filter}");
        assert!(filter.contains("vfsync=info"), "{filter}");
    }

    #[test]
    fn test_args_parse() {
        let args = Args::try_parse_from(["vfsync", "--root", "/tmp", "mv", "/a", "/b"]).unwrap();
        assert_eq!(args.root, PathBuf::from("/tmp"));
        assert!(matches!(args.command, Command::Mv { .. }));
    }
}
