//! Entry identity, operations and watch behavior over the in-memory and
//! scripted backends.

use std::sync::Arc;

use rstest::rstest;
use tokio::sync::oneshot;
use vfsync_kernel::{
    Backend, ChangeEvent, Directory, Entry, File, FileSystem, FsConfig, FsError, MemoryBackend,
    Stats, WatchFilter, WriteOptions,
};
use vfsync_testutil::{Recorder, ScriptedBackend, settle};

async fn write(file: &File, data: &str, options: WriteOptions) -> Result<Stats, FsError> {
    let (tx, rx) = oneshot::channel();
    file.write(data, options, move |r| {
        let _ = tx.send(r);
    })
    .await;
    rx.await.expect("write callback never ran")
}

async fn rename(entry: &Entry, to: &str) -> Result<(), FsError> {
    let (tx, rx) = oneshot::channel();
    entry
        .rename(to, move |r| {
            let _ = tx.send(r);
        })
        .await;
    rx.await.expect("rename callback never ran")
}

async fn unlink(entry: &Entry) -> Result<(), FsError> {
    let (tx, rx) = oneshot::channel();
    entry
        .unlink(move |r| {
            let _ = tx.send(r);
        })
        .await;
    rx.await.expect("unlink callback never ran")
}

async fn create(dir: &Directory) -> Result<Stats, FsError> {
    let (tx, rx) = oneshot::channel();
    dir.create(move |r| {
        let _ = tx.send(r);
    })
    .await;
    rx.await.expect("create callback never ran")
}

fn record_changes(fs: &FileSystem) -> Recorder {
    let rec = Recorder::new();
    let log = rec.clone();
    fs.subscribe(move |event| match event {
        ChangeEvent::Changed { entry, .. } => log.push(entry.full_path()),
        ChangeEvent::Rescan => log.push("rescan"),
    });
    rec
}

async fn watch_root(fs: &FileSystem, filter: Option<WatchFilter>) {
    let root = fs.directory_for_path("/").unwrap();
    fs.watch(&root, filter).await.unwrap();
}

// ============================================================================
// Identity
// ============================================================================

#[tokio::test]
async fn test_same_path_same_entry() {
    let fs = FileSystem::new(Arc::new(MemoryBackend::new())).await;
    let a = fs.file_for_path("/src/main.rs").unwrap();
    let b = fs.file_for_path("//src/../src//main.rs").unwrap();
    let c = fs.file_for_path("/src/main.rs/").unwrap();
    assert_eq!(a, b);
    assert_eq!(a, c);
    assert_eq!(fs.cached_entries(), 1);
}

#[tokio::test]
async fn test_file_and_directory_are_distinct_entries() {
    let fs = FileSystem::new(Arc::new(MemoryBackend::new())).await;
    let file = fs.file_for_path("/thing").unwrap();
    let dir = fs.directory_for_path("/thing").unwrap();
    assert_eq!(file.full_path(), "/thing");
    assert_eq!(dir.full_path(), "/thing/");
    assert_ne!(file.to_entry(), dir.to_entry());
}

#[rstest]
#[case::escapes_root("/..")]
#[case::relative("foo/bar")]
#[case::file_at_root("/")]
#[tokio::test]
async fn test_invalid_file_paths(#[case] path: &str) {
    let fs = FileSystem::new(Arc::new(MemoryBackend::new())).await;
    let err = fs.file_for_path(path).unwrap_err();
    assert!(matches!(err, FsError::InvalidPath(_)), "{path}: {err:?}");
}

#[tokio::test]
async fn test_rename_file_keeps_identity() {
    let fs = FileSystem::new(Arc::new(MemoryBackend::new())).await;
    let file = fs.file_for_path("/a.txt").unwrap();
    write(&file, "hello", WriteOptions::default()).await.unwrap();

    rename(&file.to_entry(), "/b.txt").await.unwrap();

    assert_eq!(file.full_path(), "/b.txt");
    assert_eq!(fs.file_for_path("/b.txt").unwrap(), file);
    assert_ne!(fs.file_for_path("/a.txt").unwrap(), file);
    assert_eq!(file.read_as_text().await.unwrap(), "hello");
}

#[tokio::test]
async fn test_rename_directory_moves_descendants() {
    let fs = FileSystem::new(Arc::new(MemoryBackend::new())).await;
    let main = fs.file_for_path("/src/main.rs").unwrap();
    let tool = fs.file_for_path("/src/bin/tool.rs").unwrap();
    write(&main, "fn main() {}", WriteOptions::default()).await.unwrap();
    write(&tool, "fn main() {}", WriteOptions::default()).await.unwrap();
    let src = fs.directory_for_path("/src").unwrap();
    let bin = fs.directory_for_path("/src/bin").unwrap();

    rename(&src.to_entry(), "/lib").await.unwrap();

    assert_eq!(src.full_path(), "/lib/");
    assert_eq!(bin.full_path(), "/lib/bin/");
    assert_eq!(main.full_path(), "/lib/main.rs");
    assert_eq!(tool.full_path(), "/lib/bin/tool.rs");
    assert_eq!(fs.file_for_path("/lib/bin/tool.rs").unwrap(), tool);
    assert!(tool.exists().await.unwrap());
}

#[tokio::test]
async fn test_rename_callback_sees_new_path() {
    let fs = FileSystem::new(Arc::new(MemoryBackend::new())).await;
    let file = fs.file_for_path("/a").unwrap();
    write(&file, "x", WriteOptions::default()).await.unwrap();

    let seen = Recorder::new();
    let log = seen.clone();
    let handle = file.clone();
    file.rename("/b", move |r| {
        r.unwrap();
        log.push(handle.full_path());
    })
    .await;
    assert_eq!(seen.entries(), vec!["/b"]);
}

// ============================================================================
// Operations
// ============================================================================

#[tokio::test]
async fn test_rename_missing_source_is_not_found() {
    let fs = FileSystem::new(Arc::new(MemoryBackend::new())).await;
    let file = fs.file_for_path("/nope").unwrap();
    let err = rename(&file.to_entry(), "/elsewhere").await.unwrap_err();
    assert!(err.is_not_found(), "{err:?}");
    assert_eq!(file.full_path(), "/nope");
}

#[tokio::test]
async fn test_rename_onto_existing_is_already_exists() {
    let fs = FileSystem::new(Arc::new(MemoryBackend::new())).await;
    let a = fs.file_for_path("/a").unwrap();
    let b = fs.file_for_path("/b").unwrap();
    write(&a, "a", WriteOptions::default()).await.unwrap();
    write(&b, "b", WriteOptions::default()).await.unwrap();

    let err = rename(&a.to_entry(), "/b").await.unwrap_err();
    assert!(err.is_already_exists(), "{err:?}");
    assert_eq!(a.full_path(), "/a");
    assert_eq!(b.read_as_text().await.unwrap(), "b");
}

#[tokio::test]
async fn test_rename_to_invalid_path_reports_through_callback() {
    let fs = FileSystem::new(Arc::new(MemoryBackend::new())).await;
    let a = fs.file_for_path("/a").unwrap();
    let err = rename(&a.to_entry(), "/../x").await.unwrap_err();
    assert!(matches!(err, FsError::InvalidPath(_)));
}

#[tokio::test]
async fn test_external_modification_blocks_write() {
    let backend = Arc::new(MemoryBackend::new());
    let fs = FileSystem::new(backend.clone()).await;
    let file = fs.file_for_path("/notes.txt").unwrap();
    write(&file, "v1", WriteOptions::default()).await.unwrap();

    backend.touch_external("/notes.txt", b"someone else").await.unwrap();

    let err = write(&file, "v2", WriteOptions::default()).await.unwrap_err();
    assert!(matches!(err, FsError::ContentsModified(_)), "{err:?}");
    assert_eq!(file.read_as_text().await.unwrap(), "someone else");

    // Reading resynchronizes, so the next write goes through.
    write(&file, "v3", WriteOptions::default()).await.unwrap();
    assert_eq!(file.read_as_text().await.unwrap(), "v3");
}

#[tokio::test]
async fn test_blind_write_ignores_external_modification() {
    let backend = Arc::new(MemoryBackend::new());
    let fs = FileSystem::new(backend.clone()).await;
    let file = fs.file_for_path("/notes.txt").unwrap();
    write(&file, "v1", WriteOptions::default()).await.unwrap();
    backend.touch_external("/notes.txt", b"someone else").await.unwrap();

    write(&file, "mine", WriteOptions::blind()).await.unwrap();
    assert_eq!(file.read_as_text().await.unwrap(), "mine");
}

#[tokio::test]
async fn test_write_with_expected_stats() {
    let backend = Arc::new(MemoryBackend::new());
    let fs = FileSystem::new(backend.clone()).await;
    let file = fs.file_for_path("/f").unwrap();
    let stale = write(&file, "one", WriteOptions::default()).await.unwrap();
    backend.touch_external("/f", b"three").await.unwrap();
    let current = backend.stat("/f").await.unwrap();

    let options = WriteOptions {
        blind: false,
        expected: Some(stale),
    };
    assert!(write(&file, "x", options).await.is_err());

    let options = WriteOptions {
        blind: false,
        expected: Some(current),
    };
    write(&file, "four", options).await.unwrap();
}

#[tokio::test]
async fn test_read_as_text_rejects_invalid_utf8() {
    let backend = ScriptedBackend::new();
    backend.seed("/bin", &[0xff, 0xfe, 0x00]).await;
    let fs = FileSystem::new(backend.clone()).await;
    let file = fs.file_for_path("/bin").unwrap();

    let err = file.read_as_text().await.unwrap_err();
    assert!(matches!(err, FsError::UnsupportedEncoding(_)));
    let (bytes, stats) = file.read().await.unwrap();
    assert_eq!(bytes.len(), 3);
    assert_eq!(stats.size, 3);
}

#[tokio::test]
async fn test_reading_a_directory_as_file_fails() {
    let backend = ScriptedBackend::new();
    backend.seed_dir("/d").await;
    let fs = FileSystem::new(backend.clone()).await;
    let err = fs.file_for_path("/d").unwrap().read().await.unwrap_err();
    assert!(matches!(err, FsError::NotAFile(_)), "{err:?}");
}

#[tokio::test]
async fn test_create_and_unlink_directory() {
    let fs = FileSystem::new(Arc::new(MemoryBackend::new())).await;
    let dir = fs.directory_for_path("/work").unwrap();
    assert!(!dir.exists().await.unwrap());

    let stats = create(&dir).await.unwrap();
    assert!(stats.is_dir());
    assert!(dir.exists().await.unwrap());
    assert!(create(&dir).await.unwrap_err().is_already_exists());

    let inner = fs.file_for_path("/work/x").unwrap();
    write(&inner, "x", WriteOptions::default()).await.unwrap();

    unlink(&dir.to_entry()).await.unwrap();
    assert!(!dir.exists().await.unwrap());
    assert!(!inner.exists().await.unwrap());
    assert!(dir.cached_stats().is_none());
}

#[tokio::test]
async fn test_resolve_picks_kind_from_backend() {
    let backend = ScriptedBackend::new();
    backend.seed_dir("/d").await;
    backend.seed("/f", b"x").await;
    let fs = FileSystem::new(backend.clone()).await;

    let dir = fs.resolve("/d").await.unwrap();
    assert!(dir.is_directory());
    assert_eq!(dir.full_path(), "/d/");
    assert_eq!(dir.as_directory(), Some(&fs.directory_for_path("/d").unwrap()));

    let file = fs.resolve("/f").await.unwrap();
    assert!(file.is_file());
    assert_eq!(file.cached_stats().map(|s| s.size), Some(1));

    assert!(fs.resolve("/missing").await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_operations_after_drop_are_closed() {
    let fs = FileSystem::new(Arc::new(MemoryBackend::new())).await;
    let file = fs.file_for_path("/a").unwrap();
    drop(fs);

    assert!(matches!(file.read().await, Err(FsError::Closed)));
    let err = write(&file, "x", WriteOptions::default()).await.unwrap_err();
    assert!(matches!(err, FsError::Closed));
}

// ============================================================================
// Listings
// ============================================================================

#[tokio::test]
async fn test_get_contents_returns_cached_entries() {
    let backend = ScriptedBackend::new();
    backend.seed("/d/a", b"a").await;
    backend.seed_dir("/d/sub").await;
    let fs = FileSystem::new(backend.clone()).await;
    let a = fs.file_for_path("/d/a").unwrap();

    let dir = fs.directory_for_path("/d").unwrap();
    let contents = dir.get_contents().await.unwrap();
    assert_eq!(contents.len(), 2);
    assert_eq!(contents[0], a.to_entry());
    assert!(contents[1].is_directory());
    assert_eq!(contents[1].full_path(), "/d/sub/");
}

#[tokio::test]
async fn test_watched_listing_is_cached_until_change() {
    let backend = ScriptedBackend::new();
    backend.seed("/d/a", b"a").await;
    let fs = FileSystem::new(backend.clone()).await;
    watch_root(&fs, None).await;
    let dir = fs.directory_for_path("/d").unwrap();

    assert_eq!(dir.get_contents().await.unwrap().len(), 1);
    backend.seed("/d/b", b"b").await;
    assert_eq!(dir.get_contents().await.unwrap().len(), 1, "listing not cached");

    backend.notify("/d/");
    settle().await;
    assert_eq!(dir.get_contents().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_unwatched_listing_is_not_cached() {
    let backend = ScriptedBackend::new();
    backend.seed("/d/a", b"a").await;
    let fs = FileSystem::new(backend.clone()).await;
    let dir = fs.directory_for_path("/d").unwrap();

    assert_eq!(dir.get_contents().await.unwrap().len(), 1);
    backend.seed("/d/b", b"b").await;
    assert_eq!(dir.get_contents().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_listing_cache_disabled_by_config() {
    let backend = ScriptedBackend::new();
    backend.seed("/d/a", b"a").await;
    let config = FsConfig {
        cache_contents: false,
        ..FsConfig::default()
    };
    let fs = FileSystem::with_config(backend.clone(), config).await;
    watch_root(&fs, None).await;
    let dir = fs.directory_for_path("/d").unwrap();

    dir.get_contents().await.unwrap();
    backend.seed("/d/b", b"b").await;
    assert_eq!(dir.get_contents().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_write_of_new_file_refreshes_parent_listing() {
    let backend = ScriptedBackend::new();
    backend.seed("/d/x", b"x").await;
    let fs = FileSystem::new(backend.clone()).await;
    watch_root(&fs, None).await;
    let dir = fs.directory_for_path("/d").unwrap();
    assert_eq!(dir.get_contents().await.unwrap().len(), 1);

    // No watcher notification follows; the write alone must drop the listing.
    let file = fs.file_for_path("/d/new").unwrap();
    write(&file, "new", WriteOptions::default()).await.unwrap();

    let contents = dir.get_contents().await.unwrap();
    assert_eq!(contents.len(), 2);
    assert!(contents.contains(&file.to_entry()));
}

#[tokio::test]
async fn test_listing_not_cached_when_watching_disabled() {
    let backend = Arc::new(MemoryBackend::new());
    let config = FsConfig {
        watch_enabled: false,
        ..FsConfig::default()
    };
    let fs = FileSystem::with_config(backend.clone(), config).await;
    watch_root(&fs, None).await;
    let root = fs.directory_for_path("/").unwrap();

    backend.touch_external("/a", b"a").await.unwrap();
    assert_eq!(root.get_contents().await.unwrap().len(), 1);

    backend.touch_external("/b", b"b").await.unwrap();
    assert_eq!(root.get_contents().await.unwrap().len(), 2);
}

// ============================================================================
// Watches
// ============================================================================

#[tokio::test]
async fn test_changes_outside_watched_roots_are_dropped() {
    let backend = ScriptedBackend::new();
    let fs = FileSystem::new(backend.clone()).await;
    let rec = record_changes(&fs);
    let project = fs.directory_for_path("/project").unwrap();
    fs.watch(&project, None).await.unwrap();
    assert_eq!(backend.watched_roots(), vec!["/project/"]);

    backend.notify("/elsewhere/file");
    backend.notify("/project/file");
    settle().await;
    assert_eq!(rec.entries(), vec!["/project/file"]);
}

#[tokio::test]
async fn test_watch_filter_hides_subtrees() {
    let backend = ScriptedBackend::new();
    backend.seed("/src/lib.rs", b"").await;
    backend.seed("/.git/HEAD", b"").await;
    let fs = FileSystem::new(backend.clone()).await;
    let rec = record_changes(&fs);
    let filter: WatchFilter = Arc::new(|name, _parent| !name.starts_with('.'));
    watch_root(&fs, Some(filter)).await;

    backend.notify("/.git/HEAD");
    backend.notify("/src/.hidden");
    backend.notify("/src/lib.rs");
    settle().await;
    assert_eq!(rec.entries(), vec!["/src/lib.rs"]);

    let root = fs.directory_for_path("/").unwrap();
    let names: Vec<String> = root
        .get_contents()
        .await
        .unwrap()
        .iter()
        .map(Entry::name)
        .collect();
    assert_eq!(names, vec!["src"]);
}

#[tokio::test]
async fn test_filter_receives_parent_path() {
    let backend = ScriptedBackend::new();
    let fs = FileSystem::new(backend.clone()).await;
    let rec = record_changes(&fs);
    let filter: WatchFilter = Arc::new(|name, parent| !(parent == "/build/" && name == "out"));
    watch_root(&fs, Some(filter)).await;

    backend.notify("/build/out");
    backend.notify("/out");
    settle().await;
    assert_eq!(rec.entries(), vec!["/out"]);
}

#[tokio::test]
async fn test_watch_twice_and_unwatch_unknown() {
    let backend = ScriptedBackend::new();
    let fs = FileSystem::new(backend.clone()).await;
    let root = fs.directory_for_path("/").unwrap();

    fs.watch(&root, None).await.unwrap();
    assert!(matches!(
        fs.watch(&root, None).await,
        Err(FsError::AlreadyWatched(_))
    ));

    fs.unwatch(&root).await.unwrap();
    assert!(backend.watched_roots().is_empty());
    assert!(matches!(fs.unwatch(&root).await, Err(FsError::NotWatched(_))));
}

#[tokio::test]
async fn test_unwatch_stops_events() {
    let backend = ScriptedBackend::new();
    let fs = FileSystem::new(backend.clone()).await;
    let rec = record_changes(&fs);
    let root = fs.directory_for_path("/").unwrap();
    fs.watch(&root, None).await.unwrap();

    backend.notify("/a");
    settle().await;
    fs.unwatch(&root).await.unwrap();
    backend.notify("/b");
    settle().await;

    assert_eq!(rec.entries(), vec!["/a"]);
}

#[tokio::test]
async fn test_rescan_clears_listings_and_is_broadcast() {
    let backend = ScriptedBackend::new();
    backend.seed("/d/a", b"a").await;
    let fs = FileSystem::new(backend.clone()).await;
    let rec = record_changes(&fs);
    watch_root(&fs, None).await;
    let dir = fs.directory_for_path("/d").unwrap();
    dir.get_contents().await.unwrap();

    backend.seed("/d/b", b"b").await;
    backend.notify_rescan();
    settle().await;

    assert_eq!(rec.entries(), vec!["rescan"]);
    assert_eq!(dir.get_contents().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_change_event_carries_stats_and_entry() {
    let backend = ScriptedBackend::new();
    let fs = FileSystem::new(backend.clone()).await;
    let (_id, mut events) = fs.change_stream();
    watch_root(&fs, None).await;
    let file = fs.file_for_path("/f").unwrap();

    backend.notify_with_stats("/f", Stats::file(42, None));
    match events.recv().await {
        Some(ChangeEvent::Changed { entry, stats }) => {
            assert_eq!(entry.as_file(), Some(&file));
            assert_eq!(stats.map(|s| s.size), Some(42));
        }
        other => panic!("expected change, got {other:?}"),
    }
    assert_eq!(file.cached_stats().map(|s| s.size), Some(42));
}

#[tokio::test]
async fn test_notification_with_directory_stats_resolves_directory() {
    let backend = ScriptedBackend::new();
    let fs = FileSystem::new(backend.clone()).await;
    let rec = record_changes(&fs);
    watch_root(&fs, None).await;

    backend.notify_with_stats("/d", Stats::directory(None));
    settle().await;
    assert_eq!(rec.entries(), vec!["/d/"]);
}

#[tokio::test]
async fn test_removed_directory_without_separator_resolves_cached_directory() {
    let backend = ScriptedBackend::new();
    let fs = FileSystem::new(backend.clone()).await;
    watch_root(&fs, None).await;
    let dir = fs.directory_for_path("/d").unwrap();

    let (_id, mut events) = fs.change_stream();
    backend.notify("/d");
    settle().await;
    match events.try_recv() {
        Ok(ChangeEvent::Changed { entry, stats }) => {
            assert_eq!(entry, dir.to_entry());
            assert!(entry.is_directory());
            assert!(stats.is_none());
        }
        other => panic!("expected change, got {other:?}"),
    }
}

#[tokio::test]
async fn test_bare_path_prefers_cached_file() {
    let backend = ScriptedBackend::new();
    let fs = FileSystem::new(backend.clone()).await;
    let rec = record_changes(&fs);
    watch_root(&fs, None).await;
    let _file = fs.file_for_path("/d").unwrap();

    backend.notify("/d");
    settle().await;
    assert_eq!(rec.entries(), vec!["/d"]);
}

#[tokio::test]
async fn test_unsubscribe() {
    let backend = ScriptedBackend::new();
    let fs = FileSystem::new(backend.clone()).await;
    watch_root(&fs, None).await;
    let rec = Recorder::new();
    let log = rec.clone();
    let id = fs.subscribe(move |_| log.push("event"));

    backend.notify("/a");
    settle().await;
    assert!(fs.unsubscribe(id));
    assert!(!fs.unsubscribe(id));
    backend.notify("/a");
    settle().await;
    assert_eq!(rec.count("event"), 1);
}

#[tokio::test]
async fn test_memory_backend_changes_reach_listeners() {
    let backend = Arc::new(MemoryBackend::new());
    let fs = FileSystem::new(backend.clone()).await;
    let rec = record_changes(&fs);
    watch_root(&fs, None).await;

    backend.touch_external("/x/y.txt", b"hi").await.unwrap();
    settle().await;

    assert_eq!(rec.count("/x/y.txt"), 1);
    assert_eq!(rec.count("/x/"), 1);
}

#[tokio::test]
async fn test_close_stops_watching() {
    let backend = ScriptedBackend::new();
    let fs = FileSystem::new(backend.clone()).await;
    watch_root(&fs, None).await;
    assert!(fs.is_watching());

    fs.close().await;
    assert!(!fs.is_watching());
    assert!(backend.watched_roots().is_empty());
}
