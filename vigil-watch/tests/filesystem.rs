use std::fs;
use std::time::Duration;

use tempfile::TempDir;
use tokio::time::timeout;

use vigil_core::{
    DrainPolicy, EventKind, Interest, SourceMode, WatchEvent, WatchTarget, WatcherConfig,
};
use vigil_watch::{WatchStream, Watcher};

const WAIT: Duration = Duration::from_secs(5);

fn config(mode: SourceMode) -> WatcherConfig {
    WatcherConfig {
        mode,
        debounce_ms: 0,
        poll_interval_ms: 20,
        drain: DrainPolicy::Discard,
        ..WatcherConfig::default()
    }
}

async fn next_of(stream: &mut WatchStream, kind: EventKind) -> WatchEvent {
    loop {
        let event = timeout(WAIT, stream.next())
            .await
            .expect("event before timeout")
            .expect("stream open");
        if event.kind == kind {
            return event;
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn poll_source_reports_create_and_gone() {
    let dir = TempDir::new().expect("tempdir");
    let watched = dir.path().join("watched");
    fs::create_dir(&watched).expect("create watched dir");

    let mut watcher = Watcher::new(config(SourceMode::Poll));
    let mut stream = watcher
        .watch(&[WatchTarget::new(&watched)])
        .expect("watch");

    fs::write(watched.join("new.txt"), "hello").expect("write");
    let created = next_of(&mut stream, EventKind::Create).await;
    assert_eq!(created.path, watched.join("new.txt"));
    assert_eq!(created.target, watched);

    fs::remove_dir_all(&watched).expect("remove watched dir");
    let gone = next_of(&mut stream, EventKind::Gone).await;
    assert_eq!(gone.path, watched);

    let end = timeout(WAIT, stream.next()).await.expect("stream ends");
    assert!(end.is_none());
    watcher.stop().await;
}

/// Swallow events until the stream has been quiet for a moment.
async fn settle(stream: &mut WatchStream) {
    while let Ok(Some(_)) = timeout(Duration::from_millis(300), stream.next()).await {}
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn poll_source_pairs_a_move_into_rename_halves() {
    let dir = TempDir::new().expect("tempdir");
    fs::write(dir.path().join("draft.txt"), "body").expect("write");

    let mut watcher = Watcher::new(config(SourceMode::Poll));
    let mut stream = watcher
        .watch(&[WatchTarget::new(dir.path()).with_events([Interest::Rename])])
        .expect("watch");

    fs::rename(dir.path().join("draft.txt"), dir.path().join("final.txt")).expect("rename");
    let from = next_of(&mut stream, EventKind::Delete).await;
    let to = next_of(&mut stream, EventKind::Create).await;
    assert_eq!(from.path, dir.path().join("draft.txt"));
    assert_eq!(to.path, dir.path().join("final.txt"));
    assert!(from.renamed && to.renamed);

    watcher.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn missing_target_fails_with_no_usable_targets() {
    let dir = TempDir::new().expect("tempdir");
    let mut watcher = Watcher::new(config(SourceMode::Poll));
    let result = watcher.watch(&[WatchTarget::new(dir.path().join("absent"))]);
    assert!(matches!(result, Err(vigil_watch::WatchError::NoUsableTargets)));
    assert_eq!(watcher.failures().len(), 1);
}

#[cfg(target_os = "linux")]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn native_source_reports_file_changes() {
    let dir = TempDir::new().expect("tempdir");
    let mut watcher = Watcher::new(config(SourceMode::Native));
    let mut stream = watcher
        .watch(&[WatchTarget::new(dir.path())])
        .expect("native watch");

    let file = dir.path().join("native.txt");
    fs::write(&file, "one").expect("write");
    let created = next_of(&mut stream, EventKind::Create).await;
    assert_eq!(created.path, file);

    fs::rename(&file, dir.path().join("renamed.txt")).expect("rename");
    let from = next_of(&mut stream, EventKind::Delete).await;
    let to = next_of(&mut stream, EventKind::Create).await;
    assert!(from.renamed && to.renamed);
    assert_eq!(to.path, dir.path().join("renamed.txt"));

    watcher.stop().await;
}

#[cfg(target_os = "linux")]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn native_source_keeps_watching_a_file_saved_through_rename() {
    let dir = TempDir::new().expect("tempdir");
    let file = dir.path().join("config.yaml");
    fs::write(&file, "a").expect("write");

    let mut watcher = Watcher::new(config(SourceMode::Native));
    let mut stream = watcher
        .watch(&[WatchTarget::new(&file)])
        .expect("native watch");

    let staged = dir.path().join(".config.yaml.tmp");
    fs::write(&staged, "b").expect("write staged copy");
    fs::rename(&staged, &file).expect("replace");
    let replaced = next_of(&mut stream, EventKind::Modify).await;
    assert_eq!(replaced.path, file);
    settle(&mut stream).await;

    fs::write(&file, "c").expect("write replacement");
    let later = next_of(&mut stream, EventKind::Modify).await;
    assert_eq!(later.path, file);

    watcher.stop().await;
}

#[cfg(target_os = "linux")]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn native_source_keeps_other_targets_after_one_is_gone() {
    let dir = TempDir::new().expect("tempdir");
    let first = dir.path().join("a");
    let second = dir.path().join("b");
    fs::create_dir(&first).expect("mkdir a");
    fs::create_dir(&second).expect("mkdir b");

    let mut watcher = Watcher::new(config(SourceMode::Native));
    let mut stream = watcher
        .watch(&[WatchTarget::new(&first), WatchTarget::new(&second)])
        .expect("native watch");

    fs::remove_dir(&first).expect("rmdir a");
    let gone = next_of(&mut stream, EventKind::Gone).await;
    assert_eq!(gone.path, first);

    fs::write(second.join("x"), "x").expect("write");
    let created = next_of(&mut stream, EventKind::Create).await;
    assert_eq!(created.path, second.join("x"));
    assert_eq!(created.target, second);

    watcher.stop().await;
}
