use crate::common::{channel_dispatch, collect_until};
use sentinel_watcher::{EventKind, Notification, Pool, PoolConfig, Watch, WatchConfig};
use std::time::Duration;
use tempfile::TempDir;

fn saw_created(received: &[Notification], name: &str) -> bool {
    received.iter().any(|n| match n {
        Notification::Events { events, .. } => events
            .iter()
            .any(|e| e.kind() != EventKind::Deleted && e.name() == name),
        _ => false,
    })
}

#[test]
fn test_native_backend_sees_new_file() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path().canonicalize().unwrap();

    let pool = Pool::new(&PoolConfig::default()).unwrap();
    let (dispatch, rx) = channel_dispatch();
    let watch = Watch::new(&root, WatchConfig::with_debounce_ms(50), dispatch).unwrap();
    pool.register(&watch);
    watch.start().unwrap().wait().unwrap();

    std::fs::write(root.join("fresh.txt"), b"hello").unwrap();

    let received = collect_until(&rx, Duration::from_secs(10), |r| saw_created(r, "fresh.txt"));
    assert!(saw_created(&received, "fresh.txt"), "got {:?}", received);

    watch.stop().unwrap().wait().unwrap();
}

#[test]
fn test_missing_root_fails_to_start() {
    let temp_dir = TempDir::new().unwrap();
    let (dispatch, _rx) = channel_dispatch();
    let watch = Watch::new(
        temp_dir.path().join("does-not-exist"),
        WatchConfig::default(),
        dispatch,
    )
    .unwrap();

    let result = watch.start().unwrap().wait();
    assert!(matches!(
        result,
        Err(sentinel_watcher::WatchError::StartFailure(_))
    ));
}
