use crate::common::{channel_dispatch, MockBackend};
use sentinel_watcher::{Notification, Watch, WatchConfig, WatchError, WatchState};
use std::time::Duration;

#[test]
fn test_lifecycle_guards() {
    let mock = MockBackend::new();
    let (dispatch, rx) = channel_dispatch();
    let watch = Watch::with_factory("/w", WatchConfig::default(), dispatch, mock.factory()).unwrap();

    assert_eq!(watch.state(), WatchState::Idle);
    assert_eq!(watch.stop().unwrap_err(), WatchError::NotRunning);

    let started = watch.start().unwrap();
    // A second start while the first is in flight or done is rejected
    assert_eq!(watch.start().unwrap_err(), WatchError::AlreadyRunning);
    assert_eq!(started.wait(), Ok(()));
    assert_eq!(watch.state(), WatchState::Running);
    assert_eq!(mock.activations(), 1);

    let stopped = watch.stop().unwrap();
    assert_eq!(stopped.wait(), Ok(()));
    assert_eq!(watch.state(), WatchState::Stopped);
    assert_eq!(mock.deactivations(), 1);
    assert_eq!(watch.stop().unwrap_err(), WatchError::NotRunning);

    let results: Vec<_> = rx.try_iter().collect();
    assert!(matches!(results[0], Notification::Started { result: Ok(()), .. }));
    assert!(matches!(results[1], Notification::Stopped { result: Ok(()), .. }));
    assert!(results.iter().all(|n| n.watch() == watch.id()));
}

#[test]
fn test_start_failure_is_reported_once() {
    let mock = MockBackend::new();
    mock.refuse(true);
    let (dispatch, rx) = channel_dispatch();
    let watch = Watch::with_factory("/w", WatchConfig::default(), dispatch, mock.factory()).unwrap();

    let result = watch.start().unwrap().wait();
    assert_eq!(
        result,
        Err(WatchError::StartFailure("access denied".to_string()))
    );
    assert_eq!(
        result.unwrap_err().to_string(),
        "Unable to start watching that directory: access denied"
    );
    assert_eq!(watch.state(), WatchState::Stopped);

    let results: Vec<_> = rx.try_iter().collect();
    assert_eq!(results.len(), 1);

    // The failed backend was discarded; a retry builds a new one
    mock.refuse(false);
    watch.start().unwrap().wait().unwrap();
    assert_eq!(mock.activations(), 2);
    assert_eq!(watch.state(), WatchState::Running);
}

#[test]
fn test_completion_wait_timeout() {
    let mock = MockBackend::new();
    let (dispatch, _rx) = channel_dispatch();
    let watch = Watch::with_factory("/w", WatchConfig::default(), dispatch, mock.factory()).unwrap();

    let completion = watch.start().unwrap();
    let result = completion.wait_timeout(Duration::from_secs(5));
    assert_eq!(result, Some(Ok(())));
}

#[test]
fn test_misuse_messages() {
    assert_eq!(
        WatchError::AlreadyRunning.to_string(),
        "This watch cannot be started, because it is already running."
    );
    assert_eq!(
        WatchError::NotRunning.to_string(),
        "This watch cannot be stopped, because it is not running."
    );
}
