use crate::common::{channel_dispatch, MockBackend};
use sentinel_watcher::{Event, Notification, Watch, WatchConfig, WatchState};
use std::time::{Duration, Instant};

#[test]
fn test_overflow_is_delivered_once_then_silence() {
    let mock = MockBackend::new();
    let (dispatch, rx) = channel_dispatch();
    let watch =
        Watch::with_factory("/w", WatchConfig::with_debounce_ms(10), dispatch, mock.factory())
            .unwrap();
    watch.start().unwrap().wait().unwrap();
    let _ = rx.try_recv();

    mock.fail("Buffer filled up and service needs a restart");
    mock.push(Event::created("/w", "after-overflow"));

    let t0 = Instant::now();
    for step in 0..10u64 {
        let delay = watch.poll_for_events(t0 + Duration::from_millis(step * 20));
        assert_eq!(delay, Duration::from_millis(50));
    }

    let received: Vec<_> = rx.try_iter().collect();
    assert_eq!(received.len(), 1);
    assert!(matches!(
        &received[0],
        Notification::Error { message, .. }
            if message == "Buffer filled up and service needs a restart"
    ));
    assert_eq!(watch.state(), WatchState::Errored);

    // The backend is reclaimed by an explicit stop
    assert_eq!(mock.deactivations(), 0);
    watch.stop().unwrap().wait().unwrap();
    assert_eq!(mock.deactivations(), 1);
    assert_eq!(watch.state(), WatchState::Stopped);
}

#[test]
fn test_dropping_a_running_watch_releases_its_backend() {
    let mock = MockBackend::new();
    let (dispatch, _rx) = channel_dispatch();
    let watch = Watch::with_factory("/w", WatchConfig::default(), dispatch, mock.factory()).unwrap();
    watch.start().unwrap().wait().unwrap();

    drop(watch);
    assert_eq!(mock.deactivations(), 1);
}
