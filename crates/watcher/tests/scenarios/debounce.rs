use crate::common::{channel_dispatch, MockBackend};
use sentinel_watcher::{Event, Notification, Watch, WatchConfig};
use std::time::{Duration, Instant};

#[test]
fn test_burst_coalesces_into_one_delivery() {
    let mock = MockBackend::new();
    let (dispatch, rx) = channel_dispatch();
    let watch =
        Watch::with_factory("/w", WatchConfig::with_debounce_ms(50), dispatch, mock.factory())
            .unwrap();
    watch.start().unwrap().wait().unwrap();
    let _ = rx.try_recv();

    // An empty poll opens the window at t0
    let t0 = Instant::now();
    assert_eq!(watch.poll_for_events(t0), Duration::from_millis(50));

    mock.push(Event::created("/w", "a"));
    mock.push(Event::modified("/w", "a"));
    assert_eq!(
        watch.poll_for_events(t0 + Duration::from_millis(20)),
        Duration::from_millis(30)
    );
    mock.push(Event::created("/w", "b"));
    assert!(rx.try_recv().is_err());

    assert_eq!(
        watch.poll_for_events(t0 + Duration::from_millis(50)),
        Duration::from_millis(50)
    );

    let deliveries: Vec<_> = rx.try_iter().collect();
    assert_eq!(deliveries.len(), 1);
    match &deliveries[0] {
        Notification::Events { events, .. } => assert_eq!(
            events,
            &vec![
                Event::created("/w", "a"),
                Event::modified("/w", "a"),
                Event::created("/w", "b"),
            ]
        ),
        other => panic!("expected events, got {:?}", other),
    }
}

#[test]
fn test_deliveries_are_at_least_an_interval_apart() {
    let mock = MockBackend::new();
    let (dispatch, rx) = channel_dispatch();
    let watch =
        Watch::with_factory("/w", WatchConfig::with_debounce_ms(100), dispatch, mock.factory())
            .unwrap();
    watch.start().unwrap().wait().unwrap();
    let _ = rx.try_recv();

    let t0 = Instant::now();
    let mut delivered_at = Vec::new();
    for step in 0..50u64 {
        let now = t0 + Duration::from_millis(step * 10);
        mock.push(Event::modified("/w", format!("f{}", step)));
        watch.poll_for_events(now);
        if rx.try_recv().is_ok() {
            delivered_at.push(step * 10);
        }
    }

    assert!(delivered_at.len() >= 4);
    for pair in delivered_at.windows(2) {
        assert!(pair[1] - pair[0] >= 100);
    }
}
