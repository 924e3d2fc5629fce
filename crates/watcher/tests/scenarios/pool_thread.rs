use crate::common::{channel_dispatch, collect_for, collect_until, MockBackend};
use sentinel_watcher::{Event, Notification, Pool, PoolConfig, Watch, WatchConfig, WatchId};
use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn has_events(received: &[Notification]) -> bool {
    received
        .iter()
        .any(|n| matches!(n, Notification::Events { .. }))
}

#[test]
fn test_pool_polls_registered_watches() {
    let pool = Pool::new(&PoolConfig::default()).unwrap();
    let mock = MockBackend::new();
    let (dispatch, rx) = channel_dispatch();
    let watch =
        Watch::with_factory("/w", WatchConfig::with_debounce_ms(20), dispatch, mock.factory())
            .unwrap();

    pool.register(&watch);
    watch.start().unwrap().wait().unwrap();
    mock.push(Event::created("/w", "a.txt"));

    let received = collect_until(&rx, Duration::from_secs(5), has_events);
    let events: Vec<_> = received
        .iter()
        .filter_map(|n| match n {
            Notification::Events { events, .. } => Some(events.clone()),
            _ => None,
        })
        .flatten()
        .collect();
    assert_eq!(events, vec![Event::created("/w", "a.txt")]);
}

#[test]
fn test_nothing_after_stop_result() {
    let pool = Pool::new(&PoolConfig::default()).unwrap();
    let mock = MockBackend::new();
    let (dispatch, rx) = channel_dispatch();
    let watch =
        Watch::with_factory("/w", WatchConfig::with_debounce_ms(10), dispatch, mock.factory())
            .unwrap();
    pool.register(&watch);
    watch.start().unwrap().wait().unwrap();

    watch.stop().unwrap().wait().unwrap();
    mock.push(Event::created("/w", "late"));

    let received = collect_for(&rx, Duration::from_millis(200));
    assert!(!has_events(&received));
}

#[test]
fn test_unregistered_watch_is_no_longer_polled() {
    let pool = Pool::new(&PoolConfig::default()).unwrap();
    let mock = MockBackend::new();
    let (dispatch, rx) = channel_dispatch();
    let watch =
        Watch::with_factory("/w", WatchConfig::with_debounce_ms(10), dispatch, mock.factory())
            .unwrap();
    watch.start().unwrap().wait().unwrap();

    pool.register(&watch);
    pool.unregister(watch.id());
    // Let at least one cycle merge the intake
    std::thread::sleep(Duration::from_millis(150));

    mock.push(Event::created("/w", "unseen"));
    let received = collect_for(&rx, Duration::from_millis(200));
    assert!(!has_events(&received));
}

#[test]
fn test_concurrent_intake_keeps_every_watch_once() {
    let pool = Arc::new(Pool::new(&PoolConfig { idle_delay_ms: 5 }).unwrap());
    let (dispatch, rx) = channel_dispatch();

    let mut watches = Vec::new();
    for i in 0..16 {
        let mock = MockBackend::new();
        let watch = Watch::with_factory(
            format!("/w{}", i),
            WatchConfig::with_debounce_ms(10),
            Arc::clone(&dispatch),
            mock.factory(),
        )
        .unwrap();
        watch.start().unwrap().wait().unwrap();
        watches.push((watch, mock));
    }
    // Drop the start results
    collect_for(&rx, Duration::from_millis(50));

    // Odd watches are registered and then unregistered by their thread
    let workers: Vec<_> = watches
        .iter()
        .enumerate()
        .map(|(i, (watch, _))| {
            let pool = Arc::clone(&pool);
            let watch = Arc::clone(watch);
            thread::spawn(move || {
                for _ in 0..50 {
                    pool.register(&watch);
                    pool.unregister(watch.id());
                }
                if i % 2 == 0 {
                    pool.register(&watch);
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }
    // Let a cycle merge the intake
    thread::sleep(Duration::from_millis(100));

    for (watch, mock) in &watches {
        mock.push(Event::created(watch.root(), "f"));
    }

    let kept: Vec<WatchId> = watches
        .iter()
        .step_by(2)
        .map(|(watch, _)| watch.id())
        .collect();
    let deliveries = |received: &[Notification]| {
        let mut counts: HashMap<WatchId, usize> = HashMap::new();
        for notification in received {
            if let Notification::Events { watch, events } = notification {
                *counts.entry(*watch).or_default() += events.len();
            }
        }
        counts
    };

    let mut received = collect_until(&rx, Duration::from_secs(5), |received| {
        deliveries(received).len() >= kept.len()
    });
    received.extend(collect_for(&rx, Duration::from_millis(200)));

    let counts = deliveries(&received);
    for id in &kept {
        assert_eq!(counts.get(id), Some(&1), "{} delivered {:?}", id, counts.get(id));
    }
    assert_eq!(counts.len(), kept.len(), "unregistered watches delivered: {:?}", counts);
}
