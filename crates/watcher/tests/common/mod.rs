//! Common utilities for integration tests

pub mod mock;

pub use mock::MockBackend;

use crossbeam_channel::Receiver;
use sentinel_watcher::{ChannelDispatch, Dispatch, Notification};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Channel dispatch as the trait object watches take
pub fn channel_dispatch() -> (Arc<dyn Dispatch>, Receiver<Notification>) {
    let (dispatch, rx) = ChannelDispatch::new();
    (Arc::new(dispatch), rx)
}

/// Collect notifications until `done` holds or `timeout` passes
pub fn collect_until(
    rx: &Receiver<Notification>,
    timeout: Duration,
    done: impl Fn(&[Notification]) -> bool,
) -> Vec<Notification> {
    let deadline = Instant::now() + timeout;
    let mut received = Vec::new();
    while !done(&received) {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        match rx.recv_timeout(remaining) {
            Ok(notification) => received.push(notification),
            Err(_) => break,
        }
    }
    received
}

/// Everything received within `window`
pub fn collect_for(rx: &Receiver<Notification>, window: Duration) -> Vec<Notification> {
    collect_until(rx, window, |_| false)
}
