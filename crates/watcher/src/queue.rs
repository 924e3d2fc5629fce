//! FIFO hand-off between a backend's notification thread and the pool

use crate::event::Event;
use parking_lot::Mutex;
use std::collections::VecDeque;

/// Thread-safe event buffer for one watch
///
/// One producer (the backend's notification thread) pushes, one consumer
/// (the pool's scheduling thread) drains. Neither side ever waits on the
/// other for longer than a push or a swap of the backing deque.
#[derive(Debug, Default)]
pub struct EventQueue {
    events: Mutex<VecDeque<Event>>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event at the tail
    pub fn push(&self, event: Event) {
        self.events.lock().push_back(event);
    }

    /// Append a batch, keeping its order
    pub fn extend(&self, events: impl IntoIterator<Item = Event>) {
        self.events.lock().extend(events);
    }

    /// Remove and return everything queued, oldest first
    pub fn drain(&self) -> Vec<Event> {
        let drained = std::mem::take(&mut *self.events.lock());
        drained.into()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}
