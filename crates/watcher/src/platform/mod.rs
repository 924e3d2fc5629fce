//! Platform-specific file watching implementations
//!
//! Every OS mechanism is wrapped in a [`Backend`]. The reconstruction
//! algorithms live in platform-independent modules so they can be tested
//! anywhere:
//! - [`stream`]: flag-set classification and rename pairing (FSEvents)
//! - [`overlapped`]: change-record parsing and the double-buffered read loop
//!   (ReadDirectoryChangesW)
//! - [`portable`]: the `notify` crate, used where neither of the above exists
//!
//! The OS glue is selected at compile time by [`native_factory`].

pub mod overlapped;
pub mod portable;
pub mod stream;

#[cfg(target_os = "macos")]
pub mod macos;

#[cfg(windows)]
pub mod windows;

use crate::config::BackendConfig;
use crate::error::BackendError;
use crate::event::Event;
use crate::queue::EventQueue;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;

/// Error reported when a backend stops on its own
pub const SHUTDOWN_UNEXPECTEDLY: &str = "Service shutdown unexpectedly";

/// OS-level change subscription for one watch root
///
/// `activate` starts a notification thread that pushes events into the
/// backend's queue; `drain` hands them to the poller. After `deactivate`
/// returns no more events are pushed and the notification thread is gone.
pub trait Backend: Send {
    /// Subscribe to notifications for the root path
    fn activate(&mut self) -> Result<(), BackendError>;

    /// Unsubscribe and join the notification thread
    fn deactivate(&mut self);

    /// Whether a fatal error has been recorded
    fn has_errored(&self) -> bool;

    /// The recorded fatal error, if any
    fn error(&self) -> Option<String>;

    /// Whether the subscription is live
    fn is_watching(&self) -> bool;

    /// Take every event pushed since the last drain
    fn drain(&self) -> Vec<Event>;
}

/// Builds a backend for a root path
pub type BackendFactory =
    Arc<dyn Fn(&Path, &BackendConfig) -> Result<Box<dyn Backend>, BackendError> + Send + Sync>;

/// Factory for the current platform's backend
#[cfg(target_os = "macos")]
pub fn native_factory() -> BackendFactory {
    Arc::new(|root: &Path, config: &BackendConfig| {
        Ok(Box::new(macos::FsEventsBackend::new(root, config)) as Box<dyn Backend>)
    })
}

/// Factory for the current platform's backend
#[cfg(windows)]
pub fn native_factory() -> BackendFactory {
    Arc::new(|root: &Path, config: &BackendConfig| {
        Ok(Box::new(windows::backend(root, config)) as Box<dyn Backend>)
    })
}

/// Factory for the current platform's backend
#[cfg(not(any(target_os = "macos", windows)))]
pub fn native_factory() -> BackendFactory {
    Arc::new(|root: &Path, _config: &BackendConfig| {
        Ok(Box::new(portable::NotifyBackend::new(root)) as Box<dyn Backend>)
    })
}

/// Where a backend's notification thread delivers its work
///
/// Wraps the watch's [`EventQueue`] with a gate that `deactivate` closes
/// (later pushes are dropped) and a one-shot error slot (the first error
/// wins). Shared between the backend and its notification thread.
#[derive(Debug)]
pub struct EventSink {
    queue: EventQueue,
    open: Mutex<bool>,
    error: Mutex<Option<String>>,
}

impl EventSink {
    pub fn new() -> Self {
        Self {
            queue: EventQueue::new(),
            open: Mutex::new(true),
            error: Mutex::new(None),
        }
    }

    /// Queue an event unless the sink has been closed
    pub fn push(&self, event: Event) {
        let open = self.open.lock();
        if *open {
            self.queue.push(event);
        }
    }

    /// Queue a batch unless the sink has been closed
    pub fn extend(&self, events: impl IntoIterator<Item = Event>) {
        let open = self.open.lock();
        if *open {
            self.queue.extend(events);
        }
    }

    /// Stop accepting events; returns once no push is in progress
    pub fn close(&self) {
        *self.open.lock() = false;
    }

    pub fn is_open(&self) -> bool {
        *self.open.lock()
    }

    /// Record a fatal error; later errors are ignored
    pub fn fail(&self, message: impl Into<String>) {
        let mut error = self.error.lock();
        if error.is_none() {
            *error = Some(message.into());
        }
    }

    pub fn error(&self) -> Option<String> {
        self.error.lock().clone()
    }

    pub fn has_errored(&self) -> bool {
        self.error.lock().is_some()
    }

    pub fn drain(&self) -> Vec<Event> {
        self.queue.drain()
    }

    pub fn queue(&self) -> &EventQueue {
        &self.queue
    }
}

impl Default for EventSink {
    fn default() -> Self {
        Self::new()
    }
}
