//! Scriptable backend
//!
//! The test keeps a [`MockBackend`] handle and the watch gets backends
//! from [`MockBackend::factory`]. Pushing on the handle feeds whichever
//! backend the watch currently owns.

use parking_lot::Mutex;
use sentinel_watcher::{Backend, BackendConfig, BackendError, BackendFactory, Event, EventSink};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Default)]
struct State {
    sink: Mutex<Option<Arc<EventSink>>>,
    refuse: AtomicBool,
    activations: AtomicUsize,
    deactivations: AtomicUsize,
}

#[derive(Clone, Default)]
pub struct MockBackend {
    state: Arc<State>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn factory(&self) -> BackendFactory {
        let state = Arc::clone(&self.state);
        Arc::new(move |_root: &Path, _config: &BackendConfig| {
            let sink = Arc::new(EventSink::new());
            *state.sink.lock() = Some(Arc::clone(&sink));
            Ok(Box::new(Instance {
                state: Arc::clone(&state),
                sink,
                watching: false,
            }) as Box<dyn Backend>)
        })
    }

    /// Make the next activations fail
    pub fn refuse(&self, refuse: bool) {
        self.state.refuse.store(refuse, Ordering::SeqCst);
    }

    pub fn push(&self, event: Event) {
        if let Some(sink) = self.state.sink.lock().as_ref() {
            sink.push(event);
        }
    }

    pub fn fail(&self, message: &str) {
        if let Some(sink) = self.state.sink.lock().as_ref() {
            sink.fail(message);
        }
    }

    pub fn activations(&self) -> usize {
        self.state.activations.load(Ordering::SeqCst)
    }

    pub fn deactivations(&self) -> usize {
        self.state.deactivations.load(Ordering::SeqCst)
    }
}

struct Instance {
    state: Arc<State>,
    sink: Arc<EventSink>,
    watching: bool,
}

impl Backend for Instance {
    fn activate(&mut self) -> Result<(), BackendError> {
        self.state.activations.fetch_add(1, Ordering::SeqCst);
        if self.state.refuse.load(Ordering::SeqCst) {
            return Err(BackendError::Os("access denied".to_string()));
        }
        self.watching = true;
        Ok(())
    }

    fn deactivate(&mut self) {
        if self.watching {
            self.state.deactivations.fetch_add(1, Ordering::SeqCst);
        }
        self.watching = false;
        self.sink.close();
    }

    fn has_errored(&self) -> bool {
        self.sink.has_errored()
    }

    fn error(&self) -> Option<String> {
        self.sink.error()
    }

    fn is_watching(&self) -> bool {
        self.watching
    }

    fn drain(&self) -> Vec<Event> {
        self.sink.drain()
    }
}
