//! One watched root: lifecycle, backend ownership and debounced polling
//!
//! A [`Watch`] is shared as `Arc<Watch>` between its owner, the pool's
//! scheduling thread and short-lived start/stop workers. Its backend sits
//! behind the interface lock; every delivery is made while holding it, so
//! nothing is delivered for a watch after its stop result.

use crate::config::WatchConfig;
use crate::debounce::{Debouncer, Gate};
use crate::dispatch::Dispatch;
use crate::error::{Result, WatchError};
use crate::platform::{native_factory, Backend, BackendFactory};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

static NEXT_WATCH_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique watch identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct WatchId(u64);

impl WatchId {
    fn next() -> Self {
        Self(NEXT_WATCH_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for WatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "watch#{}", self.0)
    }
}

/// Lifecycle of a watch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WatchState {
    Idle,
    Starting,
    Running,
    Stopping,
    Stopped,
    /// The backend failed; it stays attached until `stop`
    Errored,
}

/// Ticket for the asynchronous outcome of `start` or `stop`
#[derive(Debug)]
pub struct Completion {
    rx: Receiver<Result<()>>,
}

impl Completion {
    fn channel() -> (Sender<Result<()>>, Self) {
        let (tx, rx) = bounded(1);
        (tx, Self { rx })
    }

    /// Block until the operation finishes
    pub fn wait(self) -> Result<()> {
        self.rx
            .recv()
            .unwrap_or_else(|_| Err(WatchError::Runtime("worker exited without a result".into())))
    }

    /// Block for at most `timeout`; `None` if the operation is still running
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<()>> {
        match self.rx.recv_timeout(timeout) {
            Ok(result) => Some(result),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(Err(WatchError::Runtime(
                "worker exited without a result".into(),
            ))),
        }
    }
}

/// A watched directory tree
pub struct Watch {
    id: WatchId,
    root: PathBuf,
    config: WatchConfig,
    state: Mutex<WatchState>,
    /// Interface lock
    backend: Mutex<Option<Box<dyn Backend>>>,
    debouncer: Mutex<Debouncer>,
    factory: BackendFactory,
    dispatch: Arc<dyn Dispatch>,
}

impl fmt::Debug for Watch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Watch")
            .field("id", &self.id)
            .field("root", &self.root)
            .field("state", &*self.state.lock())
            .finish()
    }
}

impl Watch {
    /// Create a watch using the platform's native backend
    pub fn new(
        root: impl AsRef<Path>,
        config: WatchConfig,
        dispatch: Arc<dyn Dispatch>,
    ) -> Result<Arc<Self>> {
        Self::with_factory(root, config, dispatch, native_factory())
    }

    /// Create a watch whose backend comes from `factory`
    pub fn with_factory(
        root: impl AsRef<Path>,
        config: WatchConfig,
        dispatch: Arc<dyn Dispatch>,
        factory: BackendFactory,
    ) -> Result<Arc<Self>> {
        let root = root.as_ref();
        if root.as_os_str().is_empty() {
            return Err(WatchError::Initialization("empty root path".into()));
        }
        if config.idle_delay_ms == 0 {
            return Err(WatchError::Initialization("idle delay must be positive".into()));
        }
        config
            .backend
            .validate()
            .map_err(|e| WatchError::Initialization(e.to_string()))?;

        let watch = Arc::new(Self {
            id: WatchId::next(),
            root: root.to_path_buf(),
            debouncer: Mutex::new(Debouncer::new(config.debounce_interval())),
            config,
            state: Mutex::new(WatchState::Idle),
            backend: Mutex::new(None),
            factory,
            dispatch,
        });
        debug!("Created {} for {}", watch.id, watch.root.display());
        Ok(watch)
    }

    pub fn id(&self) -> WatchId {
        self.id
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn state(&self) -> WatchState {
        *self.state.lock()
    }

    pub fn debounce_interval(&self) -> Duration {
        self.config.debounce_interval()
    }

    /// Start watching on a worker thread
    ///
    /// Rejected with `AlreadyRunning` unless the watch is idle or stopped.
    pub fn start(self: &Arc<Self>) -> Result<Completion> {
        {
            let mut state = self.state.lock();
            match *state {
                WatchState::Idle | WatchState::Stopped => *state = WatchState::Starting,
                _ => return Err(WatchError::AlreadyRunning),
            }
        }

        let (tx, completion) = Completion::channel();
        let watch = Arc::clone(self);
        let spawned = std::thread::Builder::new()
            .name(format!("sentinel-start-{}", self.id.0))
            .spawn(move || {
                let (id, dispatch) = (watch.id, Arc::clone(&watch.dispatch));
                let result = watch.run_start();
                // Release our handle before anyone can observe the result
                drop(watch);
                dispatch.deliver_start_result(id, result.clone());
                let _ = tx.send(result);
            });

        if let Err(e) = spawned {
            *self.state.lock() = WatchState::Stopped;
            return Err(WatchError::StartFailure(e.to_string()));
        }
        Ok(completion)
    }

    fn run_start(&self) -> Result<()> {
        // 1. Build and activate outside the interface lock
        let mut backend = (self.factory)(&self.root, &self.config.backend)
            .map_err(|e| self.start_failed(e.to_string()))?;

        if let Err(e) = backend.activate() {
            backend.deactivate();
            return Err(self.start_failed(e.to_string()));
        }
        if !backend.is_watching() {
            let reason = backend
                .error()
                .unwrap_or_else(|| "backend is not watching".to_string());
            backend.deactivate();
            return Err(self.start_failed(reason));
        }

        // 2. Install and open the first debounce window
        *self.backend.lock() = Some(backend);
        self.debouncer.lock().reset();
        *self.state.lock() = WatchState::Running;
        info!("Watching {} ({})", self.root.display(), self.id);
        Ok(())
    }

    fn start_failed(&self, reason: String) -> WatchError {
        warn!("Failed to start {} for {}: {}", self.id, self.root.display(), reason);
        *self.state.lock() = WatchState::Stopped;
        WatchError::StartFailure(reason)
    }

    /// Stop watching on a worker thread
    ///
    /// Accepted while running or errored; otherwise `NotRunning`.
    pub fn stop(self: &Arc<Self>) -> Result<Completion> {
        let previous = {
            let mut state = self.state.lock();
            let previous = *state;
            match previous {
                WatchState::Running | WatchState::Errored => *state = WatchState::Stopping,
                _ => return Err(WatchError::NotRunning),
            }
            previous
        };

        let (tx, completion) = Completion::channel();
        let watch = Arc::clone(self);
        let spawned = std::thread::Builder::new()
            .name(format!("sentinel-stop-{}", self.id.0))
            .spawn(move || {
                let (id, dispatch) = (watch.id, Arc::clone(&watch.dispatch));
                let result = watch.run_stop();
                // Release our handle before anyone can observe the result
                drop(watch);
                dispatch.deliver_stop_result(id, result.clone());
                let _ = tx.send(result);
            });

        if let Err(e) = spawned {
            *self.state.lock() = previous;
            return Err(WatchError::Runtime(e.to_string()));
        }
        Ok(completion)
    }

    fn run_stop(&self) -> Result<()> {
        // The lock is held across the join so no poll can deliver
        // once the stop result is out
        let mut slot = self.backend.lock();
        if let Some(mut backend) = slot.take() {
            backend.deactivate();
        }
        *self.state.lock() = WatchState::Stopped;
        drop(slot);

        info!("Stopped watching {} ({})", self.root.display(), self.id);
        Ok(())
    }

    /// One scheduling step; returns how long until the next poll is due
    pub fn poll_for_events(&self, now: Instant) -> Duration {
        let idle = self.config.idle_delay();
        if self.state() != WatchState::Running {
            return idle;
        }

        // A start or stop worker owns the slot; don't wait out its join
        let Some(slot) = self.backend.try_lock() else {
            return idle;
        };
        if self.state() != WatchState::Running {
            return idle;
        }
        let Some(backend) = slot.as_ref() else {
            return idle;
        };

        if let Gate::Wait(remaining) = self.debouncer.lock().check(now) {
            return remaining;
        }

        if backend.has_errored() {
            let message = backend
                .error()
                .unwrap_or_else(|| crate::platform::SHUTDOWN_UNEXPECTEDLY.to_string());
            {
                let mut state = self.state.lock();
                if *state != WatchState::Running {
                    return idle;
                }
                *state = WatchState::Errored;
            }
            warn!("{} for {} failed: {}", self.id, self.root.display(), message);
            self.dispatch.deliver_error(self.id, message);
            return idle;
        }

        let events = backend.drain();
        if events.is_empty() {
            return idle;
        }

        debug!("Delivering {} events for {}", events.len(), self.id);
        self.dispatch.deliver_events(self.id, events);
        self.config.debounce_interval()
    }
}

impl Drop for Watch {
    fn drop(&mut self) {
        if let Some(mut backend) = self.backend.get_mut().take() {
            debug!("Releasing backend of dropped {}", self.id);
            backend.deactivate();
        }
    }
}
