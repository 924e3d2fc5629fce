//! Scheduling thread shared by many watches
//!
//! Registrations are buffered in an intake and merged into the active set
//! once per cycle. Each cycle polls every active watch and sleeps for the
//! shortest delay any of them asked for, capped at the idle delay.

use crate::config::PoolConfig;
use crate::error::{Result, WatchError};
use crate::watch::{Watch, WatchId};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Pending registrations; the later call for a watch wins
#[derive(Debug, Default)]
pub struct Intake {
    to_add: HashMap<WatchId, Arc<Watch>>,
    to_remove: HashSet<WatchId>,
}

impl Intake {
    pub fn register(&mut self, watch: Arc<Watch>) {
        let id = watch.id();
        self.to_remove.remove(&id);
        self.to_add.insert(id, watch);
    }

    pub fn unregister(&mut self, id: WatchId) {
        self.to_add.remove(&id);
        self.to_remove.insert(id);
    }

    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }
}

/// Active watches as seen by the scheduling thread
#[derive(Debug)]
pub struct Scheduler {
    active: BTreeMap<WatchId, Arc<Watch>>,
    idle_delay: Duration,
}

impl Scheduler {
    pub fn new(idle_delay: Duration) -> Self {
        Self {
            active: BTreeMap::new(),
            idle_delay,
        }
    }

    /// Apply and clear everything pending in `intake`
    ///
    /// Returns the watches that left the active set.
    pub fn merge(&mut self, intake: &mut Intake) -> Vec<Arc<Watch>> {
        let mut removed = Vec::new();
        for id in intake.to_remove.drain() {
            if let Some(watch) = self.active.remove(&id) {
                debug!("Removed {} from pool", id);
                removed.push(watch);
            }
        }
        for (id, watch) in intake.to_add.drain() {
            debug!("Added {} to pool", id);
            self.active.insert(id, watch);
        }
        removed
    }

    /// Poll every active watch; returns how long to sleep
    pub fn cycle(&self, now: Instant) -> Duration {
        self.active
            .values()
            .map(|watch| watch.poll_for_events(now))
            .fold(self.idle_delay, Duration::min)
    }

    pub fn contains(&self, id: WatchId) -> bool {
        self.active.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }
}

/// Owner of the scheduling thread
///
/// Dropping the pool stops and joins the thread. Registered watches are
/// not stopped; that stays with their owners. An unregistered watch the
/// pool held the last handle to is dropped on a helper thread.
pub struct Pool {
    intake: Arc<Mutex<Intake>>,
    wake: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl Pool {
    pub fn new(config: &PoolConfig) -> Result<Self> {
        let idle_delay = config.idle_delay();
        if idle_delay.is_zero() {
            return Err(WatchError::Initialization(
                "pool idle delay must be positive".into(),
            ));
        }

        let intake = Arc::new(Mutex::new(Intake::default()));
        let (wake_tx, wake_rx) = bounded(1);

        let thread = {
            let intake = Arc::clone(&intake);
            std::thread::Builder::new()
                .name("sentinel-pool".to_string())
                .spawn(move || run(intake, wake_rx, idle_delay))
                .map_err(|e| WatchError::Initialization(e.to_string()))?
        };

        info!("Pool started (idle delay {:?})", idle_delay);
        Ok(Self {
            intake,
            wake: Some(wake_tx),
            thread: Some(thread),
        })
    }

    /// Queue a watch for polling from the next cycle on
    pub fn register(&self, watch: &Arc<Watch>) {
        self.intake.lock().register(Arc::clone(watch));
        self.wake();
    }

    /// Queue a watch for removal at the next cycle
    pub fn unregister(&self, id: WatchId) {
        self.intake.lock().unregister(id);
        self.wake();
    }

    fn wake(&self) {
        if let Some(wake) = &self.wake {
            match wake.try_send(()) {
                Ok(()) | Err(TrySendError::Full(())) => {}
                Err(TrySendError::Disconnected(())) => warn!("Pool thread is gone"),
            }
        }
    }

    /// Stop the scheduling thread and wait for it
    pub fn shutdown(&mut self) {
        // Disconnecting the wake channel ends the loop
        self.wake = None;
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Pool thread panicked");
            }
            info!("Pool stopped");
        }
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Drop removed watches without blocking the caller
///
/// A watch whose last handle is here still owns its backend, and dropping
/// it joins the backend thread. Those are dropped on a helper thread.
fn release(removed: Vec<Arc<Watch>>) -> Option<JoinHandle<()>> {
    let orphans: Vec<_> = removed
        .into_iter()
        .filter(|watch| Arc::strong_count(watch) == 1)
        .collect();
    if orphans.is_empty() {
        return None;
    }

    debug!("Releasing {} unowned watches", orphans.len());
    match std::thread::Builder::new()
        .name("sentinel-release".to_string())
        .spawn(move || drop(orphans))
    {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!("Released watches on the pool thread: {}", e);
            None
        }
    }
}

fn run(intake: Arc<Mutex<Intake>>, wake: Receiver<()>, idle_delay: Duration) {
    let mut scheduler = Scheduler::new(idle_delay);

    loop {
        let removed = scheduler.merge(&mut intake.lock());
        release(removed);
        let delay = scheduler.cycle(Instant::now());

        match wake.recv_timeout(delay) {
            Ok(()) | Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    debug!("Pool loop exiting with {} watches", scheduler.len());
}
