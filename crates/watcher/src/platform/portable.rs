//! Backend built on the `notify` crate (inotify, kqueue, polling)
//!
//! notify reports a rename as up to three events: the source path, the
//! destination path, and a combined event carrying both. They share a
//! tracker id, which [`Translator`] uses to emit a single rename.

use crate::error::BackendError;
use crate::event::{split_path, Event, EventKind};
use crate::platform::{Backend, EventSink, SHUTDOWN_UNEXPECTEDLY};
use notify::event::{ModifyKind, RenameMode};
use notify::{recommended_watcher, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Source side of a rename waiting for its destination
#[derive(Debug)]
struct PendingFrom {
    tracker: Option<usize>,
    path: PathBuf,
    /// Already seen by one [`Translator::flush_stale`]
    stale: bool,
}

/// Stateful mapping from notify events to [`Event`]s
#[derive(Debug, Default)]
pub struct Translator {
    pending_from: Option<PendingFrom>,
    /// Tracker of the last rename emitted
    last_paired: Option<usize>,
    /// Tracker of the last source reported as deleted before its destination
    flushed: Option<usize>,
}

impl Translator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn translate(&mut self, event: &notify::Event) -> Vec<Event> {
        use notify::EventKind as Kind;

        let tracker = event.tracker();
        let mut out = Vec::new();

        match &event.kind {
            Kind::Access(_) => {}
            Kind::Create(_) => {
                self.flush_into(&mut out);
                out.extend(at_paths(EventKind::Created, &event.paths));
            }
            Kind::Remove(_) => {
                self.flush_into(&mut out);
                out.extend(at_paths(EventKind::Deleted, &event.paths));
            }
            Kind::Modify(ModifyKind::Name(RenameMode::From)) => {
                self.flush_into(&mut out);
                match (tracker, event.paths.first()) {
                    (Some(_), Some(path)) => {
                        self.pending_from = Some(PendingFrom {
                            tracker,
                            path: path.clone(),
                            stale: false,
                        })
                    }
                    _ => out.extend(at_paths(EventKind::Deleted, &event.paths)),
                }
            }
            Kind::Modify(ModifyKind::Name(RenameMode::To)) => {
                // The source already went out as deleted; finish the move
                if self.was_flushed(tracker) {
                    self.last_paired = tracker;
                    out.extend(at_paths(EventKind::Created, &event.paths));
                    return out;
                }
                let to = event.paths.first();
                match (self.take_pending(tracker), to) {
                    (Some(from), Some(to)) => {
                        self.last_paired = tracker;
                        out.extend(pair(&from, to));
                    }
                    (from, _) => {
                        if let Some(from) = from {
                            out.push(Event::at_path(EventKind::Deleted, &from));
                        }
                        self.flush_into(&mut out);
                        out.extend(at_paths(EventKind::Created, &event.paths));
                    }
                }
            }
            Kind::Modify(ModifyKind::Name(RenameMode::Both)) => {
                if tracker.is_some() && tracker == self.last_paired {
                    return out;
                }
                if self.was_flushed(tracker) {
                    self.last_paired = tracker;
                    if let [_, to] = event.paths.as_slice() {
                        out.push(Event::at_path(EventKind::Created, to));
                    }
                    return out;
                }
                // Drop a pending source this event already covers
                let _ = self.take_pending(tracker);
                self.flush_into(&mut out);
                match event.paths.as_slice() {
                    [from, to] => out.extend(pair(from, to)),
                    paths => out.extend(at_paths(EventKind::Modified, paths)),
                }
            }
            Kind::Modify(ModifyKind::Name(_)) => {
                self.flush_into(&mut out);
                for path in &event.paths {
                    let kind = if path.exists() {
                        EventKind::Created
                    } else {
                        EventKind::Deleted
                    };
                    out.push(Event::at_path(kind, path));
                }
            }
            Kind::Modify(_) | Kind::Any | Kind::Other => {
                self.flush_into(&mut out);
                out.extend(at_paths(EventKind::Modified, &event.paths));
            }
        }

        out
    }

    /// Report a source that never found its destination as deleted
    pub fn flush(&mut self) -> Vec<Event> {
        let mut out = Vec::new();
        self.flush_into(&mut out);
        out
    }

    /// Like [`flush`](Self::flush), but a source gets one call of grace
    ///
    /// Called on every drain, so the destination half of a rename that
    /// straddles a drain still pairs with its source.
    pub fn flush_stale(&mut self) -> Vec<Event> {
        if let Some(pending) = self.pending_from.as_mut() {
            if !pending.stale {
                pending.stale = true;
                return Vec::new();
            }
        }
        self.flush()
    }

    fn flush_into(&mut self, out: &mut Vec<Event>) {
        if let Some(pending) = self.pending_from.take() {
            self.flushed = pending.tracker;
            out.push(Event::at_path(EventKind::Deleted, &pending.path));
        }
    }

    fn was_flushed(&self, tracker: Option<usize>) -> bool {
        tracker.is_some() && tracker == self.flushed
    }

    fn take_pending(&mut self, tracker: Option<usize>) -> Option<PathBuf> {
        match &self.pending_from {
            Some(pending) if tracker.is_some() && pending.tracker == tracker => {
                self.pending_from.take().map(|pending| pending.path)
            }
            _ => None,
        }
    }
}

fn at_paths(kind: EventKind, paths: &[PathBuf]) -> impl Iterator<Item = Event> + '_ {
    paths.iter().map(move |path| Event::at_path(kind, path))
}

/// A rename within one directory, or a move reported as its two halves
fn pair(from: &Path, to: &Path) -> Vec<Event> {
    let (from_dir, from_name) = split_path(from);
    let (to_dir, to_name) = split_path(to);
    if from_dir == to_dir {
        vec![Event::renamed(from_dir, from_name, to_name)]
    } else {
        vec![
            Event::deleted(from_dir, from_name),
            Event::created(to_dir, to_name),
        ]
    }
}

/// [`Backend`] driven by notify's recommended watcher
pub struct NotifyBackend {
    root: PathBuf,
    sink: Arc<EventSink>,
    translator: Arc<Mutex<Translator>>,
    watcher: Option<RecommendedWatcher>,
}

impl NotifyBackend {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            sink: Arc::new(EventSink::new()),
            translator: Arc::new(Mutex::new(Translator::new())),
            watcher: None,
        }
    }

    fn root_missing(&self) -> bool {
        self.watcher.is_some() && !self.root.exists()
    }
}

impl Backend for NotifyBackend {
    fn activate(&mut self) -> Result<(), BackendError> {
        if self.watcher.is_some() {
            return Ok(());
        }
        if !self.root.exists() {
            return Err(BackendError::MissingPath(self.root.clone()));
        }

        let sink = Arc::clone(&self.sink);
        let translator = Arc::clone(&self.translator);
        let mut watcher = recommended_watcher(move |result: notify::Result<notify::Event>| {
            match result {
                Ok(event) => {
                    let events = translator.lock().translate(&event);
                    sink.extend(events);
                }
                Err(e) => {
                    warn!("Watcher error: {}", e);
                    sink.fail(SHUTDOWN_UNEXPECTEDLY);
                }
            }
        })?;
        watcher.watch(&self.root, RecursiveMode::Recursive)?;

        self.watcher = Some(watcher);
        debug!("Watching {}", self.root.display());
        Ok(())
    }

    fn deactivate(&mut self) {
        self.sink.close();
        if let Some(mut watcher) = self.watcher.take() {
            if let Err(e) = watcher.unwatch(&self.root) {
                debug!("Unwatch of {} failed: {}", self.root.display(), e);
            }
        }
    }

    fn has_errored(&self) -> bool {
        self.sink.has_errored() || self.root_missing()
    }

    fn error(&self) -> Option<String> {
        self.sink
            .error()
            .or_else(|| self.root_missing().then(|| SHUTDOWN_UNEXPECTEDLY.to_string()))
    }

    fn is_watching(&self) -> bool {
        self.watcher.is_some() && self.sink.is_open()
    }

    fn drain(&self) -> Vec<Event> {
        let stale = self.translator.lock().flush_stale();
        self.sink.extend(stale);
        self.sink.drain()
    }
}
