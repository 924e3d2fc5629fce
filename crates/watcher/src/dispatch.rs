//! Boundary between the engine's threads and the host
//!
//! The engine calls a [`Dispatch`] from its scheduling and worker threads.
//! Moving those calls onto whatever thread the host needs is the
//! implementor's job. [`ChannelDispatch`] does that with a channel: every
//! call becomes a [`Notification`] the host receives wherever it likes.

use crate::error::WatchError;
use crate::event::Event;
use crate::watch::WatchId;
use crossbeam_channel::{unbounded, Receiver, Sender};
use tracing::debug;

/// Receiver of everything a watch reports
pub trait Dispatch: Send + Sync {
    /// One debounced batch, in queue order
    fn deliver_events(&self, watch: WatchId, events: Vec<Event>);

    /// Fatal backend failure, delivered once per failure
    fn deliver_error(&self, watch: WatchId, message: String);

    /// Outcome of an asynchronous start
    fn deliver_start_result(&self, watch: WatchId, result: Result<(), WatchError>);

    /// Outcome of an asynchronous stop
    fn deliver_stop_result(&self, watch: WatchId, result: Result<(), WatchError>);
}

/// A boundary call captured as a message
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    Events {
        watch: WatchId,
        events: Vec<Event>,
    },
    Error {
        watch: WatchId,
        message: String,
    },
    Started {
        watch: WatchId,
        result: Result<(), WatchError>,
    },
    Stopped {
        watch: WatchId,
        result: Result<(), WatchError>,
    },
}

impl Notification {
    /// Watch the notification belongs to
    pub fn watch(&self) -> WatchId {
        match self {
            Notification::Events { watch, .. }
            | Notification::Error { watch, .. }
            | Notification::Started { watch, .. }
            | Notification::Stopped { watch, .. } => *watch,
        }
    }
}

/// Dispatch that forwards every call over an unbounded channel
#[derive(Debug, Clone)]
pub struct ChannelDispatch {
    tx: Sender<Notification>,
}

impl ChannelDispatch {
    /// Create the dispatch and the receiving end for the host
    pub fn new() -> (Self, Receiver<Notification>) {
        let (tx, rx) = unbounded();
        (Self { tx }, rx)
    }

    fn send(&self, notification: Notification) {
        if let Err(e) = self.tx.send(notification) {
            debug!("Dropping notification for {}: receiver gone", e.0.watch());
        }
    }
}

impl Dispatch for ChannelDispatch {
    fn deliver_events(&self, watch: WatchId, events: Vec<Event>) {
        self.send(Notification::Events { watch, events });
    }

    fn deliver_error(&self, watch: WatchId, message: String) {
        self.send(Notification::Error { watch, message });
    }

    fn deliver_start_result(&self, watch: WatchId, result: Result<(), WatchError>) {
        self.send(Notification::Started { watch, result });
    }

    fn deliver_stop_result(&self, watch: WatchId, result: Result<(), WatchError>) {
        self.send(Notification::Stopped { watch, result });
    }
}
