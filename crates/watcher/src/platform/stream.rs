//! Event reconstruction for stream-style notifications (FSEvents)
//!
//! A stream callback delivers a batch of `(path, flags)` pairs. The flags
//! on one path may describe several changes that the kernel coalesced, and
//! the two sides of a rename arrive as two unrelated paths. This module
//! turns such a batch into [`Event`]s:
//!
//! 1. Paths carrying exactly one category flag map directly
//! 2. Paths with any other combination are demangled with a stat
//! 3. Renamed paths are held back, grouped by parent directory and paired
//!    once the rest of the batch has been queued
//!
//! Nothing here depends on macOS; filesystem access goes through [`Probe`].

use crate::event::{split_path, Event, EventKind};
use bitflags::bitflags;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

bitflags! {
    /// Per-path flags of a stream event (`kFSEventStreamEventFlag*`)
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct StreamFlags: u32 {
        const MUST_SCAN_SUB_DIRS = 0x0000_0001;
        const USER_DROPPED = 0x0000_0002;
        const KERNEL_DROPPED = 0x0000_0004;
        const EVENT_IDS_WRAPPED = 0x0000_0008;
        const HISTORY_DONE = 0x0000_0010;
        const ROOT_CHANGED = 0x0000_0020;
        const MOUNT = 0x0000_0040;
        const UNMOUNT = 0x0000_0080;
        const ITEM_CREATED = 0x0000_0100;
        const ITEM_REMOVED = 0x0000_0200;
        const ITEM_INODE_META_MOD = 0x0000_0400;
        const ITEM_RENAMED = 0x0000_0800;
        const ITEM_MODIFIED = 0x0000_1000;
        const ITEM_FINDER_INFO_MOD = 0x0000_2000;
        const ITEM_CHANGE_OWNER = 0x0000_4000;
        const ITEM_XATTR_MOD = 0x0000_8000;
        const ITEM_IS_FILE = 0x0001_0000;
        const ITEM_IS_DIR = 0x0002_0000;
        const ITEM_IS_SYMLINK = 0x0004_0000;
    }
}

impl StreamFlags {
    /// Every flag that counts as a modification
    pub const MODIFIED: StreamFlags = StreamFlags::ITEM_MODIFIED
        .union(StreamFlags::ITEM_INODE_META_MOD)
        .union(StreamFlags::ITEM_FINDER_INFO_MOD)
        .union(StreamFlags::ITEM_CHANGE_OWNER)
        .union(StreamFlags::ITEM_XATTR_MOD);
}

/// What a single flag set says about its path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Created,
    Removed,
    Modified,
    /// One side of a rename; needs pairing
    Renamed,
    /// Zero or several categories; needs a stat
    Ambiguous,
}

/// Classify a flag set by its category flags
///
/// A category only wins when it is the only one present.
pub fn classify(flags: StreamFlags) -> Classification {
    let created = flags.contains(StreamFlags::ITEM_CREATED);
    let removed = flags.contains(StreamFlags::ITEM_REMOVED);
    let modified = flags.intersects(StreamFlags::MODIFIED);
    let renamed = flags.contains(StreamFlags::ITEM_RENAMED);

    match (created, removed, modified, renamed) {
        (true, false, false, false) => Classification::Created,
        (false, true, false, false) => Classification::Removed,
        (false, false, true, false) => Classification::Modified,
        (false, false, false, true) => Classification::Renamed,
        _ => Classification::Ambiguous,
    }
}

/// Timestamps read from a stat
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileTimes {
    /// Birth time, when the filesystem records one
    pub birth: Option<SystemTime>,
    pub modified: SystemTime,
}

/// Resolve an ambiguous path from its stat result
///
/// A missing path was deleted. A path whose birth and modification times
/// fall in the same second was created, anything else was modified.
pub fn demangle(times: Option<&FileTimes>) -> EventKind {
    let Some(times) = times else {
        return EventKind::Deleted;
    };

    match times.birth {
        Some(birth) if whole_seconds(birth) == whole_seconds(times.modified) => {
            EventKind::Created
        }
        _ => EventKind::Modified,
    }
}

fn whole_seconds(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(after) => after.as_secs() as i64,
        // Pre-epoch: floor towards negative infinity
        Err(e) => {
            let before = e.duration();
            let secs = before.as_secs() as i64;
            if before.subsec_nanos() > 0 {
                -secs - 1
            } else {
                -secs
            }
        }
    }
}

/// Filesystem access used during reconstruction
pub trait Probe {
    /// Stat a path, `None` when it does not exist
    fn stat(&self, path: &Path) -> Option<FileTimes>;
}

/// [`Probe`] backed by the real filesystem
#[derive(Debug, Clone, Copy, Default)]
pub struct FsProbe;

impl Probe for FsProbe {
    fn stat(&self, path: &Path) -> Option<FileTimes> {
        let metadata = std::fs::metadata(path).ok()?;
        let modified = metadata.modified().ok()?;
        Some(FileTimes {
            birth: metadata.created().ok(),
            modified,
        })
    }
}

/// Turns stream batches into events
#[derive(Debug, Clone, Default)]
pub struct StreamTranslator<P> {
    probe: P,
}

impl<P: Probe> StreamTranslator<P> {
    pub fn new(probe: P) -> Self {
        Self { probe }
    }

    /// Translate one callback batch
    ///
    /// Events come out in batch order, followed by everything produced by
    /// rename pairing. Pairing is per parent directory, in path order.
    pub fn translate(&self, batch: &[(PathBuf, StreamFlags)]) -> Vec<Event> {
        let mut events = Vec::with_capacity(batch.len());
        let mut renamed: BTreeMap<PathBuf, Vec<String>> = BTreeMap::new();

        for (path, flags) in batch {
            match classify(*flags) {
                Classification::Created => events.push(Event::at_path(EventKind::Created, path)),
                Classification::Removed => events.push(Event::at_path(EventKind::Deleted, path)),
                Classification::Modified => events.push(Event::at_path(EventKind::Modified, path)),
                Classification::Renamed => {
                    let (directory, name) = split_path(path);
                    renamed.entry(directory).or_default().push(name);
                }
                Classification::Ambiguous => events.push(self.demangle(path)),
            }
        }

        for (directory, names) in renamed {
            self.pair(&directory, &names, &mut events);
        }

        events
    }

    fn pair(&self, directory: &Path, names: &[String], events: &mut Vec<Event>) {
        if let [a, b] = names {
            let a_path = directory.join(a);
            let b_path = directory.join(b);
            let a_exists = self.probe.stat(&a_path).is_some();
            let b_exists = self.probe.stat(&b_path).is_some();

            match (a_exists, b_exists) {
                (true, false) => events.push(Event::renamed(directory, b.as_str(), a.as_str())),
                (false, true) => events.push(Event::renamed(directory, a.as_str(), b.as_str())),
                _ => {
                    events.push(self.demangle(&a_path));
                    events.push(self.demangle(&b_path));
                }
            }
            return;
        }

        for name in names {
            events.push(self.demangle(&directory.join(name)));
        }
    }

    fn demangle(&self, path: &Path) -> Event {
        let kind = demangle(self.probe.stat(path).as_ref());
        Event::at_path(kind, path)
    }
}
