//! Filesystem change records
//!
//! An [`Event`] is the uniform shape every platform backend reduces its raw
//! notifications to. Events are immutable; they move from the backend's
//! notification thread into an [`EventQueue`](crate::EventQueue) and from
//! there to the consumer, with a single owner at every step.

use serde::ser::{Serialize, SerializeStruct, Serializer};
use std::fmt;
use std::path::{Path, PathBuf};

/// Type of file system change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// File or directory created
    Created,
    /// File contents or metadata modified
    Modified,
    /// File or directory deleted
    Deleted,
    /// File renamed within one directory
    Renamed,
}

impl EventKind {
    /// Lowercase name used in serialized output
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Created => "created",
            EventKind::Modified => "modified",
            EventKind::Deleted => "deleted",
            EventKind::Renamed => "renamed",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One filesystem change
///
/// `name` is the primary file name. For renames it is the old name and
/// [`Event::new_name`] carries the other side; the new name exists only on
/// renames.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Event {
    kind: EventKind,
    directory: PathBuf,
    name: String,
    new_name: Option<String>,
}

impl Event {
    /// Created entry `name` inside `directory`
    pub fn created(directory: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self::single(EventKind::Created, directory, name)
    }

    /// Modified entry `name` inside `directory`
    pub fn modified(directory: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self::single(EventKind::Modified, directory, name)
    }

    /// Deleted entry `name` inside `directory`
    pub fn deleted(directory: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self::single(EventKind::Deleted, directory, name)
    }

    /// Entry renamed from `old_name` to `new_name`, both inside `directory`
    pub fn renamed(
        directory: impl Into<PathBuf>,
        old_name: impl Into<String>,
        new_name: impl Into<String>,
    ) -> Self {
        Self {
            kind: EventKind::Renamed,
            directory: directory.into(),
            name: old_name.into(),
            new_name: Some(new_name.into()),
        }
    }

    /// Build a non-rename event from a full path
    ///
    /// A single path cannot carry both sides of a rename, so `Renamed` is
    /// recorded as `Modified`.
    pub fn at_path(kind: EventKind, path: &Path) -> Self {
        let (directory, name) = split_path(path);
        let kind = if kind == EventKind::Renamed {
            EventKind::Modified
        } else {
            kind
        };
        Self::single(kind, directory, name)
    }

    fn single(kind: EventKind, directory: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self {
            kind,
            directory: directory.into(),
            name: name.into(),
            new_name: None,
        }
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Primary file name (the old name for renames)
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Old side of a rename
    pub fn old_name(&self) -> Option<&str> {
        self.new_name.as_ref().map(|_| self.name.as_str())
    }

    /// New side of a rename
    pub fn new_name(&self) -> Option<&str> {
        self.new_name.as_deref()
    }

    /// Full path of the primary entry
    pub fn path(&self) -> PathBuf {
        self.directory.join(&self.name)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.new_name {
            Some(new_name) => write!(
                f,
                "{} {} -> {}",
                self.kind,
                self.directory.join(&self.name).display(),
                self.directory.join(new_name).display()
            ),
            None => write!(f, "{} {}", self.kind, self.path().display()),
        }
    }
}

impl Serialize for Event {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let fields = if self.new_name.is_some() { 4 } else { 3 };
        let mut state = serializer.serialize_struct("Event", fields)?;
        state.serialize_field("action", self.kind.as_str())?;
        state.serialize_field("directory", &self.directory)?;
        match &self.new_name {
            Some(new_name) => {
                state.serialize_field("oldFile", &self.name)?;
                state.serialize_field("newFile", new_name)?;
            }
            None => {
                state.serialize_field("file", &self.name)?;
            }
        }
        state.end()
    }
}

/// Split a path into its parent directory and final component
///
/// The filesystem root splits into itself and an empty name.
pub fn split_path(path: &Path) -> (PathBuf, String) {
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) => (parent.to_path_buf(), name.to_string_lossy().into_owned()),
        _ => (path.to_path_buf(), String::new()),
    }
}
