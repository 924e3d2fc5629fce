//! Double-buffered directory read loop (ReadDirectoryChangesW)
//!
//! The kernel writes change records into a caller-supplied buffer while a
//! read is in flight, so the loop keeps two buffers:
//! - `primary` is the only buffer a read ever targets. It is moved into the
//!   [`DirectoryReader`] for the duration of the read and handed back with
//!   the completion.
//! - `swap` is the only buffer ever parsed.
//!
//! On every completion exactly the reported byte count is copied from
//! `primary` to `swap`, the next read is issued, and only then is `swap`
//! parsed. The OS can never write into bytes that are being parsed.

use crate::config::BackendConfig;
use crate::error::BackendError;
use crate::event::Event;
use crate::platform::{Backend, EventSink, SHUTDOWN_UNEXPECTEDLY};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Error reported when the kernel dropped notifications
pub const BUFFER_OVERFLOW: &str = "Buffer filled up and service needs a restart";

/// Size of the fixed part of a change record
const HEADER_LEN: usize = 12;

/// `FILE_ACTION_*` codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Added,
    Removed,
    Modified,
    RenamedOldName,
    RenamedNewName,
    Other(u32),
}

impl Action {
    pub fn from_code(code: u32) -> Self {
        match code {
            1 => Action::Added,
            2 => Action::Removed,
            3 => Action::Modified,
            4 => Action::RenamedOldName,
            5 => Action::RenamedNewName,
            other => Action::Other(other),
        }
    }

    pub fn code(&self) -> u32 {
        match self {
            Action::Added => 1,
            Action::Removed => 2,
            Action::Modified => 3,
            Action::RenamedOldName => 4,
            Action::RenamedNewName => 5,
            Action::Other(code) => *code,
        }
    }
}

/// One decoded `FILE_NOTIFY_INFORMATION` entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeRecord {
    pub action: Action,
    /// Name relative to the watched root, `\`-separated
    pub name: String,
}

impl ChangeRecord {
    pub fn new(action: Action, name: impl Into<String>) -> Self {
        Self {
            action,
            name: name.into(),
        }
    }

    /// Lay records out the way the kernel does: DWORD-aligned entries
    /// linked by next-entry offsets, the last offset zero
    pub fn encode_all(records: &[ChangeRecord]) -> Vec<u8> {
        let mut out = Vec::new();
        for (i, record) in records.iter().enumerate() {
            let name: Vec<u8> = record
                .name
                .encode_utf16()
                .flat_map(|unit| unit.to_le_bytes())
                .collect();
            let len = HEADER_LEN + name.len();
            let padded = (len + 3) & !3;
            let next = if i + 1 == records.len() { 0 } else { padded };

            out.extend_from_slice(&(next as u32).to_le_bytes());
            out.extend_from_slice(&record.action.code().to_le_bytes());
            out.extend_from_slice(&(name.len() as u32).to_le_bytes());
            out.extend_from_slice(&name);
            if next != 0 {
                out.resize(out.len() + padded - len, 0);
            }
        }
        out
    }
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

/// Decode the linked records in a completed buffer
///
/// Parsing stops at the first record whose header or name would run past
/// the end of the buffer.
pub fn parse_records(buffer: &[u8]) -> Vec<ChangeRecord> {
    let mut records = Vec::new();
    if buffer.is_empty() {
        return records;
    }

    let mut offset = 0usize;
    loop {
        let Some(header) = buffer.get(offset..offset + HEADER_LEN) else {
            warn!("Truncated change record header at offset {}", offset);
            break;
        };
        let next = read_u32(header, 0) as usize;
        let action = Action::from_code(read_u32(header, 4));
        let name_len = read_u32(header, 8) as usize;

        let name_start = offset + HEADER_LEN;
        let name_bytes = match buffer.get(name_start..name_start.saturating_add(name_len)) {
            Some(bytes) if name_len % 2 == 0 => bytes,
            _ => {
                warn!(
                    "Malformed change record name at offset {} (length {})",
                    offset, name_len
                );
                break;
            }
        };
        let units: Vec<u16> = name_bytes
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        records.push(ChangeRecord {
            action,
            name: String::from_utf16_lossy(&units),
        });

        if next == 0 {
            break;
        }
        offset = match offset.checked_add(next) {
            Some(offset) if offset < buffer.len() => offset,
            _ => {
                warn!("Change record offset {} points past the buffer", next);
                break;
            }
        };
    }

    records
}

/// Split a root-relative record name into its directory and file name
fn locate(root: &Path, name: &str) -> (PathBuf, String) {
    let mut parts: Vec<&str> = name.split('\\').collect();
    let file = parts.pop().unwrap_or_default().to_string();
    let mut directory = root.to_path_buf();
    for part in parts.into_iter().filter(|p| !p.is_empty()) {
        directory.push(part);
    }
    (directory, file)
}

/// Rebuild events from one buffer's records
///
/// An old-name record pairs with the record right after it when that is a
/// new-name record. Otherwise the old name is reported deleted and the
/// following record is handled on its own.
pub fn reconstruct(root: &Path, records: &[ChangeRecord]) -> Vec<Event> {
    let mut events = Vec::with_capacity(records.len());
    let mut i = 0;

    while i < records.len() {
        let record = &records[i];
        let (directory, name) = locate(root, &record.name);

        match record.action {
            Action::RenamedOldName => match records.get(i + 1) {
                Some(next) if next.action == Action::RenamedNewName => {
                    let (_, new_name) = locate(root, &next.name);
                    events.push(Event::renamed(directory, name, new_name));
                    i += 2;
                    continue;
                }
                _ => events.push(Event::deleted(directory, name)),
            },
            Action::Added | Action::RenamedNewName => events.push(Event::created(directory, name)),
            Action::Removed => events.push(Event::deleted(directory, name)),
            Action::Modified | Action::Other(_) => events.push(Event::modified(directory, name)),
        }
        i += 1;
    }

    events
}

/// The read target and the parse buffer
#[derive(Debug)]
pub struct BufferPair {
    /// `None` while lent to an in-flight read
    primary: Option<Vec<u8>>,
    swap: Vec<u8>,
    filled: usize,
}

impl BufferPair {
    pub fn new(size: usize) -> Self {
        Self {
            primary: Some(vec![0; size]),
            swap: vec![0; size],
            filled: 0,
        }
    }

    pub fn size(&self) -> usize {
        self.swap.len()
    }

    /// Whether `primary` is out with a read
    pub fn is_lent(&self) -> bool {
        self.primary.is_none()
    }

    /// Take `primary` for a read
    pub fn lend(&mut self) -> Option<Vec<u8>> {
        self.primary.take()
    }

    /// Take back `primary` without copying (failed or discarded read)
    pub fn give_back(&mut self, primary: Vec<u8>) {
        self.primary = Some(primary);
    }

    /// Take back `primary` after a read completed with `len` bytes
    ///
    /// Exactly those bytes are copied into `swap`, replacing whatever the
    /// previous completion left there.
    pub fn restore(&mut self, primary: Vec<u8>, len: usize) {
        let len = len.min(primary.len()).min(self.swap.len());
        self.swap[..len].copy_from_slice(&primary[..len]);
        self.filled = len;
        self.primary = Some(primary);
    }

    /// Bytes of the last completed read
    pub fn swapped(&self) -> &[u8] {
        &self.swap[..self.filled]
    }

    /// Replace both buffers with fresh ones of `size` bytes
    pub fn resize(&mut self, size: usize) {
        self.primary = Some(vec![0; size]);
        self.swap = vec![0; size];
        self.filled = 0;
    }
}

/// How a read finished
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadStatus {
    /// Records were written into the buffer
    Complete(usize),
    /// The kernel dropped notifications
    Overflow,
    /// The buffer is too large for the transport (network shares)
    BufferTooLarge,
    /// The read was cancelled by the interrupter
    Cancelled,
    Failed(String),
}

/// A read that could not be issued; the buffer comes back with it
#[derive(Debug)]
pub struct ScheduleError {
    pub buffer: Vec<u8>,
    pub message: String,
}

/// Wakes a reader blocked in [`DirectoryReader::complete`]
pub type Interrupter = Arc<dyn Fn() + Send + Sync>;

/// Asynchronous directory reads with an owned-buffer hand-off
pub trait DirectoryReader: Send {
    /// Issue a read into `buffer`; the reader owns it until completion
    fn schedule(&mut self, buffer: Vec<u8>) -> Result<(), ScheduleError>;

    /// Block until the outstanding read finishes and hand its buffer back
    fn complete(&mut self) -> (Vec<u8>, ReadStatus);

    fn interrupter(&self) -> Interrupter;
}

/// Completion-driven loop for one root
pub struct ReadLoop<R> {
    root: PathBuf,
    reader: R,
    buffers: BufferPair,
    network_buffer_size: usize,
    resized: bool,
    sink: Arc<EventSink>,
    shutdown: Arc<AtomicBool>,
}

impl<R: DirectoryReader> ReadLoop<R> {
    pub fn new(
        root: &Path,
        reader: R,
        config: &BackendConfig,
        sink: Arc<EventSink>,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self {
            root: root.to_path_buf(),
            reader,
            buffers: BufferPair::new(config.buffer_bytes()),
            network_buffer_size: config.network_buffer_bytes(),
            resized: false,
            sink,
            shutdown,
        }
    }

    /// Issue the first read
    pub fn begin(&mut self) -> Result<(), BackendError> {
        self.schedule().map_err(BackendError::Os)
    }

    /// Handle completions until the loop fails or is shut down
    pub fn run(mut self) {
        loop {
            let (buffer, status) = self.reader.complete();

            match status {
                ReadStatus::Complete(len) => {
                    // 1. Copy out of primary before it is reused
                    self.buffers.restore(buffer, len);
                    // 2. Keep a read outstanding while we parse
                    let scheduled = self.schedule();
                    // 3. Parse the copy
                    let records = parse_records(self.buffers.swapped());
                    self.sink.extend(reconstruct(&self.root, &records));

                    if let Err(message) = scheduled {
                        self.stop_with(&message);
                        break;
                    }
                }
                ReadStatus::Overflow => {
                    self.buffers.give_back(buffer);
                    warn!("Change buffer overflowed for {}", self.root.display());
                    self.sink.fail(BUFFER_OVERFLOW);
                    break;
                }
                ReadStatus::BufferTooLarge => {
                    drop(buffer);
                    if self.resized || self.buffers.size() <= self.network_buffer_size {
                        warn!(
                            "Read buffer of {} bytes rejected for {}",
                            self.buffers.size(),
                            self.root.display()
                        );
                        self.sink.fail(SHUTDOWN_UNEXPECTEDLY);
                        break;
                    }

                    info!(
                        "Shrinking read buffer for {} from {} to {} bytes",
                        self.root.display(),
                        self.buffers.size(),
                        self.network_buffer_size
                    );
                    self.resized = true;
                    self.buffers.resize(self.network_buffer_size);
                    if let Err(message) = self.schedule() {
                        self.stop_with(&message);
                        break;
                    }
                }
                ReadStatus::Cancelled if self.shutdown.load(Ordering::SeqCst) => {
                    self.buffers.give_back(buffer);
                    debug!("Read loop for {} cancelled", self.root.display());
                    break;
                }
                ReadStatus::Cancelled | ReadStatus::Failed(_) => {
                    self.buffers.give_back(buffer);
                    warn!("Read loop for {} failed: {:?}", self.root.display(), status);
                    self.sink.fail(SHUTDOWN_UNEXPECTEDLY);
                    break;
                }
            }
        }
    }

    fn schedule(&mut self) -> Result<(), String> {
        if self.shutdown.load(Ordering::SeqCst) {
            return Err("shutting down".to_string());
        }
        let Some(buffer) = self.buffers.lend() else {
            return Err("read already outstanding".to_string());
        };

        self.reader.schedule(buffer).map_err(|e| {
            self.buffers.give_back(e.buffer);
            e.message
        })
    }

    /// A read could not be issued; only an error when not shutting down
    fn stop_with(&self, message: &str) {
        if self.shutdown.load(Ordering::SeqCst) {
            debug!("Read loop for {} stopping", self.root.display());
        } else {
            warn!("Unable to issue read for {}: {}", self.root.display(), message);
            self.sink.fail(SHUTDOWN_UNEXPECTEDLY);
        }
    }
}

/// Opens a reader for a root path
pub type ReaderOpener<R> = Box<dyn Fn(&Path) -> Result<R, BackendError> + Send>;

/// [`Backend`] running a [`ReadLoop`] on its own thread
pub struct OverlappedBackend<R> {
    root: PathBuf,
    config: BackendConfig,
    open: ReaderOpener<R>,
    sink: Arc<EventSink>,
    shutdown: Arc<AtomicBool>,
    interrupt: Option<Interrupter>,
    thread: Option<JoinHandle<()>>,
}

impl<R: DirectoryReader + 'static> OverlappedBackend<R> {
    pub fn new(root: &Path, config: &BackendConfig, open: ReaderOpener<R>) -> Self {
        Self {
            root: root.to_path_buf(),
            config: config.clone(),
            open,
            sink: Arc::new(EventSink::new()),
            shutdown: Arc::new(AtomicBool::new(false)),
            interrupt: None,
            thread: None,
        }
    }
}

impl<R: DirectoryReader + 'static> Backend for OverlappedBackend<R> {
    fn activate(&mut self) -> Result<(), BackendError> {
        if self.thread.is_some() {
            return Ok(());
        }

        let reader = (self.open)(&self.root)?;
        self.interrupt = Some(reader.interrupter());

        let mut read_loop = ReadLoop::new(
            &self.root,
            reader,
            &self.config,
            Arc::clone(&self.sink),
            Arc::clone(&self.shutdown),
        );
        read_loop.begin()?;

        let thread = std::thread::Builder::new()
            .name("sentinel-read-loop".to_string())
            .spawn(move || read_loop.run())?;
        self.thread = Some(thread);

        debug!("Read loop started for {}", self.root.display());
        Ok(())
    }

    fn deactivate(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.sink.close();

        let Some(thread) = self.thread.take() else {
            return;
        };

        // The loop may issue one more read between our flag store and the
        // cancel, so keep interrupting until it is gone
        while !thread.is_finished() {
            if let Some(interrupt) = &self.interrupt {
                interrupt();
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        if thread.join().is_err() {
            warn!("Read loop thread for {} panicked", self.root.display());
        }
        self.interrupt = None;
        debug!("Read loop stopped for {}", self.root.display());
    }

    fn has_errored(&self) -> bool {
        self.sink.has_errored()
    }

    fn error(&self) -> Option<String> {
        self.sink.error()
    }

    fn is_watching(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    fn drain(&self) -> Vec<Event> {
        self.sink.drain()
    }
}

impl<R> Drop for OverlappedBackend<R> {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.sink.close();
        if let Some(thread) = self.thread.take() {
            while !thread.is_finished() {
                if let Some(interrupt) = &self.interrupt {
                    interrupt();
                }
                std::thread::sleep(Duration::from_millis(5));
            }
            let _ = thread.join();
        }
    }
}
