//! macOS FSEvents backend
//!
//! Each backend runs its own CFRunLoop on a dedicated thread. The stream
//! callback hands every batch to a [`StreamTranslator`] and pushes the
//! result into the sink.

use crate::config::BackendConfig;
use crate::error::BackendError;
use crate::event::Event;
use crate::platform::stream::{FsProbe, StreamFlags, StreamTranslator};
use crate::platform::{Backend, EventSink, SHUTDOWN_UNEXPECTEDLY};
use core_foundation_sys::array::{CFArrayCreate, CFArrayRef};
use core_foundation_sys::base::{kCFAllocatorDefault, CFIndex, CFRelease};
use core_foundation_sys::runloop::{
    kCFRunLoopDefaultMode, CFRunLoopGetCurrent, CFRunLoopRef, CFRunLoopRun, CFRunLoopStop,
};
use core_foundation_sys::string::{kCFStringEncodingUTF8, CFStringCreateWithBytes, CFStringRef};
use crossbeam_channel::bounded;
use std::ffi::CStr;
use std::os::raw::{c_char, c_void};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, warn};

type FSEventStreamRef = *mut c_void;
type FSEventStreamEventId = u64;

#[repr(C)]
struct FSEventStreamContext {
    version: CFIndex,
    info: *mut c_void,
    retain: Option<extern "C" fn(*const c_void) -> *const c_void>,
    release: Option<extern "C" fn(*const c_void)>,
    copy_description: Option<extern "C" fn(*const c_void) -> CFStringRef>,
}

type FSEventStreamCallback = extern "C" fn(
    stream_ref: FSEventStreamRef,
    client_callback_info: *mut c_void,
    num_events: usize,
    event_paths: *mut c_void,
    event_flags: *const u32,
    event_ids: *const FSEventStreamEventId,
);

const EVENT_ID_SINCE_NOW: FSEventStreamEventId = 0xFFFF_FFFF_FFFF_FFFF;
const CREATE_FLAG_FILE_EVENTS: u32 = 0x10;

#[link(name = "CoreServices", kind = "framework")]
extern "C" {
    fn FSEventStreamCreate(
        allocator: *const c_void,
        callback: FSEventStreamCallback,
        context: *mut FSEventStreamContext,
        paths_to_watch: CFArrayRef,
        since_when: FSEventStreamEventId,
        latency: f64,
        flags: u32,
    ) -> FSEventStreamRef;

    fn FSEventStreamScheduleWithRunLoop(
        stream: FSEventStreamRef,
        run_loop: CFRunLoopRef,
        run_loop_mode: CFStringRef,
    );

    fn FSEventStreamStart(stream: FSEventStreamRef) -> bool;
    fn FSEventStreamStop(stream: FSEventStreamRef);
    fn FSEventStreamInvalidate(stream: FSEventStreamRef);
    fn FSEventStreamRelease(stream: FSEventStreamRef);
}

/// Run loop reference that can cross threads
///
/// Safety: `CFRunLoopStop` may be called from any thread.
#[derive(Clone, Copy)]
struct SendableRunLoop(CFRunLoopRef);
unsafe impl Send for SendableRunLoop {}
unsafe impl Sync for SendableRunLoop {}

/// State reachable from the stream callback
struct StreamContext {
    sink: Arc<EventSink>,
    translator: StreamTranslator<FsProbe>,
}

/// [`Backend`] over an FSEvents stream
pub struct FsEventsBackend {
    root: PathBuf,
    latency: Duration,
    sink: Arc<EventSink>,
    running: Arc<AtomicBool>,
    run_loop: Option<SendableRunLoop>,
    thread: Option<JoinHandle<()>>,
}

impl FsEventsBackend {
    pub fn new(root: &Path, config: &BackendConfig) -> Self {
        Self {
            root: root.to_path_buf(),
            latency: config.latency(),
            sink: Arc::new(EventSink::new()),
            running: Arc::new(AtomicBool::new(false)),
            run_loop: None,
            thread: None,
        }
    }

    fn lost(&self) -> bool {
        self.thread.is_some() && (!self.running.load(Ordering::SeqCst) || !self.root.exists())
    }
}

impl Backend for FsEventsBackend {
    fn activate(&mut self) -> Result<(), BackendError> {
        if self.thread.is_some() {
            return Ok(());
        }
        if !self.root.exists() {
            return Err(BackendError::MissingPath(self.root.clone()));
        }

        let (ready_tx, ready_rx) = bounded::<Result<SendableRunLoop, String>>(1);
        let path = self.root.to_string_lossy().into_owned();
        let latency = self.latency.as_secs_f64();
        let context = Arc::new(StreamContext {
            sink: Arc::clone(&self.sink),
            translator: StreamTranslator::new(FsProbe),
        });
        let running = Arc::clone(&self.running);

        let thread = std::thread::Builder::new()
            .name("sentinel-fsevents".to_string())
            .spawn(move || {
                // Safety: the calls below follow the CoreServices contract;
                // the context pointer stays valid until it is reclaimed
                // after the run loop exits.
                unsafe {
                    let cf_path = str_to_cfstring(&path);
                    let paths = CFArrayCreate(
                        kCFAllocatorDefault,
                        &cf_path as *const _ as *const *const c_void,
                        1,
                        std::ptr::null(),
                    );
                    let info = Arc::into_raw(context) as *mut c_void;
                    let mut stream_context = FSEventStreamContext {
                        version: 0,
                        info,
                        retain: None,
                        release: None,
                        copy_description: None,
                    };

                    let stream = FSEventStreamCreate(
                        kCFAllocatorDefault,
                        stream_callback,
                        &mut stream_context,
                        paths,
                        EVENT_ID_SINCE_NOW,
                        latency,
                        CREATE_FLAG_FILE_EVENTS,
                    );
                    CFRelease(paths as *const c_void);
                    CFRelease(cf_path as *const c_void);

                    if stream.is_null() {
                        drop(Arc::from_raw(info as *const StreamContext));
                        let _ = ready_tx.send(Err("FSEventStreamCreate failed".to_string()));
                        return;
                    }

                    let run_loop = CFRunLoopGetCurrent();
                    FSEventStreamScheduleWithRunLoop(stream, run_loop, kCFRunLoopDefaultMode);
                    if !FSEventStreamStart(stream) {
                        FSEventStreamInvalidate(stream);
                        FSEventStreamRelease(stream);
                        drop(Arc::from_raw(info as *const StreamContext));
                        let _ = ready_tx.send(Err("FSEventStreamStart failed".to_string()));
                        return;
                    }

                    running.store(true, Ordering::SeqCst);
                    let _ = ready_tx.send(Ok(SendableRunLoop(run_loop)));

                    CFRunLoopRun();
                    running.store(false, Ordering::SeqCst);

                    FSEventStreamStop(stream);
                    FSEventStreamInvalidate(stream);
                    FSEventStreamRelease(stream);
                    drop(Arc::from_raw(info as *const StreamContext));
                }
            })?;

        match ready_rx.recv() {
            Ok(Ok(run_loop)) => {
                self.run_loop = Some(run_loop);
                self.thread = Some(thread);
                debug!("FSEvents stream started for {}", self.root.display());
                Ok(())
            }
            Ok(Err(message)) => {
                let _ = thread.join();
                Err(BackendError::Os(message))
            }
            Err(_) => {
                let _ = thread.join();
                Err(BackendError::Os("FSEvents thread exited".to_string()))
            }
        }
    }

    fn deactivate(&mut self) {
        self.sink.close();
        let Some(thread) = self.thread.take() else {
            return;
        };

        // A stop issued before the loop starts running is lost, so repeat
        // it until the thread is gone
        if let Some(run_loop) = self.run_loop.take() {
            while !thread.is_finished() {
                unsafe { CFRunLoopStop(run_loop.0) };
                std::thread::sleep(Duration::from_millis(5));
            }
        }
        if thread.join().is_err() {
            warn!("FSEvents thread for {} panicked", self.root.display());
        }
        debug!("FSEvents stream stopped for {}", self.root.display());
    }

    fn has_errored(&self) -> bool {
        self.sink.has_errored() || self.lost()
    }

    fn error(&self) -> Option<String> {
        self.sink
            .error()
            .or_else(|| self.lost().then(|| SHUTDOWN_UNEXPECTEDLY.to_string()))
    }

    fn is_watching(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn drain(&self) -> Vec<Event> {
        self.sink.drain()
    }
}

impl Drop for FsEventsBackend {
    fn drop(&mut self) {
        self.deactivate();
    }
}

extern "C" fn stream_callback(
    _stream_ref: FSEventStreamRef,
    client_callback_info: *mut c_void,
    num_events: usize,
    event_paths: *mut c_void,
    event_flags: *const u32,
    _event_ids: *const FSEventStreamEventId,
) {
    let mut batch = Vec::with_capacity(num_events);

    // Safety: FSEvents passes `num_events` C strings and flag words, and
    // the context pointer outlives the stream
    let context = unsafe {
        let paths = event_paths as *const *const c_char;
        for i in 0..num_events {
            let path = CStr::from_ptr(*paths.add(i)).to_string_lossy();
            let flags = StreamFlags::from_bits_truncate(*event_flags.add(i));
            batch.push((PathBuf::from(path.as_ref()), flags));
        }
        &*(client_callback_info as *const StreamContext)
    };

    let events = context.translator.translate(&batch);
    context.sink.extend(events);
}

unsafe fn str_to_cfstring(s: &str) -> CFStringRef {
    CFStringCreateWithBytes(
        kCFAllocatorDefault,
        s.as_ptr(),
        s.len() as CFIndex,
        kCFStringEncodingUTF8,
        false as u8,
    )
}
