//! ReadDirectoryChangesW reader for the overlapped backend

use crate::config::BackendConfig;
use crate::error::BackendError;
use crate::platform::overlapped::{
    DirectoryReader, Interrupter, OverlappedBackend, ReadStatus, ScheduleError,
};
use std::ffi::c_void;
use std::os::windows::ffi::OsStrExt;
use std::path::Path;
use std::sync::Arc;
use windows_sys::Win32::Foundation::{
    CloseHandle, GetLastError, ERROR_INVALID_PARAMETER, ERROR_NOTIFY_ENUM_DIR,
    ERROR_OPERATION_ABORTED, HANDLE, INVALID_HANDLE_VALUE,
};
use windows_sys::Win32::Storage::FileSystem::{
    CreateFileW, ReadDirectoryChangesW, FILE_FLAG_BACKUP_SEMANTICS, FILE_FLAG_OVERLAPPED,
    FILE_LIST_DIRECTORY, FILE_NOTIFY_CHANGE_ATTRIBUTES, FILE_NOTIFY_CHANGE_CREATION,
    FILE_NOTIFY_CHANGE_DIR_NAME, FILE_NOTIFY_CHANGE_FILE_NAME, FILE_NOTIFY_CHANGE_LAST_ACCESS,
    FILE_NOTIFY_CHANGE_LAST_WRITE, FILE_NOTIFY_CHANGE_SECURITY, FILE_NOTIFY_CHANGE_SIZE,
    FILE_SHARE_DELETE, FILE_SHARE_READ, FILE_SHARE_WRITE, OPEN_EXISTING,
};
use windows_sys::Win32::System::Threading::CreateEventW;
use windows_sys::Win32::System::IO::{CancelIoEx, GetOverlappedResult, OVERLAPPED};

const NOTIFY_FILTER: u32 = FILE_NOTIFY_CHANGE_FILE_NAME
    | FILE_NOTIFY_CHANGE_DIR_NAME
    | FILE_NOTIFY_CHANGE_ATTRIBUTES
    | FILE_NOTIFY_CHANGE_SIZE
    | FILE_NOTIFY_CHANGE_LAST_WRITE
    | FILE_NOTIFY_CHANGE_LAST_ACCESS
    | FILE_NOTIFY_CHANGE_CREATION
    | FILE_NOTIFY_CHANGE_SECURITY;

/// Overlapped backend reading a directory handle
pub fn backend(root: &Path, config: &BackendConfig) -> OverlappedBackend<DirectoryHandleReader> {
    OverlappedBackend::new(root, config, Box::new(open_reader))
}

/// Owned kernel handle, closed on drop
struct OwnedHandle(HANDLE);

impl Drop for OwnedHandle {
    fn drop(&mut self) {
        unsafe { CloseHandle(self.0) };
    }
}

/// Reader over one directory handle with a single outstanding read
pub struct DirectoryHandleReader {
    directory: Arc<OwnedHandle>,
    event: OwnedHandle,
    overlapped: Box<OVERLAPPED>,
    /// Buffer the kernel is writing into, while a read is in flight
    in_flight: Option<Vec<u8>>,
}

// Safety: OVERLAPPED holds a raw pointer only in an unused union arm; the
// handles may be used from any thread.
unsafe impl Send for DirectoryHandleReader {}

fn last_error_message() -> String {
    std::io::Error::last_os_error().to_string()
}

/// Open `root` for overlapped directory reads
pub fn open_reader(root: &Path) -> Result<DirectoryHandleReader, BackendError> {
    if !root.exists() {
        return Err(BackendError::MissingPath(root.to_path_buf()));
    }

    let wide: Vec<u16> = root
        .as_os_str()
        .encode_wide()
        .chain(std::iter::once(0))
        .collect();

    let directory = unsafe {
        CreateFileW(
            wide.as_ptr(),
            FILE_LIST_DIRECTORY,
            FILE_SHARE_READ | FILE_SHARE_WRITE | FILE_SHARE_DELETE,
            std::ptr::null(),
            OPEN_EXISTING,
            FILE_FLAG_BACKUP_SEMANTICS | FILE_FLAG_OVERLAPPED,
            0,
        )
    };
    if directory == INVALID_HANDLE_VALUE {
        return Err(BackendError::Io(std::io::Error::last_os_error()));
    }
    let directory = OwnedHandle(directory);

    let event = unsafe { CreateEventW(std::ptr::null(), 1, 0, std::ptr::null()) };
    if event == 0 {
        return Err(BackendError::Io(std::io::Error::last_os_error()));
    }

    Ok(DirectoryHandleReader {
        directory: Arc::new(directory),
        event: OwnedHandle(event),
        overlapped: Box::new(unsafe { std::mem::zeroed() }),
        in_flight: None,
    })
}

impl DirectoryHandleReader {
    /// Wait for the outstanding read; returns bytes or the error code
    fn wait(&mut self) -> Result<u32, u32> {
        let mut bytes = 0u32;
        let ok = unsafe {
            GetOverlappedResult(self.directory.0, &*self.overlapped, &mut bytes, 1)
        };
        if ok == 0 {
            Err(unsafe { GetLastError() })
        } else {
            Ok(bytes)
        }
    }
}

impl DirectoryReader for DirectoryHandleReader {
    fn schedule(&mut self, mut buffer: Vec<u8>) -> Result<(), ScheduleError> {
        *self.overlapped = unsafe { std::mem::zeroed() };
        self.overlapped.hEvent = self.event.0;

        let ok = unsafe {
            ReadDirectoryChangesW(
                self.directory.0,
                buffer.as_mut_ptr() as *mut c_void,
                buffer.len() as u32,
                1,
                NOTIFY_FILTER,
                std::ptr::null_mut(),
                &mut *self.overlapped,
                None,
            )
        };
        if ok == 0 {
            return Err(ScheduleError {
                buffer,
                message: last_error_message(),
            });
        }

        self.in_flight = Some(buffer);
        Ok(())
    }

    fn complete(&mut self) -> (Vec<u8>, ReadStatus) {
        let result = self.wait();
        let Some(buffer) = self.in_flight.take() else {
            return (Vec::new(), ReadStatus::Failed("no read outstanding".to_string()));
        };

        let status = match result {
            // The kernel discarded the changes instead of filling the buffer
            Ok(0) => ReadStatus::Overflow,
            Ok(bytes) => ReadStatus::Complete(bytes as usize),
            Err(ERROR_NOTIFY_ENUM_DIR) => ReadStatus::Overflow,
            Err(ERROR_INVALID_PARAMETER) => ReadStatus::BufferTooLarge,
            Err(ERROR_OPERATION_ABORTED) => ReadStatus::Cancelled,
            Err(code) => ReadStatus::Failed(std::io::Error::from_raw_os_error(code as i32).to_string()),
        };
        (buffer, status)
    }

    fn interrupter(&self) -> Interrupter {
        let directory = Arc::clone(&self.directory);
        Arc::new(move || {
            unsafe { CancelIoEx(directory.0, std::ptr::null()) };
        })
    }
}

impl Drop for DirectoryHandleReader {
    fn drop(&mut self) {
        // The kernel must be done with the buffer before it is freed
        if self.in_flight.is_some() {
            unsafe { CancelIoEx(self.directory.0, &*self.overlapped) };
            let _ = self.wait();
        }
    }
}
