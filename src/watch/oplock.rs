// src/watch/oplock.rs

//! Windows backend: directory oplocks.
//!
//! The familiar directory-change APIs (`FindFirstChangeNotificationW`,
//! `ReadDirectoryChangesW`) hold a directory handle with a share mode that
//! blocks renaming any *ancestor* of the watched directory. An editor moving
//! a project folder would start failing mysteriously. Oplocked handles do not
//! have that problem: we acquire a read + handle-cache oplock on each
//! directory, and when anything inside the directory changes (or the
//! directory or any ancestor is renamed) the oplock *breaks* and the pending
//! ioctl completes.
//!
//! All directory handles are attached to a single I/O completion port which a
//! dedicated background thread drains. A broken oplock unwatches the
//! directory (the next refresh walk re-watches whatever still exists) and
//! signals a manual-reset event; the host waits on that event and calls
//! [`process_changes`](OplockFilesystem::process_changes), which resets the
//! event before rescanning so nothing is lost.

use std::collections::HashMap;
use std::ffi::c_void;
use std::os::windows::ffi::OsStrExt;
use std::path::Path;
use std::ptr;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, error, warn};
use windows_sys::Win32::Foundation::{
    CloseHandle, GetLastError, ERROR_FILE_NOT_FOUND, ERROR_IO_PENDING, ERROR_NOT_FOUND,
    ERROR_OPERATION_ABORTED, ERROR_PATH_NOT_FOUND, HANDLE, INVALID_HANDLE_VALUE, WAIT_OBJECT_0,
    WAIT_TIMEOUT,
};
use windows_sys::Win32::Storage::FileSystem::{
    CreateFileW, GetFileInformationByHandleEx, FileIdInfo, FILE_ATTRIBUTE_NORMAL,
    FILE_FLAG_BACKUP_SEMANTICS, FILE_FLAG_OVERLAPPED, FILE_ID_INFO, FILE_SHARE_DELETE,
    FILE_SHARE_READ, FILE_SHARE_WRITE, OPEN_EXISTING, OPLOCK_LEVEL_CACHE_HANDLE,
    OPLOCK_LEVEL_CACHE_READ,
};
use windows_sys::Win32::System::Ioctl::{
    FSCTL_REQUEST_OPLOCK, REQUEST_OPLOCK_CURRENT_VERSION, REQUEST_OPLOCK_INPUT_BUFFER,
    REQUEST_OPLOCK_INPUT_FLAG_REQUEST, REQUEST_OPLOCK_OUTPUT_BUFFER,
    REQUEST_OPLOCK_OUTPUT_FLAG_ACK_REQUIRED,
};
use windows_sys::Win32::System::Threading::{
    CreateEventW, ResetEvent, SetEvent, WaitForSingleObject, INFINITE,
};
use windows_sys::Win32::System::IO::{
    CancelIoEx, CreateIoCompletionPort, DeviceIoControl, GetQueuedCompletionStatus,
    PostQueuedCompletionStatus, OVERLAPPED,
};

use crate::canon::{self, CanonicalPath, Canonicalized, CanonicalizeError};
use crate::fs::{read_file_at, ConfigFilesystem, ReadError};
use crate::loader::{ConfigChange, ConfigLoader};
use crate::watch::WatchError;

const COMPLETION_KEY_STOP_IO_THREAD: usize = 1;
const COMPLETION_KEY_DIRECTORY: usize = 2;

/// Owned Windows handle, closed on drop.
#[derive(Debug)]
struct Handle(HANDLE);

// HANDLEs are kernel object references; the objects themselves are
// thread-safe.
unsafe impl Send for Handle {}
unsafe impl Sync for Handle {}

impl Handle {
    fn get(&self) -> HANDLE {
        self.0
    }
}

impl Drop for Handle {
    fn drop(&mut self) {
        unsafe {
            CloseHandle(self.0);
        }
    }
}

/// One oplocked directory.
///
/// The pending `FSCTL_REQUEST_OPLOCK` ioctl holds pointers to `overlapped`
/// and `oplock_response`, so every `WatchedDirectory` is boxed and must stay
/// at its address until the completion for it has been delivered.
struct WatchedDirectory {
    directory_handle: Handle,
    directory_id: FILE_ID_INFO,
    overlapped: OVERLAPPED,
    oplock_response: REQUEST_OPLOCK_OUTPUT_BUFFER,
}

unsafe impl Send for WatchedDirectory {}

impl WatchedDirectory {
    fn new(directory_handle: Handle, directory_id: FILE_ID_INFO) -> Box<Self> {
        Box::new(Self {
            directory_handle,
            directory_id,
            overlapped: unsafe { std::mem::zeroed() },
            oplock_response: unsafe { std::mem::zeroed() },
        })
    }

    /// Request cancellation of the pending oplock ioctl. The completion
    /// (with `ERROR_OPERATION_ABORTED`) arrives on the I/O thread, which
    /// removes the entry.
    fn begin_cancel(&self) {
        let ok = unsafe { CancelIoEx(self.directory_handle.get(), ptr::null()) };
        if ok == 0 {
            let code = unsafe { GetLastError() };
            // ERROR_NOT_FOUND: the completion already fired and is in flight.
            if code != ERROR_NOT_FOUND {
                warn!(code, "CancelIoEx failed for watched directory");
            }
        }
    }
}

struct WatcherState {
    watched_directories: Mutex<HashMap<CanonicalPath, Box<WatchedDirectory>>>,
    directory_unwatched: Condvar,
}

#[derive(Debug)]
pub struct OplockFilesystem {
    change_event: Arc<Handle>,
    io_completion_port: Arc<Handle>,
    state: Arc<WatcherState>,
    io_thread: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for WatcherState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatcherState").finish_non_exhaustive()
    }
}

impl OplockFilesystem {
    pub fn new() -> Result<Self, WatchError> {
        let change_event = unsafe {
            CreateEventW(
                ptr::null(),
                1, // manual reset; process_changes resets it before rescanning
                0,
                ptr::null(),
            )
        };
        if change_event.is_null() {
            return Err(WatchError::Init {
                reason: format!("CreateEventW failed: {}", unsafe { GetLastError() }),
            });
        }
        let change_event = Arc::new(Handle(change_event));

        let iocp = unsafe { CreateIoCompletionPort(INVALID_HANDLE_VALUE, ptr::null_mut(), 0, 1) };
        if iocp.is_null() {
            return Err(WatchError::Init {
                reason: format!("CreateIoCompletionPort failed: {}", unsafe { GetLastError() }),
            });
        }
        let io_completion_port = Arc::new(Handle(iocp));

        let state = Arc::new(WatcherState {
            watched_directories: Mutex::new(HashMap::new()),
            directory_unwatched: Condvar::new(),
        });

        let io_thread = {
            let state = Arc::clone(&state);
            let iocp = Arc::clone(&io_completion_port);
            let change_event = Arc::clone(&change_event);
            std::thread::Builder::new()
                .name("confwatch-io".to_string())
                .spawn(move || run_io_thread(&state, &iocp, &change_event))
                .map_err(|e| WatchError::Init {
                    reason: format!("spawning I/O thread: {e}"),
                })?
        };

        Ok(Self {
            change_event,
            io_completion_port,
            state,
            io_thread: Some(io_thread),
        })
    }

    /// The manual-reset event signalled whenever a watched directory saw
    /// activity. Exposed so the host can multiplex it with other waits.
    pub fn change_event(&self) -> HANDLE {
        self.change_event.get()
    }

    /// Wait until some watched directory changes or `timeout` elapses.
    pub fn wait_for_change(&self, timeout: Option<Duration>) -> std::io::Result<bool> {
        let timeout_ms = match timeout {
            Some(duration) => duration.as_millis().min(u128::from(INFINITE - 1)) as u32,
            None => INFINITE,
        };
        match unsafe { WaitForSingleObject(self.change_event.get(), timeout_ms) } {
            WAIT_OBJECT_0 => Ok(true),
            WAIT_TIMEOUT => Ok(false),
            _ => Err(std::io::Error::last_os_error()),
        }
    }

    /// Reset the change event and rescan every watched source.
    ///
    /// The reset happens before the rescan: a break arriving mid-refresh
    /// re-signals the event and the host simply refreshes again.
    pub fn process_changes<'l>(
        &self,
        loader: &'l mut ConfigLoader<'_>,
    ) -> Vec<ConfigChange<'l>> {
        unsafe {
            ResetEvent(self.change_event.get());
        }
        loader.refresh()
    }

    fn watch_directory(&self, directory: &CanonicalPath) -> Result<(), WatchError> {
        let wide: Vec<u16> = directory
            .as_path()
            .as_os_str()
            .encode_wide()
            .chain(std::iter::once(0))
            .collect();

        let raw_handle = unsafe {
            CreateFileW(
                wide.as_ptr(),
                windows_sys::Win32::Foundation::GENERIC_READ,
                FILE_SHARE_DELETE | FILE_SHARE_READ | FILE_SHARE_WRITE,
                ptr::null(),
                OPEN_EXISTING,
                FILE_ATTRIBUTE_NORMAL | FILE_FLAG_BACKUP_SEMANTICS | FILE_FLAG_OVERLAPPED,
                ptr::null_mut(),
            )
        };
        if raw_handle == INVALID_HANDLE_VALUE {
            let code = unsafe { GetLastError() };
            if code == ERROR_FILE_NOT_FOUND || code == ERROR_PATH_NOT_FOUND {
                // Not created yet; the parent's watch reports its arrival.
                return Ok(());
            }
            return Err(WatchError::Watch {
                path: directory.as_path().to_path_buf(),
                source: std::io::Error::from_raw_os_error(code as i32),
            });
        }
        let directory_handle = Handle(raw_handle);

        let mut directory_id: FILE_ID_INFO = unsafe { std::mem::zeroed() };
        let ok = unsafe {
            GetFileInformationByHandleEx(
                directory_handle.get(),
                FileIdInfo,
                &mut directory_id as *mut FILE_ID_INFO as *mut c_void,
                std::mem::size_of::<FILE_ID_INFO>() as u32,
            )
        };
        if ok == 0 {
            return Err(WatchError::Watch {
                path: directory.as_path().to_path_buf(),
                source: std::io::Error::last_os_error(),
            });
        }

        let mut watched = self.state.watched_directories.lock().unwrap();
        if let Some(existing) = watched.get(directory) {
            if file_ids_equal(&existing.directory_id, &directory_id) {
                return Ok(());
            }
            // The path now names a different directory (it was replaced or
            // renamed over). Tear down the stale watch before installing a
            // fresh one under the same key.
            debug!(directory = %directory, "directory identity changed; rebinding watch");
            existing.begin_cancel();
            watched = self.wait_until_unwatched(watched, directory);
        }

        let entry = match watched.entry(directory.clone()) {
            std::collections::hash_map::Entry::Vacant(vacant) => {
                vacant.insert(WatchedDirectory::new(directory_handle, directory_id))
            }
            // Only the host thread inserts, and we just waited for removal;
            // an occupied slot here means the same directory was re-entered
            // concurrently and is already watched.
            std::collections::hash_map::Entry::Occupied(_) => return Ok(()),
        };

        let attached = unsafe {
            CreateIoCompletionPort(
                entry.directory_handle.get(),
                self.io_completion_port.get(),
                COMPLETION_KEY_DIRECTORY,
                1,
            )
        };
        if attached.is_null() {
            let source = std::io::Error::last_os_error();
            let path = directory.as_path().to_path_buf();
            watched.remove(directory);
            return Err(WatchError::Watch { path, source });
        }

        let request = REQUEST_OPLOCK_INPUT_BUFFER {
            StructureVersion: REQUEST_OPLOCK_CURRENT_VERSION as u16,
            StructureLength: std::mem::size_of::<REQUEST_OPLOCK_INPUT_BUFFER>() as u16,
            RequestedOplockLevel: OPLOCK_LEVEL_CACHE_READ | OPLOCK_LEVEL_CACHE_HANDLE,
            Flags: REQUEST_OPLOCK_INPUT_FLAG_REQUEST,
        };
        let ok = unsafe {
            DeviceIoControl(
                entry.directory_handle.get(),
                FSCTL_REQUEST_OPLOCK,
                &request as *const REQUEST_OPLOCK_INPUT_BUFFER as *const c_void,
                std::mem::size_of::<REQUEST_OPLOCK_INPUT_BUFFER>() as u32,
                &mut entry.oplock_response as *mut REQUEST_OPLOCK_OUTPUT_BUFFER as *mut c_void,
                std::mem::size_of::<REQUEST_OPLOCK_OUTPUT_BUFFER>() as u32,
                ptr::null_mut(),
                &mut entry.overlapped,
            )
        };
        if ok != 0 {
            // Synchronous completion would mean the oplock broke before we
            // even returned; nothing known triggers this for directories.
            warn!(directory = %directory, "oplock request completed synchronously");
            return Ok(());
        }
        let code = unsafe { GetLastError() };
        if code != ERROR_IO_PENDING {
            let source = std::io::Error::from_raw_os_error(code as i32);
            let path = directory.as_path().to_path_buf();
            watched.remove(directory);
            return Err(WatchError::Watch { path, source });
        }
        debug!(directory = %directory, "watching directory");
        Ok(())
    }

    fn wait_until_unwatched<'g>(
        &self,
        guard: MutexGuard<'g, HashMap<CanonicalPath, Box<WatchedDirectory>>>,
        directory: &CanonicalPath,
    ) -> MutexGuard<'g, HashMap<CanonicalPath, Box<WatchedDirectory>>> {
        self.state
            .directory_unwatched
            .wait_while(guard, |watched| watched.contains_key(directory))
            .unwrap()
    }
}

impl ConfigFilesystem for OplockFilesystem {
    fn canonicalize_path(&self, path: &Path) -> Result<Canonicalized, CanonicalizeError> {
        canon::canonicalize_path(path)
    }

    fn enter_directory(&self, directory: &CanonicalPath) -> Result<(), WatchError> {
        self.watch_directory(directory)
    }

    fn read_file(
        &self,
        directory: &CanonicalPath,
        file_name: &str,
    ) -> Result<Vec<u8>, ReadError> {
        read_file_at(directory.join(file_name).as_path())
    }
}

impl Drop for OplockFilesystem {
    fn drop(&mut self) {
        {
            let mut watched = self.state.watched_directories.lock().unwrap();
            for entry in watched.values() {
                entry.begin_cancel();
            }
            while !watched.is_empty() {
                watched = self.state.directory_unwatched.wait(watched).unwrap();
            }
        }

        let ok = unsafe {
            PostQueuedCompletionStatus(
                self.io_completion_port.get(),
                0,
                COMPLETION_KEY_STOP_IO_THREAD,
                ptr::null_mut(),
            )
        };
        if ok == 0 {
            error!(code = unsafe { GetLastError() }, "failed to stop I/O thread");
            return;
        }
        if let Some(thread) = self.io_thread.take() {
            let _ = thread.join();
        }
    }
}

fn run_io_thread(state: &WatcherState, iocp: &Handle, change_event: &Handle) {
    loop {
        let mut bytes_transferred: u32 = 0;
        let mut completion_key: usize = 0;
        let mut overlapped: *mut OVERLAPPED = ptr::null_mut();
        let ok = unsafe {
            GetQueuedCompletionStatus(
                iocp.get(),
                &mut bytes_transferred,
                &mut completion_key,
                &mut overlapped,
                INFINITE,
            )
        };
        let error_code = if ok == 0 { unsafe { GetLastError() } } else { 0 };
        if ok == 0 && overlapped.is_null() {
            // The port itself failed; nothing sensible to recover.
            error!(code = error_code, "GetQueuedCompletionStatus failed");
            continue;
        }

        match completion_key {
            COMPLETION_KEY_DIRECTORY => {
                handle_directory_event(state, change_event, overlapped, error_code);
            }
            COMPLETION_KEY_STOP_IO_THREAD => return,
            key => {
                error!(key, "unexpected completion key");
            }
        }
    }
}

fn handle_directory_event(
    state: &WatcherState,
    change_event: &Handle,
    overlapped: *mut OVERLAPPED,
    error_code: u32,
) {
    let mut watched = state.watched_directories.lock().unwrap();

    let aborted = error_code == ERROR_OPERATION_ABORTED;
    let Some(directory) = watched
        .iter()
        .find(|(_, entry)| ptr::eq(&entry.overlapped, overlapped.cast_const()))
        .map(|(path, _)| path.clone())
    else {
        error!("completion for unknown directory watch");
        return;
    };

    if !aborted {
        // The oplock broke: a file in the directory was created, modified,
        // or deleted, or the directory or an ancestor was renamed.
        debug!(directory = %directory, "oplock broke");
        if let Some(entry) = watched.get(&directory) {
            debug_assert!(
                entry.oplock_response.Flags & REQUEST_OPLOCK_OUTPUT_FLAG_ACK_REQUIRED != 0
            );
        }
    }

    // Dropping the entry closes the directory handle, which releases the
    // oplock and unblocks whichever operation broke it.
    watched.remove(&directory);
    state.directory_unwatched.notify_all();
    drop(watched);

    if !aborted {
        let ok = unsafe { SetEvent(change_event.get()) };
        if ok == 0 {
            error!(code = unsafe { GetLastError() }, "SetEvent failed");
        }
    }
}

fn file_ids_equal(a: &FILE_ID_INFO, b: &FILE_ID_INFO) -> bool {
    a.VolumeSerialNumber == b.VolumeSerialNumber && a.FileId.Identifier == b.FileId.Identifier
}
