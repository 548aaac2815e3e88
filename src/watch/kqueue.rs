// src/watch/kqueue.rs

//! BSD/macOS backend: kqueue `EVFILT_VNODE`.
//!
//! Unlike the other backends, the kqueue itself is owned by the *host*, which
//! passes it in at construction. The host may already be multiplexing LSP
//! transport and timers on that kqueue; this backend only registers vnode
//! filters on it and never waits on its own behalf.
//!
//! Directories are held open with event-only handles. Config files are
//! additionally registered when they are read, so an edit to the file wakes
//! the host even when the containing directory stays quiet.

use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::os::fd::AsRawFd;
use std::path::Path;
use std::sync::Mutex;

use nix::sys::event::{EventFilter, EventFlag, FilterFlag, KEvent, Kqueue};
use tracing::{debug, warn};

use crate::canon::{self, CanonicalPath, Canonicalized, CanonicalizeError};
use crate::fs::{ConfigFilesystem, ReadError};
use crate::loader::{ConfigChange, ConfigLoader};
use crate::watch::WatchError;

/// Size the host should use for its drain buffer; kqueue coalesces per
/// vnode, but one drain may still carry many events.
pub const EVENT_BUFFER_SIZE: usize = 100;

pub struct KqueueFilesystem<'kq> {
    kqueue: &'kq Kqueue,
    watched_directories: Mutex<HashMap<CanonicalPath, File>>,
    // Config-file handles live here rather than in a per-file slot keyed by
    // path; the handle only needs to stay open for its filter to stay
    // registered.
    watched_files: Mutex<Vec<File>>,
}

impl std::fmt::Debug for KqueueFilesystem<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KqueueFilesystem")
            .field(
                "watched_directories",
                &self.watched_directories.lock().unwrap().len(),
            )
            .field("watched_files", &self.watched_files.lock().unwrap().len())
            .finish()
    }
}

impl<'kq> KqueueFilesystem<'kq> {
    pub fn new(kqueue: &'kq Kqueue) -> Self {
        Self {
            kqueue,
            watched_directories: Mutex::new(HashMap::new()),
            watched_files: Mutex::new(Vec::new()),
        }
    }

    /// Consume one batch of events the host collected from its kqueue and
    /// rescan every watched source. Event payloads are ignored; they only
    /// mean "something may have changed".
    pub fn process_changes<'l>(
        &self,
        events: &[KEvent],
        loader: &'l mut ConfigLoader<'_>,
    ) -> Vec<ConfigChange<'l>> {
        if !events.is_empty() {
            debug!(count = events.len(), "draining kqueue events");
        }
        loader.refresh()
    }

    fn watch_directory(&self, directory: &CanonicalPath) -> Result<(), WatchError> {
        let mut watched = self.watched_directories.lock().unwrap();
        if watched.contains_key(directory) {
            return Ok(());
        }

        let handle = match open_event_handle(directory.as_path()) {
            Ok(handle) => handle,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => {
                return Err(WatchError::Watch {
                    path: directory.as_path().to_path_buf(),
                    source: e,
                })
            }
        };
        self.register_vnode(&handle, directory.as_path())?;
        debug!(directory = %directory, "watching directory");
        watched.insert(directory.clone(), handle);
        Ok(())
    }

    fn watch_file(&self, file: &File, path: &Path) -> Result<(), WatchError> {
        self.register_vnode(file, path)
    }

    fn register_vnode(&self, handle: &File, path: &Path) -> Result<(), WatchError> {
        let fflags = FilterFlag::NOTE_DELETE
            | FilterFlag::NOTE_WRITE
            | FilterFlag::NOTE_EXTEND
            | FilterFlag::NOTE_ATTRIB
            | FilterFlag::NOTE_LINK
            | FilterFlag::NOTE_RENAME
            | FilterFlag::NOTE_REVOKE;
        let changelist = [KEvent::new(
            handle.as_raw_fd() as usize,
            EventFilter::EVFILT_VNODE,
            EventFlag::EV_ADD | EventFlag::EV_ENABLE,
            fflags,
            0,
            0,
        )];
        let mut receipts: [KEvent; 0] = [];
        let timeout = libc::timespec {
            tv_sec: 0,
            tv_nsec: 0,
        };
        self.kqueue
            .kevent(&changelist, &mut receipts, Some(timeout))
            .map_err(|e| WatchError::Watch {
                path: path.to_path_buf(),
                source: std::io::Error::from(e),
            })?;
        Ok(())
    }
}

#[cfg(any(target_os = "macos", target_os = "ios"))]
fn open_event_handle(path: &Path) -> std::io::Result<File> {
    use std::fs::OpenOptions;
    use std::os::unix::fs::OpenOptionsExt;
    // O_EVTONLY keeps the volume ejectable while the handle is held.
    OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_EVTONLY)
        .open(path)
}

#[cfg(not(any(target_os = "macos", target_os = "ios")))]
fn open_event_handle(path: &Path) -> std::io::Result<File> {
    File::open(path)
}

impl ConfigFilesystem for KqueueFilesystem<'_> {
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
        let path = directory.join(file_name);
        let mut file = match File::open(path.as_path()) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ReadError::NotFound {
                    path: path.to_string(),
                })
            }
            Err(e) => {
                return Err(ReadError::Io {
                    path: path.to_string(),
                    source: e,
                })
            }
        };

        // Register the file handle before reading so an edit racing the read
        // still produces a wake-up.
        if let Err(e) = self.watch_file(&file, path.as_path()) {
            warn!(path = %path, error = %e, "failed to watch config file");
        }

        let mut content = Vec::new();
        file.read_to_end(&mut content).map_err(|e| ReadError::Io {
            path: path.to_string(),
            source: e,
        })?;
        self.watched_files.lock().unwrap().push(file);
        Ok(content)
    }
}
