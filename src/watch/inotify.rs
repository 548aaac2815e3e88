// src/watch/inotify.rs

//! Linux backend: inotify.
//!
//! One inotify instance watches every directory the resolver visits. The
//! instance's fd is level-triggered readable while events are queued, so the
//! host can `poll(2)` it (or hand it to its own event loop via
//! [`poll_fd`](InotifyFilesystem::poll_fd)). Events carry no semantic weight
//! here: on wake-up they are read and discarded, and the refresh rescans
//! every watched source from scratch.

use std::collections::HashSet;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::inotify::{AddWatchFlags, InitFlags, Inotify, WatchDescriptor};
use tracing::{debug, warn};

use crate::canon::{self, CanonicalPath, Canonicalized, CanonicalizeError};
use crate::fs::{read_file_at, ConfigFilesystem, ReadError};
use crate::loader::{ConfigChange, ConfigLoader};
use crate::watch::WatchError;

pub struct InotifyFilesystem {
    inotify: Inotify,
    // inotify returns the same descriptor for a directory that is already
    // watched, so a set is all the dedup we need.
    watch_descriptors: Mutex<HashSet<WatchDescriptor>>,
}

impl std::fmt::Debug for InotifyFilesystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InotifyFilesystem")
            .field("fd", &self.inotify.as_fd().as_raw_fd())
            .field(
                "watch_count",
                &self.watch_descriptors.lock().unwrap().len(),
            )
            .finish()
    }
}

impl InotifyFilesystem {
    pub fn new() -> Result<Self, WatchError> {
        let inotify = Inotify::init(InitFlags::IN_NONBLOCK | InitFlags::IN_CLOEXEC)
            .map_err(|e| WatchError::Init {
                reason: format!("inotify_init1: {e}"),
            })?;
        Ok(Self {
            inotify,
            watch_descriptors: Mutex::new(HashSet::new()),
        })
    }

    /// The fd to wait on; readable whenever a filesystem event is queued.
    pub fn poll_fd(&self) -> BorrowedFd<'_> {
        self.inotify.as_fd()
    }

    /// Block until a filesystem event is queued or `timeout` elapses.
    ///
    /// Returns `Ok(true)` on wake-up and `Ok(false)` on timeout. `None`
    /// waits indefinitely.
    pub fn wait_for_change(&self, timeout: Option<Duration>) -> std::io::Result<bool> {
        let mut fds = [libc::pollfd {
            fd: self.inotify.as_fd().as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        }];
        let timeout_ms: libc::c_int = match timeout {
            Some(duration) => duration.as_millis().min(libc::c_int::MAX as u128) as libc::c_int,
            None => -1,
        };
        loop {
            let rc = unsafe { libc::poll(fds.as_mut_ptr(), 1, timeout_ms) };
            if rc == -1 {
                let e = std::io::Error::last_os_error();
                if e.kind() == std::io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(e);
            }
            return Ok(rc > 0);
        }
    }

    /// Discard all queued events and rescan every watched source.
    pub fn process_changes<'l>(
        &self,
        loader: &'l mut ConfigLoader<'_>,
    ) -> Vec<ConfigChange<'l>> {
        self.drain_events();
        loader.refresh()
    }

    fn drain_events(&self) {
        loop {
            match self.inotify.read_events() {
                Ok(events) => {
                    if events.is_empty() {
                        break;
                    }
                    debug!(count = events.len(), "drained inotify events");
                    for event in events {
                        // The kernel drops the watch itself when a watched
                        // directory is deleted or moved; forget our
                        // descriptor so teardown does not try to remove it
                        // again.
                        if event.mask.contains(AddWatchFlags::IN_IGNORED) {
                            self.watch_descriptors.lock().unwrap().remove(&event.wd);
                        }
                    }
                }
                Err(Errno::EAGAIN) => break,
                Err(e) => {
                    warn!(error = %e, "reading inotify events failed");
                    break;
                }
            }
        }
    }

    fn watch_directory(&self, directory: &CanonicalPath) -> Result<(), WatchError> {
        // IN_EXCL_UNLINK and IN_ONLYDIR have no named constants in nix.
        let mask = AddWatchFlags::IN_ATTRIB
            | AddWatchFlags::IN_CLOSE_WRITE
            | AddWatchFlags::IN_CREATE
            | AddWatchFlags::IN_DELETE
            | AddWatchFlags::IN_DELETE_SELF
            | AddWatchFlags::IN_MODIFY
            | AddWatchFlags::IN_MOVE_SELF
            | AddWatchFlags::IN_MOVED_FROM
            | AddWatchFlags::IN_MOVED_TO
            | AddWatchFlags::from_bits_retain(libc::IN_EXCL_UNLINK | libc::IN_ONLYDIR);
        match self.inotify.add_watch(directory.as_path(), mask) {
            Ok(descriptor) => {
                if self
                    .watch_descriptors
                    .lock()
                    .unwrap()
                    .insert(descriptor)
                {
                    debug!(directory = %directory, "watching directory");
                }
                Ok(())
            }
            // The directory vanished (or was never created); the parent
            // watch will tell us when it appears.
            Err(Errno::ENOENT) | Err(Errno::ENOTDIR) => Ok(()),
            Err(e) => Err(WatchError::Watch {
                path: directory.as_path().to_path_buf(),
                source: std::io::Error::from(e),
            }),
        }
    }
}

impl ConfigFilesystem for InotifyFilesystem {
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

impl Drop for InotifyFilesystem {
    fn drop(&mut self) {
        // Tear the watches down explicitly rather than relying on the fd
        // close to clear them. Descriptors may already be gone if their
        // directory was deleted; that is fine.
        let descriptors = std::mem::take(&mut *self.watch_descriptors.lock().unwrap());
        for descriptor in descriptors {
            let _ = self.inotify.rm_watch(descriptor);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn canonical(path: &Path) -> CanonicalPath {
        canon::canonicalize_path(path).unwrap().into_full()
    }

    #[test]
    fn entering_the_same_directory_twice_installs_one_watch() {
        let temp = tempfile::tempdir().unwrap();
        let filesystem = InotifyFilesystem::new().unwrap();
        let directory = canonical(temp.path());

        filesystem.enter_directory(&directory).unwrap();
        filesystem.enter_directory(&directory).unwrap();

        assert_eq!(filesystem.watch_descriptors.lock().unwrap().len(), 1);
    }

    #[test]
    fn entering_a_missing_directory_is_skipped() {
        let temp = tempfile::tempdir().unwrap();
        let filesystem = InotifyFilesystem::new().unwrap();
        let directory = canonical(temp.path()).join("nope");

        filesystem.enter_directory(&directory).unwrap();

        assert!(filesystem.watch_descriptors.lock().unwrap().is_empty());
    }

    #[test]
    fn queued_events_make_the_fd_readable_until_drained() {
        let temp = tempfile::tempdir().unwrap();
        let filesystem = InotifyFilesystem::new().unwrap();
        filesystem.enter_directory(&canonical(temp.path())).unwrap();

        fs::write(temp.path().join("quick-lint-js.config"), "{}").unwrap();
        assert!(filesystem
            .wait_for_change(Some(Duration::from_secs(5)))
            .unwrap());

        filesystem.drain_events();
        assert!(!filesystem
            .wait_for_change(Some(Duration::from_millis(50)))
            .unwrap());
    }
}
