// src/watch/mod.rs

//! Filesystem change watching.
//!
//! Each platform gets its own backend implementing
//! [`ConfigFilesystem`](crate::fs::ConfigFilesystem), so the resolver's
//! `enter_directory` calls turn into native watch subscriptions as a side
//! effect of the walk:
//!
//! - Linux: inotify ([`inotify::InotifyFilesystem`])
//! - BSD/macOS: kqueue `EVFILT_VNODE` ([`kqueue::KqueueFilesystem`])
//! - Windows: directory oplocks pumped through an I/O completion port
//!   ([`oplock::OplockFilesystem`])
//!
//! The wake primitive is deliberately *not* unified: the host already
//! branches per platform (a pollable fd on Linux, a host-owned kqueue on
//! BSD/macOS, an event handle on Windows). What is uniform is the meaning of
//! a wake-up ("something may have changed, rescan now") and the drain step,
//! which discards event payloads and re-runs the resolver for every watched
//! source. Spurious wake-ups are fine; the refresh diff suppresses anything
//! unobservable.

use std::path::PathBuf;

use thiserror::Error;

/// Errors installing or servicing native filesystem watches.
#[derive(Debug, Error)]
pub enum WatchError {
    #[error("failed to initialize file watching: {reason}")]
    Init { reason: String },

    #[error("failed to watch {path}: {source}")]
    Watch {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("filesystem event channel failed: {reason}")]
    EventChannel { reason: String },
}

#[cfg(target_os = "linux")]
pub mod inotify;
#[cfg(target_os = "linux")]
pub use inotify::InotifyFilesystem;

#[cfg(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "openbsd",
    target_os = "netbsd",
    target_os = "dragonfly"
))]
pub mod kqueue;
#[cfg(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "openbsd",
    target_os = "netbsd",
    target_os = "dragonfly"
))]
pub use kqueue::KqueueFilesystem;

#[cfg(windows)]
pub mod oplock;
#[cfg(windows)]
pub use oplock::OplockFilesystem;
