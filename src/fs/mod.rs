// src/fs/mod.rs

//! The filesystem seam between the resolver and the platform.
//!
//! The resolver only ever needs three operations: canonicalize a path, tell
//! the watch machinery it is about to inspect a directory, and read one file
//! inside a directory it previously entered. [`ConfigFilesystem`] captures
//! exactly that surface, so the resolver can run against the real watching
//! backends, against [`BasicFilesystem`] when no watching is wanted, or
//! against the in-memory [`mock`] filesystem in tests.

use std::fmt::Debug;
use std::io;
use std::path::Path;

use thiserror::Error;

use crate::canon::{self, CanonicalPath, Canonicalized, CanonicalizeError};
use crate::watch::WatchError;

pub mod mock;

/// Reading a config file candidate.
///
/// "Not found" is an expected outcome during the ancestor walk (try the next
/// name, then the next directory); everything else aborts the resolution and
/// is reported to the caller with the offending path in the message.
#[derive(Debug, Error)]
pub enum ReadError {
    #[error("file not found: {path}")]
    NotFound { path: String },

    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
}

impl ReadError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ReadError::NotFound { .. })
    }
}

/// Filesystem access as seen by the resolver.
///
/// Methods take `&self`: the watching backends keep their bookkeeping behind
/// interior mutability so one instance can serve the loader and the host's
/// wait loop at the same time.
pub trait ConfigFilesystem: Debug {
    fn canonicalize_path(&self, path: &Path) -> Result<Canonicalized, CanonicalizeError>;

    /// Called for every directory the resolver visits, nearest first.
    ///
    /// Installing a watch is best-effort: a directory that does not exist (or
    /// stopped being a directory) is skipped silently. Any other installation
    /// failure is returned.
    fn enter_directory(&self, directory: &CanonicalPath) -> Result<(), WatchError>;

    /// Read `directory/file_name`. `directory` is a directory previously
    /// passed to [`enter_directory`](ConfigFilesystem::enter_directory).
    fn read_file(&self, directory: &CanonicalPath, file_name: &str)
        -> Result<Vec<u8>, ReadError>;
}

/// Read a file, classifying the error for the walk.
pub(crate) fn read_file_at(path: &Path) -> Result<Vec<u8>, ReadError> {
    match std::fs::read(path) {
        Ok(content) => Ok(content),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Err(ReadError::NotFound {
            path: path.display().to_string(),
        }),
        Err(e) => Err(ReadError::Io {
            path: path.display().to_string(),
            source: e,
        }),
    }
}

/// Plain filesystem access with no change watching.
///
/// Used for one-shot resolution (`--once`) and in tests that only exercise
/// the lookup and caching behavior.
#[derive(Debug, Default)]
pub struct BasicFilesystem;

impl BasicFilesystem {
    pub fn new() -> Self {
        Self
    }
}

impl ConfigFilesystem for BasicFilesystem {
    fn canonicalize_path(&self, path: &Path) -> Result<Canonicalized, CanonicalizeError> {
        canon::canonicalize_path(path)
    }

    fn enter_directory(&self, _directory: &CanonicalPath) -> Result<(), WatchError> {
        Ok(())
    }

    fn read_file(
        &self,
        directory: &CanonicalPath,
        file_name: &str,
    ) -> Result<Vec<u8>, ReadError> {
        read_file_at(directory.join(file_name).as_path())
    }
}
