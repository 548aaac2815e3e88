// src/fs/mock.rs

//! In-memory filesystem for tests.
//!
//! Paths are plain absolute strings; directories exist implicitly for every
//! file added below them. `enter_directory` records the visited directories
//! so tests can assert which ones the resolver walked.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::canon::{CanonicalPath, Canonicalized, CanonicalizeError};
use crate::fs::{ConfigFilesystem, ReadError};
use crate::watch::WatchError;

#[derive(Debug, Default)]
pub struct MockFilesystem {
    files: Mutex<BTreeMap<PathBuf, Vec<u8>>>,
    entered: Mutex<Vec<PathBuf>>,
}

impl MockFilesystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_file(&self, path: impl AsRef<Path>, content: impl Into<Vec<u8>>) {
        assert!(path.as_ref().is_absolute(), "mock paths must be absolute");
        self.files
            .lock()
            .unwrap()
            .insert(path.as_ref().to_path_buf(), content.into());
    }

    pub fn remove_file(&self, path: impl AsRef<Path>) {
        self.files.lock().unwrap().remove(path.as_ref());
    }

    /// Directories the resolver has entered, in visit order.
    pub fn entered_directories(&self) -> Vec<PathBuf> {
        self.entered.lock().unwrap().clone()
    }

    fn is_dir(&self, path: &Path) -> bool {
        if path == Path::new("/") {
            return true;
        }
        let files = self.files.lock().unwrap();
        files.keys().any(|file| file.starts_with(path) && file != path)
    }

    fn exists(&self, path: &Path) -> bool {
        self.files.lock().unwrap().contains_key(path) || self.is_dir(path)
    }
}

impl ConfigFilesystem for MockFilesystem {
    fn canonicalize_path(&self, path: &Path) -> Result<Canonicalized, CanonicalizeError> {
        assert!(path.is_absolute(), "mock paths must be absolute");
        let mut existing = path.to_path_buf();
        let mut missing = Vec::new();
        while !self.exists(&existing) {
            let Some(name) = existing.file_name().map(|n| n.to_os_string()) else {
                return Err(CanonicalizeError::NoExistingAncestor {
                    path: path.display().to_string(),
                });
            };
            missing.push(name);
            existing.pop();
        }
        missing.reverse();
        Ok(Canonicalized::new(
            CanonicalPath::new_unchecked(existing),
            missing,
        ))
    }

    fn enter_directory(&self, directory: &CanonicalPath) -> Result<(), WatchError> {
        self.entered
            .lock()
            .unwrap()
            .push(directory.as_path().to_path_buf());
        Ok(())
    }

    fn read_file(
        &self,
        directory: &CanonicalPath,
        file_name: &str,
    ) -> Result<Vec<u8>, ReadError> {
        let path = directory.join(file_name);
        let files = self.files.lock().unwrap();
        if let Some(content) = files.get(path.as_path()) {
            return Ok(content.clone());
        }
        drop(files);
        if self.is_dir(path.as_path()) {
            return Err(ReadError::Io {
                path: path.to_string(),
                source: io::Error::new(io::ErrorKind::Other, "is a directory"),
            });
        }
        Err(ReadError::NotFound {
            path: path.to_string(),
        })
    }
}
