// src/canon.rs

//! Canonical paths and canonicalization.
//!
//! Everything downstream of this module works on [`CanonicalPath`]s: absolute,
//! normalized paths with the guarantee that two of them are byte-equal exactly
//! when they name the same filesystem entity. That guarantee is what lets the
//! config cache key on paths and compare them cheaply.
//!
//! [`canonicalize_path`] additionally tracks *missing trailing components*:
//! an editor may ask about a buffer whose file (or whole directory) has not
//! been saved yet. The deepest existing ancestor is resolved for real, and the
//! non-existent tail is carried along so the caller can decide whether to drop
//! it.

use std::ffi::OsString;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// An absolute path in canonical form.
///
/// Byte-equality on `CanonicalPath` implies filesystem identity, which makes
/// it usable as a map key.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CanonicalPath(PathBuf);

impl CanonicalPath {
    pub(crate) fn new_unchecked(path: PathBuf) -> Self {
        Self(path)
    }

    pub fn as_path(&self) -> &Path {
        &self.0
    }

    /// Replace this path with its parent directory.
    ///
    /// Returns `false` (leaving the path unchanged) when the path is already
    /// the filesystem root.
    pub fn parent(&mut self) -> bool {
        self.0.pop()
    }

    /// Append a single component.
    pub fn append_component(&mut self, name: &str) {
        self.0.push(name);
    }

    /// A copy of this path with one component appended.
    pub fn join(&self, name: &str) -> CanonicalPath {
        let mut child = self.clone();
        child.append_component(name);
        child
    }

    pub fn file_name(&self) -> Option<&str> {
        self.0.file_name().and_then(|n| n.to_str())
    }
}

impl AsRef<Path> for CanonicalPath {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

impl fmt::Display for CanonicalPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.display().fmt(f)
    }
}

/// Result of [`canonicalize_path`]: the deepest existing ancestor, plus any
/// trailing components that do not exist yet.
#[derive(Clone, Debug)]
pub struct Canonicalized {
    existing: CanonicalPath,
    missing: Vec<OsString>,
}

impl Canonicalized {
    pub(crate) fn new(existing: CanonicalPath, missing: Vec<OsString>) -> Self {
        Self { existing, missing }
    }

    pub fn have_missing_components(&self) -> bool {
        !self.missing.is_empty()
    }

    /// Drop the non-existent tail and keep only the existing ancestor.
    pub fn into_existing(self) -> CanonicalPath {
        self.existing
    }

    /// The full path: existing ancestor with the missing tail re-appended.
    pub fn into_full(self) -> CanonicalPath {
        let mut path = self.existing;
        for component in &self.missing {
            path.0.push(component);
        }
        path
    }
}

#[derive(Debug, Error)]
pub enum CanonicalizeError {
    #[error("failed to canonicalize {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("path has no existing ancestor: {path}")]
    NoExistingAncestor { path: String },
}

/// Canonicalize `path`, tolerating a non-existent tail.
///
/// The longest existing prefix is resolved with [`std::fs::canonicalize`];
/// components past it are recorded as missing, in order. A path none of whose
/// ancestors exist (including a bogus root) is an error, as is any
/// non-`NotFound` failure such as an intermediate component that is a regular
/// file.
pub fn canonicalize_path(path: &Path) -> Result<Canonicalized, CanonicalizeError> {
    let mut current: PathBuf = if path.as_os_str().is_empty() {
        PathBuf::from(".")
    } else {
        path.to_path_buf()
    };
    let mut missing: Vec<OsString> = Vec::new();

    loop {
        match std::fs::canonicalize(&current) {
            Ok(resolved) => {
                missing.reverse();
                return Ok(Canonicalized {
                    existing: CanonicalPath(resolved),
                    missing,
                });
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                let Some(name) = current.file_name().map(|n| n.to_os_string()) else {
                    return Err(CanonicalizeError::NoExistingAncestor {
                        path: path.display().to_string(),
                    });
                };
                missing.push(name);
                current.pop();
                if current.as_os_str().is_empty() {
                    // Relative path with no existing prefix; anchor at the
                    // current working directory.
                    current = PathBuf::from(".");
                }
            }
            Err(e) => {
                return Err(CanonicalizeError::Io {
                    path: path.display().to_string(),
                    source: e,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn parent_stops_at_root() {
        let mut path = CanonicalPath::new_unchecked(PathBuf::from("/a/b"));
        assert!(path.parent());
        assert_eq!(path.as_path(), Path::new("/a"));
        assert!(path.parent());
        assert_eq!(path.as_path(), Path::new("/"));
        assert!(!path.parent());
        assert_eq!(path.as_path(), Path::new("/"));
    }

    #[test]
    fn join_appends_one_component() {
        let dir = CanonicalPath::new_unchecked(PathBuf::from("/a"));
        assert_eq!(dir.join("b.config").as_path(), Path::new("/a/b.config"));
        // The original is untouched.
        assert_eq!(dir.as_path(), Path::new("/a"));
    }

    #[test]
    fn canonicalize_existing_file_has_no_missing_components() {
        let temp = tempfile::tempdir().unwrap();
        let file = temp.path().join("hello.js");
        fs::write(&file, "").unwrap();

        let canonicalized = canonicalize_path(&file).unwrap();
        assert!(!canonicalized.have_missing_components());
        assert_eq!(
            canonicalized.into_full().as_path(),
            fs::canonicalize(&file).unwrap()
        );
    }

    #[test]
    fn canonicalize_records_missing_tail_in_order() {
        let temp = tempfile::tempdir().unwrap();
        let target = temp.path().join("not-yet").join("deeper").join("x.js");

        let canonicalized = canonicalize_path(&target).unwrap();
        assert!(canonicalized.have_missing_components());

        let existing = canonicalized.clone().into_existing();
        assert_eq!(existing.as_path(), fs::canonicalize(temp.path()).unwrap());

        let full = canonicalized.into_full();
        assert!(full.as_path().ends_with("not-yet/deeper/x.js"));
    }

    #[test]
    fn canonicalize_through_a_regular_file_is_an_error() {
        let temp = tempfile::tempdir().unwrap();
        let file = temp.path().join("plain.txt");
        fs::write(&file, "x").unwrap();

        let result = canonicalize_path(&file.join("below.js"));
        assert!(matches!(result, Err(CanonicalizeError::Io { .. })));
    }
}
