// src/loader.rs

//! Config lookup, interning, and the refresh protocol.
//!
//! [`ConfigLoader`] answers one question for the host: *which configuration
//! governs this source file right now?* It walks from the source file's
//! directory toward the filesystem root looking for config files by their
//! well-known names, interns every loaded config by canonical path so all
//! sources under the same config share one instance, and, after the watch
//! backend reports filesystem activity, re-runs the walk for every registered
//! source and reports the minimal set of observable changes.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::io;
use std::path::Path;

use thiserror::Error;
use tracing::{debug, warn};

use crate::canon::{CanonicalPath, CanonicalizeError};
use crate::config::Configuration;
use crate::fs::{ConfigFilesystem, ReadError};
use crate::watch::WatchError;

/// Well-known config file names, in preference order. Within one directory
/// the first name shadows the second.
pub const CONFIG_FILE_NAMES: [&str; 2] = ["quick-lint-js.config", ".quick-lint-js.config"];

/// A config file interned by the loader.
///
/// Entries are boxed so their addresses survive map growth: every source
/// resolving to the same config path observes the same `Configuration`
/// instance for the lifetime of the loader. Entries are never evicted, even
/// when the file disappears from disk; a source whose config vanished simply
/// drops its back-reference.
#[derive(Debug)]
pub struct LoadedConfigFile {
    file_content: Vec<u8>,
    config: Configuration,
}

impl LoadedConfigFile {
    pub fn config(&self) -> &Configuration {
        &self.config
    }
}

/// One registered source file.
#[derive(Debug)]
struct WatchedSource {
    /// The path exactly as the host gave it; change reports echo it back.
    source_path: String,
    /// Canonical path of the config currently governing this source, if any.
    config_file_path: Option<CanonicalPath>,
}

/// An observable configuration change for one registered source.
#[derive(Debug)]
pub struct ConfigChange<'a> {
    /// The source path as originally registered.
    pub source_path: &'a str,
    /// The configuration now in effect; the shared default configuration
    /// when no config file applies anymore.
    pub config: &'a Configuration,
}

/// How the host describes a file to resolve a config for.
#[derive(Debug, Default)]
pub struct SourceFile<'a> {
    /// Path of the source file; `None` for stdin input.
    pub path: Option<&'a str>,
    /// Explicit config file path; set when the user pinned a config on the
    /// command line. Bypasses the ancestor walk.
    pub config_file: Option<&'a str>,
    /// Whether the source arrives on stdin (no backing file).
    pub is_stdin: bool,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error(transparent)]
    Canonicalize(#[from] CanonicalizeError),

    #[error(transparent)]
    Read(ReadError),

    #[error(transparent)]
    Watch(#[from] WatchError),
}

pub struct ConfigLoader<'fs> {
    fs: &'fs dyn ConfigFilesystem,
    watches: Vec<WatchedSource>,
    loaded_config_files: HashMap<CanonicalPath, Box<LoadedConfigFile>>,
    default_config: Configuration,
}

impl<'fs> ConfigLoader<'fs> {
    pub fn new(fs: &'fs dyn ConfigFilesystem) -> Self {
        Self {
            fs,
            watches: Vec::new(),
            loaded_config_files: HashMap::new(),
            default_config: Configuration::new(),
        }
    }

    /// The configuration handed out when no config file applies.
    pub fn default_config(&self) -> &Configuration {
        &self.default_config
    }

    /// The interned config file at `config_path`, if one was ever loaded.
    ///
    /// Entries outlive their on-disk files; see the note on
    /// [`LoadedConfigFile`].
    pub fn loaded_config(&self, config_path: &CanonicalPath) -> Option<&LoadedConfigFile> {
        self.loaded_config_files.get(config_path).map(|b| &**b)
    }

    /// Resolve the config governing `path`, and keep watching `path` so that
    /// future [`refresh`](ConfigLoader::refresh) calls report when its
    /// effective config changes.
    pub fn load_for_file(&mut self, path: &str) -> Result<&Configuration, LoadError> {
        self.watches.push(WatchedSource {
            source_path: path.to_string(),
            config_file_path: None,
        });
        let watch_index = self.watches.len() - 1;

        let resolved = self.resolve_and_cache(path)?;
        self.watches[watch_index].config_file_path = resolved.clone();
        Ok(self.config_for(resolved.as_ref()))
    }

    /// Resolve or load a config for an arbitrary input description.
    ///
    /// Unlike [`load_for_file`](ConfigLoader::load_for_file), this does not
    /// register the input for change watching.
    pub fn load_for(&mut self, file: &SourceFile<'_>) -> Result<&Configuration, LoadError> {
        if let Some(config_path) = file.config_file {
            return self.load_config_file(config_path);
        }
        // Stdin has no on-disk location; its config is whatever governs the
        // current working directory.
        let start = file.path.unwrap_or(".");
        let resolved = self.resolve_and_cache(start)?;
        Ok(self.config_for(resolved.as_ref()))
    }

    /// Load an explicitly named config file, bypassing the ancestor walk.
    pub fn load_config_file(&mut self, path: &str) -> Result<&Configuration, LoadError> {
        let canonicalized = self.fs.canonicalize_path(Path::new(path))?;
        let config_path = canonicalized.into_full();

        if self.loaded_config_files.contains_key(&config_path) {
            return Ok(&self.loaded_config_files[&config_path].config);
        }

        let Some(file_name) = config_path.file_name().map(str::to_string) else {
            return Err(LoadError::Read(ReadError::Io {
                path: config_path.to_string(),
                source: io::Error::new(io::ErrorKind::InvalidInput, "not a file path"),
            }));
        };
        let mut directory = config_path.clone();
        directory.parent();

        let content = self
            .fs
            .read_file(&directory, &file_name)
            .map_err(LoadError::Read)?;
        self.get_or_load(config_path.clone(), content);
        Ok(&self.loaded_config_files[&config_path].config)
    }

    /// Re-run resolution for every registered source and report the sources
    /// whose effective configuration observably changed, in registration
    /// order, at most one change per source.
    ///
    /// Refresh never fails as a whole: a source whose resolution errors this
    /// round keeps its previously reported config and is reported again once
    /// it resolves cleanly.
    pub fn refresh(&mut self) -> Vec<ConfigChange<'_>> {
        let mut changed: Vec<(usize, Option<CanonicalPath>)> = Vec::new();

        for index in 0..self.watches.len() {
            let source_path = self.watches[index].source_path.clone();
            let found = match self.find_config(&source_path) {
                Ok(found) => found,
                Err(e) => {
                    warn!(source = %source_path, error = %e, "refresh: resolution failed, keeping previous config");
                    continue;
                }
            };

            match found {
                Some((config_path, content)) => {
                    let content_changed = self.get_or_load(config_path.clone(), content);
                    let watch = &mut self.watches[index];
                    let did_change =
                        watch.config_file_path.as_ref() != Some(&config_path) || content_changed;
                    if did_change {
                        watch.config_file_path = Some(config_path.clone());
                        changed.push((index, Some(config_path)));
                    }
                }
                None => {
                    let watch = &mut self.watches[index];
                    if watch.config_file_path.is_some() {
                        watch.config_file_path = None;
                        changed.push((index, None));
                    }
                }
            }
        }

        changed
            .into_iter()
            .map(|(index, config_path)| ConfigChange {
                source_path: self.watches[index].source_path.as_str(),
                config: match &config_path {
                    Some(path) => &self.loaded_config_files[path].config,
                    None => &self.default_config,
                },
            })
            .collect()
    }

    /// Walk from `source_path`'s directory toward the root.
    ///
    /// Every directory visited is reported to the filesystem for watching,
    /// all the way to the root even after a config is found: a later rename
    /// of any ancestor must still wake the host.
    fn find_config(
        &self,
        source_path: &str,
    ) -> Result<Option<(CanonicalPath, Vec<u8>)>, LoadError> {
        let canonicalized = self.fs.canonicalize_path(Path::new(source_path))?;
        let mut directory = if canonicalized.have_missing_components() {
            // The file (or part of its directory chain) does not exist yet;
            // anchor the walk at the deepest existing ancestor.
            canonicalized.into_existing()
        } else {
            let mut path = canonicalized.into_full();
            path.parent();
            path
        };

        let mut found: Option<(CanonicalPath, Vec<u8>)> = None;
        loop {
            self.fs.enter_directory(&directory)?;

            if found.is_none() {
                for file_name in CONFIG_FILE_NAMES {
                    match self.fs.read_file(&directory, file_name) {
                        Ok(content) => {
                            found = Some((directory.join(file_name), content));
                            break;
                        }
                        Err(e) if e.is_not_found() => {
                            // Try the next name in this directory.
                        }
                        Err(e) => return Err(LoadError::Read(e)),
                    }
                }
            }

            if !directory.parent() {
                // Searched the root directory, which has no parent.
                break;
            }
        }

        if let Some((path, _)) = &found {
            debug!(config = %path, source = %source_path, "config file resolved");
        }
        Ok(found)
    }

    /// Resolve `source_path` and intern the result.
    fn resolve_and_cache(
        &mut self,
        source_path: &str,
    ) -> Result<Option<CanonicalPath>, LoadError> {
        match self.find_config(source_path)? {
            Some((config_path, content)) => {
                self.get_or_load(config_path.clone(), content);
                Ok(Some(config_path))
            }
            None => Ok(None),
        }
    }

    /// Intern `content` for `config_path`.
    ///
    /// Returns whether the stored content changed: a fresh entry counts as
    /// changed, byte-identical content does not (and skips the re-parse), and
    /// differing content resets and reloads the configuration in place,
    /// keeping its path identity.
    fn get_or_load(&mut self, config_path: CanonicalPath, content: Vec<u8>) -> bool {
        match self.loaded_config_files.entry(config_path) {
            Entry::Occupied(occupied) => {
                let loaded = occupied.into_mut();
                if loaded.file_content == content {
                    return false;
                }
                loaded.file_content = content;
                loaded.config.reset();
                loaded.config.load_from_json(&loaded.file_content);
                true
            }
            Entry::Vacant(vacant) => {
                let mut config = Configuration::new();
                config.set_config_file_path(vacant.key().clone());
                config.load_from_json(&content);
                vacant.insert(Box::new(LoadedConfigFile {
                    file_content: content,
                    config,
                }));
                true
            }
        }
    }

    fn config_for(&self, config_path: Option<&CanonicalPath>) -> &Configuration {
        match config_path {
            Some(path) => &self.loaded_config_files[path].config,
            None => &self.default_config,
        }
    }
}

impl std::fmt::Debug for ConfigLoader<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigLoader")
            .field("watches", &self.watches)
            .field("loaded_config_files", &self.loaded_config_files.len())
            .finish()
    }
}
