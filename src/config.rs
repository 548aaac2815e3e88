// src/config.rs

//! Loaded linter configuration.
//!
//! The change-detection machinery treats a config file's *content* as opaque
//! bytes (identity is byte-equality, decided by the loader). This module is
//! the thin parsed view layered on top: which globals the config declares and
//! which built-in global groups it enables, plus the path the config was
//! loaded from.

use std::collections::BTreeMap;

use serde::Deserialize;
use tracing::warn;

use crate::canon::CanonicalPath;

/// One declared global variable.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Global {
    pub writable: bool,
    pub shadowable: bool,
}

/// Which built-in global groups are in effect.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum GlobalGroups {
    /// All groups enabled (the default when the config says nothing).
    #[default]
    All,
    /// No groups enabled (`"global-groups": false`).
    None,
    /// Only the named groups.
    Named(Vec<String>),
}

/// A linter configuration, reloadable from raw file bytes.
///
/// The config-file path is recorded once, when the owning cache entry is
/// created, and survives [`reset`](Configuration::reset): a reload caused by
/// changed content keeps the same path identity.
#[derive(Clone, Debug, Default)]
pub struct Configuration {
    config_file_path: Option<CanonicalPath>,
    globals: BTreeMap<String, Global>,
    global_groups: GlobalGroups,
}

impl Configuration {
    pub fn new() -> Self {
        Self::default()
    }

    /// The path this configuration was loaded from, if any. The default
    /// configuration has none.
    pub fn config_file_path(&self) -> Option<&CanonicalPath> {
        self.config_file_path.as_ref()
    }

    pub(crate) fn set_config_file_path(&mut self, path: CanonicalPath) {
        self.config_file_path = Some(path);
    }

    /// Clear all declared rules. The recorded config-file path is kept.
    pub(crate) fn reset(&mut self) {
        self.globals.clear();
        self.global_groups = GlobalGroups::default();
    }

    /// Reload the declared rules from a config file body.
    ///
    /// A body that fails to parse is logged and otherwise ignored; content
    /// identity and change reporting are handled upstream on the raw bytes,
    /// so a broken config must not derail resolution.
    pub(crate) fn load_from_json(&mut self, content: &[u8]) {
        let parsed: ConfigJson = match serde_json::from_slice(content) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(
                    path = %self.config_file_path.as_ref().map(|p| p.to_string()).unwrap_or_default(),
                    error = %e,
                    "ignoring unparsable config file"
                );
                return;
            }
        };

        self.global_groups = match parsed.global_groups {
            None | Some(GlobalGroupsJson::All(true)) => GlobalGroups::All,
            Some(GlobalGroupsJson::All(false)) => GlobalGroups::None,
            Some(GlobalGroupsJson::Group(name)) => GlobalGroups::Named(vec![name]),
            Some(GlobalGroupsJson::Groups(names)) => GlobalGroups::Named(names),
        };
        self.globals = parsed
            .globals
            .into_iter()
            .filter_map(|(name, decl)| match decl {
                GlobalJson::Enabled(false) => None,
                GlobalJson::Enabled(true) => Some((
                    name,
                    Global {
                        writable: true,
                        shadowable: true,
                    },
                )),
                GlobalJson::Detailed {
                    writable,
                    shadowable,
                } => Some((
                    name,
                    Global {
                        writable,
                        shadowable,
                    },
                )),
            })
            .collect();
    }

    pub fn lookup_global(&self, name: &str) -> Option<Global> {
        self.globals.get(name).copied()
    }

    pub fn globals(&self) -> impl Iterator<Item = (&str, Global)> {
        self.globals.iter().map(|(name, decl)| (name.as_str(), *decl))
    }

    pub fn global_groups(&self) -> &GlobalGroups {
        &self.global_groups
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConfigJson {
    #[serde(rename = "global-groups")]
    global_groups: Option<GlobalGroupsJson>,
    globals: BTreeMap<String, GlobalJson>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum GlobalGroupsJson {
    All(bool),
    Group(String),
    Groups(Vec<String>),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum GlobalJson {
    Enabled(bool),
    Detailed {
        #[serde(default = "default_true")]
        writable: bool,
        #[serde(default = "default_true")]
        shadowable: bool,
    },
}

fn default_true() -> bool {
    true
}
