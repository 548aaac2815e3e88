// src/errors.rs

//! Crate-wide error aliases.
//!
//! The library modules define their own structured errors (`LoadError`,
//! `WatchError`, ...); the application-level plumbing in `lib.rs`/`main.rs`
//! uses `anyhow` and pulls the aliases from here.

pub use anyhow::{Error, Result};
