// tests/watch_refresh.rs

//! End-to-end change detection against the inotify backend.
//!
//! The refresh protocol rescans watched sources rather than interpreting
//! event payloads, so these tests mutate the tree and call
//! `process_changes` directly; the separate wake-up test covers the pollable
//! fd. Each test uses its own temp tree and its own watcher instance.

#![cfg(target_os = "linux")]

mod common;

use std::error::Error;
use std::fs;
use std::time::Duration;

use confwatch::loader::ConfigLoader;
use confwatch::watch::InotifyFilesystem;

use common::{canonical_str, init_tracing};

type TestResult = Result<(), Box<dyn Error>>;

#[test]
fn refresh_without_mutation_reports_nothing() -> TestResult {
    init_tracing();
    let temp = tempfile::tempdir()?;
    fs::write(temp.path().join("hello.js"), "")?;
    fs::write(temp.path().join("quick-lint-js.config"), "{}")?;

    let filesystem = InotifyFilesystem::new()?;
    let mut loader = ConfigLoader::new(&filesystem);
    loader.load_for_file(temp.path().join("hello.js").to_str().unwrap())?;

    assert!(filesystem.process_changes(&mut loader).is_empty());
    Ok(())
}

#[test]
fn creating_a_shadowing_config_reports_exactly_one_change() -> TestResult {
    init_tracing();
    let temp = tempfile::tempdir()?;
    fs::create_dir(temp.path().join("dir"))?;
    fs::write(temp.path().join("quick-lint-js.config"), "{}")?;
    fs::write(temp.path().join("dir/hello.js"), "")?;

    let filesystem = InotifyFilesystem::new()?;
    let mut loader = ConfigLoader::new(&filesystem);
    let source = temp.path().join("dir/hello.js");
    loader.load_for_file(source.to_str().unwrap())?;

    fs::write(temp.path().join("dir/quick-lint-js.config"), "{}")?;

    let changes = filesystem.process_changes(&mut loader);
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].source_path, source.to_str().unwrap());
    assert_eq!(
        changes[0].config.config_file_path().unwrap().to_string(),
        canonical_str(&temp.path().join("dir/quick-lint-js.config"))
    );
    Ok(())
}

#[test]
fn creating_the_primary_name_shadows_the_secondary() -> TestResult {
    init_tracing();
    let temp = tempfile::tempdir()?;
    fs::write(temp.path().join("hello.js"), "")?;
    fs::write(temp.path().join(".quick-lint-js.config"), "{}")?;

    let filesystem = InotifyFilesystem::new()?;
    let mut loader = ConfigLoader::new(&filesystem);
    let config = loader.load_for_file(temp.path().join("hello.js").to_str().unwrap())?;
    assert_eq!(
        config.config_file_path().unwrap().to_string(),
        canonical_str(&temp.path().join(".quick-lint-js.config"))
    );

    fs::write(temp.path().join("quick-lint-js.config"), "{}")?;

    let changes = filesystem.process_changes(&mut loader);
    assert_eq!(changes.len(), 1);
    assert_eq!(
        changes[0].config.config_file_path().unwrap().to_string(),
        canonical_str(&temp.path().join("quick-lint-js.config"))
    );
    Ok(())
}

#[test]
fn byte_identical_rewrite_reports_nothing() -> TestResult {
    init_tracing();
    let temp = tempfile::tempdir()?;
    let body = r#"{"globals":{"a":true}}"#;
    fs::write(temp.path().join("hello.js"), "")?;
    fs::write(temp.path().join("quick-lint-js.config"), body)?;

    let filesystem = InotifyFilesystem::new()?;
    let mut loader = ConfigLoader::new(&filesystem);
    loader.load_for_file(temp.path().join("hello.js").to_str().unwrap())?;

    fs::write(temp.path().join("quick-lint-js.config"), body)?;

    assert!(filesystem.process_changes(&mut loader).is_empty());
    Ok(())
}

#[test]
fn changed_content_reports_the_reloaded_config() -> TestResult {
    init_tracing();
    let temp = tempfile::tempdir()?;
    fs::write(temp.path().join("hello.js"), "")?;
    fs::write(temp.path().join("quick-lint-js.config"), "{}")?;

    let filesystem = InotifyFilesystem::new()?;
    let mut loader = ConfigLoader::new(&filesystem);
    let before = loader.load_for_file(temp.path().join("hello.js").to_str().unwrap())?
        as *const confwatch::config::Configuration;

    fs::write(
        temp.path().join("quick-lint-js.config"),
        r#"{"globals":{"later":true}}"#,
    )?;

    let changes = filesystem.process_changes(&mut loader);
    assert_eq!(changes.len(), 1);
    // Reloaded in place: same instance, new rules.
    assert!(std::ptr::eq(changes[0].config, before));
    assert!(changes[0].config.lookup_global("later").is_some());
    Ok(())
}

#[test]
fn renaming_an_ancestor_away_reports_the_default_config() -> TestResult {
    init_tracing();
    let temp = tempfile::tempdir()?;
    fs::create_dir(temp.path().join("old"))?;
    fs::write(temp.path().join("old/hello.js"), "")?;
    fs::write(temp.path().join("old/quick-lint-js.config"), "{}")?;

    let filesystem = InotifyFilesystem::new()?;
    let mut loader = ConfigLoader::new(&filesystem);
    let source = temp.path().join("old/hello.js");
    loader.load_for_file(source.to_str().unwrap())?;

    fs::rename(temp.path().join("old"), temp.path().join("new"))?;

    let changes = filesystem.process_changes(&mut loader);
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].source_path, source.to_str().unwrap());
    assert!(changes[0].config.config_file_path().is_none());
    Ok(())
}

#[test]
fn moving_a_config_away_and_back_reports_nothing() -> TestResult {
    init_tracing();
    let temp = tempfile::tempdir()?;
    let config_path = temp.path().join("quick-lint-js.config");
    fs::write(temp.path().join("hello.js"), "")?;
    fs::write(&config_path, r#"{"globals":{"a":true}}"#)?;

    let filesystem = InotifyFilesystem::new()?;
    let mut loader = ConfigLoader::new(&filesystem);
    loader.load_for_file(temp.path().join("hello.js").to_str().unwrap())?;

    fs::rename(&config_path, temp.path().join("parked.config"))?;
    fs::rename(temp.path().join("parked.config"), &config_path)?;

    assert!(filesystem.process_changes(&mut loader).is_empty());
    Ok(())
}

#[test]
fn config_creation_into_a_directory_created_later_is_detected() -> TestResult {
    init_tracing();
    let temp = tempfile::tempdir()?;
    let source = temp.path().join("dir/test.js");

    let filesystem = InotifyFilesystem::new()?;
    let mut loader = ConfigLoader::new(&filesystem);
    loader.load_for_file(source.to_str().unwrap())?;

    // Creating the directory alone changes nothing observable...
    fs::create_dir(temp.path().join("dir"))?;
    assert!(filesystem.process_changes(&mut loader).is_empty());

    // ...but a config appearing inside it does.
    fs::write(temp.path().join("dir/quick-lint-js.config"), "{}")?;
    let changes = filesystem.process_changes(&mut loader);
    assert_eq!(changes.len(), 1);
    assert_eq!(
        changes[0].config.config_file_path().unwrap().to_string(),
        canonical_str(&temp.path().join("dir/quick-lint-js.config"))
    );
    Ok(())
}

#[test]
fn batched_directory_and_config_creation_is_one_change() -> TestResult {
    init_tracing();
    let temp = tempfile::tempdir()?;
    let source = temp.path().join("dir/test.js");

    let filesystem = InotifyFilesystem::new()?;
    let mut loader = ConfigLoader::new(&filesystem);
    loader.load_for_file(source.to_str().unwrap())?;

    // Both mutations land before a single refresh; the outcome matches the
    // two-step case.
    fs::create_dir(temp.path().join("dir"))?;
    fs::write(temp.path().join("dir/quick-lint-js.config"), "{}")?;

    let changes = filesystem.process_changes(&mut loader);
    assert_eq!(changes.len(), 1);
    assert_eq!(
        changes[0].config.config_file_path().unwrap().to_string(),
        canonical_str(&temp.path().join("dir/quick-lint-js.config"))
    );
    assert!(filesystem.process_changes(&mut loader).is_empty());
    Ok(())
}

#[test]
fn deleting_and_recreating_a_config_round_trips() -> TestResult {
    init_tracing();
    let temp = tempfile::tempdir()?;
    let config_path = temp.path().join("quick-lint-js.config");
    fs::write(temp.path().join("hello.js"), "")?;
    fs::write(&config_path, "{}")?;

    let filesystem = InotifyFilesystem::new()?;
    let mut loader = ConfigLoader::new(&filesystem);
    loader.load_for_file(temp.path().join("hello.js").to_str().unwrap())?;

    fs::remove_file(&config_path)?;
    let changes = filesystem.process_changes(&mut loader);
    assert_eq!(changes.len(), 1);
    assert!(changes[0].config.config_file_path().is_none());

    // Recreating the file (even with the same bytes) re-applies it.
    fs::write(&config_path, "{}")?;
    let changes = filesystem.process_changes(&mut loader);
    assert_eq!(changes.len(), 1);
    assert_eq!(
        changes[0].config.config_file_path().unwrap().to_string(),
        canonical_str(&config_path)
    );
    Ok(())
}

#[test]
fn filesystem_activity_wakes_the_waiter() -> TestResult {
    init_tracing();
    let temp = tempfile::tempdir()?;
    fs::write(temp.path().join("hello.js"), "")?;

    let filesystem = InotifyFilesystem::new()?;
    let mut loader = ConfigLoader::new(&filesystem);
    loader.load_for_file(temp.path().join("hello.js").to_str().unwrap())?;

    fs::write(temp.path().join("quick-lint-js.config"), "{}")?;
    assert!(filesystem.wait_for_change(Some(Duration::from_secs(5)))?);

    let changes = filesystem.process_changes(&mut loader);
    assert_eq!(changes.len(), 1);
    Ok(())
}
