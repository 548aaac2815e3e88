// src/lib.rs

pub mod canon;
pub mod cli;
pub mod config;
pub mod errors;
pub mod fs;
pub mod loader;
pub mod logging;
pub mod watch;

use anyhow::{Context, Result};
use tracing::info;

use crate::cli::CliArgs;
use crate::config::Configuration;
use crate::fs::BasicFilesystem;
use crate::loader::{ConfigChange, ConfigLoader, SourceFile};

/// High-level entry point used by `main.rs`.
///
/// Resolves the governing config for every input, then (unless `--once`)
/// keeps watching the filesystem and prints a line whenever some input's
/// effective config changes. The wait primitive differs per platform, so the
/// watch loop is selected at compile time.
pub fn run(args: CliArgs) -> Result<()> {
    if args.files.is_empty() && !args.stdin {
        anyhow::bail!("no input files; pass FILE arguments or --stdin");
    }

    if args.once {
        let fs = BasicFilesystem::new();
        let mut loader = ConfigLoader::new(&fs);
        resolve_inputs(&mut loader, &args)?;
        return Ok(());
    }

    run_watch_loop(&args)
}

/// Resolve every input once and print where its config came from.
fn resolve_inputs(loader: &mut ConfigLoader<'_>, args: &CliArgs) -> Result<()> {
    if args.stdin {
        let config = loader.load_for(&SourceFile {
            path: None,
            config_file: args.config_file.as_deref(),
            is_stdin: true,
        })?;
        print_resolution("(stdin)", config);
    }
    for file in &args.files {
        let config = if let Some(config_file) = args.config_file.as_deref() {
            loader.load_for(&SourceFile {
                path: Some(file),
                config_file: Some(config_file),
                is_stdin: false,
            })?
        } else {
            loader.load_for_file(file)?
        };
        print_resolution(file, config);
    }
    Ok(())
}

fn print_resolution(source: &str, config: &Configuration) {
    match config.config_file_path() {
        Some(path) => println!("{source}: {path}"),
        None => println!("{source}: (default config)"),
    }
}

fn report_changes(changes: &[ConfigChange<'_>]) {
    for change in changes {
        match change.config.config_file_path() {
            Some(path) => println!("config changed for {}: {}", change.source_path, path),
            None => println!("config changed for {}: (default config)", change.source_path),
        }
    }
}

#[cfg(target_os = "linux")]
fn run_watch_loop(args: &CliArgs) -> Result<()> {
    use crate::watch::InotifyFilesystem;

    let fs = InotifyFilesystem::new()?;
    let mut loader = ConfigLoader::new(&fs);
    resolve_inputs(&mut loader, args)?;

    info!("watching for config changes");
    loop {
        fs.wait_for_change(None)
            .context("waiting for filesystem changes")?;
        let changes = fs.process_changes(&mut loader);
        report_changes(&changes);
    }
}

#[cfg(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "openbsd",
    target_os = "netbsd",
    target_os = "dragonfly"
))]
fn run_watch_loop(args: &CliArgs) -> Result<()> {
    use crate::watch::kqueue::{KqueueFilesystem, EVENT_BUFFER_SIZE};
    use nix::sys::event::{EventFilter, EventFlag, FilterFlag, KEvent, Kqueue};

    // The kqueue belongs to the host so it could be multiplexed with other
    // event sources; here the config watcher is the only one.
    let kqueue = Kqueue::new().context("creating kqueue")?;
    let fs = KqueueFilesystem::new(&kqueue);
    let mut loader = ConfigLoader::new(&fs);
    resolve_inputs(&mut loader, args)?;

    info!("watching for config changes");
    let mut events = [KEvent::new(
        0,
        EventFilter::EVFILT_VNODE,
        EventFlag::empty(),
        FilterFlag::empty(),
        0,
        0,
    ); EVENT_BUFFER_SIZE];
    loop {
        let count = kqueue
            .kevent(&[], &mut events, None)
            .context("waiting for kqueue events")?;
        let changes = fs.process_changes(&events[..count], &mut loader);
        report_changes(&changes);
    }
}

#[cfg(windows)]
fn run_watch_loop(args: &CliArgs) -> Result<()> {
    use crate::watch::OplockFilesystem;

    let fs = OplockFilesystem::new()?;
    let mut loader = ConfigLoader::new(&fs);
    resolve_inputs(&mut loader, args)?;

    info!("watching for config changes");
    loop {
        fs.wait_for_change(None)
            .context("waiting for filesystem changes")?;
        let changes = fs.process_changes(&mut loader);
        report_changes(&changes);
    }
}

#[cfg(not(any(
    target_os = "linux",
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "openbsd",
    target_os = "netbsd",
    target_os = "dragonfly",
    windows
)))]
fn run_watch_loop(_args: &CliArgs) -> Result<()> {
    anyhow::bail!("file watching is not supported on this platform; use --once")
}
