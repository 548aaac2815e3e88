// tests/common/mod.rs

use std::path::Path;

/// Route library logs through the test writer, so they only show up for
/// failing tests (or with `-- --nocapture`).
///
/// The level defaults to `debug` and can be overridden with the same
/// `CONFWATCH_LOG` variable the binary honours. Safe to call from every
/// test; later calls are no-ops.
pub fn init_tracing() {
    let level = std::env::var("CONFWATCH_LOG")
        .ok()
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(tracing::Level::DEBUG);

    let _ = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_test_writer()
        .without_time()
        .try_init();
}

/// The canonical form of `path` as a string, for comparing against resolved
/// config paths (temp directories are often reached through symlinks).
pub fn canonical_str(path: &Path) -> String {
    std::fs::canonicalize(path)
        .unwrap_or_else(|e| panic!("canonicalizing {path:?}: {e}"))
        .display()
        .to_string()
}
