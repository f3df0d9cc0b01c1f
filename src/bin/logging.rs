use std::fs::{self, File, OpenOptions};
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Log to stderr and append to `log_file`.
///
/// The finish stage runs from the resume unit without a terminal, so the file
/// is the only record of it. `RUST_LOG` overrides the level chosen here.
pub fn init(verbose: bool, log_file: &Path) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let file = open_log_file(log_file);
    let file_error = file.as_ref().err().map(|e| format!("{:#}", e));
    let file_layer = file.ok().map(|file| {
        fmt::layer()
            .with_ansi(false)
            .with_target(false)
            .with_writer(Mutex::new(file))
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();

    if let Some(err) = file_error {
        tracing::warn!(path = %log_file.display(), error = %err, "Logging to stderr only");
    }
}

/// Open `path` for appending, creating its directory first.
fn open_log_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating log directory '{}'", parent.display()))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("opening log file '{}'", path.display()))
}
