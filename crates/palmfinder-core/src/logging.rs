//! Logging setup
//!
//! Installs a `tracing` subscriber with an env filter, a stderr layer and a
//! daily rolling file layer that can be attached once the log directory is
//! known from settings.

use std::path::Path;
use std::sync::OnceLock;

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::fmt::format::{DefaultFields, Format};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{reload, EnvFilter, Registry};

type FileLayer = tracing_subscriber::fmt::Layer<Registry, DefaultFields, Format, NonBlocking>;

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();
static FILE_LAYER: OnceLock<reload::Handle<Option<FileLayer>, Registry>> = OnceLock::new();

/// Log file name prefix inside the log directory
pub const LOG_FILE_NAME: &str = "palmfinder.log";

/// Maps a `-v` count to a default filter directive
pub fn level_for_verbosity(verbose: u8) -> tracing::Level {
    match verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    }
}

/// Initializes global logging.
///
/// `RUST_LOG` directives take precedence over `default_level`. When
/// `log_dir` is given, the file layer is attached right away; otherwise it can
/// be attached later with [`attach_log_dir`].
pub fn init_logging(default_level: tracing::Level, log_dir: Option<&Path>) {
    let env_filter = EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env_lossy();

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(cfg!(debug_assertions));

    let (file_slot, handle) = reload::Layer::new(None::<FileLayer>);

    let subscriber = tracing_subscriber::registry()
        .with(file_slot)
        .with(env_filter)
        .with(stderr_layer);

    // Avoid panics if already initialized (tests, repeated sessions).
    if tracing::subscriber::set_global_default(subscriber).is_ok() {
        let _ = FILE_LAYER.set(handle);
    }

    if let Some(dir) = log_dir {
        attach_log_dir(dir);
    }
}

/// Starts writing logs to a daily rolling file in `dir`.
///
/// Best effort: returns `false` when logging is not initialized, a file
/// layer is already attached, or the directory cannot be created.
pub fn attach_log_dir(dir: &Path) -> bool {
    let Some(handle) = FILE_LAYER.get() else {
        return false;
    };
    if LOG_GUARD.get().is_some() {
        return false;
    }
    if let Err(e) = std::fs::create_dir_all(dir) {
        tracing::warn!("Log directory {} unavailable: {}", dir.display(), e);
        return false;
    }

    let file_appender = tracing_appender::rolling::daily(dir, LOG_FILE_NAME);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    if LOG_GUARD.set(guard).is_err() {
        return false;
    }

    let layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false);

    match handle.modify(|slot| *slot = Some(layer)) {
        Ok(()) => {
            tracing::debug!("Writing logs to {}", dir.display());
            true
        }
        Err(e) => {
            tracing::warn!("Failed to attach log file layer: {}", e);
            false
        }
    }
}
