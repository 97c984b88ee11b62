use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

// ── Directory bootstrap ────────────────────────────────────────────────────────

/// Ensure the data directory and its `logs/` subdirectory exist.
pub fn ensure_directories(data_dir: &Path) -> anyhow::Result<()> {
    std::fs::create_dir_all(data_dir)?;
    std::fs::create_dir_all(data_dir.join("logs"))?;
    Ok(())
}

// ── Logging bootstrap ──────────────────────────────────────────────────────────

/// Map a CLI log level name onto an [`EnvFilter`] directive.
///
/// `CRITICAL` has no tracing equivalent and maps to `error`. Unknown names
/// are passed through unchanged.
pub fn level_directive(log_level: &str) -> String {
    match log_level.to_uppercase().as_str() {
        "DEBUG" => "debug".to_string(),
        "INFO" => "info".to_string(),
        "WARNING" | "WARN" => "warn".to_string(),
        "ERROR" | "CRITICAL" => "error".to_string(),
        _ => log_level.to_lowercase(),
    }
}

/// Initialise the global `tracing` subscriber.
///
/// Output goes to `log_file` (appended, no ANSI colours) when given,
/// otherwise to stderr so stdout stays free for JSON output.
pub fn setup_logging(log_level: &str, log_file: Option<&PathBuf>) -> anyhow::Result<()> {
    let filter = EnvFilter::try_new(level_directive(log_level)).unwrap_or_else(|_| EnvFilter::new("info"));

    let (stderr_layer, file_layer) = match log_file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            let layer = fmt::layer()
                .with_target(false)
                .with_ansi(false)
                .with_writer(Mutex::new(file));
            (None, Some(layer))
        }
        None => {
            let layer = fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_writer(std::io::stderr);
            (Some(layer), None)
        }
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()?;

    Ok(())
}

// ── Tests ──────────────────────────────────────────────────────────────────────
