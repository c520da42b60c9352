//! Logging and tracing configuration
//!
//! stdout carries the DAP byte stream, so the adapter never logs there.
//! Log records go to a plain text file, written straight through on the
//! calling thread, with stderr as the fallback when the file can't be opened.

use std::path::{Path, PathBuf};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Default filter when neither `RUST_LOG` nor the config file provide one
const DEFAULT_FILTER: &str = "luadebug=debug,warn";

/// Build the filter: `RUST_LOG` first, then the configured directive, then the default
fn build_filter(configured: Option<&str>) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        configured
            .and_then(|directive| EnvFilter::try_new(directive).ok())
            .unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER))
    })
}

/// Open the log file as a non-rotating appender
fn open_log_file(path: &Path) -> Option<RollingFileAppender> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let file_name = path.file_name()?.to_str()?;

    if let Err(e) = std::fs::create_dir_all(dir) {
        eprintln!("Warning: Could not create log directory {}: {}", dir.display(), e);
        return None;
    }

    match RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(file_name)
        .build(dir)
    {
        Ok(appender) => Some(appender),
        Err(e) => {
            eprintln!("Warning: Could not open log file {}: {}", path.display(), e);
            None
        }
    }
}

/// Initialize tracing for the adapter
///
/// Returns the log file path when file logging is active, `None` when
/// logging fell back to stderr.
pub fn init(log_file: &Path, configured_filter: Option<&str>) -> Option<PathBuf> {
    let filter = build_filter(configured_filter);

    if let Some(appender) = open_log_file(log_file) {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_writer(appender)
                    .with_ansi(false)
                    .with_target(true)
                    .with_file(true)
                    .with_line_number(true),
            )
            .init();
        return Some(log_file.to_path_buf());
    }

    // Fallback: stderr only
    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(false)
                .with_target(true)
                .compact(),
        )
        .init();

    None
}
