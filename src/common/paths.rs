//! Configuration and log file locations
//!
//! Uses the directories crate for platform-appropriate locations:
//! - Linux: `~/.config/luadebug/` and `~/.local/share/luadebug/`
//! - macOS: `~/Library/Application Support/luadebug/`
//! - Windows: `%APPDATA%\luadebug\`

use std::path::PathBuf;

/// Application name used for every platform directory
const APP_NAME: &str = "luadebug";

/// File name of the adapter log inside the log directory
const LOG_FILE_NAME: &str = "adapter.log";

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("", "", APP_NAME)
}

/// Get the configuration directory path
pub fn config_dir() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the path to the configuration file
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("config.toml"))
}

/// Get the path to the log directory
pub fn log_dir() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.data_dir().join("logs"))
}

/// Get the default log file path
///
/// Falls back to the system temp directory when no home directory is known,
/// which happens when the IDE launches the adapter with a stripped environment.
pub fn default_log_file() -> PathBuf {
    log_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(LOG_FILE_NAME)
}
