//! Cross-Platform Path Utilities
//!
//! Functions for resolving application directories across platforms.
//! Everything lives under ~/.companion/.

use std::path::{Path, PathBuf};

use crate::utils::error::{AppError, AppResult};

/// Get the user's home directory
pub fn home_dir() -> AppResult<PathBuf> {
    dirs::home_dir().ok_or_else(|| AppError::config("Could not determine home directory"))
}

/// Get the Companion directory (~/.companion/)
pub fn companion_dir() -> AppResult<PathBuf> {
    Ok(home_dir()?.join(".companion"))
}

/// Get the remote control config file path (~/.companion/remote_control.json)
pub fn config_path() -> AppResult<PathBuf> {
    Ok(companion_dir()?.join("remote_control.json"))
}

/// Get the log directory (~/.companion/logs/)
pub fn log_dir() -> AppResult<PathBuf> {
    Ok(companion_dir()?.join("logs"))
}

/// Ensure a directory exists, creating it if necessary
pub fn ensure_dir(path: &Path) -> AppResult<()> {
    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }
    Ok(())
}

/// Get the Companion directory, creating if it doesn't exist
pub fn ensure_companion_dir() -> AppResult<PathBuf> {
    let path = companion_dir()?;
    ensure_dir(&path)?;
    Ok(path)
}

/// Get the log directory, creating if it doesn't exist
pub fn ensure_log_dir() -> AppResult<PathBuf> {
    let path = log_dir()?;
    ensure_dir(&path)?;
    Ok(path)
}
