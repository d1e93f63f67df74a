//! File persistence helpers.
//!
//! Handles default locations and JSON files with restrictive permissions,
//! since configuration carries API secrets.

use serde::{Serialize, de::DeserializeOwned};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::StoreError;

// ============================================================================
// Default Paths
// ============================================================================

/// Returns the default configuration directory.
///
/// - macOS: `~/Library/Application Support/kwharvest`
/// - Linux: `~/.config/kwharvest`
/// - Windows: `%APPDATA%\kwharvest`
pub fn default_config_dir() -> PathBuf {
    #[cfg(target_os = "macos")]
    {
        dirs::home_dir()
            .map(|h| h.join("Library").join("Application Support").join("kwharvest"))
            .unwrap_or_else(|| PathBuf::from("."))
    }

    #[cfg(not(target_os = "macos"))]
    {
        dirs::config_dir()
            .map(|c| c.join("kwharvest"))
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

/// Returns the default data directory (database location).
///
/// - Linux: `~/.local/share/kwharvest`
/// - macOS: `~/Library/Application Support/kwharvest`
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("kwharvest"))
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    default_config_dir().join("config.json")
}

/// Returns the default SQLite database path.
pub fn default_database_path() -> PathBuf {
    default_data_dir().join("kwharvest.db")
}

// ============================================================================
// Security: File Permissions
// ============================================================================

/// Sets restrictive file permissions (0o600) on Unix systems.
#[cfg(unix)]
pub fn set_restrictive_permissions(path: &Path) -> Result<(), StoreError> {
    use std::os::unix::fs::PermissionsExt;

    let mut perms = std::fs::metadata(path)?.permissions();
    perms.set_mode(0o600);
    std::fs::set_permissions(path, perms)?;

    debug!(path = %path.display(), "Set restrictive permissions (0600)");
    Ok(())
}

/// No-op on non-Unix systems.
#[cfg(not(unix))]
pub fn set_restrictive_permissions(_path: &Path) -> Result<(), StoreError> {
    Ok(())
}

// ============================================================================
// Directory & JSON Helpers
// ============================================================================

/// Creates `path`'s parent directory if needed.
pub fn ensure_parent_dir(path: &Path) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
            debug!(path = %parent.display(), "Created directory");
        }
    }
    Ok(())
}

/// Writes pretty JSON atomically (temp file + rename) with 0600 permissions.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    ensure_parent_dir(path)?;

    let content = serde_json::to_string_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, content)?;
    if let Err(e) = set_restrictive_permissions(&tmp) {
        warn!(error = %e, "Failed to restrict permissions");
    }
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Reads JSON from `path`.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, StoreError> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}
