//! Application directory paths for neuroplace.
//!
//! Uses the [`dirs`] crate for platform-appropriate resolution.
//!
//! | Purpose | macOS | Linux |
//! |---------|-------|-------|
//! | Data (session) | `~/Library/Application Support/neuroplace/` | `~/.local/share/neuroplace/` |
//! | Config | `~/Library/Application Support/neuroplace/` | `~/.config/neuroplace/` |
//! | Cache (exports) | `~/Library/Caches/neuroplace/` | `~/.cache/neuroplace/` |
//!
//! # Environment Overrides
//!
//! - `NEUROPLACE_DATA_DIR` overrides [`data_dir`]
//! - `NEUROPLACE_CONFIG_DIR` overrides [`config_dir`]
//! - `NEUROPLACE_CACHE_DIR` overrides [`cache_dir`]

use std::path::PathBuf;

/// `$var` if set, else `<platform root>/neuroplace`, else a `/tmp` fallback
/// named after `purpose`.
fn app_dir(var: &str, platform_root: Option<PathBuf>, purpose: &str) -> PathBuf {
    if let Some(override_dir) = std::env::var_os(var) {
        return PathBuf::from(override_dir);
    }
    platform_root.map_or_else(
        || PathBuf::from(format!("/tmp/neuroplace-{purpose}")),
        |root| root.join("neuroplace"),
    )
}

/// Application data root; holds the persisted login session.
#[must_use]
pub fn data_dir() -> PathBuf {
    app_dir("NEUROPLACE_DATA_DIR", dirs::data_dir(), "data")
}

/// Application config directory.
#[must_use]
pub fn config_dir() -> PathBuf {
    app_dir("NEUROPLACE_CONFIG_DIR", dirs::config_dir(), "config")
}

/// Application cache directory; default target for frame exports.
#[must_use]
pub fn cache_dir() -> PathBuf {
    app_dir("NEUROPLACE_CACHE_DIR", dirs::cache_dir(), "cache")
}

/// Main config file path (`config_dir()/config.toml`).
#[must_use]
pub fn config_file() -> PathBuf {
    config_dir().join("config.toml")
}

/// Persisted session file path (`data_dir()/session.json`).
#[must_use]
pub fn session_file() -> PathBuf {
    data_dir().join("session.json")
}

/// Default frame export path (`cache_dir()/frame.png`).
#[must_use]
pub fn default_export_file() -> PathBuf {
    cache_dir().join("frame.png")
}
