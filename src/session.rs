//! Persisted login state.
//!
//! The auth token and the opaque user profile are kept in a small JSON file
//! under the data directory so the CLI can reuse a login across runs.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{PlaceError, Result};

/// What a login leaves behind.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Bearer token for placements and channel authentication.
    #[serde(rename = "discord_token", default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Profile blob returned by the login flow. Never interpreted here.
    #[serde(rename = "user_data", default, skip_serializing_if = "Option::is_none")]
    pub user: Option<serde_json::Value>,
}

impl Session {
    /// `true` if a token is present.
    #[must_use]
    pub fn is_logged_in(&self) -> bool {
        self.token.as_deref().is_some_and(|t| !t.trim().is_empty())
    }
}

/// Reads and writes a [`Session`] at a fixed path.
#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    /// Store backed by `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at the default location under the data directory.
    #[must_use]
    pub fn default_location() -> Self {
        Self::new(crate::place_dirs::session_file())
    }

    /// Backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the session. A missing file is an empty session.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(&self) -> Result<Session> {
        if !self.path.exists() {
            return Ok(Session::default());
        }
        let content = std::fs::read_to_string(&self.path)?;
        serde_json::from_str(&content).map_err(|e| {
            PlaceError::Session(format!("{}: {e}", self.path.display()))
        })
    }

    /// Write the session, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&self, session: &Session) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(session)
            .map_err(|e| PlaceError::Session(e.to_string()))?;
        std::fs::write(&self.path, content)?;
        tracing::debug!("session saved to {}", self.path.display());
        Ok(())
    }

    /// Forget the session.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be removed.
    pub fn clear(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
