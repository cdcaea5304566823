//! Configuration types for the canvas client.

use std::path::{Path, PathBuf};
use std::time::Duration;

use neuroplace_wire::Color;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::channel::ChannelOptions;
use crate::error::{PlaceError, Result};
use crate::viewport::GridGeometry;

/// Top-level client configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaceConfig {
    /// Server endpoints.
    pub server: ServerConfig,
    /// Grid and presentation settings.
    pub canvas: CanvasConfig,
    /// Live channel retry and heartbeat settings.
    pub channel: ChannelConfig,
    /// Fallback polling and placement settings.
    pub sync: SyncConfig,
}

/// Server endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// HTTP origin of the canvas server (`GET /grid`, `POST /place-pixel`).
    pub base_url: String,
    /// Explicit channel URL. Derived from `base_url` when unset.
    pub channel_url: Option<String>,
    /// Per-request timeout for HTTP fallback calls, in seconds.
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".to_owned(),
            channel_url: None,
            request_timeout_secs: 10,
        }
    }
}

impl ServerConfig {
    /// Parsed HTTP origin.
    ///
    /// # Errors
    ///
    /// Returns [`PlaceError::Config`] if `base_url` is not an absolute URL.
    pub fn base(&self) -> Result<Url> {
        Url::parse(&self.base_url)
            .map_err(|e| PlaceError::Config(format!("invalid base_url {:?}: {e}", self.base_url)))
    }

    /// The channel URL: the explicit one, or `ws(s)://<host>/ws` derived
    /// from the HTTP origin.
    ///
    /// # Errors
    ///
    /// Returns [`PlaceError::Config`] if either URL is malformed or the
    /// explicit one is not a `ws`/`wss` URL.
    pub fn resolved_channel_url(&self) -> Result<Url> {
        if let Some(explicit) = &self.channel_url {
            let url = Url::parse(explicit).map_err(|e| {
                PlaceError::Config(format!("invalid channel_url {explicit:?}: {e}"))
            })?;
            if !matches!(url.scheme(), "ws" | "wss") {
                return Err(PlaceError::Config(format!(
                    "channel_url must use ws:// or wss://, got {explicit:?}"
                )));
            }
            return Ok(url);
        }
        channel_url_for(&self.base()?)
    }
}

/// Derive the channel endpoint for an HTTP origin.
///
/// Local development hosts (`localhost`, `127.0.0.1`) get plain `ws://`;
/// every other host gets `wss://`.
///
/// # Errors
///
/// Returns [`PlaceError::Config`] if the origin has no host.
pub fn channel_url_for(base: &Url) -> Result<Url> {
    let host = base
        .host_str()
        .ok_or_else(|| PlaceError::Config(format!("base_url {base} has no host")))?;
    let scheme = if matches!(host, "localhost" | "127.0.0.1") {
        "ws"
    } else {
        "wss"
    };
    let authority = match base.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_owned(),
    };
    Url::parse(&format!("{scheme}://{authority}/ws"))
        .map_err(|e| PlaceError::Config(format!("cannot derive channel url from {base}: {e}")))
}

/// Grid and presentation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CanvasConfig {
    /// Grid width in cells.
    pub grid_width: u32,
    /// Grid height in cells.
    pub grid_height: u32,
    /// Edge length of one cell in composite pixels.
    pub pixel_size: u32,
    /// Decimation factor of the overview buffer.
    pub overview_factor: u32,
    /// Surface color behind unset cells.
    pub background: Color,
    /// Selection stroke color.
    pub accent: Color,
    /// Presentation surface width in device pixels.
    pub surface_width: u32,
    /// Presentation surface height in device pixels.
    pub surface_height: u32,
}

impl Default for CanvasConfig {
    fn default() -> Self {
        Self {
            grid_width: 500,
            grid_height: 500,
            pixel_size: 10,
            overview_factor: 2,
            background: Color::WHITE,
            accent: Color::ORANGE,
            surface_width: 800,
            surface_height: 600,
        }
    }
}

impl CanvasConfig {
    /// Grid dimensions and cell size as a geometry value.
    #[must_use]
    pub fn geometry(&self) -> GridGeometry {
        GridGeometry::new(self.grid_width, self.grid_height, self.pixel_size)
    }
}

/// Which retry budget a session gets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelProfile {
    /// Regular participant: 3 reconnect attempts.
    #[default]
    Ordinary,
    /// Administrative session: 5 reconnect attempts.
    Privileged,
}

impl ChannelProfile {
    /// Default reconnect budget for this profile.
    #[must_use]
    pub fn default_max_attempts(self) -> u32 {
        match self {
            Self::Ordinary => 3,
            Self::Privileged => 5,
        }
    }
}

/// Live channel configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Retry budget profile.
    pub profile: ChannelProfile,
    /// Overrides the profile's reconnect budget.
    pub max_reconnect_attempts: Option<u32>,
    /// Base reconnect delay; attempt `k` waits `base * 1.5^(k-1)`.
    pub reconnect_base_delay_ms: u64,
    /// Heartbeat ping period while open.
    pub heartbeat_interval_ms: u64,
    /// A failure this soon after the very first attempt is unrecoverable.
    pub initial_failure_grace_ms: u64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            profile: ChannelProfile::Ordinary,
            max_reconnect_attempts: None,
            reconnect_base_delay_ms: 1000,
            heartbeat_interval_ms: 30_000,
            initial_failure_grace_ms: 5000,
        }
    }
}

impl ChannelConfig {
    /// Effective reconnect budget.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_reconnect_attempts
            .unwrap_or_else(|| self.profile.default_max_attempts())
    }
}

/// Fallback sync configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Snapshot polling period while in fallback mode.
    pub poll_interval_ms: u64,
    /// Path (relative to `server.base_url`) of the static backup snapshot.
    /// An empty string disables the second-level fallback.
    pub backup_snapshot_path: Option<String>,
    /// Apply own placements locally before the server echoes them.
    pub optimistic_placement: bool,
    /// Identical notices within this window are shown once.
    pub notice_dedup_window_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 2000,
            backup_snapshot_path: Some("/grid-backup-2025-09-21.json".to_owned()),
            optimistic_placement: false,
            notice_dedup_window_ms: 2000,
        }
    }
}

impl SyncConfig {
    /// The backup snapshot path, if the second-level fallback is enabled.
    #[must_use]
    pub fn backup_path(&self) -> Option<&str> {
        self.backup_snapshot_path
            .as_deref()
            .filter(|path| !path.trim().is_empty())
    }

    /// Polling period.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Duplicate-notice suppression window.
    #[must_use]
    pub fn notice_dedup_window(&self) -> Duration {
        Duration::from_millis(self.notice_dedup_window_ms)
    }
}

impl PlaceConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| PlaceError::Config(e.to_string()))
    }

    /// Load `path` if it exists, defaults otherwise.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::from_file(path)
        } else {
            tracing::debug!("no config at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| PlaceError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        crate::place_dirs::config_file()
    }

    /// Reject values the runtime cannot work with.
    ///
    /// # Errors
    ///
    /// Returns [`PlaceError::Config`] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        let canvas = &self.canvas;
        if canvas.grid_width == 0 || canvas.grid_height == 0 {
            return Err(PlaceError::Config("grid dimensions must be non-zero".into()));
        }
        if canvas.pixel_size == 0 {
            return Err(PlaceError::Config("pixel_size must be non-zero".into()));
        }
        if canvas.overview_factor == 0 {
            return Err(PlaceError::Config("overview_factor must be non-zero".into()));
        }
        if self.sync.poll_interval_ms == 0 {
            return Err(PlaceError::Config("poll_interval_ms must be non-zero".into()));
        }
        if self.channel.heartbeat_interval_ms == 0 {
            return Err(PlaceError::Config(
                "heartbeat_interval_ms must be non-zero".into(),
            ));
        }
        self.server.resolved_channel_url()?;
        Ok(())
    }

    /// Resolved options for the channel manager.
    ///
    /// # Errors
    ///
    /// Returns [`PlaceError::Config`] if the channel URL cannot be resolved.
    pub fn channel_options(&self) -> Result<ChannelOptions> {
        let url = self.server.resolved_channel_url()?;
        Ok(ChannelOptions {
            url: url.to_string(),
            max_reconnect_attempts: self.channel.max_attempts(),
            reconnect_base_delay: Duration::from_millis(self.channel.reconnect_base_delay_ms),
            heartbeat_interval: Duration::from_millis(self.channel.heartbeat_interval_ms),
            initial_failure_grace: Duration::from_millis(self.channel.initial_failure_grace_ms),
            privileged: self.channel.profile == ChannelProfile::Privileged,
        })
    }
}
