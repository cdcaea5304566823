//! Keeps the local raster in step with the server.
//!
//! The [`SyncCoordinator`] glues the channel, the raster store and the view
//! together. Like the channel manager it performs no I/O of its own: HTTP
//! work is requested as [`SyncEffect`]s, executed by the runtime driver, and
//! fed back as [`EffectOutcome`]s. Everything the outside world might want
//! to react to (mode changes, notices, grid updates) is queued as a
//! [`SyncEvent`].

pub mod coordinator;
pub mod fallback;
pub mod notice;

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use neuroplace_wire::{ActiveUser, Color, GridSnapshot, PlacePixelRequest};

use crate::channel::ChannelState;
use crate::config::PlaceConfig;
use crate::viewport::Cell;

pub use coordinator::SyncCoordinator;
pub use fallback::{FallbackClient, FallbackError};
pub use notice::{Notice, NoticeFilter, NoticeKind};

/// Entries kept in the recent-placements log.
pub const PIXEL_LOG_CAPACITY: usize = 100;
/// Username shown for placements the server did not attribute.
pub const ANONYMOUS: &str = "Anonymous";

/// How the grid is being kept current.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// Channel open: updates stream in, placements go over the channel.
    Live,
    /// Channel down: the grid is polled, placements go over HTTP.
    Fallback,
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Live => write!(f, "live"),
            Self::Fallback => write!(f, "fallback"),
        }
    }
}

/// Where the grid currently on screen came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotSource {
    /// Nothing loaded yet.
    None,
    /// The server, over the channel or `GET /grid`.
    Authoritative,
    /// The static backup file. Degraded; replaced by the next
    /// authoritative snapshot.
    Backup,
}

/// Path a placement took.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlacementRoute {
    /// Sent as a `placePixel` channel message.
    Channel,
    /// Submitted as `POST /place-pixel`.
    Http,
}

/// A recent placement by anyone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelLogEntry {
    /// Cell that changed.
    pub cell: Cell,
    /// Its new color.
    pub color: Color,
    /// Who placed it; [`ANONYMOUS`] when the server does not say.
    pub username: String,
    /// When it was placed, when the server says.
    pub placed_at: Option<DateTime<Utc>>,
}

/// Something observers may want to react to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// LIVE/FALLBACK switch.
    ModeChanged(SyncMode),
    /// Channel state moved.
    ConnectionChanged(ChannelState),
    /// The whole grid was replaced.
    GridReplaced(SnapshotSource),
    /// One cell changed from a server update.
    PixelUpdated(PixelLogEntry),
    /// The set of connected users changed.
    ActiveUsers(Vec<ActiveUser>),
    /// A message for the user.
    Notice(Notice),
    /// A placement left this client.
    PlacementSent {
        /// Target cell.
        cell: Cell,
        /// Route taken.
        route: PlacementRoute,
    },
    /// A placement was rejected or could not be delivered.
    PlacementFailed {
        /// Target cell.
        cell: Cell,
        /// Reason shown to the user.
        message: String,
    },
    /// The server sent something that breaks the protocol.
    ProtocolViolation(String),
}

/// Work the coordinator needs done outside itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEffect {
    /// `GET /grid`.
    FetchSnapshot,
    /// `GET <path>` for the static backup.
    LoadBackup {
        /// Path relative to the server base URL.
        path: String,
    },
    /// `POST /place-pixel`.
    PlaceViaHttp {
        /// Request body.
        request: PlacePixelRequest,
        /// Bearer token.
        token: String,
    },
}

/// Result of a [`SyncEffect`], fed back through
/// [`SyncCoordinator::complete`].
#[derive(Debug)]
pub enum EffectOutcome {
    /// `FetchSnapshot` finished.
    SnapshotFetched(Result<GridSnapshot, FallbackError>),
    /// `LoadBackup` finished.
    BackupLoaded(Result<GridSnapshot, FallbackError>),
    /// `PlaceViaHttp` finished.
    PlacementSent {
        /// The request that was sent.
        request: PlacePixelRequest,
        /// Server verdict.
        result: Result<(), FallbackError>,
    },
}

/// Behaviour switches for the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOptions {
    /// Snapshot polling period in FALLBACK.
    pub poll_interval: Duration,
    /// Static backup snapshot path, if enabled.
    pub backup_path: Option<String>,
    /// Apply own placements locally before the echo.
    pub optimistic_placement: bool,
    /// Identical notices inside this window are dropped.
    pub notice_dedup_window: Duration,
    /// Selection stroke color.
    pub accent: Color,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self::from_config(&PlaceConfig::default())
    }
}

impl SyncOptions {
    /// Options from a loaded configuration.
    #[must_use]
    pub fn from_config(config: &PlaceConfig) -> Self {
        Self {
            poll_interval: config.sync.poll_interval(),
            backup_path: config.sync.backup_path().map(str::to_owned),
            optimistic_placement: config.sync.optimistic_placement,
            notice_dedup_window: config.sync.notice_dedup_window(),
            accent: config.canvas.accent,
        }
    }
}
