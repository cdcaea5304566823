//! Bodies exchanged with the HTTP fallback endpoints.

use serde::{Deserialize, Serialize};

use crate::color::Color;
use crate::snapshot::GridSnapshot;

/// `GET /grid` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridResponse {
    /// The current authoritative grid.
    pub grid: GridSnapshot,
}

/// `GET /grid-backup-<date>.json` response: a static last-known-good grid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupSnapshot {
    /// The archived grid.
    pub data: GridSnapshot,
}

/// `POST /place-pixel` request body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacePixelRequest {
    /// Column.
    pub x: u32,
    /// Row.
    pub y: u32,
    /// Color to place.
    pub color: Color,
}
