//! Channel messages.
//!
//! Both directions are JSON objects tagged by a camelCase `type` field. The
//! inbound enum has an explicit [`ServerMessage::Unrecognized`] variant so
//! a newer server can introduce message types without breaking older
//! clients; use [`ServerMessage::decode`] rather than `serde_json` directly
//! to get that behaviour.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::color::Color;
use crate::error::WireError;
use crate::snapshot::GridSnapshot;

/// Tags [`ServerMessage::decode`] knows how to decode.
const SERVER_MESSAGE_TYPES: &[&str] = &[
    "gridData",
    "pixelUpdate",
    "activeUsers",
    "announcement",
    "rateLimit",
    "error",
    "ping",
    "pong",
];

/// Messages received from the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMessage {
    /// Full grid snapshot.
    GridData {
        /// Row-major cells.
        grid: GridSnapshot,
    },
    /// One cell changed.
    PixelUpdate(PixelUpdate),
    /// Presence list.
    ActiveUsers {
        /// Users currently connected.
        #[serde(default)]
        users: Vec<ActiveUser>,
    },
    /// Broadcast text for every participant.
    Announcement {
        /// Announcement body.
        #[serde(default)]
        message: String,
    },
    /// The server refused a placement because of rate limiting.
    RateLimit {
        /// Optional server-supplied wording.
        #[serde(default)]
        message: Option<String>,
    },
    /// Server-side failure report.
    Error {
        /// Optional server-supplied wording.
        #[serde(default)]
        message: Option<String>,
    },
    /// Application-level heartbeat request.
    Ping,
    /// Application-level heartbeat reply.
    Pong,
    /// A well-formed message with a tag this client does not know.
    #[serde(skip)]
    Unrecognized {
        /// The unknown `type` tag.
        kind: String,
    },
}

impl ServerMessage {
    /// Decode one inbound text frame.
    ///
    /// Unknown tags yield [`ServerMessage::Unrecognized`]; a known tag with
    /// a payload that does not fit is an error.
    ///
    /// # Errors
    ///
    /// Returns [`WireError`] if the text is not JSON, has no `type` tag, or
    /// the payload does not match the tag's shape.
    pub fn decode(text: &str) -> Result<Self, WireError> {
        let value: serde_json::Value =
            serde_json::from_str(text).map_err(|e| WireError::Malformed(e.to_string()))?;
        let kind = value
            .get("type")
            .and_then(serde_json::Value::as_str)
            .ok_or(WireError::MissingType)?
            .to_owned();

        if !SERVER_MESSAGE_TYPES.contains(&kind.as_str()) {
            return Ok(Self::Unrecognized { kind });
        }

        serde_json::from_value(value).map_err(|e| WireError::Payload {
            kind,
            reason: e.to_string(),
        })
    }

    /// The wire tag of this message.
    #[must_use]
    pub fn kind(&self) -> &str {
        match self {
            Self::GridData { .. } => "gridData",
            Self::PixelUpdate(_) => "pixelUpdate",
            Self::ActiveUsers { .. } => "activeUsers",
            Self::Announcement { .. } => "announcement",
            Self::RateLimit { .. } => "rateLimit",
            Self::Error { .. } => "error",
            Self::Ping => "ping",
            Self::Pong => "pong",
            Self::Unrecognized { kind } => kind,
        }
    }
}

/// A single-cell change broadcast by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PixelUpdate {
    /// Column. Signed so out-of-range updates decode and can be rejected
    /// by the raster store instead of failing here.
    pub x: i64,
    /// Row.
    pub y: i64,
    /// New color.
    pub color: Color,
    /// Who placed it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// When it was placed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<PixelTimestamp>,
}

/// Placement time as sent by the server: epoch milliseconds or an RFC 3339
/// string, depending on the server build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PixelTimestamp {
    /// Milliseconds since the Unix epoch.
    Millis(i64),
    /// RFC 3339 text.
    Text(String),
    /// Anything else; kept so the update itself still decodes.
    Other(serde_json::Value),
}

impl PixelTimestamp {
    /// Resolve to a UTC instant, if the value is meaningful.
    #[must_use]
    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Millis(ms) => DateTime::from_timestamp_millis(*ms),
            Self::Text(text) => DateTime::parse_from_rfc3339(text)
                .ok()
                .map(|dt| dt.with_timezone(&Utc)),
            Self::Other(_) => None,
        }
    }
}

/// One entry of an `activeUsers` presence list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveUser {
    /// Display name.
    #[serde(default)]
    pub username: String,
    /// Avatar URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    /// Reported device class (`"mobile"`, `"desktop"`, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_type: Option<String>,
}

/// Messages sent from client to server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    /// Bind the session to a user token.
    Authenticate {
        /// Bearer token obtained from the login flow.
        token: String,
    },
    /// Place one pixel.
    PlacePixel {
        /// Column.
        x: u32,
        /// Row.
        y: u32,
        /// Color to place.
        color: Color,
    },
    /// Heartbeat request.
    Ping,
    /// Heartbeat reply.
    Pong,
}

impl ClientMessage {
    /// Serialize to a text frame.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::Encode`] if serialization fails.
    pub fn encode(&self) -> Result<String, WireError> {
        serde_json::to_string(self).map_err(|e| WireError::Encode(e.to_string()))
    }

    /// The wire tag of this message.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Authenticate { .. } => "authenticate",
            Self::PlacePixel { .. } => "placePixel",
            Self::Ping => "ping",
            Self::Pong => "pong",
        }
    }
}
