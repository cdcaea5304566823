//! # neuroplace-wire
//!
//! Wire protocol shared by the neuroplace canvas client and its tests.
//!
//! - [`Color`]: exact 8-bit RGB cell colors with `#rrggbb` text form
//! - [`ServerMessage`] / [`ClientMessage`]: the JSON channel protocol,
//!   tagged by a `type` field
//! - [`GridSnapshot`] and the HTTP bodies used by the fallback path
//!
//! Decoding is deliberately lenient where the server is known to be sloppy
//! (null rows, unparseable cells) and strict everywhere else.

pub mod color;
pub mod error;
pub mod http;
pub mod message;
pub mod snapshot;

pub use color::Color;
pub use error::{Result, WireError};
pub use http::{BackupSnapshot, GridResponse, PlacePixelRequest};
pub use message::{ActiveUser, ClientMessage, PixelTimestamp, PixelUpdate, ServerMessage};
pub use snapshot::GridSnapshot;
