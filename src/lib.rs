//! neuroplace: client runtime for a shared pixel canvas.
//!
//! Every client converges on the same grid in near real time, with updates
//! streamed over a WebSocket and an HTTP fallback while that is down.
//!
//! # Architecture
//!
//! The core is a set of sans-IO state machines driven by one async task:
//! - **Viewport**: screen pixel ↔ grid cell transform (`viewport`, `view`)
//! - **Raster**: authoritative grid plus composite and overview buffers
//! - **Channel**: resilient WebSocket session with heartbeat and backoff
//! - **Sync**: LIVE/FALLBACK coordination, snapshots, placement routing
//! - **Runtime**: the tokio driver that performs I/O on their behalf

pub mod channel;
pub mod config;
pub mod error;
pub mod place_dirs;
pub mod raster;
pub mod runtime;
pub mod session;
pub mod sync;
pub mod view;
pub mod viewport;

pub use channel::{ChannelManager, ChannelOptions, ChannelState};
pub use config::PlaceConfig;
pub use error::{PlaceError, Result};
pub use raster::{Frame, RasterStore};
pub use runtime::{ClientHandle, ClientRuntime};
pub use sync::{SyncCoordinator, SyncEvent, SyncMode};
pub use view::ViewState;
pub use viewport::{Cell, GridGeometry, Viewport};
