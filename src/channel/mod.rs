//! Resilient bidirectional message channel.
//!
//! [`ChannelManager`] owns one logical connection to the canvas server. It
//! is a sans-IO state machine: the actual socket lives behind the
//! [`Transport`] trait, time is passed in explicitly, and callbacks go to a
//! [`ChannelHandler`] supplied per call. [`ws::WsTransport`] is the
//! production transport built on `tokio-tungstenite`.
//!
//! Transport events are tagged with the [`ConnectionId`] they belong to so
//! that late events from a superseded connection can be dropped.

pub mod manager;
pub mod ws;

use std::fmt;
use std::time::{Duration, Instant};

use neuroplace_wire::{ServerMessage, WireError};

pub use manager::ChannelManager;
pub use ws::{TransportEvents, WsTransport};

/// Identifies one transport connection attempt.
pub type ConnectionId = u64;

/// Close code used when the client ends the session itself.
pub const NORMAL_CLOSE: u16 = 1000;
/// Close reason used when the client ends the session itself.
pub const CLIENT_CLOSE_REASON: &str = "Client initiated close";
/// Close code reported when the connection dropped without a close frame.
pub const ABNORMAL_CLOSE: u16 = 1006;

/// Connection lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Never connected.
    Idle,
    /// Transport opening.
    Connecting,
    /// Connected; heartbeat running.
    Open,
    /// Client-requested close in progress.
    Closing,
    /// Not connected and no retry pending.
    Closed,
    /// Waiting to retry.
    ReconnectWait {
        /// Which retry is pending (1-based).
        attempt: u32,
    },
    /// Gave up; only an explicit connect leaves this state.
    Failed,
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Open => write!(f, "Open"),
            Self::Closing => write!(f, "Closing"),
            Self::Closed => write!(f, "Closed"),
            Self::ReconnectWait { attempt } => write!(f, "Reconnecting (attempt {attempt})"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// Errors surfaced by the channel.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    /// `send` was called while not connected.
    #[error("channel is not open (state: {0})")]
    NotOpen(ChannelState),

    /// The manager has been destroyed.
    #[error("channel destroyed")]
    Destroyed,

    /// The transport failed to open, send, or stay connected.
    #[error("transport error: {0}")]
    Transport(String),

    /// An inbound frame could not be decoded.
    #[error("decode error: {0}")]
    Decode(#[from] WireError),

    /// An outbound message could not be encoded.
    #[error("encode error: {0}")]
    Encode(String),
}

/// How a transport connection ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseInfo {
    /// WebSocket close code.
    pub code: u16,
    /// Close reason text.
    pub reason: String,
    /// `true` if the closing handshake completed or the client asked for it.
    pub clean: bool,
}

impl CloseInfo {
    /// A connection that ended without a closing handshake.
    #[must_use]
    pub fn abnormal(reason: impl Into<String>) -> Self {
        Self {
            code: ABNORMAL_CLOSE,
            reason: reason.into(),
            clean: false,
        }
    }
}

/// Something that happened on a transport connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The connection is established.
    Opened,
    /// A text frame arrived.
    Message(String),
    /// The connection ended.
    Closed(CloseInfo),
    /// The connection failed. A `Closed` event normally follows.
    Error(String),
}

/// The socket underneath a [`ChannelManager`].
///
/// Implementations report what happens on a connection asynchronously as
/// `(ConnectionId, TransportEvent)` pairs, fed back through
/// [`ChannelManager::handle_transport`].
pub trait Transport {
    /// Start connecting to `url`, replacing any previous connection.
    ///
    /// # Errors
    ///
    /// An error here means the attempt could not even start (bad URL, no
    /// runtime); no events will follow for `id`.
    fn open(&mut self, id: ConnectionId, url: &str) -> Result<(), ChannelError>;

    /// Transmit one text frame on connection `id`.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Transport`] if the frame cannot be queued.
    fn send(&mut self, id: ConnectionId, text: String) -> Result<(), ChannelError>;

    /// Begin a clean close of connection `id`.
    fn close(&mut self, id: ConnectionId, code: u16, reason: &str);
}

/// Callbacks from the channel. Every method defaults to a no-op.
pub trait ChannelHandler {
    /// The connection opened.
    fn on_open(&mut self) {}

    /// A decoded message other than `ping`/`pong` arrived.
    fn on_message(&mut self, _message: ServerMessage) {}

    /// The connection closed.
    fn on_close(&mut self, _close: &CloseInfo) {}

    /// A transport or decode error occurred.
    fn on_error(&mut self, _error: &ChannelError) {}

    /// Retry `attempt` is scheduled after `delay`.
    fn on_reconnect(&mut self, _attempt: u32, _delay: Duration) {}

    /// The channel gave up reconnecting.
    fn on_reconnect_failed(&mut self) {}
}

/// A handler that ignores every callback.
impl ChannelHandler for () {}

/// Retry, heartbeat and endpoint settings for a [`ChannelManager`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelOptions {
    /// `ws://` or `wss://` endpoint.
    pub url: String,
    /// Retries allowed before giving up.
    pub max_reconnect_attempts: u32,
    /// Delay before the first retry.
    pub reconnect_base_delay: Duration,
    /// Ping period while open.
    pub heartbeat_interval: Duration,
    /// A first-attempt failure within this window is unrecoverable.
    pub initial_failure_grace: Duration,
    /// Administrative session.
    pub privileged: bool,
}

impl ChannelOptions {
    /// Defaults for a regular participant (3 retries).
    #[must_use]
    pub fn ordinary(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_reconnect_attempts: 3,
            reconnect_base_delay: Duration::from_millis(1000),
            heartbeat_interval: Duration::from_secs(30),
            initial_failure_grace: Duration::from_secs(5),
            privileged: false,
        }
    }

    /// Defaults for an administrative session (5 retries).
    #[must_use]
    pub fn privileged(url: impl Into<String>) -> Self {
        Self {
            max_reconnect_attempts: 5,
            privileged: true,
            ..Self::ordinary(url)
        }
    }

    /// Delay before retry `attempt` (1-based): `base * 1.5^(attempt-1)`.
    #[must_use]
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(64) as i32;
        self.reconnect_base_delay.mul_f64(1.5f64.powi(exponent))
    }
}

/// Point-in-time view of a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelStats {
    /// Current state.
    pub state: ChannelState,
    /// Retries used since the last successful open.
    pub reconnect_attempts: u32,
    /// Retry budget.
    pub max_reconnect_attempts: u32,
    /// Administrative session.
    pub privileged: bool,
    /// When the last `pong` arrived.
    pub last_pong: Option<Instant>,
    /// When the current connection attempt started.
    pub connection_started: Option<Instant>,
}
