//! Connection state machine with heartbeat and backoff.

use std::time::Instant;

use neuroplace_wire::{ClientMessage, ServerMessage};

use super::{
    CLIENT_CLOSE_REASON, ChannelError, ChannelHandler, ChannelOptions, ChannelState,
    ChannelStats, CloseInfo, ConnectionId, NORMAL_CLOSE, Transport, TransportEvent,
};

/// Owns one logical connection and its retry policy.
///
/// The manager never sleeps or spawns. Callers drive it by feeding
/// transport events into [`handle_transport`](Self::handle_transport) and
/// calling [`poll_timers`](Self::poll_timers) once
/// [`next_deadline`](Self::next_deadline) has passed.
///
/// Timers are plain deadline slots: the heartbeat is armed only while
/// [`ChannelState::Open`], the reconnect deadline only while
/// [`ChannelState::ReconnectWait`].
#[derive(Debug)]
pub struct ChannelManager<T: Transport> {
    options: ChannelOptions,
    /// `None` once destroyed.
    transport: Option<T>,
    state: ChannelState,
    attempts: u32,
    current: ConnectionId,
    ever_opened: bool,
    close_requested: bool,
    attempt_started: Option<Instant>,
    last_pong: Option<Instant>,
    heartbeat_due: Option<Instant>,
    reconnect_due: Option<Instant>,
}

impl<T: Transport> ChannelManager<T> {
    /// Create an idle manager. Nothing happens until [`connect`](Self::connect).
    pub fn new(options: ChannelOptions, transport: T) -> Self {
        Self {
            options,
            transport: Some(transport),
            state: ChannelState::Idle,
            attempts: 0,
            current: 0,
            ever_opened: false,
            close_requested: false,
            attempt_started: None,
            last_pong: None,
            heartbeat_due: None,
            reconnect_due: None,
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ChannelState {
        self.state
    }

    /// `true` while connected.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state == ChannelState::Open
    }

    /// `true` once [`destroy`](Self::destroy) has run.
    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.transport.is_none()
    }

    /// Settings this manager was built with.
    #[must_use]
    pub fn options(&self) -> &ChannelOptions {
        &self.options
    }

    /// The transport, unless destroyed.
    #[must_use]
    pub fn transport(&self) -> Option<&T> {
        self.transport.as_ref()
    }

    /// Id of the most recent connection attempt.
    #[must_use]
    pub fn connection_id(&self) -> ConnectionId {
        self.current
    }

    /// Snapshot of counters and timestamps.
    #[must_use]
    pub fn stats(&self) -> ChannelStats {
        ChannelStats {
            state: self.state,
            reconnect_attempts: self.attempts,
            max_reconnect_attempts: self.options.max_reconnect_attempts,
            privileged: self.options.privileged,
            last_pong: self.last_pong,
            connection_started: self.attempt_started,
        }
    }

    /// Earliest pending timer, if any.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        if self.is_destroyed() {
            return None;
        }
        match (self.heartbeat_due, self.reconnect_due) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Open a connection to the configured URL.
    ///
    /// A no-op while already connecting or open, and after destroy. If the
    /// transport refuses to start, that is handled as a transport error.
    /// Connecting from [`ChannelState::Failed`] starts a fresh retry budget.
    pub fn connect<H: ChannelHandler>(&mut self, now: Instant, handler: &mut H) {
        if self.is_destroyed() {
            tracing::debug!("connect ignored: channel destroyed");
            return;
        }
        if matches!(self.state, ChannelState::Connecting | ChannelState::Open) {
            tracing::debug!("connect ignored: already {}", self.state);
            return;
        }
        if self.state == ChannelState::Failed {
            self.attempts = 0;
        }

        self.reconnect_due = None;
        self.close_requested = false;
        self.current += 1;
        self.state = ChannelState::Connecting;
        self.attempt_started = Some(now);

        let id = self.current;
        let url = self.options.url.clone();
        tracing::info!(connection = id, "connecting to {url}");
        let opened = match self.transport.as_mut() {
            Some(transport) => transport.open(id, &url),
            None => Err(ChannelError::Destroyed),
        };
        if let Err(e) = opened {
            self.on_transport_error(e, now, handler);
        }
    }

    /// Serialize and transmit a message.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::NotOpen`] unless connected,
    /// [`ChannelError::Destroyed`] after destroy, or the transport's error.
    pub fn send(&mut self, message: &ClientMessage) -> Result<(), ChannelError> {
        let Some(transport) = self.transport.as_mut() else {
            return Err(ChannelError::Destroyed);
        };
        if self.state != ChannelState::Open {
            return Err(ChannelError::NotOpen(self.state));
        }
        let text = message
            .encode()
            .map_err(|e| ChannelError::Encode(e.to_string()))?;
        transport.send(self.current, text)
    }

    /// Cancel timers and request a clean close.
    pub fn close(&mut self, code: u16, reason: &str) {
        self.reconnect_due = None;
        self.heartbeat_due = None;
        match self.state {
            ChannelState::Connecting | ChannelState::Open => {
                self.close_requested = true;
                self.state = ChannelState::Closing;
                tracing::info!(connection = self.current, code, "closing channel: {reason}");
                if let Some(transport) = self.transport.as_mut() {
                    transport.close(self.current, code, reason);
                }
            }
            ChannelState::ReconnectWait { .. } => self.state = ChannelState::Closed,
            _ => {}
        }
    }

    /// Close with the default code and reason.
    pub fn close_normal(&mut self) {
        self.close(NORMAL_CLOSE, CLIENT_CLOSE_REASON);
    }

    /// Tear down permanently. No callback fires afterwards.
    pub fn destroy(&mut self) {
        if self.is_destroyed() {
            return;
        }
        self.close_normal();
        self.transport = None;
        self.state = ChannelState::Closed;
        tracing::info!("channel destroyed");
    }

    /// Feed one event from the transport.
    ///
    /// Events for any connection other than the current one are dropped.
    pub fn handle_transport<H: ChannelHandler>(
        &mut self,
        id: ConnectionId,
        event: TransportEvent,
        now: Instant,
        handler: &mut H,
    ) {
        if self.is_destroyed() {
            return;
        }
        if id != self.current {
            tracing::debug!(connection = id, current = self.current, "dropping stale transport event");
            return;
        }
        match event {
            TransportEvent::Opened => self.on_transport_open(now, handler),
            TransportEvent::Message(text) => self.on_transport_message(&text, now, handler),
            TransportEvent::Closed(close) => self.on_transport_close(close, now, handler),
            TransportEvent::Error(reason) => {
                self.on_transport_error(ChannelError::Transport(reason), now, handler);
            }
        }
    }

    /// Fire every timer due at `now`.
    pub fn poll_timers<H: ChannelHandler>(&mut self, now: Instant, handler: &mut H) {
        if self.is_destroyed() {
            return;
        }

        if let Some(due) = self.reconnect_due
            && now >= due
        {
            self.reconnect_due = None;
            tracing::info!("reconnect attempt {} starting", self.attempts);
            self.connect(now, handler);
        }

        if let Some(due) = self.heartbeat_due
            && now >= due
        {
            if self.state == ChannelState::Open {
                if let Err(e) = self.send(&ClientMessage::Ping) {
                    tracing::debug!("heartbeat ping not sent: {e}");
                }
                self.heartbeat_due = Some(now + self.options.heartbeat_interval);
            } else {
                self.heartbeat_due = None;
            }
        }
    }

    fn on_transport_open<H: ChannelHandler>(&mut self, now: Instant, handler: &mut H) {
        if self.state != ChannelState::Connecting {
            tracing::debug!("open event in state {}, ignoring", self.state);
            return;
        }
        self.state = ChannelState::Open;
        self.attempts = 0;
        self.ever_opened = true;
        self.heartbeat_due = Some(now + self.options.heartbeat_interval);
        tracing::info!(connection = self.current, "channel open");
        handler.on_open();
    }

    fn on_transport_message<H: ChannelHandler>(
        &mut self,
        text: &str,
        now: Instant,
        handler: &mut H,
    ) {
        match ServerMessage::decode(text) {
            Ok(ServerMessage::Ping) => {
                if let Err(e) = self.send(&ClientMessage::Pong) {
                    tracing::debug!("pong not sent: {e}");
                }
            }
            Ok(ServerMessage::Pong) => self.last_pong = Some(now),
            Ok(message) => handler.on_message(message),
            Err(e) => {
                tracing::warn!("dropping undecodable frame: {e}");
                handler.on_error(&ChannelError::Decode(e));
            }
        }
    }

    fn on_transport_close<H: ChannelHandler>(
        &mut self,
        close: CloseInfo,
        now: Instant,
        handler: &mut H,
    ) {
        self.heartbeat_due = None;
        let settled = matches!(
            self.state,
            ChannelState::ReconnectWait { .. } | ChannelState::Failed
        );
        if !settled {
            self.state = ChannelState::Closed;
        }

        let close = CloseInfo {
            clean: close.clean || self.close_requested,
            ..close
        };
        tracing::info!(
            connection = self.current,
            code = close.code,
            clean = close.clean,
            "channel closed: {}",
            close.reason
        );
        handler.on_close(&close);

        if !close.clean && !settled {
            self.reconnect(now, handler);
        }
    }

    fn on_transport_error<H: ChannelHandler>(
        &mut self,
        error: ChannelError,
        now: Instant,
        handler: &mut H,
    ) {
        self.heartbeat_due = None;
        tracing::warn!(connection = self.current, "channel error: {error}");
        handler.on_error(&error);

        if self.close_requested || self.is_destroyed() {
            return;
        }

        let within_grace = self
            .attempt_started
            .is_some_and(|started| now.saturating_duration_since(started) < self.options.initial_failure_grace);
        if !self.ever_opened && self.attempts == 0 && within_grace {
            self.state = ChannelState::Failed;
            self.reconnect_due = None;
            tracing::error!("initial connection failed; not retrying");
            handler.on_reconnect_failed();
            return;
        }

        self.reconnect(now, handler);
    }

    /// Schedule the next retry or give up. Idempotent while a retry is
    /// already pending or the budget is spent.
    fn reconnect<H: ChannelHandler>(&mut self, now: Instant, handler: &mut H) {
        if matches!(
            self.state,
            ChannelState::ReconnectWait { .. } | ChannelState::Failed
        ) {
            return;
        }

        if self.attempts >= self.options.max_reconnect_attempts {
            self.state = ChannelState::Failed;
            self.reconnect_due = None;
            tracing::error!(
                "giving up after {} reconnect attempts",
                self.options.max_reconnect_attempts
            );
            handler.on_reconnect_failed();
            return;
        }

        self.attempts += 1;
        let delay = self.options.backoff_delay(self.attempts);
        self.state = ChannelState::ReconnectWait {
            attempt: self.attempts,
        };
        self.reconnect_due = Some(now + delay);
        tracing::info!(
            "reconnecting in {}ms (attempt {}/{})",
            delay.as_millis(),
            self.attempts,
            self.options.max_reconnect_attempts
        );
        handler.on_reconnect(self.attempts, delay);
    }
}
