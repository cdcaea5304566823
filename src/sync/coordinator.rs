//! LIVE/FALLBACK coordination between channel, store and view.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use neuroplace_wire::{ClientMessage, Color, GridSnapshot, PlacePixelRequest, ServerMessage};

use super::notice::{BACKUP_NOTICE_TIMEOUT, RECONNECT_NOTICE_TIMEOUT};
use super::{
    ANONYMOUS, EffectOutcome, FallbackError, Notice, NoticeFilter, PIXEL_LOG_CAPACITY,
    PixelLogEntry, PlacementRoute, SnapshotSource, SyncEffect, SyncEvent, SyncMode, SyncOptions,
};
use crate::channel::{
    ChannelError, ChannelHandler, ChannelManager, ChannelOptions, ChannelState, CloseInfo,
    ConnectionId, Transport, TransportEvent,
};
use crate::config::PlaceConfig;
use crate::error::{PlaceError, Result};
use crate::raster::{Frame, RasterStore};
use crate::view::ViewState;
use crate::viewport::Cell;

const CONNECTION_ISSUE: &str = "Connection issue detected. Attempting to reconnect...";
const CONNECTION_LOST: &str = "Connection lost. Switching to fallback mode.";
const INVALID_COORDINATES: &str = "Invalid pixel coordinates";
const LOGIN_REQUIRED: &str = "Please log in to place pixels";
const RATE_LIMITED: &str = "Slow down! You're placing pixels too quickly.";
const SERVER_ERROR: &str = "The server reported an error.";
const PLACE_FAILED: &str = "Failed to place pixel";
const BACKUP_LOADED: &str = "Loaded from backup data";

/// Owns the channel, the raster store and the view, and decides how the
/// grid is kept current.
///
/// Starts in [`SyncMode::Fallback`] with polling armed and the channel
/// connecting; the first successful open switches to [`SyncMode::Live`].
///
/// Like [`ChannelManager`], the coordinator is driven from outside: feed it
/// transport events, call [`poll_timers`](Self::poll_timers) at
/// [`next_deadline`](Self::next_deadline), run the effects from
/// [`drain_effects`](Self::drain_effects) and hand their results back via
/// [`complete`](Self::complete).
#[derive(Debug)]
pub struct SyncCoordinator<T: Transport> {
    channel: ChannelManager<T>,
    state: SyncState,
    view: ViewState,
}

/// Everything the channel callbacks are allowed to touch.
#[derive(Debug)]
struct SyncState {
    options: SyncOptions,
    store: RasterStore,
    mode: SyncMode,
    token: Option<String>,
    user_profile: Option<serde_json::Value>,
    now: Instant,
    stopped: bool,
    poll_due: Option<Instant>,
    source: SnapshotSource,
    /// Updates applied while a snapshot fetch is in flight; `Some` exactly
    /// while one is.
    recorded: Option<Vec<(i64, i64, Color)>>,
    /// The channel opened while a fetch was in flight; that fetch may have
    /// been answered before the channel subscribed, so ask again once it
    /// lands.
    refetch_after_flight: bool,
    backup_in_flight: bool,
    last_channel_state: ChannelState,
    outbox: Vec<ClientMessage>,
    effects: Vec<SyncEffect>,
    events: Vec<SyncEvent>,
    notices: NoticeFilter,
    pixel_log: VecDeque<PixelLogEntry>,
}

impl<T: Transport> SyncCoordinator<T> {
    /// Assemble a coordinator from its parts.
    pub fn new(
        channel: ChannelOptions,
        options: SyncOptions,
        store: RasterStore,
        view: ViewState,
        transport: T,
    ) -> Self {
        let notices = NoticeFilter::new(options.notice_dedup_window);
        Self {
            channel: ChannelManager::new(channel, transport),
            state: SyncState {
                options,
                store,
                mode: SyncMode::Fallback,
                token: None,
                user_profile: None,
                now: Instant::now(),
                stopped: false,
                poll_due: None,
                source: SnapshotSource::None,
                recorded: None,
                refetch_after_flight: false,
                backup_in_flight: false,
                last_channel_state: ChannelState::Idle,
                outbox: Vec::new(),
                effects: Vec::new(),
                events: Vec::new(),
                notices,
                pixel_log: VecDeque::with_capacity(PIXEL_LOG_CAPACITY),
            },
            view,
        }
    }

    /// Build everything from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`PlaceError::Config`] if the channel URL cannot be resolved.
    pub fn from_config(config: &PlaceConfig, transport: T) -> Result<Self> {
        let canvas = &config.canvas;
        Ok(Self::new(
            config.channel_options()?,
            SyncOptions::from_config(config),
            RasterStore::from_config(canvas),
            ViewState::new(canvas.geometry(), canvas.surface_width, canvas.surface_height),
            transport,
        ))
    }

    // ── Lifecycle ─────────────────────────────────────────────────────

    /// Enter FALLBACK, request a first snapshot and start connecting.
    pub fn start(&mut self, now: Instant) {
        self.state.now = now;
        if self.state.stopped {
            return;
        }
        tracing::info!("sync starting in fallback mode");
        self.state.enter_fallback();
        self.state.request_snapshot();
        self.channel.connect(now, &mut self.state);
        self.after_channel();
    }

    /// Destroy the channel and disarm polling. Nothing fires afterwards.
    pub fn shutdown(&mut self) {
        if self.state.stopped {
            return;
        }
        self.state.stopped = true;
        self.state.poll_due = None;
        self.channel.destroy();
        self.after_channel();
        tracing::info!("sync stopped");
    }

    /// Connect again after the channel gave up, with a fresh retry budget.
    pub fn reconnect(&mut self, now: Instant) {
        self.state.now = now;
        if self.state.stopped {
            return;
        }
        self.channel.connect(now, &mut self.state);
        self.after_channel();
    }

    // ── Driving ───────────────────────────────────────────────────────

    /// Feed one transport event.
    pub fn handle_transport(&mut self, id: ConnectionId, event: TransportEvent, now: Instant) {
        self.state.now = now;
        self.channel.handle_transport(id, event, now, &mut self.state);
        self.after_channel();
    }

    /// Fire every timer due at `now`.
    pub fn poll_timers(&mut self, now: Instant) {
        self.state.now = now;
        self.channel.poll_timers(now, &mut self.state);
        self.state.poll_timer(now);
        self.after_channel();
    }

    /// Earliest pending timer across channel and polling.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.channel.next_deadline(), self.state.poll_due) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Hand back the result of an effect.
    pub fn complete(&mut self, outcome: EffectOutcome, now: Instant) {
        self.state.now = now;
        if self.state.stopped {
            tracing::debug!("dropping effect outcome after shutdown");
            return;
        }
        match outcome {
            EffectOutcome::SnapshotFetched(result) => self.state.on_snapshot_fetched(result),
            EffectOutcome::BackupLoaded(result) => self.state.on_backup_loaded(result),
            EffectOutcome::PlacementSent { request, result } => {
                self.state.on_http_placement(request, result);
            }
        }
    }

    /// Take the effects requested since the last call.
    pub fn drain_effects(&mut self) -> Vec<SyncEffect> {
        std::mem::take(&mut self.state.effects)
    }

    /// Take the events queued since the last call.
    pub fn drain_events(&mut self) -> Vec<SyncEvent> {
        std::mem::take(&mut self.state.events)
    }

    // ── Placement and session ─────────────────────────────────────────

    /// Place `color` at `(x, y)`.
    ///
    /// Goes over the channel when it is open, otherwise (or if the channel
    /// send fails) over HTTP. An HTTP result arrives later as
    /// [`SyncEvent::PlacementSent`] or [`SyncEvent::PlacementFailed`].
    ///
    /// # Errors
    ///
    /// [`PlaceError::InvalidCell`] outside the grid, [`PlaceError::AuthRequired`]
    /// without a token, [`PlaceError::Stopped`] after shutdown. The first two
    /// also raise a pixel-error notice.
    pub fn place_pixel(
        &mut self,
        x: i64,
        y: i64,
        color: Color,
        now: Instant,
    ) -> Result<PlacementRoute> {
        self.state.now = now;
        if self.state.stopped {
            return Err(PlaceError::Stopped);
        }
        let Some(cell) = self.state.store.geometry().cell(x, y) else {
            self.state.notify(Notice::pixel_error(INVALID_COORDINATES));
            return Err(PlaceError::InvalidCell { x, y });
        };
        let Some(token) = self.state.token.clone() else {
            self.state.notify(Notice::pixel_error(LOGIN_REQUIRED));
            return Err(PlaceError::AuthRequired);
        };

        if self.state.options.optimistic_placement
            && let Err(e) = self.state.store.set_cell(x, y, color)
        {
            tracing::debug!("optimistic placement skipped: {e}");
        }

        let mut route = None;
        if self.channel.is_open() {
            let message = ClientMessage::PlacePixel {
                x: cell.x,
                y: cell.y,
                color,
            };
            match self.channel.send(&message) {
                Ok(()) => route = Some(PlacementRoute::Channel),
                Err(e) => tracing::warn!("channel placement failed, using HTTP: {e}"),
            }
        }

        let route = match route {
            Some(route) => {
                self.state.events.push(SyncEvent::PlacementSent { cell, route });
                route
            }
            None => {
                self.state.effects.push(SyncEffect::PlaceViaHttp {
                    request: PlacePixelRequest {
                        x: cell.x,
                        y: cell.y,
                        color,
                    },
                    token,
                });
                PlacementRoute::Http
            }
        };
        tracing::debug!(x, y, color = %color, ?route, "placement submitted");
        self.after_channel();
        Ok(route)
    }

    /// Place `color` on the selected cell, if any.
    ///
    /// # Errors
    ///
    /// As [`place_pixel`](Self::place_pixel).
    pub fn place_selected(&mut self, color: Color, now: Instant) -> Result<Option<PlacementRoute>> {
        match self.view.selection() {
            Some(cell) => self
                .place_pixel(i64::from(cell.x), i64::from(cell.y), color, now)
                .map(Some),
            None => Ok(None),
        }
    }

    /// A click or tap on the surface: select the cell under it and, for a
    /// logged-in user with a profile, place `color` there.
    ///
    /// # Errors
    ///
    /// As [`place_pixel`](Self::place_pixel).
    pub fn click(
        &mut self,
        x: f64,
        y: f64,
        color: Color,
        now: Instant,
    ) -> Result<Option<PlacementRoute>> {
        let Some(cell) = self.view.select_at(x, y) else {
            return Ok(None);
        };
        if self.state.token.is_some() && self.state.user_profile.is_some() {
            return self
                .place_pixel(i64::from(cell.x), i64::from(cell.y), color, now)
                .map(Some);
        }
        Ok(None)
    }

    /// Replace the auth token. Re-authenticates at once if the channel is
    /// open.
    pub fn set_token(&mut self, token: Option<String>, now: Instant) {
        self.state.now = now;
        self.state.token = token.filter(|t| !t.trim().is_empty());
        if let Some(token) = &self.state.token
            && self.channel.is_open()
        {
            let message = ClientMessage::Authenticate {
                token: token.clone(),
            };
            if let Err(e) = self.channel.send(&message) {
                tracing::warn!("re-authentication not sent: {e}");
            }
        }
        self.after_channel();
    }

    /// Replace the cached user profile.
    pub fn set_user_profile(&mut self, profile: Option<serde_json::Value>) {
        self.state.user_profile = profile;
    }

    // ── Presentation ──────────────────────────────────────────────────

    /// Draw the grid and selection through the current viewport.
    pub fn present(&self, frame: &mut Frame) {
        self.state.store.present(
            frame,
            &self.view.viewport(),
            self.view.selection(),
            self.state.options.accent,
        );
    }

    /// Redraw only the selection layer.
    pub fn present_selection(&self, frame: &mut Frame) {
        self.state.store.present_selection(
            frame,
            &self.view.viewport(),
            self.view.selection(),
            self.state.options.accent,
        );
    }

    // ── Accessors ─────────────────────────────────────────────────────

    /// Current sync mode.
    #[must_use]
    pub fn mode(&self) -> SyncMode {
        self.state.mode
    }

    /// Where the grid on screen came from.
    #[must_use]
    pub fn snapshot_source(&self) -> SnapshotSource {
        self.state.source
    }

    /// `true` while the grid shown is the static backup.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.state.source == SnapshotSource::Backup
    }

    /// The raster store.
    #[must_use]
    pub fn store(&self) -> &RasterStore {
        &self.state.store
    }

    /// The view.
    #[must_use]
    pub fn view(&self) -> &ViewState {
        &self.view
    }

    /// The view, for gesture handling.
    pub fn view_mut(&mut self) -> &mut ViewState {
        &mut self.view
    }

    /// The channel manager.
    #[must_use]
    pub fn channel(&self) -> &ChannelManager<T> {
        &self.channel
    }

    /// Current auth token.
    #[must_use]
    pub fn token(&self) -> Option<&str> {
        self.state.token.as_deref()
    }

    /// Recent placements, oldest first.
    pub fn pixel_log(&self) -> impl Iterator<Item = &PixelLogEntry> {
        self.state.pixel_log.iter()
    }

    /// `true` while polling is armed.
    #[must_use]
    pub fn is_polling(&self) -> bool {
        self.state.poll_due.is_some()
    }

    /// `true` after [`shutdown`](Self::shutdown).
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.state.stopped
    }

    /// Send anything the callbacks queued and report channel state moves.
    fn after_channel(&mut self) {
        for message in std::mem::take(&mut self.state.outbox) {
            if let Err(e) = self.channel.send(&message) {
                tracing::warn!("{} not sent: {e}", message.kind());
            }
        }
        let current = self.channel.state();
        if current != self.state.last_channel_state {
            self.state.last_channel_state = current;
            self.state.events.push(SyncEvent::ConnectionChanged(current));
        }
    }
}

impl SyncState {
    fn notify(&mut self, notice: Notice) {
        if !self.notices.admit(&notice, self.now) {
            tracing::debug!("suppressing duplicate notice: {notice}");
            return;
        }
        tracing::info!("{notice}");
        self.events.push(SyncEvent::Notice(notice));
    }

    fn enter_fallback(&mut self) {
        if self.stopped || (self.mode == SyncMode::Fallback && self.poll_due.is_some()) {
            return;
        }
        let changed = self.mode != SyncMode::Fallback;
        self.mode = SyncMode::Fallback;
        self.poll_due = Some(self.now + self.options.poll_interval);
        tracing::info!(
            "fallback mode: polling every {}ms",
            self.options.poll_interval.as_millis()
        );
        if changed {
            self.events.push(SyncEvent::ModeChanged(SyncMode::Fallback));
        }
    }

    fn enter_live(&mut self) {
        self.poll_due = None;
        if self.mode != SyncMode::Live {
            self.mode = SyncMode::Live;
            tracing::info!("live mode");
            self.events.push(SyncEvent::ModeChanged(SyncMode::Live));
        }
    }

    fn poll_timer(&mut self, now: Instant) {
        if let Some(due) = self.poll_due
            && now >= due
        {
            self.poll_due = Some(now + self.options.poll_interval);
            self.request_snapshot();
        }
    }

    /// Ask for `GET /grid` unless one is already in flight.
    fn request_snapshot(&mut self) {
        if self.recorded.is_some() {
            tracing::debug!("snapshot fetch already in flight, skipping");
            return;
        }
        self.recorded = Some(Vec::new());
        self.effects.push(SyncEffect::FetchSnapshot);
    }

    /// Ask for a snapshot the server answers after this point, even if an
    /// older fetch is still outstanding.
    fn request_fresh_snapshot(&mut self) {
        if self.recorded.is_some() {
            tracing::debug!("snapshot fetch in flight, refetching once it lands");
            self.refetch_after_flight = true;
            return;
        }
        self.request_snapshot();
    }

    fn apply_snapshot(&mut self, grid: &GridSnapshot, source: SnapshotSource) -> bool {
        match self.store.replace_all(grid) {
            Ok(()) => {
                self.source = source;
                tracing::debug!(?source, cells = self.store.filled_cells(), "grid replaced");
                self.events.push(SyncEvent::GridReplaced(source));
                true
            }
            Err(e) => {
                tracing::warn!("ignoring snapshot: {e}");
                false
            }
        }
    }

    fn apply_update(&mut self, update: neuroplace_wire::PixelUpdate) {
        let Some(cell) = self.store.geometry().cell(update.x, update.y) else {
            tracing::warn!(x = update.x, y = update.y, "pixel update outside the grid");
            self.events.push(SyncEvent::ProtocolViolation(format!(
                "pixelUpdate outside the grid at ({}, {})",
                update.x, update.y
            )));
            return;
        };
        if let Err(e) = self.store.set_cell(update.x, update.y, update.color) {
            tracing::warn!("pixel update rejected: {e}");
            return;
        }
        if let Some(recorded) = self.recorded.as_mut() {
            recorded.push((update.x, update.y, update.color));
        }

        let entry = PixelLogEntry {
            cell,
            color: update.color,
            username: update
                .username
                .filter(|name| !name.trim().is_empty())
                .unwrap_or_else(|| ANONYMOUS.to_owned()),
            placed_at: update.timestamp.as_ref().and_then(|t| t.to_datetime()),
        };
        if self.pixel_log.len() == PIXEL_LOG_CAPACITY {
            self.pixel_log.pop_front();
        }
        self.pixel_log.push_back(entry.clone());
        self.events.push(SyncEvent::PixelUpdated(entry));
    }

    fn on_snapshot_fetched(&mut self, result: std::result::Result<GridSnapshot, FallbackError>) {
        let recorded = self.recorded.take().unwrap_or_default();
        match result {
            Ok(grid) => {
                if self.apply_snapshot(&grid, SnapshotSource::Authoritative) {
                    if !recorded.is_empty() {
                        tracing::debug!("replaying {} updates over snapshot", recorded.len());
                    }
                    for (x, y, color) in recorded {
                        if let Err(e) = self.store.set_cell(x, y, color) {
                            tracing::debug!("replay skipped: {e}");
                        }
                    }
                }
            }
            Err(e) => {
                tracing::warn!("snapshot fetch failed: {e}");
                if self.mode == SyncMode::Fallback && self.source == SnapshotSource::None {
                    self.load_backup();
                }
            }
        }
        if std::mem::take(&mut self.refetch_after_flight) {
            self.request_snapshot();
        }
    }

    fn load_backup(&mut self) {
        if self.backup_in_flight {
            return;
        }
        let Some(path) = self.options.backup_path.clone() else {
            return;
        };
        self.backup_in_flight = true;
        self.effects.push(SyncEffect::LoadBackup { path });
    }

    fn on_backup_loaded(&mut self, result: std::result::Result<GridSnapshot, FallbackError>) {
        self.backup_in_flight = false;
        match result {
            Ok(_) if self.source != SnapshotSource::None => {
                tracing::debug!("discarding backup snapshot: grid already loaded");
            }
            Ok(grid) => {
                if self.apply_snapshot(&grid, SnapshotSource::Backup) {
                    tracing::warn!("showing backup snapshot until the server answers");
                    self.notify(Notice::info(BACKUP_LOADED).with_timeout(BACKUP_NOTICE_TIMEOUT));
                }
            }
            Err(e) => tracing::warn!("backup snapshot unavailable: {e}"),
        }
    }

    fn on_http_placement(
        &mut self,
        request: PlacePixelRequest,
        result: std::result::Result<(), FallbackError>,
    ) {
        let cell = Cell::new(request.x, request.y);
        match result {
            Ok(()) => self.events.push(SyncEvent::PlacementSent {
                cell,
                route: PlacementRoute::Http,
            }),
            Err(e) => {
                let message = e.user_message(PLACE_FAILED);
                tracing::warn!(%cell, "placement failed: {e}");
                self.notify(Notice::pixel_error(format!("{PLACE_FAILED}: {message}")));
                self.events.push(SyncEvent::PlacementFailed { cell, message });
            }
        }
    }
}

impl ChannelHandler for SyncState {
    fn on_open(&mut self) {
        self.enter_live();
        if let Some(token) = &self.token {
            self.outbox.push(ClientMessage::Authenticate {
                token: token.clone(),
            });
        }
        self.request_fresh_snapshot();
    }

    fn on_message(&mut self, message: ServerMessage) {
        match message {
            ServerMessage::GridData { grid } => {
                if self.apply_snapshot(&grid, SnapshotSource::Authoritative)
                    && let Some(recorded) = self.recorded.as_mut()
                {
                    recorded.clear();
                }
            }
            ServerMessage::PixelUpdate(update) => self.apply_update(update),
            ServerMessage::ActiveUsers { users } => {
                self.events.push(SyncEvent::ActiveUsers(users));
            }
            ServerMessage::Announcement { message } => self.notify(Notice::announcement(message)),
            ServerMessage::RateLimit { message } => {
                self.notify(Notice::pixel_error(
                    message.unwrap_or_else(|| RATE_LIMITED.to_owned()),
                ));
            }
            ServerMessage::Error { message } => {
                self.notify(Notice::error(
                    message.unwrap_or_else(|| SERVER_ERROR.to_owned()),
                ));
            }
            ServerMessage::Ping | ServerMessage::Pong => {}
            ServerMessage::Unrecognized { kind } => {
                tracing::debug!("ignoring unrecognized message type {kind:?}");
            }
        }
    }

    fn on_close(&mut self, close: &CloseInfo) {
        if !close.clean && self.mode != SyncMode::Fallback {
            self.enter_fallback();
        }
    }

    fn on_error(&mut self, error: &ChannelError) {
        match error {
            ChannelError::Decode(e) => {
                self.events
                    .push(SyncEvent::ProtocolViolation(format!("undecodable frame: {e}")));
            }
            _ => self.notify(Notice::error(CONNECTION_ISSUE)),
        }
    }

    fn on_reconnect(&mut self, attempt: u32, _delay: Duration) {
        self.notify(
            Notice::info(format!("Reconnecting... ({attempt})"))
                .with_timeout(RECONNECT_NOTICE_TIMEOUT),
        );
    }

    fn on_reconnect_failed(&mut self) {
        self.notify(Notice::error(CONNECTION_LOST));
        self.enter_fallback();
    }
}
