//! Async driver for the sync coordinator.
//!
//! One tokio task owns the [`SyncCoordinator`] and multiplexes everything
//! that can wake it: WebSocket events, the next timer deadline, finished
//! HTTP effects, commands from [`ClientHandle`]s, and cancellation. HTTP
//! work runs in spawned tasks that never see coordinator state; their
//! results come back through a `JoinSet`.
//!
//! Coordinator events are republished on a broadcast channel.

use std::path::PathBuf;
use std::time::Instant;

use neuroplace_wire::Color;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::channel::{ChannelStats, TransportEvents, WsTransport};
use crate::config::PlaceConfig;
use crate::error::{PlaceError, Result};
use crate::raster::Frame;
use crate::session::Session;
use crate::sync::{
    EffectOutcome, FallbackClient, PlacementRoute, SnapshotSource, SyncCoordinator, SyncEffect,
    SyncEvent, SyncMode,
};
use crate::viewport::Cell;

const COMMAND_QUEUE: usize = 64;
const EVENT_QUEUE: usize = 256;

/// Requests accepted by the driver.
#[derive(Debug)]
pub enum ClientCommand {
    /// Place one pixel.
    Place {
        /// Column.
        x: i64,
        /// Row.
        y: i64,
        /// Color.
        color: Color,
        /// Route taken, or why the placement was refused.
        reply: oneshot::Sender<Result<PlacementRoute>>,
    },
    /// Replace the auth token.
    SetToken(Option<String>),
    /// Replace the cached user profile.
    SetUserProfile(Option<serde_json::Value>),
    /// Connect again with a fresh retry budget.
    Reconnect,
    /// Translate the viewport.
    Pan {
        /// Device-pixel delta x.
        dx: f64,
        /// Device-pixel delta y.
        dy: f64,
    },
    /// Step the zoom about the surface centre.
    Zoom {
        /// `true` for in, `false` for out.
        zoom_in: bool,
    },
    /// Select a cell directly.
    Select(Option<Cell>),
    /// Present the current view and write it as PNG.
    ExportFrame {
        /// Destination file.
        path: PathBuf,
        /// Completion.
        reply: oneshot::Sender<Result<()>>,
    },
    /// Report current status.
    Status {
        /// Where to send it.
        reply: oneshot::Sender<ClientStatus>,
    },
}

/// Point-in-time summary of a running client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientStatus {
    /// Sync mode.
    pub mode: SyncMode,
    /// Channel counters.
    pub channel: ChannelStats,
    /// Where the grid came from.
    pub source: SnapshotSource,
    /// Cells with a color.
    pub filled_cells: usize,
    /// Current selection.
    pub selection: Option<Cell>,
}

/// Cloneable handle for talking to a running [`ClientRuntime`].
#[derive(Debug, Clone)]
pub struct ClientHandle {
    commands: mpsc::Sender<ClientCommand>,
    events: broadcast::Sender<SyncEvent>,
    cancel: CancellationToken,
}

impl ClientHandle {
    /// Place `color` at `(x, y)`.
    ///
    /// # Errors
    ///
    /// Returns the coordinator's validation error, or
    /// [`PlaceError::Stopped`] if the driver is gone.
    pub async fn place(&self, x: i64, y: i64, color: Color) -> Result<PlacementRoute> {
        let (reply, rx) = oneshot::channel();
        self.send(ClientCommand::Place { x, y, color, reply }).await?;
        rx.await.map_err(|_| PlaceError::Stopped)?
    }

    /// Replace the auth token.
    ///
    /// # Errors
    ///
    /// Returns [`PlaceError::Stopped`] if the driver is gone.
    pub async fn set_token(&self, token: Option<String>) -> Result<()> {
        self.send(ClientCommand::SetToken(token)).await
    }

    /// Retry the channel after it gave up.
    ///
    /// # Errors
    ///
    /// Returns [`PlaceError::Stopped`] if the driver is gone.
    pub async fn reconnect(&self) -> Result<()> {
        self.send(ClientCommand::Reconnect).await
    }

    /// Write the presented frame to `path`.
    ///
    /// # Errors
    ///
    /// Returns the raster error if presenting or writing fails, or
    /// [`PlaceError::Stopped`] if the driver is gone.
    pub async fn export_frame(&self, path: impl Into<PathBuf>) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(ClientCommand::ExportFrame {
            path: path.into(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| PlaceError::Stopped)?
    }

    /// Current status.
    ///
    /// # Errors
    ///
    /// Returns [`PlaceError::Stopped`] if the driver is gone.
    pub async fn status(&self) -> Result<ClientStatus> {
        let (reply, rx) = oneshot::channel();
        self.send(ClientCommand::Status { reply }).await?;
        rx.await.map_err(|_| PlaceError::Stopped)
    }

    /// Send any command.
    ///
    /// # Errors
    ///
    /// Returns [`PlaceError::Stopped`] if the driver is gone.
    pub async fn send(&self, command: ClientCommand) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| PlaceError::Stopped)
    }

    /// Subscribe to coordinator events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Ask the driver to shut down.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Token cancelled when the driver should stop.
    #[must_use]
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

/// The driver task's state.
pub struct ClientRuntime {
    coordinator: SyncCoordinator<WsTransport>,
    transport_events: TransportEvents,
    fallback: FallbackClient,
    commands: mpsc::Receiver<ClientCommand>,
    events: broadcast::Sender<SyncEvent>,
    cancel: CancellationToken,
    effects: JoinSet<EffectOutcome>,
    surface: (u32, u32),
}

impl ClientRuntime {
    /// Build a runtime and a handle to it. Nothing runs until
    /// [`run`](Self::run) is awaited.
    ///
    /// # Errors
    ///
    /// Returns [`PlaceError::Config`] for an invalid configuration.
    pub fn new(config: &PlaceConfig, session: &Session) -> Result<(Self, ClientHandle)> {
        config.validate()?;
        let (transport, transport_events) = WsTransport::new();
        let mut coordinator = SyncCoordinator::from_config(config, transport)?;
        let now = now();
        coordinator.set_token(session.token.clone(), now);
        coordinator.set_user_profile(session.user.clone());

        let fallback = FallbackClient::new(
            config.server.base()?,
            std::time::Duration::from_secs(config.server.request_timeout_secs),
        );
        let (command_tx, commands) = mpsc::channel(COMMAND_QUEUE);
        let (events, _) = broadcast::channel(EVENT_QUEUE);
        let cancel = CancellationToken::new();

        let handle = ClientHandle {
            commands: command_tx,
            events: events.clone(),
            cancel: cancel.clone(),
        };
        let runtime = Self {
            coordinator,
            transport_events,
            fallback,
            commands,
            events,
            cancel,
            effects: JoinSet::new(),
            surface: (config.canvas.surface_width, config.canvas.surface_height),
        };
        Ok((runtime, handle))
    }

    /// Drive the coordinator until cancelled or every handle is dropped.
    pub async fn run(mut self) {
        self.coordinator.start(now());
        self.flush();

        loop {
            let deadline = self.coordinator.next_deadline();
            let timer = async move {
                match deadline {
                    Some(at) => tokio::time::sleep_until(at.into()).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!("client runtime cancelled");
                    break;
                }
                Some((id, event)) = self.transport_events.recv() => {
                    self.coordinator.handle_transport(id, event, now());
                }
                () = timer => {
                    self.coordinator.poll_timers(now());
                }
                Some(joined) = self.effects.join_next(), if !self.effects.is_empty() => {
                    match joined {
                        Ok(outcome) => self.coordinator.complete(outcome, now()),
                        Err(e) => tracing::warn!("effect task failed: {e}"),
                    }
                }
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => {
                        tracing::info!("all client handles dropped");
                        break;
                    }
                },
            }
            self.flush();
        }

        self.coordinator.shutdown();
        self.effects.abort_all();
        self.flush();
    }

    fn handle_command(&mut self, command: ClientCommand) {
        let now = now();
        match command {
            ClientCommand::Place { x, y, color, reply } => {
                let _ = reply.send(self.coordinator.place_pixel(x, y, color, now));
            }
            ClientCommand::SetToken(token) => self.coordinator.set_token(token, now),
            ClientCommand::SetUserProfile(profile) => self.coordinator.set_user_profile(profile),
            ClientCommand::Reconnect => self.coordinator.reconnect(now),
            ClientCommand::Pan { dx, dy } => self.coordinator.view_mut().pan_by(dx, dy),
            ClientCommand::Zoom { zoom_in } => {
                let view = self.coordinator.view_mut();
                if zoom_in {
                    view.zoom_in();
                } else {
                    view.zoom_out();
                }
            }
            ClientCommand::Select(cell) => self.coordinator.view_mut().set_selection(cell),
            ClientCommand::ExportFrame { path, reply } => {
                let (width, height) = self.surface;
                let frame = Frame::new(width, height).map(|mut frame| {
                    self.coordinator.present(&mut frame);
                    frame
                });
                match frame {
                    Ok(frame) => {
                        tokio::task::spawn_blocking(move || {
                            let result = frame.save_png(&path).map_err(PlaceError::from);
                            let _ = reply.send(result);
                        });
                    }
                    Err(e) => {
                        let _ = reply.send(Err(e.into()));
                    }
                }
            }
            ClientCommand::Status { reply } => {
                let _ = reply.send(ClientStatus {
                    mode: self.coordinator.mode(),
                    channel: self.coordinator.channel().stats(),
                    source: self.coordinator.snapshot_source(),
                    filled_cells: self.coordinator.store().filled_cells(),
                    selection: self.coordinator.view().selection(),
                });
            }
        }
    }

    /// Start requested effects and publish queued events.
    fn flush(&mut self) {
        for effect in self.coordinator.drain_effects() {
            let client = self.fallback.clone();
            self.effects.spawn(run_effect(client, effect));
        }
        for event in self.coordinator.drain_events() {
            // No subscribers is fine.
            let _ = self.events.send(event);
        }
    }
}

async fn run_effect(client: FallbackClient, effect: SyncEffect) -> EffectOutcome {
    match effect {
        SyncEffect::FetchSnapshot => EffectOutcome::SnapshotFetched(client.fetch_grid().await),
        SyncEffect::LoadBackup { path } => {
            EffectOutcome::BackupLoaded(client.fetch_backup(&path).await)
        }
        SyncEffect::PlaceViaHttp { request, token } => EffectOutcome::PlacementSent {
            request,
            result: client.place_pixel(&request, &token).await,
        },
    }
}

/// Monotonic time that follows tokio's clock, so paused-time tests work.
fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}
