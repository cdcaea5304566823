//! CLI binary for neuroplace.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use neuroplace::raster::RasterStore;
use neuroplace::session::{Session, SessionStore};
use neuroplace::sync::{FallbackClient, SyncEvent, SyncMode};
use neuroplace::{ClientRuntime, PlaceConfig};
use neuroplace_wire::Color;
use tokio::sync::broadcast;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// How long `place` waits for the channel before using HTTP.
const LIVE_WAIT: Duration = Duration::from_secs(3);

/// neuroplace: shared pixel canvas client.
#[derive(Parser)]
#[command(name = "neuroplace", version, about)]
struct Cli {
    /// Path to TOML configuration file.
    #[arg(short, long, env = "NEUROPLACE_CONFIG")]
    config: Option<PathBuf>,

    /// Server base URL, overriding the configuration.
    #[arg(short, long, env = "NEUROPLACE_SERVER")]
    server: Option<String>,

    /// Subcommand to run.
    #[command(subcommand)]
    command: Command,
}

/// Available commands.
#[derive(Subcommand)]
enum Command {
    /// Connect and follow the canvas.
    Watch {
        /// Periodically write the presented view to this PNG.
        #[arg(long)]
        export: Option<PathBuf>,

        /// Seconds between exports.
        #[arg(long, default_value_t = 10)]
        every: u64,
    },

    /// Place one pixel.
    Place {
        /// Column.
        x: i64,
        /// Row.
        y: i64,
        /// Color, e.g. `#ff4500`.
        color: Color,
    },

    /// Fetch the current grid over HTTP and write it as PNG.
    Snapshot {
        /// Output file.
        #[arg(long)]
        out: Option<PathBuf>,

        /// Write the decimated overview instead of the full composite.
        #[arg(long)]
        overview: bool,
    },

    /// Store an auth token for later runs.
    Login {
        /// Bearer token.
        #[arg(long)]
        token: String,

        /// User profile as a JSON object.
        #[arg(long)]
        profile: Option<String>,
    },

    /// Forget the stored token.
    Logout,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("neuroplace=info,tungstenite=warn,reqwest=warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(PlaceConfig::default_config_path);
    let mut config = PlaceConfig::load_or_default(&config_path)?;
    if let Some(server) = cli.server {
        config.server.base_url = server;
    }
    config.validate()?;

    let sessions = SessionStore::default_location();

    match cli.command {
        Command::Watch { export, every } => run_watch(&config, &sessions, export, every).await,
        Command::Place { x, y, color } => run_place(&config, &sessions, x, y, color).await,
        Command::Snapshot { out, overview } => run_snapshot(&config, out, overview).await,
        Command::Login { token, profile } => login(&sessions, token, profile),
        Command::Logout => {
            sessions.clear()?;
            println!("Logged out.");
            Ok(())
        }
    }
}

async fn run_watch(
    config: &PlaceConfig,
    sessions: &SessionStore,
    export: Option<PathBuf>,
    every: u64,
) -> anyhow::Result<()> {
    println!("neuroplace v{}", env!("CARGO_PKG_VERSION"));
    let session = sessions.load()?;
    let (runtime, handle) = ClientRuntime::new(config, &session)?;
    let mut events = handle.subscribe();
    let driver = tokio::spawn(runtime.run());

    let cancel = handle.cancellation();
    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received Ctrl+C, shutting down...");
            cancel_clone.cancel();
        }
    });

    println!("Watching {}. Press Ctrl+C to stop.\n", config.server.base_url);

    let mut ticker = tokio::time::interval(Duration::from_secs(every.max(1)));
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            event = events.recv() => match event {
                Ok(event) => print_event(&event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("dropped {n} events");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            _ = ticker.tick(), if export.is_some() => {
                if let Some(path) = &export
                    && let Err(e) = handle.export_frame(path.clone()).await
                {
                    tracing::warn!("export failed: {e}");
                }
            }
        }
    }

    handle.shutdown();
    driver.await?;
    Ok(())
}

async fn run_place(
    config: &PlaceConfig,
    sessions: &SessionStore,
    x: i64,
    y: i64,
    color: Color,
) -> anyhow::Result<()> {
    let session = sessions.load()?;
    if !session.is_logged_in() {
        anyhow::bail!("not logged in; run `neuroplace login --token <TOKEN>` first");
    }
    let (runtime, handle) = ClientRuntime::new(config, &session)?;
    let mut events = handle.subscribe();
    let driver = tokio::spawn(runtime.run());

    // Prefer the channel if it comes up quickly.
    let _ = tokio::time::timeout(LIVE_WAIT, async {
        while let Ok(event) = events.recv().await {
            if event == SyncEvent::ModeChanged(SyncMode::Live) {
                break;
            }
        }
    })
    .await;

    let route = handle.place(x, y, color).await?;
    info!(?route, "placement submitted");

    let wait = Duration::from_secs(config.server.request_timeout_secs + 2);
    let outcome = tokio::time::timeout(wait, async {
        while let Ok(event) = events.recv().await {
            match event {
                SyncEvent::PlacementSent { cell, route } => {
                    return Ok(format!("Placed {color} at {cell} via {route:?}"));
                }
                SyncEvent::PlacementFailed { message, .. } => return Err(message),
                SyncEvent::Notice(notice) => eprintln!("{notice}"),
                _ => {}
            }
        }
        Err("client stopped".to_owned())
    })
    .await;

    handle.shutdown();
    driver.await?;

    match outcome {
        Ok(Ok(summary)) => {
            println!("{summary}");
            Ok(())
        }
        Ok(Err(message)) => anyhow::bail!("placement failed: {message}"),
        Err(_) => anyhow::bail!("timed out waiting for placement result"),
    }
}

async fn run_snapshot(
    config: &PlaceConfig,
    out: Option<PathBuf>,
    overview: bool,
) -> anyhow::Result<()> {
    let client = FallbackClient::new(
        config.server.base()?,
        Duration::from_secs(config.server.request_timeout_secs),
    );
    let grid = client.fetch_grid().await?;

    let mut store = RasterStore::from_config(&config.canvas);
    store.replace_all(&grid)?;

    let out = out.unwrap_or_else(neuroplace::place_dirs::default_export_file);
    if let Some(parent) = out.parent() {
        std::fs::create_dir_all(parent)?;
    }
    if overview {
        store.save_overview_png(&out)?;
    } else {
        store.save_composite_png(&out)?;
    }
    println!(
        "Wrote {} ({} cells set) to {}",
        if overview { "overview" } else { "composite" },
        store.filled_cells(),
        out.display()
    );
    Ok(())
}

fn login(sessions: &SessionStore, token: String, profile: Option<String>) -> anyhow::Result<()> {
    let user = profile
        .map(|raw| serde_json::from_str::<serde_json::Value>(&raw))
        .transpose()?;
    sessions.save(&Session {
        token: Some(token),
        user,
    })?;
    println!("Session saved to {}", sessions.path().display());
    Ok(())
}

fn print_event(event: &SyncEvent) {
    match event {
        SyncEvent::ModeChanged(mode) => println!("mode: {mode}"),
        SyncEvent::ConnectionChanged(state) => println!("channel: {state}"),
        SyncEvent::GridReplaced(source) => println!("grid replaced ({source:?})"),
        SyncEvent::PixelUpdated(entry) => println!(
            "{} {} by {}",
            entry.cell,
            entry.color,
            entry.username
        ),
        SyncEvent::ActiveUsers(users) => println!("{} users online", users.len()),
        SyncEvent::Notice(notice) => println!("{notice}"),
        SyncEvent::PlacementSent { cell, route } => println!("placed {cell} via {route:?}"),
        SyncEvent::PlacementFailed { cell, message } => {
            println!("placement at {cell} failed: {message}");
        }
        SyncEvent::ProtocolViolation(reason) => println!("protocol violation: {reason}"),
    }
}
