//! End-to-end driver tests: a real WebSocket server on loopback and a
//! wiremock HTTP origin.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use neuroplace::session::Session;
use neuroplace::sync::{PlacementRoute, SnapshotSource, SyncEvent, SyncMode};
use neuroplace::{ChannelState, ClientRuntime, PlaceConfig, PlaceError};
use neuroplace_wire::Color;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::Message;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const WAIT: Duration = Duration::from_secs(5);

const GRID_DATA: &str = r##"{"type":"gridData","grid":[["#ffffff","#ffffff","#ffffff"],["#ffffff","#ffffff","#ffffff"],["#ffffff","#ffffff","#ffffff"]]}"##;

/// Accept one channel connection. Every text frame the client sends is
/// forwarded on the returned receiver; `authenticate` is answered with
/// a full grid.
async fn channel_server() -> (String, mpsc::UnboundedReceiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let Ok((stream, _)) = listener.accept().await else {
            return;
        };
        let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
            return;
        };
        while let Some(Ok(message)) = ws.next().await {
            if let Message::Text(text) = message {
                if text.contains(r#""type":"authenticate""#)
                    && ws.send(Message::Text(GRID_DATA.into())).await.is_err()
                {
                    return;
                }
                let _ = tx.send(text);
            }
        }
    });
    (format!("ws://{addr}/ws"), rx)
}

/// A loopback address nothing listens on.
async fn dead_channel_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("ws://{addr}/ws")
}

async fn http_origin() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/grid"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "grid": [["#000000", "#000000", "#000000"],
                     ["#000000", "#000000", "#000000"],
                     ["#000000", "#000000", "#000000"]]
        })))
        .mount(&server)
        .await;
    server
}

fn config(http: &MockServer, channel_url: &str) -> PlaceConfig {
    let mut config = PlaceConfig::default();
    config.server.base_url = http.uri();
    config.server.channel_url = Some(channel_url.to_owned());
    config.server.request_timeout_secs = 2;
    config.canvas.grid_width = 3;
    config.canvas.grid_height = 3;
    config.canvas.surface_width = 60;
    config.canvas.surface_height = 40;
    config
}

fn logged_in() -> Session {
    Session {
        token: Some("tok-abc".into()),
        user: Some(serde_json::json!({"username": "tester"})),
    }
}

async fn wait_for(
    events: &mut broadcast::Receiver<SyncEvent>,
    wanted: impl Fn(&SyncEvent) -> bool,
) -> SyncEvent {
    tokio::time::timeout(WAIT, async {
        loop {
            match events.recv().await {
                Ok(event) if wanted(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => panic!("event stream closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

async fn next_frame(frames: &mut mpsc::UnboundedReceiver<String>) -> String {
    tokio::time::timeout(WAIT, frames.recv())
        .await
        .expect("timed out waiting for frame")
        .expect("channel server stopped")
}

// ── Live path ────────────────────────────────────────────────────────

#[tokio::test]
async fn live_channel_authenticates_and_places() {
    let http = http_origin().await;
    let (url, mut frames) = channel_server().await;
    let (runtime, handle) = ClientRuntime::new(&config(&http, &url), &logged_in()).unwrap();
    let mut events = handle.subscribe();
    let driver = tokio::spawn(runtime.run());

    wait_for(&mut events, |e| *e == SyncEvent::ModeChanged(SyncMode::Live)).await;
    let auth = next_frame(&mut frames).await;
    assert!(auth.contains(r#""type":"authenticate""#) && auth.contains("tok-abc"));

    let route = handle.place(2, 1, Color::rgb(255, 0, 0)).await.unwrap();
    assert_eq!(route, PlacementRoute::Channel);
    let place = next_frame(&mut frames).await;
    assert_eq!(
        place,
        r##"{"type":"placePixel","x":2,"y":1,"color":"#ff0000"}"##
    );

    let status = handle.status().await.unwrap();
    assert_eq!(status.mode, SyncMode::Live);
    assert_eq!(status.channel.state, ChannelState::Open);
    assert_eq!(status.channel.reconnect_attempts, 0);

    handle.shutdown();
    tokio::time::timeout(WAIT, driver).await.unwrap().unwrap();
}

// ── Fallback path ────────────────────────────────────────────────────

#[tokio::test]
async fn dead_channel_falls_back_to_http() {
    let http = http_origin().await;
    Mock::given(method("POST"))
        .and(path("/place-pixel"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&http)
        .await;
    let url = dead_channel_url().await;
    let (runtime, handle) = ClientRuntime::new(&config(&http, &url), &logged_in()).unwrap();
    let mut events = handle.subscribe();
    let driver = tokio::spawn(runtime.run());

    wait_for(&mut events, |e| {
        *e == SyncEvent::GridReplaced(SnapshotSource::Authoritative)
    })
    .await;
    let status = handle.status().await.unwrap();
    assert_eq!(status.mode, SyncMode::Fallback);
    assert_eq!(status.filled_cells, 9);

    let route = handle.place(0, 0, Color::WHITE).await.unwrap();
    assert_eq!(route, PlacementRoute::Http);
    wait_for(&mut events, |e| {
        matches!(
            e,
            SyncEvent::PlacementSent {
                route: PlacementRoute::Http,
                ..
            }
        )
    })
    .await;

    handle.shutdown();
    tokio::time::timeout(WAIT, driver).await.unwrap().unwrap();
}

#[tokio::test]
async fn rejected_http_placement_is_reported() {
    let http = http_origin().await;
    Mock::given(method("POST"))
        .and(path("/place-pixel"))
        .respond_with(ResponseTemplate::new(429).set_body_string("Cooldown active"))
        .mount(&http)
        .await;
    let url = dead_channel_url().await;
    let (runtime, handle) = ClientRuntime::new(&config(&http, &url), &logged_in()).unwrap();
    let mut events = handle.subscribe();
    let driver = tokio::spawn(runtime.run());

    handle.place(1, 1, Color::BLACK).await.unwrap();
    let failed = wait_for(&mut events, |e| matches!(e, SyncEvent::PlacementFailed { .. })).await;
    assert_eq!(
        failed,
        SyncEvent::PlacementFailed {
            cell: neuroplace::Cell::new(1, 1),
            message: "Cooldown active".into()
        }
    );

    handle.shutdown();
    tokio::time::timeout(WAIT, driver).await.unwrap().unwrap();
}

// ── Commands and lifecycle ───────────────────────────────────────────

#[tokio::test]
async fn export_writes_png_of_the_surface() {
    let http = http_origin().await;
    let url = dead_channel_url().await;
    let (runtime, handle) = ClientRuntime::new(&config(&http, &url), &Session::default()).unwrap();
    let mut events = handle.subscribe();
    let driver = tokio::spawn(runtime.run());
    wait_for(&mut events, |e| matches!(e, SyncEvent::GridReplaced(_))).await;

    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("frame.png");
    handle.export_frame(&out).await.unwrap();
    let bytes = std::fs::read(&out).unwrap();
    assert_eq!(&bytes[..8], b"\x89PNG\r\n\x1a\n");

    handle.shutdown();
    tokio::time::timeout(WAIT, driver).await.unwrap().unwrap();
}

#[tokio::test]
async fn logged_out_placement_is_refused() {
    let http = http_origin().await;
    let url = dead_channel_url().await;
    let (runtime, handle) = ClientRuntime::new(&config(&http, &url), &Session::default()).unwrap();
    let driver = tokio::spawn(runtime.run());

    let err = handle.place(0, 0, Color::WHITE).await.unwrap_err();
    assert!(matches!(err, PlaceError::AuthRequired));

    handle.shutdown();
    tokio::time::timeout(WAIT, driver).await.unwrap().unwrap();
}

#[tokio::test]
async fn handle_reports_stopped_after_shutdown() {
    let http = http_origin().await;
    let url = dead_channel_url().await;
    let (runtime, handle) = ClientRuntime::new(&config(&http, &url), &Session::default()).unwrap();
    let driver = tokio::spawn(runtime.run());

    handle.shutdown();
    tokio::time::timeout(WAIT, driver).await.unwrap().unwrap();
    assert!(matches!(
        handle.place(0, 0, Color::WHITE).await,
        Err(PlaceError::Stopped)
    ));
    assert!(matches!(handle.status().await, Err(PlaceError::Stopped)));
}

#[test]
fn invalid_config_is_rejected_up_front() {
    let mut config = PlaceConfig::default();
    config.canvas.grid_width = 0;
    assert!(matches!(
        ClientRuntime::new(&config, &Session::default()),
        Err(PlaceError::Config(_))
    ));
}
