//! Sync coordinator scenarios with a scripted transport and no network.

use neuroplace::channel::{ChannelOptions, ChannelState, CloseInfo, TransportEvent};
use neuroplace::raster::RasterStore;
use neuroplace::sync::{
    EffectOutcome, FallbackError, NoticeKind, PlacementRoute, SnapshotSource, SyncCoordinator,
    SyncEffect, SyncEvent, SyncMode, SyncOptions,
};
use neuroplace::{Cell, GridGeometry, PlaceError, ViewState};
use neuroplace_wire::{Color, GridSnapshot, PlacePixelRequest};

use crate::helpers::{Clock, MockTransport, ms};

const RED: Color = Color::rgb(255, 0, 0);

fn coordinator(width: u32, height: u32) -> (SyncCoordinator<MockTransport>, MockTransport) {
    let transport = MockTransport::new();
    let geometry = GridGeometry::new(width, height, 10);
    let coordinator = SyncCoordinator::new(
        ChannelOptions::ordinary("ws://localhost:3000/ws"),
        SyncOptions::default(),
        RasterStore::new(geometry, 2, Color::WHITE),
        ViewState::new(geometry, 800, 600),
        transport.clone(),
    );
    (coordinator, transport)
}

/// Start and open the channel; drain whatever that produced.
fn live(width: u32, height: u32, clock: &Clock) -> (SyncCoordinator<MockTransport>, MockTransport) {
    let (mut c, transport) = coordinator(width, height);
    c.start(clock.now());
    let id = c.channel().connection_id();
    c.handle_transport(id, TransportEvent::Opened, clock.now());
    assert_eq!(c.mode(), SyncMode::Live);
    c.drain_events();
    (c, transport)
}

fn message(c: &mut SyncCoordinator<MockTransport>, clock: &Clock, text: &str) {
    let id = c.channel().connection_id();
    c.handle_transport(id, TransportEvent::Message(text.to_owned()), clock.now());
}

fn notices(events: &[SyncEvent]) -> Vec<(NoticeKind, String)> {
    events
        .iter()
        .filter_map(|e| match e {
            SyncEvent::Notice(n) => Some((n.kind, n.message.clone())),
            _ => None,
        })
        .collect()
}

/// Answer every outstanding snapshot fetch, including the one re-issued
/// after the channel opened.
fn settle_snapshots(c: &mut SyncCoordinator<MockTransport>, clock: &Clock) {
    while c.drain_effects().contains(&SyncEffect::FetchSnapshot) {
        let geometry = c.store().geometry();
        let (width, height) = (geometry.width as usize, geometry.height as usize);
        c.complete(
            EffectOutcome::SnapshotFetched(Ok(GridSnapshot::filled(width, height, Color::WHITE))),
            clock.now(),
        );
    }
}

fn fetch_failed() -> FallbackError {
    FallbackError::Status {
        status: 503,
        body: String::new(),
    }
}

// ── Grid updates ─────────────────────────────────────────────────────

#[test]
fn white_grid_then_red_update_reaches_the_overview() {
    let clock = Clock::new();
    let (mut c, _transport) = live(3, 3, &clock);

    message(
        &mut c,
        &clock,
        r##"{"type":"gridData","grid":[["#ffffff","#ffffff","#ffffff"],["#ffffff","#ffffff","#ffffff"],["#ffffff","#ffffff","#ffffff"]]}"##,
    );
    message(
        &mut c,
        &clock,
        r##"{"type":"pixelUpdate","x":1,"y":1,"color":"#ff0000","username":"vedal","timestamp":1758412800000}"##,
    );

    let store = c.store();
    assert_eq!(store.color_at(1, 1), RED);
    for y in 0..3 {
        for x in 0..3 {
            if (x, y) != (1, 1) {
                assert_eq!(store.color_at(x, y), Color::WHITE, "cell ({x}, {y})");
            }
        }
    }
    let overview = store.overview().unwrap();
    assert_eq!(overview.get_pixel(0, 0).0, RED.to_rgba());
    assert_eq!(overview.get_pixel(1, 1).0, Color::WHITE.to_rgba());

    let log: Vec<_> = c.pixel_log().collect();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].cell, Cell::new(1, 1));
    assert_eq!(log[0].username, "vedal");
    assert!(log[0].placed_at.is_some());
    assert_eq!(c.snapshot_source(), SnapshotSource::Authoritative);
}

#[test]
fn out_of_grid_update_is_a_protocol_violation() {
    let clock = Clock::new();
    let (mut c, _transport) = live(3, 3, &clock);

    message(&mut c, &clock, r##"{"type":"pixelUpdate","x":3,"y":0,"color":"#ff0000"}"##);

    let events = c.drain_events();
    assert!(events.iter().any(|e| matches!(e, SyncEvent::ProtocolViolation(_))));
    assert_eq!(c.store().filled_cells(), 0);
    assert_eq!(c.pixel_log().count(), 0);
}

#[test]
fn pixel_log_keeps_the_latest_hundred() {
    let clock = Clock::new();
    let (mut c, _transport) = live(20, 20, &clock);
    for i in 0..150 {
        let (x, y) = (i % 20, i / 20);
        message(
            &mut c,
            &clock,
            &format!(r##"{{"type":"pixelUpdate","x":{x},"y":{y},"color":"#00ff00"}}"##),
        );
    }
    let log: Vec<_> = c.pixel_log().collect();
    assert_eq!(log.len(), 100);
    assert_eq!(log[0].cell, Cell::new(50 % 20, 50 / 20));
    assert_eq!(log[99].cell, Cell::new(149 % 20, 149 / 20));
    assert!(log.iter().all(|entry| entry.username == "Anonymous"));
}

#[test]
fn updates_during_snapshot_fetch_are_replayed() {
    let clock = Clock::new();
    let (mut c, _transport) = live(3, 3, &clock);
    assert_eq!(c.drain_effects(), vec![SyncEffect::FetchSnapshot]);

    // The channel delivers an update while GET /grid is outstanding.
    message(&mut c, &clock, r##"{"type":"pixelUpdate","x":2,"y":2,"color":"#ff0000"}"##);

    // The snapshot predates that update.
    let stale = GridSnapshot::filled(3, 3, Color::WHITE);
    c.complete(EffectOutcome::SnapshotFetched(Ok(stale)), clock.now());

    assert_eq!(c.store().color_at(2, 2), RED);
    assert_eq!(c.store().color_at(0, 0), Color::WHITE);
}

#[test]
fn opening_during_a_fetch_refetches_once_it_lands() {
    let mut clock = Clock::new();
    let (mut c, _transport) = coordinator(3, 3);
    c.start(clock.now());
    assert_eq!(c.drain_effects(), vec![SyncEffect::FetchSnapshot]);

    clock.advance(ms(500));
    let id = c.channel().connection_id();
    c.handle_transport(id, TransportEvent::Opened, clock.now());
    assert_eq!(c.mode(), SyncMode::Live);
    assert!(c.drain_effects().is_empty());

    // The startup fetch was answered before the channel subscribed: it
    // misses (0, 0), which was placed in between and never reaches us.
    c.complete(
        EffectOutcome::SnapshotFetched(Ok(GridSnapshot::filled(3, 3, Color::WHITE))),
        clock.now(),
    );
    assert_eq!(c.drain_effects(), vec![SyncEffect::FetchSnapshot]);

    // Updates keep being recorded until the fresh snapshot lands.
    message(&mut c, &clock, r##"{"type":"pixelUpdate","x":2,"y":2,"color":"#ff0000"}"##);
    let mut fresh = GridSnapshot::filled(3, 3, Color::WHITE);
    fresh.set(0, 0, Color::BLACK);
    c.complete(EffectOutcome::SnapshotFetched(Ok(fresh)), clock.now());

    assert_eq!(c.store().color_at(0, 0), Color::BLACK);
    assert_eq!(c.store().color_at(2, 2), RED);
    assert!(c.drain_effects().is_empty());
}

#[test]
fn opening_with_no_fetch_outstanding_requests_one() {
    let clock = Clock::new();
    let (mut c, _transport) = coordinator(3, 3);
    c.start(clock.now());
    settle_snapshots(&mut c, &clock);

    let id = c.channel().connection_id();
    c.handle_transport(id, TransportEvent::Opened, clock.now());
    assert_eq!(c.drain_effects(), vec![SyncEffect::FetchSnapshot]);
}

#[test]
fn channel_grid_data_supersedes_recorded_updates() {
    let clock = Clock::new();
    let (mut c, _transport) = live(2, 1, &clock);
    c.drain_effects();

    message(&mut c, &clock, r##"{"type":"pixelUpdate","x":0,"y":0,"color":"#ff0000"}"##);
    message(&mut c, &clock, r##"{"type":"gridData","grid":[["#0000ff","#0000ff"]]}"##);
    c.complete(
        EffectOutcome::SnapshotFetched(Ok(GridSnapshot::filled(2, 1, Color::WHITE))),
        clock.now(),
    );

    // The red update was already covered by gridData, so it is not replayed.
    assert_eq!(c.store().color_at(0, 0), Color::WHITE);
}

#[test]
fn empty_grid_data_is_ignored() {
    let clock = Clock::new();
    let (mut c, _transport) = live(2, 2, &clock);
    message(&mut c, &clock, r##"{"type":"pixelUpdate","x":0,"y":0,"color":"#ff0000"}"##);
    message(&mut c, &clock, r#"{"type":"gridData","grid":[]}"#);
    assert_eq!(c.store().color_at(0, 0), RED);
}

// ── Modes ────────────────────────────────────────────────────────────

#[test]
fn starts_in_fallback_and_goes_live_on_open() {
    let clock = Clock::new();
    let (mut c, transport) = coordinator(3, 3);
    c.set_token(Some("secret".into()), clock.now());
    c.start(clock.now());

    assert_eq!(c.mode(), SyncMode::Fallback);
    assert!(c.is_polling());
    assert_eq!(c.drain_effects(), vec![SyncEffect::FetchSnapshot]);
    assert_eq!(transport.opens(), 1);

    let id = c.channel().connection_id();
    c.handle_transport(id, TransportEvent::Opened, clock.now());
    assert_eq!(c.mode(), SyncMode::Live);
    assert!(!c.is_polling());
    assert_eq!(transport.sent_types(), vec!["authenticate"]);
    assert!(transport.sent()[0].contains("secret"));

    let events = c.drain_events();
    assert!(events.contains(&SyncEvent::ModeChanged(SyncMode::Live)));
    assert!(events.contains(&SyncEvent::ConnectionChanged(ChannelState::Open)));
}

#[test]
fn open_without_token_skips_authentication() {
    let clock = Clock::new();
    let (_c, transport) = live(3, 3, &clock);
    assert!(transport.sent_types().is_empty());
}

#[test]
fn unclean_close_enters_fallback_and_polls() {
    let mut clock = Clock::new();
    let (mut c, _transport) = live(3, 3, &clock);
    settle_snapshots(&mut c, &clock);

    let id = c.channel().connection_id();
    c.handle_transport(id, TransportEvent::Closed(CloseInfo::abnormal("reset")), clock.now());
    assert_eq!(c.mode(), SyncMode::Fallback);
    assert!(c.is_polling());
    let events = c.drain_events();
    assert!(events.contains(&SyncEvent::ModeChanged(SyncMode::Fallback)));
    assert_eq!(
        notices(&events),
        vec![(NoticeKind::Info, "Reconnecting... (1)".to_owned())]
    );

    c.poll_timers(clock.advance(ms(2000)));
    let effects = c.drain_effects();
    assert!(effects.contains(&SyncEffect::FetchSnapshot));
}

#[test]
fn polling_never_overlaps() {
    let mut clock = Clock::new();
    let (mut c, _transport) = coordinator(3, 3);
    c.start(clock.now());
    assert_eq!(c.drain_effects(), vec![SyncEffect::FetchSnapshot]);

    // First fetch still outstanding: the tick is skipped.
    c.poll_timers(clock.advance(ms(2000)));
    assert!(c.drain_effects().is_empty());

    c.complete(
        EffectOutcome::SnapshotFetched(Ok(GridSnapshot::filled(3, 3, Color::WHITE))),
        clock.now(),
    );
    c.poll_timers(clock.advance(ms(2000)));
    assert_eq!(c.drain_effects(), vec![SyncEffect::FetchSnapshot]);
}

#[test]
fn clean_close_stays_live_without_polling() {
    let clock = Clock::new();
    let (mut c, _transport) = live(3, 3, &clock);
    let id = c.channel().connection_id();
    c.handle_transport(
        id,
        TransportEvent::Closed(CloseInfo {
            code: 1000,
            reason: "bye".into(),
            clean: true,
        }),
        clock.now(),
    );
    assert_eq!(c.mode(), SyncMode::Live);
    assert!(!c.is_polling());
}

#[test]
fn immediate_first_failure_reports_once_and_keeps_polling() {
    let mut clock = Clock::new();
    let (mut c, transport) = coordinator(3, 3);
    c.start(clock.now());
    let id = c.channel().connection_id();
    clock.advance(ms(50));
    c.handle_transport(id, TransportEvent::Error("refused".into()), clock.now());
    c.handle_transport(id, TransportEvent::Closed(CloseInfo::abnormal("refused")), clock.now());

    assert_eq!(c.channel().state(), ChannelState::Failed);
    assert_eq!(c.mode(), SyncMode::Fallback);
    let events = c.drain_events();
    assert_eq!(
        notices(&events),
        vec![
            (
                NoticeKind::Error,
                "Connection issue detected. Attempting to reconnect...".to_owned()
            ),
            (
                NoticeKind::Error,
                "Connection lost. Switching to fallback mode.".to_owned()
            ),
        ]
    );

    // Only polling is left.
    assert_eq!(c.next_deadline(), Some(poll_due_after_start(&clock)));
    c.poll_timers(clock.advance(ms(60_000)));
    assert_eq!(transport.opens(), 1);
}

/// Poll deadline armed at `start`, given the clock was advanced 50ms since.
fn poll_due_after_start(clock: &Clock) -> std::time::Instant {
    clock.now() - ms(50) + ms(2000)
}

#[test]
fn shutdown_silences_everything() {
    let mut clock = Clock::new();
    let (mut c, transport) = live(3, 3, &clock);
    let id = c.channel().connection_id();
    c.handle_transport(id, TransportEvent::Closed(CloseInfo::abnormal("reset")), clock.now());
    c.shutdown();
    c.drain_events();
    c.drain_effects();
    let calls = transport.calls();

    assert_eq!(c.next_deadline(), None);
    c.poll_timers(clock.advance(ms(3_600_000)));
    c.handle_transport(id, TransportEvent::Opened, clock.now());
    c.complete(
        EffectOutcome::SnapshotFetched(Ok(GridSnapshot::filled(3, 3, Color::WHITE))),
        clock.now(),
    );

    assert_eq!(transport.calls(), calls);
    assert!(c.drain_events().is_empty());
    assert!(c.drain_effects().is_empty());
    assert_eq!(c.store().filled_cells(), 0);
    assert!(matches!(
        c.place_pixel(0, 0, RED, clock.now()),
        Err(PlaceError::Stopped)
    ));
}

// ── Backup snapshot ──────────────────────────────────────────────────

#[test]
fn failed_fetch_in_fallback_loads_backup_once() {
    let mut clock = Clock::new();
    let (mut c, _transport) = coordinator(2, 2);
    c.start(clock.now());
    c.drain_effects();

    c.complete(EffectOutcome::SnapshotFetched(Err(fetch_failed())), clock.now());
    assert_eq!(
        c.drain_effects(),
        vec![SyncEffect::LoadBackup {
            path: "/grid-backup-2025-09-21.json".into()
        }]
    );
    c.complete(
        EffectOutcome::BackupLoaded(Ok(GridSnapshot::filled(2, 2, RED))),
        clock.now(),
    );
    assert!(c.is_degraded());
    assert_eq!(c.store().color_at(1, 1), RED);
    let events = c.drain_events();
    assert!(events.contains(&SyncEvent::GridReplaced(SnapshotSource::Backup)));
    assert_eq!(
        notices(&events),
        vec![(NoticeKind::Info, "Loaded from backup data".to_owned())]
    );

    // A later failure does not reload the backup.
    c.poll_timers(clock.advance(ms(2000)));
    c.drain_effects();
    c.complete(EffectOutcome::SnapshotFetched(Err(fetch_failed())), clock.now());
    assert!(c.drain_effects().is_empty());

    // The next authoritative snapshot replaces it.
    c.poll_timers(clock.advance(ms(2000)));
    c.complete(
        EffectOutcome::SnapshotFetched(Ok(GridSnapshot::filled(2, 2, Color::WHITE))),
        clock.now(),
    );
    assert!(!c.is_degraded());
    assert_eq!(c.store().color_at(1, 1), Color::WHITE);
}

#[test]
fn backup_never_overrides_an_authoritative_grid() {
    let clock = Clock::new();
    let (mut c, _transport) = coordinator(2, 2);
    c.start(clock.now());
    c.complete(
        EffectOutcome::SnapshotFetched(Ok(GridSnapshot::filled(2, 2, Color::WHITE))),
        clock.now(),
    );
    c.complete(
        EffectOutcome::BackupLoaded(Ok(GridSnapshot::filled(2, 2, RED))),
        clock.now(),
    );
    assert_eq!(c.store().color_at(0, 0), Color::WHITE);
    assert_eq!(c.snapshot_source(), SnapshotSource::Authoritative);
}

#[test]
fn failed_fetch_while_live_does_not_load_backup() {
    let clock = Clock::new();
    let (mut c, _transport) = live(2, 2, &clock);
    c.drain_effects();
    c.complete(EffectOutcome::SnapshotFetched(Err(fetch_failed())), clock.now());
    // Only the post-open refetch; no backup.
    assert_eq!(c.drain_effects(), vec![SyncEffect::FetchSnapshot]);
    c.complete(EffectOutcome::SnapshotFetched(Err(fetch_failed())), clock.now());
    assert!(c.drain_effects().is_empty());
}

// ── Placement ────────────────────────────────────────────────────────

#[test]
fn placement_over_open_channel() {
    let clock = Clock::new();
    let (mut c, transport) = live(3, 3, &clock);
    c.set_token(Some("tok".into()), clock.now());

    let route = c.place_pixel(2, 1, RED, clock.now()).unwrap();
    assert_eq!(route, PlacementRoute::Channel);
    assert_eq!(transport.sent_types(), vec!["authenticate", "placePixel"]);
    assert!(transport.sent()[1].contains(r##""color":"#ff0000""##));
    assert!(c.drain_effects().iter().all(|e| !matches!(e, SyncEffect::PlaceViaHttp { .. })));
    // Not applied locally until the server echoes it.
    assert_eq!(c.store().cell(2, 1), None);
}

#[test]
fn placement_without_channel_goes_over_http() {
    let clock = Clock::new();
    let (mut c, _transport) = coordinator(3, 3);
    c.start(clock.now());
    c.drain_effects();
    c.set_token(Some("tok".into()), clock.now());

    let route = c.place_pixel(0, 2, RED, clock.now()).unwrap();
    assert_eq!(route, PlacementRoute::Http);
    let request = PlacePixelRequest {
        x: 0,
        y: 2,
        color: RED,
    };
    assert_eq!(
        c.drain_effects(),
        vec![SyncEffect::PlaceViaHttp {
            request,
            token: "tok".into()
        }]
    );

    c.drain_events();
    c.complete(
        EffectOutcome::PlacementSent {
            request,
            result: Err(FallbackError::Status {
                status: 429,
                body: "Cooldown active".into(),
            }),
        },
        clock.now(),
    );
    let events = c.drain_events();
    assert!(events.contains(&SyncEvent::PlacementFailed {
        cell: Cell::new(0, 2),
        message: "Cooldown active".into()
    }));
    assert_eq!(
        notices(&events),
        vec![(
            NoticeKind::PixelError,
            "Failed to place pixel: Cooldown active".to_owned()
        )]
    );
}

#[test]
fn placement_validation() {
    let clock = Clock::new();
    let (mut c, _transport) = live(3, 3, &clock);

    assert!(matches!(
        c.place_pixel(0, 0, RED, clock.now()),
        Err(PlaceError::AuthRequired)
    ));
    c.set_token(Some("tok".into()), clock.now());
    assert!(matches!(
        c.place_pixel(-1, 0, RED, clock.now()),
        Err(PlaceError::InvalidCell { x: -1, y: 0 })
    ));

    let events = c.drain_events();
    assert_eq!(
        notices(&events),
        vec![
            (NoticeKind::PixelError, "Please log in to place pixels".to_owned()),
            (NoticeKind::PixelError, "Invalid pixel coordinates".to_owned()),
        ]
    );
}

#[test]
fn optimistic_placement_applies_locally() {
    let clock = Clock::new();
    let transport = MockTransport::new();
    let geometry = GridGeometry::new(3, 3, 10);
    let mut c = SyncCoordinator::new(
        ChannelOptions::ordinary("ws://localhost:3000/ws"),
        SyncOptions {
            optimistic_placement: true,
            ..SyncOptions::default()
        },
        RasterStore::new(geometry, 2, Color::WHITE),
        ViewState::new(geometry, 800, 600),
        transport,
    );
    c.set_token(Some("tok".into()), clock.now());
    c.place_pixel(1, 1, RED, clock.now()).unwrap();
    assert_eq!(c.store().cell(1, 1), Some(RED));
}

#[test]
fn click_selects_and_places_for_logged_in_user() {
    let clock = Clock::new();
    let (mut c, transport) = live(3, 3, &clock);

    // Logged out: selection only.
    assert_eq!(c.click(15.0, 25.0, RED, clock.now()).unwrap(), None);
    assert_eq!(c.view().selection(), Some(Cell::new(1, 2)));

    c.set_token(Some("tok".into()), clock.now());
    c.set_user_profile(Some(serde_json::json!({"username": "vedal"})));
    assert_eq!(
        c.click(5.0, 5.0, RED, clock.now()).unwrap(),
        Some(PlacementRoute::Channel)
    );
    assert_eq!(c.view().selection(), Some(Cell::new(0, 0)));
    assert_eq!(transport.sent_types(), vec!["authenticate", "placePixel"]);

    // Off-grid clicks do nothing.
    assert_eq!(c.click(-5.0, 5.0, RED, clock.now()).unwrap(), None);
    assert_eq!(c.view().selection(), Some(Cell::new(0, 0)));
}

#[test]
fn set_token_reauthenticates_when_open() {
    let clock = Clock::new();
    let (mut c, transport) = live(3, 3, &clock);
    c.set_token(Some("first".into()), clock.now());
    c.set_token(Some("second".into()), clock.now());
    assert_eq!(transport.sent_types(), vec!["authenticate", "authenticate"]);
    assert!(transport.sent()[1].contains("second"));
    assert_eq!(c.token(), Some("second"));
}

// ── Server notices ───────────────────────────────────────────────────

#[test]
fn server_messages_become_notices() {
    let mut clock = Clock::new();
    let (mut c, _transport) = live(3, 3, &clock);

    message(&mut c, &clock, r#"{"type":"announcement","message":"Event starts soon"}"#);
    message(&mut c, &clock, r#"{"type":"rateLimit"}"#);
    message(&mut c, &clock, r#"{"type":"error","message":"Banned"}"#);
    message(&mut c, &clock, r#"{"type":"activeUsers","users":[{"username":"a"},{"username":"b","deviceType":"mobile"}]}"#);
    message(&mut c, &clock, r#"{"type":"brandNew"}"#);

    let events = c.drain_events();
    assert_eq!(
        notices(&events),
        vec![
            (NoticeKind::Announcement, "Event starts soon".to_owned()),
            (
                NoticeKind::PixelError,
                "Slow down! You're placing pixels too quickly.".to_owned()
            ),
            (NoticeKind::Error, "Banned".to_owned()),
        ]
    );
    assert!(events.iter().any(|e| matches!(e, SyncEvent::ActiveUsers(users) if users.len() == 2)));

    // Back-to-back duplicates inside the window show once, later ones again.
    message(&mut c, &clock, r#"{"type":"rateLimit"}"#);
    message(&mut c, &clock, r#"{"type":"rateLimit"}"#);
    assert_eq!(notices(&c.drain_events()).len(), 1);
    clock.advance(ms(2500));
    message(&mut c, &clock, r#"{"type":"rateLimit"}"#);
    assert_eq!(notices(&c.drain_events()).len(), 1);
}
