//! Integration tests for the player against the simulated browser
//!
//! Covers the end-to-end flows:
//! - Silent token retries during startup
//! - A room that never publishes a track
//! - Audio exhausting its retries while video keeps playing
//! - Unlocking audio on a gesture-gated platform
//! - Dropped sessions and manual reconnect
//! - Unmount releasing every resource, also after a failed mount

use roomcast_core::media::{
    AudioTrackState, AutoplayPolicy, SimulatedMedia, TrackKind, VideoTrackState,
};
use roomcast_core::room::{ScriptedTokenProvider, ScriptedTransport, TransportInjector, ViewerToken};
use roomcast_core::{
    Config, ConnectionState, ConnectionUpdate, DisplayState, PlatformCapabilities, Player,
    PlayerCommand, RemoteTrack,
};
use tokio::sync::mpsc;
use tokio::time::{self, Duration};

const IPHONE_UA: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_5 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.5 Mobile/15E148 Safari/604.1";

struct Harness {
    player: Player,
    media: SimulatedMedia,
    injector: TransportInjector,
    tokens: ScriptedTokenProvider,
}

fn harness(capabilities: PlatformCapabilities, policy: AutoplayPolicy) -> Harness {
    let media = SimulatedMedia::with_policy(policy);
    let (transport, injector) = ScriptedTransport::pair();
    let tokens = ScriptedTokenProvider::new(ViewerToken::new(
        "tok",
        "wss://rtc.example.net",
        "viewer-1",
        "Viewer",
    ));
    let player = Player::new(
        &Config::default(),
        capabilities,
        Box::new(tokens.clone()),
        Box::new(transport),
        Box::new(media.clone()),
    );
    Harness {
        player,
        media,
        injector,
        tokens,
    }
}

/// Run the player for `duration` of (paused) time with no user commands
async fn run_for(player: &mut Player, duration: Duration) {
    let (tx, rx) = mpsc::unbounded_channel::<PlayerCommand>();
    let stop = async move {
        time::sleep(duration).await;
        drop(tx);
    };
    let (_, result) = futures::join!(stop, player.run(rx));
    assert!(result.is_ok(), "Event loop should exit cleanly when commands close");
}

#[tokio::test(start_paused = true)]
async fn test_token_fails_twice_then_connects_silently() {
    let mut h = harness(PlatformCapabilities::desktop(), AutoplayPolicy::Allowed);
    h.tokens.fail_times(2, "503 Service Unavailable");
    let mut updates = h.player.subscribe_connection();

    let result = h.player.mount("lobby").await;
    assert!(result.is_ok(), "Third token attempt should connect");
    assert_eq!(h.tokens.calls(), 3);
    assert_eq!(h.tokens.requested_rooms(), vec!["lobby"; 3]);
    assert_eq!(h.player.connection_state(), ConnectionState::Connected);

    let mut seen = Vec::new();
    while let Ok(update) = updates.try_recv() {
        seen.push(update);
    }
    assert!(
        !seen.iter().any(|update| matches!(update, ConnectionUpdate::Failed { .. })),
        "Startup retries must not surface a failure"
    );
    assert!(matches!(seen.last(), Some(ConnectionUpdate::Connected { .. })));
}

#[tokio::test(start_paused = true)]
async fn test_token_exhaustion_fails_the_mount() {
    let mut h = harness(PlatformCapabilities::desktop(), AutoplayPolicy::Allowed);
    h.tokens.fail_times(3, "Room not found");

    let err = h.player.mount("lobby").await.unwrap_err();
    assert!(err.is_fatal());
    assert!(matches!(h.player.display_state(), DisplayState::Failed { .. }));
    assert!(!h.injector.is_connected());
}

#[tokio::test(start_paused = true)]
async fn test_unmount_after_failed_mount_returns_to_idle() {
    let mut h = harness(PlatformCapabilities::desktop(), AutoplayPolicy::Allowed);
    h.tokens.fail_times(3, "Room not found");
    let mut updates = h.player.subscribe_connection();

    assert!(h.player.mount("lobby").await.is_err());
    assert!(matches!(h.player.display_state(), DisplayState::Failed { .. }));

    h.player.unmount().await;

    assert_eq!(h.player.display_state(), &DisplayState::Idle);
    assert_eq!(h.player.connection_state(), ConnectionState::Disconnected);
    let mut seen = Vec::new();
    while let Ok(update) = updates.try_recv() {
        seen.push(update);
    }
    assert_eq!(
        seen.last(),
        Some(&ConnectionUpdate::Disconnected),
        "Unmount should settle a failed connect"
    );
}

#[tokio::test(start_paused = true)]
async fn test_room_without_tracks_waits_without_retrying() {
    let mut h = harness(PlatformCapabilities::desktop(), AutoplayPolicy::Allowed);
    h.player.mount("lobby").await.unwrap();

    run_for(&mut h.player, Duration::from_secs(600)).await;

    assert_eq!(
        h.player.display_state(),
        &DisplayState::WaitingForStream { stream_ended: false }
    );
    assert_eq!(h.player.pending_timers(), 0);
    assert_eq!(h.tokens.calls(), 1);
    assert_eq!(h.injector.connects().len(), 1);
    assert_eq!(h.media.live_elements(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_audio_exhaustion_blocks_audio_but_video_plays() {
    let mut h = harness(PlatformCapabilities::desktop(), AutoplayPolicy::Allowed);
    h.media.fail_play("a1", u32::MAX);
    h.player.mount("lobby").await.unwrap();

    assert!(h.injector.subscribe_track(RemoteTrack::video("v1")));
    assert!(h.injector.subscribe_track(RemoteTrack::audio("a1")));
    run_for(&mut h.player, Duration::from_secs(60)).await;

    let record = h.player.audio().record("a1").unwrap();
    assert!(record.failed, "Audio should stop retrying after the bound");
    assert_eq!(record.retry_count, 5);
    assert_eq!(record.state, AudioTrackState::Failed);
    assert_eq!(h.media.play_attempts("a1"), 5);

    let snapshot = h.player.snapshot();
    assert!(snapshot.controls.audio_blocked);
    assert_eq!(snapshot.display, DisplayState::Live);
    assert_eq!(snapshot.pending_timers, 0);
    assert_eq!(
        h.player.video().attachment("v1").unwrap().state,
        VideoTrackState::Playing
    );
    assert!(h.media.element_for_track("v1").unwrap().playing);
}

#[tokio::test(start_paused = true)]
async fn test_manual_audio_retry_after_exhaustion() {
    let mut h = harness(PlatformCapabilities::desktop(), AutoplayPolicy::Allowed);
    h.media.fail_play("a1", 5);
    h.player.mount("lobby").await.unwrap();
    h.injector.subscribe_track(RemoteTrack::audio("a1"));
    run_for(&mut h.player, Duration::from_secs(60)).await;
    assert!(h.player.audio().record("a1").unwrap().failed);

    h.player.retry_audio(None);

    let record = h.player.audio().record("a1").unwrap();
    assert!(!record.failed);
    assert_eq!(record.state, AudioTrackState::Playing);
    assert!(!h.player.snapshot().controls.audio_blocked);
}

#[tokio::test(start_paused = true)]
async fn test_gesture_unlock_on_ios() {
    let capabilities = PlatformCapabilities::detect(IPHONE_UA, 5);
    assert!(capabilities.is_ios);
    let mut h = harness(
        capabilities,
        AutoplayPolicy::RequireGesture {
            allow_silent: false,
        },
    );
    h.player.mount("lobby").await.unwrap();
    h.injector.subscribe_track(RemoteTrack::video("v1"));
    h.injector.subscribe_track(RemoteTrack::audio("a1"));
    run_for(&mut h.player, Duration::from_secs(30)).await;

    let snapshot = h.player.snapshot();
    assert!(snapshot.controls.requires_user_gesture);
    assert_eq!(snapshot.display, DisplayState::Live, "Muted video plays without a gesture");
    assert!(h.media.element_for_track("a1").is_none(), "No audio element before the gesture");
    assert_eq!(h.player.audio().record("a1").unwrap().retry_count, 0);
    assert!(h.player.capabilities().requires_gesture_for_audio);
    assert!(!h.media.is_user_activated());

    h.player.unlock_audio();
    h.player.unlock_audio();

    assert!(h.media.is_user_activated());
    assert_eq!(h.media.elements_of_kind(TrackKind::Audio), 1);
    assert_eq!(h.media.elements_of_kind(TrackKind::Video), 1);
    assert_eq!(h.player.audio().record("a1").unwrap().state, AudioTrackState::Playing);
    assert!(!h.player.snapshot().controls.requires_user_gesture);
    assert_eq!(h.media.audio_contexts_created(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_drop_surfaces_lost_and_reconnect_is_manual() {
    let mut h = harness(PlatformCapabilities::desktop(), AutoplayPolicy::Allowed);
    h.player.mount("lobby").await.unwrap();
    h.injector.subscribe_track(RemoteTrack::video("v1"));
    h.injector.drop_connection();
    run_for(&mut h.player, Duration::from_secs(30)).await;

    assert!(matches!(h.player.display_state(), DisplayState::ConnectionLost { .. }));
    assert_eq!(h.injector.connects().len(), 1, "No automatic reconnect");
    assert_eq!(h.media.live_elements(), 0);

    let (tx, rx) = mpsc::unbounded_channel();
    tx.send(PlayerCommand::Reconnect).unwrap();
    drop(tx);
    h.player.run(rx).await.unwrap();

    assert_eq!(h.injector.connects().len(), 2);
    assert_eq!(h.player.connection_state(), ConnectionState::Connected);
    assert_eq!(
        h.player.display_state(),
        &DisplayState::WaitingForStream { stream_ended: false }
    );
}

#[tokio::test(start_paused = true)]
async fn test_unmount_releases_elements_timers_and_session() {
    let mut h = harness(PlatformCapabilities::desktop(), AutoplayPolicy::Allowed);
    h.media.fail_play("a1", u32::MAX);
    h.media.fail_primary_attach("v1", u32::MAX);
    h.media.fail_stream_source("v1", u32::MAX);
    h.player.mount("lobby").await.unwrap();
    h.injector.subscribe_track(RemoteTrack::video("v1"));
    h.injector.subscribe_track(RemoteTrack::audio("a1"));
    h.player.unlock_audio();
    run_for(&mut h.player, Duration::from_millis(100)).await;
    assert!(h.player.pending_timers() > 0, "Retries should be pending mid-flight");
    assert!(h.player.next_deadline().is_some());

    let (tx, rx) = mpsc::unbounded_channel();
    tx.send(PlayerCommand::Unmount).unwrap();
    h.player.run(rx).await.unwrap();

    assert_eq!(h.media.live_elements(), 0);
    assert_eq!(h.player.pending_timers(), 0);
    assert_eq!(h.player.next_deadline(), None);
    assert!(h.player.registry().is_empty());
    assert!(!h.injector.is_connected());
    assert_eq!(h.player.display_state(), &DisplayState::Idle);
}
