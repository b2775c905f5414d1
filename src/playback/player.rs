//! Player facade and event loop
//!
//! The player wires the connection manager, the track registry, both
//! attachment engines and the controls together. Everything runs on one
//! task: `run` selects over transport events, the earliest retry deadline
//! and user commands, and every handler is a synchronous step.

use super::snapshot::{audio_statuses, video_statuses};
use super::{DisplayState, PlaybackControls, PlayerSnapshot};
use crate::config::Config;
use crate::error::PlayerError;
use crate::media::audio::AudioRetryPolicy;
use crate::media::{
    AttachContext, AudioEngine, MediaBackend, RetryTimers, TrackEvent, TrackKind, TrackRegistry,
    VideoEngine,
};
use crate::observer::SubscriptionId;
use crate::platform::PlatformCapabilities;
use crate::room::{
    ConnectionManager, ConnectionRetryPolicy, ConnectionState, ConnectionUpdate, TokenProvider,
    Transport, TransportEvent,
};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tokio::time::{self, Instant};

/// User-facing actions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlayerCommand {
    /// Local mute, the "pause" of live media
    ToggleMute,
    SetVolume { volume: f64 },
    ToggleFullscreen,
    /// Runs inside a user gesture
    UnlockAudio,
    /// Retry one audio track, or all when `track_id` is absent
    RetryAudio {
        #[serde(default)]
        track_id: Option<String>,
    },
    RetryVideo {
        #[serde(default)]
        track_id: Option<String>,
    },
    Reconnect,
    Unmount,
}

pub struct Player {
    capabilities: PlatformCapabilities,
    connection: ConnectionManager,
    registry: TrackRegistry,
    audio: AudioEngine,
    video: VideoEngine,
    controls: PlaybackControls,
    timers: RetryTimers,
    media: Box<dyn MediaBackend>,
    events: Option<mpsc::UnboundedReceiver<TransportEvent>>,
    room: Option<String>,
    display: DisplayState,
}

impl Player {
    pub fn new(
        config: &Config,
        capabilities: PlatformCapabilities,
        token_provider: Box<dyn TokenProvider>,
        transport: Box<dyn Transport>,
        media: Box<dyn MediaBackend>,
    ) -> Self {
        let connection = ConnectionManager::new(
            token_provider,
            transport,
            ConnectionRetryPolicy::from_config(&config.connection),
        );
        let mut player = Self {
            capabilities,
            connection,
            registry: TrackRegistry::new(),
            audio: AudioEngine::new(AudioRetryPolicy::from_config(&config.audio), capabilities),
            video: VideoEngine::new(config.video.retry_delay()),
            controls: PlaybackControls::new(&config.playback, capabilities),
            timers: RetryTimers::new(),
            media,
            events: None,
            room: None,
            display: DisplayState::Idle,
        };
        player.apply_output();
        player
    }

    /// Join `room_name`. A failure here is final until `reconnect`.
    pub async fn mount(&mut self, room_name: &str) -> Result<(), PlayerError> {
        info!("Mounting player for room {}", room_name);
        self.room = Some(room_name.to_string());
        self.connect().await
    }

    /// Tear down the current session and connect again
    pub async fn reconnect(&mut self) -> Result<(), PlayerError> {
        if self.room.is_none() {
            return Err(PlayerError::NotMounted);
        }
        self.teardown_session();
        self.connect().await
    }

    async fn connect(&mut self) -> Result<(), PlayerError> {
        let Some(room) = self.room.clone() else {
            return Err(PlayerError::NotMounted);
        };
        self.events = None;
        let result = self.connection.connect(&room).await;
        self.sync();
        self.events = Some(result?);
        Ok(())
    }

    /// Disconnect and release every resource. Safe to call in any state.
    pub async fn unmount(&mut self) {
        self.connection.disconnect().await;
        self.teardown_session();
        self.room = None;
        self.sync();
        info!("Player unmounted");
    }

    /// Drop every track, element and timer of the session
    fn teardown_session(&mut self) {
        self.events = None;
        let now = Instant::now();
        let mut ctx = AttachContext::new(self.media.as_mut(), &mut self.timers, now);
        let audio = self.audio.detach_all(&mut ctx);
        let video = self.video.detach_all(&mut ctx);
        self.registry.clear();
        let timers = self.timers.clear();
        self.connection.audio_context_mut().release(self.media.as_mut());
        debug!(
            "Session torn down: {} audio, {} video track(s), {} stray timer(s)",
            audio, video, timers
        );
    }

    /// Route one transport event
    pub fn handle_transport_event(&mut self, event: TransportEvent) -> Result<(), PlayerError> {
        let result = match event {
            TransportEvent::TrackSubscribed { track } => {
                if self.registry.on_track_added(track.clone()) {
                    let mut ctx =
                        AttachContext::new(self.media.as_mut(), &mut self.timers, Instant::now());
                    let outcome = match track.kind {
                        TrackKind::Audio => self.audio.add_track(track.clone(), &mut ctx),
                        TrackKind::Video => self.video.add_track(track.clone(), &mut ctx),
                    };
                    debug!("Track {} subscribed: {:?}", track.id, outcome);
                }
                Ok(())
            }
            TransportEvent::TrackUnsubscribed { track_id } => {
                if let Some(track) = self.registry.on_track_removed(&track_id) {
                    let mut ctx =
                        AttachContext::new(self.media.as_mut(), &mut self.timers, Instant::now());
                    match track.kind {
                        TrackKind::Audio => self.audio.remove_track(&track.id, &mut ctx),
                        TrackKind::Video => self.video.remove_track(&track.id, &mut ctx),
                    };
                }
                Ok(())
            }
            TransportEvent::TrackMuted { track_id, muted } => {
                if self.registry.set_muted(&track_id, muted).is_some() {
                    debug!("Remote track {} muted={}", track_id, muted);
                }
                Ok(())
            }
            TransportEvent::ConnectionStateChanged { state } => {
                match self.connection.handle_state_change(state) {
                    Some(err) => {
                        self.teardown_session();
                        Err(err)
                    }
                    None => Ok(()),
                }
            }
        };
        self.sync();
        result
    }

    /// Run every retry whose deadline has passed. Returns how many fired.
    pub fn fire_due_timers(&mut self, now: Instant) -> usize {
        let due = self.timers.take_due(now);
        for key in &due {
            let mut ctx = AttachContext::new(self.media.as_mut(), &mut self.timers, now);
            let outcome = match key.kind {
                TrackKind::Audio => self.audio.on_timer(&key.track_id, &mut ctx),
                TrackKind::Video => self.video.on_timer(&key.track_id, &mut ctx),
            };
            debug!("Retry of {} track {}: {:?}", key.kind.as_str(), key.track_id, outcome);
        }
        if !due.is_empty() {
            self.sync();
        }
        due.len()
    }

    /// User gesture: satisfy the audio gate and re-attempt waiting tracks
    pub fn unlock_audio(&mut self) {
        self.controls.user_gesture();
        let mut ctx = AttachContext::new(self.media.as_mut(), &mut self.timers, Instant::now());
        self.audio.unlock(self.connection.audio_context_mut(), &mut ctx);
        self.sync();
    }

    pub fn toggle_mute(&mut self) -> bool {
        let muted = self.controls.toggle_mute();
        self.apply_output();
        muted
    }

    pub fn set_volume(&mut self, volume: f64) {
        if self.controls.set_volume(volume) {
            self.apply_output();
        }
    }

    pub fn toggle_fullscreen(&mut self) -> bool {
        let element = self.video.primary_element();
        self.controls.toggle_fullscreen(self.media.as_mut(), element)
    }

    /// Fullscreen changed outside the player (e.g. the user pressed Escape)
    pub fn on_fullscreen_changed(&mut self, active: bool) {
        self.controls.on_fullscreen_changed(active);
    }

    pub fn retry_audio(&mut self, track_id: Option<&str>) {
        let mut ctx = AttachContext::new(self.media.as_mut(), &mut self.timers, Instant::now());
        match track_id {
            Some(track_id) => {
                self.audio.retry(track_id, &mut ctx);
            }
            None => {
                self.audio.retry_all(&mut ctx);
            }
        }
        self.sync();
    }

    pub fn retry_video(&mut self, track_id: Option<&str>) {
        let mut ctx = AttachContext::new(self.media.as_mut(), &mut self.timers, Instant::now());
        match track_id {
            Some(track_id) => {
                self.video.retry(track_id, &mut ctx);
            }
            None => {
                self.video.retry_all(&mut ctx);
            }
        }
        self.sync();
    }

    /// Apply one user command
    pub async fn apply(&mut self, command: PlayerCommand) -> Result<(), PlayerError> {
        debug!("Command: {:?}", command);
        match command {
            PlayerCommand::ToggleMute => {
                self.toggle_mute();
            }
            PlayerCommand::SetVolume { volume } => self.set_volume(volume),
            PlayerCommand::ToggleFullscreen => {
                self.toggle_fullscreen();
            }
            PlayerCommand::UnlockAudio => self.unlock_audio(),
            PlayerCommand::RetryAudio { track_id } => self.retry_audio(track_id.as_deref()),
            PlayerCommand::RetryVideo { track_id } => self.retry_video(track_id.as_deref()),
            PlayerCommand::Reconnect => self.reconnect().await?,
            PlayerCommand::Unmount => self.unmount().await,
        }
        Ok(())
    }

    /// Drive the player until an `Unmount` command or until the command
    /// channel closes. A closed channel leaves the player mounted.
    pub async fn run(
        &mut self,
        mut commands: mpsc::UnboundedReceiver<PlayerCommand>,
    ) -> Result<(), PlayerError> {
        loop {
            let deadline = self.timers.next_deadline();
            tokio::select! {
                event = next_event(&mut self.events) => match event {
                    Some(event) => {
                        if let Err(e) = self.handle_transport_event(event) {
                            warn!("{}", e);
                        }
                    }
                    None => {
                        self.events = None;
                        if let Some(e) = self.connection.handle_events_closed() {
                            self.teardown_session();
                            self.sync();
                            warn!("{}", e);
                        }
                    }
                },
                _ = sleep_until(deadline) => {
                    self.fire_due_timers(Instant::now());
                }
                command = commands.recv() => match command {
                    Some(PlayerCommand::Unmount) => {
                        self.unmount().await;
                        return Ok(());
                    }
                    Some(command) => {
                        if let Err(e) = self.apply(command).await {
                            warn!("{}", e);
                        }
                    }
                    None => {
                        debug!("Command channel closed");
                        return Ok(());
                    }
                },
            }
        }
    }

    pub fn snapshot(&self) -> PlayerSnapshot {
        let session = self.connection.session();
        PlayerSnapshot {
            room: self.room.clone(),
            session_id: session.map(|session| session.id),
            connection: self.connection.state(),
            display: self.display.clone(),
            controls: *self.controls.state(),
            platform: self.capabilities,
            audio: audio_statuses(&self.audio),
            video: video_statuses(&self.video),
            pending_timers: self.timers.len(),
        }
    }

    pub fn display_state(&self) -> &DisplayState {
        &self.display
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn subscribe_connection(&self) -> broadcast::Receiver<ConnectionUpdate> {
        self.connection.subscribe()
    }

    pub fn subscribe_tracks<F>(&mut self, listener: F) -> SubscriptionId
    where
        F: FnMut(&TrackEvent) + Send + 'static,
    {
        self.registry.subscribe(listener)
    }

    pub fn unsubscribe_tracks(&mut self, id: SubscriptionId) -> bool {
        self.registry.unsubscribe(id)
    }

    pub fn registry(&self) -> &TrackRegistry {
        &self.registry
    }

    pub fn audio(&self) -> &AudioEngine {
        &self.audio
    }

    pub fn video(&self) -> &VideoEngine {
        &self.video
    }

    pub fn capabilities(&self) -> PlatformCapabilities {
        self.capabilities
    }

    pub fn pending_timers(&self) -> usize {
        self.timers.len()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    fn apply_output(&mut self) {
        let (volume, muted) = self.controls.output();
        self.audio.set_output(volume, muted, self.media.as_mut());
    }

    /// Fold engine state into the controls and log display transitions
    fn sync(&mut self) {
        self.controls.on_audio_status(self.audio.status());
        let display = DisplayState::derive(self.connection.status(), &self.registry, &self.video);
        if display != self.display {
            info!("Display state: {:?} -> {:?}", self.display, display);
            self.display = display;
        }
    }
}

async fn next_event(
    events: &mut Option<mpsc::UnboundedReceiver<TransportEvent>>,
) -> Option<TransportEvent> {
    match events {
        Some(events) => events.recv().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{AudioTrackState, RemoteTrack, SimulatedMedia, VideoTrackState};
    use crate::room::{ScriptedTokenProvider, ScriptedTransport, TransportInjector, ViewerToken};

    fn player(capabilities: PlatformCapabilities) -> (Player, SimulatedMedia, TransportInjector) {
        let media = SimulatedMedia::new();
        let (transport, injector) = ScriptedTransport::pair();
        let tokens = ScriptedTokenProvider::new(ViewerToken::new(
            "tok",
            "wss://rtc.example.net",
            "viewer",
            "Viewer",
        ));
        let player = Player::new(
            &Config::default(),
            capabilities,
            Box::new(tokens),
            Box::new(transport),
            Box::new(media.clone()),
        );
        (player, media, injector)
    }

    #[test]
    fn commands_use_tagged_json() {
        let command: PlayerCommand =
            serde_json::from_str(r#"{"type":"set_volume","volume":0.5}"#).unwrap();
        assert_eq!(command, PlayerCommand::SetVolume { volume: 0.5 });

        let command: PlayerCommand = serde_json::from_str(r#"{"type":"retry_audio"}"#).unwrap();
        assert_eq!(command, PlayerCommand::RetryAudio { track_id: None });
    }

    #[tokio::test]
    async fn subscriptions_reach_the_engines() {
        let (mut player, media, _injector) = player(PlatformCapabilities::desktop());
        player.mount("lobby").await.unwrap();
        assert_eq!(player.display_state(), &DisplayState::WaitingForStream { stream_ended: false });

        player
            .handle_transport_event(TransportEvent::TrackSubscribed {
                track: RemoteTrack::video("v"),
            })
            .unwrap();
        player
            .handle_transport_event(TransportEvent::TrackSubscribed {
                track: RemoteTrack::audio("a"),
            })
            .unwrap();

        assert_eq!(player.display_state(), &DisplayState::Live);
        assert_eq!(player.video().attachment("v").unwrap().state, VideoTrackState::Playing);
        assert_eq!(player.audio().record("a").unwrap().state, AudioTrackState::Playing);
        assert!(media.element_for_track("v").unwrap().muted);
        assert_eq!(media.live_elements(), 2);

        player
            .handle_transport_event(TransportEvent::TrackUnsubscribed {
                track_id: "v".to_string(),
            })
            .unwrap();
        assert_eq!(player.display_state(), &DisplayState::WaitingForStream { stream_ended: true });
        assert_eq!(media.live_elements(), 1);
    }

    #[tokio::test]
    async fn volume_and_mute_reach_audio_elements_only() {
        let (mut player, media, _injector) = player(PlatformCapabilities::desktop());
        player.mount("lobby").await.unwrap();
        for track in [RemoteTrack::audio("a"), RemoteTrack::video("v")] {
            player
                .handle_transport_event(TransportEvent::TrackSubscribed { track })
                .unwrap();
        }

        player.set_volume(0.3);
        assert_eq!(media.element_for_track("a").unwrap().volume, 0.3);

        assert!(player.toggle_mute());
        assert!(media.element_for_track("a").unwrap().muted);
        assert!(!player.snapshot().controls.is_playing);

        assert!(!player.toggle_mute());
        assert!(!media.element_for_track("a").unwrap().muted);
        assert!(media.element_for_track("v").unwrap().muted);
    }

    #[tokio::test]
    async fn dropped_session_releases_tracks() {
        let (mut player, media, _injector) = player(PlatformCapabilities::desktop());
        player.mount("lobby").await.unwrap();
        player
            .handle_transport_event(TransportEvent::TrackSubscribed {
                track: RemoteTrack::video("v"),
            })
            .unwrap();

        let err = player
            .handle_transport_event(TransportEvent::ConnectionStateChanged {
                state: ConnectionState::Disconnected,
            })
            .unwrap_err();
        assert!(matches!(err, PlayerError::ConnectionLost(_)));
        assert!(matches!(player.display_state(), DisplayState::ConnectionLost { .. }));
        assert_eq!(media.live_elements(), 0);
        assert!(player.registry().is_empty());
    }

    #[tokio::test]
    async fn reconnect_requires_mount() {
        let (mut player, _media, _injector) = player(PlatformCapabilities::desktop());
        assert_eq!(player.reconnect().await.unwrap_err(), PlayerError::NotMounted);
    }

    #[tokio::test]
    async fn fullscreen_targets_the_video_element() {
        let (mut player, media, _injector) = player(PlatformCapabilities::desktop());
        player.mount("lobby").await.unwrap();
        assert!(!player.toggle_fullscreen());

        player
            .handle_transport_event(TransportEvent::TrackSubscribed {
                track: RemoteTrack::video("v"),
            })
            .unwrap();
        assert!(player.toggle_fullscreen());
        let element = media.fullscreen_element().unwrap();
        assert_eq!(media.element(element).unwrap().track_id.as_deref(), Some("v"));

        // The user left fullscreen with the platform's own control.
        player.on_fullscreen_changed(false);
        assert!(!player.snapshot().controls.is_fullscreen);
    }

    #[tokio::test]
    async fn track_observers_follow_the_session() {
        use parking_lot::Mutex;
        use std::sync::Arc;

        let (mut player, _media, _injector) = player(PlatformCapabilities::desktop());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let id = player.subscribe_tracks(move |event| sink.lock().push(event.clone()));

        player.mount("lobby").await.unwrap();
        player
            .handle_transport_event(TransportEvent::TrackSubscribed {
                track: RemoteTrack::audio("a"),
            })
            .unwrap();
        player.unmount().await;

        assert_eq!(
            *seen.lock(),
            vec![
                TrackEvent::Added(RemoteTrack::audio("a")),
                TrackEvent::Removed(RemoteTrack::audio("a")),
            ]
        );

        assert!(player.unsubscribe_tracks(id));
        assert!(!player.unsubscribe_tracks(id));
    }
}
