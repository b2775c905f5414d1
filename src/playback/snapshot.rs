//! Serializable view of the player for the render surface

use super::PlaybackControlsState;
use crate::media::{AudioEngine, AudioTrackState, TrackRegistry, VideoEngine, VideoTrackState};
use crate::platform::PlatformCapabilities;
use crate::room::{ConnectionState, ConnectionUpdate};
use serde::Serialize;
use uuid::Uuid;

/// What the render surface should show
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DisplayState {
    /// Not mounted
    Idle,
    Connecting,
    /// Connecting gave up
    Failed { reason: String },
    /// A connected session dropped
    ConnectionLost { reason: String },
    /// Connected without a video track. `stream_ended` tells "the broadcaster
    /// has not started" apart from "the video went away".
    WaitingForStream { stream_ended: bool },
    Live,
    /// Every video track exhausted its fallbacks
    VideoError { reason: String },
}

impl DisplayState {
    pub fn derive(
        status: &ConnectionUpdate,
        registry: &TrackRegistry,
        video: &VideoEngine,
    ) -> Self {
        match status {
            ConnectionUpdate::Disconnected => DisplayState::Idle,
            ConnectionUpdate::Connecting { .. } => DisplayState::Connecting,
            ConnectionUpdate::Failed { reason } => DisplayState::Failed {
                reason: reason.clone(),
            },
            ConnectionUpdate::Lost { reason } => DisplayState::ConnectionLost {
                reason: reason.clone(),
            },
            ConnectionUpdate::Connected { .. } => {
                if !registry.has_video() {
                    DisplayState::WaitingForStream {
                        stream_ended: registry.had_video(),
                    }
                } else if let Some(reason) = video.terminal_error() {
                    DisplayState::VideoError {
                        reason: reason.to_string(),
                    }
                } else {
                    DisplayState::Live
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AudioTrackStatus {
    pub id: String,
    pub state: AudioTrackState,
    pub retry_count: u32,
    pub failed: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VideoTrackStatus {
    pub id: String,
    pub state: VideoTrackState,
    pub used_stream_source: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlayerSnapshot {
    pub room: Option<String>,
    pub session_id: Option<Uuid>,
    pub connection: ConnectionState,
    pub display: DisplayState,
    pub controls: PlaybackControlsState,
    pub platform: PlatformCapabilities,
    pub audio: Vec<AudioTrackStatus>,
    pub video: Vec<VideoTrackStatus>,
    pub pending_timers: usize,
}

pub(crate) fn audio_statuses(audio: &AudioEngine) -> Vec<AudioTrackStatus> {
    audio
        .records()
        .iter()
        .map(|record| AudioTrackStatus {
            id: record.track.id.clone(),
            state: record.state,
            retry_count: record.retry_count,
            failed: record.failed,
            error: record.last_error.clone(),
        })
        .collect()
}

pub(crate) fn video_statuses(video: &VideoEngine) -> Vec<VideoTrackStatus> {
    video
        .attachments()
        .iter()
        .map(|attachment| VideoTrackStatus {
            id: attachment.track.id.clone(),
            state: attachment.state,
            used_stream_source: attachment.used_stream_source,
            error: attachment.error.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::RemoteTrack;
    use tokio::time::Duration;

    fn connected() -> ConnectionUpdate {
        ConnectionUpdate::Connected {
            room: "lobby".to_string(),
            session_id: Uuid::new_v4(),
        }
    }

    #[test]
    fn waiting_distinguishes_not_started_from_ended() {
        let mut registry = TrackRegistry::new();
        let video = VideoEngine::new(Duration::from_secs(1));

        assert_eq!(
            DisplayState::derive(&connected(), &registry, &video),
            DisplayState::WaitingForStream { stream_ended: false }
        );

        registry.on_track_added(RemoteTrack::video("v"));
        registry.on_track_removed("v");
        assert_eq!(
            DisplayState::derive(&connected(), &registry, &video),
            DisplayState::WaitingForStream { stream_ended: true }
        );
    }

    #[test]
    fn connection_updates_map_to_display() {
        let registry = TrackRegistry::new();
        let video = VideoEngine::new(Duration::from_secs(1));

        let failed = ConnectionUpdate::Failed {
            reason: "Token acquisition failed: 503".to_string(),
        };
        assert_eq!(
            DisplayState::derive(&failed, &registry, &video),
            DisplayState::Failed {
                reason: "Token acquisition failed: 503".to_string()
            }
        );
        assert_eq!(
            DisplayState::derive(&ConnectionUpdate::Disconnected, &registry, &video),
            DisplayState::Idle
        );
    }

    #[test]
    fn display_state_serializes_with_tag() {
        let json =
            serde_json::to_string(&DisplayState::WaitingForStream { stream_ended: true }).unwrap();
        assert_eq!(json, r#"{"state":"waiting_for_stream","stream_ended":true}"#);
    }
}
