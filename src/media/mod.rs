//! Media playback plumbing
//!
//! This module provides the track side of the player:
//! - Remote track model and the track registry
//! - The `MediaBackend` seam towards the document and its media elements
//! - Audio and video attachment engines
//! - The retry timer queue shared by both engines

pub mod registry;
pub mod timers;
pub mod audio;
pub mod video;
pub mod simulated;

pub use registry::{TrackEvent, TrackRegistry};
pub use timers::{RetryTimers, TimerKey};
pub use audio::{AttachmentRecord, AudioContextSlot, AudioEngine, AudioStatus, AudioTrackState};
pub use video::{VideoAttachment, VideoEngine, VideoTrackState};
pub use simulated::{AutoplayPolicy, SimulatedMedia};

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;
use tokio::time::{Duration, Instant};

/// Kind of a remote track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

impl TrackKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackKind::Audio => "audio",
            TrackKind::Video => "video",
        }
    }
}

/// A subscribed remote track as announced by the transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteTrack {
    pub id: String,
    pub kind: TrackKind,
    #[serde(default)]
    pub muted: bool,
    /// Identity of the publishing participant
    #[serde(default)]
    pub participant: Option<String>,
}

impl RemoteTrack {
    pub fn new(id: impl Into<String>, kind: TrackKind) -> Self {
        Self {
            id: id.into(),
            kind,
            muted: false,
            participant: None,
        }
    }

    pub fn audio(id: impl Into<String>) -> Self {
        Self::new(id, TrackKind::Audio)
    }

    pub fn video(id: impl Into<String>) -> Self {
        Self::new(id, TrackKind::Video)
    }
}

/// Handle to a media element living in the document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ElementId(pub u64);

/// Handle to a platform audio context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct AudioContextId(pub u64);

/// Audio context state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioContextState {
    #[default]
    Suspended,
    Running,
    Closed,
}

/// Media element errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaError {
    /// Binding a track to an element threw
    AttachFailed(String),
    /// The platform lacks the requested API
    NotSupported(String),
    /// The element or context is in the wrong state
    InvalidState(String),
    /// Element handle is stale
    ElementNotFound(ElementId),
}

impl fmt::Display for MediaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaError::AttachFailed(msg) => write!(f, "Attach failed: {}", msg),
            MediaError::NotSupported(msg) => write!(f, "Not supported: {}", msg),
            MediaError::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
            MediaError::ElementNotFound(id) => write!(f, "Element not found: {}", id.0),
        }
    }
}

impl Error for MediaError {}

/// Rejection of a `play()` request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayError {
    /// Autoplay policy refused playback
    NotAllowed(String),
    /// Playback was interrupted by a new load or removal
    Aborted(String),
    /// Anything else (decode errors, missing source)
    Other(String),
}

impl PlayError {
    /// Classify a rejection by its DOMException name
    pub fn classify(name: &str, message: &str) -> Self {
        match name {
            "NotAllowedError" => PlayError::NotAllowed(message.to_string()),
            "AbortError" => PlayError::Aborted(message.to_string()),
            _ => PlayError::Other(format!("{}: {}", name, message)),
        }
    }

    pub fn is_permission_denied(&self) -> bool {
        matches!(self, PlayError::NotAllowed(_))
    }
}

impl fmt::Display for PlayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlayError::NotAllowed(msg) => write!(f, "Playback not allowed: {}", msg),
            PlayError::Aborted(msg) => write!(f, "Playback aborted: {}", msg),
            PlayError::Other(msg) => write!(f, "Playback failed: {}", msg),
        }
    }
}

impl Error for PlayError {}

/// Document and media element operations the engines rely on.
///
/// A browser build implements this over web-sys; tests and the scenario
/// runner use [`SimulatedMedia`].
pub trait MediaBackend {
    /// Create a media element and append it to the document
    fn create_element(&mut self, kind: TrackKind) -> Result<ElementId, MediaError>;

    /// Primary binding (`track.attach(element)`)
    fn attach_track(&mut self, element: ElementId, track: &RemoteTrack) -> Result<(), MediaError>;

    /// Manual binding through a freshly constructed stream source
    fn attach_stream_source(
        &mut self,
        element: ElementId,
        track: &RemoteTrack,
    ) -> Result<(), MediaError>;

    fn set_muted(&mut self, element: ElementId, muted: bool);

    fn set_volume(&mut self, element: ElementId, volume: f64);

    fn volume(&self, element: ElementId) -> Option<f64>;

    fn play(&mut self, element: ElementId) -> Result<(), PlayError>;

    /// Detach the element, release its source and remove it from the document
    fn remove_element(&mut self, element: ElementId);

    fn create_audio_context(&mut self) -> Result<AudioContextId, MediaError>;

    fn audio_context_state(&self, context: AudioContextId) -> AudioContextState;

    fn resume_audio_context(&mut self, context: AudioContextId) -> Result<(), MediaError>;

    fn close_audio_context(&mut self, context: AudioContextId);

    /// Platform-specific inline video fullscreen (`webkitEnterFullscreen`)
    fn enter_inline_fullscreen(&mut self, element: ElementId) -> Result<(), MediaError>;

    /// Standard `requestFullscreen`
    fn request_fullscreen(&mut self, element: ElementId) -> Result<(), MediaError>;

    fn exit_fullscreen(&mut self) -> Result<(), MediaError>;

    /// Called from inside a user gesture handler
    fn user_activation(&mut self) {}
}

/// Borrowed resources an engine needs to run one step
pub struct AttachContext<'a> {
    pub media: &'a mut dyn MediaBackend,
    pub timers: &'a mut RetryTimers,
    pub now: Instant,
}

impl<'a> AttachContext<'a> {
    pub fn new(media: &'a mut dyn MediaBackend, timers: &'a mut RetryTimers, now: Instant) -> Self {
        Self { media, timers, now }
    }

    /// Schedule a retry for a track, replacing any pending one
    pub fn schedule_retry(&mut self, kind: TrackKind, track_id: &str, delay: Duration) {
        self.timers.schedule(TimerKey::new(kind, track_id), self.now + delay);
    }

    pub fn cancel_retry(&mut self, kind: TrackKind, track_id: &str) -> bool {
        self.timers.cancel(&TimerKey::new(kind, track_id))
    }
}

/// Result of driving one track through its attachment machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachOutcome {
    /// Waiting for a user gesture, nothing attempted
    Deferred,
    /// Element is playing
    Playing,
    /// Attempt failed and a retry is pending
    RetryScheduled(Duration),
    /// Retries exhausted
    Failed,
    /// Nothing to do for this track
    Skipped,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_play_rejections() {
        assert!(
            PlayError::classify("NotAllowedError", "user didn't interact").is_permission_denied()
        );
        assert_eq!(
            PlayError::classify("AbortError", "interrupted"),
            PlayError::Aborted("interrupted".to_string())
        );
        let other = PlayError::classify("NotSupportedError", "no source");
        assert!(!other.is_permission_denied());
        assert_eq!(other.to_string(), "Playback failed: NotSupportedError: no source");
    }

    #[test]
    fn remote_track_deserializes_with_defaults() {
        let track: RemoteTrack = serde_json::from_str(r#"{"id":"TR_a1","kind":"audio"}"#).unwrap();
        assert_eq!(track, RemoteTrack::audio("TR_a1"));
    }
}
