//! Track registry
//!
//! Keeps the subscribed remote tracks of the current session in two ordered
//! collections. The union of ids across both always equals the set of
//! subscribed track ids; a given id appears at most once.

use super::{RemoteTrack, TrackKind};
use crate::observer::{Observers, SubscriptionId};
use log::debug;

/// Registry change notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackEvent {
    Added(RemoteTrack),
    Removed(RemoteTrack),
    MuteChanged {
        track_id: String,
        kind: TrackKind,
        muted: bool,
    },
}

#[derive(Debug, Default)]
pub struct TrackRegistry {
    video: Vec<RemoteTrack>,
    audio: Vec<RemoteTrack>,
    had_video: bool,
    observers: Observers<TrackEvent>,
}

impl TrackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a subscription. Returns false when the id is already known.
    pub fn on_track_added(&mut self, track: RemoteTrack) -> bool {
        if self.contains(&track.id) {
            debug!("Track {} already registered, ignoring duplicate subscription", track.id);
            return false;
        }

        match track.kind {
            TrackKind::Video => {
                self.had_video = true;
                self.video.push(track.clone());
            }
            TrackKind::Audio => self.audio.push(track.clone()),
        }
        debug!("Track {} ({}) added", track.id, track.kind.as_str());
        self.observers.emit(&TrackEvent::Added(track));
        true
    }

    /// Record an unsubscription, handing the track back so its owning engine
    /// can detach it.
    pub fn on_track_removed(&mut self, track_id: &str) -> Option<RemoteTrack> {
        let removed = take_by_id(&mut self.video, track_id)
            .or_else(|| take_by_id(&mut self.audio, track_id))?;

        debug!("Track {} ({}) removed", removed.id, removed.kind.as_str());
        self.observers.emit(&TrackEvent::Removed(removed.clone()));
        Some(removed)
    }

    /// Update the remote mute flag of a track
    pub fn set_muted(&mut self, track_id: &str, muted: bool) -> Option<TrackKind> {
        let track = self
            .video
            .iter_mut()
            .chain(self.audio.iter_mut())
            .find(|track| track.id == track_id)?;

        if track.muted == muted {
            return Some(track.kind);
        }
        track.muted = muted;
        let event = TrackEvent::MuteChanged {
            track_id: track.id.clone(),
            kind: track.kind,
            muted,
        };
        let kind = track.kind;
        self.observers.emit(&event);
        Some(kind)
    }

    /// Remove every track at session end, video first
    pub fn clear(&mut self) -> Vec<RemoteTrack> {
        let mut drained: Vec<RemoteTrack> = self.video.drain(..).collect();
        drained.extend(self.audio.drain(..));
        for track in &drained {
            self.observers.emit(&TrackEvent::Removed(track.clone()));
        }
        self.had_video = false;
        drained
    }

    pub fn get(&self, track_id: &str) -> Option<&RemoteTrack> {
        self.video
            .iter()
            .chain(self.audio.iter())
            .find(|track| track.id == track_id)
    }

    pub fn contains(&self, track_id: &str) -> bool {
        self.get(track_id).is_some()
    }

    pub fn video_tracks(&self) -> &[RemoteTrack] {
        &self.video
    }

    pub fn audio_tracks(&self) -> &[RemoteTrack] {
        &self.audio
    }

    pub fn subscribed_ids(&self) -> Vec<&str> {
        self.video
            .iter()
            .chain(self.audio.iter())
            .map(|track| track.id.as_str())
            .collect()
    }

    pub fn has_video(&self) -> bool {
        !self.video.is_empty()
    }

    /// Whether any video track was subscribed during this session
    pub fn had_video(&self) -> bool {
        self.had_video
    }

    pub fn len(&self) -> usize {
        self.video.len() + self.audio.len()
    }

    pub fn is_empty(&self) -> bool {
        self.video.is_empty() && self.audio.is_empty()
    }

    pub fn subscribe<F>(&mut self, listener: F) -> SubscriptionId
    where
        F: FnMut(&TrackEvent) + Send + 'static,
    {
        self.observers.subscribe(listener)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.observers.unsubscribe(id)
    }
}

fn take_by_id(tracks: &mut Vec<RemoteTrack>, track_id: &str) -> Option<RemoteTrack> {
    let index = tracks.iter().position(|track| track.id == track_id)?;
    Some(tracks.remove(index))
}
