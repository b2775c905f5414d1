//! Playback controls state machine
//!
//! Live media cannot be paused, so "pause" means muting locally; the
//! session and its tracks keep flowing. Network events never write this
//! state directly: engines report through `on_audio_status`, and the
//! "requires interaction" flag is cleared only by `user_gesture`.

use crate::config::PlaybackConfig;
use crate::media::{AudioStatus, ElementId, MediaBackend};
use crate::platform::PlatformCapabilities;
use log::debug;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PlaybackControlsState {
    pub is_playing: bool,
    pub is_muted: bool,
    /// In [0, 1]
    pub volume: f64,
    pub is_fullscreen: bool,
    pub requires_user_gesture: bool,
    pub audio_blocked: bool,
}

#[derive(Debug, Clone)]
pub struct PlaybackControls {
    state: PlaybackControlsState,
    /// Volume restored when unmuting from zero
    last_audible_volume: f64,
}

impl PlaybackControls {
    pub fn new(config: &PlaybackConfig, capabilities: PlatformCapabilities) -> Self {
        let volume = sanitize(config.initial_volume).unwrap_or(1.0);
        let is_muted = config.start_muted || volume == 0.0;
        Self {
            state: PlaybackControlsState {
                is_playing: !is_muted,
                is_muted,
                volume,
                is_fullscreen: false,
                requires_user_gesture: capabilities.requires_gesture_for_audio,
                audio_blocked: false,
            },
            last_audible_volume: if volume > 0.0 { volume } else { 1.0 },
        }
    }

    pub fn state(&self) -> &PlaybackControlsState {
        &self.state
    }

    /// Logical volume and mute to apply to audio elements
    pub fn output(&self) -> (f64, bool) {
        (self.state.volume, self.state.is_muted)
    }

    /// Toggle the local mute ("pause"). Returns the new muted flag.
    pub fn toggle_mute(&mut self) -> bool {
        let muted = !self.state.is_muted;
        if !muted && self.state.volume == 0.0 {
            self.state.volume = self.last_audible_volume;
        }
        self.set_muted(muted);
        muted
    }

    /// Set the volume. Zero mutes; any audible value unmutes.
    ///
    /// Returns false when the input was rejected (NaN) or changed nothing.
    pub fn set_volume(&mut self, volume: f64) -> bool {
        let Some(volume) = sanitize(volume) else {
            debug!("Ignoring invalid volume {}", volume);
            return false;
        };
        let before = self.state;

        self.state.volume = volume;
        if volume == 0.0 {
            self.set_muted(true);
        } else {
            self.last_audible_volume = volume;
            if self.state.is_muted {
                self.set_muted(false);
            }
        }
        before != self.state
    }

    /// The user interacted with the page
    pub fn user_gesture(&mut self) {
        if self.state.requires_user_gesture {
            debug!("User gesture received, audio interaction requirement cleared");
        }
        self.state.requires_user_gesture = false;
    }

    /// Fold the audio engine summary in. Never clears the gesture flag.
    pub fn on_audio_status(&mut self, status: AudioStatus) {
        self.state.audio_blocked = status.blocked;
        if status.requires_gesture {
            self.state.requires_user_gesture = true;
        }
    }

    /// Toggle fullscreen on `element`, best effort.
    ///
    /// Entering tries the inline video API first, then the standard
    /// request. Failures leave the state untouched.
    pub fn toggle_fullscreen(
        &mut self,
        media: &mut dyn MediaBackend,
        element: Option<ElementId>,
    ) -> bool {
        if self.state.is_fullscreen {
            if let Err(e) = media.exit_fullscreen() {
                debug!("Exit fullscreen failed: {}", e);
            }
            self.state.is_fullscreen = false;
            return false;
        }

        let Some(element) = element else {
            debug!("No video element to show fullscreen");
            return false;
        };

        let entered = match media.enter_inline_fullscreen(element) {
            Ok(()) => true,
            Err(inline) => {
                debug!("Inline fullscreen unavailable ({}), using standard request", inline);
                match media.request_fullscreen(element) {
                    Ok(()) => true,
                    Err(e) => {
                        debug!("Fullscreen request failed: {}", e);
                        false
                    }
                }
            }
        };
        self.state.is_fullscreen = entered;
        entered
    }

    /// Sync with a fullscreen change reported by the document
    pub fn on_fullscreen_changed(&mut self, active: bool) {
        self.state.is_fullscreen = active;
    }

    fn set_muted(&mut self, muted: bool) {
        self.state.is_muted = muted;
        self.state.is_playing = !muted;
    }
}

fn sanitize(volume: f64) -> Option<f64> {
    if volume.is_nan() {
        return None;
    }
    Some(volume.clamp(0.0, 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{SimulatedMedia, TrackKind};

    fn controls() -> PlaybackControls {
        PlaybackControls::new(&PlaybackConfig::default(), PlatformCapabilities::desktop())
    }

    #[test]
    fn mute_is_the_pause_button() {
        let mut controls = controls();
        assert!(controls.state().is_playing);

        assert!(controls.toggle_mute());
        assert!(!controls.state().is_playing);
        assert_eq!(controls.output(), (1.0, true));

        assert!(!controls.toggle_mute());
        assert!(controls.state().is_playing);
    }

    #[test]
    fn volume_zero_mutes_and_audible_volume_unmutes() {
        let mut controls = controls();
        assert!(controls.set_volume(0.0));
        assert!(controls.state().is_muted);

        assert!(controls.set_volume(0.4));
        assert!(!controls.state().is_muted);
        assert_eq!(controls.state().volume, 0.4);
    }

    #[test]
    fn volume_is_clamped_and_nan_ignored() {
        let mut controls = controls();
        controls.set_volume(3.0);
        assert_eq!(controls.state().volume, 1.0);
        controls.set_volume(-1.0);
        assert_eq!(controls.state().volume, 0.0);
        assert!(!controls.set_volume(f64::NAN));
        assert_eq!(controls.state().volume, 0.0);
    }

    #[test]
    fn unmuting_from_zero_restores_last_audible_volume() {
        let mut controls = controls();
        controls.set_volume(0.6);
        controls.set_volume(0.0);
        controls.toggle_mute();
        assert_eq!(controls.output(), (0.6, false));
    }

    #[test]
    fn only_a_gesture_clears_the_interaction_flag() {
        let mut controls = PlaybackControls::new(
            &PlaybackConfig::default(),
            PlatformCapabilities::gesture_required(),
        );
        assert!(controls.state().requires_user_gesture);

        controls.on_audio_status(AudioStatus::default());
        assert!(controls.state().requires_user_gesture);

        controls.user_gesture();
        assert!(!controls.state().requires_user_gesture);

        controls.on_audio_status(AudioStatus {
            requires_gesture: false,
            blocked: true,
        });
        assert!(controls.state().audio_blocked);
    }

    #[test]
    fn fullscreen_prefers_inline_then_standard() {
        let media = SimulatedMedia::new();
        let mut backend = media.clone();
        let element = backend.create_element(TrackKind::Video).unwrap();
        let mut controls = controls();

        media.set_fullscreen_support(false, true);
        assert!(controls.toggle_fullscreen(&mut backend, Some(element)));
        assert_eq!(media.fullscreen_element(), Some(element));

        assert!(!controls.toggle_fullscreen(&mut backend, Some(element)));
        assert_eq!(media.fullscreen_element(), None);
    }

    #[test]
    fn fullscreen_failure_is_silent() {
        let media = SimulatedMedia::new();
        media.set_fullscreen_support(false, false);
        let mut backend = media.clone();
        let element = backend.create_element(TrackKind::Video).unwrap();
        let mut controls = controls();

        assert!(!controls.toggle_fullscreen(&mut backend, Some(element)));
        assert!(!controls.toggle_fullscreen(&mut backend, None));
        assert!(!controls.state().is_fullscreen);
    }
}
