//! Audio attachment engine
//!
//! Per-track state machine:
//!
//! ```text
//! Pending -> Attaching -> Playing
//! Pending -> Blocked (autoplay rejected) -> Playing (after unlock)
//!                                        -> Failed  (retries exhausted)
//! ```
//!
//! Retries are explicit: a failed attempt bumps `retry_count` and parks a
//! deadline in the timer queue with exponential backoff. Once the bound is
//! reached the record is marked `failed` and only a manual retry revives it.
//! Exhausted audio is reported as "audio blocked" and never affects video.

use super::{
    AttachContext, AttachOutcome, AudioContextId, AudioContextState, ElementId, MediaBackend,
    MediaError, RemoteTrack, TrackKind,
};
use crate::config::AudioConfig;
use crate::platform::PlatformCapabilities;
use log::{debug, info, warn};
use serde::Serialize;
use tokio::time::Duration;

/// Audio track attachment state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioTrackState {
    /// Waiting for a gesture or for the next retry
    Pending,
    /// Element being bound and started
    Attaching,
    Playing,
    /// Autoplay policy rejected playback
    Blocked,
    /// Retries exhausted
    Failed,
}

/// Attachment bookkeeping for one audio track
#[derive(Debug, Clone)]
pub struct AttachmentRecord {
    pub track: RemoteTrack,
    pub element: Option<ElementId>,
    pub retry_count: u32,
    pub failed: bool,
    pub state: AudioTrackState,
    /// Attempts that actually touched the element, for diagnostics
    pub attempts: u32,
    pub last_error: Option<String>,
}

impl AttachmentRecord {
    fn new(track: RemoteTrack) -> Self {
        Self {
            track,
            element: None,
            retry_count: 0,
            failed: false,
            state: AudioTrackState::Pending,
            attempts: 0,
            last_error: None,
        }
    }

    /// Idempotent reset used by manual retry
    fn reset(&mut self) {
        self.retry_count = 0;
        self.failed = false;
        self.last_error = None;
        self.state = AudioTrackState::Pending;
    }
}

/// Backoff parameters for audio retries
#[derive(Debug, Clone)]
pub struct AudioRetryPolicy {
    pub base: Duration,
    pub factor: f64,
    pub cap: Duration,
    pub max_retries: u32,
    pub silent_volume: f64,
}

impl AudioRetryPolicy {
    pub fn from_config(config: &AudioConfig) -> Self {
        Self {
            base: Duration::from_millis(config.retry_base_ms),
            factor: config.retry_factor,
            cap: Duration::from_millis(config.retry_cap_ms),
            max_retries: config.max_retries,
            silent_volume: config.silent_play_volume,
        }
    }

    /// `min(base * factor^attempt, cap)`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(i32::MAX as u32) as i32;
        let scaled = self.base.as_secs_f64() * self.factor.powi(exponent);
        if !scaled.is_finite() || scaled >= self.cap.as_secs_f64() {
            return self.cap;
        }
        Duration::from_secs_f64(scaled)
    }
}

impl Default for AudioRetryPolicy {
    fn default() -> Self {
        Self::from_config(&AudioConfig::default())
    }
}

/// Audio summary consumed by the playback controls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AudioStatus {
    /// Tracks are parked until the user interacts with the page
    pub requires_gesture: bool,
    /// At least one track is blocked by policy or exhausted its retries
    pub blocked: bool,
}

/// Lazily created audio context shared by every attachment of a session.
///
/// The slot is the only place a context is constructed, so repeated unlocks
/// never produce a second one.
#[derive(Debug, Default)]
pub struct AudioContextSlot {
    context: Option<AudioContextId>,
}

impl AudioContextSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<AudioContextId> {
        self.context
    }

    pub fn get_or_create(
        &mut self,
        media: &mut dyn MediaBackend,
    ) -> Result<AudioContextId, MediaError> {
        if let Some(context) = self.context {
            return Ok(context);
        }
        let context = media.create_audio_context()?;
        debug!("Created shared audio context {:?}", context);
        self.context = Some(context);
        Ok(context)
    }

    /// Create the context if needed and resume it if suspended
    pub fn ensure_running(
        &mut self,
        media: &mut dyn MediaBackend,
    ) -> Result<AudioContextId, MediaError> {
        let context = self.get_or_create(media)?;
        match media.audio_context_state(context) {
            AudioContextState::Running => Ok(context),
            AudioContextState::Suspended => {
                media.resume_audio_context(context)?;
                Ok(context)
            }
            AudioContextState::Closed => {
                // A closed context cannot be resumed; replace it.
                self.context = None;
                let fresh = self.get_or_create(media)?;
                if media.audio_context_state(fresh) == AudioContextState::Suspended {
                    media.resume_audio_context(fresh)?;
                }
                Ok(fresh)
            }
        }
    }

    /// Close the context at session end
    pub fn release(&mut self, media: &mut dyn MediaBackend) {
        if let Some(context) = self.context.take() {
            media.close_audio_context(context);
        }
    }
}

#[derive(Debug)]
pub struct AudioEngine {
    policy: AudioRetryPolicy,
    capabilities: PlatformCapabilities,
    gesture_satisfied: bool,
    records: Vec<AttachmentRecord>,
    volume: f64,
    muted: bool,
}

impl AudioEngine {
    pub fn new(policy: AudioRetryPolicy, capabilities: PlatformCapabilities) -> Self {
        Self {
            policy,
            capabilities,
            gesture_satisfied: false,
            records: Vec::new(),
            volume: 1.0,
            muted: false,
        }
    }

    /// Take ownership of a newly subscribed track and try to start it
    pub fn add_track(&mut self, track: RemoteTrack, ctx: &mut AttachContext<'_>) -> AttachOutcome {
        if self.index_of(&track.id).is_some() {
            return AttachOutcome::Skipped;
        }
        let track_id = track.id.clone();
        self.records.push(AttachmentRecord::new(track));
        self.attempt(&track_id, ctx)
    }

    /// Release a track: cancel its retry and tear its element out
    pub fn remove_track(&mut self, track_id: &str, ctx: &mut AttachContext<'_>) -> bool {
        let Some(index) = self.index_of(track_id) else {
            return false;
        };
        let record = self.records.remove(index);
        ctx.cancel_retry(TrackKind::Audio, track_id);
        if let Some(element) = record.element {
            ctx.media.remove_element(element);
        }
        debug!("Audio track {} detached", track_id);
        true
    }

    /// A retry deadline expired
    pub fn on_timer(&mut self, track_id: &str, ctx: &mut AttachContext<'_>) -> AttachOutcome {
        match self.record(track_id) {
            Some(record) if !record.failed && record.state != AudioTrackState::Playing => {
                self.attempt(track_id, ctx)
            }
            _ => AttachOutcome::Skipped,
        }
    }

    /// User gesture handler.
    ///
    /// Marks the gesture as satisfied, resumes (or creates) the shared audio
    /// context and re-attempts every pending or blocked track once.
    pub fn unlock(
        &mut self,
        audio_context: &mut AudioContextSlot,
        ctx: &mut AttachContext<'_>,
    ) -> Vec<(String, AttachOutcome)> {
        self.gesture_satisfied = true;
        ctx.media.user_activation();

        if let Err(e) = audio_context.ensure_running(ctx.media) {
            warn!("Audio context could not be resumed: {}", e);
        }

        let waiting: Vec<String> = self
            .records
            .iter()
            .filter(|record| {
                matches!(record.state, AudioTrackState::Pending | AudioTrackState::Blocked)
            })
            .map(|record| record.track.id.clone())
            .collect();

        info!("Audio unlocked, re-attempting {} track(s)", waiting.len());
        waiting
            .into_iter()
            .map(|track_id| {
                let outcome = self.attempt(&track_id, ctx);
                (track_id, outcome)
            })
            .collect()
    }

    /// Manual retry of one track: clears the counter and the failed flag
    pub fn retry(&mut self, track_id: &str, ctx: &mut AttachContext<'_>) -> AttachOutcome {
        let Some(index) = self.index_of(track_id) else {
            return AttachOutcome::Skipped;
        };
        if self.records[index].state == AudioTrackState::Playing {
            return AttachOutcome::Playing;
        }
        self.records[index].reset();
        self.attempt(track_id, ctx)
    }

    /// Manual retry of every track that is not playing
    pub fn retry_all(&mut self, ctx: &mut AttachContext<'_>) -> Vec<(String, AttachOutcome)> {
        let ids: Vec<String> = self
            .records
            .iter()
            .filter(|record| record.state != AudioTrackState::Playing)
            .map(|record| record.track.id.clone())
            .collect();
        ids.into_iter()
            .map(|track_id| {
                let outcome = self.retry(&track_id, ctx);
                (track_id, outcome)
            })
            .collect()
    }

    /// Detach every track; returns how many records were dropped
    pub fn detach_all(&mut self, ctx: &mut AttachContext<'_>) -> usize {
        let count = self.records.len();
        for record in self.records.drain(..) {
            ctx.cancel_retry(TrackKind::Audio, &record.track.id);
            if let Some(element) = record.element {
                ctx.media.remove_element(element);
            }
        }
        count
    }

    /// Apply the logical volume/mute to every audio element
    pub fn set_output(&mut self, volume: f64, muted: bool, media: &mut dyn MediaBackend) {
        self.volume = volume;
        self.muted = muted;
        for element in self.records.iter().filter_map(|record| record.element) {
            media.set_volume(element, volume);
            media.set_muted(element, muted);
        }
    }

    pub fn status(&self) -> AudioStatus {
        let gated = self.capabilities.requires_gesture_for_audio && !self.gesture_satisfied;
        AudioStatus {
            requires_gesture: gated
                && self.records.iter().any(|record| record.state == AudioTrackState::Pending),
            blocked: self.records.iter().any(|record| {
                matches!(record.state, AudioTrackState::Blocked | AudioTrackState::Failed)
            }),
        }
    }

    pub fn gesture_satisfied(&self) -> bool {
        self.gesture_satisfied
    }

    pub fn record(&self, track_id: &str) -> Option<&AttachmentRecord> {
        self.records.iter().find(|record| record.track.id == track_id)
    }

    pub fn records(&self) -> &[AttachmentRecord] {
        &self.records
    }

    fn index_of(&self, track_id: &str) -> Option<usize> {
        self.records.iter().position(|record| record.track.id == track_id)
    }

    /// Run one attempt for a track
    fn attempt(&mut self, track_id: &str, ctx: &mut AttachContext<'_>) -> AttachOutcome {
        let Some(index) = self.index_of(track_id) else {
            return AttachOutcome::Skipped;
        };
        if self.records[index].failed {
            return AttachOutcome::Failed;
        }

        // Doomed attempts would only burn the retry budget.
        if self.capabilities.requires_gesture_for_audio && !self.gesture_satisfied {
            debug!("Audio track {} waiting for a user gesture", track_id);
            self.records[index].state = AudioTrackState::Pending;
            return AttachOutcome::Deferred;
        }

        ctx.cancel_retry(TrackKind::Audio, track_id);
        let (volume, muted, silent_volume) = (self.volume, self.muted, self.policy.silent_volume);
        let record = &mut self.records[index];
        record.attempts += 1;
        record.state = AudioTrackState::Attaching;

        let element = match record.element {
            Some(element) => element,
            None => match bind_element(ctx.media, &record.track) {
                Ok(element) => {
                    record.element = Some(element);
                    element
                }
                Err(e) => return self.fail(index, e.to_string(), false, ctx),
            },
        };

        ctx.media.set_volume(element, volume);
        ctx.media.set_muted(element, muted);

        match ctx.media.play(element) {
            Ok(()) => self.mark_playing(index),
            Err(e) if e.is_permission_denied() => {
                self.records[index].state = AudioTrackState::Blocked;
                debug!("Audio track {} blocked by autoplay policy, trying silent play", track_id);
                match silent_play(ctx.media, element, volume, silent_volume) {
                    Ok(()) => self.mark_playing(index),
                    Err(silent) => self.fail(index, silent.to_string(), true, ctx),
                }
            }
            Err(e) => self.fail(index, e.to_string(), false, ctx),
        }
    }

    fn mark_playing(&mut self, index: usize) -> AttachOutcome {
        let record = &mut self.records[index];
        record.state = AudioTrackState::Playing;
        record.retry_count = 0;
        record.last_error = None;
        info!("Audio track {} playing", record.track.id);
        AttachOutcome::Playing
    }

    fn fail(
        &mut self,
        index: usize,
        reason: String,
        blocked: bool,
        ctx: &mut AttachContext<'_>,
    ) -> AttachOutcome {
        let record = &mut self.records[index];
        record.retry_count += 1;
        record.last_error = Some(reason);

        if record.retry_count >= self.policy.max_retries {
            record.failed = true;
            record.state = AudioTrackState::Failed;
            warn!(
                "Audio track {} failed after {} attempts, audio blocked",
                record.track.id, record.retry_count
            );
            return AttachOutcome::Failed;
        }

        record.state = if blocked {
            AudioTrackState::Blocked
        } else {
            AudioTrackState::Pending
        };
        let delay = self.policy.delay_for(record.retry_count - 1);
        debug!(
            "Audio track {} attempt {} failed ({}), retrying in {:?}",
            record.track.id,
            record.retry_count,
            record.last_error.as_deref().unwrap_or("unknown"),
            delay
        );
        let track_id = record.track.id.clone();
        ctx.schedule_retry(TrackKind::Audio, &track_id, delay);
        AttachOutcome::RetryScheduled(delay)
    }
}

/// Create an element and bind the track, falling back to a manual stream
/// source when the primary binding throws. The element is removed again if
/// both bindings fail.
fn bind_element(
    media: &mut dyn MediaBackend,
    track: &RemoteTrack,
) -> Result<ElementId, MediaError> {
    let element = media.create_element(TrackKind::Audio)?;
    if let Err(primary) = media.attach_track(element, track) {
        debug!("Primary attach of {} failed ({}), using stream source", track.id, primary);
        if let Err(fallback) = media.attach_stream_source(element, track) {
            media.remove_element(element);
            return Err(fallback);
        }
    }
    Ok(element)
}

/// Near-silent play that some engines accept without a gesture. The volume
/// is restored whatever the outcome.
fn silent_play(
    media: &mut dyn MediaBackend,
    element: ElementId,
    volume: f64,
    silent_volume: f64,
) -> Result<(), super::PlayError> {
    let previous = media.volume(element).unwrap_or(volume);
    media.set_volume(element, silent_volume);
    let result = media.play(element);
    media.set_volume(element, previous);
    result
}
