//! In-memory document implementing [`MediaBackend`].
//!
//! Cloning the handle shares the document, so a test (or the scenario
//! runner) can keep one clone for inspection while the player owns another.
//! Faults are injected per track id.

use super::{
    AudioContextId, AudioContextState, ElementId, MediaBackend, MediaError, PlayError,
    RemoteTrack, TrackKind,
};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Autoplay behavior of the simulated browser
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AutoplayPolicy {
    /// Everything may play
    #[default]
    Allowed,
    /// Audible playback needs user activation; near-silent playback may be
    /// let through when `allow_silent` is set
    RequireGesture { allow_silent: bool },
}

/// Volume at or below which playback counts as silent
const SILENT_THRESHOLD: f64 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Binding {
    Primary,
    StreamSource,
}

/// Snapshot of one simulated element
#[derive(Debug, Clone, PartialEq)]
pub struct SimElement {
    pub kind: TrackKind,
    pub track_id: Option<String>,
    pub binding: Option<Binding>,
    pub muted: bool,
    pub volume: f64,
    pub playing: bool,
}

#[derive(Debug, Default)]
struct Document {
    next_id: u64,
    elements: BTreeMap<ElementId, SimElement>,
    contexts: BTreeMap<AudioContextId, AudioContextState>,
    contexts_created: u32,
    fullscreen: Option<ElementId>,
    inline_fullscreen: bool,
    standard_fullscreen: bool,
    user_activated: bool,
    policy: AutoplayPolicy,
    primary_attach_faults: HashMap<String, u32>,
    stream_source_faults: HashMap<String, u32>,
    play_faults: HashMap<String, u32>,
    play_attempts: HashMap<String, u32>,
}

impl Document {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Consume one injected fault for `track_id`, if any remain
fn take_fault(faults: &mut HashMap<String, u32>, track_id: &str) -> bool {
    match faults.get_mut(track_id) {
        Some(remaining) if *remaining > 0 => {
            if *remaining != u32::MAX {
                *remaining -= 1;
            }
            true
        }
        _ => false,
    }
}

#[derive(Debug, Clone)]
pub struct SimulatedMedia {
    document: Arc<Mutex<Document>>,
}

impl Default for SimulatedMedia {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedMedia {
    pub fn new() -> Self {
        Self::with_policy(AutoplayPolicy::Allowed)
    }

    pub fn with_policy(policy: AutoplayPolicy) -> Self {
        let document = Document {
            policy,
            standard_fullscreen: true,
            ..Document::default()
        };
        Self {
            document: Arc::new(Mutex::new(document)),
        }
    }

    /// Toggle the availability of the two fullscreen APIs
    pub fn set_fullscreen_support(&self, inline: bool, standard: bool) {
        let mut doc = self.document.lock();
        doc.inline_fullscreen = inline;
        doc.standard_fullscreen = standard;
    }

    /// Make the primary binding throw `times` times (`u32::MAX` = always)
    pub fn fail_primary_attach(&self, track_id: &str, times: u32) {
        self.document.lock().primary_attach_faults.insert(track_id.to_string(), times);
    }

    /// Make the stream-source binding throw `times` times
    pub fn fail_stream_source(&self, track_id: &str, times: u32) {
        self.document.lock().stream_source_faults.insert(track_id.to_string(), times);
    }

    /// Make `play()` reject with a non-policy error `times` times
    pub fn fail_play(&self, track_id: &str, times: u32) {
        self.document.lock().play_faults.insert(track_id.to_string(), times);
    }

    pub fn live_elements(&self) -> usize {
        self.document.lock().elements.len()
    }

    pub fn elements_of_kind(&self, kind: TrackKind) -> usize {
        self.document
            .lock()
            .elements
            .values()
            .filter(|element| element.kind == kind)
            .count()
    }

    pub fn element(&self, id: ElementId) -> Option<SimElement> {
        self.document.lock().elements.get(&id).cloned()
    }

    pub fn element_for_track(&self, track_id: &str) -> Option<SimElement> {
        self.document
            .lock()
            .elements
            .values()
            .find(|element| element.track_id.as_deref() == Some(track_id))
            .cloned()
    }

    /// Number of `play()` calls made on elements bound to a track
    pub fn play_attempts(&self, track_id: &str) -> u32 {
        self.document.lock().play_attempts.get(track_id).copied().unwrap_or(0)
    }

    pub fn audio_contexts_created(&self) -> u32 {
        self.document.lock().contexts_created
    }

    pub fn context_state(&self, context: AudioContextId) -> Option<AudioContextState> {
        self.document.lock().contexts.get(&context).copied()
    }

    pub fn fullscreen_element(&self) -> Option<ElementId> {
        self.document.lock().fullscreen
    }

    pub fn is_user_activated(&self) -> bool {
        self.document.lock().user_activated
    }
}

impl MediaBackend for SimulatedMedia {
    fn create_element(&mut self, kind: TrackKind) -> Result<ElementId, MediaError> {
        let mut doc = self.document.lock();
        let id = ElementId(doc.next_id());
        doc.elements.insert(
            id,
            SimElement {
                kind,
                track_id: None,
                binding: None,
                muted: false,
                volume: 1.0,
                playing: false,
            },
        );
        Ok(id)
    }

    fn attach_track(&mut self, element: ElementId, track: &RemoteTrack) -> Result<(), MediaError> {
        let mut doc = self.document.lock();
        if take_fault(&mut doc.primary_attach_faults, &track.id) {
            return Err(MediaError::AttachFailed(format!("attach() threw for {}", track.id)));
        }
        let el = doc.elements.get_mut(&element).ok_or(MediaError::ElementNotFound(element))?;
        el.track_id = Some(track.id.clone());
        el.binding = Some(Binding::Primary);
        Ok(())
    }

    fn attach_stream_source(
        &mut self,
        element: ElementId,
        track: &RemoteTrack,
    ) -> Result<(), MediaError> {
        let mut doc = self.document.lock();
        if take_fault(&mut doc.stream_source_faults, &track.id) {
            return Err(MediaError::AttachFailed(format!(
                "stream source rejected for {}",
                track.id
            )));
        }
        let el = doc.elements.get_mut(&element).ok_or(MediaError::ElementNotFound(element))?;
        el.track_id = Some(track.id.clone());
        el.binding = Some(Binding::StreamSource);
        Ok(())
    }

    fn set_muted(&mut self, element: ElementId, muted: bool) {
        if let Some(el) = self.document.lock().elements.get_mut(&element) {
            el.muted = muted;
        }
    }

    fn set_volume(&mut self, element: ElementId, volume: f64) {
        if let Some(el) = self.document.lock().elements.get_mut(&element) {
            el.volume = volume.clamp(0.0, 1.0);
        }
    }

    fn volume(&self, element: ElementId) -> Option<f64> {
        self.document.lock().elements.get(&element).map(|el| el.volume)
    }

    fn play(&mut self, element: ElementId) -> Result<(), PlayError> {
        let mut guard = self.document.lock();
        let doc = &mut *guard;

        let el = doc
            .elements
            .get(&element)
            .ok_or_else(|| PlayError::Aborted("element removed".to_string()))?;
        let track_id = el
            .track_id
            .clone()
            .ok_or_else(|| PlayError::Other("no source attached".to_string()))?;
        let muted = el.muted;
        let silent = el.volume <= SILENT_THRESHOLD;

        *doc.play_attempts.entry(track_id.clone()).or_insert(0) += 1;

        if take_fault(&mut doc.play_faults, &track_id) {
            return Err(PlayError::Other(format!("decode error on {}", track_id)));
        }

        if let AutoplayPolicy::RequireGesture { allow_silent } = doc.policy {
            let permitted = doc.user_activated || muted || (allow_silent && silent);
            if !permitted {
                return Err(PlayError::NotAllowed(
                    "play() failed because the user didn't interact with the document first"
                        .to_string(),
                ));
            }
        }

        if let Some(el) = doc.elements.get_mut(&element) {
            el.playing = true;
        }
        Ok(())
    }

    fn remove_element(&mut self, element: ElementId) {
        let mut doc = self.document.lock();
        doc.elements.remove(&element);
        if doc.fullscreen == Some(element) {
            doc.fullscreen = None;
        }
    }

    fn create_audio_context(&mut self) -> Result<AudioContextId, MediaError> {
        let mut doc = self.document.lock();
        let id = AudioContextId(doc.next_id());
        let state = if doc.user_activated {
            AudioContextState::Running
        } else {
            AudioContextState::Suspended
        };
        doc.contexts.insert(id, state);
        doc.contexts_created += 1;
        Ok(id)
    }

    fn audio_context_state(&self, context: AudioContextId) -> AudioContextState {
        self.document
            .lock()
            .contexts
            .get(&context)
            .copied()
            .unwrap_or(AudioContextState::Closed)
    }

    fn resume_audio_context(&mut self, context: AudioContextId) -> Result<(), MediaError> {
        let mut doc = self.document.lock();
        let activated = doc.user_activated;
        let state = doc
            .contexts
            .get_mut(&context)
            .ok_or_else(|| MediaError::InvalidState("audio context closed".to_string()))?;
        match *state {
            AudioContextState::Closed => {
                Err(MediaError::InvalidState("audio context closed".to_string()))
            }
            _ if !activated => Err(MediaError::InvalidState(
                "resume requires user activation".to_string(),
            )),
            _ => {
                *state = AudioContextState::Running;
                Ok(())
            }
        }
    }

    fn close_audio_context(&mut self, context: AudioContextId) {
        if let Some(state) = self.document.lock().contexts.get_mut(&context) {
            *state = AudioContextState::Closed;
        }
    }

    fn enter_inline_fullscreen(&mut self, element: ElementId) -> Result<(), MediaError> {
        let mut doc = self.document.lock();
        if !doc.inline_fullscreen {
            return Err(MediaError::NotSupported("webkitEnterFullscreen".to_string()));
        }
        if !doc.elements.contains_key(&element) {
            return Err(MediaError::ElementNotFound(element));
        }
        doc.fullscreen = Some(element);
        Ok(())
    }

    fn request_fullscreen(&mut self, element: ElementId) -> Result<(), MediaError> {
        let mut doc = self.document.lock();
        if !doc.standard_fullscreen {
            return Err(MediaError::NotSupported("requestFullscreen".to_string()));
        }
        if !doc.elements.contains_key(&element) {
            return Err(MediaError::ElementNotFound(element));
        }
        doc.fullscreen = Some(element);
        Ok(())
    }

    fn exit_fullscreen(&mut self) -> Result<(), MediaError> {
        let mut doc = self.document.lock();
        if doc.fullscreen.take().is_none() {
            return Err(MediaError::InvalidState("not in fullscreen".to_string()));
        }
        Ok(())
    }

    fn user_activation(&mut self) {
        self.document.lock().user_activated = true;
    }
}
