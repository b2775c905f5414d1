//! Video attachment engine
//!
//! `Pending -> Attached -> Playing`. When the primary binding throws the
//! engine escalates to a manually built stream source, and after that to a
//! single delayed retry. Video elements are always element-muted; the
//! logical mute of the controls only ever applies to audio.

use super::{AttachContext, AttachOutcome, ElementId, MediaBackend, RemoteTrack, TrackKind};
use crate::error::PlayerError;
use log::{debug, info, warn};
use serde::Serialize;
use tokio::time::Duration;

/// Video track attachment state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoTrackState {
    Pending,
    Attached,
    Playing,
    /// Fallbacks exhausted; see `error`
    Error,
}

#[derive(Debug, Clone)]
pub struct VideoAttachment {
    pub track: RemoteTrack,
    pub element: Option<ElementId>,
    pub state: VideoTrackState,
    pub used_stream_source: bool,
    pub delayed_retry_used: bool,
    pub error: Option<String>,
}

impl VideoAttachment {
    fn new(track: RemoteTrack) -> Self {
        Self {
            track,
            element: None,
            state: VideoTrackState::Pending,
            used_stream_source: false,
            delayed_retry_used: false,
            error: None,
        }
    }
}

#[derive(Debug)]
pub struct VideoEngine {
    retry_delay: Duration,
    attachments: Vec<VideoAttachment>,
}

impl VideoEngine {
    pub fn new(retry_delay: Duration) -> Self {
        Self {
            retry_delay,
            attachments: Vec::new(),
        }
    }

    pub fn add_track(&mut self, track: RemoteTrack, ctx: &mut AttachContext<'_>) -> AttachOutcome {
        if self.index_of(&track.id).is_some() {
            return AttachOutcome::Skipped;
        }
        let track_id = track.id.clone();
        self.attachments.push(VideoAttachment::new(track));
        self.attempt(&track_id, ctx)
    }

    pub fn remove_track(&mut self, track_id: &str, ctx: &mut AttachContext<'_>) -> bool {
        let Some(index) = self.index_of(track_id) else {
            return false;
        };
        let attachment = self.attachments.remove(index);
        ctx.cancel_retry(TrackKind::Video, track_id);
        if let Some(element) = attachment.element {
            ctx.media.remove_element(element);
        }
        debug!("Video track {} detached", track_id);
        true
    }

    /// The delayed retry expired
    pub fn on_timer(&mut self, track_id: &str, ctx: &mut AttachContext<'_>) -> AttachOutcome {
        match self.attachment(track_id) {
            Some(attachment)
                if matches!(
                    attachment.state,
                    VideoTrackState::Pending | VideoTrackState::Attached
                ) =>
            {
                self.attempt(track_id, ctx)
            }
            _ => AttachOutcome::Skipped,
        }
    }

    /// Manual "retry video": restart the escalation from the top
    pub fn retry(&mut self, track_id: &str, ctx: &mut AttachContext<'_>) -> AttachOutcome {
        let Some(index) = self.index_of(track_id) else {
            return AttachOutcome::Skipped;
        };
        let attachment = &mut self.attachments[index];
        if attachment.state == VideoTrackState::Playing {
            return AttachOutcome::Playing;
        }
        attachment.state = VideoTrackState::Pending;
        attachment.used_stream_source = false;
        attachment.delayed_retry_used = false;
        attachment.error = None;
        self.attempt(track_id, ctx)
    }

    pub fn retry_all(&mut self, ctx: &mut AttachContext<'_>) -> Vec<(String, AttachOutcome)> {
        let ids: Vec<String> = self
            .attachments
            .iter()
            .filter(|attachment| attachment.state != VideoTrackState::Playing)
            .map(|attachment| attachment.track.id.clone())
            .collect();
        ids.into_iter()
            .map(|track_id| {
                let outcome = self.retry(&track_id, ctx);
                (track_id, outcome)
            })
            .collect()
    }

    pub fn detach_all(&mut self, ctx: &mut AttachContext<'_>) -> usize {
        let count = self.attachments.len();
        for attachment in self.attachments.drain(..) {
            ctx.cancel_retry(TrackKind::Video, &attachment.track.id);
            if let Some(element) = attachment.element {
                ctx.media.remove_element(element);
            }
        }
        count
    }

    /// Element to use for fullscreen: the first playing video, else any
    /// attached one
    pub fn primary_element(&self) -> Option<ElementId> {
        self.attachments
            .iter()
            .find(|attachment| attachment.state == VideoTrackState::Playing)
            .or_else(|| self.attachments.iter().find(|attachment| attachment.element.is_some()))
            .and_then(|attachment| attachment.element)
    }

    pub fn any_playing(&self) -> bool {
        self.attachments
            .iter()
            .any(|attachment| attachment.state == VideoTrackState::Playing)
    }

    /// Terminal error if every video track ended in error
    pub fn terminal_error(&self) -> Option<&str> {
        if self.attachments.is_empty()
            || self
                .attachments
                .iter()
                .any(|attachment| attachment.state != VideoTrackState::Error)
        {
            return None;
        }
        self.attachments.iter().find_map(|attachment| attachment.error.as_deref())
    }

    pub fn attachment(&self, track_id: &str) -> Option<&VideoAttachment> {
        self.attachments.iter().find(|attachment| attachment.track.id == track_id)
    }

    pub fn attachments(&self) -> &[VideoAttachment] {
        &self.attachments
    }

    fn index_of(&self, track_id: &str) -> Option<usize> {
        self.attachments.iter().position(|attachment| attachment.track.id == track_id)
    }

    fn attempt(&mut self, track_id: &str, ctx: &mut AttachContext<'_>) -> AttachOutcome {
        let Some(index) = self.index_of(track_id) else {
            return AttachOutcome::Skipped;
        };
        ctx.cancel_retry(TrackKind::Video, track_id);

        let attachment = &mut self.attachments[index];
        let element = match attachment.element {
            Some(element) => element,
            None => match ctx.media.create_element(TrackKind::Video) {
                Ok(element) => {
                    attachment.element = Some(element);
                    element
                }
                Err(e) => return self.escalate(index, e.to_string(), ctx),
            },
        };

        // Muted video autoplay is the reliably permitted kind.
        ctx.media.set_muted(element, true);

        if attachment.state == VideoTrackState::Pending {
            match bind(ctx.media, element, attachment) {
                Ok(()) => attachment.state = VideoTrackState::Attached,
                Err(reason) => {
                    ctx.media.remove_element(element);
                    attachment.element = None;
                    return self.escalate(index, reason, ctx);
                }
            }
        }

        match ctx.media.play(element) {
            Ok(()) => {
                attachment.state = VideoTrackState::Playing;
                attachment.error = None;
                info!("Video track {} playing", attachment.track.id);
                AttachOutcome::Playing
            }
            Err(e) => self.escalate(index, e.to_string(), ctx),
        }
    }

    /// Use the delayed retry if still available, otherwise give up on the
    /// track (and only the track).
    fn escalate(
        &mut self,
        index: usize,
        reason: String,
        ctx: &mut AttachContext<'_>,
    ) -> AttachOutcome {
        let attachment = &mut self.attachments[index];

        if !attachment.delayed_retry_used {
            attachment.delayed_retry_used = true;
            if attachment.state != VideoTrackState::Attached {
                attachment.state = VideoTrackState::Pending;
            }
            debug!(
                "Video track {} attach failed ({}), retrying once in {:?}",
                attachment.track.id, reason, self.retry_delay
            );
            let track_id = attachment.track.id.clone();
            ctx.schedule_retry(TrackKind::Video, &track_id, self.retry_delay);
            return AttachOutcome::RetryScheduled(self.retry_delay);
        }

        let error = PlayerError::TrackAttachment {
            track_id: attachment.track.id.clone(),
            kind: TrackKind::Video,
            reason,
        };
        warn!("{}", error);
        if let Some(element) = attachment.element.take() {
            ctx.media.remove_element(element);
        }
        attachment.state = VideoTrackState::Error;
        attachment.error = Some(error.to_string());
        AttachOutcome::Failed
    }
}

/// Primary binding, then the stream-source fallback
fn bind(
    media: &mut dyn MediaBackend,
    element: ElementId,
    attachment: &mut VideoAttachment,
) -> Result<(), String> {
    match media.attach_track(element, &attachment.track) {
        Ok(()) => Ok(()),
        Err(primary) => {
            debug!(
                "Primary attach of {} failed ({}), using stream source",
                attachment.track.id, primary
            );
            media
                .attach_stream_source(element, &attachment.track)
                .map(|()| attachment.used_stream_source = true)
                .map_err(|fallback| fallback.to_string())
        }
    }
}
