//! Playback surface
//!
//! This module provides what the render surface talks to:
//! - The playback controls state machine
//! - The `Player` facade and its event loop
//! - Serializable snapshots of the player

pub mod controls;
pub mod player;
pub mod snapshot;

pub use controls::{PlaybackControls, PlaybackControlsState};
pub use player::{Player, PlayerCommand};
pub use snapshot::{AudioTrackStatus, DisplayState, PlayerSnapshot, VideoTrackStatus};
