//! roomcast-core - Live room playback core
//!
//! Connects a viewer to a named room on a real-time media transport and keeps
//! its audio and video tracks playing across desktop and mobile browsers,
//! through autoplay restrictions, media element quirks and flaky networks.

pub mod config;
pub mod error;
pub mod media;
pub mod observer;
pub mod platform;
pub mod playback;
pub mod room;
pub mod scenario;

// Re-exports
pub use config::Config;
pub use error::PlayerError;
pub use media::{MediaBackend, RemoteTrack, SimulatedMedia, TrackKind};
pub use platform::PlatformCapabilities;
pub use playback::{DisplayState, Player, PlayerCommand, PlayerSnapshot};
pub use room::{ConnectionState, ConnectionUpdate, TokenProvider, Transport, TransportEvent};
pub use scenario::Scenario;
