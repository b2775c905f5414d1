//! Player error taxonomy
//!
//! Only connection-level problems are returned as `Err`. Track attachment
//! failures stay track-scoped and surface through the player snapshot, and an
//! autoplay block is a state rather than an error.

use crate::media::TrackKind;
use crate::room::{TokenError, TransportError};
use std::error::Error;
use std::fmt;

/// Player-level errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerError {
    /// Token provider kept failing until the retry bound was exhausted
    TokenAcquisition(String),
    /// Transport refused or could not establish the room connection
    Connection(String),
    /// A previously connected session dropped
    ConnectionLost(String),
    /// Attaching a track to a media element failed for good
    TrackAttachment {
        track_id: String,
        kind: TrackKind,
        reason: String,
    },
    /// Operation requires a mounted player
    NotMounted,
}

impl PlayerError {
    /// Whether the error ends the player rather than degrading it
    pub fn is_fatal(&self) -> bool {
        matches!(self, PlayerError::TokenAcquisition(_) | PlayerError::Connection(_))
    }
}

impl fmt::Display for PlayerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlayerError::TokenAcquisition(msg) => write!(f, "Token acquisition failed: {}", msg),
            PlayerError::Connection(msg) => write!(f, "Connection failed: {}", msg),
            PlayerError::ConnectionLost(msg) => write!(f, "Lost connection: {}", msg),
            PlayerError::TrackAttachment { track_id, kind, reason } => {
                write!(f, "Could not attach {} track {}: {}", kind.as_str(), track_id, reason)
            }
            PlayerError::NotMounted => write!(f, "Player is not mounted"),
        }
    }
}

impl Error for PlayerError {}

impl From<TokenError> for PlayerError {
    fn from(err: TokenError) -> Self {
        PlayerError::TokenAcquisition(err.to_string())
    }
}

impl From<TransportError> for PlayerError {
    fn from(err: TransportError) -> Self {
        PlayerError::Connection(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attachment_error_names_track() {
        let err = PlayerError::TrackAttachment {
            track_id: "TR_v1".to_string(),
            kind: TrackKind::Video,
            reason: "no source".to_string(),
        };
        assert_eq!(err.to_string(), "Could not attach video track TR_v1: no source");
        assert!(!err.is_fatal());
    }

    #[test]
    fn token_exhaustion_is_fatal() {
        assert!(PlayerError::TokenAcquisition("503".into()).is_fatal());
        assert!(!PlayerError::ConnectionLost("ice".into()).is_fatal());
    }

    #[test]
    fn leaf_errors_convert() {
        let err: PlayerError = TokenError("Room not found".into()).into();
        assert_eq!(err, PlayerError::TokenAcquisition("Room not found".into()));

        let err: PlayerError = TransportError::Rejected("expired".into()).into();
        assert_eq!(err.to_string(), "Connection failed: Rejected: expired");
    }
}
