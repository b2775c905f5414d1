//! Room connection layer
//!
//! This module connects a viewer to a named room:
//! - Viewer token acquisition
//! - The real-time transport event surface
//! - Connection lifecycle and retry (`ConnectionManager`)

pub mod token;
pub mod transport;
pub mod connection;

pub use token::{ScriptedTokenProvider, TokenError, TokenProvider, ViewerToken};
pub use transport::{
    ScriptedTransport, Transport, TransportError, TransportEvent, TransportInjector,
};
pub use connection::{ConnectionManager, ConnectionRetryPolicy};

use serde::{Deserialize, Serialize};
use std::time::Instant;
use uuid::Uuid;

/// Room connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Connection lifecycle notification broadcast by the `ConnectionManager`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConnectionUpdate {
    /// A connect call started (silent retries are not re-announced)
    Connecting { room: String },
    Connected { room: String, session_id: Uuid },
    /// Terminal failure of a connect call
    Failed { reason: String },
    /// A connected session dropped
    Lost { reason: String },
    Disconnected,
}

impl ConnectionUpdate {
    pub fn state(&self) -> ConnectionState {
        match self {
            ConnectionUpdate::Connecting { .. } => ConnectionState::Connecting,
            ConnectionUpdate::Connected { .. } => ConnectionState::Connected,
            _ => ConnectionState::Disconnected,
        }
    }
}

/// A single viewer session in a room
#[derive(Debug, Clone)]
pub struct RoomSession {
    /// Unique session ID
    pub id: Uuid,
    pub room_name: String,
    pub token: String,
    pub transport_url: String,
    /// Identity the token was issued for
    pub identity: String,
    pub display_name: String,
    pub state: ConnectionState,
    /// Session creation time
    pub created_at: Instant,
}

impl RoomSession {
    pub fn new(room_name: &str, token: ViewerToken) -> Self {
        Self {
            id: Uuid::new_v4(),
            room_name: room_name.to_string(),
            token: token.token,
            transport_url: token.transport_url,
            identity: token.identity,
            display_name: token.display_name,
            state: ConnectionState::Connecting,
            created_at: Instant::now(),
        }
    }

    /// Get session age
    pub fn age(&self) -> std::time::Duration {
        self.created_at.elapsed()
    }
}
