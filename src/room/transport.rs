//! Real-time transport event surface
//!
//! The transport protocol itself belongs to the media service SDK. The
//! player only needs `connect`, `disconnect` and a stream of events, which
//! `Transport::connect` hands back as a channel receiver scoped to the
//! session.

use super::ConnectionState;
use crate::media::RemoteTrack;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::error::Error;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Events emitted by the transport for the current session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransportEvent {
    TrackSubscribed { track: RemoteTrack },
    TrackUnsubscribed { track_id: String },
    TrackMuted { track_id: String, muted: bool },
    ConnectionStateChanged { state: ConnectionState },
}

/// Transport errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Server refused the token or room
    Rejected(String),
    /// Server could not be reached
    Unreachable(String),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Rejected(msg) => write!(f, "Rejected: {}", msg),
            TransportError::Unreachable(msg) => write!(f, "Unreachable: {}", msg),
        }
    }
}

impl Error for TransportError {}

#[async_trait]
pub trait Transport: Send {
    /// Join the room; the returned receiver yields the session's events and
    /// closes when the session ends.
    async fn connect(
        &mut self,
        url: &str,
        token: &str,
    ) -> Result<mpsc::UnboundedReceiver<TransportEvent>, TransportError>;

    async fn disconnect(&mut self);
}

#[derive(Debug, Default)]
struct ScriptedLink {
    sender: Option<mpsc::UnboundedSender<TransportEvent>>,
    connect_failures: VecDeque<TransportError>,
    connects: Vec<(String, String)>,
    disconnects: u32,
}

/// In-process transport. The paired [`TransportInjector`] pushes events into
/// whichever session is currently connected.
#[derive(Debug)]
pub struct ScriptedTransport {
    link: Arc<Mutex<ScriptedLink>>,
}

/// Event source half of a [`ScriptedTransport`]
#[derive(Debug, Clone)]
pub struct TransportInjector {
    link: Arc<Mutex<ScriptedLink>>,
}

impl ScriptedTransport {
    pub fn pair() -> (Self, TransportInjector) {
        let link = Arc::new(Mutex::new(ScriptedLink::default()));
        (
            Self { link: link.clone() },
            TransportInjector { link },
        )
    }
}

impl TransportInjector {
    /// Deliver an event; false when no session is connected
    pub fn send(&self, event: TransportEvent) -> bool {
        match self.link.lock().sender.as_ref() {
            Some(sender) => sender.send(event).is_ok(),
            None => false,
        }
    }

    pub fn subscribe_track(&self, track: RemoteTrack) -> bool {
        self.send(TransportEvent::TrackSubscribed { track })
    }

    pub fn unsubscribe_track(&self, track_id: &str) -> bool {
        self.send(TransportEvent::TrackUnsubscribed {
            track_id: track_id.to_string(),
        })
    }

    /// Simulate the server dropping the session
    pub fn drop_connection(&self) {
        let mut link = self.link.lock();
        if let Some(sender) = link.sender.take() {
            let _ = sender.send(TransportEvent::ConnectionStateChanged {
                state: ConnectionState::Disconnected,
            });
        }
    }

    /// Make the next `times` connects fail
    pub fn fail_connects(&self, times: u32, error: TransportError) {
        let mut link = self.link.lock();
        for _ in 0..times {
            link.connect_failures.push_back(error.clone());
        }
    }

    pub fn is_connected(&self) -> bool {
        self.link.lock().sender.is_some()
    }

    /// (url, token) pairs of every connect call, failed ones included
    pub fn connects(&self) -> Vec<(String, String)> {
        self.link.lock().connects.clone()
    }

    pub fn disconnects(&self) -> u32 {
        self.link.lock().disconnects
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn connect(
        &mut self,
        url: &str,
        token: &str,
    ) -> Result<mpsc::UnboundedReceiver<TransportEvent>, TransportError> {
        let mut link = self.link.lock();
        link.connects.push((url.to_string(), token.to_string()));
        if let Some(error) = link.connect_failures.pop_front() {
            return Err(error);
        }
        let (tx, rx) = mpsc::unbounded_channel();
        link.sender = Some(tx);
        Ok(rx)
    }

    async fn disconnect(&mut self) {
        let mut link = self.link.lock();
        link.sender = None;
        link.disconnects += 1;
    }
}
