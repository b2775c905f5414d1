//! Room connection lifecycle
//!
//! Owns the single `RoomSession` of the player. A connect call requests a
//! token, joins the transport and broadcasts exactly one terminal update
//! (`Connected` or `Failed`). Startup hiccups are retried silently with
//! linear backoff; once a session has ever been connected, transport
//! failures and drops surface immediately. Reconnection is never automatic.

use super::{
    ConnectionState, ConnectionUpdate, RoomSession, TokenProvider, Transport, TransportEvent,
};
use crate::config::ConnectionConfig;
use crate::error::PlayerError;
use crate::media::AudioContextSlot;
use log::{debug, error, info, warn};
use tokio::sync::{broadcast, mpsc};
use tokio::time::{self, Duration};

/// Linear backoff for token acquisition and first-connect retries
#[derive(Debug, Clone)]
pub struct ConnectionRetryPolicy {
    pub max_attempts: u32,
    pub base: Duration,
    pub cap: Duration,
}

impl ConnectionRetryPolicy {
    pub fn from_config(config: &ConnectionConfig) -> Self {
        Self {
            max_attempts: config.token_max_attempts.max(1),
            base: Duration::from_millis(config.token_retry_base_ms),
            cap: Duration::from_millis(config.token_retry_cap_ms),
        }
    }

    /// Delay after the `attempt`-th failure: `min(base * attempt, cap)`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base.saturating_mul(attempt).min(self.cap)
    }
}

impl Default for ConnectionRetryPolicy {
    fn default() -> Self {
        Self::from_config(&ConnectionConfig::default())
    }
}

pub struct ConnectionManager {
    token_provider: Box<dyn TokenProvider>,
    transport: Box<dyn Transport>,
    policy: ConnectionRetryPolicy,
    session: Option<RoomSession>,
    /// Set once any connect call succeeded
    has_connected: bool,
    status: ConnectionUpdate,
    updates: broadcast::Sender<ConnectionUpdate>,
    audio_context: AudioContextSlot,
}

impl ConnectionManager {
    pub fn new(
        token_provider: Box<dyn TokenProvider>,
        transport: Box<dyn Transport>,
        policy: ConnectionRetryPolicy,
    ) -> Self {
        let (updates, _) = broadcast::channel(64);
        Self {
            token_provider,
            transport,
            policy,
            session: None,
            has_connected: false,
            status: ConnectionUpdate::Disconnected,
            updates,
            audio_context: AudioContextSlot::new(),
        }
    }

    /// Stream of connection updates
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionUpdate> {
        self.updates.subscribe()
    }

    /// Connect to `room_name`, replacing any current session.
    ///
    /// Returns the event receiver of the new session.
    pub async fn connect(
        &mut self,
        room_name: &str,
    ) -> Result<mpsc::UnboundedReceiver<TransportEvent>, PlayerError> {
        if self.session.is_some() {
            self.disconnect().await;
        }

        let first_connection = !self.has_connected;
        self.emit(ConnectionUpdate::Connecting {
            room: room_name.to_string(),
        });

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.connect_once(room_name).await {
                Ok((session, events)) => {
                    info!(
                        "Connected to room {} as {} (session {})",
                        session.room_name, session.identity, session.id
                    );
                    let update = ConnectionUpdate::Connected {
                        room: session.room_name.clone(),
                        session_id: session.id,
                    };
                    self.session = Some(session);
                    self.has_connected = true;
                    self.emit(update);
                    return Ok(events);
                }
                Err(err) => {
                    let retryable = match err {
                        PlayerError::TokenAcquisition(_) => true,
                        PlayerError::Connection(_) => first_connection,
                        _ => false,
                    };
                    if retryable && attempt < self.policy.max_attempts {
                        let delay = self.policy.delay_for(attempt);
                        debug!(
                            "Connect attempt {}/{} for room {} failed ({}), retrying in {:?}",
                            attempt, self.policy.max_attempts, room_name, err, delay
                        );
                        time::sleep(delay).await;
                        continue;
                    }

                    error!("Could not connect to room {}: {}", room_name, err);
                    self.emit(ConnectionUpdate::Failed {
                        reason: err.to_string(),
                    });
                    return Err(err);
                }
            }
        }
    }

    async fn connect_once(
        &mut self,
        room_name: &str,
    ) -> Result<(RoomSession, mpsc::UnboundedReceiver<TransportEvent>), PlayerError> {
        let token = self.token_provider.request_viewer_token(room_name).await?;

        let mut session = RoomSession::new(room_name, token);
        let events = self
            .transport
            .connect(&session.transport_url, &session.token)
            .await?;
        session.state = ConnectionState::Connected;
        Ok((session, events))
    }

    /// Apply a transport-reported state change.
    ///
    /// Returns `ConnectionLost` when a connected session dropped.
    pub fn handle_state_change(&mut self, state: ConnectionState) -> Option<PlayerError> {
        let session = self.session.as_mut()?;
        if session.state == state {
            return None;
        }
        let previous = session.state;
        session.state = state;
        debug!("Session {} state change: {:?} -> {:?}", session.id, previous, state);

        match state {
            ConnectionState::Disconnected => {
                let reason = "lost connection".to_string();
                warn!("Room {} {}", session.room_name, reason);
                self.emit(ConnectionUpdate::Lost {
                    reason: reason.clone(),
                });
                Some(PlayerError::ConnectionLost(reason))
            }
            ConnectionState::Connecting => {
                let room = session.room_name.clone();
                self.emit(ConnectionUpdate::Connecting { room });
                None
            }
            ConnectionState::Connected => {
                let update = ConnectionUpdate::Connected {
                    room: session.room_name.clone(),
                    session_id: session.id,
                };
                self.emit(update);
                None
            }
        }
    }

    /// The session's event stream ended without a state change
    pub fn handle_events_closed(&mut self) -> Option<PlayerError> {
        self.handle_state_change(ConnectionState::Disconnected)
    }

    /// Leave the room and destroy the session.
    ///
    /// Also settles a failed or abandoned connect back to `Disconnected`.
    pub async fn disconnect(&mut self) {
        if let Some(session) = self.session.take() {
            self.transport.disconnect().await;
            info!("Session {} closed after {:?}", session.id, session.age());
        }
        if self.status != ConnectionUpdate::Disconnected {
            self.emit(ConnectionUpdate::Disconnected);
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.session
            .as_ref()
            .map(|session| session.state)
            .unwrap_or(ConnectionState::Disconnected)
    }

    /// Latest broadcast update
    pub fn status(&self) -> &ConnectionUpdate {
        &self.status
    }

    pub fn session(&self) -> Option<&RoomSession> {
        self.session.as_ref()
    }

    pub fn has_connected(&self) -> bool {
        self.has_connected
    }

    /// Session-scoped audio context shared by every audio attachment
    pub fn audio_context_mut(&mut self) -> &mut AudioContextSlot {
        &mut self.audio_context
    }

    fn emit(&mut self, update: ConnectionUpdate) {
        self.status = update.clone();
        // No receivers is fine.
        let _ = self.updates.send(update);
    }
}
