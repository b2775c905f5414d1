//! Viewer token acquisition
//!
//! The token endpoint itself lives outside this crate. `TokenProvider` is
//! the seam; `ViewerToken::from_response` parses the endpoint's JSON body.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::error::Error;
use std::fmt;
use std::sync::Arc;

/// Short-lived credentials for joining a room as a viewer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewerToken {
    pub token: String,
    #[serde(alias = "url", alias = "serverUrl")]
    pub transport_url: String,
    #[serde(default)]
    pub identity: String,
    #[serde(default, alias = "name", alias = "displayName")]
    pub display_name: String,
}

impl ViewerToken {
    pub fn new(token: &str, transport_url: &str, identity: &str, display_name: &str) -> Self {
        Self {
            token: token.to_string(),
            transport_url: transport_url.to_string(),
            identity: identity.to_string(),
            display_name: display_name.to_string(),
        }
    }

    /// Parse a token endpoint response body.
    ///
    /// Accepts `{"token":..,"url":..,"identity":..,"name":..}` and turns
    /// `{"error": ".."}` into a `TokenError` carrying the message.
    pub fn from_response(body: &str) -> Result<Self, TokenError> {
        let value: serde_json::Value = serde_json::from_str(body)
            .map_err(|e| TokenError(format!("Invalid token response: {}", e)))?;

        if let Some(message) = value.get("error").and_then(|v| v.as_str()) {
            return Err(TokenError(message.to_string()));
        }

        let token: ViewerToken = serde_json::from_value(value)
            .map_err(|e| TokenError(format!("Malformed token response: {}", e)))?;
        if token.token.is_empty() {
            return Err(TokenError("Token endpoint returned an empty token".to_string()));
        }
        Ok(token)
    }
}

/// Human-readable token failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenError(pub String);

impl fmt::Display for TokenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Error for TokenError {}

/// Supplies viewer credentials for a named room
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn request_viewer_token(&self, room_name: &str) -> Result<ViewerToken, TokenError>;
}

#[derive(Debug)]
struct ScriptedTokens {
    queued: VecDeque<Result<ViewerToken, TokenError>>,
    fallback: Result<ViewerToken, TokenError>,
    requested_rooms: Vec<String>,
}

/// Token provider replaying queued outcomes, then a fallback outcome.
/// Clones share the script.
#[derive(Debug, Clone)]
pub struct ScriptedTokenProvider {
    inner: Arc<Mutex<ScriptedTokens>>,
}

impl ScriptedTokenProvider {
    /// Always hand out `token`
    pub fn new(token: ViewerToken) -> Self {
        Self::with_fallback(Ok(token))
    }

    /// Always fail with `reason`
    pub fn failing(reason: &str) -> Self {
        Self::with_fallback(Err(TokenError(reason.to_string())))
    }

    fn with_fallback(fallback: Result<ViewerToken, TokenError>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ScriptedTokens {
                queued: VecDeque::new(),
                fallback,
                requested_rooms: Vec::new(),
            })),
        }
    }

    /// Queue `times` failures ahead of the fallback
    pub fn fail_times(&self, times: u32, reason: &str) {
        let mut inner = self.inner.lock();
        for _ in 0..times {
            inner.queued.push_back(Err(TokenError(reason.to_string())));
        }
    }

    /// Number of requests served so far
    pub fn calls(&self) -> usize {
        self.inner.lock().requested_rooms.len()
    }

    pub fn requested_rooms(&self) -> Vec<String> {
        self.inner.lock().requested_rooms.clone()
    }
}

#[async_trait]
impl TokenProvider for ScriptedTokenProvider {
    async fn request_viewer_token(&self, room_name: &str) -> Result<ViewerToken, TokenError> {
        let mut inner = self.inner.lock();
        inner.requested_rooms.push(room_name.to_string());
        match inner.queued.pop_front() {
            Some(outcome) => outcome,
            None => inner.fallback.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_endpoint_aliases() {
        let token = ViewerToken::from_response(
            r#"{"token":"eyJ","url":"wss://rtc.example.net","identity":"viewer-7","name":"Guest"}"#,
        )
        .unwrap();
        assert_eq!(token, ViewerToken::new("eyJ", "wss://rtc.example.net", "viewer-7", "Guest"));
    }

    #[test]
    fn error_body_becomes_token_error() {
        let err = ViewerToken::from_response(r#"{"error":"Room not found"}"#).unwrap_err();
        assert_eq!(err.to_string(), "Room not found");
    }

    #[test]
    fn rejects_garbage_and_empty_tokens() {
        assert!(ViewerToken::from_response("<html>").is_err());
        assert!(ViewerToken::from_response(r#"{"token":"","url":"wss://x"}"#).is_err());
        assert!(ViewerToken::from_response(r#"{"token":"t"}"#).is_err());
    }

    #[tokio::test]
    async fn scripted_provider_replays_failures_then_fallback() {
        let provider = ScriptedTokenProvider::new(ViewerToken::new("t", "wss://x", "v", "V"));
        provider.fail_times(2, "503 Service Unavailable");

        assert!(provider.request_viewer_token("room").await.is_err());
        assert!(provider.request_viewer_token("room").await.is_err());
        assert!(provider.request_viewer_token("room").await.is_ok());
        assert_eq!(provider.calls(), 3);
    }
}
