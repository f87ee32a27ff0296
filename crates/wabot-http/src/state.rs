//! Shared state for the HTTP server.

use std::sync::Arc;
use subtle::ConstantTimeEq;
use wabot_core::{EventBus, QrRenderer, SessionManager};

/// Shared state available to all HTTP handlers.
pub struct HttpState {
    pub manager: Arc<SessionManager>,
    pub renderer: Arc<dyn QrRenderer>,
    /// Required bearer token. `None` disables the gate.
    pub auth_token: Option<String>,
}

impl HttpState {
    /// State with authentication disabled.
    pub fn new(manager: Arc<SessionManager>, renderer: Arc<dyn QrRenderer>) -> Self {
        Self {
            manager,
            renderer,
            auth_token: None,
        }
    }

    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        self.manager.event_bus()
    }

    /// Whether `token` matches the configured token (always true when the
    /// gate is disabled). Compared in constant time.
    pub fn validate_token(&self, token: &str) -> bool {
        match &self.auth_token {
            Some(expected) => expected.as_bytes().ct_eq(token.as_bytes()).into(),
            None => true,
        }
    }
}
