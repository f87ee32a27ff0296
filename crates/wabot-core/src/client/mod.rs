//! Messaging client abstraction.
//!
//! The protocol client is opaque to the rest of the crate: it is built by a
//! [`ClientFactory`], reports its lifecycle through an [`EventSink`] and offers
//! exactly two commands, send and destroy. The daemon plugs in
//! [`bridge::BridgeFactory`]; tests use the scripted client in `fake`.

pub mod bridge;
#[cfg(any(test, feature = "test-support"))]
pub mod fake;
mod protocol;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::storage::SessionStorage;

/// Addressing suffix for one-to-one chats.
pub const USER_SUFFIX: &str = "@c.us";

/// Address domains accepted as-is: contacts, groups, broadcast lists.
pub const KNOWN_DOMAINS: [&str; 3] = ["c.us", "g.us", "broadcast"];

/// Lifecycle signals reported by a messaging client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ClientEvent {
    /// The account is authenticated and the client can send.
    Ready,
    /// A login QR payload must be scanned.
    Qr { payload: String },
    /// The connection dropped for the given reason (e.g. `NAVIGATION`, `LOGOUT`).
    Disconnected { reason: String },
    /// Stored credentials were rejected.
    AuthFailure { message: String },
    /// Informational connection state change.
    ChangeState { state: String },
    /// Transport or runtime error.
    Error { message: String },
}

impl ClientEvent {
    /// Short label used in logs and reset notices.
    pub fn label(&self) -> &'static str {
        match self {
            ClientEvent::Ready => "ready",
            ClientEvent::Qr { .. } => "qr",
            ClientEvent::Disconnected { .. } => "disconnected",
            ClientEvent::AuthFailure { .. } => "auth_failure",
            ClientEvent::ChangeState { .. } => "change_state",
            ClientEvent::Error { .. } => "error",
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    #[error("Failed to start client: {0}")]
    Spawn(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("{0}")]
    Rejected(String),

    #[error("Client is closed")]
    Closed,

    #[error("Timed out waiting for {0}")]
    Timeout(String),
}

impl From<std::io::Error> for ClientError {
    fn from(e: std::io::Error) -> Self {
        ClientError::Io(e.to_string())
    }
}

/// A recipient in the client's addressing convention (`<number>@c.us`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChatId(String);

impl ChatId {
    /// Normalize a user-supplied recipient.
    ///
    /// Bare numbers get the one-to-one suffix. Identifiers that already carry
    /// one of [`KNOWN_DOMAINS`] are kept as given, so group ids (`@g.us`) can
    /// be addressed directly and not only contacts. Returns `None` for blank
    /// input, an empty local part, or any other domain.
    pub fn normalize(recipient: &str) -> Option<Self> {
        let trimmed = recipient.trim();
        if trimmed.is_empty() {
            return None;
        }
        match trimmed.split_once('@') {
            None => Some(Self(format!("{}{}", trimmed, USER_SUFFIX))),
            Some((local, domain)) if !local.is_empty() && KNOWN_DOMAINS.contains(&domain) => {
                Some(Self(trimmed.to_string()))
            }
            Some(_) => None,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Channel end handed to a client at construction.
///
/// Every event is tagged with the generation of the client that produced it,
/// so the manager can drop late events from a client it already destroyed.
#[derive(Debug, Clone)]
pub struct EventSink {
    generation: u64,
    tx: mpsc::UnboundedSender<(u64, ClientEvent)>,
}

impl EventSink {
    pub fn new(generation: u64, tx: mpsc::UnboundedSender<(u64, ClientEvent)>) -> Self {
        Self { generation, tx }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Forward an event. Returns false once the manager stopped listening.
    pub fn emit(&self, event: ClientEvent) -> bool {
        self.tx.send((self.generation, event)).is_ok()
    }
}

/// A live messaging client.
#[async_trait]
pub trait MessagingClient: Send + Sync {
    async fn send_message(&self, chat_id: &ChatId, body: &str) -> Result<(), ClientError>;

    /// Tear the client down and release its hold on the session storage.
    async fn destroy(&self) -> Result<(), ClientError>;
}

/// Builds clients bound to a session storage location.
///
/// `construct` begins the connection sequence; readiness and QR requests
/// arrive later through the sink.
#[async_trait]
pub trait ClientFactory: Send + Sync {
    async fn construct(
        &self,
        storage: &SessionStorage,
        events: EventSink,
    ) -> Result<Arc<dyn MessagingClient>, ClientError>;
}
