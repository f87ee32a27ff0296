//! Lifecycle event broadcasting.
//!
//! The session manager publishes phase changes, fresh QR payloads and reset
//! notices here. Any number of consumers (WebSocket clients, tests) can
//! subscribe; publishing never blocks and never fails the caller.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Events beyond this many unread entries cause slow subscribers to lag.
const DEFAULT_CAPACITY: usize = 256;

/// Emitted on every phase change. Payload: `{"phase": .., "status": ..}`.
pub const SESSION_STATE: &str = "session:state";
/// Emitted on every QR event. Payload: `{"qr": <raw payload>}`.
pub const SESSION_QR: &str = "session:qr";
/// Emitted when automatic recovery starts. Payload: `{"trigger": ..}`.
pub const SESSION_RESET: &str = "session:reset";

/// A broadcast event containing an event type and JSON payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastEvent {
    pub event_type: String,
    pub payload: serde_json::Value,
}

impl BroadcastEvent {
    pub fn new(event_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
        }
    }
}

/// Publish-subscribe bus backed by a tokio broadcast channel.
pub struct EventBus {
    sender: broadcast::Sender<BroadcastEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit an event to all subscribers.
    ///
    /// Returns the number of subscribers that received it; with no
    /// subscribers the event is dropped and 0 is returned.
    pub fn emit<T: Serialize>(&self, event_type: &str, payload: &T) -> usize {
        let json_payload = match serde_json::to_value(payload) {
            Ok(v) => v,
            Err(e) => {
                log::warn!("Failed to serialize {} payload: {}", event_type, e);
                return 0;
            }
        };
        self.sender
            .send(BroadcastEvent::new(event_type, json_payload))
            .unwrap_or(0)
    }

    /// Subscribe to all future events. Past events are not replayed.
    pub fn subscribe(&self) -> broadcast::Receiver<BroadcastEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Check if an event type matches a subscription pattern.
///
/// Supports wildcards:
/// - `*` matches any single segment
/// - a pattern ending with `:*` matches any suffix
pub fn matches_pattern(event_type: &str, pattern: &str) -> bool {
    if event_type == pattern || pattern == "*" {
        return true;
    }

    if let Some(prefix) = pattern.strip_suffix(":*") {
        if event_type.len() > prefix.len()
            && event_type.starts_with(prefix)
            && event_type[prefix.len()..].starts_with(':')
        {
            return true;
        }
    }

    if pattern.contains('*') {
        let pattern_parts: Vec<&str> = pattern.split(':').collect();
        let event_parts: Vec<&str> = event_type.split(':').collect();
        return pattern_parts.len() == event_parts.len()
            && pattern_parts
                .iter()
                .zip(event_parts.iter())
                .all(|(p, e)| *p == "*" || p == e);
    }

    false
}
