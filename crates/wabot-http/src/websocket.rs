//! WebSocket handler for session lifecycle events.
//!
//! Clients connect to `/ws/events` and receive every `session:*` event from
//! the EventBus. Sending `{"subscribe": "<pattern>"}` narrows the stream;
//! `{"unsubscribe": "<pattern>"}` removes a filter again.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast::error::RecvError;
use wabot_core::event_bus::matches_pattern;

use super::HttpState;

/// Filter change requested by the client.
#[derive(Deserialize)]
#[serde(untagged)]
enum FilterRequest {
    Subscribe { subscribe: String },
    Unsubscribe { unsubscribe: String },
}

/// Handler for GET /ws/events
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<HttpState>>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<HttpState>) {
    let (mut sender, mut receiver) = socket.split();
    let subscriptions: Arc<Mutex<HashSet<String>>> = Arc::new(Mutex::new(HashSet::new()));
    let mut event_rx = state.event_bus().subscribe();

    let subs = Arc::clone(&subscriptions);
    let recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            let Message::Text(text) = msg else {
                continue;
            };
            match serde_json::from_str::<FilterRequest>(&text) {
                Ok(FilterRequest::Subscribe { subscribe }) => {
                    log::debug!("WebSocket subscribed to {}", subscribe);
                    subs.lock().unwrap().insert(subscribe);
                }
                Ok(FilterRequest::Unsubscribe { unsubscribe }) => {
                    log::debug!("WebSocket unsubscribed from {}", unsubscribe);
                    subs.lock().unwrap().remove(&unsubscribe);
                }
                Err(_) => log::debug!("Ignoring unrecognised WebSocket message"),
            }
        }
    });

    let send_task = tokio::spawn(async move {
        loop {
            match event_rx.recv().await {
                Ok(event) => {
                    let wanted = {
                        let subs = subscriptions.lock().unwrap();
                        subs.is_empty()
                            || subs
                                .iter()
                                .any(|pattern| matches_pattern(&event.event_type, pattern))
                    };
                    if !wanted {
                        continue;
                    }
                    if let Ok(json) = serde_json::to_string(&event) {
                        if sender.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                }
                Err(RecvError::Lagged(count)) => {
                    log::warn!("WebSocket client lagged by {} events", count);
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    tokio::select! {
        _ = recv_task => {},
        _ = send_task => {},
    }

    log::debug!("WebSocket connection closed");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_filter_requests() {
        assert!(matches!(
            serde_json::from_str::<FilterRequest>(r#"{"subscribe":"session:*"}"#),
            Ok(FilterRequest::Subscribe { subscribe }) if subscribe == "session:*"
        ));
        assert!(matches!(
            serde_json::from_str::<FilterRequest>(r#"{"unsubscribe":"session:qr"}"#),
            Ok(FilterRequest::Unsubscribe { unsubscribe }) if unsubscribe == "session:qr"
        ));
        assert!(serde_json::from_str::<FilterRequest>(r#"{"hello":1}"#).is_err());
    }
}
