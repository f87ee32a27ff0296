//! HTTP control surface for a wabot session.
//!
//! Exposes status, QR, send and logout over REST and lifecycle events over
//! WebSocket. Every route except `/status` sits behind the bearer token gate.

mod auth;
mod routes;
mod state;
mod websocket;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};

pub use routes::{ApiError, MessageRequest};
pub use state::HttpState;

/// Build the router with all routes, the auth gate and CORS.
pub fn router(state: Arc<HttpState>) -> Router {
    let protected = Router::new()
        .route("/generate_qr", get(routes::generate_qr))
        .route("/message", post(routes::send_message))
        .route("/logout", get(routes::logout))
        .route("/ws/events", get(websocket::ws_handler))
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            auth::auth_middleware,
        ));

    Router::new()
        .route("/status", get(routes::status))
        .merge(protected)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Handle to a running HTTP server.
#[derive(Default)]
pub struct HttpServerHandle {
    local_addr: Option<SocketAddr>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl HttpServerHandle {
    /// Check if the server is running.
    pub fn is_running(&self) -> bool {
        self.shutdown_tx.is_some()
    }

    /// Address the listener is bound to (useful with port 0).
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Stop the server gracefully and wait for in-flight requests.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                log::warn!("HTTP server task ended abnormally: {}", e);
            }
        }
    }
}

/// Bind to `host:port` and serve on the current runtime.
///
/// Binding happens before this returns, so an occupied port is reported to
/// the caller instead of only being logged.
pub async fn start(
    state: Arc<HttpState>,
    host: &str,
    port: u16,
) -> Result<HttpServerHandle, String> {
    let addr: SocketAddr = format!("{}:{}", host, port)
        .parse()
        .map_err(|e| format!("Invalid address: {}", e))?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| format!("Failed to bind HTTP server to {}: {}", addr, e))?;
    let local_addr = listener
        .local_addr()
        .map_err(|e| format!("Failed to read bound address: {}", e))?;

    if state.auth_token.is_none() {
        log::warn!("HTTP server running WITHOUT authentication");
    }
    log::info!("HTTP server listening on http://{}", local_addr);

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let app = router(state);
    let task = tokio::spawn(async move {
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async {
                shutdown_rx.await.ok();
                log::info!("HTTP server shutting down");
            })
            .await;
        if let Err(e) = result {
            log::error!("HTTP server error: {}", e);
        }
    });

    Ok(HttpServerHandle {
        local_addr: Some(local_addr),
        shutdown_tx: Some(shutdown_tx),
        task: Some(task),
    })
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use wabot_core::client::fake::FakeFactory;
    use wabot_core::{SessionManager, SessionStorage, SvgQrRenderer};

    fn test_state(dir: &std::path::Path) -> Arc<HttpState> {
        let manager = SessionManager::builder(
            SessionStorage::new(dir.join(".wwebjs_auth")),
            Arc::new(FakeFactory::new()),
        )
        .build();
        Arc::new(HttpState::new(manager, Arc::new(SvgQrRenderer::new())))
    }

    #[test]
    fn http_server_handle_default() {
        let handle = HttpServerHandle::default();
        assert!(!handle.is_running());
        assert!(handle.local_addr().is_none());
    }

    #[tokio::test]
    async fn invalid_address_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = start(test_state(dir.path()), "not an address", 0)
            .await
            .err()
            .unwrap();
        assert!(err.starts_with("Invalid address"));
    }

    #[tokio::test]
    async fn server_starts_serves_and_stops() {
        let dir = tempfile::tempdir().unwrap();
        let mut handle = start(test_state(dir.path()), "127.0.0.1", 0).await.unwrap();
        assert!(handle.is_running());
        let addr = handle.local_addr().unwrap();

        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET /status HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut response = String::new();
        tokio::time::timeout(Duration::from_secs(5), stream.read_to_string(&mut response))
            .await
            .unwrap()
            .unwrap();
        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.contains(r#""status":"not ready""#));

        handle.stop().await;
        assert!(!handle.is_running());
    }
}
