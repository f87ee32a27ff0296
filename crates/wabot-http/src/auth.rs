//! Bearer token gate.
//!
//! Tokens come from `Authorization: Bearer <token>`. WebSocket clients cannot
//! set headers, so `/ws/` paths also accept `?token=<token>`.
//!
//! A missing token is 401, a wrong one is 403. With no token configured every
//! request passes.

use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use std::sync::Arc;

use super::HttpState;

const MISSING_TOKEN: &str = "Unauthorized: No token provided";
const INVALID_TOKEN: &str = "Forbidden: Invalid token";

/// Extract bearer token from the Authorization header.
///
/// Returns None if the header is missing, malformed, or uses another scheme.
fn extract_bearer_token<B>(req: &axum::http::Request<B>) -> Option<&str> {
    req.headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
}

/// Extract `token` from the query string of a WebSocket path.
fn extract_query_token<B>(req: &axum::http::Request<B>) -> Option<&str> {
    if !req.uri().path().starts_with("/ws/") {
        return None;
    }
    req.uri().query().and_then(|query| {
        query.split('&').find_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            (key == "token").then_some(value)
        })
    })
}

pub async fn auth_middleware(
    State(state): State<Arc<HttpState>>,
    req: Request,
    next: Next,
) -> Response {
    if state.auth_token.is_none() {
        return next.run(req).await;
    }

    let token = extract_bearer_token(&req).or_else(|| extract_query_token(&req));
    match token {
        None => reject(StatusCode::UNAUTHORIZED, MISSING_TOKEN),
        Some(token) if !state.validate_token(token) => {
            log::warn!("Rejected request to {} with invalid token", req.uri().path());
            reject(StatusCode::FORBIDDEN, INVALID_TOKEN)
        }
        Some(_) => next.run(req).await,
    }
}

fn reject(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "message": message }))).into_response()
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_bearer_token_valid() {
        let req = Request::builder()
            .header("Authorization", "Bearer test-token-123")
            .body(())
            .unwrap();
        assert_eq!(extract_bearer_token(&req), Some("test-token-123"));
    }

    #[test]
    fn extract_bearer_token_missing() {
        let req = Request::builder().body(()).unwrap();
        assert_eq!(extract_bearer_token(&req), None);
    }

    #[test]
    fn extract_bearer_token_wrong_scheme() {
        let req = Request::builder()
            .header("Authorization", "Basic dXNlcjpwYXNz")
            .body(())
            .unwrap();
        assert_eq!(extract_bearer_token(&req), None);
    }

    #[test]
    fn extract_query_token_on_websocket_path() {
        let req = Request::builder()
            .uri("/ws/events?foo=bar&token=my-token&baz=qux")
            .body(())
            .unwrap();
        assert_eq!(extract_query_token(&req), Some("my-token"));
    }

    #[test]
    fn extract_query_token_ignored_on_rest_paths() {
        let req = Request::builder()
            .uri("/logout?token=my-token")
            .body(())
            .unwrap();
        assert_eq!(extract_query_token(&req), None);
    }

    #[test]
    fn extract_query_token_missing() {
        let req = Request::builder()
            .uri("/ws/events?foo=bar")
            .body(())
            .unwrap();
        assert_eq!(extract_query_token(&req), None);
    }
}
