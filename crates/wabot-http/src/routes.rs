//! Route handlers. Each maps one-to-one onto a `SessionManager` operation.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use wabot_core::{status_label, LogoutOutcome, QrState, SessionError};

use super::HttpState;

/// Request body for POST /message.
#[derive(Debug, Deserialize)]
pub struct MessageRequest {
    pub number: String,
    pub message: String,
}

/// Failure body: `{"success": false, "message": .., "error"?: ..}`.
#[derive(Serialize)]
struct FailureBody {
    success: bool,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Debug)]
pub enum ApiError {
    Session(SessionError),
    /// Body missing, not JSON, or missing fields.
    InvalidBody(String),
}

impl From<SessionError> for ApiError {
    fn from(e: SessionError) -> Self {
        ApiError::Session(e)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidBody(_) => StatusCode::BAD_REQUEST,
            ApiError::Session(e) => match e {
                SessionError::NotReady | SessionError::InvalidRecipient(_) => {
                    StatusCode::BAD_REQUEST
                }
                SessionError::Busy => StatusCode::SERVICE_UNAVAILABLE,
                SessionError::SendFailed(_)
                | SessionError::Render(_)
                | SessionError::Teardown(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    fn body(&self) -> FailureBody {
        let (message, error) = match self {
            ApiError::InvalidBody(detail) => {
                ("Invalid request body".to_string(), Some(detail.clone()))
            }
            ApiError::Session(SessionError::SendFailed(detail)) => {
                ("Failed to send message".to_string(), Some(detail.clone()))
            }
            ApiError::Session(SessionError::Render(e)) => {
                ("Failed to generate QR code".to_string(), Some(e.0.clone()))
            }
            ApiError::Session(SessionError::Teardown(detail)) => {
                ("Logout failed".to_string(), Some(detail.clone()))
            }
            ApiError::Session(e) => (e.to_string(), None),
        };
        FailureBody {
            success: false,
            message,
            error,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(self.body())).into_response()
    }
}

/// Handler for GET /status
pub async fn status(State(state): State<Arc<HttpState>>) -> Json<Value> {
    let manager = &state.manager;
    Json(json!({
        "status": status_label(manager.is_ready()),
        "phase": manager.phase(),
    }))
}

/// Handler for GET /generate_qr
pub async fn generate_qr(State(state): State<Arc<HttpState>>) -> Result<Json<Value>, ApiError> {
    match state.manager.get_qr() {
        QrState::AlreadyReady => Ok(Json(json!({
            "message": "Client is already logged in. No need to scan a QR code.",
        }))),
        QrState::Pending(payload) => {
            let qr = state
                .renderer
                .render(&payload)
                .map_err(|e| {
                    log::error!("{}", e);
                    SessionError::from(e)
                })?;
            Ok(Json(json!({
                "message": "Scan this QR code to log in.",
                "qr": qr,
            })))
        }
        QrState::NotAvailable => Ok(Json(json!({
            "message": "QR code not available yet, please wait a moment.",
        }))),
    }
}

/// Handler for POST /message
pub async fn send_message(
    State(state): State<Arc<HttpState>>,
    body: Result<Json<MessageRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(request) = body.map_err(|rejection| ApiError::InvalidBody(rejection.body_text()))?;

    state
        .manager
        .send_message(&request.number, &request.message)
        .await?;
    Ok(Json(json!({
        "success": true,
        "message": "Message sent.",
    })))
}

/// Handler for GET /logout
pub async fn logout(State(state): State<Arc<HttpState>>) -> Result<Json<Value>, ApiError> {
    let message = match state.manager.logout().await? {
        LogoutOutcome::NotLoggedIn => "Client is not logged in. Use /generate_qr to log in.",
        LogoutOutcome::LoggedOut => "Client logged out and session removed.",
    };
    Ok(Json(json!({ "message": message })))
}

// ============================================================================
// TESTS
// ============================================================================
