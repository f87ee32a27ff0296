//! # wabot-core
//!
//! Session lifecycle core for wabot, a small HTTP gateway around a single
//! WhatsApp Web session.
//!
//! This crate is framework-agnostic and is used by:
//! - the HTTP control surface (`wabot-http`)
//! - the daemon binary (`wabot-daemon`)
//!
//! ## Key Concepts
//!
//! - **Session**: the one logged-in messaging account this process serves
//! - **MessagingClient**: the opaque protocol client (a spawned bridge process in production)
//! - **SessionManager**: owns the client handle and drives the recovery state machine

pub mod client;
pub mod event_bus;
pub mod logging;
pub mod qr;
pub mod session;
pub mod storage;

// Re-export commonly used types
pub use client::{ChatId, ClientError, ClientEvent, ClientFactory, MessagingClient};
pub use event_bus::EventBus;
pub use qr::{QrRenderer, RenderError, SvgQrRenderer};
pub use session::{
    status_label, InitOutcome, LogoutOutcome, Phase, QrState, Readiness, RecoveryPolicy,
    SessionError, SessionManager,
};
pub use storage::SessionStorage;
