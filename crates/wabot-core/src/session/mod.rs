//! Lifecycle of the single messaging session.
//!
//! `state` holds the pure transition function, `policy` decides which faults
//! wipe the session, `scheduler` arms cancellable recovery timers and
//! `manager` ties them to a live client and the session storage.

mod manager;
mod policy;
mod scheduler;
mod state;

pub use manager::{
    status_label, InitOutcome, LogoutOutcome, QrState, SessionError, SessionManager,
    SessionManagerBuilder,
};
pub use policy::{PolicyError, RecoveryPolicy, DEFAULT_RESET_REASONS, DEFAULT_TRANSIENT_SIGNATURES};
pub use scheduler::DelayedTasks;
pub use state::{transition, Effect, Phase, Readiness, SessionState};
