//! Session lifecycle state and its transition function.
//!
//! `transition` is pure: given the current state, a client event and the
//! recovery policy it returns the next state plus the side effects the
//! manager must carry out. No I/O happens here.

use serde::{Deserialize, Serialize};

use super::policy::RecoveryPolicy;
use crate::client::ClientEvent;

/// Lifecycle phase of the single session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// No QR or ready signal seen from the current client (or no client yet).
    Uninitialized,
    AwaitingQr,
    Ready,
    /// Teardown in progress; no new client may be constructed.
    Resetting,
}

/// Externally visible readiness, derived from the phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Readiness {
    NotReady,
    AwaitingQr,
    Ready,
}

/// Side effects requested by a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// Destroy the client, then quarantine and later purge the storage.
    ResetSession,
    /// Destroy the client but keep the storage (credentials still valid).
    DetachClient,
    /// Construct a fresh client after the settling delay.
    ScheduleReinit,
}

/// Phase plus the QR payload awaiting a scan.
///
/// The QR can only be set together with `Phase::AwaitingQr`, so a pending
/// QR outside that phase is unrepresentable through this API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    phase: Phase,
    pending_qr: Option<String>,
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            phase: Phase::Uninitialized,
            pending_qr: None,
        }
    }

    pub fn awaiting_qr(payload: impl Into<String>) -> Self {
        Self {
            phase: Phase::AwaitingQr,
            pending_qr: Some(payload.into()),
        }
    }

    pub fn with_phase(phase: Phase) -> Self {
        Self {
            phase,
            pending_qr: None,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn pending_qr(&self) -> Option<&str> {
        self.pending_qr.as_deref()
    }

    pub fn readiness(&self) -> Readiness {
        match self.phase {
            Phase::Ready => Readiness::Ready,
            Phase::AwaitingQr => Readiness::AwaitingQr,
            Phase::Uninitialized | Phase::Resetting => Readiness::NotReady,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.phase == Phase::Ready
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

/// Compute the next state and effects for a client event.
pub fn transition(
    state: &SessionState,
    event: &ClientEvent,
    policy: &RecoveryPolicy,
) -> (SessionState, Vec<Effect>) {
    let unchanged = || (state.clone(), Vec::new());

    // The client is being torn down; nothing it says matters any more and
    // a second reset must not be stacked on the first.
    if state.phase == Phase::Resetting {
        return unchanged();
    }

    match event {
        ClientEvent::Ready => (SessionState::with_phase(Phase::Ready), Vec::new()),
        ClientEvent::Qr { payload } => (SessionState::awaiting_qr(payload.as_str()), Vec::new()),
        ClientEvent::ChangeState { .. } => unchanged(),
        ClientEvent::Disconnected { reason } if policy.requires_reset(reason) => (
            SessionState::with_phase(Phase::Resetting),
            vec![Effect::ResetSession, Effect::ScheduleReinit],
        ),
        ClientEvent::Disconnected { .. } => unchanged(),
        ClientEvent::AuthFailure { .. } => (
            SessionState::with_phase(Phase::Resetting),
            vec![Effect::ResetSession, Effect::ScheduleReinit],
        ),
        ClientEvent::Error { message } if policy.is_transient(message) => (
            SessionState::with_phase(Phase::Resetting),
            vec![Effect::DetachClient, Effect::ScheduleReinit],
        ),
        ClientEvent::Error { .. } => unchanged(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RecoveryPolicy {
        RecoveryPolicy::default()
    }

    fn qr(payload: &str) -> ClientEvent {
        ClientEvent::Qr {
            payload: payload.to_string(),
        }
    }

    fn disconnected(reason: &str) -> ClientEvent {
        ClientEvent::Disconnected {
            reason: reason.to_string(),
        }
    }

    #[test]
    fn starts_uninitialized() {
        let state = SessionState::new();
        assert_eq!(state.phase(), Phase::Uninitialized);
        assert_eq!(state.readiness(), Readiness::NotReady);
        assert_eq!(state.pending_qr(), None);
    }

    #[test]
    fn qr_moves_to_awaiting_qr() {
        let (next, effects) = transition(&SessionState::new(), &qr("ABC123"), &policy());
        assert_eq!(next.phase(), Phase::AwaitingQr);
        assert_eq!(next.pending_qr(), Some("ABC123"));
        assert_eq!(next.readiness(), Readiness::AwaitingQr);
        assert!(effects.is_empty());
    }

    #[test]
    fn ready_clears_qr() {
        let (next, effects) = transition(
            &SessionState::awaiting_qr("ABC123"),
            &ClientEvent::Ready,
            &policy(),
        );
        assert!(next.is_ready());
        assert_eq!(next.pending_qr(), None);
        assert!(effects.is_empty());
    }

    #[test]
    fn qr_while_ready_drops_readiness() {
        let ready = SessionState::with_phase(Phase::Ready);
        let (next, _) = transition(&ready, &qr("NEW"), &policy());
        assert!(!next.is_ready());
        assert_eq!(next.pending_qr(), Some("NEW"));
    }

    #[test]
    fn reset_disconnects_trigger_full_reset() {
        for reason in ["NAVIGATION", "LOGOUT"] {
            for start in [
                SessionState::new(),
                SessionState::awaiting_qr("x"),
                SessionState::with_phase(Phase::Ready),
            ] {
                let (next, effects) = transition(&start, &disconnected(reason), &policy());
                assert_eq!(next.phase(), Phase::Resetting);
                assert_eq!(next.pending_qr(), None);
                assert_eq!(effects, vec![Effect::ResetSession, Effect::ScheduleReinit]);
            }
        }
    }

    #[test]
    fn other_disconnects_are_left_to_the_client() {
        let ready = SessionState::with_phase(Phase::Ready);
        let (next, effects) = transition(&ready, &disconnected("CONFLICT"), &policy());
        assert_eq!(next, ready);
        assert!(effects.is_empty());
    }

    #[test]
    fn auth_failure_always_resets() {
        let (next, effects) = transition(
            &SessionState::awaiting_qr("x"),
            &ClientEvent::AuthFailure {
                message: "restore failed".into(),
            },
            &policy(),
        );
        assert_eq!(next.phase(), Phase::Resetting);
        assert_eq!(effects, vec![Effect::ResetSession, Effect::ScheduleReinit]);
    }

    #[test]
    fn transient_error_detaches_without_wiping() {
        let (next, effects) = transition(
            &SessionState::with_phase(Phase::Ready),
            &ClientEvent::Error {
                message: "Execution context was destroyed, most likely because of a navigation"
                    .into(),
            },
            &policy(),
        );
        assert_eq!(next.phase(), Phase::Resetting);
        assert_eq!(effects, vec![Effect::DetachClient, Effect::ScheduleReinit]);
    }

    #[test]
    fn unknown_error_is_ignored() {
        let ready = SessionState::with_phase(Phase::Ready);
        let (next, effects) = transition(
            &ready,
            &ClientEvent::Error {
                message: "Evaluation failed".into(),
            },
            &policy(),
        );
        assert_eq!(next, ready);
        assert!(effects.is_empty());
    }

    #[test]
    fn change_state_is_informational() {
        let state = SessionState::awaiting_qr("x");
        let (next, effects) = transition(
            &state,
            &ClientEvent::ChangeState {
                state: "CONNECTED".into(),
            },
            &policy(),
        );
        assert_eq!(next, state);
        assert!(effects.is_empty());
    }

    #[test]
    fn events_during_reset_are_ignored() {
        let resetting = SessionState::with_phase(Phase::Resetting);
        for event in [
            qr("late"),
            ClientEvent::Ready,
            disconnected("LOGOUT"),
            ClientEvent::AuthFailure {
                message: String::new(),
            },
            ClientEvent::Error {
                message: "Execution context was destroyed".into(),
            },
        ] {
            let (next, effects) = transition(&resetting, &event, &policy());
            assert_eq!(next.phase(), Phase::Resetting);
            assert!(effects.is_empty());
        }
    }

    #[test]
    fn pending_qr_only_while_awaiting() {
        let events = [
            qr("a"),
            ClientEvent::Ready,
            qr("b"),
            disconnected("LOGOUT"),
            qr("c"),
            ClientEvent::Error {
                message: "bridge process exited with code 1".into(),
            },
        ];
        let mut state = SessionState::new();
        for event in &events {
            state = transition(&state, event, &policy()).0;
            assert_eq!(
                state.pending_qr().is_some(),
                state.phase() == Phase::AwaitingQr
            );
        }
    }

    #[test]
    fn phase_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&Phase::AwaitingQr).unwrap(),
            "\"awaiting_qr\""
        );
        assert_eq!(
            serde_json::to_string(&Readiness::NotReady).unwrap(),
            "\"not_ready\""
        );
    }
}
