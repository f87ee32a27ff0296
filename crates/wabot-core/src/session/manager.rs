//! SessionManager - owns the one client handle and drives recovery.
//!
//! Locking:
//! - `state` (phase + pending QR) sits behind a plain mutex and is never held
//!   across an await, so status reads never wait on teardown I/O.
//! - `client` sits behind an async mutex that initialise, reset, logout and
//!   shutdown hold for their whole duration. Two constructions can therefore
//!   never interleave, and storage is only touched after the handle was
//!   destroyed under the same guard.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use serde_json::json;
use thiserror::Error;
use tokio::sync::mpsc;

use super::policy::RecoveryPolicy;
use super::scheduler::DelayedTasks;
use super::state::{transition, Effect, Phase, Readiness, SessionState};
use crate::client::{ChatId, ClientError, ClientEvent, ClientFactory, EventSink, MessagingClient};
use crate::event_bus::{EventBus, SESSION_QR, SESSION_RESET, SESSION_STATE};
use crate::qr::RenderError;
use crate::storage::{remove_quarantined, SessionStorage};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Client is not logged in yet. Scan the QR code first.")]
    NotReady,

    #[error("Session is being reset. Try again shortly.")]
    Busy,

    #[error("Invalid recipient: {0}")]
    InvalidRecipient(String),

    #[error("Failed to send message: {0}")]
    SendFailed(String),

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error("Session teardown failed: {0}")]
    Teardown(String),
}

/// Result of `initialize()`. Only `Started` constructed a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitOutcome {
    Started,
    AlreadyActive,
    Resetting,
    Stopped,
    /// Construction failed; a retry was scheduled.
    Failed(ClientError),
}

/// Three-way answer for QR requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QrState {
    AlreadyReady,
    Pending(String),
    NotAvailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogoutOutcome {
    NotLoggedIn,
    LoggedOut,
}

struct ActiveClient {
    generation: u64,
    handle: Arc<dyn MessagingClient>,
}

pub struct SessionManagerBuilder {
    storage: SessionStorage,
    factory: Arc<dyn ClientFactory>,
    policy: RecoveryPolicy,
    event_bus: Option<Arc<EventBus>>,
}

impl SessionManagerBuilder {
    pub fn policy(mut self, policy: RecoveryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(bus);
        self
    }

    /// Build the manager and start its event dispatcher.
    ///
    /// Must be called inside a tokio runtime. No client is constructed until
    /// `initialize()` is called.
    pub fn build(self) -> Arc<SessionManager> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let manager = Arc::new(SessionManager {
            storage: self.storage,
            factory: self.factory,
            policy: self.policy,
            event_bus: self.event_bus.unwrap_or_default(),
            state: Mutex::new(SessionState::new()),
            client: tokio::sync::Mutex::new(None),
            next_generation: AtomicU64::new(1),
            live_generation: AtomicU64::new(0),
            tasks: DelayedTasks::new(),
            quarantined: Mutex::new(Vec::new()),
            events_tx,
            stopped: AtomicBool::new(false),
        });
        tokio::spawn(dispatch_events(Arc::downgrade(&manager), events_rx));
        manager
    }
}

/// Feed client events to the manager one at a time, in arrival order.
async fn dispatch_events(
    manager: Weak<SessionManager>,
    mut events: mpsc::UnboundedReceiver<(u64, ClientEvent)>,
) {
    while let Some((generation, event)) = events.recv().await {
        let Some(manager) = manager.upgrade() else {
            break;
        };
        manager.handle_event(generation, event).await;
    }
    log::debug!("Session event dispatcher stopped");
}

pub struct SessionManager {
    storage: SessionStorage,
    factory: Arc<dyn ClientFactory>,
    policy: RecoveryPolicy,
    event_bus: Arc<EventBus>,
    state: Mutex<SessionState>,
    client: tokio::sync::Mutex<Option<ActiveClient>>,
    next_generation: AtomicU64,
    /// Generation whose events are accepted; 0 when no client is live.
    live_generation: AtomicU64,
    tasks: DelayedTasks,
    /// Renamed session directories waiting for the purge timer.
    quarantined: Mutex<Vec<PathBuf>>,
    events_tx: mpsc::UnboundedSender<(u64, ClientEvent)>,
    stopped: AtomicBool,
}

impl SessionManager {
    pub fn builder(storage: SessionStorage, factory: Arc<dyn ClientFactory>) -> SessionManagerBuilder {
        SessionManagerBuilder {
            storage,
            factory,
            policy: RecoveryPolicy::default(),
            event_bus: None,
        }
    }

    pub fn storage(&self) -> &SessionStorage {
        &self.storage
    }

    pub fn policy(&self) -> &RecoveryPolicy {
        &self.policy
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    pub fn phase(&self) -> Phase {
        self.state.lock().unwrap().phase()
    }

    pub fn get_status(&self) -> Readiness {
        self.state.lock().unwrap().readiness()
    }

    pub fn is_ready(&self) -> bool {
        self.state.lock().unwrap().is_ready()
    }

    pub fn get_qr(&self) -> QrState {
        let state = self.state.lock().unwrap();
        if state.is_ready() {
            return QrState::AlreadyReady;
        }
        match state.pending_qr() {
            Some(qr) => QrState::Pending(qr.to_string()),
            None => QrState::NotAvailable,
        }
    }

    /// Whether a reinitialisation is armed but has not started yet.
    pub fn reinit_pending(&self) -> bool {
        self.tasks.is_pending(&self.reinit_key())
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Construct a client bound to the session storage, unless one exists.
    pub async fn initialize(self: &Arc<Self>) -> InitOutcome {
        if self.stopped.load(Ordering::SeqCst) {
            return InitOutcome::Stopped;
        }
        if self.phase() == Phase::Resetting {
            log::warn!("Session reset in progress, not starting a client");
            return InitOutcome::Resetting;
        }

        let mut slot = self.client.lock().await;
        if slot.is_some() {
            log::warn!("Client still active, no restart needed");
            return InitOutcome::AlreadyActive;
        }
        // A reset may have been decided while we waited for the slot; its
        // own scheduled reinit will take over.
        if self.phase() == Phase::Resetting {
            return InitOutcome::Resetting;
        }
        if self.stopped.load(Ordering::SeqCst) {
            return InitOutcome::Stopped;
        }

        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
        // Accept this generation's events before construct returns; the
        // client may report a QR while still starting up.
        self.live_generation.store(generation, Ordering::SeqCst);
        let sink = EventSink::new(generation, self.events_tx.clone());

        log::info!(
            "Starting client (generation {}) for {}, waiting for connection...",
            generation,
            self.storage.path().display()
        );
        match self.factory.construct(&self.storage, sink).await {
            Ok(handle) => {
                *slot = Some(ActiveClient { generation, handle });
                InitOutcome::Started
            }
            Err(e) => {
                self.live_generation.store(0, Ordering::SeqCst);
                drop(slot);
                log::error!("Failed to start client: {}", e);
                self.schedule_reinit(self.policy.reinit_delay);
                InitOutcome::Failed(e)
            }
        }
    }

    /// Apply one client event. Events from a client that is no longer live
    /// are dropped.
    pub async fn handle_event(self: &Arc<Self>, generation: u64, event: ClientEvent) {
        if generation != self.live_generation.load(Ordering::SeqCst) {
            log::debug!(
                "Ignoring {} from stale client generation {}",
                event.label(),
                generation
            );
            return;
        }

        match &event {
            ClientEvent::Ready => log::info!("Client logged in"),
            ClientEvent::Qr { .. } => log::info!("New QR code received"),
            ClientEvent::Disconnected { reason } => log::warn!("Client disconnected: {}", reason),
            ClientEvent::AuthFailure { message } => log::error!("Authentication failed: {}", message),
            ClientEvent::ChangeState { state } => log::info!("Connection state changed: {}", state),
            ClientEvent::Error { message } => log::error!("Client error: {}", message),
        }

        let (effects, phase_changed) = {
            let mut state = self.state.lock().unwrap();
            let (next, effects) = transition(&state, &event, &self.policy);
            let changed = next.phase() != state.phase();
            *state = next;
            (effects, changed)
        };

        if let ClientEvent::Qr { payload } = &event {
            self.event_bus.emit(SESSION_QR, &json!({ "qr": payload }));
        }
        if phase_changed {
            self.emit_state();
        }
        if !effects.is_empty() {
            log::warn!("Recovering session after {}", event.label());
            self.event_bus
                .emit(SESSION_RESET, &json!({ "trigger": event.label() }));
        }

        for effect in effects {
            match effect {
                Effect::ResetSession => self.reset_session().await,
                Effect::DetachClient => self.detach_client().await,
                Effect::ScheduleReinit => self.schedule_reinit(self.policy.reinit_delay),
            }
        }
    }

    /// Destroy the client, then move the storage aside and purge it later.
    ///
    /// Never fails: destroy and rename errors are logged so recovery can
    /// always proceed.
    pub async fn reset_session(self: &Arc<Self>) {
        log::info!("Resetting session...");
        self.set_phase(Phase::Resetting);

        let mut slot = self.client.lock().await;
        self.destroy_active(&mut slot).await;

        match self.storage.quarantine().await {
            Ok(Some(moved)) => {
                log::info!("Session directory moved to {}", moved.display());
                self.quarantined.lock().unwrap().push(moved);
                self.schedule_purge();
            }
            Ok(None) => log::debug!("No session directory to remove"),
            Err(e) => log::error!(
                "Failed to move session directory {}: {}",
                self.storage.path().display(),
                e
            ),
        }
        drop(slot);

        self.set_phase(Phase::Uninitialized);
    }

    /// Destroy the client but keep its storage.
    pub async fn detach_client(self: &Arc<Self>) {
        log::info!("Restarting client, keeping session data");
        self.set_phase(Phase::Resetting);
        let mut slot = self.client.lock().await;
        self.destroy_active(&mut slot).await;
        drop(slot);
        self.set_phase(Phase::Uninitialized);
    }

    // ------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------

    pub async fn send_message(&self, recipient: &str, body: &str) -> Result<(), SessionError> {
        match self.phase() {
            Phase::Ready => {}
            Phase::Resetting => return Err(SessionError::Busy),
            _ => return Err(SessionError::NotReady),
        }
        let chat_id = ChatId::normalize(recipient)
            .ok_or_else(|| {
                SessionError::InvalidRecipient(format!("'{}' is not a chat id", recipient.trim()))
            })?;

        let handle = {
            let slot = self.client.lock().await;
            slot.as_ref().map(|active| Arc::clone(&active.handle))
        }
        .ok_or(SessionError::NotReady)?;

        handle.send_message(&chat_id, body).await.map_err(|e| {
            log::error!("Sending to {} failed: {}", chat_id, e);
            SessionError::SendFailed(e.to_string())
        })?;
        log::info!("Message sent to {}", chat_id);
        Ok(())
    }

    /// Log out: destroy the client, delete the storage immediately and
    /// start over after the logout delay.
    ///
    /// A reinitialisation is scheduled even when teardown fails.
    pub async fn logout(self: &Arc<Self>) -> Result<LogoutOutcome, SessionError> {
        {
            let mut state = self.state.lock().unwrap();
            match state.phase() {
                Phase::Ready => *state = SessionState::with_phase(Phase::Resetting),
                Phase::Resetting => return Err(SessionError::Busy),
                _ => return Ok(LogoutOutcome::NotLoggedIn),
            }
        }
        self.emit_state();
        log::info!("Logging out...");

        // Teardown runs on its own task so it completes even if this future
        // is dropped.
        let manager = Arc::clone(self);
        match tokio::spawn(async move { manager.finish_logout().await }).await {
            Ok(result) => result,
            Err(e) => Err(SessionError::Teardown(format!("logout task failed: {}", e))),
        }
    }

    async fn finish_logout(self: &Arc<Self>) -> Result<LogoutOutcome, SessionError> {
        self.tasks.cancel(&self.reinit_key());

        let mut failures = Vec::new();
        let mut slot = self.client.lock().await;
        if let Some(active) = slot.take() {
            self.live_generation.store(0, Ordering::SeqCst);
            if let Err(e) = active.handle.destroy().await {
                log::error!("Failed to destroy client: {}", e);
                failures.push(format!("destroy: {}", e));
            }
        }
        log::info!("Deleting session directory {}", self.storage.path().display());
        if let Err(e) = self.storage.remove_now().await {
            log::error!("Failed to delete session directory: {}", e);
            failures.push(format!("delete {}: {}", self.storage.path().display(), e));
        }
        drop(slot);

        self.set_phase(Phase::Uninitialized);
        self.schedule_reinit(self.policy.logout_reinit_delay);

        if failures.is_empty() {
            log::info!("Session removed, restarting client shortly");
            Ok(LogoutOutcome::LoggedOut)
        } else {
            Err(SessionError::Teardown(failures.join("; ")))
        }
    }

    /// Stop for good: cancel timers and destroy the client. The live storage
    /// is kept so the next process start can restore the login; directories
    /// already moved aside are deleted now since their purge timer is gone.
    pub async fn shutdown(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        let cancelled = self.tasks.cancel_all();
        if cancelled > 0 {
            log::debug!("Cancelled {} pending session task(s)", cancelled);
        }
        let mut slot = self.client.lock().await;
        self.destroy_active(&mut slot).await;
        drop(slot);

        let leftovers: Vec<PathBuf> = self.quarantined.lock().unwrap().drain(..).collect();
        if !leftovers.is_empty() {
            remove_quarantined(&leftovers).await;
        }
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    async fn destroy_active(&self, slot: &mut Option<ActiveClient>) {
        let Some(active) = slot.take() else {
            return;
        };
        self.live_generation.store(0, Ordering::SeqCst);
        match active.handle.destroy().await {
            Ok(()) => log::info!("Client generation {} destroyed", active.generation),
            Err(e) => log::error!(
                "Failed to destroy client generation {}: {}",
                active.generation,
                e
            ),
        }
    }

    fn set_phase(&self, phase: Phase) {
        let changed = {
            let mut state = self.state.lock().unwrap();
            if state.phase() == phase {
                false
            } else {
                *state = SessionState::with_phase(phase);
                true
            }
        };
        if changed {
            self.emit_state();
        }
    }

    fn emit_state(&self) {
        let (phase, ready) = {
            let state = self.state.lock().unwrap();
            (state.phase(), state.is_ready())
        };
        self.event_bus.emit(
            SESSION_STATE,
            &json!({ "phase": phase, "status": status_label(ready) }),
        );
    }

    fn reinit_key(&self) -> String {
        format!("reinit:{}", self.storage.key())
    }

    fn schedule_reinit(self: &Arc<Self>, delay: Duration) {
        if self.stopped.load(Ordering::SeqCst) {
            return;
        }
        log::info!("Restarting client in {:?}", delay);
        let manager = Arc::downgrade(self);
        self.tasks.schedule(self.reinit_key(), delay, async move {
            if let Some(manager) = manager.upgrade() {
                let outcome = manager.initialize().await;
                log::debug!("Scheduled initialize: {:?}", outcome);
            }
        });
    }

    fn schedule_purge(self: &Arc<Self>) {
        let manager = Arc::downgrade(self);
        let superseded = self.tasks.schedule(
            format!("purge:{}", self.storage.key()),
            self.policy.purge_delay,
            async move {
                let Some(manager) = manager.upgrade() else {
                    return;
                };
                let paths: Vec<PathBuf> = manager.quarantined.lock().unwrap().drain(..).collect();
                remove_quarantined(&paths).await;
            },
        );
        if superseded {
            log::debug!("Pending purge folded into the new one");
        }
    }
}

/// Status string used by the control surface.
pub fn status_label(ready: bool) -> &'static str {
    if ready {
        "ready"
    } else {
        "not ready"
    }
}
