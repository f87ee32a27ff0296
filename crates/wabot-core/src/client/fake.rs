//! Scripted in-memory client for tests.
//!
//! The factory records every construct/send/destroy call in order, remembers
//! the event sink of each generation so tests can play lifecycle events, and
//! can be told to fail constructs, sends or destroys.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use super::{ChatId, ClientError, ClientEvent, ClientFactory, EventSink, MessagingClient};
use crate::storage::SessionStorage;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Construct {
        generation: u64,
    },
    Send {
        generation: u64,
        chat_id: String,
        body: String,
    },
    /// `storage_present` records whether the session directory still
    /// existed when destroy ran.
    Destroy {
        generation: u64,
        storage_present: bool,
    },
}

#[derive(Default)]
struct Script {
    calls: Vec<Call>,
    sinks: Vec<EventSink>,
    failing_constructs: u32,
    send_error: Option<ClientError>,
    destroy_error: Option<ClientError>,
    destroy_delay: Duration,
}

#[derive(Clone, Default)]
pub struct FakeFactory {
    script: Arc<Mutex<Script>>,
}

impl FakeFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Play an event from the most recently constructed client.
    pub fn emit(&self, event: ClientEvent) -> bool {
        let sink = self.script.lock().unwrap().sinks.last().cloned();
        sink.map(|s| s.emit(event)).unwrap_or(false)
    }

    /// Play an event from a specific generation (e.g. a destroyed client).
    pub fn emit_from(&self, generation: u64, event: ClientEvent) -> bool {
        let sink = self
            .script
            .lock()
            .unwrap()
            .sinks
            .iter()
            .find(|s| s.generation() == generation)
            .cloned();
        sink.map(|s| s.emit(event)).unwrap_or(false)
    }

    pub fn calls(&self) -> Vec<Call> {
        self.script.lock().unwrap().calls.clone()
    }

    pub fn constructions(&self) -> usize {
        self.count(|c| matches!(c, Call::Construct { .. }))
    }

    pub fn destroys(&self) -> usize {
        self.count(|c| matches!(c, Call::Destroy { .. }))
    }

    pub fn sends(&self) -> Vec<(String, String)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Send { chat_id, body, .. } => Some((chat_id, body)),
                _ => None,
            })
            .collect()
    }

    pub fn latest_generation(&self) -> Option<u64> {
        self.script
            .lock()
            .unwrap()
            .sinks
            .last()
            .map(|s| s.generation())
    }

    pub fn fail_next_constructs(&self, count: u32) {
        self.script.lock().unwrap().failing_constructs = count;
    }

    pub fn fail_sends(&self, error: ClientError) {
        self.script.lock().unwrap().send_error = Some(error);
    }

    pub fn fail_destroys(&self, error: ClientError) {
        self.script.lock().unwrap().destroy_error = Some(error);
    }

    pub fn slow_destroys(&self, delay: Duration) {
        self.script.lock().unwrap().destroy_delay = delay;
    }

    fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.script.lock().unwrap().calls.iter().filter(|c| pred(c)).count()
    }
}

#[async_trait]
impl ClientFactory for FakeFactory {
    async fn construct(
        &self,
        storage: &SessionStorage,
        events: EventSink,
    ) -> Result<Arc<dyn MessagingClient>, ClientError> {
        let mut script = self.script.lock().unwrap();
        if script.failing_constructs > 0 {
            script.failing_constructs -= 1;
            return Err(ClientError::Spawn("scripted construct failure".to_string()));
        }
        let generation = events.generation();
        script.calls.push(Call::Construct { generation });
        script.sinks.push(events);
        Ok(Arc::new(FakeClient {
            generation,
            storage: storage.clone(),
            script: Arc::clone(&self.script),
        }))
    }
}

struct FakeClient {
    generation: u64,
    storage: SessionStorage,
    script: Arc<Mutex<Script>>,
}

#[async_trait]
impl MessagingClient for FakeClient {
    async fn send_message(&self, chat_id: &ChatId, body: &str) -> Result<(), ClientError> {
        let mut script = self.script.lock().unwrap();
        script.calls.push(Call::Send {
            generation: self.generation,
            chat_id: chat_id.to_string(),
            body: body.to_string(),
        });
        match &script.send_error {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    async fn destroy(&self) -> Result<(), ClientError> {
        let delay = self.script.lock().unwrap().destroy_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let storage_present = self.storage.exists().await;
        let mut script = self.script.lock().unwrap();
        script.calls.push(Call::Destroy {
            generation: self.generation,
            storage_present,
        });
        match &script.destroy_error {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }
}
