//! Keyed, cancellable delayed tasks.
//!
//! Scheduling under a key that already has a pending task aborts the older
//! one, so a superseding reset replaces a stale reinitialisation instead of
//! racing it. A task that has started running is never aborted.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;

type TaskMap = Arc<Mutex<HashMap<String, (u64, JoinHandle<()>)>>>;

#[derive(Default)]
pub struct DelayedTasks {
    tasks: TaskMap,
    next_token: AtomicU64,
}

impl DelayedTasks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `task` after `delay`, replacing any pending task under `key`.
    ///
    /// Returns true when a pending task was superseded.
    pub fn schedule<F>(&self, key: impl Into<String>, delay: Duration, task: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let key = key.into();
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);

        // Hold the map while spawning so the task cannot deregister before
        // it was registered.
        let mut tasks = self.tasks.lock().unwrap();
        let registry = Arc::clone(&self.tasks);
        let task_key = key.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let mut tasks = registry.lock().unwrap();
                if tasks.get(&task_key).map(|(t, _)| *t) == Some(token) {
                    tasks.remove(&task_key);
                }
            }
            task.await;
        });

        match tasks.insert(key.clone(), (token, handle)) {
            Some((_, stale)) => {
                stale.abort();
                log::debug!("Superseded pending task {}", key);
                true
            }
            None => false,
        }
    }

    /// Cancel the pending task under `key`. Returns false if none was pending.
    pub fn cancel(&self, key: &str) -> bool {
        match self.tasks.lock().unwrap().remove(key) {
            Some((_, handle)) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn is_pending(&self, key: &str) -> bool {
        self.tasks.lock().unwrap().contains_key(key)
    }

    pub fn pending_count(&self) -> usize {
        self.tasks.lock().unwrap().len()
    }

    /// Cancel everything still waiting. Returns how many tasks were cancelled.
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<_> = self.tasks.lock().unwrap().drain().collect();
        for (_, (_, handle)) in &drained {
            handle.abort();
        }
        drained.len()
    }
}

impl Drop for DelayedTasks {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
