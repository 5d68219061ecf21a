//! Live client push.
//!
//! Holds one output sink per connected user and fans task-state messages
//! out to the matching sink. Delivery is best-effort: a closed sink is
//! evicted on the first failed send, a full one drops the message instead
//! of blocking the webhook path. Clients that miss messages re-fetch the
//! task list on reconnect.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::store::models::Task;

/// Push envelope streamed to connected clients, one JSON object per line.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PushMessage {
    Connected {
        user_id: i64,
    },
    TaskUpdated {
        task: Task,
        event: String,
        timestamp: DateTime<Utc>,
    },
    TaskDeleted {
        task: Task,
        event: String,
        timestamp: DateTime<Utc>,
    },
}

impl PushMessage {
    /// Serialize to one newline-terminated JSON line.
    pub fn to_line(&self) -> Option<String> {
        match serde_json::to_string(self) {
            Ok(json) => Some(format!("{json}\n")),
            Err(e) => {
                error!(error = %e, "failed to serialize push message");
                None
            }
        }
    }
}

/// One live sink per user; a second registration replaces the first.
pub struct BroadcastRegistry {
    conns: Mutex<HashMap<i64, mpsc::Sender<String>>>,
}

impl BroadcastRegistry {
    pub fn new() -> Self {
        Self {
            conns: Mutex::new(HashMap::new()),
        }
    }

    pub fn register(&self, user_id: i64, sink: mpsc::Sender<String>) {
        let replaced = self.lock().insert(user_id, sink).is_some();
        debug!(user_id, replaced, "client sink registered");
    }

    pub fn unregister(&self, user_id: i64) {
        if self.lock().remove(&user_id).is_some() {
            debug!(user_id, "client sink unregistered");
        }
    }

    /// Send to the sink registered for `user_id`; silent no-op when there
    /// is none (the UI falls back to polling).
    pub fn publish(&self, user_id: i64, message: &PushMessage) {
        let Some(line) = message.to_line() else { return };
        let mut conns = self.lock();
        if let Some(sink) = conns.get(&user_id)
            && !try_deliver(sink, line, user_id)
        {
            conns.remove(&user_id);
        }
    }

    pub fn publish_all(&self, message: &PushMessage) {
        let Some(line) = message.to_line() else { return };
        let mut conns = self.lock();
        let dead: Vec<i64> = conns
            .iter()
            .filter(|&(user_id, sink)| !try_deliver(sink, line.clone(), *user_id))
            .map(|(user_id, _)| *user_id)
            .collect();
        for user_id in dead {
            conns.remove(&user_id);
        }
    }

    pub fn connection_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<i64, mpsc::Sender<String>>> {
        self.conns.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for BroadcastRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Returns false only when the sink is gone and should be evicted.
fn try_deliver(sink: &mpsc::Sender<String>, line: String, user_id: i64) -> bool {
    match sink.try_send(line) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Full(_)) => {
            // slow client: drop the message, keep the connection
            warn!(user_id, "client sink full, dropping push message");
            true
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            debug!(user_id, "client sink closed, evicting");
            false
        }
    }
}
