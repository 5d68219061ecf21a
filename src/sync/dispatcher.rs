//! Webhook dispatch.
//!
//! One invocation per inbound delivery, after the HTTP layer has verified
//! the shared token: normalize the body, consult the idempotency guard,
//! reconcile, broadcast, and assemble the response body. Any step may
//! short-circuit to an error response; a dedup rejection short-circuits to
//! a success acknowledgment without touching the store.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{Value, json};
use tracing::info;

use super::broadcast::{BroadcastRegistry, PushMessage};
use super::dedup::DedupGuard;
use super::event::CardChangeEvent;
use super::normalizer;
use super::reconciler::Reconciler;
use crate::errors::DispatchError;
use crate::notify::Notifier;
use crate::store::DbHandle;
use crate::store::models::Task;

/// Successful outcome of a dispatch, ready to serialize as the HTTP body.
#[derive(Debug)]
pub enum DispatchOutcome {
    Processed { event: CardChangeEvent, task: Task },
    Duplicate { event: CardChangeEvent },
}

impl DispatchOutcome {
    pub fn into_body(self) -> Value {
        match self {
            Self::Processed { event, task } => json!({
                "message": "webhook processed",
                "event": event.kind.as_str(),
                "card": event.external_card_id,
                "task": task,
            }),
            Self::Duplicate { event } => json!({
                "message": "duplicate delivery ignored",
                "event": event.kind.as_str(),
                "card": event.external_card_id,
            }),
        }
    }
}

pub struct Dispatcher {
    reconciler: Reconciler,
    dedup: Arc<DedupGuard>,
    registry: Arc<BroadcastRegistry>,
    notifier: Option<Notifier>,
}

impl Dispatcher {
    pub fn new(
        db: DbHandle,
        dedup: Arc<DedupGuard>,
        registry: Arc<BroadcastRegistry>,
        notifier: Option<Notifier>,
    ) -> Self {
        Self {
            reconciler: Reconciler::new(db),
            dedup,
            registry,
            notifier,
        }
    }

    pub async fn dispatch(&self, body: &Value) -> Result<DispatchOutcome, DispatchError> {
        let event = normalizer::normalize(body, Utc::now())?;

        let key = event.dedup_key();
        if !self.dedup.should_process(&key) {
            info!(event = %event.kind, card = %event.external_card_id, "duplicate delivery acknowledged");
            return Ok(DispatchOutcome::Duplicate { event });
        }

        let task = self.reconciler.reconcile(&event).await?;
        // only a fully persisted delivery counts as processed; a store
        // failure must leave the key eligible for upstream redelivery
        self.dedup.mark_processed(&key);

        self.registry.publish(
            task.user_id,
            &PushMessage::TaskUpdated {
                task: task.clone(),
                event: event.kind.as_str().to_string(),
                timestamp: Utc::now(),
            },
        );

        if let Some(notifier) = &self.notifier {
            notifier.spawn_task_event("taskSync", &task, &event.actor_email, None);
        }

        info!(
            event = %event.kind,
            card = %event.external_card_id,
            task = task.id,
            list = %event.list_name,
            "webhook delivery reconciled"
        );
        Ok(DispatchOutcome::Processed { event, task })
    }
}
