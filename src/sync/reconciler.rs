//! Task reconciliation.
//!
//! Finds or creates the local task for a canonical card event and applies
//! the derived classification. Matching is by `(owner, external id)` with
//! a title fallback for tasks that predate external-id tracking; the first
//! sync to such a task backfills its external id.
//!
//! Reconciliation is idempotent: applying the same event twice yields the
//! same stored state, which is what makes the dedup guard's loose
//! guarantees acceptable.

use std::time::Duration;

use tokio::time::timeout;
use tracing::{debug, info};

use super::classify::{self, Classification};
use super::event::{CardChangeEvent, EventKind};
use crate::errors::ReconcileError;
use crate::store::models::{Task, TaskPriority, User};
use crate::store::{DbHandle, NewTask, TaskDb, TaskPatch};

/// Upper bound on any single store call; a webhook delivery must not hang
/// waiting on the database. Upstream redelivers on the resulting 5xx.
const STORE_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Reconciler {
    db: DbHandle,
}

impl Reconciler {
    pub fn new(db: DbHandle) -> Self {
        Self { db }
    }

    /// Apply a canonical event to the local task table and return the
    /// resulting task state.
    pub async fn reconcile(&self, event: &CardChangeEvent) -> Result<Task, ReconcileError> {
        let owner = self.resolve_owner(event).await?;

        let external_id = event.external_card_id.clone();
        let owner_id = owner.id;
        let mut existing = self
            .call(move |db| db.find_task_by_external_id(owner_id, &external_id))
            .await?;
        if existing.is_none() && !event.card_name.is_empty() {
            let title = event.card_name.clone();
            existing = self
                .call(move |db| db.find_task_by_title(owner_id, &title))
                .await?;
        }

        match existing {
            Some(task) => self.apply_to_existing(event, task).await,
            None => self.create_fresh(event, &owner).await,
        }
    }

    /// Resolve the local user for the event's actor, synthesizing an
    /// account on first sighting. Synthesized accounts have no API token
    /// and can never authenticate.
    async fn resolve_owner(&self, event: &CardChangeEvent) -> Result<User, ReconcileError> {
        let email = event.actor_email.clone();
        let name = event.actor_name.clone();
        self.call(move |db| db.find_or_create_user_by_email(&email, &name))
            .await
    }

    async fn apply_to_existing(
        &self,
        event: &CardChangeEvent,
        task: Task,
    ) -> Result<Task, ReconcileError> {
        let mut patch = TaskPatch {
            external_id: match task.external_id {
                None => Some(event.external_card_id.clone()),
                Some(_) => None,
            },
            ..TaskPatch::default()
        };

        match event.kind {
            // a label event carries no list semantics worth trusting over
            // the task's current state: only the tag changes
            EventKind::LabelAdded => {
                patch.status = Some(task.status);
                patch.priority = Some(task.priority);
                patch.label = event.label_name.as_deref().map(classify::map_label);
            }
            _ => {
                let classification =
                    classify::classify(&event.list_name, event.label_name.as_deref(), task.priority);
                patch.status = Some(classification.status);
                patch.priority = Some(classification.priority);
                patch.label = Some(classification.label);
            }
        }

        if event.kind.carries_card_content() {
            if !event.card_name.is_empty() {
                patch.title = Some(event.card_name.clone());
            }
            patch.description = event.card_description.clone();
            patch.deadline = event.due_date.clone();
        }

        let task_id = task.id;
        let updated = self
            .call(move |db| db.update_task(task_id, &patch))
            .await?
            .ok_or_else(|| {
                ReconcileError::Store(anyhow::anyhow!("task {} vanished during reconcile", task_id))
            })?;
        debug!(task = updated.id, card = %event.external_card_id, "task reconciled");
        Ok(updated)
    }

    async fn create_fresh(
        &self,
        event: &CardChangeEvent,
        owner: &User,
    ) -> Result<Task, ReconcileError> {
        let Classification {
            priority,
            status,
            label,
        } = classify::classify(
            &event.list_name,
            event.label_name.as_deref(),
            TaskPriority::P2,
        );
        let new = NewTask {
            title: event.card_name.clone(),
            description: event.card_description.clone(),
            status,
            priority,
            label: Some(label),
            deadline: event.due_date.clone(),
            external_id: Some(event.external_card_id.clone()),
        };

        let owner_id = owner.id;
        match self.call(move |db| db.create_task(owner_id, &new)).await {
            Ok(task) => {
                info!(task = task.id, card = %event.external_card_id, owner = %owner.email, "task created from board card");
                Ok(task)
            }
            // a concurrent delivery for the same new card won the insert;
            // pick up its row and apply this event as an update
            Err(ReconcileError::Store(e)) if is_unique_violation(&e) => {
                let external_id = event.external_card_id.clone();
                let raced = self
                    .call(move |db| db.find_task_by_external_id(owner_id, &external_id))
                    .await?
                    .ok_or(ReconcileError::Store(e))?;
                self.apply_to_existing(event, raced).await
            }
            Err(e) => Err(e),
        }
    }

    async fn call<F, R>(&self, f: F) -> Result<R, ReconcileError>
    where
        F: FnOnce(&TaskDb) -> anyhow::Result<R> + Send + 'static,
        R: Send + 'static,
    {
        match timeout(STORE_TIMEOUT, self.db.call(f)).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(ReconcileError::Store(e)),
            Err(_) => Err(ReconcileError::StoreTimeout(STORE_TIMEOUT)),
        }
    }
}

fn is_unique_violation(e: &anyhow::Error) -> bool {
    e.to_string().contains("UNIQUE constraint failed")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::models::TaskStatus;
    use chrono::Utc;

    fn handle() -> DbHandle {
        DbHandle::new(TaskDb::new_in_memory().unwrap())
    }

    fn card_event(kind: EventKind, list_name: &str) -> CardChangeEvent {
        CardChangeEvent {
            kind,
            external_card_id: "card-1".to_string(),
            card_name: "Fix heater".to_string(),
            card_description: Some("Heater is dripping".to_string()),
            due_date: Some("2025-10-13T10:00:00.000Z".to_string()),
            list_name: list_name.to_string(),
            label_name: None,
            label_color: None,
            actor_email: "faal@example.org".to_string(),
            actor_name: "Matin Faal".to_string(),
            delivery_stamp: "stamp-1".to_string(),
            received_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_first_sighting_creates_task_and_user() {
        let db = handle();
        let reconciler = Reconciler::new(db.clone());

        let task = reconciler
            .reconcile(&card_event(EventKind::CardCreated, "Priority 1"))
            .await
            .unwrap();

        assert_eq!(task.title, "Fix heater");
        assert_eq!(task.priority, TaskPriority::P1);
        assert_eq!(task.status, TaskStatus::InProgress);
        assert_eq!(task.external_id.as_deref(), Some("card-1"));

        let owner = db
            .call(|db| db.get_user_by_email("faal@example.org"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(owner.id, task.user_id);
        assert!(owner.api_token.is_none());
    }

    #[tokio::test]
    async fn test_reconcile_is_idempotent() {
        let db = handle();
        let reconciler = Reconciler::new(db.clone());
        let event = card_event(EventKind::CardUpdated, "Priority 2");

        let first = reconciler.reconcile(&event).await.unwrap();
        let second = reconciler.reconcile(&event).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(first.priority, second.priority);
        assert_eq!(db.call(|db| db.count_tasks()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_last_list_wins() {
        let db = handle();
        let reconciler = Reconciler::new(db.clone());

        for list in ["Priority 2", "Priority 1", "Priority 3"] {
            reconciler
                .reconcile(&card_event(EventKind::CardUpdated, list))
                .await
                .unwrap();
        }

        let task = db
            .call(|db| db.find_task_by_external_id(1, "card-1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(task.priority, TaskPriority::P3);
        assert_eq!(db.call(|db| db.count_tasks()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_title_fallback_backfills_external_id() {
        let db = handle();
        let owner = db
            .call(|db| db.find_or_create_user_by_email("faal@example.org", "Matin"))
            .await
            .unwrap();
        db.call(move |db| {
            db.create_task(
                owner.id,
                &NewTask {
                    title: "Fix heater".to_string(),
                    description: None,
                    status: TaskStatus::Open,
                    priority: TaskPriority::P2,
                    label: None,
                    deadline: None,
                    external_id: None,
                },
            )
        })
        .await
        .unwrap();

        let reconciler = Reconciler::new(db.clone());
        let task = reconciler
            .reconcile(&card_event(EventKind::CardUpdated, "Priority 1"))
            .await
            .unwrap();

        assert_eq!(task.external_id.as_deref(), Some("card-1"));
        assert_eq!(db.call(|db| db.count_tasks()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_move_event_does_not_stomp_content() {
        let db = handle();
        let reconciler = Reconciler::new(db.clone());
        reconciler
            .reconcile(&card_event(EventKind::CardCreated, "Priority 2"))
            .await
            .unwrap();

        let mut move_event = card_event(EventKind::CardMoved, "Priority 1");
        move_event.card_description = None;
        move_event.due_date = None;

        let task = reconciler.reconcile(&move_event).await.unwrap();
        assert_eq!(task.priority, TaskPriority::P1);
        assert_eq!(task.status, TaskStatus::InProgress);
        // content fields from the original create survive the move
        assert_eq!(task.description.as_deref(), Some("Heater is dripping"));
        assert_eq!(task.deadline.as_deref(), Some("2025-10-13T10:00:00.000Z"));
    }

    #[tokio::test]
    async fn test_label_event_updates_only_the_tag() {
        let db = handle();
        let reconciler = Reconciler::new(db.clone());
        reconciler
            .reconcile(&card_event(EventKind::CardCreated, "Priority 3"))
            .await
            .unwrap();

        let mut label_event = card_event(EventKind::LabelAdded, "Priority 1");
        label_event.label_name = Some("urgent".to_string());

        let task = reconciler.reconcile(&label_event).await.unwrap();
        assert_eq!(task.label.as_deref(), Some("Urgent"));
        assert_eq!(task.priority, TaskPriority::P3);
        assert_eq!(task.status, TaskStatus::Open);
    }

    #[tokio::test]
    async fn test_unknown_shape_gets_default_classification() {
        let db = handle();
        let reconciler = Reconciler::new(db.clone());

        let task = reconciler
            .reconcile(&card_event(EventKind::Unknown, "Unknown"))
            .await
            .unwrap();
        assert_eq!(task.priority, TaskPriority::P2);
        assert_eq!(task.status, TaskStatus::Open);
    }
}
