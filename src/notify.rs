//! Outbound task events for the workflow engine.
//!
//! Every task mutation — from the CRUD path or from reconciliation — can
//! emit a fire-and-forget notification to a configured webhook URL. Sends
//! run on a detached task with a bounded timeout; their outcome is only
//! observable in the logs and never affects the primary request.

use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tracing::{debug, warn};

use crate::config::BoardsyncConfig;
use crate::store::models::Task;

const SEND_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct Notifier {
    client: reqwest::Client,
    url: String,
    token: String,
}

impl Notifier {
    /// Build a notifier from configuration. Returns `None` when the sink
    /// is not configured — both the URL and the token are required, since
    /// the workflow engine rejects unauthenticated posts anyway.
    pub fn from_config(config: &BoardsyncConfig) -> Option<Self> {
        let url = config.outbound_webhook_url.clone()?;
        let token = config.outbound_webhook_token.clone()?;
        let client = reqwest::Client::builder()
            .timeout(SEND_TIMEOUT)
            .build()
            .ok()?;
        Some(Self { client, url, token })
    }

    /// Spawn the send on a detached task and return immediately.
    pub fn spawn_task_event(
        &self,
        event: &str,
        task: &Task,
        user_email: &str,
        changed: Option<Vec<&'static str>>,
    ) {
        let payload = json!({
            "event": event,
            "task": {
                "id": task.id,
                "title": task.title,
                "description": task.description,
                "priority": task.priority.as_str(),
                "status": task.status.as_str(),
                "label": task.label,
                "deadline": task.deadline,
                "externalId": task.external_id,
                "userEmail": user_email,
            },
            "meta": {
                "changedFields": changed,
                "timestamp": Utc::now().to_rfc3339(),
            },
        });
        let notifier = self.clone();
        let event = event.to_string();
        let task_id = task.id;
        tokio::spawn(async move {
            let result = notifier
                .client
                .post(&notifier.url)
                .header("X-Webhook-Token", &notifier.token)
                .json(&payload)
                .send()
                .await;
            match result {
                Ok(resp) if resp.status().is_success() => {
                    debug!(%event, task = task_id, "outbound event delivered");
                }
                Ok(resp) => {
                    warn!(%event, task = task_id, status = %resp.status(), "outbound sink rejected event");
                }
                Err(e) => {
                    warn!(%event, task = task_id, error = %e, "outbound event failed");
                }
            }
        });
    }
}

/// Fields that differ between two task revisions, reported in the
/// notification's `meta.changedFields`.
pub fn changed_fields(previous: &Task, current: &Task) -> Vec<&'static str> {
    let mut changed = Vec::new();
    if previous.title != current.title {
        changed.push("title");
    }
    if previous.description != current.description {
        changed.push("description");
    }
    if previous.priority != current.priority {
        changed.push("priority");
    }
    if previous.status != current.status {
        changed.push("status");
    }
    if previous.label != current.label {
        changed.push("label");
    }
    if previous.deadline != current.deadline {
        changed.push("deadline");
    }
    if previous.external_id != current.external_id {
        changed.push("externalId");
    }
    changed
}
