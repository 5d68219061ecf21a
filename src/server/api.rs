//! REST API: shared state, bearer-token auth, and the ordinary task CRUD
//! path. CRUD mutations mirror the reconciler's side effects — broadcast
//! to the owner's live stream and a fire-and-forget outbound event.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{FromRequestParts, Path, State},
    http::{StatusCode, header, request::Parts},
    response::{IntoResponse, Response},
    routing::get,
};
use chrono::Utc;
use serde::Deserialize;
use tracing::info;

use crate::notify::{Notifier, changed_fields};
use crate::store::models::{Task, TaskPriority, TaskStatus, User};
use crate::store::{DbHandle, NewTask, TaskPatch};
use crate::sync::broadcast::{BroadcastRegistry, PushMessage};
use crate::sync::dispatcher::Dispatcher;

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub db: DbHandle,
    pub registry: Arc<BroadcastRegistry>,
    pub dispatcher: Dispatcher,
    pub notifier: Option<Notifier>,
    /// Shared secret for inbound webhook deliveries.
    pub inbound_token: String,
}

pub type SharedState = Arc<AppState>;

// ── Request payload types ─────────────────────────────────────────────

#[derive(Deserialize)]
pub struct CreateTaskRequest {
    pub title: String,
    pub description: Option<String>,
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
    pub label: Option<String>,
    pub deadline: Option<String>,
}

#[derive(Deserialize)]
pub struct UpdateTaskRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
    pub label: Option<String>,
    pub deadline: Option<String>,
}

// ── Error handling ────────────────────────────────────────────────────

pub enum ApiError {
    Unauthorized,
    NotFound(String),
    BadRequest(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized".to_string()),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}

// ── Authentication ────────────────────────────────────────────────────

/// The user identified by the request's bearer token. Tokens are issued
/// out of band (`boardsync user add`); accounts synthesized from webhook
/// deliveries have none and cannot pass this extractor.
pub struct AuthedUser(pub User);

impl FromRequestParts<SharedState> for AuthedUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &SharedState,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .unwrap_or("")
            .to_string();
        if token.is_empty() {
            return Err(ApiError::Unauthorized);
        }
        let user = state
            .db
            .call(move |db| db.get_user_by_api_token(&token))
            .await
            .map_err(|e| ApiError::Internal(e.to_string()))?;
        user.map(AuthedUser).ok_or(ApiError::Unauthorized)
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/api/tasks", get(list_tasks).post(create_task))
        .route(
            "/api/tasks/{id}",
            get(get_task).patch(update_task).delete(delete_task),
        )
        .route("/health", get(health_check))
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

async fn list_tasks(
    State(state): State<SharedState>,
    AuthedUser(user): AuthedUser,
) -> Result<Json<Vec<Task>>, ApiError> {
    let tasks = state
        .db
        .call(move |db| db.list_tasks(user.id))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(tasks))
}

async fn create_task(
    State(state): State<SharedState>,
    AuthedUser(user): AuthedUser,
    Json(req): Json<CreateTaskRequest>,
) -> Result<(StatusCode, Json<Task>), ApiError> {
    if req.title.trim().is_empty() {
        return Err(ApiError::BadRequest("title must not be empty".to_string()));
    }
    let new = NewTask {
        title: req.title,
        description: req.description,
        status: req.status.unwrap_or(TaskStatus::Open),
        priority: req.priority.unwrap_or(TaskPriority::P2),
        label: req.label,
        deadline: req.deadline,
        external_id: None,
    };
    let task = state
        .db
        .call(move |db| db.create_task(user.id, &new))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    info!(task = task.id, user = %user.email, "task created");
    state.registry.publish(
        user.id,
        &PushMessage::TaskUpdated {
            task: task.clone(),
            event: "task_created".to_string(),
            timestamp: Utc::now(),
        },
    );
    if let Some(notifier) = &state.notifier {
        notifier.spawn_task_event("taskCreate", &task, &user.email, None);
    }
    Ok((StatusCode::CREATED, Json(task)))
}

async fn get_task(
    State(state): State<SharedState>,
    AuthedUser(user): AuthedUser,
    Path(id): Path<i64>,
) -> Result<Json<Task>, ApiError> {
    let task = owned_task(&state, &user, id).await?;
    Ok(Json(task))
}

async fn update_task(
    State(state): State<SharedState>,
    AuthedUser(user): AuthedUser,
    Path(id): Path<i64>,
    Json(req): Json<UpdateTaskRequest>,
) -> Result<Json<Task>, ApiError> {
    let previous = owned_task(&state, &user, id).await?;
    let patch = TaskPatch {
        title: req.title,
        description: req.description,
        status: req.status,
        priority: req.priority,
        label: req.label,
        deadline: req.deadline,
        external_id: None,
    };
    let updated = state
        .db
        .call(move |db| db.update_task(id, &patch))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .ok_or_else(|| ApiError::NotFound(format!("Task {} not found", id)))?;

    state.registry.publish(
        user.id,
        &PushMessage::TaskUpdated {
            task: updated.clone(),
            event: "task_updated".to_string(),
            timestamp: Utc::now(),
        },
    );
    if let Some(notifier) = &state.notifier {
        let changed = changed_fields(&previous, &updated);
        let event = if changed.contains(&"status") {
            "taskStatusChange"
        } else {
            "taskUpdate"
        };
        notifier.spawn_task_event(event, &updated, &user.email, Some(changed));
    }
    Ok(Json(updated))
}

async fn delete_task(
    State(state): State<SharedState>,
    AuthedUser(user): AuthedUser,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    let task = owned_task(&state, &user, id).await?;
    state
        .db
        .call(move |db| db.delete_task(id))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    info!(task = id, user = %user.email, "task deleted");
    state.registry.publish(
        user.id,
        &PushMessage::TaskDeleted {
            task: task.clone(),
            event: "task_deleted".to_string(),
            timestamp: Utc::now(),
        },
    );
    if let Some(notifier) = &state.notifier {
        notifier.spawn_task_event("taskDelete", &task, &user.email, None);
    }
    Ok(StatusCode::NO_CONTENT)
}

/// Fetch a task and verify it belongs to the requesting user. Foreign
/// tasks read as not-found rather than forbidden.
async fn owned_task(state: &SharedState, user: &User, id: i64) -> Result<Task, ApiError> {
    let task = state
        .db
        .call(move |db| db.get_task(id))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    match task {
        Some(task) if task.user_id == user.id => Ok(task),
        _ => Err(ApiError::NotFound(format!("Task {} not found", id))),
    }
}
