//! End-to-end tests of the webhook → reconcile → broadcast path and the
//! ordinary CRUD path, driven through the full router.

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use futures_util::StreamExt;
use http_body_util::BodyExt;
use serde_json::{Value, json};
use std::path::PathBuf;
use tower::ServiceExt;

use boardsync::config::BoardsyncConfig;
use boardsync::server::api::SharedState;
use boardsync::server::{build_router, build_state};
use boardsync::store::models::TaskStatus;
use boardsync::store::{DbHandle, NewTask, TaskDb};

const WEBHOOK_TOKEN: &str = "test-webhook-token";
const ACTOR_EMAIL: &str = "faal@example.org";

fn test_config() -> BoardsyncConfig {
    BoardsyncConfig {
        port: 0,
        db_path: PathBuf::from(":memory:"),
        inbound_webhook_token: WEBHOOK_TOKEN.to_string(),
        outbound_webhook_url: None,
        outbound_webhook_token: None,
        dev_mode: false,
    }
}

fn test_state() -> SharedState {
    let db = DbHandle::new(TaskDb::new_in_memory().unwrap());
    build_state(db, &test_config())
}

fn webhook_request(body: &Value, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/webhooks/board-events")
        .header("content-type", "application/json");
    if let Some(token) = token {
        builder = builder.header("X-Webhook-Token", token);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

/// The full board-system shape for a card create/update delivery.
fn card_update_body(event: &str, list_name: &str, updated_at: &str) -> Value {
    json!({
        "event": event,
        "data": {
            "item": {
                "id": "1614531618771305515",
                "createdAt": "2025-10-05T10:06:07.228Z",
                "updatedAt": updated_at,
                "name": "Fix heater",
                "description": "Heater is dripping",
                "dueDate": "2025-10-13T10:00:00.000Z",
                "boardId": "1614518365206873097",
                "listId": "1614519127639065633"
            },
            "included": {
                "boards": [ { "id": "1614518365206873097", "name": "Ground floor" } ],
                "lists": [
                    { "id": "1614519127639065633", "name": list_name }
                ]
            }
        },
        "user": {
            "id": "1614516758478062595",
            "email": ACTOR_EMAIL,
            "name": "Matin Faal"
        }
    })
}

fn move_card_body(to_list: &str, action_id: &str) -> Value {
    json!({
        "event": "actionCreate",
        "data": {
            "item": {
                "id": action_id,
                "type": "moveCard",
                "data": {
                    "card": { "name": "Fix heater" },
                    "fromList": { "name": "Priority 2" },
                    "toList": { "name": to_list, "id": "list-dest" }
                }
            },
            "cardId": "1614531618771305515",
            "included": {
                "lists": [ { "id": "list-dest", "name": to_list } ]
            }
        },
        "user": { "email": ACTOR_EMAIL, "name": "Matin Faal" }
    })
}

fn label_body(label_name: &str, assignment_id: &str, list_name: &str) -> Value {
    json!({
        "event": "cardLabelCreate",
        "data": {
            "item": {
                "id": assignment_id,
                "cardId": "1614531618771305515",
                "labelId": "label-1"
            },
            "included": {
                "labels": [ { "id": "label-1", "name": label_name, "color": "berry-red" } ],
                "lists": [ { "id": "list-current", "name": list_name } ],
                "cards": [
                    {
                        "id": "1614531618771305515",
                        "name": "Fix heater",
                        "description": "Heater is dripping",
                        "listId": "list-current"
                    }
                ]
            }
        },
        "user": { "email": ACTOR_EMAIL, "name": "Matin Faal" }
    })
}

#[tokio::test]
async fn bad_token_rejected_without_state_mutation() {
    let state = test_state();
    let app = build_router(state.clone());

    let body = card_update_body("cardUpdate", "Priority 1", "t1");
    let (status, resp) = send(&app, webhook_request(&body, None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(resp["error"], "Unauthorized");

    let (status, _) = send(&app, webhook_request(&body, Some("wrong-token"))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    assert_eq!(state.db.call(|db| db.count_tasks()).await.unwrap(), 0);
}

#[tokio::test]
async fn card_update_creates_task_and_synthesizes_user() {
    let state = test_state();
    let app = build_router(state.clone());

    let body = card_update_body("cardUpdate", "Priority 1", "t1");
    let (status, resp) = send(&app, webhook_request(&body, Some(WEBHOOK_TOKEN))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(resp["message"], "webhook processed");
    assert_eq!(resp["event"], "card_updated");
    assert_eq!(resp["card"], "1614531618771305515");
    assert_eq!(resp["task"]["priority"], "p1");
    assert_eq!(resp["task"]["status"], "in_progress");
    assert_eq!(resp["task"]["label"], "high");
    assert_eq!(resp["task"]["deadline"], "2025-10-13T10:00:00.000Z");

    let owner = state
        .db
        .call(|db| db.get_user_by_email(ACTOR_EMAIL))
        .await
        .unwrap()
        .unwrap();
    assert!(owner.api_token.is_none());
}

#[tokio::test]
async fn duplicate_delivery_acknowledged_once() {
    let state = test_state();
    let app = build_router(state.clone());
    let body = card_update_body("cardUpdate", "Priority 2", "t1");

    let (status, first) = send(&app, webhook_request(&body, Some(WEBHOOK_TOKEN))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["message"], "webhook processed");

    let (status, second) = send(&app, webhook_request(&body, Some(WEBHOOK_TOKEN))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["message"], "duplicate delivery ignored");
    assert!(second.get("task").is_none_or(Value::is_null));

    assert_eq!(state.db.call(|db| db.count_tasks()).await.unwrap(), 1);
}

#[tokio::test]
async fn move_card_reclassifies_priority_and_status() {
    let state = test_state();
    let app = build_router(state.clone());

    let seed = card_update_body("cardCreate", "Priority 2", "t1");
    send(&app, webhook_request(&seed, Some(WEBHOOK_TOKEN))).await;

    let (status, resp) = send(
        &app,
        webhook_request(&move_card_body("Priority 1", "action-1"), Some(WEBHOOK_TOKEN)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(resp["task"]["priority"], "p1");
    assert_eq!(resp["task"]["status"], "in_progress");
    // the move carried no content; the seeded description survives
    assert_eq!(resp["task"]["description"], "Heater is dripping");
    assert_eq!(state.db.call(|db| db.count_tasks()).await.unwrap(), 1);
}

#[tokio::test]
async fn label_event_updates_only_the_tag() {
    let state = test_state();
    let app = build_router(state.clone());

    let seed = card_update_body("cardUpdate", "Priority 3", "t1");
    send(&app, webhook_request(&seed, Some(WEBHOOK_TOKEN))).await;

    let (status, resp) = send(
        &app,
        webhook_request(&label_body("urgent", "assignment-1", "Priority 1"), Some(WEBHOOK_TOKEN)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(resp["task"]["label"], "Urgent");
    assert_eq!(resp["task"]["priority"], "p3");
    assert_eq!(resp["task"]["status"], "open");
}

#[tokio::test]
async fn title_fallback_backfills_external_id() {
    let state = test_state();
    let app = build_router(state.clone());

    state
        .db
        .call(|db| {
            let user = db.find_or_create_user_by_email(ACTOR_EMAIL, "Matin Faal")?;
            db.create_task(
                user.id,
                &NewTask {
                    title: "Fix heater".to_string(),
                    description: None,
                    status: TaskStatus::Open,
                    priority: boardsync::store::models::TaskPriority::P2,
                    label: None,
                    deadline: None,
                    external_id: None,
                },
            )
        })
        .await
        .unwrap();

    let body = card_update_body("cardUpdate", "Priority 1", "t1");
    let (status, resp) = send(&app, webhook_request(&body, Some(WEBHOOK_TOKEN))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(resp["task"]["external_id"], "1614531618771305515");
    assert_eq!(state.db.call(|db| db.count_tasks()).await.unwrap(), 1);
}

#[tokio::test]
async fn convergence_follows_last_delivery() {
    let state = test_state();
    let app = build_router(state.clone());

    for (i, list) in ["Priority 2", "Priority 1", "Priority 3"].iter().enumerate() {
        let body = card_update_body("cardUpdate", list, &format!("t{i}"));
        let (status, _) = send(&app, webhook_request(&body, Some(WEBHOOK_TOKEN))).await;
        assert_eq!(status, StatusCode::OK);
    }

    let owner = state
        .db
        .call(|db| db.get_user_by_email(ACTOR_EMAIL))
        .await
        .unwrap()
        .unwrap();
    let task = state
        .db
        .call(move |db| db.find_task_by_external_id(owner.id, "1614531618771305515"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(task.priority.as_str(), "p3");
    assert_eq!(state.db.call(|db| db.count_tasks()).await.unwrap(), 1);
}

#[tokio::test]
async fn malformed_payloads_rejected() {
    let state = test_state();
    let app = build_router(state.clone());

    // JSON, but no extractable card id
    let (status, resp) = send(
        &app,
        webhook_request(&json!({"event": "cardUpdate", "user": {"email": ACTOR_EMAIL}}), Some(WEBHOOK_TOKEN)),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(resp["error"].as_str().unwrap().contains("card id"));

    // not JSON at all
    let req = Request::builder()
        .method("POST")
        .uri("/webhooks/board-events")
        .header("X-Webhook-Token", WEBHOOK_TOKEN)
        .body(Body::from("not json"))
        .unwrap();
    let (status, _) = send(&app, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    assert_eq!(state.db.call(|db| db.count_tasks()).await.unwrap(), 0);
}

// ── CRUD path ─────────────────────────────────────────────────────────

async fn issue_token(state: &SharedState) -> String {
    state
        .db
        .call(|db| db.issue_api_token("user@example.org", "Local User"))
        .await
        .unwrap()
        .1
}

fn authed(req: axum::http::request::Builder, token: &str) -> axum::http::request::Builder {
    req.header("authorization", format!("Bearer {token}"))
}

#[tokio::test]
async fn crud_round_trip() {
    let state = test_state();
    let app = build_router(state.clone());
    let token = issue_token(&state).await;

    // create
    let req = authed(
        Request::builder().method("POST").uri("/api/tasks"),
        &token,
    )
    .header("content-type", "application/json")
    .body(Body::from(
        json!({"title": "Water the plants", "priority": "p3"}).to_string(),
    ))
    .unwrap();
    let (status, created) = send(&app, req).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["title"], "Water the plants");
    assert_eq!(created["priority"], "p3");
    assert!(created["external_id"].is_null());
    let id = created["id"].as_i64().unwrap();

    // list
    let req = authed(Request::builder().uri("/api/tasks"), &token)
        .body(Body::empty())
        .unwrap();
    let (status, listed) = send(&app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed.as_array().unwrap().len(), 1);

    // patch status
    let req = authed(
        Request::builder()
            .method("PATCH")
            .uri(format!("/api/tasks/{id}")),
        &token,
    )
    .header("content-type", "application/json")
    .body(Body::from(json!({"status": "done"}).to_string()))
    .unwrap();
    let (status, patched) = send(&app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(patched["status"], "done");

    // delete
    let req = authed(
        Request::builder()
            .method("DELETE")
            .uri(format!("/api/tasks/{id}")),
        &token,
    )
    .body(Body::empty())
    .unwrap();
    let (status, _) = send(&app, req).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let req = authed(
        Request::builder().uri(format!("/api/tasks/{id}")),
        &token,
    )
    .body(Body::empty())
    .unwrap();
    let (status, _) = send(&app, req).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn crud_rejects_unknown_token() {
    let state = test_state();
    let app = build_router(state);

    let req = Request::builder()
        .uri("/api/tasks")
        .header("authorization", "Bearer not-a-real-token")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&app, req).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn crud_cannot_touch_foreign_tasks() {
    let state = test_state();
    let app = build_router(state.clone());
    let token = issue_token(&state).await;

    let foreign_id = state
        .db
        .call(|db| {
            let other = db.find_or_create_user_by_email("other@example.org", "Other")?;
            db.create_task(
                other.id,
                &NewTask {
                    title: "Not yours".to_string(),
                    description: None,
                    status: TaskStatus::Open,
                    priority: boardsync::store::models::TaskPriority::P2,
                    label: None,
                    deadline: None,
                    external_id: None,
                },
            )
        })
        .await
        .unwrap()
        .id;

    let req = authed(
        Request::builder().uri(format!("/api/tasks/{foreign_id}")),
        &token,
    )
    .body(Body::empty())
    .unwrap();
    let (status, _) = send(&app, req).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// ── Live stream ───────────────────────────────────────────────────────

#[tokio::test]
async fn event_stream_greets_then_pushes_updates() {
    let state = test_state();
    let app = build_router(state.clone());

    // the stream user and the webhook actor resolve to the same account
    let token = state
        .db
        .call(|db| db.issue_api_token(ACTOR_EMAIL, "Matin Faal"))
        .await
        .unwrap()
        .1;

    let req = authed(Request::builder().uri("/events"), &token)
        .body(Body::empty())
        .unwrap();
    let resp = app.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers().get("content-type").unwrap(),
        "application/x-ndjson"
    );

    let mut frames = resp.into_body().into_data_stream();
    let greeting = frames.next().await.unwrap().unwrap();
    let greeting: Value = serde_json::from_slice(&greeting).unwrap();
    assert_eq!(greeting["type"], "connected");

    // a webhook delivery for the same user lands on the open stream
    let body = card_update_body("cardUpdate", "Priority 1", "t1");
    let (status, _) = send(&app, webhook_request(&body, Some(WEBHOOK_TOKEN))).await;
    assert_eq!(status, StatusCode::OK);

    let frame = tokio::time::timeout(std::time::Duration::from_secs(2), frames.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let envelope: Value = serde_json::from_slice(&frame).unwrap();
    assert_eq!(envelope["type"], "task_updated");
    assert_eq!(envelope["task"]["priority"], "p1");
    assert_eq!(envelope["event"], "card_updated");
}

#[tokio::test]
async fn event_stream_requires_auth() {
    let state = test_state();
    let app = build_router(state);

    let req = Request::builder().uri("/events").body(Body::empty()).unwrap();
    let (status, _) = send(&app, req).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}
