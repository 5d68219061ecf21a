//! Inbound webhook endpoint.
//!
//! `POST /webhooks/board-events` carries the board system's JSON payload,
//! authenticated by a shared secret in `X-Webhook-Token`. The handler maps
//! dispatch outcomes onto the HTTP contract: 200 for processed and
//! duplicate deliveries, 401 for a bad token, 400 for payloads that yield
//! no card identity, 500 for store failures (the upstream sender
//! redelivers on non-2xx).

use axum::{
    Json,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use serde_json::{Value, json};
use tracing::{error, warn};

use super::api::SharedState;
use crate::errors::DispatchError;

const TOKEN_HEADER: &str = "X-Webhook-Token";

pub async fn receive_board_event(
    State(state): State<SharedState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let token = headers
        .get(TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if !constant_time_eq(token.as_bytes(), state.inbound_token.as_bytes()) {
        warn!("webhook delivery rejected: bad or missing token");
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "Unauthorized"})),
        )
            .into_response();
    }

    let payload: Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(e) => {
            warn!(error = %e, "webhook delivery rejected: body is not JSON");
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": format!("invalid JSON body: {e}")})),
            )
                .into_response();
        }
    };

    match state.dispatcher.dispatch(&payload).await {
        Ok(outcome) => (StatusCode::OK, Json(outcome.into_body())).into_response(),
        Err(DispatchError::Malformed(reason)) => {
            // keep the raw payload in the log for offline diagnosis
            warn!(%reason, payload = %payload, "webhook payload rejected");
            (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": reason.to_string()})),
            )
                .into_response()
        }
        Err(DispatchError::Reconcile(e)) => {
            error!(error = %e, "webhook reconciliation failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "task store unavailable"})),
            )
                .into_response()
        }
    }
}

/// Liveness probe on the webhook path, mirroring what the board system's
/// operators use to verify the integration is wired up.
pub async fn webhook_probe() -> Json<Value> {
    Json(json!({
        "message": "webhook endpoint active",
        "timestamp": Utc::now().to_rfc3339(),
        "methods": ["GET", "POST"],
    }))
}

/// Compare in time independent of content so the token check leaks no
/// prefix information.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    let mut diff = a.len() ^ b.len();
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= (x ^ y) as usize;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"secret", b"secret"));
        assert!(!constant_time_eq(b"secret", b"secret2"));
        assert!(!constant_time_eq(b"secret", b"secre"));
        assert!(!constant_time_eq(b"secret", b""));
        assert!(constant_time_eq(b"", b""));
    }
}
