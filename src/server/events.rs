//! Live task stream.
//!
//! `GET /events` holds the response open and writes newline-delimited JSON
//! envelopes as the user's tasks change. No replay: a client that drops
//! and reconnects re-fetches `/api/tasks` for full state.

use std::convert::Infallible;

use axum::{
    body::Body,
    extract::State,
    http::header,
    response::Response,
};
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::info;

use super::api::{ApiError, AuthedUser, SharedState};
use crate::sync::broadcast::PushMessage;

/// Per-connection queue depth. A client slower than this starts losing
/// messages rather than backpressuring the webhook path.
const CHANNEL_CAPACITY: usize = 64;

pub async fn event_stream(
    State(state): State<SharedState>,
    AuthedUser(user): AuthedUser,
) -> Result<Response, ApiError> {
    let (tx, rx) = mpsc::channel::<String>(CHANNEL_CAPACITY);

    if let Some(line) = (PushMessage::Connected { user_id: user.id }).to_line() {
        // capacity is fresh; the greeting cannot fail
        let _ = tx.try_send(line);
    }
    state.registry.register(user.id, tx);
    info!(user = %user.email, "live stream connected");

    let stream = ReceiverStream::new(rx).map(Ok::<_, Infallible>);
    Response::builder()
        .header(header::CONTENT_TYPE, "application/x-ndjson")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(stream))
        .map_err(|e| ApiError::Internal(e.to_string()))
}
