//! Typed error hierarchy for the sync engine.
//!
//! Three enums cover the webhook path:
//! - `RejectReason` — payload failed identity extraction (maps to 400)
//! - `ReconcileError` — the task store failed or timed out (maps to 500)
//! - `DispatchError` — umbrella the dispatcher hands to the HTTP layer

use std::time::Duration;

use thiserror::Error;

/// Why a webhook payload was rejected before reconciliation.
///
/// Everything else about a payload degrades to safe defaults; only
/// identity-resolution failure is a hard reject.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RejectReason {
    #[error("no card id could be extracted from the payload")]
    MissingCardId,

    #[error("payload carries no actor email")]
    MissingActor,
}

/// Errors from the task reconciler. Persistence failures are surfaced to
/// the caller unretried; the upstream sender redelivers on non-2xx.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("task store error: {0}")]
    Store(#[source] anyhow::Error),

    #[error("task store call exceeded {0:?}")]
    StoreTimeout(Duration),
}

/// Errors from a webhook dispatch.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("malformed payload: {0}")]
    Malformed(#[from] RejectReason),

    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
}
