//! Board-event sync engine.
//!
//! Receives heterogeneous change notifications pushed by the external
//! kanban board, folds them into the local task table, and fans the new
//! state out to connected clients.
//!
//! ## Module Map
//!
//! ```text
//! POST /webhooks/board-events
//!         │
//!         v
//!   dispatcher.rs ── normalizer.rs  (raw JSON → CardChangeEvent)
//!         │          dedup.rs       (drop redelivered payloads)
//!         │          reconciler.rs  (find-or-create task, apply classify.rs)
//!         │          broadcast.rs   (push new state to live clients)
//!         v
//!   HTTP response  {message, event, card, task}
//! ```
//!
//! | Module       | Responsibility                                        |
//! |--------------|-------------------------------------------------------|
//! | `event`      | `CardChangeEvent` — canonical, shape-independent view |
//! | `normalizer` | one extraction branch per observed wire shape         |
//! | `classify`   | list/label names → priority, status, label tag        |
//! | `dedup`      | in-memory at-least-once delivery tolerance            |
//! | `reconciler` | idempotent upsert against the task store              |
//! | `broadcast`  | per-user live sinks, best-effort delivery             |
//! | `dispatcher` | glue and response assembly                            |

pub mod broadcast;
pub mod classify;
pub mod dedup;
pub mod dispatcher;
pub mod event;
pub mod normalizer;
pub mod reconciler;
