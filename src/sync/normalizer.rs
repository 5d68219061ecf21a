//! Webhook payload normalization.
//!
//! The board system's notification protocol is unversioned and the payload
//! shape depends on the event type. One extraction branch exists per
//! observed shape; anything else lands in the `Unknown` arm, which still
//! probes for identity fields so the delivery is not lost outright.
//!
//! Normalization is a pure transformation: no side effects, never panics,
//! and missing nested fields degrade to `"Unknown"`/empty rather than
//! failing the delivery. The only hard rejects are a missing card id or a
//! missing actor email.

use chrono::{DateTime, Utc};
use serde_json::Value;

use super::event::{CardChangeEvent, EventKind};
use crate::errors::RejectReason;

/// List name used when the containing list cannot be resolved. The
/// classifier maps it to the safe default classification.
pub const UNKNOWN_LIST: &str = "Unknown";

/// Parse a raw webhook body into the canonical event.
pub fn normalize(body: &Value, received_at: DateTime<Utc>) -> Result<CardChangeEvent, RejectReason> {
    let kind = detect_kind(body);
    let mut event = match kind {
        EventKind::CardCreated | EventKind::CardUpdated => from_card_item(body, kind),
        EventKind::CardMoved => from_move_action(body),
        EventKind::LabelAdded => from_label_assignment(body),
        EventKind::Unknown => from_unknown_shape(body),
    };

    event.actor_email = str_at(body, "/user/email").unwrap_or_default().to_string();
    event.actor_name = str_at(body, "/user/name").unwrap_or_default().to_string();
    event.received_at = received_at;

    if event.external_card_id.is_empty() {
        return Err(RejectReason::MissingCardId);
    }
    if event.actor_email.is_empty() {
        return Err(RejectReason::MissingActor);
    }
    Ok(event)
}

fn detect_kind(body: &Value) -> EventKind {
    match body.get("event").and_then(Value::as_str) {
        Some("cardCreate") => EventKind::CardCreated,
        Some("cardUpdate") => EventKind::CardUpdated,
        Some("actionCreate") if str_at(body, "/data/item/type") == Some("moveCard") => {
            EventKind::CardMoved
        }
        Some("cardLabelCreate") => EventKind::LabelAdded,
        _ => EventKind::Unknown,
    }
}

/// `cardCreate` / `cardUpdate`: the card is `data.item`; its list is
/// resolved by looking up `data.item.listId` in `data.included.lists`.
fn from_card_item(body: &Value, kind: EventKind) -> CardChangeEvent {
    let list_name = str_at(body, "/data/item/listId")
        .map(|list_id| resolve_list_name(body, list_id))
        .unwrap_or_else(|| UNKNOWN_LIST.to_string());
    CardChangeEvent {
        kind,
        external_card_id: str_at(body, "/data/item/id").unwrap_or_default().to_string(),
        card_name: str_at(body, "/data/item/name").unwrap_or_default().to_string(),
        card_description: opt_string_at(body, "/data/item/description"),
        due_date: opt_string_at(body, "/data/item/dueDate"),
        list_name,
        label_name: None,
        label_color: None,
        // the card's update timestamp changes on every delivery; creates
        // carry only createdAt
        delivery_stamp: str_at(body, "/data/item/updatedAt")
            .or_else(|| str_at(body, "/data/item/createdAt"))
            .unwrap_or_default()
            .to_string(),
        ..blank()
    }
}

/// `actionCreate` carrying a `moveCard` action: the card's stable id is
/// `data.cardId` (not `data.item.id` — that is the action record), the name
/// lives inside the action payload, and the destination list is
/// `data.item.data.toList`.
fn from_move_action(body: &Value) -> CardChangeEvent {
    let list_name = str_at(body, "/data/item/data/toList/name")
        .map(str::to_string)
        .or_else(|| {
            str_at(body, "/data/item/data/toList/id").map(|id| resolve_list_name(body, id))
        })
        .unwrap_or_else(|| UNKNOWN_LIST.to_string());
    CardChangeEvent {
        kind: EventKind::CardMoved,
        external_card_id: str_at(body, "/data/cardId").unwrap_or_default().to_string(),
        card_name: str_at(body, "/data/item/data/card/name")
            .unwrap_or_default()
            .to_string(),
        list_name,
        // the action record is unique per delivery
        delivery_stamp: str_at(body, "/data/item/id")
            .or_else(|| str_at(body, "/data/item/createdAt"))
            .unwrap_or_default()
            .to_string(),
        ..blank()
    }
}

/// `cardLabelCreate`: the event item only links ids, so the card itself is
/// found by scanning `data.included.cards`; the label is
/// `data.included.labels[0]`.
fn from_label_assignment(body: &Value) -> CardChangeEvent {
    let card_id = str_at(body, "/data/item/cardId").unwrap_or_default().to_string();
    let card = find_included_card(body, &card_id);
    let list_name = card
        .and_then(|c| c.get("listId"))
        .and_then(Value::as_str)
        .map(|list_id| resolve_list_name(body, list_id))
        .unwrap_or_else(|| UNKNOWN_LIST.to_string());
    CardChangeEvent {
        kind: EventKind::LabelAdded,
        external_card_id: card_id,
        card_name: card
            .and_then(|c| c.get("name"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        card_description: card
            .and_then(|c| c.get("description"))
            .and_then(Value::as_str)
            .map(str::to_string),
        due_date: card
            .and_then(|c| c.get("dueDate"))
            .and_then(Value::as_str)
            .map(str::to_string),
        list_name,
        label_name: opt_string_at(body, "/data/included/labels/0/name"),
        label_color: opt_string_at(body, "/data/included/labels/0/color"),
        // the label-assignment record is unique per delivery
        delivery_stamp: str_at(body, "/data/item/id")
            .or_else(|| str_at(body, "/data/item/createdAt"))
            .unwrap_or_default()
            .to_string(),
        ..blank()
    }
}

/// Future or undocumented shapes: extract whatever identity fields can be
/// found (including the flat `{card: {...}}` format the workflow engine
/// emits in its direct mode), but leave the list unresolved so the
/// classifier falls back to the default classification.
fn from_unknown_shape(body: &Value) -> CardChangeEvent {
    let external_card_id = str_at(body, "/data/item/id")
        .or_else(|| str_at(body, "/data/cardId"))
        .or_else(|| str_at(body, "/data/item/cardId"))
        .or_else(|| str_at(body, "/card/id"))
        .unwrap_or_default()
        .to_string();
    CardChangeEvent {
        kind: EventKind::Unknown,
        external_card_id,
        card_name: str_at(body, "/data/item/name")
            .or_else(|| str_at(body, "/card/name"))
            .unwrap_or_default()
            .to_string(),
        card_description: opt_string_at(body, "/data/item/description")
            .or_else(|| opt_string_at(body, "/card/description")),
        delivery_stamp: str_at(body, "/data/item/updatedAt")
            .or_else(|| str_at(body, "/data/item/id"))
            .unwrap_or_default()
            .to_string(),
        ..blank()
    }
}

/// Look up a list name in `data.included.lists` by id.
fn resolve_list_name(body: &Value, list_id: &str) -> String {
    body.pointer("/data/included/lists")
        .and_then(Value::as_array)
        .and_then(|lists| {
            lists
                .iter()
                .find(|l| l.get("id").and_then(Value::as_str) == Some(list_id))
        })
        .and_then(|l| l.get("name"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| UNKNOWN_LIST.to_string())
}

fn find_included_card<'a>(body: &'a Value, card_id: &str) -> Option<&'a Value> {
    if card_id.is_empty() {
        return None;
    }
    body.pointer("/data/included/cards")
        .and_then(Value::as_array)?
        .iter()
        .find(|c| c.get("id").and_then(Value::as_str) == Some(card_id))
}

fn str_at<'a>(body: &'a Value, pointer: &str) -> Option<&'a str> {
    body.pointer(pointer).and_then(Value::as_str)
}

fn opt_string_at(body: &Value, pointer: &str) -> Option<String> {
    str_at(body, pointer).map(str::to_string)
}

fn blank() -> CardChangeEvent {
    CardChangeEvent {
        kind: EventKind::Unknown,
        external_card_id: String::new(),
        card_name: String::new(),
        card_description: None,
        due_date: None,
        list_name: UNKNOWN_LIST.to_string(),
        label_name: None,
        label_color: None,
        actor_email: String::new(),
        actor_name: String::new(),
        delivery_stamp: String::new(),
        received_at: DateTime::<Utc>::MIN_UTC,
    }
}
