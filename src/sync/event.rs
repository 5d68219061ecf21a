use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which kind of board change a webhook delivery describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    CardCreated,
    CardUpdated,
    CardMoved,
    LabelAdded,
    Unknown,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CardCreated => "card_created",
            Self::CardUpdated => "card_updated",
            Self::CardMoved => "card_moved",
            Self::LabelAdded => "label_added",
            Self::Unknown => "unknown",
        }
    }

    /// Card create/update deliveries carry authoritative title, description
    /// and due date; move and label deliveries do not.
    pub fn carries_card_content(&self) -> bool {
        matches!(self, Self::CardCreated | Self::CardUpdated)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical, shape-independent representation of one webhook delivery.
///
/// `external_card_id` and `actor_email` are guaranteed non-empty; the
/// normalizer rejects payloads where either cannot be extracted.
#[derive(Debug, Clone)]
pub struct CardChangeEvent {
    pub kind: EventKind,
    pub external_card_id: String,
    pub card_name: String,
    pub card_description: Option<String>,
    pub due_date: Option<String>,
    /// Name of the containing list; `"Unknown"` when unresolved.
    pub list_name: String,
    pub label_name: Option<String>,
    pub label_color: Option<String>,
    pub actor_email: String,
    pub actor_name: String,
    /// Per-delivery stamp: the action/label item id for move/label events,
    /// the card's updated/created timestamp for card events. May be empty
    /// on malformed payloads.
    pub delivery_stamp: String,
    pub received_at: DateTime<Utc>,
}

impl CardChangeEvent {
    /// Key under which the idempotency guard tracks this delivery.
    pub fn dedup_key(&self) -> String {
        format!(
            "{}:{}:{}",
            self.kind.as_str(),
            self.external_card_id,
            self.delivery_stamp
        )
    }
}
