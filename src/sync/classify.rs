//! Classification of board positions into task fields.
//!
//! The board encodes priority through list membership and ad-hoc urgency
//! through labels. The two signals are orthogonal: the list drives
//! priority and status, a label only ever replaces the label tag.
//!
//! `classify` is a total function — any list name, including empty or
//! whitespace-only strings, resolves to a value from the closed
//! priority/status space.

use crate::store::models::{TaskPriority, TaskStatus};

/// Result of classifying a card's containing list (and optional label).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub priority: TaskPriority,
    pub status: TaskStatus,
    pub label: String,
}

/// Derive priority, status and label tag from a list name.
///
/// `prior` is the task's current priority; a list named "Done" encodes no
/// priority information, so the prior value is carried through.
pub fn classify(list_name: &str, label_name: Option<&str>, prior: TaskPriority) -> Classification {
    let mut classification = classify_list(list_name, prior);
    if let Some(raw) = label_name {
        classification.label = map_label(raw);
    }
    classification
}

fn classify_list(list_name: &str, prior: TaskPriority) -> Classification {
    match list_name {
        "Priority 1" => triple(TaskPriority::P1, TaskStatus::InProgress),
        "Priority 2" => triple(TaskPriority::P2, TaskStatus::Open),
        "Priority 3" => triple(TaskPriority::P3, TaskStatus::Open),
        "Done" => Classification {
            priority: prior,
            status: TaskStatus::Done,
            label: tag_for(prior).to_string(),
        },
        other => {
            let lower = other.to_lowercase();
            if lower.contains("high") {
                Classification {
                    priority: TaskPriority::P1,
                    status: TaskStatus::Open,
                    label: "high".to_string(),
                }
            } else if lower.contains("low") {
                Classification {
                    priority: TaskPriority::P3,
                    status: TaskStatus::Open,
                    label: "low".to_string(),
                }
            } else {
                triple(TaskPriority::P2, TaskStatus::Open)
            }
        }
    }
}

fn triple(priority: TaskPriority, status: TaskStatus) -> Classification {
    Classification {
        label: tag_for(priority).to_string(),
        priority,
        status,
    }
}

fn tag_for(priority: TaskPriority) -> &'static str {
    match priority {
        TaskPriority::P1 => "high",
        TaskPriority::P2 => "medium",
        TaskPriority::P3 => "low",
    }
}

/// Map an upstream label name to the tag stored on the task. Known urgency
/// labels are canonicalized; anything else passes through verbatim.
pub fn map_label(raw: &str) -> String {
    match raw.to_lowercase().as_str() {
        "urgent" => "Urgent".to_string(),
        "medium" => "Medium".to_string(),
        "open" => "Open".to_string(),
        _ => raw.to_string(),
    }
}
