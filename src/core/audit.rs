use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use super::resource::AuditEvent;
use super::status::mentions_deletion;

static TASK_LINK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/tasks/([0-9a-fA-F-]+)(?:[/?#]|$)").unwrap());

/// Free-text fields of a history entry, in priority order.
const TEXT_FIELDS: &[&str] = &["text", "description", "historic"];
const NEW_STATUS_FIELDS: &[&str] = &["new-status", "new_status", "newStatus"];
const TASK_ID_FIELDS: &[&str] = &["task-id", "task_id", "taskId"];
const TASK_RELATIONSHIP: &str = "task";

/// Ids of tasks that the given history window says were deleted or
/// cancelled. Pure: each call looks only at `events`.
pub fn correlate(events: &[AuditEvent]) -> HashSet<String> {
    events
        .iter()
        .filter(|event| indicates_deletion(event))
        .filter_map(task_reference)
        .collect()
}

/// Whether the entry's text or its explicit new status reads as a deletion.
pub fn indicates_deletion(event: &AuditEvent) -> bool {
    let text_hit = event_text(event).is_some_and(mentions_deletion);
    let status_hit = NEW_STATUS_FIELDS
        .iter()
        .filter_map(|key| event.attributes.get(key))
        .any(|value| mentions_deletion(&scalar_text(value)));
    text_hit || status_hit
}

/// First non-empty description-like field.
pub fn event_text(event: &AuditEvent) -> Option<&str> {
    TEXT_FIELDS
        .iter()
        .filter_map(|key| event.attributes.str(key))
        .find(|text| !text.trim().is_empty())
}

/// Resolves the task an entry refers to. First match wins: the embedded
/// relationship id, then an id segment in the relationship's related link,
/// then a flat foreign-key attribute.
pub fn task_reference(event: &AuditEvent) -> Option<String> {
    let relationship = event.relationships.get(TASK_RELATIONSHIP);

    if let Some(id) = relationship.and_then(|r| r.id()) {
        return Some(id.to_string());
    }

    if let Some(id) = relationship
        .and_then(|r| r.related())
        .and_then(id_from_link)
    {
        return Some(id);
    }

    TASK_ID_FIELDS
        .iter()
        .filter_map(|key| event.attributes.get(key))
        .map(scalar_text)
        .find(|id| !id.is_empty())
}

/// True when any of the three reference forms points at `item_id`.
pub fn references_item(event: &AuditEvent, item_id: &str) -> bool {
    let relationship = event.relationships.get(TASK_RELATIONSHIP);
    if relationship.and_then(|r| r.id()) == Some(item_id) {
        return true;
    }
    if relationship
        .and_then(|r| r.related())
        .and_then(id_from_link)
        .is_some_and(|id| id == item_id)
    {
        return true;
    }
    TASK_ID_FIELDS
        .iter()
        .filter_map(|key| event.attributes.get(key))
        .any(|value| scalar_text(value) == item_id)
}

/// Entries of `events` that concern `item_id`, order preserved.
pub fn history_for<'a>(events: &'a [AuditEvent], item_id: &str) -> Vec<&'a AuditEvent> {
    events
        .iter()
        .filter(|event| references_item(event, item_id))
        .collect()
}

fn id_from_link(url: &str) -> Option<String> {
    TASK_LINK_RE
        .captures(url)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => String::new(),
    }
}
