//! Alias resolution for the record service's attribute bags.
//!
//! Deployments disagree on field names ("status" vs "situacao" vs
//! "status-name"), on encodings (`true`, `"sim"`, `1`, a timestamp) and on
//! language. Every alias table lives here; nothing else in the crate looks
//! up a raw field by name.

use serde_json::Value;
use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

use super::resource::Attributes;

/// Status text fields, in resolution order. The first string value wins.
pub const STATUS_ALIASES: &[&str] = &[
    "status",
    "situation",
    "situacao",
    "situação",
    "status-name",
    "statusName",
    "status_name",
];

/// Boolean-ish fields meaning "deleted" or "excluded".
pub const DELETED_FLAG_ALIASES: &[&str] = &[
    "deleted",
    "excluded",
    "is-deleted",
    "is_deleted",
    "isDeleted",
    "is-excluded",
    "is_excluded",
    "isExcluded",
];

/// Timestamp fields whose mere presence marks a deletion or cancellation.
pub const DELETION_TIMESTAMP_ALIASES: &[&str] = &[
    "deleted-at",
    "deleted_at",
    "deletedAt",
    "excluded-at",
    "excluded_at",
    "excludedAt",
    "cancelled-at",
    "cancelled_at",
    "cancelledAt",
    "canceled-at",
    "canceled_at",
    "canceledAt",
];

pub const COMPLETED_FLAG_ALIASES: &[&str] =
    &["completed", "is-completed", "is_completed", "isCompleted"];

pub const COMPLETION_TIMESTAMP_ALIASES: &[&str] = &["completed-at", "completed_at", "completedAt"];

/// Accepted affirmative spellings, compared after trim + lowercase.
const TRUTHY_WORDS: &[&str] = &["1", "true", "yes", "y", "on", "sim", "s", "verdadeiro"];

/// Canonical signals extracted from one attribute bag.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Signals {
    /// Folded status text from the first present status alias.
    pub status_text: Option<String>,
    /// Folded title, only used as a last-resort deletion hint.
    pub title_text: Option<String>,
    pub deleted: bool,
    pub completed: bool,
}

/// Extracts the canonical signal set. Never fails: unknown, null or
/// oddly-typed fields count as absent.
pub fn normalize(attrs: &Attributes) -> Signals {
    // The first string-typed alias decides, even when it is blank.
    let status_text = STATUS_ALIASES
        .iter()
        .find_map(|key| attrs.str(key))
        .map(fold_text)
        .filter(|s| !s.is_empty());

    let title_text = attrs
        .str("title")
        .map(fold_text)
        .filter(|s| !s.is_empty());

    let deleted = any_truthy(attrs, DELETED_FLAG_ALIASES)
        || any_present(attrs, DELETION_TIMESTAMP_ALIASES);

    let completed = any_truthy(attrs, COMPLETED_FLAG_ALIASES)
        || any_present(attrs, COMPLETION_TIMESTAMP_ALIASES);

    Signals {
        status_text,
        title_text,
        deleted,
        completed,
    }
}

/// True when any deletion-related field carries a non-empty value, whatever
/// its encoding. Looser than [`Signals::deleted`]: `"no"` counts here.
pub fn has_deletion_fields(attrs: &Attributes) -> bool {
    DELETED_FLAG_ALIASES
        .iter()
        .chain(DELETION_TIMESTAMP_ALIASES)
        .filter_map(|key| attrs.get(key))
        .any(is_present)
}

/// Strips diacritics and lowercases: "Concluída" -> "concluida".
pub fn fold_text(raw: &str) -> String {
    raw.nfd()
        .filter(|c| !is_combining_mark(*c))
        .collect::<String>()
        .to_lowercase()
        .trim()
        .to_string()
}

pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64() == Some(1.0),
        Value::String(s) => {
            let s = s.trim().to_lowercase();
            TRUTHY_WORDS.contains(&s.as_str())
        }
        _ => false,
    }
}

/// Presence in the loose sense: anything but null, false, zero or "".
pub fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.trim().is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn any_truthy(attrs: &Attributes, keys: &[&str]) -> bool {
    keys.iter().filter_map(|key| attrs.get(key)).any(is_truthy)
}

fn any_present(attrs: &Attributes, keys: &[&str]) -> bool {
    keys.iter().filter_map(|key| attrs.get(key)).any(is_present)
}
