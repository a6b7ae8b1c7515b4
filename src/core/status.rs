use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::attributes::{Signals, fold_text, normalize};
use super::resource::WorkItem;

/// Lifecycle bucket of a task. Always recomputed, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DerivedStatus {
    Pending,
    Overdue,
    Completed,
    Deleted,
}

impl DerivedStatus {
    /// Board column order.
    pub const ALL: [Self; 4] = [Self::Pending, Self::Overdue, Self::Completed, Self::Deleted];

    pub fn column_id(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Overdue => "overdue",
            Self::Completed => "completed",
            Self::Deleted => "deleted",
        }
    }

    pub fn from_column_id(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "overdue" => Some(Self::Overdue),
            "completed" => Some(Self::Completed),
            "deleted" => Some(Self::Deleted),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Pending => "Pendente",
            Self::Overdue => "Atrasada",
            Self::Completed => "Concluída",
            Self::Deleted => "Excluída",
        }
    }

    pub fn is_actionable(&self) -> bool {
        matches!(self, Self::Pending | Self::Overdue)
    }
}

impl std::fmt::Display for DerivedStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.column_id())
    }
}

// Keyword families, matched against folded (accent-free, lowercase) text.
const DELETION_EXACT: &[&str] = &["deleted", "canceled", "cancelled", "excluida", "excluido"];
const DELETION_STEMS: &[&str] = &["cancel", "exclui", "apag", "remov", "delet"];
const DELETION_TITLE_WORDS: &[&str] = &[
    "excluida",
    "excluido",
    "cancelada",
    "cancelado",
    "apagada",
    "apagado",
    "removida",
    "removido",
    "deletada",
    "deletado",
];
const FREE_TEXT_DELETION_STEMS: &[&str] = &["exclu", "cancel", "delet", "remov", "apag"];
const COMPLETION_EXACT: &[&str] = &["completed", "done"];
const COMPLETION_STEMS: &[&str] = &["conclu", "finaliz"];

/// Status field says deleted/cancelled (exact word or known prefix).
pub fn status_indicates_deleted(folded: &str) -> bool {
    DELETION_EXACT.contains(&folded) || DELETION_STEMS.iter().any(|p| folded.starts_with(p))
}

pub fn status_indicates_completed(folded: &str) -> bool {
    COMPLETION_EXACT.contains(&folded) || COMPLETION_STEMS.iter().any(|p| folded.starts_with(p))
}

/// Last-resort hint: the title itself says the task was removed.
pub fn title_indicates_deleted(folded: &str) -> bool {
    DELETION_TITLE_WORDS.iter().any(|w| folded.contains(w))
}

/// Free-text test used on history entries ("tarefa cancelada por ...").
/// Punctuation is dropped before looking for the deletion stems anywhere in
/// the text.
pub fn mentions_deletion(text: &str) -> bool {
    let cleaned: String = fold_text(text)
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect();
    FREE_TEXT_DELETION_STEMS.iter().any(|stem| cleaned.contains(stem))
}

/// Classifies a task at instant `now`.
pub fn classify(item: &WorkItem, now: DateTime<Utc>) -> DerivedStatus {
    classify_signals(&normalize(&item.attributes), item.due(), now)
}

/// First match wins: deleted, completed, overdue, pending. Deletion is
/// checked first so a cancelled task never resurfaces as overdue.
pub fn classify_signals(
    signals: &Signals,
    due: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> DerivedStatus {
    let status = signals.status_text.as_deref();

    let deleted = signals.deleted
        || status.is_some_and(status_indicates_deleted)
        || signals
            .title_text
            .as_deref()
            .is_some_and(title_indicates_deleted);
    if deleted {
        return DerivedStatus::Deleted;
    }

    if signals.completed || status.is_some_and(status_indicates_completed) {
        return DerivedStatus::Completed;
    }

    match due {
        Some(due) if due < now => DerivedStatus::Overdue,
        _ => DerivedStatus::Pending,
    }
}
