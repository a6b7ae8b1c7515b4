//! Structured events emitted by the cache and the mutation pipeline.
//!
//! The stateful components never call the logger directly; they write to an
//! [`EventSink`] handed to them at construction.

use std::sync::Mutex;
use std::time::Duration;

use super::error::SyncError;

/// The two independently polled data sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Source {
    Items,
    Audit,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Items => "items",
            Self::Audit => "audit",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    PollStarted {
        source: Source,
    },
    PollSucceeded {
        source: Source,
        count: usize,
    },
    PollFailed {
        source: Source,
        error: SyncError,
    },
    /// Polling is suspended until authentication is restored.
    PollSuspended {
        source: Source,
    },
    Retrying {
        operation: &'static str,
        attempt: u32,
        delay: Duration,
        error: SyncError,
    },
    Published {
        items: usize,
        overrides: usize,
    },
    /// A task landed in the overdue bucket while still carrying raw
    /// deletion fields the classifier did not accept.
    OverdueWithDeletionSignals {
        item_id: String,
    },
    /// The per-task history lookup failed; the caller got an empty list.
    HistoryLookupFailed {
        item_id: String,
        error: SyncError,
    },
    SearchApplied {
        term: String,
    },
    MutationCommitted {
        action: &'static str,
        item_id: String,
    },
    MutationFailed {
        action: &'static str,
        item_id: String,
        error: SyncError,
    },
    MutationRejected {
        item_id: String,
    },
    MutationAbandoned {
        item_id: String,
    },
}

pub trait EventSink: Send + Sync {
    fn record(&self, event: SyncEvent);
}

/// Forwards events to the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl EventSink for LogSink {
    fn record(&self, event: SyncEvent) {
        match event {
            SyncEvent::PollStarted { source } => {
                log::debug!("Polling {}", source.as_str());
            }
            SyncEvent::PollSucceeded { source, count } => {
                log::debug!("Poll {} returned {} records", source.as_str(), count);
            }
            SyncEvent::PollFailed { source: Source::Audit, error } => {
                log::warn!("History poll failed, keeping previous deletions: {}", error);
            }
            SyncEvent::PollFailed { source, error } => {
                log::error!("Poll {} failed: {}", source.as_str(), error);
            }
            SyncEvent::PollSuspended { source } => {
                log::info!("Polling {} suspended until login", source.as_str());
            }
            SyncEvent::Retrying {
                operation,
                attempt,
                delay,
                error,
            } => {
                log::info!(
                    "Retrying {} (attempt {}) in {:?}: {}",
                    operation,
                    attempt,
                    delay,
                    error
                );
            }
            SyncEvent::Published { items, overrides } => {
                log::debug!("Board published: {} tasks, {} history deletions", items, overrides);
            }
            SyncEvent::OverdueWithDeletionSignals { item_id } => {
                log::warn!("Task {} looks deleted but classified as overdue", item_id);
            }
            SyncEvent::HistoryLookupFailed { item_id, error } => {
                log::warn!("Failed to load history for task {}: {}", item_id, error);
            }
            SyncEvent::SearchApplied { term } => {
                log::debug!("Search term applied: {:?}", term);
            }
            SyncEvent::MutationCommitted { action, item_id } => {
                log::info!("{} committed for task {}", action, item_id);
            }
            SyncEvent::MutationFailed {
                action,
                item_id,
                error,
            } => {
                log::error!("{} failed for task {}: {}", action, item_id, error);
            }
            SyncEvent::MutationRejected { item_id } => {
                log::warn!("Task {} already has a change in flight", item_id);
            }
            SyncEvent::MutationAbandoned { item_id } => {
                log::info!("Reopen of task {} abandoned", item_id);
            }
        }
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<SyncEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<SyncEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl EventSink for MemorySink {
    fn record(&self, event: SyncEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
