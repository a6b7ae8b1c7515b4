//! In-memory record service used by the sync and board tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Notify;

use super::client::{AuditQuery, ItemPage, ItemPatch, ItemQuery, NewItem, RecordService};
use super::error::SyncError;
use crate::core::resource::{AuditEvent, WorkItem};

#[derive(Default)]
pub struct StubService {
    pub items: Mutex<Vec<WorkItem>>,
    pub events: Mutex<Vec<AuditEvent>>,
    pub item_failures: Mutex<VecDeque<SyncError>>,
    pub audit_failures: Mutex<VecDeque<SyncError>>,
    pub write_failures: Mutex<VecDeque<SyncError>>,
    pub item_queries: Mutex<Vec<ItemQuery>>,
    pub audit_queries: Mutex<Vec<AuditQuery>>,
    pub updates: Mutex<Vec<(String, ItemPatch)>>,
    pub creates: Mutex<Vec<NewItem>>,
    pub deletes: Mutex<Vec<String>>,
    pub audit_gate: Mutex<Option<Arc<Notify>>>,
    /// Parks every write until notified.
    pub write_gate: Mutex<Option<Arc<Notify>>>,
    pub item_calls: AtomicUsize,
    pub audit_calls: AtomicUsize,
    pub write_calls: AtomicUsize,
    pub logged_out: AtomicBool,
    pub user: Mutex<Option<String>>,
}

impl StubService {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_items(&self, items: Vec<WorkItem>) {
        *self.items.lock().unwrap() = items;
    }

    pub fn set_events(&self, events: Vec<AuditEvent>) {
        *self.events.lock().unwrap() = events;
    }

    pub fn fail_items(&self, errors: impl IntoIterator<Item = SyncError>) {
        self.item_failures.lock().unwrap().extend(errors);
    }

    pub fn fail_audit(&self, errors: impl IntoIterator<Item = SyncError>) {
        self.audit_failures.lock().unwrap().extend(errors);
    }

    pub fn fail_writes(&self, errors: impl IntoIterator<Item = SyncError>) {
        self.write_failures.lock().unwrap().extend(errors);
    }

    pub fn set_user(&self, user: &str) {
        *self.user.lock().unwrap() = Some(user.to_string());
    }

    pub fn item_calls(&self) -> usize {
        self.item_calls.load(Ordering::SeqCst)
    }

    pub fn audit_calls(&self) -> usize {
        self.audit_calls.load(Ordering::SeqCst)
    }

    pub fn write_calls(&self) -> usize {
        self.write_calls.load(Ordering::SeqCst)
    }

    pub fn last_item_query(&self) -> Option<ItemQuery> {
        self.item_queries.lock().unwrap().last().cloned()
    }

    async fn write_step(&self) -> Result<(), SyncError> {
        self.write_calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.write_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        match self.write_failures.lock().unwrap().pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl RecordService for StubService {
    async fn list_items(&self, query: &ItemQuery) -> Result<ItemPage, SyncError> {
        self.item_calls.fetch_add(1, Ordering::SeqCst);
        self.item_queries.lock().unwrap().push(query.clone());
        if let Some(error) = self.item_failures.lock().unwrap().pop_front() {
            return Err(error);
        }
        Ok(ItemPage {
            items: self.items.lock().unwrap().clone(),
            pagination: None,
        })
    }

    async fn list_audit_events(&self, query: &AuditQuery) -> Result<Vec<AuditEvent>, SyncError> {
        self.audit_calls.fetch_add(1, Ordering::SeqCst);
        self.audit_queries.lock().unwrap().push(query.clone());
        let gate = self.audit_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if let Some(error) = self.audit_failures.lock().unwrap().pop_front() {
            return Err(error);
        }
        let events = self.events.lock().unwrap().clone();
        Ok(events.into_iter().take(query.page_size).collect())
    }

    async fn create_item(&self, item: &NewItem) -> Result<WorkItem, SyncError> {
        self.write_step().await?;
        self.creates.lock().unwrap().push(item.clone());
        let created = WorkItem::new(format!("new-{}", self.write_calls()), &item.title);
        self.items.lock().unwrap().push(created.clone());
        Ok(created)
    }

    async fn update_item(&self, id: &str, patch: &ItemPatch) -> Result<WorkItem, SyncError> {
        self.write_step().await?;
        self.updates
            .lock()
            .unwrap()
            .push((id.to_string(), patch.clone()));
        let mut items = self.items.lock().unwrap();
        let item = items
            .iter_mut()
            .find(|item| item.id == id)
            .ok_or_else(|| SyncError::Validation {
                message: format!("task {id} not found"),
            })?;
        if let Some(completed) = patch.completed {
            item.attributes.insert("completed", completed);
        }
        if let Some(due) = &patch.due {
            item.attributes
                .insert("due", crate::core::resource::format_timestamp(due));
        }
        Ok(item.clone())
    }

    async fn delete_item(&self, id: &str) -> Result<(), SyncError> {
        self.write_step().await?;
        self.deletes.lock().unwrap().push(id.to_string());
        self.items.lock().unwrap().retain(|item| item.id != id);
        Ok(())
    }

    fn is_authenticated(&self) -> bool {
        !self.logged_out.load(Ordering::SeqCst)
    }

    fn current_user_id(&self) -> Option<String> {
        self.user.lock().unwrap().clone()
    }
}
