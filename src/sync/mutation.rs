//! Status-changing commands against the record service.
//!
//! Every command shows its effect locally first (through a cache overlay),
//! commits, then forces the cache to re-poll. Reopening a task needs a due
//! date, which is resolved through a caller-supplied [`DuePrompt`].

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

use super::cache::{OverlayChange, SyncCache};
use super::client::{ItemPatch, NewItem};
use super::error::SyncError;
use super::events::SyncEvent;
use crate::core::resource::WorkItem;
use crate::core::status::{DerivedStatus, classify};

/// Due date proposed when a task is reopened without one: an hour from now.
pub fn default_reopen_due(now: DateTime<Utc>) -> DateTime<Utc> {
    now + Duration::hours(1)
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MutationError {
    #[error("task {0} already has a change in flight")]
    InFlight(String),
    #[error("tasks cannot be moved into the {0} column")]
    RejectedMove(DerivedStatus),
    #[error(transparent)]
    Commit(#[from] SyncError),
}

/// Question put to the caller before a task is reopened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DueRequest {
    pub item_id: String,
    pub title: Option<String>,
    /// Used unless the caller overrides it.
    pub default: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DueDecision {
    UseDefault,
    Explicit(DateTime<Utc>),
    /// Cancel the reopen; nothing is sent and nothing changes.
    Abandon,
}

#[async_trait]
pub trait DuePrompt: Send + Sync {
    async fn resolve_due(&self, request: &DueRequest) -> DueDecision;
}

/// Prompt that always takes the proposed default.
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptDefault;

#[async_trait]
impl DuePrompt for AcceptDefault {
    async fn resolve_due(&self, _request: &DueRequest) -> DueDecision {
        DueDecision::UseDefault
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationOutcome {
    Committed {
        item_id: String,
        due: Option<DateTime<Utc>>,
    },
    Abandoned,
}

#[derive(Clone)]
pub struct MutationPipeline {
    cache: SyncCache,
    prompt: Arc<dyn DuePrompt>,
    in_flight: Arc<Mutex<HashSet<String>>>,
}

/// Releases the item id when the command finishes, however it finishes.
struct InFlightGuard {
    in_flight: Arc<Mutex<HashSet<String>>>,
    item_id: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if let Ok(mut ids) = self.in_flight.lock() {
            ids.remove(&self.item_id);
        }
    }
}

impl MutationPipeline {
    pub fn new(cache: SyncCache, prompt: Arc<dyn DuePrompt>) -> Self {
        Self {
            cache,
            prompt,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn cache(&self) -> &SyncCache {
        &self.cache
    }

    pub fn is_in_flight(&self, item_id: &str) -> bool {
        self.in_flight
            .lock()
            .map(|ids| ids.contains(item_id))
            .unwrap_or(false)
    }

    /// Marks a task complete or reopens it.
    ///
    /// Completing commits straight away. Reopening needs a due date: an
    /// explicit `due` is used as is, otherwise the prompt is offered
    /// `now + 1h` and may accept it, replace it, or abandon the reopen.
    pub async fn set_completion(
        &self,
        item_id: &str,
        completed: bool,
        due: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<MutationOutcome, MutationError> {
        let _guard = self.claim(item_id)?;

        let due = if completed {
            due
        } else {
            match due {
                Some(due) => Some(due),
                None => match self.resolve_due(item_id, now).await {
                    Some(due) => Some(due),
                    None => {
                        self.cache.sink().record(SyncEvent::MutationAbandoned {
                            item_id: item_id.to_string(),
                        });
                        return Ok(MutationOutcome::Abandoned);
                    }
                },
            }
        };

        let action = if completed { "complete" } else { "reopen" };
        let patch = ItemPatch {
            completed: Some(completed),
            due,
            ..ItemPatch::default()
        };

        let previous = self
            .cache
            .apply_overlay(item_id, OverlayChange::Completion { completed, due });
        match self.cache.service().update_item(item_id, &patch).await {
            Ok(_) => {
                self.committed(action, item_id).await;
                Ok(MutationOutcome::Committed {
                    item_id: item_id.to_string(),
                    due,
                })
            }
            Err(error) => {
                self.cache.restore_overlay(item_id, previous);
                Err(self.failed(action, item_id, error))
            }
        }
    }

    /// Flips completion based on how the task currently classifies.
    pub async fn toggle_completion(
        &self,
        item: &WorkItem,
        now: DateTime<Utc>,
    ) -> Result<MutationOutcome, MutationError> {
        let completed = classify(item, now) == DerivedStatus::Completed;
        self.set_completion(&item.id, !completed, None, now).await
    }

    /// Shows a placeholder task until the server's copy is polled in.
    pub async fn create_item(&self, item: &NewItem) -> Result<WorkItem, MutationError> {
        let placeholder = self.cache.add_placeholder(item);
        match self.cache.service().create_item(item).await {
            Ok(created) => {
                self.committed("create", &created.id).await;
                Ok(created)
            }
            Err(error) => {
                self.cache.remove_placeholder(&placeholder);
                Err(self.failed("create", &placeholder, error))
            }
        }
    }

    pub async fn update_item(
        &self,
        item_id: &str,
        patch: &ItemPatch,
    ) -> Result<WorkItem, MutationError> {
        let _guard = self.claim(item_id)?;
        let previous = patch.completed.map(|completed| {
            let change = OverlayChange::Completion {
                completed,
                due: patch.due,
            };
            self.cache.apply_overlay(item_id, change)
        });
        match self.cache.service().update_item(item_id, patch).await {
            Ok(updated) => {
                self.committed("update", item_id).await;
                Ok(updated)
            }
            Err(error) => {
                if let Some(previous) = previous {
                    self.cache.restore_overlay(item_id, previous);
                }
                Err(self.failed("update", item_id, error))
            }
        }
    }

    pub async fn delete_item(&self, item_id: &str) -> Result<(), MutationError> {
        let _guard = self.claim(item_id)?;
        let previous = self.cache.apply_overlay(item_id, OverlayChange::Removal);
        match self.cache.service().delete_item(item_id).await {
            Ok(()) => {
                self.committed("delete", item_id).await;
                Ok(())
            }
            Err(error) => {
                self.cache.restore_overlay(item_id, previous);
                Err(self.failed("delete", item_id, error))
            }
        }
    }

    /// Resolves the reopen due date, `None` meaning the caller abandoned.
    async fn resolve_due(&self, item_id: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let request = DueRequest {
            item_id: item_id.to_string(),
            title: self
                .cache
                .find_item(item_id)
                .map(|item| item.title().to_string()),
            default: default_reopen_due(now),
        };
        match self.prompt.resolve_due(&request).await {
            DueDecision::UseDefault => Some(request.default),
            DueDecision::Explicit(due) => Some(due),
            DueDecision::Abandon => None,
        }
    }

    fn claim(&self, item_id: &str) -> Result<InFlightGuard, MutationError> {
        let inserted = match self.in_flight.lock() {
            Ok(mut ids) => ids.insert(item_id.to_string()),
            Err(poisoned) => poisoned.into_inner().insert(item_id.to_string()),
        };
        if !inserted {
            self.cache.sink().record(SyncEvent::MutationRejected {
                item_id: item_id.to_string(),
            });
            return Err(MutationError::InFlight(item_id.to_string()));
        }
        Ok(InFlightGuard {
            in_flight: Arc::clone(&self.in_flight),
            item_id: item_id.to_string(),
        })
    }

    async fn committed(&self, action: &'static str, item_id: &str) {
        self.cache.sink().record(SyncEvent::MutationCommitted {
            action,
            item_id: item_id.to_string(),
        });
        self.cache.invalidate().await;
    }

    fn failed(&self, action: &'static str, item_id: &str, error: SyncError) -> MutationError {
        self.cache.sink().record(SyncEvent::MutationFailed {
            action,
            item_id: item_id.to_string(),
            error: error.clone(),
        });
        MutationError::Commit(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::index::Scope;
    use crate::core::resource::format_timestamp;
    use crate::sync::cache::CacheSettings;
    use crate::sync::events::MemorySink;
    use crate::sync::testing::StubService;
    use chrono::TimeZone;

    const TASK: &str = "5d3c9a0e-1b2f-4c7d-8e9a-0b1c2d3e4f50";

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 10, 12, 0, 0).unwrap()
    }

    struct ScriptedPrompt {
        decision: DueDecision,
        requests: Mutex<Vec<DueRequest>>,
    }

    impl ScriptedPrompt {
        fn new(decision: DueDecision) -> Arc<Self> {
            Arc::new(Self {
                decision,
                requests: Mutex::new(Vec::new()),
            })
        }

        fn requests(&self) -> Vec<DueRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl DuePrompt for ScriptedPrompt {
        async fn resolve_due(&self, request: &DueRequest) -> DueDecision {
            self.requests.lock().unwrap().push(request.clone());
            self.decision
        }
    }

    fn finished_task() -> WorkItem {
        let mut item = WorkItem::new(TASK, "Send invoice");
        item.attributes.insert("completed", true);
        item.attributes
            .insert("due", format_timestamp(&(now() - Duration::days(2))));
        item
    }

    async fn pipeline(
        prompt: Arc<dyn DuePrompt>,
    ) -> (MutationPipeline, Arc<StubService>, Arc<MemorySink>) {
        let service = StubService::new();
        service.set_items(vec![finished_task()]);
        let sink = Arc::new(MemorySink::new());
        let settings = CacheSettings {
            default_scope: Scope::All,
            ..CacheSettings::default()
        };
        let cache = SyncCache::new(service.clone(), settings, sink.clone());
        cache.refresh().await.unwrap();
        (MutationPipeline::new(cache, prompt), service, sink)
    }

    fn status(pipeline: &MutationPipeline) -> Option<DerivedStatus> {
        pipeline.cache().board(now()).index.status_of(TASK)
    }

    #[tokio::test]
    async fn reopen_without_due_uses_default() {
        let prompt = ScriptedPrompt::new(DueDecision::UseDefault);
        let (pipeline, service, _) = pipeline(prompt.clone()).await;

        let outcome = pipeline.set_completion(TASK, false, None, now()).await.unwrap();
        let expected = now() + Duration::hours(1);
        assert_eq!(
            outcome,
            MutationOutcome::Committed {
                item_id: TASK.to_string(),
                due: Some(expected),
            }
        );

        let requests = prompt.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].default, expected);
        assert_eq!(requests[0].title.as_deref(), Some("Send invoice"));

        let updates = service.updates.lock().unwrap().clone();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].1.completed, Some(false));
        assert_eq!(updates[0].1.due, Some(expected));
        assert_eq!(status(&pipeline), Some(DerivedStatus::Pending));
    }

    #[tokio::test]
    async fn reopen_with_explicit_date_from_prompt() {
        let chosen = Utc.with_ymd_and_hms(2026, 7, 1, 9, 30, 0).unwrap();
        let prompt = ScriptedPrompt::new(DueDecision::Explicit(chosen));
        let (pipeline, service, _) = pipeline(prompt).await;

        pipeline.set_completion(TASK, false, None, now()).await.unwrap();
        assert_eq!(service.updates.lock().unwrap()[0].1.due, Some(chosen));
    }

    #[tokio::test]
    async fn supplied_due_skips_the_prompt() {
        let chosen = Utc.with_ymd_and_hms(2026, 6, 11, 8, 0, 0).unwrap();
        let prompt = ScriptedPrompt::new(DueDecision::Abandon);
        let (pipeline, service, _) = pipeline(prompt.clone()).await;

        let outcome = pipeline
            .set_completion(TASK, false, Some(chosen), now())
            .await
            .unwrap();
        assert!(matches!(outcome, MutationOutcome::Committed { due: Some(d), .. } if d == chosen));
        assert!(prompt.requests().is_empty());
        assert_eq!(service.write_calls(), 1);
    }

    #[tokio::test]
    async fn abandoned_reopen_changes_nothing() {
        let prompt = ScriptedPrompt::new(DueDecision::Abandon);
        let (pipeline, service, sink) = pipeline(prompt).await;
        let item_calls = service.item_calls();

        let outcome = pipeline.set_completion(TASK, false, None, now()).await.unwrap();
        assert_eq!(outcome, MutationOutcome::Abandoned);
        assert_eq!(service.write_calls(), 0);
        assert_eq!(service.item_calls(), item_calls);
        assert!(pipeline.cache().overlay(TASK).is_none());
        assert_eq!(status(&pipeline), Some(DerivedStatus::Completed));
        assert!(!pipeline.is_in_flight(TASK));
        assert!(sink
            .events()
            .contains(&SyncEvent::MutationAbandoned { item_id: TASK.to_string() }));
    }

    #[tokio::test]
    async fn completing_commits_without_prompt() {
        let prompt = ScriptedPrompt::new(DueDecision::Abandon);
        let (pipeline, service, _) = pipeline(prompt.clone()).await;
        service.set_items(vec![WorkItem::new(TASK, "Send invoice")]);
        pipeline.cache().refresh().await.unwrap();
        assert_eq!(status(&pipeline), Some(DerivedStatus::Pending));

        pipeline.set_completion(TASK, true, None, now()).await.unwrap();
        assert!(prompt.requests().is_empty());
        assert_eq!(service.updates.lock().unwrap()[0].1.due, None);
        assert_eq!(status(&pipeline), Some(DerivedStatus::Completed));
    }

    #[tokio::test]
    async fn success_invalidates_cache() {
        let (pipeline, service, _) = pipeline(Arc::new(AcceptDefault)).await;
        let item_calls = service.item_calls();
        let audit_calls = service.audit_calls();

        pipeline.set_completion(TASK, false, None, now()).await.unwrap();
        assert_eq!(service.item_calls(), item_calls + 1);
        assert_eq!(service.audit_calls(), audit_calls + 1);
        // The re-poll carries the server state, so the overlay is retired.
        assert!(pipeline.cache().overlay(TASK).is_none());
    }

    #[tokio::test]
    async fn failed_commit_leaves_state_untouched() {
        let (pipeline, service, _) = pipeline(Arc::new(AcceptDefault)).await;
        service.fail_writes([SyncError::Validation {
            message: "due must be in the future".into(),
        }]);
        let item_calls = service.item_calls();

        let err = pipeline
            .set_completion(TASK, false, None, now())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            MutationError::Commit(SyncError::Validation {
                message: "due must be in the future".into()
            })
        );
        assert_eq!(service.item_calls(), item_calls);
        assert!(pipeline.cache().overlay(TASK).is_none());
        assert_eq!(status(&pipeline), Some(DerivedStatus::Completed));
    }

    #[tokio::test]
    async fn second_command_on_same_item_is_rejected() {
        let (pipeline, service, _) = pipeline(Arc::new(AcceptDefault)).await;
        let gate = Arc::new(tokio::sync::Notify::new());
        *service.write_gate.lock().unwrap() = Some(gate.clone());

        let first = tokio::spawn({
            let pipeline = pipeline.clone();
            async move { pipeline.set_completion(TASK, false, None, now()).await }
        });
        while service.write_calls() == 0 {
            tokio::task::yield_now().await;
        }

        // Optimistic view while the commit is outstanding.
        assert_eq!(status(&pipeline), Some(DerivedStatus::Pending));
        let second = pipeline.set_completion(TASK, true, None, now()).await;
        assert_eq!(second, Err(MutationError::InFlight(TASK.to_string())));
        assert_eq!(service.write_calls(), 1);

        gate.notify_one();
        first.await.unwrap().unwrap();
        assert!(!pipeline.is_in_flight(TASK));
    }

    #[tokio::test]
    async fn toggle_reopens_completed_task() {
        let (pipeline, service, _) = pipeline(Arc::new(AcceptDefault)).await;
        pipeline.toggle_completion(&finished_task(), now()).await.unwrap();
        assert_eq!(service.updates.lock().unwrap()[0].1.completed, Some(false));
    }

    #[tokio::test]
    async fn create_and_delete_invalidate() {
        let (pipeline, service, _) = pipeline(Arc::new(AcceptDefault)).await;

        let created = pipeline
            .create_item(&NewItem {
                title: "Book venue".into(),
                ..NewItem::default()
            })
            .await
            .unwrap();
        assert!(pipeline.cache().find_item(&created.id).is_some());

        pipeline.delete_item(TASK).await.unwrap();
        assert_eq!(service.deletes.lock().unwrap().as_slice(), [TASK.to_string()]);
        assert!(pipeline.cache().find_item(TASK).is_none());
    }

    fn park_writes(service: &StubService) -> Arc<tokio::sync::Notify> {
        let gate = Arc::new(tokio::sync::Notify::new());
        *service.write_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    async fn wait_for_write(service: &StubService) {
        while service.write_calls() == 0 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn reopen_hides_completed_status_text() {
        let (pipeline, service, _) = pipeline(Arc::new(AcceptDefault)).await;
        let mut item = finished_task();
        item.attributes.insert("situacao", "Concluída");
        service.set_items(vec![item]);
        pipeline.cache().refresh().await.unwrap();
        assert_eq!(status(&pipeline), Some(DerivedStatus::Completed));

        let gate = park_writes(&service);
        let reopen = tokio::spawn({
            let pipeline = pipeline.clone();
            async move { pipeline.set_completion(TASK, false, None, now()).await }
        });
        wait_for_write(&service).await;

        assert_eq!(status(&pipeline), Some(DerivedStatus::Pending));
        let shown = pipeline.cache().find_item(TASK).unwrap();
        assert!(shown.attributes.get("situacao").is_none());
        assert_eq!(shown.title(), "Send invoice");

        gate.notify_one();
        reopen.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn pending_delete_hides_the_task() {
        let (pipeline, service, _) = pipeline(Arc::new(AcceptDefault)).await;
        let gate = park_writes(&service);

        let delete = tokio::spawn({
            let pipeline = pipeline.clone();
            async move { pipeline.delete_item(TASK).await }
        });
        wait_for_write(&service).await;

        assert_eq!(status(&pipeline), None);
        assert!(pipeline.cache().find_item(TASK).is_none());
        assert_eq!(
            pipeline.cache().overlay(TASK).map(|o| o.change),
            Some(OverlayChange::Removal)
        );

        gate.notify_one();
        delete.await.unwrap().unwrap();
        assert!(pipeline.cache().overlay(TASK).is_none());
        assert_eq!(status(&pipeline), None);
    }

    #[tokio::test]
    async fn failed_delete_brings_the_task_back() {
        let (pipeline, service, _) = pipeline(Arc::new(AcceptDefault)).await;
        service.fail_writes([SyncError::Validation {
            message: "task is locked".into(),
        }]);

        let err = pipeline.delete_item(TASK).await.unwrap_err();
        assert!(matches!(err, MutationError::Commit(SyncError::Validation { .. })));
        assert!(pipeline.cache().overlay(TASK).is_none());
        assert_eq!(status(&pipeline), Some(DerivedStatus::Completed));
    }

    #[tokio::test]
    async fn pending_create_shows_a_placeholder() {
        let (pipeline, service, _) = pipeline(Arc::new(AcceptDefault)).await;
        let gate = park_writes(&service);
        let new_item = NewItem {
            title: "Book venue".into(),
            due: Some(now() + Duration::days(3)),
            ..NewItem::default()
        };

        let create = tokio::spawn({
            let pipeline = pipeline.clone();
            let new_item = new_item.clone();
            async move { pipeline.create_item(&new_item).await }
        });
        wait_for_write(&service).await;

        let board = pipeline.cache().board(now());
        let shown: Vec<_> = board.items.iter().filter(|i| i.title() == "Book venue").collect();
        assert_eq!(shown.len(), 1);
        assert!(shown[0].id.starts_with(crate::sync::cache::PLACEHOLDER_PREFIX));
        assert_eq!(board.index.status_of(&shown[0].id), Some(DerivedStatus::Pending));

        gate.notify_one();
        let created = create.await.unwrap().unwrap();
        let board = pipeline.cache().board(now());
        let shown: Vec<_> = board.items.iter().filter(|i| i.title() == "Book venue").collect();
        assert_eq!(shown.len(), 1);
        assert_eq!(shown[0].id, created.id);
    }

    #[tokio::test]
    async fn failed_create_drops_the_placeholder() {
        let (pipeline, service, _) = pipeline(Arc::new(AcceptDefault)).await;
        service.fail_writes([SyncError::TransientNetwork("connection reset".into())]);

        let err = pipeline
            .create_item(&NewItem {
                title: "Book venue".into(),
                ..NewItem::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, MutationError::Commit(_)));
        let board = pipeline.cache().board(now());
        assert_eq!(board.items.len(), 1);
        assert!(board.items.iter().all(|i| i.title() != "Book venue"));
    }
}
