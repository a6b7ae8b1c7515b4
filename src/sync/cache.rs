//! Read-through cache of the task list merged with history-derived deletions.
//!
//! Two sources are polled on their own timers: the task list and a window
//! of recent history entries. Each poll runs outside the state lock and
//! applies its result in one short critical section. The pair handed to
//! readers (`Snapshot`) is rebuilt from the last complete task list and the
//! last complete deletion set, so a slow history fetch never holds back a
//! fresh task list and a reader never sees a half-updated deletion set.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use super::client::{AuditQuery, ItemQuery, NewItem, REQUEST_TIMEOUT, RecordService};
use super::error::SyncError;
use super::events::{EventSink, Source, SyncEvent};
use super::retry::RetryPolicy;
use crate::core::attributes::{
    COMPLETED_FLAG_ALIASES, COMPLETION_TIMESTAMP_ALIASES, STATUS_ALIASES, fold_text,
    has_deletion_fields,
};
use crate::core::audit;
use crate::core::index::{LocalFilter, Scope, StatusIndex};
use crate::core::resource::{AuditEvent, Relationship, WorkItem, format_timestamp};
use crate::core::status::{DerivedStatus, status_indicates_completed};

/// Prefix of the ids given to tasks still being created.
pub const PLACEHOLDER_PREFIX: &str = "pending-create-";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSettings {
    pub items_interval: Duration,
    pub items_stale_after: Duration,
    pub audit_interval: Duration,
    pub audit_stale_after: Duration,
    pub page_size: usize,
    pub audit_window: usize,
    pub history_window: usize,
    pub min_search_len: usize,
    pub search_debounce: Duration,
    pub default_scope: Scope,
    pub retry: RetryPolicy,
    /// Longest a single list request may take before it counts as a
    /// transient failure.
    pub request_timeout: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            items_interval: Duration::from_secs(15),
            items_stale_after: Duration::from_secs(300),
            audit_interval: Duration::from_secs(15),
            audit_stale_after: Duration::from_secs(60),
            page_size: 50,
            audit_window: 500,
            history_window: 30,
            min_search_len: 2,
            search_debounce: Duration::from_millis(500),
            default_scope: Scope::Mine,
            retry: RetryPolicy::default(),
            request_timeout: REQUEST_TIMEOUT,
        }
    }
}

/// Lifecycle of one polled source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourcePhase {
    Idle,
    Fetching,
    Fresh,
    Stale,
    Errored,
}

/// User-facing filter dimensions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filters {
    pub search: String,
    pub scope: Scope,
    pub category: Option<String>,
    pub assignee: Option<String>,
}

/// What an overlay does to a cached task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OverlayChange {
    Completion {
        completed: bool,
        due: Option<DateTime<Utc>>,
    },
    /// Deletion in flight: the task is hidden.
    Removal,
}

/// Local change shown before the server confirms it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Overlay {
    pub change: OverlayChange,
    /// Task-list generation current when the overlay was applied. Only a
    /// poll started after that point can retire it.
    applied_at_generation: u64,
}

/// Task shown while its creation is in flight.
#[derive(Debug, Clone, PartialEq)]
struct Placeholder {
    item: WorkItem,
    applied_at_generation: u64,
}

/// Tasks and deletion overrides as last published together.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub items: Vec<WorkItem>,
    pub overrides: HashSet<String>,
}

/// Grouped view handed to the presentation layer.
#[derive(Debug, Clone)]
pub struct Board {
    /// Admitted tasks, overlays applied.
    pub items: Vec<WorkItem>,
    pub index: StatusIndex,
    /// No task list yet and one is being fetched.
    pub loading: bool,
    pub refreshing: bool,
    /// Last task-list failure, or the authentication failure that
    /// suspended polling. Other history failures are never surfaced here.
    pub error: Option<SyncError>,
    /// Polling is suspended until the session is restored.
    pub auth_required: bool,
    pub items_phase: SourcePhase,
    pub audit_phase: SourcePhase,
}

impl Board {
    pub fn items_in(&self, status: DerivedStatus) -> Vec<&WorkItem> {
        self.index
            .bucket(status)
            .iter()
            .filter_map(|id| self.items.iter().find(|item| &item.id == id))
            .collect()
    }

    pub fn item(&self, id: &str) -> Option<&WorkItem> {
        self.items.iter().find(|item| item.id == id)
    }
}

struct SourceSlot<T> {
    data: T,
    fetching: bool,
    generation: u64,
    fetched_at: Option<Instant>,
    error: Option<SyncError>,
}

impl<T: Default> SourceSlot<T> {
    fn new() -> Self {
        Self {
            data: T::default(),
            fetching: false,
            generation: 0,
            fetched_at: None,
            error: None,
        }
    }

    fn begin(&mut self) -> u64 {
        self.generation += 1;
        self.fetching = true;
        self.generation
    }

    /// Applies a result unless a newer fetch has started since `generation`.
    fn finish(&mut self, generation: u64, result: Result<T, SyncError>) -> bool {
        if generation != self.generation {
            return false;
        }
        self.fetching = false;
        match result {
            Ok(data) => {
                self.data = data;
                self.fetched_at = Some(Instant::now());
                self.error = None;
            }
            Err(error) => self.error = Some(error),
        }
        true
    }

    fn phase(&self, stale_after: Duration) -> SourcePhase {
        if self.fetching {
            return SourcePhase::Fetching;
        }
        if self.error.is_some() {
            return SourcePhase::Errored;
        }
        match self.fetched_at {
            None => SourcePhase::Idle,
            Some(at) if at.elapsed() > stale_after => SourcePhase::Stale,
            Some(_) => SourcePhase::Fresh,
        }
    }
}

struct CacheState {
    items: SourceSlot<Vec<WorkItem>>,
    audit: SourceSlot<HashSet<String>>,
    published: Arc<Snapshot>,
    overlays: HashMap<String, Overlay>,
    placeholders: Vec<Placeholder>,
    next_placeholder: u64,
    filters: Filters,
    /// Latest typed search term, applied once the debounce settles.
    pending_search: String,
    search_generation: u64,
    suspended: bool,
}

impl CacheState {
    fn new(scope: Scope) -> Self {
        Self {
            items: SourceSlot::new(),
            audit: SourceSlot::new(),
            published: Arc::new(Snapshot::default()),
            overlays: HashMap::new(),
            placeholders: Vec::new(),
            next_placeholder: 0,
            filters: Filters {
                scope,
                ..Filters::default()
            },
            pending_search: String::new(),
            search_generation: 0,
            suspended: false,
        }
    }
}

struct Inner {
    service: Arc<dyn RecordService>,
    settings: CacheSettings,
    sink: Arc<dyn EventSink>,
    state: RwLock<CacheState>,
    warned: Mutex<HashSet<String>>,
}

/// Cheap-to-clone handle; clones share one cache.
#[derive(Clone)]
pub struct SyncCache {
    inner: Arc<Inner>,
}

impl SyncCache {
    pub fn new(
        service: Arc<dyn RecordService>,
        settings: CacheSettings,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let state = CacheState::new(settings.default_scope);
        Self {
            inner: Arc::new(Inner {
                service,
                settings,
                sink,
                state: RwLock::new(state),
                warned: Mutex::new(HashSet::new()),
            }),
        }
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.inner.settings
    }

    pub(crate) fn service(&self) -> &Arc<dyn RecordService> {
        &self.inner.service
    }

    pub(crate) fn sink(&self) -> &Arc<dyn EventSink> {
        &self.inner.sink
    }

    fn read(&self) -> RwLockReadGuard<'_, CacheState> {
        self.inner
            .state
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, CacheState> {
        self.inner
            .state
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // --- Reads ---

    /// Current grouped view at instant `now`.
    pub fn board(&self, now: DateTime<Utc>) -> Board {
        let settings = &self.inner.settings;
        let st = self.read();
        let snapshot = Arc::clone(&st.published);
        let overlays = st.overlays.clone();
        let placeholders: Vec<WorkItem> =
            st.placeholders.iter().map(|p| p.item.clone()).collect();
        let filters = st.filters.clone();
        let items_phase = st.items.phase(settings.items_stale_after);
        let audit_phase = st.audit.phase(settings.audit_stale_after);
        let loading = st.items.fetching && st.items.fetched_at.is_none();
        let error = st.items.error.clone();
        let auth_required = st.suspended;
        drop(st);

        let filter = LocalFilter {
            scope: filters.scope,
            identity: self.inner.service.current_user_id(),
            category: filters.category,
            assignee: filters.assignee,
        };

        let items: Vec<WorkItem> = snapshot
            .items
            .iter()
            .filter_map(|item| overlaid(item, overlays.get(&item.id)))
            .chain(placeholders)
            .filter(|item| filter.admits(item))
            .collect();

        let index = StatusIndex::build(&items, &snapshot.overrides, &filter, now);
        self.report_suspicious_overdue(&items, &index);

        Board {
            items,
            index,
            loading,
            refreshing: items_phase == SourcePhase::Fetching
                || audit_phase == SourcePhase::Fetching,
            error,
            auth_required,
            items_phase,
            audit_phase,
        }
    }

    /// Admitted tasks with overlays applied.
    pub fn items(&self, now: DateTime<Utc>) -> Vec<WorkItem> {
        self.board(now).items
    }

    /// The last published task/override pair, unfiltered.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        Arc::clone(&self.read().published)
    }

    pub fn find_item(&self, id: &str) -> Option<WorkItem> {
        let st = self.read();
        st.published
            .items
            .iter()
            .find(|item| item.id == id)
            .and_then(|item| overlaid(item, st.overlays.get(id)))
    }

    pub fn phase(&self, source: Source) -> SourcePhase {
        let st = self.read();
        match source {
            Source::Items => st.items.phase(self.inner.settings.items_stale_after),
            Source::Audit => st.audit.phase(self.inner.settings.audit_stale_after),
        }
    }

    pub fn filters(&self) -> Filters {
        self.read().filters.clone()
    }

    /// The search term as typed, possibly not applied yet.
    pub fn search_term(&self) -> String {
        self.read().pending_search.clone()
    }

    pub fn is_suspended(&self) -> bool {
        self.read().suspended
    }

    // --- Polling ---

    /// Fetches the task list and republishes.
    pub async fn poll_items(&self) -> Result<(), SyncError> {
        let sink = self.inner.sink.as_ref();
        if let Some(error) = self.check_session(Source::Items) {
            return Err(error);
        }

        let (query, generation) = {
            let mut st = self.write();
            (self.item_query(&st.filters), st.items.begin())
        };
        sink.record(SyncEvent::PollStarted {
            source: Source::Items,
        });

        let service = &self.inner.service;
        let limit = self.inner.settings.request_timeout;
        let result = self
            .inner
            .settings
            .retry
            .run("list tasks", sink, || bounded(limit, service.list_items(&query)))
            .await
            .map(|page| page.items);

        let outcome = result.as_ref().map(Vec::len).map_err(Clone::clone);
        {
            let mut st = self.write();
            let applied = st.items.finish(generation, result);
            if applied {
                match &outcome {
                    Ok(_) => {
                        st.overlays
                            .retain(|_, overlay| overlay.applied_at_generation >= generation);
                        st.placeholders
                            .retain(|p| p.applied_at_generation >= generation);
                        self.publish(&mut st);
                    }
                    Err(error) if error.is_auth() => suspend(&mut st, error),
                    Err(_) => {}
                }
            }
        }

        match outcome {
            Ok(count) => {
                sink.record(SyncEvent::PollSucceeded {
                    source: Source::Items,
                    count,
                });
                Ok(())
            }
            Err(error) => {
                sink.record(SyncEvent::PollFailed {
                    source: Source::Items,
                    error: error.clone(),
                });
                Err(error)
            }
        }
    }

    /// Fetches the history window and recomputes the deletion overrides.
    /// On failure the previous overrides stay in place.
    pub async fn poll_audit(&self) -> Result<(), SyncError> {
        let sink = self.inner.sink.as_ref();
        if let Some(error) = self.check_session(Source::Audit) {
            return Err(error);
        }

        let generation = self.write().audit.begin();
        sink.record(SyncEvent::PollStarted {
            source: Source::Audit,
        });

        let query = AuditQuery::recent(self.inner.settings.audit_window);
        let service = &self.inner.service;
        let limit = self.inner.settings.request_timeout;
        let result = self
            .inner
            .settings
            .retry
            .run("list history", sink, || {
                bounded(limit, service.list_audit_events(&query))
            })
            .await
            .map(|events| audit::correlate(&events));

        let outcome = result.as_ref().map(HashSet::len).map_err(Clone::clone);
        {
            let mut st = self.write();
            if st.audit.finish(generation, result) {
                match &outcome {
                    Err(error) if error.is_auth() => suspend(&mut st, error),
                    Err(_) => {}
                    Ok(_) => self.publish(&mut st),
                }
            }
        }

        match outcome {
            Ok(count) => {
                sink.record(SyncEvent::PollSucceeded {
                    source: Source::Audit,
                    count,
                });
                Ok(())
            }
            Err(error) => {
                sink.record(SyncEvent::PollFailed {
                    source: Source::Audit,
                    error: error.clone(),
                });
                Err(error)
            }
        }
    }

    pub async fn poll(&self, source: Source) -> Result<(), SyncError> {
        match source {
            Source::Items => self.poll_items().await,
            Source::Audit => self.poll_audit().await,
        }
    }

    /// Manual refresh: lifts an auth suspension and re-polls both sources
    /// regardless of staleness. Returns the task-list outcome.
    pub async fn refresh(&self) -> Result<(), SyncError> {
        self.write().suspended = false;
        let (items, _audit) = tokio::join!(self.poll_items(), self.poll_audit());
        items
    }

    /// Forces both sources to re-poll after a successful mutation.
    pub async fn invalidate(&self) {
        let (_items, _audit) = tokio::join!(self.poll_items(), self.poll_audit());
    }

    /// Polls whichever sources are idle, stale or errored.
    pub async fn ensure_fresh(&self) {
        let items_due = self.needs_poll(Source::Items);
        let audit_due = self.needs_poll(Source::Audit);
        let items = async {
            if items_due {
                let _ = self.poll_items().await;
            }
        };
        let audit = async {
            if audit_due {
                let _ = self.poll_audit().await;
            }
        };
        tokio::join!(items, audit);
    }

    fn needs_poll(&self, source: Source) -> bool {
        matches!(
            self.phase(source),
            SourcePhase::Idle | SourcePhase::Stale | SourcePhase::Errored
        )
    }

    /// Call after a fresh login; restarts polling.
    pub async fn resume(&self) -> Result<(), SyncError> {
        self.refresh().await
    }

    /// Drops every cached task, override and overlay. Filters, the search
    /// term and an auth suspension survive; polls started before the clear
    /// are discarded when they land.
    pub fn clear(&self) {
        let mut st = self.write();
        let fresh = CacheState::new(st.filters.scope);
        let previous = std::mem::replace(&mut *st, fresh);
        st.items.generation = previous.items.generation + 1;
        st.audit.generation = previous.audit.generation + 1;
        st.next_placeholder = previous.next_placeholder;
        st.filters = previous.filters;
        st.pending_search = previous.pending_search;
        st.search_generation = previous.search_generation;
        st.suspended = previous.suspended;
        if previous.suspended {
            st.items.error = previous.items.error;
        }
        if let Ok(mut warned) = self.inner.warned.lock() {
            warned.clear();
        }
    }

    /// Spawns the two background poll loops. The first tick fires at once.
    pub fn start(&self) -> Poller {
        let (stop_tx, stop_rx) = watch::channel(false);
        let items = tokio::spawn(poll_loop(
            self.clone(),
            Source::Items,
            self.inner.settings.items_interval,
            stop_rx.clone(),
        ));
        let audit = tokio::spawn(poll_loop(
            self.clone(),
            Source::Audit,
            self.inner.settings.audit_interval,
            stop_rx,
        ));
        Poller {
            stop_tx,
            tasks: vec![items, audit],
        }
    }

    // --- Filters ---

    /// Records the typed term; it is applied (and the list re-polled) only
    /// after the debounce delay passes without another keystroke.
    pub fn set_search_term(&self, term: impl Into<String>) {
        let term = term.into();
        let generation = {
            let mut st = self.write();
            st.pending_search = term.clone();
            st.search_generation += 1;
            st.search_generation
        };

        let cache = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(cache.inner.settings.search_debounce).await;
            let applied = {
                let mut st = cache.write();
                if st.search_generation != generation || st.filters.search == term {
                    false
                } else {
                    st.filters.search = term.clone();
                    true
                }
            };
            if applied {
                cache.inner.sink.record(SyncEvent::SearchApplied { term });
                let _ = cache.poll_items().await;
            }
        });
    }

    pub async fn set_scope(&self, scope: Scope) -> Result<(), SyncError> {
        self.update_filters(|f| f.scope = scope).await
    }

    pub async fn set_category(&self, category: Option<String>) -> Result<(), SyncError> {
        self.update_filters(|f| f.category = category).await
    }

    pub async fn set_assignee(&self, assignee: Option<String>) -> Result<(), SyncError> {
        self.update_filters(|f| f.assignee = assignee).await
    }

    async fn update_filters(&self, change: impl FnOnce(&mut Filters)) -> Result<(), SyncError> {
        let changed = {
            let mut st = self.write();
            let before = st.filters.clone();
            change(&mut st.filters);
            st.filters != before
        };
        if changed {
            self.poll_items().await
        } else {
            Ok(())
        }
    }

    fn item_query(&self, filters: &Filters) -> ItemQuery {
        let settings = &self.inner.settings;
        let search = filters.search.trim();
        ItemQuery {
            search: (search.chars().count() >= settings.min_search_len)
                .then(|| search.to_string()),
            assigned_to_me: filters.scope == Scope::Mine,
            category: filters.category.clone(),
            assignee: filters.assignee.clone(),
            page_size: settings.page_size,
            ..ItemQuery::default()
        }
    }

    // --- History lookup ---

    /// Recent history entries concerning one task. Failures yield an empty
    /// list.
    pub async fn history_for(&self, item_id: &str) -> Vec<AuditEvent> {
        let query = AuditQuery::recent(self.inner.settings.history_window);
        let limit = self.inner.settings.request_timeout;
        match bounded(limit, self.inner.service.list_audit_events(&query)).await {
            Ok(events) => audit::history_for(&events, item_id)
                .into_iter()
                .cloned()
                .collect(),
            Err(error) => {
                self.inner.sink.record(SyncEvent::HistoryLookupFailed {
                    item_id: item_id.to_string(),
                    error,
                });
                Vec::new()
            }
        }
    }

    // --- Optimistic overlays ---

    /// Installs an overlay and returns the one it replaced.
    pub(crate) fn apply_overlay(&self, item_id: &str, change: OverlayChange) -> Option<Overlay> {
        let mut st = self.write();
        let applied_at_generation = st.items.generation;
        st.overlays.insert(
            item_id.to_string(),
            Overlay {
                change,
                applied_at_generation,
            },
        )
    }

    /// Puts back whatever overlay preceded a failed mutation.
    pub(crate) fn restore_overlay(&self, item_id: &str, previous: Option<Overlay>) {
        let mut st = self.write();
        match previous {
            Some(overlay) => st.overlays.insert(item_id.to_string(), overlay),
            None => st.overlays.remove(item_id),
        };
    }

    pub fn overlay(&self, item_id: &str) -> Option<Overlay> {
        self.read().overlays.get(item_id).cloned()
    }

    /// Shows a task for `item` until the next task-list poll. Returns the
    /// placeholder id.
    pub(crate) fn add_placeholder(&self, item: &NewItem) -> String {
        let identity = self.inner.service.current_user_id();
        let mut st = self.write();
        st.next_placeholder += 1;
        let id = format!("{}{}", PLACEHOLDER_PREFIX, st.next_placeholder);

        let mut placeholder = WorkItem::new(id.clone(), &item.title);
        placeholder.attributes.insert("completed", false);
        if let Some(description) = &item.description {
            placeholder.attributes.insert("description", description.as_str());
        }
        if let Some(due) = &item.due {
            placeholder.attributes.insert("due", format_timestamp(due));
        }
        if let Some(assignee) = item.assignee_id.clone().or(identity) {
            placeholder
                .relationships
                .insert("assignee".to_string(), Relationship::to_one("users", &assignee));
        }
        if let Some(category) = &item.category_id {
            placeholder
                .relationships
                .insert("category".to_string(), Relationship::to_one("categories", category));
        }

        let applied_at_generation = st.items.generation;
        st.placeholders.push(Placeholder {
            item: placeholder,
            applied_at_generation,
        });
        id
    }

    pub(crate) fn remove_placeholder(&self, id: &str) {
        self.write().placeholders.retain(|p| p.item.id != id);
    }

    // --- internals ---

    /// Returns the auth error when polling is suspended or no session exists.
    /// A missing session is recorded on the board.
    fn check_session(&self, source: Source) -> Option<SyncError> {
        let authenticated = self.inner.service.is_authenticated();
        let suspended = {
            let mut st = self.write();
            if !authenticated && !st.suspended {
                suspend(
                    &mut st,
                    &SyncError::Authentication("no session".to_string()),
                );
            }
            st.suspended
        };
        if suspended {
            self.inner.sink.record(SyncEvent::PollSuspended { source });
            Some(SyncError::Authentication(
                "polling suspended until login".to_string(),
            ))
        } else {
            None
        }
    }

    /// Swaps the published pair: the last complete task list with the last
    /// complete override set.
    fn publish(&self, st: &mut CacheState) {
        st.published = Arc::new(Snapshot {
            items: st.items.data.clone(),
            overrides: st.audit.data.clone(),
        });
        self.inner.sink.record(SyncEvent::Published {
            items: st.published.items.len(),
            overrides: st.published.overrides.len(),
        });
    }

    fn report_suspicious_overdue(&self, items: &[WorkItem], index: &StatusIndex) {
        let Ok(mut warned) = self.inner.warned.lock() else {
            return;
        };
        for id in index.bucket(DerivedStatus::Overdue) {
            let suspicious = items
                .iter()
                .find(|item| &item.id == id)
                .is_some_and(|item| has_deletion_fields(&item.attributes));
            if suspicious && warned.insert(id.clone()) {
                self.inner
                    .sink
                    .record(SyncEvent::OverdueWithDeletionSignals { item_id: id.clone() });
            }
        }
    }
}

/// Stops polling and puts `error` on the board until the next task-list
/// result.
fn suspend(st: &mut CacheState, error: &SyncError) {
    st.suspended = true;
    st.items.error = Some(error.clone());
}

/// Bounds one request; a request that outlives `limit` is a transient
/// failure.
async fn bounded<T>(
    limit: Duration,
    request: impl Future<Output = Result<T, SyncError>>,
) -> Result<T, SyncError> {
    tokio::time::timeout(limit, request).await.unwrap_or_else(|_| {
        Err(SyncError::TransientNetwork(format!(
            "no response within {}s",
            limit.as_secs()
        )))
    })
}

/// The task as the board shows it, or `None` while its deletion is in flight.
fn overlaid(item: &WorkItem, overlay: Option<&Overlay>) -> Option<WorkItem> {
    match overlay.map(|o| &o.change) {
        None => Some(item.clone()),
        Some(OverlayChange::Removal) => None,
        Some(OverlayChange::Completion { completed, due }) => {
            Some(with_completion(item, *completed, due.as_ref()))
        }
    }
}

fn with_completion(item: &WorkItem, completed: bool, due: Option<&DateTime<Utc>>) -> WorkItem {
    let mut item = item.clone();
    if !completed {
        let completed_text: Vec<&str> = STATUS_ALIASES
            .iter()
            .copied()
            .filter(|key| {
                item.attributes
                    .str(key)
                    .is_some_and(|text| status_indicates_completed(&fold_text(text)))
            })
            .collect();
        for key in completed_text
            .into_iter()
            .chain(COMPLETED_FLAG_ALIASES.iter().copied())
            .chain(COMPLETION_TIMESTAMP_ALIASES.iter().copied())
        {
            item.attributes.remove(key);
        }
    }
    item.attributes.insert("completed", completed);
    if let Some(due) = due {
        item.attributes.insert("due", format_timestamp(due));
    }
    item
}

async fn poll_loop(cache: SyncCache, source: Source, period: Duration, mut stop: watch::Receiver<bool>) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = stop.changed() => break,
            _ = interval.tick() => {
                if cache.is_suspended() {
                    continue;
                }
                let _ = cache.poll(source).await;
            }
        }
    }
}

/// Handle to the background poll loops.
pub struct Poller {
    stop_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl Poller {
    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                log::error!("Poll loop ended abnormally: {}", e);
            }
        }
    }
}
