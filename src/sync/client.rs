use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Method, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::SyncError;
use crate::core::resource::{AuditEvent, HISTORIC_TYPE, Relationship, TASK_TYPE, WorkItem};

/// Largest page the record service accepts.
pub const MAX_PAGE_SIZE: usize = 500;
pub const DEFAULT_ITEM_SORT: &str = "-registered-at";
/// Upper bound on one request, connect included.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_AUDIT_SORT: &str = "-date-time";
pub const DEFAULT_INCLUDE: &[&str] = &["assignee", "person", "category", "task-historics"];

/// Server-side filter, sort and paging for the task list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemQuery {
    pub search: Option<String>,
    /// Ask the service for the caller's own tasks only.
    pub assigned_to_me: bool,
    pub category: Option<String>,
    pub assignee: Option<String>,
    pub sort: String,
    pub page_size: usize,
    pub include: Vec<String>,
}

impl Default for ItemQuery {
    fn default() -> Self {
        Self {
            search: None,
            assigned_to_me: false,
            category: None,
            assignee: None,
            sort: DEFAULT_ITEM_SORT.to_string(),
            page_size: 50,
            include: DEFAULT_INCLUDE.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl ItemQuery {
    /// Query-string pairs in JSON:API bracket notation.
    pub fn params(&self) -> Vec<(String, String)> {
        let mut params = Vec::new();
        if let Some(search) = &self.search {
            params.push(("filter[search]".to_string(), search.clone()));
        }
        if self.assigned_to_me {
            params.push(("filter[assigned]".to_string(), "user_tasks".to_string()));
        }
        if let Some(category) = &self.category {
            params.push(("filter[category]".to_string(), category.clone()));
        }
        if let Some(assignee) = &self.assignee {
            params.push(("filter[assignee]".to_string(), assignee.clone()));
        }
        params.push(("sort".to_string(), self.sort.clone()));
        params.push((
            "page[size]".to_string(),
            self.page_size.clamp(1, MAX_PAGE_SIZE).to_string(),
        ));
        if !self.include.is_empty() {
            params.push(("include".to_string(), self.include.join(",")));
        }
        params
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditQuery {
    pub sort: String,
    pub page_size: usize,
}

impl AuditQuery {
    pub fn recent(page_size: usize) -> Self {
        Self {
            sort: DEFAULT_AUDIT_SORT.to_string(),
            page_size,
        }
    }

    pub fn params(&self) -> Vec<(String, String)> {
        vec![
            ("sort".to_string(), self.sort.clone()),
            (
                "page[size]".to_string(),
                self.page_size.clamp(1, MAX_PAGE_SIZE).to_string(),
            ),
        ]
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Pagination {
    #[serde(default)]
    pub current_page: Option<u64>,
    #[serde(default)]
    pub total_pages: Option<u64>,
    #[serde(default)]
    pub total_count: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ItemPage {
    pub items: Vec<WorkItem>,
    pub pagination: Option<Pagination>,
}

/// Attributes of a task to create.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewItem {
    pub title: String,
    pub description: Option<String>,
    pub due: Option<DateTime<Utc>>,
    pub assignee_id: Option<String>,
    pub category_id: Option<String>,
}

/// Partial update; `None` fields are left alone on the server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ItemPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed: Option<bool>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_due"
    )]
    pub due: Option<DateTime<Utc>>,
}

fn serialize_due<S: serde::Serializer>(
    due: &Option<DateTime<Utc>>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match due {
        Some(ts) => serializer.serialize_str(&crate::core::resource::format_timestamp(ts)),
        None => serializer.serialize_none(),
    }
}

/// The record service as this crate sees it.
#[async_trait]
pub trait RecordService: Send + Sync {
    async fn list_items(&self, query: &ItemQuery) -> Result<ItemPage, SyncError>;
    async fn list_audit_events(&self, query: &AuditQuery) -> Result<Vec<AuditEvent>, SyncError>;
    async fn create_item(&self, item: &NewItem) -> Result<WorkItem, SyncError>;
    async fn update_item(&self, id: &str, patch: &ItemPatch) -> Result<WorkItem, SyncError>;
    async fn delete_item(&self, id: &str) -> Result<(), SyncError>;
    /// Whether a session token is present.
    fn is_authenticated(&self) -> bool;
    /// Identity the "mine" scope compares assignees against.
    fn current_user_id(&self) -> Option<String>;
}

#[derive(Deserialize)]
struct Document<T> {
    data: T,
    #[serde(default)]
    meta: Option<Value>,
}

/// JSON:API client over reqwest with bearer-token auth.
pub struct HttpRecordService {
    base_url: String,
    token: RwLock<Option<String>>,
    user_id: Option<String>,
    http: Client,
}

impl HttpRecordService {
    pub fn new(
        base_url: &str,
        token: Option<String>,
        user_id: Option<String>,
    ) -> Result<Self, SyncError> {
        let http = Client::builder()
            .user_agent(concat!("taskboard/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| SyncError::TransientNetwork(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token: RwLock::new(token.filter(|t| !t.trim().is_empty())),
            user_id,
            http,
        })
    }

    /// Replaces the session token, e.g. after a fresh login.
    pub fn set_token(&self, token: Option<String>) {
        if let Ok(mut guard) = self.token.write() {
            *guard = token.filter(|t| !t.trim().is_empty());
        }
    }

    fn bearer(&self) -> Result<String, SyncError> {
        self.token
            .read()
            .ok()
            .and_then(|t| t.clone())
            .ok_or_else(|| SyncError::Authentication("no session token".to_string()))
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        params: &[(String, String)],
        body: Option<Value>,
    ) -> Result<Option<Value>, SyncError> {
        let token = self.bearer()?;
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));

        let mut req = self
            .http
            .request(method.clone(), &url)
            .bearer_auth(token)
            .header("Accept", "application/vnd.api+json")
            .query(params);
        if let Some(body) = body {
            req = req
                .header("Content-Type", "application/vnd.api+json")
                .json(&body);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| SyncError::TransientNetwork(format!("{} {} failed: {}", method, path, e)))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| SyncError::TransientNetwork(format!("Failed to read response: {}", e)))?;

        if !status.is_success() {
            return Err(error_for_status(status, &text));
        }
        if text.trim().is_empty() {
            return Ok(None);
        }
        serde_json::from_str(&text)
            .map(Some)
            .map_err(|e| SyncError::TransientNetwork(format!("Malformed response from {}: {}", path, e)))
    }

    async fn send_document<T: for<'de> Deserialize<'de>>(
        &self,
        method: Method,
        path: &str,
        params: &[(String, String)],
        body: Option<Value>,
    ) -> Result<Document<T>, SyncError> {
        let value = self
            .send(method, path, params, body)
            .await?
            .ok_or_else(|| SyncError::TransientNetwork(format!("Empty response from {}", path)))?;
        serde_json::from_value(value)
            .map_err(|e| SyncError::TransientNetwork(format!("Unexpected document from {}: {}", path, e)))
    }
}

#[async_trait]
impl RecordService for HttpRecordService {
    async fn list_items(&self, query: &ItemQuery) -> Result<ItemPage, SyncError> {
        let doc: Document<Vec<WorkItem>> = self
            .send_document(Method::GET, "tasks", &query.params(), None)
            .await?;
        let pagination = doc
            .meta
            .and_then(|meta| serde_json::from_value(meta.get("pagination").cloned().unwrap_or(meta)).ok());
        Ok(ItemPage {
            items: doc.data,
            pagination,
        })
    }

    async fn list_audit_events(&self, query: &AuditQuery) -> Result<Vec<AuditEvent>, SyncError> {
        let doc: Document<Vec<AuditEvent>> = self
            .send_document(Method::GET, HISTORIC_TYPE, &query.params(), None)
            .await?;
        Ok(doc.data)
    }

    async fn create_item(&self, item: &NewItem) -> Result<WorkItem, SyncError> {
        let doc: Document<WorkItem> = self
            .send_document(Method::POST, "tasks", &[], Some(create_body(item)))
            .await?;
        Ok(doc.data)
    }

    async fn update_item(&self, id: &str, patch: &ItemPatch) -> Result<WorkItem, SyncError> {
        let body = serde_json::json!({
            "data": { "type": TASK_TYPE, "id": id, "attributes": patch }
        });
        let doc: Document<WorkItem> = self
            .send_document(Method::PATCH, &format!("tasks/{}", id), &[], Some(body))
            .await?;
        Ok(doc.data)
    }

    async fn delete_item(&self, id: &str) -> Result<(), SyncError> {
        self.send(Method::DELETE, &format!("tasks/{}", id), &[], None)
            .await
            .map(|_| ())
    }

    fn is_authenticated(&self) -> bool {
        self.token.read().map(|t| t.is_some()).unwrap_or(false)
    }

    fn current_user_id(&self) -> Option<String> {
        self.user_id.clone()
    }
}

fn create_body(item: &NewItem) -> Value {
    let mut attributes = serde_json::Map::new();
    attributes.insert("title".to_string(), Value::from(item.title.clone()));
    if let Some(description) = &item.description {
        attributes.insert("description".to_string(), Value::from(description.clone()));
    }
    if let Some(due) = &item.due {
        attributes.insert(
            "due".to_string(),
            Value::from(crate::core::resource::format_timestamp(due)),
        );
    }

    let mut relationships = serde_json::Map::new();
    if let Some(assignee) = &item.assignee_id {
        relationships.insert(
            "assignee".to_string(),
            serde_json::to_value(Relationship::to_one("people", assignee)).unwrap_or_default(),
        );
    }
    if let Some(category) = &item.category_id {
        relationships.insert(
            "category".to_string(),
            serde_json::to_value(Relationship::to_one("categories", category)).unwrap_or_default(),
        );
    }

    serde_json::json!({
        "data": {
            "type": TASK_TYPE,
            "attributes": attributes,
            "relationships": relationships,
        }
    })
}

/// Maps a non-success HTTP status onto the error taxonomy.
pub fn error_for_status(status: StatusCode, body: &str) -> SyncError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            SyncError::Authentication(format!("{}: {}", status, server_explanation(body)))
        }
        StatusCode::TOO_MANY_REQUESTS => SyncError::RateLimited(status.to_string()),
        StatusCode::BAD_REQUEST | StatusCode::CONFLICT | StatusCode::UNPROCESSABLE_ENTITY => {
            SyncError::Validation {
                message: server_explanation(body),
            }
        }
        _ => SyncError::TransientNetwork(format!("{}: {}", status, server_explanation(body))),
    }
}

/// JSON:API `errors[].detail` (or `title`) joined, raw body otherwise.
fn server_explanation(body: &str) -> String {
    let details: Vec<String> = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("errors").and_then(Value::as_array).cloned())
        .unwrap_or_default()
        .iter()
        .filter_map(|e| {
            e.get("detail")
                .or_else(|| e.get("title"))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .collect();
    if details.is_empty() {
        body.trim().to_string()
    } else {
        details.join("; ")
    }
}
