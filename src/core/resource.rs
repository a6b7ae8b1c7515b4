use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const TASK_TYPE: &str = "tasks";
pub const HISTORIC_TYPE: &str = "task-historics";

/// Loosely typed attribute bag exactly as the record service sent it.
///
/// Field names and encodings vary between deployments, so nothing here
/// interprets the values beyond a few typed accessors. Alias resolution
/// lives in [`crate::core::attributes`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Attributes(Map<String, Value>);

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert, mostly for fixtures.
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: &str, value: impl Into<Value>) {
        self.0.insert(key.to_string(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    /// Returns the value for `key`, treating an explicit JSON null as absent.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key).filter(|v| !v.is_null())
    }

    pub fn str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Map<String, Value>> for Attributes {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelationshipLinks {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related: Option<String>,
    #[serde(rename = "self", default, skip_serializing_if = "Option::is_none")]
    pub self_link: Option<String>,
}

/// A JSON:API relationship. `data` may be null, a resource identifier or an
/// array of identifiers, so it is kept as raw JSON.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    #[serde(default)]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub links: Option<RelationshipLinks>,
}

impl Relationship {
    pub fn to_one(kind: &str, id: &str) -> Self {
        Self {
            data: serde_json::json!({ "type": kind, "id": id }),
            links: None,
        }
    }

    pub fn related_link(url: impl Into<String>) -> Self {
        Self {
            data: Value::Null,
            links: Some(RelationshipLinks {
                related: Some(url.into()),
                self_link: None,
            }),
        }
    }

    /// Id of a to-one relationship, if the identifier object carries one.
    pub fn id(&self) -> Option<&str> {
        self.data
            .get("id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
    }

    pub fn related(&self) -> Option<&str> {
        self.links.as_ref().and_then(|l| l.related.as_deref())
    }
}

pub type Relationships = HashMap<String, Relationship>;

fn default_task_type() -> String {
    TASK_TYPE.to_string()
}

/// A task as held in the local read-through cache. The record service owns it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: String,
    #[serde(rename = "type", default = "default_task_type")]
    pub kind: String,
    #[serde(default)]
    pub attributes: Attributes,
    #[serde(default)]
    pub relationships: Relationships,
}

impl WorkItem {
    pub fn new(id: impl Into<String>, title: &str) -> Self {
        Self {
            id: id.into(),
            kind: default_task_type(),
            attributes: Attributes::new().with("title", title),
            relationships: Relationships::new(),
        }
    }

    pub fn title(&self) -> &str {
        self.attributes.str("title").unwrap_or_default()
    }

    pub fn description(&self) -> Option<&str> {
        self.attributes.str("description").filter(|d| !d.is_empty())
    }

    pub fn due(&self) -> Option<DateTime<Utc>> {
        self.attributes.str("due").and_then(parse_timestamp)
    }

    pub fn registered_at(&self) -> Option<DateTime<Utc>> {
        self.attributes.str("registered-at").and_then(parse_timestamp)
    }

    pub fn completed(&self) -> Option<bool> {
        self.attributes.get("completed").and_then(Value::as_bool)
    }

    pub fn number(&self) -> Option<String> {
        match self.attributes.get("number")? {
            Value::Number(n) => Some(n.to_string()),
            Value::String(s) => Some(s.clone()),
            _ => None,
        }
    }

    pub fn assignee_id(&self) -> Option<&str> {
        self.relationships.get("assignee").and_then(Relationship::id)
    }

    pub fn category_id(&self) -> Option<&str> {
        self.relationships.get("category").and_then(Relationship::id)
    }
}

/// An entry of the record service's append-only task history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub attributes: Attributes,
    #[serde(default)]
    pub relationships: Relationships,
}

impl AuditEvent {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: HISTORIC_TYPE.to_string(),
            attributes: Attributes::new(),
            relationships: Relationships::new(),
        }
    }

    pub fn date_time(&self) -> Option<DateTime<Utc>> {
        self.attributes.str("date-time").and_then(parse_timestamp)
    }
}

/// Parses the timestamp encodings seen in the wild: RFC 3339, naive
/// date-times with or without seconds, and bare dates. Naive values are
/// read as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M",
    ] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Wire format used when this crate writes a timestamp back.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}
