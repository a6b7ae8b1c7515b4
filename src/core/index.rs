use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::resource::WorkItem;
use super::status::{DerivedStatus, classify};

/// Which tasks the board shows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    All,
    /// Only tasks assigned to the requesting identity.
    #[default]
    Mine,
}

/// Narrowing applied after classification. Tasks it rejects leave the board
/// entirely; they are never moved to another bucket.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalFilter {
    pub scope: Scope,
    /// Identity compared against the assignee for [`Scope::Mine`]. When
    /// unknown, the mine scope keeps everything.
    pub identity: Option<String>,
    pub category: Option<String>,
    pub assignee: Option<String>,
}

impl LocalFilter {
    pub fn admits(&self, item: &WorkItem) -> bool {
        if self.scope == Scope::Mine {
            if let Some(me) = self.identity.as_deref() {
                if item.assignee_id() != Some(me) {
                    return false;
                }
            }
        }
        if let Some(category) = self.category.as_deref() {
            if item.category_id() != Some(category) {
                return false;
            }
        }
        if let Some(assignee) = self.assignee.as_deref() {
            if item.assignee_id() != Some(assignee) {
                return false;
            }
        }
        true
    }
}

/// Per-bucket totals for the stats cards.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BoardCounts {
    pub total: usize,
    pub pending: usize,
    pub overdue: usize,
    pub completed: usize,
    pub deleted: usize,
}

/// Task id -> status, partitioned into four disjoint buckets that together
/// hold exactly the admitted tasks. Bucket order follows input order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusIndex {
    statuses: HashMap<String, DerivedStatus>,
    buckets: [Vec<String>; 4],
}

impl StatusIndex {
    /// Classifies every admitted task; ids in `overrides` are forced to
    /// [`DerivedStatus::Deleted`] whatever their own attributes say.
    pub fn build(
        items: &[WorkItem],
        overrides: &HashSet<String>,
        filter: &LocalFilter,
        now: DateTime<Utc>,
    ) -> Self {
        let mut index = Self::default();
        for item in items.iter().filter(|item| filter.admits(item)) {
            if index.statuses.contains_key(&item.id) {
                continue;
            }
            let status = if overrides.contains(&item.id) {
                DerivedStatus::Deleted
            } else {
                classify(item, now)
            };
            index.statuses.insert(item.id.clone(), status);
            index.buckets[slot(status)].push(item.id.clone());
        }
        index
    }

    pub fn status_of(&self, id: &str) -> Option<DerivedStatus> {
        self.statuses.get(id).copied()
    }

    pub fn bucket(&self, status: DerivedStatus) -> &[String] {
        &self.buckets[slot(status)]
    }

    pub fn len(&self) -> usize {
        self.statuses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statuses.is_empty()
    }

    pub fn counts(&self) -> BoardCounts {
        BoardCounts {
            total: self.len(),
            pending: self.bucket(DerivedStatus::Pending).len(),
            overdue: self.bucket(DerivedStatus::Overdue).len(),
            completed: self.bucket(DerivedStatus::Completed).len(),
            deleted: self.bucket(DerivedStatus::Deleted).len(),
        }
    }
}

fn slot(status: DerivedStatus) -> usize {
    match status {
        DerivedStatus::Pending => 0,
        DerivedStatus::Overdue => 1,
        DerivedStatus::Completed => 2,
        DerivedStatus::Deleted => 3,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::resource::{Relationship, format_timestamp};
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 10, 12, 0, 0).unwrap()
    }

    fn task(id: &str, assignee: Option<&str>) -> WorkItem {
        let mut item = WorkItem::new(id, &format!("Task {id}"));
        if let Some(a) = assignee {
            item.relationships
                .insert("assignee".to_string(), Relationship::to_one("people", a));
        }
        item
    }

    fn sample() -> Vec<WorkItem> {
        let mut overdue = task("a", Some("me"));
        overdue
            .attributes
            .insert("due", format_timestamp(&(now() - Duration::days(1))));
        let mut done = task("b", Some("me"));
        done.attributes.insert("completed", true);
        let mut gone = task("c", Some("other"));
        gone.attributes.insert("deleted", true);
        vec![overdue, done, gone, task("d", None)]
    }

    #[test]
    fn buckets_partition_admitted_items() {
        let items = sample();
        let index = StatusIndex::build(&items, &HashSet::new(), &LocalFilter { scope: Scope::All, ..Default::default() }, now());
        assert_eq!(index.len(), 4);
        assert_eq!(index.bucket(DerivedStatus::Overdue), ["a"]);
        assert_eq!(index.bucket(DerivedStatus::Completed), ["b"]);
        assert_eq!(index.bucket(DerivedStatus::Deleted), ["c"]);
        assert_eq!(index.bucket(DerivedStatus::Pending), ["d"]);

        let total: usize = DerivedStatus::ALL.iter().map(|s| index.bucket(*s).len()).sum();
        assert_eq!(total, index.len());
    }

    #[test]
    fn rebuild_is_identical() {
        let items = sample();
        let overrides = HashSet::from(["d".to_string()]);
        let filter = LocalFilter::default();
        let first = StatusIndex::build(&items, &overrides, &filter, now());
        let second = StatusIndex::build(&items, &overrides, &filter, now());
        assert_eq!(first, second);
    }

    #[test]
    fn override_forces_deleted() {
        let items = vec![task("p", None)];
        let overrides = HashSet::from(["p".to_string()]);
        let filter = LocalFilter { scope: Scope::All, ..Default::default() };
        let index = StatusIndex::build(&items, &overrides, &filter, now());
        assert_eq!(index.status_of("p"), Some(DerivedStatus::Deleted));
        assert!(index.bucket(DerivedStatus::Pending).is_empty());
    }

    #[test]
    fn mine_scope_drops_foreign_items() {
        let items = sample();
        let filter = LocalFilter {
            scope: Scope::Mine,
            identity: Some("me".to_string()),
            ..Default::default()
        };
        let index = StatusIndex::build(&items, &HashSet::new(), &filter, now());
        assert_eq!(index.len(), 2);
        assert_eq!(index.status_of("c"), None);
        assert_eq!(index.status_of("d"), None);
    }

    #[test]
    fn mine_scope_without_identity_keeps_all() {
        let items = sample();
        let index = StatusIndex::build(&items, &HashSet::new(), &LocalFilter::default(), now());
        assert_eq!(index.len(), 4);
    }

    #[test]
    fn category_and_assignee_filters() {
        let mut items = sample();
        items[0]
            .relationships
            .insert("category".to_string(), Relationship::to_one("categories", "cat-1"));
        let filter = LocalFilter {
            scope: Scope::All,
            category: Some("cat-1".to_string()),
            ..Default::default()
        };
        let index = StatusIndex::build(&items, &HashSet::new(), &filter, now());
        assert_eq!(index.len(), 1);

        let filter = LocalFilter {
            scope: Scope::All,
            assignee: Some("other".to_string()),
            ..Default::default()
        };
        let index = StatusIndex::build(&items, &HashSet::new(), &filter, now());
        assert_eq!(index.bucket(DerivedStatus::Deleted), ["c"]);
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn counts_follow_buckets() {
        let items = sample();
        let filter = LocalFilter { scope: Scope::All, ..Default::default() };
        let counts = StatusIndex::build(&items, &HashSet::new(), &filter, now()).counts();
        assert_eq!(
            counts,
            BoardCounts { total: 4, pending: 1, overdue: 1, completed: 1, deleted: 1 }
        );
    }
}
