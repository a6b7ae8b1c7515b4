pub mod attributes;
pub mod audit;
pub mod index;
pub mod resource;
pub mod status;

pub use index::{BoardCounts, LocalFilter, Scope, StatusIndex};
pub use resource::{AuditEvent, Attributes, Relationship, WorkItem};
pub use status::{DerivedStatus, classify};
