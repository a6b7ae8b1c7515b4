pub mod cache;
pub mod client;
pub mod error;
pub mod events;
pub mod mutation;
pub mod retry;

#[cfg(test)]
pub(crate) mod testing;

pub use cache::{Board, CacheSettings, Filters, OverlayChange, Poller, SourcePhase, SyncCache};
pub use client::{HttpRecordService, ItemPatch, ItemQuery, NewItem, RecordService};
pub use error::{ErrorKind, SyncError};
pub use events::{EventSink, LogSink, MemorySink, Source, SyncEvent};
pub use mutation::{
    AcceptDefault, DueDecision, DuePrompt, DueRequest, MutationError, MutationOutcome,
    MutationPipeline,
};
pub use retry::RetryPolicy;
