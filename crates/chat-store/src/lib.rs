//! Multi-tenant chat thread and message store with debounced whole-dataset persistence.

mod durable;
mod error;
mod model;
mod registry;
mod scheduler;
mod service;
mod tenant;

pub use durable::{Dataset, DatasetStore, JsonFileStore, MemoryDatasetStore};
pub use error::ChatStoreError;
pub use model::{
    AppendOutcome, MessageInput, MessageRecord, ThreadInput, ThreadRecord, Vivified,
    messages_after, parse_cursor,
};
pub use registry::{TenantHandle, TenantRegistry};
pub use scheduler::{DEFAULT_FLUSH_DEBOUNCE, SchedulerStats, WriteScheduler};
pub use service::ChatStore;
pub use tenant::{TenantState, TenantStore};
