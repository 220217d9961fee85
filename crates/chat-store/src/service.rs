use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::durable::{Dataset, DatasetStore, JsonFileStore, MemoryDatasetStore};
use crate::error::ChatStoreError;
use crate::model::{AppendOutcome, MessageInput, MessageRecord, ThreadInput, ThreadRecord};
use crate::registry::{TenantHandle, TenantRegistry};
use crate::scheduler::{SchedulerStats, WriteScheduler};

/// The operation set the transport layer calls into.
///
/// Cheap to clone; every clone shares the same dataset and scheduler.
#[derive(Clone)]
pub struct ChatStore {
    registry: Arc<TenantRegistry>,
    scheduler: WriteScheduler,
}

impl ChatStore {
    /// Loads the dataset from `backend` and wires a scheduler that flushes back to it.
    pub async fn open(backend: Arc<dyn DatasetStore>, flush_debounce: Duration) -> Self {
        let dataset = backend.load().await;
        tracing::info!(
            target: "chat_store.service",
            backend = %backend.describe(),
            tenants = dataset.tenants.len(),
            threads = dataset.thread_count(),
            messages = dataset.message_count(),
            "chat store opened",
        );

        let registry = Arc::new(TenantRegistry::from_dataset(dataset));
        let scheduler = WriteScheduler::new(Arc::clone(&registry), backend, flush_debounce);
        Self {
            registry,
            scheduler,
        }
    }

    /// JSON file when a path is given, process memory otherwise.
    pub async fn open_path(path: Option<PathBuf>, flush_debounce: Duration) -> Self {
        let backend: Arc<dyn DatasetStore> = match path {
            Some(path) => Arc::new(JsonFileStore::new(path)),
            None => Arc::new(MemoryDatasetStore::new()),
        };
        Self::open(backend, flush_debounce).await
    }

    pub async fn resolve_tenant(&self, user_key: &str) -> TenantHandle {
        let (tenant, created) = self.registry.resolve(user_key).await;
        if created {
            self.scheduler.mark_dirty().await;
        }
        tenant
    }

    pub async fn list_threads(&self, tenant: &TenantHandle) -> Vec<ThreadRecord> {
        tenant.store().list_threads().await
    }

    pub async fn upsert_thread(
        &self,
        tenant: &TenantHandle,
        input: ThreadInput,
    ) -> Result<ThreadRecord, ChatStoreError> {
        let thread = tenant.store().upsert_thread(input).await?;
        self.scheduler.mark_dirty().await;
        Ok(thread)
    }

    /// Unknown threads are created empty rather than reported missing.
    pub async fn list_messages(
        &self,
        tenant: &TenantHandle,
        thread_id: &str,
        after: Option<DateTime<Utc>>,
    ) -> Vec<MessageRecord> {
        let listed = tenant.store().list_messages(thread_id, after).await;
        if listed.vivified {
            self.scheduler.mark_dirty().await;
        }
        listed.value
    }

    pub async fn mark_read(&self, tenant: &TenantHandle, thread_id: &str) -> ThreadRecord {
        let thread = tenant.store().mark_read(thread_id).await;
        self.scheduler.mark_dirty().await;
        thread
    }

    pub async fn append_message(
        &self,
        tenant: &TenantHandle,
        thread_id: &str,
        input: MessageInput,
    ) -> AppendOutcome {
        let outcome = tenant.store().append_message(thread_id, input).await;
        if outcome.created {
            self.scheduler.mark_dirty().await;
        } else {
            tracing::debug!(
                target: "chat_store.service",
                tenant = %tenant.key(),
                thread_id,
                message_id = %outcome.id,
                "duplicate message ignored",
            );
        }
        outcome
    }

    pub async fn flush_now(&self) {
        self.scheduler.flush_now().await;
    }

    pub async fn snapshot(&self) -> Dataset {
        self.registry.snapshot().await
    }

    pub async fn tenant_count(&self) -> usize {
        self.registry.tenant_count().await
    }

    pub fn scheduler_stats(&self) -> SchedulerStats {
        self.scheduler.stats()
    }
}
