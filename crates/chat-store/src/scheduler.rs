use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::durable::DatasetStore;
use crate::registry::TenantRegistry;

pub const DEFAULT_FLUSH_DEBOUNCE: Duration = Duration::from_millis(200);

/// Coalesces bursts of mutations into one debounced whole-dataset flush.
#[derive(Clone)]
pub struct WriteScheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    registry: Arc<TenantRegistry>,
    backend: Arc<dyn DatasetStore>,
    debounce: Duration,
    pending: Mutex<Option<JoinHandle<()>>>,
    flush_lock: Mutex<()>,
    flushes: AtomicU64,
    failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerStats {
    pub flushes: u64,
    pub failures: u64,
}

impl WriteScheduler {
    pub fn new(
        registry: Arc<TenantRegistry>,
        backend: Arc<dyn DatasetStore>,
        debounce: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                registry,
                backend,
                debounce,
                pending: Mutex::new(None),
                flush_lock: Mutex::new(()),
                flushes: AtomicU64::new(0),
                failures: AtomicU64::new(0),
            }),
        }
    }

    /// Arms the debounce timer unless a flush is already pending.
    pub async fn mark_dirty(&self) {
        let mut pending = self.inner.pending.lock().await;
        if pending.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }

        let inner = Arc::clone(&self.inner);
        *pending = Some(tokio::spawn(async move {
            tokio::time::sleep(inner.debounce).await;
            // Disarm before taking the snapshot: anything marked dirty from here on
            // arms a fresh timer instead of relying on a snapshot it may miss.
            inner.pending.lock().await.take();
            inner.flush().await;
        }));
    }

    /// Flushes immediately and cancels any pending timer.
    pub async fn flush_now(&self) {
        if let Some(handle) = self.inner.pending.lock().await.take() {
            handle.abort();
        }
        self.inner.flush().await;
    }

    pub async fn is_pending(&self) -> bool {
        self.inner
            .pending
            .lock()
            .await
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            flushes: self.inner.flushes.load(Ordering::SeqCst),
            failures: self.inner.failures.load(Ordering::SeqCst),
        }
    }
}

impl SchedulerInner {
    async fn flush(&self) {
        // Serialized so an older snapshot can never land after a newer one.
        let _guard = self.flush_lock.lock().await;
        let dataset = self.registry.snapshot().await;

        match self.backend.save(&dataset).await {
            Ok(()) => {
                self.flushes.fetch_add(1, Ordering::SeqCst);
                tracing::debug!(
                    target: "chat_store.scheduler",
                    backend = %self.backend.describe(),
                    tenants = dataset.tenants.len(),
                    messages = dataset.message_count(),
                    "flushed dataset",
                );
            }
            Err(error) => {
                self.failures.fetch_add(1, Ordering::SeqCst);
                tracing::warn!(
                    target: "chat_store.scheduler",
                    backend = %self.backend.describe(),
                    error = %error,
                    "dataset flush failed; will retry on next mutation",
                );
            }
        }
    }
}
