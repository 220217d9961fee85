use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::durable::Dataset;
use crate::tenant::TenantStore;

/// A resolved tenant: its key plus a shared handle on its store.
#[derive(Debug, Clone)]
pub struct TenantHandle {
    key: String,
    store: Arc<TenantStore>,
}

impl TenantHandle {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn store(&self) -> &TenantStore {
        &self.store
    }

    pub fn same_tenant(&self, other: &TenantHandle) -> bool {
        Arc::ptr_eq(&self.store, &other.store)
    }
}

#[derive(Debug, Default)]
pub struct TenantRegistry {
    tenants: RwLock<HashMap<String, Arc<TenantStore>>>,
}

impl TenantRegistry {
    pub fn from_dataset(dataset: Dataset) -> Self {
        let tenants = dataset
            .tenants
            .into_iter()
            .map(|(key, state)| (key, Arc::new(TenantStore::new(state))))
            .collect();

        Self {
            tenants: RwLock::new(tenants),
        }
    }

    /// Returns the tenant's store, creating an empty one on first reference.
    /// The flag is `true` only for the call that created it.
    pub async fn resolve(&self, user_key: &str) -> (TenantHandle, bool) {
        if let Some(store) = self.tenants.read().await.get(user_key) {
            return (
                TenantHandle {
                    key: user_key.to_string(),
                    store: Arc::clone(store),
                },
                false,
            );
        }

        let mut tenants = self.tenants.write().await;
        let mut created = false;
        let store = tenants.entry(user_key.to_string()).or_insert_with(|| {
            created = true;
            Arc::new(TenantStore::default())
        });
        if created {
            tracing::debug!(
                target: "chat_store.registry",
                tenant = %user_key,
                "created tenant store",
            );
        }

        (
            TenantHandle {
                key: user_key.to_string(),
                store: Arc::clone(store),
            },
            created,
        )
    }

    pub async fn tenant_count(&self) -> usize {
        self.tenants.read().await.len()
    }

    /// Copies every tenant, each under its own read lock.
    pub async fn snapshot(&self) -> Dataset {
        let tenants: Vec<(String, Arc<TenantStore>)> = self
            .tenants
            .read()
            .await
            .iter()
            .map(|(key, store)| (key.clone(), Arc::clone(store)))
            .collect();

        let mut dataset = Dataset::default();
        for (key, store) in tenants {
            dataset.tenants.insert(key, store.snapshot().await);
        }
        dataset
    }
}
