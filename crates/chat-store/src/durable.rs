use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::ChatStoreError;
use crate::tenant::TenantState;

/// Every tenant's state, keyed by tenant key. Persisted as one JSON document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Dataset {
    pub tenants: HashMap<String, TenantState>,
}

impl Dataset {
    pub fn normalize(&mut self) {
        for tenant in self.tenants.values_mut() {
            tenant.normalize();
        }
    }

    pub fn thread_count(&self) -> usize {
        self.tenants.values().map(|tenant| tenant.threads.len()).sum()
    }

    pub fn message_count(&self) -> usize {
        self.tenants
            .values()
            .flat_map(|tenant| tenant.messages.values())
            .map(Vec::len)
            .sum()
    }
}

/// Whole-dataset persistence medium. No business logic lives behind this trait.
#[async_trait]
pub trait DatasetStore: Send + Sync {
    /// Never fails: a missing or unreadable medium yields an empty dataset.
    async fn load(&self) -> Dataset;

    async fn save(&self, dataset: &Dataset) -> Result<(), ChatStoreError>;

    fn describe(&self) -> String;
}

/// JSON document on the local filesystem, replaced via temp file + rename.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl DatasetStore for JsonFileStore {
    async fn load(&self) -> Dataset {
        let path = &self.path;
        let raw = match tokio::fs::read_to_string(path).await {
            Ok(value) => value,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(
                    target: "chat_store.durable",
                    path = %path.display(),
                    "no dataset on disk; starting empty",
                );
                return Dataset::default();
            }
            Err(error) => {
                tracing::warn!(
                    target: "chat_store.durable",
                    path = %path.display(),
                    error = %error,
                    "failed to read dataset; booting with empty state",
                );
                return Dataset::default();
            }
        };

        match serde_json::from_str::<Dataset>(&raw) {
            Ok(mut dataset) => {
                dataset.normalize();
                tracing::info!(
                    target: "chat_store.durable",
                    path = %path.display(),
                    tenants = dataset.tenants.len(),
                    threads = dataset.thread_count(),
                    "loaded dataset",
                );
                dataset
            }
            Err(error) => {
                tracing::warn!(
                    target: "chat_store.durable",
                    path = %path.display(),
                    error = %error,
                    "failed to parse dataset; booting with empty state",
                );
                Dataset::default()
            }
        }
    }

    async fn save(&self, dataset: &Dataset) -> Result<(), ChatStoreError> {
        let path = &self.path;

        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|error| {
                ChatStoreError::persistence(format!("failed to prepare dataset directory: {error}"))
            })?;
        }

        let payload = serde_json::to_vec(dataset).map_err(|error| {
            ChatStoreError::persistence(format!("failed to encode dataset payload: {error}"))
        })?;

        let temp_path = path.with_extension(format!("{}.tmp", Uuid::new_v4().simple()));
        if let Err(error) = tokio::fs::write(&temp_path, payload).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(ChatStoreError::persistence(format!(
                "failed to write dataset payload: {error}"
            )));
        }

        if let Err(error) = tokio::fs::rename(&temp_path, path).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(ChatStoreError::persistence(format!(
                "failed to finalize dataset payload: {error}"
            )));
        }

        Ok(())
    }

    fn describe(&self) -> String {
        format!("json file {}", self.path.display())
    }
}

/// Keeps the last saved dataset in process memory.
#[derive(Debug, Default)]
pub struct MemoryDatasetStore {
    saved: Mutex<Option<Dataset>>,
    saves: AtomicU64,
}

impl MemoryDatasetStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dataset(dataset: Dataset) -> Self {
        Self {
            saved: Mutex::new(Some(dataset)),
            saves: AtomicU64::new(0),
        }
    }

    pub fn save_count(&self) -> u64 {
        self.saves.load(Ordering::SeqCst)
    }

    pub async fn last_saved(&self) -> Option<Dataset> {
        self.saved.lock().await.clone()
    }
}

#[async_trait]
impl DatasetStore for MemoryDatasetStore {
    async fn load(&self) -> Dataset {
        let mut dataset = self.saved.lock().await.clone().unwrap_or_default();
        dataset.normalize();
        dataset
    }

    async fn save(&self, dataset: &Dataset) -> Result<(), ChatStoreError> {
        *self.saved.lock().await = Some(dataset.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn describe(&self) -> String {
        "in-memory".to_string()
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::model::{MessageInput, ThreadInput};

    fn sample_dataset() -> Dataset {
        let now = Utc::now();
        let mut alice = TenantState::default();
        alice
            .replace_thread(
                ThreadInput {
                    id: "t1".to_string(),
                    name: Some("Bob".to_string()),
                    avatar_url: Some("https://cdn.example/bob.png".to_string()),
                    online: Some(true),
                    unread_count: Some(2),
                    archived: Some(true),
                    ..ThreadInput::default()
                },
                now,
            )
            .expect("seed thread");
        alice.append_message("t1", MessageInput::text("hi").with_id("m1"), now);
        alice.append_message("t1", MessageInput::text("there").from_me(true), now);
        alice.ensure_thread("empty", now);

        let mut dataset = Dataset::default();
        dataset.tenants.insert("alice".to_string(), alice);
        dataset.tenants.insert("bob".to_string(), TenantState::default());
        dataset
    }

    #[tokio::test]
    async fn json_file_store_round_trips_dataset() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = JsonFileStore::new(temp.path().join("nested").join("chat-store.json"));
        let dataset = sample_dataset();

        store.save(&dataset).await.expect("save dataset");
        let loaded = store.load().await;
        assert_eq!(loaded, dataset);

        let leftovers: Vec<_> = std::fs::read_dir(temp.path().join("nested"))
            .expect("read dir")
            .filter_map(Result::ok)
            .filter(|entry| entry.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn persisted_layout_uses_wire_field_names() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("chat-store.json");
        let store = JsonFileStore::new(path.clone());
        store.save(&sample_dataset()).await.expect("save dataset");

        let raw = std::fs::read_to_string(&path).expect("read dataset");
        let document: serde_json::Value = serde_json::from_str(&raw).expect("parse dataset");
        let thread = &document["alice"]["threads"]["t1"];
        assert_eq!(thread["avatarUrl"], "https://cdn.example/bob.png");
        assert_eq!(thread["lastMessage"], "there");
        assert_eq!(thread["unreadCount"], 2);
        assert!(thread["updatedAt"].is_string());
        let message = &document["alice"]["messages"]["t1"][0];
        assert_eq!(message["id"], "m1");
        assert_eq!(message["fromMe"], false);
        assert!(message["at"].is_string());
    }

    #[tokio::test]
    async fn missing_file_loads_empty() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = JsonFileStore::new(temp.path().join("absent.json"));
        assert_eq!(store.load().await, Dataset::default());
    }

    #[tokio::test]
    async fn corrupted_file_loads_empty() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("chat-store.json");
        std::fs::write(&path, b"{\"alice\": {\"threads\": [oops").expect("write garbage");

        let store = JsonFileStore::new(path);
        assert_eq!(store.load().await, Dataset::default());
    }

    #[tokio::test]
    async fn unreadable_file_loads_empty() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("chat-store.json");
        std::fs::write(&path, [0xff, 0xfe, 0x00, 0x7b]).expect("write invalid utf-8");

        let store = JsonFileStore::new(path);
        assert_eq!(store.load().await, Dataset::default());
    }

    #[tokio::test]
    async fn directory_in_place_of_file_loads_empty() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("chat-store.json");
        std::fs::create_dir(&path).expect("create directory");

        let store = JsonFileStore::new(path);
        assert_eq!(store.load().await, Dataset::default());
    }

    #[tokio::test]
    async fn save_replaces_previous_document() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = JsonFileStore::new(temp.path().join("chat-store.json"));
        store.save(&sample_dataset()).await.expect("first save");
        store.save(&Dataset::default()).await.expect("second save");
        assert_eq!(store.load().await, Dataset::default());
    }

    #[tokio::test]
    async fn save_into_unwritable_location_reports_persistence_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let blocker = temp.path().join("blocker");
        std::fs::write(&blocker, b"not a directory").expect("write blocker");

        let store = JsonFileStore::new(blocker.join("chat-store.json"));
        let error = store
            .save(&sample_dataset())
            .await
            .expect_err("parent is a file");
        assert!(matches!(error, ChatStoreError::Persistence { .. }));
    }

    #[tokio::test]
    async fn memory_store_counts_saves() {
        let store = MemoryDatasetStore::new();
        assert_eq!(store.load().await, Dataset::default());

        let dataset = sample_dataset();
        store.save(&dataset).await.expect("save");
        assert_eq!(store.save_count(), 1);
        assert_eq!(store.last_saved().await, Some(dataset.clone()));
        assert_eq!(store.load().await, dataset);
    }
}
