use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::ChatStoreError;
use crate::model::{
    AppendOutcome, MessageInput, MessageRecord, ThreadInput, ThreadRecord, Vivified,
    messages_after,
};

/// One user's threads and their message lists.
///
/// Every key of `threads` has a (possibly empty) list in `messages` and vice versa;
/// `ensure_thread` is the only place either map gains a key on its own.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TenantState {
    pub threads: HashMap<String, ThreadRecord>,
    pub messages: HashMap<String, Vec<MessageRecord>>,
}

impl TenantState {
    /// Creates default metadata and an empty message list for an unknown thread.
    /// Returns whether anything was created.
    pub fn ensure_thread(&mut self, thread_id: &str, now: DateTime<Utc>) -> bool {
        let created =
            !self.threads.contains_key(thread_id) || !self.messages.contains_key(thread_id);
        self.vivify(thread_id, now);
        created
    }

    /// The one place a thread and its message list come into existence together.
    fn vivify(
        &mut self,
        thread_id: &str,
        now: DateTime<Utc>,
    ) -> (&mut ThreadRecord, &mut Vec<MessageRecord>) {
        let thread = self
            .threads
            .entry(thread_id.to_string())
            .or_insert_with(|| ThreadRecord::with_defaults(thread_id, now));
        let messages = self.messages.entry(thread_id.to_string()).or_default();
        (thread, messages)
    }

    pub fn replace_thread(
        &mut self,
        input: ThreadInput,
        now: DateTime<Utc>,
    ) -> Result<ThreadRecord, ChatStoreError> {
        let record = input.into_record(now)?;
        self.messages.entry(record.id.clone()).or_default();
        self.threads.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    /// Most recently updated first; equal timestamps fall back to thread id.
    pub fn threads_by_recency(&self) -> Vec<ThreadRecord> {
        let mut rows: Vec<ThreadRecord> = self.threads.values().cloned().collect();
        rows.sort_by(|left, right| {
            right
                .updated_at
                .cmp(&left.updated_at)
                .then_with(|| left.id.cmp(&right.id))
        });
        rows
    }

    pub fn messages_after(
        &self,
        thread_id: &str,
        after: Option<DateTime<Utc>>,
    ) -> Vec<MessageRecord> {
        self.messages
            .get(thread_id)
            .map(|messages| messages_after(messages, after))
            .unwrap_or_default()
    }

    pub fn mark_read(&mut self, thread_id: &str, now: DateTime<Utc>) -> ThreadRecord {
        let (thread, _) = self.vivify(thread_id, now);
        thread.unread_count = 0;
        thread.clone()
    }

    /// Appends unless a message with the same id is already in the thread.
    pub fn append_message(
        &mut self,
        thread_id: &str,
        input: MessageInput,
        now: DateTime<Utc>,
    ) -> AppendOutcome {
        let (thread, messages) = self.vivify(thread_id, now);

        if let Some(requested) = input.requested_id() {
            if let Some(existing) = messages.iter().find(|message| message.id == requested) {
                return AppendOutcome {
                    id: existing.id.clone(),
                    at: existing.at,
                    created: false,
                };
            }
        }

        // Stamped times never run backwards within a thread, even if the clock does.
        let at = messages
            .last()
            .map(|last| last.at.max(now))
            .unwrap_or(now);
        let message = input.into_record(at);
        let outcome = AppendOutcome {
            id: message.id.clone(),
            at: message.at,
            created: true,
        };

        thread.last_message = message.text.clone();
        thread.updated_at = at;
        messages.push(message);

        outcome
    }

    /// Restores the thread/message-list pairing on data that did not come from
    /// this process.
    pub fn normalize(&mut self) {
        let orphan_lists: Vec<String> = self
            .messages
            .keys()
            .filter(|thread_id| !self.threads.contains_key(*thread_id))
            .cloned()
            .collect();
        for thread_id in orphan_lists {
            let last = self
                .messages
                .get(&thread_id)
                .and_then(|messages| messages.last())
                .cloned();
            let updated_at = last.as_ref().map_or_else(Utc::now, |message| message.at);
            let mut thread = ThreadRecord::with_defaults(&thread_id, updated_at);
            if let Some(last) = last {
                thread.last_message = last.text;
            }
            self.threads.insert(thread_id, thread);
        }

        let bare_threads: Vec<String> = self
            .threads
            .keys()
            .filter(|thread_id| !self.messages.contains_key(*thread_id))
            .cloned()
            .collect();
        for thread_id in bare_threads {
            self.messages.insert(thread_id, Vec::new());
        }
    }
}

/// Lock-guarded [`TenantState`]; one lock per tenant.
#[derive(Debug, Default)]
pub struct TenantStore {
    state: RwLock<TenantState>,
}

impl TenantStore {
    pub fn new(state: TenantState) -> Self {
        Self {
            state: RwLock::new(state),
        }
    }

    /// Read-through auto-vivification: makes sure the thread exists.
    pub async fn ensure_thread(&self, thread_id: &str) -> bool {
        {
            let state = self.state.read().await;
            if state.threads.contains_key(thread_id) && state.messages.contains_key(thread_id) {
                return false;
            }
        }

        let mut state = self.state.write().await;
        state.ensure_thread(thread_id, Utc::now())
    }

    pub async fn upsert_thread(&self, input: ThreadInput) -> Result<ThreadRecord, ChatStoreError> {
        let mut state = self.state.write().await;
        state.replace_thread(input, Utc::now())
    }

    pub async fn list_threads(&self) -> Vec<ThreadRecord> {
        self.state.read().await.threads_by_recency()
    }

    pub async fn list_messages(
        &self,
        thread_id: &str,
        after: Option<DateTime<Utc>>,
    ) -> Vivified<Vec<MessageRecord>> {
        let vivified = self.ensure_thread(thread_id).await;
        let value = self.state.read().await.messages_after(thread_id, after);
        Vivified { value, vivified }
    }

    pub async fn mark_read(&self, thread_id: &str) -> ThreadRecord {
        let mut state = self.state.write().await;
        state.mark_read(thread_id, Utc::now())
    }

    pub async fn append_message(&self, thread_id: &str, input: MessageInput) -> AppendOutcome {
        let mut state = self.state.write().await;
        state.append_message(thread_id, input, Utc::now())
    }

    pub async fn snapshot(&self) -> TenantState {
        self.state.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};
    use quickcheck::quickcheck;

    use super::*;

    fn at(seconds: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0)
            .single()
            .expect("valid base time")
            + Duration::seconds(seconds)
    }

    #[test]
    fn ensure_thread_creates_defaults_once() {
        let mut state = TenantState::default();
        assert!(state.ensure_thread("t1", at(0)));
        assert!(!state.ensure_thread("t1", at(5)));

        let thread = state.threads.get("t1").expect("thread created");
        assert_eq!(thread.name, "t1");
        assert_eq!(thread.updated_at, at(0));
        assert_eq!(state.messages.get("t1").map(Vec::len), Some(0));
    }

    #[test]
    fn replace_thread_is_a_full_replace() {
        let mut state = TenantState::default();
        state
            .replace_thread(
                ThreadInput {
                    id: "t1".to_string(),
                    name: Some("Ada".to_string()),
                    muted: Some(true),
                    unread_count: Some(3),
                    ..ThreadInput::default()
                },
                at(0),
            )
            .expect("first upsert");

        let replaced = state
            .replace_thread(ThreadInput::new("t1"), at(10))
            .expect("second upsert");

        assert_eq!(replaced.name, "t1");
        assert!(!replaced.muted);
        assert_eq!(replaced.unread_count, 0);
        assert_eq!(replaced.updated_at, at(10));
        assert!(state.messages.contains_key("t1"));
    }

    #[test]
    fn failed_replace_leaves_state_untouched() {
        let mut state = TenantState::default();
        let error = state
            .replace_thread(ThreadInput::new(""), at(0))
            .expect_err("empty id");
        assert!(matches!(error, ChatStoreError::Validation { .. }));
        assert_eq!(state, TenantState::default());
    }

    #[test]
    fn duplicate_append_returns_original_outcome() {
        let mut state = TenantState::default();
        let first = state.append_message("t1", MessageInput::text("hi").with_id("m1"), at(1));
        let second = state.append_message("t1", MessageInput::text("changed").with_id("m1"), at(9));

        assert!(first.created);
        assert!(!second.created);
        assert_eq!(second.id, "m1");
        assert_eq!(second.at, first.at);

        let thread = state.threads.get("t1").expect("thread");
        assert_eq!(thread.last_message, "hi");
        assert_eq!(thread.updated_at, at(1));
        assert_eq!(state.messages.get("t1").map(Vec::len), Some(1));
    }

    #[test]
    fn message_ids_differing_only_in_whitespace_are_distinct() {
        let mut state = TenantState::default();
        let padded = state.append_message("t1", MessageInput::text("a").with_id(" m1"), at(1));
        let plain = state.append_message("t1", MessageInput::text("b").with_id("m1"), at(2));

        assert!(padded.created && plain.created);
        assert_eq!(padded.id, " m1");
        assert_eq!(plain.id, "m1");
        assert_eq!(state.messages.get("t1").map(Vec::len), Some(2));
    }

    #[test]
    fn mark_read_on_unknown_thread_creates_it_once() {
        let mut state = TenantState::default();
        let thread = state.mark_read("fresh", at(3));

        assert_eq!(thread.id, "fresh");
        assert_eq!(thread.updated_at, at(3));
        assert_eq!(state.threads.len(), 1);
        assert_eq!(state.messages.get("fresh").map(Vec::len), Some(0));
        assert!(!state.ensure_thread("fresh", at(4)));
    }

    #[test]
    fn append_stamps_never_run_backwards() {
        let mut state = TenantState::default();
        let first = state.append_message("t1", MessageInput::text("a"), at(30));
        let second = state.append_message("t1", MessageInput::text("b"), at(10));

        assert_eq!(second.at, first.at);
        let thread = state.threads.get("t1").expect("thread");
        assert_eq!(thread.last_message, "b");
        assert_eq!(thread.updated_at, first.at);
    }

    #[test]
    fn append_leaves_unread_alone_and_mark_read_clears_it() {
        let mut state = TenantState::default();
        state
            .replace_thread(
                ThreadInput {
                    id: "t1".to_string(),
                    unread_count: Some(7),
                    ..ThreadInput::default()
                },
                at(0),
            )
            .expect("upsert");

        state.append_message("t1", MessageInput::text("hello"), at(1));
        assert_eq!(state.threads.get("t1").map(|t| t.unread_count), Some(7));

        let thread = state.mark_read("t1", at(2));
        assert_eq!(thread.unread_count, 0);
        assert_eq!(thread.updated_at, at(1));
    }

    #[test]
    fn append_moves_thread_to_front() {
        let mut state = TenantState::default();
        state.append_message("older", MessageInput::text("x"), at(1));
        state.append_message("newer", MessageInput::text("y"), at(2));
        assert_eq!(state.threads_by_recency()[0].id, "newer");

        state.append_message("older", MessageInput::text("z"), at(3));
        let ids: Vec<String> = state.threads_by_recency().into_iter().map(|t| t.id).collect();
        assert_eq!(ids, vec!["older".to_string(), "newer".to_string()]);
    }

    #[test]
    fn recency_order_breaks_ties_by_id() {
        let mut state = TenantState::default();
        state.ensure_thread("b", at(0));
        state.ensure_thread("a", at(0));
        state.ensure_thread("c", at(1));

        let ids: Vec<String> = state.threads_by_recency().into_iter().map(|t| t.id).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }

    #[test]
    fn recency_order_holds_for_arbitrary_threads() {
        fn prop(offsets: Vec<(u8, i16)>) -> bool {
            let mut state = TenantState::default();
            for (id, offset) in offsets {
                state
                    .replace_thread(
                        ThreadInput {
                            id: format!("t{id}"),
                            updated_at: Some(at(i64::from(offset))),
                            ..ThreadInput::default()
                        },
                        at(0),
                    )
                    .ok();
            }
            let rows = state.threads_by_recency();
            rows.len() == state.threads.len()
                && rows
                    .windows(2)
                    .all(|pair| pair[0].updated_at >= pair[1].updated_at)
        }

        quickcheck(prop as fn(Vec<(u8, i16)>) -> bool);
    }

    #[test]
    fn normalize_pairs_threads_and_lists() {
        let mut state = TenantState::default();
        state
            .threads
            .insert("bare".to_string(), ThreadRecord::with_defaults("bare", at(0)));
        state.messages.insert(
            "orphan".to_string(),
            vec![MessageRecord {
                id: "m1".to_string(),
                from_me: true,
                text: "left behind".to_string(),
                at: at(42),
            }],
        );

        state.normalize();

        assert_eq!(state.messages.get("bare").map(Vec::len), Some(0));
        let orphan = state.threads.get("orphan").expect("orphan thread restored");
        assert_eq!(orphan.updated_at, at(42));
        assert_eq!(orphan.last_message, "left behind");
    }

    #[tokio::test]
    async fn list_messages_reports_vivification() {
        let store = TenantStore::default();

        let first = store.list_messages("t1", None).await;
        assert!(first.vivified);
        assert!(first.value.is_empty());

        let second = store.list_messages("t1", None).await;
        assert!(!second.vivified);
        assert_eq!(store.list_threads().await.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_duplicate_appends_store_one_message() {
        let store = std::sync::Arc::new(TenantStore::default());
        let mut handles = Vec::new();
        for _ in 0..32 {
            let store = std::sync::Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store
                    .append_message("t1", MessageInput::text("once").with_id("dup"))
                    .await
            }));
        }

        let mut outcomes = Vec::new();
        for handle in handles {
            outcomes.push(handle.await.expect("append task"));
        }

        assert_eq!(outcomes.iter().filter(|outcome| outcome.created).count(), 1);
        let first_at = outcomes[0].at;
        assert!(outcomes.iter().all(|outcome| outcome.at == first_at));
        assert_eq!(store.list_messages("t1", None).await.value.len(), 1);
    }
}
