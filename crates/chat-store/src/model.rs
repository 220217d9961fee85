use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ChatStoreError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadRecord {
    pub id: String,
    pub name: String,
    pub avatar_url: String,
    pub online: bool,
    pub last_message: String,
    pub unread_count: u64,
    pub updated_at: DateTime<Utc>,
    pub muted: bool,
    pub archived: bool,
}

impl ThreadRecord {
    /// Metadata for a thread nobody has described yet.
    pub fn with_defaults(thread_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: thread_id.to_string(),
            name: thread_id.to_string(),
            avatar_url: String::new(),
            online: false,
            last_message: String::new(),
            unread_count: 0,
            updated_at: now,
            muted: false,
            archived: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    pub id: String,
    pub from_me: bool,
    pub text: String,
    pub at: DateTime<Utc>,
}

/// Caller-supplied thread metadata for a full replace.
#[derive(Debug, Clone, Default)]
pub struct ThreadInput {
    pub id: String,
    pub name: Option<String>,
    pub avatar_url: Option<String>,
    pub online: Option<bool>,
    pub last_message: Option<String>,
    pub unread_count: Option<u64>,
    pub updated_at: Option<DateTime<Utc>>,
    pub muted: Option<bool>,
    pub archived: Option<bool>,
}

impl ThreadInput {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    /// The id is stored exactly as given; only a blank id is rejected.
    pub(crate) fn into_record(self, now: DateTime<Utc>) -> Result<ThreadRecord, ChatStoreError> {
        require_non_blank(&self.id, "id")?;
        let defaults = ThreadRecord::with_defaults(&self.id, now);

        Ok(ThreadRecord {
            name: normalize_optional_string(self.name.as_deref()).unwrap_or(defaults.name),
            avatar_url: self.avatar_url.unwrap_or(defaults.avatar_url),
            online: self.online.unwrap_or(defaults.online),
            last_message: self.last_message.unwrap_or(defaults.last_message),
            unread_count: self.unread_count.unwrap_or(defaults.unread_count),
            updated_at: self.updated_at.unwrap_or(defaults.updated_at),
            muted: self.muted.unwrap_or(defaults.muted),
            archived: self.archived.unwrap_or(defaults.archived),
            id: self.id,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct MessageInput {
    pub id: Option<String>,
    pub from_me: bool,
    pub text: Option<String>,
}

impl MessageInput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn from_me(mut self, from_me: bool) -> Self {
        self.from_me = from_me;
        self
    }

    /// Caller id as given, unless it is blank.
    pub(crate) fn requested_id(&self) -> Option<&str> {
        self.id.as_deref().filter(|id| !id.trim().is_empty())
    }

    pub(crate) fn into_record(self, at: DateTime<Utc>) -> MessageRecord {
        let id = match self.requested_id() {
            Some(id) => id.to_string(),
            None => generate_message_id(),
        };
        MessageRecord {
            id,
            from_me: self.from_me,
            text: self.text.unwrap_or_default(),
            at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppendOutcome {
    pub id: String,
    pub at: DateTime<Utc>,
    /// `false` when the id was already stored and nothing changed.
    pub created: bool,
}

/// A read result plus whether the addressed thread was auto-vivified to produce it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vivified<T> {
    pub value: T,
    pub vivified: bool,
}

/// Parses a message cursor: RFC 3339, or integer epoch milliseconds.
pub fn parse_cursor(raw: &str) -> Result<DateTime<Utc>, ChatStoreError> {
    let trimmed = raw.trim();
    if let Ok(millis) = trimmed.parse::<i64>() {
        return DateTime::from_timestamp_millis(millis).ok_or_else(|| {
            ChatStoreError::validation("after", format!("timestamp out of range: {millis}"))
        });
    }

    DateTime::parse_from_rfc3339(trimmed)
        .map(|value| value.with_timezone(&Utc))
        .map_err(|error| ChatStoreError::validation("after", format!("invalid timestamp: {error}")))
}

/// Messages strictly newer than `after`, in stored order.
pub fn messages_after(messages: &[MessageRecord], after: Option<DateTime<Utc>>) -> Vec<MessageRecord> {
    match after {
        Some(cutoff) => messages
            .iter()
            .filter(|message| message.at > cutoff)
            .cloned()
            .collect(),
        None => messages.to_vec(),
    }
}

fn generate_message_id() -> String {
    format!("msg_{}", Uuid::new_v4().simple())
}

fn require_non_blank(value: &str, field: &'static str) -> Result<(), ChatStoreError> {
    if value.trim().is_empty() {
        return Err(ChatStoreError::validation(field, "value is required"));
    }

    Ok(())
}

fn normalize_optional_string(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToString::to_string)
}
