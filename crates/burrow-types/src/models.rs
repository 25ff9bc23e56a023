use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Unix time in seconds. Sub-second precision is kept so that a TTL of zero
/// expires strictly before the next sweep.
pub type Timestamp = f64;

/// Current wall-clock time as a [`Timestamp`].
pub fn now() -> Timestamp {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

/// Delivery state of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Queued,
    Sent,
    Delivered,
    Read,
    Failed,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Read => "read",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownStatus(pub String);

impl fmt::Display for UnknownStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown message status: {}", self.0)
    }
}

impl std::error::Error for UnknownStatus {}

impl FromStr for MessageStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "sent" => Ok(Self::Sent),
            "delivered" => Ok(Self::Delivered),
            "read" => Ok(Self::Read),
            "failed" => Ok(Self::Failed),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub title: String,
    pub archived: bool,
    pub muted_until: Option<Timestamp>,
    /// Default TTL (seconds) for messages that carry none of their own.
    pub disappearing_timeout: Option<i64>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub last_message_at: Option<Timestamp>,
}

/// Partial conversation update. `None` fields keep their stored value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationPatch {
    pub title: Option<String>,
    pub archived: Option<bool>,
    pub muted_until: Option<Timestamp>,
    pub disappearing_timeout: Option<i64>,
}

/// A stored message as handed out to callers. This is a snapshot; later
/// writes to the store do not show up in it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: Option<String>,
    pub message_type: String,
    pub body: Option<String>,
    pub created_at: Timestamp,
    pub status: MessageStatus,
    pub is_outgoing: bool,
    pub is_forwarded: bool,
    pub is_pinned: bool,
    pub ttl_seconds: Option<i64>,
    pub expires_at: Option<Timestamp>,
    pub retry_count: u32,
    pub next_retry_at: Option<Timestamp>,
    pub reactions: Vec<Reaction>,
    pub attachments: Vec<Attachment>,
}

impl Message {
    /// Pagination cursor positioned on this message.
    pub fn cursor(&self) -> Cursor {
        Cursor {
            created_at: self.created_at,
            message_id: self.id.clone(),
        }
    }
}

/// Fields accepted by a message upsert.
///
/// `sender_id`, `message_type` and `body` only overwrite when `Some`;
/// `created_at` merges to the earliest value seen; the flags and `status`
/// always take the value given here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageFields {
    pub sender_id: Option<String>,
    pub body: Option<String>,
    pub message_type: Option<String>,
    pub created_at: Option<Timestamp>,
    pub status: MessageStatus,
    pub is_outgoing: bool,
    pub is_forwarded: bool,
    pub is_pinned: bool,
    pub ttl_seconds: Option<i64>,
}

impl Default for MessageFields {
    fn default() -> Self {
        Self {
            sender_id: None,
            body: None,
            message_type: None,
            created_at: None,
            status: MessageStatus::Sent,
            is_outgoing: false,
            is_forwarded: false,
            is_pinned: false,
            ttl_seconds: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reaction {
    pub message_id: String,
    pub actor_id: String,
    pub emoji: String,
    pub created_at: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub id: i64,
    pub message_id: String,
    pub filename: Option<String>,
    pub mime_type: Option<String>,
    pub size_bytes: Option<i64>,
    pub uri: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewAttachment {
    pub filename: Option<String>,
    pub mime_type: Option<String>,
    pub size_bytes: Option<i64>,
    pub uri: Option<String>,
}

/// History position. Ties on `created_at` are broken by `message_id`, which
/// gives every message in a conversation a strict place in the order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cursor {
    pub created_at: Timestamp,
    pub message_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchQuery {
    pub keyword: String,
    pub conversation_id: Option<String>,
    pub start_ts: Option<Timestamp>,
    pub end_ts: Option<Timestamp>,
    pub message_type: Option<String>,
    pub limit: u32,
    pub offset: u32,
}

impl SearchQuery {
    pub fn new(keyword: impl Into<String>) -> Self {
        Self {
            keyword: keyword.into(),
            conversation_id: None,
            start_ts: None,
            end_ts: None,
            message_type: None,
            limit: 50,
            offset: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_parses_its_own_names() {
        for status in [
            MessageStatus::Queued,
            MessageStatus::Sent,
            MessageStatus::Delivered,
            MessageStatus::Read,
            MessageStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<MessageStatus>(), Ok(status));
        }
        assert!("pending".parse::<MessageStatus>().is_err());
    }

    #[test]
    fn status_serializes_lowercase() {
        let json = serde_json::to_string(&MessageStatus::Delivered).unwrap();
        assert_eq!(json, "\"delivered\"");
    }

    #[test]
    fn upsert_fields_default_to_sent_incoming() {
        let fields = MessageFields::default();
        assert_eq!(fields.status, MessageStatus::Sent);
        assert!(!fields.is_outgoing);
        assert!(fields.ttl_seconds.is_none());
    }
}
