use burrow_types::models::{MessageFields, MessageStatus, Timestamp};
use serde::{Deserialize, Serialize};

/// A message as received from a peer. Every field is optional on the wire;
/// packets without both ids are ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IncomingPacket {
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub sender_id: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub created_at: Option<Timestamp>,
    #[serde(default)]
    pub status: Option<MessageStatus>,
    #[serde(default)]
    pub ttl_seconds: Option<i64>,
    #[serde(default)]
    pub message_type: Option<String>,
}

impl IncomingPacket {
    pub fn from_json(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }

    /// `(conversation_id, message_id)` when both are present and non-empty.
    pub fn ids(&self) -> Option<(&str, &str)> {
        let conversation_id = self.conversation_id.as_deref().filter(|id| !id.is_empty())?;
        let message_id = self.message_id.as_deref().filter(|id| !id.is_empty())?;
        Some((conversation_id, message_id))
    }

    /// Upsert fields for a newly received message, stamped `now` when the
    /// packet carries no timestamp.
    pub fn to_fields(&self, now: Timestamp) -> MessageFields {
        MessageFields {
            sender_id: self.sender_id.clone(),
            body: self.body.clone(),
            message_type: Some(
                self.message_type
                    .clone()
                    .filter(|kind| !kind.is_empty())
                    .unwrap_or_else(|| "text".to_string()),
            ),
            created_at: Some(self.created_at.unwrap_or(now)),
            status: self.status.unwrap_or(MessageStatus::Delivered),
            is_outgoing: false,
            is_forwarded: false,
            is_pinned: false,
            ttl_seconds: self.ttl_seconds,
        }
    }
}
