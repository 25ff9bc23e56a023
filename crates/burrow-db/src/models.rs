//! Row types read straight from SQLite, before decryption.
//! Sensitive columns come in pairs (`body` / `body_enc`); only one of each
//! pair is populated depending on the store's protection mode.

use burrow_types::models::{Conversation, Message, MessageStatus, Timestamp};
use rusqlite::Row;
use rusqlite::types::Type;

use crate::error::{Result, StoreError};
use crate::protection::Protection;

pub const CONVERSATION_COLUMNS: &str = "id, title, title_enc, archived, muted_until, \
     disappearing_timeout, created_at, updated_at, last_message_at";

/// Message columns, always selected from `messages` aliased as `m`.
pub const MESSAGE_COLUMNS: &str = "m.id, m.conversation_id, m.sender_id, m.message_type, \
     m.body, m.body_enc, m.created_at, m.status, m.is_outgoing, m.is_forwarded, m.is_pinned, \
     m.ttl_seconds, m.expires_at, m.retry_count, m.next_retry_at";

pub struct ConversationRow {
    pub id: String,
    pub title: Option<String>,
    pub title_enc: Option<Vec<u8>>,
    pub archived: bool,
    pub muted_until: Option<Timestamp>,
    pub disappearing_timeout: Option<i64>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub last_message_at: Option<Timestamp>,
}

impl ConversationRow {
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            title: row.get(1)?,
            title_enc: row.get(2)?,
            archived: row.get(3)?,
            muted_until: row.get(4)?,
            disappearing_timeout: row.get(5)?,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
            last_message_at: row.get(8)?,
        })
    }

    pub fn into_conversation(self, protection: &Protection) -> Result<Conversation> {
        let title = protection.open_text(self.title, self.title_enc)?;
        Ok(Conversation {
            id: self.id,
            title: title.unwrap_or_default(),
            archived: self.archived,
            muted_until: self.muted_until,
            disappearing_timeout: self.disappearing_timeout,
            created_at: self.created_at,
            updated_at: self.updated_at,
            last_message_at: self.last_message_at,
        })
    }
}

pub struct MessageRow {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: Option<String>,
    pub message_type: String,
    pub body: Option<String>,
    pub body_enc: Option<Vec<u8>>,
    pub created_at: Timestamp,
    pub status: String,
    pub is_outgoing: bool,
    pub is_forwarded: bool,
    pub is_pinned: bool,
    pub ttl_seconds: Option<i64>,
    pub expires_at: Option<Timestamp>,
    pub retry_count: u32,
    pub next_retry_at: Option<Timestamp>,
}

impl MessageRow {
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            conversation_id: row.get(1)?,
            sender_id: row.get(2)?,
            message_type: row.get(3)?,
            body: row.get(4)?,
            body_enc: row.get(5)?,
            created_at: row.get(6)?,
            status: row.get(7)?,
            is_outgoing: row.get(8)?,
            is_forwarded: row.get(9)?,
            is_pinned: row.get(10)?,
            ttl_seconds: row.get(11)?,
            expires_at: row.get(12)?,
            retry_count: row.get(13)?,
            next_retry_at: row.get(14)?,
        })
    }

    pub fn body(&self, protection: &Protection) -> Result<Option<String>> {
        protection.open_text(self.body.clone(), self.body_enc.clone())
    }

    /// Decrypt and convert. Reactions and attachments are filled in by the
    /// caller, which loads them for a whole page at once.
    pub fn into_message(self, protection: &Protection) -> Result<Message> {
        let status = self.status.parse::<MessageStatus>().map_err(|e| {
            StoreError::Storage(rusqlite::Error::FromSqlConversionFailure(
                7,
                Type::Text,
                Box::new(e),
            ))
        })?;
        let body = protection.open_text(self.body, self.body_enc)?;

        Ok(Message {
            id: self.id,
            conversation_id: self.conversation_id,
            sender_id: self.sender_id,
            message_type: self.message_type,
            body,
            created_at: self.created_at,
            status,
            is_outgoing: self.is_outgoing,
            is_forwarded: self.is_forwarded,
            is_pinned: self.is_pinned,
            ttl_seconds: self.ttl_seconds,
            expires_at: self.expires_at,
            retry_count: self.retry_count,
            next_retry_at: self.next_retry_at,
            reactions: Vec::new(),
            attachments: Vec::new(),
        })
    }
}
