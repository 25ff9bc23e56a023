use burrow_types::events::StoreEvent;
use burrow_types::models::{Conversation, ConversationPatch, Timestamp, now};
use rusqlite::Connection;

use crate::MessageStore;
use crate::error::{OptionalExt, Result, StoreError};
use crate::models::{CONVERSATION_COLUMNS, ConversationRow};
use crate::protection::Protection;

impl MessageStore {
    // -- Conversations --

    /// Create the conversation if it does not exist, then apply `patch`.
    /// Fields left `None` in the patch keep their stored value.
    pub fn upsert_conversation(&self, id: &str, patch: ConversationPatch) -> Result<Conversation> {
        let title = patch
            .title
            .as_deref()
            .map(|title| self.seal_text(Some(title)))
            .transpose()?;
        let has_title = title.is_some();
        let title = title.unwrap_or_default();

        let conversation = self.with_tx(|tx| {
            let ts = now();
            let updated = tx.execute(
                "UPDATE conversations SET
                    title = CASE WHEN ?2 THEN ?3 ELSE title END,
                    title_enc = CASE WHEN ?2 THEN ?4 ELSE title_enc END,
                    archived = COALESCE(?5, archived),
                    muted_until = COALESCE(?6, muted_until),
                    disappearing_timeout = COALESCE(?7, disappearing_timeout),
                    updated_at = ?8
                 WHERE id = ?1",
                rusqlite::params![
                    id,
                    has_title,
                    title.plain,
                    title.enc,
                    patch.archived,
                    patch.muted_until,
                    patch.disappearing_timeout,
                    ts
                ],
            )?;

            if updated == 0 {
                tx.execute(
                    "INSERT INTO conversations
                        (id, title, title_enc, archived, muted_until, disappearing_timeout, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
                    rusqlite::params![
                        id,
                        title.plain,
                        title.enc,
                        patch.archived.unwrap_or(false),
                        patch.muted_until,
                        patch.disappearing_timeout,
                        ts
                    ],
                )?;
            }

            query_conversation(tx, self.protection(), id)?
                .ok_or(StoreError::Storage(rusqlite::Error::QueryReturnedNoRows))
        })?;

        self.events().emit(StoreEvent::ConversationUpdated {
            conversation_id: conversation.id.clone(),
            conversation: conversation.clone(),
        });
        Ok(conversation)
    }

    pub fn get_conversation(&self, id: &str) -> Result<Option<Conversation>> {
        self.with_conn(|conn| query_conversation(conn, self.protection(), id))
    }

    /// All conversations, most recently active first.
    pub fn list_conversations(&self) -> Result<Vec<Conversation>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM conversations
                 ORDER BY COALESCE(last_message_at, updated_at) DESC, id ASC",
                CONVERSATION_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([], ConversationRow::from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            rows.into_iter()
                .map(|row| row.into_conversation(self.protection()))
                .collect()
        })
    }

    pub fn set_conversation_archived(&self, id: &str, archived: bool) -> Result<Conversation> {
        self.upsert_conversation(
            id,
            ConversationPatch {
                archived: Some(archived),
                ..Default::default()
            },
        )
    }

    pub fn set_conversation_muted_until(
        &self,
        id: &str,
        muted_until: Timestamp,
    ) -> Result<Conversation> {
        self.upsert_conversation(
            id,
            ConversationPatch {
                muted_until: Some(muted_until),
                ..Default::default()
            },
        )
    }

    /// Default TTL for messages in this conversation that carry none.
    pub fn set_conversation_disappearing_timeout(
        &self,
        id: &str,
        seconds: i64,
    ) -> Result<Conversation> {
        self.upsert_conversation(
            id,
            ConversationPatch {
                disappearing_timeout: Some(seconds),
                ..Default::default()
            },
        )
    }
}

/// Insert a bare conversation row if none exists. Returns whether it was created.
pub(crate) fn ensure_conversation(conn: &Connection, id: &str, ts: Timestamp) -> Result<bool> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO conversations (id, created_at, updated_at) VALUES (?1, ?2, ?2)",
        rusqlite::params![id, ts],
    )?;
    Ok(inserted > 0)
}

pub(crate) fn query_conversation(
    conn: &Connection,
    protection: &Protection,
    id: &str,
) -> Result<Option<Conversation>> {
    let sql = format!("SELECT {} FROM conversations WHERE id = ?1", CONVERSATION_COLUMNS);
    let row = conn
        .query_row(&sql, [id], ConversationRow::from_row)
        .optional()?;

    row.map(|row| row.into_conversation(protection)).transpose()
}

pub(crate) fn disappearing_timeout(conn: &Connection, id: &str) -> Result<Option<i64>> {
    let timeout = conn
        .query_row(
            "SELECT disappearing_timeout FROM conversations WHERE id = ?1",
            [id],
            |row| row.get::<_, Option<i64>>(0),
        )
        .optional()?;
    Ok(timeout.flatten())
}
