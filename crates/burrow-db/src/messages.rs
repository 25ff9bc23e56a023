use std::collections::HashMap;

use burrow_types::events::StoreEvent;
use burrow_types::models::{Conversation, Cursor, Message, MessageFields, MessageStatus, Timestamp, now};
use rusqlite::{Connection, Params, Transaction};

use crate::MessageStore;
use crate::attachments::attachments_for;
use crate::conversations::{disappearing_timeout, ensure_conversation, query_conversation};
use crate::error::{OptionalExt, Result, StoreError};
use crate::models::{MESSAGE_COLUMNS, MessageRow};
use crate::protection::Protection;
use crate::reactions::reactions_for;

impl MessageStore {
    // -- Messages --

    /// Insert or merge a message keyed by `message_id`.
    ///
    /// Replaying the same call leaves the store unchanged. `created_at` only
    /// ever moves earlier. The TTL is the one given here, else the one stored
    /// on the message, else the conversation's disappearing timeout.
    pub fn upsert_message(
        &self,
        conversation_id: &str,
        message_id: &str,
        fields: MessageFields,
    ) -> Result<Message> {
        let body = self.seal_text(fields.body.as_deref())?;

        let (message, new_conversation) = self.with_tx(|tx| {
            let ts = now();
            let created = ensure_conversation(tx, conversation_id, ts)?;

            let existing: Option<(Timestamp, Option<i64>)> = tx
                .query_row(
                    "SELECT created_at, ttl_seconds FROM messages WHERE id = ?1",
                    [message_id],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;

            let incoming_created = fields.created_at.unwrap_or(ts);
            let created_at = match existing {
                Some((stored, _)) => stored.min(incoming_created),
                None => incoming_created,
            };
            let ttl_seconds = match fields.ttl_seconds.or(existing.and_then(|(_, ttl)| ttl)) {
                Some(ttl) => Some(ttl),
                None => disappearing_timeout(tx, conversation_id)?,
            };
            let expires_at = ttl_seconds.map(|ttl| created_at + ttl as f64);

            tx.execute(
                "INSERT INTO messages
                    (id, conversation_id, sender_id, message_type, body, body_enc, created_at,
                     status, is_outgoing, is_forwarded, is_pinned, ttl_seconds, expires_at)
                 VALUES (?1, ?2, ?3, COALESCE(?4, 'text'), ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
                 ON CONFLICT(id) DO UPDATE SET
                    conversation_id = excluded.conversation_id,
                    sender_id = COALESCE(excluded.sender_id, messages.sender_id),
                    message_type = COALESCE(?4, messages.message_type),
                    body = COALESCE(excluded.body, messages.body),
                    body_enc = COALESCE(excluded.body_enc, messages.body_enc),
                    created_at = excluded.created_at,
                    status = excluded.status,
                    is_outgoing = excluded.is_outgoing,
                    is_forwarded = excluded.is_forwarded,
                    is_pinned = excluded.is_pinned,
                    ttl_seconds = excluded.ttl_seconds,
                    expires_at = excluded.expires_at",
                rusqlite::params![
                    message_id,
                    conversation_id,
                    fields.sender_id,
                    fields.message_type,
                    body.plain,
                    body.enc,
                    created_at,
                    fields.status.as_str(),
                    fields.is_outgoing,
                    fields.is_forwarded,
                    fields.is_pinned,
                    ttl_seconds,
                    expires_at
                ],
            )?;

            tx.execute(
                "UPDATE conversations
                 SET last_message_at = MAX(COALESCE(last_message_at, ?2), ?2), updated_at = ?3
                 WHERE id = ?1",
                rusqlite::params![conversation_id, created_at, ts],
            )?;

            let new_conversation = if created {
                query_conversation(tx, self.protection(), conversation_id)?
            } else {
                None
            };
            let message = query_message(tx, self.protection(), message_id)?
                .ok_or(StoreError::Storage(rusqlite::Error::QueryReturnedNoRows))?;
            Ok((message, new_conversation))
        })?;

        if let Some(expires_at) = message.expires_at {
            self.arm_expiry(&message.id, expires_at);
        }
        if let Some(conversation) = new_conversation {
            self.emit_conversation(conversation);
        }
        self.emit_batch(&message);
        Ok(message)
    }

    pub fn get_message(&self, id: &str) -> Result<Option<Message>> {
        self.with_conn(|conn| query_message(conn, self.protection(), id))
    }

    /// One page of a conversation's history in ascending `(created_at, id)`
    /// order. Without a cursor this is the most recent `limit` messages;
    /// `before` / `after` page strictly around the cursor. Passing both is an
    /// error.
    pub fn fetch_history(
        &self,
        conversation_id: &str,
        limit: u32,
        before: Option<&Cursor>,
        after: Option<&Cursor>,
    ) -> Result<Vec<Message>> {
        let select = format!("SELECT {} FROM messages m WHERE m.conversation_id = ?1", MESSAGE_COLUMNS);

        self.with_conn(|conn| {
            let rows = match (before, after) {
                (Some(_), Some(_)) => {
                    return Err(StoreError::InvalidArgument(
                        "use either a before or an after cursor, not both".into(),
                    ));
                }
                (None, None) => {
                    let sql = format!("{} ORDER BY m.created_at DESC, m.id DESC LIMIT ?2", select);
                    let mut rows = query_rows(conn, &sql, rusqlite::params![conversation_id, limit])?;
                    rows.reverse();
                    rows
                }
                (Some(cursor), None) => {
                    let sql = format!(
                        "{} AND (m.created_at < ?2 OR (m.created_at = ?2 AND m.id < ?3))
                         ORDER BY m.created_at DESC, m.id DESC LIMIT ?4",
                        select
                    );
                    let mut rows = query_rows(
                        conn,
                        &sql,
                        rusqlite::params![conversation_id, cursor.created_at, cursor.message_id, limit],
                    )?;
                    rows.reverse();
                    rows
                }
                (None, Some(cursor)) => {
                    let sql = format!(
                        "{} AND (m.created_at > ?2 OR (m.created_at = ?2 AND m.id > ?3))
                         ORDER BY m.created_at ASC, m.id ASC LIMIT ?4",
                        select
                    );
                    query_rows(
                        conn,
                        &sql,
                        rusqlite::params![conversation_id, cursor.created_at, cursor.message_id, limit],
                    )?
                }
            };

            load_messages(conn, self.protection(), rows)
        })
    }

    /// Delete a message and everything hanging off it. Unknown ids return
    /// `false`.
    pub fn delete_message(&self, id: &str) -> Result<bool> {
        self.cancel_expiry(id);

        let conversation_id = self.with_tx(|tx| {
            let conversation_id: Option<String> = tx
                .query_row(
                    "SELECT conversation_id FROM messages WHERE id = ?1",
                    [id],
                    |row| row.get(0),
                )
                .optional()?;
            if conversation_id.is_some() {
                tx.execute(
                    "DELETE FROM pinned_states WHERE target_type = 'message' AND target_id = ?1",
                    [id],
                )?;
                // reactions and attachments go with it (ON DELETE CASCADE)
                tx.execute("DELETE FROM messages WHERE id = ?1", [id])?;
            }
            Ok(conversation_id)
        })?;

        match conversation_id {
            Some(conversation_id) => {
                self.events().emit(StoreEvent::MessageDeleted {
                    conversation_id,
                    message_id: id.to_string(),
                });
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Set the delivery status. Any transition is accepted, including going
    /// backwards.
    pub fn update_message_status(&self, id: &str, status: MessageStatus) -> Result<Option<Message>> {
        let message = self.touch_message(id, |tx| {
            tx.execute(
                "UPDATE messages SET status = ?2 WHERE id = ?1",
                rusqlite::params![id, status.as_str()],
            )?;
            Ok(())
        })?;

        if let Some(message) = &message {
            self.events().emit(StoreEvent::ReceiptUpdated {
                conversation_id: message.conversation_id.clone(),
                message_id: message.id.clone(),
                status,
            });
            self.emit_batch(message);
        }
        Ok(message)
    }

    pub fn set_message_pinned(&self, id: &str, pinned: bool) -> Result<Option<Message>> {
        let message = self.touch_message(id, |tx| {
            tx.execute(
                "UPDATE messages SET is_pinned = ?2 WHERE id = ?1",
                rusqlite::params![id, pinned],
            )?;
            if pinned {
                tx.execute(
                    "INSERT OR REPLACE INTO pinned_states (target_type, target_id, pinned, pinned_at)
                     VALUES ('message', ?1, 1, ?2)",
                    rusqlite::params![id, now()],
                )?;
            } else {
                tx.execute(
                    "DELETE FROM pinned_states WHERE target_type = 'message' AND target_id = ?1",
                    [id],
                )?;
            }
            Ok(())
        })?;

        if let Some(message) = &message {
            self.emit_batch(message);
        }
        Ok(message)
    }

    pub fn set_message_forwarded(&self, id: &str, forwarded: bool) -> Result<Option<Message>> {
        let message = self.touch_message(id, |tx| {
            tx.execute(
                "UPDATE messages SET is_forwarded = ?2 WHERE id = ?1",
                rusqlite::params![id, forwarded],
            )?;
            Ok(())
        })?;

        if let Some(message) = &message {
            self.emit_batch(message);
        }
        Ok(message)
    }

    /// Every pinned message of a conversation, most recently pinned first.
    /// Several messages may be pinned at once.
    pub fn pinned_messages(&self, conversation_id: &str) -> Result<Vec<Message>> {
        let sql = format!(
            "SELECT {} FROM messages m
             LEFT JOIN pinned_states p ON p.target_type = 'message' AND p.target_id = m.id
             WHERE m.conversation_id = ?1 AND m.is_pinned = 1
             ORDER BY COALESCE(p.pinned_at, m.created_at) DESC, m.id ASC",
            MESSAGE_COLUMNS
        );

        self.with_conn(|conn| {
            let rows = query_rows(conn, &sql, [conversation_id])?;
            load_messages(conn, self.protection(), rows)
        })
    }

    /// Apply `update` to an existing message and return its new snapshot.
    /// `None` when the message does not exist; nothing is run then.
    pub(crate) fn touch_message<F>(&self, id: &str, update: F) -> Result<Option<Message>>
    where
        F: FnOnce(&Transaction<'_>) -> Result<()>,
    {
        self.with_tx(|tx| {
            let exists: bool = tx.query_row(
                "SELECT EXISTS(SELECT 1 FROM messages WHERE id = ?1)",
                [id],
                |row| row.get(0),
            )?;
            if !exists {
                return Ok(None);
            }
            update(tx)?;
            query_message(tx, self.protection(), id)
        })
    }

    pub(crate) fn emit_batch(&self, message: &Message) {
        self.events().emit(StoreEvent::MessageBatchUpdated {
            conversation_id: message.conversation_id.clone(),
            messages: vec![message.clone()],
        });
    }

    pub(crate) fn emit_conversation(&self, conversation: Conversation) {
        self.events().emit(StoreEvent::ConversationUpdated {
            conversation_id: conversation.id.clone(),
            conversation,
        });
    }
}

pub(crate) fn query_rows<P: Params>(conn: &Connection, sql: &str, params: P) -> Result<Vec<MessageRow>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, MessageRow::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub(crate) fn query_message(
    conn: &Connection,
    protection: &Protection,
    id: &str,
) -> Result<Option<Message>> {
    let sql = format!("SELECT {} FROM messages m WHERE m.id = ?1", MESSAGE_COLUMNS);
    let rows = query_rows(conn, &sql, [id])?;
    Ok(load_messages(conn, protection, rows)?.pop())
}

/// Ids bound per `IN (...)` list, well under SQLite's variable limit.
pub(crate) const ID_CHUNK: usize = 500;

/// Decrypt a page of rows and attach their reactions and attachments,
/// batched `ID_CHUNK` ids per query.
pub(crate) fn load_messages(
    conn: &Connection,
    protection: &Protection,
    rows: Vec<MessageRow>,
) -> Result<Vec<Message>> {
    if rows.is_empty() {
        return Ok(Vec::new());
    }

    let ids: Vec<String> = rows.iter().map(|row| row.id.clone()).collect();
    let mut reactions = group_by_message(reactions_for(conn, &ids)?, |r| &r.message_id);
    let mut attachments = group_by_message(attachments_for(conn, &ids)?, |a| &a.message_id);

    rows.into_iter()
        .map(|row| {
            let mut message = row.into_message(protection)?;
            message.reactions = reactions.remove(&message.id).unwrap_or_default();
            message.attachments = attachments.remove(&message.id).unwrap_or_default();
            Ok(message)
        })
        .collect()
}

fn group_by_message<T>(items: Vec<T>, key: impl Fn(&T) -> &String) -> HashMap<String, Vec<T>> {
    let mut grouped: HashMap<String, Vec<T>> = HashMap::new();
    for item in items {
        grouped.entry(key(&item).clone()).or_default().push(item);
    }
    grouped
}
