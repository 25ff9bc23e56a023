use burrow_types::models::{Message, Reaction, now};
use rusqlite::Connection;

use crate::MessageStore;
use crate::error::Result;
use crate::messages::ID_CHUNK;

impl MessageStore {
    // -- Reactions --

    /// Add a reaction. Adding the same (actor, emoji) twice is a no-op.
    /// Returns `None` for an unknown message.
    pub fn add_reaction(&self, message_id: &str, actor_id: &str, emoji: &str) -> Result<Option<Message>> {
        let message = self.touch_message(message_id, |tx| {
            tx.execute(
                "INSERT OR IGNORE INTO reactions (message_id, actor_id, emoji, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![message_id, actor_id, emoji, now()],
            )?;
            Ok(())
        })?;

        if let Some(message) = &message {
            self.emit_batch(message);
        }
        Ok(message)
    }

    pub fn remove_reaction(&self, message_id: &str, actor_id: &str, emoji: &str) -> Result<Option<Message>> {
        let message = self.touch_message(message_id, |tx| {
            tx.execute(
                "DELETE FROM reactions WHERE message_id = ?1 AND actor_id = ?2 AND emoji = ?3",
                rusqlite::params![message_id, actor_id, emoji],
            )?;
            Ok(())
        })?;

        if let Some(message) = &message {
            self.emit_batch(message);
        }
        Ok(message)
    }

    pub fn list_reactions(&self, message_id: &str) -> Result<Vec<Reaction>> {
        self.with_conn(|conn| reactions_for(conn, &[message_id.to_string()]))
    }
}

/// Batch-fetch reactions for a set of message IDs, oldest first per message.
pub(crate) fn reactions_for(conn: &Connection, message_ids: &[String]) -> Result<Vec<Reaction>> {
    let mut reactions = Vec::new();
    for chunk in message_ids.chunks(ID_CHUNK) {
        let placeholders: Vec<String> = (1..=chunk.len()).map(|i| format!("?{}", i)).collect();
        let sql = format!(
            "SELECT message_id, actor_id, emoji, created_at FROM reactions
             WHERE message_id IN ({})
             ORDER BY created_at ASC, actor_id ASC, emoji ASC",
            placeholders.join(", ")
        );

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(chunk), |row| {
            Ok(Reaction {
                message_id: row.get(0)?,
                actor_id: row.get(1)?,
                emoji: row.get(2)?,
                created_at: row.get(3)?,
            })
        })?;
        for row in rows {
            reactions.push(row?);
        }
    }

    Ok(reactions)
}
