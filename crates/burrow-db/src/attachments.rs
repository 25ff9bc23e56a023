use burrow_types::models::{Attachment, Message, NewAttachment};
use rusqlite::Connection;

use crate::MessageStore;
use crate::error::Result;
use crate::messages::ID_CHUNK;

impl MessageStore {
    // -- Attachments --

    /// Record attachment metadata. Returns `None` for an unknown message.
    pub fn add_attachment(&self, message_id: &str, attachment: NewAttachment) -> Result<Option<Message>> {
        let message = self.touch_message(message_id, |tx| {
            tx.execute(
                "INSERT INTO attachments (message_id, filename, mime_type, size_bytes, uri)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    message_id,
                    attachment.filename,
                    attachment.mime_type,
                    attachment.size_bytes,
                    attachment.uri
                ],
            )?;
            Ok(())
        })?;

        if let Some(message) = &message {
            self.emit_batch(message);
        }
        Ok(message)
    }

    pub fn list_attachments(&self, message_id: &str) -> Result<Vec<Attachment>> {
        self.with_conn(|conn| attachments_for(conn, &[message_id.to_string()]))
    }
}

pub(crate) fn attachments_for(conn: &Connection, message_ids: &[String]) -> Result<Vec<Attachment>> {
    let mut attachments = Vec::new();
    for chunk in message_ids.chunks(ID_CHUNK) {
        let placeholders: Vec<String> = (1..=chunk.len()).map(|i| format!("?{}", i)).collect();
        let sql = format!(
            "SELECT id, message_id, filename, mime_type, size_bytes, uri FROM attachments
             WHERE message_id IN ({})
             ORDER BY id ASC",
            placeholders.join(", ")
        );

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(chunk), |row| {
            Ok(Attachment {
                id: row.get(0)?,
                message_id: row.get(1)?,
                filename: row.get(2)?,
                mime_type: row.get(3)?,
                size_bytes: row.get(4)?,
                uri: row.get(5)?,
            })
        })?;
        for row in rows {
            attachments.push(row?);
        }
    }

    Ok(attachments)
}
