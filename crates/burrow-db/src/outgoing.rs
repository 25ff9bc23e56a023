use std::time::Duration;

use burrow_types::models::{Message, MessageStatus, now};

use crate::MessageStore;
use crate::error::Result;
use crate::messages::{load_messages, query_rows};
use crate::models::MESSAGE_COLUMNS;

impl MessageStore {
    // -- Outgoing queue --

    /// Outgoing messages waiting to be sent (queued, or failed with an
    /// elapsed retry time), oldest first.
    pub fn get_outgoing_queue(&self, limit: u32) -> Result<Vec<Message>> {
        let sql = format!(
            "SELECT {} FROM messages m
             WHERE m.is_outgoing = 1
               AND m.status IN (?1, ?2)
               AND (m.next_retry_at IS NULL OR m.next_retry_at <= ?3)
             ORDER BY m.created_at ASC, m.id ASC
             LIMIT ?4",
            MESSAGE_COLUMNS
        );

        self.with_conn(|conn| {
            let rows = query_rows(
                conn,
                &sql,
                rusqlite::params![
                    MessageStatus::Queued.as_str(),
                    MessageStatus::Failed.as_str(),
                    now(),
                    limit
                ],
            )?;
            load_messages(conn, self.protection(), rows)
        })
    }

    /// Mark a send attempt as failed: bump the retry count and hold the
    /// message back for `delay`. Unknown ids return `false`.
    pub fn mark_retry(&self, id: &str, delay: Duration) -> Result<bool> {
        self.schedule_retry(id, delay, None)
    }

    /// Like [`MessageStore::mark_retry`] but sets the retry count outright.
    pub fn mark_retry_with_count(&self, id: &str, delay: Duration, retry_count: u32) -> Result<bool> {
        self.schedule_retry(id, delay, Some(retry_count))
    }

    fn schedule_retry(&self, id: &str, delay: Duration, retry_count: Option<u32>) -> Result<bool> {
        let next_retry_at = now() + delay.as_secs_f64();
        let message = self.touch_message(id, |tx| {
            tx.execute(
                "UPDATE messages SET
                    status = ?2,
                    retry_count = COALESCE(?3, retry_count + 1),
                    next_retry_at = ?4
                 WHERE id = ?1",
                rusqlite::params![id, MessageStatus::Failed.as_str(), retry_count, next_retry_at],
            )?;
            Ok(())
        })?;

        match message {
            Some(message) => {
                self.emit_batch(&message);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
