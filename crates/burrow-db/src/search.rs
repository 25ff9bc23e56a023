//! Keyword search over message bodies.
//!
//! Whole-store mode queries the `message_fts` index. Field-level mode (or a
//! SQLite without FTS5) decrypts candidate rows and matches substrings. Both
//! return newest-first pages of full message snapshots.

use burrow_types::models::{Message, SearchQuery};
use rusqlite::Connection;
use rusqlite::types::Value;

use crate::MessageStore;
use crate::error::Result;
use crate::messages::{load_messages, query_rows};
use crate::models::MESSAGE_COLUMNS;
use crate::protection::Protection;

impl MessageStore {
    pub fn search_messages(&self, query: &SearchQuery) -> Result<Vec<Message>> {
        if query.keyword.trim().is_empty() || query.limit == 0 {
            return Ok(Vec::new());
        }

        self.with_conn(|conn| {
            if self.search_index_enabled() {
                search_indexed(conn, self.protection(), query)
            } else {
                search_scan(conn, self.protection(), query)
            }
        })
    }
}

/// Quote the keyword as a single FTS5 phrase so operators in user input are
/// taken literally.
fn fts_phrase(keyword: &str) -> String {
    format!("\"{}\"", keyword.trim().replace('"', "\"\""))
}

fn push_filters(query: &SearchQuery, clauses: &mut Vec<&'static str>, params: &mut Vec<Value>) {
    if let Some(conversation_id) = &query.conversation_id {
        clauses.push("m.conversation_id = ?");
        params.push(Value::Text(conversation_id.clone()));
    }
    if let Some(start) = query.start_ts {
        clauses.push("m.created_at >= ?");
        params.push(Value::Real(start));
    }
    if let Some(end) = query.end_ts {
        clauses.push("m.created_at <= ?");
        params.push(Value::Real(end));
    }
    if let Some(message_type) = &query.message_type {
        clauses.push("m.message_type = ?");
        params.push(Value::Text(message_type.clone()));
    }
}

pub(crate) fn search_indexed(
    conn: &Connection,
    protection: &Protection,
    query: &SearchQuery,
) -> Result<Vec<Message>> {
    let mut clauses = vec!["message_fts MATCH ?"];
    let mut params = vec![Value::Text(fts_phrase(&query.keyword))];
    push_filters(query, &mut clauses, &mut params);
    params.push(Value::Integer(query.limit.into()));
    params.push(Value::Integer(query.offset.into()));

    let sql = format!(
        "SELECT {} FROM message_fts
         JOIN messages m ON m.rowid = message_fts.rowid
         WHERE {}
         ORDER BY m.created_at DESC, m.id DESC
         LIMIT ? OFFSET ?",
        MESSAGE_COLUMNS,
        clauses.join(" AND ")
    );

    let rows = query_rows(conn, &sql, rusqlite::params_from_iter(params))?;
    load_messages(conn, protection, rows)
}

pub(crate) fn search_scan(
    conn: &Connection,
    protection: &Protection,
    query: &SearchQuery,
) -> Result<Vec<Message>> {
    let mut clauses = vec!["1 = 1"];
    let mut params = Vec::new();
    push_filters(query, &mut clauses, &mut params);

    let sql = format!(
        "SELECT {} FROM messages m WHERE {} ORDER BY m.created_at DESC, m.id DESC",
        MESSAGE_COLUMNS,
        clauses.join(" AND ")
    );
    let needle = query.keyword.trim().to_lowercase();

    let mut matched = Vec::new();
    let mut skipped = 0;
    for row in query_rows(conn, &sql, rusqlite::params_from_iter(params))? {
        let hit = row
            .body(protection)?
            .is_some_and(|body| body.to_lowercase().contains(&needle));
        if !hit {
            continue;
        }
        if skipped < query.offset {
            skipped += 1;
            continue;
        }
        matched.push(row);
        if matched.len() >= query.limit as usize {
            break;
        }
    }

    load_messages(conn, protection, matched)
}
