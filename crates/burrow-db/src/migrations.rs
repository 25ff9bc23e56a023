use rusqlite::Connection;
use tracing::{info, warn};

use crate::error::{Result, StoreError};

/// Schema version written by this build.
pub const CURRENT_VERSION: i64 = 2;

/// Ordered upgrade steps. Entry `(n, sql)` takes a store from `n - 1` to `n`.
const MIGRATIONS: &[(i64, &str)] = &[(
    2,
    "
    ALTER TABLE meta ADD COLUMN kdf_iterations INTEGER NOT NULL DEFAULT 390000;

    CREATE INDEX IF NOT EXISTS idx_messages_outgoing
        ON messages(is_outgoing, status, next_retry_at, created_at);
    ",
)];

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS meta (
        id              INTEGER PRIMARY KEY CHECK (id = 1),
        schema_version  INTEGER NOT NULL,
        created_at      REAL NOT NULL,
        encryption_salt BLOB NOT NULL,
        key_check       BLOB NOT NULL,
        kdf_iterations  INTEGER NOT NULL DEFAULT 390000
    );

    CREATE TABLE IF NOT EXISTS conversations (
        id                   TEXT PRIMARY KEY,
        title                TEXT,
        title_enc            BLOB,
        archived             INTEGER NOT NULL DEFAULT 0,
        muted_until          REAL,
        disappearing_timeout INTEGER,
        created_at           REAL NOT NULL,
        updated_at           REAL NOT NULL,
        last_message_at      REAL
    );

    CREATE TABLE IF NOT EXISTS messages (
        id              TEXT PRIMARY KEY,
        conversation_id TEXT NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
        sender_id       TEXT,
        message_type    TEXT NOT NULL DEFAULT 'text',
        body            TEXT,
        body_enc        BLOB,
        created_at      REAL NOT NULL,
        status          TEXT NOT NULL,
        is_outgoing     INTEGER NOT NULL DEFAULT 0,
        is_forwarded    INTEGER NOT NULL DEFAULT 0,
        is_pinned       INTEGER NOT NULL DEFAULT 0,
        ttl_seconds     INTEGER,
        expires_at      REAL,
        retry_count     INTEGER NOT NULL DEFAULT 0,
        next_retry_at   REAL
    );

    CREATE INDEX IF NOT EXISTS idx_messages_conversation_created_at
        ON messages(conversation_id, created_at, id);
    CREATE INDEX IF NOT EXISTS idx_messages_expires_at
        ON messages(expires_at);
    CREATE INDEX IF NOT EXISTS idx_messages_outgoing
        ON messages(is_outgoing, status, next_retry_at, created_at);

    CREATE TABLE IF NOT EXISTS reactions (
        message_id  TEXT NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
        actor_id    TEXT NOT NULL,
        emoji       TEXT NOT NULL,
        created_at  REAL NOT NULL,
        PRIMARY KEY (message_id, actor_id, emoji)
    );

    CREATE TABLE IF NOT EXISTS pinned_states (
        target_type TEXT NOT NULL,
        target_id   TEXT NOT NULL,
        pinned      INTEGER NOT NULL,
        pinned_at   REAL,
        PRIMARY KEY (target_type, target_id)
    );

    CREATE TABLE IF NOT EXISTS attachments (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        message_id  TEXT NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
        filename    TEXT,
        mime_type   TEXT,
        size_bytes  INTEGER,
        uri         TEXT
    );

    CREATE INDEX IF NOT EXISTS idx_attachments_message
        ON attachments(message_id);
";

const SEARCH_INDEX: &str = "
    CREATE VIRTUAL TABLE IF NOT EXISTS message_fts USING fts5(
        body,
        conversation_id UNINDEXED,
        message_id UNINDEXED,
        created_at UNINDEXED
    );

    CREATE TRIGGER IF NOT EXISTS messages_ai AFTER INSERT ON messages BEGIN
        INSERT INTO message_fts(rowid, body, conversation_id, message_id, created_at)
        VALUES (new.rowid, new.body, new.conversation_id, new.id, new.created_at);
    END;

    CREATE TRIGGER IF NOT EXISTS messages_ad AFTER DELETE ON messages BEGIN
        DELETE FROM message_fts WHERE rowid = old.rowid;
    END;

    CREATE TRIGGER IF NOT EXISTS messages_au AFTER UPDATE ON messages BEGIN
        DELETE FROM message_fts WHERE rowid = old.rowid;
        INSERT INTO message_fts(rowid, body, conversation_id, message_id, created_at)
        VALUES (new.rowid, new.body, new.conversation_id, new.id, new.created_at);
    END;
";

pub fn schema_version(conn: &Connection) -> Result<i64> {
    Ok(conn.query_row("PRAGMA user_version", [], |row| row.get(0))?)
}

/// Refuse stores written by a newer build before anything touches them.
pub fn check_supported(version: i64) -> Result<()> {
    if version > CURRENT_VERSION {
        return Err(StoreError::Schema {
            found: version,
            supported: CURRENT_VERSION,
        });
    }
    Ok(())
}

/// Create the full current schema on a fresh store in one transaction.
pub fn create_schema(conn: &mut Connection) -> Result<()> {
    let tx = conn.transaction()?;
    tx.execute_batch(SCHEMA)?;
    tx.pragma_update(None, "user_version", CURRENT_VERSION)?;
    tx.commit()?;

    info!("Store schema v{} created", CURRENT_VERSION);
    Ok(())
}

/// Bring an older store up to [`CURRENT_VERSION`], one step per transaction.
pub fn migrate(conn: &mut Connection, from: i64) -> Result<()> {
    check_supported(from)?;

    for (version, sql) in MIGRATIONS.iter().filter(|(v, _)| *v > from) {
        info!("Store: running migration v{}", version);
        let tx = conn.transaction()?;
        tx.execute_batch(sql)?;
        tx.execute("UPDATE meta SET schema_version = ?1 WHERE id = 1", [version])?;
        tx.pragma_update(None, "user_version", version)?;
        tx.commit()?;
    }

    Ok(())
}

/// Make sure the FTS5 index and its triggers exist. Returns `false` when this
/// SQLite build has no FTS5, in which case search falls back to scanning.
pub fn ensure_search_index(conn: &mut Connection) -> Result<bool> {
    let existed: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE name = 'message_fts')",
        [],
        |row| row.get(0),
    )?;
    if existed {
        return Ok(true);
    }

    let tx = conn.transaction()?;
    if let Err(e) = tx.execute_batch(SEARCH_INDEX) {
        warn!("Full-text index unavailable, search will scan: {}", e);
        return Ok(false);
    }
    let backfilled = tx.execute(
        "INSERT INTO message_fts(rowid, body, conversation_id, message_id, created_at)
         SELECT rowid, body, conversation_id, id, created_at FROM messages",
        [],
    )?;
    tx.commit()?;

    info!("Full-text index created ({} messages indexed)", backfilled);
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCHEMA_V1: &str = "
        CREATE TABLE meta (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            schema_version INTEGER NOT NULL,
            created_at REAL NOT NULL,
            encryption_salt BLOB NOT NULL,
            key_check BLOB NOT NULL
        );
        CREATE TABLE messages (
            id TEXT PRIMARY KEY,
            conversation_id TEXT NOT NULL,
            body TEXT,
            created_at REAL NOT NULL,
            status TEXT NOT NULL,
            is_outgoing INTEGER NOT NULL DEFAULT 0,
            next_retry_at REAL
        );
        INSERT INTO meta VALUES (1, 1, 0.0, x'00', x'00');
        PRAGMA user_version = 1;
    ";

    #[test]
    fn fresh_schema_is_current() {
        let mut conn = Connection::open_in_memory().unwrap();
        create_schema(&mut conn).unwrap();
        assert_eq!(schema_version(&conn).unwrap(), CURRENT_VERSION);
    }

    #[test]
    fn v1_store_is_upgraded_in_order() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(SCHEMA_V1).unwrap();

        migrate(&mut conn, 1).unwrap();

        assert_eq!(schema_version(&conn).unwrap(), 2);
        let (version, iterations): (i64, i64) = conn
            .query_row("SELECT schema_version, kdf_iterations FROM meta", [], |r| {
                Ok((r.get(0)?, r.get(1)?))
            })
            .unwrap();
        assert_eq!(version, 2);
        assert_eq!(iterations, 390_000);
    }

    #[test]
    fn newer_store_is_refused() {
        let mut conn = Connection::open_in_memory().unwrap();
        let err = migrate(&mut conn, CURRENT_VERSION + 1).unwrap_err();
        assert!(matches!(err, StoreError::Schema { found: 3, supported: 2 }));
    }

    #[test]
    fn search_index_backfills_existing_rows() {
        let mut conn = Connection::open_in_memory().unwrap();
        create_schema(&mut conn).unwrap();
        conn.execute_batch(
            "INSERT INTO conversations (id, created_at, updated_at) VALUES ('c1', 1, 1);
             INSERT INTO messages (id, conversation_id, body, created_at, status)
                 VALUES ('m1', 'c1', 'hello there', 1, 'sent');",
        )
        .unwrap();

        assert!(ensure_search_index(&mut conn).unwrap());
        let hits: i64 = conn
            .query_row(
                "SELECT count(*) FROM message_fts WHERE message_fts MATCH 'hello'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(hits, 1);

        // second call is a no-op
        assert!(ensure_search_index(&mut conn).unwrap());
    }
}
