//! At-rest protection strategy, chosen once per open.
//!
//! * Whole-store: SQLCipher encrypts the file; text columns hold cleartext
//!   inside the encrypted container and the full-text index can be used.
//! * Field-level: plain SQLite; each sensitive column has a `*_enc` twin
//!   holding AES-256-GCM ciphertext and the cleartext column stays NULL.
//!
//! Both strategies seal the same key-check canary with a PBKDF2-derived key,
//! so a wrong key is rejected the same way whichever one is active.

use std::io::Read;
use std::path::Path;

use burrow_crypto::{FieldCipher, derive_field_key, generate_salt};
use burrow_types::models::now;
use rusqlite::Connection;
use tracing::debug;

use crate::error::{OptionalExt, Result, StoreError};
use crate::migrations::CURRENT_VERSION;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    WholeStore,
    FieldLevel,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WholeStore => "whole-store",
            Self::FieldLevel => "field-level",
        }
    }
}

/// A text value ready to be written: exactly one of the two columns is used.
#[derive(Debug, Default)]
pub(crate) struct SealedText {
    pub plain: Option<String>,
    pub enc: Option<Vec<u8>>,
}

pub struct Protection {
    mode: Mode,
    cipher: FieldCipher,
}

impl Protection {
    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub(crate) fn seal_text(&self, value: Option<&str>) -> Result<SealedText> {
        match self.mode {
            Mode::WholeStore => Ok(SealedText {
                plain: value.map(str::to_owned),
                enc: None,
            }),
            Mode::FieldLevel => Ok(SealedText {
                plain: None,
                enc: self.cipher.encrypt(value)?,
            }),
        }
    }

    pub(crate) fn open_text(
        &self,
        plain: Option<String>,
        enc: Option<Vec<u8>>,
    ) -> Result<Option<String>> {
        match self.mode {
            Mode::WholeStore => Ok(plain),
            Mode::FieldLevel => Ok(self.cipher.decrypt(enc.as_deref())?),
        }
    }
}

/// Capability probe. Applies the key and reports `true` only when the linked
/// SQLite is SQLCipher and the key opens the file.
pub(crate) fn probe_whole_store(conn: &Connection, key: &str) -> Result<bool> {
    let cipher_version: Option<String> = conn
        .query_row("PRAGMA cipher_version", [], |row| row.get(0))
        .optional()?;
    if !cipher_version.is_some_and(|v| !v.is_empty()) {
        debug!("SQLCipher not available, using field-level encryption");
        return Ok(false);
    }

    conn.pragma_update(None, "key", key)?;
    conn.query_row("SELECT count(*) FROM sqlite_master", [], |row| {
        row.get::<_, i64>(0)
    })
    .map_err(|_| StoreError::InvalidKey)?;
    Ok(true)
}

const SQLITE_HEADER: &[u8; 16] = b"SQLite format 3\0";

/// Whether `path` already holds an unencrypted SQLite database. Such a store
/// was written in field-level mode and must not be keyed. Missing and empty
/// files are fresh.
pub(crate) fn is_plain_sqlite(path: &Path) -> Result<bool> {
    let mut file = match std::fs::File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e.into()),
    };
    let mut header = [0u8; 16];
    match file.read_exact(&mut header) {
        Ok(()) => Ok(&header == SQLITE_HEADER),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// A file SQLite cannot read at all is what a wrong SQLCipher key looks like.
pub(crate) fn unreadable_as_invalid_key(err: StoreError) -> StoreError {
    match err {
        StoreError::Storage(rusqlite::Error::SqliteFailure(e, _))
            if e.code == rusqlite::ErrorCode::NotADatabase =>
        {
            StoreError::InvalidKey
        }
        other => other,
    }
}

struct MetaRow {
    salt: Vec<u8>,
    key_check: Vec<u8>,
    kdf_iterations: u32,
}

fn read_meta(conn: &Connection, schema_version: i64) -> Result<Option<MetaRow>> {
    // kdf_iterations arrived with schema v2
    let sql = if schema_version >= 2 {
        "SELECT encryption_salt, key_check, kdf_iterations FROM meta WHERE id = 1"
    } else {
        "SELECT encryption_salt, key_check, 390000 FROM meta WHERE id = 1"
    };
    conn.query_row(sql, [], |row| {
        Ok(MetaRow {
            salt: row.get(0)?,
            key_check: row.get(1)?,
            kdf_iterations: row.get(2)?,
        })
    })
    .optional()
}

/// Write the meta record for a brand-new store.
pub(crate) fn initialize(
    conn: &Connection,
    mode: Mode,
    key: &str,
    kdf_iterations: u32,
) -> Result<Protection> {
    let salt = generate_salt();
    let cipher = FieldCipher::new(&derive_field_key(key, &salt, kdf_iterations)?);
    let key_check = cipher.seal_key_check()?;

    conn.execute(
        "INSERT OR REPLACE INTO meta (id, schema_version, created_at, encryption_salt, key_check, kdf_iterations)
         VALUES (1, ?1, ?2, ?3, ?4, ?5)",
        rusqlite::params![CURRENT_VERSION, now(), &salt[..], key_check, kdf_iterations],
    )?;

    Ok(Protection { mode, cipher })
}

/// Check `key` against an existing store without writing anything.
///
/// Returns `None` when the store has a schema but no meta record yet (a
/// previous first open was interrupted), in which case the caller initializes.
pub(crate) fn verify(
    conn: &Connection,
    mode: Mode,
    key: &str,
    schema_version: i64,
) -> Result<Option<Protection>> {
    let Some(meta) = read_meta(conn, schema_version)? else {
        return Ok(None);
    };

    let derived = derive_field_key(key, &meta.salt, meta.kdf_iterations)
        .map_err(|_| StoreError::InvalidKey)?;
    let cipher = FieldCipher::new(&derived);
    if !cipher.verify_key_check(&meta.key_check) {
        return Err(StoreError::InvalidKey);
    }

    Ok(Some(Protection { mode, cipher }))
}
