use thiserror::Error;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Deliberately carries no detail: a canary mismatch, a failed tag check
    /// and an unreadable encrypted file all look the same to the caller.
    #[error("Invalid encryption key")]
    InvalidKey,

    #[error("Unsupported schema version {found} (this build supports up to {supported})")]
    Schema { found: i64, supported: i64 },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Database error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Crypto error: {0}")]
    Crypto(#[from] burrow_crypto::CryptoError),

    #[error("Store is closed")]
    Closed,

    #[error("Database lock poisoned")]
    LockPoisoned,
}

/// Extension trait for optional query results
pub(crate) trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
