pub mod attachments;
pub mod cleanup;
pub mod config;
pub mod conversations;
pub mod dispatcher;
pub mod error;
pub mod expiry;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod outgoing;
pub mod protection;
pub mod reactions;
pub mod search;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, Weak};

use burrow_types::events::StoreEvent;
use rusqlite::{Connection, Transaction};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub use config::StoreConfig;
pub use dispatcher::EventBus;
pub use error::{Result, StoreError};
pub use protection::Mode;

use crate::expiry::ExpiryTimers;
use crate::protection::{Protection, SealedText};

/// Handle to one encrypted message store.
///
/// Cloning is cheap and every clone refers to the same store. The store is
/// meant to have a single logical owner; the internal lock only serializes
/// access from background timers.
#[derive(Clone)]
pub struct MessageStore {
    inner: Arc<StoreInner>,
}

pub(crate) struct StoreInner {
    conn: Mutex<Option<Connection>>,
    path: PathBuf,
    protection: Protection,
    search_index: bool,
    events: EventBus,
    timers: ExpiryTimers,
    retention_days: Mutex<Option<u32>>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for MessageStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageStore")
            .field("path", &self.inner.path)
            .finish_non_exhaustive()
    }
}

/// Non-owning reference held by background tasks.
#[derive(Clone)]
pub(crate) struct WeakStore(Weak<StoreInner>);

impl WeakStore {
    pub(crate) fn upgrade(&self) -> Option<MessageStore> {
        self.0.upgrade().map(|inner| MessageStore { inner })
    }
}

impl MessageStore {
    /// Open (or create) the store described by `config`.
    ///
    /// A wrong key fails with [`StoreError::InvalidKey`] before anything is
    /// written; a store from a newer build fails with [`StoreError::Schema`].
    pub fn open(config: StoreConfig) -> Result<Self> {
        let path = config.resolve_path()?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        // an existing cleartext file was created in field-level mode
        let plain_file = protection::is_plain_sqlite(&path)?;
        if plain_file && config.prefer_whole_store {
            debug!("{} is unencrypted SQLite, staying field-level", path.display());
        }

        let mut conn = Connection::open(&path)?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.pragma_update(None, "secure_delete", "ON")?;

        let mode = if config.prefer_whole_store
            && !plain_file
            && protection::probe_whole_store(&conn, &config.key)?
        {
            Mode::WholeStore
        } else {
            Mode::FieldLevel
        };

        let version = migrations::schema_version(&conn).map_err(protection::unreadable_as_invalid_key)?;
        migrations::check_supported(version)?;

        let verified = if version > 0 {
            protection::verify(&conn, mode, &config.key, version)?
        } else {
            None
        };

        // Nothing above writes to the file; from here on the key is trusted.
        conn.pragma_update(None, "journal_mode", "WAL")?;
        if version == 0 {
            migrations::create_schema(&mut conn)?;
        } else {
            migrations::migrate(&mut conn, version)?;
        }
        let protection = match verified {
            Some(protection) => protection,
            None => protection::initialize(&conn, mode, &config.key, config.kdf_iterations)?,
        };

        let search_index = mode == Mode::WholeStore && migrations::ensure_search_index(&mut conn)?;

        info!(
            "Message store opened at {} ({}, schema v{}, search: {})",
            path.display(),
            mode.as_str(),
            migrations::CURRENT_VERSION,
            if search_index { "index" } else { "scan" }
        );

        let store = Self {
            inner: Arc::new(StoreInner {
                conn: Mutex::new(Some(conn)),
                path,
                protection,
                search_index,
                events: EventBus::new(),
                timers: ExpiryTimers::new(),
                retention_days: Mutex::new(config.retention_days),
                sweeper: Mutex::new(None),
            }),
        };

        store.rearm_persisted_expiries()?;
        if let Some(interval) = config.sweep_interval {
            store.start_sweeper(interval);
        }

        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn mode(&self) -> Mode {
        self.inner.protection.mode()
    }

    pub fn search_index_enabled(&self) -> bool {
        self.inner.search_index
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.inner.events.subscribe()
    }

    pub fn is_closed(&self) -> bool {
        self.inner
            .conn
            .lock()
            .map(|guard| guard.is_none())
            .unwrap_or(true)
    }

    /// Stop the sweep loop, cancel every expiry timer and close the
    /// connection. Later calls on any clone fail with [`StoreError::Closed`].
    pub fn close(&self) {
        self.inner.stop_background();

        let conn = match self.inner.conn.lock() {
            Ok(mut guard) => guard.take(),
            Err(e) => e.into_inner().take(),
        };
        if let Some(conn) = conn {
            if let Err((_, e)) = conn.close() {
                warn!("Error closing message store: {}", e);
            }
            info!("Message store at {} closed", self.inner.path.display());
        }
    }

    pub(crate) fn downgrade(&self) -> WeakStore {
        WeakStore(Arc::downgrade(&self.inner))
    }

    pub(crate) fn protection(&self) -> &Protection {
        &self.inner.protection
    }

    pub(crate) fn seal_text(&self, value: Option<&str>) -> Result<SealedText> {
        self.inner.protection.seal_text(value)
    }

    pub(crate) fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let guard = self.inner.conn.lock().map_err(|_| StoreError::LockPoisoned)?;
        let conn = guard.as_ref().ok_or(StoreError::Closed)?;
        f(conn)
    }

    /// Run `f` in its own transaction, committed before returning.
    pub(crate) fn with_tx<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T>,
    {
        let mut guard = self.inner.conn.lock().map_err(|_| StoreError::LockPoisoned)?;
        let conn = guard.as_mut().ok_or(StoreError::Closed)?;
        let tx = conn.transaction()?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }
}

impl StoreInner {
    fn stop_background(&self) {
        let sweeper = match self.sweeper.lock() {
            Ok(mut guard) => guard.take(),
            Err(e) => e.into_inner().take(),
        };
        if let Some(handle) = sweeper {
            handle.abort();
        }
        self.timers.cancel_all();
    }
}

impl Drop for StoreInner {
    fn drop(&mut self) {
        self.stop_background();
    }
}
