use std::time::Duration;

use burrow_types::models::{Timestamp, now};
use rusqlite::Connection;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use crate::error::{Result, StoreError};
use crate::{MessageStore, WeakStore};

const SECONDS_PER_DAY: f64 = 86_400.0;

/// Outcome of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub expired: usize,
    pub retention: usize,
}

impl SweepReport {
    pub fn total(&self) -> usize {
        self.expired + self.retention
    }
}

/// Ids of messages whose `expires_at` is at or before `now`.
pub fn expired_ids(conn: &Connection, now: Timestamp) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT id FROM messages
         WHERE expires_at IS NOT NULL AND expires_at <= ?1
         ORDER BY expires_at ASC",
    )?;
    let ids = stmt
        .query_map([now], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(ids)
}

pub fn retention_cutoff(now: Timestamp, days: u32) -> Timestamp {
    now - f64::from(days) * SECONDS_PER_DAY
}

/// Ids of messages created strictly before `cutoff`.
pub fn retention_ids(conn: &Connection, cutoff: Timestamp) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT id FROM messages WHERE created_at < ?1 ORDER BY created_at ASC")?;
    let ids = stmt
        .query_map([cutoff], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(ids)
}

impl MessageStore {
    // -- Sweeps --

    /// Delete every message that has expired as of `now`.
    pub fn cleanup_expired(&self, now: Timestamp) -> Result<usize> {
        let ids = self.with_conn(|conn| expired_ids(conn, now))?;
        self.delete_all(&ids)
    }

    /// Delete messages older than the retention window. Does nothing when no
    /// retention is configured.
    pub fn cleanup_retention(&self, now: Timestamp) -> Result<usize> {
        let Some(days) = self.retention_days() else {
            return Ok(0);
        };
        let cutoff = retention_cutoff(now, days);
        let ids = self.with_conn(|conn| retention_ids(conn, cutoff))?;
        self.delete_all(&ids)
    }

    pub fn run_sweep(&self, now: Timestamp) -> Result<SweepReport> {
        Ok(SweepReport {
            expired: self.cleanup_expired(now)?,
            retention: self.cleanup_retention(now)?,
        })
    }

    pub fn retention_days(&self) -> Option<u32> {
        *self
            .inner
            .retention_days
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_retention_days(&self, days: Option<u32>) {
        *self
            .inner
            .retention_days
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = days;
    }

    fn delete_all(&self, ids: &[String]) -> Result<usize> {
        let mut deleted = 0;
        for id in ids {
            if self.delete_message(id)? {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    /// Start the periodic sweep on the current tokio runtime, replacing a
    /// running one. Returns `false` outside a runtime or for a zero interval.
    pub fn start_sweeper(&self, interval: Duration) -> bool {
        if interval.is_zero() {
            warn!("zero sweep interval, sweep loop not started");
            return false;
        }
        let Ok(handle) = Handle::try_current() else {
            debug!("no runtime, sweep loop not started");
            return false;
        };

        let task = handle.spawn(run_sweep_loop(self.downgrade(), interval));
        let mut sweeper = self
            .inner
            .sweeper
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = sweeper.replace(task) {
            previous.abort();
        }
        true
    }
}

/// Background task that deletes expired and out-of-retention messages.
///
/// Holds only a weak handle; exits once the store is closed or dropped.
async fn run_sweep_loop(store: WeakStore, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        let Some(store) = store.upgrade() else {
            break;
        };
        match store.run_sweep(now()) {
            Ok(report) => {
                if report.total() > 0 {
                    info!(
                        "Sweep: deleted {} expired and {} out-of-retention messages",
                        report.expired, report.retention
                    );
                }
            }
            Err(StoreError::Closed) => break,
            Err(e) => {
                warn!("Sweep error: {}", e);
            }
        }
    }
}
