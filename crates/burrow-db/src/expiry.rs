//! One-shot deletion timers, one per expiring message.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use burrow_types::models::{Timestamp, now};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::MessageStore;
use crate::error::{Result, StoreError};

#[derive(Default)]
struct TimerTable {
    next_token: u64,
    pending: HashMap<String, (u64, JoinHandle<()>)>,
}

/// Timers keyed by message id. Arming an id that already has a timer
/// replaces it.
#[derive(Clone, Default)]
pub struct ExpiryTimers {
    inner: Arc<Mutex<TimerTable>>,
}

impl ExpiryTimers {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self) -> MutexGuard<'_, TimerTable> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Run `on_fire` once after `delay`. Returns `false` without scheduling
    /// anything when called outside a tokio runtime.
    pub fn arm<F>(&self, id: &str, delay: Duration, on_fire: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        let Ok(handle) = Handle::try_current() else {
            debug!(message_id = id, "no runtime, expiry left to the sweep");
            return false;
        };

        let mut table = self.table();
        table.next_token += 1;
        let token = table.next_token;

        let timers = self.clone();
        let key = id.to_string();
        let task = handle.spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let mut table = timers.table();
                // a newer timer for the same id owns the entry now
                if table.pending.get(&key).is_some_and(|(t, _)| *t == token) {
                    table.pending.remove(&key);
                } else {
                    return;
                }
            }
            on_fire();
        });

        if let Some((_, previous)) = table.pending.insert(id.to_string(), (token, task)) {
            previous.abort();
        }
        true
    }

    pub fn cancel(&self, id: &str) -> bool {
        match self.table().pending.remove(id) {
            Some((_, task)) => {
                task.abort();
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) {
        let drained: Vec<_> = self.table().pending.drain().collect();
        for (_, (_, task)) in drained {
            task.abort();
        }
    }

    pub fn is_armed(&self, id: &str) -> bool {
        self.table().pending.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.table().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl MessageStore {
    /// (Re)arm the deletion timer of `message_id` for `expires_at`.
    pub(crate) fn arm_expiry(&self, message_id: &str, expires_at: Timestamp) -> bool {
        let remaining = (expires_at - now()).max(0.0);
        let delay = Duration::try_from_secs_f64(remaining).unwrap_or(Duration::MAX);

        let weak = self.downgrade();
        let id = message_id.to_string();
        self.inner.timers.arm(message_id, delay, move || {
            let Some(store) = weak.upgrade() else {
                return;
            };
            match store.delete_message(&id) {
                Ok(true) => debug!(message_id = %id, "message expired"),
                Ok(false) | Err(StoreError::Closed) => {}
                Err(e) => warn!("Failed to delete expired message {}: {}", id, e),
            }
        })
    }

    pub(crate) fn cancel_expiry(&self, message_id: &str) -> bool {
        self.inner.timers.cancel(message_id)
    }

    /// Arm a timer for every stored message that still has an expiry.
    pub(crate) fn rearm_persisted_expiries(&self) -> Result<usize> {
        let pending: Vec<(String, Timestamp)> = self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT id, expires_at FROM messages WHERE expires_at IS NOT NULL")?;
            let rows = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;

        let armed = pending
            .iter()
            .filter(|(id, expires_at)| self.arm_expiry(id, *expires_at))
            .count();
        if armed > 0 {
            debug!("Re-armed {} expiry timers", armed);
        }
        Ok(armed)
    }

    /// Number of live expiry timers.
    pub fn pending_expiry_count(&self) -> usize {
        self.inner.timers.len()
    }

    pub fn has_pending_expiry(&self, message_id: &str) -> bool {
        self.inner.timers.is_armed(message_id)
    }
}
