use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use burrow_db::{MessageStore, Result, StoreError};
use burrow_types::events::StoreEvent;
use burrow_types::models::{Message, MessageFields, MessageStatus, Timestamp, now};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::packet::IncomingPacket;
use crate::transport::{LoopbackTransport, Transport};

#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Most messages attempted per flush.
    pub flush_batch: u32,
    /// How often the queue is flushed while online.
    pub tick_interval: Duration,
    /// Hold-off before a failed delivery is retried.
    pub retry_delay: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            flush_batch: 100,
            tick_interval: Duration::from_secs(1),
            retry_delay: Duration::from_secs(5),
        }
    }
}

/// A message composed locally, before it is queued.
#[derive(Debug, Clone, Default)]
pub struct OutgoingMessage {
    pub sender_id: Option<String>,
    pub body: Option<String>,
    pub created_at: Option<Timestamp>,
    pub ttl_seconds: Option<i64>,
    pub message_type: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub attempted: usize,
    pub sent: usize,
    pub failed: usize,
    /// Another flush was already running, so this one did nothing.
    pub already_running: bool,
}

/// Moves queued messages out through a [`Transport`] and folds incoming
/// packets and receipts into the store.
#[derive(Clone)]
pub struct SyncDriver {
    inner: Arc<SyncInner>,
}

struct SyncInner {
    store: MessageStore,
    transport: Box<dyn Transport>,
    config: SyncConfig,
    online: AtomicBool,
    sending: AtomicBool,
    tick: Mutex<Option<JoinHandle<()>>>,
}

/// Clears the sending flag when a flush ends, however it ends.
struct SendingGuard<'a>(&'a AtomicBool);

impl<'a> SendingGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for SendingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl SyncDriver {
    /// Driver over the loopback transport, starting offline.
    pub fn new(store: MessageStore, config: SyncConfig) -> Self {
        Self::with_transport(store, config, LoopbackTransport)
    }

    pub fn with_transport(
        store: MessageStore,
        config: SyncConfig,
        transport: impl Transport + 'static,
    ) -> Self {
        Self {
            inner: Arc::new(SyncInner {
                store,
                transport: Box::new(transport),
                config,
                online: AtomicBool::new(false),
                sending: AtomicBool::new(false),
                tick: Mutex::new(None),
            }),
        }
    }

    pub fn store(&self) -> &MessageStore {
        &self.inner.store
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    // -- Lifecycle --

    /// Start the periodic flush on the current tokio runtime. Returns `false`
    /// outside a runtime or for a zero tick interval. Calling it again while
    /// running does nothing.
    pub fn start(&self) -> bool {
        if self.inner.config.tick_interval.is_zero() {
            warn!("zero tick interval, sync tick not started");
            return false;
        }
        let Ok(handle) = Handle::try_current() else {
            debug!("no runtime, sync tick not started");
            return false;
        };

        let mut tick = self.inner.tick.lock().unwrap_or_else(|e| e.into_inner());
        if tick.as_ref().is_some_and(|task| !task.is_finished()) {
            return true;
        }
        *tick = Some(handle.spawn(run_tick_loop(
            Arc::downgrade(&self.inner),
            self.inner.config.tick_interval,
        )));
        true
    }

    pub fn stop(&self) {
        let task = self.inner.tick.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(task) = task {
            task.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner
            .tick
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    // -- Connectivity --

    pub fn is_online(&self) -> bool {
        self.inner.online.load(Ordering::Acquire)
    }

    /// Record connectivity. Coming online flushes the queue right away.
    pub fn set_online(&self, online: bool) {
        let was_online = self.inner.online.swap(online, Ordering::AcqRel);
        if online && !was_online {
            info!("Sync: online, flushing outgoing queue");
            if let Err(e) = self.flush_outgoing_queue() {
                warn!("Sync: flush after reconnect failed: {}", e);
            }
        } else if !online && was_online {
            info!("Sync: offline");
        }
    }

    /// Follow a connectivity feed until its sender is dropped. Returns `None`
    /// outside a tokio runtime.
    pub fn watch_connectivity(&self, mut feed: watch::Receiver<bool>) -> Option<JoinHandle<()>> {
        let handle = Handle::try_current().ok()?;
        let driver = Arc::downgrade(&self.inner);

        Some(handle.spawn(async move {
            let mut online = *feed.borrow_and_update();
            loop {
                match driver.upgrade() {
                    Some(inner) => SyncDriver { inner }.set_online(online),
                    None => break,
                }
                if feed.changed().await.is_err() {
                    break;
                }
                online = *feed.borrow_and_update();
            }
        }))
    }

    // -- Outgoing --

    /// Persist a locally composed message as queued, and send it straight
    /// away when online. Returns the latest snapshot.
    pub fn queue_outgoing_message(
        &self,
        conversation_id: &str,
        message_id: &str,
        message: OutgoingMessage,
    ) -> Result<Message> {
        let fields = MessageFields {
            sender_id: message.sender_id,
            body: message.body,
            message_type: Some(message.message_type.unwrap_or_else(|| "text".to_string())),
            created_at: message.created_at,
            status: MessageStatus::Queued,
            is_outgoing: true,
            is_forwarded: false,
            is_pinned: false,
            ttl_seconds: message.ttl_seconds,
        };
        let queued = self.store().upsert_message(conversation_id, message_id, fields)?;

        if !self.is_online() {
            return Ok(queued);
        }
        self.flush_outgoing_queue()?;
        Ok(self.store().get_message(message_id)?.unwrap_or(queued))
    }

    /// Attempt delivery of every due message, oldest first, up to the batch
    /// size. Only one flush runs at a time; a concurrent call returns at once
    /// with `already_running` set.
    pub fn flush_outgoing_queue(&self) -> Result<FlushReport> {
        let Some(_guard) = SendingGuard::acquire(&self.inner.sending) else {
            return Ok(FlushReport {
                already_running: true,
                ..Default::default()
            });
        };

        let store = self.store();
        let mut report = FlushReport::default();
        for message in store.get_outgoing_queue(self.inner.config.flush_batch)? {
            report.attempted += 1;
            match self.inner.transport.deliver(&message) {
                Ok(()) => {
                    store.update_message_status(&message.id, MessageStatus::Sent)?;
                    if self.inner.transport.confirms_delivery() {
                        confirm_later(store.clone(), message.id.clone());
                    }
                    report.sent += 1;
                }
                Err(e) => {
                    debug!(message_id = %message.id, "delivery failed: {}", e);
                    store.mark_retry(&message.id, self.inner.config.retry_delay)?;
                    report.failed += 1;
                }
            }
        }

        if report.attempted > 0 {
            debug!(
                "Sync: flushed {} messages ({} sent, {} failed)",
                report.attempted, report.sent, report.failed
            );
        }
        Ok(report)
    }

    // -- Incoming --

    /// Store a message received from a peer. Packets missing either id are
    /// ignored; a message already stored is returned unchanged.
    pub fn apply_incoming_packet(&self, packet: &IncomingPacket) -> Result<Option<Message>> {
        let Some((conversation_id, message_id)) = packet.ids() else {
            debug!("Sync: dropping packet without ids");
            return Ok(None);
        };

        if let Some(existing) = self.store().get_message(message_id)? {
            return Ok(Some(existing));
        }

        let message = self
            .store()
            .upsert_message(conversation_id, message_id, packet.to_fields(now()))?;
        Ok(Some(message))
    }

    pub fn apply_receipt(
        &self,
        conversation_id: &str,
        message_id: &str,
        status: MessageStatus,
    ) -> Result<Option<Message>> {
        debug!(conversation_id, message_id, %status, "receipt");
        self.store().update_message_status(message_id, status)
    }

    pub fn set_typing_state(&self, conversation_id: &str, peer_id: &str, is_typing: bool) {
        self.store().events().emit(StoreEvent::TypingStateChanged {
            conversation_id: conversation_id.to_string(),
            peer_id: peer_id.to_string(),
            is_typing,
        });
    }
}

impl Drop for SyncInner {
    fn drop(&mut self) {
        let task = match self.tick.get_mut() {
            Ok(tick) => tick.take(),
            Err(e) => e.into_inner().take(),
        };
        if let Some(task) = task {
            task.abort();
        }
    }
}

/// Promote a just-sent message to delivered, unless something else changed
/// its status first. Runs as a separate task when a runtime is available.
fn confirm_later(store: MessageStore, message_id: String) {
    match Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move {
                tokio::task::yield_now().await;
                log_confirm_error(&message_id, confirm_delivered(&store, &message_id));
            });
        }
        Err(_) => log_confirm_error(&message_id, confirm_delivered(&store, &message_id)),
    }
}

fn confirm_delivered(store: &MessageStore, message_id: &str) -> Result<()> {
    let still_sent = store
        .get_message(message_id)?
        .is_some_and(|message| message.status == MessageStatus::Sent);
    if still_sent {
        store.update_message_status(message_id, MessageStatus::Delivered)?;
    }
    Ok(())
}

fn log_confirm_error(message_id: &str, result: Result<()>) {
    match result {
        Ok(()) | Err(StoreError::Closed) => {}
        Err(e) => warn!("Sync: could not confirm {}: {}", message_id, e),
    }
}

async fn run_tick_loop(weak: Weak<SyncInner>, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        let Some(inner) = weak.upgrade() else {
            break;
        };
        let driver = SyncDriver { inner };
        if !driver.is_online() {
            continue;
        }
        match driver.flush_outgoing_queue() {
            Ok(_) => {}
            Err(StoreError::Closed) => break,
            Err(e) => warn!("Sync tick error: {}", e),
        }
    }
}
