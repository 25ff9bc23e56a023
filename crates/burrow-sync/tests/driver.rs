use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use burrow_db::{MessageStore, StoreConfig};
use burrow_sync::{
    DeliveryError, FlushReport, IncomingPacket, OutgoingMessage, SyncConfig, SyncDriver, Transport,
};
use burrow_types::events::StoreEvent;
use burrow_types::models::{Message, MessageStatus};
use tempfile::TempDir;

const T: f64 = 1_700_000_000.0;

fn store(dir: &TempDir) -> MessageStore {
    let mut config = StoreConfig::new("sync test key").with_path(dir.path().join("messages.db"));
    config.kdf_iterations = 1_000;
    config.sweep_interval = None;
    MessageStore::open(config).unwrap()
}

fn outgoing(body: &str, created_at: f64) -> OutgoingMessage {
    OutgoingMessage {
        sender_id: Some("me".into()),
        body: Some(body.into()),
        created_at: Some(created_at),
        ..Default::default()
    }
}

/// Fails every delivery.
struct Unreachable;

impl Transport for Unreachable {
    fn deliver(&self, message: &Message) -> Result<(), DeliveryError> {
        Err(DeliveryError::Unreachable(message.conversation_id.clone()))
    }
}

/// Records deliveries without confirming them.
#[derive(Clone, Default)]
struct Recording {
    delivered: Arc<Mutex<Vec<String>>>,
}

impl Transport for Recording {
    fn deliver(&self, message: &Message) -> Result<(), DeliveryError> {
        self.delivered.lock().unwrap().push(message.id.clone());
        Ok(())
    }
}

#[tokio::test]
async fn scenario_c_offline_queue_is_sent_then_delivered_on_reconnect() {
    let dir = tempfile::tempdir().unwrap();
    let store = store(&dir);
    let mut rx = store.subscribe();
    let driver = SyncDriver::new(store.clone(), SyncConfig::default());

    let queued = driver.queue_outgoing_message("c1", "m1", outgoing("hi", T)).unwrap();
    assert_eq!(queued.status, MessageStatus::Queued);
    assert!(queued.is_outgoing);

    driver.set_online(true);
    assert_eq!(store.get_message("m1").unwrap().unwrap().status, MessageStatus::Sent);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(store.get_message("m1").unwrap().unwrap().status, MessageStatus::Delivered);

    let mut receipts = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let StoreEvent::ReceiptUpdated { status, .. } = event {
            receipts.push(status);
        }
    }
    assert_eq!(receipts, [MessageStatus::Sent, MessageStatus::Delivered]);
}

#[tokio::test]
async fn queueing_while_online_sends_immediately() {
    let dir = tempfile::tempdir().unwrap();
    let store = store(&dir);
    let driver = SyncDriver::new(store, SyncConfig::default());
    driver.set_online(true);

    let message = driver.queue_outgoing_message("c1", "m1", outgoing("now", T)).unwrap();
    assert_eq!(message.status, MessageStatus::Sent);
}

#[test]
fn confirmation_runs_inline_without_a_runtime() {
    let dir = tempfile::tempdir().unwrap();
    let store = store(&dir);
    let driver = SyncDriver::new(store.clone(), SyncConfig::default());

    driver.queue_outgoing_message("c1", "m1", outgoing("x", T)).unwrap();
    driver.set_online(true);

    assert_eq!(store.get_message("m1").unwrap().unwrap().status, MessageStatus::Delivered);
}

#[test]
fn failed_delivery_is_scheduled_for_retry() {
    let dir = tempfile::tempdir().unwrap();
    let store = store(&dir);
    let config = SyncConfig {
        retry_delay: Duration::from_secs(300),
        ..Default::default()
    };
    let driver = SyncDriver::with_transport(store.clone(), config, Unreachable);

    driver.queue_outgoing_message("c1", "m1", outgoing("x", T)).unwrap();
    let report = driver.flush_outgoing_queue().unwrap();
    assert_eq!(
        report,
        FlushReport {
            attempted: 1,
            sent: 0,
            failed: 1,
            already_running: false,
        }
    );

    let message = store.get_message("m1").unwrap().unwrap();
    assert_eq!(message.status, MessageStatus::Failed);
    assert_eq!(message.retry_count, 1);
    assert!(message.next_retry_at.is_some());

    // held back until the delay passes
    assert_eq!(driver.flush_outgoing_queue().unwrap().attempted, 0);
}

#[test]
fn flush_sends_oldest_first_and_respects_batch_size() {
    let dir = tempfile::tempdir().unwrap();
    let store = store(&dir);
    let transport = Recording::default();
    let config = SyncConfig {
        flush_batch: 2,
        ..Default::default()
    };
    let driver = SyncDriver::with_transport(store.clone(), config, transport.clone());

    for (id, at) in [("m3", T + 3.0), ("m1", T + 1.0), ("m2", T + 2.0)] {
        driver.queue_outgoing_message("c1", id, outgoing(id, at)).unwrap();
    }

    assert_eq!(driver.flush_outgoing_queue().unwrap().sent, 2);
    assert_eq!(*transport.delivered.lock().unwrap(), ["m1", "m2"]);

    assert_eq!(driver.flush_outgoing_queue().unwrap().sent, 1);
    assert_eq!(*transport.delivered.lock().unwrap(), ["m1", "m2", "m3"]);

    // this transport does not confirm, so the message stays sent
    assert_eq!(store.get_message("m1").unwrap().unwrap().status, MessageStatus::Sent);
}

/// Tries to flush again from inside a delivery.
struct Reentrant {
    driver: Arc<OnceLock<SyncDriver>>,
    nested: Arc<Mutex<Vec<FlushReport>>>,
}

impl Transport for Reentrant {
    fn deliver(&self, _message: &Message) -> Result<(), DeliveryError> {
        if let Some(driver) = self.driver.get() {
            let report = driver.flush_outgoing_queue().unwrap();
            self.nested.lock().unwrap().push(report);
        }
        Ok(())
    }
}

#[test]
fn flush_is_not_reentrant() {
    let dir = tempfile::tempdir().unwrap();
    let store = store(&dir);
    let slot = Arc::new(OnceLock::new());
    let nested = Arc::new(Mutex::new(Vec::new()));
    let driver = SyncDriver::with_transport(
        store,
        SyncConfig::default(),
        Reentrant {
            driver: slot.clone(),
            nested: nested.clone(),
        },
    );
    let _ = slot.set(driver.clone());

    driver.queue_outgoing_message("c1", "m1", outgoing("x", T)).unwrap();
    let report = driver.flush_outgoing_queue().unwrap();
    assert_eq!(report.sent, 1);

    let nested = nested.lock().unwrap();
    assert_eq!(nested.len(), 1);
    assert!(nested[0].already_running);

    // the guard was released
    assert!(!driver.flush_outgoing_queue().unwrap().already_running);
}

#[test]
fn incoming_packets_are_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let store = store(&dir);
    let driver = SyncDriver::new(store.clone(), SyncConfig::default());

    let packet = IncomingPacket::from_json(
        r#"{"message_id":"m1","conversation_id":"c1","sender_id":"bob","body":"hey","created_at":1700000000.0}"#,
    )
    .unwrap();
    let first = driver.apply_incoming_packet(&packet).unwrap().unwrap();
    assert_eq!(first.status, MessageStatus::Delivered);
    assert!(!first.is_outgoing);
    assert_eq!(first.body.as_deref(), Some("hey"));

    let changed = IncomingPacket {
        body: Some("tampered".into()),
        ..packet.clone()
    };
    let second = driver.apply_incoming_packet(&changed).unwrap().unwrap();
    assert_eq!(second, first);

    let no_ids = IncomingPacket {
        message_id: None,
        ..packet
    };
    assert!(driver.apply_incoming_packet(&no_ids).unwrap().is_none());
}

#[test]
fn receipts_and_typing_reach_subscribers() {
    let dir = tempfile::tempdir().unwrap();
    let store = store(&dir);
    let driver = SyncDriver::new(store.clone(), SyncConfig::default());
    store
        .upsert_message("c1", "m1", Default::default())
        .unwrap();
    let mut rx = store.subscribe();

    let read = driver.apply_receipt("c1", "m1", MessageStatus::Read).unwrap().unwrap();
    assert_eq!(read.status, MessageStatus::Read);
    assert!(driver.apply_receipt("c1", "missing", MessageStatus::Read).unwrap().is_none());

    driver.set_typing_state("c1", "bob", true);

    let mut typing = None;
    while let Ok(event) = rx.try_recv() {
        if let StoreEvent::TypingStateChanged { peer_id, is_typing, .. } = event {
            typing = Some((peer_id, is_typing));
        }
    }
    assert_eq!(typing, Some(("bob".to_string(), true)));
}

#[tokio::test]
async fn tick_flushes_while_online() {
    let dir = tempfile::tempdir().unwrap();
    let store = store(&dir);
    let transport = Recording::default();
    let config = SyncConfig {
        tick_interval: Duration::from_millis(20),
        ..Default::default()
    };
    let driver = SyncDriver::with_transport(store.clone(), config, transport.clone());
    driver.set_online(true);
    assert!(driver.start());
    assert!(driver.is_running());

    // queued straight into the store, so only the tick can pick it up
    store
        .upsert_message(
            "c1",
            "m1",
            burrow_types::models::MessageFields {
                status: MessageStatus::Queued,
                is_outgoing: true,
                ..Default::default()
            },
        )
        .unwrap();

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(*transport.delivered.lock().unwrap(), ["m1"]);

    driver.stop();
    assert!(!driver.is_running());
}

#[tokio::test]
async fn zero_tick_interval_is_not_started() {
    let dir = tempfile::tempdir().unwrap();
    let config = SyncConfig {
        tick_interval: Duration::ZERO,
        ..Default::default()
    };
    let driver = SyncDriver::new(store(&dir), config);
    assert!(!driver.start());
    assert!(!driver.is_running());
}

#[tokio::test]
async fn connectivity_feed_drives_the_driver() {
    let dir = tempfile::tempdir().unwrap();
    let store = store(&dir);
    let driver = SyncDriver::new(store.clone(), SyncConfig::default());
    driver.queue_outgoing_message("c1", "m1", outgoing("x", T)).unwrap();

    let (tx, rx) = tokio::sync::watch::channel(false);
    let task = driver.watch_connectivity(rx).unwrap();

    tx.send(true).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(driver.is_online());
    assert_eq!(store.get_message("m1").unwrap().unwrap().status, MessageStatus::Delivered);

    tx.send(false).unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!driver.is_online());

    drop(tx);
    task.await.unwrap();
}

#[test]
fn flush_counts_attempts() {
    let dir = tempfile::tempdir().unwrap();
    let store = store(&dir);
    let counter = Arc::new(AtomicUsize::new(0));

    struct Counting(Arc<AtomicUsize>);
    impl Transport for Counting {
        fn deliver(&self, _message: &Message) -> Result<(), DeliveryError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    let driver = SyncDriver::with_transport(store, SyncConfig::default(), Counting(counter.clone()));
    assert_eq!(driver.flush_outgoing_queue().unwrap(), FlushReport::default());

    driver.queue_outgoing_message("c1", "m1", outgoing("x", T)).unwrap();
    driver.flush_outgoing_queue().unwrap();
    driver.flush_outgoing_queue().unwrap();
    assert_eq!(counter.load(Ordering::SeqCst), 1);
}
