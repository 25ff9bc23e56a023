mod common;

use std::time::Duration;

use burrow_db::MessageStore;
use burrow_types::events::StoreEvent;
use burrow_types::models::{MessageFields, now};
use common::{config, text};

fn expiring(body: &str, created_at: f64, ttl: i64) -> MessageFields {
    MessageFields {
        ttl_seconds: Some(ttl),
        ..text(body, created_at)
    }
}

#[tokio::test]
async fn timer_deletes_message_when_due() {
    let dir = tempfile::tempdir().unwrap();
    let store = MessageStore::open(config(&dir)).unwrap();
    let mut rx = store.subscribe();

    store.upsert_message("c1", "m1", expiring("brief", now(), 0)).unwrap();
    assert!(store.has_pending_expiry("m1"));

    tokio::time::sleep(Duration::from_millis(200)).await;

    assert!(store.get_message("m1").unwrap().is_none());
    assert!(!store.has_pending_expiry("m1"));

    let mut deleted = false;
    while let Ok(event) = rx.try_recv() {
        if let StoreEvent::MessageDeleted { message_id, .. } = event {
            assert_eq!(message_id, "m1");
            deleted = true;
        }
    }
    assert!(deleted);
}

#[tokio::test]
async fn explicit_delete_cancels_the_timer() {
    let dir = tempfile::tempdir().unwrap();
    let store = MessageStore::open(config(&dir)).unwrap();

    store.upsert_message("c1", "m1", expiring("later", now(), 3600)).unwrap();
    assert_eq!(store.pending_expiry_count(), 1);

    assert!(store.delete_message("m1").unwrap());
    assert_eq!(store.pending_expiry_count(), 0);
}

#[tokio::test]
async fn reupsert_replaces_the_timer() {
    let dir = tempfile::tempdir().unwrap();
    let store = MessageStore::open(config(&dir)).unwrap();

    let at = now();
    store.upsert_message("c1", "m1", expiring("x", at, 3600)).unwrap();
    store.upsert_message("c1", "m1", expiring("x", at, 7200)).unwrap();
    assert_eq!(store.pending_expiry_count(), 1);
}

#[tokio::test]
async fn timers_are_rearmed_on_reopen() {
    let dir = tempfile::tempdir().unwrap();

    // first session runs on a thread with no runtime, so nothing is armed
    let cfg = config(&dir);
    std::thread::spawn(move || {
        let store = MessageStore::open(cfg).unwrap();
        store
            .upsert_message("c1", "overdue", expiring("old", now() - 100.0, 10))
            .unwrap();
        store
            .upsert_message("c1", "pending", expiring("new", now(), 3600))
            .unwrap();
        assert_eq!(store.pending_expiry_count(), 0);
        store.close();
    })
    .join()
    .unwrap();

    let store = MessageStore::open(config(&dir)).unwrap();
    assert!(store.has_pending_expiry("pending"));

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(store.get_message("overdue").unwrap().is_none());
    assert!(store.get_message("pending").unwrap().is_some());
}

#[tokio::test]
async fn close_cancels_every_timer() {
    let dir = tempfile::tempdir().unwrap();
    let store = MessageStore::open(config(&dir)).unwrap();
    for i in 0..3 {
        store
            .upsert_message("c1", &format!("m{}", i), expiring("x", now(), 3600))
            .unwrap();
    }
    assert_eq!(store.pending_expiry_count(), 3);

    store.close();
    assert_eq!(store.pending_expiry_count(), 0);
}

#[tokio::test]
async fn sweep_loop_applies_retention() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = config(&dir);
    cfg.retention_days = Some(1);
    cfg.sweep_interval = Some(Duration::from_millis(20));
    let store = MessageStore::open(cfg).unwrap();

    // no TTL, so only the sweep can remove it
    store
        .upsert_message("c1", "old", text("old", now() - 2.0 * 86_400.0))
        .unwrap();
    store.upsert_message("c1", "fresh", text("fresh", now())).unwrap();
    assert_eq!(store.pending_expiry_count(), 0);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(store.get_message("old").unwrap().is_none());
    assert!(store.get_message("fresh").unwrap().is_some());
    store.close();
}

#[tokio::test]
async fn zero_sweep_interval_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = config(&dir);
    cfg.sweep_interval = Some(Duration::ZERO);
    assert!(matches!(
        MessageStore::open(cfg),
        Err(burrow_db::StoreError::Configuration(_))
    ));

    let store = MessageStore::open(config(&dir)).unwrap();
    assert!(!store.start_sweeper(Duration::ZERO));
    assert!(store.start_sweeper(Duration::from_millis(20)));
    store.close();
}
