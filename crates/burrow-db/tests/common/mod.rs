#![allow(dead_code)]

use burrow_db::StoreConfig;
use burrow_types::models::{MessageFields, Timestamp};
use tempfile::TempDir;

pub const KEY: &str = "correct horse battery staple";
pub const T: Timestamp = 1_700_000_000.0;

/// Store config inside `dir` with fast key derivation and no sweep loop.
pub fn config(dir: &TempDir) -> StoreConfig {
    let mut config = StoreConfig::new(KEY).with_path(dir.path().join("data").join("messages.db"));
    config.kdf_iterations = 1_000;
    config.sweep_interval = None;
    config
}

pub fn text(body: &str, created_at: Timestamp) -> MessageFields {
    MessageFields {
        body: Some(body.to_string()),
        created_at: Some(created_at),
        sender_id: Some("alice".to_string()),
        ..Default::default()
    }
}
