//! Small persisted key/value store for version and group state
//!
//! Only two kinds of keys are written: [`VERSION_FINGERPRINT_KEY`] and one
//! [`group_finished_key`] per group. Values are opaque strings.

use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Key holding the fingerprint of the package version last initialized
pub const VERSION_FINGERPRINT_KEY: &str = "version_fingerprint";

/// Prefix shared by every group-finished flag
pub const GROUP_FINISHED_PREFIX: &str = "group_finished.";

/// Key of the finished flag for `group`
pub fn group_finished_key(group: &str) -> String {
    format!("{GROUP_FINISHED_PREFIX}{group}")
}

/// Persisted string key/value storage
///
/// Implemented by [`Database`](crate::db::Database) for SQLite persistence and
/// by [`MemoryPreferences`] for tests or hosts that persist elsewhere.
#[async_trait]
pub trait PreferenceStore: Send + Sync {
    /// Value stored under `key`, if any
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store `value` under `key`, replacing any previous value
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Delete every key starting with `prefix`; returns how many were removed
    async fn remove_prefix(&self, prefix: &str) -> Result<u64>;
}

/// In-memory [`PreferenceStore`]; nothing survives the process
#[derive(Debug, Default)]
pub struct MemoryPreferences {
    values: RwLock<HashMap<String, String>>,
}

impl MemoryPreferences {
    /// An empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PreferenceStore for MemoryPreferences {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.values
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove_prefix(&self, prefix: &str) -> Result<u64> {
        let mut values = self.values.write().await;
        let before = values.len();
        values.retain(|key, _| !key.starts_with(prefix));
        Ok((before - values.len()) as u64)
    }
}
