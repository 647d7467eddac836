//! Runtime state: version fingerprint and group finished flags.

use crate::error::DatabaseError;
use crate::preferences::PreferenceStore;
use crate::{Error, Result};
use async_trait::async_trait;

use super::Database;

impl Database {
    /// Read one runtime state value
    pub async fn get_state(&self, key: &str) -> Result<Option<String>> {
        sqlx::query_scalar(
            r#"
            SELECT value FROM runtime_state WHERE key = ?
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to read state {}: {}",
                key, e
            )))
        })
    }

    /// Insert or replace one runtime state value
    pub async fn set_state(&self, key: &str, value: &str) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            r#"
            INSERT INTO runtime_state (key, value, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to write state {}: {}",
                key, e
            )))
        })?;

        Ok(())
    }

    /// Delete every runtime state value whose key starts with `prefix`
    pub async fn remove_state_prefix(&self, prefix: &str) -> Result<u64> {
        // substr avoids LIKE treating '_' and '%' in group names as wildcards
        let result = sqlx::query(
            r#"
            DELETE FROM runtime_state WHERE substr(key, 1, length(?1)) = ?1
            "#,
        )
        .bind(prefix)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to remove state with prefix {}: {}",
                prefix, e
            )))
        })?;

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl PreferenceStore for Database {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.get_state(key).await
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.set_state(key, value).await
    }

    async fn remove_prefix(&self, prefix: &str) -> Result<u64> {
        self.remove_state_prefix(prefix).await
    }
}
