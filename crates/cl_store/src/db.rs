//! Database abstraction over SQLite via sqlx.

use std::path::Path;

use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool};

use crate::error::StoreError;

/// Central store handle. Cheap to clone (pool is Arc internally).
#[derive(Clone)]
pub struct Store {
    pub pool: SqlitePool,
}

impl Store {
    /// Open (or create) the SQLite database at `db_path`.
    /// Runs all pending migrations automatically.
    ///
    /// WAL journal mode is configured at connection time, not inside a
    /// migration — SQLite forbids changing `journal_mode` inside a
    /// transaction and sqlx wraps every migration in one.
    pub async fn open(db_path: &Path) -> Result<Self, StoreError> {
        let opts = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePool::connect_with(opts).await?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| StoreError::Migration(e.to_string()))?;

        Ok(Self { pool })
    }

    // ── Identity rows ────────────────────────────────────────────────────────

    pub async fn load_identity(
        &self,
        user_id: &str,
    ) -> Result<Option<(String, String)>, StoreError> {
        let row: Option<(String, String)> = sqlx::query_as(
            "SELECT public_key, secret_key FROM identities WHERE user_id = ? LIMIT 1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn save_identity(
        &self,
        user_id: &str,
        public_key_b64: &str,
        secret_key_b64: &str,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT OR REPLACE INTO identities (user_id, public_key, secret_key, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(user_id)
        .bind(public_key_b64)
        .bind(secret_key_b64)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Delete-account flow: invalidates local secret-key storage.
    pub async fn delete_identity(&self, user_id: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM identities WHERE user_id = ?")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ── Snapshot rows ────────────────────────────────────────────────────────

    pub async fn load_snapshot(&self, conversation_id: &str) -> Result<Option<String>, StoreError> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT payload FROM snapshots WHERE conversation_id = ? LIMIT 1")
                .bind(conversation_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(payload,)| payload))
    }

    pub async fn save_snapshot(
        &self,
        conversation_id: &str,
        payload_json: &str,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT OR REPLACE INTO snapshots (conversation_id, payload, updated_at) VALUES (?, ?, ?)",
        )
        .bind(conversation_id)
        .bind(payload_json)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
