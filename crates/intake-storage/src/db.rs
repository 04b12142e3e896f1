//! SQLite-backed primary store.
//!
//! Wraps a single rusqlite Connection in a Mutex and runs every statement on
//! the blocking pool so the async reply path is never stalled by disk I/O.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension};
use tracing::info;

use intake_core::error::{IntakeError, Result};
use intake_core::types::Timestamp;

use crate::migrations;
use crate::primary::PrimaryStore;

/// Durable primary store on a WAL-mode SQLite database.
#[derive(Clone)]
pub struct SqlitePrimary {
    conn: Arc<Mutex<Connection>>,
}

impl SqlitePrimary {
    /// Open (or create) a database at `path` and apply migrations.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)
            .map_err(|e| IntakeError::Storage(format!("Failed to open database: {}", e)))?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )
        .map_err(|e| IntakeError::Storage(format!("Failed to set pragmas: {}", e)))?;
        migrations::run_migrations(&conn)?;

        info!("Session database opened at {}", path.display());
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| IntakeError::Storage(format!("Failed to open in-memory db: {}", e)))?;
        migrations::run_migrations(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|e| IntakeError::Storage(format!("Database lock poisoned: {}", e)))?;
            f(&conn)
        })
        .await
        .map_err(|e| IntakeError::Storage(format!("Database task failed: {}", e)))?
    }
}

impl std::fmt::Debug for SqlitePrimary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlitePrimary").finish()
    }
}

#[async_trait]
impl PrimaryStore for SqlitePrimary {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            let now = Timestamp::now().0;
            conn.query_row(
                "SELECT payload FROM session_records WHERE key = ?1 AND expires_at > ?2",
                rusqlite::params![key, now],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .map_err(|e| IntakeError::Storage(format!("Session read failed: {}", e)))
        })
        .await
    }

    async fn set(&self, key: &str, payload: &str, ttl: Duration) -> Result<()> {
        let key = key.to_string();
        let payload = payload.to_string();
        self.with_conn(move |conn| {
            let now = Timestamp::now().0;
            let expires_at = now + ttl.as_secs() as i64;
            conn.execute(
                "INSERT INTO session_records (key, payload, written_at, expires_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(key) DO UPDATE SET
                    payload = excluded.payload,
                    written_at = excluded.written_at,
                    expires_at = excluded.expires_at",
                rusqlite::params![key, payload, now, expires_at],
            )
            .map_err(|e| IntakeError::Storage(format!("Session write failed: {}", e)))?;
            Ok(())
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "DELETE FROM session_records WHERE key = ?1",
                rusqlite::params![key],
            )
            .map_err(|e| IntakeError::Storage(format!("Session delete failed: {}", e)))?;
            Ok(())
        })
        .await
    }

    async fn purge_expired(&self) -> Result<usize> {
        self.with_conn(|conn| {
            let now = Timestamp::now().0;
            let deleted = conn
                .execute(
                    "DELETE FROM session_records WHERE expires_at <= ?1",
                    rusqlite::params![now],
                )
                .map_err(|e| IntakeError::Storage(format!("Session purge failed: {}", e)))?;
            if deleted > 0 {
                info!(records_deleted = deleted, "Expired session records purged");
            }
            Ok(deleted)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_then_get() {
        let db = SqlitePrimary::in_memory().unwrap();
        db.set("conv:1", r#"{"a":1}"#, Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(
            db.get("conv:1").await.unwrap().as_deref(),
            Some(r#"{"a":1}"#)
        );
    }

    #[tokio::test]
    async fn test_set_overwrites_existing() {
        let db = SqlitePrimary::in_memory().unwrap();
        db.set("conv:1", "first", Duration::from_secs(60)).await.unwrap();
        db.set("conv:1", "second", Duration::from_secs(60)).await.unwrap();
        assert_eq!(db.get("conv:1").await.unwrap().as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn test_zero_ttl_is_immediately_absent() {
        let db = SqlitePrimary::in_memory().unwrap();
        db.set("conv:1", "x", Duration::from_secs(0)).await.unwrap();
        assert!(db.get("conv:1").await.unwrap().is_none());
        assert_eq!(db.purge_expired().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_delete() {
        let db = SqlitePrimary::in_memory().unwrap();
        db.set("conv:1", "x", Duration::from_secs(60)).await.unwrap();
        db.delete("conv:1").await.unwrap();
        assert!(db.get("conv:1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_file_database_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("sessions.db");

        {
            let db = SqlitePrimary::open(&path).unwrap();
            db.set("conv:1", "persisted", Duration::from_secs(60))
                .await
                .unwrap();
        }

        let reopened = SqlitePrimary::open(&path).unwrap();
        assert_eq!(
            reopened.get("conv:1").await.unwrap().as_deref(),
            Some("persisted")
        );
    }
}
