//! Authoritative session backends.
//!
//! `PrimaryStore` is the seam between the session store and whatever the
//! deployment uses as its shared backend. Payloads are opaque strings; the
//! session store owns (de)serialization.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use intake_core::error::{IntakeError, Result};

/// A networked (or otherwise shared) key-value backend with per-key TTL.
#[async_trait]
pub trait PrimaryStore: Send + Sync {
    /// Short backend name used in log fields.
    fn name(&self) -> &'static str;

    /// Fetch the raw payload for `key`, or `None` if absent or expired.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write `payload` under `key`, replacing any existing value and
    /// restarting its TTL.
    async fn set(&self, key: &str, payload: &str, ttl: Duration) -> Result<()>;

    /// Remove `key`. Removing an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Drop expired records. Backends that expire on their own return 0.
    async fn purge_expired(&self) -> Result<usize> {
        Ok(0)
    }
}

// =============================================================================
// MemoryPrimary
// =============================================================================

struct MemoryRecord {
    payload: String,
    expires_at: Instant,
}

/// In-process primary backend.
///
/// Useful for single-node deployments and as a test double: it can be
/// switched offline to simulate an outage and given artificial latency to
/// exercise the store timeout.
pub struct MemoryPrimary {
    records: Mutex<HashMap<String, MemoryRecord>>,
    available: AtomicBool,
    latency_ms: AtomicU64,
}

impl MemoryPrimary {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            available: AtomicBool::new(true),
            latency_ms: AtomicU64::new(0),
        }
    }

    /// Toggle availability. While unavailable every call fails with
    /// `StoreUnavailable`.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Delay every call by `latency` before it is served.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Whether a live (unexpired) record exists, bypassing availability.
    pub fn contains(&self, key: &str) -> bool {
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        records
            .get(key)
            .is_some_and(|r| r.expires_at > Instant::now())
    }

    /// Number of records currently held, expired or not.
    pub fn len(&self) -> usize {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    async fn gate(&self) -> Result<()> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(IntakeError::StoreUnavailable(
                "memory primary is offline".to_string(),
            ))
        }
    }
}

impl Default for MemoryPrimary {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PrimaryStore for MemoryPrimary {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.gate().await?;
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        match records.get(key) {
            Some(record) if record.expires_at > Instant::now() => Ok(Some(record.payload.clone())),
            Some(_) => {
                records.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, payload: &str, ttl: Duration) -> Result<()> {
        self.gate().await?;
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        records.insert(
            key.to_string(),
            MemoryRecord {
                payload: payload.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.gate().await?;
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        records.remove(key);
        Ok(())
    }

    async fn purge_expired(&self) -> Result<usize> {
        self.gate().await?;
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        let before = records.len();
        records.retain(|_, r| r.expires_at > now);
        Ok(before - records.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_then_get() {
        let primary = MemoryPrimary::new();
        primary
            .set("conv:1", "{}", Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(primary.get("conv:1").await.unwrap().as_deref(), Some("{}"));
    }

    #[tokio::test]
    async fn test_get_absent_is_none() {
        let primary = MemoryPrimary::new();
        assert!(primary.get("conv:missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expired_record_is_absent() {
        let primary = MemoryPrimary::new();
        primary
            .set("conv:1", "{}", Duration::from_millis(20))
            .await
            .unwrap();
        std::thread::sleep(Duration::from_millis(40));
        assert!(primary.get("conv:1").await.unwrap().is_none());
        assert!(primary.is_empty());
    }

    #[tokio::test]
    async fn test_offline_fails_every_call() {
        let primary = MemoryPrimary::new();
        primary.set_available(false);

        assert!(matches!(
            primary.get("k").await,
            Err(IntakeError::StoreUnavailable(_))
        ));
        assert!(primary.set("k", "v", Duration::from_secs(1)).await.is_err());
        assert!(primary.delete("k").await.is_err());

        primary.set_available(true);
        assert!(primary.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_removes_record() {
        let primary = MemoryPrimary::new();
        primary.set("k", "v", Duration::from_secs(60)).await.unwrap();
        primary.delete("k").await.unwrap();
        assert!(!primary.contains("k"));
        // Deleting again is fine.
        primary.delete("k").await.unwrap();
    }

    #[tokio::test]
    async fn test_purge_expired_counts_removed() {
        let primary = MemoryPrimary::new();
        primary.set("a", "1", Duration::from_millis(10)).await.unwrap();
        primary.set("b", "2", Duration::from_secs(60)).await.unwrap();
        std::thread::sleep(Duration::from_millis(30));

        assert_eq!(primary.purge_expired().await.unwrap(), 1);
        assert!(primary.contains("b"));
        assert_eq!(primary.len(), 1);
    }
}
