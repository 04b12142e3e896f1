//! Two-tier session store.
//!
//! Reads go to the primary first and fall back to the local cache when the
//! primary fails, times out, or returns a payload that does not parse.
//! Writes go to the primary best-effort and always refresh the cache. No
//! method here returns an error: a turn that cannot reach storage proceeds as
//! if the identity had no session.

use std::marker::PhantomData;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, error, warn};

use intake_core::config::SessionConfig;
use intake_core::error::{IntakeError, Result};
use intake_core::types::IdentityKey;

use crate::cache::{CacheStats, LocalCache};
use crate::primary::PrimaryStore;

/// Durable per-identity store for values of type `T`.
///
/// Several stores may share one primary; each one writes under its own
/// namespace (`conv:`, `legacy:`, `draft:` ...).
pub struct SessionStore<T> {
    namespace: String,
    primary: Arc<dyn PrimaryStore>,
    cache: Mutex<LocalCache>,
    ttl: Duration,
    timeout: Duration,
    _marker: PhantomData<fn() -> T>,
}

impl<T> SessionStore<T>
where
    T: Serialize + DeserializeOwned,
{
    /// Build a store from the session section of the configuration.
    pub fn new(namespace: &str, primary: Arc<dyn PrimaryStore>, config: &SessionConfig) -> Self {
        Self::with_settings(
            namespace,
            primary,
            config.ttl(),
            config.cache_capacity,
            config.store_timeout(),
        )
    }

    pub fn with_settings(
        namespace: &str,
        primary: Arc<dyn PrimaryStore>,
        ttl: Duration,
        cache_capacity: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            namespace: namespace.to_string(),
            primary,
            cache: Mutex::new(LocalCache::new(cache_capacity, ttl)),
            ttl,
            timeout,
            _marker: PhantomData,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Load the value stored for `key`, if any.
    pub async fn get(&self, key: &IdentityKey) -> Option<T> {
        let record_key = self.record_key(key);

        match self.bounded(self.primary.get(&record_key)).await {
            Ok(Some(payload)) => match serde_json::from_str::<T>(&payload) {
                Ok(value) => return Some(value),
                Err(e) => {
                    let err = IntakeError::CorruptState {
                        key: record_key.clone(),
                        reason: e.to_string(),
                    };
                    error!(backend = self.primary.name(), error = %err, "Purging corrupt payload from primary");
                    self.purge_primary(&record_key).await;
                }
            },
            // Primary is authoritative whenever it answers.
            Ok(None) => return None,
            Err(err) => {
                warn!(
                    backend = self.primary.name(),
                    key = %record_key,
                    error = %err,
                    "Primary read failed, falling back to local cache"
                );
            }
        }

        self.get_cached(&record_key)
    }

    /// Store `value` under `key` with the default TTL.
    pub async fn set(&self, key: &IdentityKey, value: &T) {
        self.set_with_ttl(key, value, self.ttl).await;
    }

    /// Store `value` under `key`, expiring after `ttl`.
    pub async fn set_with_ttl(&self, key: &IdentityKey, value: &T, ttl: Duration) {
        let record_key = self.record_key(key);
        let payload = match serde_json::to_string(value) {
            Ok(p) => p,
            Err(e) => {
                error!(key = %record_key, error = %e, "Session value failed to serialize, not stored");
                return;
            }
        };

        if let Err(err) = self
            .bounded(self.primary.set(&record_key, &payload, ttl))
            .await
        {
            warn!(
                backend = self.primary.name(),
                key = %record_key,
                error = %err,
                "Primary write failed, session held in local cache only"
            );
        }

        let evicted = self.lock_cache().insert_with_ttl(&record_key, payload, ttl);
        if evicted > 0 {
            debug!(evicted, namespace = %self.namespace, "Local cache at capacity");
        }
    }

    /// Remove the value for `key` from both tiers.
    pub async fn clear(&self, key: &IdentityKey) {
        let record_key = self.record_key(key);
        self.purge_primary(&record_key).await;
        self.lock_cache().remove(&record_key);
    }

    /// Whether a value is currently retrievable for `key`.
    pub async fn has_state(&self, key: &IdentityKey) -> bool {
        self.get(key).await.is_some()
    }

    pub fn stats(&self) -> CacheStats {
        self.lock_cache().stats()
    }

    /// Drop expired entries from the local cache and ask the primary to do
    /// the same. Returns the number of cache entries removed.
    pub async fn purge_expired(&self) -> usize {
        let removed = self.lock_cache().purge_expired();
        if let Err(err) = self.bounded(self.primary.purge_expired()).await {
            warn!(backend = self.primary.name(), error = %err, "Primary purge failed");
        }
        removed
    }

    fn record_key(&self, key: &IdentityKey) -> String {
        format!("{}:{}", self.namespace, key)
    }

    fn get_cached(&self, record_key: &str) -> Option<T> {
        let mut cache = self.lock_cache();
        let payload = cache.get(record_key)?;
        match serde_json::from_str::<T>(&payload) {
            Ok(value) => {
                debug!(key = %record_key, "Session served from local cache");
                Some(value)
            }
            Err(e) => {
                let err = IntakeError::CorruptState {
                    key: record_key.to_string(),
                    reason: e.to_string(),
                };
                error!(error = %err, "Purging corrupt payload from local cache");
                cache.remove(record_key);
                None
            }
        }
    }

    async fn purge_primary(&self, record_key: &str) {
        if let Err(err) = self.bounded(self.primary.delete(record_key)).await {
            warn!(backend = self.primary.name(), key = %record_key, error = %err, "Primary delete failed");
        }
    }

    /// Apply the store timeout to a primary call, folding elapsed time into
    /// `IntakeError::Timeout`.
    async fn bounded<F, R>(&self, fut: F) -> Result<R>
    where
        F: std::future::Future<Output = Result<R>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(IntakeError::Timeout(self.timeout.as_millis() as u64)),
        }
    }

    fn lock_cache(&self) -> MutexGuard<'_, LocalCache> {
        self.cache.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primary::MemoryPrimary;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Sample {
        step: u32,
        label: String,
    }

    fn sample(step: u32) -> Sample {
        Sample {
            step,
            label: format!("step-{}", step),
        }
    }

    fn key(raw: &str) -> IdentityKey {
        IdentityKey::parse(raw).unwrap()
    }

    fn store(primary: Arc<MemoryPrimary>, capacity: usize) -> SessionStore<Sample> {
        SessionStore::with_settings(
            "conv",
            primary,
            Duration::from_secs(60),
            capacity,
            Duration::from_millis(100),
        )
    }

    #[tokio::test]
    async fn test_set_then_get_returns_equal_value() {
        let primary = Arc::new(MemoryPrimary::new());
        let store = store(Arc::clone(&primary), 10);
        let k = key("5550001");

        store.set(&k, &sample(3)).await;
        assert_eq!(store.get(&k).await, Some(sample(3)));
        assert!(primary.contains("conv:5550001"));
    }

    #[tokio::test]
    async fn test_absent_key_is_none() {
        let store = store(Arc::new(MemoryPrimary::new()), 10);
        assert!(store.get(&key("5550002")).await.is_none());
        assert!(!store.has_state(&key("5550002")).await);
    }

    #[tokio::test]
    async fn test_primary_outage_served_from_warm_cache() {
        let primary = Arc::new(MemoryPrimary::new());
        let store = store(Arc::clone(&primary), 10);
        let k = key("5550003");

        store.set(&k, &sample(5)).await;
        primary.set_available(false);

        assert_eq!(store.get(&k).await, Some(sample(5)));
    }

    #[tokio::test]
    async fn test_write_during_outage_lands_in_cache() {
        let primary = Arc::new(MemoryPrimary::new());
        let store = store(Arc::clone(&primary), 10);
        let k = key("5550004");

        primary.set_available(false);
        store.set(&k, &sample(1)).await;

        assert!(primary.is_empty());
        assert_eq!(store.get(&k).await, Some(sample(1)));
    }

    #[tokio::test]
    async fn test_slow_primary_times_out_to_cache() {
        let primary = Arc::new(MemoryPrimary::new());
        let store = store(Arc::clone(&primary), 10);
        let k = key("5550005");

        store.set(&k, &sample(2)).await;
        primary.set_latency(Duration::from_millis(500));

        let started = std::time::Instant::now();
        assert_eq!(store.get(&k).await, Some(sample(2)));
        assert!(started.elapsed() < Duration::from_millis(400));
    }

    #[tokio::test]
    async fn test_corrupt_primary_payload_is_purged() {
        let primary = Arc::new(MemoryPrimary::new());
        let store = store(Arc::clone(&primary), 10);
        let k = key("5550006");

        primary
            .set("conv:5550006", "{not json", Duration::from_secs(60))
            .await
            .unwrap();

        assert!(store.get(&k).await.is_none());
        assert!(!primary.contains("conv:5550006"));
    }

    #[tokio::test]
    async fn test_corrupt_primary_falls_back_to_cached_value() {
        let primary = Arc::new(MemoryPrimary::new());
        let store = store(Arc::clone(&primary), 10);
        let k = key("5550007");

        store.set(&k, &sample(8)).await;
        primary
            .set("conv:5550007", "garbage", Duration::from_secs(60))
            .await
            .unwrap();

        assert_eq!(store.get(&k).await, Some(sample(8)));
        assert!(!primary.contains("conv:5550007"));
    }

    #[tokio::test]
    async fn test_primary_absence_is_authoritative() {
        let primary = Arc::new(MemoryPrimary::new());
        let store = store(Arc::clone(&primary), 10);
        let k = key("5550008");

        store.set(&k, &sample(1)).await;
        primary.delete("conv:5550008").await.unwrap();

        assert!(store.get(&k).await.is_none());
    }

    #[tokio::test]
    async fn test_clear_removes_both_tiers() {
        let primary = Arc::new(MemoryPrimary::new());
        let store = store(Arc::clone(&primary), 10);
        let k = key("5550009");

        store.set(&k, &sample(4)).await;
        store.clear(&k).await;
        primary.set_available(false);

        assert!(store.get(&k).await.is_none());
    }

    #[tokio::test]
    async fn test_expired_cache_entry_is_absent_during_outage() {
        let primary = Arc::new(MemoryPrimary::new());
        let store = store(Arc::clone(&primary), 10);
        let k = key("5550010");

        store
            .set_with_ttl(&k, &sample(1), Duration::from_millis(20))
            .await;
        primary.set_available(false);
        std::thread::sleep(Duration::from_millis(40));

        assert!(store.get(&k).await.is_none());
    }

    #[tokio::test]
    async fn test_cache_capacity_evicts_least_recent_identity() {
        let primary = Arc::new(MemoryPrimary::new());
        let store = store(Arc::clone(&primary), 2);

        store.set(&key("1"), &sample(1)).await;
        store.set(&key("2"), &sample(2)).await;
        store.set(&key("3"), &sample(3)).await;

        let stats = store.stats();
        assert_eq!(stats.entries, 2);
        assert_eq!(stats.capacity, 2);

        primary.set_available(false);
        assert!(store.get(&key("1")).await.is_none());
        assert_eq!(store.get(&key("3")).await, Some(sample(3)));
    }

    #[tokio::test]
    async fn test_namespaces_do_not_collide() {
        let primary: Arc<MemoryPrimary> = Arc::new(MemoryPrimary::new());
        let conv = store(Arc::clone(&primary), 10);
        let draft: SessionStore<Sample> = SessionStore::with_settings(
            "draft",
            primary.clone(),
            Duration::from_secs(60),
            10,
            Duration::from_millis(100),
        );
        let k = key("5550011");

        conv.set(&k, &sample(1)).await;
        draft.set(&k, &sample(9)).await;

        assert_eq!(conv.get(&k).await, Some(sample(1)));
        assert_eq!(draft.get(&k).await, Some(sample(9)));
    }

    #[tokio::test]
    async fn test_purge_expired_reports_cache_removals() {
        let primary = Arc::new(MemoryPrimary::new());
        let store = store(Arc::clone(&primary), 10);

        store
            .set_with_ttl(&key("1"), &sample(1), Duration::from_millis(10))
            .await;
        store.set(&key("2"), &sample(2)).await;
        std::thread::sleep(Duration::from_millis(30));

        assert_eq!(store.purge_expired().await, 1);
        assert_eq!(primary.len(), 1);
    }
}
