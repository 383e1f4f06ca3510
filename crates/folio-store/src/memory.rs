//! In-process backend.
//!
//! [`MemoryBackend`] keeps everything in a `HashMap` behind a non-poisoning
//! lock. It serves single-node deployments and tests, and mirrors the bits
//! of a distributed map the store relies on: single-key compare-and-swap and
//! optional per-entry TTL. It can also be switched offline or slowed down to
//! exercise the store's failure handling.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::backend::PageBackend;
use crate::error::{Error, Result};
use crate::ttl::ExpiryTracker;

struct MemoryInner {
    entries: HashMap<String, Vec<u8>>,
    expiry: ExpiryTracker,
}

impl MemoryInner {
    fn current(&self, key: &str) -> Option<&Vec<u8>> {
        if self.expiry.is_expired(key) {
            None
        } else {
            self.entries.get(key)
        }
    }

    fn insert(&mut self, key: &str, value: Vec<u8>) {
        self.entries.insert(key.to_string(), value);
        self.expiry.touch(key);
    }

    fn remove(&mut self, key: &str) {
        self.entries.remove(key);
        self.expiry.remove(key);
    }
}

/// In-memory [`PageBackend`].
pub struct MemoryBackend {
    name: String,
    inner: RwLock<MemoryInner>,
    offline: AtomicBool,
    latency_ms: AtomicU64,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    /// Create an empty backend whose entries never expire.
    pub fn new() -> Self {
        Self::with_entry_ttl(None)
    }

    /// Create an empty backend whose entries expire `ttl` after their last write.
    pub fn with_entry_ttl(ttl: Option<Duration>) -> Self {
        Self {
            name: "memory".to_string(),
            inner: RwLock::new(MemoryInner {
                entries: HashMap::new(),
                expiry: ExpiryTracker::new(ttl),
            }),
            offline: AtomicBool::new(false),
            latency_ms: AtomicU64::new(0),
        }
    }

    /// Set the name reported in logs.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Simulate losing (or regaining) the connection to the backend.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Delay every operation by `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        let ms = latency.map(|d| d.as_millis() as u64).unwrap_or(0);
        self.latency_ms.store(ms, Ordering::SeqCst);
    }

    /// Number of stored keys, expired ones included until purged.
    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    /// Check if the backend holds no keys.
    pub fn is_empty(&self) -> bool {
        self.inner.read().entries.is_empty()
    }

    /// Live keys starting with `prefix`, sorted.
    pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        let inner = self.inner.read();
        let mut keys: Vec<String> = inner
            .entries
            .keys()
            .filter(|k| k.starts_with(prefix) && !inner.expiry.is_expired(k))
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    /// Drop expired entries and return how many were removed.
    pub fn purge_expired(&self) -> usize {
        let mut inner = self.inner.write();
        let expired = inner.expiry.drain_expired();
        for key in &expired {
            inner.entries.remove(key);
        }
        if !expired.is_empty() {
            debug!(count = expired.len(), backend = %self.name, "Purged expired entries");
        }
        expired.len()
    }

    /// Periodically purge expired entries until the backend is dropped.
    pub fn spawn_reaper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match weak.upgrade() {
                    Some(backend) => {
                        backend.purge_expired();
                    }
                    None => break,
                }
            }
        })
    }

    async fn enter(&self, op: &str, key: &str) -> Result<()> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.offline.load(Ordering::SeqCst) {
            return Err(Error::BackendUnavailable(format!(
                "{} backend offline during {} of '{}'",
                self.name, op, key
            )));
        }
        trace!(backend = %self.name, op, key, "Backend call");
        Ok(())
    }
}

#[async_trait]
impl PageBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.enter("get", key).await?;
        Ok(self.inner.read().current(key).cloned())
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.enter("put", key).await?;
        self.inner.write().insert(key, value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.enter("delete", key).await?;
        self.inner.write().remove(key);
        Ok(())
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        new: Option<Vec<u8>>,
    ) -> Result<bool> {
        self.enter("compare_and_swap", key).await?;
        let mut inner = self.inner.write();
        if inner.current(key).map(Vec::as_slice) != expected {
            return Ok(false);
        }
        match new {
            Some(value) => inner.insert(key, value),
            None => inner.remove(key),
        }
        Ok(true)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_put_delete() {
        let backend = MemoryBackend::new();
        assert_eq!(backend.get("k").await.unwrap(), None);

        backend.put("k", vec![1, 2]).await.unwrap();
        assert_eq!(backend.get("k").await.unwrap(), Some(vec![1, 2]));

        backend.delete("k").await.unwrap();
        backend.delete("k").await.unwrap();
        assert_eq!(backend.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_compare_and_swap() {
        let backend = MemoryBackend::new();

        // Absent key: only an "expect absent" swap succeeds
        let swapped = backend
            .compare_and_swap("k", Some(b"x".as_slice()), Some(b"y".to_vec()))
            .await
            .unwrap();
        assert!(!swapped);
        assert!(backend.compare_and_swap("k", None, Some(b"a".to_vec())).await.unwrap());
        assert!(!backend.compare_and_swap("k", None, Some(b"b".to_vec())).await.unwrap());

        let swapped = backend
            .compare_and_swap("k", Some(b"a".as_slice()), Some(b"b".to_vec()))
            .await
            .unwrap();
        assert!(swapped);
        assert_eq!(backend.get("k").await.unwrap(), Some(b"b".to_vec()));

        // Swap to None deletes
        let swapped = backend
            .compare_and_swap("k", Some(b"b".as_slice()), None)
            .await
            .unwrap();
        assert!(swapped);
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn test_offline() {
        let backend = MemoryBackend::new();
        backend.set_offline(true);

        let result = backend.put("k", vec![]).await;
        assert!(matches!(result, Err(Error::BackendUnavailable(_))));

        backend.set_offline(false);
        assert!(backend.put("k", vec![]).await.is_ok());
    }

    #[tokio::test]
    async fn test_entry_ttl() {
        let backend = MemoryBackend::with_entry_ttl(Some(Duration::from_millis(30)));
        backend.put("s1/page/1/1", vec![1]).await.unwrap();
        backend.put("s2/page/1/1", vec![2]).await.unwrap();
        assert_eq!(backend.keys_with_prefix("s1/").len(), 1);

        tokio::time::sleep(Duration::from_millis(60)).await;

        assert_eq!(backend.get("s1/page/1/1").await.unwrap(), None);
        assert!(backend.keys_with_prefix("s1/").is_empty());
        // Expired entry counts as absent for compare-and-swap
        assert!(backend.compare_and_swap("s2/page/1/1", None, Some(vec![3])).await.unwrap());

        assert_eq!(backend.purge_expired(), 1);
        assert_eq!(backend.len(), 1);
    }

    #[tokio::test]
    async fn test_reaper_purges() {
        let backend = Arc::new(MemoryBackend::with_entry_ttl(Some(Duration::from_millis(10))));
        backend.put("k", vec![]).await.unwrap();

        let handle = backend.spawn_reaper(Duration::from_millis(20));
        tokio::time::sleep(Duration::from_millis(80)).await;

        assert!(backend.is_empty());
        handle.abort();
    }

    #[tokio::test]
    async fn test_keys_with_prefix_sorted() {
        let backend = MemoryBackend::new().with_name("test");
        backend.put("s1/page/2/1", vec![]).await.unwrap();
        backend.put("s1/page/1/1", vec![]).await.unwrap();
        backend.put("s10/page/1/1", vec![]).await.unwrap();

        assert_eq!(
            backend.keys_with_prefix("s1/"),
            vec!["s1/page/1/1".to_string(), "s1/page/2/1".to_string()]
        );
        assert_eq!(backend.name(), "test");
    }
}
