//! Backend trait for the distributed key-value store.
//!
//! The page store only needs single-key operations plus a single-key
//! compare-and-swap; no transactions or range scans are assumed. Any
//! distributed cache (or the bundled [`MemoryBackend`](crate::MemoryBackend))
//! can sit behind this trait.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;

/// Key-value backend holding page payloads and tracking records.
///
/// Implementations report connectivity problems as
/// [`Error::BackendUnavailable`](crate::Error::BackendUnavailable). They do
/// not need to enforce timeouts; the store wraps every call in one.
///
/// # Thread Safety
///
/// All implementations must be `Send + Sync` to allow sharing across tasks.
#[async_trait]
pub trait PageBackend: Send + Sync {
    /// Read a value. Returns `Ok(None)` if the key is absent.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Write a value, replacing any existing one.
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<()>;

    /// Delete a value. Deleting an absent key succeeds.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Atomically replace the value at `key` if it currently equals `expected`.
    ///
    /// `expected = None` means the key must be absent; `new = None` deletes
    /// the key on match. Returns `Ok(false)` if the current value differs.
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        new: Option<Vec<u8>>,
    ) -> Result<bool>;

    /// Name of this backend, for logs.
    fn name(&self) -> &str;
}

#[async_trait]
impl<B: PageBackend + ?Sized> PageBackend for Arc<B> {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        (**self).get(key).await
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<()> {
        (**self).put(key, value).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        (**self).delete(key).await
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        new: Option<Vec<u8>>,
    ) -> Result<bool> {
        (**self).compare_and_swap(key, expected, new).await
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}
