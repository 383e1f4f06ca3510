//! Quota-bounded page store.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, trace, warn};

use crate::backend::PageBackend;
use crate::config::PageStoreConfig;
use crate::error::{Error, Result};
use crate::key::{PageId, SessionId, VersionSeq, page_key};
use crate::memory::MemoryBackend;
use crate::tracking::{EntryRef, SessionTracking};

/// Upper bound for the doubling compare-and-swap backoff.
const MAX_CAS_BACKOFF: Duration = Duration::from_millis(100);

/// One stored snapshot of a page's state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageEntry {
    /// Session owning the page.
    pub session_id: SessionId,

    /// Page the snapshot belongs to.
    pub page_id: PageId,

    /// Version of the snapshot.
    pub version: VersionSeq,

    /// Serialized page state.
    pub payload: Vec<u8>,
}

/// Per-session statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStats {
    /// Number of live page versions.
    pub live: usize,

    /// Configured quota.
    pub max_versions: usize,

    /// Evicted or removed versions whose payload deletion is unconfirmed.
    pub pending_purge: usize,

    /// When the oldest live version was written.
    pub oldest_write: Option<DateTime<Utc>>,
}

struct StoreInner<B> {
    backend: B,
    config: PageStoreConfig,
}

/// Page store bounded to a fixed number of versions per session.
///
/// Every session owns a tracking record listing its live versions in write
/// order. Writes, evictions and removals are committed by compare-and-swap on
/// that record, so they are atomic per session while unrelated sessions never
/// contend. A version is visible to reads only while the tracking record
/// lists it as live; payloads of evicted versions are deleted afterwards.
///
/// The store is cheap to clone and safe to share between tasks.
pub struct PageStore<B: PageBackend = MemoryBackend> {
    inner: Arc<StoreInner<B>>,
}

impl PageStore<MemoryBackend> {
    /// Create a store over a fresh in-process backend.
    pub fn in_memory(config: PageStoreConfig) -> Result<Self> {
        Self::new(config, MemoryBackend::new())
    }
}

impl<B: PageBackend> PageStore<B> {
    /// Create a store over `backend`.
    ///
    /// Fails with [`Error::InvalidArgument`] if the configuration is unusable
    /// (zero quota, zero timeout, zero compare-and-swap attempts).
    pub fn new(config: PageStoreConfig, backend: B) -> Result<Self> {
        config.validate()?;
        debug!(
            backend = backend.name(),
            max_versions = config.max_versions,
            op_timeout_ms = config.op_timeout.as_millis() as u64,
            "Page store created"
        );
        Ok(Self {
            inner: Arc::new(StoreInner { backend, config }),
        })
    }

    /// Get the store configuration.
    pub fn config(&self) -> &PageStoreConfig {
        &self.inner.config
    }

    /// Get the underlying backend.
    pub fn backend(&self) -> &B {
        &self.inner.backend
    }

    /// Store a new version of a page and return its version number.
    ///
    /// The version is reserved first, the payload written next, and only
    /// then does the version become live. If the session now holds more
    /// than `max_versions` versions, the oldest writes (of any page) are
    /// evicted at that point, so a failed write never costs a retained
    /// version.
    pub async fn put(
        &self,
        session_id: &SessionId,
        page_id: PageId,
        payload: Vec<u8>,
    ) -> Result<VersionSeq> {
        let max_versions = self.inner.config.max_versions;
        let (reservation, _) = self
            .update_tracking(session_id, |t| t.reserve(page_id))
            .await?;
        let version = reservation.version;

        let key = page_key(session_id, page_id, version);
        let size = payload.len();
        if let Err(e) = self
            .call("put", &key, self.inner.backend.put(&key, payload))
            .await
        {
            warn!(
                session_id = %session_id,
                page_id = %page_id,
                version = %version,
                error = %e,
                "Page write failed, discarding version"
            );
            self.discard_payload(session_id, page_id, version).await;
            return Err(e);
        }

        let promoted = self
            .update_tracking(session_id, |t| {
                t.promote(page_id, reservation, max_versions, Utc::now())
            })
            .await;
        match promoted {
            Ok((Some(evicted), committed)) => {
                for entry in &evicted {
                    debug!(
                        session_id = %session_id,
                        page_id = %entry.page_id,
                        version = %entry.version,
                        "Evicting oldest page version over quota"
                    );
                }
                self.purge(session_id, &committed.pending_purge).await;
            }
            Ok((None, _)) => {
                debug!(
                    session_id = %session_id,
                    page_id = %page_id,
                    version = %version,
                    "Session removed while page was being written, discarding version"
                );
                self.discard_payload(session_id, page_id, version).await;
            }
            Err(e) => {
                warn!(
                    session_id = %session_id,
                    page_id = %page_id,
                    version = %version,
                    error = %e,
                    "Failed to publish page version, discarding it"
                );
                self.discard_payload(session_id, page_id, version).await;
                return Err(e);
            }
        }

        trace!(
            session_id = %session_id,
            page_id = %page_id,
            version = %version,
            size,
            "Page version stored"
        );

        Ok(version)
    }

    /// Load a specific page version.
    pub async fn get(
        &self,
        session_id: &SessionId,
        page_id: PageId,
        version: VersionSeq,
    ) -> Result<Vec<u8>> {
        let tracking = self.read_tracking(session_id).await?;
        let live = tracking
            .as_ref()
            .is_some_and(|t| t.is_live(page_id, version));
        if !live {
            return Err(not_found(session_id, page_id, Some(version)));
        }

        let key = page_key(session_id, page_id, version);
        self.call("get", &key, self.inner.backend.get(&key))
            .await?
            .ok_or_else(|| not_found(session_id, page_id, Some(version)))
    }

    /// Load the newest retained version of a page.
    pub async fn get_latest(&self, session_id: &SessionId, page_id: PageId) -> Result<Vec<u8>> {
        Ok(self.latest_entry(session_id, page_id).await?.payload)
    }

    /// Load the newest retained version of a page together with its version.
    pub async fn latest_entry(&self, session_id: &SessionId, page_id: PageId) -> Result<PageEntry> {
        let tracking = self.read_tracking(session_id).await?;
        let Some(latest) = tracking.as_ref().and_then(|t| t.latest(page_id)) else {
            return Err(not_found(session_id, page_id, None));
        };

        let version = latest.version;
        let key = latest.key(session_id);
        let payload = self
            .call("get", &key, self.inner.backend.get(&key))
            .await?
            .ok_or_else(|| not_found(session_id, page_id, Some(version)))?;

        Ok(PageEntry {
            session_id: session_id.clone(),
            page_id,
            version,
            payload,
        })
    }

    /// Check whether a page version is retained.
    pub async fn contains(
        &self,
        session_id: &SessionId,
        page_id: PageId,
        version: VersionSeq,
    ) -> Result<bool> {
        match self.get(session_id, page_id, version).await {
            Ok(_) => Ok(true),
            Err(Error::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Remove every retained version of one page. Idempotent.
    pub async fn remove_page(&self, session_id: &SessionId, page_id: PageId) -> Result<()> {
        let (removed, committed) = self
            .update_tracking(session_id, |t| t.remove_page(page_id))
            .await?;
        if removed.is_empty() {
            return Ok(());
        }

        debug!(
            session_id = %session_id,
            page_id = %page_id,
            count = removed.len(),
            "Removed page versions"
        );

        self.purge(session_id, &committed.pending_purge).await;
        Ok(())
    }

    /// Remove all versions of a session.
    ///
    /// The tracking record stays behind in retired form: it keeps the
    /// session's version floor so numbers are never reused, and moves to a
    /// new generation so writes still in flight are discarded instead of
    /// resurrecting the session. Idempotent: removing an unknown or already
    /// removed session succeeds.
    pub async fn remove_session(&self, session_id: &SessionId) -> Result<()> {
        let key = session_id.tracking_key();
        let mut backoff = self.inner.config.cas_backoff;
        let max_attempts = self.inner.config.cas_max_attempts;

        for attempt in 1..=max_attempts {
            let Some(current) = self.call("get", &key, self.inner.backend.get(&key)).await? else {
                trace!(session_id = %session_id, "Session has no stored pages");
                return Ok(());
            };
            let tracking = SessionTracking::decode(&current)?;
            if tracking.is_retired() {
                trace!(session_id = %session_id, "Session already removed");
                return Ok(());
            }

            // Payloads go first so a failure leaves the tracking record in
            // place for the next attempt.
            for entry in tracking.all_entries() {
                let page = entry.key(session_id);
                self.call("delete", &page, self.inner.backend.delete(&page))
                    .await?;
            }

            let mut retired = tracking.clone();
            retired.retire();
            let encoded = retired.encode()?;
            let swapped = self
                .call(
                    "compare_and_swap",
                    &key,
                    self.inner
                        .backend
                        .compare_and_swap(&key, Some(current.as_slice()), Some(encoded)),
                )
                .await?;
            if swapped {
                debug!(
                    session_id = %session_id,
                    count = tracking.live.len(),
                    generation = retired.generation,
                    "Session pages removed"
                );
                return Ok(());
            }

            debug!(
                session_id = %session_id,
                attempt,
                "Session changed during removal, retrying"
            );
            if attempt < max_attempts {
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(MAX_CAS_BACKOFF);
            }
        }

        Err(contention(session_id, max_attempts))
    }

    /// Live versions of a session, oldest write first.
    pub async fn entries(&self, session_id: &SessionId) -> Result<Vec<EntryRef>> {
        Ok(self
            .read_tracking(session_id)
            .await?
            .map(|t| t.live.into_iter().collect())
            .unwrap_or_default())
    }

    /// Get statistics for a session.
    pub async fn stats(&self, session_id: &SessionId) -> Result<SessionStats> {
        let tracking = self.read_tracking(session_id).await?.unwrap_or_default();
        Ok(SessionStats {
            live: tracking.live.len(),
            max_versions: self.inner.config.max_versions,
            pending_purge: tracking.pending_purge.len(),
            oldest_write: tracking.live.front().map(|e| e.written_at),
        })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Backend plumbing
    // ─────────────────────────────────────────────────────────────────────────

    /// Run a backend call under the configured timeout.
    async fn call<T, F>(&self, op: &str, key: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let timeout = self.inner.config.op_timeout;
        match tokio::time::timeout(timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(Error::BackendUnavailable(msg))) => Err(Error::BackendUnavailable(msg)),
            Ok(Err(e)) => Err(Error::BackendUnavailable(format!(
                "{} {} of '{}' failed: {}",
                self.inner.backend.name(),
                op,
                key,
                e
            ))),
            Err(_) => {
                warn!(
                    backend = self.inner.backend.name(),
                    op,
                    key,
                    timeout_ms = timeout.as_millis() as u64,
                    "Backend call timed out"
                );
                Err(Error::BackendUnavailable(format!(
                    "{} {} of '{}' timed out after {:?}",
                    self.inner.backend.name(),
                    op,
                    key,
                    timeout
                )))
            }
        }
    }

    async fn read_tracking(&self, session_id: &SessionId) -> Result<Option<SessionTracking>> {
        let key = session_id.tracking_key();
        match self.call("get", &key, self.inner.backend.get(&key)).await? {
            Some(bytes) => Ok(Some(SessionTracking::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Apply `mutate` to the session's tracking record and commit it with
    /// compare-and-swap, retrying on contention.
    ///
    /// A mutation that leaves the record unchanged is not written. Returns
    /// the mutation's result and the record as committed.
    async fn update_tracking<R, F>(
        &self,
        session_id: &SessionId,
        mut mutate: F,
    ) -> Result<(R, SessionTracking)>
    where
        F: FnMut(&mut SessionTracking) -> R + Send,
        R: Send,
    {
        let key = session_id.tracking_key();
        let mut backoff = self.inner.config.cas_backoff;
        let max_attempts = self.inner.config.cas_max_attempts;

        for attempt in 1..=max_attempts {
            let current = self.call("get", &key, self.inner.backend.get(&key)).await?;
            let before = match &current {
                Some(bytes) => SessionTracking::decode(bytes)?,
                None => SessionTracking::default(),
            };

            let mut tracking = before.clone();
            let result = mutate(&mut tracking);
            if tracking == before {
                return Ok((result, tracking));
            }

            let encoded = tracking.encode()?;
            let swapped = self
                .call(
                    "compare_and_swap",
                    &key,
                    self.inner
                        .backend
                        .compare_and_swap(&key, current.as_deref(), Some(encoded)),
                )
                .await?;
            if swapped {
                return Ok((result, tracking));
            }

            debug!(
                session_id = %session_id,
                attempt,
                "Tracking record changed concurrently, retrying"
            );
            if attempt < max_attempts {
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(MAX_CAS_BACKOFF);
            }
        }

        Err(contention(session_id, max_attempts))
    }

    /// Delete the payloads listed in `pending` and forget the ones that are
    /// gone. Failures stay pending for a later write.
    async fn purge(&self, session_id: &SessionId, pending: &[EntryRef]) {
        let purged = self.delete_payloads(session_id, pending).await;
        if purged.is_empty() {
            return;
        }
        if let Err(e) = self
            .update_tracking(session_id, |t| t.clear_purged(&purged))
            .await
        {
            warn!(session_id = %session_id, error = %e, "Failed to record purged payloads");
        }
    }

    /// Best-effort removal of a payload that never became live. If the
    /// delete fails it is queued in `pending_purge`.
    async fn discard_payload(&self, session_id: &SessionId, page_id: PageId, version: VersionSeq) {
        let entry = EntryRef {
            page_id,
            version,
            written_at: Utc::now(),
        };
        if !self
            .delete_payloads(session_id, std::slice::from_ref(&entry))
            .await
            .is_empty()
        {
            return;
        }
        if let Err(e) = self
            .update_tracking(session_id, |t| t.pending_purge.push(entry.clone()))
            .await
        {
            warn!(
                session_id = %session_id,
                page_id = %page_id,
                version = %version,
                error = %e,
                "Failed to queue discarded payload for purge"
            );
        }
    }

    /// Delete payloads, returning the entries whose deletion succeeded.
    async fn delete_payloads(&self, session_id: &SessionId, entries: &[EntryRef]) -> Vec<EntryRef> {
        let mut deleted = Vec::with_capacity(entries.len());
        for entry in entries {
            let key = entry.key(session_id);
            match self
                .call("delete", &key, self.inner.backend.delete(&key))
                .await
            {
                Ok(()) => deleted.push(entry.clone()),
                Err(e) => {
                    warn!(
                        session_id = %session_id,
                        key = %key,
                        error = %e,
                        "Failed to delete page payload, will retry on a later write"
                    );
                }
            }
        }
        deleted
    }
}

impl<B: PageBackend> Clone for PageStore<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

fn not_found(session_id: &SessionId, page_id: PageId, version: Option<VersionSeq>) -> Error {
    match version {
        Some(version) => Error::NotFound(page_key(session_id, page_id, version)),
        None => Error::NotFound(format!("{}/page/{}", session_id, page_id)),
    }
}

fn contention(session_id: &SessionId, attempts: u32) -> Error {
    warn!(session_id = %session_id, attempts, "Tracking record contention, giving up");
    Error::BackendUnavailable(format!(
        "tracking record of session '{}' still contended after {} attempts",
        session_id, attempts
    ))
}
