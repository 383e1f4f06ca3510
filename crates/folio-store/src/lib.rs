//! Quota-bounded page store for stateful web UI sessions.
//!
//! A stateful UI framework keeps a serialized snapshot of every rendered
//! page so a later request can re-hydrate it. This crate stores those
//! snapshots in a shared key-value backend and bounds how many versions each
//! session may retain:
//! - Versions are numbered per page and only ever grow
//! - Once a session exceeds its quota, its oldest write is evicted
//! - Per-session updates are atomic via compare-and-swap; sessions never contend
//! - Every backend call runs under a timeout
//!
//! # Example
//!
//! ```rust,ignore
//! use folio_store::{PageId, PageStore, PageStoreConfig, SessionId};
//!
//! let store = PageStore::in_memory(PageStoreConfig::default().with_max_versions(4))?;
//! let session = SessionId::new("8F3A1C")?;
//!
//! let version = store.put(&session, PageId(1), page_bytes).await?;
//! let restored = store.get(&session, PageId(1), version).await?;
//!
//! store.remove_session(&session).await?;
//! ```

mod backend;
mod config;
mod error;
mod key;
mod memory;
mod store;
mod tracking;
mod ttl;

pub use backend::PageBackend;
pub use config::{
    DEFAULT_CAS_BACKOFF, DEFAULT_CAS_MAX_ATTEMPTS, DEFAULT_MAX_VERSIONS, DEFAULT_OP_TIMEOUT,
    PageStoreConfig, PageStoreSection,
};
pub use error::{Error, Result};
pub use key::{MAX_SESSION_ID_LEN, PageId, SessionId, VersionSeq, page_key};
pub use memory::MemoryBackend;
pub use store::{PageEntry, PageStore, SessionStats};
pub use tracking::{EntryRef, Reservation, SessionTracking};
pub use ttl::ExpiryTracker;
