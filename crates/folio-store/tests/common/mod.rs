//! Common test utilities for integration tests.

#![allow(dead_code)]

use std::sync::Once;
use std::time::Duration;

use folio_store::{PageStore, PageStoreConfig, SessionId};

static TRACING: Once = Once::new();

/// Install a test-friendly tracing subscriber once per test binary.
///
/// Honors `RUST_LOG`; silent by default.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("off"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

/// In-memory store with a generous contention budget, for tests that
/// hammer a single session from many tasks.
pub fn contended_store(max_versions: usize) -> PageStore {
    init_tracing();
    let config = PageStoreConfig::new()
        .with_max_versions(max_versions)
        .with_cas_max_attempts(64)
        .with_cas_backoff(Duration::from_micros(200));
    PageStore::in_memory(config).expect("valid config")
}

/// Build a session id, panicking on malformed input.
pub fn session(id: &str) -> SessionId {
    SessionId::new(id).expect("valid session id")
}
