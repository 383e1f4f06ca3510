//! Write-time tracking for backend entry expiration.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Tracks when each key was last written, for TTL-based expiration.
///
/// With no TTL configured nothing is recorded and nothing expires.
#[derive(Debug)]
pub struct ExpiryTracker {
    /// Last write time for each key.
    written_at: HashMap<String, Instant>,

    /// TTL duration (None means no expiration).
    ttl: Option<Duration>,
}

impl ExpiryTracker {
    /// Create a new tracker with the given TTL.
    pub fn new(ttl: Option<Duration>) -> Self {
        Self {
            written_at: HashMap::new(),
            ttl,
        }
    }

    /// Record a write for a key (restarts its TTL).
    pub fn touch(&mut self, key: &str) {
        if self.ttl.is_some() {
            self.written_at.insert(key.to_string(), Instant::now());
        }
    }

    /// Check if a key has expired.
    pub fn is_expired(&self, key: &str) -> bool {
        match self.ttl {
            None => false,
            Some(ttl) => match self.written_at.get(key) {
                None => false, // never written through this tracker
                Some(at) => at.elapsed() > ttl,
            },
        }
    }

    /// Stop tracking a key.
    pub fn remove(&mut self, key: &str) {
        self.written_at.remove(key);
    }

    /// Remove all expired keys from tracking and return them.
    pub fn drain_expired(&mut self) -> Vec<String> {
        let Some(ttl) = self.ttl else {
            return Vec::new();
        };
        let now = Instant::now();
        let expired: Vec<String> = self
            .written_at
            .iter()
            .filter(|(_, at)| now.duration_since(**at) > ttl)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            self.written_at.remove(key);
        }
        expired
    }

    /// Number of tracked keys.
    pub fn len(&self) -> usize {
        self.written_at.len()
    }

    /// Check if no keys are tracked.
    pub fn is_empty(&self) -> bool {
        self.written_at.is_empty()
    }

    /// The configured TTL.
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }
}
