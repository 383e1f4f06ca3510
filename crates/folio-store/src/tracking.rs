//! Per-session write-order tracking.
//!
//! Each session owns one tracking record at `{session_id}/tracking`. It is
//! the single point of coordination for a session: version assignment,
//! eviction and removal all happen by swapping in a new record with
//! compare-and-swap, so they are atomic per session.
//!
//! A write goes through two commits. [`SessionTracking::reserve`] hands out
//! a version number without making anything visible, and once the payload
//! has landed [`SessionTracking::promote`] appends it to the live list and
//! evicts over quota. A failed payload write therefore never evicts.

use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::key::{PageId, SessionId, VersionSeq, page_key};

/// Reference to one stored page version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryRef {
    /// Page the version belongs to.
    pub page_id: PageId,

    /// Version sequence number.
    pub version: VersionSeq,

    /// When the version was recorded.
    pub written_at: DateTime<Utc>,
}

impl EntryRef {
    /// Backend key of the referenced payload.
    pub fn key(&self, session_id: &SessionId) -> String {
        page_key(session_id, self.page_id, self.version)
    }

    fn is(&self, page_id: PageId, version: VersionSeq) -> bool {
        self.page_id == page_id && self.version == version
    }
}

/// A version number handed out by [`SessionTracking::reserve`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reservation {
    /// Reserved version.
    pub version: VersionSeq,

    /// Generation of the record the version was reserved in.
    pub generation: u64,
}

/// Tracking record for one session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionTracking {
    /// Live entries, oldest write first.
    pub live: VecDeque<EntryRef>,

    /// Last version handed out, for pages that still have live versions or
    /// were reserved since the last prune.
    pub last_versions: BTreeMap<PageId, VersionSeq>,

    /// Highest version ever pruned from `last_versions`. Pages without an
    /// entry continue above it, so a version is never handed out twice.
    #[serde(default)]
    pub retired_floor: VersionSeq,

    /// Bumped when the session is removed. Reservations from an earlier
    /// generation can no longer be promoted.
    #[serde(default)]
    pub generation: u64,

    /// Entries no longer live whose payload may still exist in the backend.
    #[serde(default)]
    pub pending_purge: Vec<EntryRef>,
}

impl SessionTracking {
    /// Decode a record read from the backend.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Encode the record for the backend.
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Hand out the next version of `page_id`. Nothing becomes live yet.
    pub fn reserve(&mut self, page_id: PageId) -> Reservation {
        let version = self
            .last_versions
            .get(&page_id)
            .copied()
            .unwrap_or(self.retired_floor)
            .next();
        self.last_versions.insert(page_id, version);
        Reservation {
            version,
            generation: self.generation,
        }
    }

    /// Append a reserved version as the newest live entry and evict the
    /// oldest entries beyond `max_versions`.
    ///
    /// Evicted entries move to `pending_purge` and are also returned.
    /// Returns `None` if the session was removed since the reservation.
    pub fn promote(
        &mut self,
        page_id: PageId,
        reservation: Reservation,
        max_versions: usize,
        now: DateTime<Utc>,
    ) -> Option<Vec<EntryRef>> {
        if reservation.generation != self.generation {
            return None;
        }

        self.live.push_back(EntryRef {
            page_id,
            version: reservation.version,
            written_at: now,
        });

        let mut evicted = Vec::new();
        while self.live.len() > max_versions {
            match self.live.pop_front() {
                Some(oldest) => evicted.push(oldest),
                None => break,
            }
        }
        self.pending_purge.extend(evicted.iter().cloned());
        self.prune_versions();

        Some(evicted)
    }

    /// Whether the given version is live.
    pub fn is_live(&self, page_id: PageId, version: VersionSeq) -> bool {
        self.live.iter().any(|e| e.is(page_id, version))
    }

    /// The live entry with the highest version for `page_id`.
    pub fn latest(&self, page_id: PageId) -> Option<&EntryRef> {
        self.live
            .iter()
            .filter(|e| e.page_id == page_id)
            .max_by_key(|e| e.version)
    }

    /// Drop every live version of `page_id`, moving them to `pending_purge`.
    pub fn remove_page(&mut self, page_id: PageId) -> Vec<EntryRef> {
        let (removed, kept): (VecDeque<_>, VecDeque<_>) =
            self.live.drain(..).partition(|e| e.page_id == page_id);
        self.live = kept;
        let removed: Vec<EntryRef> = removed.into();
        self.pending_purge.extend(removed.iter().cloned());
        if !removed.is_empty() {
            self.prune_versions();
        }
        removed
    }

    /// Reset the record after its session was removed.
    ///
    /// Only the version floor survives, and the generation moves on so that
    /// writes still in flight are not promoted.
    pub fn retire(&mut self) {
        let highest = self.last_versions.values().copied().max();
        self.retired_floor = self.retired_floor.max(highest.unwrap_or_default());
        self.last_versions.clear();
        self.live.clear();
        self.pending_purge.clear();
        self.generation += 1;
    }

    /// Whether the record holds nothing but its version floor.
    pub fn is_retired(&self) -> bool {
        self.live.is_empty() && self.pending_purge.is_empty() && self.last_versions.is_empty()
    }

    /// Forget purge entries whose payloads are confirmed deleted.
    pub fn clear_purged(&mut self, purged: &[EntryRef]) {
        self.pending_purge
            .retain(|p| !purged.iter().any(|d| d.is(p.page_id, p.version)));
    }

    /// Every entry whose payload may exist: live first, then pending purge.
    pub fn all_entries(&self) -> impl Iterator<Item = &EntryRef> {
        self.live.iter().chain(self.pending_purge.iter())
    }

    /// Drop version counters of pages with no live versions, folding them
    /// into `retired_floor`.
    fn prune_versions(&mut self) {
        let live = &self.live;
        let mut floor = self.retired_floor;
        self.last_versions.retain(|page_id, version| {
            let keep = live.iter().any(|e| e.page_id == *page_id);
            if !keep {
                floor = floor.max(*version);
            }
            keep
        });
        self.retired_floor = floor;
    }
}
