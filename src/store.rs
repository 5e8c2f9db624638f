//! Accepted-snapshot store.
//!
//! Lives for the whole process and is shared by every cycle. Entries are
//! keyed by (coin, observed precision) and only ever inserted or
//! overwritten, never removed.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;

use crate::schema::Level;

/// Last accepted book for one (coin, precision).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotEntry {
    /// Local receive time (ms) at which this entry was accepted
    pub last_update: i64,

    /// Venue-side book time (ms), 0 if the venue omitted it
    pub venue_time: u64,

    /// [bids, asks]
    pub levels: (Vec<Level>, Vec<Level>),
}

/// What happened to an offered observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offer {
    Accepted,
    /// Existing entry is not yet older than the staleness threshold.
    Fresh { age_ms: i64 },
}

/// coin → observed precision → entry. Serializes to the committed blob.
#[derive(Debug, Default, Clone, Serialize)]
#[serde(transparent)]
pub struct SnapshotStore {
    books: BTreeMap<String, BTreeMap<usize, SnapshotEntry>>,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Timestamp of the stored entry, 0 when absent.
    pub fn last_update(&self, coin: &str, precision: usize) -> i64 {
        self.books
            .get(coin)
            .and_then(|by_prec| by_prec.get(&precision))
            .map_or(0, |e| e.last_update)
    }

    pub fn get(&self, coin: &str, precision: usize) -> Option<&SnapshotEntry> {
        self.books.get(coin).and_then(|by_prec| by_prec.get(&precision))
    }

    /// Stores `entry` only if `entry.last_update - stored > stale_after_ms`.
    pub fn offer(
        &mut self,
        coin: &str,
        precision: usize,
        entry: SnapshotEntry,
        stale_after_ms: i64,
    ) -> Offer {
        let age_ms = entry.last_update - self.last_update(coin, precision);
        if age_ms <= stale_after_ms {
            return Offer::Fresh { age_ms };
        }

        self.books
            .entry(coin.to_string())
            .or_default()
            .insert(precision, entry);
        Offer::Accepted
    }

    pub fn len(&self) -> usize {
        self.books.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Process-wide handle to the store.
///
/// The lock is only taken for the synchronous handling of one message or
/// to serialize a commit, never across an `.await`.
#[derive(Debug, Clone, Default)]
pub struct SharedStore(Arc<Mutex<SnapshotStore>>);

impl SharedStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock(&self) -> MutexGuard<'_, SnapshotStore> {
        // A panic while holding the lock cannot leave an entry half
        // written: `offer` replaces whole entries.
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
