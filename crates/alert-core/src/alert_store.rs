//! Concurrently readable alert index with periodic reload.
//!
//! The store keeps the current [`AlertIndex`] behind an `Arc` in a small
//! mutex-protected slot:
//! - `lookup` clones the `Arc` under the lock and copies the bucket after
//!   releasing it (copy-on-read),
//! - `reload` runs the store query and builds a fresh index with no lock
//!   held, then takes the lock only to publish the new pointer
//!   (swap-on-write),
//! - `remove` copies the published index outside the lock (buckets are
//!   shared `Arc`s, so only the edited bucket is cloned) and publishes the
//!   copy if no other writer got in first.
//!
//! Ids removed after firing are remembered so that a reload racing with
//! the `mark_triggered` write cannot re-insert them. A remembered id is
//! forgotten as soon as a reload no longer reports it as pending.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::condition::{AlertCondition, AlertId};
use crate::error::StoreError;
use crate::repository::AlertRepository;

/// Instrument → pending conditions.
///
/// Buckets are shared between copies of the index; cloning an index never
/// copies conditions.
#[derive(Debug, Clone, Default)]
pub struct AlertIndex {
    by_instrument: HashMap<String, Arc<Vec<AlertCondition>>>,
}

impl AlertIndex {
    pub fn new() -> Self {
        AlertIndex::default()
    }

    /// Group conditions by instrument, keeping their input order.
    pub fn from_conditions<I>(conditions: I) -> Self
    where
        I: IntoIterator<Item = AlertCondition>,
    {
        let mut by_instrument: HashMap<String, Vec<AlertCondition>> = HashMap::new();
        for condition in conditions {
            by_instrument
                .entry(condition.instrument.clone())
                .or_default()
                .push(condition);
        }
        AlertIndex {
            by_instrument: by_instrument
                .into_iter()
                .map(|(instrument, bucket)| (instrument, Arc::new(bucket)))
                .collect(),
        }
    }

    /// Conditions for `instrument` (empty if none).
    pub fn get(&self, instrument: &str) -> &[AlertCondition] {
        self.by_instrument
            .get(instrument)
            .map(|bucket| bucket.as_slice())
            .unwrap_or(&[])
    }

    /// Remove `ids` from one instrument bucket. Returns how many were removed.
    pub fn remove_ids(&mut self, instrument: &str, ids: &HashSet<AlertId>) -> usize {
        let Some(bucket) = self.by_instrument.get_mut(instrument) else {
            return 0;
        };
        if !bucket.iter().any(|c| ids.contains(&c.id)) {
            return 0;
        }
        let bucket = Arc::make_mut(bucket);
        let before = bucket.len();
        bucket.retain(|c| !ids.contains(&c.id));
        let removed = before - bucket.len();
        if bucket.is_empty() {
            self.by_instrument.remove(instrument);
        }
        removed
    }

    /// Remove `ids` from every bucket. Returns the ids that were present.
    pub fn exclude(&mut self, ids: &HashSet<AlertId>) -> HashSet<AlertId> {
        let mut found = HashSet::new();
        if ids.is_empty() {
            return found;
        }
        self.by_instrument.retain(|_, bucket| {
            if !bucket.iter().any(|c| ids.contains(&c.id)) {
                return true;
            }
            Arc::make_mut(bucket).retain(|c| {
                let hit = ids.contains(&c.id);
                if hit {
                    found.insert(c.id);
                }
                !hit
            });
            !bucket.is_empty()
        });
        found
    }

    /// Instruments with at least one pending condition, sorted.
    pub fn instruments(&self) -> Vec<String> {
        let mut out: Vec<String> = self.by_instrument.keys().cloned().collect();
        out.sort();
        out
    }

    /// Total number of conditions.
    pub fn len(&self) -> usize {
        self.by_instrument.values().map(|bucket| bucket.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_instrument.is_empty()
    }
}

#[derive(Debug, Default)]
struct Slot {
    index: Arc<AlertIndex>,
    fired: HashSet<AlertId>,
}

/// Owner of the live alert index.
pub struct AlertStore {
    repository: Arc<dyn AlertRepository>,
    slot: Mutex<Slot>,
}

impl AlertStore {
    /// Create a store with an empty index. Call [`AlertStore::reload`] to
    /// populate it.
    pub fn new(repository: Arc<dyn AlertRepository>) -> Self {
        AlertStore {
            repository,
            slot: Mutex::new(Slot::default()),
        }
    }

    /// Refresh the index from the durable store.
    ///
    /// On error the previously published index stays in place. Returns the
    /// number of conditions in the newly published index.
    pub async fn reload(&self) -> Result<usize, StoreError> {
        let pending = self.repository.query_pending().await?;

        let mut fresh = AlertIndex::from_conditions(pending.into_iter().filter(|c| {
            match c.validate() {
                Ok(()) => true,
                Err(e) => {
                    warn!(error = %e, "skipping unusable alert record");
                    false
                }
            }
        }));

        // Filter the ids known to have fired before the query without
        // holding the lock; ids that fired while the query was in flight are
        // handled in the publish window below.
        let fired_before = self.slot.lock().fired.clone();
        let mut still_pending = fresh.exclude(&fired_before);

        let mut slot = self.slot.lock();
        let late: HashSet<AlertId> = slot.fired.difference(&fired_before).copied().collect();
        still_pending.extend(fresh.exclude(&late));
        if !still_pending.is_empty() {
            debug!(count = still_pending.len(), "holding back alerts awaiting triggered state");
        }

        let count = fresh.len();
        slot.index = Arc::new(fresh);
        slot.fired = still_pending;
        Ok(count)
    }

    /// Snapshot copy of the pending conditions for `instrument`.
    pub fn lookup(&self, instrument: &str) -> Vec<AlertCondition> {
        let index = Arc::clone(&self.slot.lock().index);
        index.get(instrument).to_vec()
    }

    /// Drop fired conditions from the live index so they cannot fire again
    /// before the next reload.
    pub fn remove(&self, instrument: &str, ids: &HashSet<AlertId>) -> usize {
        if ids.is_empty() {
            return 0;
        }
        self.slot.lock().fired.extend(ids.iter().copied());

        loop {
            let current = self.snapshot();
            if !current.get(instrument).iter().any(|c| ids.contains(&c.id)) {
                return 0;
            }
            let mut next = AlertIndex::clone(&current);
            let removed = next.remove_ids(instrument, ids);

            let mut slot = self.slot.lock();
            if Arc::ptr_eq(&slot.index, &current) {
                slot.index = Arc::new(next);
                return removed;
            }
            // A reload or another remove published in between; redo on top of it.
        }
    }

    /// The currently published index.
    pub fn snapshot(&self) -> Arc<AlertIndex> {
        Arc::clone(&self.slot.lock().index)
    }

    /// Instruments with pending conditions in the current index.
    pub fn instruments(&self) -> Vec<String> {
        self.snapshot().instruments()
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }
}
