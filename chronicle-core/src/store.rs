//! Append-only, capacity-bounded memory store.
//!
//! Records live in one flat id-indexed map with a per-subject insertion
//! log. The store owns every [`MemoryRecord`] in the engine; other
//! components (edges, pending propagation tasks) hold memory *ids* only.
//!
//! Capacity is enforced per subject: once a subject exceeds its cap, the
//! least important, weakest, oldest record is evicted — unless it is pinned
//! by an undelivered propagation task, in which case the next-worst record
//! goes. If every record of a subject is pinned the store temporarily
//! overflows rather than break a pending delivery.

use std::collections::{BTreeSet, HashMap, HashSet};

use ordered_float::OrderedFloat;
use tracing::debug;

use crate::record::MemoryRecord;
use crate::types::{EntityId, GameTime, Importance, MemoryId, MemoryKind};

/// Result of inserting a record: the assigned id plus anything evicted to
/// stay under the capacity cap.
#[derive(Debug)]
pub struct Appended {
    /// Id of the inserted record.
    pub id: MemoryId,
    /// Records evicted by this insert (usually empty).
    pub evicted: Vec<MemoryId>,
}

/// Filter for [`MemoryStore::query`]. All criteria are optional and
/// combined with AND; an empty filter matches everything.
#[derive(Debug, Clone, Default)]
pub struct MemoryFilter {
    /// Only these kinds.
    pub kinds: Option<BTreeSet<MemoryKind>>,
    /// At least one of these tags must be present.
    pub any_tags: Option<BTreeSet<String>>,
    /// Minimum importance (inclusive).
    pub min_importance: Option<Importance>,
    /// Only records no older than this many game-seconds.
    pub window_secs: Option<u64>,
    /// Only records eligible for propagation.
    pub public_only: bool,
}

impl MemoryFilter {
    /// Whether `record` passes the filter at time `now`.
    #[must_use]
    pub fn matches(&self, record: &MemoryRecord, now: &GameTime) -> bool {
        if let Some(kinds) = &self.kinds {
            if !kinds.contains(&record.kind) {
                return false;
            }
        }
        if let Some(tags) = &self.any_tags {
            if !tags.iter().any(|t| record.tags.contains(t)) {
                return false;
            }
        }
        if let Some(min) = self.min_importance {
            if record.importance < min {
                return false;
            }
        }
        if let Some(window) = self.window_secs {
            if now.seconds_since(&record.timestamp) > window as f64 {
                return false;
            }
        }
        if self.public_only && !record.is_public {
            return false;
        }
        true
    }
}

/// The memory store — exclusive owner of all [`MemoryRecord`]s.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    records: HashMap<MemoryId, MemoryRecord>,
    /// Per-subject record ids in insertion order (timestamps are monotone,
    /// so insertion order is also time order).
    by_subject: HashMap<EntityId, Vec<MemoryId>>,
    max_per_subject: usize,
    next_seq: u64,
}

impl MemoryStore {
    /// Create an empty store with the given per-subject cap.
    #[must_use]
    pub fn new(max_per_subject: usize) -> Self {
        Self {
            records: HashMap::new(),
            by_subject: HashMap::new(),
            max_per_subject: max_per_subject.max(1),
            next_seq: 0,
        }
    }

    /// Insert an already-built record, assigning its insertion sequence and
    /// enforcing the subject's capacity. `pinned` ids are exempt from
    /// eviction.
    pub fn insert(&mut self, mut record: MemoryRecord, pinned: &HashSet<MemoryId>) -> Appended {
        record.seq = self.next_seq;
        self.next_seq += 1;

        let id = record.id;
        let subject = record.subject.clone();
        self.by_subject.entry(subject.clone()).or_default().push(id);
        self.records.insert(id, record);

        let evicted = self.enforce_capacity(&subject, pinned);
        Appended { id, evicted }
    }

    /// O(1) lookup by id.
    #[must_use]
    pub fn get(&self, id: MemoryId) -> Option<&MemoryRecord> {
        self.records.get(&id)
    }

    /// Records held by `subject` matching `filter`, most recent first.
    ///
    /// The iterator borrows the store; call again to restart.
    pub fn query<'a>(
        &'a self,
        subject: &EntityId,
        filter: &'a MemoryFilter,
        now: &'a GameTime,
    ) -> impl Iterator<Item = &'a MemoryRecord> + 'a {
        self.by_subject
            .get(subject)
            .map(Vec::as_slice)
            .unwrap_or_default()
            .iter()
            .rev()
            .filter_map(|id| self.records.get(id))
            .filter(move |record| filter.matches(record, now))
    }

    /// All records held by `subject`, oldest first.
    pub fn records_for<'a>(
        &'a self,
        subject: &EntityId,
    ) -> impl Iterator<Item = &'a MemoryRecord> + 'a {
        self.by_subject
            .get(subject)
            .map(Vec::as_slice)
            .unwrap_or_default()
            .iter()
            .filter_map(|id| self.records.get(id))
    }

    /// Whether `subject` already holds a copy descending from `origin`.
    /// Used by propagation selection to stop gossip echoing back and forth.
    #[must_use]
    pub fn holds_origin(&self, subject: &EntityId, origin: MemoryId) -> bool {
        self.records_for(subject)
            .any(|record| record.id == origin || record.origin_id() == origin)
    }

    /// Every subject with at least one record.
    pub fn subjects(&self) -> impl Iterator<Item = &EntityId> {
        self.by_subject.keys()
    }

    /// Number of records held by `subject`.
    #[must_use]
    pub fn count_for(&self, subject: &EntityId) -> usize {
        self.by_subject.get(subject).map_or(0, Vec::len)
    }

    /// Total records across all subjects.
    #[must_use]
    pub fn total_count(&self) -> usize {
        self.records.len()
    }

    /// Drop a subject and all of its records, returning the removed ids.
    pub fn remove_subject(&mut self, subject: &EntityId) -> Vec<MemoryId> {
        let ids = self.by_subject.remove(subject).unwrap_or_default();
        for id in &ids {
            self.records.remove(id);
        }
        ids
    }

    /// All records in the store, in insertion order. Snapshot support.
    #[must_use]
    pub fn export(&self) -> Vec<MemoryRecord> {
        let mut all: Vec<MemoryRecord> = self.records.values().cloned().collect();
        all.sort_by_key(|record| record.seq);
        all
    }

    /// Rebuild a store from exported records, preserving sequence numbers.
    #[must_use]
    pub fn from_export(mut records: Vec<MemoryRecord>, max_per_subject: usize) -> Self {
        records.sort_by_key(|record| record.seq);
        let next_seq = records.last().map_or(0, |record| record.seq + 1);

        let mut store = Self {
            records: HashMap::with_capacity(records.len()),
            by_subject: HashMap::new(),
            max_per_subject: max_per_subject.max(1),
            next_seq,
        };
        for record in records {
            store
                .by_subject
                .entry(record.subject.clone())
                .or_default()
                .push(record.id);
            store.records.insert(record.id, record);
        }
        store
    }

    /// Evict until `subject` is back under capacity. Eviction order: lowest
    /// importance, then weakest |weight|, then oldest. Pinned ids survive.
    fn enforce_capacity(
        &mut self,
        subject: &EntityId,
        pinned: &HashSet<MemoryId>,
    ) -> Vec<MemoryId> {
        let mut evicted = Vec::new();
        loop {
            let Some(ids) = self.by_subject.get(subject) else {
                break;
            };
            if ids.len() <= self.max_per_subject {
                break;
            }

            let victim = ids
                .iter()
                .filter(|id| !pinned.contains(id))
                .filter_map(|id| self.records.get(id))
                .min_by_key(|record| {
                    (
                        record.importance,
                        OrderedFloat(record.weight.abs()),
                        record.timestamp.tick,
                        record.seq,
                    )
                })
                .map(|record| record.id);

            let Some(victim) = victim else {
                // Everything pinned by pending deliveries; overflow for now.
                break;
            };

            self.records.remove(&victim);
            if let Some(ids) = self.by_subject.get_mut(subject) {
                ids.retain(|id| *id != victim);
            }
            debug!(subject = %subject, memory = %victim, "Evicted memory record");
            evicted.push(victim);
        }
        evicted
    }
}
