//! Gossip propagation — diffusion of public records across the
//! relationship graph.
//!
//! Information spreads the way Dunbar (1996) describes village gossip:
//! along trusted edges, probabilistically, losing fidelity at every hop.
//! A selection sweep schedules single-hop [`PropagationTask`]s; delivery
//! appends a degraded copy to the target's store. Multi-hop chains emerge
//! only from later sweeps picking up the already-degraded copies, and the
//! reliability floor cuts every chain off before it becomes noise.

use std::collections::HashSet;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::PropagationConfig;
use crate::graph::RelationshipGraph;
use crate::record::MemoryRecord;
use crate::store::MemoryStore;
use crate::types::{EntityId, GameTime, Importance, MemoryId};

// ---------------------------------------------------------------------------
// Tasks
// ---------------------------------------------------------------------------

/// A scheduled single-hop diffusion of one record to one target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropagationTask {
    /// The record being spread (in the source's store).
    pub memory_id: MemoryId,
    /// Who is spreading it.
    pub source: EntityId,
    /// Who will receive a degraded copy.
    pub target: EntityId,
    /// When the hop lands.
    pub scheduled_for: GameTime,
    /// Reliability lost on this hop.
    pub reliability_decay: f32,
    /// Set once the hop has been delivered.
    pub completed: bool,
}

/// Pending-task set with cancellation and due-time draining.
///
/// Tasks pin their memory id: the store will not evict a record that an
/// undelivered task still references.
#[derive(Debug, Clone, Default)]
pub struct PropagationQueue {
    pending: Vec<PropagationTask>,
}

impl PropagationQueue {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a task to the pending set.
    pub fn schedule(&mut self, task: PropagationTask) {
        self.pending.push(task);
    }

    /// Remove and return every task due at or before `now`, in scheduling
    /// order.
    pub fn drain_due(&mut self, now: &GameTime) -> Vec<PropagationTask> {
        let mut due = Vec::new();
        let mut remaining = Vec::with_capacity(self.pending.len());
        for task in self.pending.drain(..) {
            if task.scheduled_for.tick <= now.tick {
                due.push(task);
            } else {
                remaining.push(task);
            }
        }
        self.pending = remaining;
        due
    }

    /// Whether a hop for `(memory, target)` is already pending.
    #[must_use]
    pub fn has_task(&self, memory: MemoryId, target: &EntityId) -> bool {
        self.pending
            .iter()
            .any(|t| t.memory_id == memory && t.target == *target)
    }

    /// Cancel every pending hop of one record. No partial side effects:
    /// an undelivered task simply disappears.
    pub fn cancel_memory(&mut self, memory: MemoryId) {
        self.pending.retain(|t| t.memory_id != memory);
    }

    /// Cancel every pending hop involving `subject` as source or target.
    pub fn cancel_subject(&mut self, subject: &EntityId) {
        self.pending
            .retain(|t| t.source != *subject && t.target != *subject);
    }

    /// Memory ids referenced by undelivered tasks (exempt from eviction).
    #[must_use]
    pub fn pinned_ids(&self) -> HashSet<MemoryId> {
        self.pending.iter().map(|t| t.memory_id).collect()
    }

    /// Number of pending tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether no tasks are pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Pending tasks for snapshots, in scheduling order.
    #[must_use]
    pub fn export(&self) -> Vec<PropagationTask> {
        self.pending.clone()
    }

    /// Rebuild a queue from exported tasks.
    #[must_use]
    pub fn from_export(pending: Vec<PropagationTask>) -> Self {
        Self { pending }
    }
}

// ---------------------------------------------------------------------------
// Selection
// ---------------------------------------------------------------------------

/// Chance that `record` spreads along an edge of strength `edge_score`.
///
/// `base_chance × trust × importance`, clamped to [0, 1]. Trust is the
/// edge score normalized by the configured maximum; hostile and neutral
/// edges below the minimum never reach this function.
#[must_use]
pub fn acceptance_probability(
    edge_score: f32,
    edge_max_score: f32,
    importance: Importance,
    base_chance: f32,
) -> f32 {
    let trust = if edge_max_score > 0.0 {
        (edge_score / edge_max_score).clamp(0.0, 1.0)
    } else {
        0.0
    };
    (base_chance * trust * importance.weight_factor() as f32).clamp(0.0, 1.0)
}

/// Whether a record may act as a propagation source at all.
#[must_use]
pub fn is_propagatable(record: &MemoryRecord, floor: f32) -> bool {
    record.is_public && record.reliability >= floor
}

/// Run one selection sweep: walk every subject's public records and roll
/// for each sufficiently trusted neighbor.
///
/// Subjects are visited in sorted order so a seeded RNG reproduces the
/// same schedule on every run. A `(record, target)` pair is skipped when a
/// hop is already pending, when the target already holds a copy from the
/// same origin, or when the target is the entity the record came from.
pub fn select_tasks<R: Rng>(
    store: &MemoryStore,
    graph: &RelationshipGraph,
    queue: &PropagationQueue,
    config: &PropagationConfig,
    edge_max_score: f32,
    now: &GameTime,
    rng: &mut R,
) -> Vec<PropagationTask> {
    let mut subjects: Vec<&EntityId> = store.subjects().collect();
    subjects.sort();

    let mut selected = Vec::new();
    for subject in subjects {
        let records: Vec<&MemoryRecord> = store
            .records_for(subject)
            .filter(|record| is_propagatable(record, config.reliability_floor))
            .collect();
        if records.is_empty() {
            continue;
        }

        for record in records {
            for target in graph.neighbors(subject) {
                let Some(edge) = graph.get(subject, target) else {
                    continue;
                };
                if edge.score < config.min_edge_score {
                    continue;
                }
                if record.relayed_by.as_ref() == Some(target) {
                    continue;
                }
                if queue.has_task(record.id, target)
                    || selected
                        .iter()
                        .any(|t: &PropagationTask| t.memory_id == record.id && t.target == *target)
                {
                    continue;
                }
                if store.holds_origin(target, record.origin_id()) {
                    continue;
                }

                let p = acceptance_probability(
                    edge.score,
                    edge_max_score,
                    record.importance,
                    config.base_chance,
                );
                let accepted = if config.deterministic {
                    p >= config.acceptance_threshold
                } else {
                    rng.r#gen::<f32>() < p
                };
                if !accepted {
                    continue;
                }

                selected.push(PropagationTask {
                    memory_id: record.id,
                    source: subject.clone(),
                    target: target.clone(),
                    scheduled_for: now.plus_secs(config.hop_delay_secs),
                    reliability_decay: config.reliability_decay,
                    completed: false,
                });
            }
        }
    }
    selected
}
