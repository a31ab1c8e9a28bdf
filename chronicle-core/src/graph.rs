//! Pairwise relationship graph — trust, stance, shared history.
//!
//! Edges are undirected: one shared score per entity pair, keyed by the
//! canonical (sorted) pair. Asymmetric feelings are not edges — they are
//! per-subject aggregates fed by directed events.
//!
//! `stance` is never stored independently: every write reclassifies it
//! from `score` via the configured threshold table.

use std::collections::{BTreeSet, HashMap, VecDeque};

use serde::{Deserialize, Serialize};

use crate::types::{EntityId, GameTime, MemoryId, ThresholdTable};

/// Canonical unordered pair key: `(a, b)` and `(b, a)` hash identically.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PairKey(EntityId, EntityId);

impl PairKey {
    /// Build the canonical key for a pair.
    #[must_use]
    pub fn new(a: &EntityId, b: &EntityId) -> Self {
        if a <= b {
            Self(a.clone(), b.clone())
        } else {
            Self(b.clone(), a.clone())
        }
    }
}

/// State of the relationship between two entities.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationshipEdge {
    /// First endpoint (canonical order).
    pub a: EntityId,
    /// Second endpoint (canonical order).
    pub b: EntityId,
    /// Cumulative weighted history, clamped to the configured range.
    pub score: f32,
    /// Discrete classification of `score`.
    pub stance: String,
    /// Last time the pair interacted.
    pub last_interaction: GameTime,
    /// Memory ids that contributed to this edge, oldest first, bounded.
    pub history: VecDeque<MemoryId>,
}

/// A stance reclassification on some edge.
#[derive(Debug, Clone, PartialEq)]
pub struct StanceChange {
    /// First endpoint.
    pub a: EntityId,
    /// Second endpoint.
    pub b: EntityId,
    /// Stance before the update.
    pub old_stance: String,
    /// Stance after the update.
    pub new_stance: String,
    /// Host-supplied reason for the contributing update.
    pub reason: String,
}

/// The relationship graph: edges plus an adjacency index for neighbor
/// queries.
#[derive(Debug, Clone)]
pub struct RelationshipGraph {
    edges: HashMap<PairKey, RelationshipEdge>,
    adjacency: HashMap<EntityId, BTreeSet<EntityId>>,
    min_score: f32,
    max_score: f32,
    thresholds: ThresholdTable,
    history_cap: usize,
}

impl RelationshipGraph {
    /// Create an empty graph with the given score range, stance table and
    /// per-edge history bound.
    #[must_use]
    pub fn new(
        min_score: f32,
        max_score: f32,
        thresholds: ThresholdTable,
        history_cap: usize,
    ) -> Self {
        Self {
            edges: HashMap::new(),
            adjacency: HashMap::new(),
            min_score,
            max_score,
            thresholds,
            history_cap: history_cap.max(1),
        }
    }

    /// Order-independent edge lookup.
    #[must_use]
    pub fn get(&self, a: &EntityId, b: &EntityId) -> Option<&RelationshipEdge> {
        self.edges.get(&PairKey::new(a, b))
    }

    /// Entities with a live edge to `a`.
    pub fn neighbors<'a>(&'a self, a: &EntityId) -> impl Iterator<Item = &'a EntityId> + 'a {
        self.adjacency
            .get(a)
            .into_iter()
            .flat_map(BTreeSet::iter)
    }

    /// Every edge touching `a`.
    pub fn edges_for<'a>(
        &'a self,
        a: &'a EntityId,
    ) -> impl Iterator<Item = &'a RelationshipEdge> + 'a {
        self.neighbors(a)
            .filter_map(move |other| self.edges.get(&PairKey::new(a, other)))
    }

    /// Nudge the edge between `a` and `b` by `delta`.
    ///
    /// Creates the edge at score 0 / neutral stance if absent, clamps the
    /// new score, reclassifies the stance, appends `memory_id` to the
    /// bounded history and stamps `last_interaction`. Returns the stance
    /// change, if the update crossed a threshold.
    pub fn update_edge(
        &mut self,
        a: &EntityId,
        b: &EntityId,
        delta: f32,
        reason: &str,
        memory_id: MemoryId,
        now: GameTime,
    ) -> Option<StanceChange> {
        let key = PairKey::new(a, b);
        let edge = self.edges.entry(key.clone()).or_insert_with(|| {
            let PairKey(first, second) = key;
            RelationshipEdge {
                a: first,
                b: second,
                score: 0.0,
                stance: self.thresholds.classify(0.0).to_string(),
                last_interaction: now,
                history: VecDeque::new(),
            }
        });

        self.adjacency
            .entry(a.clone())
            .or_default()
            .insert(b.clone());
        self.adjacency
            .entry(b.clone())
            .or_default()
            .insert(a.clone());

        let old_stance = edge.stance.clone();
        edge.score = (edge.score + delta).clamp(self.min_score, self.max_score);
        edge.stance = self.thresholds.classify(edge.score).to_string();
        edge.last_interaction = now;

        edge.history.push_back(memory_id);
        while edge.history.len() > self.history_cap {
            edge.history.pop_front();
        }

        (edge.stance != old_stance).then(|| StanceChange {
            a: edge.a.clone(),
            b: edge.b.clone(),
            old_stance,
            new_stance: edge.stance.clone(),
            reason: reason.to_string(),
        })
    }

    /// Remove an entity and every edge touching it.
    pub fn remove_subject(&mut self, subject: &EntityId) {
        let others = self.adjacency.remove(subject).unwrap_or_default();
        for other in &others {
            self.edges.remove(&PairKey::new(subject, other));
            if let Some(neighbors) = self.adjacency.get_mut(other) {
                neighbors.remove(subject);
                if neighbors.is_empty() {
                    self.adjacency.remove(other);
                }
            }
        }
    }

    /// Number of live edges.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Every edge, sorted by pair for deterministic snapshots.
    #[must_use]
    pub fn export(&self) -> Vec<RelationshipEdge> {
        let mut edges: Vec<RelationshipEdge> = self.edges.values().cloned().collect();
        edges.sort_by(|x, y| (&x.a, &x.b).cmp(&(&y.a, &y.b)));
        edges
    }

    /// Rebuild a graph from exported edges.
    #[must_use]
    pub fn from_export(
        edges: Vec<RelationshipEdge>,
        min_score: f32,
        max_score: f32,
        thresholds: ThresholdTable,
        history_cap: usize,
    ) -> Self {
        let mut graph = Self::new(min_score, max_score, thresholds, history_cap);
        for edge in edges {
            graph
                .adjacency
                .entry(edge.a.clone())
                .or_default()
                .insert(edge.b.clone());
            graph
                .adjacency
                .entry(edge.b.clone())
                .or_default()
                .insert(edge.a.clone());
            graph.edges.insert(PairKey::new(&edge.a, &edge.b), edge);
        }
        graph
    }
}
