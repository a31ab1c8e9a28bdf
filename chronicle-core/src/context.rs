//! Context retrieval — relevance-ranked snapshots for generation.
//!
//! The ranking combines four factors, in the spirit of the Stanford
//! Generative Agents retrieval function:
//!
//!   relevance = importance × recency × topic_match × place_match
//!
//! Recency uses the same exponential forgetting curve as aggregate decay.
//! A context is a read-only snapshot: building one never mutates store,
//! graph or aggregate state.

use std::collections::BTreeMap;

use ordered_float::OrderedFloat;

use crate::aggregate::{AggregateEngine, AggregateState};
use crate::graph::{RelationshipEdge, RelationshipGraph};
use crate::record::MemoryRecord;
use crate::store::{MemoryFilter, MemoryStore};
use crate::types::{EntityId, GameTime, PlaceId};

/// Recency decay constant per game-hour.
const RECENCY_LAMBDA: f64 = 0.05;

/// Place affinity when the record has no place at all.
const PLACE_UNKNOWN_FACTOR: f64 = 0.5;
/// Place affinity when the record happened somewhere else.
const PLACE_MISMATCH_FACTOR: f64 = 0.25;

/// Parameters for [`build_context`].
#[derive(Debug, Clone)]
pub struct ContextQuery {
    /// Topic tag to focus on; records without it are excluded.
    pub topic: Option<String>,
    /// Place to weight toward (soft preference, not a filter).
    pub place: Option<PlaceId>,
    /// Only consider records at most this many game-seconds old.
    pub window_secs: Option<u64>,
    /// Maximum memories returned.
    pub max_memories: usize,
}

impl Default for ContextQuery {
    fn default() -> Self {
        Self {
            topic: None,
            place: None,
            window_secs: None,
            max_memories: 8,
        }
    }
}

/// Per-factor breakdown of a relevance score (for tuning and inspectors).
#[derive(Debug, Clone, Copy)]
pub struct RelevanceBreakdown {
    /// Importance factor.
    pub importance: f64,
    /// Recency factor.
    pub recency: f64,
    /// Topic match factor.
    pub topic: f64,
    /// Place match factor.
    pub place: f64,
}

impl RelevanceBreakdown {
    /// Product of all factors.
    #[must_use]
    pub fn total(&self) -> f64 {
        self.importance * self.recency * self.topic * self.place
    }
}

/// One ranked memory in a context.
#[derive(Debug, Clone)]
pub struct RankedMemory {
    /// The record (cloned out of the store).
    pub record: MemoryRecord,
    /// Combined relevance score.
    pub relevance: f64,
    /// Per-factor breakdown.
    pub breakdown: RelevanceBreakdown,
}

/// Read-only snapshot handed to downstream generators.
#[derive(Debug, Clone)]
pub struct Context {
    /// Whose context this is.
    pub subject: EntityId,
    /// When the snapshot was taken.
    pub generated_at: GameTime,
    /// The subject's aggregate states by name.
    pub aggregates: BTreeMap<String, AggregateState>,
    /// Top-ranked memories, most relevant first.
    pub memories: Vec<RankedMemory>,
    /// Every relationship edge touching the subject.
    pub edges: Vec<RelationshipEdge>,
}

/// Build a generation context for `subject`.
///
/// Ranking ties break on higher importance, then recency, then insertion
/// order, so results are stable across calls.
#[must_use]
pub fn build_context(
    store: &MemoryStore,
    aggregates: &AggregateEngine,
    graph: &RelationshipGraph,
    subject: &EntityId,
    query: &ContextQuery,
    now: &GameTime,
) -> Context {
    let filter = MemoryFilter {
        window_secs: query.window_secs,
        ..MemoryFilter::default()
    };

    let mut ranked: Vec<RankedMemory> = store
        .query(subject, &filter, now)
        .map(|record| {
            let breakdown = RelevanceBreakdown {
                importance: record.importance.weight_factor(),
                recency: recency_decay(now.hours_since(&record.timestamp)),
                topic: topic_match(record, query.topic.as_deref()),
                place: place_match(record, query.place.as_ref()),
            };
            RankedMemory {
                record: record.clone(),
                relevance: breakdown.total(),
                breakdown,
            }
        })
        .filter(|ranked| ranked.relevance > 0.0)
        .collect();

    ranked.sort_by(|a, b| {
        OrderedFloat(b.relevance)
            .cmp(&OrderedFloat(a.relevance))
            .then(b.record.importance.cmp(&a.record.importance))
            .then(b.record.timestamp.tick.cmp(&a.record.timestamp.tick))
            .then(a.record.seq.cmp(&b.record.seq))
    });
    ranked.truncate(query.max_memories);

    let mut edges: Vec<RelationshipEdge> = graph.edges_for(subject).cloned().collect();
    edges.sort_by(|x, y| (&x.a, &x.b).cmp(&(&y.a, &y.b)));

    Context {
        subject: subject.clone(),
        generated_at: *now,
        aggregates: aggregates.all_for(subject).cloned().unwrap_or_default(),
        memories: ranked,
        edges,
    }
}

/// Exponential recency factor, 1.0 for a brand-new record.
fn recency_decay(hours: f64) -> f64 {
    (-RECENCY_LAMBDA * hours.max(0.0)).exp()
}

/// Topic factor: no topic means everything matches; with a topic, only
/// tagged records survive (factor 0 excludes the rest).
fn topic_match(record: &MemoryRecord, topic: Option<&str>) -> f64 {
    match topic {
        None => 1.0,
        Some(topic) => {
            if record.tags.contains(topic) {
                1.0
            } else {
                0.0
            }
        }
    }
}

/// Place factor: a soft preference for memories of the queried place.
fn place_match(record: &MemoryRecord, place: Option<&PlaceId>) -> f64 {
    match (place, record.place.as_ref()) {
        (None, _) => 1.0,
        (Some(query), Some(record_place)) if query == record_place => 1.0,
        (Some(_), None) => PLACE_UNKNOWN_FACTOR,
        (Some(_), Some(_)) => PLACE_MISMATCH_FACTOR,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::AggregateEngine;
    use crate::record::EventInput;
    use crate::types::{Importance, MemoryKind, ThresholdTable};
    use std::collections::HashSet;

    fn ts(tick: u64) -> GameTime {
        GameTime::now(tick)
    }

    fn empty_graph() -> RelationshipGraph {
        RelationshipGraph::new(
            -100.0,
            100.0,
            ThresholdTable::new(&[(20.0, "friendly"), (-20.0, "neutral")], "hostile"),
            8,
        )
    }

    fn tagged(subject: &str, tag: &str, importance: Importance, tick: u64) -> crate::record::MemoryRecord {
        EventInput::new(subject, MemoryKind::Dialogue, 0.3, 2.0)
            .with_tags([tag])
            .with_importance(importance)
            .at(ts(tick))
            .into_record(ts(tick))
            .expect("valid record")
    }

    #[test]
    fn topic_queries_exclude_unrelated_memories() {
        let mut store = MemoryStore::new(64);
        let pinned = HashSet::new();
        for i in 0..5u64 {
            store.insert(tagged("player", "betrayal", Importance::Notable, 100 + i), &pinned);
        }
        for i in 0..10u64 {
            store.insert(tagged("player", "weather", Importance::Notable, 200 + i), &pinned);
        }

        let query = ContextQuery {
            topic: Some("betrayal".to_string()),
            window_secs: Some(3_600),
            max_memories: 16,
            ..ContextQuery::default()
        };
        let context = build_context(
            &store,
            &AggregateEngine::new(vec![]),
            &empty_graph(),
            &"player".into(),
            &query,
            &ts(1_000),
        );

        assert_eq!(context.memories.len(), 5);
        assert!(context
            .memories
            .iter()
            .all(|m| m.record.tags.contains("betrayal")));
        // Relevance descending.
        for pair in context.memories.windows(2) {
            assert!(pair[0].relevance >= pair[1].relevance);
        }
    }

    #[test]
    fn ties_break_on_importance_then_recency_then_insertion() {
        let mut store = MemoryStore::new(64);
        let pinned = HashSet::new();

        // Same tick and importance for b/c: insertion order decides.
        store.insert(tagged("player", "war", Importance::Minor, 500), &pinned);
        store.insert(tagged("player", "war", Importance::Major, 500), &pinned);
        store.insert(tagged("player", "war", Importance::Major, 500), &pinned);

        let context = build_context(
            &store,
            &AggregateEngine::new(vec![]),
            &empty_graph(),
            &"player".into(),
            &ContextQuery::default(),
            &ts(500),
        );

        assert_eq!(context.memories.len(), 3);
        assert_eq!(context.memories[0].record.importance, Importance::Major);
        assert_eq!(context.memories[1].record.importance, Importance::Major);
        assert!(context.memories[0].record.seq < context.memories[1].record.seq);
        assert_eq!(context.memories[2].record.importance, Importance::Minor);
    }

    #[test]
    fn recency_outranks_age_at_equal_importance() {
        let mut store = MemoryStore::new(64);
        let pinned = HashSet::new();
        store.insert(tagged("player", "war", Importance::Notable, 0), &pinned);
        store.insert(tagged("player", "war", Importance::Notable, 72_000), &pinned);

        let context = build_context(
            &store,
            &AggregateEngine::new(vec![]),
            &empty_graph(),
            &"player".into(),
            &ContextQuery::default(),
            &ts(72_000),
        );
        assert_eq!(context.memories[0].record.timestamp.tick, 72_000);
    }

    #[test]
    fn place_preference_is_soft() {
        let mut store = MemoryStore::new(64);
        let pinned = HashSet::new();
        store.insert(
            EventInput::new("player", MemoryKind::Combat, -0.5, 5.0)
                .with_place("rust_harbor")
                .at(ts(100))
                .into_record(ts(100))
                .expect("valid"),
            &pinned,
        );
        store.insert(
            EventInput::new("player", MemoryKind::Combat, -0.5, 5.0)
                .with_place("ember_keep")
                .at(ts(100))
                .into_record(ts(100))
                .expect("valid"),
            &pinned,
        );

        let query = ContextQuery {
            place: Some("rust_harbor".into()),
            ..ContextQuery::default()
        };
        let context = build_context(
            &store,
            &AggregateEngine::new(vec![]),
            &empty_graph(),
            &"player".into(),
            &query,
            &ts(200),
        );

        // Both survive; the matching place ranks first.
        assert_eq!(context.memories.len(), 2);
        assert_eq!(
            context.memories[0].record.place,
            Some(PlaceId::from("rust_harbor"))
        );
        assert!(context.memories[0].relevance > context.memories[1].relevance);
    }

    #[test]
    fn max_memories_truncates() {
        let mut store = MemoryStore::new(64);
        let pinned = HashSet::new();
        for i in 0..20u64 {
            store.insert(tagged("player", "war", Importance::Notable, i * 10), &pinned);
        }

        let query = ContextQuery {
            max_memories: 5,
            ..ContextQuery::default()
        };
        let context = build_context(
            &store,
            &AggregateEngine::new(vec![]),
            &empty_graph(),
            &"player".into(),
            &query,
            &ts(1_000),
        );
        assert_eq!(context.memories.len(), 5);
    }

    #[test]
    fn unknown_subject_yields_empty_context() {
        let store = MemoryStore::new(64);
        let context = build_context(
            &store,
            &AggregateEngine::new(vec![]),
            &empty_graph(),
            &"stranger".into(),
            &ContextQuery::default(),
            &ts(100),
        );
        assert!(context.memories.is_empty());
        assert!(context.aggregates.is_empty());
        assert!(context.edges.is_empty());
    }
}
