//! The chronicle engine — one owner for all narrative-memory state.
//!
//! A [`Chronicle`] owns the memory store, aggregate engine, relationship
//! graph, propagation queue and scheduler, and exposes the public API the
//! host game talks to: `record_event` to write, the query family to read,
//! and `tick` to drive maintenance.
//!
//! Threading: single-threaded cooperative. Every operation runs to
//! completion on the caller's thread; a host embedding this in a threaded
//! runtime must serialize access with one exclusive lock around the whole
//! instance, because a single append can touch store, aggregate and edge
//! state together.

use std::time::Instant;

use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::{debug, warn};

use crate::aggregate::{AggregateEngine, AggregateState};
use crate::config::ChronicleConfig;
use crate::context::{Context, ContextQuery, build_context};
use crate::error::Result;
use crate::graph::{RelationshipEdge, RelationshipGraph};
use crate::metrics::{ChronicleCounters, CounterSnapshot, PassTimings};
use crate::narrate::{Narrator, TemplateNarrator};
use crate::notify::{ChronicleEvent, EventHub, ListenerHandle};
use crate::propagation::{PropagationQueue, select_tasks};
use crate::record::{EventInput, MemoryRecord};
use crate::scheduler::{Activity, Scheduler};
use crate::snapshot::{SNAPSHOT_VERSION, Snapshot};
use crate::store::{Appended, MemoryFilter, MemoryStore};
use crate::types::{EntityId, GameTime, MemoryId};

/// The narrative memory engine.
pub struct Chronicle {
    config: ChronicleConfig,
    clock: GameTime,
    store: MemoryStore,
    aggregates: AggregateEngine,
    graph: RelationshipGraph,
    queue: PropagationQueue,
    scheduler: Scheduler,
    hub: EventHub,
    rng: StdRng,
    counters: ChronicleCounters,
    timings: PassTimings,
    narrator: Option<Box<dyn Narrator>>,
}

impl std::fmt::Debug for Chronicle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chronicle")
            .field("clock", &self.clock)
            .field("records", &self.store.total_count())
            .field("edges", &self.graph.edge_count())
            .field("pending_hops", &self.queue.len())
            .finish_non_exhaustive()
    }
}

impl Chronicle {
    /// Create an engine with the default configuration, starting at tick 0.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(ChronicleConfig::default())
    }

    /// Create an engine with an explicit configuration.
    #[must_use]
    pub fn with_config(config: ChronicleConfig) -> Self {
        let store = MemoryStore::new(config.memory.max_records_per_subject);
        let aggregates = AggregateEngine::new(config.aggregates.clone());
        let graph = RelationshipGraph::new(
            config.edge.min_score,
            config.edge.max_score,
            config.edge.thresholds.clone(),
            config.edge.history_cap,
        );
        let scheduler = Scheduler::new(&config.scheduler);
        let rng = StdRng::seed_from_u64(config.propagation.rng_seed);

        Self {
            config,
            clock: GameTime::now(0),
            store,
            aggregates,
            graph,
            queue: PropagationQueue::new(),
            scheduler,
            hub: EventHub::new(),
            rng,
            counters: ChronicleCounters::new(),
            timings: PassTimings::new(),
            narrator: None,
        }
    }

    // ------------------------------------------------------------------
    // Ingestion
    // ------------------------------------------------------------------

    /// Record a gameplay event — the sole write entry point.
    ///
    /// Appends a first-hand memory record for the subject, folds it into
    /// every contributing aggregate, and nudges the subject's edges toward
    /// each participant. Level and stance crossings are announced before
    /// this returns.
    ///
    /// # Errors
    /// Returns [`crate::ChronicleError::InvalidRecord`] for an empty
    /// subject or a non-finite weight/valence.
    pub fn record_event(&mut self, input: EventInput) -> Result<MemoryId> {
        let record = input.into_record(self.clock)?;
        let appended = self.ingest_record(record);
        Ok(appended.id)
    }

    fn ingest_record(&mut self, record: MemoryRecord) -> Appended {
        for change in self.aggregates.apply_record(&record) {
            ChronicleCounters::bump(&self.counters.level_changes);
            self.hub.emit(&ChronicleEvent::LevelChanged(change));
        }

        let factor = self.config.edge.kind_factor(record.kind);
        if factor != 0.0 {
            let delta = record.weight * record.valence * factor;
            let others: Vec<EntityId> = record
                .participants
                .iter()
                .filter(|p| **p != record.subject)
                .cloned()
                .collect();
            for other in others {
                let change = self.graph.update_edge(
                    &record.subject,
                    &other,
                    delta,
                    &record.kind.to_string(),
                    record.id,
                    record.timestamp,
                );
                if let Some(change) = change {
                    ChronicleCounters::bump(&self.counters.stance_changes);
                    self.hub.emit(&ChronicleEvent::StanceChanged(change));
                }
            }
        }

        let pinned = self.queue.pinned_ids();
        let appended = self.store.insert(record, &pinned);
        ChronicleCounters::bump(&self.counters.records_appended);
        ChronicleCounters::add(&self.counters.records_evicted, appended.evicted.len() as u64);
        appended
    }

    // ------------------------------------------------------------------
    // Queries (read-only)
    // ------------------------------------------------------------------

    /// Records held by `subject` matching `filter`, most recent first.
    pub fn query_memories<'a>(
        &'a self,
        subject: &EntityId,
        filter: &'a MemoryFilter,
    ) -> impl Iterator<Item = &'a MemoryRecord> + 'a {
        self.store.query(subject, filter, &self.clock)
    }

    /// One record by id.
    #[must_use]
    pub fn get_memory(&self, id: MemoryId) -> Option<&MemoryRecord> {
        self.store.get(id)
    }

    /// A subject's aggregate state by name.
    #[must_use]
    pub fn get_aggregate(&self, subject: &EntityId, aggregate: &str) -> Option<&AggregateState> {
        self.aggregates.get(subject, aggregate)
    }

    /// The relationship edge between two entities, either order.
    #[must_use]
    pub fn get_edge(&self, a: &EntityId, b: &EntityId) -> Option<&RelationshipEdge> {
        self.graph.get(a, b)
    }

    /// Entities with a live edge to `a`.
    pub fn neighbors<'a>(&'a self, a: &EntityId) -> impl Iterator<Item = &'a EntityId> + 'a {
        self.graph.neighbors(a)
    }

    /// Build a relevance-ranked generation context for `subject`.
    #[must_use]
    pub fn build_context(&self, subject: &EntityId, query: &ContextQuery) -> Context {
        build_context(
            &self.store,
            &self.aggregates,
            &self.graph,
            subject,
            query,
            &self.clock,
        )
    }

    /// Render a context into prose with the host's narrator, falling back
    /// to the built-in template narrator when none is installed.
    #[must_use]
    pub fn narrate_context(&self, context: &Context) -> String {
        match &self.narrator {
            Some(narrator) => narrator.narrate(context),
            None => TemplateNarrator.narrate(context),
        }
    }

    /// Install a host-supplied narrator.
    pub fn set_narrator(&mut self, narrator: Box<dyn Narrator>) {
        self.narrator = Some(narrator);
    }

    /// Current engine clock.
    #[must_use]
    pub fn clock(&self) -> GameTime {
        self.clock
    }

    /// Counter snapshot for dashboards.
    #[must_use]
    pub fn counters(&self) -> CounterSnapshot {
        self.counters.snapshot()
    }

    /// Recent maintenance-pass timings.
    #[must_use]
    pub fn timings(&self) -> &PassTimings {
        &self.timings
    }

    // ------------------------------------------------------------------
    // Notifications
    // ------------------------------------------------------------------

    /// Register a callback for level, stance and propagation events.
    pub fn subscribe<F>(&mut self, listener: F) -> ListenerHandle
    where
        F: Fn(&ChronicleEvent) + 'static,
    {
        self.hub.subscribe(listener)
    }

    /// Drop a previously registered callback.
    pub fn unsubscribe(&mut self, handle: ListenerHandle) {
        self.hub.unsubscribe(handle)
    }

    // ------------------------------------------------------------------
    // Maintenance tick
    // ------------------------------------------------------------------

    /// Advance the engine to `now` and run whatever maintenance is due.
    ///
    /// Within one tick the order is fixed: decay, then delivery of due
    /// hops, then propagation selection, then analysis — so later passes
    /// always see post-decay aggregates. A failing pass is logged and
    /// skipped for this cycle; the scheduler always returns to `Idle`.
    pub fn tick(&mut self, now: GameTime) {
        if now.tick > self.clock.tick {
            self.clock = now;
        }
        let clock = self.clock;

        let due = self.scheduler.poll(&clock);

        if due.contains(&Activity::Decay) {
            self.run_activity(Activity::Decay, clock);
        }

        // Hops land on the tick that reaches their scheduled time, whether
        // or not a selection sweep is due.
        self.deliver_due_hops(clock);

        if due.contains(&Activity::Propagation) {
            self.run_activity(Activity::Propagation, clock);
        }
        if due.contains(&Activity::Analysis) {
            self.run_activity(Activity::Analysis, clock);
        }
    }

    fn run_activity(&mut self, activity: Activity, clock: GameTime) {
        if !self.scheduler.begin(activity) {
            return;
        }
        let start = Instant::now();
        let result = match activity {
            Activity::Decay => self.run_decay_pass(clock),
            Activity::Propagation => self.run_selection_pass(clock),
            Activity::Analysis => self.run_analysis_pass(clock),
        };
        if let Err(error) = result {
            warn!(pass = activity.label(), %error, "Maintenance pass failed; skipping this cycle");
        }
        self.timings
            .record(activity.label(), start.elapsed().as_micros() as u64);
        self.scheduler.complete(activity, clock);
    }

    fn run_decay_pass(&mut self, clock: GameTime) -> Result<()> {
        let changes = self.aggregates.decay_sweep(clock);
        let crossings = changes.len();
        for change in changes {
            ChronicleCounters::bump(&self.counters.level_changes);
            self.hub.emit(&ChronicleEvent::LevelChanged(change));
        }
        ChronicleCounters::bump(&self.counters.decay_passes);
        debug!(crossings, "Decay sweep completed");
        Ok(())
    }

    fn run_selection_pass(&mut self, clock: GameTime) -> Result<()> {
        let tasks = select_tasks(
            &self.store,
            &self.graph,
            &self.queue,
            &self.config.propagation,
            self.config.edge.max_score,
            &clock,
            &mut self.rng,
        );
        let scheduled = tasks.len();
        for task in tasks {
            self.queue.schedule(task);
        }
        ChronicleCounters::add(&self.counters.hops_scheduled, scheduled as u64);
        debug!(scheduled, pending = self.queue.len(), "Propagation sweep completed");
        Ok(())
    }

    fn deliver_due_hops(&mut self, clock: GameTime) {
        let due = self.queue.drain_due(&clock);
        for mut task in due {
            let Some(parent) = self.store.get(task.memory_id).cloned() else {
                // Source record gone (subject removed). Best-effort: drop.
                ChronicleCounters::bump(&self.counters.hops_dropped);
                debug!(memory = %task.memory_id, target = %task.target, "Dropping hop: source record missing");
                continue;
            };

            let child = parent.derived_for(
                task.target.clone(),
                task.source.clone(),
                task.reliability_decay,
                clock,
            );
            let memory = child.id;
            let reliability = child.reliability;
            self.ingest_record(child);
            task.completed = true;

            ChronicleCounters::bump(&self.counters.hops_delivered);
            self.hub.emit(&ChronicleEvent::MemoryPropagated {
                memory,
                source: task.source,
                target: task.target,
                reliability,
            });
        }
    }

    fn run_analysis_pass(&mut self, clock: GameTime) -> Result<()> {
        let window = MemoryFilter {
            window_secs: Some(self.config.analysis.window_secs),
            ..MemoryFilter::default()
        };

        let mut subjects: Vec<EntityId> = self.store.subjects().cloned().collect();
        subjects.sort();

        for subject in subjects {
            let pulse: f64 = self
                .store
                .query(&subject, &window, &clock)
                .map(|record| {
                    f64::from(record.weight) * f64::from(record.valence) * f64::from(record.reliability)
                })
                .sum();
            if pulse == 0.0 {
                continue;
            }

            let tone = pulse as f32 * self.config.analysis.scale;
            let change = self.aggregates.set_value(
                &subject,
                &self.config.analysis.tone_aggregate,
                tone,
                clock,
            );
            if let Some(change) = change {
                ChronicleCounters::bump(&self.counters.level_changes);
                self.hub.emit(&ChronicleEvent::LevelChanged(change));
            }
        }
        ChronicleCounters::bump(&self.counters.analysis_passes);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Subject lifecycle
    // ------------------------------------------------------------------

    /// Forget a subject entirely: its records, aggregates, edges, and any
    /// pending hops it would have sent or received.
    pub fn remove_subject(&mut self, subject: &EntityId) {
        self.queue.cancel_subject(subject);
        self.store.remove_subject(subject);
        self.aggregates.remove_subject(subject);
        self.graph.remove_subject(subject);
        debug!(subject = %subject, "Removed subject");
    }

    // ------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------

    /// Capture the complete engine state.
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        ChronicleCounters::bump(&self.counters.snapshots_taken);
        Snapshot {
            version: SNAPSHOT_VERSION,
            saved_at: chrono::Utc::now(),
            clock: self.clock,
            records: self.store.export(),
            edges: self.graph.export(),
            aggregates: self.aggregates.export(),
            pending: self.queue.export(),
            schedule: self.scheduler.export(),
        }
    }

    /// Rebuild an engine from a snapshot.
    ///
    /// Builds the new instance completely before returning, so a caller
    /// replacing an existing engine keeps its current state when this
    /// fails.
    ///
    /// # Errors
    /// Returns [`crate::ChronicleError::CorruptState`] for an unsupported
    /// snapshot version.
    pub fn from_snapshot(config: ChronicleConfig, snapshot: Snapshot) -> Result<Self> {
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(crate::ChronicleError::CorruptState(format!(
                "unsupported snapshot version {}",
                snapshot.version
            )));
        }

        let mut engine = Self::with_config(config);
        engine.clock = snapshot.clock;
        engine.store = MemoryStore::from_export(
            snapshot.records,
            engine.config.memory.max_records_per_subject,
        );
        engine.graph = RelationshipGraph::from_export(
            snapshot.edges,
            engine.config.edge.min_score,
            engine.config.edge.max_score,
            engine.config.edge.thresholds.clone(),
            engine.config.edge.history_cap,
        );
        engine.aggregates =
            AggregateEngine::from_export(engine.config.aggregates.clone(), snapshot.aggregates);
        engine.queue = PropagationQueue::from_export(snapshot.pending);
        engine.scheduler.restore(&snapshot.schedule);
        Ok(engine)
    }
}

impl Default for Chronicle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PropagationConfig;
    use crate::types::{Importance, MemoryKind};
    use std::cell::RefCell;
    use std::rc::Rc;

    fn ts(tick: u64) -> GameTime {
        GameTime::now(tick)
    }

    fn gossip_ready_config() -> ChronicleConfig {
        ChronicleConfig {
            propagation: PropagationConfig {
                deterministic: true,
                acceptance_threshold: 0.1,
                base_chance: 0.8,
                min_edge_score: 10.0,
                hop_delay_secs: 30,
                reliability_decay: 0.3,
                reliability_floor: 0.2,
                ..PropagationConfig::default()
            },
            ..ChronicleConfig::default()
        }
    }

    #[test]
    fn record_event_feeds_store_aggregates_and_edges() {
        let mut engine = Chronicle::new();
        engine.tick(ts(100));

        let id = engine
            .record_event(
                EventInput::new("npc_42", MemoryKind::CompanionInteraction, 0.9, 30.0)
                    .with_participants(["player"])
                    .with_tags(["rescue"]),
            )
            .expect("valid event");

        assert!(engine.get_memory(id).is_some());

        let loyalty = engine
            .get_aggregate(&"npc_42".into(), "loyalty")
            .expect("loyalty state");
        assert!((loyalty.value - 27.0).abs() < 1e-4);
        assert_eq!(loyalty.level, "friendly");

        // Edge delta: 30 × 0.9 × 0.5 (default kind factor) = 13.5.
        let edge = engine
            .get_edge(&"npc_42".into(), &"player".into())
            .expect("edge");
        assert!((edge.score - 13.5).abs() < 1e-4);
        assert_eq!(edge.history.len(), 1);
        assert_eq!(
            engine.neighbors(&"npc_42".into()).collect::<Vec<_>>(),
            vec![&EntityId::from("player")]
        );
    }

    #[test]
    fn listeners_hear_level_changes() {
        let mut engine = Chronicle::new();
        let heard = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&heard);
        engine.subscribe(move |event| {
            if let ChronicleEvent::LevelChanged(change) = event {
                sink.borrow_mut()
                    .push((change.aggregate.clone(), change.new_level.clone()));
            }
        });

        engine
            .record_event(EventInput::new(
                "npc_1",
                MemoryKind::MoralChoice,
                1.0,
                50.0,
            ))
            .expect("valid event");

        let heard = heard.borrow();
        assert!(
            heard.contains(&("loyalty".to_string(), "friendly".to_string())),
            "expected a loyalty crossing, heard {heard:?}"
        );
    }

    #[test]
    fn gossip_flows_end_to_end() {
        let mut engine = Chronicle::with_config(gossip_ready_config());
        engine.tick(ts(0));

        // A strong edge between storyteller and listener.
        engine
            .record_event(
                EventInput::new("npc_a", MemoryKind::CompanionInteraction, 1.0, 100.0)
                    .with_participants(["npc_b"]),
            )
            .expect("valid event");

        // A legendary public deed held by npc_a.
        engine
            .record_event(
                EventInput::new("npc_a", MemoryKind::Combat, -0.8, 20.0)
                    .with_importance(Importance::Legendary)
                    .with_tags(["dragon"])
                    .with_public(true),
            )
            .expect("valid event");

        let delivered = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&delivered);
        engine.subscribe(move |event| {
            if let ChronicleEvent::MemoryPropagated {
                target, reliability, ..
            } = event
            {
                sink.borrow_mut().push((target.clone(), *reliability));
            }
        });

        // First tick past the propagation interval schedules the hop...
        engine.tick(ts(200));
        assert!(engine.counters().hops_scheduled >= 1);

        // ...and a later tick past the hop delay delivers it.
        engine.tick(ts(300));
        let delivered = delivered.borrow();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].0, EntityId::from("npc_b"));
        assert!((delivered[0].1 - 0.7).abs() < 1e-5);

        // The copy is queryable from npc_b's store and keeps its tags.
        let filter = MemoryFilter::default();
        let copies: Vec<&MemoryRecord> = engine
            .query_memories(&"npc_b".into(), &filter)
            .filter(|r| r.tags.contains("dragon"))
            .collect();
        assert_eq!(copies.len(), 1);
        assert_eq!(copies[0].relayed_by, Some(EntityId::from("npc_a")));
        assert!(!copies[0].participants.contains(&EntityId::from("npc_a")));
    }

    #[test]
    fn removing_a_subject_cancels_its_pending_hops() {
        let mut engine = Chronicle::with_config(gossip_ready_config());
        engine.tick(ts(0));

        engine
            .record_event(
                EventInput::new("npc_a", MemoryKind::CompanionInteraction, 1.0, 100.0)
                    .with_participants(["npc_b"]),
            )
            .expect("valid event");
        engine
            .record_event(
                EventInput::new("npc_a", MemoryKind::Combat, 0.9, 25.0)
                    .with_importance(Importance::Legendary)
                    .with_public(true),
            )
            .expect("valid event");

        engine.tick(ts(200));
        assert!(engine.counters().hops_scheduled >= 1);

        engine.remove_subject(&"npc_b".into());
        engine.tick(ts(500));

        assert_eq!(engine.counters().hops_delivered, 0);
        assert_eq!(
            engine
                .query_memories(&"npc_b".into(), &MemoryFilter::default())
                .count(),
            0
        );
    }

    #[test]
    fn analysis_pass_scores_tone() {
        let mut engine = Chronicle::new();
        engine.tick(ts(0));

        for i in 0..3u64 {
            engine
                .record_event(
                    EventInput::new("player", MemoryKind::Combat, -0.9, 10.0)
                        .at(ts(100 + i)),
                )
                .expect("valid event");
        }

        // Past the analysis interval: the pass runs and tone goes grim.
        engine.tick(ts(1_000));
        let tone = engine
            .get_aggregate(&"player".into(), "tone")
            .expect("tone state");
        assert!(tone.value < -15.0, "three dark fights should darken tone, got {}", tone.value);
        // One pass on the first tick, one at ts(1000).
        assert_eq!(engine.counters().analysis_passes, 2);
    }

    #[test]
    fn snapshot_round_trip_preserves_engine_state() {
        let mut engine = Chronicle::with_config(gossip_ready_config());
        engine.tick(ts(0));
        engine
            .record_event(
                EventInput::new("npc_a", MemoryKind::MoralChoice, -0.8, 20.0)
                    .with_participants(["player"])
                    .with_tags(["betrayal"]),
            )
            .expect("valid event");
        engine.tick(ts(200));

        let snapshot = engine.snapshot();
        let bytes = snapshot.to_json_bytes().expect("encode");
        let decoded = Snapshot::from_json_bytes(&bytes).expect("decode");
        let restored =
            Chronicle::from_snapshot(gossip_ready_config(), decoded).expect("restore");

        assert_eq!(restored.clock().tick, engine.clock().tick);
        assert_eq!(
            restored
                .query_memories(&"npc_a".into(), &MemoryFilter::default())
                .count(),
            engine
                .query_memories(&"npc_a".into(), &MemoryFilter::default())
                .count()
        );
        let original = engine
            .get_aggregate(&"npc_a".into(), "loyalty")
            .expect("loyalty");
        let reloaded = restored
            .get_aggregate(&"npc_a".into(), "loyalty")
            .expect("loyalty");
        assert!((original.value - reloaded.value).abs() < f32::EPSILON);
        assert_eq!(original.level, reloaded.level);
        assert!(
            restored
                .get_edge(&"npc_a".into(), &"player".into())
                .is_some()
        );
    }

    #[test]
    fn narrate_uses_custom_narrator_when_installed() {
        struct Bard;
        impl Narrator for Bard {
            fn narrate(&self, context: &Context) -> String {
                format!("A song of {}", context.subject)
            }
        }

        let mut engine = Chronicle::new();
        let context = engine.build_context(&"player".into(), &ContextQuery::default());
        assert!(engine.narrate_context(&context).contains("no story"));

        engine.set_narrator(Box::new(Bard));
        assert_eq!(
            engine.narrate_context(&context),
            "A song of player"
        );
    }

    #[test]
    fn clock_never_runs_backward() {
        let mut engine = Chronicle::new();
        engine.tick(ts(1_000));
        engine.tick(ts(500));
        assert_eq!(engine.clock().tick, 1_000);
    }
}
