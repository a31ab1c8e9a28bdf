//! Decayed scalar aggregates — loyalty, corruption, alignment, tone.
//!
//! Every aggregate is a clamped scalar plus a discrete level derived from
//! an ordered threshold table. New records nudge the value by
//! `weight × valence × kind_multiplier`; between events the value relaxes
//! toward its baseline, exponentially or linearly, and never overshoots.
//!
//! Exponential relaxation follows the same forgetting-curve shape the
//! memory literature uses for retention (Ebbinghaus, 1885): the distance
//! to baseline is multiplied by `e^(-rate · Δt)`.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::record::MemoryRecord;
use crate::types::{EntityId, GameTime, MemoryId, MemoryKind, ThresholdTable};

// ---------------------------------------------------------------------------
// Aggregate specification
// ---------------------------------------------------------------------------

/// How an aggregate relaxes toward its baseline between events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecayModel {
    /// Distance to baseline shrinks by `e^(-rate · hours)`.
    Exponential,
    /// Value moves `rate · hours` units toward baseline, clamping there.
    Linear,
}

/// Static definition of one aggregate (shared by all subjects).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateSpec {
    /// Aggregate name ("loyalty", "corruption", ...).
    pub name: String,
    /// Lower clamp bound.
    pub min: f32,
    /// Upper clamp bound.
    pub max: f32,
    /// Neutral resting value decay relaxes toward.
    pub baseline: f32,
    /// Decay rate per game-hour.
    pub decay_rate: f32,
    /// Relaxation shape.
    pub decay_model: DecayModel,
    /// Level classification table.
    pub thresholds: ThresholdTable,
    /// Per-kind contribution multipliers.
    #[serde(default)]
    pub kind_multipliers: BTreeMap<MemoryKind, f32>,
    /// Multiplier for kinds absent from the table.
    pub default_multiplier: f32,
}

impl AggregateSpec {
    /// Contribution multiplier for a record kind.
    #[must_use]
    pub fn multiplier(&self, kind: MemoryKind) -> f32 {
        self.kind_multipliers
            .get(&kind)
            .copied()
            .unwrap_or(self.default_multiplier)
    }

    fn clamp(&self, value: f32) -> f32 {
        value.clamp(self.min, self.max)
    }
}

// ---------------------------------------------------------------------------
// Per-subject state
// ---------------------------------------------------------------------------

/// Derived scalar state for one (subject, aggregate) pair.
///
/// `level` is always the classification of `value` under the aggregate's
/// threshold table; it is recomputed on every write, never patched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateState {
    /// Current clamped value.
    pub value: f32,
    /// Discrete level derived from `value`.
    pub level: String,
    /// Last time the value changed (event or decay).
    pub last_update: GameTime,
}

/// A threshold crossing: the aggregate moved into a different level band.
#[derive(Debug, Clone, PartialEq)]
pub struct LevelChange {
    /// Whose aggregate changed.
    pub subject: EntityId,
    /// Which aggregate.
    pub aggregate: String,
    /// Level before the change.
    pub old_level: String,
    /// Level after the change.
    pub new_level: String,
    /// The record that caused the crossing (`None` for decay).
    pub trigger: Option<MemoryId>,
}

/// Aggregates for one subject, exported for snapshots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubjectAggregates {
    /// The subject.
    pub subject: EntityId,
    /// All of the subject's aggregate states, by aggregate name.
    pub states: BTreeMap<String, AggregateState>,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Owns every [`AggregateState`] and applies events and decay to them.
#[derive(Debug, Clone)]
pub struct AggregateEngine {
    specs: Vec<AggregateSpec>,
    states: HashMap<EntityId, BTreeMap<String, AggregateState>>,
}

impl AggregateEngine {
    /// Create an engine for the given aggregate definitions.
    #[must_use]
    pub fn new(specs: Vec<AggregateSpec>) -> Self {
        Self {
            specs,
            states: HashMap::new(),
        }
    }

    /// The configured aggregate definitions.
    #[must_use]
    pub fn specs(&self) -> &[AggregateSpec] {
        &self.specs
    }

    /// Current state of one aggregate for a subject.
    #[must_use]
    pub fn get(&self, subject: &EntityId, aggregate: &str) -> Option<&AggregateState> {
        self.states.get(subject)?.get(aggregate)
    }

    /// All aggregate states for a subject.
    #[must_use]
    pub fn all_for(&self, subject: &EntityId) -> Option<&BTreeMap<String, AggregateState>> {
        self.states.get(subject)
    }

    /// Fold a new record into every aggregate it contributes to.
    ///
    /// `value += weight × valence × kind_multiplier`, clamped, reclassified.
    /// States are created lazily on first contribution.
    pub fn apply_record(&mut self, record: &MemoryRecord) -> Vec<LevelChange> {
        let mut changes = Vec::new();
        for spec in &self.specs {
            let multiplier = spec.multiplier(record.kind);
            let subject_states = self.states.entry(record.subject.clone()).or_default();
            if multiplier == 0.0 && !subject_states.contains_key(&spec.name) {
                continue;
            }

            let state = subject_states.entry(spec.name.clone()).or_insert_with(|| {
                AggregateState {
                    value: spec.baseline,
                    level: spec.thresholds.classify(spec.baseline).to_string(),
                    last_update: record.timestamp,
                }
            });

            let old_level = state.level.clone();
            state.value = spec.clamp(state.value + record.weight * record.valence * multiplier);
            state.level = spec.thresholds.classify(state.value).to_string();
            if state.last_update < record.timestamp {
                state.last_update = record.timestamp;
            }

            if state.level != old_level {
                changes.push(LevelChange {
                    subject: record.subject.clone(),
                    aggregate: spec.name.clone(),
                    old_level,
                    new_level: state.level.clone(),
                    trigger: Some(record.id),
                });
            }
        }
        changes
    }

    /// Overwrite an aggregate's value outright (analysis passes use this for
    /// derived aggregates such as narrative tone).
    pub fn set_value(
        &mut self,
        subject: &EntityId,
        aggregate: &str,
        value: f32,
        now: GameTime,
    ) -> Option<LevelChange> {
        let spec = self.specs.iter().find(|s| s.name == aggregate)?;
        let state = self
            .states
            .entry(subject.clone())
            .or_default()
            .entry(spec.name.clone())
            .or_insert_with(|| AggregateState {
                value: spec.baseline,
                level: spec.thresholds.classify(spec.baseline).to_string(),
                last_update: now,
            });

        let old_level = state.level.clone();
        state.value = spec.clamp(value);
        state.level = spec.thresholds.classify(state.value).to_string();
        state.last_update = now;

        (state.level != old_level).then(|| LevelChange {
            subject: subject.clone(),
            aggregate: spec.name.clone(),
            old_level,
            new_level: state.level.clone(),
            trigger: None,
        })
    }

    /// Relax every aggregate of one subject toward its baseline.
    pub fn apply_decay(&mut self, subject: &EntityId, now: GameTime) -> Vec<LevelChange> {
        let mut changes = Vec::new();
        let Some(subject_states) = self.states.get_mut(subject) else {
            return changes;
        };

        for spec in &self.specs {
            let Some(state) = subject_states.get_mut(&spec.name) else {
                continue;
            };
            let hours = now.hours_since(&state.last_update);
            if hours <= 0.0 {
                continue;
            }

            let offset = state.value - spec.baseline;
            let decayed_offset = match spec.decay_model {
                DecayModel::Exponential => {
                    offset * (-f64::from(spec.decay_rate) * hours).exp() as f32
                }
                DecayModel::Linear => {
                    let step = (f64::from(spec.decay_rate) * hours) as f32;
                    if offset.abs() <= step {
                        0.0
                    } else {
                        offset - step.copysign(offset)
                    }
                }
            };

            let old_level = state.level.clone();
            state.value = spec.clamp(spec.baseline + decayed_offset);
            state.level = spec.thresholds.classify(state.value).to_string();
            state.last_update = now;

            if state.level != old_level {
                changes.push(LevelChange {
                    subject: subject.clone(),
                    aggregate: spec.name.clone(),
                    old_level,
                    new_level: state.level.clone(),
                    trigger: None,
                });
            }
        }
        changes
    }

    /// Run decay for every subject with state.
    pub fn decay_sweep(&mut self, now: GameTime) -> Vec<LevelChange> {
        let subjects: Vec<EntityId> = self.states.keys().cloned().collect();
        let mut changes = Vec::new();
        for subject in subjects {
            changes.extend(self.apply_decay(&subject, now));
        }
        changes
    }

    /// Export every subject's states for snapshots.
    #[must_use]
    pub fn export(&self) -> Vec<SubjectAggregates> {
        let mut out: Vec<SubjectAggregates> = self
            .states
            .iter()
            .map(|(subject, states)| SubjectAggregates {
                subject: subject.clone(),
                states: states.clone(),
            })
            .collect();
        out.sort_by(|a, b| a.subject.cmp(&b.subject));
        out
    }

    /// Rebuild from exported states.
    #[must_use]
    pub fn from_export(specs: Vec<AggregateSpec>, exported: Vec<SubjectAggregates>) -> Self {
        let mut engine = Self::new(specs);
        for entry in exported {
            engine.states.insert(entry.subject, entry.states);
        }
        engine
    }

    /// Drop all aggregate state for a subject.
    pub fn remove_subject(&mut self, subject: &EntityId) {
        self.states.remove(subject);
    }
}
