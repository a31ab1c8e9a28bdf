//! Memory records — timestamped, weighted facts about an entity.
//!
//! A [`MemoryRecord`] is immutable once created: `subject`, `kind` and
//! `timestamp` never change, and `reliability` only ever decreases (each
//! gossip hop derives a *new*, less reliable copy rather than mutating the
//! original).

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::{ChronicleError, Result};
use crate::types::{EntityId, GameTime, Importance, MemoryId, MemoryKind, PlaceId};

/// A single remembered fact, held by `subject`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRecord {
    /// Unique identifier, assigned on insert.
    pub id: MemoryId,
    /// The entity that holds this memory.
    pub subject: EntityId,
    /// Event classification; routes into aggregates and edges.
    pub kind: MemoryKind,
    /// Retention priority.
    pub importance: Importance,
    /// Emotional/alignment polarity (-1.0 to +1.0).
    pub valence: f32,
    /// Magnitude of impact, independent of polarity.
    pub weight: f32,
    /// When the event occurred (game time).
    pub timestamp: GameTime,
    /// Topic/keyword tags for context matching.
    pub tags: BTreeSet<String>,
    /// Where the event occurred, if anywhere in particular.
    pub place: Option<PlaceId>,
    /// Other entities involved in the event.
    pub participants: BTreeSet<EntityId>,
    /// How trustworthy this record is (1.0 = first-hand fact).
    /// Degrades with each gossip hop; never increases.
    pub reliability: f32,
    /// Whether this record may spread to other entities.
    pub is_public: bool,
    /// Who passed this record on, for propagated copies.
    /// Provenance only — deliberately kept out of `participants`.
    pub relayed_by: Option<EntityId>,
    /// The first-hand record this copy ultimately descends from.
    /// `None` for first-hand records.
    pub origin: Option<MemoryId>,
    /// Store-assigned insertion counter; stable tie-break for ranking.
    pub seq: u64,
}

impl MemoryRecord {
    /// The root of this record's gossip chain (itself, for first-hand facts).
    #[must_use]
    pub fn origin_id(&self) -> MemoryId {
        self.origin.unwrap_or(self.id)
    }

    /// Whether the record came straight from the horse's mouth.
    #[must_use]
    pub fn is_first_hand(&self) -> bool {
        self.relayed_by.is_none()
    }

    /// Derive a propagated copy of this record for `target`'s store.
    ///
    /// The copy keeps kind, tags, place, participants and publicness, takes
    /// a reliability hit of `reliability_decay`, and has its weight scaled
    /// down by the new reliability. `relayed_by` records who passed it on.
    #[must_use]
    pub fn derived_for(
        &self,
        target: EntityId,
        relayed_by: EntityId,
        reliability_decay: f32,
        received_at: GameTime,
    ) -> Self {
        let reliability = (self.reliability * (1.0 - reliability_decay)).clamp(0.0, 1.0);
        Self {
            id: MemoryId::new(),
            subject: target,
            kind: self.kind,
            importance: self.importance,
            valence: self.valence,
            weight: self.weight * reliability,
            timestamp: received_at,
            tags: self.tags.clone(),
            place: self.place.clone(),
            participants: self.participants.clone(),
            reliability,
            is_public: self.is_public,
            relayed_by: Some(relayed_by),
            origin: Some(self.origin_id()),
            seq: 0, // reassigned on insert
        }
    }
}

/// Ingestion payload for [`crate::engine::Chronicle::record_event`] — the
/// sole write entry point used by surrounding gameplay systems.
#[derive(Debug, Clone)]
pub struct EventInput {
    /// The entity that will hold the memory.
    pub subject: EntityId,
    /// Event classification.
    pub kind: MemoryKind,
    /// Emotional/alignment polarity (-1.0 to +1.0, clamped).
    pub valence: f32,
    /// Magnitude of impact; must be finite.
    pub weight: f32,
    /// Topic/keyword tags.
    pub tags: BTreeSet<String>,
    /// Where the event occurred.
    pub place: Option<PlaceId>,
    /// Other entities involved.
    pub participants: BTreeSet<EntityId>,
    /// Retention priority; defaults to [`Importance::Notable`].
    pub importance: Importance,
    /// Override propagation eligibility. When `None`, big public-facing
    /// events (major combat, moral choices, faction moves, world events)
    /// spread by default and everything else stays private.
    pub is_public: Option<bool>,
    /// Event time; defaults to the engine clock at ingestion.
    pub timestamp: Option<GameTime>,
}

impl EventInput {
    /// Start an event with the mandatory fields.
    #[must_use]
    pub fn new(subject: impl Into<EntityId>, kind: MemoryKind, valence: f32, weight: f32) -> Self {
        Self {
            subject: subject.into(),
            kind,
            valence,
            weight,
            tags: BTreeSet::new(),
            place: None,
            participants: BTreeSet::new(),
            importance: Importance::default(),
            is_public: None,
            timestamp: None,
        }
    }

    /// Attach topic tags.
    #[must_use]
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    /// Attach the place the event happened at.
    #[must_use]
    pub fn with_place(mut self, place: impl Into<PlaceId>) -> Self {
        self.place = Some(place.into());
        self
    }

    /// Attach the other entities involved.
    #[must_use]
    pub fn with_participants<I, E>(mut self, participants: I) -> Self
    where
        I: IntoIterator<Item = E>,
        E: Into<EntityId>,
    {
        self.participants
            .extend(participants.into_iter().map(Into::into));
        self
    }

    /// Set the retention priority.
    #[must_use]
    pub fn with_importance(mut self, importance: Importance) -> Self {
        self.importance = importance;
        self
    }

    /// Force propagation eligibility on or off.
    #[must_use]
    pub fn with_public(mut self, is_public: bool) -> Self {
        self.is_public = Some(is_public);
        self
    }

    /// Pin the event to an explicit game time.
    #[must_use]
    pub fn at(mut self, timestamp: GameTime) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Validate and build a first-hand [`MemoryRecord`].
    ///
    /// # Errors
    /// Returns [`ChronicleError::InvalidRecord`] if the subject id is empty
    /// or the weight is not finite.
    pub fn into_record(self, default_time: GameTime) -> Result<MemoryRecord> {
        if self.subject.is_empty() {
            return Err(ChronicleError::InvalidRecord {
                reason: "subject id is empty".to_string(),
            });
        }
        if !self.weight.is_finite() {
            return Err(ChronicleError::InvalidRecord {
                reason: format!("weight is not finite: {}", self.weight),
            });
        }
        if !self.valence.is_finite() {
            return Err(ChronicleError::InvalidRecord {
                reason: format!("valence is not finite: {}", self.valence),
            });
        }

        let is_public = self
            .is_public
            .unwrap_or_else(|| default_publicness(self.kind, self.importance));

        Ok(MemoryRecord {
            id: MemoryId::new(),
            subject: self.subject,
            kind: self.kind,
            importance: self.importance,
            valence: self.valence.clamp(-1.0, 1.0),
            weight: self.weight,
            timestamp: self.timestamp.unwrap_or(default_time),
            tags: self.tags,
            place: self.place,
            participants: self.participants,
            reliability: 1.0,
            is_public,
            relayed_by: None,
            origin: None,
            seq: 0, // reassigned on insert
        })
    }
}

/// Default propagation eligibility: big, outward-facing events spread.
fn default_publicness(kind: MemoryKind, importance: Importance) -> bool {
    importance >= Importance::Major
        && matches!(
            kind,
            MemoryKind::Combat
                | MemoryKind::MoralChoice
                | MemoryKind::FactionAction
                | MemoryKind::WorldEvent
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(tick: u64) -> GameTime {
        GameTime::now(tick)
    }

    #[test]
    fn valence_is_clamped() {
        let record = EventInput::new("npc_1", MemoryKind::Dialogue, 4.0, 1.0)
            .into_record(ts(100))
            .expect("valid record");
        assert!((record.valence - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn empty_subject_rejected() {
        let result = EventInput::new("", MemoryKind::Dialogue, 0.0, 1.0).into_record(ts(100));
        assert!(matches!(
            result,
            Err(ChronicleError::InvalidRecord { .. })
        ));
    }

    #[test]
    fn non_finite_weight_rejected() {
        let result =
            EventInput::new("npc_1", MemoryKind::Combat, 0.5, f32::NAN).into_record(ts(100));
        assert!(matches!(
            result,
            Err(ChronicleError::InvalidRecord { .. })
        ));
    }

    #[test]
    fn major_combat_is_public_by_default() {
        let record = EventInput::new("npc_1", MemoryKind::Combat, -0.5, 10.0)
            .with_importance(Importance::Major)
            .into_record(ts(100))
            .expect("valid record");
        assert!(record.is_public);

        let chatter = EventInput::new("npc_1", MemoryKind::Dialogue, 0.2, 1.0)
            .into_record(ts(100))
            .expect("valid record");
        assert!(!chatter.is_public);
    }

    #[test]
    fn derived_copy_degrades_reliability_and_weight() {
        let parent = EventInput::new("npc_a", MemoryKind::Combat, -0.8, 20.0)
            .with_importance(Importance::Critical)
            .into_record(ts(100))
            .expect("valid record");

        let child = parent.derived_for("npc_b".into(), "npc_a".into(), 0.3, ts(200));
        assert!((child.reliability - 0.7).abs() < 1e-6);
        assert!((child.weight - 20.0 * 0.7).abs() < 1e-4);
        assert_eq!(child.subject, EntityId::from("npc_b"));
        assert_eq!(child.relayed_by, Some(EntityId::from("npc_a")));
        assert_eq!(child.origin, Some(parent.id));
        assert_eq!(child.kind, parent.kind);
        assert_eq!(child.tags, parent.tags);

        let grandchild = child.derived_for("npc_c".into(), "npc_b".into(), 0.3, ts(300));
        assert!((grandchild.reliability - 0.49).abs() < 1e-6);
        // Provenance points at the first-hand record, not the intermediate hop.
        assert_eq!(grandchild.origin, Some(parent.id));
    }
}
