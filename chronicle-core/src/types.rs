//! Core type definitions for the chronicle engine.
//!
//! All types are serializable and cheap to clone.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Identity Types
// ---------------------------------------------------------------------------

/// Host-assigned identifier for any entity (player, NPC, companion, faction).
///
/// The engine never mints entity ids; the host names its own actors
/// (`"player"`, `"npc_42"`, `"faction_iron_pact"`) and the engine treats
/// them as opaque keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub String);

impl EntityId {
    /// Wrap a host-side identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Whether the identifier is empty (invalid for ingestion).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for EntityId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for EntityId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a memory record, assigned on insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MemoryId(pub Uuid);

impl MemoryId {
    /// Create a new random memory ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MemoryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MemoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Host-assigned identifier for a place (settlement, dungeon, region).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PlaceId(pub String);

impl PlaceId {
    /// Wrap a host-side place identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl From<&str> for PlaceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for PlaceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for PlaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

/// In-game timestamp measured in game-seconds since world creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GameTime {
    /// Game-second tick (monotonically increasing).
    pub tick: u64,
    /// Corresponding real-world wall-clock time (for save metadata).
    pub real_time: DateTime<Utc>,
}

impl GameTime {
    /// Create a new game timestamp at the current wall-clock time.
    #[must_use]
    pub fn now(tick: u64) -> Self {
        Self {
            tick,
            real_time: Utc::now(),
        }
    }

    /// Game-seconds elapsed since `other` (zero if `other` is newer).
    #[must_use]
    pub fn seconds_since(&self, other: &Self) -> f64 {
        self.tick.saturating_sub(other.tick) as f64
    }

    /// Game-hours elapsed since `other`.
    #[must_use]
    pub fn hours_since(&self, other: &Self) -> f64 {
        self.seconds_since(other) / 3_600.0
    }

    /// This timestamp shifted `secs` game-seconds into the future.
    /// The wall-clock component is carried over unchanged.
    #[must_use]
    pub fn plus_secs(&self, secs: u64) -> Self {
        Self {
            tick: self.tick.saturating_add(secs),
            real_time: self.real_time,
        }
    }
}

// ---------------------------------------------------------------------------
// Memory Classification
// ---------------------------------------------------------------------------

/// What kind of event a memory record captures.
///
/// Kinds route records into aggregates and relationship edges via the
/// per-kind multiplier tables in the configuration.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum MemoryKind {
    /// A morally weighted player/NPC decision.
    MoralChoice,
    /// Combat (attack, defense, death).
    Combat,
    /// Dialogue / conversation.
    Dialogue,
    /// Trade / economic exchange.
    Trade,
    /// An action taken by or against a faction.
    FactionAction,
    /// Interaction with a travelling companion.
    CompanionInteraction,
    /// A world-simulation event (disaster, festival, war outcome).
    WorldEvent,
    /// Host-defined event outside the built-in taxonomy.
    Custom,
}

impl fmt::Display for MemoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::MoralChoice => "moral_choice",
            Self::Combat => "combat",
            Self::Dialogue => "dialogue",
            Self::Trade => "trade",
            Self::FactionAction => "faction_action",
            Self::CompanionInteraction => "companion_interaction",
            Self::WorldEvent => "world_event",
            Self::Custom => "custom",
        };
        write!(f, "{label}")
    }
}

/// Retention priority of a memory record.
///
/// Drives eviction order and the importance factor in relevance ranking.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Importance {
    /// Background noise; first to be forgotten.
    Trivial,
    /// Small but memorable.
    Minor,
    /// Worth retelling.
    Notable,
    /// Shapes how the subject sees the world.
    Major,
    /// A turning point.
    Critical,
    /// The stuff of songs.
    Legendary,
}

impl Importance {
    /// Weight used by relevance ranking and propagation probability.
    #[must_use]
    pub fn weight_factor(self) -> f64 {
        match self {
            Self::Trivial => 0.2,
            Self::Minor => 0.35,
            Self::Notable => 0.5,
            Self::Major => 0.7,
            Self::Critical => 0.85,
            Self::Legendary => 1.0,
        }
    }
}

impl Default for Importance {
    fn default() -> Self {
        Self::Notable
    }
}

// ---------------------------------------------------------------------------
// Threshold Classification
// ---------------------------------------------------------------------------

/// One band of a threshold table: any value at or above `min` (and below the
/// next band up) classifies as `level`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdBand {
    /// Inclusive lower bound of the band.
    pub min: f32,
    /// Level label for values in the band.
    pub level: String,
}

/// Ordered threshold table mapping a continuous value to a discrete level.
///
/// Classification is a pure function of `(value, table)`: a value at an
/// exact boundary takes the higher band.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdTable {
    /// Bands above the floor, in any order (highest `min` wins).
    pub bands: Vec<ThresholdBand>,
    /// Level for values below every band.
    pub floor: String,
}

impl ThresholdTable {
    /// Build a table from `(min, level)` pairs plus a floor level.
    #[must_use]
    pub fn new(bands: &[(f32, &str)], floor: &str) -> Self {
        Self {
            bands: bands
                .iter()
                .map(|(min, level)| ThresholdBand {
                    min: *min,
                    level: (*level).to_string(),
                })
                .collect(),
            floor: floor.to_string(),
        }
    }

    /// Classify a value into a level label.
    #[must_use]
    pub fn classify(&self, value: f32) -> &str {
        self.bands
            .iter()
            .filter(|band| value >= band.min)
            .max_by(|a, b| {
                a.min
                    .partial_cmp(&b.min)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .map_or(self.floor.as_str(), |band| band.level.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn importance_ordering() {
        assert!(Importance::Trivial < Importance::Legendary);
        assert!(Importance::Notable < Importance::Major);
    }

    #[test]
    fn game_time_deltas() {
        let t0 = GameTime::now(0);
        let t1 = GameTime::now(7_200);
        assert!((t1.hours_since(&t0) - 2.0).abs() < f64::EPSILON);
        // Reversed order saturates to zero rather than going negative.
        assert!(t0.seconds_since(&t1).abs() < f64::EPSILON);
    }

    #[test]
    fn threshold_classification_is_pure() {
        let table = ThresholdTable::new(
            &[(80.0, "devoted"), (60.0, "loyal"), (20.0, "friendly"), (-20.0, "neutral"), (-60.0, "cold")],
            "hostile",
        );
        assert_eq!(table.classify(95.0), "devoted");
        assert_eq!(table.classify(34.0), "friendly");
        assert_eq!(table.classify(0.0), "neutral");
        assert_eq!(table.classify(-75.0), "hostile");
        // Boundary values take the higher band.
        assert_eq!(table.classify(20.0), "friendly");
        assert_eq!(table.classify(-60.0), "cold");
        // Same inputs, same answer — call order irrelevant.
        assert_eq!(table.classify(34.0), "friendly");
    }

    #[test]
    fn threshold_order_in_table_does_not_matter() {
        let shuffled = ThresholdTable::new(&[(20.0, "friendly"), (80.0, "devoted"), (60.0, "loyal")], "neutral");
        assert_eq!(shuffled.classify(85.0), "devoted");
        assert_eq!(shuffled.classify(65.0), "loyal");
        assert_eq!(shuffled.classify(25.0), "friendly");
        assert_eq!(shuffled.classify(5.0), "neutral");
    }
}
