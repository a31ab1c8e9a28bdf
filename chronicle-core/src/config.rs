//! Configuration for the chronicle engine.
//!
//! Maps directly to `chronicle.toml`. Every field has a serde default so a
//! partial file (or none at all) yields a playable configuration.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::aggregate::{AggregateSpec, DecayModel};
use crate::types::{MemoryKind, ThresholdTable};

/// Top-level configuration, loadable from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChronicleConfig {
    /// Per-subject memory capacity.
    #[serde(default)]
    pub memory: MemoryLimits,
    /// Aggregate definitions (loyalty, corruption, ...).
    #[serde(default = "default_aggregates")]
    pub aggregates: Vec<AggregateSpec>,
    /// Relationship edge settings.
    #[serde(default)]
    pub edge: EdgeConfig,
    /// Gossip propagation settings.
    #[serde(default)]
    pub propagation: PropagationConfig,
    /// Maintenance pass cadence.
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// Narrative tone analysis settings.
    #[serde(default)]
    pub analysis: AnalysisConfig,
    /// Save store settings.
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

impl Default for ChronicleConfig {
    fn default() -> Self {
        Self {
            memory: MemoryLimits::default(),
            aggregates: default_aggregates(),
            edge: EdgeConfig::default(),
            propagation: PropagationConfig::default(),
            scheduler: SchedulerConfig::default(),
            analysis: AnalysisConfig::default(),
            persistence: PersistenceConfig::default(),
        }
    }
}

impl ChronicleConfig {
    /// Load configuration from a TOML string.
    ///
    /// # Errors
    /// Returns `ChronicleError::Config` if the TOML is invalid.
    pub fn from_toml(toml_str: &str) -> crate::error::Result<Self> {
        toml::from_str(toml_str).map_err(|e| crate::ChronicleError::Config(e.to_string()))
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// Per-subject memory store capacity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryLimits {
    /// Hard cap on records per subject; the least important, weakest,
    /// oldest record is evicted beyond this.
    #[serde(default = "default_256")]
    pub max_records_per_subject: usize,
}

impl Default for MemoryLimits {
    fn default() -> Self {
        Self {
            max_records_per_subject: 256,
        }
    }
}

/// Relationship edge scoring and stance classification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeConfig {
    /// Lower score clamp.
    #[serde(default = "default_neg_100")]
    pub min_score: f32,
    /// Upper score clamp.
    #[serde(default = "default_100")]
    pub max_score: f32,
    /// Stance classification table.
    #[serde(default = "default_stance_table")]
    pub thresholds: ThresholdTable,
    /// Max memory ids retained per edge history.
    #[serde(default = "default_32")]
    pub history_cap: usize,
    /// Per-kind scaling of `weight × valence` into an edge delta.
    #[serde(default)]
    pub kind_factors: BTreeMap<MemoryKind, f32>,
    /// Scaling for kinds absent from `kind_factors`.
    #[serde(default = "default_0_5")]
    pub default_kind_factor: f32,
}

impl EdgeConfig {
    /// Edge delta factor for a record kind.
    #[must_use]
    pub fn kind_factor(&self, kind: MemoryKind) -> f32 {
        self.kind_factors
            .get(&kind)
            .copied()
            .unwrap_or(self.default_kind_factor)
    }
}

impl Default for EdgeConfig {
    fn default() -> Self {
        Self {
            min_score: -100.0,
            max_score: 100.0,
            thresholds: default_stance_table(),
            history_cap: 32,
            kind_factors: BTreeMap::new(),
            default_kind_factor: 0.5,
        }
    }
}

/// Gossip propagation tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropagationConfig {
    /// Base per-sweep chance that a record spreads along one edge.
    #[serde(default = "default_0_35")]
    pub base_chance: f32,
    /// Reliability lost per hop.
    #[serde(default = "default_0_3")]
    pub reliability_decay: f32,
    /// Records below this reliability never spread further.
    #[serde(default = "default_0_2")]
    pub reliability_floor: f32,
    /// Minimum edge score before an edge carries gossip at all.
    #[serde(default = "default_10")]
    pub min_edge_score: f32,
    /// Game-seconds between scheduling a hop and delivering it.
    #[serde(default = "default_30")]
    pub hop_delay_secs: u64,
    /// Deterministic mode: accept a hop iff its probability reaches
    /// `acceptance_threshold`, skipping the RNG entirely.
    #[serde(default)]
    pub deterministic: bool,
    /// Acceptance threshold used in deterministic mode.
    #[serde(default = "default_0_5")]
    pub acceptance_threshold: f32,
    /// Seed for the propagation RNG (reproducible runs).
    #[serde(default = "default_seed")]
    pub rng_seed: u64,
}

impl Default for PropagationConfig {
    fn default() -> Self {
        Self {
            base_chance: 0.35,
            reliability_decay: 0.3,
            reliability_floor: 0.2,
            min_edge_score: 10.0,
            hop_delay_secs: 30,
            deterministic: false,
            acceptance_threshold: 0.5,
            rng_seed: 0x5EED_CAFE,
        }
    }
}

/// Cadence of the three maintenance activities, in game-seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Interval between decay sweeps.
    #[serde(default = "default_600")]
    pub decay_interval_secs: u64,
    /// Interval between propagation selection sweeps.
    #[serde(default = "default_120")]
    pub propagation_interval_secs: u64,
    /// Interval between analysis passes.
    #[serde(default = "default_900")]
    pub analysis_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            decay_interval_secs: 600,
            propagation_interval_secs: 120,
            analysis_interval_secs: 900,
        }
    }
}

/// Narrative tone analysis tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Name of the aggregate the analysis pass writes into.
    #[serde(default = "default_tone")]
    pub tone_aggregate: String,
    /// How far back the pass looks, in game-seconds.
    #[serde(default = "default_7200")]
    pub window_secs: u64,
    /// Scale from summed `weight × valence × recency` to tone units.
    #[serde(default = "default_1_0")]
    pub scale: f32,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            tone_aggregate: "tone".to_string(),
            window_secs: 7_200,
            scale: 1.0,
        }
    }
}

/// Save store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Use WAL mode for concurrent reads.
    #[serde(default = "default_true")]
    pub wal_mode: bool,
    /// Store and verify CRC-32 checksums of snapshot blobs.
    #[serde(default = "default_true")]
    pub checksum_enabled: bool,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            wal_mode: true,
            checksum_enabled: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Default aggregate set
// ---------------------------------------------------------------------------

/// Built-in aggregates: loyalty, corruption, alignment, and the
/// analysis-driven narrative tone.
#[must_use]
pub fn default_aggregates() -> Vec<AggregateSpec> {
    vec![
        AggregateSpec {
            name: "loyalty".to_string(),
            min: -100.0,
            max: 100.0,
            baseline: 0.0,
            decay_rate: 0.01,
            decay_model: DecayModel::Exponential,
            thresholds: ThresholdTable::new(
                &[
                    (80.0, "devoted"),
                    (60.0, "loyal"),
                    (20.0, "friendly"),
                    (-20.0, "neutral"),
                    (-60.0, "cold"),
                ],
                "hostile",
            ),
            kind_multipliers: [
                (MemoryKind::CompanionInteraction, 1.0),
                (MemoryKind::MoralChoice, 1.0),
                (MemoryKind::Dialogue, 0.5),
                (MemoryKind::Trade, 0.25),
            ]
            .into_iter()
            .collect(),
            default_multiplier: 0.0,
        },
        AggregateSpec {
            name: "corruption".to_string(),
            min: 0.0,
            max: 100.0,
            baseline: 0.0,
            decay_rate: 0.002,
            decay_model: DecayModel::Exponential,
            thresholds: ThresholdTable::new(
                &[
                    (80.0, "depraved"),
                    (60.0, "corrupt"),
                    (40.0, "tainted"),
                    (20.0, "shadowed"),
                ],
                "pure",
            ),
            // Dark choices (negative valence) push corruption up.
            kind_multipliers: [(MemoryKind::MoralChoice, -1.0)].into_iter().collect(),
            default_multiplier: 0.0,
        },
        AggregateSpec {
            name: "alignment".to_string(),
            min: -100.0,
            max: 100.0,
            baseline: 0.0,
            decay_rate: 0.0,
            decay_model: DecayModel::Exponential,
            thresholds: ThresholdTable::new(
                &[(60.0, "saintly"), (20.0, "good"), (-20.0, "neutral"), (-60.0, "dark")],
                "vile",
            ),
            kind_multipliers: [
                (MemoryKind::MoralChoice, 1.0),
                (MemoryKind::FactionAction, 0.5),
            ]
            .into_iter()
            .collect(),
            default_multiplier: 0.0,
        },
        AggregateSpec {
            name: "tone".to_string(),
            min: -100.0,
            max: 100.0,
            baseline: 0.0,
            decay_rate: 0.0,
            decay_model: DecayModel::Linear,
            thresholds: ThresholdTable::new(
                &[
                    (50.0, "triumphant"),
                    (15.0, "bright"),
                    (-15.0, "balanced"),
                    (-50.0, "somber"),
                ],
                "grim",
            ),
            // Written by the analysis pass, not by individual records.
            kind_multipliers: BTreeMap::new(),
            default_multiplier: 0.0,
        },
    ]
}

// ---------------------------------------------------------------------------
// Serde default helpers
// ---------------------------------------------------------------------------

fn default_true() -> bool { true }
fn default_tone() -> String { "tone".to_string() }
fn default_0_2() -> f32 { 0.2 }
fn default_0_3() -> f32 { 0.3 }
fn default_0_35() -> f32 { 0.35 }
fn default_0_5() -> f32 { 0.5 }
fn default_1_0() -> f32 { 1.0 }
fn default_10() -> f32 { 10.0 }
fn default_100() -> f32 { 100.0 }
fn default_neg_100() -> f32 { -100.0 }
fn default_30() -> u64 { 30 }
fn default_120() -> u64 { 120 }
fn default_600() -> u64 { 600 }
fn default_900() -> u64 { 900 }
fn default_7200() -> u64 { 7_200 }
fn default_32() -> usize { 32 }
fn default_256() -> usize { 256 }
fn default_seed() -> u64 { 0x5EED_CAFE }

fn default_stance_table() -> ThresholdTable {
    ThresholdTable::new(
        &[
            (60.0, "allied"),
            (20.0, "friendly"),
            (-20.0, "neutral"),
            (-60.0, "unfriendly"),
        ],
        "hostile",
    )
}
