//! Snapshot codec — the full engine state as one serializable value.
//!
//! The schema covers everything the engine owns: records, edges,
//! aggregates, pending propagation hops, the clock and the maintenance
//! stamps. Round-trips are lossless. Two encodings are offered: JSON for
//! debugging and tooling, bincode for compact saves. A blob that fails to
//! decode yields [`ChronicleError::CorruptState`] and nothing else — the
//! caller's live state is never touched by a failed load.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::aggregate::SubjectAggregates;
use crate::error::{ChronicleError, Result};
use crate::graph::RelationshipEdge;
use crate::propagation::PropagationTask;
use crate::record::MemoryRecord;
use crate::scheduler::Activity;
use crate::types::GameTime;

/// Current snapshot schema version.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Complete engine state at one point in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    /// Schema version; loads reject anything else.
    pub version: u32,
    /// Wall-clock time the snapshot was taken (save metadata).
    pub saved_at: DateTime<Utc>,
    /// Engine clock at snapshot time.
    pub clock: GameTime,
    /// Every memory record, in insertion order.
    pub records: Vec<MemoryRecord>,
    /// Every relationship edge.
    pub edges: Vec<RelationshipEdge>,
    /// Every subject's aggregate states.
    pub aggregates: Vec<SubjectAggregates>,
    /// Undelivered propagation hops.
    pub pending: Vec<PropagationTask>,
    /// Maintenance-activity completion stamps.
    pub schedule: Vec<(Activity, Option<GameTime>)>,
}

impl Snapshot {
    /// Encode as JSON bytes.
    ///
    /// # Errors
    /// Returns [`ChronicleError::Serialization`] if encoding fails.
    pub fn to_json_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| ChronicleError::Serialization(e.to_string()))
    }

    /// Decode from JSON bytes.
    ///
    /// # Errors
    /// Returns [`ChronicleError::CorruptState`] if the blob is malformed
    /// or carries an unknown schema version.
    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self> {
        let snapshot: Self = serde_json::from_slice(bytes)
            .map_err(|e| ChronicleError::CorruptState(format!("json decode: {e}")))?;
        snapshot.check_version()
    }

    /// Encode as compact bincode bytes.
    ///
    /// # Errors
    /// Returns [`ChronicleError::Serialization`] if encoding fails.
    pub fn to_bincode_bytes(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|e| ChronicleError::Serialization(e.to_string()))
    }

    /// Decode from bincode bytes.
    ///
    /// # Errors
    /// Returns [`ChronicleError::CorruptState`] if the blob is malformed
    /// or carries an unknown schema version.
    pub fn from_bincode_bytes(bytes: &[u8]) -> Result<Self> {
        let snapshot: Self = bincode::deserialize(bytes)
            .map_err(|e| ChronicleError::CorruptState(format!("bincode decode: {e}")))?;
        snapshot.check_version()
    }

    fn check_version(self) -> Result<Self> {
        if self.version != SNAPSHOT_VERSION {
            return Err(ChronicleError::CorruptState(format!(
                "unsupported snapshot version {} (expected {SNAPSHOT_VERSION})",
                self.version
            )));
        }
        Ok(self)
    }
}
