//! SQLite save store for engine snapshots.
//!
//! Each save slot holds one JSON-encoded [`Snapshot`] in a BLOB column:
//!
//! ```sql
//! CREATE TABLE IF NOT EXISTS chronicle_saves (
//!     slot       TEXT PRIMARY KEY,
//!     data       BLOB NOT NULL,
//!     saved_at   TEXT NOT NULL,
//!     checksum   TEXT
//! );
//! ```
//!
//! WAL mode allows concurrent reads during gameplay, and an optional
//! CRC-32 checksum column catches save corruption. A checksum mismatch or
//! an undecodable blob fails that load with `CorruptState` and leaves the
//! caller's live state alone.

use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::Utc;
use rusqlite::{Connection, OpenFlags, params};
use tracing::{debug, info};

use crate::config::PersistenceConfig;
use crate::error::{ChronicleError, Result};
use crate::snapshot::Snapshot;

// ---------------------------------------------------------------------------
// CRC-32 checksum helper
// ---------------------------------------------------------------------------

/// CRC-32 (ISO 3309 / ITU-T V.42) of `data`, as a lowercase hex string.
fn crc32_hex(data: &[u8]) -> String {
    format!("{:08x}", crc32_compute(data))
}

fn crc32_compute(data: &[u8]) -> u32 {
    const POLY: u32 = 0xEDB8_8320;
    let mut crc: u32 = 0xFFFF_FFFF;
    for &byte in data {
        crc ^= u32::from(byte);
        for _ in 0..8 {
            if crc & 1 == 1 {
                crc = (crc >> 1) ^ POLY;
            } else {
                crc >>= 1;
            }
        }
    }
    !crc
}

// ---------------------------------------------------------------------------
// SaveStore
// ---------------------------------------------------------------------------

/// Handle to an open SQLite database of snapshot save slots.
pub struct SaveStore {
    conn: Connection,
    config: PersistenceConfig,
    db_path: PathBuf,
}

impl std::fmt::Debug for SaveStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SaveStore")
            .field("db_path", &self.db_path)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl SaveStore {
    /// Open (or create) a save database at `path`, creating the schema if
    /// needed and enabling WAL per configuration.
    ///
    /// # Errors
    /// Returns [`ChronicleError::Database`] on SQLite failures.
    pub fn open<P: AsRef<Path>>(path: P, config: &PersistenceConfig) -> Result<Self> {
        let db_path = path.as_ref().to_path_buf();
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;

        let conn = Connection::open_with_flags(&db_path, flags)?;

        if config.wal_mode {
            conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        }
        conn.execute_batch("PRAGMA synchronous = NORMAL;")?;
        conn.execute_batch("PRAGMA busy_timeout = 5000;")?;

        Self::create_schema(&conn)?;

        info!(
            path = %db_path.display(),
            wal = config.wal_mode,
            "Chronicle save store opened"
        );

        Ok(Self {
            conn,
            config: config.clone(),
            db_path,
        })
    }

    /// Open an in-memory database (useful for tests).
    ///
    /// # Errors
    /// Returns [`ChronicleError::Database`] on SQLite failures.
    pub fn open_in_memory(config: &PersistenceConfig) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::create_schema(&conn)?;
        Ok(Self {
            conn,
            config: config.clone(),
            db_path: PathBuf::from(":memory:"),
        })
    }

    fn create_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS chronicle_saves (
                slot       TEXT PRIMARY KEY,
                data       BLOB NOT NULL,
                saved_at   TEXT NOT NULL,
                checksum   TEXT
            );",
        )?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Core CRUD
    // ------------------------------------------------------------------

    /// Save (upsert) a snapshot under `slot`.
    ///
    /// # Errors
    /// Returns [`ChronicleError::Serialization`] if JSON encoding fails,
    /// or [`ChronicleError::Database`] on SQLite failures.
    pub fn save_slot(&self, slot: &str, snapshot: &Snapshot) -> Result<()> {
        let start = Instant::now();
        let json = snapshot.to_json_bytes()?;

        let checksum = self
            .config
            .checksum_enabled
            .then(|| crc32_hex(&json));
        let now = Utc::now().to_rfc3339();

        self.conn.execute(
            "INSERT INTO chronicle_saves (slot, data, saved_at, checksum)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(slot) DO UPDATE SET
                data = excluded.data,
                saved_at = excluded.saved_at,
                checksum = excluded.checksum",
            params![slot, json, now, checksum],
        )?;

        debug!(
            slot,
            records = snapshot.records.len(),
            bytes = json.len(),
            elapsed_us = start.elapsed().as_micros(),
            "Saved snapshot"
        );
        Ok(())
    }

    /// Load the snapshot stored under `slot`, or `None` if the slot is
    /// empty.
    ///
    /// # Errors
    /// Returns [`ChronicleError::CorruptState`] if the stored checksum
    /// does not match or the blob fails to decode, and
    /// [`ChronicleError::Database`] on SQLite failures. A failed load has
    /// no side effects.
    pub fn load_slot(&self, slot: &str) -> Result<Option<Snapshot>> {
        let start = Instant::now();
        let mut stmt = self
            .conn
            .prepare_cached("SELECT data, checksum FROM chronicle_saves WHERE slot = ?1")?;

        let row: Option<(Vec<u8>, Option<String>)> = stmt
            .query_row(params![slot], |row| Ok((row.get(0)?, row.get(1)?)))
            .optional()?;

        let Some((data, stored_checksum)) = row else {
            return Ok(None);
        };

        if self.config.checksum_enabled {
            if let Some(expected) = stored_checksum {
                let actual = crc32_hex(&data);
                if expected != actual {
                    return Err(ChronicleError::CorruptState(format!(
                        "slot '{slot}' checksum mismatch (stored {expected}, computed {actual})"
                    )));
                }
            }
        }

        let snapshot = Snapshot::from_json_bytes(&data)?;
        debug!(
            slot,
            records = snapshot.records.len(),
            elapsed_us = start.elapsed().as_micros(),
            "Loaded snapshot"
        );
        Ok(Some(snapshot))
    }

    /// Delete a save slot; `true` if a row was actually removed.
    ///
    /// # Errors
    /// Returns [`ChronicleError::Database`] on SQLite failures.
    pub fn delete_slot(&self, slot: &str) -> Result<bool> {
        let deleted = self
            .conn
            .execute("DELETE FROM chronicle_saves WHERE slot = ?1", params![slot])?;
        Ok(deleted > 0)
    }

    /// All occupied slot names, sorted.
    ///
    /// # Errors
    /// Returns [`ChronicleError::Database`] on SQLite failures.
    pub fn list_slots(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT slot FROM chronicle_saves ORDER BY slot")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut slots = Vec::new();
        for row in rows {
            slots.push(row?);
        }
        Ok(slots)
    }

    // ------------------------------------------------------------------
    // Maintenance
    // ------------------------------------------------------------------

    /// Back up the database to `dest_path` with SQLite's online-backup
    /// API. Safe while the database is in use.
    ///
    /// # Errors
    /// Returns [`ChronicleError::Database`] on SQLite failures.
    pub fn backup<P: AsRef<Path>>(&self, dest_path: P) -> Result<()> {
        let start = Instant::now();
        let mut dest = Connection::open(dest_path.as_ref())?;
        let backup = rusqlite::backup::Backup::new(&self.conn, &mut dest)?;
        backup.run_to_completion(256, std::time::Duration::from_millis(50), None)?;

        info!(
            dest = %dest_path.as_ref().display(),
            elapsed_ms = start.elapsed().as_millis(),
            "Save store backup completed"
        );
        Ok(())
    }

    /// Run SQLite's integrity check; `Ok(true)` means the database is
    /// sound.
    ///
    /// # Errors
    /// Returns [`ChronicleError::Database`] if the check itself fails.
    pub fn integrity_check(&self) -> Result<bool> {
        let result: String = self
            .conn
            .query_row("PRAGMA integrity_check", [], |row| row.get(0))?;
        Ok(result == "ok")
    }

    /// Path to the database file (or `:memory:`).
    #[must_use]
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }
}

/// Extension trait that adds an `.optional()` combinator to
/// `rusqlite::Result`, converting `QueryReturnedNoRows` into `Ok(None)`.
trait OptionalExt<T> {
    fn optional(self) -> std::result::Result<Option<T>, rusqlite::Error>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> std::result::Result<Option<T>, rusqlite::Error> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::EventInput;
    use crate::scheduler::Activity;
    use crate::snapshot::SNAPSHOT_VERSION;
    use crate::types::{GameTime, Importance, MemoryKind};

    fn test_config() -> PersistenceConfig {
        PersistenceConfig {
            wal_mode: false,
            checksum_enabled: true,
        }
    }

    fn sample_snapshot() -> Snapshot {
        let ts = GameTime::now(1_000);
        let record = EventInput::new("npc_1", MemoryKind::FactionAction, 0.4, 8.0)
            .with_tags(["tithe"])
            .with_importance(Importance::Notable)
            .at(ts)
            .into_record(ts)
            .expect("valid record");
        Snapshot {
            version: SNAPSHOT_VERSION,
            saved_at: Utc::now(),
            clock: ts,
            records: vec![record],
            edges: Vec::new(),
            aggregates: Vec::new(),
            pending: Vec::new(),
            schedule: vec![(Activity::Decay, None)],
        }
    }

    #[test]
    fn round_trip_save_load() {
        let store = SaveStore::open_in_memory(&test_config()).expect("open");
        let snapshot = sample_snapshot();

        store.save_slot("autosave", &snapshot).expect("save");
        let loaded = store.load_slot("autosave").expect("load").expect("Some");

        assert_eq!(loaded.records.len(), 1);
        assert_eq!(loaded.records[0].id, snapshot.records[0].id);
        assert_eq!(loaded.clock.tick, snapshot.clock.tick);
    }

    #[test]
    fn load_empty_slot_returns_none() {
        let store = SaveStore::open_in_memory(&test_config()).expect("open");
        assert!(store.load_slot("nothing").expect("load").is_none());
    }

    #[test]
    fn upsert_overwrites() {
        let store = SaveStore::open_in_memory(&test_config()).expect("open");
        store.save_slot("slot1", &sample_snapshot()).expect("save1");

        let mut second = sample_snapshot();
        second.clock = GameTime::now(9_999);
        store.save_slot("slot1", &second).expect("save2");

        let loaded = store.load_slot("slot1").expect("load").expect("Some");
        assert_eq!(loaded.clock.tick, 9_999);
    }

    #[test]
    fn delete_and_list() {
        let store = SaveStore::open_in_memory(&test_config()).expect("open");
        store.save_slot("alpha", &sample_snapshot()).expect("save");
        store.save_slot("beta", &sample_snapshot()).expect("save");

        assert_eq!(store.list_slots().expect("list"), vec!["alpha", "beta"]);
        assert!(store.delete_slot("alpha").expect("delete"));
        assert!(!store.delete_slot("alpha").expect("delete again"));
        assert_eq!(store.list_slots().expect("list"), vec!["beta"]);
    }

    #[test]
    fn checksum_mismatch_is_corrupt_state() {
        let store = SaveStore::open_in_memory(&test_config()).expect("open");
        store.save_slot("slot1", &sample_snapshot()).expect("save");

        store
            .conn
            .execute(
                "UPDATE chronicle_saves SET checksum = 'deadbeef' WHERE slot = 'slot1'",
                [],
            )
            .expect("corrupt checksum");

        let result = store.load_slot("slot1");
        assert!(matches!(result, Err(ChronicleError::CorruptState(_))));
    }

    #[test]
    fn mangled_blob_is_corrupt_state() {
        let store = SaveStore::open_in_memory(&test_config()).expect("open");
        store.save_slot("slot1", &sample_snapshot()).expect("save");

        // Replace the blob with garbage and a matching checksum, so only
        // the decode step can catch it.
        let garbage: &[u8] = b"{ definitely not a snapshot";
        let checksum = crc32_hex(garbage);
        store
            .conn
            .execute(
                "UPDATE chronicle_saves SET data = ?1, checksum = ?2 WHERE slot = 'slot1'",
                params![garbage, checksum],
            )
            .expect("mangle blob");

        let result = store.load_slot("slot1");
        assert!(matches!(result, Err(ChronicleError::CorruptState(_))));
    }

    #[test]
    fn file_based_open_and_backup() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db_path = dir.path().join("world_chronicle.db");
        let config = test_config();

        let store = SaveStore::open(&db_path, &config).expect("open");
        store.save_slot("manual", &sample_snapshot()).expect("save");

        let backup_path = dir.path().join("world_chronicle_backup.db");
        store.backup(&backup_path).expect("backup");

        let backup_store = SaveStore::open(&backup_path, &config).expect("open backup");
        let loaded = backup_store
            .load_slot("manual")
            .expect("load from backup")
            .expect("Some");
        assert_eq!(loaded.records.len(), 1);
        assert!(backup_store.integrity_check().expect("check"));
    }

    #[test]
    fn crc32_known_vector() {
        // CRC-32 of "123456789" = 0xCBF43926
        assert_eq!(crc32_compute(b"123456789"), 0xCBF4_3926);
    }
}
