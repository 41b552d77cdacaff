//! SQLite-backed snapshot persistence.
//!
//! The engine mirrors its entire in-memory state into a local key-value
//! table after every mutation and rehydrates it once at startup. Three keys
//! exist, one per data structure; each write replaces the row wholesale.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use chrono::Utc;
use rusqlite::Connection;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::telemetry::{HistoryEntry, LocationRecord};

/// SQL statement to create the snapshots table.
const CREATE_SNAPSHOTS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS snapshots (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL
)
";

/// SQL statement to create the metadata table for storing key-value pairs.
const CREATE_METADATA_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS metadata (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
)
";

/// All schema creation statements in order.
const SCHEMA_STATEMENTS: &[&str] = &[CREATE_SNAPSHOTS_TABLE, CREATE_METADATA_TABLE];

/// The current schema version.
const CURRENT_VERSION: i32 = 1;

/// Key used to store the schema version in the metadata table.
const VERSION_KEY: &str = "schema_version";

/// Snapshot row holding the current-location map.
const KEY_CURRENT: &str = "current_locations";

/// Snapshot row holding the per-vehicle history lists.
const KEY_HISTORY: &str = "location_history";

/// Snapshot row holding the tracked vehicle IDs.
const KEY_TRACKED: &str = "tracked_vehicles";

/// The rehydrated contents of a snapshot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SnapshotData {
    /// Current location per vehicle.
    pub current: HashMap<String, LocationRecord>,
    /// Bounded history per vehicle.
    pub history: HashMap<String, Vec<HistoryEntry>>,
    /// Vehicles with history accumulation enabled.
    pub tracked: HashSet<String>,
}

/// Statistics about the persisted snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotStats {
    /// Number of vehicles with a current location.
    pub vehicles: usize,
    /// Total history entries across all vehicles.
    pub history_entries: usize,
    /// Number of tracked vehicles.
    pub tracked: usize,
    /// Size of the database file in bytes.
    pub db_size_bytes: u64,
}

/// Durable key-value mirror of the engine's in-memory state.
#[derive(Debug)]
pub struct SnapshotStore {
    /// Path to the database file.
    path: PathBuf,
    /// Database connection.
    conn: Connection,
}

impl SnapshotStore {
    /// Open or create a snapshot database at the given path.
    ///
    /// Creates the parent directories and database file if they don't exist.
    /// Initializes the schema if this is a new database.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or schema
    /// initialization fails.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        // Create parent directories if needed
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|source| Error::DirectoryCreate {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        debug!("Opening snapshot database at {}", path.display());
        let conn = Connection::open(&path).map_err(|source| Error::DatabaseOpen {
            path: path.clone(),
            source,
        })?;

        // Enable WAL mode for better concurrent read performance
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        initialize_schema(&conn)?;

        info!("Snapshot database opened at {}", path.display());
        Ok(Self { path, conn })
    }

    /// Create an in-memory snapshot store for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the in-memory database cannot be created.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|source| Error::DatabaseOpen {
            path: PathBuf::from(":memory:"),
            source,
        })?;

        initialize_schema(&conn)?;

        Ok(Self {
            path: PathBuf::from(":memory:"),
            conn,
        })
    }

    /// Get the path to the database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the full snapshot.
    ///
    /// Missing rows (fresh database) yield empty structures.
    ///
    /// # Errors
    ///
    /// Returns an error if a row cannot be read or decoded.
    pub fn load(&self) -> Result<SnapshotData> {
        Ok(SnapshotData {
            current: self.read_key(KEY_CURRENT)?,
            history: self.read_key(KEY_HISTORY)?,
            tracked: self.read_key(KEY_TRACKED)?,
        })
    }

    /// Overwrite the persisted current-location map.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn write_current(&self, current: &HashMap<String, LocationRecord>) -> Result<()> {
        self.write_key(KEY_CURRENT, current)
    }

    /// Overwrite the persisted history lists.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn write_history(&self, history: &HashMap<String, Vec<HistoryEntry>>) -> Result<()> {
        self.write_key(KEY_HISTORY, history)
    }

    /// Overwrite the persisted tracked set.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn write_tracked(&self, tracked: &HashSet<String>) -> Result<()> {
        self.write_key(KEY_TRACKED, tracked)
    }

    /// Get statistics about the persisted snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be loaded.
    pub fn stats(&self) -> Result<SnapshotStats> {
        let data = self.load()?;

        let db_size_bytes = if self.path.to_string_lossy() == ":memory:" {
            0
        } else {
            std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0)
        };

        Ok(SnapshotStats {
            vehicles: data.current.len(),
            history_entries: data.history.values().map(Vec::len).sum(),
            tracked: data.tracked.len(),
            db_size_bytes,
        })
    }

    /// Replace one snapshot row wholesale.
    fn write_key(&self, key: &'static str, value: &impl Serialize) -> Result<()> {
        let encoded = serde_json::to_string(value)?;
        self.conn.execute(
            "INSERT OR REPLACE INTO snapshots (key, value, updated_at) VALUES (?1, ?2, ?3)",
            (key, encoded, Utc::now().to_rfc3339()),
        )?;
        Ok(())
    }

    /// Read one snapshot row, defaulting when absent.
    fn read_key<T: DeserializeOwned + Default>(&self, key: &'static str) -> Result<T> {
        let result: std::result::Result<String, rusqlite::Error> = self.conn.query_row(
            "SELECT value FROM snapshots WHERE key = ?1",
            [key],
            |row| row.get(0),
        );

        match result {
            Ok(encoded) => serde_json::from_str(&encoded)
                .map_err(|source| Error::SnapshotDecode { key, source }),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(T::default()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Initialize the database schema.
///
/// Creates all tables if they don't exist, then runs any pending migrations
/// to bring the schema up to the current version.
fn initialize_schema(conn: &Connection) -> Result<()> {
    for statement in SCHEMA_STATEMENTS {
        conn.execute(statement, [])?;
    }

    let version = get_schema_version(conn)?;
    if version < CURRENT_VERSION {
        run_migrations(conn, version)?;
    }

    Ok(())
}

/// Get the current schema version from the database.
///
/// Returns 0 if no version is set (fresh database).
fn get_schema_version(conn: &Connection) -> Result<i32> {
    let result: std::result::Result<String, rusqlite::Error> = conn.query_row(
        "SELECT value FROM metadata WHERE key = ?1",
        [VERSION_KEY],
        |row| row.get(0),
    );

    match result {
        Ok(value) => value.parse().map_err(|_| Error::DatabaseMigration {
            message: format!("invalid schema version: {value}"),
        }),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(0),
        Err(e) => Err(e.into()),
    }
}

/// Set the schema version in the database.
fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO metadata (key, value) VALUES (?1, ?2)",
        (VERSION_KEY, version.to_string()),
    )?;
    Ok(())
}

/// Run migrations from the given version to the current version.
fn run_migrations(conn: &Connection, from_version: i32) -> Result<()> {
    let mut current = from_version;

    while current < CURRENT_VERSION {
        current += 1;
        run_migration(conn, current)?;
    }

    set_schema_version(conn, CURRENT_VERSION)?;
    Ok(())
}

/// Run a specific migration version.
fn run_migration(conn: &Connection, version: i32) -> Result<()> {
    match version {
        // Version 1 is the base schema created by SCHEMA_STATEMENTS.
        1 => set_schema_version(conn, 1),
        _ => Err(Error::DatabaseMigration {
            message: format!("unknown migration version: {version}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::LocationUpdate;

    fn create_test_store() -> SnapshotStore {
        SnapshotStore::open_in_memory().expect("failed to create test store")
    }

    fn sample_record(vehicle_id: &str) -> LocationRecord {
        let mut record = LocationRecord::new(vehicle_id);
        record.apply(&LocationUpdate::position(48.2, 16.37));
        record
    }

    #[test]
    fn test_open_in_memory() {
        let store = SnapshotStore::open_in_memory();
        assert!(store.is_ok());
    }

    #[test]
    fn test_fresh_database_loads_empty() {
        let store = create_test_store();
        let data = store.load().unwrap();

        assert!(data.current.is_empty());
        assert!(data.history.is_empty());
        assert!(data.tracked.is_empty());
    }

    #[test]
    fn test_write_and_load_current() {
        let store = create_test_store();

        let mut current = HashMap::new();
        current.insert("veh-1".to_string(), sample_record("veh-1"));
        store.write_current(&current).unwrap();

        let data = store.load().unwrap();
        assert_eq!(data.current, current);
    }

    #[test]
    fn test_write_and_load_history() {
        let store = create_test_store();

        let mut history = HashMap::new();
        history.insert(
            "veh-1".to_string(),
            vec![HistoryEntry::new(sample_record("veh-1"))],
        );
        store.write_history(&history).unwrap();

        let data = store.load().unwrap();
        assert_eq!(data.history, history);
    }

    #[test]
    fn test_write_and_load_tracked() {
        let store = create_test_store();

        let tracked: HashSet<String> = ["veh-1".to_string(), "veh-2".to_string()].into();
        store.write_tracked(&tracked).unwrap();

        let data = store.load().unwrap();
        assert_eq!(data.tracked, tracked);
    }

    #[test]
    fn test_writes_replace_wholesale() {
        let store = create_test_store();

        let mut current = HashMap::new();
        current.insert("veh-1".to_string(), sample_record("veh-1"));
        current.insert("veh-2".to_string(), sample_record("veh-2"));
        store.write_current(&current).unwrap();

        current.remove("veh-2");
        store.write_current(&current).unwrap();

        let data = store.load().unwrap();
        assert_eq!(data.current.len(), 1);
        assert!(data.current.contains_key("veh-1"));
    }

    #[test]
    fn test_stats_empty() {
        let store = create_test_store();
        let stats = store.stats().unwrap();

        assert_eq!(stats.vehicles, 0);
        assert_eq!(stats.history_entries, 0);
        assert_eq!(stats.tracked, 0);
        assert_eq!(stats.db_size_bytes, 0);
    }

    #[test]
    fn test_stats_with_data() {
        let store = create_test_store();

        let mut current = HashMap::new();
        current.insert("veh-1".to_string(), sample_record("veh-1"));
        store.write_current(&current).unwrap();

        let mut history = HashMap::new();
        history.insert(
            "veh-1".to_string(),
            vec![
                HistoryEntry::new(sample_record("veh-1")),
                HistoryEntry::new(sample_record("veh-1")),
            ],
        );
        store.write_history(&history).unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.vehicles, 1);
        assert_eq!(stats.history_entries, 2);
    }

    #[test]
    fn test_schema_version_is_set() {
        let store = create_test_store();
        let version = get_schema_version(&store.conn).unwrap();
        assert_eq!(version, CURRENT_VERSION);
    }

    #[test]
    fn test_initialize_schema_idempotent() {
        let store = create_test_store();

        initialize_schema(&store.conn).expect("second init failed");

        let version = get_schema_version(&store.conn).unwrap();
        assert_eq!(version, CURRENT_VERSION);
    }

    #[test]
    fn test_run_migration_unknown_version() {
        let store = create_test_store();

        let result = run_migration(&store.conn, 999);
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert!(err.to_string().contains("unknown migration version"));
    }

    #[test]
    fn test_open_creates_parent_dirs() {
        let temp_dir = std::env::temp_dir();
        let nested_path = temp_dir.join(format!(
            "fleetpulse_test_{}/nested/snapshots.db",
            std::process::id()
        ));

        if let Some(parent) = nested_path.parent() {
            let _ = std::fs::remove_dir_all(parent);
        }

        let store = SnapshotStore::open(&nested_path).unwrap();
        assert!(nested_path.exists());
        assert_eq!(store.path(), nested_path);

        drop(store);
        if let Some(parent) = nested_path.parent() {
            let _ = std::fs::remove_dir_all(parent.parent().unwrap());
        }
    }

    #[test]
    fn test_file_based_round_trip() {
        let temp_dir = std::env::temp_dir();
        let db_path = temp_dir.join(format!("fleetpulse_roundtrip_{}.db", std::process::id()));

        let mut current = HashMap::new();
        current.insert("veh-1".to_string(), sample_record("veh-1"));

        {
            let store = SnapshotStore::open(&db_path).unwrap();
            store.write_current(&current).unwrap();
        }

        let store = SnapshotStore::open(&db_path).unwrap();
        let data = store.load().unwrap();
        assert_eq!(data.current, current);

        drop(store);
        let _ = std::fs::remove_file(&db_path);
        let _ = std::fs::remove_file(db_path.with_extension("db-wal"));
        let _ = std::fs::remove_file(db_path.with_extension("db-shm"));
    }
}
