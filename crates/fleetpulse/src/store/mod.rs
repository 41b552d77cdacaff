//! Live location state for the fleet.
//!
//! This module owns the current-location map, the bounded per-vehicle
//! history, and the tracked set, and mirrors all three into the snapshot
//! store after every mutation.

pub mod snapshot;

use std::collections::{HashMap, HashSet};

use tracing::debug;

pub use snapshot::{SnapshotData, SnapshotStats, SnapshotStore};

use crate::error::Result;
use crate::telemetry::{HistoryEntry, LocationRecord, LocationUpdate};

/// Default per-vehicle history bound.
pub const DEFAULT_MAX_HISTORY: usize = 100;

/// In-memory location state with write-through snapshot persistence.
///
/// All mutation goes through `&mut self`: the engine serializes writers
/// behind a single mutex because eviction reads-then-writes the history
/// lists.
#[derive(Debug)]
pub struct LocationStore {
    snapshot: SnapshotStore,
    current: HashMap<String, LocationRecord>,
    history: HashMap<String, Vec<HistoryEntry>>,
    tracked: HashSet<String>,
    max_history: usize,
}

impl LocationStore {
    /// Open a location store backed by the given snapshot store,
    /// rehydrating state from the last snapshot.
    ///
    /// Rehydration happens here, before any remote seeding can run.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be loaded.
    pub fn open(snapshot: SnapshotStore, max_history: usize) -> Result<Self> {
        let data = snapshot.load()?;
        debug!(
            vehicles = data.current.len(),
            tracked = data.tracked.len(),
            "rehydrated location store from snapshot"
        );
        Ok(Self {
            snapshot,
            current: data.current,
            history: data.history,
            tracked: data.tracked,
            max_history,
        })
    }

    /// Merge a partial update into a vehicle's current record.
    ///
    /// Unknown vehicle IDs are upserted from a zero-valued record. The
    /// merged record is stamped with the write time, persisted, and — only
    /// while the vehicle is tracked — appended to its history, evicting the
    /// oldest entries once the bound is exceeded.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot write-through fails; the in-memory
    /// mutation has been applied regardless.
    pub fn update_location(
        &mut self,
        vehicle_id: &str,
        update: &LocationUpdate,
    ) -> Result<LocationRecord> {
        let record = self
            .current
            .entry(vehicle_id.to_string())
            .or_insert_with(|| LocationRecord::new(vehicle_id));
        record.apply(update);
        let record = record.clone();

        self.snapshot.write_current(&self.current)?;

        if self.tracked.contains(vehicle_id) {
            let entries = self.history.entry(vehicle_id.to_string()).or_default();
            entries.push(HistoryEntry::new(record.clone()));
            evict_oldest(entries, self.max_history);
            self.snapshot.write_history(&self.history)?;
        }

        Ok(record)
    }

    /// Get a vehicle's current location, if one has been recorded.
    #[must_use]
    pub fn get_location(&self, vehicle_id: &str) -> Option<&LocationRecord> {
        self.current.get(vehicle_id)
    }

    /// Get a vehicle's recorded history, oldest first.
    #[must_use]
    pub fn history(&self, vehicle_id: &str) -> &[HistoryEntry] {
        self.history.get(vehicle_id).map_or(&[], Vec::as_slice)
    }

    /// Whether history is being accumulated for a vehicle.
    #[must_use]
    pub fn is_tracked(&self, vehicle_id: &str) -> bool {
        self.tracked.contains(vehicle_id)
    }

    /// The set of tracked vehicle IDs.
    #[must_use]
    pub fn tracked(&self) -> &HashSet<String> {
        &self.tracked
    }

    /// Begin accumulating history for a vehicle. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot write-through fails.
    pub fn start_tracking(&mut self, vehicle_id: &str) -> Result<()> {
        if self.tracked.insert(vehicle_id.to_string()) {
            self.snapshot.write_tracked(&self.tracked)?;
        }
        Ok(())
    }

    /// Stop accumulating history for a vehicle. Idempotent.
    ///
    /// Existing history is kept; only further accumulation stops.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot write-through fails.
    pub fn stop_tracking(&mut self, vehicle_id: &str) -> Result<()> {
        if self.tracked.remove(vehicle_id) {
            self.snapshot.write_tracked(&self.tracked)?;
        }
        Ok(())
    }

    /// Drop the recorded history of every vehicle.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot write-through fails.
    pub fn clear_history(&mut self) -> Result<()> {
        self.history.clear();
        self.snapshot.write_history(&self.history)
    }
}

/// Evict oldest-timestamp-first until the bound is restored.
///
/// The newest entry (the one just appended) is never a candidate, so it
/// cannot be evicted to make room for itself.
fn evict_oldest(entries: &mut Vec<HistoryEntry>, bound: usize) {
    while entries.len() > bound {
        let newest = entries.len() - 1;
        let oldest = entries[..newest]
            .iter()
            .enumerate()
            .min_by_key(|(_, entry)| entry.record.timestamp)
            .map(|(index, _)| index);
        match oldest {
            Some(index) => {
                entries.remove(index);
            }
            None => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_store() -> LocationStore {
        let snapshot = SnapshotStore::open_in_memory().expect("in-memory snapshot");
        LocationStore::open(snapshot, DEFAULT_MAX_HISTORY).expect("location store")
    }

    fn create_test_store_with_bound(bound: usize) -> LocationStore {
        let snapshot = SnapshotStore::open_in_memory().expect("in-memory snapshot");
        LocationStore::open(snapshot, bound).expect("location store")
    }

    #[test]
    fn test_update_is_upsert() {
        let mut store = create_test_store();
        assert!(store.get_location("veh-1").is_none());

        store
            .update_location("veh-1", &LocationUpdate::position(48.2, 16.37))
            .unwrap();

        let record = store.get_location("veh-1").unwrap();
        assert_eq!(record.coordinates.latitude, 48.2);
    }

    #[test]
    fn test_last_write_wins_merges_disjoint_fields() {
        let mut store = create_test_store();

        store
            .update_location("veh-1", &LocationUpdate::position(48.2, 16.37))
            .unwrap();
        let first = store.get_location("veh-1").unwrap().clone();

        let second = store
            .update_location(
                "veh-1",
                &LocationUpdate {
                    speed: Some(72.0),
                    heading: Some(180.0),
                    ..LocationUpdate::default()
                },
            )
            .unwrap();

        // Both updates' fields are merged; the timestamp is the second write's.
        assert_eq!(second.coordinates.latitude, 48.2);
        assert_eq!(second.speed, Some(72.0));
        assert_eq!(second.heading, Some(180.0));
        assert!(second.timestamp >= first.timestamp);
        assert_eq!(store.get_location("veh-1").unwrap(), &second);
    }

    #[test]
    fn test_history_bound_keeps_newest_entries() {
        let mut store = create_test_store();
        store.start_tracking("veh-1").unwrap();

        for i in 0..150 {
            store
                .update_location("veh-1", &LocationUpdate::position(f64::from(i), 0.0))
                .unwrap();
        }

        let history = store.history("veh-1");
        assert_eq!(history.len(), DEFAULT_MAX_HISTORY);
        // The oldest 50 entries were evicted; the newest 100 remain in order.
        assert_eq!(history[0].record.coordinates.latitude, 50.0);
        assert_eq!(history[99].record.coordinates.latitude, 149.0);
    }

    #[test]
    fn test_small_bound_eviction() {
        let mut store = create_test_store_with_bound(3);
        store.start_tracking("veh-1").unwrap();

        for i in 0..5 {
            store
                .update_location("veh-1", &LocationUpdate::position(f64::from(i), 0.0))
                .unwrap();
        }

        let latitudes: Vec<f64> = store
            .history("veh-1")
            .iter()
            .map(|entry| entry.record.coordinates.latitude)
            .collect();
        assert_eq!(latitudes, vec![2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_untracked_vehicle_accumulates_no_history() {
        let mut store = create_test_store();

        for _ in 0..10 {
            store
                .update_location("veh-1", &LocationUpdate::position(1.0, 2.0))
                .unwrap();
        }

        assert!(store.history("veh-1").is_empty());
    }

    #[test]
    fn test_tracking_gate_resumes_without_backfill() {
        let mut store = create_test_store();
        store.start_tracking("veh-1").unwrap();

        store
            .update_location("veh-1", &LocationUpdate::position(1.0, 0.0))
            .unwrap();
        store
            .update_location("veh-1", &LocationUpdate::position(2.0, 0.0))
            .unwrap();
        assert_eq!(store.history("veh-1").len(), 2);

        // Stopping keeps existing history but halts accumulation.
        store.stop_tracking("veh-1").unwrap();
        store
            .update_location("veh-1", &LocationUpdate::position(3.0, 0.0))
            .unwrap();
        assert_eq!(store.history("veh-1").len(), 2);

        // Resuming continues from the retained list, no retroactive entries.
        store.start_tracking("veh-1").unwrap();
        store
            .update_location("veh-1", &LocationUpdate::position(4.0, 0.0))
            .unwrap();
        let history = store.history("veh-1");
        assert_eq!(history.len(), 3);
        assert_eq!(history[2].record.coordinates.latitude, 4.0);
    }

    #[test]
    fn test_tracking_toggles_are_idempotent() {
        let mut store = create_test_store();

        store.start_tracking("veh-1").unwrap();
        store.start_tracking("veh-1").unwrap();
        assert!(store.is_tracked("veh-1"));
        assert_eq!(store.tracked().len(), 1);

        store.stop_tracking("veh-1").unwrap();
        store.stop_tracking("veh-1").unwrap();
        assert!(!store.is_tracked("veh-1"));
        assert!(store.tracked().is_empty());
    }

    #[test]
    fn test_clear_history_keeps_current_and_tracking() {
        let mut store = create_test_store();
        store.start_tracking("veh-1").unwrap();
        store
            .update_location("veh-1", &LocationUpdate::position(1.0, 2.0))
            .unwrap();

        store.clear_history().unwrap();

        assert!(store.history("veh-1").is_empty());
        assert!(store.get_location("veh-1").is_some());
        assert!(store.is_tracked("veh-1"));
    }

    #[test]
    fn test_snapshot_round_trip_restores_state() {
        let temp_dir = std::env::temp_dir();
        let db_path = temp_dir.join(format!("fleetpulse_store_{}.db", std::process::id()));
        let _ = std::fs::remove_file(&db_path);

        {
            let snapshot = SnapshotStore::open(&db_path).unwrap();
            let mut store = LocationStore::open(snapshot, DEFAULT_MAX_HISTORY).unwrap();
            store.start_tracking("veh-1").unwrap();
            store
                .update_location("veh-1", &LocationUpdate::position(48.2, 16.37))
                .unwrap();
            store
                .update_location("veh-2", &LocationUpdate::position(52.5, 13.4))
                .unwrap();
        }

        // A fresh engine process rehydrates identical state.
        let snapshot = SnapshotStore::open(&db_path).unwrap();
        let store = LocationStore::open(snapshot, DEFAULT_MAX_HISTORY).unwrap();

        assert_eq!(
            store.get_location("veh-1").unwrap().coordinates.latitude,
            48.2
        );
        assert_eq!(
            store.get_location("veh-2").unwrap().coordinates.latitude,
            52.5
        );
        assert_eq!(store.history("veh-1").len(), 1);
        assert!(store.history("veh-2").is_empty());
        assert!(store.is_tracked("veh-1"));
        assert!(!store.is_tracked("veh-2"));

        let _ = std::fs::remove_file(&db_path);
        let _ = std::fs::remove_file(db_path.with_extension("db-wal"));
        let _ = std::fs::remove_file(db_path.with_extension("db-shm"));
    }

    #[test]
    fn test_evict_oldest_never_removes_newest() {
        let mut entries: Vec<HistoryEntry> = (0..3)
            .map(|i| {
                let mut record = LocationRecord::new("veh-1");
                record.apply(&LocationUpdate::position(f64::from(i), 0.0));
                HistoryEntry::new(record)
            })
            .collect();
        // Backdate the newest entry so it would sort as the oldest.
        entries[2].record.timestamp = entries[0].record.timestamp - chrono::Duration::hours(1);

        evict_oldest(&mut entries, 2);

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].record.coordinates.latitude, 2.0);
    }
}
