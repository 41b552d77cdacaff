//! Core telemetry types for fleetpulse.
//!
//! This module defines the fundamental data structures for representing
//! per-vehicle location state and its recorded history.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A geographic position in WGS 84 degrees.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
}

impl Coordinates {
    /// Create coordinates from a latitude/longitude pair.
    #[must_use]
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

/// The current known location and motion state of one vehicle.
///
/// Exactly one record exists per vehicle; every update overwrites it
/// (last-write-wins) and refreshes `timestamp` to the write time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationRecord {
    /// The vehicle this record belongs to.
    pub vehicle_id: String,

    /// Last reported position.
    pub coordinates: Coordinates,

    /// When this record was last written.
    pub timestamp: DateTime<Utc>,

    /// Speed in km/h, if known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,

    /// Heading in degrees clockwise from north, if known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heading: Option<f64>,

    /// The driver currently assigned to the vehicle, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub driver_id: Option<String>,
}

impl LocationRecord {
    /// Create a zero-valued record for a vehicle, stamped with the current time.
    #[must_use]
    pub fn new(vehicle_id: impl Into<String>) -> Self {
        Self {
            vehicle_id: vehicle_id.into(),
            coordinates: Coordinates::default(),
            timestamp: Utc::now(),
            speed: None,
            heading: None,
            driver_id: None,
        }
    }

    /// Merge a partial update onto this record and refresh the timestamp.
    ///
    /// Fields absent from the update keep their current values.
    pub fn apply(&mut self, update: &LocationUpdate) {
        if let Some(coordinates) = update.coordinates {
            self.coordinates = coordinates;
        }
        if let Some(speed) = update.speed {
            self.speed = Some(speed);
        }
        if let Some(heading) = update.heading {
            self.heading = Some(heading);
        }
        if let Some(driver_id) = &update.driver_id {
            self.driver_id = Some(driver_id.clone());
        }
        self.timestamp = Utc::now();
    }
}

/// A partial location update, merged onto the current record on write.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocationUpdate {
    /// New position, if reported.
    pub coordinates: Option<Coordinates>,
    /// New speed in km/h, if reported.
    pub speed: Option<f64>,
    /// New heading in degrees, if reported.
    pub heading: Option<f64>,
    /// New assigned driver, if reported.
    pub driver_id: Option<String>,
}

impl LocationUpdate {
    /// Create an update carrying only a position.
    #[must_use]
    pub fn position(latitude: f64, longitude: f64) -> Self {
        Self {
            coordinates: Some(Coordinates::new(latitude, longitude)),
            ..Self::default()
        }
    }
}

/// One retained history sample for a tracked vehicle.
///
/// Entries are append-only and never mutated; they are removed only by
/// oldest-first eviction once the per-vehicle bound is exceeded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Unique identifier for this entry.
    pub id: Uuid,
    /// The location record captured at append time.
    pub record: LocationRecord,
}

impl HistoryEntry {
    /// Create a history entry with a fresh identifier.
    #[must_use]
    pub fn new(record: LocationRecord) -> Self {
        Self {
            id: Uuid::new_v4(),
            record,
        }
    }
}

/// Estimates telemetry fields the backend cannot provide.
///
/// The backend's vehicle rows carry positions but no authoritative speed or
/// heading, so seeding synthesizes them through this seam. Production
/// deployments plug a real telemetry feed in here.
pub trait TelemetryEstimator: Send + Sync {
    /// Estimate `(speed km/h, heading degrees)` for a vehicle.
    fn estimate(&self, vehicle_id: &str) -> (f64, f64);
}

/// Draws uniform speed/heading samples.
///
/// A stand-in for a real telemetry feed; values are plausible but invented.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimulatedTelemetry;

impl TelemetryEstimator for SimulatedTelemetry {
    fn estimate(&self, _vehicle_id: &str) -> (f64, f64) {
        let mut rng = rand::thread_rng();
        (rng.gen_range(0.0..90.0), rng.gen_range(0.0..360.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location_record_new() {
        let record = LocationRecord::new("veh-1");
        assert_eq!(record.vehicle_id, "veh-1");
        assert_eq!(record.coordinates, Coordinates::default());
        assert!(record.speed.is_none());
        assert!(record.heading.is_none());
        assert!(record.driver_id.is_none());
    }

    #[test]
    fn test_apply_merges_partial_fields() {
        let mut record = LocationRecord::new("veh-1");
        record.apply(&LocationUpdate::position(48.2, 16.4));
        record.apply(&LocationUpdate {
            speed: Some(55.0),
            ..LocationUpdate::default()
        });

        assert_eq!(record.coordinates, Coordinates::new(48.2, 16.4));
        assert_eq!(record.speed, Some(55.0));
        assert!(record.heading.is_none());
    }

    #[test]
    fn test_apply_refreshes_timestamp() {
        let mut record = LocationRecord::new("veh-1");
        let before = record.timestamp;
        record.apply(&LocationUpdate::position(1.0, 2.0));
        assert!(record.timestamp >= before);
    }

    #[test]
    fn test_apply_keeps_unset_fields() {
        let mut record = LocationRecord::new("veh-1");
        record.apply(&LocationUpdate {
            driver_id: Some("drv-9".to_string()),
            ..LocationUpdate::default()
        });
        record.apply(&LocationUpdate::position(1.0, 2.0));

        assert_eq!(record.driver_id, Some("drv-9".to_string()));
    }

    #[test]
    fn test_history_entry_ids_are_unique() {
        let record = LocationRecord::new("veh-1");
        let a = HistoryEntry::new(record.clone());
        let b = HistoryEntry::new(record);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_location_record_serialization() {
        let mut record = LocationRecord::new("veh-1");
        record.apply(&LocationUpdate::position(48.2, 16.4));

        let json = serde_json::to_string(&record).unwrap();
        let deserialized: LocationRecord = serde_json::from_str(&json).unwrap();

        assert_eq!(record, deserialized);
    }

    #[test]
    fn test_location_record_skips_absent_optionals() {
        let record = LocationRecord::new("veh-1");
        let json = serde_json::to_string(&record).unwrap();
        assert!(!json.contains("speed"));
        assert!(!json.contains("driver_id"));
    }

    #[test]
    fn test_simulated_telemetry_ranges() {
        let estimator = SimulatedTelemetry;
        for _ in 0..100 {
            let (speed, heading) = estimator.estimate("veh-1");
            assert!((0.0..90.0).contains(&speed));
            assert!((0.0..360.0).contains(&heading));
        }
    }
}
