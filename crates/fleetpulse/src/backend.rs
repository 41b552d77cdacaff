//! Backend data-service client for fleetpulse.
//!
//! The backend owns the authoritative vehicle, inspection, and assignment
//! tables; this module defines their wire models and the read-only access
//! trait the engine consumes, plus the HTTP implementation used in
//! production.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;
use crate::telemetry::Coordinates;

/// Operational status of a vehicle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VehicleStatus {
    /// In service.
    Active,
    /// Pulled out for maintenance.
    Maintenance,
    /// Not in service.
    Inactive,
    /// A wire value this build does not recognize.
    #[serde(other)]
    Unknown,
}

impl VehicleStatus {
    /// Whether the vehicle is currently in service.
    #[must_use]
    pub fn is_active(self) -> bool {
        matches!(self, Self::Active)
    }
}

impl std::fmt::Display for VehicleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Maintenance => write!(f, "maintenance"),
            Self::Inactive => write!(f, "inactive"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Status of an inspection record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InspectionStatus {
    /// Scheduled but not started.
    Scheduled,
    /// Finished successfully.
    Completed,
    /// Finished with defects.
    Failed,
    /// A wire value this build does not recognize.
    #[serde(other)]
    Unknown,
}

impl std::fmt::Display for InspectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Scheduled => write!(f, "scheduled"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// A driver row joined onto a vehicle through its active assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverInfo {
    /// Driver identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Driver status as reported by the backend.
    #[serde(default)]
    pub status: Option<String>,
}

/// A vehicle row as returned by the backend data service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleRecord {
    /// Vehicle identifier.
    pub id: String,
    /// License plate.
    pub license_plate: String,
    /// Model name.
    pub model: String,
    /// Operational status.
    pub status: VehicleStatus,
    /// Last known latitude, if the vehicle has reported a position.
    #[serde(default)]
    pub lat: Option<f64>,
    /// Last known longitude, if the vehicle has reported a position.
    #[serde(default)]
    pub lng: Option<f64>,
    /// Fuel level in percent.
    #[serde(default)]
    pub fuel_level_pct: Option<f64>,
    /// Battery level in percent.
    #[serde(default)]
    pub battery_level_pct: Option<f64>,
    /// Engine temperature in degrees Celsius.
    #[serde(default)]
    pub engine_temp_c: Option<f64>,
    /// Next scheduled service date.
    #[serde(default)]
    pub next_service: Option<DateTime<Utc>>,
    /// When the backend last updated this row.
    pub updated_at: DateTime<Utc>,
    /// The assigned driver, present on inner-joined queries.
    #[serde(default)]
    pub driver: Option<DriverInfo>,
}

impl VehicleRecord {
    /// The vehicle's position, if both coordinates are present.
    #[must_use]
    pub fn coordinates(&self) -> Option<Coordinates> {
        match (self.lat, self.lng) {
            (Some(latitude), Some(longitude)) => Some(Coordinates::new(latitude, longitude)),
            _ => None,
        }
    }
}

/// An inspection row as carried on the change feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InspectionRecord {
    /// Inspection identifier.
    pub id: String,
    /// The vehicle being inspected.
    pub vehicle_id: String,
    /// Inspection status.
    pub status: InspectionStatus,
    /// When the inspection is scheduled for.
    #[serde(default)]
    pub scheduled_for: Option<DateTime<Utc>>,
}

/// A driver-assignment row as carried on the change feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignmentRecord {
    /// Assignment identifier.
    pub id: String,
    /// The assigned vehicle.
    pub vehicle_id: String,
    /// The assigned driver.
    pub driver_id: String,
    /// Whether the assignment is currently active.
    pub active: bool,
}

/// Read access to the backend data service.
///
/// Implementations must be cheap to call repeatedly; both threshold scans
/// re-fetch the full vehicle table on every tick.
#[async_trait]
pub trait VehicleBackend: Send + Sync {
    /// Fetch vehicles that currently have an active driver assignment
    /// (inner-join semantics), including the joined driver fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend is unreachable or responds with a
    /// non-success status.
    async fn fetch_assigned_vehicles(&self) -> Result<Vec<VehicleRecord>>;

    /// Fetch the full vehicle table, used by the periodic threshold scans.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend is unreachable or responds with a
    /// non-success status.
    async fn fetch_vehicles(&self) -> Result<Vec<VehicleRecord>>;
}

/// HTTP implementation of [`VehicleBackend`].
#[derive(Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
    api_token: Option<String>,
}

impl HttpBackend {
    /// Create a client for the given backend base URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be constructed.
    pub fn new(
        base_url: impl Into<String>,
        api_token: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self {
            client,
            base_url,
            api_token,
        })
    }

    async fn fetch(&self, path: &str) -> Result<Vec<VehicleRecord>> {
        debug!(path, "fetching from backend");
        let mut request = self.client.get(format!("{}{path}", self.base_url));
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token);
        }
        let vehicles = request
            .send()
            .await?
            .error_for_status()?
            .json::<Vec<VehicleRecord>>()
            .await?;
        Ok(vehicles)
    }
}

impl std::fmt::Debug for HttpBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpBackend")
            .field("base_url", &self.base_url)
            .field("has_token", &self.api_token.is_some())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl VehicleBackend for HttpBackend {
    async fn fetch_assigned_vehicles(&self) -> Result<Vec<VehicleRecord>> {
        self.fetch("/vehicles?assigned=true").await
    }

    async fn fetch_vehicles(&self) -> Result<Vec<VehicleRecord>> {
        self.fetch("/vehicles").await
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory backend used by scan and engine tests.

    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    use super::*;
    use crate::error::Error;

    /// A [`VehicleBackend`] serving a fixed vehicle list, with a switch to
    /// simulate fetch failures.
    #[derive(Debug, Default)]
    pub(crate) struct StaticBackend {
        vehicles: Mutex<Vec<VehicleRecord>>,
        fail: AtomicBool,
    }

    impl StaticBackend {
        pub(crate) fn new(vehicles: Vec<VehicleRecord>) -> Self {
            Self {
                vehicles: Mutex::new(vehicles),
                fail: AtomicBool::new(false),
            }
        }

        pub(crate) fn set_fail(&self, fail: bool) {
            self.fail.store(fail, Ordering::SeqCst);
        }

        pub(crate) fn set_vehicles(&self, vehicles: Vec<VehicleRecord>) {
            *self.vehicles.lock().expect("vehicles lock") = vehicles;
        }
    }

    #[async_trait]
    impl VehicleBackend for StaticBackend {
        async fn fetch_assigned_vehicles(&self) -> Result<Vec<VehicleRecord>> {
            self.fetch_vehicles().await
        }

        async fn fetch_vehicles(&self) -> Result<Vec<VehicleRecord>> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(Error::internal("simulated backend failure"));
            }
            Ok(self.vehicles.lock().expect("vehicles lock").clone())
        }
    }

    /// A minimal active vehicle for tests.
    pub(crate) fn vehicle(id: &str) -> VehicleRecord {
        VehicleRecord {
            id: id.to_string(),
            license_plate: format!("FL-{id}"),
            model: "Sprinter".to_string(),
            status: VehicleStatus::Active,
            lat: Some(48.2),
            lng: Some(16.37),
            fuel_level_pct: Some(80.0),
            battery_level_pct: Some(90.0),
            engine_temp_c: Some(70.0),
            next_service: None,
            updated_at: Utc::now(),
            driver: None,
        }
    }
}
