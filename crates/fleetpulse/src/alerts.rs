//! Threshold alert evaluation.
//!
//! Two periodic scans share this module: a maintenance scan classifying
//! service dates into severity tiers and a safety scan checking battery and
//! engine-temperature limits on active vehicles. Both re-fetch the full
//! vehicle table every tick and re-emit alerts for as long as a condition
//! holds, unless a dedupe window is configured.

use std::collections::HashMap;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use tracing::warn;

use crate::backend::{VehicleBackend, VehicleRecord};
use crate::notify::{NotificationEvent, NotificationHub, Severity};

/// Days overdue at which a missed service becomes critical.
pub const SERVICE_CRITICAL_DAYS: i64 = 30;

/// Days ahead within which a service counts as due soon.
pub const SERVICE_DUE_SOON_DAYS: i64 = 7;

/// Battery percentage below which the safety scan warns.
pub const LOW_BATTERY_PCT: f64 = 20.0;

/// Engine temperature above which the safety scan raises a hard-stop alert.
///
/// Deliberately above the change-feed's early-warning threshold; a polled
/// value this high is treated as sustained overheating.
pub const ENGINE_TEMP_LIMIT_C: f64 = 95.0;

const SECONDS_PER_DAY: f64 = 86_400.0;

/// Maintenance classification tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MaintenanceTier {
    /// Service missed by at least [`SERVICE_CRITICAL_DAYS`].
    Critical,
    /// Service date has passed.
    Overdue,
    /// Service due within [`SERVICE_DUE_SOON_DAYS`].
    DueSoon,
}

impl MaintenanceTier {
    /// The notification severity this tier maps to.
    #[must_use]
    pub fn severity(self) -> Severity {
        match self {
            Self::Critical => Severity::Error,
            Self::Overdue => Severity::Warning,
            Self::DueSoon => Severity::Info,
        }
    }

    fn alert_kind(self) -> AlertKind {
        match self {
            Self::Critical => AlertKind::ServiceCritical,
            Self::Overdue => AlertKind::ServiceOverdue,
            Self::DueSoon => AlertKind::ServiceDueSoon,
        }
    }
}

/// Kinds of threshold alerts, used as dedupe keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlertKind {
    /// Maintenance critically overdue.
    ServiceCritical,
    /// Maintenance overdue.
    ServiceOverdue,
    /// Maintenance due soon.
    ServiceDueSoon,
    /// Battery below the safety threshold.
    LowBattery,
    /// Engine above the safety threshold.
    EngineOverheat,
}

/// Whole days until the service date, rounding up.
///
/// A service due in 36 hours is 2 days away; one missed 12 hours ago is
/// 0 days away (due today).
#[must_use]
pub fn days_until_service(next_service: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    let seconds = (next_service - now).num_seconds();
    #[allow(clippy::cast_possible_truncation)]
    let days = (seconds as f64 / SECONDS_PER_DAY).ceil() as i64;
    days
}

/// Classify days-until-service into a maintenance tier.
#[must_use]
pub fn classify_maintenance(days_until: i64) -> Option<MaintenanceTier> {
    if days_until <= 0 {
        if days_until.unsigned_abs() >= SERVICE_CRITICAL_DAYS.unsigned_abs() {
            Some(MaintenanceTier::Critical)
        } else {
            Some(MaintenanceTier::Overdue)
        }
    } else if days_until <= SERVICE_DUE_SOON_DAYS {
        Some(MaintenanceTier::DueSoon)
    } else {
        None
    }
}

/// Re-emission policy for repeated alerts.
///
/// With no window (the default), an alert re-emits on every scan tick for as
/// long as its condition holds. With a window, an identical (vehicle, kind)
/// alert is suppressed until the window has elapsed since its last emission.
#[derive(Debug)]
pub struct AlertPolicy {
    window: Option<Duration>,
    last_emitted: HashMap<(String, AlertKind), DateTime<Utc>>,
}

impl AlertPolicy {
    /// Create a policy with an optional dedupe window.
    #[must_use]
    pub fn new(dedupe_window: Option<StdDuration>) -> Self {
        Self {
            window: dedupe_window.and_then(|window| Duration::from_std(window).ok()),
            last_emitted: HashMap::new(),
        }
    }

    /// Whether an alert should be emitted now; records the emission if so.
    pub fn should_emit(&mut self, vehicle_id: &str, kind: AlertKind, now: DateTime<Utc>) -> bool {
        let Some(window) = self.window else {
            return true;
        };
        let key = (vehicle_id.to_string(), kind);
        if let Some(last) = self.last_emitted.get(&key) {
            if now - *last < window {
                return false;
            }
        }
        self.last_emitted.insert(key, now);
        true
    }
}

impl Default for AlertPolicy {
    fn default() -> Self {
        Self::new(None)
    }
}

/// One maintenance-scan pass over the fleet.
///
/// A fetch failure is logged and the pass produces no alerts; it does not
/// affect later passes.
pub async fn maintenance_scan(
    backend: &dyn VehicleBackend,
    hub: &NotificationHub,
    policy: &mut AlertPolicy,
) {
    let vehicles = match backend.fetch_vehicles().await {
        Ok(vehicles) => vehicles,
        Err(err) => {
            warn!(error = %err, "maintenance scan: backend fetch failed, skipping tick");
            return;
        }
    };

    let now = Utc::now();
    for vehicle in &vehicles {
        let Some(next_service) = vehicle.next_service else {
            continue;
        };
        let days = days_until_service(next_service, now);
        let Some(tier) = classify_maintenance(days) else {
            continue;
        };
        if !policy.should_emit(&vehicle.id, tier.alert_kind(), now) {
            continue;
        }
        hub.publish(maintenance_event(vehicle, tier, days));
    }
}

/// One safety-scan pass over the fleet, restricted to active vehicles.
///
/// A fetch failure is logged and the pass produces no alerts; it does not
/// affect later passes.
pub async fn safety_scan(
    backend: &dyn VehicleBackend,
    hub: &NotificationHub,
    policy: &mut AlertPolicy,
) {
    let vehicles = match backend.fetch_vehicles().await {
        Ok(vehicles) => vehicles,
        Err(err) => {
            warn!(error = %err, "safety scan: backend fetch failed, skipping tick");
            return;
        }
    };

    let now = Utc::now();
    for vehicle in &vehicles {
        if !vehicle.status.is_active() {
            continue;
        }
        if let Some(battery) = vehicle.battery_level_pct {
            if battery < LOW_BATTERY_PCT
                && policy.should_emit(&vehicle.id, AlertKind::LowBattery, now)
            {
                hub.publish(NotificationEvent::warning(
                    "Low battery",
                    format!("{} battery at {battery:.0}%", vehicle.license_plate),
                ));
            }
        }
        if let Some(temp) = vehicle.engine_temp_c {
            if temp > ENGINE_TEMP_LIMIT_C
                && policy.should_emit(&vehicle.id, AlertKind::EngineOverheat, now)
            {
                hub.publish_priority(NotificationEvent::error(
                    "Engine overheating",
                    format!("{} engine at {temp:.0} \u{b0}C", vehicle.license_plate),
                ));
            }
        }
    }
}

fn maintenance_event(
    vehicle: &VehicleRecord,
    tier: MaintenanceTier,
    days_until: i64,
) -> NotificationEvent {
    let plate = &vehicle.license_plate;
    let (title, message) = match tier {
        MaintenanceTier::Critical => (
            "Service critically overdue",
            format!("{plate} service overdue by {} days", -days_until),
        ),
        MaintenanceTier::Overdue => {
            if days_until == 0 {
                ("Service overdue", format!("{plate} service is due today"))
            } else {
                (
                    "Service overdue",
                    format!("{plate} service overdue by {} days", -days_until),
                )
            }
        }
        MaintenanceTier::DueSoon => (
            "Service due soon",
            format!("{plate} service due in {days_until} days"),
        ),
    };
    NotificationEvent::new(tier.severity(), title, message)
}
