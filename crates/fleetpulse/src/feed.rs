//! Change-feed subscription and dispatch.
//!
//! The backend publishes insert/update/delete events for its vehicle,
//! inspection, and assignment tables. This module types those events,
//! validates them at the subscription boundary, and derives notification
//! events from them.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::backend::{AssignmentRecord, InspectionRecord, InspectionStatus, VehicleRecord};
use crate::error::{Error, Result};
use crate::notify::{NotificationEvent, NotificationHub, Severity};

/// Engine temperature above which a feed update raises an early warning.
///
/// Intentionally below the polled hard-stop threshold in the safety scan:
/// the feed reacts to a value that just changed, the scan to a sustained one.
pub const FEED_ENGINE_TEMP_LIMIT_C: f64 = 90.0;

/// Fuel percentage below which a feed update raises a warning.
pub const LOW_FUEL_PCT: f64 = 20.0;

/// Buffer size for per-entity subscription channels.
const FEED_BUFFER: usize = 64;

/// Backend entity tables the engine subscribes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    /// Vehicle records.
    Vehicle,
    /// Inspection records.
    Inspection,
    /// Driver-assignment records.
    Assignment,
}

impl EntityKind {
    /// All subscribed entity kinds.
    pub const ALL: [Self; 3] = [Self::Vehicle, Self::Inspection, Self::Assignment];
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Vehicle => write!(f, "vehicle"),
            Self::Inspection => write!(f, "inspection"),
            Self::Assignment => write!(f, "assignment"),
        }
    }
}

/// The kind of change a feed event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A row was inserted.
    Insert,
    /// A row was updated.
    Update,
    /// A row was deleted.
    Delete,
}

/// A typed change event carrying exactly the payloads its kind requires.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent<T> {
    /// A new row.
    Insert {
        /// The inserted row.
        new: T,
    },
    /// An updated row with its previous value.
    Update {
        /// The row before the update.
        old: T,
        /// The row after the update.
        new: T,
    },
    /// A deleted row.
    Delete {
        /// The deleted row.
        old: T,
    },
}

impl<T> ChangeEvent<T> {
    /// Validate raw old/new payloads into a typed event.
    ///
    /// This is the subscription boundary: downstream handlers can rely on
    /// the payloads their event kind requires being present.
    ///
    /// # Errors
    ///
    /// Returns an error if a payload required by `kind` is missing.
    pub fn from_parts(
        entity: EntityKind,
        kind: EventKind,
        old: Option<T>,
        new: Option<T>,
    ) -> Result<Self> {
        match kind {
            EventKind::Insert => new
                .map(|new| Self::Insert { new })
                .ok_or_else(|| Error::malformed_event(entity, "insert event without new payload")),
            EventKind::Update => match (old, new) {
                (Some(old), Some(new)) => Ok(Self::Update { old, new }),
                (None, _) => Err(Error::malformed_event(
                    entity,
                    "update event without old payload",
                )),
                (_, None) => Err(Error::malformed_event(
                    entity,
                    "update event without new payload",
                )),
            },
            EventKind::Delete => old
                .map(|old| Self::Delete { old })
                .ok_or_else(|| Error::malformed_event(entity, "delete event without old payload")),
        }
    }

    /// The kind of change this event describes.
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Insert { .. } => EventKind::Insert,
            Self::Update { .. } => EventKind::Update,
            Self::Delete { .. } => EventKind::Delete,
        }
    }
}

/// One event from any of the three subscribed entity streams.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    /// A vehicle-table change.
    Vehicle(ChangeEvent<VehicleRecord>),
    /// An inspection-table change.
    Inspection(ChangeEvent<InspectionRecord>),
    /// An assignment-table change.
    Assignment(ChangeEvent<AssignmentRecord>),
}

impl FeedEvent {
    /// The entity stream this event belongs to.
    #[must_use]
    pub fn entity(&self) -> EntityKind {
        match self {
            Self::Vehicle(_) => EntityKind::Vehicle,
            Self::Inspection(_) => EntityKind::Inspection,
            Self::Assignment(_) => EntityKind::Assignment,
        }
    }
}

/// A source of backend change events.
///
/// Implementations wrap whatever transport delivers the backend's change
/// stream (websocket, replication slot, message queue). Reconnection on
/// transport failure is the implementor's responsibility; the engine treats
/// a closed receiver as end-of-stream for that entity.
#[async_trait]
pub trait ChangeFeedSource: Send + Sync {
    /// Open a stream of events for one entity table.
    ///
    /// # Errors
    ///
    /// Returns an error if the subscription cannot be established.
    async fn subscribe(&self, entity: EntityKind) -> Result<mpsc::Receiver<FeedEvent>>;
}

/// In-process feed source.
///
/// Used by tests and by embedders that bridge an external realtime client:
/// subscribe once per entity, then [`push`](Self::push) events in.
#[derive(Debug, Default)]
pub struct ChannelFeed {
    senders: Mutex<HashMap<EntityKind, mpsc::Sender<FeedEvent>>>,
}

impl ChannelFeed {
    /// Create an empty feed with no subscriptions.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver an event to the stream of its entity.
    ///
    /// Returns `false` if nobody has subscribed to that entity or the
    /// subscriber has gone away.
    pub async fn push(&self, event: FeedEvent) -> bool {
        let sender = {
            let senders = self.senders.lock().expect("feed senders lock");
            senders.get(&event.entity()).cloned()
        };
        match sender {
            Some(sender) => sender.send(event).await.is_ok(),
            None => false,
        }
    }
}

#[async_trait]
impl ChangeFeedSource for ChannelFeed {
    async fn subscribe(&self, entity: EntityKind) -> Result<mpsc::Receiver<FeedEvent>> {
        let (tx, rx) = mpsc::channel(FEED_BUFFER);
        self.senders
            .lock()
            .expect("feed senders lock")
            .insert(entity, tx);
        Ok(rx)
    }
}

/// Derive and publish notifications for one feed event.
pub fn dispatch(event: &FeedEvent, hub: &NotificationHub) {
    match event {
        FeedEvent::Vehicle(change) => on_vehicle_event(change, hub),
        FeedEvent::Inspection(change) => on_inspection_event(change, hub),
        FeedEvent::Assignment(change) => on_assignment_event(change, hub),
    }
}

fn on_vehicle_event(change: &ChangeEvent<VehicleRecord>, hub: &NotificationHub) {
    match change {
        ChangeEvent::Insert { new } => {
            hub.publish(NotificationEvent::info(
                "Vehicle added",
                format!("{} ({}) registered in the fleet", new.license_plate, new.model),
            ));
        }
        ChangeEvent::Update { old, new } => {
            if old.status != new.status {
                let severity = if new.status.is_active() {
                    Severity::Success
                } else {
                    Severity::Warning
                };
                hub.publish(NotificationEvent::new(
                    severity,
                    "Vehicle status changed",
                    format!(
                        "{} is now {} (was {})",
                        new.license_plate, new.status, old.status
                    ),
                ));
            }
            if let Some(temp) = new.engine_temp_c {
                if temp > FEED_ENGINE_TEMP_LIMIT_C {
                    hub.publish_priority(NotificationEvent::error(
                        "Engine overheating",
                        format!("{} engine at {temp:.0} \u{b0}C", new.license_plate),
                    ));
                }
            }
            if let Some(fuel) = new.fuel_level_pct {
                if fuel < LOW_FUEL_PCT {
                    hub.publish(NotificationEvent::warning(
                        "Low fuel",
                        format!("{} fuel at {fuel:.0}%", new.license_plate),
                    ));
                }
            }
        }
        ChangeEvent::Delete { .. } => {}
    }
}

fn on_inspection_event(change: &ChangeEvent<InspectionRecord>, hub: &NotificationHub) {
    match change {
        ChangeEvent::Insert { new } => {
            hub.publish(NotificationEvent::info(
                "Inspection scheduled",
                format!("Inspection {} scheduled for vehicle {}", new.id, new.vehicle_id),
            ));
        }
        ChangeEvent::Update { new, .. } => match new.status {
            InspectionStatus::Completed => {
                hub.publish(NotificationEvent::success(
                    "Inspection completed",
                    format!("Vehicle {} passed inspection {}", new.vehicle_id, new.id),
                ));
            }
            InspectionStatus::Failed => {
                hub.publish(NotificationEvent::error(
                    "Inspection failed",
                    format!("Vehicle {} failed inspection {}", new.vehicle_id, new.id),
                ));
            }
            InspectionStatus::Scheduled | InspectionStatus::Unknown => {}
        },
        ChangeEvent::Delete { .. } => {}
    }
}

fn on_assignment_event(change: &ChangeEvent<AssignmentRecord>, hub: &NotificationHub) {
    if let ChangeEvent::Insert { new } = change {
        if new.active {
            hub.publish(NotificationEvent::info(
                "Driver assigned",
                format!("Driver {} assigned to vehicle {}", new.driver_id, new.vehicle_id),
            ));
        }
    }
}
