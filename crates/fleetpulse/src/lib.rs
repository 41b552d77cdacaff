//! `fleetpulse` - Real-time fleet telemetry tracking and threshold alerting
//!
//! This library provides the core engine of a fleet-operations application:
//! live per-vehicle location state with bounded history, a local SQLite
//! snapshot mirror, typed backend change feeds, and periodic maintenance and
//! safety scans that publish severity-tiered notifications.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod alerts;
pub mod backend;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod feed;
pub mod logging;
pub mod notify;
pub mod store;
pub mod telemetry;

pub use backend::{HttpBackend, VehicleBackend, VehicleRecord};
pub use config::Config;
pub use engine::{EngineOptions, TrackingEngine};
pub use error::{Error, Result};
pub use feed::{ChangeEvent, ChangeFeedSource, ChannelFeed, EntityKind, FeedEvent};
pub use logging::init_logging;
pub use notify::{NotificationEvent, NotificationHub, Severity};
pub use store::{LocationStore, SnapshotStore};
pub use telemetry::{Coordinates, HistoryEntry, LocationRecord, LocationUpdate};
