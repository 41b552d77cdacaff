//! The tracking engine context.
//!
//! Owns the mutex-serialized location store, the notification hub, the
//! backend handle, the three change-feed listeners, and both scan timers.
//! Constructed explicitly, torn down atomically with [`TrackingEngine::dispose`].

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::alerts::{self, AlertPolicy};
use crate::backend::VehicleBackend;
use crate::config::Config;
use crate::error::Result;
use crate::feed::{self, ChangeFeedSource, EntityKind};
use crate::notify::{NotificationEvent, NotificationHub};
use crate::store::LocationStore;
use crate::telemetry::{
    HistoryEntry, LocationRecord, LocationUpdate, SimulatedTelemetry, TelemetryEstimator,
};

/// Scheduling options for the engine's periodic tasks.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Maintenance scan cadence.
    pub maintenance_interval: Duration,
    /// Safety scan cadence.
    pub safety_interval: Duration,
    /// Suppression window for repeated identical alerts; `None` re-emits
    /// every tick.
    pub dedupe_window: Option<Duration>,
    /// Cadence for re-seeding locations from the backend; `None` seeds only
    /// at startup.
    pub reseed_interval: Option<Duration>,
}

impl EngineOptions {
    /// Derive engine options from the application configuration.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            maintenance_interval: config.maintenance_interval(),
            safety_interval: config.safety_interval(),
            dedupe_window: config.dedupe_window(),
            reseed_interval: config.reseed_interval(),
        }
    }
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            maintenance_interval: Duration::from_secs(60),
            safety_interval: Duration::from_secs(30),
            dedupe_window: None,
            reseed_interval: None,
        }
    }
}

struct EngineInner {
    store: Mutex<LocationStore>,
    hub: NotificationHub,
    backend: Arc<dyn VehicleBackend>,
    estimator: Arc<dyn TelemetryEstimator>,
    options: EngineOptions,
}

/// The real-time tracking and alerting engine.
///
/// All state lives behind this context; there is no ambient global. The
/// engine is inert until [`start`](Self::start) spawns its listener and
/// timer tasks, and [`dispose`](Self::dispose) aborts them all together.
pub struct TrackingEngine {
    inner: Arc<EngineInner>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl fmt::Debug for TrackingEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackingEngine")
            .field("options", &self.inner.options)
            .finish_non_exhaustive()
    }
}

impl TrackingEngine {
    /// Create an engine with the simulated telemetry estimator.
    #[must_use]
    pub fn new(
        store: LocationStore,
        backend: Arc<dyn VehicleBackend>,
        options: EngineOptions,
    ) -> Self {
        Self::with_estimator(store, backend, options, Arc::new(SimulatedTelemetry))
    }

    /// Create an engine with a custom telemetry estimator.
    #[must_use]
    pub fn with_estimator(
        store: LocationStore,
        backend: Arc<dyn VehicleBackend>,
        options: EngineOptions,
        estimator: Arc<dyn TelemetryEstimator>,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                store: Mutex::new(store),
                hub: NotificationHub::default(),
                backend,
                estimator,
                options,
            }),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Subscribe to the standard notification stream.
    #[must_use]
    pub fn notifications(&self) -> broadcast::Receiver<NotificationEvent> {
        self.inner.hub.subscribe()
    }

    /// Subscribe to the high-priority alert stream (blocking toasts).
    #[must_use]
    pub fn priority_alerts(&self) -> broadcast::Receiver<NotificationEvent> {
        self.inner.hub.subscribe_priority()
    }

    /// Merge a partial update into a vehicle's current record.
    ///
    /// Unknown vehicle IDs are upserted. See [`LocationStore::update_location`].
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot write-through fails.
    pub async fn update_location(
        &self,
        vehicle_id: &str,
        update: &LocationUpdate,
    ) -> Result<LocationRecord> {
        self.inner.store.lock().await.update_location(vehicle_id, update)
    }

    /// Get a vehicle's current location, if one has been recorded.
    pub async fn get_location(&self, vehicle_id: &str) -> Option<LocationRecord> {
        self.inner.store.lock().await.get_location(vehicle_id).cloned()
    }

    /// Get a vehicle's recorded history, oldest first.
    pub async fn history(&self, vehicle_id: &str) -> Vec<HistoryEntry> {
        self.inner.store.lock().await.history(vehicle_id).to_vec()
    }

    /// Begin accumulating history for a vehicle. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot write-through fails.
    pub async fn start_tracking(&self, vehicle_id: &str) -> Result<()> {
        self.inner.store.lock().await.start_tracking(vehicle_id)
    }

    /// Stop accumulating history for a vehicle. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot write-through fails.
    pub async fn stop_tracking(&self, vehicle_id: &str) -> Result<()> {
        self.inner.store.lock().await.stop_tracking(vehicle_id)
    }

    /// Whether history is being accumulated for a vehicle.
    pub async fn is_tracked(&self, vehicle_id: &str) -> bool {
        self.inner.store.lock().await.is_tracked(vehicle_id)
    }

    /// Drop the recorded history of every vehicle.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot write-through fails.
    pub async fn clear_history(&self) -> Result<()> {
        self.inner.store.lock().await.clear_history()
    }

    /// Seed current locations from vehicles with an active assignment.
    ///
    /// Returns the number of vehicles seeded. A backend failure is logged
    /// and leaves existing state untouched; vehicles without a position are
    /// skipped silently.
    pub async fn load_vehicles_from_backend(&self) -> usize {
        seed(&self.inner).await
    }

    /// Start the three feed listeners, both scan timers, and the optional
    /// reseed timer.
    ///
    /// All subscriptions are established before any task is spawned, so a
    /// subscription failure leaves nothing running.
    ///
    /// # Errors
    ///
    /// Returns an error if a feed subscription cannot be established.
    pub async fn start(&self, feed: Arc<dyn ChangeFeedSource>) -> Result<()> {
        let mut receivers = Vec::new();
        for entity in EntityKind::ALL {
            receivers.push((entity, feed.subscribe(entity).await?));
        }

        let mut tasks = self.tasks.lock().await;

        for (entity, mut rx) in receivers {
            let hub = self.inner.hub.clone();
            tasks.push(tokio::spawn(async move {
                while let Some(event) = rx.recv().await {
                    feed::dispatch(&event, &hub);
                }
                debug!(%entity, "change feed stream closed");
            }));
        }

        {
            let inner = Arc::clone(&self.inner);
            tasks.push(tokio::spawn(async move {
                let mut policy = AlertPolicy::new(inner.options.dedupe_window);
                let mut ticker = interval(inner.options.maintenance_interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    alerts::maintenance_scan(inner.backend.as_ref(), &inner.hub, &mut policy)
                        .await;
                }
            }));
        }

        {
            let inner = Arc::clone(&self.inner);
            tasks.push(tokio::spawn(async move {
                let mut policy = AlertPolicy::new(inner.options.dedupe_window);
                let mut ticker = interval(inner.options.safety_interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    alerts::safety_scan(inner.backend.as_ref(), &inner.hub, &mut policy).await;
                }
            }));
        }

        if let Some(reseed_interval) = self.inner.options.reseed_interval {
            let inner = Arc::clone(&self.inner);
            tasks.push(tokio::spawn(async move {
                let mut ticker = interval(reseed_interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                // The startup seed already ran; skip the immediate first tick.
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    seed(&inner).await;
                }
            }));
        }

        info!(tasks = tasks.len(), "engine started");
        Ok(())
    }

    /// Tear down all listeners and timers atomically.
    ///
    /// Waits for every task to finish aborting; after this returns, no
    /// engine task is running. Safe to call more than once.
    pub async fn dispose(&self) {
        let mut tasks = self.tasks.lock().await;
        for handle in tasks.iter() {
            handle.abort();
        }
        for handle in tasks.drain(..) {
            let _ = handle.await;
        }
        debug!("engine disposed");
    }
}

/// Fetch assigned vehicles and upsert their locations into the store.
async fn seed(inner: &EngineInner) -> usize {
    let vehicles = match inner.backend.fetch_assigned_vehicles().await {
        Ok(vehicles) => vehicles,
        Err(err) => {
            warn!(error = %err, "location seeding: backend fetch failed, keeping existing state");
            return 0;
        }
    };

    let mut store = inner.store.lock().await;
    let mut seeded = 0;
    for vehicle in vehicles {
        // Vehicles without a position are skipped, not an error.
        let Some(coordinates) = vehicle.coordinates() else {
            continue;
        };
        let (speed, heading) = inner.estimator.estimate(&vehicle.id);
        let update = LocationUpdate {
            coordinates: Some(coordinates),
            speed: Some(speed),
            heading: Some(heading),
            driver_id: vehicle.driver.as_ref().map(|driver| driver.id.clone()),
        };
        match store.update_location(&vehicle.id, &update) {
            Ok(_) => seeded += 1,
            Err(err) => {
                warn!(vehicle = %vehicle.id, error = %err, "failed to persist seeded location");
            }
        }
    }
    info!(seeded, "seeded locations from backend");
    seeded
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::testing::{vehicle, StaticBackend};
    use crate::backend::DriverInfo;
    use crate::feed::{ChangeEvent, ChannelFeed, FeedEvent};
    use crate::notify::Severity;
    use crate::store::SnapshotStore;

    #[derive(Debug)]
    struct FixedTelemetry;

    impl TelemetryEstimator for FixedTelemetry {
        fn estimate(&self, _vehicle_id: &str) -> (f64, f64) {
            (42.0, 180.0)
        }
    }

    fn test_engine(backend: Arc<StaticBackend>, options: EngineOptions) -> TrackingEngine {
        let snapshot = SnapshotStore::open_in_memory().expect("in-memory snapshot");
        let store = LocationStore::open(snapshot, 100).expect("location store");
        TrackingEngine::with_estimator(store, backend, options, Arc::new(FixedTelemetry))
    }

    async fn recv_event(
        rx: &mut broadcast::Receiver<NotificationEvent>,
    ) -> NotificationEvent {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for notification")
            .expect("notification channel closed")
    }

    #[tokio::test]
    async fn test_update_and_get_through_engine() {
        let backend = Arc::new(StaticBackend::default());
        let engine = test_engine(backend, EngineOptions::default());

        engine
            .update_location("veh-1", &LocationUpdate::position(48.2, 16.37))
            .await
            .unwrap();

        let record = engine.get_location("veh-1").await.unwrap();
        assert_eq!(record.coordinates.latitude, 48.2);
        assert!(engine.get_location("veh-2").await.is_none());
    }

    #[tokio::test]
    async fn test_tracking_through_engine() {
        let backend = Arc::new(StaticBackend::default());
        let engine = test_engine(backend, EngineOptions::default());

        engine.start_tracking("veh-1").await.unwrap();
        assert!(engine.is_tracked("veh-1").await);

        engine
            .update_location("veh-1", &LocationUpdate::position(1.0, 2.0))
            .await
            .unwrap();
        assert_eq!(engine.history("veh-1").await.len(), 1);

        engine.clear_history().await.unwrap();
        assert!(engine.history("veh-1").await.is_empty());

        engine.stop_tracking("veh-1").await.unwrap();
        assert!(!engine.is_tracked("veh-1").await);
    }

    #[tokio::test]
    async fn test_seed_synthesizes_telemetry_and_maps_driver() {
        let mut assigned = vehicle("veh-1");
        assigned.driver = Some(DriverInfo {
            id: "drv-7".to_string(),
            name: "Alex Meier".to_string(),
            status: None,
        });
        let mut no_position = vehicle("veh-2");
        no_position.lat = None;
        no_position.lng = None;

        let backend = Arc::new(StaticBackend::new(vec![assigned, no_position]));
        let engine = test_engine(backend, EngineOptions::default());

        let seeded = engine.load_vehicles_from_backend().await;
        assert_eq!(seeded, 1);

        let record = engine.get_location("veh-1").await.unwrap();
        assert_eq!(record.speed, Some(42.0));
        assert_eq!(record.heading, Some(180.0));
        assert_eq!(record.driver_id, Some("drv-7".to_string()));
        assert!(engine.get_location("veh-2").await.is_none());
    }

    #[tokio::test]
    async fn test_seed_failure_keeps_existing_state() {
        let backend = Arc::new(StaticBackend::new(vec![vehicle("veh-1")]));
        let engine = test_engine(Arc::clone(&backend), EngineOptions::default());

        engine
            .update_location("veh-1", &LocationUpdate::position(10.0, 20.0))
            .await
            .unwrap();

        backend.set_fail(true);
        let seeded = engine.load_vehicles_from_backend().await;
        assert_eq!(seeded, 0);

        let record = engine.get_location("veh-1").await.unwrap();
        assert_eq!(record.coordinates.latitude, 10.0);
    }

    #[tokio::test]
    async fn test_feed_events_reach_notification_stream() {
        let backend = Arc::new(StaticBackend::default());
        let engine = test_engine(backend, EngineOptions::default());
        let mut rx = engine.notifications();

        let feed = Arc::new(ChannelFeed::new());
        engine.start(Arc::clone(&feed) as Arc<dyn ChangeFeedSource>).await.unwrap();

        feed.push(FeedEvent::Vehicle(ChangeEvent::Insert {
            new: vehicle("veh-1"),
        }))
        .await;

        let event = recv_event(&mut rx).await;
        assert_eq!(event.severity, Severity::Info);
        assert!(event.message.contains("FL-veh-1"));

        engine.dispose().await;
    }

    #[tokio::test]
    async fn test_scan_timers_emit_on_startup_tick() {
        let mut hot = vehicle("veh-1");
        hot.engine_temp_c = Some(96.0);
        let backend = Arc::new(StaticBackend::new(vec![hot]));

        let engine = test_engine(backend, EngineOptions::default());
        let mut priority = engine.priority_alerts();

        let feed = Arc::new(ChannelFeed::new());
        engine.start(Arc::clone(&feed) as Arc<dyn ChangeFeedSource>).await.unwrap();

        // The safety interval's first tick completes immediately.
        let event = recv_event(&mut priority).await;
        assert_eq!(event.severity, Severity::Error);
        assert!(event.title.contains("overheating"));

        engine.dispose().await;
    }

    #[tokio::test]
    async fn test_dispose_tears_down_all_tasks() {
        let backend = Arc::new(StaticBackend::default());
        let engine = test_engine(backend, EngineOptions::default());

        let feed = Arc::new(ChannelFeed::new());
        engine.start(Arc::clone(&feed) as Arc<dyn ChangeFeedSource>).await.unwrap();

        let event = FeedEvent::Vehicle(ChangeEvent::Insert {
            new: vehicle("veh-1"),
        });
        assert!(feed.push(event.clone()).await);

        engine.dispose().await;

        // All listeners are gone: the push finds no live receiver.
        assert!(!feed.push(event).await);

        // Dispose is idempotent.
        engine.dispose().await;
    }

    #[tokio::test]
    async fn test_engine_options_from_config() {
        let mut config = Config::default();
        config.tracking.dedupe_window_secs = 120;
        config.tracking.reseed_interval_secs = 900;

        let options = EngineOptions::from_config(&config);
        assert_eq!(options.maintenance_interval, Duration::from_secs(60));
        assert_eq!(options.safety_interval, Duration::from_secs(30));
        assert_eq!(options.dedupe_window, Some(Duration::from_secs(120)));
        assert_eq!(options.reseed_interval, Some(Duration::from_secs(900)));
    }
}
