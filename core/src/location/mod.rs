//! Location correlation
//!
//! Tracks the device's most recent location fix from the platform location
//! provider, pushes every fix to the backend, and exposes the latest fix so
//! discoveries can be tagged with where they happened.
//!
//! The underlying location stream is a single OS-level subscription, so one
//! [`LocationCorrelator`] is created per process and shared through an `Arc`.

pub mod safety_zone;

use crate::backend::{UpdateLocationArgs, WaveBackend};
use crate::radio::ServiceId;
use crate::WaveError;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub use safety_zone::{SafetyZone, SafetyZoneTracker, ZoneTransition};

/// Capacity of the fix broadcast used by in-process subscribers
const FIX_BROADCAST_CAPACITY: usize = 16;

/// A single location fix
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocationFix {
    pub latitude: f64,
    pub longitude: f64,
    /// Meters above sea level
    pub altitude: f64,
    /// Horizontal accuracy radius in meters
    pub accuracy: f64,
    /// Milliseconds since the Unix epoch
    pub timestamp_ms: u64,
}

impl LocationFix {
    pub fn new(latitude: f64, longitude: f64, altitude: f64, accuracy: f64, timestamp_ms: u64) -> Self {
        Self {
            latitude,
            longitude,
            altitude,
            accuracy,
            timestamp_ms,
        }
    }

    /// Create a fix stamped with the current time
    pub fn now(latitude: f64, longitude: f64, altitude: f64, accuracy: f64) -> Self {
        Self::new(latitude, longitude, altitude, accuracy, now_ms())
    }
}

/// Location authorization granted by the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthorizationStatus {
    NotDetermined,
    Restricted,
    Denied,
    WhenInUse,
    Always,
}

/// Events raised by the platform location provider
#[derive(Debug, Clone, PartialEq)]
pub enum LocationEvent {
    Fix(LocationFix),
    AuthorizationChanged(AuthorizationStatus),
    Failed(String),
}

pub type LocationEventHandler = Box<dyn Fn(LocationEvent) + Send + Sync>;

/// Platform location services
pub trait LocationProvider: Send + Sync {
    fn authorization_status(&self) -> AuthorizationStatus;
    fn request_when_in_use_authorization(&self);
    fn request_always_authorization(&self);
    /// Keep delivering updates while the app is in the background
    fn enable_background_delivery(&self);
    fn start_significant_location_changes(&self);
    fn stop_significant_location_changes(&self);
    fn start_beacon_ranging(&self, beacon: Uuid);
    fn stop_beacon_ranging(&self, beacon: Uuid);
    fn set_event_handler(&self, handler: LocationEventHandler);
}

/// Correlates discoveries with the device's latest location fix
pub struct LocationCorrelator {
    provider: Arc<dyn LocationProvider>,
    backend: Arc<dyn WaveBackend>,
    beacon: Uuid,
    monitoring: Mutex<bool>,
    current: RwLock<Option<LocationFix>>,
    fixes: broadcast::Sender<LocationFix>,
}

impl LocationCorrelator {
    /// Create the correlator and wire the provider callback.
    ///
    /// Must be called inside a tokio runtime: provider events are drained by a
    /// dedicated task so they are handled one at a time, in order.
    pub fn new(
        provider: Arc<dyn LocationProvider>,
        backend: Arc<dyn WaveBackend>,
        service: ServiceId,
    ) -> Arc<Self> {
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let (fixes, _) = broadcast::channel(FIX_BROADCAST_CAPACITY);

        let correlator = Arc::new(Self {
            provider: provider.clone(),
            backend,
            beacon: service.uuid(),
            monitoring: Mutex::new(false),
            current: RwLock::new(None),
            fixes,
        });

        provider.set_event_handler(Box::new(move |event| {
            let _ = events_tx.send(event);
        }));

        let weak = Arc::downgrade(&correlator);
        tokio::spawn(async move {
            while let Some(event) = events_rx.recv().await {
                let Some(correlator) = weak.upgrade() else {
                    break;
                };
                correlator.handle_event(event);
            }
        });

        correlator
    }

    /// Start the significant-change and beacon-ranging subscription
    pub fn start_monitoring(&self) {
        {
            let mut monitoring = self.monitoring.lock();
            if *monitoring {
                return;
            }
            *monitoring = true;
        }

        self.on_authorization_changed(self.provider.authorization_status());
        self.provider.start_significant_location_changes();
        self.provider.start_beacon_ranging(self.beacon);
        info!("Location monitoring started");
    }

    pub fn stop_monitoring(&self) {
        {
            let mut monitoring = self.monitoring.lock();
            if !*monitoring {
                return;
            }
            *monitoring = false;
        }

        self.provider.stop_significant_location_changes();
        self.provider.stop_beacon_ranging(self.beacon);
        info!("Location monitoring stopped");
    }

    pub fn is_monitoring(&self) -> bool {
        *self.monitoring.lock()
    }

    /// Most recently received fix, if any
    pub fn current_fix(&self) -> Option<LocationFix> {
        *self.current.read()
    }

    /// Subscribe to every fix received from now on
    pub fn subscribe(&self) -> broadcast::Receiver<LocationFix> {
        self.fixes.subscribe()
    }

    /// Dispatch one provider event
    pub fn handle_event(&self, event: LocationEvent) {
        match event {
            LocationEvent::Fix(fix) => self.handle_fix(fix),
            LocationEvent::AuthorizationChanged(status) => self.on_authorization_changed(status),
            LocationEvent::Failed(reason) => {
                warn!(%reason, "Location provider failed");
            }
        }
    }

    /// Store a new fix and push it to the backend.
    ///
    /// Each fix is one independent, best-effort backend call; a failed push is
    /// superseded by the next fix.
    pub fn handle_fix(&self, fix: LocationFix) {
        *self.current.write() = Some(fix);
        let _ = self.fixes.send(fix);

        debug!(
            latitude = fix.latitude,
            longitude = fix.longitude,
            accuracy = fix.accuracy,
            "Location fix received"
        );

        let backend = self.backend.clone();
        tokio::spawn(async move {
            if let Err(e) = backend.update_location(UpdateLocationArgs::from(&fix)).await {
                warn!(error = %WaveError::BackendLocationFailed(e), "Failed to post location");
            }
        });
    }

    /// Escalate authorization one step at a time
    pub fn on_authorization_changed(&self, status: AuthorizationStatus) {
        match status {
            AuthorizationStatus::NotDetermined => {
                self.provider.request_when_in_use_authorization();
            }
            AuthorizationStatus::WhenInUse => {
                self.provider.request_always_authorization();
            }
            AuthorizationStatus::Always => {
                self.provider.enable_background_delivery();
            }
            AuthorizationStatus::Restricted | AuthorizationStatus::Denied => {
                warn!(?status, "Location access not granted");
            }
        }
    }
}

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
