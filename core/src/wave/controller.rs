// SessionController: owns the Wave lifecycle
//
// Obtains a session identity from the backend, drives the advertiser and the
// scanner with it, forwards discoveries to the backend, and recovers after
// the OS relaunches the process.

use super::advertiser::{Advertiser, AdvertiserNotice};
use super::scanner::{DiscoveryRecord, Scanner, ScannerNotice};
use crate::backend::{ReportDiscoveryArgs, WaveBackend};
use crate::config::WaveConfig;
use crate::location::{LocationCorrelator, LocationFix, SafetyZone, SafetyZoneTracker, ZoneTransition};
use crate::radio::{CentralRadio, PeripheralRadio, RadioError, RestoredPeer};
use crate::store::WavePreferences;
use crate::WaveError;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

// ============================================================================
// OBSERVER
// ============================================================================

/// Receives lifecycle notifications. Held weakly by the controller.
pub trait SessionObserver: Send + Sync {
    fn on_session_started(&self, session_id: &str);
    fn on_session_stopped(&self, session_id: &str);
}

/// The session currently served over the air
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: String,
    pub active: bool,
}

// ============================================================================
// CONTROLLER
// ============================================================================

pub struct SessionController {
    backend: Arc<dyn WaveBackend>,
    advertiser: Arc<Advertiser>,
    scanner: Arc<Scanner>,
    location: Arc<LocationCorrelator>,
    preferences: WavePreferences,
    /// Serializes start, stop and recovery
    lifecycle: tokio::sync::Mutex<()>,
    session: RwLock<Option<Session>>,
    observer: RwLock<Option<Weak<dyn SessionObserver>>>,
    zone: Mutex<SafetyZoneTracker>,
    /// Set when the safety zone stopped a running session
    suspended_by_zone: AtomicBool,
}

impl SessionController {
    /// Build the controller with its advertiser and scanner.
    ///
    /// Must be called inside a tokio runtime: discoveries, radio notices and
    /// location fixes are each drained by their own task.
    pub fn new(
        config: &WaveConfig,
        backend: Arc<dyn WaveBackend>,
        peripheral: Arc<dyn PeripheralRadio>,
        central: Arc<dyn CentralRadio>,
        location: Arc<LocationCorrelator>,
        preferences: WavePreferences,
    ) -> Arc<Self> {
        let service = config.service_id();
        let (discoveries_tx, discoveries_rx) = mpsc::unbounded_channel();
        let (advertiser, notices_rx) = Advertiser::new(peripheral, service);
        let (scanner, scanner_notices_rx) = Scanner::new(
            central,
            service,
            location.clone(),
            config.handshake_timeout(),
            discoveries_tx,
        );
        let fixes_rx = location.subscribe();

        let controller = Arc::new(Self {
            backend,
            advertiser,
            scanner,
            location,
            preferences,
            lifecycle: tokio::sync::Mutex::new(()),
            session: RwLock::new(None),
            observer: RwLock::new(None),
            zone: Mutex::new(SafetyZoneTracker::default()),
            suspended_by_zone: AtomicBool::new(false),
        });

        controller.spawn_pumps(discoveries_rx, notices_rx, scanner_notices_rx, fixes_rx);
        info!(%service, "Wave session controller ready");
        controller
    }

    fn spawn_pumps(
        self: &Arc<Self>,
        mut discoveries: mpsc::UnboundedReceiver<DiscoveryRecord>,
        mut notices: mpsc::UnboundedReceiver<AdvertiserNotice>,
        mut scanner_notices: mpsc::UnboundedReceiver<ScannerNotice>,
        mut fixes: broadcast::Receiver<LocationFix>,
    ) {
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            while let Some(record) = discoveries.recv().await {
                let Some(controller) = weak.upgrade() else {
                    break;
                };
                controller.on_discovered(record);
            }
        });

        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            while let Some(notice) = notices.recv().await {
                let Some(controller) = weak.upgrade() else {
                    break;
                };
                match notice {
                    AdvertiserNotice::IdentityRevoked => controller.on_identity_revoked().await,
                }
            }
        });

        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            while let Some(notice) = scanner_notices.recv().await {
                let Some(controller) = weak.upgrade() else {
                    break;
                };
                match notice {
                    ScannerNotice::Restored(peers) => controller.on_central_restored(peers).await,
                }
            }
        });

        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            loop {
                let fix = match fixes.recv().await {
                    Ok(fix) => fix,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "Safety zone watcher lagged behind location fixes");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                let Some(controller) = weak.upgrade() else {
                    break;
                };
                controller.on_location_fix(fix).await;
            }
        });
    }

    pub fn set_observer<O: SessionObserver + 'static>(&self, observer: &Arc<O>) {
        let weak: Weak<dyn SessionObserver> = Arc::downgrade(observer) as Weak<dyn SessionObserver>;
        *self.observer.write() = Some(weak);
    }

    pub fn advertiser(&self) -> &Arc<Advertiser> {
        &self.advertiser
    }

    pub fn scanner(&self) -> &Arc<Scanner> {
        &self.scanner
    }

    pub fn location(&self) -> &Arc<LocationCorrelator> {
        &self.location
    }

    pub fn preferences(&self) -> &WavePreferences {
        &self.preferences
    }

    pub fn session(&self) -> Option<Session> {
        self.session.read().clone()
    }

    pub fn session_id(&self) -> Option<String> {
        self.session.read().as_ref().map(|s| s.id.clone())
    }

    pub fn is_active(&self) -> bool {
        self.session.read().as_ref().map(|s| s.active).unwrap_or(false)
    }

    /// Whether a safety zone is currently holding Wave off
    pub fn is_suspended_by_zone(&self) -> bool {
        self.suspended_by_zone.load(Ordering::SeqCst)
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Obtain a session identity and start both radio roles.
    ///
    /// No-op while a session is active or an identity is already being
    /// served. On radio failure everything started so far is rolled back.
    pub async fn start(&self) -> Result<(), WaveError> {
        let _lifecycle = self.lifecycle.lock().await;
        self.start_locked().await
    }

    async fn start_locked(&self) -> Result<(), WaveError> {
        if self.session.read().is_some() || self.advertiser.identity().is_some() {
            debug!("Wave already running");
            return Ok(());
        }

        let info = self
            .backend
            .start_session()
            .await
            .map_err(WaveError::BackendStartFailed)?;
        let session_id = info.session_id;

        if session_id.is_empty() {
            return Err(WaveError::IdentityMissing);
        }
        if let Err(e) = self.advertiser.set_identity(&session_id) {
            self.abandon_backend_session(&session_id).await;
            return Err(WaveError::InvalidIdentity(e));
        }

        self.location.start_monitoring();

        if let Err(e) = self.start_radios().await {
            warn!(error = %e, %session_id, "Failed to start radios; rolling back");
            self.advertiser.stop().await;
            self.scanner.stop().await;
            self.advertiser.clear_identity();
            self.abandon_backend_session(&session_id).await;
            return Err(WaveError::Radio(e));
        }

        *self.session.write() = Some(Session {
            id: session_id.clone(),
            active: true,
        });
        self.suspended_by_zone.store(false, Ordering::SeqCst);

        info!(%session_id, "Wave started");
        self.notify(|observer| observer.on_session_started(&session_id));
        Ok(())
    }

    async fn start_radios(&self) -> Result<(), RadioError> {
        self.advertiser.start().await?;
        self.scanner.start().await?;
        Ok(())
    }

    async fn abandon_backend_session(&self, session_id: &str) {
        if let Err(e) = self.backend.stop_session(session_id).await {
            warn!(error = %WaveError::BackendStopFailed(e), session_id, "Failed to release backend session");
        }
    }

    /// End the active session. The backend is told first, but local teardown
    /// happens whether or not it succeeds.
    pub async fn stop(&self) {
        let _lifecycle = self.lifecycle.lock().await;
        self.stop_locked().await;
    }

    async fn stop_locked(&self) {
        let Some(session) = self.session() else {
            debug!("Wave not running");
            return;
        };

        if let Err(e) = self.backend.stop_session(&session.id).await {
            warn!(
                error = %WaveError::BackendStopFailed(e),
                session_id = %session.id,
                "Backend stop failed; tearing down locally"
            );
        }

        self.teardown().await;
        info!(session_id = %session.id, "Wave stopped");
        self.notify(|observer| observer.on_session_stopped(&session.id));
    }

    async fn teardown(&self) {
        self.advertiser.stop().await;
        self.scanner.stop().await;
        self.advertiser.clear_identity();
        *self.session.write() = None;
    }

    /// Persist the user's choice and start or stop accordingly
    pub async fn set_service_enabled(&self, enabled: bool) -> Result<(), WaveError> {
        self.preferences
            .set_service_enabled(enabled)
            .map_err(WaveError::Storage)?;
        info!(enabled, "Wave service preference updated");

        if enabled {
            if self.zone.lock().is_inside() {
                info!("Inside safety zone; Wave will start after leaving it");
                self.suspended_by_zone.store(true, Ordering::SeqCst);
                return Ok(());
            }
            self.start().await
        } else {
            self.suspended_by_zone.store(false, Ordering::SeqCst);
            self.stop().await;
            Ok(())
        }
    }

    pub fn service_enabled(&self) -> Result<bool, WaveError> {
        self.preferences.service_enabled().map_err(WaveError::Storage)
    }

    /// Bring Wave back after a cold start, a relaunch or a wake-up push.
    ///
    /// Starts only when the persisted flag allows it and no safety zone is
    /// holding Wave off.
    pub async fn recover_state(&self) -> Result<(), WaveError> {
        let _lifecycle = self.lifecycle.lock().await;
        self.recover_locked().await
    }

    async fn recover_locked(&self) -> Result<(), WaveError> {
        if !self.service_enabled()? {
            debug!("Wave disabled by user; not recovering");
            return Ok(());
        }
        if self.zone.lock().is_inside() {
            debug!("Inside safety zone; not recovering");
            self.suspended_by_zone.store(true, Ordering::SeqCst);
            return Ok(());
        }

        info!("Recovering Wave state");
        self.start_locked().await
    }

    // ------------------------------------------------------------------------
    // Discoveries
    // ------------------------------------------------------------------------

    /// Report a discovery under the active session.
    ///
    /// The peer stays claimed while the report is in flight, becomes
    /// processed on success and is released on failure so a later discovery
    /// retries it.
    pub fn on_discovered(&self, record: DiscoveryRecord) {
        if record.activation != self.scanner.dedup().activation() {
            debug!(peer = %record.peer, "Discovery from a previous activation; dropping");
            return;
        }

        let session_id = self
            .session
            .read()
            .as_ref()
            .filter(|s| s.active)
            .map(|s| s.id.clone());

        let Some(session_id) = session_id else {
            debug!(peer = %record.peer, "Discovery without an active session; dropping");
            self.scanner.dedup().release(&record.peer, record.activation);
            return;
        };

        let args = ReportDiscoveryArgs::new(&session_id, &record.discovered_id, record.location.as_ref());
        let backend = self.backend.clone();
        let scanner = self.scanner.clone();

        tokio::spawn(async move {
            match backend.report_discovery(args).await {
                Ok(()) => {
                    scanner.dedup().mark_processed(&record.peer, record.activation);
                    info!(
                        peer = %record.peer,
                        discovered = %record.discovered_id,
                        "Discovery reported"
                    );
                }
                Err(e) => {
                    scanner.dedup().release(&record.peer, record.activation);
                    warn!(
                        peer = %record.peer,
                        error = %WaveError::BackendReportFailed(e),
                        "Discovery report failed; will retry on next sighting"
                    );
                }
            }
        });
    }

    // ------------------------------------------------------------------------
    // Restoration
    // ------------------------------------------------------------------------

    /// The advertiser dropped a restored identity: forget the old session and
    /// mint a new one if the user still wants Wave on.
    async fn on_identity_revoked(&self) {
        let _lifecycle = self.lifecycle.lock().await;

        let stale = self.session.write().take();
        if let Some(stale) = stale {
            warn!(session_id = %stale.id, "Discarding session after radio restoration");
            self.abandon_backend_session(&stale.id).await;
            self.notify(|observer| observer.on_session_stopped(&stale.id));
        }
        self.advertiser.clear_identity();

        if let Err(e) = self.recover_locked().await {
            warn!(error = %e, "Failed to restart Wave after restoration");
        }
        if self.session.read().is_none() {
            self.scanner.stop().await;
        }
    }

    /// The OS handed back scanner state. It is resumed only when a session
    /// is active or recovery starts one; otherwise scanning stays off.
    async fn on_central_restored(&self, peers: Vec<RestoredPeer>) {
        let _lifecycle = self.lifecycle.lock().await;

        if self.session.read().is_none() {
            if let Err(e) = self.recover_locked().await {
                warn!(error = %e, "Failed to restart Wave after restoration");
            }
        }

        if self.is_active() {
            self.scanner.restore(peers).await;
        } else {
            debug!(count = peers.len(), "Wave is off; discarding restored peers");
            self.scanner.discard_restored(peers).await;
        }
    }

    // ------------------------------------------------------------------------
    // Safety zone
    // ------------------------------------------------------------------------

    /// Replace the safety zone and evaluate it against the latest fix
    pub async fn set_safety_zone(&self, zone: Option<SafetyZone>) {
        self.zone.lock().set_zone(zone);

        if let Some(fix) = self.location.current_fix() {
            self.on_location_fix(fix).await;
        }
        if !self.zone.lock().is_inside() {
            self.resume_after_zone().await;
        }
    }

    pub fn safety_zone(&self) -> Option<SafetyZone> {
        self.zone.lock().zone().copied()
    }

    async fn on_location_fix(&self, fix: LocationFix) {
        let transition = self.zone.lock().observe(&fix);

        match transition {
            Some(ZoneTransition::Entered) => {
                if self.is_active() {
                    info!("Entered safety zone; suspending Wave");
                    self.suspended_by_zone.store(true, Ordering::SeqCst);
                    self.stop().await;
                }
            }
            Some(ZoneTransition::Exited) => {
                let restart = self
                    .zone
                    .lock()
                    .zone()
                    .map(|z| z.enable_wave_after_exit)
                    .unwrap_or(false);
                if restart {
                    info!("Left safety zone");
                    self.resume_after_zone().await;
                } else {
                    self.suspended_by_zone.store(false, Ordering::SeqCst);
                }
            }
            None => {}
        }
    }

    async fn resume_after_zone(&self) {
        if !self.suspended_by_zone.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Err(e) = self.recover_state().await {
            warn!(error = %e, "Failed to resume Wave after safety zone");
        }
    }

    fn notify(&self, f: impl FnOnce(&dyn SessionObserver)) {
        let observer = self.observer.read().as_ref().and_then(|w| w.upgrade());
        if let Some(observer) = observer {
            f(observer.as_ref());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendError, MockWaveBackend, SessionInfo};
    use crate::location::AuthorizationStatus;
    use crate::radio::{PowerState, ServiceId};
    use crate::sim::{SimAir, SimLocationProvider};
    use crate::store::MemoryStorage;
    use crate::wave::{AdvertiserState, ScannerState};
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingObserver {
        events: Mutex<Vec<String>>,
    }

    impl SessionObserver for RecordingObserver {
        fn on_session_started(&self, session_id: &str) {
            self.events.lock().push(format!("started:{}", session_id));
        }

        fn on_session_stopped(&self, session_id: &str) {
            self.events.lock().push(format!("stopped:{}", session_id));
        }
    }

    fn config() -> WaveConfig {
        WaveConfig {
            environment: crate::config::WaveEnvironment::Development,
            ..Default::default()
        }
    }

    fn controller_with(backend: MockWaveBackend, air: &Arc<SimAir>) -> Arc<SessionController> {
        let backend: Arc<dyn WaveBackend> = Arc::new(backend);
        let device = air.add_device("LOCAL");
        let provider = Arc::new(SimLocationProvider::new(AuthorizationStatus::Always));
        let location = LocationCorrelator::new(provider, backend.clone(), ServiceId::DEVELOPMENT);
        let preferences = WavePreferences::new(Arc::new(MemoryStorage::new()));
        SessionController::new(
            &config(),
            backend,
            device.peripheral(),
            device.central(),
            location,
            preferences,
        )
    }

    #[tokio::test]
    async fn test_start_sets_session_and_notifies() {
        let mut backend = MockWaveBackend::new();
        backend
            .expect_start_session()
            .times(1)
            .returning(|| Ok(SessionInfo { session_id: "S1".into() }));
        let air = SimAir::new();
        let controller = controller_with(backend, &air);
        let observer = Arc::new(RecordingObserver::default());
        controller.set_observer(&observer);

        controller.start().await.unwrap();
        controller.start().await.unwrap();

        assert!(controller.is_active());
        assert_eq!(controller.session_id().as_deref(), Some("S1"));
        assert_eq!(controller.advertiser().state(), AdvertiserState::Advertising);
        assert_eq!(controller.scanner().state(), ScannerState::Scanning);
        assert_eq!(*observer.events.lock(), vec!["started:S1".to_string()]);
    }

    #[tokio::test]
    async fn test_backend_start_failure_leaves_idle() {
        let mut backend = MockWaveBackend::new();
        backend
            .expect_start_session()
            .returning(|| Err(BackendError::Transport("offline".into())));
        let air = SimAir::new();
        let controller = controller_with(backend, &air);

        let result = controller.start().await;
        assert!(matches!(result, Err(WaveError::BackendStartFailed(_))));
        assert!(!controller.is_active());
        assert!(controller.advertiser().identity().is_none());
        assert_eq!(controller.scanner().state(), ScannerState::Idle);
    }

    #[tokio::test]
    async fn test_empty_session_id_rejected() {
        let mut backend = MockWaveBackend::new();
        backend
            .expect_start_session()
            .returning(|| Ok(SessionInfo { session_id: String::new() }));
        let air = SimAir::new();
        let controller = controller_with(backend, &air);

        assert!(matches!(controller.start().await, Err(WaveError::IdentityMissing)));
        assert!(!controller.is_active());
    }

    #[tokio::test]
    async fn test_radio_off_still_activates_session() {
        let mut backend = MockWaveBackend::new();
        backend
            .expect_start_session()
            .returning(|| Ok(SessionInfo { session_id: "S1".into() }));
        let air = SimAir::new();
        let controller = controller_with(backend, &air);
        air.device("LOCAL").expect("device").set_power(PowerState::PoweredOff);

        controller.start().await.unwrap();
        assert!(controller.is_active());
        assert_eq!(controller.advertiser().state(), AdvertiserState::PendingRadioOn);
        assert_eq!(controller.scanner().state(), ScannerState::PendingRadioOn);
    }

    #[tokio::test]
    async fn test_stop_tears_down_when_backend_fails() {
        let mut backend = MockWaveBackend::new();
        backend
            .expect_start_session()
            .returning(|| Ok(SessionInfo { session_id: "S1".into() }));
        backend
            .expect_stop_session()
            .times(1)
            .returning(|_| Err(BackendError::Unauthenticated));
        let air = SimAir::new();
        let controller = controller_with(backend, &air);
        let observer = Arc::new(RecordingObserver::default());
        controller.set_observer(&observer);

        controller.start().await.unwrap();
        controller.stop().await;
        controller.stop().await;

        assert!(!controller.is_active());
        assert!(controller.advertiser().identity().is_none());
        assert_eq!(controller.advertiser().state(), AdvertiserState::Idle);
        assert_eq!(controller.scanner().state(), ScannerState::Idle);
        assert_eq!(
            *observer.events.lock(),
            vec!["started:S1".to_string(), "stopped:S1".to_string()]
        );
    }

    #[tokio::test]
    async fn test_dropped_observer_is_not_called() {
        let mut backend = MockWaveBackend::new();
        backend
            .expect_start_session()
            .returning(|| Ok(SessionInfo { session_id: "S1".into() }));
        let air = SimAir::new();
        let controller = controller_with(backend, &air);
        let observer = Arc::new(RecordingObserver::default());
        controller.set_observer(&observer);
        drop(observer);

        controller.start().await.unwrap();
        assert!(controller.is_active());
    }

    #[tokio::test]
    async fn test_discovery_without_session_is_released() {
        let backend = MockWaveBackend::new();
        let air = SimAir::new();
        let controller = controller_with(backend, &air);

        let dedup = controller.scanner().dedup();
        let activation = dedup.reset();
        let peer = crate::radio::PeerHandle::from("P1");
        assert!(dedup.try_begin(&peer, activation));

        controller.on_discovered(DiscoveryRecord {
            peer: peer.clone(),
            discovered_id: "S2".into(),
            location: None,
            observed_at_ms: 0,
            activation,
        });

        assert!(dedup.state(&peer).is_none());
    }

    #[tokio::test]
    async fn test_discovery_from_previous_activation_is_not_reported() {
        let mut backend = MockWaveBackend::new();
        let mut ids = vec!["S2".to_string(), "S1".to_string()];
        backend
            .expect_start_session()
            .times(2)
            .returning(move || Ok(SessionInfo { session_id: ids.pop().unwrap() }));
        backend.expect_stop_session().returning(|_| Ok(()));
        let reported = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = reported.clone();
        backend.expect_report_discovery().returning(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        let air = SimAir::new();
        let controller = controller_with(backend, &air);

        controller.start().await.unwrap();
        let old_activation = controller.scanner().dedup().activation();
        controller.stop().await;
        controller.start().await.unwrap();
        assert_eq!(controller.session_id().as_deref(), Some("S2"));
        assert_ne!(controller.scanner().dedup().activation(), old_activation);

        controller.on_discovered(DiscoveryRecord {
            peer: crate::radio::PeerHandle::from("P1"),
            discovered_id: "OLD".into(),
            location: None,
            observed_at_ms: 0,
            activation: old_activation,
        });
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(reported.load(Ordering::SeqCst), 0);
        assert!(controller
            .scanner()
            .dedup()
            .state(&crate::radio::PeerHandle::from("P1"))
            .is_none());
    }

    #[tokio::test]
    async fn test_disable_persists_and_stops() {
        let mut backend = MockWaveBackend::new();
        backend
            .expect_start_session()
            .returning(|| Ok(SessionInfo { session_id: "S1".into() }));
        backend.expect_stop_session().returning(|_| Ok(()));
        let air = SimAir::new();
        let controller = controller_with(backend, &air);

        controller.set_service_enabled(true).await.unwrap();
        assert!(controller.is_active());

        controller.set_service_enabled(false).await.unwrap();
        assert!(!controller.is_active());
        assert!(!controller.service_enabled().unwrap());

        // Recovery honors the persisted flag
        controller.recover_state().await.unwrap();
        assert!(!controller.is_active());
    }

    #[tokio::test]
    async fn test_safety_zone_suspends_and_resumes() {
        let mut backend = MockWaveBackend::new();
        let mut next = 0;
        backend.expect_start_session().returning(move || {
            next += 1;
            Ok(SessionInfo { session_id: format!("S{}", next) })
        });
        backend.expect_stop_session().returning(|_| Ok(()));
        backend.expect_update_location().returning(|_| Ok(()));
        let air = SimAir::new();
        let controller = controller_with(backend, &air);

        controller
            .set_safety_zone(Some(SafetyZone::new(52.52, 13.405, 300.0)))
            .await;
        controller.start().await.unwrap();
        assert_eq!(controller.session_id().as_deref(), Some("S1"));

        controller
            .location()
            .handle_fix(LocationFix::new(52.52, 13.405, 0.0, 5.0, 1));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!controller.is_active());
        assert!(controller.is_suspended_by_zone());
        // The user's preference is untouched
        assert!(controller.service_enabled().unwrap());

        controller
            .location()
            .handle_fix(LocationFix::new(52.60, 13.405, 0.0, 5.0, 2));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(controller.is_active());
        assert_eq!(controller.session_id().as_deref(), Some("S2"));
        assert!(!controller.is_suspended_by_zone());
    }
}
