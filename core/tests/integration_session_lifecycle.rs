//! Session lifecycle tests
//!
//! Drive a full Wave stack over the simulated radio medium and check how
//! sessions are created, torn down and rotated.
//!
//! Run with: cargo test --test integration_session_lifecycle

use std::sync::Arc;
use std::time::Duration;

use wave_core::location::{AuthorizationStatus, LocationFix, SafetyZone};
use wave_core::radio::{PowerState, ServiceId};
use wave_core::sim::{BackendCall, SimAir, SimBackend, SimDevice, SimLocationProvider};
use wave_core::store::MemoryStorage;
use wave_core::wave::{AdvertiserState, ScannerState};
use wave_core::{WaveConfig, WaveCore, WaveEnvironment, WaveError, WavePlatform};

struct Node {
    device: SimDevice,
    provider: Arc<SimLocationProvider>,
    core: WaveCore,
}

fn config() -> WaveConfig {
    WaveConfig {
        environment: WaveEnvironment::Development,
        ..Default::default()
    }
}

fn node(air: &Arc<SimAir>, backend: &Arc<SimBackend>, name: &str) -> Node {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let device = air.add_device(name);
    let provider = Arc::new(SimLocationProvider::new(AuthorizationStatus::Always));
    let platform = WavePlatform {
        backend: backend.clone(),
        peripheral: device.peripheral(),
        central: device.central(),
        location: provider.clone(),
    };
    let core = WaveCore::with_storage(config(), platform, Arc::new(MemoryStorage::new()));
    Node {
        device,
        provider,
        core,
    }
}

async fn wait_until(what: &str, condition: impl Fn() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {}", what);
}

#[tokio::test]
async fn test_start_advertises_fresh_identity() {
    let air = SimAir::new();
    let backend = Arc::new(SimBackend::new());
    let a = node(&air, &backend, "A");
    let controller = a.core.controller();

    controller.start().await.expect("start failed");

    assert!(controller.is_active());
    assert_eq!(controller.session_id().as_deref(), Some("S1"));
    assert_eq!(controller.advertiser().state(), AdvertiserState::Advertising);
    assert_eq!(controller.scanner().state(), ScannerState::Scanning);
    assert!(a.device.peripheral().is_advertising());
    assert_eq!(
        a.device
            .peripheral()
            .read_local(ServiceId::DEVELOPMENT.characteristic())
            .await,
        Ok(b"S1".to_vec())
    );
}

#[tokio::test]
async fn test_start_waits_for_power_on() {
    let air = SimAir::new();
    let backend = Arc::new(SimBackend::new());
    let a = node(&air, &backend, "A");
    let controller = a.core.controller().clone();
    a.device.set_power(PowerState::PoweredOff);

    controller.start().await.expect("start failed");
    assert!(controller.is_active());
    assert_eq!(controller.advertiser().state(), AdvertiserState::PendingRadioOn);
    assert!(!a.device.peripheral().is_advertising());

    a.device.set_power(PowerState::PoweredOn);
    wait_until("advertising after power-on", || {
        controller.advertiser().state() == AdvertiserState::Advertising
    })
    .await;
    wait_until("scanning after power-on", || {
        controller.scanner().state() == ScannerState::Scanning
    })
    .await;
    assert_eq!(controller.advertiser().identity().as_deref(), Some("S1"));
}

#[tokio::test]
async fn test_start_twice_creates_one_session() {
    let air = SimAir::new();
    let backend = Arc::new(SimBackend::new());
    let a = node(&air, &backend, "A");

    a.core.controller().start().await.unwrap();
    a.core.controller().start().await.unwrap();

    assert_eq!(backend.started_sessions(), vec!["S1".to_string()]);
}

#[tokio::test]
async fn test_concurrent_starts_create_one_session() {
    let air = SimAir::new();
    let backend = Arc::new(SimBackend::new());
    let a = node(&air, &backend, "A");
    let controller = a.core.controller();

    let (first, second) = tokio::join!(controller.start(), controller.start());
    first.unwrap();
    second.unwrap();

    assert_eq!(backend.started_sessions().len(), 1);
    assert!(controller.is_active());
}

#[tokio::test]
async fn test_stop_twice_stops_backend_once() {
    let air = SimAir::new();
    let backend = Arc::new(SimBackend::new());
    let a = node(&air, &backend, "A");
    let controller = a.core.controller();

    controller.start().await.unwrap();
    controller.stop().await;
    controller.stop().await;

    assert_eq!(backend.stopped_sessions(), vec!["S1".to_string()]);
    assert!(!controller.is_active());
    assert_eq!(controller.advertiser().state(), AdvertiserState::Idle);
    assert_eq!(controller.scanner().state(), ScannerState::Idle);
    assert!(controller.advertiser().identity().is_none());
    assert!(!a.device.peripheral().is_advertising());
    assert!(a.device.peripheral().services().is_empty());
}

#[tokio::test]
async fn test_stop_while_inactive_makes_no_backend_call() {
    let air = SimAir::new();
    let backend = Arc::new(SimBackend::new());
    let a = node(&air, &backend, "A");

    a.core.controller().stop().await;

    assert!(backend.calls().is_empty());
}

#[tokio::test]
async fn test_backend_start_failure_mutates_nothing() {
    let air = SimAir::new();
    let backend = Arc::new(SimBackend::new());
    let a = node(&air, &backend, "A");
    let controller = a.core.controller();
    backend.fail_start_session(true);

    let result = controller.start().await;

    assert!(matches!(result, Err(WaveError::BackendStartFailed(_))));
    assert!(!controller.is_active());
    assert!(controller.advertiser().identity().is_none());
    assert_eq!(controller.advertiser().state(), AdvertiserState::Idle);
    assert_eq!(controller.scanner().state(), ScannerState::Idle);
    assert!(a.device.peripheral().calls().is_empty());
    assert!(a.device.central().calls().is_empty());

    backend.fail_start_session(false);
    controller.start().await.unwrap();
    assert_eq!(controller.session_id().as_deref(), Some("S1"));
}

#[tokio::test]
async fn test_stop_tears_down_when_backend_fails() {
    let air = SimAir::new();
    let backend = Arc::new(SimBackend::new());
    let a = node(&air, &backend, "A");
    let controller = a.core.controller();

    controller.start().await.unwrap();
    backend.fail_stop_session(true);
    controller.stop().await;

    assert!(!controller.is_active());
    assert!(controller.advertiser().identity().is_none());
    assert!(!a.device.peripheral().is_advertising());
}

#[tokio::test]
async fn test_every_start_mints_new_identity() {
    let air = SimAir::new();
    let backend = Arc::new(SimBackend::new());
    let a = node(&air, &backend, "A");
    let controller = a.core.controller();

    let mut seen = Vec::new();
    for _ in 0..3 {
        controller.start().await.unwrap();
        seen.push(controller.session_id().expect("session id"));
        controller.stop().await;
    }

    assert_eq!(seen, vec!["S1", "S2", "S3"]);
}

#[tokio::test]
async fn test_active_tracks_last_successful_call() {
    let air = SimAir::new();
    let backend = Arc::new(SimBackend::new());
    let a = node(&air, &backend, "A");
    let controller = a.core.controller();

    let sequence = [true, true, false, true, false, false, true, false];
    for start in sequence {
        if start {
            controller.start().await.unwrap();
        } else {
            controller.stop().await;
        }

        assert_eq!(controller.is_active(), start);
        let advertising = controller.advertiser().state() != AdvertiserState::Idle;
        let scanning = controller.scanner().state() != ScannerState::Idle;
        assert_eq!(advertising, start);
        assert_eq!(scanning, start);
    }

    let starts = backend
        .calls()
        .iter()
        .filter(|c| matches!(c, BackendCall::StartSession(_)))
        .count();
    assert_eq!(starts, 3);
}

#[tokio::test]
async fn test_disable_flag_blocks_recovery() {
    let air = SimAir::new();
    let backend = Arc::new(SimBackend::new());
    let a = node(&air, &backend, "A");
    let controller = a.core.controller();

    controller.set_service_enabled(true).await.unwrap();
    assert!(controller.is_active());

    controller.set_service_enabled(false).await.unwrap();
    assert!(!controller.is_active());

    controller.recover_state().await.unwrap();
    assert!(!controller.is_active());

    controller.set_service_enabled(true).await.unwrap();
    assert_eq!(controller.session_id().as_deref(), Some("S2"));
}

#[tokio::test]
async fn test_safety_zone_follows_location_fixes() {
    let air = SimAir::new();
    let backend = Arc::new(SimBackend::new());
    let a = node(&air, &backend, "A");
    let controller = a.core.controller().clone();

    controller
        .set_safety_zone(Some(SafetyZone::new(37.5665, 126.9780, 300.0)))
        .await;
    controller.start().await.unwrap();

    a.provider
        .deliver_fix(LocationFix::new(37.5666, 126.9781, 20.0, 5.0, 1));
    wait_until("suspension inside zone", || !controller.is_active()).await;
    assert!(controller.is_suspended_by_zone());
    assert_eq!(backend.stopped_sessions(), vec!["S1".to_string()]);

    // Recovery respects the zone
    controller.recover_state().await.unwrap();
    assert!(!controller.is_active());

    a.provider
        .deliver_fix(LocationFix::new(37.6000, 126.9780, 20.0, 5.0, 2));
    wait_until("resume after leaving zone", || controller.is_active()).await;
    assert_eq!(controller.session_id().as_deref(), Some("S2"));
}

#[tokio::test]
async fn test_safety_zone_without_auto_resume() {
    let air = SimAir::new();
    let backend = Arc::new(SimBackend::new());
    let a = node(&air, &backend, "A");
    let controller = a.core.controller().clone();

    let mut zone = SafetyZone::new(0.0, 0.0, 300.0);
    zone.enable_wave_after_exit = false;
    controller.set_safety_zone(Some(zone)).await;
    controller.start().await.unwrap();

    a.provider.deliver_fix(LocationFix::new(0.0, 0.0, 0.0, 5.0, 1));
    wait_until("suspension inside zone", || !controller.is_active()).await;

    a.provider.deliver_fix(LocationFix::new(1.0, 1.0, 0.0, 5.0, 2));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!controller.is_active());
    assert!(!controller.is_suspended_by_zone());
}

#[tokio::test]
async fn test_removing_zone_resumes_suspended_session() {
    let air = SimAir::new();
    let backend = Arc::new(SimBackend::new());
    let a = node(&air, &backend, "A");
    let controller = a.core.controller().clone();

    controller
        .set_safety_zone(Some(SafetyZone::new(0.0, 0.0, 300.0)))
        .await;
    controller.start().await.unwrap();
    a.provider.deliver_fix(LocationFix::new(0.0, 0.0, 0.0, 5.0, 1));
    wait_until("suspension inside zone", || !controller.is_active()).await;

    controller.set_safety_zone(None).await;
    assert!(controller.is_active());
}
