// Wave: proximity discovery core
//
// Two nearby devices exchange ephemeral session ids over BLE, tag every
// sighting with the local location fix, and report it to the matching
// service. Radio, location and backend are platform bridges; everything in
// this crate runs against them and is testable without hardware.

pub mod backend;
pub mod config;
pub mod location;
pub mod radio;
pub mod sim;
pub mod store;
pub mod wave;

use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

pub use backend::{BackendError, ReportDiscoveryArgs, SessionInfo, UpdateLocationArgs, WaveBackend};
pub use config::{ConfigError, WaveConfig, WaveEnvironment};
pub use location::{
    AuthorizationStatus, LocationCorrelator, LocationEvent, LocationFix, LocationProvider,
    SafetyZone,
};
pub use radio::{
    CentralRadio, PayloadError, PeerHandle, PeripheralRadio, PowerState, RadioError, ServiceId,
};
pub use store::{MemoryStorage, SledStorage, StorageBackend, StoreError, WavePreferences};
pub use wave::{Session, SessionController, SessionObserver};

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Debug, Error, Clone)]
pub enum WaveError {
    #[error("Radio unavailable: {0}")]
    RadioUnavailable(PowerState),
    #[error("No session identity to advertise")]
    IdentityMissing,
    #[error("Session identity cannot be advertised: {0}")]
    InvalidIdentity(PayloadError),
    #[error("Backend failed to start session: {0}")]
    BackendStartFailed(BackendError),
    #[error("Backend failed to stop session: {0}")]
    BackendStopFailed(BackendError),
    #[error("Backend failed to accept discovery: {0}")]
    BackendReportFailed(BackendError),
    #[error("Backend failed to accept location: {0}")]
    BackendLocationFailed(BackendError),
    #[error("Malformed peer payload: {0}")]
    MalformedPeerPayload(PayloadError),
    #[error("Radio error: {0}")]
    Radio(RadioError),
    #[error("Storage error: {0}")]
    Storage(StoreError),
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<ConfigError> for WaveError {
    fn from(err: ConfigError) -> Self {
        WaveError::Config(err.to_string())
    }
}

// ============================================================================
// PLATFORM WIRING
// ============================================================================

/// Everything the host platform provides
#[derive(Clone)]
pub struct WavePlatform {
    pub backend: Arc<dyn WaveBackend>,
    pub peripheral: Arc<dyn PeripheralRadio>,
    pub central: Arc<dyn CentralRadio>,
    pub location: Arc<dyn LocationProvider>,
}

/// Remote pushes the core reacts to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushKind {
    /// Server asks a suspended device to bring Wave back
    WakeUp,
}

impl FromStr for PushKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "wake_up" => Ok(PushKind::WakeUp),
            _ => Err(()),
        }
    }
}

/// Assembled Wave stack: one location correlator and one session controller
/// sharing the platform bridges.
pub struct WaveCore {
    config: WaveConfig,
    location: Arc<LocationCorrelator>,
    controller: Arc<SessionController>,
}

impl WaveCore {
    /// Wire the stack. Preferences go to sled when `storage_path` is set and
    /// stay in memory otherwise.
    ///
    /// Must be called inside a tokio runtime.
    pub fn new(config: WaveConfig, platform: WavePlatform) -> Result<Self, WaveError> {
        config.validate()?;

        let storage: Arc<dyn StorageBackend> = match &config.storage_path {
            Some(path) => Arc::new(SledStorage::open(path).map_err(WaveError::Storage)?),
            None => Arc::new(MemoryStorage::new()),
        };

        Ok(Self::with_storage(config, platform, storage))
    }

    /// Wire the stack over an existing storage backend
    pub fn with_storage(
        config: WaveConfig,
        platform: WavePlatform,
        storage: Arc<dyn StorageBackend>,
    ) -> Self {
        let location = LocationCorrelator::new(
            platform.location,
            platform.backend.clone(),
            config.service_id(),
        );
        let controller = SessionController::new(
            &config,
            platform.backend,
            platform.peripheral,
            platform.central,
            location.clone(),
            WavePreferences::new(storage),
        );

        tracing::info!(environment = ?config.environment, "Wave core initialized");
        Self {
            config,
            location,
            controller,
        }
    }

    pub fn config(&self) -> &WaveConfig {
        &self.config
    }

    pub fn controller(&self) -> &Arc<SessionController> {
        &self.controller
    }

    pub fn location(&self) -> &Arc<LocationCorrelator> {
        &self.location
    }

    /// React to a remote push. Unknown kinds are ignored.
    pub async fn handle_push(&self, kind: &str) -> Result<(), WaveError> {
        match kind.parse::<PushKind>() {
            Ok(PushKind::WakeUp) => {
                tracing::info!("Wake-up push received");
                self.controller.recover_state().await
            }
            Err(()) => {
                tracing::debug!(kind, "Ignoring push");
                Ok(())
            }
        }
    }
}
