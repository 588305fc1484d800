//! Radio abstractions for the Wave discovery protocol
//!
//! Wave runs both BLE roles at once: the peripheral role publishes a single
//! readable characteristic carrying the local session identity, and the central
//! role scans for the same service and reads the identity of every peer it finds.
//!
//! - **payload**: identity encoding for the advertised characteristic
//!
//! The radio driver itself lives in platform code (Swift/Kotlin). This module
//! defines the bridge traits that platform code implements, so everything above
//! it is testable without hardware.

pub mod payload;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

pub use payload::{decode_identity, encode_identity, PayloadError, MAX_ATTRIBUTE_SIZE};

/// Wave v1 service UUID used by release builds
pub const WAVE_SERVICE_UUID_PRODUCTION: Uuid =
    Uuid::from_u128(0x23976C63_731D_4915_B43B_59CF99DB1AE0);

/// Wave v1 service UUID used by development builds
pub const WAVE_SERVICE_UUID_DEVELOPMENT: Uuid =
    Uuid::from_u128(0x5CF49269_42A1_4645_85B3_B46A7A6D650F);

/// Identifier of an advertised radio service.
///
/// The identity characteristic shares its UUID with the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceId(Uuid);

impl ServiceId {
    pub const PRODUCTION: ServiceId = ServiceId(WAVE_SERVICE_UUID_PRODUCTION);
    pub const DEVELOPMENT: ServiceId = ServiceId(WAVE_SERVICE_UUID_DEVELOPMENT);

    pub const fn new(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn uuid(&self) -> Uuid {
        self.0
    }

    /// UUID of the readable identity characteristic inside this service
    pub fn characteristic(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated().to_string().to_uppercase())
    }
}

/// Opaque, transient handle the platform assigns to a remote device
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerHandle(String);

impl PeerHandle {
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerHandle {
    fn from(handle: &str) -> Self {
        Self::new(handle)
    }
}

/// Power / authorization state reported by the radio stack
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PowerState {
    Unknown,
    Resetting,
    Unsupported,
    Unauthorized,
    PoweredOff,
    PoweredOn,
}

impl PowerState {
    /// Only a powered-on radio accepts services, advertising or scans
    pub fn is_ready(&self) -> bool {
        matches!(self, PowerState::PoweredOn)
    }
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PowerState::Unknown => write!(f, "Unknown"),
            PowerState::Resetting => write!(f, "Resetting"),
            PowerState::Unsupported => write!(f, "Unsupported"),
            PowerState::Unauthorized => write!(f, "Unauthorized"),
            PowerState::PoweredOff => write!(f, "PoweredOff"),
            PowerState::PoweredOn => write!(f, "PoweredOn"),
        }
    }
}

/// Link-layer state of a remote peripheral
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

/// A peripheral handed back by the OS when it relaunches the process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoredPeer {
    pub handle: PeerHandle,
    pub link: LinkState,
}

/// Service definition registered by the advertising role.
///
/// The characteristic carries no static value: every read goes through a
/// [`PeripheralEvent::ReadRequest`] so the current identity is always served.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaveServiceDefinition {
    pub service: ServiceId,
    pub primary: bool,
    pub characteristic: Uuid,
}

impl WaveServiceDefinition {
    pub fn new(service: ServiceId) -> Self {
        Self {
            service,
            primary: true,
            characteristic: service.characteristic(),
        }
    }
}

/// Errors for radio operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RadioError {
    #[error("Radio unavailable: {0}")]
    Unavailable(PowerState),
    #[error("Peer not connected: {0}")]
    NotConnected(PeerHandle),
    #[error("Peer not found: {0}")]
    PeerNotFound(PeerHandle),
    #[error("Service {0} not found on peer")]
    ServiceNotFound(ServiceId),
    #[error("Characteristic {0} not found on peer")]
    CharacteristicNotFound(Uuid),
    #[error("Read failed: {0}")]
    ReadFailed(String),
    #[error("Platform bridge error: {0}")]
    PlatformError(String),
}

/// ATT error codes returned to remote readers
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttError {
    #[error("Read not permitted")]
    ReadNotPermitted,
    #[error("Attribute not found")]
    AttributeNotFound,
    #[error("Unlikely error")]
    UnlikelyError,
}

impl AttError {
    /// Numeric ATT error code
    pub fn code(&self) -> u8 {
        match self {
            AttError::ReadNotPermitted => 0x02,
            AttError::AttributeNotFound => 0x0A,
            AttError::UnlikelyError => 0x0E,
        }
    }
}

/// Events raised by the platform's peripheral (advertising) role
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeripheralEvent {
    PowerStateChanged(PowerState),
    /// A remote central reads the identity characteristic
    ReadRequest { request_id: u64, characteristic: Uuid },
    /// The OS relaunched the process to continue a background advertising session
    WillRestoreState,
}

/// Events raised by the platform's central (scanning) role
#[derive(Debug, Clone, PartialEq)]
pub enum CentralEvent {
    PowerStateChanged(PowerState),
    PeerDiscovered { peer: PeerHandle, rssi: i16 },
    PeerDisconnected(PeerHandle),
    /// The OS relaunched the process and hands back the peripherals it kept alive
    WillRestoreState(Vec<RestoredPeer>),
}

pub type PeripheralEventHandler = Box<dyn Fn(PeripheralEvent) + Send + Sync>;
pub type CentralEventHandler = Box<dyn Fn(CentralEvent) + Send + Sync>;

/// Platform-specific peripheral role (advertise + GATT server)
#[async_trait]
pub trait PeripheralRadio: Send + Sync {
    /// Current power state of the radio
    fn power_state(&self) -> PowerState;

    /// Register a service with its readable characteristic
    async fn add_service(&self, definition: &WaveServiceDefinition) -> Result<(), RadioError>;

    /// Remove every registered service
    async fn remove_all_services(&self) -> Result<(), RadioError>;

    /// Begin advertising the given service identifier
    async fn start_advertising(&self, service: ServiceId) -> Result<(), RadioError>;

    /// Stop advertising
    async fn stop_advertising(&self) -> Result<(), RadioError>;

    /// Answer a pending read request
    fn respond_to_read(&self, request_id: u64, result: Result<Vec<u8>, AttError>);

    /// Register the callback for peripheral events
    fn set_event_handler(&self, handler: PeripheralEventHandler);
}

/// Platform-specific central role (scan + GATT client)
#[async_trait]
pub trait CentralRadio: Send + Sync {
    /// Current power state of the radio
    fn power_state(&self) -> PowerState;

    /// Continuously scan for peers advertising the service
    async fn start_scan(&self, service: ServiceId) -> Result<(), RadioError>;

    /// Stop scanning
    async fn stop_scan(&self) -> Result<(), RadioError>;

    async fn connect(&self, peer: &PeerHandle) -> Result<(), RadioError>;

    async fn discover_services(
        &self,
        peer: &PeerHandle,
        service: ServiceId,
    ) -> Result<(), RadioError>;

    async fn discover_characteristic(
        &self,
        peer: &PeerHandle,
        service: ServiceId,
        characteristic: Uuid,
    ) -> Result<(), RadioError>;

    async fn read(&self, peer: &PeerHandle, characteristic: Uuid) -> Result<Vec<u8>, RadioError>;

    /// Cancel the connection (or pending connection) to a peer
    async fn disconnect(&self, peer: &PeerHandle) -> Result<(), RadioError>;

    /// Register the callback for central events
    fn set_event_handler(&self, handler: CentralEventHandler);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_uuids() {
        assert_eq!(
            ServiceId::PRODUCTION.to_string(),
            "23976C63-731D-4915-B43B-59CF99DB1AE0"
        );
        assert_eq!(
            ServiceId::DEVELOPMENT.to_string(),
            "5CF49269-42A1-4645-85B3-B46A7A6D650F"
        );
        assert_ne!(ServiceId::PRODUCTION, ServiceId::DEVELOPMENT);
    }

    #[test]
    fn test_characteristic_shares_service_uuid() {
        let definition = WaveServiceDefinition::new(ServiceId::PRODUCTION);
        assert!(definition.primary);
        assert_eq!(definition.characteristic, WAVE_SERVICE_UUID_PRODUCTION);
    }

    #[test]
    fn test_power_state_ready() {
        assert!(PowerState::PoweredOn.is_ready());
        for state in [
            PowerState::Unknown,
            PowerState::Resetting,
            PowerState::Unsupported,
            PowerState::Unauthorized,
            PowerState::PoweredOff,
        ] {
            assert!(!state.is_ready(), "{} must not be ready", state);
        }
    }

    #[test]
    fn test_att_error_codes() {
        assert_eq!(AttError::ReadNotPermitted.code(), 0x02);
        assert_eq!(AttError::AttributeNotFound.code(), 0x0A);
        assert_eq!(AttError::UnlikelyError.code(), 0x0E);
    }
}
