//! Matching-service interface
//!
//! The backend issues ephemeral session ids, receives discovery reports and
//! location updates, and performs the actual matching. Transport, auth and
//! retry live in the API client that implements [`WaveBackend`].

use crate::location::LocationFix;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("Not authenticated")]
    Unauthenticated,
    #[error("Malformed response: {0}")]
    MalformedResponse(String),
}

/// Response of `start_session`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub session_id: String,
}

/// Body of a discovery report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportDiscoveryArgs {
    pub session_id: String,
    pub discovered_session_id: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub altitude: Option<f64>,
    pub accuracy: Option<f64>,
}

impl ReportDiscoveryArgs {
    pub fn new(session_id: &str, discovered_session_id: &str, location: Option<&LocationFix>) -> Self {
        Self {
            session_id: session_id.to_string(),
            discovered_session_id: discovered_session_id.to_string(),
            latitude: location.map(|l| l.latitude),
            longitude: location.map(|l| l.longitude),
            altitude: location.map(|l| l.altitude),
            accuracy: location.map(|l| l.accuracy),
        }
    }
}

/// Body of a location update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateLocationArgs {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub altitude: Option<f64>,
    pub accuracy: Option<f64>,
}

impl From<&LocationFix> for UpdateLocationArgs {
    fn from(fix: &LocationFix) -> Self {
        Self {
            latitude: Some(fix.latitude),
            longitude: Some(fix.longitude),
            altitude: Some(fix.altitude),
            accuracy: Some(fix.accuracy),
        }
    }
}

/// Backend operations consumed by the discovery core
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WaveBackend: Send + Sync {
    /// Open a discovery session and mint a fresh ephemeral id
    async fn start_session(&self) -> Result<SessionInfo, BackendError>;

    /// Close the session identified by `session_id`
    async fn stop_session(&self, session_id: &str) -> Result<(), BackendError>;

    /// Report that `discovered_session_id` was seen by `session_id`
    async fn report_discovery(&self, args: ReportDiscoveryArgs) -> Result<(), BackendError>;

    /// Push the device's latest location fix
    async fn update_location(&self, args: UpdateLocationArgs) -> Result<(), BackendError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_args_without_location() {
        let args = ReportDiscoveryArgs::new("S1", "S2", None);
        assert_eq!(args.session_id, "S1");
        assert_eq!(args.discovered_session_id, "S2");
        assert!(args.latitude.is_none());
        assert!(args.accuracy.is_none());
    }

    #[test]
    fn test_report_args_wire_names() {
        let fix = LocationFix::new(37.5665, 126.978, 38.0, 12.5, 1_000);
        let args = ReportDiscoveryArgs::new("S1", "S2", Some(&fix));
        let json = serde_json::to_value(&args).unwrap();
        assert_eq!(json["session_id"], "S1");
        assert_eq!(json["discovered_session_id"], "S2");
        assert_eq!(json["latitude"], 37.5665);
        assert_eq!(json["accuracy"], 12.5);
    }

    #[test]
    fn test_update_location_from_fix() {
        let fix = LocationFix::new(1.0, 2.0, 3.0, 4.0, 5);
        let args = UpdateLocationArgs::from(&fix);
        assert_eq!(args.latitude, Some(1.0));
        assert_eq!(args.longitude, Some(2.0));
        assert_eq!(args.altitude, Some(3.0));
        assert_eq!(args.accuracy, Some(4.0));
    }
}
