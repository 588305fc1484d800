// Scripted location provider

use crate::location::{AuthorizationStatus, LocationEvent, LocationEventHandler, LocationFix, LocationProvider};
use parking_lot::Mutex;
use std::sync::Arc;
use uuid::Uuid;

type SharedLocationHandler = Arc<dyn Fn(LocationEvent) + Send + Sync>;

/// A request the correlator made of the provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocationRequest {
    WhenInUse,
    Always,
    BackgroundDelivery,
    StartSignificantChanges,
    StopSignificantChanges,
    StartBeaconRanging(Uuid),
    StopBeaconRanging(Uuid),
}

/// Location provider driven by the test or simulation.
///
/// With `auto_grant` every authorization request is granted immediately, as
/// if the user accepted each prompt.
pub struct SimLocationProvider {
    status: Mutex<AuthorizationStatus>,
    auto_grant: bool,
    requests: Mutex<Vec<LocationRequest>>,
    handler: Mutex<Option<SharedLocationHandler>>,
}

impl SimLocationProvider {
    pub fn new(status: AuthorizationStatus) -> Self {
        Self {
            status: Mutex::new(status),
            auto_grant: false,
            requests: Mutex::new(Vec::new()),
            handler: Mutex::new(None),
        }
    }

    /// Starts undetermined and grants every request
    pub fn auto_granting() -> Self {
        Self {
            auto_grant: true,
            ..Self::new(AuthorizationStatus::NotDetermined)
        }
    }

    pub fn requests(&self) -> Vec<LocationRequest> {
        self.requests.lock().clone()
    }

    /// Deliver an event to the registered callback
    pub fn emit(&self, event: LocationEvent) {
        let handler = self.handler.lock().clone();
        if let Some(handler) = handler {
            handler(event);
        }
    }

    pub fn deliver_fix(&self, fix: LocationFix) {
        self.emit(LocationEvent::Fix(fix));
    }

    /// Change the authorization and notify the callback
    pub fn set_authorization(&self, status: AuthorizationStatus) {
        *self.status.lock() = status;
        self.emit(LocationEvent::AuthorizationChanged(status));
    }

    fn request(&self, request: LocationRequest) {
        self.requests.lock().push(request);
    }
}

impl LocationProvider for SimLocationProvider {
    fn authorization_status(&self) -> AuthorizationStatus {
        *self.status.lock()
    }

    fn request_when_in_use_authorization(&self) {
        self.request(LocationRequest::WhenInUse);
        if self.auto_grant {
            self.set_authorization(AuthorizationStatus::WhenInUse);
        }
    }

    fn request_always_authorization(&self) {
        self.request(LocationRequest::Always);
        if self.auto_grant {
            self.set_authorization(AuthorizationStatus::Always);
        }
    }

    fn enable_background_delivery(&self) {
        self.request(LocationRequest::BackgroundDelivery);
    }

    fn start_significant_location_changes(&self) {
        self.request(LocationRequest::StartSignificantChanges);
    }

    fn stop_significant_location_changes(&self) {
        self.request(LocationRequest::StopSignificantChanges);
    }

    fn start_beacon_ranging(&self, beacon: Uuid) {
        self.request(LocationRequest::StartBeaconRanging(beacon));
    }

    fn stop_beacon_ranging(&self, beacon: Uuid) {
        self.request(LocationRequest::StopBeaconRanging(beacon));
    }

    fn set_event_handler(&self, handler: LocationEventHandler) {
        *self.handler.lock() = Some(Arc::from(handler));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_reaches_handler() {
        let provider = SimLocationProvider::new(AuthorizationStatus::Always);
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = received.clone();
        provider.set_event_handler(Box::new(move |event| sink.lock().push(event)));

        let fix = LocationFix::new(1.0, 2.0, 3.0, 4.0, 5);
        provider.deliver_fix(fix);
        assert_eq!(*received.lock(), vec![LocationEvent::Fix(fix)]);
    }

    #[test]
    fn test_auto_grant_reports_changes() {
        let provider = SimLocationProvider::auto_granting();
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = received.clone();
        provider.set_event_handler(Box::new(move |event| sink.lock().push(event)));

        provider.request_when_in_use_authorization();
        assert_eq!(provider.authorization_status(), AuthorizationStatus::WhenInUse);
        provider.request_always_authorization();
        assert_eq!(provider.authorization_status(), AuthorizationStatus::Always);

        assert_eq!(
            *received.lock(),
            vec![
                LocationEvent::AuthorizationChanged(AuthorizationStatus::WhenInUse),
                LocationEvent::AuthorizationChanged(AuthorizationStatus::Always),
            ]
        );
    }
}
