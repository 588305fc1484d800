// Advertiser: the peripheral half of Wave
//
// Publishes one primary service whose readable characteristic carries the
// local session identity, and answers every read with the identity current
// at the moment of the read.

use crate::radio::{
    encode_identity, AttError, PayloadError, PeripheralEvent, PeripheralRadio, PowerState,
    RadioError, ServiceId, WaveServiceDefinition,
};
use crate::WaveError;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdvertiserState {
    Idle,
    /// Start was requested while the radio was not powered on
    PendingRadioOn,
    Advertising,
}

/// Notifications the advertiser raises for its owner
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdvertiserNotice {
    /// The OS restored a previous advertising session; the identity it served
    /// is gone and a fresh one must be minted.
    IdentityRevoked,
}

pub struct Advertiser {
    radio: Arc<dyn PeripheralRadio>,
    service: ServiceId,
    identity: RwLock<Option<String>>,
    state: RwLock<AdvertiserState>,
    /// Serializes start, stop and radio callbacks
    ops: Mutex<()>,
    notices: mpsc::UnboundedSender<AdvertiserNotice>,
}

impl Advertiser {
    /// Create the advertiser and register its radio callback.
    ///
    /// Radio events are drained one at a time by a dedicated task, so this
    /// must be called inside a tokio runtime.
    pub fn new(
        radio: Arc<dyn PeripheralRadio>,
        service: ServiceId,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<AdvertiserNotice>) {
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let (notices_tx, notices_rx) = mpsc::unbounded_channel();

        let advertiser = Arc::new(Self {
            radio: radio.clone(),
            service,
            identity: RwLock::new(None),
            state: RwLock::new(AdvertiserState::Idle),
            ops: Mutex::new(()),
            notices: notices_tx,
        });

        radio.set_event_handler(Box::new(move |event| {
            let _ = events_tx.send(event);
        }));

        let weak = Arc::downgrade(&advertiser);
        tokio::spawn(async move {
            while let Some(event) = events_rx.recv().await {
                let Some(advertiser) = weak.upgrade() else {
                    break;
                };
                advertiser.handle_event(event).await;
            }
        });

        (advertiser, notices_rx)
    }

    pub fn state(&self) -> AdvertiserState {
        *self.state.read()
    }

    pub fn service(&self) -> ServiceId {
        self.service
    }

    pub fn identity(&self) -> Option<String> {
        self.identity.read().clone()
    }

    /// Store the identity to serve. Does not start advertising.
    pub fn set_identity(&self, identity: &str) -> Result<(), PayloadError> {
        encode_identity(identity)?;
        *self.identity.write() = Some(identity.to_string());
        Ok(())
    }

    pub fn clear_identity(&self) {
        *self.identity.write() = None;
    }

    /// Begin advertising the current identity.
    ///
    /// Without an identity this is a no-op. With the radio off the advertiser
    /// waits in `PendingRadioOn` and activates on the next power-on.
    pub async fn start(&self) -> Result<AdvertiserState, RadioError> {
        let _ops = self.ops.lock().await;

        if self.identity.read().is_none() {
            warn!(error = %WaveError::IdentityMissing, "Not starting advertiser");
            return Ok(self.state());
        }

        if self.state() == AdvertiserState::Advertising {
            return Ok(AdvertiserState::Advertising);
        }

        let power = self.radio.power_state();
        if !power.is_ready() {
            debug!(reason = %WaveError::RadioUnavailable(power), "Deferring advertising until power-on");
            *self.state.write() = AdvertiserState::PendingRadioOn;
            return Ok(AdvertiserState::PendingRadioOn);
        }

        match self.activate().await {
            Ok(()) => Ok(AdvertiserState::Advertising),
            Err(e) => {
                *self.state.write() = AdvertiserState::Idle;
                Err(e)
            }
        }
    }

    /// Stop advertising and withdraw the service. Idempotent.
    pub async fn stop(&self) {
        let _ops = self.ops.lock().await;

        let previous = std::mem::replace(&mut *self.state.write(), AdvertiserState::Idle);
        if previous == AdvertiserState::Advertising {
            self.withdraw().await;
            info!(service = %self.service, "Advertising stopped");
        }
    }

    /// Dispatch one radio event. Callers must not hold `ops`.
    pub async fn handle_event(&self, event: PeripheralEvent) {
        match event {
            PeripheralEvent::PowerStateChanged(power) => self.on_power_state(power).await,
            PeripheralEvent::ReadRequest {
                request_id,
                characteristic,
            } => self.on_read_request(request_id, characteristic),
            PeripheralEvent::WillRestoreState => self.on_restore().await,
        }
    }

    /// Clean slate, then register the service and advertise it
    async fn activate(&self) -> Result<(), RadioError> {
        self.radio.remove_all_services().await?;
        self.radio.stop_advertising().await?;
        self.radio
            .add_service(&WaveServiceDefinition::new(self.service))
            .await?;
        self.radio.start_advertising(self.service).await?;

        *self.state.write() = AdvertiserState::Advertising;
        info!(service = %self.service, "Advertising started");
        Ok(())
    }

    async fn withdraw(&self) {
        if let Err(e) = self.radio.stop_advertising().await {
            warn!(error = %e, "Failed to stop advertising");
        }
        if let Err(e) = self.radio.remove_all_services().await {
            warn!(error = %e, "Failed to remove services");
        }
    }

    async fn on_power_state(&self, power: PowerState) {
        let _ops = self.ops.lock().await;
        let state = self.state();

        if power.is_ready() {
            if state == AdvertiserState::PendingRadioOn && self.identity.read().is_some() {
                if let Err(e) = self.activate().await {
                    warn!(error = %e, "Failed to advertise after power-on");
                }
            }
        } else if state == AdvertiserState::Advertising {
            // The stack drops registered services when it powers down
            debug!(%power, "Radio lost power while advertising");
            *self.state.write() = AdvertiserState::PendingRadioOn;
        }
    }

    fn on_read_request(&self, request_id: u64, characteristic: Uuid) {
        let result = if characteristic != self.service.characteristic() {
            Err(AttError::AttributeNotFound)
        } else {
            match self.identity() {
                Some(identity) => encode_identity(&identity).map_err(|e| {
                    warn!(error = %e, "Cannot encode identity");
                    AttError::UnlikelyError
                }),
                None => Err(AttError::ReadNotPermitted),
            }
        };

        if let Err(e) = &result {
            debug!(request_id, code = e.code(), "Rejecting identity read");
        }
        self.radio.respond_to_read(request_id, result);
    }

    /// A restored advertising session refers to a session that no longer
    /// exists. Tear it down and ask the owner for a new identity.
    async fn on_restore(&self) {
        {
            let _ops = self.ops.lock().await;
            info!("Restoring advertiser state; discarding previous identity");

            if self.radio.power_state().is_ready() {
                self.withdraw().await;
            }
            self.clear_identity();
            *self.state.write() = AdvertiserState::Idle;
        }

        let _ = self.notices.send(AdvertiserNotice::IdentityRevoked);
    }
}
