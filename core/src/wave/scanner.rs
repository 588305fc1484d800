// Scanner: the central half of Wave
//
// Scans for the Wave service, and for every peer it finds runs one bounded
// handshake: connect, discover the service and its identity characteristic,
// read the identity, disconnect. Decoded identities are handed to the owner
// as discovery records.

use super::dedup::DedupSet;
use crate::location::{now_ms, LocationCorrelator, LocationFix};
use crate::radio::{
    decode_identity, CentralEvent, CentralRadio, LinkState, PeerHandle, PowerState, RadioError,
    RestoredPeer, ServiceId,
};
use crate::WaveError;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, info, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScannerState {
    Idle,
    /// Start was requested while the radio was not powered on
    PendingRadioOn,
    Scanning,
}

/// First step of a handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeStart {
    Connect,
    /// The link survived a process relaunch; skip straight to characteristic discovery
    DiscoverCharacteristic,
}

/// Raised to the owner, which decides whether the restored radio state is
/// still wanted
#[derive(Debug, Clone, PartialEq)]
pub enum ScannerNotice {
    /// The OS relaunched the process with these peers still known to the radio
    Restored(Vec<RestoredPeer>),
}

/// A peer identity read over the air
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveryRecord {
    pub peer: PeerHandle,
    pub discovered_id: String,
    pub location: Option<LocationFix>,
    /// Milliseconds since the Unix epoch
    pub observed_at_ms: u64,
    /// Scan activation the record belongs to
    pub activation: u64,
}

#[derive(Debug)]
struct WorkingEntry {
    token: u64,
    abort: Option<AbortHandle>,
}

pub struct Scanner {
    radio: Arc<dyn CentralRadio>,
    service: ServiceId,
    location: Arc<LocationCorrelator>,
    handshake_timeout: Duration,
    state: RwLock<ScannerState>,
    /// Serializes start, stop and radio callbacks
    ops: tokio::sync::Mutex<()>,
    /// Peers with a handshake in flight
    working: Mutex<HashMap<PeerHandle, WorkingEntry>>,
    next_token: AtomicU64,
    dedup: DedupSet,
    discoveries: mpsc::UnboundedSender<DiscoveryRecord>,
    notices: mpsc::UnboundedSender<ScannerNotice>,
}

impl Scanner {
    /// Create the scanner and register its radio callback.
    ///
    /// Must be called inside a tokio runtime.
    pub fn new(
        radio: Arc<dyn CentralRadio>,
        service: ServiceId,
        location: Arc<LocationCorrelator>,
        handshake_timeout: Duration,
        discoveries: mpsc::UnboundedSender<DiscoveryRecord>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<ScannerNotice>) {
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let (notices_tx, notices_rx) = mpsc::unbounded_channel();

        let scanner = Arc::new(Self {
            radio: radio.clone(),
            service,
            location,
            handshake_timeout,
            state: RwLock::new(ScannerState::Idle),
            ops: tokio::sync::Mutex::new(()),
            working: Mutex::new(HashMap::new()),
            next_token: AtomicU64::new(0),
            dedup: DedupSet::new(),
            discoveries,
            notices: notices_tx,
        });

        radio.set_event_handler(Box::new(move |event| {
            let _ = events_tx.send(event);
        }));

        let weak = Arc::downgrade(&scanner);
        tokio::spawn(async move {
            while let Some(event) = events_rx.recv().await {
                let Some(scanner) = weak.upgrade() else {
                    break;
                };
                scanner.handle_event(event).await;
            }
        });

        (scanner, notices_rx)
    }

    pub fn state(&self) -> ScannerState {
        *self.state.read()
    }

    pub fn service(&self) -> ServiceId {
        self.service
    }

    pub fn dedup(&self) -> &DedupSet {
        &self.dedup
    }

    /// Peers with a handshake currently in flight
    pub fn in_flight(&self) -> Vec<PeerHandle> {
        let mut peers: Vec<_> = self.working.lock().keys().cloned().collect();
        peers.sort();
        peers
    }

    /// Begin a new scan activation. No-op unless idle.
    pub async fn start(&self) -> Result<ScannerState, RadioError> {
        let _ops = self.ops.lock().await;

        let state = self.state();
        if state != ScannerState::Idle {
            return Ok(state);
        }

        self.dedup.reset();
        self.activate().await
    }

    /// Stop scanning and abandon every in-flight handshake. Idempotent.
    pub async fn stop(&self) {
        let _ops = self.ops.lock().await;

        let previous = std::mem::replace(&mut *self.state.write(), ScannerState::Idle);
        if previous == ScannerState::Idle {
            return;
        }

        // Late completions from this activation are now stale
        self.dedup.reset();

        if previous == ScannerState::Scanning {
            if let Err(e) = self.radio.stop_scan().await {
                warn!(error = %e, "Failed to stop scan");
            }
        }

        let abandoned: Vec<_> = self.working.lock().drain().collect();
        for (peer, entry) in abandoned {
            if let Some(abort) = entry.abort {
                abort.abort();
            }
            if let Err(e) = self.radio.disconnect(&peer).await {
                debug!(%peer, error = %e, "Disconnect after abort failed");
            }
        }

        info!(service = %self.service, "Scanning stopped");
    }

    /// Dispatch one radio event. Callers must not hold `ops`.
    pub async fn handle_event(self: &Arc<Self>, event: CentralEvent) {
        match event {
            CentralEvent::PowerStateChanged(power) => self.on_power_state(power).await,
            CentralEvent::PeerDiscovered { peer, rssi } => {
                if self.state() != ScannerState::Scanning {
                    trace!(%peer, "Ignoring discovery while not scanning");
                    return;
                }
                trace!(%peer, rssi, "Peer advertisement");
                self.begin_handshake(peer, HandshakeStart::Connect);
            }
            CentralEvent::PeerDisconnected(peer) => {
                debug!(%peer, "Peer disconnected");
            }
            CentralEvent::WillRestoreState(peers) => {
                info!(count = peers.len(), "Central state restored by the OS");
                if self.notices.send(ScannerNotice::Restored(peers)).is_err() {
                    debug!("Owner gone; dropping restored peers");
                }
            }
        }
    }

    /// Spawn a handshake unless the peer was already reported in this
    /// activation or already has one in flight.
    pub fn begin_handshake(self: &Arc<Self>, peer: PeerHandle, start: HandshakeStart) -> bool {
        if self.dedup.is_processed(&peer) {
            trace!(%peer, "Peer already reported in this activation");
            return false;
        }

        let activation = self.dedup.activation();
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        {
            let mut working = self.working.lock();
            if working.contains_key(&peer) {
                trace!(%peer, "Handshake already in flight");
                return false;
            }
            working.insert(peer.clone(), WorkingEntry { token, abort: None });
        }

        let scanner = Arc::clone(self);
        let task_peer = peer.clone();
        let task = tokio::spawn(async move {
            scanner.run_handshake(task_peer, start, activation, token).await;
        });

        if let Some(entry) = self.working.lock().get_mut(&peer) {
            if entry.token == token {
                entry.abort = Some(task.abort_handle());
            }
        }
        true
    }

    async fn run_handshake(&self, peer: PeerHandle, start: HandshakeStart, activation: u64, token: u64) {
        debug!(%peer, ?start, "Handshake started");
        let outcome = tokio::time::timeout(self.handshake_timeout, self.handshake(&peer, start)).await;

        if let Err(e) = self.radio.disconnect(&peer).await {
            debug!(%peer, error = %e, "Disconnect failed");
        }
        self.finish_working(&peer, token);

        let bytes = match outcome {
            Ok(Ok(bytes)) => bytes,
            Ok(Err(e)) => {
                debug!(%peer, error = %e, "Handshake failed");
                return;
            }
            Err(_) => {
                warn!(%peer, timeout = ?self.handshake_timeout, "Handshake timed out");
                return;
            }
        };

        if self.dedup.activation() != activation || self.state() == ScannerState::Idle {
            debug!(%peer, "Discarding handshake result from a previous activation");
            return;
        }

        let discovered_id = match decode_identity(&bytes) {
            Ok(id) => id,
            Err(e) => {
                debug!(%peer, error = %WaveError::MalformedPeerPayload(e), "Dropping peer payload");
                return;
            }
        };

        // A report for this peer may still be in flight
        if !self.dedup.try_begin(&peer, activation) {
            trace!(%peer, "Peer already claimed in this activation");
            return;
        }

        let record = DiscoveryRecord {
            peer: peer.clone(),
            discovered_id,
            location: self.location.current_fix(),
            observed_at_ms: now_ms(),
            activation,
        };
        info!(%peer, discovered = %record.discovered_id, "Peer identity read");

        if self.discoveries.send(record).is_err() {
            self.dedup.release(&peer, activation);
        }
    }

    async fn handshake(&self, peer: &PeerHandle, start: HandshakeStart) -> Result<Vec<u8>, RadioError> {
        let characteristic = self.service.characteristic();

        if start == HandshakeStart::Connect {
            self.radio.connect(peer).await?;
            self.radio.discover_services(peer, self.service).await?;
        }
        self.radio
            .discover_characteristic(peer, self.service, characteristic)
            .await?;
        self.radio.read(peer, characteristic).await
    }

    fn finish_working(&self, peer: &PeerHandle, token: u64) {
        let mut working = self.working.lock();
        if working.get(peer).map(|e| e.token) == Some(token) {
            working.remove(peer);
        }
    }

    /// Start scanning now or once the radio powers on. Caller holds `ops`.
    async fn activate(&self) -> Result<ScannerState, RadioError> {
        let power = self.radio.power_state();
        if !power.is_ready() {
            debug!(reason = %WaveError::RadioUnavailable(power), "Deferring scan until power-on");
            *self.state.write() = ScannerState::PendingRadioOn;
            return Ok(ScannerState::PendingRadioOn);
        }

        if let Err(e) = self.radio.start_scan(self.service).await {
            *self.state.write() = ScannerState::Idle;
            return Err(e);
        }

        *self.state.write() = ScannerState::Scanning;
        info!(service = %self.service, "Scanning started");
        Ok(ScannerState::Scanning)
    }

    async fn on_power_state(&self, power: PowerState) {
        let _ops = self.ops.lock().await;
        let state = self.state();

        if power.is_ready() {
            if state == ScannerState::PendingRadioOn {
                if let Err(e) = self.activate().await {
                    warn!(error = %e, "Failed to scan after power-on");
                    *self.state.write() = ScannerState::PendingRadioOn;
                }
            }
        } else if state == ScannerState::Scanning {
            debug!(%power, "Radio lost power while scanning");
            *self.state.write() = ScannerState::PendingRadioOn;
        }
    }

    /// Resume the peers the OS kept alive and scan again.
    ///
    /// Connected peers pick up at characteristic discovery; the rest get a
    /// full handshake.
    pub async fn restore(self: &Arc<Self>, peers: Vec<RestoredPeer>) {
        info!(count = peers.len(), "Restoring scanner state");
        {
            let _ops = self.ops.lock().await;
            if self.state() == ScannerState::Idle {
                self.dedup.reset();
            }
            if self.state() != ScannerState::Scanning {
                if let Err(e) = self.activate().await {
                    warn!(error = %e, "Failed to resume scanning after restoration");
                }
            }
        }

        for restored in peers {
            let start = match restored.link {
                LinkState::Connected => HandshakeStart::DiscoverCharacteristic,
                _ => HandshakeStart::Connect,
            };
            self.begin_handshake(restored.handle, start);
        }
    }

    /// Drop restored radio state nobody wants: stop scanning and close the
    /// links the OS kept open.
    pub async fn discard_restored(&self, peers: Vec<RestoredPeer>) {
        self.stop().await;
        for restored in peers {
            if restored.link != LinkState::Connected {
                continue;
            }
            if let Err(e) = self.radio.disconnect(&restored.handle).await {
                debug!(peer = %restored.handle, error = %e, "Disconnect of restored peer failed");
            }
        }
        debug!("Discarded restored scanner state");
    }
}
