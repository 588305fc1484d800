// Shared radio medium for simulated devices
//
// Every device added to a SimAir exposes both radio roles. Scanners see the
// advertisers that match their service filter; reads are routed to the target
// device's peripheral callback and answered through `respond_to_read`.

use crate::radio::{
    AttError, CentralEvent, CentralEventHandler, CentralRadio, LinkState, PeerHandle,
    PeripheralEvent, PeripheralEventHandler, PeripheralRadio, PowerState, RadioError,
    RestoredPeer, ServiceId, WaveServiceDefinition,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::oneshot;
use uuid::Uuid;

type SharedPeripheralHandler = Arc<dyn Fn(PeripheralEvent) + Send + Sync>;
type SharedCentralHandler = Arc<dyn Fn(CentralEvent) + Send + Sync>;
type ReadReply = oneshot::Sender<Result<Vec<u8>, AttError>>;

/// Calls made on a simulated peripheral
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeripheralCall {
    AddService(ServiceId),
    RemoveAllServices,
    StartAdvertising(ServiceId),
    StopAdvertising,
}

/// Calls made on a simulated central
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CentralCall {
    StartScan(ServiceId),
    StopScan,
    Connect(PeerHandle),
    DiscoverServices(PeerHandle),
    DiscoverCharacteristic(PeerHandle),
    Read(PeerHandle),
    Disconnect(PeerHandle),
}

struct DeviceState {
    power: PowerState,
    services: Vec<WaveServiceDefinition>,
    advertising: Option<ServiceId>,
    /// Fixed value answered without consulting a peripheral callback
    beacon_value: Option<Vec<u8>>,
    scanning: Option<ServiceId>,
    scan_visible: bool,
    seen: HashSet<PeerHandle>,
    links: HashMap<PeerHandle, LinkState>,
    peripheral_handler: Option<SharedPeripheralHandler>,
    central_handler: Option<SharedCentralHandler>,
    peripheral: Option<Arc<SimPeripheral>>,
    central: Option<Arc<SimCentral>>,
}

impl DeviceState {
    fn new() -> Self {
        Self {
            power: PowerState::PoweredOn,
            services: Vec::new(),
            advertising: None,
            beacon_value: None,
            scanning: None,
            scan_visible: true,
            seen: HashSet::new(),
            links: HashMap::new(),
            peripheral_handler: None,
            central_handler: None,
            peripheral: None,
            central: None,
        }
    }

    fn drop_radio_state(&mut self) {
        self.services.clear();
        self.advertising = None;
        self.scanning = None;
        self.seen.clear();
        self.links.clear();
    }
}

#[derive(Default)]
struct AirState {
    devices: BTreeMap<PeerHandle, DeviceState>,
    pending_reads: HashMap<u64, ReadReply>,
}

impl AirState {
    fn device(&self, name: &PeerHandle) -> Result<&DeviceState, RadioError> {
        self.devices
            .get(name)
            .ok_or_else(|| RadioError::PeerNotFound(name.clone()))
    }

    fn device_mut(&mut self, name: &PeerHandle) -> Result<&mut DeviceState, RadioError> {
        self.devices
            .get_mut(name)
            .ok_or_else(|| RadioError::PeerNotFound(name.clone()))
    }

    fn ready(&self, name: &PeerHandle) -> Result<(), RadioError> {
        let power = self.device(name)?.power;
        if power.is_ready() {
            Ok(())
        } else {
            Err(RadioError::Unavailable(power))
        }
    }

    fn require_link(&self, local: &PeerHandle, peer: &PeerHandle) -> Result<(), RadioError> {
        match self.device(local)?.links.get(peer) {
            Some(LinkState::Connected) => Ok(()),
            _ => Err(RadioError::NotConnected(peer.clone())),
        }
    }

    /// Advertisers each scanner has not reported yet
    fn pending_discoveries(&mut self) -> Vec<(SharedCentralHandler, CentralEvent)> {
        let advertisers: Vec<(PeerHandle, ServiceId)> = self
            .devices
            .iter()
            .filter(|(_, d)| d.power.is_ready())
            .filter_map(|(name, d)| d.advertising.map(|s| (name.clone(), s)))
            .collect();

        let mut rng = rand::thread_rng();
        let mut events = Vec::new();
        for (name, device) in self.devices.iter_mut() {
            let (Some(filter), Some(handler)) = (device.scanning, device.central_handler.clone())
            else {
                continue;
            };
            if !device.power.is_ready() || !device.scan_visible {
                continue;
            }
            for (peer, service) in &advertisers {
                if peer == name || *service != filter || !device.seen.insert(peer.clone()) {
                    continue;
                }
                let event = CentralEvent::PeerDiscovered {
                    peer: peer.clone(),
                    rssi: rng.gen_range(-90..=-40),
                };
                events.push((handler.clone(), event));
            }
        }
        events
    }
}

/// In-memory radio medium shared by simulated devices
#[derive(Default)]
pub struct SimAir {
    state: Mutex<AirState>,
    next_request: AtomicU64,
}

impl SimAir {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Add a powered-on device with both radio roles
    pub fn add_device(self: &Arc<Self>, name: &str) -> SimDevice {
        let handle = PeerHandle::new(name);
        let peripheral = Arc::new(SimPeripheral {
            name: handle.clone(),
            air: Arc::downgrade(self),
            calls: Mutex::new(Vec::new()),
        });
        let central = Arc::new(SimCentral {
            name: handle.clone(),
            air: Arc::downgrade(self),
            calls: Mutex::new(Vec::new()),
            faults: CentralFaults::default(),
        });

        let mut device = DeviceState::new();
        device.peripheral = Some(peripheral.clone());
        device.central = Some(central.clone());
        self.state.lock().devices.insert(handle.clone(), device);

        SimDevice {
            name: handle,
            peripheral,
            central,
        }
    }

    /// Look up a device added with [`SimAir::add_device`]
    pub fn device(&self, name: &str) -> Option<SimDevice> {
        let state = self.state.lock();
        let handle = PeerHandle::new(name);
        let device = state.devices.get(&handle)?;
        Some(SimDevice {
            name: handle,
            peripheral: device.peripheral.clone()?,
            central: device.central.clone()?,
        })
    }

    /// Add a peer that advertises `service` and answers every read with `value`
    pub fn add_beacon(&self, name: &str, service: ServiceId, value: Vec<u8>) -> PeerHandle {
        let handle = PeerHandle::new(name);
        let mut device = DeviceState::new();
        device.services.push(WaveServiceDefinition::new(service));
        device.advertising = Some(service);
        device.beacon_value = Some(value);

        let events = {
            let mut state = self.state.lock();
            state.devices.insert(handle.clone(), device);
            state.pending_discoveries()
        };
        dispatch_central(events);
        handle
    }

    /// Take a device out of range
    pub fn remove_device(&self, name: &str) {
        let handle = PeerHandle::new(name);
        let mut state = self.state.lock();
        state.devices.remove(&handle);
        for device in state.devices.values_mut() {
            device.links.remove(&handle);
            device.seen.remove(&handle);
        }
    }

    /// Forget what every scanner has seen so all advertisers are reported again
    pub fn rebroadcast(&self) {
        let events = {
            let mut state = self.state.lock();
            for device in state.devices.values_mut() {
                device.seen.clear();
            }
            state.pending_discoveries()
        };
        dispatch_central(events);
    }

    fn set_power(&self, name: &PeerHandle, power: PowerState) {
        let (peripheral, central, discoveries) = {
            let mut state = self.state.lock();
            let Some(device) = state.devices.get_mut(name) else {
                return;
            };
            device.power = power;
            if !power.is_ready() {
                device.drop_radio_state();
            }
            let handlers = (device.peripheral_handler.clone(), device.central_handler.clone());
            (handlers.0, handlers.1, state.pending_discoveries())
        };

        if let Some(handler) = peripheral {
            handler(PeripheralEvent::PowerStateChanged(power));
        }
        if let Some(handler) = central {
            handler(CentralEvent::PowerStateChanged(power));
        }
        dispatch_central(discoveries);
    }

    fn sweep(&self) {
        let events = self.state.lock().pending_discoveries();
        dispatch_central(events);
    }

    fn power_of(&self, name: &PeerHandle) -> PowerState {
        self.state
            .lock()
            .devices
            .get(name)
            .map(|d| d.power)
            .unwrap_or(PowerState::Unknown)
    }

    fn peripheral_handler(&self, name: &PeerHandle) -> Option<SharedPeripheralHandler> {
        self.state
            .lock()
            .devices
            .get(name)
            .and_then(|d| d.peripheral_handler.clone())
    }

    fn central_handler(&self, name: &PeerHandle) -> Option<SharedCentralHandler> {
        self.state
            .lock()
            .devices
            .get(name)
            .and_then(|d| d.central_handler.clone())
    }

    /// Route a read to the target's GATT server and wait for its answer
    async fn gatt_read(&self, target: &PeerHandle, characteristic: Uuid) -> Result<Vec<u8>, AttError> {
        let (handler, request_id, rx) = {
            let mut state = self.state.lock();
            let Some(device) = state.devices.get(target) else {
                return Err(AttError::UnlikelyError);
            };
            if let Some(value) = &device.beacon_value {
                return Ok(value.clone());
            }
            let Some(handler) = device.peripheral_handler.clone() else {
                return Err(AttError::UnlikelyError);
            };
            let request_id = self.next_request.fetch_add(1, Ordering::Relaxed);
            let (tx, rx) = oneshot::channel();
            state.pending_reads.insert(request_id, tx);
            (handler, request_id, rx)
        };

        handler(PeripheralEvent::ReadRequest {
            request_id,
            characteristic,
        });
        rx.await.unwrap_or(Err(AttError::UnlikelyError))
    }

    fn answer_read(&self, request_id: u64, result: Result<Vec<u8>, AttError>) {
        let reply = self.state.lock().pending_reads.remove(&request_id);
        if let Some(reply) = reply {
            let _ = reply.send(result);
        }
    }
}

fn dispatch_central(events: Vec<(SharedCentralHandler, CentralEvent)>) {
    for (handler, event) in events {
        handler(event);
    }
}

fn air_gone() -> RadioError {
    RadioError::PlatformError("simulated air was dropped".to_string())
}

/// Both radio roles of one simulated device
#[derive(Clone)]
pub struct SimDevice {
    name: PeerHandle,
    peripheral: Arc<SimPeripheral>,
    central: Arc<SimCentral>,
}

impl SimDevice {
    pub fn name(&self) -> &PeerHandle {
        &self.name
    }

    pub fn peripheral(&self) -> Arc<SimPeripheral> {
        self.peripheral.clone()
    }

    pub fn central(&self) -> Arc<SimCentral> {
        self.central.clone()
    }

    /// Change the power state of both roles and notify their callbacks
    pub fn set_power(&self, power: PowerState) {
        if let Some(air) = self.peripheral.air.upgrade() {
            air.set_power(&self.name, power);
        }
    }
}

// ============================================================================
// PERIPHERAL
// ============================================================================

pub struct SimPeripheral {
    name: PeerHandle,
    air: Weak<SimAir>,
    calls: Mutex<Vec<PeripheralCall>>,
}

impl SimPeripheral {
    pub fn calls(&self) -> Vec<PeripheralCall> {
        self.calls.lock().clone()
    }

    pub fn services(&self) -> Vec<WaveServiceDefinition> {
        self.air
            .upgrade()
            .and_then(|air| air.state.lock().devices.get(&self.name).map(|d| d.services.clone()))
            .unwrap_or_default()
    }

    pub fn is_advertising(&self) -> bool {
        self.air
            .upgrade()
            .and_then(|air| air.state.lock().devices.get(&self.name).map(|d| d.advertising.is_some()))
            .unwrap_or(false)
    }

    /// Read this device's characteristic as a remote central would
    pub async fn read_local(&self, characteristic: Uuid) -> Result<Vec<u8>, AttError> {
        match self.air.upgrade() {
            Some(air) => air.gatt_read(&self.name, characteristic).await,
            None => Err(AttError::UnlikelyError),
        }
    }

    /// Simulate the OS relaunching the process for this advertising session
    pub fn restore(&self) {
        if let Some(handler) = self.air.upgrade().and_then(|air| air.peripheral_handler(&self.name)) {
            handler(PeripheralEvent::WillRestoreState);
        }
    }

    fn log(&self, call: PeripheralCall) {
        self.calls.lock().push(call);
    }
}

#[async_trait]
impl PeripheralRadio for SimPeripheral {
    fn power_state(&self) -> PowerState {
        self.air
            .upgrade()
            .map(|air| air.power_of(&self.name))
            .unwrap_or(PowerState::Unknown)
    }

    async fn add_service(&self, definition: &WaveServiceDefinition) -> Result<(), RadioError> {
        self.log(PeripheralCall::AddService(definition.service));
        let air = self.air.upgrade().ok_or_else(air_gone)?;
        let mut state = air.state.lock();
        state.ready(&self.name)?;
        state.device_mut(&self.name)?.services.push(definition.clone());
        Ok(())
    }

    async fn remove_all_services(&self) -> Result<(), RadioError> {
        self.log(PeripheralCall::RemoveAllServices);
        let air = self.air.upgrade().ok_or_else(air_gone)?;
        let mut state = air.state.lock();
        state.device_mut(&self.name)?.services.clear();
        Ok(())
    }

    async fn start_advertising(&self, service: ServiceId) -> Result<(), RadioError> {
        self.log(PeripheralCall::StartAdvertising(service));
        let air = self.air.upgrade().ok_or_else(air_gone)?;
        {
            let mut state = air.state.lock();
            state.ready(&self.name)?;
            state.device_mut(&self.name)?.advertising = Some(service);
        }
        air.sweep();
        Ok(())
    }

    async fn stop_advertising(&self) -> Result<(), RadioError> {
        self.log(PeripheralCall::StopAdvertising);
        let air = self.air.upgrade().ok_or_else(air_gone)?;
        let mut state = air.state.lock();
        state.device_mut(&self.name)?.advertising = None;
        Ok(())
    }

    fn respond_to_read(&self, request_id: u64, result: Result<Vec<u8>, AttError>) {
        if let Some(air) = self.air.upgrade() {
            air.answer_read(request_id, result);
        }
    }

    fn set_event_handler(&self, handler: PeripheralEventHandler) {
        if let Some(air) = self.air.upgrade() {
            if let Some(device) = air.state.lock().devices.get_mut(&self.name) {
                device.peripheral_handler = Some(Arc::from(handler));
            }
        }
    }
}

// ============================================================================
// CENTRAL
// ============================================================================

#[derive(Default)]
struct CentralFaults {
    fail_connects: AtomicBool,
    fail_reads: AtomicBool,
    stall_reads: AtomicBool,
    read_delay: Mutex<Option<Duration>>,
}

pub struct SimCentral {
    name: PeerHandle,
    air: Weak<SimAir>,
    calls: Mutex<Vec<CentralCall>>,
    faults: CentralFaults,
}

impl SimCentral {
    pub fn calls(&self) -> Vec<CentralCall> {
        self.calls.lock().clone()
    }

    pub fn fail_connects(&self, fail: bool) {
        self.faults.fail_connects.store(fail, Ordering::SeqCst);
    }

    pub fn fail_reads(&self, fail: bool) {
        self.faults.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Reads never complete while set
    pub fn stall_reads(&self, stall: bool) {
        self.faults.stall_reads.store(stall, Ordering::SeqCst);
    }

    pub fn set_read_delay(&self, delay: Option<Duration>) {
        *self.faults.read_delay.lock() = delay;
    }

    /// Whether scanning reports advertisers
    pub fn set_scan_visible(&self, visible: bool) {
        let Some(air) = self.air.upgrade() else {
            return;
        };
        if let Some(device) = air.state.lock().devices.get_mut(&self.name) {
            device.scan_visible = visible;
        }
        if visible {
            air.sweep();
        }
    }

    /// Peers this central currently holds a link to
    pub fn connected_peers(&self) -> Vec<PeerHandle> {
        let Some(air) = self.air.upgrade() else {
            return Vec::new();
        };
        let state = air.state.lock();
        let mut peers: Vec<_> = state
            .devices
            .get(&self.name)
            .map(|d| {
                d.links
                    .iter()
                    .filter(|(_, link)| **link == LinkState::Connected)
                    .map(|(peer, _)| peer.clone())
                    .collect()
            })
            .unwrap_or_default();
        peers.sort();
        peers
    }

    /// Simulate the OS relaunching the process with peripherals it kept alive
    pub fn restore(&self, peers: Vec<RestoredPeer>) {
        let Some(air) = self.air.upgrade() else {
            return;
        };
        {
            let mut state = air.state.lock();
            if let Some(device) = state.devices.get_mut(&self.name) {
                for peer in &peers {
                    device.links.insert(peer.handle.clone(), peer.link);
                }
            }
        }
        if let Some(handler) = air.central_handler(&self.name) {
            handler(CentralEvent::WillRestoreState(peers));
        }
    }

    fn log(&self, call: CentralCall) {
        self.calls.lock().push(call);
    }
}

#[async_trait]
impl CentralRadio for SimCentral {
    fn power_state(&self) -> PowerState {
        self.air
            .upgrade()
            .map(|air| air.power_of(&self.name))
            .unwrap_or(PowerState::Unknown)
    }

    async fn start_scan(&self, service: ServiceId) -> Result<(), RadioError> {
        self.log(CentralCall::StartScan(service));
        let air = self.air.upgrade().ok_or_else(air_gone)?;
        {
            let mut state = air.state.lock();
            state.ready(&self.name)?;
            let device = state.device_mut(&self.name)?;
            device.scanning = Some(service);
            device.seen.clear();
        }
        air.sweep();
        Ok(())
    }

    async fn stop_scan(&self) -> Result<(), RadioError> {
        self.log(CentralCall::StopScan);
        let air = self.air.upgrade().ok_or_else(air_gone)?;
        let mut state = air.state.lock();
        let device = state.device_mut(&self.name)?;
        device.scanning = None;
        device.seen.clear();
        Ok(())
    }

    async fn connect(&self, peer: &PeerHandle) -> Result<(), RadioError> {
        self.log(CentralCall::Connect(peer.clone()));
        if self.faults.fail_connects.load(Ordering::SeqCst) {
            return Err(RadioError::PlatformError("connection refused".to_string()));
        }

        let air = self.air.upgrade().ok_or_else(air_gone)?;
        let mut state = air.state.lock();
        state.ready(&self.name)?;
        let reachable = state
            .devices
            .get(peer)
            .map(|d| d.power.is_ready() && d.advertising.is_some())
            .unwrap_or(false);
        if !reachable {
            return Err(RadioError::PeerNotFound(peer.clone()));
        }
        state
            .device_mut(&self.name)?
            .links
            .insert(peer.clone(), LinkState::Connected);
        Ok(())
    }

    async fn discover_services(&self, peer: &PeerHandle, service: ServiceId) -> Result<(), RadioError> {
        self.log(CentralCall::DiscoverServices(peer.clone()));
        let air = self.air.upgrade().ok_or_else(air_gone)?;
        let state = air.state.lock();
        state.require_link(&self.name, peer)?;
        if state.device(peer)?.services.iter().any(|s| s.service == service) {
            Ok(())
        } else {
            Err(RadioError::ServiceNotFound(service))
        }
    }

    async fn discover_characteristic(
        &self,
        peer: &PeerHandle,
        service: ServiceId,
        characteristic: Uuid,
    ) -> Result<(), RadioError> {
        self.log(CentralCall::DiscoverCharacteristic(peer.clone()));
        let air = self.air.upgrade().ok_or_else(air_gone)?;
        let state = air.state.lock();
        state.require_link(&self.name, peer)?;
        let services = &state.device(peer)?.services;
        let Some(definition) = services.iter().find(|s| s.service == service) else {
            return Err(RadioError::ServiceNotFound(service));
        };
        if definition.characteristic == characteristic {
            Ok(())
        } else {
            Err(RadioError::CharacteristicNotFound(characteristic))
        }
    }

    async fn read(&self, peer: &PeerHandle, characteristic: Uuid) -> Result<Vec<u8>, RadioError> {
        self.log(CentralCall::Read(peer.clone()));

        if self.faults.stall_reads.load(Ordering::SeqCst) {
            futures::future::pending::<()>().await;
        }
        let delay = *self.faults.read_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.faults.fail_reads.load(Ordering::SeqCst) {
            return Err(RadioError::ReadFailed("injected read failure".to_string()));
        }

        let air = self.air.upgrade().ok_or_else(air_gone)?;
        air.state.lock().require_link(&self.name, peer)?;
        air.gatt_read(peer, characteristic)
            .await
            .map_err(|e| RadioError::ReadFailed(e.to_string()))
    }

    async fn disconnect(&self, peer: &PeerHandle) -> Result<(), RadioError> {
        self.log(CentralCall::Disconnect(peer.clone()));
        let air = self.air.upgrade().ok_or_else(air_gone)?;
        let (was_linked, handler) = {
            let mut state = air.state.lock();
            let device = state.device_mut(&self.name)?;
            (device.links.remove(peer).is_some(), device.central_handler.clone())
        };
        if let (true, Some(handler)) = (was_linked, handler) {
            handler(CentralEvent::PeerDisconnected(peer.clone()));
        }
        Ok(())
    }

    fn set_event_handler(&self, handler: CentralEventHandler) {
        if let Some(air) = self.air.upgrade() {
            if let Some(device) = air.state.lock().devices.get_mut(&self.name) {
                device.central_handler = Some(Arc::from(handler));
            }
        }
    }
}
