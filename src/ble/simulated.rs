//! In-process beacon simulator
//!
//! A simulated network of Eddystone-URL beacons and a central that
//! reaches them through [`GattTransport`]. Callbacks are delivered from
//! spawned tasks after a configurable latency, so the bridge sees the
//! same asynchronous shape as a real stack. Used for integration testing
//! and demo runs without BLE hardware.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::{sleep, Instant};
use uuid::Uuid;

use super::advertisement::URL_FRAME_TYPE;
use super::eid::EID_FRAME_TYPE;
use super::gatt::{
    ADV_SLOT_DATA, ADV_TX_POWER_LEVELS, BEACON_PERIOD, EDDYSTONE_SERVICE_UUID, FLAGS, LOCK,
    LOCK_STATE, RESET, TX_POWER_MODE, UNLOCK, URI_DATA, URL_CONFIG_SERVICE_UUID,
};
use super::transport::{
    BeaconDevice, BleAddress, ConnectionState, GattCallback, GattStatus, GattTransport,
    ScanFilter, ScanRecord,
};
use super::BleError;

pub const LOCK_KEY_LEN: usize = 16;
pub const MAX_URI_LEN: usize = 18;
pub const TX_POWER_LEVELS_LEN: usize = 4;
/// Highest valid tx power mode.
pub const MAX_TX_POWER_MODE: u8 = 3;
/// Non-zero periods below this are raised to it.
pub const MIN_BEACON_PERIOD_MS: u16 = 100;

const DEFAULT_LATENCY: Duration = Duration::from_millis(5);

fn lock(mutex: &Mutex<BeaconState>) -> std::sync::MutexGuard<'_, BeaconState> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[derive(Debug, Clone)]
struct BeaconState {
    lock_key: [u8; LOCK_KEY_LEN],
    locked: bool,
    uri: Vec<u8>,
    flags: u8,
    tx_power_levels: [u8; TX_POWER_LEVELS_LEN],
    tx_power_mode: u8,
    period_ms: u16,
    connectable: bool,
    reject_lock: bool,
    slot_data: VecDeque<Vec<u8>>,
}

impl Default for BeaconState {
    fn default() -> Self {
        Self {
            lock_key: [0; LOCK_KEY_LEN],
            locked: false,
            // "http://www.google.com"
            uri: vec![0x00, b'g', b'o', b'o', b'g', b'l', b'e', 0x07],
            flags: 0,
            tx_power_levels: [0xE2, 0xF0, 0xFC, 0x04],
            tx_power_mode: 1,
            period_ms: 1000,
            connectable: true,
            reject_lock: false,
            slot_data: VecDeque::new(),
        }
    }
}

impl BeaconState {
    /// Restore the broadcast configuration. Lock state and key survive.
    fn reset(&mut self) {
        let defaults = BeaconState::default();
        self.uri = defaults.uri;
        self.flags = defaults.flags;
        self.tx_power_levels = defaults.tx_power_levels;
        self.tx_power_mode = defaults.tx_power_mode;
        self.period_ms = defaults.period_ms;
    }
}

/// A simulated beacon implementing the Eddystone-URL configuration service.
pub struct SimUrlBeacon {
    device: BeaconDevice,
    state: Mutex<BeaconState>,
}

impl SimUrlBeacon {
    fn new(name: String) -> Self {
        Self {
            device: BeaconDevice::new(BleAddress::Simulated(Uuid::new_v4())).with_name(name),
            state: Mutex::new(BeaconState::default()),
        }
    }

    pub fn device(&self) -> &BeaconDevice {
        &self.device
    }

    pub fn address(&self) -> &BleAddress {
        &self.device.address
    }

    pub fn is_locked(&self) -> bool {
        lock(&self.state).locked
    }

    pub fn uri(&self) -> Vec<u8> {
        lock(&self.state).uri.clone()
    }

    pub fn period_ms(&self) -> u16 {
        lock(&self.state).period_ms
    }

    /// Answer lock writes with INSUFFICIENT_AUTHORIZATION instead of locking.
    pub fn set_reject_lock(&self, reject: bool) {
        lock(&self.state).reject_lock = reject;
    }

    /// Stop advertising the configuration service and refuse connections.
    pub fn set_connectable(&self, connectable: bool) {
        lock(&self.state).connectable = connectable;
    }

    /// Queue a response for the next slot data read. Once the queue is
    /// empty, reads return a computed EID slot.
    pub fn queue_slot_data(&self, data: Vec<u8>) {
        lock(&self.state).slot_data.push_back(data);
    }

    fn is_connectable(&self) -> bool {
        lock(&self.state).connectable
    }

    fn read(&self, characteristic: Uuid) -> (GattStatus, Vec<u8>) {
        let mut state = lock(&self.state);
        let value = match characteristic {
            c if c == LOCK_STATE => vec![state.locked as u8],
            c if c == URI_DATA => state.uri.clone(),
            c if c == FLAGS => vec![state.flags],
            c if c == ADV_TX_POWER_LEVELS => state.tx_power_levels.to_vec(),
            c if c == TX_POWER_MODE => vec![state.tx_power_mode],
            c if c == BEACON_PERIOD => state.period_ms.to_le_bytes().to_vec(),
            c if c == ADV_SLOT_DATA => state
                .slot_data
                .pop_front()
                .unwrap_or_else(computed_eid_slot),
            c if c == LOCK || c == UNLOCK || c == RESET => {
                return (GattStatus::READ_NOT_PERMITTED, Vec::new())
            }
            _ => return (GattStatus::REQUEST_NOT_SUPPORTED, Vec::new()),
        };
        (GattStatus::SUCCESS, value)
    }

    fn write(&self, characteristic: Uuid, value: &[u8]) -> GattStatus {
        let mut state = lock(&self.state);

        if characteristic == UNLOCK {
            if value.len() != LOCK_KEY_LEN {
                return GattStatus::INVALID_ATTRIBUTE_LENGTH;
            }
            if !state.locked {
                return GattStatus::SUCCESS;
            }
            if value != state.lock_key.as_slice() {
                return GattStatus::INSUFFICIENT_AUTHORIZATION;
            }
            state.locked = false;
            return GattStatus::SUCCESS;
        }

        if characteristic == LOCK_STATE || characteristic == ADV_SLOT_DATA {
            return GattStatus::WRITE_NOT_PERMITTED;
        }
        if state.locked {
            return GattStatus::INSUFFICIENT_AUTHORIZATION;
        }

        match characteristic {
            c if c == LOCK => {
                let Ok(key) = <[u8; LOCK_KEY_LEN]>::try_from(value) else {
                    return GattStatus::INVALID_ATTRIBUTE_LENGTH;
                };
                if state.reject_lock {
                    return GattStatus::INSUFFICIENT_AUTHORIZATION;
                }
                state.lock_key = key;
                state.locked = true;
            }
            c if c == URI_DATA => {
                if value.len() > MAX_URI_LEN {
                    return GattStatus::INVALID_ATTRIBUTE_LENGTH;
                }
                state.uri = value.to_vec();
            }
            c if c == FLAGS => {
                let [flags] = value else {
                    return GattStatus::INVALID_ATTRIBUTE_LENGTH;
                };
                state.flags = *flags;
            }
            c if c == ADV_TX_POWER_LEVELS => {
                let Ok(levels) = <[u8; TX_POWER_LEVELS_LEN]>::try_from(value) else {
                    return GattStatus::INVALID_ATTRIBUTE_LENGTH;
                };
                state.tx_power_levels = levels;
            }
            c if c == TX_POWER_MODE => {
                let [mode] = value else {
                    return GattStatus::INVALID_ATTRIBUTE_LENGTH;
                };
                if *mode > MAX_TX_POWER_MODE {
                    return GattStatus::WRITE_NOT_PERMITTED;
                }
                state.tx_power_mode = *mode;
            }
            c if c == BEACON_PERIOD => {
                let [lo, hi] = value else {
                    return GattStatus::INVALID_ATTRIBUTE_LENGTH;
                };
                let period = u16::from_le_bytes([*lo, *hi]);
                state.period_ms = if period == 0 {
                    0
                } else {
                    period.max(MIN_BEACON_PERIOD_MS)
                };
            }
            c if c == RESET => {
                let [flag] = value else {
                    return GattStatus::INVALID_ATTRIBUTE_LENGTH;
                };
                if *flag != 0 {
                    state.reset();
                }
            }
            _ => return GattStatus::REQUEST_NOT_SUPPORTED,
        }
        GattStatus::SUCCESS
    }

    /// What the beacon currently broadcasts, if anything.
    fn advertisement(&self) -> Option<ScanRecord> {
        let state = lock(&self.state);
        let mut service_uuids = Vec::new();
        let mut service_data = HashMap::new();

        if state.connectable {
            service_uuids.push(URL_CONFIG_SERVICE_UUID);
        }
        if state.period_ms != 0 {
            let tx_power = state.tx_power_levels[state.tx_power_mode as usize];
            let mut frame = vec![URL_FRAME_TYPE, tx_power];
            frame.extend_from_slice(&state.uri);
            service_uuids.push(EDDYSTONE_SERVICE_UUID);
            service_data.insert(EDDYSTONE_SERVICE_UUID, frame);
        }
        if service_uuids.is_empty() {
            return None;
        }

        Some(ScanRecord {
            device: self.device.clone(),
            rssi: Some(-55),
            service_uuids,
            service_data,
        })
    }
}

fn computed_eid_slot() -> Vec<u8> {
    let mut slot = vec![EID_FRAME_TYPE, 10, 0x00, 0x00, 0x10, 0x00];
    slot.extend_from_slice(&[0x5A, 0xC3, 0x19, 0x7E, 0x02, 0x88, 0xB4, 0x61]);
    slot
}

/// The simulated "air" shared by all beacons and the central.
pub struct SimBeaconNetwork {
    beacons: Mutex<Vec<Arc<SimUrlBeacon>>>,
}

impl SimBeaconNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            beacons: Mutex::new(Vec::new()),
        })
    }

    /// Power on a new beacon with factory settings.
    pub fn add_beacon(&self) -> Arc<SimUrlBeacon> {
        let mut beacons = self.beacons.lock().unwrap_or_else(|e| e.into_inner());
        let beacon = Arc::new(SimUrlBeacon::new(format!("SimBeacon-{}", beacons.len() + 1)));
        beacons.push(Arc::clone(&beacon));
        beacon
    }

    /// Create a central on this network.
    pub fn central(self: &Arc<Self>) -> Arc<SimCentral> {
        Arc::new(SimCentral {
            network: Arc::clone(self),
            callback: Mutex::new(None),
            link: Mutex::new(None),
            latency: Mutex::new(DEFAULT_LATENCY),
            silent: AtomicBool::new(false),
            scan_generation: Arc::new(AtomicU64::new(0)),
            scanning: Arc::new(AtomicBool::new(false)),
            outstanding: Arc::new(AtomicUsize::new(0)),
            max_outstanding: AtomicUsize::new(0),
            operations: Mutex::new(Vec::new()),
        })
    }

    fn beacons(&self) -> Vec<Arc<SimUrlBeacon>> {
        self.beacons.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn find(&self, address: &BleAddress) -> Option<Arc<SimUrlBeacon>> {
        self.beacons()
            .into_iter()
            .find(|beacon| beacon.address() == address)
    }
}

/// A request as the central saw it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimRequest {
    StartScan(Uuid),
    StopScan,
    Connect(BleAddress),
    DiscoverServices,
    Read(Uuid),
    Write(Uuid, Vec<u8>),
    Disconnect,
}

/// One entry of the central's operation log.
#[derive(Debug, Clone)]
pub struct SimOperation {
    pub at: Instant,
    pub request: SimRequest,
}

/// Simulated central role implementing [`GattTransport`].
pub struct SimCentral {
    network: Arc<SimBeaconNetwork>,
    callback: Mutex<Option<Arc<dyn GattCallback>>>,
    link: Mutex<Option<Arc<SimUrlBeacon>>>,
    latency: Mutex<Duration>,
    silent: AtomicBool,
    scan_generation: Arc<AtomicU64>,
    scanning: Arc<AtomicBool>,
    outstanding: Arc<AtomicUsize>,
    max_outstanding: AtomicUsize,
    operations: Mutex<Vec<SimOperation>>,
}

impl SimCentral {
    /// Delay before each callback. Uses tokio time, so paused test clocks
    /// advance through it instantly.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap_or_else(|e| e.into_inner()) = latency;
    }

    /// Accept requests but never answer them.
    pub fn set_silent(&self, silent: bool) {
        self.silent.store(silent, Ordering::SeqCst);
    }

    /// Every request issued so far, in order.
    pub fn operations(&self) -> Vec<SimOperation> {
        self.operations
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Most requests that were ever awaiting an answer at the same time.
    pub fn max_outstanding(&self) -> usize {
        self.max_outstanding.load(Ordering::SeqCst)
    }

    pub fn is_connected(&self) -> bool {
        self.link
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    fn record(&self, request: SimRequest) {
        log::debug!("sim central: {:?}", request);
        self.operations
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(SimOperation {
                at: Instant::now(),
                request,
            });
    }

    /// Log a request that expects an answer and count it as outstanding.
    fn begin(&self, request: SimRequest) {
        self.record(request);
        let now = self.outstanding.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_outstanding.fetch_max(now, Ordering::SeqCst);
    }

    fn linked_beacon(&self) -> Result<Arc<SimUrlBeacon>, BleError> {
        self.link
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or(BleError::Disconnected)
    }

    fn check_service(service: Uuid) -> Result<(), BleError> {
        if service == URL_CONFIG_SERVICE_UUID {
            Ok(())
        } else {
            Err(BleError::GattError(format!("Service {} not found", service)))
        }
    }

    /// Deliver an answer to an outstanding request after the latency.
    fn answer<F>(&self, f: F)
    where
        F: FnOnce(&dyn GattCallback) + Send + 'static,
    {
        let outstanding = Arc::clone(&self.outstanding);
        self.deliver(Duration::ZERO, move |callback| {
            outstanding.fetch_sub(1, Ordering::SeqCst);
            f(callback);
        });
    }

    fn deliver<F>(&self, extra_delay: Duration, f: F)
    where
        F: FnOnce(&dyn GattCallback) + Send + 'static,
    {
        if self.silent.load(Ordering::SeqCst) {
            return;
        }
        let callback = self
            .callback
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        let Some(callback) = callback else {
            log::warn!("sim central: no callback registered");
            return;
        };
        let latency = *self.latency.lock().unwrap_or_else(|e| e.into_inner()) + extra_delay;
        tokio::spawn(async move {
            sleep(latency).await;
            f(callback.as_ref());
        });
    }
}

impl GattTransport for SimCentral {
    fn register_callback(&self, callback: Arc<dyn GattCallback>) {
        *self.callback.lock().unwrap_or_else(|e| e.into_inner()) = Some(callback);
    }

    fn start_scan(&self, filter: &ScanFilter) -> Result<(), BleError> {
        self.record(SimRequest::StartScan(filter.service_uuid));
        let generation = self.scan_generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.scanning.store(true, Ordering::SeqCst);

        let latency = *self.latency.lock().unwrap_or_else(|e| e.into_inner());
        for beacon in self.network.beacons() {
            let Some(record) = beacon.advertisement() else {
                continue;
            };
            if !filter.matches(&record) {
                continue;
            }
            // Each beacon is heard more than once per window.
            for repeat in 0..2u32 {
                let record = record.clone();
                let current = Arc::clone(&self.scan_generation);
                let scanning = Arc::clone(&self.scanning);
                self.deliver(latency * repeat, move |callback| {
                    if scanning.load(Ordering::SeqCst)
                        && current.load(Ordering::SeqCst) == generation
                    {
                        callback.on_scan_result(record);
                    }
                });
            }
        }
        Ok(())
    }

    fn stop_scan(&self) {
        self.record(SimRequest::StopScan);
        self.scanning.store(false, Ordering::SeqCst);
    }

    fn connect(&self, device: &BeaconDevice) -> Result<(), BleError> {
        self.begin(SimRequest::Connect(device.address.clone()));
        match self.network.find(&device.address) {
            Some(beacon) if beacon.is_connectable() => {
                *self.link.lock().unwrap_or_else(|e| e.into_inner()) = Some(beacon);
                self.answer(|cb| {
                    cb.on_connection_state_change(GattStatus::SUCCESS, ConnectionState::Connected)
                });
            }
            _ => {
                self.answer(|cb| {
                    cb.on_connection_state_change(GattStatus::FAILURE, ConnectionState::Disconnected)
                });
            }
        }
        Ok(())
    }

    fn discover_services(&self) -> Result<(), BleError> {
        self.linked_beacon()?;
        self.begin(SimRequest::DiscoverServices);
        self.answer(|cb| cb.on_services_discovered(GattStatus::SUCCESS));
        Ok(())
    }

    fn read_characteristic(&self, service: Uuid, characteristic: Uuid) -> Result<(), BleError> {
        let beacon = self.linked_beacon()?;
        Self::check_service(service)?;
        self.begin(SimRequest::Read(characteristic));
        let (status, value) = beacon.read(characteristic);
        self.answer(move |cb| cb.on_characteristic_read(characteristic, status, value));
        Ok(())
    }

    fn write_characteristic(
        &self,
        service: Uuid,
        characteristic: Uuid,
        value: &[u8],
    ) -> Result<(), BleError> {
        let beacon = self.linked_beacon()?;
        Self::check_service(service)?;
        self.begin(SimRequest::Write(characteristic, value.to_vec()));
        let status = beacon.write(characteristic, value);
        self.answer(move |cb| cb.on_characteristic_write(characteristic, status));
        Ok(())
    }

    fn disconnect(&self) {
        self.record(SimRequest::Disconnect);
        let had_link = self
            .link
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .is_some();
        if had_link {
            self.deliver(Duration::ZERO, |cb| {
                cb.on_connection_state_change(GattStatus::SUCCESS, ConnectionState::Disconnected)
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: [u8; 16] = [0; 16];

    #[derive(Default)]
    struct Recorder {
        states: Mutex<Vec<(GattStatus, ConnectionState)>>,
        reads: Mutex<Vec<(Uuid, GattStatus, Vec<u8>)>>,
        scans: Mutex<Vec<ScanRecord>>,
    }

    impl GattCallback for Recorder {
        fn on_connection_state_change(&self, status: GattStatus, state: ConnectionState) {
            self.states.lock().unwrap().push((status, state));
        }

        fn on_services_discovered(&self, _status: GattStatus) {}

        fn on_characteristic_read(&self, characteristic: Uuid, status: GattStatus, value: Vec<u8>) {
            self.reads.lock().unwrap().push((characteristic, status, value));
        }

        fn on_characteristic_write(&self, _characteristic: Uuid, _status: GattStatus) {}

        fn on_scan_result(&self, record: ScanRecord) {
            self.scans.lock().unwrap().push(record);
        }
    }

    #[test]
    fn test_lock_blocks_writes_until_unlocked() {
        let network = SimBeaconNetwork::new();
        let beacon = network.add_beacon();

        assert_eq!(beacon.write(LOCK, &KEY), GattStatus::SUCCESS);
        assert!(beacon.is_locked());
        assert_eq!(beacon.read(LOCK_STATE), (GattStatus::SUCCESS, vec![1]));

        assert_eq!(
            beacon.write(URI_DATA, &[0x01]),
            GattStatus::INSUFFICIENT_AUTHORIZATION
        );
        // Authorization is checked before length for everything but unlock.
        assert_eq!(
            beacon.write(LOCK, &[0; 15]),
            GattStatus::INSUFFICIENT_AUTHORIZATION
        );
        assert_eq!(beacon.write(UNLOCK, &[0; 15]), GattStatus::INVALID_ATTRIBUTE_LENGTH);

        let mut wrong = KEY;
        wrong[0] = 1;
        assert_eq!(beacon.write(UNLOCK, &wrong), GattStatus::INSUFFICIENT_AUTHORIZATION);
        assert_eq!(beacon.write(UNLOCK, &KEY), GattStatus::SUCCESS);
        assert!(!beacon.is_locked());
    }

    #[test]
    fn test_unlock_while_unlocked_succeeds() {
        let network = SimBeaconNetwork::new();
        let beacon = network.add_beacon();
        assert_eq!(beacon.write(UNLOCK, &KEY), GattStatus::SUCCESS);
        assert_eq!(beacon.write(UNLOCK, &[0; 17]), GattStatus::INVALID_ATTRIBUTE_LENGTH);
    }

    #[test]
    fn test_rejecting_beacon_stays_unlocked() {
        let network = SimBeaconNetwork::new();
        let beacon = network.add_beacon();
        beacon.set_reject_lock(true);
        assert_eq!(beacon.write(LOCK, &KEY), GattStatus::INSUFFICIENT_AUTHORIZATION);
        assert!(!beacon.is_locked());
    }

    #[test]
    fn test_length_and_range_checks() {
        let network = SimBeaconNetwork::new();
        let beacon = network.add_beacon();

        assert_eq!(beacon.write(URI_DATA, &[0; 19]), GattStatus::INVALID_ATTRIBUTE_LENGTH);
        assert_eq!(
            beacon.write(ADV_TX_POWER_LEVELS, &[0; 3]),
            GattStatus::INVALID_ATTRIBUTE_LENGTH
        );
        assert_eq!(beacon.write(TX_POWER_MODE, &[]), GattStatus::INVALID_ATTRIBUTE_LENGTH);
        assert_eq!(beacon.write(TX_POWER_MODE, &[5]), GattStatus::WRITE_NOT_PERMITTED);
        assert_eq!(beacon.write(BEACON_PERIOD, &[0]), GattStatus::INVALID_ATTRIBUTE_LENGTH);
        assert_eq!(beacon.write(RESET, &[0, 0]), GattStatus::INVALID_ATTRIBUTE_LENGTH);
    }

    #[test]
    fn test_period_floor_and_disable() {
        let network = SimBeaconNetwork::new();
        let beacon = network.add_beacon();

        assert_eq!(beacon.write(BEACON_PERIOD, &[1, 0]), GattStatus::SUCCESS);
        assert_eq!(beacon.period_ms(), MIN_BEACON_PERIOD_MS);

        assert_eq!(beacon.write(BEACON_PERIOD, &[0xE7, 0x03]), GattStatus::SUCCESS);
        assert_eq!(beacon.read(BEACON_PERIOD).1, vec![0xE7, 0x03]);

        assert_eq!(beacon.write(BEACON_PERIOD, &[0, 0]), GattStatus::SUCCESS);
        let adv = beacon.advertisement().unwrap();
        assert!(!adv.advertises(&EDDYSTONE_SERVICE_UUID));
    }

    #[test]
    fn test_advertisement_tracks_configuration() {
        let network = SimBeaconNetwork::new();
        let beacon = network.add_beacon();
        beacon.write(URI_DATA, &[0x01]);
        beacon.write(ADV_TX_POWER_LEVELS, &[0, 0x0A, 0, 0]);
        beacon.write(TX_POWER_MODE, &[1]);

        let adv = beacon.advertisement().unwrap();
        assert_eq!(
            adv.service_data(&EDDYSTONE_SERVICE_UUID),
            Some(&[URL_FRAME_TYPE, 0x0A, 0x01][..])
        );

        beacon.write(RESET, &[1]);
        assert_eq!(beacon.uri(), BeaconState::default().uri);
    }

    #[test]
    fn test_queued_slot_data_precedes_computed_eid() {
        let network = SimBeaconNetwork::new();
        let beacon = network.add_beacon();
        beacon.queue_slot_data(vec![EID_FRAME_TYPE, 10]);

        assert_eq!(beacon.read(ADV_SLOT_DATA).1, vec![EID_FRAME_TYPE, 10]);
        assert!(crate::ble::eid::is_ready(&beacon.read(ADV_SLOT_DATA).1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_callbacks_arrive_after_latency() {
        let network = SimBeaconNetwork::new();
        let beacon = network.add_beacon();
        let central = network.central();
        central.set_latency(Duration::from_millis(50));
        let recorder = Arc::new(Recorder::default());
        central.register_callback(Arc::clone(&recorder) as Arc<dyn GattCallback>);

        central.connect(beacon.device()).unwrap();
        assert!(recorder.states.lock().unwrap().is_empty());

        sleep(Duration::from_millis(60)).await;
        assert_eq!(
            recorder.states.lock().unwrap().as_slice(),
            &[(GattStatus::SUCCESS, ConnectionState::Connected)]
        );

        central
            .read_characteristic(URL_CONFIG_SERVICE_UUID, LOCK_STATE)
            .unwrap();
        sleep(Duration::from_millis(60)).await;
        assert_eq!(
            recorder.reads.lock().unwrap().as_slice(),
            &[(LOCK_STATE, GattStatus::SUCCESS, vec![0])]
        );
        assert_eq!(central.max_outstanding(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_requests_need_a_link() {
        let network = SimBeaconNetwork::new();
        let central = network.central();
        assert_eq!(
            central.read_characteristic(URL_CONFIG_SERVICE_UUID, LOCK_STATE),
            Err(BleError::Disconnected)
        );
        assert!(central.operations().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stopped_scan_delivers_nothing() {
        let network = SimBeaconNetwork::new();
        network.add_beacon();
        let central = network.central();
        let recorder = Arc::new(Recorder::default());
        central.register_callback(Arc::clone(&recorder) as Arc<dyn GattCallback>);

        central
            .start_scan(&ScanFilter::service(URL_CONFIG_SERVICE_UUID))
            .unwrap();
        central.stop_scan();
        sleep(Duration::from_millis(100)).await;
        assert!(recorder.scans.lock().unwrap().is_empty());

        central
            .start_scan(&ScanFilter::service(URL_CONFIG_SERVICE_UUID))
            .unwrap();
        sleep(Duration::from_millis(100)).await;
        // Heard twice; de-duplication is the listener's job.
        assert_eq!(recorder.scans.lock().unwrap().len(), 2);
    }
}
