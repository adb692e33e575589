//! Command bridge
//!
//! Turns the callback-driven [`GattTransport`] into awaited,
//! timeout-bounded calls. The transport answers on its own tasks; a
//! router installed as its callback forwards each answer into:
//!
//! - a one-slot channel for command results,
//! - a watch channel for link state,
//! - a de-duplicating collector for scan results.
//!
//! Every operation takes `&mut self`, so a bridge never has more than one
//! request outstanding.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep, sleep_until, Instant};
use uuid::Uuid;

use super::gatt::readable_name;
use super::transport::{
    BeaconDevice, ConnectionState, GattCallback, GattStatus, GattTransport, ScanFilter,
    ScanRecord,
};
use crate::config::ValidatorConfig;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    #[error("Not connected")]
    Disconnected,

    #[error("{operation} timed out after {after:?}")]
    Timeout { operation: String, after: Duration },

    #[error("{operation} interrupted")]
    Interrupted { operation: String },

    #[error("No valid value from {characteristic} after {attempts} reads (last: {last})")]
    RetryLimitExceeded {
        characteristic: String,
        attempts: u32,
        last: String,
    },

    #[error("{operation} could not be issued: {reason}")]
    Transport { operation: String, reason: String },

    #[error("Connection failed with {0}")]
    ConnectionFailed(GattStatus),
}

/// Kind of characteristic operation a [`Command`] performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Read,
    Write,
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandKind::Read => write!(f, "read"),
            CommandKind::Write => write!(f, "write"),
        }
    }
}

/// One characteristic request on the configuration service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub kind: CommandKind,
    pub characteristic: Uuid,
    pub value: Vec<u8>,
}

impl Command {
    pub fn read(characteristic: Uuid) -> Self {
        Self {
            kind: CommandKind::Read,
            characteristic,
            value: Vec::new(),
        }
    }

    pub fn write(characteristic: Uuid, value: impl Into<Vec<u8>>) -> Self {
        Self {
            kind: CommandKind::Write,
            characteristic,
            value: value.into(),
        }
    }

    fn describe(&self) -> String {
        format!("{} {}", self.kind, readable_name(&self.characteristic))
    }
}

/// Completion of a [`Command`]. Writes carry an empty value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    pub status: GattStatus,
    pub value: Vec<u8>,
}

/// Identifies one established link. A handle from an earlier link never
/// compares equal to the current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionHandle(u64);

#[derive(Debug, Clone, PartialEq, Eq)]
enum GattEvent {
    ServicesDiscovered {
        status: GattStatus,
    },
    Read {
        characteristic: Uuid,
        status: GattStatus,
        value: Vec<u8>,
    },
    Write {
        characteristic: Uuid,
        status: GattStatus,
    },
}

impl GattEvent {
    /// The request this event answers, if it answers one.
    fn answers(&self) -> Option<(CommandKind, Uuid)> {
        match self {
            GattEvent::Read { characteristic, .. } => Some((CommandKind::Read, *characteristic)),
            GattEvent::Write { characteristic, .. } => Some((CommandKind::Write, *characteristic)),
            GattEvent::ServicesDiscovered { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LinkState {
    state: ConnectionState,
    status: GattStatus,
}

#[derive(Default)]
struct ScanCollector {
    filter: Option<ScanFilter>,
    records: Vec<ScanRecord>,
}

/// Installed as the transport's callback; forwards each answer to the bridge.
struct CallbackRouter {
    results: mpsc::Sender<GattEvent>,
    link: watch::Sender<LinkState>,
    scans: Mutex<ScanCollector>,
}

impl CallbackRouter {
    fn forward(&self, event: GattEvent) {
        if let Err(e) = self.results.try_send(event) {
            log::warn!("Dropping unexpected GATT callback: {}", e);
        }
    }
}

impl GattCallback for CallbackRouter {
    fn on_connection_state_change(&self, status: GattStatus, state: ConnectionState) {
        log::debug!("Link state {:?} ({})", state, status);
        self.link.send_replace(LinkState { state, status });
    }

    fn on_services_discovered(&self, status: GattStatus) {
        self.forward(GattEvent::ServicesDiscovered { status });
    }

    fn on_characteristic_read(&self, characteristic: Uuid, status: GattStatus, value: Vec<u8>) {
        self.forward(GattEvent::Read {
            characteristic,
            status,
            value,
        });
    }

    fn on_characteristic_write(&self, characteristic: Uuid, status: GattStatus) {
        self.forward(GattEvent::Write {
            characteristic,
            status,
        });
    }

    fn on_scan_result(&self, record: ScanRecord) {
        let mut scans = self.scans.lock().unwrap_or_else(|e| e.into_inner());
        let Some(filter) = scans.filter else {
            return;
        };
        if !filter.matches(&record) {
            return;
        }
        // First sighting wins.
        let seen = scans
            .records
            .iter()
            .any(|r| r.device.address == record.device.address);
        if !seen {
            scans.records.push(record);
        }
    }
}

enum Wake {
    Event(Option<GattEvent>),
    Link(bool),
    Deadline,
}

/// Awaitable front end over a [`GattTransport`].
pub struct CommandBridge {
    transport: Arc<dyn GattTransport>,
    service: Uuid,
    config: ValidatorConfig,
    router: Arc<CallbackRouter>,
    results: mpsc::Receiver<GattEvent>,
    link: watch::Receiver<LinkState>,
    connection: Option<ConnectionHandle>,
    generation: u64,
    /// Requests that timed out on the current link and may still be answered.
    abandoned: Vec<(CommandKind, Uuid)>,
    disconnected_at: Option<Instant>,
}

impl CommandBridge {
    /// Wrap `transport` and install the bridge as its only callback.
    /// Reads and writes target characteristics of `service`.
    pub fn new(transport: Arc<dyn GattTransport>, service: Uuid, config: ValidatorConfig) -> Self {
        let (results_tx, results) = mpsc::channel(1);
        let (link_tx, link) = watch::channel(LinkState {
            state: ConnectionState::Disconnected,
            status: GattStatus::SUCCESS,
        });
        let router = Arc::new(CallbackRouter {
            results: results_tx,
            link: link_tx,
            scans: Mutex::new(ScanCollector::default()),
        });
        transport.register_callback(Arc::clone(&router) as Arc<dyn GattCallback>);

        Self {
            transport,
            service,
            config,
            router,
            results,
            link,
            connection: None,
            generation: 0,
            abandoned: Vec::new(),
            disconnected_at: None,
        }
    }

    pub fn service(&self) -> Uuid {
        self.service
    }

    pub fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    /// The current link, if it is still up.
    pub fn connection(&self) -> Option<ConnectionHandle> {
        let up = self.link.borrow().state == ConnectionState::Connected;
        self.connection.filter(|_| up)
    }

    /// True while `handle` names the current, live link.
    pub fn is_open(&self, handle: ConnectionHandle) -> bool {
        self.connection() == Some(handle)
    }

    /// When this bridge last dropped a link it had open.
    pub fn disconnected_at(&self) -> Option<Instant> {
        self.disconnected_at
    }

    // ------------------------------------------------------------------
    // Connection management
    // ------------------------------------------------------------------

    /// Connect to `device` and discover its services.
    pub async fn connect(&mut self, device: &BeaconDevice) -> Result<ConnectionHandle, BridgeError> {
        let handle = self.open_link(device).await?;
        self.discover_services().await?;
        Ok(handle)
    }

    /// Establish the link to `device` without discovering services.
    pub async fn open_link(&mut self, device: &BeaconDevice) -> Result<ConnectionHandle, BridgeError> {
        let operation = format!("connect to {}", device);
        log::debug!("{}", operation);
        self.connection = None;
        self.drain_stale();
        self.abandoned.clear();
        self.link.borrow_and_update();

        sleep(self.config.settle_delay()).await;
        self.transport
            .connect(device)
            .map_err(|e| BridgeError::Transport {
                operation: operation.clone(),
                reason: e.to_string(),
            })?;

        let deadline = Instant::now() + self.config.operation_timeout();
        loop {
            let wake = tokio::select! {
                biased;
                changed = self.link.changed() => Wake::Link(changed.is_ok()),
                _ = sleep_until(deadline) => Wake::Deadline,
            };
            match wake {
                Wake::Link(true) => {}
                Wake::Deadline => {
                    log::warn!("{} timed out", operation);
                    self.transport.disconnect();
                    return Err(BridgeError::Timeout {
                        operation,
                        after: self.config.operation_timeout(),
                    });
                }
                _ => return Err(BridgeError::Interrupted { operation }),
            }
            let link = *self.link.borrow_and_update();
            match link.state {
                ConnectionState::Connected if link.status.is_success() => break,
                ConnectionState::Disconnected if link.status.is_success() => {
                    log::debug!("Ignoring stale disconnect while connecting");
                }
                _ => return Err(BridgeError::ConnectionFailed(link.status)),
            }
        }

        self.generation += 1;
        let handle = ConnectionHandle(self.generation);
        self.connection = Some(handle);
        log::debug!("Link up to {}", device);
        Ok(handle)
    }

    /// Discover services on the open link. A failed discovery drops the link.
    pub async fn discover_services(&mut self) -> Result<(), BridgeError> {
        if self.connection().is_none() {
            return Err(BridgeError::Disconnected);
        }
        self.drain_stale();
        self.link.borrow_and_update();

        sleep(self.config.settle_delay()).await;
        self.transport
            .discover_services()
            .map_err(|e| BridgeError::Transport {
                operation: "discover services".to_string(),
                reason: e.to_string(),
            })?;
        let event = self
            .await_event("discover services", |event| {
                matches!(event, GattEvent::ServicesDiscovered { .. })
            })
            .await?;
        if let GattEvent::ServicesDiscovered { status } = event {
            if !status.is_success() {
                self.disconnect();
                return Err(BridgeError::ConnectionFailed(status));
            }
        }
        Ok(())
    }

    /// Ask the transport to drop the link. Does not wait for confirmation.
    pub fn disconnect(&mut self) {
        if self.connection.take().is_some() {
            log::debug!("Disconnecting");
            self.disconnected_at = Some(Instant::now());
            self.transport.disconnect();
        }
    }

    // ------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------

    /// Issue `command` and wait for its completion.
    ///
    /// A non-success GATT status is returned in the result, not as an error.
    pub async fn execute(&mut self, command: Command) -> Result<CommandResult, BridgeError> {
        if self.connection().is_none() {
            self.connection = None;
            return Err(BridgeError::Disconnected);
        }
        let operation = command.describe();
        log::debug!("{} {}", operation, hex::encode(&command.value));
        self.drain_stale();
        self.link.borrow_and_update();

        sleep(self.config.settle_delay()).await;
        let issued = match command.kind {
            CommandKind::Read => self
                .transport
                .read_characteristic(self.service, command.characteristic),
            CommandKind::Write => self.transport.write_characteristic(
                self.service,
                command.characteristic,
                &command.value,
            ),
        };
        issued.map_err(|e| BridgeError::Transport {
            operation: operation.clone(),
            reason: e.to_string(),
        })?;

        let key = (command.kind, command.characteristic);
        let event = match self
            .await_event(&operation, |event| event.answers() == Some(key))
            .await
        {
            Ok(event) => event,
            Err(e) => {
                if matches!(e, BridgeError::Timeout { .. }) {
                    self.abandoned.push(key);
                }
                return Err(e);
            }
        };

        let result = match event {
            GattEvent::Read { status, value, .. } => CommandResult { status, value },
            GattEvent::Write { status, .. } => CommandResult {
                status,
                value: Vec::new(),
            },
            GattEvent::ServicesDiscovered { status } => CommandResult {
                status,
                value: Vec::new(),
            },
        };
        log::debug!("{} -> {} {}", operation, result.status, hex::encode(&result.value));
        Ok(result)
    }

    /// Read `characteristic` until `is_valid` accepts the payload.
    ///
    /// Makes at most `poll_attempts` reads, `poll_interval` apart. A
    /// non-success status ends polling and is returned as is.
    pub async fn poll_until_valid<F>(
        &mut self,
        characteristic: Uuid,
        is_valid: F,
    ) -> Result<CommandResult, BridgeError>
    where
        F: Fn(&[u8]) -> bool,
    {
        let attempts = self.config.poll_attempts;
        let mut last = Vec::new();
        for attempt in 1..=attempts {
            let result = self.execute(Command::read(characteristic)).await?;
            if !result.status.is_success() || is_valid(&result.value) {
                return Ok(result);
            }
            log::debug!(
                "{} not ready on attempt {}/{}: {}",
                readable_name(&characteristic),
                attempt,
                attempts,
                hex::encode(&result.value)
            );
            last = result.value;
            if attempt < attempts {
                sleep(self.config.poll_interval()).await;
            }
        }
        Err(BridgeError::RetryLimitExceeded {
            characteristic: readable_name(&characteristic),
            attempts,
            last: hex::encode(last),
        })
    }

    // ------------------------------------------------------------------
    // Scanning
    // ------------------------------------------------------------------

    /// Collect advertisements matching `filter` for `window`, one record
    /// per device address.
    pub async fn scan(
        &mut self,
        filter: ScanFilter,
        window: Duration,
    ) -> Result<Vec<ScanRecord>, BridgeError> {
        log::debug!("Scanning for {} for {:?}", filter.service_uuid, window);
        {
            let mut scans = self.router.scans.lock().unwrap_or_else(|e| e.into_inner());
            scans.filter = Some(filter);
            scans.records.clear();
        }

        sleep(self.config.settle_delay()).await;
        if let Err(e) = self.transport.start_scan(&filter) {
            self.take_scan_records();
            return Err(BridgeError::Transport {
                operation: "scan".to_string(),
                reason: e.to_string(),
            });
        }
        sleep(window).await;
        self.transport.stop_scan();

        let records = self.take_scan_records();
        log::debug!("Scan found {} device(s)", records.len());
        Ok(records)
    }

    fn take_scan_records(&self) -> Vec<ScanRecord> {
        let mut scans = self.router.scans.lock().unwrap_or_else(|e| e.into_inner());
        scans.filter = None;
        std::mem::take(&mut scans.records)
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    /// Discard answers that arrived after their request was abandoned.
    fn drain_stale(&mut self) {
        while let Ok(event) = self.results.try_recv() {
            self.take_abandoned(&event);
            log::debug!("Discarding stale callback {:?}", event);
        }
    }

    /// Consume one abandoned request that `event` answers.
    fn take_abandoned(&mut self, event: &GattEvent) -> bool {
        let Some(key) = event.answers() else {
            return false;
        };
        match self.abandoned.iter().position(|k| *k == key) {
            Some(i) => {
                self.abandoned.remove(i);
                true
            }
            None => false,
        }
    }

    /// Wait for the event `wanted` accepts, a link drop, or the deadline.
    async fn await_event<F>(&mut self, operation: &str, wanted: F) -> Result<GattEvent, BridgeError>
    where
        F: Fn(&GattEvent) -> bool,
    {
        let timeout = self.config.operation_timeout();
        let deadline = Instant::now() + timeout;
        loop {
            let wake = tokio::select! {
                biased;
                event = self.results.recv() => Wake::Event(event),
                changed = self.link.changed() => Wake::Link(changed.is_ok()),
                _ = sleep_until(deadline) => Wake::Deadline,
            };
            match wake {
                Wake::Event(Some(event)) => {
                    if self.take_abandoned(&event) {
                        log::debug!("Discarding late answer {:?}", event);
                    } else if wanted(&event) {
                        return Ok(event);
                    } else {
                        log::debug!("Discarding unrelated callback {:?}", event);
                    }
                }
                Wake::Event(None) | Wake::Link(false) => {
                    return Err(BridgeError::Interrupted {
                        operation: operation.to_string(),
                    });
                }
                Wake::Link(true) => {
                    if self.link.borrow_and_update().state == ConnectionState::Disconnected {
                        log::warn!("Link dropped during {}", operation);
                        if self.connection.take().is_some() {
                            self.disconnected_at = Some(Instant::now());
                        }
                        return Err(BridgeError::Disconnected);
                    }
                }
                Wake::Deadline => {
                    log::warn!("{} timed out after {:?}", operation, timeout);
                    return Err(BridgeError::Timeout {
                        operation: operation.to_string(),
                        after: timeout,
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::transport::{BleAddress, ScanFilter};
    use crate::ble::BleError;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    const LATENCY: Duration = Duration::from_millis(5);

    /// Answers every request after a fixed latency, unless silent.
    #[derive(Default)]
    struct ReplayTransport {
        callback: Mutex<Option<Arc<dyn GattCallback>>>,
        read_value: Mutex<Vec<u8>>,
        /// Per-read latency and payload, used before `read_value`.
        read_replies: Mutex<VecDeque<(Duration, Vec<u8>)>>,
        write_status: Mutex<Option<GattStatus>>,
        silent: AtomicBool,
        stale_first: AtomicBool,
        reads: AtomicUsize,
        writes: AtomicUsize,
    }

    impl ReplayTransport {
        fn reply<F>(&self, f: F)
        where
            F: FnOnce(&dyn GattCallback) + Send + 'static,
        {
            self.reply_after(LATENCY, f);
        }

        fn reply_after<F>(&self, latency: Duration, f: F)
        where
            F: FnOnce(&dyn GattCallback) + Send + 'static,
        {
            if self.silent.load(Ordering::SeqCst) {
                return;
            }
            let callback = self.callback.lock().unwrap().clone();
            if let Some(callback) = callback {
                tokio::spawn(async move {
                    sleep(latency).await;
                    f(callback.as_ref());
                });
            }
        }
    }

    impl GattTransport for ReplayTransport {
        fn register_callback(&self, callback: Arc<dyn GattCallback>) {
            *self.callback.lock().unwrap() = Some(callback);
        }

        fn start_scan(&self, _filter: &ScanFilter) -> Result<(), BleError> {
            Ok(())
        }

        fn stop_scan(&self) {}

        fn connect(&self, _device: &BeaconDevice) -> Result<(), BleError> {
            self.reply(|cb| {
                cb.on_connection_state_change(GattStatus::SUCCESS, ConnectionState::Connected)
            });
            Ok(())
        }

        fn discover_services(&self) -> Result<(), BleError> {
            self.reply(|cb| cb.on_services_discovered(GattStatus::SUCCESS));
            Ok(())
        }

        fn read_characteristic(&self, _service: Uuid, characteristic: Uuid) -> Result<(), BleError> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            let (latency, value) = self
                .read_replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| (LATENCY, self.read_value.lock().unwrap().clone()));
            self.reply_after(latency, move |cb| {
                cb.on_characteristic_read(characteristic, GattStatus::SUCCESS, value)
            });
            Ok(())
        }

        fn write_characteristic(
            &self,
            _service: Uuid,
            characteristic: Uuid,
            _value: &[u8],
        ) -> Result<(), BleError> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            let status = self.write_status.lock().unwrap().unwrap_or(GattStatus::SUCCESS);
            if self.stale_first.swap(false, Ordering::SeqCst) {
                self.reply_after(Duration::ZERO, |cb| {
                    cb.on_characteristic_write(Uuid::nil(), GattStatus::FAILURE)
                });
            }
            self.reply(move |cb| cb.on_characteristic_write(characteristic, status));
            Ok(())
        }

        fn disconnect(&self) {
            self.reply(|cb| {
                cb.on_connection_state_change(GattStatus::SUCCESS, ConnectionState::Disconnected)
            });
        }
    }

    fn device() -> BeaconDevice {
        BeaconDevice::new(BleAddress::Real([0xC0, 0, 0, 0, 0, 1]))
    }

    async fn connected(transport: &Arc<ReplayTransport>) -> CommandBridge {
        let mut bridge = CommandBridge::new(
            Arc::clone(transport) as Arc<dyn GattTransport>,
            Uuid::new_v4(),
            ValidatorConfig::default(),
        );
        bridge.connect(&device()).await.unwrap();
        bridge
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_fires_after_bound() {
        let transport = Arc::new(ReplayTransport::default());
        let mut bridge = connected(&transport).await;
        transport.silent.store(true, Ordering::SeqCst);

        let before = Instant::now();
        let err = bridge.execute(Command::read(Uuid::new_v4())).await.unwrap_err();
        let elapsed = before.elapsed();

        assert!(matches!(err, BridgeError::Timeout { .. }));
        assert!(elapsed >= Duration::from_secs(20));
        assert!(elapsed < Duration::from_secs(21));
        assert_eq!(transport.reads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_answer_to_timed_out_read_is_not_reused() {
        let transport = Arc::new(ReplayTransport::default());
        let mut bridge = connected(&transport).await;
        let characteristic = Uuid::new_v4();
        {
            let mut replies = transport.read_replies.lock().unwrap();
            replies.push_back((Duration::from_secs(25), vec![0xAA]));
            replies.push_back((Duration::from_secs(10), vec![0xBB]));
        }

        let err = bridge.execute(Command::read(characteristic)).await.unwrap_err();
        assert!(matches!(err, BridgeError::Timeout { .. }));

        // The first answer lands while the second read is still pending.
        let result = bridge.execute(Command::read(characteristic)).await.unwrap();
        assert_eq!(result.value, vec![0xBB]);
        assert_eq!(transport.reads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_records_time() {
        let transport = Arc::new(ReplayTransport::default());
        let mut bridge = connected(&transport).await;
        assert_eq!(bridge.disconnected_at(), None);

        bridge.disconnect();
        assert_eq!(bridge.disconnected_at(), Some(Instant::now()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_success_status_is_a_result() {
        let transport = Arc::new(ReplayTransport::default());
        *transport.write_status.lock().unwrap() = Some(GattStatus::INSUFFICIENT_AUTHORIZATION);
        let mut bridge = connected(&transport).await;

        let result = bridge
            .execute(Command::write(Uuid::new_v4(), vec![1]))
            .await
            .unwrap();
        assert_eq!(result.status, GattStatus::INSUFFICIENT_AUTHORIZATION);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnected_bridge_does_not_dispatch() {
        let transport = Arc::new(ReplayTransport::default());
        let mut bridge = CommandBridge::new(
            Arc::clone(&transport) as Arc<dyn GattTransport>,
            Uuid::new_v4(),
            ValidatorConfig::default(),
        );

        let err = bridge.execute(Command::read(Uuid::new_v4())).await.unwrap_err();
        assert_eq!(err, BridgeError::Disconnected);
        assert_eq!(transport.reads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_invalidates_handle() {
        let transport = Arc::new(ReplayTransport::default());
        let mut bridge = connected(&transport).await;
        let handle = bridge.connection().unwrap();
        assert!(bridge.is_open(handle));

        bridge.disconnect();
        assert!(!bridge.is_open(handle));

        sleep(Duration::from_secs(1)).await;
        let again = bridge.connect(&device()).await.unwrap();
        assert_ne!(handle, again);
        assert!(bridge.is_open(again));
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_stops_after_exact_attempt_count() {
        let transport = Arc::new(ReplayTransport::default());
        *transport.read_value.lock().unwrap() = vec![0x30, 0x00];
        let mut bridge = connected(&transport).await;

        let err = bridge
            .poll_until_valid(Uuid::new_v4(), |value| value.len() == 14)
            .await
            .unwrap_err();

        assert!(matches!(err, BridgeError::RetryLimitExceeded { attempts: 5, .. }));
        assert_eq!(transport.reads.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_returns_first_valid_value() {
        let transport = Arc::new(ReplayTransport::default());
        *transport.read_value.lock().unwrap() = vec![7; 14];
        let mut bridge = connected(&transport).await;

        let result = bridge
            .poll_until_valid(Uuid::new_v4(), |value| value.len() == 14)
            .await
            .unwrap();
        assert_eq!(result.value, vec![7; 14]);
        assert_eq!(transport.reads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unrelated_callback_is_discarded() {
        let transport = Arc::new(ReplayTransport::default());
        let mut bridge = connected(&transport).await;
        transport.stale_first.store(true, Ordering::SeqCst);

        let characteristic = Uuid::new_v4();
        let result = bridge
            .execute(Command::write(characteristic, vec![1]))
            .await
            .unwrap();
        assert_eq!(result.status, GattStatus::SUCCESS);
        assert_eq!(transport.writes.load(Ordering::SeqCst), 1);
    }
}
