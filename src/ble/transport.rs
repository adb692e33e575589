//! BLE transport trait definitions and core types
//!
//! Defines the callback-driven GATT interface that both the simulated
//! network and platform BLE stacks conform to. Every request method only
//! *starts* an operation; its outcome arrives later on a
//! [`GattCallback`], possibly from another task or thread.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::BleError;

/// A BLE device address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BleAddress {
    /// A real 6-byte BLE MAC address.
    Real([u8; 6]),
    /// A simulated address identified by UUID.
    Simulated(Uuid),
}

impl fmt::Display for BleAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BleAddress::Real(bytes) => {
                let parts: Vec<String> = bytes.iter().map(|b| format!("{:02X}", b)).collect();
                write!(f, "{}", parts.join(":"))
            }
            BleAddress::Simulated(id) => write!(f, "sim-{}", id),
        }
    }
}

/// A device that a scan has seen and that can be connected to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BeaconDevice {
    pub address: BleAddress,
    pub name: Option<String>,
}

impl BeaconDevice {
    pub fn new(address: BleAddress) -> Self {
        Self {
            address,
            name: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

impl fmt::Display for BeaconDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{} ({})", name, self.address),
            None => write!(f, "{}", self.address),
        }
    }
}

/// A received advertisement.
#[derive(Debug, Clone)]
pub struct ScanRecord {
    pub device: BeaconDevice,
    /// Received signal strength indicator (if available).
    pub rssi: Option<i16>,
    /// Service UUIDs listed in the advertisement.
    pub service_uuids: Vec<Uuid>,
    /// Service data keyed by service UUID.
    pub service_data: HashMap<Uuid, Vec<u8>>,
}

impl ScanRecord {
    pub fn service_data(&self, service: &Uuid) -> Option<&[u8]> {
        self.service_data.get(service).map(Vec::as_slice)
    }

    pub fn advertises(&self, service: &Uuid) -> bool {
        self.service_uuids.contains(service)
    }
}

/// Restricts a scan to advertisements that list one service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanFilter {
    pub service_uuid: Uuid,
}

impl ScanFilter {
    pub fn service(service_uuid: Uuid) -> Self {
        Self { service_uuid }
    }

    pub fn matches(&self, record: &ScanRecord) -> bool {
        record.advertises(&self.service_uuid)
    }
}

/// Status code attached to every GATT completion.
///
/// Conformance scripts probe for specific non-success codes, so a status is
/// plain data here, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GattStatus(pub u16);

impl GattStatus {
    pub const SUCCESS: GattStatus = GattStatus(0x00);
    pub const READ_NOT_PERMITTED: GattStatus = GattStatus(0x02);
    pub const WRITE_NOT_PERMITTED: GattStatus = GattStatus(0x03);
    pub const INSUFFICIENT_AUTHENTICATION: GattStatus = GattStatus(0x05);
    pub const REQUEST_NOT_SUPPORTED: GattStatus = GattStatus(0x06);
    pub const INVALID_OFFSET: GattStatus = GattStatus(0x07);
    pub const INSUFFICIENT_AUTHORIZATION: GattStatus = GattStatus(0x08);
    pub const INVALID_ATTRIBUTE_LENGTH: GattStatus = GattStatus(0x0D);
    pub const FAILURE: GattStatus = GattStatus(0x101);

    pub fn is_success(self) -> bool {
        self == Self::SUCCESS
    }

    fn name(self) -> Option<&'static str> {
        let name = match self {
            Self::SUCCESS => "SUCCESS",
            Self::READ_NOT_PERMITTED => "READ_NOT_PERMITTED",
            Self::WRITE_NOT_PERMITTED => "WRITE_NOT_PERMITTED",
            Self::INSUFFICIENT_AUTHENTICATION => "INSUFFICIENT_AUTHENTICATION",
            Self::REQUEST_NOT_SUPPORTED => "REQUEST_NOT_SUPPORTED",
            Self::INVALID_OFFSET => "INVALID_OFFSET",
            Self::INSUFFICIENT_AUTHORIZATION => "INSUFFICIENT_AUTHORIZATION",
            Self::INVALID_ATTRIBUTE_LENGTH => "INVALID_ATTRIBUTE_LENGTH",
            Self::FAILURE => "FAILURE",
            _ => return None,
        };
        Some(name)
    }
}

impl fmt::Display for GattStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{} ({})", name, self.0),
            None => write!(f, "status {}", self.0),
        }
    }
}

/// Link state reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Disconnected,
}

/// Receives the outcome of every operation started on a [`GattTransport`].
///
/// Implementations must not block: transports call these from their own
/// tasks or threads.
pub trait GattCallback: Send + Sync {
    fn on_connection_state_change(&self, status: GattStatus, state: ConnectionState);

    fn on_services_discovered(&self, status: GattStatus);

    fn on_characteristic_read(&self, characteristic: Uuid, status: GattStatus, value: Vec<u8>);

    fn on_characteristic_write(&self, characteristic: Uuid, status: GattStatus);

    fn on_scan_result(&self, record: ScanRecord);
}

/// BLE central role as seen by the conformance runner.
///
/// Each method returns as soon as the request has been handed to the
/// stack. An `Err` means the request was never issued and no callback
/// will follow.
pub trait GattTransport: Send + Sync {
    /// Install the single callback that receives every completion.
    fn register_callback(&self, callback: Arc<dyn GattCallback>);

    /// Start reporting advertisements that match `filter`.
    fn start_scan(&self, filter: &ScanFilter) -> Result<(), BleError>;

    /// Stop scanning. Results delivered after this returns may be dropped.
    fn stop_scan(&self);

    /// Connect to a device; answered by `on_connection_state_change`.
    fn connect(&self, device: &BeaconDevice) -> Result<(), BleError>;

    /// Discover services on the open link; answered by `on_services_discovered`.
    fn discover_services(&self) -> Result<(), BleError>;

    /// Read a characteristic; answered by `on_characteristic_read`.
    fn read_characteristic(&self, service: Uuid, characteristic: Uuid) -> Result<(), BleError>;

    /// Write a characteristic with response; answered by `on_characteristic_write`.
    fn write_characteristic(
        &self,
        service: Uuid,
        characteristic: Uuid,
        value: &[u8],
    ) -> Result<(), BleError>;

    /// Drop the link. The transport reports the disconnection asynchronously.
    fn disconnect(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ble_address_equality() {
        let addr1 = BleAddress::Real([0x01, 0x02, 0x03, 0x04, 0x05, 0x06]);
        let addr2 = BleAddress::Real([0x01, 0x02, 0x03, 0x04, 0x05, 0x06]);
        let addr3 = BleAddress::Real([0xFF, 0x02, 0x03, 0x04, 0x05, 0x06]);
        assert_eq!(addr1, addr2);
        assert_ne!(addr1, addr3);

        let sim = BleAddress::Simulated(Uuid::nil());
        assert_ne!(addr1, sim);
    }

    #[test]
    fn test_real_address_display() {
        let addr = BleAddress::Real([0xC0, 0xFF, 0xEE, 0x00, 0x01, 0x0A]);
        assert_eq!(addr.to_string(), "C0:FF:EE:00:01:0A");
    }

    #[test]
    fn test_status_display_names_known_codes() {
        assert_eq!(GattStatus::SUCCESS.to_string(), "SUCCESS (0)");
        assert_eq!(
            GattStatus::INSUFFICIENT_AUTHORIZATION.to_string(),
            "INSUFFICIENT_AUTHORIZATION (8)"
        );
        assert_eq!(GattStatus(0x42).to_string(), "status 66");
    }

    #[test]
    fn test_scan_filter_matches_listed_service() {
        let service = Uuid::new_v4();
        let record = ScanRecord {
            device: BeaconDevice::new(BleAddress::Simulated(Uuid::new_v4())),
            rssi: Some(-60),
            service_uuids: vec![service],
            service_data: HashMap::new(),
        };
        assert!(ScanFilter::service(service).matches(&record));
        assert!(!ScanFilter::service(Uuid::new_v4()).matches(&record));
    }
}
