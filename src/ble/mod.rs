//! BLE transport layer for the conformance runner
//!
//! Provides the callback-driven transport traits, the command bridge that
//! turns those callbacks into awaited, timeout-bounded calls, and a
//! simulated beacon network for testing without hardware.

pub mod advertisement;
pub mod bridge;
pub mod eid;
pub mod gatt;
pub mod simulated;
pub mod transport;

use thiserror::Error;

/// Errors raised by a transport when an operation cannot even be started.
///
/// Completion results (including non-success GATT statuses) are delivered
/// through [`transport::GattCallback`], never through this type.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BleError {
    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Scan error: {0}")]
    ScanError(String),

    #[error("GATT error: {0}")]
    GattError(String),

    #[error("Peer disconnected")]
    Disconnected,
}
