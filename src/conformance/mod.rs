//! Scripted conformance runs
//!
//! A [`Script`] is an immutable list of [`Action`]s. The [`Scheduler`]
//! runs scripts one after another against a single beacon, handing the
//! open connection from one session to the next, and reports progress
//! through a [`RunObserver`].

pub mod action;
mod interpreter;
pub mod observer;
pub mod scheduler;
pub mod script;
pub mod session;
pub mod suites;

pub use action::{Action, AdvertisementField, Validity};
pub use observer::{ChannelObserver, LogObserver, RunEvent, RunObserver};
pub use scheduler::{RunSummary, Scheduler, SchedulerError, SchedulerHandle};
pub use script::{Script, ScriptBuilder, ScriptDefinition, ScriptError};
pub use session::{ActionOutcome, SessionReport};

use std::time::Duration;

use thiserror::Error;

use crate::ble::advertisement::AdvertisementError;
use crate::ble::bridge::BridgeError;
use crate::ble::transport::GattStatus;

/// Why an action failed. Ends the session it occurred in, never the run.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConformanceError {
    #[error("Transport disconnected")]
    TransportDisconnected,

    #[error("{operation} timed out after {after:?}")]
    OperationTimeout { operation: String, after: Duration },

    #[error("{0} interrupted")]
    OperationInterrupted(String),

    #[error("Incorrect status code: {actual}. Expected: {}", format_statuses(.expected))]
    UnexpectedStatus {
        expected: Vec<GattStatus>,
        actual: GattStatus,
    },

    #[error("Result not the same. Expected: {expected}. Received: {actual}")]
    UnexpectedPayload { expected: String, actual: String },

    #[error("Values read are the same: {0}")]
    ForbiddenPayload(String),

    #[error("No beacon found: {0}")]
    NoCandidateFound(String),

    #[error("{0} beacons found and none was chosen")]
    AmbiguousCandidates(usize),

    #[error("No valid value from {characteristic} after {attempts} reads (last: {last})")]
    RetryLimitExceeded {
        characteristic: String,
        attempts: u32,
        last: String,
    },

    #[error("Connection failed with {0}")]
    ConnectionFailed(GattStatus),

    #[error("Invalid advertisement: {0}")]
    InvalidAdvertisement(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Stopped by user")]
    Stopped,
}

fn format_statuses(statuses: &[GattStatus]) -> String {
    statuses
        .iter()
        .map(|s| s.to_string())
        .collect::<Vec<_>>()
        .join(" or ")
}

impl From<BridgeError> for ConformanceError {
    fn from(err: BridgeError) -> Self {
        match err {
            BridgeError::Disconnected => ConformanceError::TransportDisconnected,
            BridgeError::Timeout { operation, after } => {
                ConformanceError::OperationTimeout { operation, after }
            }
            BridgeError::Interrupted { operation } => {
                ConformanceError::OperationInterrupted(operation)
            }
            BridgeError::RetryLimitExceeded {
                characteristic,
                attempts,
                last,
            } => ConformanceError::RetryLimitExceeded {
                characteristic,
                attempts,
                last,
            },
            BridgeError::Transport { operation, reason } => {
                ConformanceError::Transport(format!("{}: {}", operation, reason))
            }
            BridgeError::ConnectionFailed(status) => ConformanceError::ConnectionFailed(status),
        }
    }
}

impl From<AdvertisementError> for ConformanceError {
    fn from(err: AdvertisementError) -> Self {
        match err {
            AdvertisementError::Mismatch {
                expected, actual, ..
            } => ConformanceError::UnexpectedPayload { expected, actual },
            other => ConformanceError::InvalidAdvertisement(other.to_string()),
        }
    }
}
