//! Protocol steps
//!
//! An [`Action`] only describes what to do and how to judge the answer.
//! Outcomes are recorded per run in the session, never on the action.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ble::eid;
use crate::ble::gatt::readable_name;
use crate::ble::transport::GattStatus;

pub use crate::ble::advertisement::AdvertisementField;

/// Payload check used by poll-until-valid reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Validity {
    /// A computed EID slot: full length with a non-zero identifier.
    EidSlot,
    /// Any payload of exactly `len` bytes.
    Length { len: usize },
}

impl Validity {
    pub fn is_valid(&self, value: &[u8]) -> bool {
        match self {
            Validity::EidSlot => eid::is_ready(value),
            Validity::Length { len } => value.len() == *len,
        }
    }
}

/// One step of a script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Action {
    Connect,
    Disconnect,
    Write {
        characteristic: Uuid,
        #[serde(with = "hex::serde")]
        value: Vec<u8>,
        expected_status: GattStatus,
    },
    /// A write that may legitimately answer with any of several statuses.
    WriteMulti {
        characteristic: Uuid,
        #[serde(with = "hex::serde")]
        value: Vec<u8>,
        expected_statuses: Vec<GattStatus>,
    },
    Assert {
        characteristic: Uuid,
        #[serde(with = "hex::serde")]
        expected_value: Vec<u8>,
        expected_status: GattStatus,
    },
    AssertNot {
        characteristic: Uuid,
        #[serde(with = "hex::serde")]
        forbidden_value: Vec<u8>,
        expected_status: GattStatus,
    },
    ObserveAdvertisement {
        service: Uuid,
        field: AdvertisementField,
        #[serde(default, with = "optional_hex")]
        expected_value: Option<Vec<u8>>,
    },
    PollUntilValid {
        characteristic: Uuid,
        validity: Validity,
        expected_status: GattStatus,
    },
    /// Closes every script. Has no effect of its own.
    Terminal,
}

impl Action {
    /// Short name of the variant, used in reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Action::Connect => "connect",
            Action::Disconnect => "disconnect",
            Action::Write { .. } => "write",
            Action::WriteMulti { .. } => "write_multi",
            Action::Assert { .. } => "assert",
            Action::AssertNot { .. } => "assert_not",
            Action::ObserveAdvertisement { .. } => "observe_advertisement",
            Action::PollUntilValid { .. } => "poll_until_valid",
            Action::Terminal => "terminal",
        }
    }

    /// Whether the action needs an open link before it can run.
    pub fn requires_connection(&self) -> bool {
        !matches!(
            self,
            Action::Connect | Action::ObserveAdvertisement { .. } | Action::Terminal
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Action::Terminal)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Connect => write!(f, "Connect"),
            Action::Disconnect => write!(f, "Disconnect"),
            Action::Write {
                characteristic,
                value,
                ..
            }
            | Action::WriteMulti {
                characteristic,
                value,
                ..
            } => write!(
                f,
                "Write {}: {}",
                readable_name(characteristic),
                hex::encode(value)
            ),
            Action::Assert {
                characteristic,
                expected_value,
                ..
            } => write!(
                f,
                "Assert {} == {}",
                readable_name(characteristic),
                hex::encode(expected_value)
            ),
            Action::AssertNot {
                characteristic,
                forbidden_value,
                ..
            } => write!(
                f,
                "Assert {} != {}",
                readable_name(characteristic),
                hex::encode(forbidden_value)
            ),
            Action::ObserveAdvertisement {
                field: AdvertisementField::RawPacket,
                ..
            } => write!(f, "Scan Adv Packet"),
            Action::ObserveAdvertisement {
                field,
                expected_value,
                ..
            } => {
                let expected = expected_value.as_deref().map(hex::encode).unwrap_or_default();
                write!(f, "Read Adv {:?}: {}", field, expected)
            }
            Action::PollUntilValid {
                characteristic,
                validity,
                ..
            } => write!(
                f,
                "Poll {} until {:?}",
                readable_name(characteristic),
                validity
            ),
            Action::Terminal => write!(f, "End"),
        }
    }
}

mod optional_hex {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(bytes) => serializer.serialize_some(&hex::encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value: Option<String> = Option::deserialize(deserializer)?;
        value
            .map(|s| hex::decode(s).map_err(serde::de::Error::custom))
            .transpose()
    }
}
