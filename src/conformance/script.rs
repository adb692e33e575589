//! Scripts and the fluent builder that produces them

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::action::{Action, AdvertisementField, Validity};
use crate::ble::transport::GattStatus;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScriptError {
    #[error("Script has no actions")]
    Empty,

    #[error("Script does not end with a terminal action")]
    MissingTerminal,

    #[error("Terminal action at position {0} is not last")]
    TerminalNotLast(usize),
}

/// A named, immutable list of actions ending in exactly one
/// [`Action::Terminal`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Script {
    name: String,
    reference: String,
    steps: Vec<Action>,
}

impl Script {
    pub fn builder(name: impl Into<String>) -> ScriptBuilder {
        ScriptBuilder::new(name)
    }

    /// Validate an externally supplied action list.
    pub fn from_actions(
        name: impl Into<String>,
        reference: impl Into<String>,
        steps: Vec<Action>,
    ) -> Result<Self, ScriptError> {
        let last = steps.len().checked_sub(1).ok_or(ScriptError::Empty)?;
        if let Some(position) = steps[..last].iter().position(Action::is_terminal) {
            return Err(ScriptError::TerminalNotLast(position));
        }
        if !steps[last].is_terminal() {
            return Err(ScriptError::MissingTerminal);
        }
        Ok(Self {
            name: name.into(),
            reference: reference.into(),
            steps,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Where the checked behavior is specified, for diagnostics.
    pub fn reference(&self) -> &str {
        &self.reference
    }

    /// The canonical action list, terminal included.
    pub fn steps(&self) -> &[Action] {
        &self.steps
    }

    pub fn definition(&self) -> ScriptDefinition {
        ScriptDefinition {
            name: self.name.clone(),
            reference: self.reference.clone(),
            actions: self.steps.clone(),
        }
    }
}

/// Serializable form of a [`Script`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptDefinition {
    pub name: String,
    #[serde(default)]
    pub reference: String,
    pub actions: Vec<Action>,
}

impl TryFrom<ScriptDefinition> for Script {
    type Error = ScriptError;

    fn try_from(definition: ScriptDefinition) -> Result<Self, Self::Error> {
        Script::from_actions(definition.name, definition.reference, definition.actions)
    }
}

/// Accumulates actions; [`build`](Self::build) closes the list.
#[derive(Debug, Clone, Default)]
pub struct ScriptBuilder {
    name: String,
    reference: String,
    actions: Vec<Action>,
}

impl ScriptBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = reference.into();
        self
    }

    pub fn connect(mut self) -> Self {
        self.actions.push(Action::Connect);
        self
    }

    pub fn disconnect(mut self) -> Self {
        self.actions.push(Action::Disconnect);
        self
    }

    pub fn write(mut self, characteristic: Uuid, value: impl AsRef<[u8]>, status: GattStatus) -> Self {
        self.actions.push(Action::Write {
            characteristic,
            value: value.as_ref().to_vec(),
            expected_status: status,
        });
        self
    }

    /// Write that passes when the answer is any of `statuses`.
    pub fn write_any(
        mut self,
        characteristic: Uuid,
        value: impl AsRef<[u8]>,
        statuses: &[GattStatus],
    ) -> Self {
        self.actions.push(Action::WriteMulti {
            characteristic,
            value: value.as_ref().to_vec(),
            expected_statuses: statuses.to_vec(),
        });
        self
    }

    pub fn assert_equals(
        mut self,
        characteristic: Uuid,
        expected: impl AsRef<[u8]>,
        status: GattStatus,
    ) -> Self {
        self.actions.push(Action::Assert {
            characteristic,
            expected_value: expected.as_ref().to_vec(),
            expected_status: status,
        });
        self
    }

    pub fn assert_not_equals(
        mut self,
        characteristic: Uuid,
        forbidden: impl AsRef<[u8]>,
        status: GattStatus,
    ) -> Self {
        self.actions.push(Action::AssertNot {
            characteristic,
            forbidden_value: forbidden.as_ref().to_vec(),
            expected_status: status,
        });
        self
    }

    pub fn assert_adv_flags(self, service: Uuid, flags: u8) -> Self {
        self.observe(service, AdvertisementField::Flags, Some(vec![flags]))
    }

    pub fn assert_adv_tx_power(self, service: Uuid, tx_power: u8) -> Self {
        self.observe(service, AdvertisementField::TxPower, Some(vec![tx_power]))
    }

    pub fn assert_adv_uri(self, service: Uuid, uri: impl AsRef<[u8]>) -> Self {
        self.observe(service, AdvertisementField::Uri, Some(uri.as_ref().to_vec()))
    }

    pub fn check_adv_packet(self, service: Uuid) -> Self {
        self.observe(service, AdvertisementField::RawPacket, None)
    }

    fn observe(
        mut self,
        service: Uuid,
        field: AdvertisementField,
        expected_value: Option<Vec<u8>>,
    ) -> Self {
        self.actions.push(Action::ObserveAdvertisement {
            service,
            field,
            expected_value,
        });
        self
    }

    pub fn poll_until_valid(
        mut self,
        characteristic: Uuid,
        validity: Validity,
        status: GattStatus,
    ) -> Self {
        self.actions.push(Action::PollUntilValid {
            characteristic,
            validity,
            expected_status: status,
        });
        self
    }

    /// Write `value`, then read it back, both expecting success.
    pub fn write_and_read(self, characteristic: Uuid, value: impl AsRef<[u8]>) -> Self {
        let value = value.as_ref();
        self.write(characteristic, value, GattStatus::SUCCESS)
            .assert_equals(characteristic, value, GattStatus::SUCCESS)
    }

    pub fn write_and_read_all(self, characteristic: Uuid, values: &[&[u8]]) -> Self {
        values
            .iter()
            .fold(self, |builder, value| builder.write_and_read(characteristic, value))
    }

    /// Append another builder's actions.
    pub fn insert_actions(mut self, other: ScriptBuilder) -> Self {
        self.actions.extend(other.actions);
        self
    }

    pub fn build(mut self) -> Script {
        self.actions.push(Action::Terminal);
        Script {
            name: self.name,
            reference: self.reference,
            steps: self.actions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::gatt::{BEACON_PERIOD, LOCK, LOCK_STATE};

    #[test]
    fn test_build_appends_single_terminal() {
        let script = Script::builder("Lock")
            .reference("config-service-spec#lock")
            .connect()
            .write(LOCK, [0u8; 16], GattStatus::SUCCESS)
            .assert_equals(LOCK_STATE, [1u8], GattStatus::SUCCESS)
            .build();

        assert_eq!(script.steps().len(), 4);
        assert!(script.steps()[3].is_terminal());
        assert_eq!(script.steps().iter().filter(|a| a.is_terminal()).count(), 1);
        assert_eq!(script.reference(), "config-service-spec#lock");
    }

    #[test]
    fn test_write_and_read_all_pairs_each_value() {
        let script = Script::builder("Period")
            .write_and_read_all(BEACON_PERIOD, &[&[0xE9, 0x03], &[0xE7, 0x03]])
            .build();
        let kinds: Vec<_> = script.steps().iter().map(Action::kind).collect();
        assert_eq!(kinds, ["write", "assert", "write", "assert", "terminal"]);
    }

    #[test]
    fn test_insert_actions_keeps_order() {
        let lock = ScriptBuilder::new("").write(LOCK, [0u8; 16], GattStatus::SUCCESS);
        let script = Script::builder("Combined").connect().insert_actions(lock).build();
        let kinds: Vec<_> = script.steps().iter().map(Action::kind).collect();
        assert_eq!(kinds, ["connect", "write", "terminal"]);
    }

    #[test]
    fn test_from_actions_validation() {
        assert_eq!(
            Script::from_actions("a", "", vec![]).unwrap_err(),
            ScriptError::Empty
        );
        assert_eq!(
            Script::from_actions("a", "", vec![Action::Connect]).unwrap_err(),
            ScriptError::MissingTerminal
        );
        assert_eq!(
            Script::from_actions("a", "", vec![Action::Terminal, Action::Terminal]).unwrap_err(),
            ScriptError::TerminalNotLast(0)
        );
        assert!(Script::from_actions("a", "", vec![Action::Terminal]).is_ok());
    }

    #[test]
    fn test_definition_round_trips_through_json() {
        let script = Script::builder("Read Lock State")
            .assert_equals(LOCK_STATE, [0u8], GattStatus::SUCCESS)
            .build();
        let json = serde_json::to_string(&script.definition()).unwrap();
        let definition: ScriptDefinition = serde_json::from_str(&json).unwrap();
        assert_eq!(Script::try_from(definition).unwrap(), script);
    }
}
