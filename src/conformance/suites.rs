//! Built-in Eddystone-URL configuration service suites
//!
//! Each suite is a list of short scripts run back to back by the
//! [`Scheduler`](super::Scheduler). Lock and unlock scripts leave the
//! beacon locked with [`data::BASIC_LOCK_KEY`] if they fail halfway, so
//! they only run when asked for.

use uuid::Uuid;

use super::script::{Script, ScriptBuilder};
use crate::ble::gatt::{
    ADV_TX_POWER_LEVELS, BEACON_PERIOD, EDDYSTONE_SERVICE_UUID, LOCK, LOCK_STATE, RESET,
    TX_POWER_MODE, UNLOCK, URI_DATA,
};
use crate::ble::transport::GattStatus;

const SPEC_URL: &str =
    "https://github.com/google/eddystone/blob/master/eddystone-url/docs/config-service-spec.md";
const URIBEACON_URL: &str = "https://github.com/google/uribeacon/tree/master/specification";

/// Payloads used by the suites.
pub mod data {
    use crate::ble::transport::GattStatus;

    pub const SHORT_LOCK_KEY: [u8; 15] = [0; 15];
    pub const BASIC_LOCK_KEY: [u8; 16] = [0; 16];
    pub const WRONG_LOCK_KEY: [u8; 16] = [1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];
    pub const LONG_LOCK_KEY: [u8; 17] = [0; 17];

    pub const UNLOCKED_STATE: [u8; 1] = [0];
    pub const LOCKED_STATE: [u8; 1] = [1];

    pub const BASIC_GENERAL_DATA: [u8; 1] = [1];
    pub const BASIC_GENERAL_DATA_2: [u8; 1] = [2];
    pub const MULTIPLE_GENERAL_DATA: [&[u8]; 2] = [&BASIC_GENERAL_DATA_2, &BASIC_GENERAL_DATA];

    pub const LONG_URI: [u8; 19] = [0; 19];

    pub const SHORT_TX_POWER_LEVELS: [u8; 3] = [0; 3];
    pub const BASIC_TX_POWER_LEVELS: [u8; 4] = [0; 4];
    pub const BASIC_TX_POWER_LEVELS_2: [u8; 4] = [1; 4];
    pub const MULTIPLE_TX_POWER_LEVELS: [&[u8]; 2] =
        [&BASIC_TX_POWER_LEVELS_2, &BASIC_TX_POWER_LEVELS];
    pub const LONG_TX_POWER_LEVELS: [u8; 5] = [0; 5];

    pub const SHORT_POWER_MODE: [u8; 0] = [];
    pub const LONG_POWER_MODE: [u8; 2] = [0; 2];
    pub const INVALID_POWER_MODE: [u8; 1] = [5];

    pub const SHORT_PERIOD: [u8; 1] = [0];
    /// 999 ms
    pub const BASIC_PERIOD: [u8; 2] = [0xE7, 0x03];
    /// 1001 ms
    pub const BASIC_PERIOD_2: [u8; 2] = [0xE9, 0x03];
    pub const LOW_PERIOD: [u8; 2] = [1, 0];
    pub const ZERO_PERIOD: [u8; 2] = [0, 0];
    pub const MULTIPLE_BASIC_PERIOD: [&[u8]; 2] = [&BASIC_PERIOD_2, &BASIC_PERIOD];
    pub const LONG_PERIOD: [u8; 3] = [0; 3];

    pub const SHORT_RESET: [u8; 0] = [];
    pub const LONG_RESET: [u8; 2] = [0; 2];

    /// A locked beacon may check either the length or the lock first.
    pub const VALID_LENGTH_AUTHORIZATION_ERRORS: [GattStatus; 2] = [
        GattStatus::INSUFFICIENT_AUTHORIZATION,
        GattStatus::INVALID_ATTRIBUTE_LENGTH,
    ];
}

use data::*;

const OK: GattStatus = GattStatus::SUCCESS;
const BAD_LENGTH: GattStatus = GattStatus::INVALID_ATTRIBUTE_LENGTH;
const NOT_AUTHORIZED: GattStatus = GattStatus::INSUFFICIENT_AUTHORIZATION;

fn section(anchor: &str) -> String {
    if anchor.is_empty() {
        SPEC_URL.to_string()
    } else {
        format!("{}#{}", SPEC_URL, anchor)
    }
}

fn script(name: &str, anchor: &str) -> ScriptBuilder {
    Script::builder(name).reference(section(anchor))
}

/// Basic reads, writes and broadcast checks every beacon should pass.
pub fn core_url_tests(optional: bool) -> Vec<Script> {
    core_url_tests_for(EDDYSTONE_SERVICE_UUID, optional)
}

/// [`core_url_tests`] observing broadcasts on `broadcast_service`.
pub fn core_url_tests_for(broadcast_service: Uuid, optional: bool) -> Vec<Script> {
    let mut scripts = vec![script("Connect to Eddystone-URL", "").connect().build()];
    if optional {
        scripts.extend(lock_unlock_tests());
    }
    scripts.extend([
        script("Read Lock State", "31-lock-state")
            .assert_equals(LOCK_STATE, UNLOCKED_STATE, OK)
            .build(),
        script("Write Reset", "39-reset")
            .write(RESET, BASIC_GENERAL_DATA, OK)
            .build(),
        script("Write and Read Data", "34-uri-data")
            .write_and_read_all(URI_DATA, &MULTIPLE_GENERAL_DATA)
            .build(),
        script("Write and Read Tx Power Levels", "36-advertised-tx-power-levels")
            .write_and_read_all(ADV_TX_POWER_LEVELS, &MULTIPLE_TX_POWER_LEVELS)
            .build(),
        script("Write and read Tx Power Mode", "37-tx-power-mode")
            .write_and_read_all(TX_POWER_MODE, &MULTIPLE_GENERAL_DATA)
            .build(),
        script("Write and read period", "38-beacon-period")
            .write_and_read_all(BEACON_PERIOD, &MULTIPLE_BASIC_PERIOD)
            .build(),
        script("Disable Beacon using period = 0", "38-beacon-period")
            .write_and_read(BEACON_PERIOD, ZERO_PERIOD)
            .build(),
        script("Floor period", "38-beacon-period")
            .write(BEACON_PERIOD, LOW_PERIOD, OK)
            .assert_not_equals(BEACON_PERIOD, LOW_PERIOD, OK)
            .assert_not_equals(BEACON_PERIOD, ZERO_PERIOD, OK)
            .build(),
        script("Enable beacon again", "38-beacon-period")
            .write_and_read(BEACON_PERIOD, BASIC_PERIOD)
            .build(),
        Script::builder("Disconnecting").disconnect().build(),
        Script::builder("Has Valid Advertisement Packet")
            .check_adv_packet(broadcast_service)
            .build(),
        Script::builder("Tx Power that is written is being broadcasted")
            .reference(format!("{}#uribeacon-tx-power-level", URIBEACON_URL))
            .assert_adv_tx_power(broadcast_service, BASIC_TX_POWER_LEVELS[1])
            .build(),
        Script::builder("Uri written is being broadcasted")
            .reference(format!("{}#uribeacon-uri-scheme-prefix", URIBEACON_URL))
            .assert_adv_uri(broadcast_service, BASIC_GENERAL_DATA)
            .build(),
    ]);
    scripts
}

fn lock_unlock_tests() -> Vec<Script> {
    vec![
        script("Lock Beacon", "32-lock")
            .write(LOCK, BASIC_LOCK_KEY, OK)
            .assert_equals(LOCK_STATE, LOCKED_STATE, OK)
            .build(),
        script("Unlock Beacon", "33-unlock")
            .write(UNLOCK, BASIC_LOCK_KEY, OK)
            .assert_equals(LOCK_STATE, UNLOCKED_STATE, OK)
            .build(),
        locking("Locking..."),
        script("Try to unlock with wrong key", "33-unlock")
            .write(UNLOCK, WRONG_LOCK_KEY, NOT_AUTHORIZED)
            .build(),
        unlocking("Unlocking..."),
    ]
}

fn locking(name: &str) -> Script {
    Script::builder(name)
        .write(LOCK, BASIC_LOCK_KEY, OK)
        .assert_equals(LOCK_STATE, LOCKED_STATE, OK)
        .build()
}

fn unlocking(name: &str) -> Script {
    Script::builder(name)
        .write(UNLOCK, BASIC_LOCK_KEY, OK)
        .assert_equals(LOCK_STATE, UNLOCKED_STATE, OK)
        .build()
}

/// Return code checks for malformed writes, locked and unlocked.
pub fn spec_url_tests(optional: bool) -> Vec<Script> {
    let return_codes = "13-return-codes";
    let mut scripts = vec![
        Script::builder("Connecting...").connect().build(),
        script("Try Long UriData", return_codes)
            .write(URI_DATA, LONG_URI, BAD_LENGTH)
            .build(),
        script("Try Short Advertised Tx Power Levels", return_codes)
            .write(ADV_TX_POWER_LEVELS, SHORT_TX_POWER_LEVELS, BAD_LENGTH)
            .build(),
        script("Try Long Advertised Tx Power Levels", return_codes)
            .write(ADV_TX_POWER_LEVELS, LONG_TX_POWER_LEVELS, BAD_LENGTH)
            .build(),
        script("Try Short Power Mode", return_codes)
            .write(TX_POWER_MODE, SHORT_POWER_MODE, BAD_LENGTH)
            .build(),
        script("Try Long Power Mode", return_codes)
            .write(TX_POWER_MODE, LONG_POWER_MODE, BAD_LENGTH)
            .build(),
        script("Invalid Power Mode", "37-tx-power-mode")
            .write(TX_POWER_MODE, INVALID_POWER_MODE, GattStatus::WRITE_NOT_PERMITTED)
            .build(),
        script("Try Short Period", return_codes)
            .write(BEACON_PERIOD, SHORT_PERIOD, BAD_LENGTH)
            .build(),
        script("Try Long Period", return_codes)
            .write(BEACON_PERIOD, LONG_PERIOD, BAD_LENGTH)
            .build(),
        script("Try Short Reset", return_codes)
            .write(RESET, SHORT_RESET, BAD_LENGTH)
            .build(),
        script("Try Long Reset", return_codes)
            .write(RESET, LONG_RESET, BAD_LENGTH)
            .build(),
    ];
    if optional {
        scripts.extend(spec_lock_tests());
    }
    scripts.push(Script::builder("Disconnecting...").disconnect().build());
    scripts
}

fn spec_lock_tests() -> Vec<Script> {
    let return_codes = "13-return-codes";
    let either = &VALID_LENGTH_AUTHORIZATION_ERRORS;
    vec![
        script("Try Lock with Short Key", return_codes)
            .write(LOCK, SHORT_LOCK_KEY, BAD_LENGTH)
            .build(),
        script("Try Lock with Long Key", return_codes)
            .write(LOCK, LONG_LOCK_KEY, BAD_LENGTH)
            .build(),
        locking("Locking beacon..."),
        script("Locked: Try Lock with Short Key", "32-lock")
            .write_any(LOCK, SHORT_LOCK_KEY, either)
            .build(),
        script("Locked: Try Lock with Valid Key", "32-lock")
            .write(LOCK, BASIC_LOCK_KEY, NOT_AUTHORIZED)
            .build(),
        script("Locked: Try Lock with Long Key", "32-lock")
            .write_any(LOCK, LONG_LOCK_KEY, either)
            .build(),
        unlocking("Unlocking beacon..."),
        script("Try Unlock with Short Key", return_codes)
            .write(UNLOCK, SHORT_LOCK_KEY, BAD_LENGTH)
            .build(),
        script("Try Unlock with Valid Key", "33-unlock")
            .write(UNLOCK, BASIC_LOCK_KEY, OK)
            .build(),
        script("Try Unlock with Long Key", return_codes)
            .write(UNLOCK, LONG_LOCK_KEY, BAD_LENGTH)
            .build(),
        locking("Locking beacon..."),
        script("Locked: Try to Unlock with Short Key", "33-unlock")
            .write(UNLOCK, SHORT_LOCK_KEY, BAD_LENGTH)
            .assert_equals(LOCK_STATE, LOCKED_STATE, OK)
            .build(),
        script("Locked: Try Unlock with Long Key", "33-unlock")
            .write(UNLOCK, LONG_LOCK_KEY, BAD_LENGTH)
            .assert_equals(LOCK_STATE, LOCKED_STATE, OK)
            .build(),
        unlocking("Unlocking..."),
        locking("Locking..."),
        script("Locked: Try Long Data", "32-lock")
            .write_any(URI_DATA, LONG_URI, either)
            .build(),
        script("Locked: Try Short Advertised Tx Power Levels", "32-lock")
            .write_any(ADV_TX_POWER_LEVELS, SHORT_TX_POWER_LEVELS, either)
            .build(),
        script("Locked: Try Valid Advertised Tx Power Levels", "32-lock")
            .write(ADV_TX_POWER_LEVELS, BASIC_TX_POWER_LEVELS, NOT_AUTHORIZED)
            .build(),
        script("Locked: Try Long Advertised Tx Power Levels", "32-lock")
            .write_any(ADV_TX_POWER_LEVELS, LONG_TX_POWER_LEVELS, either)
            .build(),
        script("Locked: Try Short Power Mode", "32-lock")
            .write_any(TX_POWER_MODE, SHORT_POWER_MODE, either)
            .build(),
        script("Locked: Try Valid Power Mode", "32-lock")
            .write(TX_POWER_MODE, BASIC_GENERAL_DATA, NOT_AUTHORIZED)
            .build(),
        script("Locked: Invalid Power Mode", "32-lock")
            .write(TX_POWER_MODE, INVALID_POWER_MODE, NOT_AUTHORIZED)
            .build(),
        script("Locked: Try Long Power Mode", "32-lock")
            .write_any(TX_POWER_MODE, LONG_POWER_MODE, either)
            .build(),
        script("Locked: Try Short Period", "32-lock")
            .write_any(BEACON_PERIOD, SHORT_PERIOD, either)
            .build(),
        script("Locked: Try Valid Period", "32-lock")
            .write(BEACON_PERIOD, BASIC_PERIOD, NOT_AUTHORIZED)
            .build(),
        script("Locked: Try Long Period", "32-lock")
            .write_any(BEACON_PERIOD, LONG_PERIOD, either)
            .build(),
        script("Locked: Try Short Reset", "32-lock")
            .write_any(RESET, SHORT_RESET, either)
            .build(),
        script("Locked: Try Valid Reset", "32-lock")
            .write(RESET, BASIC_GENERAL_DATA, NOT_AUTHORIZED)
            .build(),
        script("Locked: Try Long Reset", "32-lock")
            .write_any(RESET, LONG_RESET, either)
            .build(),
        Script::builder("Unlocking...")
            .write(UNLOCK, BASIC_LOCK_KEY, OK)
            .build(),
    ]
}

/// Look a suite up by a short name: `core` or `spec`.
pub fn by_name(name: &str, optional: bool) -> Option<Vec<Script>> {
    match name {
        "core" => Some(core_url_tests(optional)),
        "spec" => Some(spec_url_tests(optional)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conformance::Action;

    #[test]
    fn test_optional_scripts_are_gated() {
        assert_eq!(core_url_tests(false).len(), 14);
        assert_eq!(core_url_tests(true).len(), 19);
        assert!(spec_url_tests(true).len() > spec_url_tests(false).len());
    }

    #[test]
    fn test_every_script_has_one_terminal() {
        for script in core_url_tests(true).iter().chain(&spec_url_tests(true)) {
            let terminals = script.steps().iter().filter(|a| a.is_terminal()).count();
            assert_eq!(terminals, 1, "{}", script.name());
            assert!(script.steps().last().map_or(false, Action::is_terminal));
        }
    }

    #[test]
    fn test_core_suite_checks_broadcast_after_disconnect() {
        let scripts = core_url_tests(false);
        let disconnect = scripts
            .iter()
            .position(|s| s.name() == "Disconnecting")
            .unwrap();
        assert!(scripts[disconnect + 1..].iter().all(|s| matches!(
            s.steps()[0],
            Action::ObserveAdvertisement { .. }
        )));
    }

    #[test]
    fn test_by_name() {
        assert!(by_name("core", false).is_some());
        assert!(by_name("spec", true).is_some());
        assert!(by_name("tlm", false).is_none());
    }
}
