//! GATT service and characteristic identifiers
//!
//! The Eddystone-URL configuration service, the Eddystone advertising
//! service, and the slot-data characteristic used for EID reads.

use uuid::Uuid;

/// Expand a 16-bit Bluetooth SIG assigned number into a full UUID.
pub const fn uuid_from_u16(short: u16) -> Uuid {
    Uuid::from_u128(((short as u128) << 96) | 0x0000_0000_0000_1000_8000_0080_5F9B_34FB)
}

/// Eddystone advertising service (`0xFEAA`).
pub const EDDYSTONE_SERVICE_UUID: Uuid = uuid_from_u16(0xFEAA);

/// Eddystone-URL configuration service.
pub const URL_CONFIG_SERVICE_UUID: Uuid = Uuid::from_u128(0xee0c2080_8786_40ba_ab96_99b91ac981d8);

pub const LOCK_STATE: Uuid = Uuid::from_u128(0xee0c2081_8786_40ba_ab96_99b91ac981d8);
pub const LOCK: Uuid = Uuid::from_u128(0xee0c2082_8786_40ba_ab96_99b91ac981d8);
pub const UNLOCK: Uuid = Uuid::from_u128(0xee0c2083_8786_40ba_ab96_99b91ac981d8);
pub const URI_DATA: Uuid = Uuid::from_u128(0xee0c2084_8786_40ba_ab96_99b91ac981d8);
pub const FLAGS: Uuid = Uuid::from_u128(0xee0c2085_8786_40ba_ab96_99b91ac981d8);
pub const ADV_TX_POWER_LEVELS: Uuid = Uuid::from_u128(0xee0c2086_8786_40ba_ab96_99b91ac981d8);
pub const TX_POWER_MODE: Uuid = Uuid::from_u128(0xee0c2087_8786_40ba_ab96_99b91ac981d8);
pub const BEACON_PERIOD: Uuid = Uuid::from_u128(0xee0c2088_8786_40ba_ab96_99b91ac981d8);
pub const RESET: Uuid = Uuid::from_u128(0xee0c2089_8786_40ba_ab96_99b91ac981d8);

/// Advertisement slot data characteristic of the Eddystone GATT
/// configuration service.
pub const ADV_SLOT_DATA: Uuid = Uuid::from_u128(0xa3c8750a_8ed3_4bdf_8a39_a01bebede295);

const NAMES: [(Uuid, &str); 10] = [
    (LOCK_STATE, "Lock State"),
    (LOCK, "Lock"),
    (UNLOCK, "Unlock"),
    (URI_DATA, "URI Data"),
    (FLAGS, "Flags"),
    (ADV_TX_POWER_LEVELS, "Advertised Tx Power Levels"),
    (TX_POWER_MODE, "Tx Power Mode"),
    (BEACON_PERIOD, "Beacon Period"),
    (RESET, "Reset"),
    (ADV_SLOT_DATA, "ADV Slot Data"),
];

/// Human-readable name for log lines and reports.
pub fn readable_name(characteristic: &Uuid) -> String {
    NAMES
        .iter()
        .find(|(uuid, _)| uuid == characteristic)
        .map(|(_, name)| name.to_string())
        .unwrap_or_else(|| characteristic.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_uuid_expansion() {
        assert_eq!(
            EDDYSTONE_SERVICE_UUID.to_string(),
            "0000feaa-0000-1000-8000-00805f9b34fb"
        );
    }

    #[test]
    fn test_config_characteristics_are_distinct() {
        let all = [
            LOCK_STATE,
            LOCK,
            UNLOCK,
            URI_DATA,
            FLAGS,
            ADV_TX_POWER_LEVELS,
            TX_POWER_MODE,
            BEACON_PERIOD,
            RESET,
        ];
        for (i, a) in all.iter().enumerate() {
            for b in &all[i + 1..] {
                assert_ne!(a, b);
            }
            assert_ne!(*a, URL_CONFIG_SERVICE_UUID);
        }
    }

    #[test]
    fn test_readable_name_falls_back_to_uuid() {
        assert_eq!(readable_name(&LOCK), "Lock");
        let other = Uuid::nil();
        assert_eq!(readable_name(&other), other.to_string());
    }
}
