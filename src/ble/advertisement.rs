//! Advertisement field checks
//!
//! Two layouts are understood. Eddystone frames on `0xFEAA` carry
//! `[frame type, tx power, encoded uri...]`, and only URL frames
//! (`0x10`) are accepted. Any other service is read with the UriBeacon
//! layout `[flags, tx power, encoded uri...]`.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::gatt::EDDYSTONE_SERVICE_UUID;
use super::transport::ScanRecord;

/// Eddystone-URL frame type.
pub const URL_FRAME_TYPE: u8 = 0x10;

/// Smallest service data payload that still holds a header.
pub const MIN_PACKET_LEN: usize = 2;

/// Which part of an advertisement an observation checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdvertisementField {
    Flags,
    TxPower,
    Uri,
    /// Structural check only: the payload must be at least two bytes.
    RawPacket,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdvertisementError {
    #[error("Advertisement does not list service {0}")]
    ServiceNotListed(Uuid),

    #[error("No service data for {0}")]
    MissingServiceData(Uuid),

    #[error("Invalid advertisement packet: {0}")]
    InvalidPacket(String),

    #[error("Advertised {field:?} is {actual}, expected {expected}")]
    Mismatch {
        field: AdvertisementField,
        expected: String,
        actual: String,
    },
}

/// Check one field of `record`'s service data for `service`.
///
/// `expected` is ignored for [`AdvertisementField::RawPacket`]; for the
/// other fields `None` only checks that the field is present.
pub fn check_advertisement(
    record: &ScanRecord,
    service: &Uuid,
    field: AdvertisementField,
    expected: Option<&[u8]>,
) -> Result<(), AdvertisementError> {
    if *service == EDDYSTONE_SERVICE_UUID {
        check_eddystone_url(record, service, field, expected)
    } else {
        check_uri_beacon(record, service, field, expected)
    }
}

fn check_eddystone_url(
    record: &ScanRecord,
    service: &Uuid,
    field: AdvertisementField,
    expected: Option<&[u8]>,
) -> Result<(), AdvertisementError> {
    if !record.advertises(service) {
        return Err(AdvertisementError::ServiceNotListed(*service));
    }
    let frame = record
        .service_data(service)
        .ok_or(AdvertisementError::MissingServiceData(*service))?;
    if frame.first() != Some(&URL_FRAME_TYPE) {
        return Err(AdvertisementError::InvalidPacket(hex::encode(frame)));
    }
    if frame.len() < MIN_PACKET_LEN {
        return Err(AdvertisementError::InvalidPacket(hex::encode(frame)));
    }

    match field {
        // URL frames have no flags byte; a well-formed frame satisfies the check.
        AdvertisementField::Flags | AdvertisementField::RawPacket => Ok(()),
        AdvertisementField::TxPower => compare(field, expected, &frame[1..2]),
        AdvertisementField::Uri => compare(field, expected, &frame[2..]),
    }
}

fn check_uri_beacon(
    record: &ScanRecord,
    service: &Uuid,
    field: AdvertisementField,
    expected: Option<&[u8]>,
) -> Result<(), AdvertisementError> {
    let data = record
        .service_data(service)
        .ok_or(AdvertisementError::MissingServiceData(*service))?;

    let actual = match field {
        AdvertisementField::RawPacket => {
            if data.len() < MIN_PACKET_LEN {
                return Err(AdvertisementError::InvalidPacket(hex::encode(data)));
            }
            return Ok(());
        }
        AdvertisementField::Flags => data.get(0..1),
        AdvertisementField::TxPower => data.get(1..2),
        AdvertisementField::Uri => data.get(2..),
    };
    let actual = actual.ok_or_else(|| AdvertisementError::InvalidPacket(hex::encode(data)))?;
    compare(field, expected, actual)
}

fn compare(
    field: AdvertisementField,
    expected: Option<&[u8]>,
    actual: &[u8],
) -> Result<(), AdvertisementError> {
    match expected {
        Some(expected) if expected != actual => Err(AdvertisementError::Mismatch {
            field,
            expected: hex::encode(expected),
            actual: hex::encode(actual),
        }),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::transport::{BeaconDevice, BleAddress};
    use std::collections::HashMap;

    fn record(service: Uuid, data: Vec<u8>) -> ScanRecord {
        let mut service_data = HashMap::new();
        service_data.insert(service, data);
        ScanRecord {
            device: BeaconDevice::new(BleAddress::Real([1, 2, 3, 4, 5, 6])),
            rssi: Some(-70),
            service_uuids: vec![service],
            service_data,
        }
    }

    #[test]
    fn test_eddystone_url_fields() {
        let adv = record(EDDYSTONE_SERVICE_UUID, vec![URL_FRAME_TYPE, 0xEE, 0x01, 0x02]);
        let svc = EDDYSTONE_SERVICE_UUID;

        check_advertisement(&adv, &svc, AdvertisementField::TxPower, Some(&[0xEE])).unwrap();
        check_advertisement(&adv, &svc, AdvertisementField::Uri, Some(&[0x01, 0x02])).unwrap();
        check_advertisement(&adv, &svc, AdvertisementField::RawPacket, None).unwrap();

        let err = check_advertisement(&adv, &svc, AdvertisementField::Uri, Some(&[0x03]))
            .unwrap_err();
        assert!(matches!(err, AdvertisementError::Mismatch { .. }));
    }

    #[test]
    fn test_eddystone_rejects_non_url_frame() {
        let adv = record(EDDYSTONE_SERVICE_UUID, vec![0x00, 0xEE, 0x01]);
        let err = check_advertisement(
            &adv,
            &EDDYSTONE_SERVICE_UUID,
            AdvertisementField::RawPacket,
            None,
        )
        .unwrap_err();
        assert_eq!(err, AdvertisementError::InvalidPacket("00ee01".into()));
    }

    #[test]
    fn test_eddystone_requires_listed_service() {
        let mut adv = record(EDDYSTONE_SERVICE_UUID, vec![URL_FRAME_TYPE, 0, 1]);
        adv.service_uuids.clear();
        assert_eq!(
            check_advertisement(&adv, &EDDYSTONE_SERVICE_UUID, AdvertisementField::Uri, None),
            Err(AdvertisementError::ServiceNotListed(EDDYSTONE_SERVICE_UUID))
        );
    }

    #[test]
    fn test_uri_beacon_layout() {
        let svc = Uuid::new_v4();
        let adv = record(svc, vec![0x00, 0x20, 0x02, 0x03]);

        check_advertisement(&adv, &svc, AdvertisementField::Flags, Some(&[0x00])).unwrap();
        check_advertisement(&adv, &svc, AdvertisementField::TxPower, Some(&[0x20])).unwrap();
        check_advertisement(&adv, &svc, AdvertisementField::Uri, Some(&[0x02, 0x03])).unwrap();
    }

    #[test]
    fn test_short_raw_packet_is_invalid() {
        let svc = Uuid::new_v4();
        let adv = record(svc, vec![0x00]);
        assert!(matches!(
            check_advertisement(&adv, &svc, AdvertisementField::RawPacket, None),
            Err(AdvertisementError::InvalidPacket(_))
        ));
        assert!(matches!(
            check_advertisement(&adv, &svc, AdvertisementField::TxPower, Some(&[0])),
            Err(AdvertisementError::InvalidPacket(_))
        ));
    }
}
