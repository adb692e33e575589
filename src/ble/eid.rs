//! EID slot data readiness
//!
//! Some beacons are slow to compute their ephemeral identifier. Instead of
//! blocking the read they return a zeroed EID or a short payload, so reads
//! of an EID slot are polled until the value looks computed.

use thiserror::Error;

/// Frame type byte of an EID slot.
pub const EID_FRAME_TYPE: u8 = 0x30;

/// Frame type, exponent, 4-byte clock and 8-byte EID.
pub const EID_SLOT_DATA_LEN: usize = 14;

const EID_OFFSET: usize = 6;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EidError {
    #[error("EID slot data must be {EID_SLOT_DATA_LEN} bytes, got {0}")]
    InvalidLength(usize),

    #[error("Expected frame type 0x30, got {0:#04x}")]
    InvalidFrameType(u8),
}

/// Parsed slot data of an EID slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EidSlotData {
    pub exponent: u8,
    /// Beacon time counter, big-endian on the wire.
    pub clock: u32,
    pub eid: [u8; 8],
}

impl EidSlotData {
    pub fn parse(data: &[u8]) -> Result<Self, EidError> {
        if data.len() != EID_SLOT_DATA_LEN {
            return Err(EidError::InvalidLength(data.len()));
        }
        if data[0] != EID_FRAME_TYPE {
            return Err(EidError::InvalidFrameType(data[0]));
        }
        let mut eid = [0u8; 8];
        eid.copy_from_slice(&data[EID_OFFSET..]);
        Ok(Self {
            exponent: data[1],
            clock: u32::from_be_bytes([data[2], data[3], data[4], data[5]]),
            eid,
        })
    }
}

/// True once the slot holds a full-length, non-zero EID.
pub fn is_ready(data: &[u8]) -> bool {
    EidSlotData::parse(data).map_or(false, |slot| slot.eid != [0; 8])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(eid: [u8; 8]) -> Vec<u8> {
        let mut data = vec![EID_FRAME_TYPE, 10, 0x00, 0x01, 0x02, 0x03];
        data.extend_from_slice(&eid);
        data
    }

    #[test]
    fn test_parse_reads_big_endian_clock() {
        let parsed = EidSlotData::parse(&slot([1, 2, 3, 4, 5, 6, 7, 8])).unwrap();
        assert_eq!(parsed.exponent, 10);
        assert_eq!(parsed.clock, 0x0001_0203);
        assert_eq!(parsed.eid, [1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn test_parse_rejects_wrong_frame_type() {
        let mut data = slot([1; 8]);
        data[0] = 0x10;
        assert_eq!(
            EidSlotData::parse(&data),
            Err(EidError::InvalidFrameType(0x10))
        );
    }

    #[test]
    fn test_zeroed_or_short_slot_is_not_ready() {
        assert!(!is_ready(&slot([0; 8])));
        assert!(!is_ready(&[EID_FRAME_TYPE, 10, 0, 0]));
        assert!(is_ready(&slot([0, 0, 0, 0, 0, 0, 0, 1])));
    }

    #[test]
    fn test_other_frame_type_is_not_ready() {
        let mut data = slot([1; 8]);
        data[0] = 0x10;
        assert!(!is_ready(&data));
    }
}
