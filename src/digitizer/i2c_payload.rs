//! Vendor I2C wire format, used only when the hidraw path is unusable.
//!
//! A mode switch is a single 1034-byte write to the digitizer's slave
//! address: a fixed 12-byte prefix, the 6-byte mode delta at `0x0c`, zeros
//! elsewhere. The current mode is read back with a 6-byte query followed by
//! a 1029-byte read whose bytes `0x10..0x12` echo the tail of the delta.

use super::report::{MODE_FIELD_LEN, ModeEncoding, ModeField};
use super::ObservedMode;

pub const PAYLOAD_LEN: usize = 1034;
pub const PAYLOAD_PREFIX: [u8; 12] = [
    0x04, 0x00, 0x39, 0x03, 0x05, 0x00, 0x04, 0x04, 0x09, 0x20, 0x00, 0x00,
];
pub const DELTA_OFFSET: usize = 0x0C;

pub const QUERY_WRITE: [u8; 6] = [0x04, 0x00, 0x34, 0x02, 0x05, 0x00];
pub const QUERY_READ_LEN: usize = 1029;
pub const QUERY_TAIL_OFFSET: usize = 0x10;

#[derive(Clone, PartialEq, Eq)]
pub struct I2cPayload(Box<[u8; PAYLOAD_LEN]>);

impl I2cPayload {
    pub fn with_delta(delta: ModeField) -> Self {
        let mut buf = Box::new([0u8; PAYLOAD_LEN]);
        buf[..PAYLOAD_PREFIX.len()].copy_from_slice(&PAYLOAD_PREFIX);
        buf[DELTA_OFFSET..DELTA_OFFSET + MODE_FIELD_LEN].copy_from_slice(&delta.0);
        Self(buf)
    }

    /// All-zero delta, written first in every switch sequence.
    pub fn neutral() -> Self {
        Self::with_delta(ModeField::ZERO)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0[..]
    }

    pub fn delta(&self) -> ModeField {
        let mut field = [0u8; MODE_FIELD_LEN];
        field.copy_from_slice(&self.0[DELTA_OFFSET..DELTA_OFFSET + MODE_FIELD_LEN]);
        ModeField(field)
    }
}

impl std::fmt::Debug for I2cPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "I2cPayload(delta={})", self.delta().to_hex())
    }
}

/// Query response tail; `None` when the response is too short to carry one.
pub fn query_tail(response: &[u8]) -> Option<[u8; 2]> {
    match response.get(QUERY_TAIL_OFFSET..QUERY_TAIL_OFFSET + 2) {
        Some(&[a, b]) => Some([a, b]),
        _ => None,
    }
}

pub fn classify_query(response: &[u8], encoding: &ModeEncoding) -> Option<([u8; 2], ObservedMode)> {
    query_tail(response).map(|tail| (tail, encoding.classify_tail(tail)))
}
