use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use thiserror::Error;

use super::{DigitizerMode, ObservedMode};

pub const MODE_FIELD_LEN: usize = 6;

/// 6-byte mode field carried inside the digitizer's feature report.
///
/// Serialized as a hex string (`"9c182c28331a"`) in config files.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ModeField(pub [u8; MODE_FIELD_LEN]);

impl ModeField {
    pub const ZERO: Self = Self([0; MODE_FIELD_LEN]);

    pub fn to_hex(self) -> String {
        self.0
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Last two bytes, which the I2C read-back query echoes.
    pub fn tail(self) -> [u8; 2] {
        [self.0[MODE_FIELD_LEN - 2], self.0[MODE_FIELD_LEN - 1]]
    }

    pub fn tail_hex(tail: [u8; 2]) -> String {
        format!("{:02x} {:02x}", tail[0], tail[1])
    }
}

impl fmt::Debug for ModeField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ModeField({})", self.to_hex())
    }
}

impl Serialize for ModeField {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(self.0))
    }
}

impl<'de> Deserialize<'de> for ModeField {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        let compact: String = text.split_whitespace().collect();
        let bytes = hex::decode(&compact).map_err(serde::de::Error::custom)?;
        let field: [u8; MODE_FIELD_LEN] = bytes.try_into().map_err(|bytes: Vec<u8>| {
            serde::de::Error::custom(format!(
                "mode field needs {MODE_FIELD_LEN} bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self(field))
    }
}

/// The two canonical mode-field values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeEncoding {
    pub half: ModeField,
    pub full: ModeField,
}

impl Default for ModeEncoding {
    fn default() -> Self {
        Self {
            half: ModeField([0x9c, 0x18, 0x2c, 0x28, 0x33, 0x1a]),
            full: ModeField::ZERO,
        }
    }
}

impl ModeEncoding {
    pub fn field_for(&self, mode: DigitizerMode) -> ModeField {
        match mode {
            DigitizerMode::Half => self.half,
            DigitizerMode::Full => self.full,
        }
    }

    pub fn classify(&self, field: ModeField) -> ObservedMode {
        if field == self.half {
            ObservedMode::Half
        } else if field == self.full {
            ObservedMode::Full
        } else {
            ObservedMode::Unknown
        }
    }

    pub fn classify_tail(&self, tail: [u8; 2]) -> ObservedMode {
        if tail == self.half.tail() {
            ObservedMode::Half
        } else if tail == self.full.tail() {
            ObservedMode::Full
        } else {
            ObservedMode::Unknown
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReportError {
    #[error("mode field at offset {offset} does not fit a {len}-byte report")]
    FieldOutOfRange { offset: usize, len: usize },
}

/// 数位板 feature report, 只改动 mode 字段, 其余字节原样保留
#[derive(Clone, PartialEq, Eq)]
pub struct DigitizerReport {
    bytes: Vec<u8>,
    field_offset: usize,
}

impl DigitizerReport {
    pub fn new(bytes: Vec<u8>, field_offset: usize) -> Result<Self, ReportError> {
        if field_offset
            .checked_add(MODE_FIELD_LEN)
            .is_none_or(|end| end > bytes.len())
        {
            return Err(ReportError::FieldOutOfRange {
                offset: field_offset,
                len: bytes.len(),
            });
        }
        Ok(Self {
            bytes,
            field_offset,
        })
    }

    pub fn report_id(&self) -> Option<u8> {
        self.bytes.first().copied()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn mode_field(&self) -> ModeField {
        let mut field = [0u8; MODE_FIELD_LEN];
        field.copy_from_slice(&self.bytes[self.field_offset..self.field_offset + MODE_FIELD_LEN]);
        ModeField(field)
    }

    pub fn mode(&self, encoding: &ModeEncoding) -> ObservedMode {
        encoding.classify(self.mode_field())
    }

    pub fn with_mode_field(&self, field: ModeField) -> Self {
        let mut bytes = self.bytes.clone();
        bytes[self.field_offset..self.field_offset + MODE_FIELD_LEN].copy_from_slice(&field.0);
        Self {
            bytes,
            field_offset: self.field_offset,
        }
    }

    pub fn sha256_hex(&self) -> String {
        hex::encode(Sha256::digest(&self.bytes))
    }
}

impl fmt::Debug for DigitizerReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DigitizerReport")
            .field("len", &self.bytes.len())
            .field("report_id", &self.report_id())
            .field("mode_field", &self.mode_field())
            .finish()
    }
}
