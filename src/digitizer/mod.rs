pub mod discovery;
pub mod i2c_payload;
pub mod protocol;
pub mod report;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use discovery::{DeviceMatcher, HidEnumerator, HidrawCandidate, SysfsHidEnumerator};
pub use i2c_payload::I2cPayload;
pub use protocol::{
    Backend, BackendChoice, DeviceRow, DeviceStatus, DigitizerProtocol, I2cQueryStatus, I2cRow,
    ModeStatus, ProtocolError, SwitchError, SwitchOutcome, SwitchRequest,
};
pub use report::{DigitizerReport, ModeEncoding, ModeField, ReportError};

/// 数位板工作区域: 半屏 / 全屏
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum DigitizerMode {
    Half,
    Full,
}

impl DigitizerMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Half => "half",
            Self::Full => "full",
        }
    }

    /// Layout wanted for a dock signal: keyboard on the lower half means half mode.
    pub fn for_docked(docked: bool) -> Self {
        if docked { Self::Half } else { Self::Full }
    }
}

impl fmt::Display for DigitizerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mode as read back from hardware; anything that is neither canonical
/// encoding is `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObservedMode {
    Half,
    Full,
    Unknown,
}

impl ObservedMode {
    pub fn is(self, mode: DigitizerMode) -> bool {
        self == Self::from(mode)
    }
}

impl From<DigitizerMode> for ObservedMode {
    fn from(mode: DigitizerMode) -> Self {
        match mode {
            DigitizerMode::Half => Self::Half,
            DigitizerMode::Full => Self::Full,
        }
    }
}

impl fmt::Display for ObservedMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Half => "half",
            Self::Full => "full",
            Self::Unknown => "unknown",
        })
    }
}
