use std::collections::BTreeMap;

use num_enum::TryFromPrimitive;
use serde::{Deserialize, Serialize};

/// EC 命令字节: bit7 = 键盘吸附, 低 7 位 = MODEID
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandByte(pub u8);

impl CommandByte {
    pub fn docked(self) -> bool {
        self.0 & 0x80 != 0
    }

    pub fn mode_id(self) -> u8 {
        self.0 & 0x7F
    }
}

/// Values a dock getter or dock sysfs node may legitimately return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u64)]
pub enum DockBit {
    Undocked = 0,
    Docked = 1,
}

impl From<DockBit> for bool {
    fn from(bit: DockBit) -> Self {
        bit == DockBit::Docked
    }
}

/// 一次轮询得到的吸附状态快照, 构造后不再修改
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DockState {
    docked: Option<bool>,
    mode_id: Option<u8>,
    cmmd_byte: Option<u8>,
    gdst_value: Option<u64>,
    sysfs_value: Option<u64>,
    errors: BTreeMap<String, String>,
}

/// 一次轮询中各信号源的原始读数
#[derive(Debug, Default)]
pub(crate) struct Readings {
    pub gdst: Option<u64>,
    pub cmmd: Option<u8>,
    pub sysfs: Option<u64>,
    pub errors: BTreeMap<String, String>,
}

impl DockState {
    /// Fuses one poll's readings. The dock getter wins over the command byte,
    /// and the sysfs value is consulted only when neither produced a verdict.
    pub(crate) fn fuse(readings: Readings) -> Self {
        let gdst_docked = readings
            .gdst
            .and_then(|v| DockBit::try_from(v).ok())
            .map(bool::from);
        let cmmd = readings.cmmd.map(CommandByte);
        let sysfs_docked = readings
            .sysfs
            .and_then(|v| DockBit::try_from(v).ok())
            .map(bool::from);

        Self {
            docked: gdst_docked
                .or(cmmd.map(CommandByte::docked))
                .or(sysfs_docked),
            mode_id: cmmd.map(CommandByte::mode_id),
            cmmd_byte: readings.cmmd,
            gdst_value: readings.gdst,
            sysfs_value: readings.sysfs,
            errors: readings.errors,
        }
    }

    /// A snapshot carrying only the fused signal, for callers that do not
    /// poll hardware themselves.
    pub fn from_signal(docked: Option<bool>, mode_id: Option<u8>) -> Self {
        Self {
            docked,
            mode_id,
            ..Self::default()
        }
    }

    pub fn docked(&self) -> Option<bool> {
        self.docked
    }

    pub fn mode_id(&self) -> Option<u8> {
        self.mode_id
    }

    pub fn cmmd_byte(&self) -> Option<u8> {
        self.cmmd_byte
    }

    pub fn gdst_value(&self) -> Option<u64> {
        self.gdst_value
    }

    pub fn sysfs_value(&self) -> Option<u64> {
        self.sysfs_value
    }

    pub fn errors(&self) -> &BTreeMap<String, String> {
        &self.errors
    }

    /// Same `docked`/`mode_id` pair; raw values and errors are ignored.
    pub fn same_signal(&self, other: &Self) -> bool {
        self.docked == other.docked && self.mode_id == other.mode_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_byte_bits_for_every_value() {
        for b in 0..=u8::MAX {
            let byte = CommandByte(b);
            assert_eq!(byte.docked(), b >> 7 == 1);
            assert_eq!(byte.mode_id(), b & 0x7F);
        }
    }

    #[test]
    fn ec_byte_0x81_is_docked_mode_1() {
        let state = DockState::fuse(Readings {
            cmmd: Some(0x81),
            ..Readings::default()
        });
        assert_eq!(state.docked(), Some(true));
        assert_eq!(state.mode_id(), Some(1));
    }

    #[test]
    fn dock_getter_overrides_command_byte() {
        let state = DockState::fuse(Readings {
            gdst: Some(0),
            cmmd: Some(0x81),
            ..Readings::default()
        });
        assert_eq!(state.docked(), Some(false));
        assert_eq!(state.mode_id(), Some(1));
    }

    #[test]
    fn out_of_range_getter_falls_back_to_command_byte() {
        let state = DockState::fuse(Readings {
            gdst: Some(7),
            cmmd: Some(0x02),
            ..Readings::default()
        });
        assert_eq!(state.docked(), Some(false));
    }

    #[test]
    fn sysfs_only_used_without_better_source() {
        let state = DockState::fuse(Readings {
            cmmd: Some(0x80),
            sysfs: Some(0),
            ..Readings::default()
        });
        assert_eq!(state.docked(), Some(true));

        let state = DockState::fuse(Readings {
            sysfs: Some(1),
            ..Readings::default()
        });
        assert_eq!(state.docked(), Some(true));
        assert_eq!(state.mode_id(), None);
    }

    #[test]
    fn nothing_readable_is_unknown() {
        let state = DockState::fuse(Readings::default());
        assert_eq!(state.docked(), None);
    }

    #[test]
    fn serializes_with_raw_fields() {
        let state = DockState::fuse(Readings {
            cmmd: Some(0x81),
            ..Readings::default()
        });
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["docked"], true);
        assert_eq!(json["mode_id"], 1);
        assert_eq!(json["cmmd_byte"], 0x81);
        assert!(json["gdst_value"].is_null());
    }
}
