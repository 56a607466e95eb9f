use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::state::{DockState, Readings};
use crate::config::DockConfig;
use crate::hardware_transport::{PlatformIo, TransportError, parse_int};

/// Which hardware sources a read may consult.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum SourcePriority {
    /// ACPI getter, then the command byte (ACPI, then EC registers), then sysfs.
    #[default]
    Auto,
    /// ACPI evaluator only, plus the sysfs fallback.
    #[value(name = "acpi_call")]
    AcpiCall,
    /// EC register space only, plus the sysfs fallback.
    #[value(name = "ec_sys")]
    EcSys,
}

impl SourcePriority {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::AcpiCall => "acpi_call",
            Self::EcSys => "ec_sys",
        }
    }

    fn uses_acpi(self) -> bool {
        matches!(self, Self::Auto | Self::AcpiCall)
    }

    fn uses_ec(self) -> bool {
        matches!(self, Self::Auto | Self::EcSys)
    }
}

/// Parses the evaluator's reply: `0x..` or decimal, anything else (including
/// `Error: ...` and `AE_*` status strings) is rejected.
pub fn parse_acpi_int(output: &str) -> Option<u64> {
    let text = output.trim();
    if text.starts_with("Error:") || text.contains("AE_") {
        return None;
    }
    parse_int(text)
}

pub struct DockStateReader<P> {
    io: P,
    config: DockConfig,
}

impl<P: PlatformIo> DockStateReader<P> {
    pub fn new(io: P, config: DockConfig) -> Self {
        Self { io, config }
    }

    pub fn config(&self) -> &DockConfig {
        &self.config
    }

    /// 按优先级读取各个信号源, 单个源失败只记录错误, 不中断本次读取
    pub fn read(&self, sources: SourcePriority) -> DockState {
        let mut readings = Readings::default();
        let mut acpi_missing = false;

        if sources.uses_acpi() {
            match self.evaluate_int(&self.config.gdst_expression) {
                Ok(value) => {
                    if !matches!(value, 0 | 1) {
                        readings.errors.insert(
                            "gdst".into(),
                            format!("unexpected dock getter value {value:#x}"),
                        );
                    }
                    readings.gdst = Some(value);
                }
                Err(AcpiFailure::Unavailable(msg)) => {
                    readings.errors.insert("acpi_call".into(), msg);
                    acpi_missing = true;
                }
                Err(AcpiFailure::Failed(msg)) => {
                    readings.errors.insert("gdst".into(), msg);
                }
            }

            if !acpi_missing {
                match self.evaluate_int(&self.config.cmmd_expression) {
                    Ok(value) => match u8::try_from(value) {
                        Ok(byte) => readings.cmmd = Some(byte),
                        Err(_) => {
                            readings.errors.insert(
                                "cmmd".into(),
                                format!("command byte out of range: {value:#x}"),
                            );
                        }
                    },
                    Err(AcpiFailure::Unavailable(msg) | AcpiFailure::Failed(msg)) => {
                        readings.errors.insert("cmmd".into(), msg);
                    }
                }
            }
        }

        let getter_decided = matches!(readings.gdst, Some(0 | 1));
        if readings.cmmd.is_none() && sources.uses_ec() && !getter_decided {
            match self.io.read_ec_byte(self.config.ec_offset) {
                Ok(byte) => readings.cmmd = Some(byte),
                Err(err) => {
                    readings.errors.insert("ec_sys".into(), err.to_string());
                }
            }
        }

        // 低可信度兜底: 通用 dock 设备未必跟踪键盘磁吸
        if !getter_decided && readings.cmmd.is_none() {
            self.read_sysfs_fallback(&mut readings.errors, &mut readings.sysfs);
        }

        let state = DockState::fuse(readings);
        debug!(
            docked = ?state.docked(),
            mode_id = ?state.mode_id(),
            errors = state.errors().len(),
            "dock state read"
        );
        state
    }

    fn read_sysfs_fallback(&self, errors: &mut BTreeMap<String, String>, out: &mut Option<u64>) {
        match self.io.read_sysfs_int(&self.config.dock_sysfs) {
            Ok(value @ (0 | 1)) => *out = Some(value),
            Ok(value) => {
                errors.insert(
                    "dock_sysfs".into(),
                    format!("invalid dock sysfs value: {value}"),
                );
            }
            Err(err) => {
                errors.insert("dock_sysfs".into(), err.to_string());
            }
        }
    }

    fn evaluate_int(&self, expression: &str) -> Result<u64, AcpiFailure> {
        let output = self.io.evaluate_acpi(expression).map_err(|err| match err {
            TransportError::MissingModule { .. } => AcpiFailure::Unavailable(err.to_string()),
            other => AcpiFailure::Failed(other.to_string()),
        })?;
        // 原样保留求值器的回复, 方便排查
        parse_acpi_int(&output).ok_or(AcpiFailure::Failed(output))
    }
}

enum AcpiFailure {
    Unavailable(String),
    Failed(String),
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::collections::HashMap;
    use std::path::{Path, PathBuf};

    use super::*;

    #[derive(Default)]
    struct FakePlatform {
        acpi: Option<HashMap<String, String>>,
        ec: HashMap<u16, u8>,
        sysfs: HashMap<PathBuf, u64>,
        ec_reads: Cell<u32>,
    }

    impl FakePlatform {
        fn with_acpi(mut self, expr: &str, reply: &str) -> Self {
            self.acpi
                .get_or_insert_with(HashMap::new)
                .insert(expr.to_string(), reply.to_string());
            self
        }

        fn with_ec(mut self, offset: u16, byte: u8) -> Self {
            self.ec.insert(offset, byte);
            self
        }

        fn with_sysfs(mut self, path: &Path, value: u64) -> Self {
            self.sysfs.insert(path.to_path_buf(), value);
            self
        }
    }

    impl PlatformIo for FakePlatform {
        fn evaluate_acpi(&self, expression: &str) -> Result<String, TransportError> {
            let Some(table) = &self.acpi else {
                return Err(TransportError::MissingModule {
                    path: PathBuf::from("/proc/acpi/call"),
                    module: "acpi_call",
                });
            };
            Ok(table
                .get(expression)
                .cloned()
                .unwrap_or_else(|| "Error: AE_NOT_FOUND".to_string()))
        }

        fn read_ec_byte(&self, offset: u16) -> Result<u8, TransportError> {
            self.ec_reads.set(self.ec_reads.get() + 1);
            self.ec
                .get(&offset)
                .copied()
                .ok_or(TransportError::MissingDebugfs {
                    path: PathBuf::from("/sys/kernel/debug/ec/ec0/io"),
                })
        }

        fn read_sysfs_int(&self, path: &Path) -> Result<u64, TransportError> {
            self.sysfs
                .get(path)
                .copied()
                .ok_or_else(|| TransportError::MissingNode {
                    path: path.to_path_buf(),
                })
        }
    }

    fn reader(platform: FakePlatform) -> DockStateReader<FakePlatform> {
        DockStateReader::new(platform, DockConfig::default())
    }

    #[test]
    fn acpi_getter_short_circuits_ec_read() {
        let cfg = DockConfig::default();
        let r = reader(
            FakePlatform::default()
                .with_acpi(&cfg.gdst_expression, "0x0")
                .with_ec(cfg.ec_offset, 0x81),
        );
        let state = r.read(SourcePriority::Auto);
        assert_eq!(state.docked(), Some(false));
        assert_eq!(r.io.ec_reads.get(), 0);
        assert_eq!(state.cmmd_byte(), None);
    }

    #[test]
    fn falls_back_to_ec_when_acpi_missing() {
        let cfg = DockConfig::default();
        let r = reader(FakePlatform::default().with_ec(cfg.ec_offset, 0x81));
        let state = r.read(SourcePriority::Auto);
        assert_eq!(state.docked(), Some(true));
        assert_eq!(state.mode_id(), Some(1));
        assert!(state.errors().contains_key("acpi_call"));
        assert!(!state.errors().contains_key("cmmd"));
    }

    #[test]
    fn acpi_command_byte_used_when_getter_fails() {
        let cfg = DockConfig::default();
        let r = reader(
            FakePlatform::default()
                .with_acpi(&cfg.gdst_expression, "Error: AE_NOT_FOUND")
                .with_acpi(&cfg.cmmd_expression, "0x83"),
        );
        let state = r.read(SourcePriority::Auto);
        assert_eq!(state.docked(), Some(true));
        assert_eq!(state.mode_id(), Some(3));
        assert_eq!(state.errors()["gdst"], "Error: AE_NOT_FOUND");
        assert_eq!(r.io.ec_reads.get(), 0);
    }

    #[test]
    fn sysfs_is_last_resort() {
        let cfg = DockConfig::default();
        let r = reader(FakePlatform::default().with_sysfs(&cfg.dock_sysfs, 1));
        let state = r.read(SourcePriority::Auto);
        assert_eq!(state.docked(), Some(true));
        assert_eq!(state.sysfs_value(), Some(1));
        assert!(state.errors().contains_key("ec_sys"));
    }

    #[test]
    fn every_source_failing_is_unknown_with_errors() {
        let r = reader(FakePlatform::default());
        let state = r.read(SourcePriority::Auto);
        assert_eq!(state.docked(), None);
        for key in ["acpi_call", "ec_sys", "dock_sysfs"] {
            assert!(state.errors().contains_key(key), "missing {key}");
        }
    }

    #[test]
    fn invalid_sysfs_value_is_recorded() {
        let cfg = DockConfig::default();
        let r = reader(FakePlatform::default().with_sysfs(&cfg.dock_sysfs, 5));
        let state = r.read(SourcePriority::EcSys);
        assert_eq!(state.docked(), None);
        assert_eq!(state.errors()["dock_sysfs"], "invalid dock sysfs value: 5");
    }

    #[test]
    fn ec_sys_priority_skips_acpi() {
        let cfg = DockConfig::default();
        let r = reader(
            FakePlatform::default()
                .with_acpi(&cfg.gdst_expression, "0x1")
                .with_ec(cfg.ec_offset, 0x00),
        );
        let state = r.read(SourcePriority::EcSys);
        assert_eq!(state.docked(), Some(false));
        assert_eq!(state.gdst_value(), None);
    }

    #[test]
    fn acpi_call_priority_never_touches_ec() {
        let cfg = DockConfig::default();
        let r = reader(
            FakePlatform::default()
                .with_acpi(&cfg.gdst_expression, "garbage")
                .with_ec(cfg.ec_offset, 0x81),
        );
        let state = r.read(SourcePriority::AcpiCall);
        assert_eq!(state.docked(), None);
        assert_eq!(r.io.ec_reads.get(), 0);
    }

    #[test]
    fn acpi_reply_parsing() {
        assert_eq!(parse_acpi_int("0x1"), Some(1));
        assert_eq!(parse_acpi_int("128"), Some(128));
        assert_eq!(parse_acpi_int("Error: AE_NOT_FOUND"), None);
        assert_eq!(parse_acpi_int("0xAE_"), None);
        assert_eq!(parse_acpi_int(""), None);
    }
}
