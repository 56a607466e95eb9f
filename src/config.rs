use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail, ensure};
use serde::{Deserialize, Serialize};

use crate::digitizer::{BackendChoice, DeviceMatcher, DigitizerMode, ModeEncoding, report};
use crate::dock_state::SourcePriority;
use crate::hardware_transport::RetryPolicy;

/// 没有指定 `--config` 时, 如果这个文件存在就读取它
pub const DEFAULT_CONFIG_PATH: &str = "/etc/halfblankd.toml";

pub const MAX_REPORT_LEN: usize = 4096;

/// 确认底座切换期间的最短轮询间隔
pub const MIN_DEBOUNCE_POLL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub dock: DockConfig,
    pub digitizer: DigitizerConfig,
    pub daemon: DaemonConfig,
}

impl Config {
    /// Reads `path`, or the default location when it exists, or falls back
    /// to built-in defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => {
                let default = PathBuf::from(DEFAULT_CONFIG_PATH);
                if !default.exists() {
                    return Ok(Self::default());
                }
                default
            }
        };
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config = Self::parse(&text)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(config)
    }

    pub fn parse(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.digitizer.validate()?;
        self.daemon.validate()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DockConfig {
    pub backend: SourcePriority,
    pub acpi_call: PathBuf,
    pub gdst_expression: String,
    pub cmmd_expression: String,
    pub ec_io: PathBuf,
    pub ec_offset: u16,
    /// Generic platform dock; may not track the keyboard magnet at all.
    pub dock_sysfs: PathBuf,
}

impl Default for DockConfig {
    fn default() -> Self {
        Self {
            backend: SourcePriority::Auto,
            acpi_call: PathBuf::from("/proc/acpi/call"),
            gdst_expression: r"\_SB.DEVD.GDST".into(),
            cmmd_expression: r"\_SB.PC00.LPCB.EC.CMMD".into(),
            ec_io: PathBuf::from("/sys/kernel/debug/ec/ec0/io"),
            ec_offset: 0xC1,
            dock_sysfs: PathBuf::from("/sys/devices/platform/dock.0/docked"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DigitizerConfig {
    pub report_id: u8,
    pub report_len: usize,
    pub mode_offset: usize,
    pub encoding: ModeEncoding,
    pub vendor_id: u16,
    pub product_id: u16,
    pub name_patterns: Vec<String>,
    pub hidraw_dev_dir: PathBuf,
    pub hidraw_class_dir: PathBuf,
    pub i2c_dev: PathBuf,
    pub i2c_address: u16,
    /// Use `I2C_SLAVE_FORCE`; the vendor driver usually owns the address.
    pub i2c_force: bool,
    pub retry: RetryPolicy,
}

impl Default for DigitizerConfig {
    fn default() -> Self {
        Self {
            report_id: 0x03,
            report_len: 256,
            mode_offset: 10,
            encoding: ModeEncoding::default(),
            vendor_id: 0x056A,
            product_id: 0x52BA,
            name_patterns: vec!["WACF2200".into(), "Wacom".into()],
            hidraw_dev_dir: PathBuf::from("/dev"),
            hidraw_class_dir: PathBuf::from("/sys/class/hidraw"),
            i2c_dev: PathBuf::from("/dev/i2c-1"),
            i2c_address: 0x0A,
            i2c_force: true,
            retry: RetryPolicy::default(),
        }
    }
}

impl DigitizerConfig {
    pub fn matcher(&self) -> DeviceMatcher {
        DeviceMatcher {
            vendor_id: self.vendor_id,
            product_id: self.product_id,
            name_patterns: self.name_patterns.clone(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            (1..=MAX_REPORT_LEN).contains(&self.report_len),
            "report_len must be within 1..={MAX_REPORT_LEN}, got {}",
            self.report_len
        );
        ensure!(
            self.mode_offset + report::MODE_FIELD_LEN <= self.report_len,
            "mode_offset {} leaves no room for the {}-byte mode field in a {}-byte report",
            self.mode_offset,
            report::MODE_FIELD_LEN,
            self.report_len
        );
        ensure!(
            self.i2c_address <= 0x7F,
            "i2c_address must be a 7-bit address, got {:#x}",
            self.i2c_address
        );
        ensure!(self.retry.max_attempts >= 1, "retry.max_attempts must be at least 1");
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DaemonConfig {
    pub interval_s: f64,
    /// Stability required before accepting a transition into docked.
    pub debounce_on_s: f64,
    /// Stability required before accepting a transition into undocked.
    pub debounce_off_s: f64,
    pub debounce_poll_s: f64,
    /// 0 disables periodic enforcement.
    pub enforce_every_s: f64,
    pub cmd_timeout_s: f64,
    pub apply_initial: bool,
    pub state_file: PathBuf,
    pub require_x1fold: bool,
    pub dry_run: bool,
    pub digitizer: BackendChoice,
    pub digitizer_mode_in_half: DigitizerMode,
    pub digitizer_mode_in_full: DigitizerMode,
    /// Display-geometry command forwarded to `mode set --display-cmd`.
    pub display_cmd: Option<String>,
    pub half_cmd: Option<String>,
    pub full_cmd: Option<String>,
    pub status_cmd: Option<String>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            interval_s: 0.2,
            debounce_on_s: 0.0,
            debounce_off_s: 0.0,
            debounce_poll_s: 0.2,
            enforce_every_s: 1.0,
            cmd_timeout_s: 8.0,
            apply_initial: false,
            state_file: PathBuf::from("/run/x1fold-halfblank/state.json"),
            require_x1fold: false,
            dry_run: false,
            digitizer: BackendChoice::Auto,
            digitizer_mode_in_half: DigitizerMode::Half,
            digitizer_mode_in_full: DigitizerMode::Full,
            display_cmd: None,
            half_cmd: None,
            full_cmd: None,
            status_cmd: None,
        }
    }
}

impl DaemonConfig {
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("interval_s", self.interval_s),
            ("debounce_on_s", self.debounce_on_s),
            ("debounce_off_s", self.debounce_off_s),
            ("debounce_poll_s", self.debounce_poll_s),
            ("enforce_every_s", self.enforce_every_s),
            ("cmd_timeout_s", self.cmd_timeout_s),
        ] {
            ensure!(
                Duration::try_from_secs_f64(value).is_ok(),
                "{name} must be a non-negative number of seconds, got {value}"
            );
        }
        ensure!(!self.interval().is_zero(), "interval_s must be positive");
        Ok(())
    }

    /// Digitizer overrides are rejected when a display command is configured.
    pub fn check_mode_overrides(&self) -> Result<()> {
        let overridden = self.digitizer_mode_in_half != DigitizerMode::Half
            || self.digitizer_mode_in_full != DigitizerMode::Full;
        if overridden && self.display_cmd.is_some() {
            bail!(
                "digitizer_mode_in_half/full overrides are only supported without a display command"
            );
        }
        Ok(())
    }

    pub fn digitizer_mode_for(&self, desired: DigitizerMode) -> DigitizerMode {
        match desired {
            DigitizerMode::Half => self.digitizer_mode_in_half,
            DigitizerMode::Full => self.digitizer_mode_in_full,
        }
    }

    pub fn interval(&self) -> Duration {
        secs(self.interval_s)
    }

    pub fn debounce_for(&self, docked: bool) -> Duration {
        secs(if docked {
            self.debounce_on_s
        } else {
            self.debounce_off_s
        })
    }

    /// Falls back to the main interval when unset, never below 50ms.
    pub fn debounce_poll(&self) -> Duration {
        let poll = if self.debounce_poll_s > 0.0 {
            secs(self.debounce_poll_s)
        } else {
            self.interval()
        };
        poll.max(MIN_DEBOUNCE_POLL)
    }

    pub fn enforce_every(&self) -> Option<Duration> {
        (self.enforce_every_s > 0.0).then(|| secs(self.enforce_every_s))
    }

    pub fn cmd_timeout(&self) -> Duration {
        secs(self.cmd_timeout_s)
    }
}

fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_hardware() {
        let config = Config::default();
        assert_eq!(config.dock.ec_offset, 0xC1);
        assert_eq!(config.digitizer.report_len, 256);
        assert_eq!(config.digitizer.i2c_address, 0x0A);
        assert_eq!(config.daemon.interval(), Duration::from_millis(200));
        assert_eq!(config.daemon.enforce_every(), Some(Duration::from_secs(1)));
        assert_eq!(config.daemon.cmd_timeout(), Duration::from_secs(8));
        config.validate().unwrap();
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let config = Config::parse(
            r#"
            [dock]
            backend = "ec_sys"
            ec_offset = 0xC2

            [digitizer]
            report_len = 64
            encoding = { half = "01 02 03 04 05 06", full = "000000000000" }
            retry = { max_attempts = 5, backoff_ms = 10 }

            [daemon]
            debounce_on_s = 2.0
            enforce_every_s = 0
            "#,
        )
        .unwrap();
        assert_eq!(config.dock.backend, SourcePriority::EcSys);
        assert_eq!(config.dock.ec_offset, 0xC2);
        assert_eq!(config.dock.acpi_call, PathBuf::from("/proc/acpi/call"));
        assert_eq!(config.digitizer.encoding.half.0, [1, 2, 3, 4, 5, 6]);
        assert_eq!(config.digitizer.retry.max_attempts, 5);
        assert_eq!(config.daemon.debounce_for(true), Duration::from_secs(2));
        assert_eq!(config.daemon.debounce_for(false), Duration::ZERO);
        assert_eq!(config.daemon.enforce_every(), None);
    }

    #[test]
    fn rejects_bad_report_geometry() {
        assert!(Config::parse("[digitizer]\nreport_len = 0").is_err());
        assert!(Config::parse("[digitizer]\nreport_len = 4097").is_err());
        assert!(Config::parse("[digitizer]\nreport_len = 12\nmode_offset = 10").is_err());
        assert!(Config::parse("[digitizer]\nreport_len = 16\nmode_offset = 10").is_ok());
        assert!(Config::parse("[digitizer]\ni2c_address = 0x80").is_err());
    }

    #[test]
    fn rejects_unknown_keys_and_negative_durations() {
        assert!(Config::parse("[dock]\nnope = 1").is_err());
        assert!(Config::parse("[daemon]\ninterval_s = -1.0").is_err());
        assert!(Config::parse("[daemon]\ninterval_s = 0.0").is_err());
        // 超出 Duration 范围的值不能悄悄变成 0
        assert!(Config::parse("[daemon]\ninterval_s = 1e20").is_err());
        assert!(Config::parse("[daemon]\ninterval_s = 1e-12").is_err());
        assert!(Config::parse("[daemon]\ncmd_timeout_s = 1e20").is_err());
        assert!(Config::parse("[daemon]\nenforce_every_s = inf").is_err());
    }

    #[test]
    fn debounce_poll_has_a_floor() {
        let mut daemon = DaemonConfig {
            debounce_poll_s: 0.01,
            ..DaemonConfig::default()
        };
        assert_eq!(daemon.debounce_poll(), MIN_DEBOUNCE_POLL);
        daemon.debounce_poll_s = 0.0;
        assert_eq!(daemon.debounce_poll(), daemon.interval());
    }

    #[test]
    fn mode_overrides_need_no_display_command() {
        let mut daemon = DaemonConfig {
            digitizer_mode_in_half: DigitizerMode::Full,
            ..DaemonConfig::default()
        };
        daemon.check_mode_overrides().unwrap();
        assert_eq!(daemon.digitizer_mode_for(DigitizerMode::Half), DigitizerMode::Full);
        daemon.display_cmd = Some("swaymsg output eDP-1 transform normal".into());
        assert!(daemon.check_mode_overrides().is_err());
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Config::load(Some(&dir.path().join("absent.toml"))).is_err());
        let path = dir.path().join("halfblankd.toml");
        std::fs::write(&path, "[daemon]\napply_initial = true\n").unwrap();
        assert!(Config::load(Some(&path)).unwrap().daemon.apply_initial);
    }
}
