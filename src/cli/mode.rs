use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Args, Subcommand};
use serde::Serialize;
use tracing::{error, warn};

use super::{parse_u8, parse_u16};
use crate::config::{Config, DaemonConfig, DigitizerConfig};
use crate::digitizer::i2c_payload::{DELTA_OFFSET, PAYLOAD_LEN};
use crate::digitizer::{
    Backend, BackendChoice, DeviceRow, DigitizerMode, DigitizerProtocol, I2cRow, SwitchRequest,
    SysfsHidEnumerator,
};
use crate::hardware_transport::{Hidraw, I2cBus};
use crate::output::{Stamped, print_json};
use crate::policy::{CommandRunner, ExternalCommand, ProcessRunner};

/// Report geometry and I2C target overrides.
#[derive(Debug, Clone, Default, Args)]
pub struct DigitizerArgs {
    /// Feature report id
    #[arg(long, value_parser = parse_u8, value_name = "ID")]
    pub report_id: Option<u8>,
    /// Feature report length (1..=4096)
    #[arg(long, value_name = "LEN")]
    pub report_len: Option<usize>,
    /// Offset of the 6-byte mode field
    #[arg(long, value_name = "OFFSET")]
    pub patch_offset: Option<usize>,
    /// I2C bus number, used as /dev/i2c-<bus>
    #[arg(long, value_name = "N")]
    pub i2c_bus: Option<u32>,
    /// I2C device node (wins over --i2c-bus)
    #[arg(long, value_name = "PATH")]
    pub i2c_dev: Option<PathBuf>,
    /// 7-bit I2C address
    #[arg(long, value_parser = parse_u16, value_name = "ADDR")]
    pub i2c_addr: Option<u16>,
}

impl DigitizerArgs {
    pub fn apply(&self, config: &mut DigitizerConfig) {
        if let Some(id) = self.report_id {
            config.report_id = id;
        }
        if let Some(len) = self.report_len {
            config.report_len = len;
        }
        if let Some(offset) = self.patch_offset {
            config.mode_offset = offset;
        }
        if let Some(bus) = self.i2c_bus {
            config.i2c_dev = PathBuf::from(format!("/dev/i2c-{bus}"));
        }
        if let Some(dev) = &self.i2c_dev {
            config.i2c_dev = dev.clone();
        }
        if let Some(addr) = self.i2c_addr {
            config.i2c_address = addr;
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum ModeCommand {
    /// Print per-device and overall digitizer mode as JSON
    Status(StatusArgs),
    /// Switch the digitizer (hidraw, with I2C fallback)
    Set(SetArgs),
}

#[derive(Debug, Args)]
pub struct StatusArgs {
    #[command(flatten)]
    pub digitizer: DigitizerArgs,
    /// Skip the I2C read-back query
    #[arg(long)]
    pub no_i2c_query: bool,
}

#[derive(Debug, Args)]
pub struct SetArgs {
    /// Target mode
    #[arg(value_enum)]
    pub mode: DigitizerMode,
    /// Control backend
    #[arg(long, value_enum, default_value_t = BackendChoice::Auto)]
    pub digitizer: BackendChoice,
    /// Compute the patch without writing
    #[arg(long)]
    pub dry_run: bool,
    /// Display-geometry command, run through the shell with the mode appended
    #[arg(long, value_name = "CMD")]
    pub display_cmd: Option<String>,
    #[command(flatten)]
    pub hw: DigitizerArgs,
}

#[derive(Serialize)]
struct I2cTarget<'a> {
    dev: &'a PathBuf,
    addr: String,
    payload_len: usize,
    delta_offset: String,
}

#[derive(Serialize)]
struct DisplayResult {
    cmd: String,
    rc: i32,
    ok: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    stderr: String,
}

#[derive(Serialize)]
struct SetReport<'a> {
    mode: DigitizerMode,
    digitizer_backend_requested: BackendChoice,
    digitizer_backend_used: Option<Backend>,
    digitizer_attempted: &'a [Backend],
    already_satisfied: bool,
    report_id: String,
    report_len: usize,
    patch_offset: usize,
    patch_bytes: String,
    i2c: I2cTarget<'a>,
    dry_run: bool,
    results: &'a [DeviceRow],
    #[serde(skip_serializing_if = "Option::is_none")]
    i2c_attempt: Option<&'a I2cRow>,
    failures: &'a [String],
    #[serde(skip_serializing_if = "no_failures")]
    recovered_failures: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    display: Option<DisplayResult>,
}

fn no_failures(failures: &&[String]) -> bool {
    failures.is_empty()
}

fn protocol(config: DigitizerConfig) -> DigitizerProtocol<Hidraw, I2cBus, SysfsHidEnumerator> {
    DigitizerProtocol::new(
        Hidraw::new(config.retry.clone()),
        I2cBus::new(config.retry.clone()).with_force(config.i2c_force),
        SysfsHidEnumerator::new(&config.hidraw_dev_dir, &config.hidraw_class_dir),
        config,
    )
}

pub async fn run(cmd: ModeCommand, mut config: Config) -> Result<ExitCode> {
    match cmd {
        ModeCommand::Status(args) => {
            args.digitizer.apply(&mut config.digitizer);
            config.digitizer.validate()?;
            let status = protocol(config.digitizer).status(!args.no_i2c_query);
            print_json(&Stamped::now(status))?;
            Ok(ExitCode::SUCCESS)
        }
        ModeCommand::Set(args) => set(args, config).await,
    }
}

async fn set(args: SetArgs, mut config: Config) -> Result<ExitCode> {
    args.hw.apply(&mut config.digitizer);
    config.digitizer.validate()?;
    let digitizer = config.digitizer;
    let request = SwitchRequest {
        backend: args.digitizer,
        dry_run: args.dry_run,
    };
    let result = protocol(digitizer.clone()).set_mode(args.mode, request);

    let display = match &args.display_cmd {
        Some(cmd) if !cmd.trim().is_empty() => {
            Some(run_display(cmd, args.mode, args.dry_run, &config.daemon).await)
        }
        _ => None,
    };

    let empty: [String; 0] = [];
    let (used, attempted, already, rows, i2c, failures, recovered) = match &result {
        Ok(outcome) => (
            Some(outcome.backend),
            outcome.attempted.as_slice(),
            outcome.already_satisfied,
            outcome.devices.as_slice(),
            outcome.i2c.as_ref(),
            &empty[..],
            outcome.recovered_failures.as_slice(),
        ),
        Err(err) => (
            None,
            err.attempted.as_slice(),
            false,
            err.devices.as_slice(),
            err.i2c.as_ref(),
            err.failures.as_slice(),
            &empty[..],
        ),
    };
    let display_failed = display.as_ref().is_some_and(|d| !d.ok);

    print_json(&Stamped::now(SetReport {
        mode: args.mode,
        digitizer_backend_requested: args.digitizer,
        digitizer_backend_used: used,
        digitizer_attempted: attempted,
        already_satisfied: already,
        report_id: format!("0x{:02x}", digitizer.report_id),
        report_len: digitizer.report_len,
        patch_offset: digitizer.mode_offset,
        patch_bytes: digitizer.encoding.field_for(args.mode).to_hex(),
        i2c: I2cTarget {
            dev: &digitizer.i2c_dev,
            addr: format!("0x{:02x}", digitizer.i2c_address),
            payload_len: PAYLOAD_LEN,
            delta_offset: format!("0x{DELTA_OFFSET:x}"),
        },
        dry_run: args.dry_run,
        results: rows,
        i2c_attempt: i2c,
        failures,
        recovered_failures: recovered,
        display,
    }))?;

    if display_failed {
        error!("display command failed");
    }
    if let Err(err) = &result {
        error!("{err}");
    }
    if display_failed || result.is_err() {
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

async fn run_display(
    cmd: &str,
    mode: DigitizerMode,
    dry_run: bool,
    daemon: &DaemonConfig,
) -> DisplayResult {
    let command = ExternalCommand::Shell(format!("{cmd} {mode}"));
    if dry_run {
        return DisplayResult {
            cmd: command.to_string(),
            rc: 0,
            ok: true,
            stderr: String::new(),
        };
    }
    let output = ProcessRunner.run(&command, daemon.cmd_timeout()).await;
    if !output.success() {
        warn!(cmd = %command, rc = output.rc, "display command failed");
    }
    DisplayResult {
        cmd: command.to_string(),
        rc: output.rc,
        ok: output.success(),
        stderr: output.stderr.trim().to_string(),
    }
}
