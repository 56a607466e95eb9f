use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use serde::Serialize;

use super::parse_u16;
use crate::config::{Config, DockConfig};
use crate::dock_state::{ChangeFilter, DockState, DockStateReader, SourcePriority, WatchEvent};
use crate::hardware_transport::LinuxPlatform;
use crate::output::{Stamped, print_json};

/// Hardware path overrides shared by `dock` and `daemon`.
#[derive(Debug, Clone, Default, Args)]
pub struct DockArgs {
    /// Which sources to consult
    #[arg(long, value_enum)]
    pub backend: Option<SourcePriority>,
    /// ACPI evaluator node
    #[arg(long, value_name = "PATH")]
    pub acpi_call: Option<PathBuf>,
    /// ACPI method returning the dock bit
    #[arg(long, value_name = "EXPR")]
    pub gdst: Option<String>,
    /// ACPI field holding the raw command byte
    #[arg(long, value_name = "EXPR")]
    pub cmmd: Option<String>,
    /// ec_sys register file
    #[arg(long, value_name = "PATH")]
    pub ec_io: Option<PathBuf>,
    /// Register offset of the command byte
    #[arg(long, value_parser = parse_u16, value_name = "OFFSET")]
    pub ec_offset: Option<u16>,
    /// Generic platform dock file (low confidence)
    #[arg(long, value_name = "PATH")]
    pub dock_sysfs: Option<PathBuf>,
}

impl DockArgs {
    pub fn apply(&self, config: &mut DockConfig) {
        if let Some(backend) = self.backend {
            config.backend = backend;
        }
        if let Some(path) = &self.acpi_call {
            config.acpi_call = path.clone();
        }
        if let Some(expr) = &self.gdst {
            config.gdst_expression = expr.clone();
        }
        if let Some(expr) = &self.cmmd {
            config.cmmd_expression = expr.clone();
        }
        if let Some(path) = &self.ec_io {
            config.ec_io = path.clone();
        }
        if let Some(offset) = self.ec_offset {
            config.ec_offset = offset;
        }
        if let Some(path) = &self.dock_sysfs {
            config.dock_sysfs = path.clone();
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum DockCommand {
    /// Print the current dock state as JSON
    Status(DockArgs),
    /// Poll and print a JSON line whenever the signal changes
    Watch(WatchArgs),
}

#[derive(Debug, Args)]
pub struct WatchArgs {
    #[command(flatten)]
    pub dock: DockArgs,
    /// Polling interval in seconds
    #[arg(long, default_value_t = 0.2)]
    pub interval_s: f64,
    /// Emit the first reading as an `initial` event
    #[arg(long)]
    pub print_initial: bool,
    /// Stop after this many change events (0 = never)
    #[arg(long, default_value_t = 0)]
    pub max_events: u64,
}

#[derive(Serialize)]
struct DockPaths<'a> {
    acpi_call: &'a PathBuf,
    gdst: &'a str,
    cmmd: &'a str,
    ec_io: &'a PathBuf,
    ec_offset: String,
    dock_sysfs: &'a PathBuf,
}

#[derive(Serialize)]
struct DockStatus<'a> {
    backend: SourcePriority,
    paths: DockPaths<'a>,
    state: &'a DockState,
}

#[derive(Serialize)]
struct DockLine<'a> {
    event: WatchEvent,
    state: &'a DockState,
}

fn reader(config: DockConfig) -> DockStateReader<LinuxPlatform> {
    let platform = LinuxPlatform::new(&config.acpi_call, &config.ec_io);
    DockStateReader::new(platform, config)
}

pub async fn run(cmd: DockCommand, mut config: Config) -> Result<ExitCode> {
    match cmd {
        DockCommand::Status(args) => {
            args.apply(&mut config.dock);
            let dock = &config.dock;
            let state = reader(dock.clone()).read(dock.backend);
            print_json(&Stamped::now(DockStatus {
                backend: dock.backend,
                paths: DockPaths {
                    acpi_call: &dock.acpi_call,
                    gdst: &dock.gdst_expression,
                    cmmd: &dock.cmmd_expression,
                    ec_io: &dock.ec_io,
                    ec_offset: format!("0x{:x}", dock.ec_offset),
                    dock_sysfs: &dock.dock_sysfs,
                },
                state: &state,
            }))?;
        }
        DockCommand::Watch(args) => {
            let interval = Duration::try_from_secs_f64(args.interval_s)
                .ok()
                .filter(|interval| !interval.is_zero())
                .context("--interval-s must be a positive number of seconds")?;
            args.dock.apply(&mut config.dock);
            let sources = config.dock.backend;
            let reader = reader(config.dock);
            let mut filter = ChangeFilter::new(args.print_initial);
            loop {
                let state = reader.read(sources);
                if let Some(event) = filter.observe(&state) {
                    print_json(&Stamped::now(DockLine {
                        event,
                        state: &state,
                    }))?;
                    if args.max_events > 0 && filter.changes() >= args.max_events {
                        break;
                    }
                }
                tokio::time::sleep(interval).await;
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}
