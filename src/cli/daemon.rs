use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Result;
use clap::Args;
use tracing::{error, info};

use super::dock::DockArgs;
use crate::config::Config;
use crate::digitizer::{BackendChoice, DigitizerMode};
use crate::dock_state::DockStateReader;
use crate::hardware_transport::LinuxPlatform;
use crate::policy::{AtomicStateFile, CommandSet, DmiInfo, PolicyLoop, ProcessRunner};

/// Exit code for an invalid flag combination detected at startup.
const USAGE_EXIT: u8 = 2;

#[derive(Debug, Clone, Default, Args)]
pub struct DaemonArgs {
    #[command(flatten)]
    pub dock: DockArgs,

    /// Exit successfully without doing anything unless DMI says ThinkPad X1 Fold
    #[arg(long)]
    pub require_x1fold: bool,
    /// JSON state file for display helpers
    #[arg(long, value_name = "PATH")]
    pub state_file: Option<PathBuf>,
    /// Polling interval in seconds
    #[arg(long, value_name = "SECS")]
    pub interval_s: Option<f64>,
    /// Seconds docked must hold before switching into half mode (0 = immediate)
    #[arg(long, value_name = "SECS")]
    pub dock_debounce_on_s: Option<f64>,
    /// Seconds undocked must hold before switching into full mode (0 = immediate)
    #[arg(long, value_name = "SECS")]
    pub dock_debounce_off_s: Option<f64>,
    /// Polling interval while confirming a transition
    #[arg(long, value_name = "SECS")]
    pub dock_debounce_interval_s: Option<f64>,
    /// Re-check and re-apply the mode this often while stable (0 = never)
    #[arg(long, value_name = "SECS")]
    pub enforce_every_s: Option<f64>,
    /// Timeout for external commands
    #[arg(long, value_name = "SECS")]
    pub cmd_timeout_s: Option<f64>,
    /// Apply the mode for the first reading right away
    #[arg(long)]
    pub apply_initial: bool,
    /// Log commands instead of running them
    #[arg(long)]
    pub dry_run: bool,
    /// Digitizer backend passed to `mode set`
    #[arg(long, value_enum)]
    pub digitizer: Option<BackendChoice>,
    /// Digitizer mode to apply when docked
    #[arg(long, value_enum)]
    pub digitizer_mode_in_half: Option<DigitizerMode>,
    /// Digitizer mode to apply when undocked
    #[arg(long, value_enum)]
    pub digitizer_mode_in_full: Option<DigitizerMode>,
    /// Display-geometry command forwarded to `mode set --display-cmd`
    #[arg(long, value_name = "CMD")]
    pub display_cmd: Option<String>,
    /// Shell command run when docked
    #[arg(long, value_name = "CMD")]
    pub half_cmd: Option<String>,
    /// Shell command run when undocked
    #[arg(long, value_name = "CMD")]
    pub full_cmd: Option<String>,
    /// Shell command printing the current mode as JSON
    #[arg(long, value_name = "CMD")]
    pub status_cmd: Option<String>,
}

impl DaemonArgs {
    pub fn apply(&self, config: &mut Config) {
        self.dock.apply(&mut config.dock);
        let daemon = &mut config.daemon;
        daemon.require_x1fold |= self.require_x1fold;
        daemon.apply_initial |= self.apply_initial;
        daemon.dry_run |= self.dry_run;
        if let Some(path) = &self.state_file {
            daemon.state_file = path.clone();
        }
        for (value, slot) in [
            (self.interval_s, &mut daemon.interval_s),
            (self.dock_debounce_on_s, &mut daemon.debounce_on_s),
            (self.dock_debounce_off_s, &mut daemon.debounce_off_s),
            (self.dock_debounce_interval_s, &mut daemon.debounce_poll_s),
            (self.enforce_every_s, &mut daemon.enforce_every_s),
            (self.cmd_timeout_s, &mut daemon.cmd_timeout_s),
        ] {
            if let Some(value) = value {
                *slot = value;
            }
        }
        if let Some(choice) = self.digitizer {
            daemon.digitizer = choice;
        }
        if let Some(mode) = self.digitizer_mode_in_half {
            daemon.digitizer_mode_in_half = mode;
        }
        if let Some(mode) = self.digitizer_mode_in_full {
            daemon.digitizer_mode_in_full = mode;
        }
        for (value, slot) in [
            (&self.display_cmd, &mut daemon.display_cmd),
            (&self.half_cmd, &mut daemon.half_cmd),
            (&self.full_cmd, &mut daemon.full_cmd),
            (&self.status_cmd, &mut daemon.status_cmd),
        ] {
            if value.is_some() {
                slot.clone_from(value);
            }
        }
    }
}

pub async fn run(args: DaemonArgs, mut config: Config, config_file: Option<&Path>) -> Result<ExitCode> {
    args.apply(&mut config);
    config.daemon.validate()?;

    let dmi = DmiInfo::read_system();
    if config.daemon.require_x1fold && !dmi.looks_like_x1fold() {
        info!(?dmi, "dmi_skip: not a ThinkPad X1 Fold");
        return Ok(ExitCode::SUCCESS);
    }
    if let Err(e) = config.daemon.check_mode_overrides() {
        error!(
            half = %config.daemon.digitizer_mode_in_half,
            full = %config.daemon.digitizer_mode_in_full,
            "invalid_digitizer_mode_combo: {e}"
        );
        return Ok(ExitCode::from(USAGE_EXIT));
    }

    let commands = CommandSet::from_config(&config.daemon, config_file);
    let platform = LinuxPlatform::new(&config.dock.acpi_call, &config.dock.ec_io);
    let reader = DockStateReader::new(platform, config.dock);
    let sink = AtomicStateFile::new(&config.daemon.state_file);
    let policy = PolicyLoop::new(config.daemon, commands, ProcessRunner, sink, dmi);
    policy.run(&reader).await?;
    Ok(ExitCode::SUCCESS)
}
