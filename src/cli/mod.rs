//! Command-line front end. Logs go to stderr, JSON documents to stdout.

pub mod daemon;
pub mod dock;
pub mod mode;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::hardware_transport::parse_int;

#[derive(Debug, Parser)]
#[command(name = "halfblankd", version)]
#[command(about = "Drive the X1 Fold digitizer between half and full mode from the keyboard dock")]
pub struct Cli {
    /// TOML configuration file (default: /etc/halfblankd.toml when present)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Log filter, e.g. `debug` or `halfblankd=trace` (default: $RUST_LOG, then `info`)
    #[arg(long, global = true, value_name = "FILTER")]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Read or watch the keyboard dock signal
    #[command(subcommand)]
    Dock(dock::DockCommand),

    /// Query or switch the digitizer mode
    #[command(subcommand)]
    Mode(mode::ModeCommand),

    /// Run the dock policy daemon
    Daemon(daemon::DaemonArgs),
}

/// Installs the stderr subscriber; call once.
pub fn init_tracing(level: Option<&str>) {
    let filter = match level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

pub async fn run(cli: Cli) -> Result<ExitCode> {
    let config = Config::load(cli.config.as_deref())?;
    match cli.command {
        Command::Dock(cmd) => dock::run(cmd, config).await,
        Command::Mode(cmd) => mode::run(cmd, config).await,
        Command::Daemon(args) => daemon::run(args, config, cli.config.as_deref()).await,
    }
}

pub(crate) fn parse_u8(text: &str) -> Result<u8, String> {
    parse_int(text)
        .and_then(|v| u8::try_from(v).ok())
        .ok_or_else(|| format!("expected a byte (decimal or 0x-hex), got {text:?}"))
}

pub(crate) fn parse_u16(text: &str) -> Result<u16, String> {
    parse_int(text)
        .and_then(|v| u16::try_from(v).ok())
        .ok_or_else(|| format!("expected a 16-bit integer (decimal or 0x-hex), got {text:?}"))
}
