use std::fmt;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use serde::Serialize;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::config::DaemonConfig;
use crate::digitizer::DigitizerMode;

/// Exit code reported for a command killed by the timeout.
pub const TIMEOUT_RC: i32 = 124;
/// Exit code reported when the command could not be started.
pub const SPAWN_FAILED_RC: i32 = 127;

const TOOL_CANDIDATES: [&str; 2] = ["/usr/local/bin/halfblankd", "/usr/bin/halfblankd"];

/// An apply or status command, as configured.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ExternalCommand {
    /// Shell syntax, run through `/bin/sh -c`.
    Shell(String),
    Argv(Vec<String>),
}

impl ExternalCommand {
    fn to_command(&self) -> Option<Command> {
        match self {
            Self::Shell(script) => {
                let mut cmd = Command::new("/bin/sh");
                cmd.arg("-c").arg(script);
                Some(cmd)
            }
            Self::Argv(argv) => {
                let (program, args) = argv.split_first()?;
                let mut cmd = Command::new(program);
                cmd.args(args);
                Some(cmd)
            }
        }
    }
}

impl fmt::Display for ExternalCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Shell(script) => f.write_str(script),
            Self::Argv(argv) => f.write_str(&argv.join(" ")),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub rc: i32,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.rc == 0
    }

    fn failed(rc: i32, stderr: String) -> Self {
        Self {
            rc,
            stderr,
            ..Self::default()
        }
    }
}

/// 外部命令执行的抽象, 测试里可以换成假的实现
#[allow(async_fn_in_trait)]
pub trait CommandRunner {
    async fn run(&mut self, command: &ExternalCommand, limit: Duration) -> CommandOutput;
}

/// 以子进程执行命令, 超时仍未退出的子进程被杀掉并返回 [`TIMEOUT_RC`]
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

impl CommandRunner for ProcessRunner {
    async fn run(&mut self, command: &ExternalCommand, limit: Duration) -> CommandOutput {
        let Some(mut cmd) = command.to_command() else {
            return CommandOutput::failed(SPAWN_FAILED_RC, "empty command".into());
        };
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(cmd = %command, "failed to start command: {e}");
                return CommandOutput::failed(SPAWN_FAILED_RC, e.to_string());
            }
        };

        match timeout(limit, child.wait_with_output()).await {
            Ok(Ok(output)) => {
                let result = CommandOutput {
                    rc: exit_code(output.status),
                    stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                    timed_out: false,
                };
                debug!(cmd = %command, rc = result.rc, "command finished");
                result
            }
            Ok(Err(e)) => {
                warn!(cmd = %command, "failed to wait for command: {e}");
                CommandOutput::failed(SPAWN_FAILED_RC, e.to_string())
            }
            Err(_) => {
                warn!(cmd = %command, timeout = ?limit, "command timed out");
                CommandOutput {
                    rc: TIMEOUT_RC,
                    timed_out: true,
                    ..CommandOutput::default()
                }
            }
        }
    }
}

fn exit_code(status: ExitStatus) -> i32 {
    status
        .code()
        .unwrap_or_else(|| 128 + status.signal().unwrap_or(0))
}

/// 守护进程使用的三条外部命令
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandSet {
    pub half: ExternalCommand,
    pub full: ExternalCommand,
    pub status: ExternalCommand,
}

impl CommandSet {
    /// 优先使用配置的 shell 命令, 否则调用已安装 (或当前运行) 的本程序的
    /// `mode set` / `mode status` 子命令
    pub fn from_config(daemon: &DaemonConfig, config_file: Option<&Path>) -> Self {
        Self::with_tool(&detect_tool(), daemon, config_file)
    }

    pub fn with_tool(tool: &str, daemon: &DaemonConfig, config_file: Option<&Path>) -> Self {
        let shell_or = |script: &Option<String>, fallback: Vec<String>| match script {
            Some(script) if !script.trim().is_empty() => ExternalCommand::Shell(script.clone()),
            _ => ExternalCommand::Argv(fallback),
        };
        let base = |tail: &[&str]| {
            let mut argv = vec![tool.to_string()];
            if let Some(path) = config_file {
                argv.push("--config".into());
                argv.push(path.display().to_string());
            }
            argv.extend(tail.iter().map(|s| s.to_string()));
            argv
        };
        let set = |desired: DigitizerMode| {
            let mode = daemon.digitizer_mode_for(desired);
            let mut argv = base(&["mode", "set", mode.as_str(), "--digitizer", daemon.digitizer.as_str()]);
            if let Some(display) = &daemon.display_cmd {
                argv.push("--display-cmd".into());
                argv.push(display.clone());
            }
            argv
        };

        Self {
            half: shell_or(&daemon.half_cmd, set(DigitizerMode::Half)),
            full: shell_or(&daemon.full_cmd, set(DigitizerMode::Full)),
            status: shell_or(&daemon.status_cmd, base(&["mode", "status"])),
        }
    }

    pub fn apply_for(&self, desired: DigitizerMode) -> &ExternalCommand {
        match desired {
            DigitizerMode::Half => &self.half,
            DigitizerMode::Full => &self.full,
        }
    }
}

fn detect_tool() -> String {
    TOOL_CANDIDATES
        .iter()
        .map(PathBuf::from)
        .find(|path| path.exists())
        .or_else(|| std::env::current_exe().ok())
        .map(|path| path.display().to_string())
        .unwrap_or_else(|| "halfblankd".to_string())
}
