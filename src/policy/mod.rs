//! Dock-driven policy daemon.
//!
//! One poll per iteration: read the dock, advance the debounce state
//! machine, run at most one external command, publish the outcome, sleep.
//! Nothing here is fatal; unreadable docks and failing commands are logged
//! and retried on the next poll.

pub mod command;
pub mod dmi;
pub mod publish;
pub mod state;
pub mod status;

use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use serde_json::Value;
use tokio::signal::unix::{SignalKind, signal};
use tracing::{debug, info, warn};

pub use command::{CommandOutput, CommandRunner, CommandSet, ExternalCommand, ProcessRunner};
pub use dmi::DmiInfo;
pub use publish::{AtomicStateFile, StateDocument, StateEvent, StateSink};
pub use state::{Pending, Phase, PolicyState, Stable};
pub use status::ExternalStatus;

use crate::config::DaemonConfig;
use crate::digitizer::DigitizerMode;
use crate::dock_state::{DockState, DockStateReader};
use crate::hardware_transport::PlatformIo;

pub struct PolicyLoop<R, S> {
    config: DaemonConfig,
    commands: CommandSet,
    runner: R,
    sink: S,
    dmi: DmiInfo,
    state: PolicyState,
}

impl<R: CommandRunner, S: StateSink> PolicyLoop<R, S> {
    pub fn new(config: DaemonConfig, commands: CommandSet, runner: R, sink: S, dmi: DmiInfo) -> Self {
        Self {
            config,
            commands,
            runner,
            sink,
            dmi,
            state: PolicyState::default(),
        }
    }

    pub fn state(&self) -> &PolicyState {
        &self.state
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// 用 `now` 时刻的一次读数推进状态机, 返回下次轮询前的等待时间
    pub async fn step(&mut self, dock: DockState, now: Instant) -> Duration {
        let interval = self.config.interval();
        let Some(docked) = dock.docked() else {
            debug!(errors = ?dock.errors(), "dock state unreadable, waiting");
            // 读不到信号时候选切换作废, 重新计时
            if let Some(pending) = self.state.pending.take() {
                info!(
                    to_docked = pending.docked,
                    pending_for = ?now.saturating_duration_since(pending.since),
                    "dock change candidate dropped, signal unreadable"
                );
            }
            return interval;
        };

        let Some(from) = self.state.stable.as_ref().map(|stable| stable.docked) else {
            info!(docked, mode_id = ?dock.mode_id(), "initial dock state");
            self.state.stable = Some(Stable {
                docked,
                dock: dock.clone(),
            });
            if self.config.apply_initial {
                self.apply_initial(dock, docked, now).await;
            }
            return interval;
        };

        if docked == from {
            if let Some(pending) = self.state.pending.take() {
                info!(
                    docked = from,
                    pending_for = ?now.saturating_duration_since(pending.since),
                    "dock change reverted within debounce window"
                );
            }
            self.maybe_enforce(&dock, docked, now).await;
            return interval;
        }

        let debounce = self.config.debounce_for(docked);
        if !debounce.is_zero() {
            let waiting_since = self
                .state
                .pending
                .as_ref()
                .filter(|pending| pending.docked == docked)
                .map(|pending| pending.since);
            match waiting_since {
                Some(since) => {
                    if now.saturating_duration_since(since) < debounce {
                        return self.config.debounce_poll();
                    }
                    self.state.pending = None;
                }
                None => {
                    self.state.pending = Some(Pending {
                        docked,
                        dock: dock.clone(),
                        since: now,
                    });
                    let desired = DigitizerMode::for_docked(docked);
                    info!(from_docked = from, to_docked = docked, %desired, ?debounce, "dock_change_candidate");
                    let mut doc = self
                        .document(StateEvent::DockChangeCandidate, dock, desired)
                        .transition(from, docked);
                    doc.debounce_s = Some(debounce.as_secs_f64());
                    self.publish(&doc);
                    return self.config.debounce_poll();
                }
            }
        }

        self.apply_change(dock, from, docked, now).await;
        interval
    }

    async fn apply_initial(&mut self, dock: DockState, docked: bool, now: Instant) {
        let desired = DigitizerMode::for_docked(docked);
        // 先写 pending, 切换命令可能很慢
        let pending = self.document(StateEvent::ApplyInitialPending, dock.clone(), desired);
        self.publish(&pending);

        let rc = self.run_apply(desired).await;
        info!(docked, mode_id = ?dock.mode_id(), %desired, rc, "apply_initial");
        let mut doc = self.document(StateEvent::ApplyInitial, dock, desired);
        doc.apply_rc = Some(rc);
        self.publish(&doc);
        self.state.last_apply = Some(now);
    }

    async fn apply_change(&mut self, dock: DockState, from: bool, docked: bool, now: Instant) {
        let desired = DigitizerMode::for_docked(docked);
        let pending = self
            .document(StateEvent::DockChangePending, dock.clone(), desired)
            .transition(from, docked);
        self.publish(&pending);

        let rc = self.run_apply(desired).await;
        info!(from_docked = from, to_docked = docked, mode_id = ?dock.mode_id(), %desired, rc, "dock_change");
        let mut doc = self
            .document(StateEvent::DockChange, dock.clone(), desired)
            .transition(from, docked);
        doc.apply_rc = Some(rc);
        self.publish(&doc);

        self.state.last_apply = Some(now);
        self.state.stable = Some(Stable { docked, dock });
    }

    /// 稳定状态下定期检查数位板模式, 被外部改掉时重新应用
    async fn maybe_enforce(&mut self, dock: &DockState, docked: bool, now: Instant) {
        let Some(every) = self.config.enforce_every() else {
            return;
        };
        if self
            .state
            .last_enforce
            .is_some_and(|last| now.saturating_duration_since(last) < every)
        {
            return;
        }
        self.state.last_enforce = Some(now);

        let desired = DigitizerMode::for_docked(docked);
        let expected = self.config.digitizer_mode_for(desired);
        match self.query_status().await {
            Err(error) => {
                warn!(docked, %desired, %error, "enforce_check_error");
                let mut doc = self.document(StateEvent::EnforceCheckError, dock.clone(), desired);
                doc.status_error = Some(error);
                self.publish(&doc);
            }
            Ok((status, _)) if status.is(expected.as_str()) => {
                debug!(%expected, "digitizer mode in place");
            }
            Ok((status, raw)) => {
                let rc = self.run_apply(desired).await;
                info!(
                    docked,
                    %desired,
                    digitizer_expected = %expected,
                    digitizer_observed = ?status.mode,
                    rc,
                    since_last_apply = ?self.state.last_apply.map(|at| now.saturating_duration_since(at)),
                    "enforce_apply"
                );
                let mut doc = self.document(StateEvent::EnforceApply, dock.clone(), desired);
                doc.digitizer_expected = Some(expected);
                doc.digitizer_observed = status.mode;
                doc.apply_rc = Some(rc);
                doc.status = (!raw.is_null()).then_some(raw);
                self.publish(&doc);
                self.state.last_apply = Some(now);
            }
        }
    }

    async fn run_apply(&mut self, desired: DigitizerMode) -> i32 {
        let command = self.commands.apply_for(desired);
        if self.config.dry_run {
            info!(cmd = %command, "dry-run, not executing");
            return 0;
        }
        let output = self.runner.run(command, self.config.cmd_timeout()).await;
        if !output.success() {
            warn!(
                cmd = %command,
                rc = output.rc,
                timed_out = output.timed_out,
                stderr = output.stderr.trim(),
                "apply command failed"
            );
        }
        output.rc
    }

    /// dry-run 下不执行状态命令, 模式视为未知
    async fn query_status(&mut self) -> Result<(ExternalStatus, Value), String> {
        if self.config.dry_run {
            info!(cmd = %self.commands.status, "dry-run, not executing");
            return Ok((ExternalStatus::default(), Value::Null));
        }
        let limit = self.config.cmd_timeout();
        let output = self.runner.run(&self.commands.status, limit).await;
        if output.timed_out {
            return Err(format!("timed out after {:.1}s", limit.as_secs_f64()));
        }
        if !output.success() {
            let message = [output.stderr.trim(), output.stdout.trim()]
                .into_iter()
                .find(|text| !text.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| format!("rc={}", output.rc));
            return Err(message);
        }
        ExternalStatus::parse(&output.stdout).map_err(|e| format!("invalid status JSON: {e}"))
    }

    fn document(&self, event: StateEvent, dock: DockState, desired: DigitizerMode) -> StateDocument {
        StateDocument::new(event, self.dmi.clone(), dock, desired)
    }

    fn publish(&mut self, document: &StateDocument) {
        if let Err(e) = self.sink.publish(document) {
            warn!(event = ?document.event, "failed to publish state: {e}");
        }
    }

    /// Polls until SIGINT or SIGTERM; signals are only observed between polls.
    pub async fn run<P: PlatformIo>(mut self, reader: &DockStateReader<P>) -> Result<()> {
        let mut sigterm =
            signal(SignalKind::terminate()).context("Failed to register SIGTERM handler")?;
        let mut sigint =
            signal(SignalKind::interrupt()).context("Failed to register SIGINT handler")?;
        let sources = reader.config().backend;

        info!(
            backend = sources.as_str(),
            interval = ?self.config.interval(),
            apply_initial = self.config.apply_initial,
            enforce_every = ?self.config.enforce_every(),
            dry_run = self.config.dry_run,
            half = %self.commands.half,
            full = %self.commands.full,
            status = %self.commands.status,
            state_file = %self.config.state_file.display(),
            dmi = ?self.dmi,
            "start"
        );

        loop {
            let dock = reader.read(sources);
            let pause = self.step(dock, Instant::now()).await;
            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                _ = sigterm.recv() => {
                    info!("received SIGTERM");
                    break;
                }
                _ = sigint.recv() => {
                    info!("received SIGINT");
                    break;
                }
            }
        }
        info!("stop");
        Ok(())
    }
}
