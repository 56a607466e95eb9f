use std::time::Instant;

use crate::dock_state::DockState;

/// The last accepted dock reading; `docked` is always definite here.
#[derive(Debug, Clone, PartialEq)]
pub struct Stable {
    pub docked: bool,
    pub dock: DockState,
}

/// A reading that differs from [`Stable`] and is waiting out its debounce window.
#[derive(Debug, Clone, PartialEq)]
pub struct Pending {
    pub docked: bool,
    pub dock: DockState,
    pub since: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// 还没有读到确定的信号
    Unknown,
    Stable { docked: bool },
    PendingTransition { from: bool, to: bool },
}

/// 守护进程的运行状态, 生命周期与进程相同
#[derive(Debug, Clone, Default)]
pub struct PolicyState {
    pub(crate) stable: Option<Stable>,
    pub(crate) pending: Option<Pending>,
    pub(crate) last_apply: Option<Instant>,
    pub(crate) last_enforce: Option<Instant>,
}

impl PolicyState {
    pub fn phase(&self) -> Phase {
        match (&self.stable, &self.pending) {
            (None, _) => Phase::Unknown,
            (Some(stable), None) => Phase::Stable {
                docked: stable.docked,
            },
            (Some(stable), Some(pending)) => Phase::PendingTransition {
                from: stable.docked,
                to: pending.docked,
            },
        }
    }

    pub fn stable(&self) -> Option<&Stable> {
        self.stable.as_ref()
    }

    pub fn pending(&self) -> Option<&Pending> {
        self.pending.as_ref()
    }

    pub fn last_apply(&self) -> Option<Instant> {
        self.last_apply
    }

    pub fn last_enforce(&self) -> Option<Instant> {
        self.last_enforce
    }
}
