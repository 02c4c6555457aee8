//! Статистика / Statistics

use core::fmt;

use crate::arch::MachineStatus;
use crate::config::Ticks;

/// Счётчики планировщика / Scheduler counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedStats {
    pub enqueues: u64,
    pub dispatches: u64,
    pub aging_passes: u64,
    pub boosts: u64,
    pub destroyed: u64,
}

/// Счётчики машины / Machine counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Statistics {
    pub total_ticks: Ticks,
    pub idle_ticks: Ticks,
    pub system_ticks: Ticks,
    pub user_ticks: Ticks,
    pub interrupts: u64,
}

impl Statistics {
    pub(crate) fn account(&mut self, status: MachineStatus, ticks: Ticks) {
        self.total_ticks += ticks;
        match status {
            MachineStatus::Idle => self.idle_ticks += ticks,
            MachineStatus::System => self.system_ticks += ticks,
            MachineStatus::User => self.user_ticks += ticks,
        }
    }
}

impl fmt::Display for Statistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Ticks: total {}, idle {}, system {}, user {}; interrupts {}",
            self.total_ticks, self.idle_ticks, self.system_ticks, self.user_ticks, self.interrupts
        )
    }
}
