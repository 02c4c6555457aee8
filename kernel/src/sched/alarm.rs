//! Будильник — обработчик прерывания таймера / Alarm — timer interrupt handler
//!
//! Вызывается с выключенными прерываниями. Никогда не переключает контекст
//! сам: иначе был бы приостановлен обработчик, а не прерванный поток.
//! Runs with interrupts off. Never switches context itself: that would
//! suspend the handler instead of the interrupted thread.

use super::Scheduler;
use crate::arch::{Cpu, MachineStatus};

#[derive(Debug, Default)]
pub struct Alarm {
    fired: u64,
}

impl Alarm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Тик таймера: старение и отложенный yield, если процессор не простаивает.
    /// Timer tick: aging plus a deferred yield, unless the CPU is idle.
    pub fn callback(&mut self, cpu: &Cpu, scheduler: &mut Scheduler) {
        cpu.assert_interrupts_off("alarm callback");
        self.fired += 1;
        if cpu.status() == MachineStatus::Idle {
            return;
        }
        scheduler.aging();
        cpu.yield_on_return();
    }

    pub fn fired(&self) -> u64 {
        self.fired
    }
}
