//! Переключение контекста / Context switch
//!
//! Единственная точка приостановки во всём планировщике.
//! The only suspension point in the whole scheduler.

use super::thread::Thread;

/// Низкоуровневая передача управления / Low-level control transfer
///
/// `switch` returns when some thread switches back onto the caller's stack.
/// Both threads are still alive while it runs: a finishing `from` is only
/// destroyed after the call returns.
pub trait ContextSwitch: Send {
    fn switch(&mut self, from: &Thread, to: &Thread);
}

/// Симулируемое переключение: один поток управления, входящий поток
/// продолжает выполнение сразу после возврата.
/// Simulated switch: one flow of control, the incoming thread carries on
/// from the point where `switch` returns.
#[derive(Debug, Default)]
pub struct SimSwitch {
    switches: u64,
}

impl SimSwitch {
    pub fn switches(&self) -> u64 {
        self.switches
    }
}

impl ContextSwitch for SimSwitch {
    fn switch(&mut self, from: &Thread, to: &Thread) {
        self.switches += 1;
        log::trace!("[sched] switch {} ({}) -> {} ({})", from.id(), from.name(), to.id(), to.name());
    }
}
