//! Контроллер прерываний / Interrupt controller
//!
//! Очередь отложенных прерываний, упорядоченная по тику срабатывания.
//! Queue of pending interrupts ordered by the tick they fall due.
//!
//! Обработчики вызывает ядро (`Kernel::one_tick`), здесь только механизм.
//! Handlers are dispatched by the kernel (`Kernel::one_tick`); this is the mechanism only.

use alloc::collections::BTreeMap;

use super::Cpu;
use crate::config::Ticks;
use crate::sched::thread::ThreadId;

/// Источник прерывания / Interrupt source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqKind {
    /// Periodic timer; drives the alarm.
    Timer,
    /// Device completion that makes a blocked thread ready again.
    Wakeup(ThreadId),
}

pub struct InterruptController {
    cpu: Cpu,
    // (when, seq): equal deadlines fire in the order they were scheduled
    pending: BTreeMap<(Ticks, u64), IrqKind>,
    seq: u64,
}

impl InterruptController {
    pub fn new(cpu: Cpu) -> Self {
        Self { cpu, pending: BTreeMap::new(), seq: 0 }
    }

    /// Запланировать прерывание через `after` тиков.
    /// Schedule an interrupt `after` ticks from now.
    pub fn schedule(&mut self, after: Ticks, kind: IrqKind) -> Ticks {
        let when = self.cpu.now() + after;
        self.seq += 1;
        self.pending.insert((when, self.seq), kind);
        log::trace!("[irq] {:?} scheduled for tick {}", kind, when);
        when
    }

    /// Забрать следующее созревшее прерывание.
    /// Pop the next interrupt that is due at the current tick.
    pub fn pop_due(&mut self) -> Option<IrqKind> {
        let now = self.cpu.now();
        let (&key, _) = self.pending.first_key_value()?;
        if key.0 > now {
            return None;
        }
        self.pending.remove(&key)
    }

    pub fn next_due_at(&self) -> Option<Ticks> {
        self.pending.first_key_value().map(|(&(when, _), _)| when)
    }

    /// Есть ли что-то кроме таймера — то, что может разбудить поток.
    /// Anything besides the timer, i.e. something that can wake a thread.
    pub fn has_device_pending(&self) -> bool {
        self.pending.values().any(|k| *k != IrqKind::Timer)
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}
