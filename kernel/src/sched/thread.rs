//! Поток — запись планировщика / Thread — the scheduler's record
//!
//! Планировщик интерпретирует только приоритет, счётчики времени и статус.
//! Адресное пространство для него непрозрачно: сохранить / восстановить.
//! The scheduler interprets only priority, timing counters and status.
//! The address space is opaque to it: save / restore, nothing else.

use alloc::boxed::Box;
use alloc::string::String;
use core::fmt;

use super::predict;
use super::queue::Level;
use crate::arch::{Cpu, UserRegisters};
use crate::config::{Ticks, PRIORITY_MAX};
use crate::error::{KernelError, Result};

/// Идентификатор потока / Thread identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(pub u64);

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Состояние потока / Thread status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadStatus {
    /// Built, not yet handed to the scheduler.
    Created,
    Ready,
    Running,
    Blocked,
    /// Switched away from for the last time; waiting for destruction.
    Finished,
}

impl fmt::Display for ThreadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Ready => "ready",
            Self::Running => "running",
            Self::Blocked => "blocked",
            Self::Finished => "finished",
        };
        f.write_str(s)
    }
}

/// Приоритет 0–149 / Priority 0–149
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Priority(u8);

impl Priority {
    pub const MAX: Priority = Priority(PRIORITY_MAX);

    pub fn new(value: u32) -> Result<Self> {
        if value > PRIORITY_MAX as u32 {
            return Err(KernelError::InvalidPriority(value));
        }
        Ok(Self(value as u8))
    }

    pub const fn get(self) -> u8 {
        self.0
    }

    /// Очередь, в которую попадает поток с таким приоритетом.
    /// The queue a thread with this priority belongs to.
    pub fn level(self) -> Level {
        Level::of(self.0)
    }

    /// Повысить на `step`, не выше 149 / Raise by `step`, clamped at 149
    pub fn boosted(self, step: u8) -> Self {
        Self(self.0.saturating_add(step).min(PRIORITY_MAX))
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Адресное пространство пользовательской программы.
/// A user program's address space.
pub trait AddressSpace: Send {
    fn save_state(&mut self);
    fn restore_state(&mut self);
}

/// Маркер на дне стека; испорчен — стек переполнен.
/// Marker at the bottom of the stack; clobbered means overflow.
pub const STACK_FENCEPOST: u64 = 0xdedb_eef;

pub struct Thread {
    id: ThreadId,
    name: String,
    pub(crate) priority: Priority,
    pub(crate) estimated_burst: Ticks,
    pub(crate) consumed_burst: Ticks,
    pub(crate) waiting_time: Ticks,
    pub(crate) wait_since: Ticks,
    pub(crate) start_time: Ticks,
    pub(crate) status: ThreadStatus,
    space: Option<Box<dyn AddressSpace>>,
    user_registers: UserRegisters,
    fencepost: u64,
}

impl Thread {
    pub fn new(id: ThreadId, name: impl Into<String>, priority: Priority) -> Self {
        Self {
            id,
            name: name.into(),
            priority,
            estimated_burst: 0,
            consumed_burst: 0,
            waiting_time: 0,
            wait_since: 0,
            start_time: 0,
            status: ThreadStatus::Created,
            space: None,
            user_registers: [0; crate::arch::sim::NUM_USER_REGS],
            fencepost: STACK_FENCEPOST,
        }
    }

    /// Начальная оценка длины CPU-всплеска / Initial CPU burst estimate
    pub fn with_estimate(mut self, ticks: Ticks) -> Self {
        self.estimated_burst = ticks;
        self
    }

    pub fn with_space(mut self, space: Box<dyn AddressSpace>) -> Self {
        self.space = Some(space);
        self
    }

    pub fn id(&self) -> ThreadId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn level(&self) -> Level {
        self.priority.level()
    }

    pub fn status(&self) -> ThreadStatus {
        self.status
    }

    pub fn estimated_burst(&self) -> Ticks {
        self.estimated_burst
    }

    pub fn consumed_burst(&self) -> Ticks {
        self.consumed_burst
    }

    pub fn waiting_time(&self) -> Ticks {
        self.waiting_time
    }

    pub fn wait_since(&self) -> Ticks {
        self.wait_since
    }

    pub fn start_time(&self) -> Ticks {
        self.start_time
    }

    /// `max(estimated − consumed, 0)` — ключ сортировки L1 / L1 sort key
    pub fn remaining_estimate(&self) -> Ticks {
        self.estimated_burst.saturating_sub(self.consumed_burst)
    }

    pub fn has_space(&self) -> bool {
        self.space.is_some()
    }

    pub fn user_registers(&self) -> &UserRegisters {
        &self.user_registers
    }

    /// Начислить время с последнего запуска / Charge CPU time since last dispatch
    pub(crate) fn charge(&mut self, now: Ticks) {
        self.consumed_burst += now.saturating_sub(self.start_time);
        self.start_time = now;
    }

    /// Пересчитать оценку по фактическому всплеску; вернуть (было, прибавка, стало).
    /// Fold the consumed burst into the estimate; returns (from, sample, to).
    pub(crate) fn update_estimate(&mut self) -> (Ticks, Ticks, Ticks) {
        let from = self.estimated_burst;
        let sample = self.consumed_burst;
        self.estimated_burst = predict::next_estimate(from, sample);
        (from, sample, self.estimated_burst)
    }

    pub(crate) fn save_user_state(&mut self, cpu: &Cpu) {
        self.user_registers = cpu.user_registers();
        if let Some(space) = self.space.as_mut() {
            space.save_state();
        }
    }

    pub(crate) fn restore_user_state(&mut self, cpu: &Cpu) {
        cpu.load_user_registers(&self.user_registers);
        if let Some(space) = self.space.as_mut() {
            space.restore_state();
        }
    }

    #[track_caller]
    pub(crate) fn check_overflow(&self) {
        assert!(
            self.fencepost == STACK_FENCEPOST,
            "thread {} ({}) overflowed its stack",
            self.id,
            self.name
        );
    }

    #[cfg(test)]
    pub(crate) fn clobber_stack(&mut self) {
        self.fencepost = 0;
    }
}

impl fmt::Debug for Thread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Thread")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("status", &self.status)
            .field("estimated_burst", &self.estimated_burst)
            .field("consumed_burst", &self.consumed_burst)
            .field("waiting_time", &self.waiting_time)
            .field("has_space", &self.space.is_some())
            .finish()
    }
}
