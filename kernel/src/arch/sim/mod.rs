//! Симулируемый процессор / Simulated uniprocessor
//!
//! Вместо регистров RFLAGS/IF — разделяемое состояние в атомиках.
//! Instead of RFLAGS.IF and friends — shared state in atomics.
//!
//! `Cpu` is a cheap handle: every component that needs the clock or the
//! interrupt level (scheduler, interrupt controller, kernel) holds a clone.

pub mod interrupt;

use alloc::sync::Arc;
use core::fmt;
use core::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use spin::Mutex;

use crate::config::Ticks;

/// Число пользовательских регистров / Number of user-level registers
pub const NUM_USER_REGS: usize = 40;

/// Снимок пользовательских регистров / User register file snapshot
pub type UserRegisters = [u64; NUM_USER_REGS];

/// Уровень прерываний / Interrupt level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntLevel {
    Off,
    On,
}

/// Режим машины / Machine mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MachineStatus {
    /// Nothing to run; waiting for an interrupt.
    Idle = 0,
    /// Running kernel code.
    System = 1,
    /// Running user code.
    User = 2,
}

impl MachineStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Idle,
            2 => Self::User,
            _ => Self::System,
        }
    }
}

impl fmt::Display for MachineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::System => write!(f, "system"),
            Self::User => write!(f, "user"),
        }
    }
}

struct CpuState {
    ticks: AtomicU64,
    interrupts_on: AtomicBool,
    status: AtomicU8,
    yield_on_return: AtomicBool,
    in_handler: AtomicBool,
    registers: Mutex<UserRegisters>,
}

#[derive(Clone)]
pub struct Cpu {
    state: Arc<CpuState>,
}

impl Cpu {
    /// Новый процессор: тик 0, прерывания выключены, режим ядра.
    /// New processor: tick 0, interrupts off, system mode.
    pub fn new() -> Self {
        Self {
            state: Arc::new(CpuState {
                ticks: AtomicU64::new(0),
                interrupts_on: AtomicBool::new(false),
                status: AtomicU8::new(MachineStatus::System as u8),
                yield_on_return: AtomicBool::new(false),
                in_handler: AtomicBool::new(false),
                registers: Mutex::new([0; NUM_USER_REGS]),
            }),
        }
    }

    // ── Часы / Clock ─────────────────────────────────────────────────────────

    pub fn now(&self) -> Ticks {
        self.state.ticks.load(Ordering::Acquire)
    }

    pub fn advance(&self, ticks: Ticks) -> Ticks {
        self.state.ticks.fetch_add(ticks, Ordering::AcqRel) + ticks
    }

    /// Перемотать часы вперёд до `when` (назад — никогда).
    /// Fast-forward the clock to `when` (never backwards).
    pub fn advance_to(&self, when: Ticks) {
        self.state.ticks.fetch_max(when, Ordering::AcqRel);
    }

    // ── Прерывания / Interrupts ──────────────────────────────────────────────

    pub fn level(&self) -> IntLevel {
        if self.state.interrupts_on.load(Ordering::Acquire) {
            IntLevel::On
        } else {
            IntLevel::Off
        }
    }

    /// Установить уровень, вернуть предыдущий.
    /// Set the level, return the previous one.
    pub fn set_level(&self, level: IntLevel) -> IntLevel {
        let old = self.state.interrupts_on.swap(level == IntLevel::On, Ordering::AcqRel);
        if old { IntLevel::On } else { IntLevel::Off }
    }

    /// Выключить прерывания до конца области видимости.
    /// Disable interrupts until the guard is dropped.
    pub fn disable(&self) -> InterruptGuard {
        let previous = self.set_level(IntLevel::Off);
        InterruptGuard { cpu: self.clone(), previous }
    }

    /// Fatal unless interrupts are off. Every scheduler entry point calls this.
    #[track_caller]
    pub fn assert_interrupts_off(&self, op: &str) {
        assert!(
            self.level() == IntLevel::Off,
            "{} called with interrupts enabled",
            op
        );
    }

    // ── Режим / Mode ─────────────────────────────────────────────────────────

    pub fn status(&self) -> MachineStatus {
        MachineStatus::from_u8(self.state.status.load(Ordering::Acquire))
    }

    pub fn set_status(&self, status: MachineStatus) {
        self.state.status.store(status as u8, Ordering::Release);
    }

    /// Interrupt context: set while an interrupt handler runs.
    pub fn in_handler(&self) -> bool {
        self.state.in_handler.load(Ordering::Acquire)
    }

    pub(crate) fn set_in_handler(&self, on: bool) {
        self.state.in_handler.store(on, Ordering::Release);
    }

    /// Попросить прерванный поток уступить процессор при выходе из прерывания.
    /// Ask the interrupted thread to yield on the interrupt-return path.
    pub fn yield_on_return(&self) {
        assert!(self.in_handler(), "yield_on_return outside an interrupt handler");
        self.state.yield_on_return.store(true, Ordering::Release);
    }

    pub fn yield_requested(&self) -> bool {
        self.state.yield_on_return.load(Ordering::Acquire)
    }

    /// Consume the deferred-yield flag. Only the interrupt-return path does this.
    pub(crate) fn take_yield_request(&self) -> bool {
        self.state.yield_on_return.swap(false, Ordering::AcqRel)
    }

    // ── Пользовательские регистры / User registers ───────────────────────────

    pub fn user_registers(&self) -> UserRegisters {
        *self.state.registers.lock()
    }

    pub fn load_user_registers(&self, regs: &UserRegisters) {
        *self.state.registers.lock() = *regs;
    }

    pub fn write_register(&self, index: usize, value: u64) {
        self.state.registers.lock()[index] = value;
    }
}

impl Default for Cpu {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Cpu {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cpu")
            .field("ticks", &self.now())
            .field("level", &self.level())
            .field("status", &self.status())
            .finish()
    }
}

/// RAII: прерывания выключены, пока guard жив.
/// RAII: interrupts stay off while the guard lives.
pub struct InterruptGuard {
    cpu: Cpu,
    previous: IntLevel,
}

impl Drop for InterruptGuard {
    fn drop(&mut self) {
        self.cpu.set_level(self.previous);
    }
}
