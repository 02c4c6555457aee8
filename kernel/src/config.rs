//! Конфигурация ядра / Kernel configuration
//!
//! Константы политики планировщика и параметры симулируемой машины.
//! Scheduler policy constants and simulated machine parameters.

use crate::sched::trace::TraceMask;

/// Единица симулированного времени / Unit of simulated time
pub type Ticks = u64;

// ── Приоритеты / Priorities ──────────────────────────────────────────────────

/// Максимальный приоритет (верх L1) / Highest priority (top of L1)
pub const PRIORITY_MAX: u8 = 149;

/// Нижняя граница L1 / Lower bound of L1
pub const L1_MIN_PRIORITY: u8 = 100;

/// Нижняя граница L2 / Lower bound of L2
pub const L2_MIN_PRIORITY: u8 = 50;

// ── Старение / Aging ─────────────────────────────────────────────────────────

/// Сколько тиков ожидания даёт одно повышение.
/// Waiting ticks that earn one priority boost.
pub const AGING_THRESHOLD: Ticks = 1500;

/// Шаг повышения приоритета / Priority boost step
pub const AGING_BOOST: u8 = 10;

// ── Машина / Machine ─────────────────────────────────────────────────────────

/// Интервал таймера / Timer interval
pub const TIMER_TICKS: Ticks = 100;

/// Шаг часов в режиме ядра / Clock advance per step in kernel mode
pub const SYSTEM_TICK: Ticks = 10;

/// Шаг часов в пользовательском режиме / Clock advance per step in user mode
pub const USER_TICK: Ticks = 1;

/// Приоритет главного потока / Priority of the boot thread
pub const MAIN_PRIORITY: u8 = 0;

/// Когда доминирующий поток отнимает процессор.
/// When a dominating thread takes the processor away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preemption {
    /// Only at the next timer tick (the default).
    AtTick,
    /// As soon as the dominating thread becomes ready.
    Immediate,
}

impl Default for Preemption {
    fn default() -> Self {
        if cfg!(feature = "immediate-preempt") {
            Preemption::Immediate
        } else {
            Preemption::AtTick
        }
    }
}

/// Параметры планировщика / Scheduler parameters
#[derive(Debug, Clone, Copy)]
pub struct SchedConfig {
    pub aging_threshold: Ticks,
    pub aging_boost: u8,
    pub preemption: Preemption,
    /// Event kinds a `LogSink` built from this config lets through.
    pub trace: TraceMask,
}

impl Default for SchedConfig {
    fn default() -> Self {
        Self {
            aging_threshold: AGING_THRESHOLD,
            aging_boost: AGING_BOOST,
            preemption: Preemption::default(),
            trace: TraceMask::all(),
        }
    }
}

/// Параметры таймера / Timer parameters
#[derive(Debug, Clone, Copy)]
pub struct TimerConfig {
    pub interval: Ticks,
    /// Fire after a random delay in `1..=2*interval` instead of a fixed one.
    pub randomize: bool,
    pub seed: u64,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self { interval: TIMER_TICKS, randomize: false, seed: 0x2545_F491_4F6C_DD1D }
    }
}

/// Полная конфигурация ядра / Whole kernel configuration
#[derive(Debug, Clone, Copy)]
pub struct KernelConfig {
    pub sched: SchedConfig,
    pub timer: TimerConfig,
    pub system_tick: Ticks,
    pub user_tick: Ticks,
    pub main_priority: u8,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            sched: SchedConfig::default(),
            timer: TimerConfig::default(),
            system_tick: SYSTEM_TICK,
            user_tick: USER_TICK,
            main_priority: MAIN_PRIORITY,
        }
    }
}
