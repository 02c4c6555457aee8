//! Ошибки API ядра / Kernel API errors
//!
//! Нарушения инвариантов планировщика — это panic, а не ошибка.
//! Scheduler invariant violations are panics, not errors.

use core::fmt;

use crate::sched::thread::{ThreadId, ThreadStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    /// Priority outside `0..=149`.
    InvalidPriority(u32),
    /// No live thread carries this id.
    NoSuchThread(ThreadId),
    /// Only blocked threads can be woken.
    NotBlocked { id: ThreadId, status: ThreadStatus },
    /// Nothing is ready and no interrupt can ever make anything ready.
    Halted,
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidPriority(p) => write!(f, "invalid priority {} (expected 0..=149)", p),
            Self::NoSuchThread(id) => write!(f, "no such thread {}", id),
            Self::NotBlocked { id, status } => {
                write!(f, "thread {} is {}, not blocked", id, status)
            }
            Self::Halted => write!(f, "machine halted: no runnable threads left"),
        }
    }
}

pub type Result<T> = core::result::Result<T, KernelError>;
