//! MLFQ kernel core — планировщик учебного ядра / scheduling core of a teaching kernel
//!
//! Три очереди готовых потоков с обратной связью, старение, оценка
//! CPU-всплесков и обработчик таймера поверх симулируемой однопроцессорной
//! машины.
//! Three ready queues with feedback, aging, CPU burst estimation and the
//! timer handler, on top of a simulated uniprocessor.
//!
//! Порядок слоёв / Layering:
//!   arch     — процессор, прерывания / CPU, interrupts
//!   drivers  — таймер / timer
//!   sched    — очереди, потоки, будильник / queues, threads, alarm
//!   kernel   — операции потока / thread operations

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]

// Box, Vec, Arc, BTreeMap
extern crate alloc;

pub mod arch;
pub mod config;
pub mod drivers;
pub mod error;
pub mod kernel;
pub mod sched;
pub mod stats;

pub use config::{KernelConfig, Preemption, SchedConfig, Ticks, TimerConfig};
pub use error::{KernelError, Result};
pub use kernel::Kernel;
pub use sched::Scheduler;
