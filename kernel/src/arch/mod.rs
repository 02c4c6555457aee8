//! HAL — Hardware Abstraction Layer
//!
//! Планировщик видит машину только через `current`.
//! The scheduler sees the machine only through `current`.
//!
//! Пока есть одна реализация — симулируемый однопроцессорный компьютер.
//! One implementation so far — a simulated uniprocessor.

pub mod sim;

pub use sim as current;

pub use sim::{Cpu, IntLevel, InterruptGuard, MachineStatus, UserRegisters};
