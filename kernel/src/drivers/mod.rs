//! Kernel-space drivers
//!
//! Минимально необходимые для планировщика / Minimum required by the scheduler:
//!   - Timer — периодический тик / periodic tick

pub mod timer;

pub use timer::Timer;
