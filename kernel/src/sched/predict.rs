//! Предсказание длины CPU-всплеска / CPU burst prediction
//!
//! Экспоненциальное сглаживание: t_new = α·T + (1 − α)·t_old, α = 1/2.
//! Exponential averaging: t_new = α·T + (1 − α)·t_old, α = 1/2.
//! Fixed point over 256 so the kernel never touches floating point.

use crate::config::Ticks;

/// α · 256
pub const ALPHA_FIXED: u64 = 128;

/// Next estimate from the previous one and the burst just observed.
pub fn next_estimate(previous: Ticks, sample: Ticks) -> Ticks {
    (ALPHA_FIXED * sample + (256 - ALPHA_FIXED) * previous) / 256
}
