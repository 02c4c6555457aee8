//! Таймер / Timer device
//!
//! Периодический источник тиков; интервал может быть случайным.
//! Periodic tick source; the interval may be randomized.
//!
//! The device only computes when it fires next; the interrupt controller
//! owns the pending queue and the alarm owns what happens on expiry.

use crate::config::{Ticks, TimerConfig};

pub struct Timer {
    interval: Ticks,
    randomize: bool,
    rng: XorShift64,
}

impl Timer {
    pub fn new(config: TimerConfig) -> Self {
        assert!(config.interval > 0, "timer interval must be non-zero");
        Self {
            interval: config.interval,
            randomize: config.randomize,
            rng: XorShift64::new(config.seed),
        }
    }

    /// Через сколько тиков следующее прерывание.
    /// Ticks until the next timer interrupt.
    pub fn next_delay(&mut self) -> Ticks {
        if self.randomize {
            1 + self.rng.next() % (self.interval * 2)
        } else {
            self.interval
        }
    }

    pub fn interval(&self) -> Ticks {
        self.interval
    }
}

/// xorshift64 — детерминированный ГПСЧ для джиттера.
/// xorshift64 — deterministic PRNG for jitter.
struct XorShift64(u64);

impl XorShift64 {
    fn new(seed: u64) -> Self {
        // zero is a fixed point of xorshift
        Self(if seed == 0 { 0x9E37_79B9_7F4A_7C15 } else { seed })
    }

    fn next(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }
}
