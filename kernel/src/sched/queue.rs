//! Очереди готовых потоков / Ready queues
//!
//! Очереди / Queues:
//!   L1 (100–149) — кратчайший оставшийся всплеск / shortest remaining estimate
//!   L2 (50–99)   — по убыванию приоритета     / descending priority
//!   L3 (0–49)    — FIFO
//!
//! Ничья решается порядком вызова ReadyToRun (номер `seq`).
//! Ties go to the earliest ReadyToRun call (the `seq` number).

use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use core::fmt;

use super::thread::{Thread, ThreadId};
use crate::config::{L1_MIN_PRIORITY, L2_MIN_PRIORITY, PRIORITY_MAX};

/// Уровень очереди / Queue level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Level {
    L1,
    L2,
    L3,
}

impl Level {
    /// In dispatch precedence order.
    pub const ALL: [Level; 3] = [Level::L1, Level::L2, Level::L3];

    pub fn of(priority: u8) -> Self {
        if priority >= L1_MIN_PRIORITY {
            Level::L1
        } else if priority >= L2_MIN_PRIORITY {
            Level::L2
        } else {
            Level::L3
        }
    }

    /// 1, 2 or 3.
    pub fn number(self) -> u8 {
        self.index() as u8 + 1
    }

    pub(crate) fn index(self) -> usize {
        match self {
            Level::L1 => 0,
            Level::L2 => 1,
            Level::L3 => 2,
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L[{}]", self.number())
    }
}

pub struct ReadyQueue {
    level: Level,
    // (sort key, seq) -> thread
    entries: BTreeMap<(u64, u64), ThreadId>,
}

impl ReadyQueue {
    pub fn new(level: Level) -> Self {
        Self { level, entries: BTreeMap::new() }
    }

    pub fn level(&self) -> Level {
        self.level
    }

    fn sort_key(&self, thread: &Thread) -> u64 {
        match self.level {
            Level::L1 => thread.remaining_estimate(),
            Level::L2 => (PRIORITY_MAX - thread.priority().get()) as u64,
            Level::L3 => 0,
        }
    }

    pub(crate) fn insert(&mut self, thread: &Thread, seq: u64) {
        debug_assert_eq!(thread.level(), self.level);
        let key = self.sort_key(thread);
        let prev = self.entries.insert((key, seq), thread.id());
        assert!(prev.is_none(), "duplicate ready-queue sequence {}", seq);
    }

    /// Вынуть голову очереди; вернуть (seq, id).
    /// Remove the head of the queue; returns (seq, id).
    pub(crate) fn pop_front(&mut self) -> Option<(u64, ThreadId)> {
        self.entries.pop_first().map(|((_, seq), id)| (seq, id))
    }

    /// Вынуть всё в порядке очереди / Take everything, in queue order
    pub(crate) fn drain(&mut self) -> impl Iterator<Item = (u64, ThreadId)> {
        core::mem::take(&mut self.entries)
            .into_iter()
            .map(|((_, seq), id)| (seq, id))
    }

    pub fn front(&self) -> Option<ThreadId> {
        self.entries.values().next().copied()
    }

    pub fn ids(&self) -> Vec<ThreadId> {
        self.entries.values().copied().collect()
    }

    pub fn contains(&self, id: ThreadId) -> bool {
        self.entries.values().any(|&t| t == id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
