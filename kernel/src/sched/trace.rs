//! События планировщика / Scheduler trace events
//!
//! Порядок и состав событий — часть контракта; текст — нет.
//! Which events occur and in what order is contract; the text is not.
//!
//!   [A] enqueued   [B] dequeued   [C] priority changed
//!   [D] burst estimate updated    [E] dispatched

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;
use bitflags::bitflags;
use core::fmt;
use spin::Mutex;

use super::queue::Level;
use super::thread::ThreadId;
use crate::config::Ticks;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceKind {
    Enqueued(Level),
    Dequeued(Level),
    PriorityChanged { from: u8, to: u8 },
    BurstUpdated { from: Ticks, add: Ticks, to: Ticks },
    /// `thread` got the CPU; `replaced` had run `ran` ticks.
    Dispatched { replaced: ThreadId, ran: Ticks },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceEvent {
    pub tick: Ticks,
    pub thread: ThreadId,
    pub kind: TraceKind,
}

impl fmt::Display for TraceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (tick, id) = (self.tick, self.thread);
        match self.kind {
            TraceKind::Enqueued(level) => write!(
                f, "[A] Tick [{}]: Thread [{}] is inserted into queue {}", tick, id, level
            ),
            TraceKind::Dequeued(level) => write!(
                f, "[B] Tick [{}]: Thread [{}] is removed from queue {}", tick, id, level
            ),
            TraceKind::PriorityChanged { from, to } => write!(
                f, "[C] Tick [{}]: Thread [{}] changes its priority from [{}] to [{}]", tick, id, from, to
            ),
            TraceKind::BurstUpdated { from, add, to } => write!(
                f,
                "[D] Tick [{}]: Thread [{}] update approximate burst time, from: [{}], add [{}], to [{}]",
                tick, id, from, add, to
            ),
            TraceKind::Dispatched { replaced, ran } => write!(
                f,
                "[E] Tick [{}]: Thread [{}] is now selected for execution, thread [{}] is replaced, and it has executed [{}] ticks",
                tick, id, replaced, ran
            ),
        }
    }
}

bitflags! {
    /// Какие события выводить / Which events to emit
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TraceMask: u8 {
        const ENQUEUE  = 1 << 0;
        const DEQUEUE  = 1 << 1;
        const PRIORITY = 1 << 2;
        const BURST    = 1 << 3;
        const DISPATCH = 1 << 4;
    }
}

impl TraceKind {
    pub fn mask(&self) -> TraceMask {
        match self {
            Self::Enqueued(_) => TraceMask::ENQUEUE,
            Self::Dequeued(_) => TraceMask::DEQUEUE,
            Self::PriorityChanged { .. } => TraceMask::PRIORITY,
            Self::BurstUpdated { .. } => TraceMask::BURST,
            Self::Dispatched { .. } => TraceMask::DISPATCH,
        }
    }
}

/// Приёмник событий, внедряется при создании планировщика.
/// Event sink, injected when the scheduler is built.
pub trait TraceSink: Send {
    fn record(&mut self, event: &TraceEvent);
}

/// Пишет события в `log` (target `mlfq`, уровень debug).
/// Writes events to `log` (target `mlfq`, debug level).
pub struct LogSink {
    mask: TraceMask,
}

impl LogSink {
    pub fn new(mask: TraceMask) -> Self {
        Self { mask }
    }
}

impl Default for LogSink {
    fn default() -> Self {
        Self::new(TraceMask::all())
    }
}

impl TraceSink for LogSink {
    fn record(&mut self, event: &TraceEvent) {
        if self.mask.contains(event.kind.mask()) {
            log::debug!(target: "mlfq", "{}", event);
        }
    }
}

/// Запоминает события; клоны делят один буфер.
/// Keeps events in memory; clones share one buffer.
#[derive(Clone, Default)]
pub struct Recorder {
    events: Arc<Mutex<Vec<TraceEvent>>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<TraceEvent> {
        self.events.lock().clone()
    }

    pub fn take(&self) -> Vec<TraceEvent> {
        core::mem::take(&mut *self.events.lock())
    }

    pub fn kinds_for(&self, thread: ThreadId) -> Vec<TraceKind> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.thread == thread)
            .map(|e| e.kind)
            .collect()
    }
}

impl TraceSink for Recorder {
    fn record(&mut self, event: &TraceEvent) {
        self.events.lock().push(*event);
    }
}

/// Раздать событие нескольким приёмникам / Fan an event out to several sinks
#[derive(Default)]
pub struct Fanout {
    sinks: Vec<Box<dyn TraceSink>>,
}

impl Fanout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: impl TraceSink + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }
}

impl TraceSink for Fanout {
    fn record(&mut self, event: &TraceEvent) {
        for sink in self.sinks.iter_mut() {
            sink.record(event);
        }
    }
}
