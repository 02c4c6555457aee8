//! Scheduler — трёхуровневая очередь с обратной связью / three-level feedback queue
//!
//! Очереди / Queues:
//!   L1 100–149 — SJF по оставшейся оценке  / shortest remaining estimate first
//!   L2  50–99  — по убыванию приоритета     / highest priority first
//!   L3   0–49  — FIFO
//!
//! Старение: каждые 1500 тиков ожидания дают +10 к приоритету.
//! Aging: every 1500 ticks spent waiting earns +10 priority.
//!
//! Взаимное исключение — только выключенными прерываниями: блокирующая
//! блокировка здесь снова вошла бы в планировщик.
//! Mutual exclusion comes only from disabled interrupts: a blocking lock
//! here would re-enter the scheduler.

pub mod alarm;
pub mod predict;
pub mod queue;
pub mod switch;
pub mod thread;
pub mod trace;

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use core::fmt;

use crate::arch::Cpu;
use crate::config::{SchedConfig, Preemption, Ticks};
use crate::stats::SchedStats;

use self::queue::{Level, ReadyQueue};
use self::switch::{ContextSwitch, SimSwitch};
use self::thread::{Thread, ThreadId, ThreadStatus};
use self::trace::{LogSink, TraceEvent, TraceKind, TraceSink};

pub struct Scheduler {
    cpu: Cpu,
    config: SchedConfig,
    threads: BTreeMap<ThreadId, Thread>,
    queues: [ReadyQueue; 3],
    current: Option<ThreadId>,
    to_be_destroyed: Option<ThreadId>,
    switcher: Box<dyn ContextSwitch>,
    sink: Box<dyn TraceSink>,
    seq: u64,
    stats: SchedStats,
}

impl Scheduler {
    /// Пустой планировщик: нет готовых потоков.
    /// Empty scheduler: no ready threads.
    pub fn new(cpu: Cpu, config: SchedConfig) -> Self {
        Self {
            cpu,
            config,
            threads: BTreeMap::new(),
            queues: [
                ReadyQueue::new(Level::L1),
                ReadyQueue::new(Level::L2),
                ReadyQueue::new(Level::L3),
            ],
            current: None,
            to_be_destroyed: None,
            switcher: Box::new(SimSwitch::default()),
            sink: Box::new(LogSink::new(config.trace)),
            seq: 0,
            stats: SchedStats::default(),
        }
    }

    pub fn with_sink(mut self, sink: impl TraceSink + 'static) -> Self {
        self.sink = Box::new(sink);
        self
    }

    pub fn with_switch(mut self, switcher: impl ContextSwitch + 'static) -> Self {
        self.switcher = Box::new(switcher);
        self
    }

    // ── Реестр потоков / Thread table ────────────────────────────────────────

    /// Принять созданный снаружи поток. Очередь он получит в `ready_to_run`.
    /// Take in a thread built elsewhere. It gets a queue in `ready_to_run`.
    pub fn admit(&mut self, thread: Thread) -> ThreadId {
        let id = thread.id();
        let prev = self.threads.insert(id, thread);
        assert!(prev.is_none(), "thread {} admitted twice", id);
        id
    }

    /// Сделать поток текущим без переключения (поток загрузки).
    /// Make a thread current without a switch (the boot thread).
    pub fn boot(&mut self, thread: Thread) -> ThreadId {
        self.cpu.assert_interrupts_off("boot");
        assert!(self.current.is_none(), "scheduler already booted");
        let now = self.cpu.now();
        let id = self.admit(thread);
        let t = self.thread_mut(id);
        t.status = ThreadStatus::Running;
        t.start_time = now;
        self.current = Some(id);
        id
    }

    pub fn current(&self) -> Option<ThreadId> {
        self.current
    }

    pub fn current_thread(&self) -> Option<&Thread> {
        self.current.and_then(|id| self.threads.get(&id))
    }

    pub fn thread(&self, id: ThreadId) -> Option<&Thread> {
        self.threads.get(&id)
    }

    #[track_caller]
    pub(crate) fn thread_mut(&mut self, id: ThreadId) -> &mut Thread {
        match self.threads.get_mut(&id) {
            Some(t) => t,
            None => panic!("unknown thread {}", id),
        }
    }

    pub fn thread_count(&self) -> usize {
        self.threads.len()
    }

    pub fn pending_destruction(&self) -> Option<ThreadId> {
        self.to_be_destroyed
    }

    pub fn stats(&self) -> SchedStats {
        self.stats
    }

    pub fn config(&self) -> &SchedConfig {
        &self.config
    }

    // ── Очереди / Queues ─────────────────────────────────────────────────────

    /// В какой очереди поток (если в какой-то) / Which queue holds the thread, if any
    pub fn queue_of(&self, id: ThreadId) -> Option<Level> {
        self.queues.iter().find(|q| q.contains(id)).map(|q| q.level())
    }

    pub fn queue(&self, level: Level) -> &ReadyQueue {
        &self.queues[level.index()]
    }

    pub fn has_ready(&self) -> bool {
        self.queues.iter().any(|q| !q.is_empty())
    }

    fn record(&mut self, thread: ThreadId, kind: TraceKind) {
        let event = TraceEvent { tick: self.cpu.now(), thread, kind };
        self.sink.record(&event);
    }

    /// Отметить поток готовым и поставить в очередь по его приоритету.
    /// Mark a thread ready and queue it by its priority.
    pub fn ready_to_run(&mut self, id: ThreadId) {
        self.cpu.assert_interrupts_off("ready_to_run");
        let now = self.cpu.now();
        self.seq += 1;
        let seq = self.seq;

        let thread = match self.threads.get_mut(&id) {
            Some(t) => t,
            None => panic!("ready_to_run: unknown thread {}", id),
        };
        assert!(
            thread.status != ThreadStatus::Ready && thread.status != ThreadStatus::Finished,
            "ready_to_run: thread {} is already {}",
            id,
            thread.status
        );
        thread.status = ThreadStatus::Ready;
        thread.wait_since = now;
        let level = thread.level();
        self.queues[level.index()].insert(thread, seq);

        self.stats.enqueues += 1;
        self.record(id, TraceKind::Enqueued(level));
    }

    /// Вынуть следующий поток: сначала L1, потом L2, потом L3.
    /// Take the next thread to run: L1 first, then L2, then L3.
    pub fn find_next_to_run(&mut self) -> Option<ThreadId> {
        self.cpu.assert_interrupts_off("find_next_to_run");

        let (level, id) = self
            .queues
            .iter_mut()
            .find_map(|q| q.pop_front().map(|(_, id)| (q.level(), id)))?;

        self.thread_mut(id).waiting_time = 0;
        self.record(id, TraceKind::Dequeued(level));
        Some(id)
    }

    /// Отдать процессор `next`.
    /// Dispatch the CPU to `next`.
    ///
    /// The outgoing thread's status must already be set by the caller
    /// (ready or blocked) unless `finishing`. A finishing thread is parked in
    /// the single pending-destruction slot and freed after the switch, once
    /// nothing runs on its stack any more. `reset_burst` zeroes the outgoing
    /// thread's consumed burst (voluntary sleep).
    pub fn run(&mut self, next: ThreadId, finishing: bool, reset_burst: bool) {
        self.cpu.assert_interrupts_off("run");
        let old = match self.current {
            Some(id) => id,
            None => panic!("run: no current thread"),
        };
        assert!(old != next, "run: thread {} switching to itself", old);
        assert!(
            self.queue_of(next).is_none(),
            "run: thread {} is still queued; dequeue it with find_next_to_run",
            next
        );
        let now = self.cpu.now();

        if finishing {
            assert!(
                self.to_be_destroyed.is_none(),
                "run: thread {} finishing while {:?} still awaits destruction",
                old,
                self.to_be_destroyed
            );
            self.to_be_destroyed = Some(old);
        }

        let cpu = self.cpu.clone();
        let outgoing = self.thread_mut(old);
        if finishing {
            outgoing.status = ThreadStatus::Finished;
        }
        if outgoing.has_space() {
            outgoing.save_user_state(&cpu);
        }
        outgoing.check_overflow();
        let ran = outgoing.consumed_burst;

        let incoming = self.thread_mut(next);
        incoming.start_time = now;
        incoming.status = ThreadStatus::Running;
        self.current = Some(next);

        self.record(next, TraceKind::Dispatched { replaced: old, ran });

        if reset_burst {
            self.thread_mut(old).consumed_burst = 0;
        }
        self.stats.dispatches += 1;

        log::trace!("[sched] switching from {} to {}", old, next);
        self.switcher.switch(&self.threads[&old], &self.threads[&next]);

        // снова здесь; прерывания всё ещё выключены
        // back here; interrupts are still off
        self.cpu.assert_interrupts_off("run (after switch)");
        self.check_to_be_destroyed();

        if let Some(running) = self.current {
            let thread = self.thread_mut(running);
            if thread.has_space() {
                thread.restore_user_state(&cpu);
            }
        }
    }

    /// Освободить поток, завершившийся до последнего переключения.
    /// Free the thread that finished before the last switch.
    fn check_to_be_destroyed(&mut self) {
        if let Some(id) = self.to_be_destroyed.take() {
            assert!(self.current != Some(id), "destroying the running thread {}", id);
            match self.threads.remove(&id) {
                Some(thread) => {
                    log::debug!("[sched] thread {} ({}) destroyed", id, thread.name());
                    self.stats.destroyed += 1;
                }
                None => panic!("thread {} destroyed twice", id),
            }
        }
    }

    /// Старение: начислить ожидание, повысить приоритеты, пересобрать очереди.
    /// Aging: credit waiting time, boost priorities, rebuild the queues.
    pub fn aging(&mut self) {
        self.cpu.assert_interrupts_off("aging");
        let now = self.cpu.now();
        let threshold = self.config.aging_threshold;
        let step = self.config.aging_boost;

        let mut queued: Vec<(u64, ThreadId)> = Vec::new();
        for q in self.queues.iter_mut() {
            queued.extend(q.drain());
        }

        for (seq, id) in queued {
            let thread = match self.threads.get_mut(&id) {
                Some(t) => t,
                None => panic!("aging: queued thread {} is gone", id),
            };
            thread.waiting_time += now.saturating_sub(thread.wait_since);
            thread.wait_since = now;

            while thread.waiting_time >= threshold {
                let from = thread.priority;
                thread.priority = from.boosted(step);
                thread.waiting_time -= threshold;
                if thread.priority != from {
                    self.stats.boosts += 1;
                    let event = TraceEvent {
                        tick: now,
                        thread: id,
                        kind: TraceKind::PriorityChanged { from: from.get(), to: thread.priority.get() },
                    };
                    self.sink.record(&event);
                }
            }

            let level = thread.level();
            self.queues[level.index()].insert(thread, seq);
        }
        self.stats.aging_passes += 1;
    }

    /// Вытесняет ли новый готовый поток текущий (таблица классов).
    /// Whether a newly ready thread dominates the running one (class table).
    pub fn dominates(&self, entrant: ThreadId) -> bool {
        let Some(running) = self.current_thread() else { return false };
        if running.id() == entrant || running.status != ThreadStatus::Running {
            return false;
        }
        let Some(new) = self.threads.get(&entrant) else { return false };

        match (running.level(), new.level()) {
            (Level::L3, Level::L1 | Level::L2) => true,
            (Level::L2, Level::L1) => true,
            (Level::L1, Level::L1) => {
                // the running thread's remaining estimate includes the slice in progress
                let elapsed = self.cpu.now().saturating_sub(running.start_time);
                let left = running.remaining_estimate().saturating_sub(elapsed);
                new.remaining_estimate() < left
            }
            _ => false,
        }
    }

    /// Нужно ли немедленно вытеснить текущий поток ради `entrant`.
    /// Whether `entrant` should take the CPU right away.
    ///
    /// Gated by the preemption policy; with `Preemption::AtTick` the answer is
    /// always no and the next timer tick re-evaluates instead.
    pub fn check_preemptive(&self, entrant: ThreadId) -> bool {
        self.cpu.assert_interrupts_off("check_preemptive");
        self.config.preemption == Preemption::Immediate && self.dominates(entrant)
    }

    /// Вывести содержимое очередей / Print queue contents
    pub fn print(&self) {
        for line in alloc::format!("{}", self).lines() {
            log::info!("{}", line);
        }
    }

    /// Forget time a running thread has already been charged for; used when
    /// it keeps the CPU after a re-evaluation.
    pub(crate) fn resume_current(&mut self, id: ThreadId) {
        let now = self.cpu.now();
        let thread = self.thread_mut(id);
        thread.status = ThreadStatus::Running;
        thread.start_time = now;
    }

    pub(crate) fn record_burst_update(&mut self, id: ThreadId, from: Ticks, add: Ticks, to: Ticks) {
        self.record(id, TraceKind::BurstUpdated { from, add, to });
    }
}

impl fmt::Display for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Ready list contents:")?;
        for q in self.queues.iter() {
            write!(f, "  {}:", q.level())?;
            for id in q.ids() {
                let t = &self.threads[&id];
                match q.level() {
                    Level::L1 => write!(f, " {}(rem={})", id, t.remaining_estimate())?,
                    Level::L2 => write!(f, " {}(pri={})", id, t.priority())?,
                    Level::L3 => write!(f, " {}", id)?,
                }
            }
            writeln!(f)?;
        }
        if let Some(cur) = self.current_thread() {
            writeln!(f, "  running: {} ({}, pri={})", cur.id(), cur.name(), cur.priority())?;
        }
        Ok(())
    }
}
