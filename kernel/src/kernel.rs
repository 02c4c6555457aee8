//! Ядро — операции в контексте потока / Kernel — thread-context operations
//!
//! Связывает процессор, контроллер прерываний, таймер, будильник и
//! планировщик. Всё, что вызывается «от имени» текущего потока.
//! Wires the CPU, interrupt controller, timer, alarm and scheduler together.
//! Everything here runs on behalf of the current thread.
//!
//! Поток управления один: после `yield_now`/`block` текущим может стать
//! другой поток, и следующие вызовы выполняются уже от его имени.
//! There is one flow of control: after `yield_now`/`block` another thread may
//! be current, and later calls act on its behalf.

use crate::arch::current::interrupt::{InterruptController, IrqKind};
use crate::arch::{Cpu, IntLevel, MachineStatus};
use crate::config::{KernelConfig, Ticks};
use crate::drivers::Timer;
use crate::error::{KernelError, Result};
use crate::sched::alarm::Alarm;
use crate::sched::switch::{ContextSwitch, SimSwitch};
use crate::sched::thread::{Priority, Thread, ThreadId, ThreadStatus};
use crate::sched::trace::{LogSink, TraceSink};
use crate::sched::Scheduler;
use crate::stats::Statistics;

pub struct Kernel {
    cpu: Cpu,
    config: KernelConfig,
    interrupts: InterruptController,
    timer: Timer,
    alarm: Alarm,
    scheduler: Scheduler,
    stats: Statistics,
    next_tid: u64,
    halted: bool,
}

impl Kernel {
    /// Загрузка с выводом событий в `log`.
    /// Boot with trace events going to `log`.
    pub fn boot(config: KernelConfig) -> Self {
        Self::boot_with(config, LogSink::new(config.sched.trace), SimSwitch::default())
    }

    pub fn boot_with(
        config: KernelConfig,
        sink: impl TraceSink + 'static,
        switcher: impl ContextSwitch + 'static,
    ) -> Self {
        let cpu = Cpu::new();
        let _guard = cpu.disable();

        log::info!("[sched] Initializing scheduler (MLFQ)...");
        let mut scheduler = Scheduler::new(cpu.clone(), config.sched)
            .with_sink(sink)
            .with_switch(switcher);
        let priority = match Priority::new(u32::from(config.main_priority)) {
            Ok(p) => p,
            Err(err) => panic!("boot thread: {}", err),
        };
        scheduler.boot(Thread::new(ThreadId(0), "main", priority));

        log::info!("[timer] Starting timer (every {} ticks{})", config.timer.interval,
            if config.timer.randomize { ", randomized" } else { "" });
        let mut timer = Timer::new(config.timer);
        let mut interrupts = InterruptController::new(cpu.clone());
        interrupts.schedule(timer.next_delay(), IrqKind::Timer);

        log::info!("[sched] OK, preemption {:?}", config.sched.preemption);
        drop(_guard);
        cpu.set_level(IntLevel::On);

        Self {
            cpu,
            config,
            interrupts,
            timer,
            alarm: Alarm::new(),
            scheduler,
            stats: Statistics::default(),
            next_tid: 1,
            halted: false,
        }
    }

    pub fn cpu(&self) -> &Cpu {
        &self.cpu
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn stats(&self) -> Statistics {
        self.stats
    }

    pub fn now(&self) -> Ticks {
        self.cpu.now()
    }

    pub fn current(&self) -> Option<ThreadId> {
        self.scheduler.current()
    }

    pub fn thread(&self, id: ThreadId) -> Option<&Thread> {
        self.scheduler.thread(id)
    }

    pub fn halted(&self) -> bool {
        self.halted
    }

    pub fn alarm(&self) -> &Alarm {
        &self.alarm
    }

    // ── Создание / Creation ──────────────────────────────────────────────────

    /// Создать поток и сделать его готовым / Create a thread and make it ready
    pub fn spawn(&mut self, name: &str, priority: u32, estimate: Ticks) -> Result<ThreadId> {
        let priority = Priority::new(priority)?;
        Ok(self.spawn_with(|id| Thread::new(id, name, priority).with_estimate(estimate)))
    }

    /// Как `spawn`, но поток строит вызывающий (например, с адресным пространством).
    /// Like `spawn`, but the caller builds the thread (e.g. with an address space).
    pub fn spawn_with(&mut self, build: impl FnOnce(ThreadId) -> Thread) -> ThreadId {
        let id = ThreadId(self.next_tid);
        self.next_tid += 1;
        let thread = build(id);
        assert_eq!(thread.id(), id, "spawned thread must keep the id it was given");

        let _guard = self.cpu.disable();
        self.scheduler.admit(thread);
        self.make_ready(id);
        id
    }

    // ── Переходы текущего потока / Current thread transitions ────────────────

    /// Уступить процессор, если есть кто-то не хуже.
    /// Give up the CPU if someone at least as good is ready.
    pub fn yield_now(&mut self) {
        let _guard = self.cpu.disable();
        self.yield_current();
    }

    /// Заблокироваться до `wake` / Block until `wake`
    pub fn block(&mut self) -> Result<()> {
        let _guard = self.cpu.disable();
        self.sleep(false)
    }

    /// Завершить текущий поток / Finish the current thread
    pub fn finish(&mut self) -> Result<()> {
        let _guard = self.cpu.disable();
        self.sleep(true)
    }

    /// Разбудить заблокированный поток / Wake a blocked thread
    pub fn wake(&mut self, id: ThreadId) -> Result<()> {
        let _guard = self.cpu.disable();
        self.wake_blocked(id)
    }

    /// Разбудить поток из прерывания через `after` тиков (завершение ввода-вывода).
    /// Wake a thread from an interrupt `after` ticks from now (I/O completion).
    pub fn schedule_wakeup(&mut self, id: ThreadId, after: Ticks) -> Result<Ticks> {
        if self.scheduler.thread(id).is_none() {
            return Err(KernelError::NoSuchThread(id));
        }
        let _guard = self.cpu.disable();
        Ok(self.interrupts.schedule(after, IrqKind::Wakeup(id)))
    }

    /// Исполнять пользовательский код (тик = `user_tick`) или код ядра.
    /// Run user code (tick = `user_tick`) or kernel code.
    pub fn set_user_mode(&mut self, user: bool) {
        self.cpu.set_status(if user { MachineStatus::User } else { MachineStatus::System });
    }

    // ── Время / Time ─────────────────────────────────────────────────────────

    /// Продвинуть часы на один шаг, обслужить прерывания, затем уже в
    /// контексте потока выполнить отложенный yield.
    /// Advance the clock one step and service interrupts. A yield requested by
    /// a handler is carried out afterwards, back in thread context.
    pub fn one_tick(&mut self) -> Result<()> {
        if self.halted {
            return Err(KernelError::Halted);
        }
        let status = self.cpu.status();
        let step = match status {
            MachineStatus::User => self.config.user_tick,
            _ => self.config.system_tick,
        };
        self.cpu.advance(step);
        self.stats.account(status, step);

        if self.cpu.level() == IntLevel::Off {
            // masked: interrupts stay pending until re-enabled
            return Ok(());
        }
        {
            let _guard = self.cpu.disable();
            self.service_due();
        }

        if self.cpu.take_yield_request() {
            let _guard = self.cpu.disable();
            self.cpu.set_status(MachineStatus::System);
            self.yield_current();
            self.cpu.set_status(status);
        }
        Ok(())
    }

    /// Тикать, пока часы не дойдут до `tick`.
    /// Tick until the clock reaches `tick`.
    pub fn run_until(&mut self, tick: Ticks) -> Result<()> {
        while self.cpu.now() < tick {
            self.one_tick()?;
        }
        Ok(())
    }

    pub fn print(&self) {
        self.scheduler.print();
        log::info!("{}", self.stats);
    }

    // ── Внутреннее; прерывания выключены / Internal; interrupts off ──────────

    fn make_ready(&mut self, id: ThreadId) {
        self.scheduler.ready_to_run(id);
        if self.scheduler.check_preemptive(id) {
            if self.cpu.in_handler() {
                self.cpu.yield_on_return();
            } else {
                self.yield_current();
            }
        }
    }

    fn wake_blocked(&mut self, id: ThreadId) -> Result<()> {
        let status = match self.scheduler.thread(id) {
            Some(t) => t.status(),
            None => return Err(KernelError::NoSuchThread(id)),
        };
        if status != ThreadStatus::Blocked {
            return Err(KernelError::NotBlocked { id, status });
        }
        self.make_ready(id);
        Ok(())
    }

    /// Текущий поток — обратно в очередь; запустить лучший.
    /// Requeue the current thread; run the best one.
    fn yield_current(&mut self) {
        self.cpu.assert_interrupts_off("yield");
        let Some(cur) = self.scheduler.current() else { return };
        let now = self.cpu.now();
        self.scheduler.thread_mut(cur).charge(now);
        self.scheduler.ready_to_run(cur);

        match self.scheduler.find_next_to_run() {
            Some(next) if next == cur => self.scheduler.resume_current(cur),
            Some(next) => self.scheduler.run(next, false, false),
            None => panic!("yield: thread {} vanished from the ready queues", cur),
        }
    }

    /// Отдать процессор навсегда (`finishing`) или до пробуждения.
    /// Give up the CPU for good (`finishing`) or until woken.
    fn sleep(&mut self, finishing: bool) -> Result<()> {
        self.cpu.assert_interrupts_off("sleep");
        let Some(cur) = self.scheduler.current() else { return Err(KernelError::Halted) };
        let now = self.cpu.now();

        let thread = self.scheduler.thread_mut(cur);
        thread.charge(now);
        if !finishing {
            thread.status = ThreadStatus::Blocked;
            let (from, add, to) = thread.update_estimate();
            self.scheduler.record_burst_update(cur, from, add, to);
        }

        let next = loop {
            if let Some(next) = self.scheduler.find_next_to_run() {
                break next;
            }
            self.idle()?;
        };
        if next == cur {
            // woken while idle: nobody else ran in between
            self.scheduler.thread_mut(cur).consumed_burst = 0;
            self.scheduler.resume_current(cur);
        } else {
            self.scheduler.run(next, finishing, true);
        }
        Ok(())
    }

    /// Простой: перемотать часы к следующему прерыванию. Если разбудить
    /// некому — останов.
    /// Idle: fast-forward to the next interrupt. Halt if nothing can ever
    /// wake anyone.
    fn idle(&mut self) -> Result<()> {
        let previous = self.cpu.status();
        self.cpu.set_status(MachineStatus::Idle);

        if !self.interrupts.has_device_pending() {
            self.halted = true;
            log::info!("[kernel] No threads ready or runnable, and no pending interrupts.");
            log::info!("[kernel] Machine halting! {}", self.stats);
            return Err(KernelError::Halted);
        }

        if let Some(when) = self.interrupts.next_due_at() {
            let now = self.cpu.now();
            if when > now {
                self.cpu.advance_to(when);
                self.stats.account(MachineStatus::Idle, when - now);
            }
        }
        self.service_due();
        // nobody is running: a yield request raised while idle means nothing
        self.cpu.take_yield_request();
        self.cpu.set_status(previous);
        Ok(())
    }

    fn service_due(&mut self) {
        self.cpu.set_in_handler(true);
        while let Some(irq) = self.interrupts.pop_due() {
            self.stats.interrupts += 1;
            match irq {
                IrqKind::Timer => {
                    self.alarm.callback(&self.cpu, &mut self.scheduler);
                    let delay = self.timer.next_delay();
                    self.interrupts.schedule(delay, IrqKind::Timer);
                }
                IrqKind::Wakeup(id) => {
                    if let Err(err) = self.wake_blocked(id) {
                        log::warn!("[irq] wakeup of thread {} dropped: {}", id, err);
                    }
                }
            }
        }
        self.cpu.set_in_handler(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Preemption;
    use crate::sched::queue::Level;
    use crate::sched::trace::{Recorder, TraceKind};

    fn boot(preemption: Preemption) -> (Kernel, Recorder) {
        let mut config = KernelConfig::default();
        config.sched.preemption = preemption;
        let rec = Recorder::new();
        (Kernel::boot_with(config, rec.clone(), SimSwitch::default()), rec)
    }

    #[test]
    fn boot_leaves_interrupts_on_and_main_running() {
        let (k, _) = boot(Preemption::AtTick);
        assert_eq!(k.cpu().level(), IntLevel::On);
        assert_eq!(k.current(), Some(ThreadId(0)));
        assert_eq!(k.thread(ThreadId(0)).unwrap().status(), ThreadStatus::Running);
    }

    #[test]
    #[should_panic(expected = "invalid priority 150")]
    fn boot_rejects_bad_main_priority() {
        let config = KernelConfig { main_priority: 150, ..KernelConfig::default() };
        Kernel::boot(config);
    }

    #[test]
    fn spawn_rejects_bad_priority() {
        let (mut k, _) = boot(Preemption::AtTick);
        assert_eq!(k.spawn("x", 150, 0), Err(KernelError::InvalidPriority(150)));
    }

    #[test]
    fn timer_tick_switches_to_higher_class() {
        let (mut k, _) = boot(Preemption::AtTick);
        let hi = k.spawn("hi", 80, 0).unwrap();
        assert_eq!(k.current(), Some(ThreadId(0)));
        k.run_until(100).unwrap();
        assert_eq!(k.current(), Some(hi));
        assert_eq!(k.scheduler().queue_of(ThreadId(0)), Some(Level::L3));
        assert_eq!(k.alarm().fired(), 1);
    }

    #[test]
    fn immediate_policy_switches_on_spawn() {
        let (mut k, _) = boot(Preemption::Immediate);
        let hi = k.spawn("hi", 120, 10).unwrap();
        assert_eq!(k.current(), Some(hi));
        let low = k.spawn("low", 60, 0).unwrap();
        assert_eq!(k.current(), Some(hi));
        assert_eq!(k.scheduler().queue_of(low), Some(Level::L2));
    }

    #[test]
    fn best_thread_keeps_cpu_across_ticks() {
        let (mut k, rec) = boot(Preemption::AtTick);
        k.run_until(300).unwrap();
        assert_eq!(k.current(), Some(ThreadId(0)));
        // three ticks, each requeues then re-dispatches main without a switch
        assert!(rec.events().iter().all(|e| !matches!(e.kind, TraceKind::Dispatched { .. })));
        assert_eq!(k.thread(ThreadId(0)).unwrap().consumed_burst(), 300);
    }

    #[test]
    fn block_and_wake_cycle_updates_estimate() {
        let (mut k, rec) = boot(Preemption::AtTick);
        let worker = k.spawn("worker", 30, 0).unwrap();
        k.run_until(100).unwrap();
        // FIFO in L3: the tick rotated main behind the worker
        assert_eq!(k.current(), Some(worker));
        k.run_until(140).unwrap();
        k.block().unwrap();
        assert_eq!(k.current(), Some(ThreadId(0)));
        let w = k.thread(worker).unwrap();
        assert_eq!(w.status(), ThreadStatus::Blocked);
        assert_eq!(w.consumed_burst(), 0);
        assert_eq!(w.estimated_burst(), 20);
        assert!(rec.kinds_for(worker).contains(&TraceKind::BurstUpdated { from: 0, add: 40, to: 20 }));

        k.wake(worker).unwrap();
        assert_eq!(k.scheduler().queue_of(worker), Some(Level::L3));
        assert_eq!(
            k.wake(worker),
            Err(KernelError::NotBlocked { id: worker, status: ThreadStatus::Ready })
        );
    }

    #[test]
    fn last_thread_blocking_with_nothing_pending_halts() {
        let (mut k, _) = boot(Preemption::AtTick);
        assert_eq!(k.block(), Err(KernelError::Halted));
        assert!(k.halted());
        assert_eq!(k.one_tick(), Err(KernelError::Halted));
    }

    #[test]
    fn idle_fast_forwards_to_wakeup() {
        let (mut k, _) = boot(Preemption::AtTick);
        k.schedule_wakeup(ThreadId(0), 1000).unwrap();
        k.block().unwrap();
        // main woke itself up through the device interrupt and was redispatched
        assert_eq!(k.current(), Some(ThreadId(0)));
        assert_eq!(k.now(), 1000);
        assert!(k.stats().idle_ticks >= 900);
    }

    #[test]
    fn finish_destroys_after_switch() {
        let (mut k, _) = boot(Preemption::AtTick);
        let t = k.spawn("t", 10, 0).unwrap();
        k.finish().unwrap();
        assert_eq!(k.current(), Some(t));
        assert!(k.thread(ThreadId(0)).is_none());
        assert_eq!(k.scheduler().pending_destruction(), None);
    }
}
