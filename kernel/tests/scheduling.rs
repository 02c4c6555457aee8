//! Сквозные тесты планировщика / End-to-end scheduler tests

use std::sync::{Arc, Mutex};

use mlfq_kernel::arch::Cpu;
use mlfq_kernel::sched::queue::Level;
use mlfq_kernel::sched::switch::{ContextSwitch, SimSwitch};
use mlfq_kernel::sched::thread::{AddressSpace, Priority, Thread, ThreadId, ThreadStatus};
use mlfq_kernel::sched::trace::{Recorder, TraceKind};
use mlfq_kernel::{Kernel, KernelConfig, KernelError, Preemption, SchedConfig, Scheduler};
use proptest::prelude::*;

const MAIN: ThreadId = ThreadId(0);

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn scheduler() -> (Cpu, Scheduler, Recorder) {
    init_logging();
    let cpu = Cpu::new();
    let rec = Recorder::new();
    let mut s = Scheduler::new(cpu.clone(), SchedConfig::default()).with_sink(rec.clone());
    s.boot(Thread::new(MAIN, "main", Priority::new(0).unwrap()));
    (cpu, s, rec)
}

fn make_ready(s: &mut Scheduler, id: u64, priority: u32, estimate: u64) -> ThreadId {
    let t = Thread::new(ThreadId(id), "t", Priority::new(priority).unwrap()).with_estimate(estimate);
    let id = s.admit(t);
    s.ready_to_run(id);
    id
}

fn occurrences(s: &Scheduler, id: ThreadId) -> usize {
    Level::ALL.iter().filter(|&&l| s.queue(l).contains(id)).count()
}

fn kernel(preemption: Preemption) -> (Kernel, Recorder) {
    init_logging();
    let config = KernelConfig {
        sched: SchedConfig { preemption, ..SchedConfig::default() },
        ..KernelConfig::default()
    };
    let rec = Recorder::new();
    (Kernel::boot_with(config, rec.clone(), SimSwitch::default()), rec)
}

// ── Выбор следующего / Picking the next thread ───────────────────────────────

#[test]
fn highest_class_wins_regardless_of_arrival() {
    let (_, mut s, _) = scheduler();
    make_ready(&mut s, 1, 30, 0);
    make_ready(&mut s, 2, 80, 0);
    let top = make_ready(&mut s, 3, 120, 0);
    assert_eq!(s.find_next_to_run(), Some(top));
}

#[test]
fn shortest_remaining_estimate_wins_in_l1() {
    let (_, mut s, _) = scheduler();
    make_ready(&mut s, 1, 140, 5);
    let short = make_ready(&mut s, 2, 101, 3);
    assert_eq!(s.find_next_to_run(), Some(short));
    assert_eq!(s.find_next_to_run(), Some(ThreadId(1)));
}

#[test]
fn l2_orders_by_priority_and_l3_by_arrival() {
    let (_, mut s, _) = scheduler();
    let a = make_ready(&mut s, 1, 10, 0);
    let b = make_ready(&mut s, 2, 40, 0);
    let lo = make_ready(&mut s, 3, 55, 0);
    let hi = make_ready(&mut s, 4, 99, 0);
    let order: Vec<_> = std::iter::from_fn(|| s.find_next_to_run()).collect();
    assert_eq!(order, [hi, lo, a, b]);
}

#[test]
fn dispatch_forgets_waiting_time() {
    let (cpu, mut s, _) = scheduler();
    let id = make_ready(&mut s, 1, 60, 0);
    cpu.advance(700);
    s.aging();
    assert_eq!(s.thread(id).unwrap().waiting_time(), 700);
    assert_eq!(s.find_next_to_run(), Some(id));
    assert_eq!(s.thread(id).unwrap().waiting_time(), 0);
}

proptest! {
    #[test]
    fn ready_thread_sits_in_exactly_its_band(priority in 0u32..=149, estimate in 0u64..10_000) {
        let (_, mut s, _) = scheduler();
        let id = make_ready(&mut s, 1, priority, estimate);
        let expected = match priority {
            100..=149 => Level::L1,
            50..=99 => Level::L2,
            _ => Level::L3,
        };
        prop_assert_eq!(s.queue_of(id), Some(expected));
        prop_assert_eq!(occurrences(&s, id), 1);
    }

    #[test]
    fn l1_front_has_minimum_remaining(estimates in proptest::collection::vec(0u64..500, 1..12)) {
        let (_, mut s, _) = scheduler();
        for (i, est) in estimates.iter().enumerate() {
            make_ready(&mut s, i as u64 + 1, 100 + (i as u32 % 50), *est);
        }
        let best = *estimates.iter().min().unwrap();
        let picked = s.find_next_to_run().unwrap();
        prop_assert_eq!(s.thread(picked).unwrap().remaining_estimate(), best);
    }
}

// ── Старение / Aging ─────────────────────────────────────────────────────────

#[test]
fn long_wait_in_l3_earns_boosts_over_two_passes() {
    let (cpu, mut s, _) = scheduler();
    let id = make_ready(&mut s, 1, 0, 0);

    cpu.advance(1600);
    s.aging();
    let t = s.thread(id).unwrap();
    assert_eq!(t.priority().get(), 10);
    assert_eq!(t.waiting_time(), 100);

    cpu.advance(1500);
    s.aging();
    assert_eq!(s.thread(id).unwrap().priority().get(), 20);
}

#[test]
fn one_pass_applies_every_earned_boost() {
    let (cpu, mut s, rec) = scheduler();
    let id = make_ready(&mut s, 1, 20, 0);
    rec.take();
    cpu.advance(4600);
    s.aging();
    let t = s.thread(id).unwrap();
    assert_eq!(t.priority().get(), 50);
    assert_eq!(t.waiting_time(), 100);
    assert_eq!(s.queue_of(id), Some(Level::L2));
    assert_eq!(
        rec.kinds_for(id),
        [
            TraceKind::PriorityChanged { from: 20, to: 30 },
            TraceKind::PriorityChanged { from: 30, to: 40 },
            TraceKind::PriorityChanged { from: 40, to: 50 },
        ]
    );
}

#[test]
fn boost_across_band_edge_moves_thread() {
    let (cpu, mut s, _) = scheduler();
    let upper = make_ready(&mut s, 1, 95, 0);
    let lower = make_ready(&mut s, 2, 45, 0);
    cpu.advance(1500);
    s.aging();

    assert_eq!(s.thread(upper).unwrap().priority().get(), 105);
    assert_eq!(s.queue_of(upper), Some(Level::L1));
    assert_eq!(occurrences(&s, upper), 1);

    assert_eq!(s.thread(lower).unwrap().priority().get(), 55);
    assert_eq!(s.queue_of(lower), Some(Level::L2));
    assert_eq!(occurrences(&s, lower), 1);
}

#[test]
fn aging_keeps_fifo_order_among_equals() {
    let (cpu, mut s, _) = scheduler();
    let first = make_ready(&mut s, 1, 5, 0);
    cpu.advance(10);
    let second = make_ready(&mut s, 2, 5, 0);
    cpu.advance(100);
    s.aging();
    assert_eq!(s.queue(Level::L3).ids(), [first, second]);
}

// ── Переключение / Dispatch ──────────────────────────────────────────────────

/// Switch observing both threads at the moment of transfer.
#[derive(Clone, Default)]
struct Witness {
    seen: Arc<Mutex<Vec<(ThreadId, ThreadStatus, ThreadId, ThreadStatus)>>>,
}

impl ContextSwitch for Witness {
    fn switch(&mut self, from: &Thread, to: &Thread) {
        self.seen.lock().unwrap().push((from.id(), from.status(), to.id(), to.status()));
    }
}

#[test]
fn finishing_thread_outlives_the_switch() {
    init_logging();
    let cpu = Cpu::new();
    let witness = Witness::default();
    let mut s = Scheduler::new(cpu.clone(), SchedConfig::default()).with_switch(witness.clone());
    s.boot(Thread::new(MAIN, "main", Priority::new(0).unwrap()));
    let next = make_ready(&mut s, 1, 60, 0);

    assert_eq!(s.find_next_to_run(), Some(next));
    s.run(next, true, true);

    assert_eq!(
        *witness.seen.lock().unwrap(),
        [(MAIN, ThreadStatus::Finished, next, ThreadStatus::Running)]
    );
    assert!(s.thread(MAIN).is_none());
    assert_eq!(s.thread(next).unwrap().status(), ThreadStatus::Running);
    assert_eq!(s.current(), Some(next));
    assert_eq!(s.pending_destruction(), None);
}

#[test]
fn dispatch_emits_events_in_order() {
    let (cpu, mut s, rec) = scheduler();
    let id = make_ready(&mut s, 1, 60, 0);
    cpu.advance(30);
    s.ready_to_run(MAIN);
    let next = s.find_next_to_run().unwrap();
    s.run(next, false, false);

    let kinds: Vec<_> = rec.events().into_iter().map(|e| (e.thread, e.kind)).collect();
    assert_eq!(
        kinds,
        [
            (id, TraceKind::Enqueued(Level::L2)),
            (MAIN, TraceKind::Enqueued(Level::L3)),
            (id, TraceKind::Dequeued(Level::L2)),
            (id, TraceKind::Dispatched { replaced: MAIN, ran: 0 }),
        ]
    );
}

struct Space {
    log: Arc<Mutex<Vec<&'static str>>>,
}

impl AddressSpace for Space {
    fn save_state(&mut self) {
        self.log.lock().unwrap().push("save");
    }

    fn restore_state(&mut self) {
        self.log.lock().unwrap().push("restore");
    }
}

#[test]
fn user_state_follows_the_thread() {
    let (cpu, mut s, _) = scheduler();
    let log = Arc::new(Mutex::new(Vec::new()));
    let user = Thread::new(ThreadId(1), "user", Priority::new(10).unwrap())
        .with_space(Box::new(Space { log: log.clone() }));
    let user = s.admit(user);
    s.ready_to_run(user);

    assert_eq!(s.find_next_to_run(), Some(user));
    s.ready_to_run(MAIN);
    s.run(user, false, false);
    cpu.write_register(3, 77);

    s.ready_to_run(user);
    assert_eq!(s.find_next_to_run(), Some(MAIN));
    s.run(MAIN, false, false);

    assert_eq!(*log.lock().unwrap(), ["restore", "save"]);
    assert_eq!(s.thread(user).unwrap().user_registers()[3], 77);
}

// ── Ядро целиком / Whole kernel ──────────────────────────────────────────────

#[test]
fn timer_yield_is_deferred_to_thread_context() {
    let (mut k, _) = kernel(Preemption::AtTick);
    let hi = k.spawn("hi", 80, 0).unwrap();
    k.run_until(90).unwrap();
    assert_eq!(k.current(), Some(MAIN));
    k.one_tick().unwrap();
    assert_eq!(k.now(), 100);
    assert_eq!(k.current(), Some(hi));
    assert!(!k.cpu().yield_requested());
}

#[test]
fn wakeup_of_l1_thread_preempts_immediately() {
    let (mut k, _) = kernel(Preemption::Immediate);
    let io = k.spawn("io", 120, 10).unwrap();
    assert_eq!(k.current(), Some(io));

    k.block().unwrap();
    assert_eq!(k.current(), Some(MAIN));
    k.schedule_wakeup(io, 50).unwrap();
    k.run_until(50).unwrap();
    assert_eq!(k.current(), Some(io));
}

#[test]
fn wakeup_waits_for_tick_without_immediate_preemption() {
    let (mut k, _) = kernel(Preemption::AtTick);
    let io = k.spawn("io", 120, 10).unwrap();
    k.run_until(100).unwrap();
    assert_eq!(k.current(), Some(io));

    k.block().unwrap();
    k.schedule_wakeup(io, 50).unwrap();
    k.run_until(160).unwrap();
    assert_eq!(k.current(), Some(MAIN));
    assert_eq!(k.scheduler().queue_of(io), Some(Level::L1));

    k.run_until(200).unwrap();
    assert_eq!(k.current(), Some(io));
}

#[test]
fn starving_thread_climbs_out_of_l3() {
    let (mut k, _) = kernel(Preemption::AtTick);
    // keeps the CPU: L2 beats L3 at every tick
    let hog = k.spawn("hog", 60, 0).unwrap();
    let starved = k.spawn("starved", 45, 0).unwrap();
    k.run_until(1600).unwrap();
    assert_eq!(k.current(), Some(hog));
    let t = k.thread(starved).unwrap();
    assert_eq!(t.priority().get(), 55);
    assert_eq!(k.scheduler().queue_of(starved), Some(Level::L2));
}

#[test]
fn wake_errors() {
    let (mut k, _) = kernel(Preemption::AtTick);
    assert_eq!(k.wake(ThreadId(42)), Err(KernelError::NoSuchThread(ThreadId(42))));
    assert_eq!(
        k.wake(MAIN),
        Err(KernelError::NotBlocked { id: MAIN, status: ThreadStatus::Running })
    );
    assert_eq!(k.schedule_wakeup(ThreadId(42), 5), Err(KernelError::NoSuchThread(ThreadId(42))));
}

#[test]
fn machine_halts_when_last_thread_finishes() {
    let (mut k, _) = kernel(Preemption::AtTick);
    let t = k.spawn("t", 30, 0).unwrap();
    k.finish().unwrap();
    assert_eq!(k.current(), Some(t));
    assert_eq!(k.finish(), Err(KernelError::Halted));
    assert!(k.halted());
    assert_eq!(k.scheduler().stats().destroyed, 1);
}

#[test]
fn boot_thread_retires_after_preempting_spawns() {
    let (mut k, _) = kernel(Preemption::Immediate);
    let editor = k.spawn("editor", 120, 20).unwrap();
    let shell = k.spawn("shell", 105, 40).unwrap();

    // the first L1 entrant took the CPU from the boot thread at once
    assert_eq!(k.current(), Some(editor));
    assert_eq!(k.thread(MAIN).unwrap().status(), ThreadStatus::Ready);
    assert_eq!(k.scheduler().queue_of(MAIN), Some(Level::L3));

    // finishing acts on the current thread, never on the boot thread behind it
    k.finish().unwrap();
    assert!(k.thread(editor).is_none());
    assert_eq!(k.current(), Some(shell));
    assert!(k.thread(MAIN).is_some());

    k.finish().unwrap();
    assert_eq!(k.current(), Some(MAIN));

    // the boot thread is last; retiring it halts the machine
    assert_eq!(k.finish(), Err(KernelError::Halted));
    assert!(k.halted());
    assert_eq!(k.scheduler().stats().destroyed, 2);
}
