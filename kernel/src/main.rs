//! MLFQ kernel — точка входа симуляции / simulation entry point
//!
//! Загружает ядро, запускает смешанную нагрузку (вычислительные и
//! интерактивные потоки) и крутит часы до останова машины.
//! Boots the kernel, starts a mixed workload (CPU-bound and interactive
//! threads) and runs the clock until the machine halts.
//!
//! RUST_LOG=mlfq=debug показывает события планировщика [A]–[E].
//! RUST_LOG=mlfq=debug shows the scheduler events [A]–[E].

use std::collections::HashMap;

use mlfq_kernel::sched::thread::ThreadId;
use mlfq_kernel::{Kernel, KernelConfig, KernelError, Preemption};

/// Сценарий потока / Thread script
struct Job {
    name: &'static str,
    priority: u32,
    estimate: u64,
    /// Ticks of CPU per burst, then an I/O wait of `io` ticks.
    burst: u64,
    io: u64,
    bursts: u32,
}

const WORKLOAD: &[Job] = &[
    Job { name: "editor", priority: 120, estimate: 20, burst: 20, io: 300, bursts: 6 },
    Job { name: "shell", priority: 105, estimate: 40, burst: 30, io: 200, bursts: 5 },
    Job { name: "compiler", priority: 70, estimate: 0, burst: 900, io: 50, bursts: 3 },
    Job { name: "indexer", priority: 55, estimate: 0, burst: 600, io: 400, bursts: 2 },
    Job { name: "backup", priority: 10, estimate: 0, burst: 2000, io: 0, bursts: 1 },
];

struct Progress {
    job: &'static Job,
    ran: u64,
    left: u32,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut config = KernelConfig::default();
    if std::env::args().any(|a| a == "--immediate") {
        config.sched.preemption = Preemption::Immediate;
    }
    if std::env::args().any(|a| a == "--jitter") {
        config.timer.randomize = true;
    }

    log::info!("MLFQ kernel booting...");
    let mut kernel = Kernel::boot(config);

    let mut jobs: HashMap<ThreadId, Progress> = HashMap::new();
    for job in WORKLOAD {
        match kernel.spawn(job.name, job.priority, job.estimate) {
            Ok(id) => {
                log::info!("[sched] spawned {} as thread {} (priority {})", job.name, id, job.priority);
                jobs.insert(id, Progress { job, ran: 0, left: job.bursts });
            }
            Err(err) => log::error!("[sched] cannot spawn {}: {}", job.name, err),
        }
    }

    kernel.print();

    match drive(&mut kernel, &mut jobs) {
        Ok(()) | Err(KernelError::Halted) => {}
        Err(err) => log::error!("[kernel] {}", err),
    }

    kernel.print();
    log::info!("[sched] {:?}", kernel.scheduler().stats());
}

/// Прокручивать часы, исполняя сценарий текущего потока.
/// Run the clock, playing the current thread's script.
fn drive(kernel: &mut Kernel, jobs: &mut HashMap<ThreadId, Progress>) -> Result<(), KernelError> {
    loop {
        let Some(id) = kernel.current() else { return Err(KernelError::Halted) };
        let Some(progress) = jobs.get_mut(&id) else {
            // не из сценария (главный поток): ему делать нечего
            // not a scripted job (the boot thread): nothing left to do
            kernel.finish()?;
            continue;
        };

        if progress.ran < progress.job.burst {
            kernel.set_user_mode(true);
            let before = kernel.now();
            kernel.one_tick()?;
            // the tick may have switched threads; charge the one that ran
            if let Some(p) = jobs.get_mut(&id) {
                p.ran += kernel.now() - before;
            }
            continue;
        }

        kernel.set_user_mode(false);
        progress.ran = 0;
        progress.left -= 1;
        if progress.left == 0 {
            log::info!("[sched] {} done at tick {}", progress.job.name, kernel.now());
            jobs.remove(&id);
            kernel.finish()?;
        } else {
            kernel.schedule_wakeup(id, progress.job.io.max(1))?;
            kernel.block()?;
        }
    }
}
