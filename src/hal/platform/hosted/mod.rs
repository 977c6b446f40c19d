//! Runs the core on a host OS.
//!
//! Every host thread is both a CPU and the process running on it. Sleeping
//! blocks the thread on a condition variable, and the disk interrupt is
//! delivered by a dedicated thread (see [`with_irq_thread`]).

pub mod ide;

use crate::{
    arch::trap::{devintr, InterruptHandler, IRQ_IDE},
    hal::{hardware::ide::Ide, Platform},
    proc::{
        cpu::Cpu,
        scheduler::{Channel, Pid, Scheduler},
    },
    sync::spinlock::Spinlock,
};
use self::ide::SimIde;
use std::{
    boxed::Box,
    cell::Cell,
    collections::BTreeMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Condvar, Mutex, MutexGuard, PoisonError,
    },
    thread,
};

pub use crate::param::NCPU;

static NEXT_CPU: AtomicUsize = AtomicUsize::new(0);

std::thread_local! {
    static CPU_ID: usize = NEXT_CPU.fetch_add(1, Ordering::Relaxed);
    static CPU: &'static Cpu = Box::leak(Box::new(Cpu::new()));
    static INTERRUPTS: Cell<bool> = const { Cell::new(true) };
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct HostedPlatform {
    routes: Mutex<BTreeMap<usize, usize>>,
}
impl HostedPlatform {
    pub const fn new() -> HostedPlatform {
        HostedPlatform {
            routes: Mutex::new(BTreeMap::new()),
        }
    }
}
impl Default for HostedPlatform {
    fn default() -> HostedPlatform {
        HostedPlatform::new()
    }
}
impl Platform for HostedPlatform {
    fn ncpu(&self) -> usize {
        NCPU
    }
    fn cpu_id(&self) -> usize {
        CPU_ID.with(|id| *id)
    }
    fn cpu(&self) -> &Cpu {
        CPU.with(|cpu| *cpu)
    }
    fn interrupts_enabled(&self) -> bool {
        INTERRUPTS.with(Cell::get)
    }
    fn enable_interrupts(&self) {
        INTERRUPTS.with(|on| on.set(true));
    }
    fn disable_interrupts(&self) {
        INTERRUPTS.with(|on| on.set(false));
    }
    fn enable_irq(&self, irq: usize, cpu: usize) {
        lock(&self.routes).insert(irq, cpu);
    }
}

#[derive(Copy, Clone, Default)]
struct Waiters {
    generation: u64,
    sleepers: usize,
}

/// Sleep and wakeup on host condition variables.
///
/// Each channel with sleepers carries a generation number that every wakeup
/// bumps; a sleeper returns once the generation it saw has changed. The last
/// sleeper to leave removes the channel's entry.
pub struct HostedScheduler {
    channels: Mutex<BTreeMap<Channel, Waiters>>,
    woken: Condvar,
}
impl HostedScheduler {
    pub const fn new() -> HostedScheduler {
        HostedScheduler {
            channels: Mutex::new(BTreeMap::new()),
            woken: Condvar::new(),
        }
    }
    /// Number of channels with sleepers.
    pub fn sleeping_channels(&self) -> usize {
        lock(&self.channels).len()
    }
}
impl Default for HostedScheduler {
    fn default() -> HostedScheduler {
        HostedScheduler::new()
    }
}
impl Scheduler for HostedScheduler {
    fn current_pid(&self) -> Pid {
        CPU_ID.with(|id| *id as Pid + 1)
    }
    fn sleep(&self, chan: Channel, lk: &Spinlock) {
        // Wakers hold `lk`, so taking the table before releasing it means
        // no wakeup can slip in between.
        let mut channels = lock(&self.channels);
        let waiters = channels.entry(chan).or_default();
        waiters.sleepers += 1;
        let seen = waiters.generation;
        unsafe { lk.unlock() };

        while channels.get(&chan).map(|w| w.generation) == Some(seen) {
            channels = self
                .woken
                .wait(channels)
                .unwrap_or_else(PoisonError::into_inner);
        }
        if let Some(waiters) = channels.get_mut(&chan) {
            waiters.sleepers -= 1;
            if waiters.sleepers == 0 {
                channels.remove(&chan);
            }
        }
        drop(channels);

        unsafe { lk.lock_unguarded() };
    }
    fn wakeup(&self, chan: Channel) {
        let mut channels = lock(&self.channels);
        if let Some(waiters) = channels.get_mut(&chan) {
            waiters.generation += 1;
            self.woken.notify_all();
        }
    }
}

static PLATFORM: HostedPlatform = HostedPlatform::new();
static SCHEDULER: HostedScheduler = HostedScheduler::new();

/// Install the hosted platform and scheduler.
pub fn init() {
    crate::init(&PLATFORM, &SCHEDULER);
}

/// The CPU `irq` was routed to, if any.
pub fn routed_cpu(irq: usize) -> Option<usize> {
    lock(&PLATFORM.routes).get(&irq).copied()
}

/// Deliver the controller's interrupts to `ide` until the controller is shut down.
pub fn serve_irqs(sim: &SimIde, ide: &Ide<&SimIde>) {
    init();
    let devices: [(usize, &dyn InterruptHandler); 1] = [(IRQ_IDE, ide)];
    while sim.wait_irq() {
        devintr(IRQ_IDE, &devices);
    }
}

struct Shutdown<'a>(&'a SimIde);
impl<'a> Drop for Shutdown<'a> {
    fn drop(&mut self) {
        self.0.shutdown();
    }
}

/// Run `f` with an interrupt thread serving `ide`.
///
/// The interrupt thread stops when `f` returns or panics.
pub fn with_irq_thread<R>(sim: &SimIde, ide: &Ide<&SimIde>, f: impl FnOnce() -> R) -> R {
    thread::scope(|s| {
        s.spawn(|| serve_irqs(sim, ide));
        let _shutdown = Shutdown(sim);
        f()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    #[test]
    fn channel_entries_are_reclaimed() {
        init();
        let scheduler = HostedScheduler::new();
        let lk = Spinlock::new("chan");
        let chan = Channel::of(&lk);
        let ready = AtomicBool::new(false);

        thread::scope(|s| {
            s.spawn(|| {
                let guard = lk.lock();
                while !ready.load(Ordering::SeqCst) {
                    scheduler.sleep(chan, guard.lock);
                }
            });
            while scheduler.sleeping_channels() == 0 {
                thread::yield_now();
            }
            let _guard = lk.lock();
            ready.store(true, Ordering::SeqCst);
            scheduler.wakeup(chan);
        });
        assert_eq!(scheduler.sleeping_channels(), 0);
    }
}
