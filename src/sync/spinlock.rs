//! Mutual exclusion spin locks.

use crate::{
    arch::interrupt::{pop_intr_off, push_intr_off},
    proc::{
        cpu::Cpu,
        scheduler::{self, Channel},
    },
};
use core::sync::atomic::{fence, AtomicBool, AtomicUsize, Ordering};

const NO_CPU: usize = usize::MAX;

pub struct Spinlock {
    locked: AtomicBool,
    /// For debugging: name of lock.
    name: &'static str,
    /// The cpu holding the lock.
    cpu: AtomicUsize,
}
impl Spinlock {
    pub const fn new(name: &'static str) -> Spinlock {
        Spinlock {
            locked: AtomicBool::new(false),
            name,
            cpu: AtomicUsize::new(NO_CPU),
        }
    }
    pub fn name(&self) -> &'static str {
        self.name
    }
    /// Check whether this cpu is holding the lock.
    pub fn holding(&self) -> bool {
        push_intr_off();
        let r = self.holding_intr_off();
        pop_intr_off();
        r
    }
    /// Interrupts must be off.
    fn holding_intr_off(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
            && self.cpu.load(Ordering::Relaxed) == Cpu::current_id()
    }
    /// Acquire the lock without a guard.
    /// Loops (spins) until the lock is acquired.
    ///
    /// Holding a lock for a long time may cause
    /// other CPUs to waste time spinning to acquire it.
    pub unsafe fn lock_unguarded(&self) {
        // Disable interrupts to avoid deadlock with an interrupt handler on this CPU.
        push_intr_off();

        if self.holding_intr_off() {
            panic!("acquire: {}", self.name);
        }

        while self.locked.swap(true, Ordering::Acquire) {
            core::hint::spin_loop();
        }

        self.cpu.store(Cpu::current_id(), Ordering::Relaxed);
    }
    pub fn lock(&self) -> SpinlockGuard<'_> {
        unsafe {
            self.lock_unguarded();
        }
        SpinlockGuard { lock: self }
    }
    /// Release a lock taken with `lock_unguarded`.
    pub unsafe fn unlock(&self) {
        if !self.holding_intr_off() {
            panic!("release: {}", self.name);
        }

        self.cpu.store(NO_CPU, Ordering::Relaxed);

        // All stores in the critical section must be visible
        // to other cores before the lock is seen free.
        fence(Ordering::SeqCst);
        self.locked.store(false, Ordering::Release);

        pop_intr_off();
    }
}
impl Default for Spinlock {
    fn default() -> Spinlock {
        Spinlock::new("spinlock")
    }
}

pub struct SpinlockGuard<'l> {
    pub lock: &'l Spinlock,
}
impl<'l> SpinlockGuard<'l> {
    /// Sleep until `wakeup(chan)` is called somewhere else, yielding the lock until then.
    pub fn sleep(&self, chan: Channel) {
        scheduler::sleep(chan, self.lock);
    }
}
impl<'l> Drop for SpinlockGuard<'l> {
    fn drop(&mut self) {
        unsafe { self.lock.unlock() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{arch::interrupt::interrupts_enabled, hal::platform::hosted};
    use core::cell::UnsafeCell;
    use std::thread;

    #[test]
    fn guard_masks_interrupts() {
        hosted::init();
        let lock = Spinlock::new("test");
        {
            let _guard = lock.lock();
            assert!(lock.holding());
            assert!(!interrupts_enabled());
        }
        assert!(!lock.holding());
        assert!(interrupts_enabled());
    }

    #[test]
    fn holding_is_per_cpu() {
        hosted::init();
        let lock = Spinlock::new("test");
        let _guard = lock.lock();
        thread::scope(|s| {
            s.spawn(|| {
                assert!(!lock.holding());
            });
        });
        assert!(lock.holding());
    }

    #[test]
    #[should_panic(expected = "acquire: twice")]
    fn reacquire_panics() {
        hosted::init();
        let lock = Spinlock::new("twice");
        let _first = lock.lock();
        let _second = lock.lock();
    }

    #[test]
    #[should_panic(expected = "release: unheld")]
    fn release_unheld_panics() {
        hosted::init();
        let lock = Spinlock::new("unheld");
        unsafe { lock.unlock() };
    }

    #[test]
    fn mutual_exclusion() {
        struct Shared {
            lock: Spinlock,
            count: UnsafeCell<usize>,
        }
        unsafe impl Sync for Shared {}

        hosted::init();
        let shared = Shared {
            lock: Spinlock::new("count"),
            count: UnsafeCell::new(0),
        };
        let shared = &shared;
        thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(move || {
                    for _ in 0..1000 {
                        let _guard = shared.lock.lock();
                        unsafe { *shared.count.get() += 1 };
                    }
                });
            }
        });
        assert_eq!(unsafe { *shared.count.get() }, 8000);
    }
}
