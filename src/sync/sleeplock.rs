//! Long-term locks for processes.
//!
//! A sleeplock may be held across disk I/O: a process waiting for it gives
//! up the CPU instead of spinning. Because acquiring one may sleep, it must
//! never be taken inside a spinlock critical section or an interrupt handler.

use super::spinlock::Spinlock;
use crate::proc::scheduler::{mypid, wakeup, Channel, Pid};
use core::cell::Cell;

pub struct Sleeplock {
    /// Is the lock held?
    locked: Cell<bool>,
    /// Spinlock protecting this sleep lock.
    lk: Spinlock,
    /// Process holding lock.
    pid: Cell<Pid>,
}
impl Sleeplock {
    pub const fn new(name: &'static str) -> Sleeplock {
        Sleeplock {
            locked: Cell::new(false),
            lk: Spinlock::new(name),
            pid: Cell::new(0),
        }
    }
    pub fn name(&self) -> &'static str {
        self.lk.name()
    }
    fn channel(&self) -> Channel {
        Channel::of(self)
    }
    /// Acquire the lock without a guard, sleeping while another process holds it.
    pub unsafe fn lock_unguarded(&self) {
        let guard = self.lk.lock();
        while self.locked.get() {
            guard.sleep(self.channel());
        }
        self.locked.set(true);
        self.pid.set(mypid());
    }
    pub fn lock(&self) -> SleeplockGuard<'_> {
        unsafe {
            self.lock_unguarded();
        }
        SleeplockGuard { lock: self }
    }
    /// Release a lock taken with `lock_unguarded`.
    pub unsafe fn unlock(&self) {
        let _guard = self.lk.lock();
        self.locked.set(false);
        self.pid.set(0);
        wakeup(self.channel());
    }
    /// Is the current process holding this lock?
    pub fn holding(&self) -> bool {
        let _guard = self.lk.lock();
        self.locked.get() && self.pid.get() == mypid()
    }
}
// `locked` and `pid` are only touched with `lk` held.
unsafe impl Sync for Sleeplock {}

pub struct SleeplockGuard<'l> {
    pub lock: &'l Sleeplock,
}
impl<'l> Drop for SleeplockGuard<'l> {
    fn drop(&mut self) {
        unsafe { self.lock.unlock() }
    }
}
