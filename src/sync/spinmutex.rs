use super::spinlock::Spinlock;
use crate::proc::scheduler::{self, Channel};
use core::{
    cell::UnsafeCell,
    ops::{Deref, DerefMut, Drop},
};

/// A spinlock that owns the data it protects.
pub struct SpinMutex<T> {
    lock: Spinlock,
    inner: UnsafeCell<T>,
}
impl<T> SpinMutex<T> {
    pub const fn new(name: &'static str, value: T) -> SpinMutex<T> {
        SpinMutex {
            lock: Spinlock::new(name),
            inner: UnsafeCell::new(value),
        }
    }
    pub fn lock(&self) -> SpinMutexGuard<'_, T> {
        unsafe {
            self.lock.lock_unguarded();
        }
        SpinMutexGuard { mutex: self }
    }
    pub fn holding(&self) -> bool {
        self.lock.holding()
    }
}
unsafe impl<T> Sync for SpinMutex<T> where T: Send {}

pub struct SpinMutexGuard<'m, T> {
    mutex: &'m SpinMutex<T>,
}
impl<'m, T> SpinMutexGuard<'m, T> {
    /// Sleep until `wakeup(chan)` is called somewhere else, yielding the lock until then.
    ///
    /// Anything read through the guard before sleeping may be stale afterwards.
    pub fn sleep(&mut self, chan: Channel) {
        scheduler::sleep(chan, &self.mutex.lock);
    }
}
impl<'m, T> Deref for SpinMutexGuard<'m, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        unsafe { &*self.mutex.inner.get() }
    }
}
impl<'m, T> DerefMut for SpinMutexGuard<'m, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        unsafe { &mut *self.mutex.inner.get() }
    }
}
impl<'m, T> Drop for SpinMutexGuard<'m, T> {
    fn drop(&mut self) {
        unsafe { self.mutex.lock.unlock() }
    }
}
