//! The two primitives this core borrows from the process scheduler.

use crate::sync::spinlock::Spinlock;
use spin::Once;

static SCHEDULER: Once<&'static dyn Scheduler> = Once::new();

/// Process identifier. 0 means "no process".
pub type Pid = i32;

/// A rendezvous token for [`sleep`] and [`wakeup`]. Carries no data.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Channel(usize);
impl Channel {
    /// The channel named by the address of `value`.
    pub fn of<T>(value: &T) -> Channel {
        Channel(value as *const T as usize)
    }
}

pub trait Scheduler: Sync {
    /// Identifier of the execution context running on this CPU.
    fn current_pid(&self) -> Pid;
    /// Atomically release `lock` and suspend the calling context until
    /// `wakeup(chan)` is called somewhere else, then reacquire `lock`.
    ///
    /// The caller holds `lock`, so interrupts are off on entry.
    fn sleep(&self, chan: Channel, lock: &Spinlock);
    /// Make every context sleeping on `chan` runnable. Never blocks.
    fn wakeup(&self, chan: Channel);
}

/// Install the scheduler. Later calls are ignored.
pub fn install(scheduler: &'static dyn Scheduler) {
    SCHEDULER.call_once(|| scheduler);
}

pub fn scheduler() -> &'static dyn Scheduler {
    match SCHEDULER.get() {
        Some(scheduler) => *scheduler,
        None => panic!("scheduler not installed"),
    }
}

/// Sleep on `chan`, yielding `lock` until woken.
pub fn sleep(chan: Channel, lock: &Spinlock) {
    scheduler().sleep(chan, lock);
}

/// Wake up all processes sleeping on `chan`.
pub fn wakeup(chan: Channel) {
    scheduler().wakeup(chan);
}

/// The current process's pid.
pub fn mypid() -> Pid {
    scheduler().current_pid()
}
