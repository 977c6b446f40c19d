//! Disk I/O core of the kernel: spinlocks, sleeplocks, the block buffer
//! cache and the PIO IDE driver that services it.
//!
//! The scheduler and the platform (CPU identity, interrupt flag, IRQ
//! routing) are collaborators supplied by the embedding kernel through
//! [`init`].

#![no_std]
#![allow(clippy::missing_safety_doc)]

#[cfg(any(test, feature = "hosted"))]
extern crate std;

pub mod arch;
pub mod hal;
pub mod io;
pub mod param;
pub mod proc;
pub mod queue;
pub mod sync;

pub use crate::{
    hal::{hardware::ide::Ide, hardware::ramdisk::RamDisk, Platform},
    io::{
        bio::{BioError, BufGuard, BufferCache},
        buf::{BlockId, BufFlags, Buffer, Disk},
    },
    proc::scheduler::{Channel, Scheduler},
};

/// Install the platform and scheduler this core runs on.
///
/// Only the first call has any effect.
pub fn init(platform: &'static dyn Platform, scheduler: &'static dyn Scheduler) {
    hal::install(platform);
    proc::scheduler::install(scheduler);
}
