//! Hardware abstraction layer.
//!
//! The core never touches a CPU register or I/O port directly. CPU identity,
//! the interrupt-enable flag and interrupt routing come from the installed
//! [`Platform`]; device registers come from a [`hardware::PortIo`].

pub mod hardware;
pub mod platform;

use crate::proc::cpu::Cpu;
use spin::Once;

static PLATFORM: Once<&'static dyn Platform> = Once::new();

/// The machine the kernel is running on.
pub trait Platform: Sync {
    /// Number of CPUs brought up.
    fn ncpu(&self) -> usize;
    /// Identifier of the calling CPU.
    ///
    /// Must be called with interrupts disabled to prevent a race with the
    /// caller being moved to a different CPU.
    fn cpu_id(&self) -> usize;
    /// Per-CPU state of the calling CPU. Interrupts must be disabled.
    fn cpu(&self) -> &Cpu;
    fn interrupts_enabled(&self) -> bool;
    fn enable_interrupts(&self);
    fn disable_interrupts(&self);
    /// Route interrupt line `irq` to `cpu`.
    fn enable_irq(&self, irq: usize, cpu: usize);
}

/// Install the platform. Later calls are ignored.
pub fn install(platform: &'static dyn Platform) {
    PLATFORM.call_once(|| platform);
}

/// The installed platform.
pub fn platform() -> &'static dyn Platform {
    match PLATFORM.get() {
        Some(platform) => *platform,
        None => panic!("hal: platform not installed"),
    }
}
