use crate::hal;
use core::cell::Cell;

/// Per-CPU state.
pub struct Cpu {
    /// Depth of push_intr_off() nesting.
    pub interrupt_disable_layers: Cell<i32>,
    /// Were interrupts enabled before push_intr_off()?
    pub previous_interrupts_enabled: Cell<bool>,
}
impl Cpu {
    pub const fn new() -> Cpu {
        Cpu {
            interrupt_disable_layers: Cell::new(0),
            previous_interrupts_enabled: Cell::new(false),
        }
    }
    /// Must be called with interrupts disabled
    /// to prevent race with process being moved
    /// to a different CPU.
    pub fn current_id() -> usize {
        hal::platform().cpu_id()
    }
    /// Return this CPU's cpu struct.
    /// Interrupts must be disabled.
    pub fn current() -> &'static Cpu {
        hal::platform().cpu()
    }
}
impl Default for Cpu {
    fn default() -> Cpu {
        Cpu::new()
    }
}
// Only ever touched by the CPU it describes, with interrupts disabled.
unsafe impl Sync for Cpu {}
