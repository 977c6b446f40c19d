//! Architecture-agnostic interrupt masking.
//!
//! push_intr_off/pop_intr_off are like disabling/enabling interrupts except
//! that they are matched: it takes two pop_intr_off()s to undo two
//! push_intr_off()s. Also, if interrupts are initially off, then
//! push_intr_off, pop_intr_off leaves them off.

use crate::{hal, proc::cpu::Cpu};

pub fn interrupts_enabled() -> bool {
    hal::platform().interrupts_enabled()
}
pub fn enable_interrupts() {
    hal::platform().enable_interrupts()
}
pub fn disable_interrupts() {
    hal::platform().disable_interrupts()
}

pub fn push_intr_off() {
    let old = interrupts_enabled();

    disable_interrupts();
    let cpu = Cpu::current();
    if cpu.interrupt_disable_layers.get() == 0 {
        cpu.previous_interrupts_enabled.set(old);
    }
    cpu.interrupt_disable_layers
        .set(cpu.interrupt_disable_layers.get() + 1);
}
pub fn pop_intr_off() {
    let cpu = Cpu::current();

    if interrupts_enabled() {
        panic!("pop_intr_off - interruptible");
    } else if cpu.interrupt_disable_layers.get() < 1 {
        panic!("pop_intr_off");
    }

    let layers = cpu.interrupt_disable_layers.get() - 1;
    cpu.interrupt_disable_layers.set(layers);

    if layers == 0 && cpu.previous_interrupts_enabled.get() {
        enable_interrupts();
    }
}
