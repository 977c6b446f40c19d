//! Bare-metal x86_64 PC.
//!
//! The kernel embedding this core owns the local APIC and the I/O APIC, so
//! it passes in how to identify the running CPU and how to route an IRQ.

use crate::{hal::hardware::PortIo, hal::Platform, param::NCPU, proc::cpu::Cpu};
use x86_64::instructions::{interrupts, port::Port};

/// I/O ports reached with `in`/`out` instructions.
pub struct PcPorts;
impl PortIo for PcPorts {
    fn inb(&self, port: u16) -> u8 {
        unsafe { Port::<u8>::new(port).read() }
    }
    fn outb(&self, port: u16, value: u8) {
        unsafe { Port::<u8>::new(port).write(value) }
    }
    fn insl(&self, port: u16, buf: &mut [u8]) {
        let mut port = Port::<u32>::new(port);
        for dword in buf.chunks_exact_mut(4) {
            dword.copy_from_slice(&unsafe { port.read() }.to_le_bytes());
        }
    }
    fn outsl(&self, port: u16, buf: &[u8]) {
        let mut port = Port::<u32>::new(port);
        for dword in buf.chunks_exact(4) {
            let value = u32::from_le_bytes([dword[0], dword[1], dword[2], dword[3]]);
            unsafe { port.write(value) };
        }
    }
}

pub struct Pc {
    ncpu: usize,
    cpus: [Cpu; NCPU],
    /// Index of the running CPU, below `ncpu`.
    cpu_id: fn() -> usize,
    /// Route an IRQ line to a CPU through the I/O APIC.
    enable_irq: fn(usize, usize),
}
impl Pc {
    #[allow(clippy::declare_interior_mutable_const)]
    const CPU_INIT: Cpu = Cpu::new();

    pub const fn new(ncpu: usize, cpu_id: fn() -> usize, enable_irq: fn(usize, usize)) -> Pc {
        Pc {
            ncpu,
            cpus: [Self::CPU_INIT; NCPU],
            cpu_id,
            enable_irq,
        }
    }
}
impl Platform for Pc {
    fn ncpu(&self) -> usize {
        self.ncpu
    }
    fn cpu_id(&self) -> usize {
        (self.cpu_id)()
    }
    fn cpu(&self) -> &Cpu {
        let id = self.cpu_id();
        match self.cpus.get(id) {
            Some(cpu) => cpu,
            None => panic!("cpu: unknown cpu {}", id),
        }
    }
    fn interrupts_enabled(&self) -> bool {
        interrupts::are_enabled()
    }
    fn enable_interrupts(&self) {
        interrupts::enable();
    }
    fn disable_interrupts(&self) {
        interrupts::disable();
    }
    fn enable_irq(&self, irq: usize, cpu: usize) {
        (self.enable_irq)(irq, cpu);
    }
}
