//! Device drivers and hardware implementations.

pub mod ide;
pub mod ramdisk;

/// x86-style I/O port access.
pub trait PortIo: Sync {
    fn inb(&self, port: u16) -> u8;
    fn outb(&self, port: u16, value: u8);
    /// Read `buf.len() / 4` doublewords from `port` into `buf`.
    fn insl(&self, port: u16, buf: &mut [u8]);
    /// Write `buf.len() / 4` doublewords from `buf` to `port`.
    fn outsl(&self, port: u16, buf: &[u8]);
}
impl<T: PortIo + ?Sized> PortIo for &T {
    fn inb(&self, port: u16) -> u8 {
        (**self).inb(port)
    }
    fn outb(&self, port: u16, value: u8) {
        (**self).outb(port, value)
    }
    fn insl(&self, port: u16, buf: &mut [u8]) {
        (**self).insl(port, buf)
    }
    fn outsl(&self, port: u16, buf: &[u8]) {
        (**self).outsl(port, buf)
    }
}
