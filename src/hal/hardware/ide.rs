//! Simple PIO-based (non-DMA) IDE driver code.
//!
//! Requests are served one at a time in FIFO order. The process that
//! submits a request sleeps on its buffer; the disk interrupt completes the
//! request at the head of the queue and starts the next one.

use super::PortIo;
use crate::{
    arch::trap::{InterruptHandler, IRQ_IDE},
    hal,
    io::buf::{BufFlags, Buffer, Contents, Disk},
    param::BSIZE,
    proc::scheduler::wakeup,
    queue::Queue,
    sync::spinmutex::SpinMutex,
};
use bitflags::bitflags;
use core::{
    ptr::NonNull,
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
};
use log::{debug, info, trace, warn};

pub const SECTOR_SIZE: usize = 512;
const SECTOR_PER_BLOCK: usize = BSIZE / SECTOR_SIZE;
const _: () = assert!(SECTOR_PER_BLOCK >= 1 && SECTOR_PER_BLOCK <= 7 && BSIZE % SECTOR_SIZE == 0);

bitflags! {
    /// Status register bits.
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct IdeStatus: u8 {
        const BSY = 0x80;
        const DRDY = 0x40;
        const DF = 0x20;
        const DRQ = 0x08;
        const ERR = 0x01;
    }
}

pub const IDE_CMD_READ: u8 = 0x20;
pub const IDE_CMD_WRITE: u8 = 0x30;
pub const IDE_CMD_RDMUL: u8 = 0xc4;
pub const IDE_CMD_WRMUL: u8 = 0xc5;

// Primary channel registers.
pub const IDE_DATA: u16 = 0x1f0;
pub const IDE_SECTOR_COUNT: u16 = 0x1f2;
pub const IDE_LBA_LOW: u16 = 0x1f3;
pub const IDE_LBA_MID: u16 = 0x1f4;
pub const IDE_LBA_HIGH: u16 = 0x1f5;
pub const IDE_DRIVE: u16 = 0x1f6;
/// Status when read, command when written.
pub const IDE_STATUS: u16 = 0x1f7;
pub const IDE_COMMAND: u16 = 0x1f7;
pub const IDE_CONTROL: u16 = 0x3f6;

/// A queued buffer. Its owner sleeps in `rw` until the request leaves the
/// queue, so the buffer outlives its queue entry.
#[derive(Copy, Clone)]
struct Request(NonNull<Buffer>);
impl Request {
    fn new(b: &Buffer) -> Request {
        Request(NonNull::from(b))
    }
    unsafe fn buffer<'b>(self) -> &'b Buffer {
        self.0.as_ref()
    }
}
unsafe impl Send for Request {}

pub struct Ide<P: PortIo> {
    ports: P,
    /// queue.front() is the buf now being read/written to the disk.
    /// Hold this lock while manipulating the queue or the controller.
    queue: SpinMutex<Queue<Request>>,
    havedisk1: AtomicBool,
    /// Disk size in blocks.
    nblocks: u32,
    /// Transfers the controller reported as failed.
    errors: AtomicUsize,
}
impl<P: PortIo> Ide<P> {
    pub const fn new(ports: P, nblocks: u32) -> Ide<P> {
        Ide {
            ports,
            queue: SpinMutex::new("ide", Queue::new()),
            havedisk1: AtomicBool::new(false),
            nblocks,
            errors: AtomicUsize::new(0),
        }
    }

    /// Route the disk interrupt and probe for disk 1.
    pub fn init(&self) {
        let platform = hal::platform();
        platform.enable_irq(IRQ_IDE, platform.ncpu() - 1);
        let _ = self.wait(false);

        // Check if disk 1 is present.
        self.ports.outb(IDE_DRIVE, 0xe0 | (1 << 4));
        let present = (0..1000).any(|_| self.ports.inb(IDE_STATUS) != 0);
        self.havedisk1.store(present, Ordering::Relaxed);

        // Switch back to disk 0.
        self.ports.outb(IDE_DRIVE, 0xe0 | (0 << 4));
        info!(
            "ide: disk 1 {}",
            if present { "present" } else { "not present" }
        );
    }
    pub fn has_disk1(&self) -> bool {
        self.havedisk1.load(Ordering::Relaxed)
    }
    pub fn nblocks(&self) -> u32 {
        self.nblocks
    }
    /// Number of transfers the controller flagged with an error.
    ///
    /// Such transfers still complete normally from the caller's point of view.
    pub fn errors(&self) -> usize {
        self.errors.load(Ordering::Relaxed)
    }
    /// Number of queued requests, including the one in flight.
    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    /// Wait for IDE disk to become ready.
    fn wait(&self, checkerr: bool) -> Result<(), IdeStatus> {
        let status = loop {
            let r = IdeStatus::from_bits_retain(self.ports.inb(IDE_STATUS));
            if r & (IdeStatus::BSY | IdeStatus::DRDY) == IdeStatus::DRDY {
                break r;
            }
            core::hint::spin_loop();
        };

        if checkerr && status.intersects(IdeStatus::DF | IdeStatus::ERR) {
            Err(status)
        } else {
            Ok(())
        }
    }

    /// Start the request for b. Caller must hold the queue lock.
    fn start(&self, b: &Contents) {
        let sector = b.blockno as usize * SECTOR_PER_BLOCK;
        let (read_cmd, write_cmd) = if SECTOR_PER_BLOCK == 1 {
            (IDE_CMD_READ, IDE_CMD_WRITE)
        } else {
            (IDE_CMD_RDMUL, IDE_CMD_WRMUL)
        };

        let _ = self.wait(false);
        // Generate interrupt.
        self.ports.outb(IDE_CONTROL, 0);
        self.ports.outb(IDE_SECTOR_COUNT, SECTOR_PER_BLOCK as u8);
        self.ports.outb(IDE_LBA_LOW, (sector & 0xff) as u8);
        self.ports.outb(IDE_LBA_MID, ((sector >> 8) & 0xff) as u8);
        self.ports.outb(IDE_LBA_HIGH, ((sector >> 16) & 0xff) as u8);
        self.ports.outb(
            IDE_DRIVE,
            0xe0 | (((b.dev & 1) << 4) as u8) | (((sector >> 24) & 0x0f) as u8),
        );
        if b.flags.contains(BufFlags::DIRTY) {
            trace!("ide: write {}:{}", b.dev, b.blockno);
            self.ports.outb(IDE_COMMAND, write_cmd);
            self.ports.outsl(IDE_DATA, &b.data);
        } else {
            trace!("ide: read {}:{}", b.dev, b.blockno);
            self.ports.outb(IDE_COMMAND, read_cmd);
        }
    }

    /// Interrupt handler.
    pub fn intr(&self) {
        // First queued buffer is the active request.
        let mut queue = self.queue.lock();
        let Some(request) = queue.pop_front() else {
            debug!("ide: spurious interrupt");
            return;
        };
        let b = unsafe { request.buffer() };
        // The owner is asleep in rw() until the flags below change.
        let contents = unsafe { b.contents_mut() };

        // Read data if needed.
        match self.wait(true) {
            Ok(()) => {
                if !contents.flags.contains(BufFlags::DIRTY) {
                    self.ports.insl(IDE_DATA, &mut contents.data);
                }
            }
            Err(status) => {
                // The buffer still completes; see `errors`.
                self.errors.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "ide: {} of {}:{} failed, status {:#04x}",
                    if contents.flags.contains(BufFlags::DIRTY) { "write" } else { "read" },
                    contents.dev,
                    contents.blockno,
                    status.bits()
                );
            }
        }

        // Wake process waiting for this buf.
        contents.flags.insert(BufFlags::VALID);
        contents.flags.remove(BufFlags::DIRTY);
        wakeup(b.channel());

        // Start disk on next buf in queue.
        if let Some(&next) = queue.front() {
            self.start(unsafe { next.buffer().contents_mut() });
        }
    }
}
impl<P: PortIo> Disk for Ide<P> {
    /// Sync buf with disk.
    /// If DIRTY is set, write buf to disk, clear DIRTY, set VALID.
    /// Else if VALID is not set, read buf from disk, set VALID.
    fn rw(&self, b: &Buffer) {
        if !b.lock.holding() {
            panic!("iderw: buf not locked");
        }
        let block = b.block();
        if unsafe { b.flags() } & (BufFlags::VALID | BufFlags::DIRTY) == BufFlags::VALID {
            panic!("iderw: nothing to do");
        }
        if block.dev > 1 {
            panic!("iderw: no ide disk {}", block.dev);
        }
        if block.dev == 1 && !self.has_disk1() {
            panic!("iderw: ide disk 1 not present");
        }
        if block.blockno >= self.nblocks {
            panic!("iderw: block {} out of range", block.blockno);
        }

        let mut queue = self.queue.lock();

        // Append b to the queue.
        if let Err(e) = queue.push_back(Request::new(b)) {
            panic!("iderw: {}", e);
        }

        // Start disk if necessary.
        if queue.len() == 1 {
            self.start(unsafe { b.contents_mut() });
        }

        // Wait for request to finish.
        while unsafe { b.flags() } & (BufFlags::VALID | BufFlags::DIRTY) != BufFlags::VALID {
            queue.sleep(b.channel());
        }
    }
}
impl<P: PortIo> InterruptHandler for Ide<P> {
    fn interrupt(&self) {
        self.intr();
    }
}
