use crate::{param::BSIZE, proc::scheduler::Channel, sync::sleeplock::Sleeplock};
use bitflags::bitflags;
use core::{cell::UnsafeCell, fmt};

bitflags! {
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    pub struct BufFlags: u32 {
        /// Buffer has been read from disk.
        const VALID = 0x2;
        /// Buffer needs to be written to disk.
        const DIRTY = 0x4;
    }
}

/// The disk block a buffer caches.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct BlockId {
    pub dev: u32,
    pub blockno: u32,
}
impl BlockId {
    pub const fn new(dev: u32, blockno: u32) -> BlockId {
        BlockId { dev, blockno }
    }
}
impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.dev, self.blockno)
    }
}

/// Everything guarded by a buffer's sleeplock.
pub struct Contents {
    pub dev: u32,
    pub blockno: u32,
    pub flags: BufFlags,
    pub data: [u8; BSIZE],
}

/// One slot of the buffer cache.
pub struct Buffer {
    pub lock: Sleeplock,
    contents: UnsafeCell<Contents>,
}
impl Buffer {
    pub const fn new() -> Buffer {
        Buffer {
            lock: Sleeplock::new("buffer"),
            contents: UnsafeCell::new(Contents {
                dev: 0,
                blockno: 0,
                flags: BufFlags::empty(),
                data: [0; BSIZE],
            }),
        }
    }
    /// Processes waiting on this buffer's disk request sleep here.
    pub fn channel(&self) -> Channel {
        Channel::of(self)
    }
    /// Unchecked access to the guarded contents.
    ///
    /// The caller must own the buffer: hold its sleeplock, hold the cache
    /// lock while nobody references the buffer, or be the disk driver
    /// completing a queued request under the disk lock.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn contents_mut(&self) -> &mut Contents {
        &mut *self.contents.get()
    }
    /// Raw pointer to the guarded contents.
    pub fn contents_ptr(&self) -> *mut Contents {
        self.contents.get()
    }
    /// Panic unless the current process holds the sleeplock.
    pub fn assert_locked(&self) {
        if !self.lock.holding() {
            panic!("buffer {}: not locked", self.block());
        }
    }
    /// The block this buffer holds. Stable while the buffer is referenced.
    pub fn block(&self) -> BlockId {
        unsafe {
            let contents = self.contents.get();
            BlockId::new((*contents).dev, (*contents).blockno)
        }
    }
    /// The buffer's flags. The caller must own the buffer as for `contents_mut`.
    pub unsafe fn flags(&self) -> BufFlags {
        (*self.contents.get()).flags
    }
    /// Give the buffer a new identity with no valid contents.
    ///
    /// Called with the cache lock held while nobody references the buffer.
    pub(crate) unsafe fn recycle(&self, block: BlockId) {
        let contents = self.contents_mut();
        contents.dev = block.dev;
        contents.blockno = block.blockno;
        contents.flags = BufFlags::empty();
    }
}
impl Default for Buffer {
    fn default() -> Buffer {
        Buffer::new()
    }
}
// The contents are guarded by `lock` (see `contents_mut`).
unsafe impl Sync for Buffer {}

/// A block device the buffer cache reads and writes through.
pub trait Disk: Sync {
    /// Sync buf with disk.
    /// If DIRTY is set, write buf to disk, clear DIRTY, set VALID.
    /// Else if VALID is not set, read buf from disk, set VALID.
    ///
    /// The caller must hold `buf.lock`. Returns once the transfer is done.
    fn rw(&self, buf: &Buffer);
}
