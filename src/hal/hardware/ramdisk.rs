//! Ramdisk that serves blocks from an in-memory disk image.
//!
//! Transfers complete synchronously, so no interrupt is involved.

use crate::{
    io::buf::{BufFlags, Buffer, Disk},
    param::BSIZE,
    sync::spinmutex::SpinMutex,
};
use core::sync::atomic::{AtomicUsize, Ordering};
use log::trace;

pub struct RamDisk<'a> {
    dev: u32,
    nblocks: u32,
    image: SpinMutex<&'a mut [u8]>,
    reads: AtomicUsize,
    writes: AtomicUsize,
}
impl<'a> RamDisk<'a> {
    /// Serve device `dev` from `image`. Trailing bytes short of a block are unused.
    pub fn new(dev: u32, image: &'a mut [u8]) -> RamDisk<'a> {
        RamDisk {
            dev,
            nblocks: (image.len() / BSIZE) as u32,
            image: SpinMutex::new("ramdisk", image),
            reads: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
        }
    }
    /// Size of the disk in blocks.
    pub fn nblocks(&self) -> u32 {
        self.nblocks
    }
    /// Number of blocks read so far.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::Relaxed)
    }
    /// Number of blocks written so far.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::Relaxed)
    }
}
impl<'a> Disk for RamDisk<'a> {
    fn rw(&self, buf: &Buffer) {
        if !buf.lock.holding() {
            panic!("ramdiskrw: buf not locked");
        }
        let contents = unsafe { buf.contents_mut() };
        if contents.flags & (BufFlags::VALID | BufFlags::DIRTY) == BufFlags::VALID {
            panic!("ramdiskrw: nothing to do");
        }
        if contents.dev != self.dev {
            panic!("ramdiskrw: request not for disk {}", self.dev);
        }
        if contents.blockno >= self.nblocks {
            panic!("ramdiskrw: block {} out of range", contents.blockno);
        }

        let start = contents.blockno as usize * BSIZE;
        let mut image = self.image.lock();
        let block = &mut image[start..start + BSIZE];
        if contents.flags.contains(BufFlags::DIRTY) {
            trace!("ramdisk: write block {}", contents.blockno);
            block.copy_from_slice(&contents.data);
            self.writes.fetch_add(1, Ordering::Relaxed);
        } else {
            trace!("ramdisk: read block {}", contents.blockno);
            contents.data.copy_from_slice(block);
            self.reads.fetch_add(1, Ordering::Relaxed);
        }
        contents.flags.insert(BufFlags::VALID);
        contents.flags.remove(BufFlags::DIRTY);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::platform::hosted;
    use std::vec;

    #[test]
    fn reads_and_writes_in_place() {
        hosted::init();
        let mut image = vec![0u8; 4 * BSIZE + 100];
        image[2 * BSIZE] = 42;
        let disk = RamDisk::new(1, &mut image);
        assert_eq!(disk.nblocks(), 4);

        let buf = Buffer::new();
        let guard = buf.lock.lock();
        unsafe { buf.recycle(crate::BlockId::new(1, 2)) };
        disk.rw(&buf);
        assert_eq!(unsafe { buf.contents_mut() }.data[0], 42);
        assert_eq!(unsafe { buf.flags() }, BufFlags::VALID);

        {
            let contents = unsafe { buf.contents_mut() };
            contents.data[0] = 43;
            contents.flags.insert(BufFlags::DIRTY);
        }
        disk.rw(&buf);
        assert_eq!(unsafe { buf.flags() }, BufFlags::VALID);
        assert_eq!((disk.reads(), disk.writes()), (1, 1));
        drop(guard);
        drop(disk);
        assert_eq!(image[2 * BSIZE], 43);
    }

    #[test]
    #[should_panic(expected = "ramdiskrw: nothing to do")]
    fn valid_clean_buffer_is_rejected() {
        hosted::init();
        let mut image = vec![0u8; BSIZE];
        let disk = RamDisk::new(0, &mut image);
        let buf = Buffer::new();
        let _guard = buf.lock.lock();
        unsafe { buf.contents_mut().flags = BufFlags::VALID };
        disk.rw(&buf);
    }

    #[test]
    #[should_panic(expected = "ramdiskrw: block 1 out of range")]
    fn out_of_range_is_rejected() {
        hosted::init();
        let mut image = vec![0u8; BSIZE];
        let disk = RamDisk::new(0, &mut image);
        let buf = Buffer::new();
        let _guard = buf.lock.lock();
        unsafe { buf.recycle(crate::BlockId::new(0, 1)) };
        disk.rw(&buf);
    }

    #[test]
    #[should_panic(expected = "ramdiskrw: buf not locked")]
    fn unlocked_buffer_is_rejected() {
        hosted::init();
        let mut image = vec![0u8; BSIZE];
        let disk = RamDisk::new(0, &mut image);
        disk.rw(&Buffer::new());
    }
}
