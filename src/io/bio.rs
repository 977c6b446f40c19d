//! Buffer cache.
//!
//! The buffer cache is a linked list of buffers holding
//! cached copies of disk block contents. Caching disk blocks
//! in memory reduces the number of disk reads and also provides
//! a synchronization point for disk blocks used by multiple processes.
//!
//! Interface:
//! - To get a buffer for a particular disk block, call read.
//! - After changing buffer data, call write to write it to disk.
//! - When done with the buffer, call release (or drop the guard).
//! - Do not use the buffer after releasing it.
//! - Only one process at a time can use a buffer,
//!   so do not keep them longer than necessary.
//!
//! The implementation uses two state flags internally:
//! - VALID: the buffer data has been read from the disk.
//! - DIRTY: the buffer data has been modified
//!   and needs to be written to disk.

use crate::{
    io::buf::{BlockId, BufFlags, Buffer, Disk},
    param::{BSIZE, NBUF},
    sync::spinmutex::SpinMutex,
};
use arrayvec::ArrayVec;
use core::fmt;
use log::{info, trace};

/// Index of the list head in `Lru`.
const HEAD: usize = usize::MAX;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BioError {
    /// Every buffer is referenced or owes a write-back.
    NoBuffers,
}
impl fmt::Display for BioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BioError::NoBuffers => write!(f, "no buffers"),
        }
    }
}

#[derive(Copy, Clone)]
struct Link {
    prev: usize,
    next: usize,
}

/// Cache bookkeeping, guarded by the cache lock.
struct Lru<const N: usize> {
    /// Linked list of all buffers, through prev/next.
    /// head.next is most recently used.
    head: Link,
    links: [Link; N],
    /// Which block each buffer holds; None until first used.
    blocks: [Option<BlockId>; N],
    refcnt: [u32; N],
}
impl<const N: usize> Lru<N> {
    fn new() -> Lru<N> {
        let empty = Link {
            prev: HEAD,
            next: HEAD,
        };
        let mut lru = Lru {
            head: empty,
            links: [empty; N],
            blocks: [None; N],
            refcnt: [0; N],
        };
        for i in 0..N {
            lru.push_front(i);
        }
        lru
    }
    fn link_mut(&mut self, i: usize) -> &mut Link {
        if i == HEAD {
            &mut self.head
        } else {
            &mut self.links[i]
        }
    }
    fn unlink(&mut self, i: usize) {
        let Link { prev, next } = self.links[i];
        self.link_mut(prev).next = next;
        self.link_mut(next).prev = prev;
    }
    fn push_front(&mut self, i: usize) {
        let next = self.head.next;
        self.links[i] = Link { prev: HEAD, next };
        self.link_mut(next).prev = i;
        self.head.next = i;
    }
    /// Most recently used first.
    fn from_mru(&self) -> Walk<'_, N> {
        Walk {
            lru: self,
            cur: self.head.next,
            forward: true,
        }
    }
    /// Least recently used first.
    fn from_lru(&self) -> Walk<'_, N> {
        Walk {
            lru: self,
            cur: self.head.prev,
            forward: false,
        }
    }
}

struct Walk<'a, const N: usize> {
    lru: &'a Lru<N>,
    cur: usize,
    forward: bool,
}
impl<'a, const N: usize> Iterator for Walk<'a, N> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        if self.cur == HEAD {
            return None;
        }
        let i = self.cur;
        let link = self.lru.links[i];
        self.cur = if self.forward { link.next } else { link.prev };
        Some(i)
    }
}

/// One line of [`BufferCache::snapshot`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SlotInfo {
    pub slot: usize,
    pub block: Option<BlockId>,
    pub refcnt: u32,
}

/// An extra reference taken by [`BufferCache::pin`].
///
/// Dropping it without `unpin` keeps the slot referenced for the life of
/// the cache.
#[must_use = "a pinned buffer can never be recycled until unpinned"]
#[derive(Debug)]
pub struct Pinned {
    /// Address of the cache that made the pin.
    owner: usize,
    index: usize,
}

pub struct BufferCache<'d, const N: usize = NBUF> {
    disk: &'d dyn Disk,
    buf: [Buffer; N],
    lru: SpinMutex<Lru<N>>,
}
impl<'d, const N: usize> BufferCache<'d, N> {
    pub fn new(disk: &'d dyn Disk) -> BufferCache<'d, N> {
        BufferCache {
            disk,
            buf: core::array::from_fn(|_| Buffer::new()),
            lru: SpinMutex::new("bcache", Lru::new()),
        }
    }

    /// Look through buffer cache for block on device dev.
    /// If not found, allocate a buffer.
    /// In either case, return locked buffer.
    ///
    /// Panics if every buffer is in use.
    pub fn get(&self, dev: u32, blockno: u32) -> BufGuard<'_, N> {
        match self.try_get(dev, blockno) {
            Ok(b) => b,
            Err(e) => panic!("bget: {}", e),
        }
    }
    /// Like `get`, but reports a full cache instead of panicking.
    pub fn try_get(&self, dev: u32, blockno: u32) -> Result<BufGuard<'_, N>, BioError> {
        let index = self.bget(BlockId::new(dev, blockno))?;
        Ok(BufGuard { cache: self, index })
    }
    fn bget(&self, block: BlockId) -> Result<usize, BioError> {
        let mut lru = self.lru.lock();

        // Is the block already cached?
        let cached = lru.from_mru().find(|&i| lru.blocks[i] == Some(block));
        if let Some(i) = cached {
            lru.refcnt[i] += 1;
            drop(lru);
            trace!("bget {}: cached in slot {}", block, i);
            unsafe { self.buf[i].lock.lock_unguarded() };
            return Ok(i);
        }

        // Not cached; recycle an unused buffer.
        // Even if refcnt == 0, DIRTY means the buffer is still in use:
        // its contents have not reached the disk yet.
        let victim = lru.from_lru().find(|&i| {
            lru.refcnt[i] == 0 && !unsafe { self.buf[i].flags() }.contains(BufFlags::DIRTY)
        });
        let Some(i) = victim else {
            return Err(BioError::NoBuffers);
        };
        lru.blocks[i] = Some(block);
        lru.refcnt[i] = 1;
        unsafe { self.buf[i].recycle(block) };
        drop(lru);
        trace!("bget {}: recycled slot {}", block, i);

        // refcnt is already 1, so the slot cannot be recycled again
        // before we get its sleeplock.
        unsafe { self.buf[i].lock.lock_unguarded() };
        Ok(i)
    }

    /// Return a locked buf with the contents of the indicated block.
    pub fn read(&self, dev: u32, blockno: u32) -> BufGuard<'_, N> {
        let b = self.get(dev, blockno);
        self.fill(&b);
        b
    }
    /// Like `read`, but reports a full cache instead of panicking.
    pub fn try_read(&self, dev: u32, blockno: u32) -> Result<BufGuard<'_, N>, BioError> {
        let b = self.try_get(dev, blockno)?;
        self.fill(&b);
        Ok(b)
    }
    fn fill(&self, b: &BufGuard<'_, N>) {
        let buf = &self.buf[b.index];
        buf.assert_locked();
        if !unsafe { buf.flags() }.contains(BufFlags::VALID) {
            self.disk.rw(buf);
        }
    }

    /// Write b's contents to disk.
    pub fn write(&self, b: &mut BufGuard<'_, N>) {
        self.check_owner(b, "bwrite");
        self.bwrite(b.index);
    }
    /// Must be locked.
    fn bwrite(&self, index: usize) {
        let buf = &self.buf[index];
        if !buf.lock.holding() {
            panic!("bwrite");
        }
        unsafe { buf.contents_mut().flags.insert(BufFlags::DIRTY) };
        self.disk.rw(buf);
    }

    /// Release a locked buffer.
    pub fn release(&self, b: BufGuard<'_, N>) {
        self.check_owner(&b, "brelse");
        drop(b);
    }
    /// Move to the head of the most-recently-used list.
    fn brelse(&self, index: usize) {
        let buf = &self.buf[index];
        if !buf.lock.holding() {
            panic!("brelse");
        }

        unsafe { buf.lock.unlock() };

        let mut lru = self.lru.lock();
        lru.refcnt[index] -= 1;
        if lru.refcnt[index] == 0 {
            // No one is waiting for it.
            lru.unlink(index);
            lru.push_front(index);
        }
    }

    /// Keep b's buffer from being recycled after it is released.
    pub fn pin(&self, b: &BufGuard<'_, N>) -> Pinned {
        self.check_owner(b, "bpin");
        let mut lru = self.lru.lock();
        lru.refcnt[b.index] += 1;
        Pinned {
            owner: self.addr(),
            index: b.index,
        }
    }
    pub fn unpin(&self, pin: Pinned) {
        if pin.owner != self.addr() {
            panic!("bunpin: buffer belongs to another cache");
        }
        let mut lru = self.lru.lock();
        lru.refcnt[pin.index] -= 1;
    }

    /// Buffers from most to least recently used.
    pub fn snapshot(&self) -> ArrayVec<SlotInfo, N> {
        let lru = self.lru.lock();
        lru.from_mru()
            .map(|slot| SlotInfo {
                slot,
                block: lru.blocks[slot],
                refcnt: lru.refcnt[slot],
            })
            .collect()
    }
    /// Log the cache contents. For debugging.
    pub fn dump(&self) {
        for slot in self.snapshot() {
            match slot.block {
                Some(block) => info!("buf {}: block {} ref {}", slot.slot, block, slot.refcnt),
                None => info!("buf {}: unused", slot.slot),
            }
        }
    }

    fn addr(&self) -> usize {
        self as *const BufferCache<'d, N> as usize
    }
    fn check_owner(&self, b: &BufGuard<'_, N>, what: &str) {
        if b.cache.addr() != self.addr() {
            panic!("{}: buffer belongs to another cache", what);
        }
    }
}

/// A locked buffer. Released when dropped.
pub struct BufGuard<'c, const N: usize = NBUF> {
    cache: &'c BufferCache<'c, N>,
    index: usize,
}
impl<'c, const N: usize> BufGuard<'c, N> {
    fn buffer(&self) -> &Buffer {
        &self.cache.buf[self.index]
    }
    /// Index of the cache slot holding the block.
    pub fn slot(&self) -> usize {
        self.index
    }
    pub fn block(&self) -> BlockId {
        self.buffer().block()
    }
    pub fn dev(&self) -> u32 {
        self.block().dev
    }
    pub fn blockno(&self) -> u32 {
        self.block().blockno
    }
    pub fn flags(&self) -> BufFlags {
        let buf = self.buffer();
        buf.assert_locked();
        unsafe { buf.flags() }
    }
    pub fn is_valid(&self) -> bool {
        self.flags().contains(BufFlags::VALID)
    }
    pub fn is_dirty(&self) -> bool {
        self.flags().contains(BufFlags::DIRTY)
    }
    pub fn data(&self) -> &[u8; BSIZE] {
        let buf = self.buffer();
        buf.assert_locked();
        unsafe { &(*buf.contents_ptr()).data }
    }
    pub fn data_mut(&mut self) -> &mut [u8; BSIZE] {
        let buf = self.buffer();
        buf.assert_locked();
        unsafe { &mut (*buf.contents_ptr()).data }
    }
    /// Record that the contents must reach the disk before the buffer can
    /// be recycled, without writing them now.
    pub fn set_dirty(&mut self) {
        let buf = self.buffer();
        buf.assert_locked();
        unsafe { (*buf.contents_ptr()).flags.insert(BufFlags::DIRTY) };
    }
}
impl<'c, const N: usize> Drop for BufGuard<'c, N> {
    fn drop(&mut self) {
        self.cache.brelse(self.index);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{hal::hardware::ramdisk::RamDisk, hal::platform::hosted};
    use std::{thread, vec, vec::Vec};

    fn image(nblocks: usize) -> Vec<u8> {
        let mut image = vec![0u8; nblocks * BSIZE];
        for (blockno, block) in image.chunks_mut(BSIZE).enumerate() {
            block[0] = blockno as u8;
            block[BSIZE - 1] = 0xa5;
        }
        image
    }

    #[test]
    fn read_returns_disk_contents() {
        hosted::init();
        let mut image = image(16);
        let disk = RamDisk::new(0, &mut image);
        let cache: BufferCache<'_, 4> = BufferCache::new(&disk);

        let b = cache.read(0, 9);
        assert_eq!(b.block(), BlockId::new(0, 9));
        assert_eq!(b.data()[0], 9);
        assert_eq!(b.data()[BSIZE - 1], 0xa5);
        assert!(b.is_valid());
        assert!(!b.is_dirty());
        cache.release(b);
        assert_eq!(disk.reads(), 1);
    }

    #[test]
    fn cached_block_skips_disk() {
        hosted::init();
        let mut image = image(16);
        let disk = RamDisk::new(0, &mut image);
        let cache: BufferCache<'_, 4> = BufferCache::new(&disk);

        let first = cache.read(0, 3).slot();
        let b = cache.read(0, 3);
        assert_eq!(b.slot(), first);
        drop(b);
        assert_eq!(disk.reads(), 1);
    }

    #[test]
    fn fresh_cache_has_no_identities() {
        hosted::init();
        let mut image = image(4);
        let disk = RamDisk::new(0, &mut image);
        let cache: BufferCache<'_, 3> = BufferCache::new(&disk);

        let snapshot = cache.snapshot();
        assert_eq!(snapshot.len(), 3);
        assert!(snapshot.iter().all(|s| s.block.is_none() && s.refcnt == 0));

        // Block 0 of device 0 is not a hit on an untouched buffer.
        let b = cache.get(0, 0);
        assert!(!b.is_valid());
    }

    #[test]
    fn recycles_least_recently_released() {
        hosted::init();
        let mut image = image(16);
        let disk = RamDisk::new(0, &mut image);
        let cache: BufferCache<'_, 3> = BufferCache::new(&disk);

        let b1 = cache.get(0, 1);
        let b2 = cache.get(0, 2);
        let b3 = cache.get(0, 3);
        let slot1 = b1.slot();
        cache.release(b1);

        let b4 = cache.get(0, 4);
        assert_eq!(b4.slot(), slot1);
        assert_ne!(b4.slot(), b2.slot());
        assert_ne!(b4.slot(), b3.slot());

        // 2, 3 and 4 are held: a fourth distinct block does not fit.
        assert_eq!(cache.try_get(0, 5).err(), Some(BioError::NoBuffers));
        let held: Vec<_> = cache.snapshot().iter().filter_map(|s| s.block).collect();
        assert!(held.contains(&BlockId::new(0, 2)));
        assert!(held.contains(&BlockId::new(0, 3)));
        assert!(held.contains(&BlockId::new(0, 4)));
        assert!(cache.snapshot().iter().all(|s| s.refcnt == 1));
    }

    #[test]
    #[should_panic(expected = "bget: no buffers")]
    fn exhaustion_is_fatal() {
        hosted::init();
        let mut image = image(16);
        let disk = RamDisk::new(0, &mut image);
        let cache: BufferCache<'_, 3> = BufferCache::new(&disk);

        let _b2 = cache.get(0, 2);
        let _b3 = cache.get(0, 3);
        let _b4 = cache.get(0, 4);
        let _b5 = cache.get(0, 5);
    }

    #[test]
    fn eviction_follows_release_order() {
        hosted::init();
        let mut image = image(16);
        let disk = RamDisk::new(0, &mut image);
        let cache: BufferCache<'_, 4> = BufferCache::new(&disk);

        let mut held: Vec<_> = (1..=4).map(|n| cache.read(0, n)).collect();
        let slots: Vec<usize> = held.iter().map(|b| b.slot()).collect();
        // Release in the order 2, 4, 1, 3.
        for blockno in [2, 4, 1, 3] {
            let at = held.iter().position(|b| b.blockno() == blockno).unwrap();
            cache.release(held.remove(at));
        }

        let expected = [slots[1], slots[3], slots[0], slots[2]];
        let mut taken = Vec::new();
        for (n, slot) in (10..).zip(expected) {
            let b = cache.get(0, n);
            assert_eq!(b.slot(), slot);
            taken.push(b);
        }
    }

    #[test]
    fn dirty_buffer_is_never_recycled() {
        hosted::init();
        let mut image = image(16);
        let disk = RamDisk::new(0, &mut image);
        let cache: BufferCache<'_, 2> = BufferCache::new(&disk);

        let mut b1 = cache.read(0, 1);
        let slot1 = b1.slot();
        b1.data_mut()[7] = 0x77;
        b1.set_dirty();
        drop(b1);
        let b2 = cache.read(0, 2);
        let slot2 = b2.slot();
        drop(b2);

        // Block 1 is least recently used, but still owes a write.
        let b3 = cache.get(0, 3);
        assert_eq!(b3.slot(), slot2);
        assert_eq!(cache.try_get(0, 4).err(), Some(BioError::NoBuffers));
        drop(b3);

        // A hit on the dirty buffer still sees the unwritten data.
        let mut b1 = cache.read(0, 1);
        assert_eq!(b1.slot(), slot1);
        assert!(b1.is_dirty());
        assert_eq!(b1.data()[7], 0x77);
        cache.write(&mut b1);
        assert!(!b1.is_dirty());
        drop(b1);
        assert_eq!(disk.writes(), 1);

        let _b3 = cache.get(0, 3);
        let b4 = cache.get(0, 4);
        assert_eq!(b4.slot(), slot1);
    }

    #[test]
    fn write_survives_eviction() {
        hosted::init();
        let mut image = image(16);
        let disk = RamDisk::new(0, &mut image);
        let cache: BufferCache<'_, 1> = BufferCache::new(&disk);

        let mut b = cache.read(0, 7);
        b.data_mut()[..5].copy_from_slice(b"hello");
        cache.write(&mut b);
        cache.release(b);

        let other = cache.read(0, 8);
        assert_eq!(other.data()[0], 8);
        cache.release(other);

        let b = cache.read(0, 7);
        assert_eq!(&b.data()[..5], b"hello");
        assert_eq!(disk.writes(), 1);
        assert_eq!(disk.reads(), 3);
    }

    #[test]
    fn write_without_read() {
        hosted::init();
        let mut image = image(16);
        let disk = RamDisk::new(0, &mut image);
        let cache: BufferCache<'_, 2> = BufferCache::new(&disk);

        let mut b = cache.get(0, 5);
        assert!(!b.is_valid());
        b.data_mut().fill(0x5a);
        cache.write(&mut b);
        assert!(b.is_valid());
        assert!(!b.is_dirty());
        drop(b);
        assert_eq!(disk.reads(), 0);

        drop(cache);
        assert!(image[5 * BSIZE..6 * BSIZE].iter().all(|&x| x == 0x5a));
    }

    #[test]
    #[should_panic(expected = "bwrite")]
    fn write_requires_lock() {
        hosted::init();
        let mut image = image(4);
        let disk = RamDisk::new(0, &mut image);
        let cache: BufferCache<'_, 2> = BufferCache::new(&disk);
        cache.bwrite(0);
    }

    #[test]
    #[should_panic(expected = "brelse")]
    fn release_requires_lock() {
        hosted::init();
        let mut image = image(4);
        let disk = RamDisk::new(0, &mut image);
        let cache: BufferCache<'_, 2> = BufferCache::new(&disk);
        cache.brelse(1);
    }

    #[test]
    #[should_panic(expected = "brelse: buffer belongs to another cache")]
    fn release_into_wrong_cache() {
        hosted::init();
        let mut image = image(4);
        let disk = RamDisk::new(0, &mut image);
        let a: BufferCache<'_, 2> = BufferCache::new(&disk);
        let b: BufferCache<'_, 2> = BufferCache::new(&disk);
        let buf = a.get(0, 1);
        b.release(buf);
    }

    #[test]
    #[should_panic(expected = "bunpin: buffer belongs to another cache")]
    fn unpin_from_wrong_cache() {
        hosted::init();
        let mut image = image(4);
        let disk = RamDisk::new(0, &mut image);
        let a: BufferCache<'_, 2> = BufferCache::new(&disk);
        let b: BufferCache<'_, 2> = BufferCache::new(&disk);
        let pin = a.pin(&a.read(0, 1));
        let held = b.read(0, 1);
        b.unpin(pin);
        drop(held);
    }

    #[test]
    fn pinned_buffer_stays_cached() {
        hosted::init();
        let mut image = image(4);
        let disk = RamDisk::new(0, &mut image);
        let cache: BufferCache<'_, 1> = BufferCache::new(&disk);

        let b = cache.read(0, 1);
        let pin = cache.pin(&b);
        drop(b);
        assert_eq!(cache.try_get(0, 2).err(), Some(BioError::NoBuffers));

        let again = cache.read(0, 1);
        drop(again);
        cache.unpin(pin);
        let b2 = cache.get(0, 2);
        assert_eq!(b2.blockno(), 2);
        assert_eq!(disk.reads(), 1);
    }

    #[test]
    fn concurrent_users_see_one_copy() {
        const THREADS: usize = 8;
        const ROUNDS: usize = 200;
        const BLOCKS: u32 = 12;

        hosted::init();
        let mut image = vec![0u8; BLOCKS as usize * BSIZE];
        let disk = RamDisk::new(0, &mut image);
        let cache: BufferCache<'_, THREADS> = BufferCache::new(&disk);

        thread::scope(|s| {
            for t in 0..THREADS {
                let cache = &cache;
                s.spawn(move || {
                    for round in 0..ROUNDS {
                        let blockno = ((t * 7 + round * 5) % BLOCKS as usize) as u32;
                        let mut b = cache.read(0, blockno);

                        let live = cache
                            .snapshot()
                            .iter()
                            .filter(|s| s.block == Some(BlockId::new(0, blockno)) && s.refcnt > 0)
                            .count();
                        assert_eq!(live, 1);

                        let data = b.data_mut();
                        let count = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
                        data[..4].copy_from_slice(&(count + 1).to_le_bytes());
                        cache.write(&mut b);
                    }
                });
            }
        });
        drop(cache);

        let total: u32 = image
            .chunks(BSIZE)
            .map(|block| u32::from_le_bytes([block[0], block[1], block[2], block[3]]))
            .sum();
        assert_eq!(total as usize, THREADS * ROUNDS);
    }
}
