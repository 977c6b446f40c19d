pub mod sleeplock;
pub mod spinlock;
pub mod spinmutex;
