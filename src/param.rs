/// Maximum number of CPUs
pub const NCPU: usize = 8;
/// Max num of blocks any FS op writes
pub const MAXOPBLOCKS: usize = 10;
/// Size of disk block cache
pub const NBUF: usize = MAXOPBLOCKS * 3;
/// Block size.
pub const BSIZE: usize = 512;
