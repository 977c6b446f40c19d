pub mod interrupt;
pub mod trap;
