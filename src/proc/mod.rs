pub mod cpu;
pub mod scheduler;
