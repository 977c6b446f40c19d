#[cfg(all(feature = "pc", target_arch = "x86_64"))]
pub mod pc;

#[cfg(any(test, feature = "hosted"))]
pub mod hosted;
