//! Architecture-specific implementations.
//!
//! Each backend implements the `kestrel-hal` traits for its platform and
//! wires them into an [`crate::InterruptEngine`] at boot.
//! Currently supported: x86_64.

#[cfg(target_arch = "x86_64")]
pub mod x86_64;
