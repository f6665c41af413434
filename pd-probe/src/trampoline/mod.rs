//! Shared entry routines the inline probe sequence calls into.
//!
//! Each backend exposes one naked routine that saves the full CPU state into
//! a [`probe_abi::ProbeContext`], calls the probe function with the record's
//! address, optionally relocates the record below a requested stack pointer,
//! runs the stack initializer and finally restores every register.

#[cfg(not(any(target_arch = "x86", target_arch = "x86_64")))]
mod unsupported;
#[cfg(target_arch = "x86")]
mod x86;
#[cfg(target_arch = "x86_64")]
mod x86_64;

pub(crate) trait TrampolineBackend {
    const ARCH: &'static str;

    fn entry_address() -> usize;
}

#[cfg(target_arch = "x86_64")]
type ActiveBackend = x86_64::X86_64Trampoline;
#[cfg(target_arch = "x86")]
type ActiveBackend = x86::X86Trampoline;
#[cfg(not(any(target_arch = "x86", target_arch = "x86_64")))]
type ActiveBackend = unsupported::UnsupportedTrampoline;

/// Address the emitted `call` targets. Not callable from Rust.
pub fn probe_trampoline_address() -> usize {
    ActiveBackend::entry_address()
}

pub fn trampoline_arch() -> &'static str {
    ActiveBackend::ARCH
}
