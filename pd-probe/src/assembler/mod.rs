//! Byte-level x86 encoders for probe sites and the small functions that
//! host them.
//!
//! Both encoders are plain byte emitters and build on any host. Only
//! [`insert_probe`] ties the output to the running target, because it
//! bakes in the address of this process's trampoline.

use crate::error::{ProbeError, ProbeResult};

pub mod x86;
pub mod x86_64;

#[cfg(target_arch = "x86")]
pub use x86 as active;
#[cfg(not(target_arch = "x86"))]
pub use x86_64 as active;

/// Placement of one emitted probe inside its code buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProbeSequence {
    pub start: usize,
    /// First byte after the trampoline call. Execution continues here unless
    /// the probe function rewrites pc.
    pub resume: usize,
}

impl ProbeSequence {
    pub fn byte_len(&self) -> usize {
        self.resume - self.start
    }
}

pub fn emit_jmp_rel32(code: &mut Vec<u8>) -> usize {
    code.push(0xE9);
    let disp = code.len();
    code.extend_from_slice(&[0, 0, 0, 0]);
    disp
}

pub fn patch_rel32(code: &mut [u8], disp_offset: usize, target: usize) -> ProbeResult<()> {
    let rel = (target as i64) - ((disp_offset + 4) as i64);
    let rel = i32::try_from(rel).map_err(|_| ProbeError::DisplacementOverflow {
        from: disp_offset,
        to: target,
    })?;
    code[disp_offset..disp_offset + 4].copy_from_slice(&rel.to_le_bytes());
    Ok(())
}

pub fn emit_pushf(code: &mut Vec<u8>) {
    code.push(0x9C);
}

pub fn emit_popf(code: &mut Vec<u8>) {
    code.push(0x9D);
}

pub fn emit_ret(code: &mut Vec<u8>) {
    code.push(0xC3);
}

/// Emits a probe at the end of `code` that calls `function(context)` through
/// this process's trampoline, with `arg` stored in the record.
#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
pub fn insert_probe(
    code: &mut Vec<u8>,
    function: probe_abi::ProbeFunction,
    arg: *mut core::ffi::c_void,
) -> ProbeSequence {
    let trampoline = crate::trampoline::probe_trampoline_address();
    active::emit_probe(
        code,
        function as usize as probe_abi::Word,
        arg as usize as probe_abi::Word,
        trampoline as probe_abi::Word,
    )
}
