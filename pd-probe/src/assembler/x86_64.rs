use probe_abi::x86_64::{Fpr, Gpr};

use super::ProbeSequence;
pub use super::{emit_jmp_rel32, emit_popf, emit_pushf, emit_ret, patch_rel32};

fn code_of(reg: Gpr) -> u8 {
    reg.index() as u8
}

fn rex(wide: bool, reg: u8, base: u8) -> u8 {
    0x40 | (u8::from(wide) << 3) | (((reg >> 3) & 1) << 2) | ((base >> 3) & 1)
}

// mod=10 addressing; rsp and r12 as a base need a SIB byte.
fn emit_modrm_disp32(code: &mut Vec<u8>, reg: u8, base: u8, disp: i32) {
    code.push(0x80 | ((reg & 7) << 3) | (base & 7));
    if base & 7 == 4 {
        code.push(0x24);
    }
    code.extend_from_slice(&disp.to_le_bytes());
}

pub fn emit_push(code: &mut Vec<u8>, reg: Gpr) {
    let r = code_of(reg);
    if r >= 8 {
        code.push(0x41);
    }
    code.push(0x50 | (r & 7));
}

pub fn emit_pop(code: &mut Vec<u8>, reg: Gpr) {
    let r = code_of(reg);
    if r >= 8 {
        code.push(0x41);
    }
    code.push(0x58 | (r & 7));
}

pub fn emit_mov_imm(code: &mut Vec<u8>, dst: Gpr, imm: u64) {
    let d = code_of(dst);
    code.push(rex(true, 0, d));
    code.push(0xB8 | (d & 7)); // mov r64, imm64
    code.extend_from_slice(&imm.to_le_bytes());
}

pub fn emit_mov_reg(code: &mut Vec<u8>, dst: Gpr, src: Gpr) {
    let (d, s) = (code_of(dst), code_of(src));
    code.push(rex(true, s, d));
    code.push(0x89);
    code.push(0xC0 | ((s & 7) << 3) | (d & 7));
}

pub fn emit_load(code: &mut Vec<u8>, dst: Gpr, base: Gpr, disp: i32) {
    let (d, b) = (code_of(dst), code_of(base));
    code.push(rex(true, d, b));
    code.push(0x8B);
    emit_modrm_disp32(code, d, b, disp);
}

pub fn emit_store(code: &mut Vec<u8>, base: Gpr, disp: i32, src: Gpr) {
    let (b, s) = (code_of(base), code_of(src));
    code.push(rex(true, s, b));
    code.push(0x89);
    emit_modrm_disp32(code, s, b, disp);
}

/// movsd xmm, [base + disp]
pub fn emit_load_fpr(code: &mut Vec<u8>, dst: Fpr, base: Gpr, disp: i32) {
    let (d, b) = (dst.index() as u8, code_of(base));
    code.push(0xF2);
    if d >= 8 || b >= 8 {
        code.push(rex(false, d, b));
    }
    code.extend_from_slice(&[0x0F, 0x10]);
    emit_modrm_disp32(code, d, b, disp);
}

/// movsd [base + disp], xmm
pub fn emit_store_fpr(code: &mut Vec<u8>, base: Gpr, disp: i32, src: Fpr) {
    let (b, s) = (code_of(base), src.index() as u8);
    code.push(0xF2);
    if s >= 8 || b >= 8 {
        code.push(rex(false, s, b));
    }
    code.extend_from_slice(&[0x0F, 0x11]);
    emit_modrm_disp32(code, s, b, disp);
}

/// movabs [address], rax
pub fn emit_store_scratch_absolute(code: &mut Vec<u8>, address: u64) {
    code.extend_from_slice(&[0x48, 0xA3]);
    code.extend_from_slice(&address.to_le_bytes());
}

pub fn emit_add_imm(code: &mut Vec<u8>, dst: Gpr, imm: i32) {
    let d = code_of(dst);
    code.push(rex(true, 0, d));
    code.push(0x81);
    code.push(0xC0 | (d & 7));
    code.extend_from_slice(&imm.to_le_bytes());
}

pub fn emit_sub_imm(code: &mut Vec<u8>, dst: Gpr, imm: i32) {
    let d = code_of(dst);
    code.push(rex(true, 0, d));
    code.push(0x81);
    code.push(0xE8 | (d & 7));
    code.extend_from_slice(&imm.to_le_bytes());
}

/// Zeroes `reg`; leaves ZF and PF set, CF, OF and SF clear.
pub fn emit_xor_self(code: &mut Vec<u8>, reg: Gpr) {
    let r = code_of(reg);
    code.push(rex(true, r, r));
    code.push(0x31);
    code.push(0xC0 | ((r & 7) << 3) | (r & 7));
}

pub fn emit_call_reg(code: &mut Vec<u8>, reg: Gpr) {
    let r = code_of(reg);
    if r >= 8 {
        code.push(0x41);
    }
    code.extend_from_slice(&[0xFF, 0xD0 | (r & 7)]);
}

/// Inline probe: pushes the original rsp, rax, `arg` and `function`, then
/// calls `trampoline` through rax. Every register the sequence touches is
/// captured before it is clobbered.
pub fn emit_probe(code: &mut Vec<u8>, function: u64, arg: u64, trampoline: u64) -> ProbeSequence {
    let start = code.len();
    emit_push(code, Gpr::Rsp);
    emit_push(code, Gpr::Rax);
    emit_mov_imm(code, Gpr::Rax, arg);
    emit_push(code, Gpr::Rax);
    emit_mov_imm(code, Gpr::Rax, function);
    emit_push(code, Gpr::Rax);
    emit_mov_imm(code, Gpr::Rax, trampoline);
    emit_call_reg(code, Gpr::Rax);
    ProbeSequence {
        start,
        resume: code.len(),
    }
}
