use probe_abi::x86::{Fpr, Gpr};

use super::ProbeSequence;
pub use super::{emit_jmp_rel32, emit_popf, emit_pushf, emit_ret, patch_rel32};

fn code_of(reg: Gpr) -> u8 {
    reg.index() as u8
}

fn emit_modrm_disp32(code: &mut Vec<u8>, reg: u8, base: u8, disp: i32) {
    code.push(0x80 | (reg << 3) | base);
    if base == 4 {
        code.push(0x24);
    }
    code.extend_from_slice(&disp.to_le_bytes());
}

pub fn emit_push(code: &mut Vec<u8>, reg: Gpr) {
    code.push(0x50 | code_of(reg));
}

pub fn emit_pop(code: &mut Vec<u8>, reg: Gpr) {
    code.push(0x58 | code_of(reg));
}

pub fn emit_push_imm(code: &mut Vec<u8>, imm: u32) {
    code.push(0x68);
    code.extend_from_slice(&imm.to_le_bytes());
}

pub fn emit_mov_imm(code: &mut Vec<u8>, dst: Gpr, imm: u32) {
    code.push(0xB8 | code_of(dst));
    code.extend_from_slice(&imm.to_le_bytes());
}

pub fn emit_mov_reg(code: &mut Vec<u8>, dst: Gpr, src: Gpr) {
    code.push(0x89);
    code.push(0xC0 | (code_of(src) << 3) | code_of(dst));
}

pub fn emit_load(code: &mut Vec<u8>, dst: Gpr, base: Gpr, disp: i32) {
    code.push(0x8B);
    emit_modrm_disp32(code, code_of(dst), code_of(base), disp);
}

pub fn emit_store(code: &mut Vec<u8>, base: Gpr, disp: i32, src: Gpr) {
    code.push(0x89);
    emit_modrm_disp32(code, code_of(src), code_of(base), disp);
}

pub fn emit_load_fpr(code: &mut Vec<u8>, dst: Fpr, base: Gpr, disp: i32) {
    code.extend_from_slice(&[0xF2, 0x0F, 0x10]);
    emit_modrm_disp32(code, dst.index() as u8, code_of(base), disp);
}

pub fn emit_store_fpr(code: &mut Vec<u8>, base: Gpr, disp: i32, src: Fpr) {
    code.extend_from_slice(&[0xF2, 0x0F, 0x11]);
    emit_modrm_disp32(code, src.index() as u8, code_of(base), disp);
}

/// mov [address], eax
pub fn emit_store_scratch_absolute(code: &mut Vec<u8>, address: u32) {
    code.push(0xA3);
    code.extend_from_slice(&address.to_le_bytes());
}

pub fn emit_add_imm(code: &mut Vec<u8>, dst: Gpr, imm: i32) {
    code.extend_from_slice(&[0x81, 0xC0 | code_of(dst)]);
    code.extend_from_slice(&imm.to_le_bytes());
}

pub fn emit_sub_imm(code: &mut Vec<u8>, dst: Gpr, imm: i32) {
    code.extend_from_slice(&[0x81, 0xE8 | code_of(dst)]);
    code.extend_from_slice(&imm.to_le_bytes());
}

pub fn emit_xor_self(code: &mut Vec<u8>, reg: Gpr) {
    let r = code_of(reg);
    code.extend_from_slice(&[0x31, 0xC0 | (r << 3) | r]);
}

pub fn emit_call_reg(code: &mut Vec<u8>, reg: Gpr) {
    code.extend_from_slice(&[0xFF, 0xD0 | code_of(reg)]);
}

/// Inline probe: pushes the original esp, eax, `arg` and `function`, then
/// calls `trampoline` through eax.
pub fn emit_probe(code: &mut Vec<u8>, function: u32, arg: u32, trampoline: u32) -> ProbeSequence {
    let start = code.len();
    emit_push(code, Gpr::Esp);
    emit_push(code, Gpr::Eax);
    emit_push_imm(code, arg);
    emit_push_imm(code, function);
    emit_mov_imm(code, Gpr::Eax, trampoline);
    emit_call_reg(code, Gpr::Eax);
    ProbeSequence {
        start,
        resume: code.len(),
    }
}
