//! Record layout for 64-bit x86 targets.

use core::mem::{offset_of, size_of};

pub type Word = u64;

pub const PTR_SIZE: usize = 8;
pub const FPR_SIZE: usize = 8;

register_ids! {
    /// General purpose registers in ModRM encoding order.
    Gpr {
        Rax = "rax",
        Rcx = "rcx",
        Rdx = "rdx",
        Rbx = "rbx",
        Rsp = "rsp",
        Rbp = "rbp",
        Rsi = "rsi",
        Rdi = "rdi",
        R8 = "r8",
        R9 = "r9",
        R10 = "r10",
        R11 = "r11",
        R12 = "r12",
        R13 = "r13",
        R14 = "r14",
        R15 = "r15",
    }
}

register_ids! {
    Spr {
        Rip = "rip",
        Rflags = "rflags",
    }
}

register_ids! {
    Fpr {
        Xmm0 = "xmm0",
        Xmm1 = "xmm1",
        Xmm2 = "xmm2",
        Xmm3 = "xmm3",
        Xmm4 = "xmm4",
        Xmm5 = "xmm5",
        Xmm6 = "xmm6",
        Xmm7 = "xmm7",
        Xmm8 = "xmm8",
        Xmm9 = "xmm9",
        Xmm10 = "xmm10",
        Xmm11 = "xmm11",
        Xmm12 = "xmm12",
        Xmm13 = "xmm13",
        Xmm14 = "xmm14",
        Xmm15 = "xmm15",
    }
}

impl Gpr {
    pub const STACK_POINTER: Gpr = Gpr::Rsp;
    pub const FRAME_POINTER: Gpr = Gpr::Rbp;
    /// The one register the inline probe sequence clobbers before the
    /// trampoline takes over.
    pub const SCRATCH: Gpr = Gpr::Rax;
}

impl Spr {
    pub const INSTRUCTION_POINTER: Spr = Spr::Rip;
    pub const FLAGS: Spr = Spr::Rflags;
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CpuState {
    pub gprs: [Word; Gpr::COUNT],
    pub sprs: [Word; Spr::COUNT],
    pub fprs: [u64; Fpr::COUNT],
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ProbeContext {
    pub probe_function: Word,
    pub arg: Word,
    pub initialize_stack_function: Word,
    pub initialize_stack_arg: Word,
    pub cpu: CpuState,
}

cpu_state_accessors!(Word);

#[cfg(target_pointer_width = "64")]
probe_context_pointer_accessors!();

/// Offsets the trampoline uses to address [`ProbeContext`] fields.
pub mod offsets {
    use super::{FPR_SIZE, Fpr, Gpr, PTR_SIZE};

    pub const PROBE_PROBE_FUNCTION_OFFSET: usize = 0;
    pub const PROBE_ARG_OFFSET: usize = PTR_SIZE;
    pub const PROBE_INIT_STACK_FUNCTION_OFFSET: usize = 2 * PTR_SIZE;
    pub const PROBE_INIT_STACK_ARG_OFFSET: usize = 3 * PTR_SIZE;

    pub const PROBE_FIRST_GPR_OFFSET: usize = 4 * PTR_SIZE;
    pub const PROBE_CPU_RAX_OFFSET: usize = PROBE_FIRST_GPR_OFFSET;
    pub const PROBE_CPU_RCX_OFFSET: usize = PROBE_FIRST_GPR_OFFSET + PTR_SIZE;
    pub const PROBE_CPU_RDX_OFFSET: usize = PROBE_FIRST_GPR_OFFSET + 2 * PTR_SIZE;
    pub const PROBE_CPU_RBX_OFFSET: usize = PROBE_FIRST_GPR_OFFSET + 3 * PTR_SIZE;
    pub const PROBE_CPU_RSP_OFFSET: usize = PROBE_FIRST_GPR_OFFSET + 4 * PTR_SIZE;
    pub const PROBE_CPU_RBP_OFFSET: usize = PROBE_FIRST_GPR_OFFSET + 5 * PTR_SIZE;
    pub const PROBE_CPU_RSI_OFFSET: usize = PROBE_FIRST_GPR_OFFSET + 6 * PTR_SIZE;
    pub const PROBE_CPU_RDI_OFFSET: usize = PROBE_FIRST_GPR_OFFSET + 7 * PTR_SIZE;
    pub const PROBE_CPU_R8_OFFSET: usize = PROBE_FIRST_GPR_OFFSET + 8 * PTR_SIZE;
    pub const PROBE_CPU_R9_OFFSET: usize = PROBE_FIRST_GPR_OFFSET + 9 * PTR_SIZE;
    pub const PROBE_CPU_R10_OFFSET: usize = PROBE_FIRST_GPR_OFFSET + 10 * PTR_SIZE;
    pub const PROBE_CPU_R11_OFFSET: usize = PROBE_FIRST_GPR_OFFSET + 11 * PTR_SIZE;
    pub const PROBE_CPU_R12_OFFSET: usize = PROBE_FIRST_GPR_OFFSET + 12 * PTR_SIZE;
    pub const PROBE_CPU_R13_OFFSET: usize = PROBE_FIRST_GPR_OFFSET + 13 * PTR_SIZE;
    pub const PROBE_CPU_R14_OFFSET: usize = PROBE_FIRST_GPR_OFFSET + 14 * PTR_SIZE;
    pub const PROBE_CPU_R15_OFFSET: usize = PROBE_FIRST_GPR_OFFSET + 15 * PTR_SIZE;

    pub const PROBE_FIRST_SPR_OFFSET: usize = PROBE_FIRST_GPR_OFFSET + 16 * PTR_SIZE;
    pub const PROBE_CPU_RIP_OFFSET: usize = PROBE_FIRST_SPR_OFFSET;
    pub const PROBE_CPU_RFLAGS_OFFSET: usize = PROBE_FIRST_SPR_OFFSET + PTR_SIZE;
    pub const PROBE_FIRST_XMM_OFFSET: usize = PROBE_FIRST_SPR_OFFSET + 2 * PTR_SIZE;

    pub const PROBE_CPU_XMM0_OFFSET: usize = PROBE_FIRST_XMM_OFFSET;
    pub const PROBE_CPU_XMM1_OFFSET: usize = PROBE_FIRST_XMM_OFFSET + FPR_SIZE;
    pub const PROBE_CPU_XMM2_OFFSET: usize = PROBE_FIRST_XMM_OFFSET + 2 * FPR_SIZE;
    pub const PROBE_CPU_XMM3_OFFSET: usize = PROBE_FIRST_XMM_OFFSET + 3 * FPR_SIZE;
    pub const PROBE_CPU_XMM4_OFFSET: usize = PROBE_FIRST_XMM_OFFSET + 4 * FPR_SIZE;
    pub const PROBE_CPU_XMM5_OFFSET: usize = PROBE_FIRST_XMM_OFFSET + 5 * FPR_SIZE;
    pub const PROBE_CPU_XMM6_OFFSET: usize = PROBE_FIRST_XMM_OFFSET + 6 * FPR_SIZE;
    pub const PROBE_CPU_XMM7_OFFSET: usize = PROBE_FIRST_XMM_OFFSET + 7 * FPR_SIZE;
    pub const PROBE_CPU_XMM8_OFFSET: usize = PROBE_FIRST_XMM_OFFSET + 8 * FPR_SIZE;
    pub const PROBE_CPU_XMM9_OFFSET: usize = PROBE_FIRST_XMM_OFFSET + 9 * FPR_SIZE;
    pub const PROBE_CPU_XMM10_OFFSET: usize = PROBE_FIRST_XMM_OFFSET + 10 * FPR_SIZE;
    pub const PROBE_CPU_XMM11_OFFSET: usize = PROBE_FIRST_XMM_OFFSET + 11 * FPR_SIZE;
    pub const PROBE_CPU_XMM12_OFFSET: usize = PROBE_FIRST_XMM_OFFSET + 12 * FPR_SIZE;
    pub const PROBE_CPU_XMM13_OFFSET: usize = PROBE_FIRST_XMM_OFFSET + 13 * FPR_SIZE;
    pub const PROBE_CPU_XMM14_OFFSET: usize = PROBE_FIRST_XMM_OFFSET + 14 * FPR_SIZE;
    pub const PROBE_CPU_XMM15_OFFSET: usize = PROBE_FIRST_XMM_OFFSET + 15 * FPR_SIZE;

    pub const PROBE_SIZE: usize = PROBE_CPU_XMM15_OFFSET + FPR_SIZE;

    /// Words popped off the restore area on the way out: rflags, rax, rcx, rbp, rip.
    pub const OUT_SIZE: usize = 5 * PTR_SIZE;
    pub const PROBE_FRAME_SIZE: usize = PROBE_SIZE + OUT_SIZE;

    /// Worst-case stack alignment any callee may assume.
    pub const STACK_ALIGNMENT: usize = 32;

    pub const fn gpr_offset(id: Gpr) -> usize {
        PROBE_FIRST_GPR_OFFSET + id.index() * PTR_SIZE
    }

    pub const fn fpr_offset(id: Fpr) -> usize {
        PROBE_FIRST_XMM_OFFSET + id.index() * FPR_SIZE
    }
}

// If one of these fires, the trampoline offsets no longer match the struct.
const _: () = {
    use offsets::*;

    const CPU: usize = offset_of!(ProbeContext, cpu);
    const GPRS: usize = CPU + offset_of!(CpuState, gprs);
    const SPRS: usize = CPU + offset_of!(CpuState, sprs);
    const FPRS: usize = CPU + offset_of!(CpuState, fprs);

    assert!(size_of::<Word>() == PTR_SIZE);
    assert!(offset_of!(ProbeContext, probe_function) == PROBE_PROBE_FUNCTION_OFFSET);
    assert!(offset_of!(ProbeContext, arg) == PROBE_ARG_OFFSET);
    assert!(offset_of!(ProbeContext, initialize_stack_function) == PROBE_INIT_STACK_FUNCTION_OFFSET);
    assert!(offset_of!(ProbeContext, initialize_stack_arg) == PROBE_INIT_STACK_ARG_OFFSET);

    assert!(GPRS + Gpr::Rax as usize * PTR_SIZE == PROBE_CPU_RAX_OFFSET);
    assert!(GPRS + Gpr::Rcx as usize * PTR_SIZE == PROBE_CPU_RCX_OFFSET);
    assert!(GPRS + Gpr::Rdx as usize * PTR_SIZE == PROBE_CPU_RDX_OFFSET);
    assert!(GPRS + Gpr::Rbx as usize * PTR_SIZE == PROBE_CPU_RBX_OFFSET);
    assert!(GPRS + Gpr::Rsp as usize * PTR_SIZE == PROBE_CPU_RSP_OFFSET);
    assert!(GPRS + Gpr::Rbp as usize * PTR_SIZE == PROBE_CPU_RBP_OFFSET);
    assert!(GPRS + Gpr::Rsi as usize * PTR_SIZE == PROBE_CPU_RSI_OFFSET);
    assert!(GPRS + Gpr::Rdi as usize * PTR_SIZE == PROBE_CPU_RDI_OFFSET);
    assert!(GPRS + Gpr::R8 as usize * PTR_SIZE == PROBE_CPU_R8_OFFSET);
    assert!(GPRS + Gpr::R9 as usize * PTR_SIZE == PROBE_CPU_R9_OFFSET);
    assert!(GPRS + Gpr::R10 as usize * PTR_SIZE == PROBE_CPU_R10_OFFSET);
    assert!(GPRS + Gpr::R11 as usize * PTR_SIZE == PROBE_CPU_R11_OFFSET);
    assert!(GPRS + Gpr::R12 as usize * PTR_SIZE == PROBE_CPU_R12_OFFSET);
    assert!(GPRS + Gpr::R13 as usize * PTR_SIZE == PROBE_CPU_R13_OFFSET);
    assert!(GPRS + Gpr::R14 as usize * PTR_SIZE == PROBE_CPU_R14_OFFSET);
    assert!(GPRS + Gpr::R15 as usize * PTR_SIZE == PROBE_CPU_R15_OFFSET);

    assert!(SPRS + Spr::Rip as usize * PTR_SIZE == PROBE_CPU_RIP_OFFSET);
    assert!(SPRS + Spr::Rflags as usize * PTR_SIZE == PROBE_CPU_RFLAGS_OFFSET);

    assert!(PROBE_CPU_XMM0_OFFSET & 0x7 == 0);
    assert!(FPRS + Fpr::Xmm0 as usize * FPR_SIZE == PROBE_CPU_XMM0_OFFSET);
    assert!(FPRS + Fpr::Xmm1 as usize * FPR_SIZE == PROBE_CPU_XMM1_OFFSET);
    assert!(FPRS + Fpr::Xmm2 as usize * FPR_SIZE == PROBE_CPU_XMM2_OFFSET);
    assert!(FPRS + Fpr::Xmm3 as usize * FPR_SIZE == PROBE_CPU_XMM3_OFFSET);
    assert!(FPRS + Fpr::Xmm4 as usize * FPR_SIZE == PROBE_CPU_XMM4_OFFSET);
    assert!(FPRS + Fpr::Xmm5 as usize * FPR_SIZE == PROBE_CPU_XMM5_OFFSET);
    assert!(FPRS + Fpr::Xmm6 as usize * FPR_SIZE == PROBE_CPU_XMM6_OFFSET);
    assert!(FPRS + Fpr::Xmm7 as usize * FPR_SIZE == PROBE_CPU_XMM7_OFFSET);
    assert!(FPRS + Fpr::Xmm8 as usize * FPR_SIZE == PROBE_CPU_XMM8_OFFSET);
    assert!(FPRS + Fpr::Xmm9 as usize * FPR_SIZE == PROBE_CPU_XMM9_OFFSET);
    assert!(FPRS + Fpr::Xmm10 as usize * FPR_SIZE == PROBE_CPU_XMM10_OFFSET);
    assert!(FPRS + Fpr::Xmm11 as usize * FPR_SIZE == PROBE_CPU_XMM11_OFFSET);
    assert!(FPRS + Fpr::Xmm12 as usize * FPR_SIZE == PROBE_CPU_XMM12_OFFSET);
    assert!(FPRS + Fpr::Xmm13 as usize * FPR_SIZE == PROBE_CPU_XMM13_OFFSET);
    assert!(FPRS + Fpr::Xmm14 as usize * FPR_SIZE == PROBE_CPU_XMM14_OFFSET);
    assert!(FPRS + Fpr::Xmm15 as usize * FPR_SIZE == PROBE_CPU_XMM15_OFFSET);

    assert!(size_of::<ProbeContext>() == PROBE_SIZE);
    assert!(PROBE_FRAME_SIZE % PTR_SIZE == 0);
};
