//! Record layout for 32-bit x86 targets.

use core::mem::{offset_of, size_of};

pub type Word = u32;

pub const PTR_SIZE: usize = 4;
pub const FPR_SIZE: usize = 8;

register_ids! {
    /// General purpose registers in ModRM encoding order.
    Gpr {
        Eax = "eax",
        Ecx = "ecx",
        Edx = "edx",
        Ebx = "ebx",
        Esp = "esp",
        Ebp = "ebp",
        Esi = "esi",
        Edi = "edi",
    }
}

register_ids! {
    Spr {
        Eip = "eip",
        Eflags = "eflags",
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
    }
}

impl Gpr {
    pub const STACK_POINTER: Gpr = Gpr::Esp;
    pub const FRAME_POINTER: Gpr = Gpr::Ebp;
    /// The one register the inline probe sequence clobbers before the
    /// trampoline takes over.
    pub const SCRATCH: Gpr = Gpr::Eax;
}

impl Spr {
    pub const INSTRUCTION_POINTER: Spr = Spr::Eip;
    pub const FLAGS: Spr = Spr::Eflags;
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

#[cfg(target_pointer_width = "32")]
probe_context_pointer_accessors!();

/// Offsets the trampoline uses to address [`ProbeContext`] fields.
pub mod offsets {
    use super::{FPR_SIZE, Fpr, Gpr, PTR_SIZE};

    pub const PROBE_PROBE_FUNCTION_OFFSET: usize = 0;
    pub const PROBE_ARG_OFFSET: usize = PTR_SIZE;
    pub const PROBE_INIT_STACK_FUNCTION_OFFSET: usize = 2 * PTR_SIZE;
    pub const PROBE_INIT_STACK_ARG_OFFSET: usize = 3 * PTR_SIZE;

    pub const PROBE_FIRST_GPR_OFFSET: usize = 4 * PTR_SIZE;
    pub const PROBE_CPU_EAX_OFFSET: usize = PROBE_FIRST_GPR_OFFSET;
    pub const PROBE_CPU_ECX_OFFSET: usize = PROBE_FIRST_GPR_OFFSET + PTR_SIZE;
    pub const PROBE_CPU_EDX_OFFSET: usize = PROBE_FIRST_GPR_OFFSET + 2 * PTR_SIZE;
    pub const PROBE_CPU_EBX_OFFSET: usize = PROBE_FIRST_GPR_OFFSET + 3 * PTR_SIZE;
    pub const PROBE_CPU_ESP_OFFSET: usize = PROBE_FIRST_GPR_OFFSET + 4 * PTR_SIZE;
    pub const PROBE_CPU_EBP_OFFSET: usize = PROBE_FIRST_GPR_OFFSET + 5 * PTR_SIZE;
    pub const PROBE_CPU_ESI_OFFSET: usize = PROBE_FIRST_GPR_OFFSET + 6 * PTR_SIZE;
    pub const PROBE_CPU_EDI_OFFSET: usize = PROBE_FIRST_GPR_OFFSET + 7 * PTR_SIZE;

    pub const PROBE_FIRST_SPR_OFFSET: usize = PROBE_FIRST_GPR_OFFSET + 8 * PTR_SIZE;
    pub const PROBE_CPU_EIP_OFFSET: usize = PROBE_FIRST_SPR_OFFSET;
    pub const PROBE_CPU_EFLAGS_OFFSET: usize = PROBE_FIRST_SPR_OFFSET + PTR_SIZE;
    pub const PROBE_FIRST_XMM_OFFSET: usize = PROBE_FIRST_SPR_OFFSET + 2 * PTR_SIZE;

    pub const PROBE_CPU_XMM0_OFFSET: usize = PROBE_FIRST_XMM_OFFSET;
    pub const PROBE_CPU_XMM1_OFFSET: usize = PROBE_FIRST_XMM_OFFSET + FPR_SIZE;
    pub const PROBE_CPU_XMM2_OFFSET: usize = PROBE_FIRST_XMM_OFFSET + 2 * FPR_SIZE;
    pub const PROBE_CPU_XMM3_OFFSET: usize = PROBE_FIRST_XMM_OFFSET + 3 * FPR_SIZE;
    pub const PROBE_CPU_XMM4_OFFSET: usize = PROBE_FIRST_XMM_OFFSET + 4 * FPR_SIZE;
    pub const PROBE_CPU_XMM5_OFFSET: usize = PROBE_FIRST_XMM_OFFSET + 5 * FPR_SIZE;
    pub const PROBE_CPU_XMM6_OFFSET: usize = PROBE_FIRST_XMM_OFFSET + 6 * FPR_SIZE;
    pub const PROBE_CPU_XMM7_OFFSET: usize = PROBE_FIRST_XMM_OFFSET + 7 * FPR_SIZE;

    pub const PROBE_SIZE: usize = PROBE_CPU_XMM7_OFFSET + FPR_SIZE;

    /// Words popped off the restore area on the way out: eflags, eax, ecx, ebp, eip.
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

    assert!(GPRS + Gpr::Eax as usize * PTR_SIZE == PROBE_CPU_EAX_OFFSET);
    assert!(GPRS + Gpr::Ecx as usize * PTR_SIZE == PROBE_CPU_ECX_OFFSET);
    assert!(GPRS + Gpr::Edx as usize * PTR_SIZE == PROBE_CPU_EDX_OFFSET);
    assert!(GPRS + Gpr::Ebx as usize * PTR_SIZE == PROBE_CPU_EBX_OFFSET);
    assert!(GPRS + Gpr::Esp as usize * PTR_SIZE == PROBE_CPU_ESP_OFFSET);
    assert!(GPRS + Gpr::Ebp as usize * PTR_SIZE == PROBE_CPU_EBP_OFFSET);
    assert!(GPRS + Gpr::Esi as usize * PTR_SIZE == PROBE_CPU_ESI_OFFSET);
    assert!(GPRS + Gpr::Edi as usize * PTR_SIZE == PROBE_CPU_EDI_OFFSET);

    assert!(SPRS + Spr::Eip as usize * PTR_SIZE == PROBE_CPU_EIP_OFFSET);
    assert!(SPRS + Spr::Eflags as usize * PTR_SIZE == PROBE_CPU_EFLAGS_OFFSET);

    assert!(PROBE_CPU_XMM0_OFFSET & 0x7 == 0);
    assert!(FPRS + Fpr::Xmm0 as usize * FPR_SIZE == PROBE_CPU_XMM0_OFFSET);
    assert!(FPRS + Fpr::Xmm1 as usize * FPR_SIZE == PROBE_CPU_XMM1_OFFSET);
    assert!(FPRS + Fpr::Xmm2 as usize * FPR_SIZE == PROBE_CPU_XMM2_OFFSET);
    assert!(FPRS + Fpr::Xmm3 as usize * FPR_SIZE == PROBE_CPU_XMM3_OFFSET);
    assert!(FPRS + Fpr::Xmm4 as usize * FPR_SIZE == PROBE_CPU_XMM4_OFFSET);
    assert!(FPRS + Fpr::Xmm5 as usize * FPR_SIZE == PROBE_CPU_XMM5_OFFSET);
    assert!(FPRS + Fpr::Xmm6 as usize * FPR_SIZE == PROBE_CPU_XMM6_OFFSET);
    assert!(FPRS + Fpr::Xmm7 as usize * FPR_SIZE == PROBE_CPU_XMM7_OFFSET);

    assert!(size_of::<ProbeContext>() == PROBE_SIZE);
    assert!(PROBE_FRAME_SIZE % PTR_SIZE == 0);
};
#[cfg(test)]
mod tests {
    use super::offsets::*;
    use super::*;

    #[test]
    fn record_matches_the_frame_the_trampoline_reserves() {
        assert_eq!(PROBE_FIRST_GPR_OFFSET, 16);
        assert_eq!(PROBE_CPU_ESP_OFFSET, 32);
        assert_eq!(PROBE_CPU_EIP_OFFSET, 48);
        assert_eq!(PROBE_FIRST_XMM_OFFSET, 56);
        assert_eq!(PROBE_SIZE, 120);
        assert_eq!(PROBE_FRAME_SIZE, 140);
    }

    #[test]
    fn set_gpr_truncates_to_the_word_size() {
        let mut cpu = CpuState::default();
        cpu.set_gpr(Gpr::Ebx, 0x1234_5678);
        assert_eq!(cpu.gpr(Gpr::Ebx), 0x1234_5678);
        assert_eq!(Gpr::COUNT, 8);
        assert_eq!(Fpr::COUNT, 8);
    }
}
