use core::arch::naked_asm;

use probe_abi::x86_64::offsets::*;
use probe_abi::x86_64::PTR_SIZE;

use super::TrampolineBackend;

pub(super) struct X86_64Trampoline;

impl TrampolineBackend for X86_64Trampoline {
    const ARCH: &'static str = "x86_64";

    fn entry_address() -> usize {
        probe_trampoline as *const () as usize
    }
}

/// Entered by `call rax` from the inline probe sequence. Never called from
/// Rust: it has no real signature, builds a `ProbeContext` below the stack,
/// dispatches the callback, optionally relocates the record and runs the
/// stack initializer, then restores every register and returns to the
/// recorded rip with the recorded rsp.
#[unsafe(naked)]
pub(super) unsafe extern "C" fn probe_trampoline() {
    naked_asm!(
        "pushfq",
        // The inline sequence plus the pushfq above left, from rsp upwards:
        // rflags, resume rip, probe function, arg, saved rax, saved rsp.
        "mov rax, rsp",
        "sub rsp, {frame_size}",
        "and rsp, -{alignment}",
        "mov qword ptr [rsp + {cpu_rbp}], rbp",
        "mov rbp, rsp",
        "mov qword ptr [rbp + {cpu_rcx}], rcx",
        "mov qword ptr [rbp + {cpu_rdx}], rdx",
        "mov qword ptr [rbp + {cpu_rbx}], rbx",
        "mov qword ptr [rbp + {cpu_rsi}], rsi",
        "mov qword ptr [rbp + {cpu_rdi}], rdi",
        "mov rcx, qword ptr [rax]",
        "mov qword ptr [rbp + {cpu_rflags}], rcx",
        "mov rcx, qword ptr [rax + {ptr_size}]",
        "mov qword ptr [rbp + {cpu_rip}], rcx",
        "mov rcx, qword ptr [rax + 2 * {ptr_size}]",
        "mov qword ptr [rbp + {probe_function}], rcx",
        "mov rcx, qword ptr [rax + 3 * {ptr_size}]",
        "mov qword ptr [rbp + {arg}], rcx",
        "mov rcx, qword ptr [rax + 4 * {ptr_size}]",
        "mov qword ptr [rbp + {cpu_rax}], rcx",
        "mov rcx, qword ptr [rax + 5 * {ptr_size}]",
        "mov qword ptr [rbp + {cpu_rsp}], rcx",
        "mov qword ptr [rbp + {cpu_r8}], r8",
        "mov qword ptr [rbp + {cpu_r9}], r9",
        "mov qword ptr [rbp + {cpu_r10}], r10",
        "mov qword ptr [rbp + {cpu_r11}], r11",
        "mov qword ptr [rbp + {cpu_r12}], r12",
        "mov qword ptr [rbp + {cpu_r13}], r13",
        "mov qword ptr [rbp + {cpu_r14}], r14",
        "mov qword ptr [rbp + {cpu_r15}], r15",
        "movq qword ptr [rbp + {cpu_xmm0}], xmm0",
        "movq qword ptr [rbp + {cpu_xmm1}], xmm1",
        "movq qword ptr [rbp + {cpu_xmm2}], xmm2",
        "movq qword ptr [rbp + {cpu_xmm3}], xmm3",
        "movq qword ptr [rbp + {cpu_xmm4}], xmm4",
        "movq qword ptr [rbp + {cpu_xmm5}], xmm5",
        "movq qword ptr [rbp + {cpu_xmm6}], xmm6",
        "movq qword ptr [rbp + {cpu_xmm7}], xmm7",
        "movq qword ptr [rbp + {cpu_xmm8}], xmm8",
        "movq qword ptr [rbp + {cpu_xmm9}], xmm9",
        "movq qword ptr [rbp + {cpu_xmm10}], xmm10",
        "movq qword ptr [rbp + {cpu_xmm11}], xmm11",
        "movq qword ptr [rbp + {cpu_xmm12}], xmm12",
        "movq qword ptr [rbp + {cpu_xmm13}], xmm13",
        "movq qword ptr [rbp + {cpu_xmm14}], xmm14",
        "movq qword ptr [rbp + {cpu_xmm15}], xmm15",
        "xor eax, eax",
        "mov qword ptr [rbp + {init_stack_function}], rax",
        "cld",
        "mov rdi, rbp",
        "call qword ptr [rbp + {probe_function}]",
        // The record must end below the requested stack pointer, otherwise
        // writing the restore area would clobber it.
        "mov rcx, {frame_size}",
        "mov rax, rbp",
        "mov rdx, qword ptr [rbp + {cpu_rsp}]",
        "add rax, rcx",
        "cmp rdx, rax",
        "jae 2f",
        "sub rdx, rcx",
        "and rdx, -{alignment}",
        "xor eax, eax",
        "mov rsp, rdx",
        "mov rcx, {probe_size}",
        "3:",
        "mov rdx, qword ptr [rbp + rax]",
        "mov qword ptr [rsp + rax], rdx",
        "add rax, {ptr_size}",
        "cmp rcx, rax",
        "ja 3b",
        "mov rbp, rsp",
        "2:",
        "mov rcx, qword ptr [rbp + {init_stack_function}]",
        "test rcx, rcx",
        "jz 4f",
        "mov rdi, rbp",
        "call rcx",
        "4:",
        "mov rdx, qword ptr [rbp + {cpu_rdx}]",
        "mov rbx, qword ptr [rbp + {cpu_rbx}]",
        "mov rsi, qword ptr [rbp + {cpu_rsi}]",
        "mov rdi, qword ptr [rbp + {cpu_rdi}]",
        "mov r8, qword ptr [rbp + {cpu_r8}]",
        "mov r9, qword ptr [rbp + {cpu_r9}]",
        "mov r10, qword ptr [rbp + {cpu_r10}]",
        "mov r11, qword ptr [rbp + {cpu_r11}]",
        "mov r12, qword ptr [rbp + {cpu_r12}]",
        "mov r13, qword ptr [rbp + {cpu_r13}]",
        "mov r14, qword ptr [rbp + {cpu_r14}]",
        "mov r15, qword ptr [rbp + {cpu_r15}]",
        "movq xmm0, qword ptr [rbp + {cpu_xmm0}]",
        "movq xmm1, qword ptr [rbp + {cpu_xmm1}]",
        "movq xmm2, qword ptr [rbp + {cpu_xmm2}]",
        "movq xmm3, qword ptr [rbp + {cpu_xmm3}]",
        "movq xmm4, qword ptr [rbp + {cpu_xmm4}]",
        "movq xmm5, qword ptr [rbp + {cpu_xmm5}]",
        "movq xmm6, qword ptr [rbp + {cpu_xmm6}]",
        "movq xmm7, qword ptr [rbp + {cpu_xmm7}]",
        "movq xmm8, qword ptr [rbp + {cpu_xmm8}]",
        "movq xmm9, qword ptr [rbp + {cpu_xmm9}]",
        "movq xmm10, qword ptr [rbp + {cpu_xmm10}]",
        "movq xmm11, qword ptr [rbp + {cpu_xmm11}]",
        "movq xmm12, qword ptr [rbp + {cpu_xmm12}]",
        "movq xmm13, qword ptr [rbp + {cpu_xmm13}]",
        "movq xmm14, qword ptr [rbp + {cpu_xmm14}]",
        "movq xmm15, qword ptr [rbp + {cpu_xmm15}]",
        // rflags, rax, rcx, rbp and rip go through the restore area right
        // below the requested rsp; popping it leaves rsp at that value.
        "mov rcx, qword ptr [rbp + {cpu_rsp}]",
        "sub rcx, {out_size}",
        "mov rax, qword ptr [rbp + {cpu_rflags}]",
        "mov qword ptr [rcx], rax",
        "mov rax, qword ptr [rbp + {cpu_rax}]",
        "mov qword ptr [rcx + {ptr_size}], rax",
        "mov rax, qword ptr [rbp + {cpu_rcx}]",
        "mov qword ptr [rcx + 2 * {ptr_size}], rax",
        "mov rax, qword ptr [rbp + {cpu_rbp}]",
        "mov qword ptr [rcx + 3 * {ptr_size}], rax",
        "mov rax, qword ptr [rbp + {cpu_rip}]",
        "mov qword ptr [rcx + 4 * {ptr_size}], rax",
        "mov rsp, rcx",
        "popfq",
        "pop rax",
        "pop rcx",
        "pop rbp",
        "ret",
        probe_function = const PROBE_PROBE_FUNCTION_OFFSET,
        arg = const PROBE_ARG_OFFSET,
        init_stack_function = const PROBE_INIT_STACK_FUNCTION_OFFSET,
        cpu_rax = const PROBE_CPU_RAX_OFFSET,
        cpu_rcx = const PROBE_CPU_RCX_OFFSET,
        cpu_rdx = const PROBE_CPU_RDX_OFFSET,
        cpu_rbx = const PROBE_CPU_RBX_OFFSET,
        cpu_rsp = const PROBE_CPU_RSP_OFFSET,
        cpu_rbp = const PROBE_CPU_RBP_OFFSET,
        cpu_rsi = const PROBE_CPU_RSI_OFFSET,
        cpu_rdi = const PROBE_CPU_RDI_OFFSET,
        cpu_r8 = const PROBE_CPU_R8_OFFSET,
        cpu_r9 = const PROBE_CPU_R9_OFFSET,
        cpu_r10 = const PROBE_CPU_R10_OFFSET,
        cpu_r11 = const PROBE_CPU_R11_OFFSET,
        cpu_r12 = const PROBE_CPU_R12_OFFSET,
        cpu_r13 = const PROBE_CPU_R13_OFFSET,
        cpu_r14 = const PROBE_CPU_R14_OFFSET,
        cpu_r15 = const PROBE_CPU_R15_OFFSET,
        cpu_rip = const PROBE_CPU_RIP_OFFSET,
        cpu_rflags = const PROBE_CPU_RFLAGS_OFFSET,
        cpu_xmm0 = const PROBE_CPU_XMM0_OFFSET,
        cpu_xmm1 = const PROBE_CPU_XMM1_OFFSET,
        cpu_xmm2 = const PROBE_CPU_XMM2_OFFSET,
        cpu_xmm3 = const PROBE_CPU_XMM3_OFFSET,
        cpu_xmm4 = const PROBE_CPU_XMM4_OFFSET,
        cpu_xmm5 = const PROBE_CPU_XMM5_OFFSET,
        cpu_xmm6 = const PROBE_CPU_XMM6_OFFSET,
        cpu_xmm7 = const PROBE_CPU_XMM7_OFFSET,
        cpu_xmm8 = const PROBE_CPU_XMM8_OFFSET,
        cpu_xmm9 = const PROBE_CPU_XMM9_OFFSET,
        cpu_xmm10 = const PROBE_CPU_XMM10_OFFSET,
        cpu_xmm11 = const PROBE_CPU_XMM11_OFFSET,
        cpu_xmm12 = const PROBE_CPU_XMM12_OFFSET,
        cpu_xmm13 = const PROBE_CPU_XMM13_OFFSET,
        cpu_xmm14 = const PROBE_CPU_XMM14_OFFSET,
        cpu_xmm15 = const PROBE_CPU_XMM15_OFFSET,
        probe_size = const PROBE_SIZE,
        out_size = const OUT_SIZE,
        frame_size = const PROBE_FRAME_SIZE,
        ptr_size = const PTR_SIZE,
        alignment = const STACK_ALIGNMENT,
    );
}
