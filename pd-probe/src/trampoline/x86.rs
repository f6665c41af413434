use core::arch::naked_asm;

use probe_abi::x86::offsets::*;
use probe_abi::x86::PTR_SIZE;

use super::TrampolineBackend;

/// Outgoing argument area reserved below the record for each cdecl call.
const OUTGOING_ARGS_SIZE: usize = 0x20;

pub(super) struct X86Trampoline;

impl TrampolineBackend for X86Trampoline {
    const ARCH: &'static str = "x86";

    fn entry_address() -> usize {
        probe_trampoline as *const () as usize
    }
}

/// 32-bit twin of the x86_64 trampoline. Same stack contract, with the
/// record pointer passed on the stack instead of in a register.
#[unsafe(naked)]
pub(super) unsafe extern "C" fn probe_trampoline() {
    naked_asm!(
        "pushfd",
        // The inline sequence plus the pushfd above left, from esp upwards:
        // eflags, resume eip, probe function, arg, saved eax, saved esp.
        "mov eax, esp",
        "sub esp, {frame_size}",
        "and esp, -{alignment}",
        "mov dword ptr [esp + {cpu_ebp}], ebp",
        "mov ebp, esp",
        "mov dword ptr [ebp + {cpu_ecx}], ecx",
        "mov dword ptr [ebp + {cpu_edx}], edx",
        "mov dword ptr [ebp + {cpu_ebx}], ebx",
        "mov dword ptr [ebp + {cpu_esi}], esi",
        "mov dword ptr [ebp + {cpu_edi}], edi",
        "mov ecx, dword ptr [eax]",
        "mov dword ptr [ebp + {cpu_eflags}], ecx",
        "mov ecx, dword ptr [eax + {ptr_size}]",
        "mov dword ptr [ebp + {cpu_eip}], ecx",
        "mov ecx, dword ptr [eax + 2 * {ptr_size}]",
        "mov dword ptr [ebp + {probe_function}], ecx",
        "mov ecx, dword ptr [eax + 3 * {ptr_size}]",
        "mov dword ptr [ebp + {arg}], ecx",
        "mov ecx, dword ptr [eax + 4 * {ptr_size}]",
        "mov dword ptr [ebp + {cpu_eax}], ecx",
        "mov ecx, dword ptr [eax + 5 * {ptr_size}]",
        "mov dword ptr [ebp + {cpu_esp}], ecx",
        "movq qword ptr [ebp + {cpu_xmm0}], xmm0",
        "movq qword ptr [ebp + {cpu_xmm1}], xmm1",
        "movq qword ptr [ebp + {cpu_xmm2}], xmm2",
        "movq qword ptr [ebp + {cpu_xmm3}], xmm3",
        "movq qword ptr [ebp + {cpu_xmm4}], xmm4",
        "movq qword ptr [ebp + {cpu_xmm5}], xmm5",
        "movq qword ptr [ebp + {cpu_xmm6}], xmm6",
        "movq qword ptr [ebp + {cpu_xmm7}], xmm7",
        "xor eax, eax",
        "mov dword ptr [ebp + {init_stack_function}], eax",
        "cld",
        // cdecl: the record pointer goes on a 32-byte aligned outgoing area.
        "sub esp, {outgoing_size}",
        "mov dword ptr [esp], ebp",
        "call dword ptr [ebp + {probe_function}]",
        "mov ecx, {frame_size}",
        "mov eax, ebp",
        "mov edx, dword ptr [ebp + {cpu_esp}]",
        "add eax, ecx",
        "cmp edx, eax",
        "jae 2f",
        "sub edx, ecx",
        "and edx, -{alignment}",
        "xor eax, eax",
        "mov esp, edx",
        "mov ecx, {probe_size}",
        "3:",
        "mov edx, dword ptr [ebp + eax]",
        "mov dword ptr [esp + eax], edx",
        "add eax, {ptr_size}",
        "cmp ecx, eax",
        "ja 3b",
        "mov ebp, esp",
        "2:",
        "mov ecx, dword ptr [ebp + {init_stack_function}]",
        "test ecx, ecx",
        "jz 4f",
        "sub esp, {outgoing_size}",
        "mov dword ptr [esp], ebp",
        "call ecx",
        "4:",
        "mov edx, dword ptr [ebp + {cpu_edx}]",
        "mov ebx, dword ptr [ebp + {cpu_ebx}]",
        "mov esi, dword ptr [ebp + {cpu_esi}]",
        "mov edi, dword ptr [ebp + {cpu_edi}]",
        "movq xmm0, qword ptr [ebp + {cpu_xmm0}]",
        "movq xmm1, qword ptr [ebp + {cpu_xmm1}]",
        "movq xmm2, qword ptr [ebp + {cpu_xmm2}]",
        "movq xmm3, qword ptr [ebp + {cpu_xmm3}]",
        "movq xmm4, qword ptr [ebp + {cpu_xmm4}]",
        "movq xmm5, qword ptr [ebp + {cpu_xmm5}]",
        "movq xmm6, qword ptr [ebp + {cpu_xmm6}]",
        "movq xmm7, qword ptr [ebp + {cpu_xmm7}]",
        "mov ecx, dword ptr [ebp + {cpu_esp}]",
        "sub ecx, {out_size}",
        "mov eax, dword ptr [ebp + {cpu_eflags}]",
        "mov dword ptr [ecx], eax",
        "mov eax, dword ptr [ebp + {cpu_eax}]",
        "mov dword ptr [ecx + {ptr_size}], eax",
        "mov eax, dword ptr [ebp + {cpu_ecx}]",
        "mov dword ptr [ecx + 2 * {ptr_size}], eax",
        "mov eax, dword ptr [ebp + {cpu_ebp}]",
        "mov dword ptr [ecx + 3 * {ptr_size}], eax",
        "mov eax, dword ptr [ebp + {cpu_eip}]",
        "mov dword ptr [ecx + 4 * {ptr_size}], eax",
        "mov esp, ecx",
        "popfd",
        "pop eax",
        "pop ecx",
        "pop ebp",
        "ret",
        probe_function = const PROBE_PROBE_FUNCTION_OFFSET,
        arg = const PROBE_ARG_OFFSET,
        init_stack_function = const PROBE_INIT_STACK_FUNCTION_OFFSET,
        cpu_eax = const PROBE_CPU_EAX_OFFSET,
        cpu_ecx = const PROBE_CPU_ECX_OFFSET,
        cpu_edx = const PROBE_CPU_EDX_OFFSET,
        cpu_ebx = const PROBE_CPU_EBX_OFFSET,
        cpu_esp = const PROBE_CPU_ESP_OFFSET,
        cpu_ebp = const PROBE_CPU_EBP_OFFSET,
        cpu_esi = const PROBE_CPU_ESI_OFFSET,
        cpu_edi = const PROBE_CPU_EDI_OFFSET,
        cpu_eip = const PROBE_CPU_EIP_OFFSET,
        cpu_eflags = const PROBE_CPU_EFLAGS_OFFSET,
        cpu_xmm0 = const PROBE_CPU_XMM0_OFFSET,
        cpu_xmm1 = const PROBE_CPU_XMM1_OFFSET,
        cpu_xmm2 = const PROBE_CPU_XMM2_OFFSET,
        cpu_xmm3 = const PROBE_CPU_XMM3_OFFSET,
        cpu_xmm4 = const PROBE_CPU_XMM4_OFFSET,
        cpu_xmm5 = const PROBE_CPU_XMM5_OFFSET,
        cpu_xmm6 = const PROBE_CPU_XMM6_OFFSET,
        cpu_xmm7 = const PROBE_CPU_XMM7_OFFSET,
        probe_size = const PROBE_SIZE,
        out_size = const OUT_SIZE,
        frame_size = const PROBE_FRAME_SIZE,
        outgoing_size = const OUTGOING_ARGS_SIZE,
        ptr_size = const PTR_SIZE,
        alignment = const STACK_ALIGNMENT,
    );
}
