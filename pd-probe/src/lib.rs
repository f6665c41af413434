//! Inline probes for JIT-generated x86 code.
//!
//! A probe is a short instruction sequence that hands the complete CPU state
//! to native code and resumes with whatever register values that code leaves
//! in the record, including pc and sp.

pub mod assembler;
pub mod assign;
pub mod config;
pub mod error;
pub mod memory;
pub mod printer;
pub mod probe;
pub mod ptr_tag;
pub mod trampoline;

pub use assembler::ProbeSequence;
pub use assign::{OverrideRegisters, RegisterAssignment, RegisterTarget};
#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
pub use assembler::insert_probe;
pub use config::ProbeConfig;
pub use error::{ProbeError, ProbeResult};
pub use memory::{ExecutableMemory, WritableCode};
pub use printer::{PrintRegisters, format_cpu_state};
pub use probe::{
    ProbeEmitter, ProbeHandler, ProbeResume, ProbeSite, ProbeSiteStats, ProbeSnapshot,
    resume_pc_tagged, set_resume_pc_tagged,
};
pub use probe_abi::{CpuState, Fpr, Gpr, ProbeContext, ProbeFunction, Spr, probe_callback};
pub use ptr_tag::PtrTag;
pub use trampoline::probe_trampoline_address;

/// Whether this target has a probe trampoline.
pub const fn probe_supported() -> bool {
    cfg!(any(target_arch = "x86", target_arch = "x86_64"))
}
