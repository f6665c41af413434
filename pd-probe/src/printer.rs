use std::fmt::Write as _;

use probe_abi::active::PTR_SIZE;
use probe_abi::{CpuState, Fpr, Gpr, ProbeContext, STATUS_FLAGS, Spr};
use tracing::info;

use crate::probe::{ProbeHandler, ProbeResume};

const GPRS_PER_LINE: usize = 4;

fn word(value: usize) -> String {
    format!("{value:#0width$x}", width = 2 + 2 * PTR_SIZE)
}

/// Status flags as letters, `-` for clear bits, most significant first.
pub fn format_flags(flags: usize) -> String {
    STATUS_FLAGS
        .iter()
        .map(|(bit, letter)| if flags & bit != 0 { *letter } else { '-' })
        .collect()
}

/// Multi-line dump of every register in `cpu`.
pub fn format_cpu_state(cpu: &CpuState) -> String {
    let mut out = String::new();
    for row in Gpr::ALL.chunks(GPRS_PER_LINE) {
        let line = row
            .iter()
            .map(|gpr| format!("{:>5}={}", gpr.name(), word(cpu.gpr(*gpr))))
            .collect::<Vec<_>>()
            .join(" ");
        let _ = writeln!(out, "{line}");
    }
    let _ = writeln!(
        out,
        "{:>5}={} {:>5}={} [{}]",
        Spr::INSTRUCTION_POINTER.name(),
        word(cpu.pc()),
        Spr::FLAGS.name(),
        word(cpu.flags()),
        format_flags(cpu.flags())
    );
    for fpr in Fpr::ALL {
        let _ = writeln!(
            out,
            "{:>5}={:#018x} ({})",
            fpr.name(),
            cpu.fpr_bits(*fpr),
            cpu.fpr_f64(*fpr)
        );
    }
    out
}

/// Logs the full register state each time the probe is hit.
pub struct PrintRegisters {
    label: String,
}

impl PrintRegisters {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
        }
    }
}

impl ProbeHandler for PrintRegisters {
    fn on_probe(&mut self, context: &mut ProbeContext) -> ProbeResume {
        info!(
            probe = %self.label,
            "cpu state at {:#x}:\n{}",
            context.pc(),
            format_cpu_state(&context.cpu)
        );
        ProbeResume::Continue
    }
}
