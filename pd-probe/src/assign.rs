//! `reg=value` register overrides, as accepted by `pd-probe-run --set`.

use std::str::FromStr;
use std::sync::OnceLock;

use probe_abi::{CpuState, Fpr, Gpr, ProbeContext, Spr};
use regex::Regex;

use crate::error::{ProbeError, ProbeResult};
use crate::probe::{ProbeHandler, ProbeResume};

static ASSIGNMENT_PATTERN: OnceLock<Result<Regex, String>> = OnceLock::new();

fn assignment_pattern() -> ProbeResult<&'static Regex> {
    let cached = ASSIGNMENT_PATTERN.get_or_init(|| {
        Regex::new(
            r"^\s*(?P<reg>[A-Za-z][A-Za-z0-9]*)\s*=\s*(?P<value>[-+]?(?:0[xX][0-9A-Fa-f]+|[0-9]+(?:\.[0-9]*)?(?:[eE][-+]?[0-9]+)?))\s*$",
        )
        .map_err(|err| err.to_string())
    });
    match cached {
        Ok(pattern) => Ok(pattern),
        Err(message) => Err(ProbeError::InvalidConfig(message.clone())),
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegisterTarget {
    Gpr(Gpr),
    Spr(Spr),
    Fpr(Fpr),
}

impl RegisterTarget {
    /// Accepts architectural names plus the aliases `pc`, `sp`, `fp` and
    /// `flags`.
    pub fn from_name(name: &str) -> ProbeResult<Self> {
        let alias = match name.to_ascii_lowercase().as_str() {
            "pc" => Some(Self::Spr(Spr::INSTRUCTION_POINTER)),
            "flags" => Some(Self::Spr(Spr::FLAGS)),
            "sp" => Some(Self::Gpr(Gpr::STACK_POINTER)),
            "fp" => Some(Self::Gpr(Gpr::FRAME_POINTER)),
            _ => None,
        };
        alias
            .or_else(|| Gpr::from_name(name).map(Self::Gpr))
            .or_else(|| Spr::from_name(name).map(Self::Spr))
            .or_else(|| Fpr::from_name(name).map(Self::Fpr))
            .ok_or_else(|| ProbeError::UnknownRegister(name.to_string()))
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Gpr(id) => id.name(),
            Self::Spr(id) => id.name(),
            Self::Fpr(id) => id.name(),
        }
    }

    /// True for the stack and instruction pointers.
    pub fn redirects_control(self) -> bool {
        matches!(
            self,
            Self::Gpr(Gpr::STACK_POINTER) | Self::Spr(Spr::INSTRUCTION_POINTER)
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RegisterAssignment {
    pub target: RegisterTarget,
    /// Word value for integer registers, raw low-lane bits for vector ones.
    pub bits: u64,
}

impl RegisterAssignment {
    pub fn apply(&self, cpu: &mut CpuState) {
        match self.target {
            RegisterTarget::Gpr(id) => cpu.set_gpr(id, self.bits as usize),
            RegisterTarget::Spr(id) => cpu.set_spr(id, self.bits as usize),
            RegisterTarget::Fpr(id) => cpu.set_fpr_bits(id, self.bits),
        }
    }
}

impl FromStr for RegisterAssignment {
    type Err = ProbeError;

    fn from_str(text: &str) -> ProbeResult<Self> {
        let captures = assignment_pattern()?
            .captures(text)
            .ok_or_else(|| ProbeError::InvalidRegisterValue(text.to_string()))?;
        let target = RegisterTarget::from_name(&captures["reg"])?;
        let raw = &captures["value"];
        let bits = match target {
            RegisterTarget::Fpr(_) => parse_vector_bits(raw)?,
            RegisterTarget::Gpr(_) | RegisterTarget::Spr(_) => parse_word(raw)?,
        };
        Ok(Self { target, bits })
    }
}

fn parse_integer(raw: &str) -> Option<u64> {
    let (negative, digits) = match raw.as_bytes().first() {
        Some(b'-') => (true, &raw[1..]),
        Some(b'+') => (false, &raw[1..]),
        _ => (false, raw),
    };
    let magnitude = match digits.get(..2) {
        Some("0x" | "0X") => u64::from_str_radix(&digits[2..], 16).ok()?,
        _ => digits.parse::<u64>().ok()?,
    };
    if negative {
        let signed = i64::try_from(magnitude).ok()?;
        Some(signed.wrapping_neg() as u64)
    } else {
        Some(magnitude)
    }
}

fn parse_word(raw: &str) -> ProbeResult<u64> {
    let invalid = || ProbeError::InvalidRegisterValue(raw.to_string());
    let value = parse_integer(raw).ok_or_else(invalid)?;
    if raw.starts_with('-') {
        let signed = value as i64;
        let fits = isize::try_from(signed).is_ok();
        return if fits { Ok(signed as isize as usize as u64) } else { Err(invalid()) };
    }
    usize::try_from(value).map_err(|_| invalid())?;
    Ok(value)
}

fn parse_vector_bits(raw: &str) -> ProbeResult<u64> {
    let is_float = !raw.contains(['x', 'X']) && raw.contains(['.', 'e', 'E']);
    if is_float {
        return raw
            .parse::<f64>()
            .map(f64::to_bits)
            .map_err(|_| ProbeError::InvalidRegisterValue(raw.to_string()));
    }
    parse_integer(raw).ok_or_else(|| ProbeError::InvalidRegisterValue(raw.to_string()))
}

/// Handler that writes a fixed set of register values on every hit.
#[derive(Clone, Debug, Default)]
pub struct OverrideRegisters {
    assignments: Vec<RegisterAssignment>,
}

impl OverrideRegisters {
    pub fn new(assignments: Vec<RegisterAssignment>) -> Self {
        Self { assignments }
    }

    pub fn assignments(&self) -> &[RegisterAssignment] {
        &self.assignments
    }
}

impl ProbeHandler for OverrideRegisters {
    fn on_probe(&mut self, context: &mut ProbeContext) -> ProbeResume {
        for assignment in &self.assignments {
            assignment.apply(&mut context.cpu);
        }
        ProbeResume::Continue
    }
}
