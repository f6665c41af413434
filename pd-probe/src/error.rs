#[derive(Debug)]
pub enum ProbeError {
    EmptyCode,
    ExecutableMemory(String),
    CodeTooLarge { capacity: usize, len: usize },
    DisplacementOverflow { from: usize, to: usize },
    UnknownRegister(String),
    InvalidRegisterValue(String),
    InvalidConfig(String),
}

impl std::fmt::Display for ProbeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProbeError::EmptyCode => write!(f, "cannot create executable region for empty code"),
            ProbeError::ExecutableMemory(message) => {
                write!(f, "executable memory error: {message}")
            }
            ProbeError::CodeTooLarge { capacity, len } => {
                write!(f, "{len} bytes of code do not fit in a {capacity} byte region")
            }
            ProbeError::DisplacementOverflow { from, to } => write!(
                f,
                "jump displacement from offset {from} to offset {to} does not fit in 32 bits"
            ),
            ProbeError::UnknownRegister(name) => write!(f, "unknown register '{name}'"),
            ProbeError::InvalidRegisterValue(raw) => {
                write!(f, "invalid register value '{raw}'")
            }
            ProbeError::InvalidConfig(message) => write!(f, "invalid probe config: {message}"),
        }
    }
}

impl std::error::Error for ProbeError {}

pub type ProbeResult<T> = Result<T, ProbeError>;
