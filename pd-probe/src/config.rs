use crate::error::{ProbeError, ProbeResult};

pub const ENV_ENABLED: &str = "PD_PROBE_ENABLED";
pub const ENV_TRACE_HITS: &str = "PD_PROBE_TRACE_HITS";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProbeConfig {
    /// When false, probe insertion emits nothing.
    pub enabled: bool,
    /// Log every handler dispatch at trace level.
    pub trace_hits: bool,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            enabled: crate::probe_supported(),
            trace_hits: false,
        }
    }
}

impl ProbeConfig {
    pub fn from_env() -> ProbeResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> ProbeResult<Self> {
        let mut config = Self::default();
        if let Some(raw) = lookup(ENV_ENABLED) {
            config.enabled = parse_bool(ENV_ENABLED, &raw)? && crate::probe_supported();
        }
        if let Some(raw) = lookup(ENV_TRACE_HITS) {
            config.trace_hits = parse_bool(ENV_TRACE_HITS, &raw)?;
        }
        Ok(config)
    }
}

fn parse_bool(key: &str, raw: &str) -> ProbeResult<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ProbeError::InvalidConfig(format!(
            "{key} must be a boolean, got '{raw}'"
        ))),
    }
}
