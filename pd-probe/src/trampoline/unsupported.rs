use super::TrampolineBackend;

pub(super) struct UnsupportedTrampoline;

impl TrampolineBackend for UnsupportedTrampoline {
    const ARCH: &'static str = "unsupported";

    fn entry_address() -> usize {
        probe_trampoline as *const () as usize
    }
}

/// Nothing can reach this: the emitter refuses to insert probes on targets
/// without a trampoline. Jumping here anyway is a hard failure.
pub(super) extern "C" fn probe_trampoline() -> ! {
    tracing::error!("probe trampoline entered on an unsupported target");
    std::process::abort()
}
