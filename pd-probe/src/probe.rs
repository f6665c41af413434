use std::ffi::c_void;
use std::sync::atomic::{AtomicU64, Ordering};

use probe_abi::{ProbeContext, ProbeFunction};
use tracing::{debug, trace, warn};

use crate::assembler::ProbeSequence;
use crate::config::ProbeConfig;
use crate::ptr_tag::{PtrTag, tag_code_ptr, untag_code_ptr};

/// What the dispatch shim does after a handler returns.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ProbeResume {
    #[default]
    Continue,
    /// Call [`ProbeHandler::on_stack_initialized`] once the record sits at its
    /// final location, for this hit only.
    InitializeStack,
}

/// Native logic attached to a probe site.
///
/// Handlers run on the thread that reached the probe, with exclusive access to
/// the record until they return. They must not run code containing their own
/// probe site.
pub trait ProbeHandler {
    fn on_probe(&mut self, context: &mut ProbeContext) -> ProbeResume;

    /// Runs after any relocation. Must not change the stack pointer.
    fn on_stack_initialized(&mut self, _context: &mut ProbeContext) {}
}

impl<F> ProbeHandler for F
where
    F: FnMut(&mut ProbeContext),
{
    fn on_probe(&mut self, context: &mut ProbeContext) -> ProbeResume {
        self(context);
        ProbeResume::Continue
    }
}

struct HandlerSlot {
    site: usize,
    trace_hits: bool,
    hits: AtomicU64,
    handler: Box<dyn ProbeHandler>,
}

impl HandlerSlot {
    fn dispatch(&mut self, context: &mut ProbeContext) {
        let hits = self.hits.fetch_add(1, Ordering::Relaxed) + 1;
        if self.trace_hits {
            trace!(
                site = self.site,
                hits,
                pc = format_args!("{:#x}", context.pc()),
                sp = format_args!("{:#x}", context.sp()),
                "probe hit"
            );
        }
        if self.handler.on_probe(context) == ProbeResume::InitializeStack {
            let slot = (self as *mut Self).cast::<c_void>();
            context.set_initialize_stack_function(Some(initialize_stack_shim), slot);
        }
    }
}

probe_abi::probe_callback! {
    fn dispatch_shim(context: *mut ProbeContext) {
        // SAFETY: the trampoline hands over a live record it owns, and `arg`
        // was set to a slot the emitter keeps alive with the code.
        let context = unsafe { &mut *context };
        let slot = unsafe { &mut *context.arg_ptr().cast::<HandlerSlot>() };
        slot.dispatch(context);
    }
}

probe_abi::probe_callback! {
    fn initialize_stack_shim(context: *mut ProbeContext) {
        // SAFETY: as in `dispatch_shim`; the slot pointer was installed by
        // `HandlerSlot::dispatch` for this hit.
        let context = unsafe { &mut *context };
        let slot = unsafe { &mut *context.initialize_stack_arg_ptr().cast::<HandlerSlot>() };
        slot.handler.on_stack_initialized(context);
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProbeSite {
    pub id: usize,
    pub label: Option<String>,
    pub start: usize,
    pub resume: usize,
    /// Callback address, tagged as [`PtrTag::CFunction`].
    pub function: usize,
    pub arg: usize,
    /// False for raw probes planted with [`ProbeEmitter::insert_probe`].
    pub counted: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProbeSiteStats {
    pub site: ProbeSite,
    pub hits: Option<u64>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProbeSnapshot {
    pub arch: &'static str,
    pub config: ProbeConfig,
    pub sites: Vec<ProbeSiteStats>,
}

/// Plants probes into code buffers and owns the handler state they call into.
///
/// Code containing probes from this emitter must not run after the emitter is
/// dropped.
pub struct ProbeEmitter {
    config: ProbeConfig,
    sites: Vec<ProbeSite>,
    slots: Vec<Option<*mut HandlerSlot>>,
}

impl Default for ProbeEmitter {
    fn default() -> Self {
        Self::new(ProbeConfig::default())
    }
}

impl ProbeEmitter {
    pub fn new(config: ProbeConfig) -> Self {
        Self {
            config,
            sites: Vec::new(),
            slots: Vec::new(),
        }
    }

    pub fn config(&self) -> &ProbeConfig {
        &self.config
    }

    /// Plants a probe calling `function` directly with `arg` in the record.
    /// Returns `None` without touching `code` when probes are disabled.
    pub fn insert_probe(
        &mut self,
        code: &mut Vec<u8>,
        function: ProbeFunction,
        arg: *mut c_void,
    ) -> Option<ProbeSequence> {
        if !self.ready() {
            return None;
        }
        self.plant(code, None, function, arg, None)
    }

    /// Plants a probe dispatching to `handler`.
    pub fn insert_probe_with<H>(&mut self, code: &mut Vec<u8>, handler: H) -> Option<ProbeSequence>
    where
        H: ProbeHandler + 'static,
    {
        self.insert_labeled_probe(code, None, handler)
    }

    pub fn insert_labeled_probe<H>(
        &mut self,
        code: &mut Vec<u8>,
        label: Option<String>,
        handler: H,
    ) -> Option<ProbeSequence>
    where
        H: ProbeHandler + 'static,
    {
        if !self.ready() {
            return None;
        }
        let slot = Box::into_raw(Box::new(HandlerSlot {
            site: self.sites.len(),
            trace_hits: self.config.trace_hits,
            hits: AtomicU64::new(0),
            handler: Box::new(handler),
        }));
        let sequence = self.plant(code, label, dispatch_shim, slot.cast(), Some(slot));
        if sequence.is_none() {
            // SAFETY: `plant` did not keep the slot.
            drop(unsafe { Box::from_raw(slot) });
        }
        sequence
    }

    /// Plants a probe that logs every register at `info` level.
    pub fn insert_print_probe(
        &mut self,
        code: &mut Vec<u8>,
        label: impl Into<String>,
    ) -> Option<ProbeSequence> {
        let label = label.into();
        let printer = crate::printer::PrintRegisters::new(label.clone());
        self.insert_labeled_probe(code, Some(label), printer)
    }

    pub fn sites(&self) -> &[ProbeSite] {
        &self.sites
    }

    /// Times the site's handler has run. `None` for raw probes and unknown ids.
    pub fn hits(&self, id: usize) -> Option<u64> {
        let slot = (*self.slots.get(id)?)?;
        // SAFETY: slots stay allocated until `self` is dropped.
        Some(unsafe { (*slot).hits.load(Ordering::Relaxed) })
    }

    pub fn snapshot(&self) -> ProbeSnapshot {
        ProbeSnapshot {
            arch: crate::trampoline::trampoline_arch(),
            config: self.config.clone(),
            sites: self
                .sites
                .iter()
                .map(|site| ProbeSiteStats {
                    site: site.clone(),
                    hits: self.hits(site.id),
                })
                .collect(),
        }
    }

    pub fn dump_text(&self) -> String {
        let snapshot = self.snapshot();
        let mut out = String::new();
        out.push_str("probes:\n");
        out.push_str(&format!("  arch: {}\n", snapshot.arch));
        out.push_str(&format!("  enabled: {}\n", snapshot.config.enabled));
        out.push_str(&format!("  sites: {}\n", snapshot.sites.len()));
        for stats in &snapshot.sites {
            let label = stats.site.label.as_deref().unwrap_or("-");
            let hits = stats
                .hits
                .map(|hits| hits.to_string())
                .unwrap_or_else(|| "-".to_string());
            out.push_str(&format!(
                "  probe#{} label={} start={} resume={} hits={}\n",
                stats.site.id, label, stats.site.start, stats.site.resume, hits
            ));
        }
        out
    }

    fn ready(&self) -> bool {
        if !self.config.enabled {
            warn!("probe insertion requested while probes are disabled");
            return false;
        }
        true
    }

    fn plant(
        &mut self,
        code: &mut Vec<u8>,
        label: Option<String>,
        function: ProbeFunction,
        arg: *mut c_void,
        slot: Option<*mut HandlerSlot>,
    ) -> Option<ProbeSequence> {
        let function = tag_code_ptr(function, PtrTag::CFunction);
        let arg = tag_code_ptr(arg, PtrTag::NoPtrTag);
        let sequence = emit_sequence(
            code,
            untag_code_ptr(function, PtrTag::CFunction),
            untag_code_ptr(arg, PtrTag::NoPtrTag),
        )?;
        let id = self.sites.len();
        debug!(
            id,
            label = label.as_deref().unwrap_or("-"),
            start = sequence.start,
            resume = sequence.resume,
            "planted probe"
        );
        self.sites.push(ProbeSite {
            id,
            label,
            start: sequence.start,
            resume: sequence.resume,
            function: function as usize,
            arg: arg as usize,
            counted: slot.is_some(),
        });
        self.slots.push(slot);
        Some(sequence)
    }
}

impl Drop for ProbeEmitter {
    fn drop(&mut self) {
        for slot in self.slots.drain(..).flatten() {
            // SAFETY: every slot came from `Box::into_raw` and is freed once.
            drop(unsafe { Box::from_raw(slot) });
        }
    }
}

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
fn emit_sequence(
    code: &mut Vec<u8>,
    function: ProbeFunction,
    arg: *mut c_void,
) -> Option<ProbeSequence> {
    Some(crate::assembler::insert_probe(code, function, arg))
}

#[cfg(not(any(target_arch = "x86", target_arch = "x86_64")))]
fn emit_sequence(
    _code: &mut Vec<u8>,
    _function: ProbeFunction,
    _arg: *mut c_void,
) -> Option<ProbeSequence> {
    warn!("no probe trampoline for {}", std::env::consts::ARCH);
    None
}

/// The record's resume address as a code pointer tagged with `tag`.
pub fn resume_pc_tagged(context: &ProbeContext, tag: PtrTag) -> usize {
    tag_code_ptr(context.pc(), tag)
}

/// Sets the resume address from a code pointer tagged with `tag`.
pub fn set_resume_pc_tagged(context: &mut ProbeContext, pc: usize, tag: PtrTag) {
    context.set_pc(untag_code_ptr(pc, tag));
}
