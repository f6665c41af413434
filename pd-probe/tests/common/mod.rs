#![allow(dead_code, unused_imports)]

use std::cell::Cell;
use std::mem::offset_of;
use std::rc::Rc;

pub use probe::assembler::ProbeSequence;
pub use probe::assembler::active::{
    emit_add_imm, emit_jmp_rel32, emit_load, emit_load_fpr, emit_mov_imm, emit_pop, emit_popf,
    emit_push, emit_pushf, emit_ret, emit_store, emit_store_fpr, emit_store_scratch_absolute,
    emit_sub_imm, emit_xor_self, patch_rel32,
};
pub use probe::{
    ExecutableMemory, Fpr, Gpr, ProbeConfig, ProbeContext, ProbeEmitter, ProbeHandler,
    ProbeResume, PtrTag,
};
pub use probe_abi::active::offsets::{PROBE_FRAME_SIZE, PROBE_SIZE};
pub use probe_abi::{FLAG_CF, FLAG_DF, FLAG_OF, FLAG_PF, FLAG_SF, FLAG_ZF, Word};

pub const WORD_SIZE: usize = size_of::<Word>();

/// Stack reserved below the saved registers, so probes may move sp upwards
/// without clobbering anything the harness needs.
pub const SCRATCH_ZONE: usize = 256;

/// Flags the harness can predict: the prologue xors [`FLAG_SETTER`] with
/// itself before reloading it, leaving ZF and PF set and the rest of these
/// clear. The loads that follow do not touch flags.
pub const STATUS_MASK: usize = FLAG_CF | FLAG_PF | FLAG_ZF | FLAG_SF | FLAG_DF | FLAG_OF;
pub const EXPECTED_FLAGS: usize = FLAG_ZF | FLAG_PF;

/// Any register the prologue reloads after the xor, other than the scratch
/// register holding the frame address.
pub const FLAG_SETTER: Gpr = Gpr::ALL[1];

/// Register values fed into a JIT function and read back after its body.
#[repr(C)]
#[derive(Clone, Debug, Default)]
pub struct Frame {
    pub input_gprs: [Word; Gpr::COUNT],
    pub input_fprs: [u64; Fpr::COUNT],
    pub output_gprs: [Word; Gpr::COUNT],
    pub output_fprs: [u64; Fpr::COUNT],
    pub output_flags: Word,
    pub entry_sp: Word,
    pub saved_fprs: [u64; Fpr::COUNT],
}

impl Frame {
    pub fn seeded() -> Self {
        let mut frame = Self::default();
        for (index, value) in frame.input_gprs.iter_mut().enumerate() {
            *value = (Word::MAX / 0xFF) * (index as Word + 1);
        }
        for (index, value) in frame.input_fprs.iter_mut().enumerate() {
            *value = ((index as f64 + 1.0) * 1.25).to_bits();
        }
        frame
    }

    pub fn input(&self, gpr: Gpr) -> usize {
        self.input_gprs[gpr.index()] as usize
    }

    pub fn output(&self, gpr: Gpr) -> usize {
        self.output_gprs[gpr.index()] as usize
    }

    pub fn entry_sp(&self) -> usize {
        self.entry_sp as usize
    }

    pub fn output_flags(&self) -> usize {
        self.output_flags as usize
    }

    /// Asserts every register came back as loaded, except the stack pointer,
    /// which must equal `expected_sp`, and any in `changed`.
    pub fn assert_unchanged_except(&self, expected_sp: usize, changed: &[Gpr]) {
        for gpr in Gpr::ALL.iter().copied() {
            if gpr == Gpr::STACK_POINTER {
                assert_eq!(self.output(gpr), expected_sp, "{gpr} should be {expected_sp:#x}");
            } else if !changed.contains(&gpr) {
                assert_eq!(
                    self.output(gpr),
                    self.input(gpr),
                    "{gpr} changed: {:#x} -> {:#x}",
                    self.input(gpr),
                    self.output(gpr)
                );
            }
        }
        assert_eq!(self.output_fprs, self.input_fprs, "vector registers changed");
        assert_eq!(self.output_flags() & STATUS_MASK, EXPECTED_FLAGS);
    }
}

fn disp(offset: usize) -> i32 {
    offset as i32
}

fn gpr_slot(base: usize, gpr: Gpr) -> usize {
    base + gpr.index() * WORD_SIZE
}

fn fpr_slot(base: usize, fpr: Fpr) -> usize {
    base + fpr.index() * size_of::<u64>()
}

fn saved_gprs() -> impl DoubleEndedIterator<Item = Gpr> {
    Gpr::ALL
        .iter()
        .copied()
        .filter(|gpr| *gpr != Gpr::STACK_POINTER)
}

/// Builds a no-argument JIT function: prologue loading `Frame::input_*`, a
/// body of probes added by the test, and a dump into `Frame::output_*`.
pub struct Harness {
    pub frame: Box<Frame>,
    pub emitter: ProbeEmitter,
    pub code: Vec<u8>,
    base: Rc<Cell<usize>>,
}

impl Harness {
    pub fn new() -> Self {
        let frame = Box::new(Frame::seeded());
        let emitter = ProbeEmitter::new(ProbeConfig {
            enabled: true,
            trace_hits: true,
        });
        let mut harness = Self {
            frame,
            emitter,
            code: Vec::new(),
            base: Rc::new(Cell::new(0)),
        };
        harness.emit_prologue();
        harness
    }

    fn frame_address(&self) -> usize {
        &*self.frame as *const Frame as usize
    }

    /// Filled with the code's load address once compiled.
    pub fn base(&self) -> Rc<Cell<usize>> {
        Rc::clone(&self.base)
    }

    fn emit_prologue(&mut self) {
        let frame = self.frame_address();
        let scratch = Gpr::SCRATCH;
        let code = &mut self.code;
        for gpr in saved_gprs() {
            emit_push(code, gpr);
        }
        emit_sub_imm(code, Gpr::STACK_POINTER, SCRATCH_ZONE as i32);
        emit_mov_imm(code, scratch, frame as Word);
        emit_store(
            code,
            scratch,
            disp(offset_of!(Frame, entry_sp)),
            Gpr::STACK_POINTER,
        );
        for fpr in Fpr::ALL.iter().copied() {
            emit_store_fpr(code, scratch, disp(fpr_slot(offset_of!(Frame, saved_fprs), fpr)), fpr);
            emit_load_fpr(code, fpr, scratch, disp(fpr_slot(offset_of!(Frame, input_fprs), fpr)));
        }
        emit_xor_self(code, FLAG_SETTER);
        for gpr in saved_gprs().filter(|gpr| *gpr != scratch) {
            emit_load(code, gpr, scratch, disp(gpr_slot(offset_of!(Frame, input_gprs), gpr)));
        }
        emit_load(
            code,
            scratch,
            scratch,
            disp(gpr_slot(offset_of!(Frame, input_gprs), scratch)),
        );
    }

    pub fn insert_probe_with<H>(&mut self, handler: H) -> ProbeSequence
    where
        H: ProbeHandler + 'static,
    {
        self.emitter
            .insert_probe_with(&mut self.code, handler)
            .expect("probe should be planted")
    }

    /// Writes every register to the frame and returns to the caller.
    pub fn emit_dump_and_return(&mut self) {
        let frame = self.frame_address();
        let scratch = Gpr::SCRATCH;
        let code = &mut self.code;
        emit_store_scratch_absolute(
            code,
            gpr_slot(frame + offset_of!(Frame, output_gprs), scratch) as Word,
        );
        emit_pushf(code);
        emit_pop(code, scratch);
        emit_store_scratch_absolute(code, (frame + offset_of!(Frame, output_flags)) as Word);
        emit_mov_imm(code, scratch, frame as Word);
        for gpr in Gpr::ALL.iter().copied().filter(|gpr| *gpr != scratch) {
            emit_store(code, scratch, disp(gpr_slot(offset_of!(Frame, output_gprs), gpr)), gpr);
        }
        for fpr in Fpr::ALL.iter().copied() {
            emit_store_fpr(code, scratch, disp(fpr_slot(offset_of!(Frame, output_fprs), fpr)), fpr);
            emit_load_fpr(code, fpr, scratch, disp(fpr_slot(offset_of!(Frame, saved_fprs), fpr)));
        }
        emit_load(
            code,
            Gpr::STACK_POINTER,
            scratch,
            disp(offset_of!(Frame, entry_sp)),
        );
        emit_add_imm(code, Gpr::STACK_POINTER, SCRATCH_ZONE as i32);
        for gpr in saved_gprs().rev() {
            emit_pop(code, gpr);
        }
        emit_ret(code);
    }

    /// Maps the code. Call [`Harness::emit_dump_and_return`] first.
    pub fn compile(self) -> Compiled {
        let memory = ExecutableMemory::from_code(&self.code).expect("code should map");
        self.base.set(memory.entry_address());
        Compiled {
            memory,
            frame: self.frame,
            emitter: self.emitter,
        }
    }

    /// Probes planted so far, dump, return, mapped.
    pub fn finish(mut self) -> Compiled {
        self.emit_dump_and_return();
        self.compile()
    }
}

pub struct Compiled {
    pub memory: ExecutableMemory,
    pub frame: Box<Frame>,
    pub emitter: ProbeEmitter,
}

impl Compiled {
    pub fn run(&mut self) {
        // SAFETY: the harness emits a no-argument function that preserves
        // every callee-saved register and leaves the stack balanced.
        let entry: extern "C" fn() = unsafe { self.memory.entry() };
        entry();
    }

    pub fn address_of(&self, offset: usize) -> usize {
        self.memory.address_of(offset)
    }

    pub fn hits(&self, id: usize) -> u64 {
        self.emitter.hits(id).expect("site should count hits")
    }
}

/// Copy of what a handler saw plus the live record's address, for assertions
/// after the run.
pub type Seen = Rc<Cell<Option<(ProbeContext, usize)>>>;

pub fn seen() -> Seen {
    Rc::new(Cell::new(None))
}

pub fn observe(seen: &Seen, context: &ProbeContext) {
    seen.set(Some((*context, context.address())));
}

pub fn recorded(seen: &Seen) -> ProbeContext {
    seen.get().expect("probe should have run").0
}

pub fn recorded_at(seen: &Seen) -> usize {
    seen.get().expect("probe should have run").1
}

/// Handler that records the record and mutates it with `edit`.
pub fn recording<F>(seen: &Seen, mut edit: F) -> impl FnMut(&mut ProbeContext) + 'static
where
    F: FnMut(&mut ProbeContext) + 'static,
{
    let seen = Rc::clone(seen);
    move |context: &mut ProbeContext| {
        observe(&seen, context);
        edit(context);
    }
}
