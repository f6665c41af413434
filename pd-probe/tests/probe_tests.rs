#![cfg(any(target_arch = "x86", target_arch = "x86_64"))]

mod common;

use std::cell::Cell;
use std::rc::Rc;

use common::*;

struct Relocating {
    seen: Seen,
    requested_sp: Rc<Cell<usize>>,
    initialized: Seen,
    init_calls: Rc<Cell<u32>>,
    poison: bool,
    sp_for: fn(&ProbeContext) -> usize,
}

impl ProbeHandler for Relocating {
    fn on_probe(&mut self, context: &mut ProbeContext) -> ProbeResume {
        observe(&self.seen, context);
        let requested = (self.sp_for)(context);
        self.requested_sp.set(requested);
        context.set_sp(requested);
        ProbeResume::InitializeStack
    }

    fn on_stack_initialized(&mut self, context: &mut ProbeContext) {
        self.init_calls.set(self.init_calls.get() + 1);
        observe(&self.initialized, context);
        if !self.poison {
            return;
        }
        let Some((_, old_start)) = self.seen.get() else {
            return;
        };
        // Everything of the old record that the relocated copy does not
        // cover. Restoring from it would surface 0xA5 bytes.
        let old_end = old_start + PROBE_SIZE;
        let start = old_start.max(context.address() + PROBE_SIZE);
        if start < old_end {
            // SAFETY: the old record lies above the relocated one and above
            // this call's stack; nothing reads it again.
            unsafe { std::ptr::write_bytes(start as *mut u8, 0xA5, old_end - start) };
        }
    }
}

fn relocating(sp_for: fn(&ProbeContext) -> usize, poison: bool) -> Relocating {
    Relocating {
        seen: seen(),
        requested_sp: Rc::new(Cell::new(0)),
        initialized: seen(),
        init_calls: Rc::new(Cell::new(0)),
        poison,
        sp_for,
    }
}

#[test]
fn bare_harness_round_trips_every_register() {
    assert_ne!(FLAG_SETTER, Gpr::SCRATCH);
    let mut compiled = Harness::new().finish();
    compiled.run();
    compiled.run();

    let frame = &compiled.frame;
    frame.assert_unchanged_except(frame.entry_sp(), &[]);
    assert!(compiled.emitter.sites().is_empty());
}

#[test]
fn unmodified_probe_is_transparent() {
    let observed = seen();
    let mut harness = Harness::new();
    let sequence = harness.insert_probe_with(recording(&observed, |_| {}));
    let base = harness.base();
    let mut compiled = harness.finish();
    compiled.run();

    let frame = &compiled.frame;
    frame.assert_unchanged_except(frame.entry_sp(), &[]);
    assert_eq!(compiled.hits(0), 1);

    let context = recorded(&observed);
    assert_eq!(context.pc(), base.get() + sequence.resume);
    assert_eq!(context.sp(), frame.entry_sp());
    for gpr in Gpr::ALL.iter().copied() {
        if gpr != Gpr::STACK_POINTER {
            assert_eq!(context.gpr(gpr), frame.input(gpr), "{gpr} captured wrong");
        }
    }
    for fpr in Fpr::ALL.iter().copied() {
        assert_eq!(
            context.cpu.fpr_bits(fpr),
            frame.input_fprs[fpr.index()],
            "{fpr} captured wrong"
        );
    }
    assert_eq!(context.cpu.flags() & STATUS_MASK, EXPECTED_FLAGS);
    assert!(context.initialize_stack_function().is_none());
    assert_eq!(recorded_at(&observed) % 32, 0, "record should be 32-byte aligned");
}

#[test]
fn single_register_mutation_is_observed() {
    for target in Gpr::ALL.iter().copied() {
        if target == Gpr::STACK_POINTER {
            continue;
        }
        let mut harness = Harness::new();
        harness.insert_probe_with(move |context: &mut ProbeContext| {
            context.set_gpr(target, 0x5EED);
        });
        let mut compiled = harness.finish();
        compiled.run();

        let frame = &compiled.frame;
        assert_eq!(frame.output(target), 0x5EED, "{target} should be overwritten");
        frame.assert_unchanged_except(frame.entry_sp(), &[target]);
    }
}

#[test]
fn vector_and_flag_mutations_are_observed() {
    let target = Fpr::ALL[Fpr::COUNT - 1];
    let mut harness = Harness::new();
    harness.insert_probe_with(move |context: &mut ProbeContext| {
        context.cpu.set_fpr_f64(target, -3.5);
        let flags = context.cpu.flags();
        context.cpu.set_flags((flags | FLAG_CF) & !FLAG_ZF);
    });
    let mut compiled = harness.finish();
    compiled.run();

    let frame = &compiled.frame;
    assert_eq!(f64::from_bits(frame.output_fprs[target.index()]), -3.5);
    for fpr in Fpr::ALL.iter().copied().filter(|fpr| *fpr != target) {
        assert_eq!(frame.output_fprs[fpr.index()], frame.input_fprs[fpr.index()]);
    }
    assert_eq!(frame.output_flags() & STATUS_MASK, FLAG_CF | FLAG_PF);
    for gpr in Gpr::ALL.iter().copied() {
        if gpr != Gpr::STACK_POINTER {
            assert_eq!(frame.output(gpr), frame.input(gpr));
        }
    }
}

#[test]
fn overlapping_stack_request_relocates_record() {
    let handler = relocating(|context| context.address() + 64, true);
    let observed = Rc::clone(&handler.seen);
    let initialized = Rc::clone(&handler.initialized);
    let requested = Rc::clone(&handler.requested_sp);
    let init_calls = Rc::clone(&handler.init_calls);

    let mut harness = Harness::new();
    harness.insert_probe_with(handler);
    let mut compiled = harness.finish();
    compiled.run();

    let original = recorded(&observed);
    let relocated = recorded(&initialized);
    let relocated_at = recorded_at(&initialized);
    assert_eq!(init_calls.get(), 1);
    assert!(relocated_at < recorded_at(&observed));
    assert!(relocated_at + PROBE_FRAME_SIZE <= requested.get());
    assert_eq!(relocated_at % 32, 0);
    assert_eq!(relocated.sp(), requested.get());
    assert_eq!(relocated.cpu.gprs, {
        let mut expected = original.cpu.gprs;
        expected[Gpr::STACK_POINTER.index()] = requested.get() as Word;
        expected
    });

    compiled
        .frame
        .assert_unchanged_except(requested.get(), &[]);
}

#[test]
fn stack_initializer_runs_once_with_final_stack() {
    let handler = relocating(|context| context.sp() - 1024, false);
    let observed = Rc::clone(&handler.seen);
    let initialized = Rc::clone(&handler.initialized);
    let requested = Rc::clone(&handler.requested_sp);
    let init_calls = Rc::clone(&handler.init_calls);

    let mut harness = Harness::new();
    harness.insert_probe_with(handler);
    let mut compiled = harness.finish();
    compiled.run();

    assert_eq!(init_calls.get(), 1);
    let relocated_at = recorded_at(&initialized);
    assert_eq!(requested.get(), compiled.frame.entry_sp() - 1024);
    assert_eq!(recorded(&initialized).sp(), requested.get());
    assert_ne!(relocated_at, recorded_at(&observed));
    assert!(relocated_at + PROBE_FRAME_SIZE <= requested.get());
    compiled.frame.assert_unchanged_except(requested.get(), &[]);
}

#[test]
fn stack_initializer_without_relocation_sees_same_record() {
    let handler = relocating(|context| context.sp(), false);
    let observed = Rc::clone(&handler.seen);
    let initialized = Rc::clone(&handler.initialized);
    let init_calls = Rc::clone(&handler.init_calls);

    let mut harness = Harness::new();
    harness.insert_probe_with(handler);
    let mut compiled = harness.finish();
    compiled.run();

    assert_eq!(init_calls.get(), 1);
    assert_eq!(recorded_at(&initialized), recorded_at(&observed));
    let entry_sp = compiled.frame.entry_sp();
    compiled.frame.assert_unchanged_except(entry_sp, &[]);
}

#[test]
fn raising_stack_pointer_skips_relocation() {
    let handler = relocating(|context| context.sp() + SCRATCH_ZONE / 2, false);
    let observed = Rc::clone(&handler.seen);
    let initialized = Rc::clone(&handler.initialized);
    let init_calls = Rc::clone(&handler.init_calls);

    let mut harness = Harness::new();
    harness.insert_probe_with(handler);
    let mut compiled = harness.finish();
    compiled.run();

    let entry_sp = compiled.frame.entry_sp();
    assert_eq!(init_calls.get(), 1);
    assert_eq!(recorded_at(&initialized), recorded_at(&observed));
    assert!(recorded_at(&observed) + PROBE_FRAME_SIZE <= entry_sp);
    compiled
        .frame
        .assert_unchanged_except(entry_sp + SCRATCH_ZONE / 2, &[]);
}

#[test]
fn sequential_probes_are_independent() {
    let before_seen = seen();
    let after_seen = seen();
    let changed = Gpr::ALL[1];
    let mut harness = Harness::new();
    let first = harness.insert_probe_with(relocating(|context| context.sp(), false));
    harness.insert_probe_with(recording(&before_seen, move |context| {
        context.set_gpr(changed, 0x1234);
    }));
    let third = harness.insert_probe_with(recording(&after_seen, |_| {}));
    let base = harness.base();
    let mut compiled = harness.finish();
    compiled.run();

    assert_eq!(compiled.hits(0), 1);
    assert_eq!(compiled.hits(1), 1);
    assert_eq!(compiled.hits(2), 1);

    let before = recorded(&before_seen);
    let after = recorded(&after_seen);
    assert!(before.initialize_stack_function().is_none());
    assert!(after.initialize_stack_function().is_none());
    assert_eq!(before.gpr(changed), compiled.frame.input(changed));
    assert_eq!(after.gpr(changed), 0x1234);
    assert_eq!(after.pc(), base.get() + third.resume);
    assert_eq!(after.sp(), before.sp());
    assert!(first.resume <= third.start);

    let entry_sp = compiled.frame.entry_sp();
    compiled.frame.assert_unchanged_except(entry_sp, &[changed]);
}

#[test]
fn nested_probe_site_reenters_cleanly() {
    let outer_seen = seen();
    let inner_seen = seen();
    let nested_start = Rc::new(Cell::new(0usize));

    let mut harness = Harness::new();
    let base = harness.base();
    let outer = {
        let base = Rc::clone(&base);
        let nested_start = Rc::clone(&nested_start);
        harness.insert_probe_with(recording(&outer_seen, move |context| {
            context.set_pc(base.get() + nested_start.get());
        }))
    };
    harness.emit_dump_and_return();

    let inner = harness.insert_probe_with(recording(&inner_seen, |_| {}));
    nested_start.set(inner.start);
    let jump = emit_jmp_rel32(&mut harness.code);
    patch_rel32(&mut harness.code, jump, outer.resume).expect("jump back should fit");

    let mut compiled = harness.compile();
    compiled.run();

    assert_eq!(compiled.hits(0), 1);
    assert_eq!(compiled.hits(1), 1);
    let outer_context = recorded(&outer_seen);
    let inner_context = recorded(&inner_seen);
    assert_eq!(inner_context.pc(), base.get() + inner.resume);
    assert_eq!(inner_context.sp(), outer_context.sp());
    assert_eq!(inner_context.cpu.gprs, outer_context.cpu.gprs);
    assert_eq!(inner_context.cpu.fprs, outer_context.cpu.fprs);

    let entry_sp = compiled.frame.entry_sp();
    compiled.frame.assert_unchanged_except(entry_sp, &[]);
}

#[test]
fn tagged_resume_pc_can_skip_code() {
    let skipped = Gpr::ALL[2];
    let skip_len = Rc::new(Cell::new(0usize));
    let mut harness = Harness::new();
    let skip = Rc::clone(&skip_len);
    harness.insert_probe_with(move |context: &mut ProbeContext| {
        let resume = probe::resume_pc_tagged(context, PtrTag::JitCode);
        probe::set_resume_pc_tagged(context, resume + skip.get(), PtrTag::JitCode);
    });
    let before = harness.code.len();
    emit_mov_imm(&mut harness.code, skipped, 0xBAD);
    skip_len.set(harness.code.len() - before);
    let mut compiled = harness.finish();
    compiled.run();

    let entry_sp = compiled.frame.entry_sp();
    compiled.frame.assert_unchanged_except(entry_sp, &[]);
}

#[test]
fn print_probe_leaves_state_alone() {
    let mut harness = Harness::new();
    harness
        .emitter
        .insert_print_probe(&mut harness.code, "dump")
        .expect("probe should be planted");
    let mut compiled = harness.finish();
    compiled.run();
    compiled.run();

    assert_eq!(compiled.hits(0), 2);
    let entry_sp = compiled.frame.entry_sp();
    compiled.frame.assert_unchanged_except(entry_sp, &[]);

    let snapshot = compiled.emitter.snapshot();
    assert_eq!(snapshot.sites.len(), 1);
    assert_eq!(snapshot.sites[0].hits, Some(2));
    assert_eq!(snapshot.sites[0].site.label.as_deref(), Some("dump"));
}

#[test]
fn raw_probe_receives_its_argument() {
    probe::probe_callback! {
        fn count_hits(context: *mut ProbeContext) {
            // SAFETY: the trampoline passes a live record; `arg` points at the
            // test's counter.
            let context = unsafe { &mut *context };
            let counter = unsafe { &*context.arg_ptr().cast::<Cell<u32>>() };
            counter.set(counter.get() + 1);
        }
    }

    let counter = Box::new(Cell::new(0u32));
    let mut harness = Harness::new();
    let arg = (&*counter as *const Cell<u32>).cast_mut().cast();
    harness
        .emitter
        .insert_probe(&mut harness.code, count_hits, arg)
        .expect("probe should be planted");
    let mut compiled = harness.finish();
    compiled.run();

    assert_eq!(counter.get(), 1);
    assert_eq!(compiled.emitter.hits(0), None);
    let entry_sp = compiled.frame.entry_sp();
    compiled.frame.assert_unchanged_except(entry_sp, &[]);
}
