use probe::ptr_tag::{
    PtrTag, integrity_checking_enabled, remove_code_ptr_tag, tag_code_ptr, unique_ptr_tag_id,
    untag_code_ptr,
};
use probe::{ProbeContext, resume_pc_tagged, set_resume_pc_tagged};

#[test]
fn null_pointers_survive_every_role() {
    let null = std::ptr::null::<u8>();
    for tag in PtrTag::ALL.iter().copied() {
        let tagged = tag_code_ptr(null, tag);
        assert_eq!(untag_code_ptr(tagged, tag), null, "{tag}");
        assert_eq!(remove_code_ptr_tag(tagged), null, "{tag}");
    }
}

#[test]
fn resume_pc_moves_through_a_role_change() {
    let mut context = ProbeContext::default();
    context.set_pc(0x7000);
    let tagged = resume_pc_tagged(&context, PtrTag::JitCode);
    let moved = probe::ptr_tag::retag_code_ptr(tagged, PtrTag::JitCode, PtrTag::NativeCode);
    set_resume_pc_tagged(
        &mut context,
        tag_code_ptr(untag_code_ptr(moved, PtrTag::NativeCode) + 0x10, PtrTag::JitCode),
        PtrTag::JitCode,
    );
    assert_eq!(context.pc(), 0x7010);
}

#[cfg(not(feature = "pointer-tagging"))]
#[test]
fn identity_build_has_no_ids() {
    assert!(!integrity_checking_enabled());
    assert_eq!(unique_ptr_tag_id(), 0);
    assert_eq!(unique_ptr_tag_id(), 0);
}

#[cfg(feature = "pointer-tagging")]
#[test]
fn validating_build_hands_out_fresh_ids() {
    assert!(integrity_checking_enabled());
    let first = unique_ptr_tag_id();
    let second = unique_ptr_tag_id();
    assert_ne!(first, 0);
    assert!(second > first);
}

#[cfg(all(feature = "pointer-tagging", any(target_arch = "x86", target_arch = "x86_64")))]
#[test]
fn planted_sites_record_tagged_callbacks() {
    let mut emitter = probe::ProbeEmitter::new(probe::ProbeConfig {
        enabled: true,
        trace_hits: false,
    });
    let mut code = Vec::new();
    emitter
        .insert_probe_with(&mut code, |_: &mut ProbeContext| {})
        .expect("probe should be planted");
    let site = &emitter.sites()[0];
    let callback = untag_code_ptr(site.function, PtrTag::CFunction);
    assert_ne!(callback, 0);
    assert_eq!(remove_code_ptr_tag(site.function), callback);
}
