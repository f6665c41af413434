use super::{PtrTag, PtrTagging};

pub(crate) struct IdentityTagging;

impl PtrTagging for IdentityTagging {
    const INTEGRITY_CHECKING: bool = false;

    fn tag(bits: usize, _tag: PtrTag) -> usize {
        bits
    }

    fn untag(bits: usize, _tag: PtrTag) -> usize {
        bits
    }

    fn remove_tag(bits: usize) -> usize {
        bits
    }

    fn unique_id() -> u32 {
        0
    }

    fn retag(bits: usize, _old: PtrTag, _new: PtrTag) -> usize {
        bits
    }
}
