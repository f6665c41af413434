//! Checked tagging. On 64-bit targets the role lives in the top byte of the
//! pointer, which user-space x86_64 addresses never use. 32-bit targets have
//! no spare bits, so roles are kept in a side table keyed by address.

use std::sync::atomic::{AtomicU32, Ordering};

use super::{PtrTag, PtrTagging};

pub(crate) struct ValidatingTagging;

static NEXT_UNIQUE_ID: AtomicU32 = AtomicU32::new(1);

impl PtrTagging for ValidatingTagging {
    const INTEGRITY_CHECKING: bool = true;

    fn tag(bits: usize, tag: PtrTag) -> usize {
        store::tag(bits, tag)
    }

    fn untag(bits: usize, tag: PtrTag) -> usize {
        store::untag(bits, tag)
    }

    fn remove_tag(bits: usize) -> usize {
        store::remove_tag(bits)
    }

    fn unique_id() -> u32 {
        NEXT_UNIQUE_ID.fetch_add(1, Ordering::Relaxed)
    }
}

#[cfg(target_pointer_width = "64")]
mod store {
    use super::PtrTag;

    const TAG_SHIFT: u32 = 56;
    const ADDRESS_MASK: usize = (1usize << TAG_SHIFT) - 1;
    // Set on every tagged pointer so that NoPtrTag is distinguishable from
    // an untagged value.
    const TAGGED_MARKER: u8 = 0x80;

    fn role_byte(bits: usize) -> u8 {
        (bits >> TAG_SHIFT) as u8
    }

    pub(super) fn tag(bits: usize, tag: PtrTag) -> usize {
        if role_byte(bits) != 0 {
            panic!("pointer {bits:#x} is already tagged, cannot tag it as {tag}");
        }
        bits | (usize::from(TAGGED_MARKER | tag.bits()) << TAG_SHIFT)
    }

    pub(super) fn untag(bits: usize, tag: PtrTag) -> usize {
        let found = role_byte(bits);
        if found != TAGGED_MARKER | tag.bits() {
            let found = PtrTag::from_bits(found & !TAGGED_MARKER)
                .filter(|_| found & TAGGED_MARKER != 0)
                .map_or_else(|| "untagged".to_string(), |found| found.to_string());
            panic!(
                "pointer {:#x} tagged as {found} used as {tag}",
                bits & ADDRESS_MASK
            );
        }
        bits & ADDRESS_MASK
    }

    pub(super) fn remove_tag(bits: usize) -> usize {
        bits & ADDRESS_MASK
    }
}

#[cfg(not(target_pointer_width = "64"))]
mod store {
    use std::collections::HashMap;
    use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};

    use super::PtrTag;

    // Address -> bit set of roles it was tagged with. Append-only: a tagged
    // copy is the same integer as the raw address, so `remove_tag` cannot
    // tell which holder is done with a role. Growth is bounded by the number
    // of distinct code addresses tagged, and this build is for debugging.
    static ROLES: OnceLock<Mutex<HashMap<usize, u32>>> = OnceLock::new();

    fn roles() -> MutexGuard<'static, HashMap<usize, u32>> {
        ROLES
            .get_or_init(|| Mutex::new(HashMap::new()))
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn role_bit(tag: PtrTag) -> u32 {
        1 << tag.bits()
    }

    pub(super) fn tag(bits: usize, tag: PtrTag) -> usize {
        *roles().entry(bits).or_insert(0) |= role_bit(tag);
        bits
    }

    pub(super) fn untag(bits: usize, tag: PtrTag) -> usize {
        let recorded = roles().get(&bits).copied().unwrap_or(0);
        if recorded & role_bit(tag) == 0 {
            panic!("pointer {bits:#x} was never tagged as {tag}");
        }
        bits
    }

    pub(super) fn remove_tag(bits: usize) -> usize {
        bits
    }
}
