//! Role tags for code pointers.
//!
//! Call sites always go through these functions, whether or not integrity
//! checking is compiled in. The default build tags by identity; the
//! `pointer-tagging` feature swaps in an implementation that records the role
//! and panics when a pointer is untagged as anything else.

#[cfg(not(feature = "pointer-tagging"))]
mod identity;
#[cfg(feature = "pointer-tagging")]
mod validating;

use probe_abi::ProbeFunction;

macro_rules! ptr_tags {
    ($($variant:ident = $text:literal),+ $(,)?) => {
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[repr(u8)]
        pub enum PtrTag {
            $($variant),+
        }

        impl PtrTag {
            pub const ALL: &'static [PtrTag] = &[$(PtrTag::$variant),+];

            pub fn name(self) -> &'static str {
                match self {
                    $(PtrTag::$variant => $text),+
                }
            }
        }
    };
}

ptr_tags! {
    NoPtrTag = "NoPtrTag",
    NearCall = "NearCall",
    CFunction = "CFunction",
    Bytecode = "Bytecode",
    BytecodeHelper = "BytecodeHelper",
    CodeEntry = "CodeEntry",
    CodeEntryWithArityCheck = "CodeEntryWithArityCheck",
    ExceptionHandler = "ExceptionHandler",
    InternalFunction = "InternalFunction",
    JitCode = "JITCode",
    NativeCode = "NativeCode",
    SlowPath = "SlowPath",
}

impl PtrTag {
    pub const fn bits(self) -> u8 {
        self as u8
    }

    pub fn from_bits(bits: u8) -> Option<Self> {
        Self::ALL.get(usize::from(bits)).copied()
    }
}

impl std::fmt::Display for PtrTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A pointer-sized value that can carry a role tag.
pub trait CodePointer: Copy {
    fn to_bits(self) -> usize;

    /// # Safety
    ///
    /// `bits` must be a valid value for `Self`. For function pointers that
    /// means non-zero.
    unsafe fn from_bits(bits: usize) -> Self;
}

impl<T> CodePointer for *const T {
    fn to_bits(self) -> usize {
        self as usize
    }

    unsafe fn from_bits(bits: usize) -> Self {
        bits as *const T
    }
}

impl<T> CodePointer for *mut T {
    fn to_bits(self) -> usize {
        self as usize
    }

    unsafe fn from_bits(bits: usize) -> Self {
        bits as *mut T
    }
}

impl CodePointer for usize {
    fn to_bits(self) -> usize {
        self
    }

    unsafe fn from_bits(bits: usize) -> Self {
        bits
    }
}

impl CodePointer for ProbeFunction {
    fn to_bits(self) -> usize {
        self as usize
    }

    unsafe fn from_bits(bits: usize) -> Self {
        // SAFETY: the caller guarantees `bits` is non-zero.
        unsafe { std::mem::transmute::<usize, ProbeFunction>(bits) }
    }
}

pub(crate) trait PtrTagging {
    const INTEGRITY_CHECKING: bool;

    fn tag(bits: usize, tag: PtrTag) -> usize;
    fn untag(bits: usize, tag: PtrTag) -> usize;
    fn remove_tag(bits: usize) -> usize;
    fn unique_id() -> u32;

    fn retag(bits: usize, old: PtrTag, new: PtrTag) -> usize {
        Self::tag(Self::untag(bits, old), new)
    }
}

#[cfg(not(feature = "pointer-tagging"))]
type ActiveTagging = identity::IdentityTagging;
#[cfg(feature = "pointer-tagging")]
type ActiveTagging = validating::ValidatingTagging;

pub fn integrity_checking_enabled() -> bool {
    ActiveTagging::INTEGRITY_CHECKING
}

/// A fresh role id for dynamically created code. Always 0 unless integrity
/// checking is compiled in.
pub fn unique_ptr_tag_id() -> u32 {
    ActiveTagging::unique_id()
}

// Tagging never turns a non-zero value into zero or back, so feeding the
// result to `from_bits` of the input's own type stays valid.

pub fn tag_code_ptr<P: CodePointer>(ptr: P, tag: PtrTag) -> P {
    // SAFETY: see above.
    unsafe { P::from_bits(ActiveTagging::tag(ptr.to_bits(), tag)) }
}

pub fn untag_code_ptr<P: CodePointer>(ptr: P, tag: PtrTag) -> P {
    // SAFETY: see above.
    unsafe { P::from_bits(ActiveTagging::untag(ptr.to_bits(), tag)) }
}

pub fn retag_code_ptr<P: CodePointer>(ptr: P, old: PtrTag, new: PtrTag) -> P {
    // SAFETY: see above.
    unsafe { P::from_bits(ActiveTagging::retag(ptr.to_bits(), old, new)) }
}

pub fn remove_code_ptr_tag<P: CodePointer>(ptr: P) -> P {
    // SAFETY: see above.
    unsafe { P::from_bits(ActiveTagging::remove_tag(ptr.to_bits())) }
}

/// # Safety
///
/// The tagged bits must be a valid `Q`.
pub unsafe fn tag_code_ptr_as<Q: CodePointer, P: CodePointer>(ptr: P, tag: PtrTag) -> Q {
    unsafe { Q::from_bits(ActiveTagging::tag(ptr.to_bits(), tag)) }
}

/// # Safety
///
/// The untagged bits must be a valid `Q`.
pub unsafe fn untag_code_ptr_as<Q: CodePointer, P: CodePointer>(ptr: P, tag: PtrTag) -> Q {
    unsafe { Q::from_bits(ActiveTagging::untag(ptr.to_bits(), tag)) }
}

/// # Safety
///
/// The retagged bits must be a valid `Q`.
pub unsafe fn retag_code_ptr_as<Q: CodePointer, P: CodePointer>(
    ptr: P,
    old: PtrTag,
    new: PtrTag,
) -> Q {
    unsafe { Q::from_bits(ActiveTagging::retag(ptr.to_bits(), old, new)) }
}

/// # Safety
///
/// The raw bits must be a valid `Q`.
pub unsafe fn remove_code_ptr_tag_as<Q: CodePointer, P: CodePointer>(ptr: P) -> Q {
    unsafe { Q::from_bits(ActiveTagging::remove_tag(ptr.to_bits())) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use probe_abi::ProbeContext;

    probe_abi::probe_callback! {
        fn tagged_callback(_context: *mut ProbeContext) {}
    }

    #[test]
    fn tag_bits_are_dense_and_stable() {
        for (index, tag) in PtrTag::ALL.iter().enumerate() {
            assert_eq!(usize::from(tag.bits()), index);
            assert_eq!(PtrTag::from_bits(tag.bits()), Some(*tag));
        }
        assert_eq!(PtrTag::NoPtrTag.bits(), 0);
        assert_eq!(PtrTag::from_bits(PtrTag::ALL.len() as u8), None);
        assert_eq!(PtrTag::JitCode.to_string(), "JITCode");
    }

    #[test]
    fn round_trip_law_holds_for_every_role() {
        let value = 0x5a5au32;
        let raw = &value as *const u32;
        let function: ProbeFunction = tagged_callback;
        for tag in PtrTag::ALL.iter().copied() {
            let tagged = tag_code_ptr(raw, tag);
            assert_eq!(untag_code_ptr(tagged, tag), raw);
            assert_eq!(tag_code_ptr(untag_code_ptr(tagged, tag), tag), tagged);
            assert_eq!(remove_code_ptr_tag(tagged), raw);

            let tagged_function = tag_code_ptr(function, tag);
            assert_eq!(
                untag_code_ptr(tagged_function, tag) as usize,
                function as usize
            );
        }
    }

    #[test]
    fn retag_matches_untag_then_tag() {
        let raw = 0x1000usize;
        let tagged = tag_code_ptr(raw, PtrTag::CFunction);
        let retagged = retag_code_ptr(tagged, PtrTag::CFunction, PtrTag::NativeCode);
        assert_eq!(untag_code_ptr(retagged, PtrTag::NativeCode), raw);
    }

    #[test]
    fn reinterpreting_variants_change_pointer_type() {
        let function: ProbeFunction = tagged_callback;
        let tagged: usize = unsafe { tag_code_ptr_as(function, PtrTag::CFunction) };
        let back: ProbeFunction = unsafe { untag_code_ptr_as(tagged, PtrTag::CFunction) };
        assert_eq!(back as usize, function as usize);
        let raw: *const u8 = unsafe { remove_code_ptr_tag_as(tagged) };
        assert_eq!(raw as usize, function as usize);
    }

    #[cfg(not(feature = "pointer-tagging"))]
    #[test]
    fn identity_build_leaves_bits_alone() {
        assert!(!integrity_checking_enabled());
        assert_eq!(unique_ptr_tag_id(), 0);
        for tag in PtrTag::ALL.iter().copied() {
            assert_eq!(tag_code_ptr(0x1234usize, tag), 0x1234);
            assert_eq!(untag_code_ptr(0x1234usize, tag), 0x1234);
        }
    }
}
