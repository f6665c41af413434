//! Byte layout of the CPU-state record handed to probe callbacks.
//!
//! The trampolines in `pd-probe` address every field of [`ProbeContext`] with
//! hand-written constant offsets. Both x86 layouts live here as plain data and
//! are checked against `offset_of!` at compile time, so any drift between the
//! struct and the offset tables breaks the build instead of corrupting
//! registers at runtime.

macro_rules! register_ids {
    ($(#[$meta:meta])* $name:ident { $($variant:ident = $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[repr(u8)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];
            pub const COUNT: usize = Self::ALL.len();

            pub const fn index(self) -> usize {
                self as usize
            }

            pub fn name(self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }

            pub fn from_name(name: &str) -> Option<Self> {
                Self::ALL
                    .iter()
                    .copied()
                    .find(|id| id.name().eq_ignore_ascii_case(name))
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str(self.name())
            }
        }
    };
}

macro_rules! cpu_state_accessors {
    ($word:ty) => {
        impl CpuState {
            pub fn gpr(&self, id: Gpr) -> usize {
                self.gprs[id.index()] as usize
            }

            pub fn set_gpr(&mut self, id: Gpr, value: usize) {
                self.gprs[id.index()] = value as $word;
            }

            pub fn gpr_mut(&mut self, id: Gpr) -> &mut $word {
                &mut self.gprs[id.index()]
            }

            pub fn spr(&self, id: Spr) -> usize {
                self.sprs[id.index()] as usize
            }

            pub fn set_spr(&mut self, id: Spr, value: usize) {
                self.sprs[id.index()] = value as $word;
            }

            /// Raw low lane of a vector register. The upper lanes are never
            /// captured.
            pub fn fpr_bits(&self, id: Fpr) -> u64 {
                self.fprs[id.index()]
            }

            pub fn set_fpr_bits(&mut self, id: Fpr, bits: u64) {
                self.fprs[id.index()] = bits;
            }

            pub fn fpr_f64(&self, id: Fpr) -> f64 {
                f64::from_bits(self.fpr_bits(id))
            }

            pub fn set_fpr_f64(&mut self, id: Fpr, value: f64) {
                self.set_fpr_bits(id, value.to_bits());
            }

            pub fn pc(&self) -> usize {
                self.spr(Spr::INSTRUCTION_POINTER)
            }

            pub fn set_pc(&mut self, value: usize) {
                self.set_spr(Spr::INSTRUCTION_POINTER, value);
            }

            pub fn sp(&self) -> usize {
                self.gpr(Gpr::STACK_POINTER)
            }

            pub fn set_sp(&mut self, value: usize) {
                self.set_gpr(Gpr::STACK_POINTER, value);
            }

            pub fn fp(&self) -> usize {
                self.gpr(Gpr::FRAME_POINTER)
            }

            pub fn set_fp(&mut self, value: usize) {
                self.set_gpr(Gpr::FRAME_POINTER, value);
            }

            pub fn flags(&self) -> usize {
                self.spr(Spr::FLAGS)
            }

            pub fn set_flags(&mut self, value: usize) {
                self.set_spr(Spr::FLAGS, value);
            }
        }

        impl ProbeContext {
            pub fn pc(&self) -> usize {
                self.cpu.pc()
            }

            pub fn set_pc(&mut self, value: usize) {
                self.cpu.set_pc(value);
            }

            pub fn sp(&self) -> usize {
                self.cpu.sp()
            }

            pub fn set_sp(&mut self, value: usize) {
                self.cpu.set_sp(value);
            }

            pub fn fp(&self) -> usize {
                self.cpu.fp()
            }

            pub fn gpr(&self, id: Gpr) -> usize {
                self.cpu.gpr(id)
            }

            pub fn set_gpr(&mut self, id: Gpr, value: usize) {
                self.cpu.set_gpr(id, value);
            }

            /// Start address of the record, as the trampoline sees it.
            pub fn address(&self) -> usize {
                self as *const Self as usize
            }
        }
    };
}

// Typed views of the pointer-sized slots. Only meaningful when the layout's
// word size matches the host pointer width.
macro_rules! probe_context_pointer_accessors {
    () => {
        impl ProbeContext {
            pub fn new(function: $crate::ProbeFunction, arg: *mut core::ffi::c_void) -> Self {
                Self {
                    probe_function: function as usize as Word,
                    arg: arg as usize as Word,
                    ..Self::default()
                }
            }

            pub fn probe_function(&self) -> Option<$crate::ProbeFunction> {
                function_from_word(self.probe_function)
            }

            pub fn arg_ptr(&self) -> *mut core::ffi::c_void {
                self.arg as usize as *mut core::ffi::c_void
            }

            pub fn initialize_stack_function(&self) -> Option<$crate::ProbeFunction> {
                function_from_word(self.initialize_stack_function)
            }

            pub fn initialize_stack_arg_ptr(&self) -> *mut core::ffi::c_void {
                self.initialize_stack_arg as usize as *mut core::ffi::c_void
            }

            /// Requests a second callback once the record sits at its final
            /// location. The stack initializer must not move the stack
            /// pointer again.
            pub fn set_initialize_stack_function(
                &mut self,
                function: Option<$crate::ProbeFunction>,
                arg: *mut core::ffi::c_void,
            ) {
                self.initialize_stack_function = function.map_or(0, |f| f as usize as Word);
                self.initialize_stack_arg = arg as usize as Word;
            }
        }

        fn function_from_word(word: Word) -> Option<$crate::ProbeFunction> {
            if word == 0 {
                return None;
            }
            // SAFETY: non-zero slots only ever hold addresses written from a
            // `ProbeFunction`, and the word size equals the pointer width here.
            Some(unsafe { core::mem::transmute::<usize, $crate::ProbeFunction>(word as usize) })
        }
    };
}

pub mod x86;
pub mod x86_64;

#[cfg(target_arch = "x86")]
pub use x86 as active;
#[cfg(not(target_arch = "x86"))]
pub use x86_64 as active;

pub use active::{CpuState, Fpr, Gpr, ProbeContext, Spr, Word};

pub const FLAG_CF: usize = 1 << 0;
pub const FLAG_PF: usize = 1 << 2;
pub const FLAG_AF: usize = 1 << 4;
pub const FLAG_ZF: usize = 1 << 6;
pub const FLAG_SF: usize = 1 << 7;
pub const FLAG_TF: usize = 1 << 8;
pub const FLAG_IF: usize = 1 << 9;
pub const FLAG_DF: usize = 1 << 10;
pub const FLAG_OF: usize = 1 << 11;

/// Bits of the flags register that ordinary code can set, in display order.
pub const STATUS_FLAGS: [(usize, char); 7] = [
    (FLAG_OF, 'O'),
    (FLAG_DF, 'D'),
    (FLAG_SF, 'S'),
    (FLAG_ZF, 'Z'),
    (FLAG_AF, 'A'),
    (FLAG_PF, 'P'),
    (FLAG_CF, 'C'),
];

/// Signature of a probe callback and of the optional stack initializer.
///
/// On x86_64 the trampoline always passes the record in `rdi`, so callbacks
/// use the System V convention on every host OS.
#[cfg(target_arch = "x86_64")]
pub type ProbeFunction = unsafe extern "sysv64" fn(*mut ProbeContext);
#[cfg(not(target_arch = "x86_64"))]
pub type ProbeFunction = unsafe extern "C" fn(*mut ProbeContext);

/// Declares a function with the calling convention [`ProbeFunction`] expects
/// on the current target.
#[macro_export]
macro_rules! probe_callback {
    ($(#[$meta:meta])* $vis:vis fn $name:ident($context:ident: *mut $record:ty) $body:block) => {
        $(#[$meta])*
        #[cfg(target_arch = "x86_64")]
        $vis unsafe extern "sysv64" fn $name($context: *mut $record) $body

        $(#[$meta])*
        #[cfg(not(target_arch = "x86_64"))]
        $vis unsafe extern "C" fn $name($context: *mut $record) $body
    };
}
