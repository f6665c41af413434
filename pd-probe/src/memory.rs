//! Code regions in two stages. A [`WritableCode`] is mapped read/write and
//! filled; [`WritableCode::seal`] turns it into a read/execute
//! [`ExecutableMemory`]. Either stage unmaps the region when dropped.

use std::io;
use std::ptr::NonNull;

use tracing::debug;

use crate::error::{ProbeError, ProbeResult};

struct Mapping {
    ptr: NonNull<u8>,
    len: usize,
}

impl Mapping {
    fn new(len: usize) -> ProbeResult<Self> {
        let ptr = os::map_writable(len).map_err(|err| os_failure("map", err))?;
        Ok(Self { ptr, len })
    }

    fn address(&self) -> usize {
        self.ptr.as_ptr() as usize
    }
}

impl Drop for Mapping {
    fn drop(&mut self) {
        // SAFETY: `ptr` and `len` describe a live mapping from `os::map_writable`.
        if let Err(err) = unsafe { os::unmap(self.ptr, self.len) } {
            debug!(%err, address = self.address(), "failed to unmap code region");
        }
    }
}

fn os_failure(step: &str, err: io::Error) -> ProbeError {
    ProbeError::ExecutableMemory(format!("{step} failed: {err}"))
}

/// A writable region that code is appended to before sealing.
pub struct WritableCode {
    mapping: Mapping,
    filled: usize,
}

impl WritableCode {
    pub fn with_capacity(capacity: usize) -> ProbeResult<Self> {
        if capacity == 0 {
            return Err(ProbeError::EmptyCode);
        }
        Ok(Self {
            mapping: Mapping::new(capacity)?,
            filled: 0,
        })
    }

    pub fn capacity(&self) -> usize {
        self.mapping.len
    }

    pub fn len(&self) -> usize {
        self.filled
    }

    pub fn is_empty(&self) -> bool {
        self.filled == 0
    }

    /// Appends `bytes` after everything written so far.
    pub fn push(&mut self, bytes: &[u8]) -> ProbeResult<()> {
        let wanted = self.filled.saturating_add(bytes.len());
        if wanted > self.capacity() {
            return Err(ProbeError::CodeTooLarge {
                capacity: self.capacity(),
                len: wanted,
            });
        }
        // SAFETY: the mapping is still writable and `filled..wanted` lies
        // inside it.
        unsafe { os::write(self.mapping.ptr.as_ptr().add(self.filled), bytes) };
        self.filled = wanted;
        Ok(())
    }

    /// Drops write access and makes the region executable.
    pub fn seal(self) -> ProbeResult<ExecutableMemory> {
        if self.filled == 0 {
            return Err(ProbeError::EmptyCode);
        }
        // SAFETY: the mapping is live and owned by `self`.
        unsafe { os::make_executable(self.mapping.ptr, self.mapping.len) }
            .map_err(|err| os_failure("protect", err))?;
        debug!(
            address = self.mapping.address(),
            len = self.filled,
            "sealed executable code"
        );
        Ok(ExecutableMemory {
            mapping: self.mapping,
            len: self.filled,
        })
    }
}

/// A read/execute region holding one finished code buffer.
pub struct ExecutableMemory {
    mapping: Mapping,
    len: usize,
}

impl ExecutableMemory {
    pub fn from_code(code: &[u8]) -> ProbeResult<Self> {
        let mut staged = WritableCode::with_capacity(code.len())?;
        staged.push(code)?;
        staged.seal()
    }

    pub fn entry_address(&self) -> usize {
        self.mapping.address()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Address of the byte at `offset`, e.g. a probe's resume point.
    pub fn address_of(&self, offset: usize) -> usize {
        self.entry_address() + offset
    }

    /// Reinterprets the start of the region as a function pointer.
    ///
    /// # Safety
    ///
    /// `F` must be a function pointer type whose ABI matches the emitted
    /// code, and the returned value must not outlive `self`.
    pub unsafe fn entry<F: Copy>(&self) -> F {
        debug_assert_eq!(size_of::<F>(), size_of::<*mut u8>());
        let start = self.mapping.ptr.as_ptr();
        // SAFETY: forwarded to the caller.
        unsafe { std::mem::transmute_copy::<*mut u8, F>(&start) }
    }
}

#[cfg(unix)]
mod os {
    use std::io;
    use std::ptr::NonNull;

    // MAP_JIT pages stay RWX; writes are gated per thread instead.
    #[cfg(target_os = "macos")]
    const PROT: libc::c_int = libc::PROT_READ | libc::PROT_WRITE | libc::PROT_EXEC;
    #[cfg(target_os = "macos")]
    const FLAGS: libc::c_int = libc::MAP_ANON | libc::MAP_PRIVATE | libc::MAP_JIT;
    #[cfg(not(target_os = "macos"))]
    const PROT: libc::c_int = libc::PROT_READ | libc::PROT_WRITE;
    #[cfg(not(target_os = "macos"))]
    const FLAGS: libc::c_int = libc::MAP_ANON | libc::MAP_PRIVATE;

    pub(super) fn map_writable(len: usize) -> io::Result<NonNull<u8>> {
        // SAFETY: anonymous private mapping without an address hint.
        let raw = unsafe { libc::mmap(std::ptr::null_mut(), len, PROT, FLAGS, -1, 0) };
        if raw == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        NonNull::new(raw.cast()).ok_or_else(|| io::Error::other("mmap returned null"))
    }

    #[cfg(not(target_os = "macos"))]
    pub(super) unsafe fn write(dst: *mut u8, bytes: &[u8]) {
        // SAFETY: the caller guarantees `dst..dst + len` is writable.
        unsafe { std::ptr::copy_nonoverlapping(bytes.as_ptr(), dst, bytes.len()) };
    }

    #[cfg(target_os = "macos")]
    pub(super) unsafe fn write(dst: *mut u8, bytes: &[u8]) {
        let _window = JitWriteWindow::open();
        // SAFETY: as above; the window lifts this thread's write protection.
        unsafe { std::ptr::copy_nonoverlapping(bytes.as_ptr(), dst, bytes.len()) };
    }

    #[cfg(not(target_os = "macos"))]
    pub(super) unsafe fn make_executable(ptr: NonNull<u8>, len: usize) -> io::Result<()> {
        // SAFETY: the caller owns the mapping.
        let rc = unsafe { libc::mprotect(ptr.as_ptr().cast(), len, libc::PROT_READ | libc::PROT_EXEC) };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    #[cfg(target_os = "macos")]
    pub(super) unsafe fn make_executable(_ptr: NonNull<u8>, _len: usize) -> io::Result<()> {
        Ok(())
    }

    pub(super) unsafe fn unmap(ptr: NonNull<u8>, len: usize) -> io::Result<()> {
        // SAFETY: the caller owns the mapping and never touches it again.
        if unsafe { libc::munmap(ptr.as_ptr().cast(), len) } != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    #[cfg(target_os = "macos")]
    unsafe extern "C" {
        fn pthread_jit_write_protect_supported_np() -> libc::c_int;
        fn pthread_jit_write_protect_np(enabled: libc::c_int);
    }

    /// Write access to MAP_JIT pages for the current thread, restored on drop.
    #[cfg(target_os = "macos")]
    struct JitWriteWindow {
        toggled: bool,
    }

    #[cfg(target_os = "macos")]
    impl JitWriteWindow {
        fn open() -> Self {
            // SAFETY: both calls only flip this thread's JIT write state.
            let toggled = unsafe { pthread_jit_write_protect_supported_np() } != 0;
            if toggled {
                unsafe { pthread_jit_write_protect_np(0) };
            }
            Self { toggled }
        }
    }

    #[cfg(target_os = "macos")]
    impl Drop for JitWriteWindow {
        fn drop(&mut self) {
            if self.toggled {
                // SAFETY: see `open`.
                unsafe { pthread_jit_write_protect_np(1) };
            }
        }
    }
}

#[cfg(windows)]
mod os {
    use std::io;
    use std::ptr::NonNull;

    use windows_sys::Win32::System::Diagnostics::Debug::FlushInstructionCache;
    use windows_sys::Win32::System::Memory::{
        MEM_COMMIT, MEM_RELEASE, MEM_RESERVE, PAGE_EXECUTE_READ, PAGE_READWRITE, VirtualAlloc,
        VirtualFree, VirtualProtect,
    };
    use windows_sys::Win32::System::Threading::GetCurrentProcess;

    pub(super) fn map_writable(len: usize) -> io::Result<NonNull<u8>> {
        // SAFETY: fresh committed allocation without an address hint.
        let raw = unsafe {
            VirtualAlloc(std::ptr::null(), len, MEM_COMMIT | MEM_RESERVE, PAGE_READWRITE)
        };
        NonNull::new(raw.cast()).ok_or_else(io::Error::last_os_error)
    }

    pub(super) unsafe fn write(dst: *mut u8, bytes: &[u8]) {
        // SAFETY: the caller guarantees `dst..dst + len` is writable.
        unsafe { std::ptr::copy_nonoverlapping(bytes.as_ptr(), dst, bytes.len()) };
    }

    pub(super) unsafe fn make_executable(ptr: NonNull<u8>, len: usize) -> io::Result<()> {
        let mut previous = 0;
        // SAFETY: the caller owns the allocation.
        if unsafe { VirtualProtect(ptr.as_ptr().cast(), len, PAGE_EXECUTE_READ, &mut previous) } == 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: flushing our own freshly written range.
        if unsafe { FlushInstructionCache(GetCurrentProcess(), ptr.as_ptr().cast(), len) } == 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    pub(super) unsafe fn unmap(ptr: NonNull<u8>, _len: usize) -> io::Result<()> {
        // SAFETY: the caller owns the allocation and never touches it again.
        if unsafe { VirtualFree(ptr.as_ptr().cast(), 0, MEM_RELEASE) } == 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

#[cfg(not(any(unix, windows)))]
mod os {
    use std::io;
    use std::ptr::NonNull;

    pub(super) fn map_writable(_len: usize) -> io::Result<NonNull<u8>> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "no executable memory on this platform",
        ))
    }

    pub(super) unsafe fn write(dst: *mut u8, bytes: &[u8]) {
        // SAFETY: unreachable without a mapping; kept for the shared contract.
        unsafe { std::ptr::copy_nonoverlapping(bytes.as_ptr(), dst, bytes.len()) };
    }

    pub(super) unsafe fn make_executable(_ptr: NonNull<u8>, _len: usize) -> io::Result<()> {
        Ok(())
    }

    pub(super) unsafe fn unmap(_ptr: NonNull<u8>, _len: usize) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_code_is_rejected() {
        let err = ExecutableMemory::from_code(&[]).err().expect("empty code should fail");
        assert!(matches!(err, ProbeError::EmptyCode));
        let err = WritableCode::with_capacity(0).err().expect("zero capacity should fail");
        assert!(matches!(err, ProbeError::EmptyCode));
    }

    #[cfg(any(unix, windows))]
    #[test]
    fn sealing_nothing_is_rejected() {
        let staged = WritableCode::with_capacity(16).expect("region should map");
        assert!(staged.is_empty());
        let err = staged.seal().err().expect("unfilled region should not seal");
        assert!(matches!(err, ProbeError::EmptyCode));
    }

    #[cfg(any(unix, windows))]
    #[test]
    fn overfilling_keeps_earlier_bytes() {
        let mut staged = WritableCode::with_capacity(4).expect("region should map");
        staged.push(&[0x90, 0x90, 0x90]).expect("three bytes fit");
        let err = staged.push(&[0x90, 0x90]).expect_err("five bytes do not fit");
        assert!(matches!(
            err,
            ProbeError::CodeTooLarge {
                capacity: 4,
                len: 5
            }
        ));
        assert_eq!(staged.len(), 3);
        assert_eq!(staged.capacity(), 4);
    }

    #[cfg(all(
        any(target_arch = "x86", target_arch = "x86_64"),
        any(unix, windows)
    ))]
    #[test]
    fn mapped_code_is_callable() {
        let mut code = Vec::new();
        // mov eax, 42 ; ret
        code.extend_from_slice(&[0xB8, 42, 0, 0, 0]);
        crate::assembler::emit_ret(&mut code);
        let memory = ExecutableMemory::from_code(&code).expect("code should map");
        assert_eq!(memory.len(), code.len());
        assert_eq!(memory.address_of(1), memory.entry_address() + 1);
        let entry: extern "C" fn() -> u32 = unsafe { memory.entry() };
        assert_eq!(entry(), 42);
    }

    #[cfg(all(
        any(target_arch = "x86", target_arch = "x86_64"),
        any(unix, windows)
    ))]
    #[test]
    fn staged_pushes_run_as_one_function() {
        let mut staged = WritableCode::with_capacity(64).expect("region should map");
        staged.push(&[0xB8]).expect("opcode fits");
        staged.push(&7u32.to_le_bytes()).expect("immediate fits");
        staged.push(&[0xC3]).expect("ret fits");
        let memory = staged.seal().expect("region should seal");
        assert_eq!(memory.len(), 6);
        let entry: extern "C" fn() -> u32 = unsafe { memory.entry() };
        assert_eq!(entry(), 7);
    }
}
