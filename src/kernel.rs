use std::ptr::NonNull;

use log::{debug, warn};

use crate::{region::MemorySource, utils::align};

/// Address space reserved by [`ReservedBreak::new`].
pub const DEFAULT_RESERVE: usize = 256 * 1024 * 1024;

/// Marker type that carries the platform-dependant implementation of
/// [`PlatformMemory`].
struct Kernel;

/// This trait provides an abstraction to handle low level memory operations
/// and syscalls. As the allocator, our top level view of this has nothing
/// to do with the concrete implementations / APIs offered by each kernel.
trait PlatformMemory {
    /// Reserves `len` bytes of address space without making them accessible.
    /// Returns None if the underlying syscall fails.
    unsafe fn reserve(len: usize) -> Option<NonNull<u8>>;

    /// Makes `len` bytes starting at `addr` readable and writable. `addr` must
    /// be page aligned and inside a reservation.
    unsafe fn commit(addr: NonNull<u8>, len: usize) -> bool;

    /// Gives a whole reservation back to the kernel.
    unsafe fn release(addr: NonNull<u8>, len: usize);

    /// Returns the virtual memory page size of the computer in bytes.
    fn page_size() -> usize;
}

#[cfg(unix)]
mod unix {
    use super::{Kernel, PlatformMemory};

    use libc::{mmap, mprotect, munmap, off_t, size_t};

    use std::{
        os::raw::{c_int, c_void},
        ptr::NonNull,
    };

    impl PlatformMemory for Kernel {
        unsafe fn reserve(len: usize) -> Option<NonNull<u8>> {
            // mmap parameters.
            const ADDR: *mut c_void = std::ptr::null_mut::<c_void>();
            // Nothing is accessible until `commit`.
            const PROT: c_int = libc::PROT_NONE;
            const FLAGS: c_int = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;
            const FD: c_int = -1;
            const OFFSET: off_t = 0;

            unsafe {
                let addr = mmap(ADDR, len as size_t, PROT, FLAGS, FD, OFFSET);

                if addr == libc::MAP_FAILED {
                    return None;
                }

                NonNull::new(addr.cast::<u8>())
            }
        }

        unsafe fn commit(addr: NonNull<u8>, len: usize) -> bool {
            const PROT: c_int = libc::PROT_READ | libc::PROT_WRITE;

            unsafe { mprotect(addr.as_ptr().cast::<c_void>(), len as size_t, PROT) == 0 }
        }

        unsafe fn release(addr: NonNull<u8>, len: usize) {
            unsafe {
                munmap(addr.as_ptr().cast::<c_void>(), len as size_t);
            }
        }

        fn page_size() -> usize {
            unsafe { libc::sysconf(libc::_SC_PAGE_SIZE) as usize }
        }
    }
}

#[cfg(windows)]
mod windows {
    use std::{mem::MaybeUninit, os::raw::c_void, ptr::NonNull};

    use super::{Kernel, PlatformMemory};

    use windows::Win32::System::{Memory, SystemInformation};

    impl PlatformMemory for Kernel {
        unsafe fn reserve(len: usize) -> Option<NonNull<u8>> {
            unsafe {
                let addr = Memory::VirtualAlloc(None, len, Memory::MEM_RESERVE, Memory::PAGE_NOACCESS);

                NonNull::new(addr.cast())
            }
        }

        unsafe fn commit(addr: NonNull<u8>, len: usize) -> bool {
            unsafe {
                let committed = Memory::VirtualAlloc(
                    Some(addr.as_ptr() as *const c_void),
                    len,
                    Memory::MEM_COMMIT,
                    Memory::PAGE_READWRITE,
                );

                !committed.is_null()
            }
        }

        unsafe fn release(addr: NonNull<u8>, _len: usize) {
            unsafe {
                let _ = Memory::VirtualFree(addr.as_ptr().cast::<c_void>(), 0, Memory::MEM_RELEASE);
            }
        }

        fn page_size() -> usize {
            unsafe {
                let mut system_info = MaybeUninit::uninit();
                SystemInformation::GetSystemInfo(system_info.as_mut_ptr());

                system_info.assume_init().dwPageSize as usize
            }
        }
    }
}

/// A private program break. A single range of address space is reserved on
/// the first extension and pages are committed as the break moves forward, so
/// the region is contiguous no matter what the rest of the process does with
/// its own heap.
///
/// ```text
///  start            break       committed                      start + reserve
///    |                |             |                                 |
///    v                v             v                                 v
///    +----------------+-------------+---------------------------------+
///    |  handed out    |  RW, unused |        reserved, no access      |
///    +----------------+-------------+---------------------------------+
/// ```
///
/// The reservation is given back when the value is dropped.
pub struct ReservedBreak {
    /// Size of the reservation. Rounded up to the page size once reserved.
    reserve: usize,
    start: Option<NonNull<u8>>,
    /// Bytes handed out.
    brk: usize,
    /// Bytes readable and writable, multiple of the page size.
    committed: usize,
    page_size: usize,
}

impl ReservedBreak {
    pub const fn new() -> Self {
        Self::with_reserve(DEFAULT_RESERVE)
    }

    /// Creates a break that can grow up to `reserve` bytes. Nothing is mapped
    /// until the first extension.
    pub const fn with_reserve(reserve: usize) -> Self {
        Self {
            reserve,
            start: None,
            brk: 0,
            committed: 0,
            page_size: 0,
        }
    }

    /// Bytes handed out so far.
    #[inline]
    pub fn used(&self) -> usize {
        self.brk
    }

    fn start(&mut self) -> Option<NonNull<u8>> {
        if let Some(start) = self.start {
            return Some(start);
        }

        self.page_size = Kernel::page_size();
        self.reserve = align(self.reserve, self.page_size);

        let start = unsafe { Kernel::reserve(self.reserve) };

        match start {
            Some(addr) => debug!("reserved {} bytes at {:p}", self.reserve, addr),
            None => warn!("could not reserve {} bytes of address space", self.reserve),
        }

        self.start = start;
        start
    }
}

impl Default for ReservedBreak {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl MemorySource for ReservedBreak {
    fn extend(&mut self, len: usize) -> Option<NonNull<u8>> {
        let start = self.start()?;

        if len > self.reserve - self.brk {
            warn!("reservation of {} bytes exhausted", self.reserve);
            return None;
        }

        let brk = self.brk + len;

        if brk > self.committed {
            let target = align(brk, self.page_size).min(self.reserve);

            unsafe {
                let from = start.add(self.committed);

                if !Kernel::commit(from, target - self.committed) {
                    warn!("could not commit {} bytes at {:p}", target - self.committed, from);
                    return None;
                }
            }

            debug!("committed {} bytes, total {}", target - self.committed, target);
            self.committed = target;
        }

        let addr = unsafe { start.add(self.brk) };
        self.brk = brk;

        Some(addr)
    }
}

impl Drop for ReservedBreak {
    fn drop(&mut self) {
        if let Some(start) = self.start.take() {
            unsafe { Kernel::release(start, self.reserve) };
        }
    }
}

// The reservation is owned by this value.
unsafe impl Send for ReservedBreak {}

/// The real program break, moved with `sbrk(2)`.
///
/// Nothing else in the process may move the break while this is in use. The
/// system allocator usually does, so this only makes sense when the heap built
/// on top of it is the only allocator of the process. If the break is found
/// somewhere other than where the last extension left it, the extension is
/// refused.
#[cfg(unix)]
pub struct Sbrk {
    /// Where the last extension ended.
    end: Option<usize>,
}

#[cfg(unix)]
impl Sbrk {
    pub const fn new() -> Self {
        Self { end: None }
    }
}

#[cfg(unix)]
impl Default for Sbrk {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(unix)]
unsafe impl MemorySource for Sbrk {
    fn extend(&mut self, len: usize) -> Option<NonNull<u8>> {
        use libc::{c_void, intptr_t, sbrk};

        unsafe {
            let current = sbrk(0) as usize;

            if self.end.is_some_and(|end| end != current) {
                warn!("program break moved behind our back to {current:#x}");
                return None;
            }

            // The initial break is not guaranteed to be word aligned.
            let padding = align(current, crate::utils::WORD_SIZE) - current;
            let increment = intptr_t::try_from(len.checked_add(padding)?).ok()?;

            let addr = sbrk(increment);

            if addr == usize::MAX as *mut c_void {
                return None;
            }

            if addr as usize != current {
                // Someone moved the break in between, give the bytes back.
                sbrk(-increment);
                return None;
            }

            let start = current + padding;
            self.end = Some(start + len);

            debug!("program break moved to {:#x}", start + len);
            NonNull::new(start as *mut u8)
        }
    }
}
