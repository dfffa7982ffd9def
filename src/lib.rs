//! # brkalloc
//!
//! A first-fit heap allocator over a single region that only grows, the way
//! `malloc` grows the program break with `sbrk(2)`.
//!
//! Every block, free or not, is kept in one doubly linked chain ordered by
//! address. Each block has a fixed size header right before the memory handed
//! to the user:
//!
//! ```text
//!  head                                                         tail
//!   |                                                             |
//!   v                                                             v
//!   +--------+---------+   +--------+---------+   +--------+---------+
//!   | Header | Payload |<->| Header | Payload |<->| Header | Payload |
//!   +--------+---------+   +--------+---------+   +--------+---------+
//!             ^
//!             +-- pointer returned by `allocate`
//! ```
//!
//! - `allocate` aligns the size to the word size, takes the first free block
//!   that fits, splits it when there is room for another block, and grows the
//!   region when nothing fits.
//! - `release` marks the block free and merges it with its free neighbours.
//!
//! The region comes from a [`MemorySource`]. [`ReservedBreak`] reserves address
//! space and commits it page by page, [`Sbrk`] moves the real program break, and
//! [`FixedRegion`] simulates a break over a plain buffer.
//!
//! ```rust
//! use brkalloc::{FixedRegion, Heap};
//!
//! let mut heap = Heap::new(FixedRegion::new(4096));
//!
//! let ptr = heap.allocate(10).unwrap();
//! assert_eq!(heap.len(), 1);
//!
//! unsafe { heap.release(ptr.as_ptr()).unwrap() };
//! assert!(heap.head().unwrap().is_free);
//! ```
//!
//! [`Heap`] is single threaded. [`BrkAlloc`] wraps one behind a spin lock and
//! implements [`GlobalAlloc`], so it can be installed with `#[global_allocator]`.

use std::{
    alloc::{GlobalAlloc, Layout},
    ptr::{self, NonNull},
};

use log::warn;

mod block;
mod config;
mod error;
mod freelist;
mod heap;
mod kernel;
mod list;
mod region;
mod utils;

pub use block::{BlockInfo, MIN_PAYLOAD};
pub use config::{Coalesce, HeapConfig};
pub use error::AllocError;
pub use heap::{Heap, HeapStats};
#[cfg(unix)]
pub use kernel::Sbrk;
pub use kernel::{DEFAULT_RESERVE, ReservedBreak};
pub use region::{FixedRegion, MemorySource};
pub use utils::{WORD_SIZE, align};

/// Size of the header placed before every payload.
pub const HEADER_SIZE: usize = block::BLOCK_HEADER_SIZE;

/// [`Heap`] behind a single lock, usable as the global allocator.
///
/// Alignments up to [`WORD_SIZE`] come straight from the heap. Bigger ones are
/// served by asking for `align` extra bytes and storing the address of the
/// block in the word right before the aligned pointer:
///
/// ```text
/// +--------+---------+--------------+-------------------+
/// | Header | padding | block addr   | aligned payload   |
/// +--------+---------+--------------+-------------------+
///          ^                        ^
///          +-- heap payload         +-- returned pointer
/// ```
///
/// Nothing running inside the allocator may allocate. Installing a logger that
/// allocates while this is the global allocator will deadlock.
pub struct BrkAlloc<S: MemorySource = ReservedBreak> {
    heap: spin::Mutex<Heap<S>>,
}

impl BrkAlloc {
    pub const fn new() -> Self {
        Self::with_heap(Heap::new(ReservedBreak::new()))
    }
}

impl Default for BrkAlloc {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: MemorySource> BrkAlloc<S> {
    pub const fn with_heap(heap: Heap<S>) -> Self {
        Self {
            heap: spin::Mutex::new(heap),
        }
    }

    /// Runs `f` with the heap locked.
    pub fn with<T>(&self, f: impl FnOnce(&mut Heap<S>) -> T) -> T {
        f(&mut self.heap.lock())
    }

    pub fn stats(&self) -> HeapStats {
        self.heap.lock().stats()
    }

    /// Returns a pointer to memory fitting `layout`, or null.
    ///
    /// # Safety
    ///
    /// Same contract as [`GlobalAlloc::alloc`].
    pub unsafe fn allocate(&self, layout: Layout) -> *mut u8 {
        let mut heap = self.heap.lock();

        if layout.align() <= WORD_SIZE {
            return heap.allocate(layout.size()).map_or(ptr::null_mut(), NonNull::as_ptr);
        }

        let Some(size) = layout.size().checked_add(layout.align()) else {
            return ptr::null_mut();
        };

        let Ok(block) = heap.allocate(size) else {
            return ptr::null_mut();
        };

        unsafe {
            let raw = block.as_ptr() as usize;
            let offset = align(raw + WORD_SIZE, layout.align()) - raw;
            let aligned = block.as_ptr().add(offset);

            aligned.cast::<*mut u8>().sub(1).write(block.as_ptr());
            aligned
        }
    }

    /// Gives back memory obtained from [`BrkAlloc::allocate`].
    ///
    /// # Safety
    ///
    /// Same contract as [`GlobalAlloc::dealloc`].
    pub unsafe fn deallocate(&self, ptr: *mut u8, layout: Layout) {
        let mut heap = self.heap.lock();

        unsafe {
            let block = if layout.align() <= WORD_SIZE || ptr.is_null() {
                ptr
            } else {
                ptr.cast::<*mut u8>().sub(1).read()
            };

            if let Err(err) = heap.release(block) {
                warn!("dealloc({ptr:p}): {err}");
            }
        }
    }
}

unsafe impl<S: MemorySource + Send> GlobalAlloc for BrkAlloc<S> {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        unsafe { self.allocate(layout) }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        unsafe { self.deallocate(ptr, layout) }
    }
}
