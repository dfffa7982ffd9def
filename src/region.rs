use std::ptr::NonNull;

use crate::utils::{WORD_SIZE, align};

/// The only thing the allocator needs from the outside world: a byte region that
/// can be pushed further, like the program break moved by `sbrk(2)`.
///
/// ```text
///   start                                    break
///     |                                         |
///     v                                         v
///     +-------------+-------------+-------------+ - - - - - - - +
///     |  extend(a)  |  extend(b)  |  extend(c)  |   extend(d)   |
///     +-------------+-------------+-------------+ - - - - - - - +
///                                               ^
///                                               +-- returned by extend(d)
/// ```
///
/// # Safety
///
/// Implementors must guarantee that every pointer returned by [`MemorySource::extend`]:
/// - is aligned to [`WORD_SIZE`],
/// - is valid for reads and writes of `len` bytes for as long as the source lives,
///   even if the source itself is moved,
/// - starts exactly where the previous extension ended.
///
/// A refused extension returns `None` and leaves previously granted memory untouched.
pub unsafe trait MemorySource {
    /// Extends the region by `len` bytes and returns the start of the new part.
    fn extend(&mut self, len: usize) -> Option<NonNull<u8>>;
}

/// Simulated break over a fixed in-memory buffer. Lets the heap be driven without
/// touching the process memory map, and makes running out of memory reproducible.
pub struct FixedRegion {
    /// Start of the buffer, leaked from a `Box<[usize]>` and reclaimed on drop.
    start: NonNull<usize>,
    /// Capacity in words.
    words: usize,
    /// Bytes handed out so far.
    brk: usize,
}

impl FixedRegion {
    /// Creates a region of `capacity` bytes, rounded up to a multiple of [`WORD_SIZE`].
    pub fn new(capacity: usize) -> Self {
        let words = align(capacity, WORD_SIZE) / WORD_SIZE;
        let buffer = vec![0usize; words].into_boxed_slice();
        let start = NonNull::from(Box::leak(buffer)).cast::<usize>();

        Self {
            start,
            words,
            brk: 0,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.words * WORD_SIZE
    }

    /// Bytes granted through [`MemorySource::extend`].
    #[inline]
    pub fn used(&self) -> usize {
        self.brk
    }

    #[inline]
    pub fn start(&self) -> NonNull<u8> {
        self.start.cast()
    }
}

unsafe impl MemorySource for FixedRegion {
    fn extend(&mut self, len: usize) -> Option<NonNull<u8>> {
        if len > self.capacity() - self.brk {
            return None;
        }

        let addr = unsafe { self.start.cast::<u8>().add(self.brk) };
        self.brk += len;

        Some(addr)
    }
}

impl Drop for FixedRegion {
    fn drop(&mut self) {
        let buffer = NonNull::slice_from_raw_parts(self.start, self.words);
        drop(unsafe { Box::from_raw(buffer.as_ptr()) });
    }
}

// The buffer is owned, nothing else points into it.
unsafe impl Send for FixedRegion {}
