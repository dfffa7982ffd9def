//! Helper functions that don't particularly belong to any concrete module of the allocator.

use std::mem;

/// Machine word size. Every block size and every payload address is a multiple of it.
pub const WORD_SIZE: usize = mem::size_of::<usize>();

/// It aligns `to_be_aligned` up to the next multiple of `aligment`.
///
/// `aligment` must be a power of two. Used to round request sizes up to
/// [`WORD_SIZE`] and commit sizes up to the page size of the computer.
#[inline]
pub const fn align(to_be_aligned: usize, aligment: usize) -> usize {
    (to_be_aligned + aligment - 1) & !(aligment - 1)
}

/// Same as [`align`] but returns `None` instead of wrapping around.
#[inline]
pub const fn checked_align(to_be_aligned: usize, aligment: usize) -> Option<usize> {
    match to_be_aligned.checked_add(aligment - 1) {
        Some(value) => Some(value & !(aligment - 1)),
        None => None,
    }
}
