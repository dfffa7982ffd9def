use std::{mem, ptr::NonNull};

use crate::{
    list::Node,
    utils::{WORD_SIZE, align},
};

/// Header size of a block. We need to add the overhead introduced by our
/// [`Node`] structure since we always use our `Block` as a node of our linked list.
pub(crate) const BLOCK_HEADER_SIZE: usize = align(mem::size_of::<Node<Block>>(), WORD_SIZE);

/// Smallest payload a block can have. Zero sized requests are served with this
/// and a block is only split when the remainder can hold a header plus this.
pub const MIN_PAYLOAD: usize = WORD_SIZE;

/// Tag written in every live header. Headers swallowed by a merge get it wiped so
/// a stale pointer to them is recognised on release.
pub(crate) const BLOCK_MAGIC: u32 = 0xB10C_4EAD;

/// This is the structure of a block. The fields of the block are its metadata,
/// content is placed after this header.
///
/// The following diagram represents this structure ignoring that the block will be
/// wrapped inside a [`Node`], which adds the `next` and `prev` links.
///
/// ```text
/// +---------------------+ <------+
/// |     next / prev     |        |
/// +---------------------+        |
/// |        size         |        | -> Header (BLOCK_HEADER_SIZE)
/// +---------------------+        |
/// |   magic | is_free   |        |
/// +---------------------+ <------+ <--- pointer handed to the user
/// |       Content       |        |
/// |         ...         |        | -> `size` bytes
/// |                     |        |
/// +---------------------+ <------+
/// ```
///
/// `size` never includes the header, so a block occupies
/// `BLOCK_HEADER_SIZE + size` bytes of the region.
pub(crate) struct Block {
    /// Usable size of the block, multiple of [`WORD_SIZE`].
    pub size: usize,
    /// Validation tag, see [`BLOCK_MAGIC`].
    pub magic: u32,
    /// Flag to tell whether the block is free or not.
    pub is_free: bool,
}

impl Block {
    pub const fn new(size: usize, is_free: bool) -> Self {
        Self {
            size,
            magic: BLOCK_MAGIC,
            is_free,
        }
    }
}

/// Copy of a block header, as returned by the introspection methods of
/// [`crate::Heap`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    /// Address of the header.
    pub addr: usize,
    /// Usable size in bytes.
    pub size: usize,
    pub is_free: bool,
}

impl BlockInfo {
    pub(crate) fn of(node: NonNull<Node<Block>>) -> Self {
        let block = unsafe { &node.as_ref().data };

        Self {
            addr: node.as_ptr() as usize,
            size: block.size,
            is_free: block.is_free,
        }
    }

    /// Address handed to the user for this block.
    #[inline]
    pub fn payload(&self) -> usize {
        self.addr + BLOCK_HEADER_SIZE
    }

    /// First address past the block.
    #[inline]
    pub fn end(&self) -> usize {
        self.payload() + self.size
    }
}

/// Returns the address right after the header of `node`.
#[inline]
pub(crate) fn payload_of(node: NonNull<Node<Block>>) -> NonNull<u8> {
    unsafe { node.cast::<u8>().add(BLOCK_HEADER_SIZE) }
}

/// Recovers the header of the block whose payload starts at `ptr`.
///
/// **SAFETY**: `ptr` must be at least [`BLOCK_HEADER_SIZE`] bytes past the start
/// of the managed region.
#[inline]
pub(crate) unsafe fn header_of(ptr: NonNull<u8>) -> NonNull<Node<Block>> {
    unsafe { ptr.sub(BLOCK_HEADER_SIZE).cast() }
}

/// Address of the byte right after the payload of `node`.
#[inline]
pub(crate) fn end_of(node: NonNull<Node<Block>>) -> usize {
    let size = unsafe { node.as_ref().data.size };
    payload_of(node).as_ptr() as usize + size
}
