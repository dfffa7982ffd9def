use std::ptr::NonNull;

use log::trace;

use crate::{
    block::{BLOCK_HEADER_SIZE, Block, MIN_PAYLOAD, end_of, payload_of},
    config::Coalesce,
    list::{Link, List, Node},
};

/// The chain of every [`Block`] of the heap, free or not, in ascending address order.
///
/// Block headers live inside the heap itself, so the list never allocates. Growth
/// appends past the tail and splitting inserts right after the block being split,
/// which is what keeps list order equal to address order:
///
/// ```text
///   head                                                          tail
///    |                                                              |
///    v                                                              v
/// +--------+---------+    +--------+------+    +--------+-------------------+
/// | Header | Payload | -> | Header | Free | -> | Header |      Payload      |
/// +--------+---------+ <- +--------+------+ <- +--------+-------------------+
/// ```
///
/// All the free blocks can be identified by the [`Block::is_free`] flag.
pub(crate) struct FreeList {
    pub blocks: List<Block>,
}

impl FreeList {
    /// Creates a new empty chain.
    pub const fn new() -> Self {
        Self {
            blocks: List::new(),
        }
    }

    /// It tells whether the chain has no blocks at all.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Writes a new allocated block of `size` bytes at `addr` and makes it the tail.
    ///
    /// **SAFETY**: `addr` must be valid for `BLOCK_HEADER_SIZE + size` bytes and
    /// start right where the current tail ends.
    pub unsafe fn push(&mut self, addr: NonNull<u8>, size: usize) -> NonNull<Node<Block>> {
        unsafe { self.blocks.append(Block::new(size, false), addr) }
    }

    /// Returns the first free block, in address order, that can store `size` bytes.
    ///
    /// This is the first-fit algorithm: no best fit, ties are broken by position.
    pub fn find_fit(&self, size: usize) -> Link<Node<Block>> {
        self.blocks.nodes().find(|node| {
            let block = unsafe { &node.as_ref().data };
            block.is_free && block.size >= size
        })
    }

    /// Finds a fit for `size` bytes, splits it if there is room for another block
    /// and marks it as allocated. `None` means the heap has to grow.
    ///
    /// **SAFETY**: every node of the chain must be a valid header.
    pub unsafe fn take(&mut self, size: usize) -> Link<Node<Block>> {
        let mut node = self.find_fit(size)?;

        unsafe {
            if can_split(node.as_ref().data.size, size) {
                self.split(node, size);
            }

            node.as_mut().data.is_free = false;
            trace!("reusing block {:p} of {} bytes", node, node.as_ref().data.size);
        }

        Some(node)
    }

    /// Cuts `node` down to `size` bytes and turns the rest into a new free block
    /// linked right after it. The left part keeps its address.
    ///
    /// ```text
    /// +--------+--------------------------------+
    /// | Header |            old size            |
    /// +--------+--------------------------------+
    ///
    /// +--------+----------+--------+------------+
    /// | Header |   size   | Header | remaining  |
    /// +--------+----------+--------+------------+
    /// ```
    ///
    /// **SAFETY**: `node` must belong to the chain and [`can_split`] must hold.
    pub unsafe fn split(&mut self, mut node: NonNull<Node<Block>>, size: usize) -> NonNull<Node<Block>> {
        unsafe {
            let block = &mut node.as_mut().data;
            let remaining = block.size - size - BLOCK_HEADER_SIZE;
            block.size = size;

            let addr = payload_of(node).add(size);
            let rhs = self.blocks.insert_after(node, Block::new(remaining, true), addr);

            trace!("split {:p}: {} + {} bytes", node, size, remaining);
            rhs
        }
    }

    /// Absorbs the free block right after `node`, if any. Returns whether a
    /// merge happened.
    ///
    /// **SAFETY**: `node` must belong to the chain.
    pub unsafe fn merge_with_next(&mut self, node: NonNull<Node<Block>>) -> bool {
        unsafe {
            match node.as_ref().next {
                Some(next) if next.as_ref().data.is_free => {
                    self.merge(node, next);
                    true
                }
                _ => false,
            }
        }
    }

    /// Merges `node` into the block right before it if that one is free.
    /// Returns the block that now covers `node`.
    ///
    /// **SAFETY**: `node` must belong to the chain.
    pub unsafe fn merge_with_prev(&mut self, node: NonNull<Node<Block>>) -> NonNull<Node<Block>> {
        unsafe {
            match node.as_ref().prev {
                Some(prev) if prev.as_ref().data.is_free => {
                    self.merge(prev, node);
                    prev
                }
                _ => node,
            }
        }
    }

    /// Merges the free neighbours of the just released `node` into it following
    /// `policy`. Returns the block that now covers `node`.
    ///
    /// **SAFETY**: `node` must belong to the chain.
    pub unsafe fn coalesce(&mut self, node: NonNull<Node<Block>>, policy: Coalesce) -> NonNull<Node<Block>> {
        unsafe {
            match policy {
                Coalesce::OneSide => {
                    if self.merge_with_next(node) {
                        node
                    } else {
                        self.merge_with_prev(node)
                    }
                }
                Coalesce::BothSides => {
                    self.merge_with_next(node);
                    self.merge_with_prev(node)
                }
            }
        }
    }

    /// Merges `rhs` into `lhs`; `rhs` must come right after `lhs`. The header of
    /// `rhs` becomes payload of `lhs`, so its magic is wiped.
    unsafe fn merge(&mut self, mut lhs: NonNull<Node<Block>>, mut rhs: NonNull<Node<Block>>) {
        unsafe {
            debug_assert_eq!(end_of(lhs), rhs.as_ptr() as usize);

            let absorbed = rhs.as_ref().data.size;
            lhs.as_mut().data.size += BLOCK_HEADER_SIZE + absorbed;
            rhs.as_mut().data.magic = 0;

            self.blocks.remove(rhs);

            trace!("merged {:p} into {:p}, now {} bytes", rhs, lhs, lhs.as_ref().data.size);
        }
    }
}

/// A block of `block_size` bytes serving `size` bytes is split only if what is left
/// can hold a header and the smallest payload.
#[inline]
pub(crate) fn can_split(block_size: usize, size: usize) -> bool {
    block_size >= size + BLOCK_HEADER_SIZE + MIN_PAYLOAD
}
