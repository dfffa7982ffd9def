use std::ptr::NonNull;

use log::{debug, trace, warn};

use crate::{
    block::{BLOCK_HEADER_SIZE, BLOCK_MAGIC, Block, BlockInfo, MIN_PAYLOAD, end_of, header_of, payload_of},
    config::{Coalesce, HeapConfig},
    error::AllocError,
    freelist::FreeList,
    list::Node,
    region::MemorySource,
    utils::{WORD_SIZE, checked_align},
};

/// Figures about the state of a [`Heap`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeapStats {
    /// Blocks in the chain, free or not.
    pub blocks: usize,
    pub free_blocks: usize,
    /// Payload bytes of allocated blocks.
    pub used_bytes: usize,
    /// Payload bytes of free blocks.
    pub free_bytes: usize,
    /// Bytes requested from the memory source so far.
    pub high_water: usize,
}

/// First-fit heap allocator over a region that only grows.
///
/// The heap keeps all its blocks in a single chain ordered by address. A request
/// is served by the first free block big enough, split if there is room left,
/// or by growing the region. Released blocks are merged with their free
/// neighbours right away.
///
/// ```text
///   start                                                     high water
///     |                                                            |
///     v                                                            v
///     +--------+------+--------+------------+--------+-------------+
///     | Header | Used | Header |    Free    | Header |    Used     |
///     +--------+------+--------+------------+--------+-------------+
/// ```
///
/// Memory is never given back to the source. A heap is not thread safe, see
/// [`crate::BrkAlloc`] for a locked version.
pub struct Heap<S: MemorySource> {
    chain: FreeList,
    source: S,
    config: HeapConfig,
    /// Address of the first byte ever handed out by `source`.
    start: usize,
    /// Address right past the last byte handed out by `source`.
    end: usize,
}

impl<S: MemorySource> Heap<S> {
    pub const fn new(source: S) -> Self {
        Self::with_config(source, HeapConfig::DEFAULT)
    }

    pub const fn with_config(source: S, config: HeapConfig) -> Self {
        Self {
            chain: FreeList::new(),
            source,
            config,
            start: 0,
            end: 0,
        }
    }

    #[inline]
    pub fn config(&self) -> HeapConfig {
        self.config
    }

    #[inline]
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Returns a word aligned pointer to at least `size` bytes. The contents are
    /// not initialized.
    ///
    /// `size` is rounded up to a multiple of [`WORD_SIZE`], zero sized requests
    /// are served with [`MIN_PAYLOAD`] bytes. On failure the heap is left exactly
    /// as it was.
    pub fn allocate(&mut self, size: usize) -> Result<NonNull<u8>, AllocError> {
        let aligned = checked_align(size, WORD_SIZE)
            .ok_or(AllocError::OutOfMemory { requested: size })?
            .max(MIN_PAYLOAD);

        let reused = if self.chain.is_empty() {
            None
        } else {
            unsafe { self.chain.take(aligned) }
        };

        let node = match reused {
            Some(node) => node,
            None => self.grow(aligned)?,
        };

        let payload = payload_of(node);
        trace!("allocate({size}) -> {:p}", payload);

        Ok(payload)
    }

    /// Requests `BLOCK_HEADER_SIZE + size` bytes from the source and appends them
    /// to the chain as a new allocated tail block.
    fn grow(&mut self, size: usize) -> Result<NonNull<Node<Block>>, AllocError> {
        let out_of_memory = AllocError::OutOfMemory { requested: size };
        let len = size.checked_add(BLOCK_HEADER_SIZE).ok_or(out_of_memory)?;

        let addr = self.source.extend(len).ok_or_else(|| {
            warn!("memory source refused to grow by {len} bytes");
            out_of_memory
        })?;

        let base = addr.as_ptr() as usize;

        if self.end == 0 {
            self.start = base;
        } else if base != self.end {
            // Blocks would no longer tile the region. The bytes are lost.
            warn!("memory source returned {base:#x}, expected {:#x}", self.end);
            return Err(out_of_memory);
        }

        self.end = base + len;
        debug!("heap grown by {len} bytes, high water at {:#x}", self.end);

        Ok(unsafe { self.chain.push(addr, size) })
    }

    /// Marks the block of `ptr` as free and merges it with its free neighbours
    /// according to [`HeapConfig::coalesce`]. A null `ptr` does nothing.
    ///
    /// With [`HeapConfig::validate`] set, pointers outside the heap, misaligned,
    /// without a live header or already free are rejected and nothing changes.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a pointer returned by [`Heap::allocate`] on this heap
    /// that has not been released yet. Validation catches most violations but
    /// cannot catch all of them, and it does nothing when disabled.
    pub unsafe fn release(&mut self, ptr: *mut u8) -> Result<(), AllocError> {
        let Some(ptr) = NonNull::new(ptr) else {
            return Ok(());
        };

        let mut node = if self.config.validate {
            self.validate(ptr)?
        } else {
            unsafe { header_of(ptr) }
        };

        unsafe {
            node.as_mut().data.is_free = true;
            let merged = self.chain.coalesce(node, self.config.coalesce);

            trace!("release({:p}), free block {:p} of {} bytes", ptr, merged, merged.as_ref().data.size);
        }

        Ok(())
    }

    /// Checks that `ptr` is the payload of a live allocated block of this heap.
    fn validate(&self, ptr: NonNull<u8>) -> Result<NonNull<Node<Block>>, AllocError> {
        let addr = ptr.as_ptr() as usize;
        let invalid = AllocError::InvalidRelease { addr };

        let in_range = addr >= self.start + BLOCK_HEADER_SIZE && addr < self.end;

        if self.chain.is_empty() || !in_range || addr % WORD_SIZE != 0 {
            warn!("rejected release of {addr:#x}: outside of the heap");
            return Err(invalid);
        }

        let node = unsafe { header_of(ptr) };
        let block = unsafe { &node.as_ref().data };

        if block.magic != BLOCK_MAGIC {
            warn!("rejected release of {addr:#x}: no block header");
            return Err(invalid);
        }

        if block.is_free {
            warn!("rejected release of {addr:#x}: already free");
            return Err(AllocError::DoubleFree { addr });
        }

        Ok(node)
    }

    /// Number of blocks in the chain, free or not.
    #[inline]
    pub fn len(&self) -> usize {
        self.chain.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.chain.is_empty()
    }

    /// Every block of the chain in address order.
    pub fn blocks(&self) -> impl Iterator<Item = BlockInfo> + '_ {
        self.chain.blocks.nodes().map(BlockInfo::of)
    }

    /// Lowest address block.
    pub fn head(&self) -> Option<BlockInfo> {
        self.chain.blocks.first().map(BlockInfo::of)
    }

    /// Highest address block.
    pub fn tail(&self) -> Option<BlockInfo> {
        self.chain.blocks.last().map(BlockInfo::of)
    }

    /// Finds the block whose payload starts at `ptr` by walking the chain.
    pub fn block_of(&self, ptr: *const u8) -> Option<BlockInfo> {
        self.blocks().find(|block| block.payload() == ptr as usize)
    }

    /// Bytes usable through `ptr`. May be more than what was asked for when the
    /// block could not be split.
    pub fn usable_size(&self, ptr: *const u8) -> Option<usize> {
        self.block_of(ptr).map(|block| block.size)
    }

    pub fn stats(&self) -> HeapStats {
        let mut stats = HeapStats {
            high_water: self.end - self.start,
            ..HeapStats::default()
        };

        for block in self.blocks() {
            stats.blocks += 1;

            if block.is_free {
                stats.free_blocks += 1;
                stats.free_bytes += block.size;
            } else {
                stats.used_bytes += block.size;
            }
        }

        stats
    }

    /// Walks the chain checking that links agree both ways, blocks cover the
    /// region with no gaps or overlaps, and under [`Coalesce::BothSides`] no two
    /// neighbours are free.
    pub fn check(&self) -> Result<(), AllocError> {
        let mut expected = self.start;
        let mut prev: Option<NonNull<Node<Block>>> = None;
        let mut count = 0;

        for node in self.chain.blocks.nodes() {
            let (block, links) = unsafe { (&node.as_ref().data, node.as_ref()) };

            if node.as_ptr() as usize != expected {
                return Err(AllocError::Corrupted("blocks do not tile the region"));
            }

            if links.prev != prev {
                return Err(AllocError::Corrupted("prev link does not match"));
            }

            if block.magic != BLOCK_MAGIC {
                return Err(AllocError::Corrupted("block without magic"));
            }

            if block.size % WORD_SIZE != 0 {
                return Err(AllocError::Corrupted("block size is not word aligned"));
            }

            if let Some(prev) = prev {
                let prev_free = unsafe { prev.as_ref().data.is_free };

                if self.config.coalesce == Coalesce::BothSides && prev_free && block.is_free {
                    return Err(AllocError::Corrupted("two adjacent free blocks"));
                }
            }

            expected = end_of(node);
            prev = Some(node);
            count += 1;
        }

        if prev != self.chain.blocks.last() {
            return Err(AllocError::Corrupted("tail is not the last block"));
        }

        if count != self.chain.len() {
            return Err(AllocError::Corrupted("chain length does not match"));
        }

        if expected != self.end {
            return Err(AllocError::Corrupted("tail does not end at the high water mark"));
        }

        Ok(())
    }
}

// The chain points into memory owned by the source.
unsafe impl<S: MemorySource + Send> Send for Heap<S> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{region::FixedRegion, utils::align};

    const H: usize = BLOCK_HEADER_SIZE;

    fn a(size: usize) -> usize {
        align(size, WORD_SIZE)
    }

    fn heap(capacity: usize) -> Heap<FixedRegion> {
        Heap::new(FixedRegion::new(capacity))
    }

    fn info(heap: &Heap<FixedRegion>, ptr: NonNull<u8>) -> BlockInfo {
        heap.block_of(ptr.as_ptr()).unwrap()
    }

    #[test]
    fn first_allocation_seeds_head_and_tail() {
        let mut heap = heap(4096);
        assert!(heap.is_empty());

        let ptr = heap.allocate(10).unwrap();
        let block = info(&heap, ptr);

        assert_eq!(heap.len(), 1);
        assert_eq!(heap.head(), Some(block));
        assert_eq!(heap.tail(), Some(block));
        assert_eq!(block.size, a(10));
        assert!(!block.is_free);
        assert_eq!(ptr.as_ptr() as usize, heap.source().start().as_ptr() as usize + H);
        heap.check().unwrap();
    }

    #[test]
    fn sizes_and_addresses_are_word_aligned() {
        let mut heap = heap(64 * 1024);

        for size in 1..=100 {
            let ptr = heap.allocate(size).unwrap();

            assert_eq!(0, ptr.as_ptr() as usize % WORD_SIZE);
            assert_eq!(heap.usable_size(ptr.as_ptr()), Some(a(size)));
        }

        heap.check().unwrap();
    }

    #[test]
    fn zero_sized_requests_get_a_word() {
        let mut heap = heap(1024);

        let first = heap.allocate(0).unwrap();
        let second = heap.allocate(0).unwrap();

        assert_ne!(first, second);
        assert_eq!(heap.usable_size(first.as_ptr()), Some(MIN_PAYLOAD));
    }

    #[test]
    fn blocks_do_not_disturb_each_other() {
        let mut heap = heap(4096);

        let first = heap.allocate(24).unwrap();
        let second = heap.allocate(40).unwrap();

        unsafe {
            first.as_ptr().write_bytes(0x11, 24);
            second.as_ptr().write_bytes(0x22, 40);

            let third = heap.allocate(16).unwrap();
            third.as_ptr().write_bytes(0x33, 16);
            heap.release(second.as_ptr()).unwrap();
            let fourth = heap.allocate(8).unwrap();
            fourth.as_ptr().write_bytes(0x44, 8);

            assert!((0..24).all(|i| *first.as_ptr().add(i) == 0x11));
            assert!((0..16).all(|i| *third.as_ptr().add(i) == 0x33));
        }

        heap.check().unwrap();
    }

    #[test]
    fn three_blocks_merge_back_into_one() {
        let mut heap = heap(4096);

        let a1 = heap.allocate(10).unwrap();
        let a2 = heap.allocate(20).unwrap();
        let a3 = heap.allocate(30).unwrap();

        assert_eq!(info(&heap, a1).size, a(10));
        assert_eq!(info(&heap, a2).size, a(20));
        assert_eq!(info(&heap, a3).size, a(30));
        assert_eq!(heap.len(), 3);

        unsafe { heap.release(a1.as_ptr()).unwrap() };
        assert!(info(&heap, a1).is_free);

        unsafe { heap.release(a2.as_ptr()).unwrap() };
        assert_eq!(heap.len(), 2);
        assert_eq!(info(&heap, a1).size, a(10) + a(20) + H);
        assert!(info(&heap, a1).is_free);

        unsafe { heap.release(a3.as_ptr()).unwrap() };
        let block = info(&heap, a1);

        assert_eq!(heap.len(), 1);
        assert_eq!(block.size, a(10) + a(20) + a(30) + 2 * H);
        assert!(block.is_free);
        assert_eq!(heap.head(), Some(block));
        assert_eq!(heap.tail(), Some(block));
        heap.check().unwrap();
    }

    #[test]
    fn small_request_reuses_merged_block_by_splitting() {
        let mut heap = heap(4096);

        let ptrs = [10, 20, 30].map(|size| heap.allocate(size).unwrap());
        for ptr in ptrs {
            unsafe { heap.release(ptr.as_ptr()).unwrap() };
        }
        let region_used = heap.source().used();

        let ptr = heap.allocate(10).unwrap();
        let head = heap.head().unwrap();
        let tail = heap.tail().unwrap();

        assert_eq!(ptr, ptrs[0]);
        assert_eq!(heap.len(), 2);
        assert_eq!(head.size, a(10));
        assert!(!head.is_free);
        assert!(tail.is_free);
        assert_eq!(tail.addr, head.end());
        assert_eq!(tail.size, a(20) + a(30) + H);
        assert_eq!(heap.source().used(), region_used);
        heap.check().unwrap();
    }

    #[test]
    fn split_leaves_exact_remainder() {
        let mut heap = heap(4096);

        let big = 32 * WORD_SIZE;
        let ptr = heap.allocate(big).unwrap();
        unsafe { heap.release(ptr.as_ptr()).unwrap() };

        let s1 = heap.allocate(5 * WORD_SIZE).unwrap();
        let s2 = heap.allocate(3 * WORD_SIZE).unwrap();

        let first = info(&heap, s1);
        let second = info(&heap, s2);

        assert_eq!(first.size, 5 * WORD_SIZE);
        assert_eq!(second.size, 3 * WORD_SIZE);
        assert_eq!(second.addr, first.end());
        assert!(first.addr < second.addr);

        let rest = heap.tail().unwrap();
        assert_eq!(rest.size, big - 5 * WORD_SIZE - 3 * WORD_SIZE - 2 * H);
        assert!(rest.is_free);
        heap.check().unwrap();
    }

    #[test]
    fn split_of_the_tail_moves_the_tail() {
        let mut heap = heap(4096);

        let ptr = heap.allocate(16 * WORD_SIZE).unwrap();
        unsafe { heap.release(ptr.as_ptr()).unwrap() };
        heap.allocate(WORD_SIZE).unwrap();

        let head = heap.head().unwrap();
        let tail = heap.tail().unwrap();

        assert_ne!(head, tail);
        assert_eq!(tail.size, 16 * WORD_SIZE - WORD_SIZE - H);
        assert_eq!(tail.end(), heap.stats().high_water + heap.source().start().as_ptr() as usize);
    }

    #[test]
    fn fit_too_small_to_split_is_handed_out_whole() {
        let mut heap = heap(4096);

        let first = heap.allocate(2 * WORD_SIZE).unwrap();
        let _guard = heap.allocate(WORD_SIZE).unwrap();
        unsafe { heap.release(first.as_ptr()).unwrap() };

        let again = heap.allocate(WORD_SIZE).unwrap();

        assert_eq!(again, first);
        assert_eq!(heap.usable_size(again.as_ptr()), Some(2 * WORD_SIZE));
        assert_eq!(heap.len(), 2);
    }

    #[test]
    fn first_fit_prefers_lower_addresses() {
        let mut heap = heap(4096);

        let low = heap.allocate(8 * WORD_SIZE).unwrap();
        let _a = heap.allocate(WORD_SIZE).unwrap();
        let high = heap.allocate(8 * WORD_SIZE).unwrap();
        let _b = heap.allocate(WORD_SIZE).unwrap();

        unsafe {
            heap.release(high.as_ptr()).unwrap();
            heap.release(low.as_ptr()).unwrap();
        }

        assert_eq!(heap.allocate(4 * WORD_SIZE).unwrap(), low);
    }

    #[test]
    fn growth_is_monotonic() {
        let mut heap = heap(4096);
        let mut previous_end = 0;

        for size in [8, 64, 24, 128] {
            let ptr = heap.allocate(size).unwrap();
            let block = info(&heap, ptr);

            assert!(block.addr >= previous_end);
            assert_eq!(heap.tail(), Some(block));
            previous_end = block.end();
        }

        assert_eq!(heap.source().used(), heap.stats().high_water);
    }

    #[test]
    fn out_of_memory_leaves_the_chain_untouched() {
        let mut heap = heap(H + 8 * WORD_SIZE);

        heap.allocate(4 * WORD_SIZE).unwrap();
        let before: Vec<_> = heap.blocks().collect();

        let err = heap.allocate(8 * WORD_SIZE).unwrap_err();

        assert_eq!(err, AllocError::OutOfMemory { requested: 8 * WORD_SIZE });
        assert_eq!(heap.blocks().collect::<Vec<_>>(), before);
        heap.check().unwrap();
    }

    #[test]
    fn empty_heap_out_of_memory_stays_empty() {
        let mut heap = heap(WORD_SIZE);

        assert!(heap.allocate(1).is_err());
        assert!(heap.is_empty());
        heap.check().unwrap();
    }

    #[test]
    fn huge_requests_do_not_overflow() {
        let mut heap = heap(1024);

        assert!(heap.allocate(usize::MAX).is_err());
        assert!(heap.allocate(usize::MAX - WORD_SIZE).is_err());
        assert!(heap.is_empty());
    }

    #[test]
    fn freed_memory_is_reused_after_out_of_memory() {
        let mut heap = heap(2 * (H + 8 * WORD_SIZE));

        let first = heap.allocate(8 * WORD_SIZE).unwrap();
        heap.allocate(8 * WORD_SIZE).unwrap();
        assert!(heap.allocate(8 * WORD_SIZE).is_err());

        unsafe { heap.release(first.as_ptr()).unwrap() };

        assert_eq!(heap.allocate(8 * WORD_SIZE).unwrap(), first);
    }

    #[test]
    fn null_release_is_a_no_op() {
        let mut heap = heap(1024);

        unsafe { heap.release(std::ptr::null_mut()).unwrap() };
        assert!(heap.is_empty());

        heap.allocate(8).unwrap();
        let before: Vec<_> = heap.blocks().collect();

        unsafe { heap.release(std::ptr::null_mut()).unwrap() };
        assert_eq!(heap.blocks().collect::<Vec<_>>(), before);
    }

    #[test]
    fn release_between_free_neighbours_merges_both_sides() {
        let mut heap = heap(4096);

        let ptrs = [8, 8, 8, 8].map(|size| heap.allocate(size).unwrap());

        unsafe {
            heap.release(ptrs[0].as_ptr()).unwrap();
            heap.release(ptrs[2].as_ptr()).unwrap();
            assert_eq!(heap.len(), 4);

            heap.release(ptrs[1].as_ptr()).unwrap();
        }

        let head = heap.head().unwrap();
        assert_eq!(heap.len(), 2);
        assert_eq!(head.size, 3 * a(8) + 2 * H);
        assert!(head.is_free);
        heap.check().unwrap();
    }

    #[test]
    fn one_side_coalescing_leaves_left_neighbour_apart() {
        let config = HeapConfig::DEFAULT.with_coalesce(Coalesce::OneSide);
        let mut heap = Heap::with_config(FixedRegion::new(4096), config);

        let ptrs = [8, 8, 8, 8].map(|size| heap.allocate(size).unwrap());

        unsafe {
            heap.release(ptrs[0].as_ptr()).unwrap();
            heap.release(ptrs[2].as_ptr()).unwrap();
            heap.release(ptrs[1].as_ptr()).unwrap();
        }

        let blocks: Vec<_> = heap.blocks().map(|block| (block.size, block.is_free)).collect();

        assert_eq!(heap.len(), 3);
        assert_eq!(blocks, vec![(a(8), true), (2 * a(8) + H, true), (a(8), false)]);
        heap.check().unwrap();
    }

    #[test]
    fn one_side_coalescing_matches_three_block_walkthrough() {
        let config = HeapConfig::DEFAULT.with_coalesce(Coalesce::OneSide);
        let mut heap = Heap::with_config(FixedRegion::new(4096), config);

        let a1 = heap.allocate(10).unwrap();
        let a2 = heap.allocate(20).unwrap();
        let a3 = heap.allocate(30).unwrap();

        unsafe {
            heap.release(a1.as_ptr()).unwrap();
            heap.release(a2.as_ptr()).unwrap();
            assert_eq!(heap.len(), 2);
            heap.release(a3.as_ptr()).unwrap();
        }

        assert_eq!(heap.len(), 1);
        assert_eq!(heap.head().unwrap().size, a(10) + a(20) + a(30) + 2 * H);
    }

    #[test]
    fn double_free_is_rejected() {
        let mut heap = heap(1024);

        let ptr = heap.allocate(16).unwrap();
        heap.allocate(16).unwrap();

        unsafe {
            heap.release(ptr.as_ptr()).unwrap();
            let err = heap.release(ptr.as_ptr()).unwrap_err();

            assert_eq!(err, AllocError::DoubleFree { addr: ptr.as_ptr() as usize });
        }

        assert_eq!(heap.len(), 2);
        heap.check().unwrap();
    }

    #[test]
    fn release_of_a_merged_away_block_is_rejected() {
        let mut heap = heap(1024);

        let first = heap.allocate(16).unwrap();
        let second = heap.allocate(16).unwrap();
        heap.allocate(16).unwrap();

        unsafe {
            heap.release(first.as_ptr()).unwrap();
            heap.release(second.as_ptr()).unwrap();

            let err = heap.release(second.as_ptr()).unwrap_err();
            assert_eq!(err, AllocError::InvalidRelease { addr: second.as_ptr() as usize });
        }

        heap.check().unwrap();
    }

    #[test]
    fn foreign_pointers_are_rejected() {
        let mut heap = heap(1024);
        let ptr = heap.allocate(32).unwrap();
        let mut local = 0usize;

        unsafe {
            let outside = (&mut local as *mut usize).cast::<u8>();
            assert!(heap.release(outside).is_err());

            // Inside the heap but not word aligned.
            assert!(heap.release(ptr.as_ptr().add(1)).is_err());

            // Aligned, inside the payload, but no header in front of it.
            assert!(heap.release(ptr.as_ptr().add(2 * WORD_SIZE)).is_err());
        }

        assert!(!info(&heap, ptr).is_free);
        heap.check().unwrap();
    }

    #[test]
    fn release_on_empty_heap_is_rejected() {
        let mut heap = heap(1024);
        let mut local = 0usize;

        let err = unsafe { heap.release((&mut local as *mut usize).cast()) }.unwrap_err();

        assert!(matches!(err, AllocError::InvalidRelease { .. }));
    }

    #[test]
    fn stats_add_up() {
        let mut heap = heap(4096);

        let first = heap.allocate(16).unwrap();
        heap.allocate(32).unwrap();
        heap.allocate(64).unwrap();
        unsafe { heap.release(first.as_ptr()).unwrap() };

        let stats = heap.stats();

        assert_eq!(stats.blocks, 3);
        assert_eq!(stats.free_blocks, 1);
        assert_eq!(stats.free_bytes, a(16));
        assert_eq!(stats.used_bytes, a(32) + a(64));
        assert_eq!(stats.high_water, stats.free_bytes + stats.used_bytes + 3 * H);
    }

    #[test]
    fn check_catches_adjacent_free_blocks() {
        let mut heap = heap(1024);

        let first = heap.allocate(16).unwrap();
        let second = heap.allocate(16).unwrap();

        // Flip the flags behind the heap's back.
        unsafe {
            header_of(first).as_mut().data.is_free = true;
            header_of(second).as_mut().data.is_free = true;
        }

        assert_eq!(heap.check(), Err(AllocError::Corrupted("two adjacent free blocks")));
    }

    #[test]
    fn interleaved_workload_keeps_the_chain_consistent() {
        let mut heap = heap(256 * 1024);
        let mut live: Vec<(NonNull<u8>, usize, u8)> = Vec::new();

        // Deterministic pseudo random sequence.
        let mut seed = 0x2545_F491_u32;
        let mut next = move || {
            seed ^= seed << 13;
            seed ^= seed >> 17;
            seed ^= seed << 5;
            seed
        };

        for round in 0..500u32 {
            if live.is_empty() || next() % 3 != 0 {
                let size = (next() % 200) as usize + 1;
                let ptr = heap.allocate(size).unwrap();
                let tag = (round % 251) as u8;

                unsafe { ptr.as_ptr().write_bytes(tag, size) };
                live.push((ptr, size, tag));
            } else {
                let index = next() as usize % live.len();
                let (ptr, size, tag) = live.swap_remove(index);

                unsafe {
                    assert!((0..size).all(|i| *ptr.as_ptr().add(i) == tag));
                    heap.release(ptr.as_ptr()).unwrap();
                }
            }

            heap.check().unwrap();
        }

        for (ptr, size, tag) in live {
            unsafe {
                assert!((0..size).all(|i| *ptr.as_ptr().add(i) == tag));
                heap.release(ptr.as_ptr()).unwrap();
            }
        }

        assert_eq!(heap.len(), 1);
        assert!(heap.head().unwrap().is_free);
    }
}
