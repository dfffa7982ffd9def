use thiserror::Error;

/// Errors reported by [`crate::Heap`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AllocError {
    /// The memory source refused to extend the region.
    #[error("out of memory: could not grow the heap by {requested} bytes")]
    OutOfMemory { requested: usize },
    /// The pointer was not handed out by this heap, or its header has been merged away.
    #[error("invalid release of {addr:#x}: not a block of this heap")]
    InvalidRelease { addr: usize },
    /// The block is already free.
    #[error("double free of {addr:#x}")]
    DoubleFree { addr: usize },
    /// [`crate::Heap::check`] found a broken chain.
    #[error("heap corrupted: {0}")]
    Corrupted(&'static str),
}
