//! Walks a fresh heap through allocate and release, checking the chain after
//! every step.

use brkalloc::{FixedRegion, HEADER_SIZE, Heap, WORD_SIZE, align};

fn aligned(size: usize) -> usize {
    align(size, WORD_SIZE)
}

fn main() {
    env_logger::init();

    let mut heap = Heap::new(FixedRegion::new(4096));

    let a1 = heap.allocate(10).unwrap();
    let a2 = heap.allocate(20).unwrap();
    let a3 = heap.allocate(30).unwrap();

    assert_eq!(heap.usable_size(a1.as_ptr()), Some(aligned(10)));
    assert_eq!(heap.usable_size(a2.as_ptr()), Some(aligned(20)));
    assert_eq!(heap.usable_size(a3.as_ptr()), Some(aligned(30)));
    assert_eq!(heap.len(), 3);

    unsafe {
        heap.release(a1.as_ptr()).unwrap();
        heap.release(a2.as_ptr()).unwrap();
    }

    let head = heap.head().unwrap();
    assert!(head.is_free);
    assert_eq!(head.size, aligned(10) + aligned(20) + HEADER_SIZE);
    assert_eq!(heap.len(), 2);

    unsafe { heap.release(a3.as_ptr()).unwrap() };

    let head = heap.head().unwrap();
    assert_eq!(head.size, aligned(10) + aligned(20) + aligned(30) + 2 * HEADER_SIZE);
    assert_eq!(heap.len(), 1);
    assert_eq!(heap.tail(), Some(head));

    let a1 = heap.allocate(10).unwrap();
    let head = heap.head().unwrap();
    let tail = heap.tail().unwrap();

    assert_eq!(head.payload(), a1.as_ptr() as usize);
    assert_eq!(head.size, aligned(10));
    assert!(!head.is_free);
    assert!(tail.is_free);
    assert_eq!(heap.len(), 2);

    heap.check().unwrap();

    for block in heap.blocks() {
        println!("{:#x}: {:>4} bytes, free: {}", block.addr, block.size, block.is_free);
    }

    println!("All asserts passed");
}
