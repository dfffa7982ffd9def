//! Allocates a few layouts through a local [`BrkAlloc`] and prints where they
//! landed. Run with `RUST_LOG=trace` to see what the heap does.

use std::alloc::Layout;

use brkalloc::BrkAlloc;

fn log_alloc(addr: *mut u8, layout: Layout) {
    println!("Requested {} bytes of memory", layout.size());
    println!("Received this address: {addr:?}");
}

fn main() {
    env_logger::init();

    let allocator = BrkAlloc::new();

    unsafe {
        let l1 = Layout::new::<u64>();
        let addr1 = allocator.allocate(l1);
        log_alloc(addr1, l1);

        let l2 = Layout::array::<u8>(8).unwrap();
        let addr2 = allocator.allocate(l2);
        log_alloc(addr2, l2);

        let l3 = Layout::array::<u8>(16).unwrap();
        let addr3 = allocator.allocate(l3);
        log_alloc(addr3, l3);

        println!("{:?}", allocator.stats());

        allocator.deallocate(addr1, l1);
        allocator.deallocate(addr2, l2);
        allocator.deallocate(addr3, l3);
    }

    // Everything went back into a single free block.
    println!("{:?}", allocator.stats());
}
