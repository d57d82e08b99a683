use hdrl_core::config::PoolConfig;
use hdrl_core::error::HdrlError;
use hdrl_core::pool::{PoolAllocator, PoolBacking};

fn heap_allocator(pool_size: usize) -> PoolAllocator {
    let mut alloc = PoolAllocator::with_pool_size(pool_size);
    alloc.set_malloc_threshold(usize::MAX);
    alloc
}

// ---------------------------------------------------------------------------
// Pool growth
// ---------------------------------------------------------------------------

#[test]
fn test_small_requests_share_one_pool() {
    let mut alloc = heap_allocator(4096);
    for _ in 0..100 {
        alloc.allocate(24).unwrap();
    }
    assert_eq!(alloc.pool_count(), 1);
    assert_eq!(alloc.total_allocated(), 2400);
}

#[test]
fn test_large_request_gets_dedicated_pool() {
    let mut alloc = heap_allocator(4096);
    alloc.allocate(64).unwrap();
    let big = alloc.allocate(10_000).unwrap();
    assert_eq!(alloc.pool_count(), 2);
    assert_eq!(big.len(), 10_000);
    assert_eq!(alloc.block(&big).unwrap().len(), 10_000);
}

#[test]
fn test_miss_clears_freelist() {
    let mut alloc = heap_allocator(4096);
    alloc.allocate(3000).unwrap();
    assert_eq!(alloc.freelist_len(), 0);
    alloc.allocate(100).unwrap();
    assert_eq!(alloc.pool_count(), 2);
    assert_eq!(alloc.freelist_len(), 1);
    // Does not fit the second pool's remainder: a third pool replaces the freelist.
    alloc.allocate(4050).unwrap();
    assert_eq!(alloc.pool_count(), 3);
    assert_eq!(alloc.freelist_len(), 0);
}

#[test]
fn test_zero_size_rejected() {
    let mut alloc = heap_allocator(4096);
    assert!(matches!(alloc.allocate(0), Err(HdrlError::IllegalInput(_))));
}

#[test]
fn test_threshold_returns_previous() {
    let mut alloc = PoolAllocator::from_config(&PoolConfig {
        pool_size: 2048,
        malloc_threshold: 100,
    });
    assert_eq!(alloc.pool_size(), 2048);
    assert_eq!(alloc.set_malloc_threshold(500), 100);
    assert_eq!(alloc.malloc_threshold(), 500);
}

// ---------------------------------------------------------------------------
// Backing
// ---------------------------------------------------------------------------

#[test]
fn test_below_threshold_is_heap() {
    let mut alloc = PoolAllocator::with_pool_size(1024);
    alloc.set_malloc_threshold(1 << 20);
    let block = alloc.allocate(16).unwrap();
    assert_eq!(alloc.pool_backing(0), Some(PoolBacking::Heap));
    alloc.block_mut(&block).unwrap().fill(7);
    assert!(alloc.block(&block).unwrap().iter().all(|&b| b == 7));
}

#[test]
fn test_plane_round_trip() {
    let mut alloc = PoolAllocator::with_pool_size(8192);
    alloc.set_malloc_threshold(0);
    let block = alloc.allocate_plane(4, 8).unwrap();
    {
        let mut plane = alloc.plane_mut(&block, 4, 8).unwrap();
        plane[[3, 7]] = 42.5;
        plane[[0, 0]] = -1.0;
    }
    let plane = alloc.plane(&block, 4, 8).unwrap();
    assert_eq!(plane[[3, 7]], 42.5);
    assert_eq!(plane[[0, 0]], -1.0);
}

#[test]
fn test_readonly_blocks_writes() {
    let mut alloc = PoolAllocator::with_pool_size(8192);
    let block = alloc.allocate(64).unwrap();
    alloc.block_as_mut::<u64>(&block).unwrap()[0] = 99;

    alloc.set_readonly(true).unwrap();
    assert!(alloc.is_readonly());
    assert!(alloc.block_mut(&block).is_err());
    assert_eq!(alloc.block_as::<u64>(&block).unwrap()[0], 99);

    alloc.set_readonly(false).unwrap();
    alloc.block_as_mut::<u64>(&block).unwrap()[0] = 100;
    assert_eq!(alloc.block_as::<u64>(&block).unwrap()[0], 100);
}

#[test]
fn test_free_keeps_other_blocks() {
    let mut alloc = heap_allocator(4096);
    let a = alloc.allocate(8).unwrap();
    let b = alloc.allocate(8).unwrap();
    alloc.block_as_mut::<u64>(&b).unwrap()[0] = 5;
    alloc.free(a);
    assert_eq!(alloc.block_as::<u64>(&b).unwrap()[0], 5);
    assert_eq!(alloc.total_allocated(), 16);
}
