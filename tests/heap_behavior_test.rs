use std::ptr::NonNull;

use fencealloc::{
  DEFAULT_GAP_THRESHOLD, DebugHeap, HeapConfig, HeapError, OVERHEAD, Origin, PAGE_SIZE, PointerKind,
  Reason, ViolationKind,
};

const MIB: usize = 1024 * 1024;
const IDLE_FREE: usize = 2 * PAGE_SIZE - OVERHEAD;

fn small_heap() -> DebugHeap {
  let config = HeapConfig::new().with_break_capacity(64 * PAGE_SIZE);
  DebugHeap::with_config(config).unwrap()
}

#[track_caller]
fn here() -> Origin {
  Origin::caller()
}

fn rejected(result: Result<NonNull<u8>, HeapError>) -> bool {
  matches!(result, Err(HeapError::InvalidArgument(_)))
}

#[test]
fn reset_yields_two_pages_minus_overhead() {
  let heap = small_heap();
  heap.allocate(5000, here()).unwrap();
  heap.allocate(100, here()).unwrap();

  heap.reset().unwrap();

  assert_eq!(heap.free_space(), IDLE_FREE);
  assert_eq!(heap.used_space(), OVERHEAD);
  assert_eq!(heap.used_block_count(), 0);
  assert_eq!(heap.validate(), Ok(()));
}

#[test]
fn block_size_matches_request() {
  let heap = small_heap();
  for size in [1, 7, 8, 100, 4095, 4096, 10_000] {
    let pointer = heap.allocate(size, here()).unwrap();
    assert_eq!(heap.block_size_of(pointer.as_ptr()), size);
  }
  assert_eq!(heap.validate(), Ok(()));
}

#[test]
fn bad_sizes_change_nothing() {
  let heap = small_heap();
  heap.allocate(64, here()).unwrap();
  let before = heap.dump().unwrap();

  assert!(rejected(heap.allocate(0, here())));
  assert!(rejected(heap.allocate(usize::MAX, here())));
  assert!(rejected(heap.allocate_aligned(0, here())));
  assert!(rejected(heap.allocate_zeroed(usize::MAX / 2, 3, here())));
  assert!(rejected(heap.allocate_zeroed_aligned(1, 0, here())));

  assert_eq!(heap.dump().unwrap(), before);
}

#[test]
fn freed_pointer_classification() {
  let heap = small_heap();
  let a = heap.allocate(40, here()).unwrap();
  let b = heap.allocate(40, here()).unwrap();

  heap.deallocate(a.as_ptr()).unwrap();

  assert_eq!(heap.classify(a.as_ptr()), PointerKind::FreePayloadStart);
  let interior = unsafe { a.as_ptr().add(1) };
  assert_eq!(heap.classify(interior), PointerKind::InteriorPayload);
  assert_eq!(heap.classify(b.as_ptr()), PointerKind::TakenPayloadStart);
}

#[test]
fn reallocate_pattern_survives() {
  let heap = small_heap();
  let pointer = heap.allocate(64, here()).unwrap();
  for i in 0..64 {
    unsafe { pointer.as_ptr().add(i).write(i as u8 ^ 0x5A) };
  }

  let grown = heap.reallocate(pointer.as_ptr(), 3000, here()).unwrap();
  let shrunk = heap.reallocate(grown.as_ptr(), 32, here()).unwrap();

  for i in 0..32 {
    let byte = unsafe { shrunk.as_ptr().add(i).read() };
    assert_eq!(byte, i as u8 ^ 0x5A);
  }
  assert_eq!(heap.used_block_count(), 1);
  assert_eq!(heap.block_size_of(shrunk.as_ptr()), 32);
}

#[test]
fn freeing_everything_restores_idle_state() {
  let heap = small_heap();
  let free_before = heap.free_space();
  let count_before = heap.used_block_count();

  let pointers: Vec<_> = [10, 200, 3000, 40_000, 5]
    .into_iter()
    .map(|size| heap.allocate(size, here()).unwrap())
    .collect();
  assert_eq!(heap.used_block_count(), 5);

  for pointer in pointers.iter().rev() {
    heap.deallocate(pointer.as_ptr()).unwrap();
  }

  assert_eq!(heap.free_space(), free_before);
  assert_eq!(heap.used_block_count(), count_before);
}

#[test]
fn single_byte_corruption_is_detected_and_recoverable() {
  let heap = small_heap();
  let a = heap.allocate(24, here()).unwrap();
  let b = heap.allocate(24, here()).unwrap();
  heap.allocate(24, here()).unwrap();

  let b_header = heap.block_start_of(b.as_ptr()).unwrap().as_ptr();

  // (address, expected kind, expected reason)
  let cases = [
    (unsafe { a.as_ptr().sub(1) }, ViolationKind::FirstChunk, Reason::LeftFence),
    (unsafe { a.as_ptr().add(24) }, ViolationKind::FirstChunk, Reason::RightFence),
    (unsafe { b.as_ptr().add(31) }, ViolationKind::Chunk, Reason::RightFence),
    (unsafe { b_header.add(28) }, ViolationKind::Chunk, Reason::Checksum),
    (unsafe { b_header.add(16) }, ViolationKind::Chunk, Reason::NextMismatch),
    (unsafe { b_header.add(8) }, ViolationKind::Chunk, Reason::PrevMismatch),
  ];

  for (address, kind, reason) in cases {
    let original = unsafe { address.read() };
    unsafe { address.write(!original) };

    let violation = heap.validate().unwrap_err();
    assert_eq!(violation.kind, kind, "at {address:p}");
    assert_eq!(violation.reason, reason, "at {address:p}");
    let refused = heap.allocate(1, here());
    assert!(matches!(refused, Err(HeapError::Corrupted(_))));

    unsafe { address.write(original) };
    assert_eq!(heap.validate(), Ok(()));
  }
}

#[test]
fn aligned_results_are_page_aligned() {
  let heap = small_heap();
  let big = heap.allocate(10 * PAGE_SIZE, here()).unwrap();
  heap.allocate(8, here()).unwrap();
  heap.deallocate(big.as_ptr()).unwrap();

  for size in [1, 100, 1000, 2000] {
    let pointer = heap.allocate_aligned(size, here()).unwrap();
    assert_eq!(pointer.as_ptr() as usize % PAGE_SIZE, 0);
    assert_eq!(heap.block_size_of(pointer.as_ptr()), size);
  }
  assert_eq!(heap.validate(), Ok(()));
}

#[test]
fn megabyte_blocks_exhaust_the_default_break() {
  let heap = DebugHeap::new().unwrap();
  let free_before = heap.free_space();
  let used_before = heap.used_space();

  let blocks: Vec<_> = (0..3)
    .map(|_| heap.allocate(8 * MIB, here()).unwrap())
    .collect();
  assert!(matches!(
    heap.allocate(45 * MIB, here()),
    Err(HeapError::OutOfMemory { .. })
  ));
  assert_eq!(heap.used_block_count(), 3);

  for block in blocks {
    heap.deallocate(block.as_ptr()).unwrap();
  }

  assert_eq!(heap.free_space(), free_before);
  assert_eq!(heap.used_space(), used_before);
  assert_eq!(heap.validate(), Ok(()));
}

#[test]
fn largest_blocks() {
  let heap = small_heap();
  let a = heap.allocate(10, here()).unwrap();
  heap.allocate(30, here()).unwrap();
  let c = heap.allocate(5000, here()).unwrap();
  heap.allocate(20, here()).unwrap();
  heap.deallocate(c.as_ptr()).unwrap();
  heap.deallocate(a.as_ptr()).unwrap();

  assert_eq!(heap.largest_used_block(), 30);
  assert_eq!(heap.largest_free_area(), 5000);
}

#[test]
fn free_gaps_between_live_blocks() {
  let heap = small_heap();
  heap.allocate(10, here()).unwrap();
  let b = heap.allocate(120, here()).unwrap();
  heap.allocate(14, here()).unwrap();
  let d = heap.allocate(104, here()).unwrap();
  heap.allocate(18, here()).unwrap();

  heap.deallocate(b.as_ptr()).unwrap();
  heap.deallocate(d.as_ptr()).unwrap();

  // Both holes plus the free tail.
  assert_eq!(heap.free_gap_count(DEFAULT_GAP_THRESHOLD), 3);
  assert_eq!(heap.free_gap_count(110), 2);
}

#[test]
fn block_start_of_payload() {
  let heap = small_heap();
  let pointer = heap.allocate(10, here()).unwrap();
  let header = unsafe { pointer.as_ptr().sub(OVERHEAD - fencealloc::FENCE_SIZE) };
  let start = |address: *const u8| heap.block_start_of(address).map(|p| p.as_ptr());

  assert_eq!(start(pointer.as_ptr()), Some(header));
  assert_eq!(start(unsafe { pointer.as_ptr().add(9) }), Some(header));
  assert_eq!(heap.block_start_of(std::ptr::null()), None);
}

#[test]
fn aligned_reallocate_follows_null_and_zero_rules() {
  let heap = small_heap();

  let null = std::ptr::null_mut();
  assert!(heap.reallocate_aligned(null, usize::MAX, here()).is_err());

  let pointer = heap.reallocate_aligned(null, 4, here()).unwrap();
  let kind = heap.classify(pointer.as_ptr());
  assert_eq!(kind, PointerKind::TakenPayloadStart);
  assert_eq!(pointer.as_ptr() as usize % PAGE_SIZE, 0);
  assert_eq!(heap.block_size_of(pointer.as_ptr()), 4);

  let freed = heap
    .reallocate_aligned(pointer.as_ptr(), 0, here())
    .unwrap();
  // The heap went idle and was reset, so the page boundary is mid-payload.
  assert_eq!(heap.classify(freed.as_ptr()), PointerKind::InteriorPayload);

  let pointer = heap.reallocate_aligned(null, 4, here()).unwrap();
  assert!(matches!(
    heap.reallocate_aligned(pointer.as_ptr(), 16, here()),
    Err(HeapError::OutOfMemory { .. })
  ));
  let kind = heap.classify(pointer.as_ptr());
  assert_eq!(kind, PointerKind::TakenPayloadStart);
}

#[test]
fn classifier_edges() {
  let heap = small_heap();
  let pointer = heap.allocate(16, here()).unwrap();
  let header = heap.block_start_of(pointer.as_ptr()).unwrap().as_ptr();

  assert_eq!(heap.classify(std::ptr::null()), PointerKind::Null);
  let (before, inside) = unsafe { (header.sub(1), header.add(20)) };
  let past_end = unsafe { pointer.as_ptr().add(16) };
  assert_eq!(heap.classify(before), PointerKind::OutsideArena);
  assert_eq!(heap.classify(header), PointerKind::HeaderRegion);
  assert_eq!(heap.classify(inside), PointerKind::HeaderRegion);
  assert_eq!(heap.classify(past_end), PointerKind::InteriorPayload);

  let local = 0u8;
  assert_eq!(heap.classify(&local), PointerKind::OutsideArena);
}

#[test]
fn dump_shows_provenance() {
  let heap = small_heap();
  let line = line!() + 1;
  heap.allocate(33, Origin::caller()).unwrap();

  let report = heap.dump().unwrap();
  assert_eq!(report.chunks[0].line, line);
  assert!(report.chunks[0].source.ends_with("heap_behavior_test.rs"));
  let line = format!("size=33 actual={}", 33 + OVERHEAD);
  assert!(report.to_string().contains(&line));
}
