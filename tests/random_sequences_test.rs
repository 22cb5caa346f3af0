use std::collections::HashMap;

use fencealloc::{DebugHeap, HeapConfig, HeapError, OVERHEAD, Origin, PAGE_SIZE, PointerKind};
use proptest::prelude::*;

#[derive(Clone, Debug)]
enum Op {
  Allocate(usize),
  AllocateZeroed(usize, usize),
  AllocateAligned(usize),
  Reallocate(usize, usize),
  Free(usize),
}

fn op() -> impl Strategy<Value = Op> {
  prop_oneof![
    4 => (1usize..2048).prop_map(Op::Allocate),
    1 => (1usize..16, 1usize..64).prop_map(|(count, size)| Op::AllocateZeroed(count, size)),
    1 => (1usize..1024).prop_map(Op::AllocateAligned),
    2 => (any::<usize>(), 1usize..4096).prop_map(|(pick, size)| Op::Reallocate(pick, size)),
    3 => any::<usize>().prop_map(Op::Free),
  ]
}

fn heap() -> DebugHeap {
  let config = HeapConfig::new().with_break_capacity(1024 * PAGE_SIZE);
  DebugHeap::with_config(config).unwrap()
}

/// Each live block is filled with a byte derived from its id so copies and
/// stray writes can be told apart.
fn fill(
  address: usize,
  size: usize,
  id: u8,
) {
  unsafe { (address as *mut u8).write_bytes(id, size) };
}

fn holds(
  address: usize,
  size: usize,
  id: u8,
) -> bool {
  let bytes = unsafe { std::slice::from_raw_parts(address as *const u8, size) };
  bytes.iter().all(|byte| *byte == id)
}

proptest! {
  #![proptest_config(ProptestConfig::with_cases(64))]

  #[test]
  fn heap_stays_valid_under_random_ops(ops in prop::collection::vec(op(), 1..120)) {
    let heap = heap();
    // address -> (size, fill byte)
    let mut live: HashMap<usize, (usize, u8)> = HashMap::new();
    let mut next_id = 0u8;

    for op in ops {
      next_id = next_id.wrapping_add(1);
      let pick = |live: &HashMap<usize, (usize, u8)>, n: usize| {
        let mut keys: Vec<_> = live.keys().copied().collect();
        keys.sort_unstable();
        keys.get(n % keys.len().max(1)).copied()
      };

      match op {
        Op::Allocate(size) => {
          let pointer = heap.allocate(size, Origin::caller()).unwrap();
          fill(pointer.as_ptr() as usize, size, next_id);
          live.insert(pointer.as_ptr() as usize, (size, next_id));
        }
        Op::AllocateZeroed(count, size) => {
          let pointer = heap.allocate_zeroed(count, size, Origin::caller()).unwrap();
          prop_assert!(holds(pointer.as_ptr() as usize, count * size, 0));
          fill(pointer.as_ptr() as usize, count * size, next_id);
          live.insert(pointer.as_ptr() as usize, (count * size, next_id));
        }
        Op::AllocateAligned(size) => match heap.allocate_aligned(size, Origin::caller()) {
          Ok(pointer) => {
            prop_assert_eq!(pointer.as_ptr() as usize % PAGE_SIZE, 0);
            fill(pointer.as_ptr() as usize, size, next_id);
            live.insert(pointer.as_ptr() as usize, (size, next_id));
          }
          Err(error) => prop_assert!(
            matches!(error, HeapError::OutOfMemory { .. }),
            "unexpected error {:?}",
            error
          ),
        },
        Op::Reallocate(n, size) => {
          let Some(address) = pick(&live, n) else { continue };
          let (old_size, id) = live[&address];
          let moved = heap
            .reallocate(address as *mut u8, size, Origin::caller())
            .unwrap();
          live.remove(&address);
          let kept = old_size.min(size);
          prop_assert!(holds(moved.as_ptr() as usize, kept, id));
          fill(moved.as_ptr() as usize, size, next_id);
          live.insert(moved.as_ptr() as usize, (size, next_id));
        }
        Op::Free(n) => {
          let Some(address) = pick(&live, n) else { continue };
          let (size, id) = live.remove(&address).unwrap();
          prop_assert!(holds(address, size, id));
          heap.deallocate(address as *mut u8).unwrap();
        }
      }

      prop_assert_eq!(heap.validate(), Ok(()));
      prop_assert_eq!(heap.used_block_count(), live.len());
    }

    for (&address, &(size, id)) in &live {
      let kind = heap.classify(address as *const u8);
      prop_assert_eq!(kind, PointerKind::TakenPayloadStart);
      prop_assert_eq!(heap.block_size_of(address as *const u8), size);
      prop_assert!(holds(address, size, id));
    }

    for address in live.keys() {
      heap.deallocate(*address as *mut u8).unwrap();
    }
    prop_assert_eq!(heap.free_space(), 2 * PAGE_SIZE - OVERHEAD);
  }

  #[test]
  fn used_plus_free_accounts_for_every_byte(sizes in prop::collection::vec(1usize..3000, 1..40)) {
    let heap = heap();
    let pointers: Vec<_> = sizes
      .iter()
      .map(|size| heap.allocate(*size, Origin::caller()).unwrap())
      .collect();

    let report = heap.dump().unwrap();
    let total: usize = report.chunks.iter().map(|chunk| chunk.actual_size).sum();
    prop_assert_eq!(total, report.committed);
    prop_assert_eq!(heap.used_space() + heap.free_space(), report.committed);
    prop_assert_eq!(heap.largest_used_block(), *sizes.iter().max().unwrap());

    for pointer in pointers.iter().step_by(2) {
      heap.deallocate(pointer.as_ptr()).unwrap();
    }
    prop_assert_eq!(heap.validate(), Ok(()));
  }
}
