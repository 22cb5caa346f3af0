use std::io::Read;

use fencealloc::{DebugHeap, HeapConfig, Origin, PAGE_SIZE};

/// Waits for ENTER when run with `--step`, so the arena can be inspected with
/// `pmap` or `gdb` between stages.
fn pause(step: bool) {
  if step {
    println!("\n>>> Press ENTER to continue...");
    let _ = std::io::stdin().bytes().next();
  }
}

fn main() {
  // RUST_LOG=fencealloc=trace shows every split and merge.
  tracing_subscriber::fmt()
    .with_env_filter(
      tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(tracing::Level::INFO.into()),
    )
    .init();

  let step = std::env::args().any(|arg| arg == "--step");
  let heap = match DebugHeap::with_config(HeapConfig::from_env()) {
    Ok(heap) => heap,
    Err(error) => {
      eprintln!("could not set up heap: {error}");
      std::process::exit(1);
    }
  };

  println!("[start] PID = {}", std::process::id());
  print!("{}", heap.dump().unwrap());
  pause(step);

  // --------------------------------------------------------------------
  // 1) A few ordinary blocks, carved first-fit from the initial chunk.
  // --------------------------------------------------------------------
  let a = heap.allocate(10, Origin::caller()).unwrap();
  let b = heap.allocate(120, Origin::caller()).unwrap();
  let c = heap.allocate(14, Origin::caller()).unwrap();
  println!("\n[1] three blocks, used = {} bytes", heap.used_space());
  print!("{}", heap.dump().unwrap());
  pause(step);

  // --------------------------------------------------------------------
  // 2) Free the middle one. Its neighbours are taken, so it stays a gap.
  // --------------------------------------------------------------------
  heap.deallocate(b.as_ptr()).unwrap();
  let gaps = heap.free_gap_count(fencealloc::DEFAULT_GAP_THRESHOLD);
  println!("\n[2] freed b, free gaps = {gaps}");
  print!("{}", heap.dump().unwrap());
  pause(step);

  // --------------------------------------------------------------------
  // 3) A page aligned block. The free tail is split twice around the
  //    boundary.
  // --------------------------------------------------------------------
  let aligned = heap.allocate_aligned(64, Origin::caller()).unwrap();
  println!(
    "\n[3] aligned block at {:p} ({} mod page)",
    aligned.as_ptr(),
    aligned.as_ptr() as usize % PAGE_SIZE
  );
  print!("{}", heap.dump().unwrap());
  pause(step);

  // --------------------------------------------------------------------
  // 4) Write one byte past `a` and watch the next call refuse to run.
  // --------------------------------------------------------------------
  unsafe { a.as_ptr().add(10).write(0xFF) };
  match heap.allocate(8, Origin::caller()) {
    Ok(_) => println!("\n[4] overflow went unnoticed"),
    Err(error) => println!("\n[4] {error}"),
  }
  unsafe { a.as_ptr().add(10).write(0) };
  pause(step);

  // --------------------------------------------------------------------
  // 5) Free everything. The arena shrinks back to two pages.
  // --------------------------------------------------------------------
  for pointer in [a, c, aligned] {
    heap.deallocate(pointer.as_ptr()).unwrap();
  }
  println!("\n[5] all free, used = {} bytes", heap.used_space());
  print!("{}", heap.dump().unwrap());
}
