use std::ptr::NonNull;

use parking_lot::Mutex;
use tracing::warn;

use crate::arena::Arena;
use crate::brk::{ProgramBreak, ReservedBreak};
use crate::classify::PointerKind;
use crate::config::HeapConfig;
use crate::dump::HeapReport;
use crate::error::{HeapError, Violation};
use crate::origin::Origin;

/// A checked heap behind a single lock.
///
/// Every method takes the lock once and holds it for the whole operation,
/// validation and any nested steps included. A `reallocate` therefore never
/// lets another thread see the heap between its allocate, copy and free.
pub struct DebugHeap<B: ProgramBreak = ReservedBreak> {
  arena: Mutex<Arena<B>>,
}

impl DebugHeap<ReservedBreak> {
  /// A heap on a [`ReservedBreak`] of [`crate::DEFAULT_BREAK_CAPACITY`] bytes.
  pub fn new() -> Result<Self, HeapError> {
    Self::with_config(HeapConfig::default())
  }

  /// A heap configured from `FENCEALLOC_*` environment variables.
  pub fn from_env() -> Result<Self, HeapError> {
    Self::with_config(HeapConfig::from_env())
  }

  pub fn with_config(config: HeapConfig) -> Result<Self, HeapError> {
    let brk = ReservedBreak::new(config.break_capacity)
      .map_err(HeapError::Setup)?;
    Self::with_break(brk, config)
  }
}

impl<B: ProgramBreak> DebugHeap<B> {
  pub fn with_break(
    brk: B,
    config: HeapConfig,
  ) -> Result<Self, HeapError> {
    let arena = logged("setup", Arena::new(brk, &config))?;
    Ok(Self {
      arena: Mutex::new(arena),
    })
  }

  pub fn allocate(
    &self,
    size: usize,
    origin: Origin,
  ) -> Result<NonNull<u8>, HeapError> {
    logged("allocate", self.arena.lock().allocate(size, origin))
  }

  pub fn allocate_zeroed(
    &self,
    count: usize,
    elem_size: usize,
    origin: Origin,
  ) -> Result<NonNull<u8>, HeapError> {
    logged(
      "allocate_zeroed",
      self.arena.lock().allocate_zeroed(count, elem_size, origin),
    )
  }

  /// Moves the block at `pointer` to a fresh block of `new_size` bytes.
  ///
  /// A null `pointer` allocates. A zero `new_size` frees `pointer` and hands
  /// it back unchanged. On failure the old block is left as it was.
  pub fn reallocate(
    &self,
    pointer: *mut u8,
    new_size: usize,
    origin: Origin,
  ) -> Result<NonNull<u8>, HeapError> {
    logged(
      "reallocate",
      self.arena.lock().reallocate(pointer, new_size, origin),
    )
  }

  pub fn deallocate(
    &self,
    pointer: *mut u8,
  ) -> Result<(), HeapError> {
    logged("deallocate", self.arena.lock().deallocate(pointer))
  }

  /// Like [`Self::allocate`], but the payload starts on a page boundary. Never
  /// grows the arena.
  pub fn allocate_aligned(
    &self,
    size: usize,
    origin: Origin,
  ) -> Result<NonNull<u8>, HeapError> {
    logged(
      "allocate_aligned",
      self.arena.lock().allocate_aligned(size, origin),
    )
  }

  pub fn allocate_zeroed_aligned(
    &self,
    count: usize,
    elem_size: usize,
    origin: Origin,
  ) -> Result<NonNull<u8>, HeapError> {
    logged(
      "allocate_zeroed_aligned",
      self
        .arena
        .lock()
        .allocate_zeroed_aligned(count, elem_size, origin),
    )
  }

  pub fn reallocate_aligned(
    &self,
    pointer: *mut u8,
    new_size: usize,
    origin: Origin,
  ) -> Result<NonNull<u8>, HeapError> {
    logged(
      "reallocate_aligned",
      self
        .arena
        .lock()
        .reallocate_aligned(pointer, new_size, origin),
    )
  }

  /// Throws away every block and starts over from two fresh pages.
  pub fn reset(&self) -> Result<(), HeapError> {
    logged("reset", self.arena.lock().reset())
  }

  pub fn validate(&self) -> Result<(), Violation> {
    self.arena.lock().validate().inspect_err(|violation| {
      warn!(%violation, "heap validation failed");
    })
  }

  pub fn classify(
    &self,
    pointer: *const u8,
  ) -> PointerKind {
    self.arena.lock().classify(pointer as usize)
  }

  pub fn used_space(&self) -> usize {
    self.query("used_space", |arena| arena.used_space())
  }

  pub fn free_space(&self) -> usize {
    self.query("free_space", |arena| arena.free_space())
  }

  pub fn largest_used_block(&self) -> usize {
    self.query("largest_used_block", |arena| arena.largest_used_block())
  }

  pub fn largest_free_area(&self) -> usize {
    self.query("largest_free_area", |arena| arena.largest_free_area())
  }

  pub fn used_block_count(&self) -> usize {
    self.query("used_block_count", |arena| arena.used_block_count())
  }

  /// Free chunks with at least `min_size` payload bytes. See
  /// [`crate::DEFAULT_GAP_THRESHOLD`].
  pub fn free_gap_count(
    &self,
    min_size: usize,
  ) -> usize {
    self.query("free_gap_count", |arena| arena.free_gap_count(min_size))
  }

  pub fn block_size_of(
    &self,
    pointer: *const u8,
  ) -> usize {
    self.query("block_size_of", |arena| {
      arena.block_size_of(pointer as usize)
    })
  }

  /// Header address of the block `pointer` points into, if any.
  pub fn block_start_of(
    &self,
    pointer: *const u8,
  ) -> Option<NonNull<u8>> {
    if pointer.is_null() {
      return None;
    }

    self
      .arena
      .lock()
      .block_start_of(pointer as usize)
      .unwrap_or_else(|violation| {
        warn!(query = "block_start_of", %violation, "heap corrupted");
        None
      })
  }

  pub fn dump(&self) -> Result<HeapReport, HeapError> {
    let report = self.arena.lock().report().map_err(HeapError::from);
    logged("dump", report)
  }

  /// Runs `f` on the locked arena. Corruption reads as 0.
  fn query(
    &self,
    name: &'static str,
    f: impl FnOnce(&Arena<B>) -> Result<usize, Violation>,
  ) -> usize {
    f(&self.arena.lock()).unwrap_or_else(|violation| {
      warn!(query = name, %violation, "heap corrupted");
      0
    })
  }
}

fn logged<T>(
  operation: &'static str,
  result: Result<T, HeapError>,
) -> Result<T, HeapError> {
  result.inspect_err(|error| warn!(operation, %error, "heap operation failed"))
}
