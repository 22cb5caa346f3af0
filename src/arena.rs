use std::ptr::{self, NonNull};

use tracing::{debug, warn};

use crate::align::{PAGE_SIZE, is_page_aligned};
use crate::brk::{BreakError, ProgramBreak};
use crate::checksum::byte_sum;
use crate::chunk::{Chunk, ChunkHeader, FENCE, FENCE_SIZE, HEADER_SIZE, OVERHEAD};
use crate::config::HeapConfig;
use crate::error::{HeapError, Reason, Violation};
use crate::origin::Origin;

/// Pages committed by a fresh arena.
pub const INITIAL_PAGES: usize = 2;

/// The arena record plus the break it was carved from.
///
/// ```text
///   base                                                    base + committed
///    |                                                              |
///    v                                                              v
///    +-------------+-------------+-----------------+----------------+
///    |   chunk 0   |   chunk 1   |       ...       |   last chunk   |
///    +-------------+-------------+-----------------+----------------+
/// ```
///
/// Chunks tile the committed region exactly. The first chunk always sits at
/// offset 0 and the last one ends at the break.
pub(crate) struct Arena<B: ProgramBreak> {
  pub(crate) base: NonNull<u8>,
  pub(crate) checksum: u32,
  pub(crate) committed: usize,
  pub(crate) chunk_count: usize,
  pub(crate) first: usize,
  /// Interned origin names; chunk headers store indices into this table.
  sources: Vec<&'static str>,
  pub(crate) poison_freed: bool,
  brk: B,
}

// SAFETY: the arena exclusively owns the memory behind `base` through `brk`.
unsafe impl<B: ProgramBreak + Send> Send for Arena<B> {}

impl<B: ProgramBreak> Arena<B> {
  pub fn new(
    brk: B,
    config: &HeapConfig,
  ) -> Result<Self, HeapError> {
    let mut arena = Self {
      base: NonNull::dangling(),
      checksum: 0,
      committed: 0,
      chunk_count: 0,
      first: 0,
      sources: Vec::new(),
      poison_freed: config.poison_freed,
      brk,
    };

    arena.setup().map_err(|error| match error {
      SetupError::Break(error) => HeapError::Setup(error),
      SetupError::Misaligned(base) => HeapError::MisalignedBase(base),
    })?;

    Ok(arena)
  }

  /// Commits the initial pages and lays a single free chunk over them.
  fn setup(&mut self) -> Result<(), SetupError> {
    let size = INITIAL_PAGES * PAGE_SIZE;
    let base = self.brk.sbrk(size as isize).map_err(SetupError::Break)?;

    if !is_page_aligned(base.as_ptr() as usize) {
      // Hand the pages back so a retry starts from the same break.
      self.give_back(size as isize);
      return Err(SetupError::Misaligned(base.as_ptr() as usize));
    }

    self.base = base;
    self.committed = size;
    self.chunk_count = 1;
    self.first = 0;

    let origin = Origin::caller();
    let source = self.intern(origin.source);
    let mut chunk = Chunk {
      offset: 0,
      header: ChunkHeader::free(size - OVERHEAD, None, None, origin.line, source),
    };
    self.store(&mut chunk)?;
    self.write_fences(&chunk)?;
    self.seal();

    debug!(base = ?base, committed = size, "arena initialized");
    Ok(())
  }

  /// Releases every committed page and starts over with a fresh arena.
  pub fn reinitialize(&mut self) -> Result<(), BreakError> {
    let released = self.committed;
    self
      .brk
      .sbrk(-(released as isize))
      .map_err(|error| {
        debug!(%error, "could not release arena");
        error
      })?;

    self.committed = 0;
    self.chunk_count = 0;
    self.seal();

    match self.setup() {
      Ok(()) => {
        debug!(released, "arena reset");
        Ok(())
      }
      Err(SetupError::Break(error)) => Err(error),
      Err(SetupError::Misaligned(_)) => Err(BreakError::Reserve(INITIAL_PAGES * PAGE_SIZE)),
    }
  }

  /// Moves the break up by `delta` bytes, which must be a page multiple.
  pub fn extend(
    &mut self,
    delta: usize,
  ) -> Result<(), HeapError> {
    let out_of_memory = HeapError::OutOfMemory { requested: delta };
    let signed = isize::try_from(delta).map_err(|_| out_of_memory.clone())?;

    let previous = self.brk.sbrk(signed).map_err(|error| {
      debug!(%error, delta, "break refused to grow");
      out_of_memory.clone()
    })?;

    if previous.as_ptr() as usize != self.base_address() + self.committed {
      // Somebody else moved the break; the new pages are not ours to use.
      self.give_back(signed);
      return Err(out_of_memory);
    }

    self.committed += delta;
    self.seal();
    debug!(delta, committed = self.committed, "arena grown");
    Ok(())
  }

  /// Returns pages the break handed out but the arena cannot use.
  fn give_back(
    &mut self,
    bytes: isize,
  ) {
    if let Err(error) = self.brk.sbrk(-bytes) {
      warn!(%error, bytes, "could not return pages to the break");
    }
  }

  #[inline]
  pub fn base_address(&self) -> usize {
    self.base.as_ptr() as usize
  }

  /// Byte-sum of the arena record without its checksum.
  pub fn record_checksum(&self) -> u32 {
    let mut record = [0u8; 32];
    record[0..8].copy_from_slice(&(self.base_address() as u64).to_le_bytes());
    record[8..16].copy_from_slice(&(self.committed as u64).to_le_bytes());
    record[16..24].copy_from_slice(&(self.chunk_count as u64).to_le_bytes());
    record[24..32].copy_from_slice(&(self.first as u64).to_le_bytes());
    byte_sum(&record)
  }

  pub fn seal(&mut self) {
    self.checksum = self.record_checksum();
  }

  pub fn intern(
    &mut self,
    source: &'static str,
  ) -> u32 {
    if let Some(index) = self.sources.iter().position(|known| *known == source) {
      return index as u32;
    }
    self.sources.push(source);
    (self.sources.len() - 1) as u32
  }

  pub fn source_name(
    &self,
    index: u32,
  ) -> Option<&'static str> {
    self.sources.get(index as usize).copied()
  }

  /// Translates an address into an offset inside the committed region.
  /// The break itself (one past the end) is accepted.
  pub fn offset_of(
    &self,
    address: usize,
  ) -> Option<usize> {
    let offset = address.checked_sub(self.base_address())?;
    (offset <= self.committed).then_some(offset)
  }

  pub fn pointer_at(
    &self,
    offset: usize,
  ) -> NonNull<u8> {
    debug_assert!(offset <= self.committed);
    // SAFETY: callers only pass offsets inside the committed region.
    unsafe { self.base.add(offset) }
  }

  /// Copies `N` bytes out of the arena, or `None` if they are not all
  /// committed.
  pub fn read<const N: usize>(
    &self,
    offset: usize,
  ) -> Option<[u8; N]> {
    let end = offset.checked_add(N)?;
    if end > self.committed {
      return None;
    }

    let mut bytes = [0u8; N];
    // SAFETY: `[offset, end)` is committed and `bytes` is a distinct buffer.
    unsafe {
      ptr::copy_nonoverlapping(self.base.as_ptr().add(offset), bytes.as_mut_ptr(), N);
    }
    Some(bytes)
  }

  pub fn write(
    &mut self,
    offset: usize,
    bytes: &[u8],
  ) -> Result<(), Violation> {
    self.check_range(offset, bytes.len())?;
    // SAFETY: range checked above; `bytes` never points into the arena.
    unsafe {
      ptr::copy_nonoverlapping(bytes.as_ptr(), self.base.as_ptr().add(offset), bytes.len());
    }
    Ok(())
  }

  pub fn fill(
    &mut self,
    offset: usize,
    len: usize,
    byte: u8,
  ) -> Result<(), Violation> {
    self.check_range(offset, len)?;
    // SAFETY: range checked above.
    unsafe {
      ptr::write_bytes(self.base.as_ptr().add(offset), byte, len);
    }
    Ok(())
  }

  /// Copies `len` bytes between two committed ranges, which may overlap.
  pub fn copy(
    &mut self,
    from: usize,
    to: usize,
    len: usize,
  ) -> Result<(), Violation> {
    self.check_range(from, len)?;
    self.check_range(to, len)?;
    // SAFETY: both ranges checked above.
    unsafe {
      ptr::copy(
        self.base.as_ptr().add(from),
        self.base.as_ptr().add(to),
        len,
      );
    }
    Ok(())
  }

  fn check_range(
    &self,
    offset: usize,
    len: usize,
  ) -> Result<(), Violation> {
    match offset.checked_add(len) {
      Some(end) if end <= self.committed => Ok(()),
      _ => Err(Violation::at_offset(offset, Reason::OutOfBounds)),
    }
  }

  /// Decodes the chunk header at `offset`.
  pub fn chunk(
    &self,
    offset: usize,
  ) -> Result<Chunk, Violation> {
    let bytes = self
      .read::<HEADER_SIZE>(offset)
      .ok_or(Violation::at_offset(offset, Reason::OutOfBounds))?;
    let header = ChunkHeader::decode(&bytes)
      .map_err(|reason| Violation::at_offset(offset, reason))?;
    Ok(Chunk { offset, header })
  }

  /// Reseals `chunk` and writes its header back.
  pub fn store(
    &mut self,
    chunk: &mut Chunk,
  ) -> Result<(), Violation> {
    chunk.header.seal();
    self.write(chunk.offset, &chunk.header.encode())
  }

  pub fn write_fences(
    &mut self,
    chunk: &Chunk,
  ) -> Result<(), Violation> {
    self.write(chunk.left_fence(), &FENCE)?;
    self.write(chunk.right_fence(), &FENCE)
  }

  pub fn fences_intact(
    &self,
    chunk: &Chunk,
  ) -> (bool, bool) {
    let left = self.read::<FENCE_SIZE>(chunk.left_fence()) == Some(FENCE);
    let right = self.read::<FENCE_SIZE>(chunk.right_fence()) == Some(FENCE);
    (left, right)
  }

  /// Walks the list from the first chunk. Stops early at the first header
  /// that cannot be read, so it is only meaningful on a validated arena.
  pub fn chunks(&self) -> Chunks<'_, B> {
    Chunks {
      arena: self,
      next: Some(self.first),
      remaining: self.chunk_count,
    }
  }

  pub fn last_chunk(&self) -> Result<Chunk, Violation> {
    self
      .chunks()
      .last()
      .ok_or(Violation::at_offset(self.first, Reason::ChunkCount))
  }
}

pub(crate) struct Chunks<'a, B: ProgramBreak> {
  arena: &'a Arena<B>,
  next: Option<usize>,
  remaining: usize,
}

impl<B: ProgramBreak> Iterator for Chunks<'_, B> {
  type Item = Chunk;

  fn next(&mut self) -> Option<Chunk> {
    if self.remaining == 0 {
      return None;
    }
    let chunk = self.arena.chunk(self.next?).ok()?;
    self.next = chunk.header.next;
    self.remaining -= 1;
    Some(chunk)
  }
}

enum SetupError {
  Break(BreakError),
  Misaligned(usize),
}

impl From<Violation> for SetupError {
  fn from(_: Violation) -> Self {
    SetupError::Break(BreakError::Reserve(INITIAL_PAGES * PAGE_SIZE))
  }
}
