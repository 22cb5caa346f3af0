use tracing::{debug, trace};

use crate::arena::Arena;
use crate::brk::ProgramBreak;
use crate::chunk::{Chunk, OVERHEAD};
use crate::config::POISON_BYTE;
use crate::error::{HeapError, Violation};

impl<B: ProgramBreak> Arena<B> {
  /// Frees the block whose payload starts at `pointer`, merging it with any
  /// free neighbour. Once nothing is taken the arena is reset.
  ///
  /// ```text
  ///   [ free | freed | free ]  ->  [ ........ free ........ ]
  /// ```
  pub fn deallocate(
    &mut self,
    pointer: *mut u8,
  ) -> Result<(), HeapError> {
    self.validate()?;
    let mut chunk = self.taken_chunk_at(pointer as usize)?;

    chunk.header.taken = false;
    if self.poison_freed {
      self.fill(chunk.payload(), chunk.header.size, POISON_BYTE)?;
    }
    self.store(&mut chunk)?;
    debug!(offset = chunk.payload(), size = chunk.header.size, "freed");

    if let Some(prev) = chunk.header.prev {
      let left = self.chunk(prev)?;
      if left.is_free() {
        chunk = self.merge_next(left, chunk)?;
      }
    }

    if let Some(next) = chunk.header.next {
      let right = self.chunk(next)?;
      if right.is_free() {
        self.merge_next(chunk, right)?;
      }
    }

    if self.chunks().all(|chunk| chunk.is_free()) {
      self.reinitialize().map_err(HeapError::ResetFailed)?;
    }

    Ok(())
  }

  /// Releases the whole arena and sets it up again.
  pub fn reset(&mut self) -> Result<(), HeapError> {
    self.validate()?;
    self.reinitialize().map_err(HeapError::ResetFailed)
  }

  /// Folds `right`, which must directly follow `left`, into `left`.
  fn merge_next(
    &mut self,
    mut left: Chunk,
    right: Chunk,
  ) -> Result<Chunk, Violation> {
    debug_assert_eq!(left.header.next, Some(right.offset));

    if self.poison_freed {
      // Stale metadata between the two payloads.
      self.fill(left.right_fence(), OVERHEAD, POISON_BYTE)?;
    }

    left.header.size += right.header.size + OVERHEAD;
    left.header.next = right.header.next;
    self.store(&mut left)?;
    self.write_fences(&left)?;

    if let Some(following) = right.header.next {
      let mut following = self.chunk(following)?;
      following.header.prev = Some(left.offset);
      self.store(&mut following)?;
    }

    self.chunk_count -= 1;
    self.seal();
    trace!(
      offset = left.offset,
      size = left.header.size,
      "chunks merged"
    );
    Ok(left)
  }
}
