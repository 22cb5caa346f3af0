//! Heap integrity checks.
//!
//! Every engine entry point runs [`Arena::validate`] before it touches the
//! heap. Checks run in a fixed order and stop at the first failure, so the
//! same corruption is always reported the same way:
//!
//! 1. the arena record (checksum, committed size, base alignment);
//! 2. each chunk in list order (bounds, links, provenance, checksum, fences);
//! 3. the tail (chunk count and the last chunk ending at the break).
//!
//! Every read is bounds checked against the committed size first, so a
//! corrupted link or size never walks the validator out of the arena.

use crate::align::{PAGE_SIZE, is_page_aligned};
use crate::arena::Arena;
use crate::brk::ProgramBreak;
use crate::chunk::{Chunk, FENCE_SIZE};
use crate::error::{Reason, Violation};

impl<B: ProgramBreak> Arena<B> {
  pub fn validate(&self) -> Result<(), Violation> {
    self.validate_record()?;

    let mut previous: Option<Chunk> = None;
    let mut offset = self.first;

    for index in 0..self.chunk_count {
      let chunk = self
        .chunk(offset)
        .map_err(|violation| {
          Violation::chunk(index, offset, violation.reason)
        })?;
      let fail = |reason| Err(Violation::chunk(index, offset, reason));

      let Some(end) = chunk
        .header
        .size
        .checked_add(chunk.payload() + FENCE_SIZE)
        .filter(|end| *end <= self.committed)
      else {
        return fail(Reason::OutOfBounds);
      };

      match (previous, chunk.header.prev) {
        (None, Some(_)) => return fail(Reason::UnexpectedPrev),
        (Some(_), None) => return fail(Reason::MissingPrev),
        (Some(previous), Some(prev)) if prev != previous.offset => {
          return fail(Reason::PrevMismatch);
        }
        _ => {}
      }

      let is_last = index + 1 == self.chunk_count;
      match chunk.header.next {
        Some(_) if is_last => return fail(Reason::DanglingNext),
        None if !is_last => return fail(Reason::MissingNext),
        Some(next) if next != end => return fail(Reason::NextMismatch),
        _ => {}
      }

      if self.source_name(chunk.header.source).is_none() {
        return fail(Reason::Provenance);
      }

      if !chunk.header.is_sealed() {
        return fail(Reason::Checksum);
      }

      match self.fences_intact(&chunk) {
        (false, _) => return fail(Reason::LeftFence),
        (_, false) => return fail(Reason::RightFence),
        _ => {}
      }

      if is_last {
        return if end == self.committed {
          Ok(())
        } else {
          fail(Reason::TailMismatch)
        };
      }

      previous = Some(chunk);
      offset = end;
    }

    Err(Violation::arena(Reason::ChunkCount))
  }

  fn validate_record(&self) -> Result<(), Violation> {
    if self.checksum != self.record_checksum() {
      return Err(Violation::arena(Reason::ArenaChecksum));
    }

    if self.committed < PAGE_SIZE || !is_page_aligned(self.committed) {
      return Err(Violation::arena(Reason::ArenaSize));
    }

    if !is_page_aligned(self.base_address()) {
      return Err(Violation::arena(Reason::MisalignedBase));
    }

    if self.first != 0 {
      return Err(Violation::chunk(0, self.first, Reason::FirstChunkOffset));
    }

    Ok(())
  }
}
