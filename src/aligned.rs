//! Page aligned allocation.
//!
//! Aligned requests are carved out of existing free chunks and never grow the
//! arena. Page boundaries are tried in increasing address order. A boundary
//! is usable when it falls inside a free payload and one of these holds:
//!
//! ```text
//!   payload starts on the boundary, exact size:   take the chunk as is
//!
//!   payload starts on the boundary, larger:       [ taken | rest ]
//!
//!   boundary inside the payload:                  [ lead | taken | rest ]
//!                                                         ^
//!                                                      boundary
//! ```
//!
//! The third case is a double split: a leading free chunk absorbs everything
//! in front of the boundary so the next header lands exactly `HEADER_SIZE +
//! FENCE_SIZE` bytes before it.

use std::ptr::NonNull;

use tracing::{debug, trace};

use crate::align;
use crate::align::PAGE_SIZE;
use crate::alloc::{checked_product, checked_request};
use crate::arena::Arena;
use crate::brk::ProgramBreak;
use crate::chunk::{Chunk, FENCE_SIZE, OVERHEAD};
use crate::error::HeapError;
use crate::origin::Origin;

/// How a free chunk can serve an aligned request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Carve {
  /// The payload already starts on the boundary.
  InPlace,
  /// A leading chunk of this many payload bytes goes in front.
  Lead(usize),
}

impl<B: ProgramBreak> Arena<B> {
  pub fn allocate_aligned(
    &mut self,
    size: usize,
    origin: Origin,
  ) -> Result<NonNull<u8>, HeapError> {
    self.validate()?;
    let size = checked_request(size)?;

    let (mut chunk, carve) = self
      .aligned_slot(size)
      .ok_or(HeapError::OutOfMemory { requested: size })?;

    if let Carve::Lead(lead) = carve {
      chunk = self.split(&mut chunk, lead)?;
    }

    let payload = self.claim(chunk, size, origin)?;
    debug_assert!((self.base_address() + payload) % PAGE_SIZE == 0);
    debug!(
      size,
      offset = payload,
      line = origin.line,
      source = origin.source,
      "allocated aligned"
    );
    Ok(self.pointer_at(payload))
  }

  pub fn allocate_zeroed_aligned(
    &mut self,
    count: usize,
    elem_size: usize,
    origin: Origin,
  ) -> Result<NonNull<u8>, HeapError> {
    let size = checked_product(count, elem_size)?;
    let pointer = self.allocate_aligned(size, origin)?;
    self.zero_payload(pointer, size)?;
    Ok(pointer)
  }

  pub fn reallocate_aligned(
    &mut self,
    pointer: *mut u8,
    new_size: usize,
    origin: Origin,
  ) -> Result<NonNull<u8>, HeapError> {
    let Some(old) = NonNull::new(pointer) else {
      return self.allocate_aligned(new_size, origin);
    };

    if new_size == 0 {
      self.deallocate(pointer)?;
      return Ok(old);
    }

    self.validate()?;
    let source = self.taken_chunk_at(old.as_ptr() as usize)?;
    let moved = self.allocate_aligned(new_size, origin)?;
    self.move_payload(source, moved, new_size)?;
    self.deallocate(pointer)?;
    Ok(moved)
  }

  /// First free chunk and boundary, in address order, that can hold `size`
  /// bytes starting on a page boundary.
  fn aligned_slot(
    &self,
    size: usize,
  ) -> Option<(Chunk, Carve)> {
    let base = self.base_address();

    self.chunks().filter(Chunk::is_free).find_map(|chunk| {
      let start = base + chunk.payload();
      let end = start + chunk.header.size;
      let mut boundary = align!(start, PAGE_SIZE)?;

      while boundary < end || boundary == start {
        if let Some(how) = carve(start, end, boundary, size) {
          trace!(
            offset = chunk.offset,
            boundary = boundary - base,
            "aligned slot"
          );
          return Some((chunk, how));
        }
        boundary += PAGE_SIZE;
      }

      None
    })
  }
}

fn carve(
  start: usize,
  end: usize,
  boundary: usize,
  size: usize,
) -> Option<Carve> {
  let available = end - start;

  if boundary == start {
    let fits = available == size || available > size + OVERHEAD;
    return fits.then_some(Carve::InPlace);
  }

  // The leading chunk keeps a non-empty payload.
  let lead = (boundary - start)
    .checked_sub(OVERHEAD)
    .filter(|lead| *lead > 0)?;
  let room = size + FENCE_SIZE + OVERHEAD;
  (end - boundary > room).then_some(Carve::Lead(lead))
}
