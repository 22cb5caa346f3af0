use std::ptr::NonNull;

use tracing::{debug, trace};

use crate::align::page_round;
use crate::arena::Arena;
use crate::brk::ProgramBreak;
use crate::chunk::{Chunk, ChunkHeader, OVERHEAD};
use crate::error::{HeapError, Violation};
use crate::origin::Origin;

/// Rejects sizes the engines cannot serve before anything is mutated.
pub(crate) fn checked_request(size: usize) -> Result<usize, HeapError> {
  if size == 0 {
    return Err(HeapError::InvalidArgument("size must be non-zero"));
  }

  // A split leaves a whole chunk behind the payload, so both overheads must
  // be representable.
  size
    .checked_add(2 * OVERHEAD)
    .map(|_| size)
    .ok_or(HeapError::InvalidArgument("size too large to track"))
}

pub(crate) fn checked_product(
  count: usize,
  elem_size: usize,
) -> Result<usize, HeapError> {
  if count == 0 {
    return Err(HeapError::InvalidArgument("element count must be non-zero"));
  }
  if elem_size == 0 {
    return Err(HeapError::InvalidArgument("element size must be non-zero"));
  }

  count
    .checked_mul(elem_size)
    .ok_or(HeapError::InvalidArgument("count times size overflows"))
}

impl<B: ProgramBreak> Arena<B> {
  pub fn allocate(
    &mut self,
    size: usize,
    origin: Origin,
  ) -> Result<NonNull<u8>, HeapError> {
    self.validate()?;
    let size = checked_request(size)?;

    let chunk = match self.first_fit(size) {
      Some(chunk) => chunk,
      None => {
        self.grow_for(size, origin)?;
        self
          .first_fit(size)
          .ok_or(HeapError::OutOfMemory { requested: size })?
      }
    };

    let payload = self.claim(chunk, size, origin)?;
    debug!(
      size,
      offset = payload,
      line = origin.line,
      source = origin.source,
      "allocated"
    );
    Ok(self.pointer_at(payload))
  }

  pub fn allocate_zeroed(
    &mut self,
    count: usize,
    elem_size: usize,
    origin: Origin,
  ) -> Result<NonNull<u8>, HeapError> {
    let size = checked_product(count, elem_size)?;
    let pointer = self.allocate(size, origin)?;
    self.zero_payload(pointer, size)?;
    Ok(pointer)
  }

  pub fn reallocate(
    &mut self,
    pointer: *mut u8,
    new_size: usize,
    origin: Origin,
  ) -> Result<NonNull<u8>, HeapError> {
    let Some(old) = NonNull::new(pointer) else {
      return self.allocate(new_size, origin);
    };

    if new_size == 0 {
      self.deallocate(pointer)?;
      return Ok(old);
    }

    self.validate()?;
    let source = self.taken_chunk_at(old.as_ptr() as usize)?;
    let moved = self.allocate(new_size, origin)?;
    self.move_payload(source, moved, new_size)?;
    self.deallocate(pointer)?;
    Ok(moved)
  }

  /// Copies what fits of `source`'s payload into the block at `to`.
  pub(crate) fn move_payload(
    &mut self,
    source: Chunk,
    to: NonNull<u8>,
    new_size: usize,
  ) -> Result<(), HeapError> {
    let to = self
      .offset_of(to.as_ptr() as usize)
      .ok_or(HeapError::InvalidPointer(to.as_ptr() as usize))?;
    let len = source.header.size.min(new_size);
    self.copy(source.payload(), to, len)?;
    trace!(from = source.payload(), to, len, "payload moved");
    Ok(())
  }

  pub(crate) fn zero_payload(
    &mut self,
    pointer: NonNull<u8>,
    size: usize,
  ) -> Result<(), HeapError> {
    let offset = self
      .offset_of(pointer.as_ptr() as usize)
      .ok_or(HeapError::InvalidPointer(pointer.as_ptr() as usize))?;
    self.fill(offset, size, 0)?;
    Ok(())
  }

  /// First free chunk, in address order, that fits `size` exactly or can be
  /// split around it.
  fn first_fit(
    &self,
    size: usize,
  ) -> Option<Chunk> {
    self.chunks().find(|chunk| {
      chunk.is_free() && (chunk.header.size == size || chunk.header.size >= size + OVERHEAD)
    })
  }

  /// Commits enough pages that the next first-fit walk succeeds.
  ///
  /// A free last chunk absorbs the new pages. Otherwise they become a new
  /// free chunk appended after it.
  fn grow_for(
    &mut self,
    size: usize,
    origin: Origin,
  ) -> Result<(), HeapError> {
    let out_of_memory = || HeapError::OutOfMemory { requested: size };
    let mut last = self.last_chunk()?;

    if last.is_free() {
      let missing = (size + OVERHEAD).saturating_sub(last.header.size);
      let delta = page_round(missing).ok_or_else(out_of_memory)?;
      self.extend(delta).map_err(|_| out_of_memory())?;

      last.header.size += delta;
      self.store(&mut last)?;
      self.write_fences(&last)?;
      return Ok(());
    }

    let delta = page_round(size + 2 * OVERHEAD).ok_or_else(out_of_memory)?;
    let offset = self.committed;
    self.extend(delta).map_err(|_| out_of_memory())?;

    let source = self.intern(origin.source);
    let mut appended = Chunk {
      offset,
      header: ChunkHeader::free(
        delta - OVERHEAD,
        Some(last.offset),
        None,
        origin.line,
        source,
      ),
    };
    self.store(&mut appended)?;
    self.write_fences(&appended)?;

    last.header.next = Some(offset);
    self.store(&mut last)?;

    self.chunk_count += 1;
    self.seal();
    trace!(offset, size = appended.header.size, "chunk appended");
    Ok(())
  }

  /// Shrinks the free `chunk` to `keep` bytes and turns the rest into a new
  /// free chunk right after it.
  ///
  /// ```text
  ///   before:  [ hdr | f | ............ size ............ | f ]
  ///   after:   [ hdr | f | keep | f ][ hdr | f | rest | f ]
  /// ```
  ///
  /// The caller guarantees `chunk.header.size >= keep + OVERHEAD`.
  pub(crate) fn split(
    &mut self,
    chunk: &mut Chunk,
    keep: usize,
  ) -> Result<Chunk, Violation> {
    debug_assert!(chunk.header.size >= keep + OVERHEAD);

    let rest = chunk.header.size - keep - OVERHEAD;
    let following = chunk.header.next;

    chunk.header.size = keep;
    let mut remainder = Chunk {
      offset: chunk.end(),
      header: ChunkHeader::free(
        rest,
        Some(chunk.offset),
        following,
        chunk.header.line,
        chunk.header.source,
      ),
    };
    chunk.header.next = Some(remainder.offset);

    self.store(&mut remainder)?;
    self.write_fences(&remainder)?;
    self.store(chunk)?;
    self.write_fences(chunk)?;

    if let Some(following) = following {
      let mut following = self.chunk(following)?;
      following.header.prev = Some(remainder.offset);
      self.store(&mut following)?;
    }

    self.chunk_count += 1;
    self.seal();
    trace!(offset = chunk.offset, keep, rest, "chunk split");
    Ok(remainder)
  }

  /// Marks `chunk` taken for `size` bytes, splitting off any excess first.
  /// Returns the payload offset.
  pub(crate) fn claim(
    &mut self,
    mut chunk: Chunk,
    size: usize,
    origin: Origin,
  ) -> Result<usize, Violation> {
    if chunk.header.size != size {
      self.split(&mut chunk, size)?;
    }

    chunk.header.taken = true;
    chunk.header.line = origin.line;
    chunk.header.source = self.intern(origin.source);
    self.store(&mut chunk)?;
    Ok(chunk.payload())
  }
}
