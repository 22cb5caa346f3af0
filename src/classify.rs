use std::ptr::NonNull;

use crate::arena::Arena;
use crate::brk::ProgramBreak;
use crate::chunk::{Chunk, chunk_of_payload};
use crate::error::{HeapError, Violation};

/// Free chunks smaller than this are not counted as gaps by default.
pub const DEFAULT_GAP_THRESHOLD: usize = 72;

/// What an address points at, relative to the chunk list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PointerKind {
  /// Null, or the heap failed validation.
  Null,
  OutsideArena,
  /// Inside a chunk header or one of its fences.
  HeaderRegion,
  /// Past the start of a payload, up to and including one past its end.
  InteriorPayload,
  FreePayloadStart,
  TakenPayloadStart,
}

impl<B: ProgramBreak> Arena<B> {
  pub fn classify(
    &self,
    address: usize,
  ) -> PointerKind {
    if address == 0 || self.validate().is_err() {
      return PointerKind::Null;
    }
    self.classify_unchecked(address)
  }

  /// Classifies against an arena already known to be valid.
  fn classify_unchecked(
    &self,
    address: usize,
  ) -> PointerKind {
    let Some(offset) = self.offset_of(address) else {
      return PointerKind::OutsideArena;
    };

    self
      .chunks()
      .find_map(|chunk| locate(&chunk, offset))
      .unwrap_or(PointerKind::Null)
  }

  /// The taken chunk whose payload starts at `address`.
  pub(crate) fn taken_chunk_at(
    &self,
    address: usize,
  ) -> Result<Chunk, HeapError> {
    let invalid = HeapError::InvalidPointer(address);
    let header = self
      .offset_of(address)
      .and_then(chunk_of_payload)
      .ok_or(invalid.clone())?;

    self
      .chunks()
      .find(|chunk| chunk.offset == header)
      .filter(|chunk| chunk.header.taken)
      .ok_or(invalid)
  }

  pub fn free_space(&self) -> Result<usize, Violation> {
    self.validate()?;
    Ok(
      self
        .chunks()
        .filter(Chunk::is_free)
        .map(|chunk| chunk.header.size)
        .sum(),
    )
  }

  pub fn used_space(&self) -> Result<usize, Violation> {
    Ok(self.committed - self.free_space()?)
  }

  pub fn largest_used_block(&self) -> Result<usize, Violation> {
    self.validate()?;
    Ok(
      self
        .taken()
        .map(|chunk| chunk.header.size)
        .max()
        .unwrap_or(0),
    )
  }

  pub fn largest_free_area(&self) -> Result<usize, Violation> {
    self.validate()?;
    Ok(
      self
        .chunks()
        .filter(Chunk::is_free)
        .map(|chunk| chunk.header.size)
        .max()
        .unwrap_or(0),
    )
  }

  pub fn used_block_count(&self) -> Result<usize, Violation> {
    self.validate()?;
    Ok(self.taken().count())
  }

  /// Free chunks of at least `min_size` payload bytes.
  pub fn free_gap_count(
    &self,
    min_size: usize,
  ) -> Result<usize, Violation> {
    self.validate()?;
    Ok(
      self
        .chunks()
        .filter(|chunk| chunk.is_free() && chunk.header.size >= min_size)
        .count(),
    )
  }

  /// Payload size of the taken block starting at `address`, 0 otherwise.
  pub fn block_size_of(
    &self,
    address: usize,
  ) -> Result<usize, Violation> {
    self.validate()?;
    Ok(
      self
        .taken_chunk_at(address)
        .map_or(0, |chunk| chunk.header.size),
    )
  }

  /// Address of the chunk header for a taken payload start or any address
  /// inside a payload.
  pub fn block_start_of(
    &self,
    address: usize,
  ) -> Result<Option<NonNull<u8>>, Violation> {
    self.validate()?;
    let Some(offset) = self.offset_of(address) else {
      return Ok(None);
    };

    let start = self.chunks().find_map(|chunk| match locate(&chunk, offset)? {
      PointerKind::TakenPayloadStart | PointerKind::InteriorPayload => {
        Some(self.pointer_at(chunk.offset))
      }
      _ => None,
    });
    Ok(start)
  }

  fn taken(&self) -> impl Iterator<Item = Chunk> + '_ {
    self.chunks().filter(|chunk| chunk.header.taken)
  }
}

/// Where `offset` falls relative to a single chunk, if it falls in it at all.
fn locate(
  chunk: &Chunk,
  offset: usize,
) -> Option<PointerKind> {
  let payload = chunk.payload();
  let payload_end = chunk.right_fence();

  if offset == payload {
    return Some(if chunk.header.taken {
      PointerKind::TakenPayloadStart
    } else {
      PointerKind::FreePayloadStart
    });
  }

  if offset > payload && offset <= payload_end {
    return Some(PointerKind::InteriorPayload);
  }

  let in_header = offset >= chunk.offset && offset < payload;
  let in_right_fence = offset > payload_end && offset < chunk.end();
  if in_header || in_right_fence {
    return Some(PointerKind::HeaderRegion);
  }

  None
}
