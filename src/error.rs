use std::fmt;

use thiserror::Error;

use crate::brk::BreakError;

/// Which part of the heap a [`Violation`] was found in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViolationKind {
  /// The arena record itself.
  Arena,
  /// The chunk at the arena base.
  FirstChunk,
  /// Any chunk after the first.
  Chunk,
}

impl fmt::Display for ViolationKind {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    f.write_str(match self {
      Self::Arena => "arena",
      Self::FirstChunk => "first chunk",
      Self::Chunk => "chunk",
    })
  }
}

/// The specific check that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reason {
  ArenaChecksum,
  ArenaSize,
  MisalignedBase,
  ChunkCount,
  FirstChunkOffset,
  OutOfBounds,
  TakenFlag,
  MissingPrev,
  UnexpectedPrev,
  MissingNext,
  DanglingNext,
  NextMismatch,
  PrevMismatch,
  Provenance,
  Checksum,
  LeftFence,
  RightFence,
  TailMismatch,
}

impl fmt::Display for Reason {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    f.write_str(match self {
      Self::ArenaChecksum => "arena checksum mismatch",
      Self::ArenaSize => "committed size is not a whole number of pages",
      Self::MisalignedBase => "arena base is not page aligned",
      Self::ChunkCount => "chunk count disagrees with the chunk list",
      Self::FirstChunkOffset => "first chunk is not at the arena base",
      Self::OutOfBounds => "chunk extends past the committed region",
      Self::TakenFlag => "taken flag is neither 0 nor 1",
      Self::MissingPrev => "backward reference is missing",
      Self::UnexpectedPrev => "first chunk has a backward reference",
      Self::MissingNext => "forward reference is missing",
      Self::DanglingNext => "last chunk has a forward reference",
      Self::NextMismatch => "forward reference disagrees with chunk size",
      Self::PrevMismatch => "backward reference disagrees with previous chunk",
      Self::Provenance => "allocation site is missing",
      Self::Checksum => "header checksum mismatch",
      Self::LeftFence => "left fence overwritten",
      Self::RightFence => "right fence overwritten",
      Self::TailMismatch => "last chunk does not end at the break",
    })
  }
}

/// First integrity failure found by the validator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("{kind} corrupted{}: {reason}", location(.index, .offset))]
pub struct Violation {
  pub kind: ViolationKind,
  /// Position of the chunk in list order, when a chunk is involved.
  pub index: Option<usize>,
  /// Byte offset of the chunk from the arena base.
  pub offset: Option<usize>,
  pub reason: Reason,
}

impl Violation {
  pub(crate) fn arena(reason: Reason) -> Self {
    Self {
      kind: ViolationKind::Arena,
      index: None,
      offset: None,
      reason,
    }
  }

  pub(crate) fn chunk(
    index: usize,
    offset: usize,
    reason: Reason,
  ) -> Self {
    let kind = if index == 0 {
      ViolationKind::FirstChunk
    } else {
      ViolationKind::Chunk
    };

    Self {
      kind,
      index: Some(index),
      offset: Some(offset),
      reason,
    }
  }

  /// A chunk reached outside of a validation walk turned out to be unreadable.
  pub(crate) fn at_offset(
    offset: usize,
    reason: Reason,
  ) -> Self {
    Self {
      kind: if offset == 0 {
        ViolationKind::FirstChunk
      } else {
        ViolationKind::Chunk
      },
      index: None,
      offset: Some(offset),
      reason,
    }
  }
}

fn location(
  index: &Option<usize>,
  offset: &Option<usize>,
) -> String {
  match (index, offset) {
    (Some(index), Some(offset)) => format!(" (chunk #{index} at +{offset:#x})"),
    (None, Some(offset)) => format!(" (at +{offset:#x})"),
    _ => String::new(),
  }
}

/// Every way a heap operation can fail. No variant leaves the heap partially
/// mutated except [`HeapError::ResetFailed`], which is reported after the
/// logical free already happened.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HeapError {
  #[error("invalid argument: {0}")]
  InvalidArgument(&'static str),

  #[error("heap corrupted: {0}")]
  Corrupted(#[from] Violation),

  #[error("pointer {0:#x} is not the start of an allocated block")]
  InvalidPointer(usize),

  #[error("out of memory while serving {requested} bytes")]
  OutOfMemory { requested: usize },

  #[error("arena reset failed: {0}")]
  ResetFailed(BreakError),

  #[error("arena setup failed: {0}")]
  Setup(BreakError),

  #[error("break returned base {0:#x}, which is not page aligned")]
  MisalignedBase(usize),
}
