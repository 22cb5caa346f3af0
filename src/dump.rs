use std::fmt;

use crate::arena::Arena;
use crate::brk::ProgramBreak;
use crate::chunk::OVERHEAD;
use crate::error::Violation;

/// Snapshot of the arena and every chunk in list order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeapReport {
  pub base: usize,
  pub committed: usize,
  pub chunk_count: usize,
  pub checksum: u32,
  /// Sum of free payloads.
  pub free_space: usize,
  pub largest_used: usize,
  /// Address one past the committed region.
  pub brk: usize,
  pub chunks: Vec<ChunkReport>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkReport {
  /// Address of the chunk header.
  pub address: usize,
  pub prev: Option<usize>,
  pub next: Option<usize>,
  pub checksum: u32,
  /// Payload bytes.
  pub size: usize,
  /// Payload plus header and fences.
  pub actual_size: usize,
  pub taken: bool,
  pub line: u32,
  pub source: &'static str,
}

impl<B: ProgramBreak> Arena<B> {
  pub fn report(&self) -> Result<HeapReport, Violation> {
    self.validate()?;
    let base = self.base_address();

    let chunks = self
      .chunks()
      .map(|chunk| ChunkReport {
        address: base + chunk.offset,
        prev: chunk.header.prev.map(|offset| base + offset),
        next: chunk.header.next.map(|offset| base + offset),
        checksum: chunk.header.checksum,
        size: chunk.header.size,
        actual_size: chunk.header.size + OVERHEAD,
        taken: chunk.header.taken,
        line: chunk.header.line,
        source: self.source_name(chunk.header.source).unwrap_or("?"),
      })
      .collect::<Vec<_>>();

    let free_space = chunks
      .iter()
      .filter(|chunk| !chunk.taken)
      .map(|chunk| chunk.size)
      .sum();
    let largest_used = chunks
      .iter()
      .filter(|chunk| chunk.taken)
      .map(|chunk| chunk.size)
      .max()
      .unwrap_or(0);

    Ok(HeapReport {
      base,
      committed: self.committed,
      chunk_count: self.chunk_count,
      checksum: self.checksum,
      free_space,
      largest_used,
      brk: base + self.committed,
      chunks,
    })
  }
}

impl fmt::Display for HeapReport {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    writeln!(
      f,
      "arena {:#x}: {} bytes committed, {} chunks, checksum {:#010x}",
      self.base, self.committed, self.chunk_count, self.checksum
    )?;
    writeln!(
      f,
      "  break {:#x}, {} bytes free, largest used block {}",
      self.brk, self.free_space, self.largest_used
    )?;

    for (index, chunk) in self.chunks.iter().enumerate() {
      writeln!(f, "  #{index} {chunk}")?;
    }

    Ok(())
  }
}

impl fmt::Display for ChunkReport {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    write!(
      f,
      "{:#x} prev={} next={} checksum={:#010x} size={} actual={} {} from {}:{}",
      self.address,
      Link(self.prev),
      Link(self.next),
      self.checksum,
      self.size,
      self.actual_size,
      if self.taken { "taken" } else { "free" },
      self.source,
      self.line
    )
  }
}

struct Link(Option<usize>);

impl fmt::Display for Link {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    match self.0 {
      Some(address) => write!(f, "{address:#x}"),
      None => f.write_str("-"),
    }
  }
}
