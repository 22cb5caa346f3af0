//! In-band chunk metadata.
//!
//! Every chunk is laid out in the arena like this:
//!
//! ```text
//!   +--------------------+  <- chunk offset
//!   | header (40 bytes)  |
//!   +--------------------+
//!   | left fence  (8)    |
//!   +--------------------+  <- payload offset (returned to the caller)
//!   |                    |
//!   | payload (size)     |
//!   |                    |
//!   +--------------------+
//!   | right fence (8)    |
//!   +--------------------+  <- next chunk offset
//! ```
//!
//! The header is never accessed through a `#[repr(C)]` struct living in the
//! arena. It is encoded to and decoded from a fixed little-endian byte layout,
//! so payload sizes do not have to keep headers aligned and the checksum can
//! be computed over a serialization that leaves the checksum field out.

use crate::checksum::byte_sum_parts;
use crate::error::Reason;

/// Width of each of the two fences around a payload.
pub const FENCE_SIZE: usize = 8;

/// Serialized header width.
pub const HEADER_SIZE: usize = 40;

/// Bytes of bookkeeping around every payload.
pub const OVERHEAD: usize = HEADER_SIZE + 2 * FENCE_SIZE;

/// Fence pattern: byte `i` holds the value `i`.
pub const FENCE: [u8; FENCE_SIZE] = fence_pattern();

/// Byte positions of the header fields.
pub const NEXT_FIELD: usize = 0;
pub const PREV_FIELD: usize = 8;
pub const SIZE_FIELD: usize = 16;
pub const TAKEN_FIELD: usize = 24;
pub const CHECKSUM_FIELD: usize = 28;
pub const LINE_FIELD: usize = 32;
pub const SOURCE_FIELD: usize = 36;

/// Encoded "no neighbour".
const NO_LINK: u64 = u64::MAX;

const fn fence_pattern() -> [u8; FENCE_SIZE] {
  let mut fence = [0u8; FENCE_SIZE];
  let mut i = 0;
  while i < FENCE_SIZE {
    fence[i] = i as u8;
    i += 1;
  }
  fence
}

/// Decoded chunk header. Links are byte offsets from the arena base.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ChunkHeader {
  pub next: Option<usize>,
  pub prev: Option<usize>,
  pub size: usize,
  pub taken: bool,
  pub checksum: u32,
  pub line: u32,
  /// Index into the arena's interned origin names.
  pub source: u32,
}

impl ChunkHeader {
  pub fn free(
    size: usize,
    prev: Option<usize>,
    next: Option<usize>,
    line: u32,
    source: u32,
  ) -> Self {
    Self {
      next,
      prev,
      size,
      taken: false,
      checksum: 0,
      line,
      source,
    }
  }

  pub fn encode(&self) -> [u8; HEADER_SIZE] {
    let mut bytes = [0u8; HEADER_SIZE];
    put_u64(&mut bytes, NEXT_FIELD, encode_link(self.next));
    put_u64(&mut bytes, PREV_FIELD, encode_link(self.prev));
    put_u64(&mut bytes, SIZE_FIELD, self.size as u64);
    put_u32(&mut bytes, TAKEN_FIELD, u32::from(self.taken));
    put_u32(&mut bytes, CHECKSUM_FIELD, self.checksum);
    put_u32(&mut bytes, LINE_FIELD, self.line);
    put_u32(&mut bytes, SOURCE_FIELD, self.source);
    bytes
  }

  /// Decodes a header. Only a taken flag outside `{0, 1}` is rejected here;
  /// every other field is checked against the arena by the validator.
  pub fn decode(bytes: &[u8; HEADER_SIZE]) -> Result<Self, Reason> {
    let taken = match get_u32(bytes, TAKEN_FIELD) {
      0 => false,
      1 => true,
      _ => return Err(Reason::TakenFlag),
    };

    Ok(Self {
      next: decode_link(get_u64(bytes, NEXT_FIELD)),
      prev: decode_link(get_u64(bytes, PREV_FIELD)),
      size: usize::try_from(get_u64(bytes, SIZE_FIELD))
        .unwrap_or(usize::MAX),
      taken,
      checksum: get_u32(bytes, CHECKSUM_FIELD),
      line: get_u32(bytes, LINE_FIELD),
      source: get_u32(bytes, SOURCE_FIELD),
    })
  }

  /// Byte-sum of the encoded header without its checksum field.
  pub fn compute_checksum(&self) -> u32 {
    let bytes = self.encode();
    byte_sum_parts(&[
      &bytes[..CHECKSUM_FIELD],
      &bytes[CHECKSUM_FIELD + 4..],
    ])
  }

  pub fn seal(&mut self) {
    self.checksum = self.compute_checksum();
  }

  pub fn is_sealed(&self) -> bool {
    self.checksum == self.compute_checksum()
  }
}

/// A header together with where it lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Chunk {
  pub offset: usize,
  pub header: ChunkHeader,
}

impl Chunk {
  #[inline]
  pub fn left_fence(&self) -> usize {
    self.offset + HEADER_SIZE
  }

  #[inline]
  pub fn payload(&self) -> usize {
    self.offset + HEADER_SIZE + FENCE_SIZE
  }

  #[inline]
  pub fn right_fence(&self) -> usize {
    self.payload() + self.header.size
  }

  /// First byte after this chunk, which is where its successor starts.
  #[inline]
  pub fn end(&self) -> usize {
    self.right_fence() + FENCE_SIZE
  }

  #[inline]
  pub fn is_free(&self) -> bool {
    !self.header.taken
  }
}

/// Offset of the chunk owning the payload that starts at `payload`.
#[inline]
pub(crate) fn chunk_of_payload(payload: usize) -> Option<usize> {
  payload.checked_sub(HEADER_SIZE + FENCE_SIZE)
}

fn encode_link(link: Option<usize>) -> u64 {
  link.map_or(NO_LINK, |offset| offset as u64)
}

fn decode_link(raw: u64) -> Option<usize> {
  if raw == NO_LINK {
    None
  } else {
    Some(usize::try_from(raw).unwrap_or(usize::MAX))
  }
}

fn put_u64(
  bytes: &mut [u8; HEADER_SIZE],
  at: usize,
  value: u64,
) {
  bytes[at..at + 8].copy_from_slice(&value.to_le_bytes());
}

fn put_u32(
  bytes: &mut [u8; HEADER_SIZE],
  at: usize,
  value: u32,
) {
  bytes[at..at + 4].copy_from_slice(&value.to_le_bytes());
}

fn get_u64(
  bytes: &[u8; HEADER_SIZE],
  at: usize,
) -> u64 {
  let mut raw = [0u8; 8];
  raw.copy_from_slice(&bytes[at..at + 8]);
  u64::from_le_bytes(raw)
}

fn get_u32(
  bytes: &[u8; HEADER_SIZE],
  at: usize,
) -> u32 {
  let mut raw = [0u8; 4];
  raw.copy_from_slice(&bytes[at..at + 4]);
  u32::from_le_bytes(raw)
}
