/// Wrapping sum of every byte in `bytes`. An empty region sums to 0.
///
/// Headers are checksummed over a serialization that leaves the checksum
/// field out, so storing and re-validating always sum the same bytes.
#[inline]
pub fn byte_sum(bytes: &[u8]) -> u32 {
  bytes
    .iter()
    .fold(0u32, |sum, byte| sum.wrapping_add(u32::from(*byte)))
}

/// [`byte_sum`] over several disjoint pieces, as if they were contiguous.
#[inline]
pub fn byte_sum_parts(parts: &[&[u8]]) -> u32 {
  parts
    .iter()
    .fold(0u32, |sum, part| sum.wrapping_add(byte_sum(part)))
}
