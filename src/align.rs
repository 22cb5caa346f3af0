/// Page size the arena is committed and carved in.
pub const PAGE_SIZE: usize = 4096;

/// Rounds `$value` up to the next multiple of `$align`, which must be a power
/// of two. Expands to an `Option<usize>` that is `None` on overflow.
///
/// # Examples
///
/// ```rust
/// use fencealloc::align;
///
/// assert_eq!(align!(13usize, 8), Some(16));
/// assert_eq!(align!(4096usize, 4096), Some(4096));
/// assert_eq!(align!(usize::MAX, 4096), None);
/// ```
#[macro_export]
macro_rules! align {
  ($value:expr, $align:expr) => {
    ($value)
      .checked_add($align - 1)
      .map(|value: usize| value & !($align - 1))
  };
}

/// Rounds a byte count up to whole pages. `None` if that overflows.
#[inline]
pub fn page_round(bytes: usize) -> Option<usize> {
  align!(bytes, PAGE_SIZE)
}

#[inline]
pub fn is_page_aligned(value: usize) -> bool {
  value & (PAGE_SIZE - 1) == 0
}
