use std::ptr::{self, NonNull};

use thiserror::Error;

use crate::align::{PAGE_SIZE, page_round};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BreakError {
  #[error("break exhausted: {requested} bytes requested, {available} available")]
  Exhausted { requested: usize, available: usize },

  #[error("cannot release {requested} bytes, only {committed} committed")]
  Underflow { requested: usize, committed: usize },

  #[error("could not reserve {0} bytes of address space")]
  Reserve(usize),
}

/// The `brk`-like growth primitive the arena is carved from.
///
/// Implementations must behave like `sbrk(2)`: the break only moves by
/// `delta`, memory below the break stays where it is, and the returned
/// pointer is the break *before* the move. The first break handed out must be
/// page aligned.
pub trait ProgramBreak {
  /// Moves the break by `delta` bytes. A negative `delta` gives memory back.
  fn sbrk(
    &mut self,
    delta: isize,
  ) -> Result<NonNull<u8>, BreakError>;
}

/// A private program break.
///
/// The real `sbrk(2)` is shared with the process allocator, which also grows
/// and shrinks the data segment, so moving it from here would race with every
/// other allocation in the process. Instead, `capacity` bytes of address space
/// are reserved up front with `mmap` and the break moves inside that
/// reservation. Requests past the reservation fail the same way `sbrk` fails
/// when the data segment limit is hit.
///
/// ```text
///   base                      break                         base + capacity
///    |                          |                                  |
///    v                          v                                  v
///    +--------------------------+----------------------------------+
///    |   committed (arena)      |         reserved, unused         |
///    +--------------------------+----------------------------------+
/// ```
pub struct ReservedBreak {
  base: NonNull<u8>,
  capacity: usize,
  brk: usize,
}

// SAFETY: the reservation is owned exclusively by this value and is only
// touched through `&mut self` or by the arena that owns it.
unsafe impl Send for ReservedBreak {}

impl ReservedBreak {
  /// Reserves `capacity` bytes, rounded up to whole pages.
  pub fn new(capacity: usize) -> Result<Self, BreakError> {
    let capacity = page_round(capacity)
      .filter(|capacity| *capacity >= PAGE_SIZE)
      .ok_or(BreakError::Reserve(capacity))?;

    // SAFETY: anonymous private mapping, no file descriptor involved.
    let address = unsafe {
      libc::mmap(
        ptr::null_mut(),
        capacity,
        libc::PROT_READ | libc::PROT_WRITE,
        libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_NORESERVE,
        -1,
        0,
      )
    };

    if address == libc::MAP_FAILED {
      return Err(BreakError::Reserve(capacity));
    }

    let base = NonNull::new(address.cast::<u8>())
      .ok_or(BreakError::Reserve(capacity))?;

    Ok(Self {
      base,
      capacity,
      brk: 0,
    })
  }

  pub fn capacity(&self) -> usize {
    self.capacity
  }

  /// Bytes currently below the break.
  pub fn committed(&self) -> usize {
    self.brk
  }
}

impl ProgramBreak for ReservedBreak {
  fn sbrk(
    &mut self,
    delta: isize,
  ) -> Result<NonNull<u8>, BreakError> {
    // SAFETY: `brk <= capacity`, so this stays inside (or one past) the mapping.
    let previous = unsafe { self.base.add(self.brk) };
    let bytes = delta.unsigned_abs();

    if delta >= 0 {
      let available = self.capacity - self.brk;
      if bytes > available {
        return Err(BreakError::Exhausted {
          requested: bytes,
          available,
        });
      }
      self.brk += bytes;
    } else {
      if bytes > self.brk {
        return Err(BreakError::Underflow {
          requested: bytes,
          committed: self.brk,
        });
      }
      self.brk -= bytes;

      // Whole pages above the new break go back to the kernel; the next
      // commit sees them zero filled.
      let Some(start) = page_round(self.brk) else {
        return Ok(previous);
      };
      let end = self.brk + bytes;
      if end > start {
        // SAFETY: `[start, end)` lies inside the mapping and is page aligned
        // at `start`.
        unsafe {
          libc::madvise(
            self.base.as_ptr().add(start).cast::<libc::c_void>(),
            end - start,
            libc::MADV_DONTNEED,
          );
        }
      }
    }

    Ok(previous)
  }
}

impl Drop for ReservedBreak {
  fn drop(&mut self) {
    // SAFETY: `base` and `capacity` are exactly what `mmap` returned.
    unsafe {
      libc::munmap(self.base.as_ptr().cast::<libc::c_void>(), self.capacity);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn moves_break_and_returns_previous() {
    let mut brk = ReservedBreak::new(4 * PAGE_SIZE).unwrap();

    let base = brk.sbrk(PAGE_SIZE as isize).unwrap();
    assert_eq!(base.as_ptr() as usize % PAGE_SIZE, 0);

    let second = brk.sbrk(PAGE_SIZE as isize).unwrap();
    assert_eq!(second.as_ptr() as usize, base.as_ptr() as usize + PAGE_SIZE);
    assert_eq!(brk.committed(), 2 * PAGE_SIZE);

    let top = brk.sbrk(-(2 * PAGE_SIZE as isize)).unwrap();
    let expected = base.as_ptr() as usize + 2 * PAGE_SIZE;
    assert_eq!(top.as_ptr() as usize, expected);
    assert_eq!(brk.committed(), 0);
  }

  #[test]
  fn refuses_to_grow_past_capacity() {
    let mut brk = ReservedBreak::new(2 * PAGE_SIZE).unwrap();
    brk.sbrk(PAGE_SIZE as isize).unwrap();

    assert_eq!(
      brk.sbrk(2 * PAGE_SIZE as isize),
      Err(BreakError::Exhausted {
        requested: 2 * PAGE_SIZE,
        available: PAGE_SIZE,
      })
    );
    assert_eq!(brk.committed(), PAGE_SIZE);
  }

  #[test]
  fn refuses_to_release_more_than_committed() {
    let mut brk = ReservedBreak::new(PAGE_SIZE).unwrap();
    assert!(matches!(
      brk.sbrk(-(PAGE_SIZE as isize)),
      Err(BreakError::Underflow { .. })
    ));
  }

  #[test]
  #[cfg(target_os = "linux")]
  fn released_pages_come_back_zeroed() {
    let mut brk = ReservedBreak::new(2 * PAGE_SIZE).unwrap();
    let base = brk.sbrk(2 * PAGE_SIZE as isize).unwrap();

    unsafe {
      ptr::write_bytes(base.as_ptr(), 0xAB, 2 * PAGE_SIZE);
    }

    brk.sbrk(-(2 * PAGE_SIZE as isize)).unwrap();
    let again = brk.sbrk(2 * PAGE_SIZE as isize).unwrap();
    assert_eq!(again, base);

    let byte = unsafe { again.as_ptr().add(PAGE_SIZE + 5).read() };
    assert_eq!(byte, 0);
  }

  #[test]
  fn capacity_is_page_rounded() {
    let brk = ReservedBreak::new(PAGE_SIZE + 1).unwrap();
    assert_eq!(brk.capacity(), 2 * PAGE_SIZE);
    assert!(ReservedBreak::new(0).is_err());
  }
}
