use std::panic::Location;

/// Where an allocation was requested from. Stored in the chunk header and
/// kept until the chunk is handed out again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Origin {
  pub line: u32,
  pub source: &'static str,
}

impl Origin {
  pub const fn new(
    line: u32,
    source: &'static str,
  ) -> Self {
    Self { line, source }
  }

  /// The source location of whoever called this, or of whoever called the
  /// nearest `#[track_caller]` function above it.
  ///
  /// ```rust
  /// use fencealloc::Origin;
  ///
  /// let origin = Origin::caller();
  /// assert!(origin.source.ends_with(".rs"));
  /// ```
  #[track_caller]
  pub fn caller() -> Self {
    let location = Location::caller();
    Self {
      line: location.line(),
      source: location.file(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[track_caller]
  fn forwarded() -> Origin {
    Origin::caller()
  }

  #[test]
  fn caller_points_at_call_site() {
    let line = line!() + 1;
    let origin = Origin::caller();
    assert_eq!(origin.line, line);
    assert_eq!(origin.source, file!());
  }

  #[test]
  fn caller_follows_track_caller_chain() {
    let line = line!() + 1;
    let origin = forwarded();
    assert_eq!(origin.line, line);
  }
}
