use tracing::warn;

/// Default reservation for the program break. Large enough for a few
/// multi-megabyte blocks, small enough that runaway growth fails fast.
pub const DEFAULT_BREAK_CAPACITY: usize = 64 * 1024 * 1024;

/// Byte written over freed payloads when poisoning is enabled.
pub const POISON_BYTE: u8 = 0xFE;

pub const BREAK_CAPACITY_VAR: &str = "FENCEALLOC_BREAK_CAPACITY";
pub const POISON_FREED_VAR: &str = "FENCEALLOC_POISON_FREED";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapConfig {
  /// Bytes reserved for the break; the arena can never grow past this.
  pub break_capacity: usize,
  /// Overwrite payloads with [`POISON_BYTE`] when they are freed.
  pub poison_freed: bool,
}

impl Default for HeapConfig {
  fn default() -> Self {
    Self {
      break_capacity: DEFAULT_BREAK_CAPACITY,
      poison_freed: false,
    }
  }
}

impl HeapConfig {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_break_capacity(
    mut self,
    bytes: usize,
  ) -> Self {
    self.break_capacity = bytes;
    self
  }

  pub fn with_poison_freed(
    mut self,
    enabled: bool,
  ) -> Self {
    self.poison_freed = enabled;
    self
  }

  /// Reads [`BREAK_CAPACITY_VAR`] and [`POISON_FREED_VAR`] from the process
  /// environment. Unset or unparsable values keep their defaults.
  pub fn from_env() -> Self {
    Self::from_lookup(|key| std::env::var(key).ok())
  }

  /// Same as [`Self::from_env`] with a caller-provided variable source.
  pub fn from_lookup<F>(lookup: F) -> Self
  where
    F: Fn(&str) -> Option<String>,
  {
    let mut config = Self::default();

    if let Some(value) = lookup(BREAK_CAPACITY_VAR) {
      match parse_size(&value) {
        Some(bytes) => config.break_capacity = bytes,
        None => warn!(variable = BREAK_CAPACITY_VAR, %value, "ignoring unparsable size"),
      }
    }

    if let Some(value) = lookup(POISON_FREED_VAR) {
      match parse_flag(&value) {
        Some(enabled) => config.poison_freed = enabled,
        None => warn!(variable = POISON_FREED_VAR, %value, "ignoring unparsable flag"),
      }
    }

    config
  }
}

/// Parses `4096`, `512K`, `64M` or `1G` (binary multiples, case insensitive).
fn parse_size(value: &str) -> Option<usize> {
  let value = value.trim();
  let (digits, multiplier) = match value.char_indices().last()? {
    (at, 'k' | 'K') => (&value[..at], 1024),
    (at, 'm' | 'M') => (&value[..at], 1024 * 1024),
    (at, 'g' | 'G') => (&value[..at], 1024 * 1024 * 1024),
    _ => (value, 1),
  };

  digits.parse::<usize>().ok()?.checked_mul(multiplier)
}

fn parse_flag(value: &str) -> Option<bool> {
  match value.trim().to_ascii_lowercase().as_str() {
    "1" | "true" | "yes" | "on" => Some(true),
    "0" | "false" | "no" | "off" => Some(false),
    _ => None,
  }
}
