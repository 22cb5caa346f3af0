//! # fencealloc - A Debugging Heap Allocator
//!
//! This crate provides a **checked heap**: a first-fit allocator over a single
//! arena grown with a `brk`-style primitive, where every block carries enough
//! metadata to catch the usual heap bugs when they happen instead of three
//! allocations later.
//!
//! ## Overview
//!
//! The arena is an address-ordered list of chunks that tile the committed
//! region with no gaps:
//!
//! ```text
//!   Arena:
//!
//!   ┌──────────────────────────────────────────────────────────────────────┐
//!   │                          COMMITTED PAGES                             │
//!   │                                                                      │
//!   │   ┌──────────┬──────────┬──────────┬──────────────────────────────┐  │
//!   │   │  taken   │   free   │  taken   │            free              │  │
//!   │   └──────────┴──────────┴──────────┴──────────────────────────────┘  │
//!   │   ▲                                                               ▲  │
//!   │   │                                                               │  │
//!   │  Base                                                        Program │
//!   │ (page aligned)                                                 Break │
//!   └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Each chunk wraps its payload in a checksummed header and two fences:
//!
//! ```text
//!   Single Chunk:
//!   ┌──────────────────────┬─────────┬──────────────────────┬─────────┐
//!   │    Chunk Header      │  Fence  │       Payload        │  Fence  │
//!   │  ┌────────────────┐  │ 0 1 ... │                      │ 0 1 ... │
//!   │  │ next / prev    │  │         │   size bytes usable  │         │
//!   │  │ size / taken   │  │         │                      │         │
//!   │  │ checksum       │  │         │                      │         │
//!   │  │ line / source  │  │         │                      │         │
//!   │  └────────────────┘  │         │                      │         │
//!   │      40 bytes        │ 8 bytes │                      │ 8 bytes │
//!   └──────────────────────┴─────────┴──────────────────────┴─────────┘
//!                                    ▲
//!                                    └── Pointer returned to user
//! ```
//!
//! Every operation validates the whole heap first. A write one byte past a
//! payload, a stale header or a corrupted link turns the next call into a
//! [`HeapError::Corrupted`] naming the chunk and the check that failed.
//!
//! ## Crate Structure
//!
//! ```text
//!   fencealloc
//!   ├── align      - align! macro and page rounding
//!   ├── brk        - ProgramBreak trait and the mmap-backed ReservedBreak
//!   ├── checksum   - byte-sum checksum
//!   ├── chunk      - in-band header layout and fences (internal)
//!   ├── arena      - arena record, growth and reset (internal)
//!   ├── validate   - integrity walk (internal)
//!   ├── alloc      - first-fit allocate / zeroed / reallocate (internal)
//!   ├── aligned    - page aligned carving (internal)
//!   ├── free       - deallocation and coalescing (internal)
//!   ├── classify   - pointer classification and queries
//!   ├── dump       - HeapReport
//!   ├── config     - HeapConfig
//!   ├── error      - HeapError and Violation
//!   ├── origin     - allocation site provenance
//!   └── heap       - DebugHeap, the locked public facade
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use fencealloc::{DebugHeap, Origin, PointerKind};
//!
//! let heap = DebugHeap::new().unwrap();
//!
//! let pointer = heap.allocate(16, Origin::caller()).unwrap();
//! assert_eq!(heap.block_size_of(pointer.as_ptr()), 16);
//!
//! // Scribble over the right fence and the heap notices.
//! unsafe { pointer.as_ptr().add(16).write(0xFF) };
//! assert!(heap.validate().is_err());
//!
//! unsafe { pointer.as_ptr().add(16).write(0) };
//! heap.deallocate(pointer.as_ptr()).unwrap();
//! assert_eq!(heap.classify(pointer.as_ptr()), PointerKind::FreePayloadStart);
//! ```
//!
//! ## Limitations
//!
//! - **One arena**: no size classes, thread caches or per-CPU heaps
//! - **Software fences**: overruns are found on the next call, not trapped
//! - **Linear walks**: every call validates every chunk
//! - **Unix-only**: `ReservedBreak` needs `mmap(2)`

pub mod align;
pub mod brk;
pub mod checksum;
pub mod classify;
pub mod config;
pub mod dump;
pub mod error;
pub mod heap;
pub mod origin;

mod aligned;
mod alloc;
mod arena;
mod chunk;
mod free;
mod validate;

pub use align::PAGE_SIZE;
pub use brk::{BreakError, ProgramBreak, ReservedBreak};
pub use chunk::{FENCE_SIZE, HEADER_SIZE, OVERHEAD};
pub use classify::{DEFAULT_GAP_THRESHOLD, PointerKind};
pub use config::{DEFAULT_BREAK_CAPACITY, HeapConfig, POISON_BYTE};
pub use dump::{ChunkReport, HeapReport};
pub use error::{HeapError, Reason, Violation, ViolationKind};
pub use heap::DebugHeap;
pub use origin::Origin;
