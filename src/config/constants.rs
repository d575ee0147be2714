//! # Configuration Constants
//!
//! Centralized defaults and layout constants. Values that depend on each
//! other live together and are enforced with compile-time assertions.
//!
//! ```text
//! DEFAULT_NODE_PAGE_SIZE (1024)
//!       │
//!       └─> slot arrays reserve DEFAULT_NODE_PAGE_SIZE * DEFAULT_LOAD_FACTOR
//!           up front; a page splits when the slot count reaches its page size
//!
//! DEFAULT_ENTRY_POINTS_SIZE (64)
//!       │
//!       └─> × DEFAULT_OPTIMIZE_ENTRYPOINTS_FACTOR = in-memory depth limit
//!           used by the optimize pass
//! ```

use crate::rid::RID_SIZE;

/// Slots per node page. Larger pages mean fewer records per tree but more
/// bytes per load.
pub const DEFAULT_NODE_PAGE_SIZE: u16 = 1024;

/// Fraction of the page size reserved up front in the slot vectors.
pub const DEFAULT_LOAD_FACTOR: f32 = 0.7;

/// Target number of resident anchor nodes kept for descent short-circuiting.
pub const DEFAULT_ENTRY_POINTS_SIZE: usize = 64;

/// Public calls between automatic optimize passes. 0 disables the trigger.
pub const DEFAULT_OPTIMIZE_THRESHOLD: u64 = 50_000;

/// Multiplier applied to the entry-point count to obtain the in-memory depth
/// limit for the optimize pass.
pub const DEFAULT_OPTIMIZE_ENTRYPOINTS_FACTOR: f32 = 1.0;

/// Mutations between automatic lazy-saves. 0 disables, 1 saves eagerly.
pub const DEFAULT_MAX_UPDATES_BEFORE_SAVE: u32 = 0;

/// Below this many entry points the best-anchor lookup scans linearly.
pub const BINARY_SEARCH_THRESHOLD: usize = 10;

/// Smallest page size that can still split into non-empty halves.
pub const MIN_NODE_PAGE_SIZE: u16 = 2;

/// Fixed prefix of a serialized node page:
/// page_size (2) + parent/left/right rid (3 × 10) + color (1) + count (2).
pub const NODE_HEADER_SIZE: usize = 2 + 3 * RID_SIZE + 1 + 2;

/// Upper bound on flush passes; the provisional-RID cascade settles in two,
/// anything more indicates a link cycle.
pub const MAX_FLUSH_PASSES: usize = 8;

const _: () = assert!(NODE_HEADER_SIZE == 35, "node header layout mismatch");

const _: () = assert!(
    MIN_NODE_PAGE_SIZE >= 2,
    "a split keeps the median and needs at least one slot per side"
);
