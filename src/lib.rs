//! # marbletree — Persistent Paged Red-Black Tree Index Engine
//!
//! marbletree is the universal index structure of a document-oriented graph
//! database: a red-black tree whose nodes are *pages* of up to `page_size`
//! key/value slots, persisted as opaque records in an external record store,
//! loaded lazily slot by slot, and trimmed back to a bounded working set by
//! an explicit optimize pass.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────┐
//! │  PropertyIndex (unique / non-unique  │
//! │  / full-text over one tree)          │
//! ├──────────────────────────────────────┤
//! │  PersistentTree (RwLock, counters,   │
//! │  lazy-save cadence, tx observer)     │
//! ├──────────────────────────────────────┤
//! │  TreeCore: descent, median split,    │
//! │  red-black fixups over NodeIds       │
//! ├───────────────┬──────────────────────┤
//! │  NodeCache +  │  CommitBuffer        │
//! │  EntryPoints  │  (dirty set, flush)  │
//! ├───────────────┴──────────────────────┤
//! │  NodePage (lazy slots, wire codec)   │
//! ├──────────────────────────────────────┤
//! │  RecordStore (create/read/update/    │
//! │  delete, assigns final identities)   │
//! └──────────────────────────────────────┘
//! ```
//!
//! ## Key Properties
//!
//! - **Paged nodes**: each node packs up to `node_page_size` slots and is
//!   the unit of I/O. A full page splits around its median: the page keeps
//!   the median slot and the halves become fresh red siblings.
//! - **Two-level cache**: a RID→page map plus a sorted list of *entry
//!   points* — resident anchors that answer range hits with zero reads and
//!   bound how far a cold lookup has to travel.
//! - **Lazy everything**: pages load on demand, and a loaded page decodes a
//!   slot's key or value only when first touched.
//! - **Explicit commits**: mutations accumulate in a commit buffer; a flush
//!   writes children before parents so provisional identities resolve to
//!   final ones, then patches every reference.
//! - **Self-optimizing**: every `optimize_threshold` calls (and at every
//!   lazy save) the tree disconnects cold, clean, non-anchor pages past a
//!   configurable in-memory depth.
//!
//! ## Quick Start
//!
//! ```ignore
//! use marbletree::{IndexKind, PropertyIndex, MemoryRecordStore, RecordId, TreeConfig};
//! use std::sync::Arc;
//!
//! let mut index = PropertyIndex::new(IndexKind::NotUnique, "by-name");
//! index.configure(Arc::new(MemoryRecordStore::new()), TreeConfig::default())?;
//! index.open(None)?;
//!
//! index.put("alice", RecordId::new(10, 1))?;
//! index.put("alice", RecordId::new(10, 2))?;
//! assert_eq!(index.get("alice")?.len(), 2);
//! index.flush()?;
//! ```
//!
//! ## Module Overview
//!
//! - [`rid`]: record identities and the provisional/final lifecycle
//! - [`store`]: the record-store contract and the in-memory implementation
//! - [`codec`]: key/value codecs registered by name
//! - [`page`]: node pages with lazy slots and the bit-exact wire layout
//! - [`tree`]: the tree engine and its public wrapper
//! - [`cache`]: node arena, RID cache, and entry points
//! - [`commit`]: the dirty set and the provisional-RID flush
//! - [`lifecycle`]: transaction events and observers
//! - [`index`]: the three-flavor index facade
//! - [`config`]: tunables and defaults

pub mod cache;
pub mod codec;
pub mod commit;
pub mod config;
pub mod encoding;
pub mod index;
pub mod lifecycle;
pub mod page;
pub mod rid;
pub mod store;
pub mod tree;

pub use codec::{BytesCodec, Codec, CodecRegistry, I64Codec, RidCodec, RidListCodec, StringCodec};
pub use commit::FlushStats;
pub use config::TreeConfig;
pub use index::{is_duplicate_key, DuplicateKey, IndexKind, IndexState, PropertyIndex};
pub use lifecycle::{TransactionContext, TxEvent, TxObserver};
pub use rid::{RecordId, RidList};
pub use store::{MemoryRecordStore, RecordStore};
pub use tree::PersistentTree;
