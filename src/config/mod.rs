//! # Tree Configuration
//!
//! Runtime tunables for a tree instance plus the crate-wide defaults in
//! [`constants`]. A [`TreeConfig`] is validated once at construction; the
//! engine reads it without further checks.

pub mod constants;

pub use constants::*;

use eyre::{ensure, Result};

/// Tunables recognized by the tree engine.
///
/// | field | effect |
/// |---|---|
/// | `node_page_size` | slots per node page |
/// | `load_factor` | reserved capacity factor for slot vectors |
/// | `entry_points_size` | target count of descent anchors |
/// | `optimize_threshold` | usage-counter trigger for optimize; 0 disables |
/// | `optimize_entrypoints_factor` | in-memory depth limit multiplier |
/// | `max_updates_before_save` | lazy-save cadence; 0 disables, 1 is eager |
/// | `runtime_checks` | verify structural invariants after every mutation |
#[derive(Debug, Clone, PartialEq)]
pub struct TreeConfig {
    pub node_page_size: u16,
    pub load_factor: f32,
    pub entry_points_size: usize,
    pub optimize_threshold: u64,
    pub optimize_entrypoints_factor: f32,
    pub max_updates_before_save: u32,
    pub runtime_checks: bool,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            node_page_size: DEFAULT_NODE_PAGE_SIZE,
            load_factor: DEFAULT_LOAD_FACTOR,
            entry_points_size: DEFAULT_ENTRY_POINTS_SIZE,
            optimize_threshold: DEFAULT_OPTIMIZE_THRESHOLD,
            optimize_entrypoints_factor: DEFAULT_OPTIMIZE_ENTRYPOINTS_FACTOR,
            max_updates_before_save: DEFAULT_MAX_UPDATES_BEFORE_SAVE,
            runtime_checks: false,
        }
    }
}

impl TreeConfig {
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.node_page_size >= MIN_NODE_PAGE_SIZE,
            "node_page_size {} below minimum {}",
            self.node_page_size,
            MIN_NODE_PAGE_SIZE
        );
        ensure!(
            self.load_factor > 0.0 && self.load_factor <= 1.0,
            "load_factor {} outside (0, 1]",
            self.load_factor
        );
        ensure!(
            self.entry_points_size >= 1,
            "entry_points_size must be at least 1"
        );
        ensure!(
            self.optimize_entrypoints_factor > 0.0,
            "optimize_entrypoints_factor {} must be positive",
            self.optimize_entrypoints_factor
        );
        Ok(())
    }

    /// In-memory depth at which the optimize pass starts disconnecting.
    pub fn optimize_depth_limit(&self) -> usize {
        let limit = (self.entry_points_size as f32 * self.optimize_entrypoints_factor) as usize;
        limit.max(1)
    }

    /// Initial capacity of a new page's slot vectors.
    pub fn slot_capacity(&self) -> usize {
        ((self.node_page_size as f32 * self.load_factor) as usize).max(1)
    }
}
