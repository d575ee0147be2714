//! # Optimize Pass
//!
//! Trims the resident working set back toward the entry-point anchors. Any
//! node whose in-memory depth reaches `entry_points_size ×
//! optimize_entrypoints_factor` is disconnected — links severed both ways,
//! cache entry dropped, arena slot freed — unless it is pinned: the root,
//! a dirty page, or an entry point. Pinned nodes inside a disconnected
//! subtree stay resident with their parent link cut; lazy loading stitches
//! them back in when a descent next passes by.
//!
//! The pass is a no-op while the resident tree is shallower than the limit,
//! which keeps warm workloads unaffected.

use eyre::Result;
use tracing::debug;

use crate::cache::NodeId;
use crate::tree::core::TreeCore;

impl<K, V> TreeCore<K, V>
where
    K: Ord + Clone,
    V: Clone,
{
    /// Run one eviction pass. Returns the number of pages disconnected.
    pub(crate) fn optimize(&mut self) -> Result<usize> {
        let root = match self.root {
            Some(root) => root,
            None => return Ok(0),
        };
        let limit = self.config.optimize_depth_limit();
        let depth = self.max_depth_in_memory(root, 0);
        if depth < limit {
            return Ok(0);
        }

        let freed = self.sweep(root, 0, limit)?;
        debug!(
            freed,
            depth,
            limit,
            resident = self.arena.len(),
            "optimize disconnected cold pages"
        );
        Ok(freed)
    }

    pub(crate) fn max_depth_in_memory(&self, id: NodeId, depth: usize) -> usize {
        let node = match self.arena.node(id) {
            Ok(node) => node,
            Err(_) => return depth,
        };
        let mut max = depth;
        if let Some(left) = node.left {
            max = max.max(self.max_depth_in_memory(left, depth + 1));
        }
        if let Some(right) = node.right {
            max = max.max(self.max_depth_in_memory(right, depth + 1));
        }
        max
    }

    fn is_pinned(&self, id: NodeId) -> bool {
        Some(id) == self.root
            || self.entry_points.contains(id)
            || self.arena.node(id).map(|node| node.is_dirty()).unwrap_or(true)
    }

    fn sweep(&mut self, id: NodeId, depth: usize, limit: usize) -> Result<usize> {
        if depth >= limit && !self.is_pinned(id) {
            return self.disconnect(id);
        }
        let (left, right) = {
            let node = self.arena.node(id)?;
            (node.left, node.right)
        };
        let mut freed = 0;
        if let Some(left) = left {
            freed += self.sweep(left, depth + 1, limit)?;
        }
        if let Some(right) = right {
            freed += self.sweep(right, depth + 1, limit)?;
        }
        Ok(freed)
    }

    /// Drop this subtree from memory. Pinned descendants survive with their
    /// parent link severed.
    fn disconnect(&mut self, id: NodeId) -> Result<usize> {
        let (left, right, parent) = {
            let node = self.arena.node(id)?;
            (node.left, node.right, node.parent)
        };

        let mut freed = 0;
        for child in [left, right].into_iter().flatten() {
            if self.is_pinned(child) {
                self.arena.node_mut(child)?.parent = None;
            } else {
                freed += self.disconnect(child)?;
            }
        }

        if let Some(parent) = parent {
            if let Ok(page) = self.arena.node_mut(parent) {
                if page.left == Some(id) {
                    page.left = None;
                } else if page.right == Some(id) {
                    page.right = None;
                }
            }
        }

        let page = self.arena.remove(id)?;
        self.cache.remove(&page.self_rid);
        Ok(freed + 1)
    }
}
