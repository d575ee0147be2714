//! # Commit Buffer
//!
//! The explicit dirty set. Every mutation that dirties a page also inserts
//! its arena id here; a flush drains the set and writes pages out through
//! the record store.
//!
//! ## Write Ordering
//!
//! A page created in memory carries a provisional identity until its first
//! `create`. A page cannot be durably referenced while any of its neighbors
//! still hold a provisional identity, so the flush writes children before
//! parents: saving a page first recurses into resident neighbors whose
//! identity is still provisional (a per-flush visiting set breaks the
//! parent↔child cycle), then refreshes its own link RIDs and writes itself.
//!
//! When a `create` assigns the final identity, resident neighbors whose
//! stored links still name the old provisional identity are patched and
//! re-marked dirty. Those fix-ups cascade, so the drain loop repeats until a
//! pass produces no new dirty pages — in practice the second pass settles.
//! Updates are idempotent under the final identity, which is what makes a
//! failed flush safely retryable.

use eyre::{ensure, Result, WrapErr};
use hashbrown::HashSet;
use std::sync::Arc;
use tracing::{debug, trace, warn};

use crate::cache::NodeId;
use crate::config::MAX_FLUSH_PASSES;
use crate::tree::core::TreeCore;

/// Insertion-ordered set of pages awaiting write-out.
pub struct CommitBuffer {
    order: Vec<NodeId>,
    set: HashSet<NodeId>,
}

impl CommitBuffer {
    pub fn new() -> Self {
        Self {
            order: Vec::new(),
            set: HashSet::new(),
        }
    }

    pub fn insert(&mut self, id: NodeId) {
        if self.set.insert(id) {
            self.order.push(id);
        }
    }

    pub fn remove(&mut self, id: NodeId) {
        if self.set.remove(&id) {
            self.order.retain(|candidate| *candidate != id);
        }
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.set.contains(&id)
    }

    /// Take the current work list, leaving the buffer empty.
    pub fn drain(&mut self) -> Vec<NodeId> {
        self.set.clear();
        std::mem::take(&mut self.order)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.set.clear();
    }
}

impl Default for CommitBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// What a flush did, mostly for tests and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FlushStats {
    pub pages_written: usize,
    pub passes: usize,
}

impl<K, V> TreeCore<K, V>
where
    K: Ord + Clone,
    V: Clone,
{
    /// Drain the commit buffer until it stays empty, then write the
    /// descriptor if the tree shape changed.
    pub(crate) fn flush(&mut self) -> Result<FlushStats> {
        let mut stats = FlushStats::default();

        while !self.pending.is_empty() {
            stats.passes += 1;
            ensure!(
                stats.passes <= MAX_FLUSH_PASSES,
                "flush did not settle after {} passes; a link cycle is likely",
                MAX_FLUSH_PASSES
            );

            let work = self.pending.drain();
            for (position, id) in work.iter().enumerate() {
                let id = *id;
                if !self.arena.contains(id) {
                    // Deleted after it was marked.
                    continue;
                }
                if !self.arena.node(id)?.is_dirty() {
                    continue;
                }
                let mut visiting = HashSet::new();
                match self.save_node(id, &mut visiting) {
                    Ok(written) => stats.pages_written += written,
                    Err(error) => {
                        // Unacknowledged pages stay buffered so the flush
                        // can be retried; writes are idempotent under their
                        // final identity.
                        for rest in &work[position..] {
                            let still_dirty = self
                                .arena
                                .node(*rest)
                                .map(|node| node.is_dirty())
                                .unwrap_or(false);
                            if still_dirty {
                                self.pending.insert(*rest);
                            }
                        }
                        return Err(error);
                    }
                }
            }
        }

        if self.descriptor_dirty {
            if let Some(root) = self.root {
                self.descriptor.root_rid = self.arena.node(root)?.self_rid;
            }
            self.descriptor.last_page_size = self.config.node_page_size;
            self.save_descriptor()?;
            self.descriptor_dirty = false;
        }

        if stats.pages_written > 0 {
            debug!(
                pages = stats.pages_written,
                passes = stats.passes,
                "flushed commit buffer"
            );
        }
        Ok(stats)
    }

    /// Write one page, saving provisional neighbors first. Returns the
    /// number of pages written by this call including recursion.
    fn save_node(&mut self, id: NodeId, visiting: &mut HashSet<NodeId>) -> Result<usize> {
        if !visiting.insert(id) {
            return Ok(0);
        }

        let mut written = 0;
        let neighbors = {
            let node = self.arena.node(id)?;
            [node.parent, node.left, node.right]
        };
        for neighbor in neighbors.into_iter().flatten() {
            let provisional = self
                .arena
                .node(neighbor)
                .map(|node| node.self_rid.is_provisional())
                .unwrap_or(false);
            if provisional && !visiting.contains(&neighbor) {
                written += self.save_node(neighbor, visiting)?;
            }
        }

        self.refresh_link_rids(id)?;

        let bytes = {
            let key_codec = Arc::clone(&self.key_codec);
            let value_codec = Arc::clone(&self.value_codec);
            self.arena
                .node_mut(id)?
                .serialize(&*key_codec, &*value_codec)?
        };
        let rid = self.arena.node(id)?.self_rid;

        if rid.is_provisional() {
            let final_rid = self
                .store
                .create(&bytes)
                .wrap_err("creating tree node record")?;
            {
                let node = self.arena.node_mut(id)?;
                node.self_rid = final_rid;
                node.clear_dirty();
            }
            self.cache.rekey(rid, final_rid);
            self.propagate_final_rid(id, rid)?;
            if Some(id) == self.root {
                self.descriptor.root_rid = final_rid;
                self.descriptor_dirty = true;
            }
            trace!(%rid, %final_rid, "assigned final identity to tree node");
        } else {
            self.store
                .update(rid, &bytes)
                .wrap_err_with(|| format!("updating tree node record {}", rid))?;
            self.arena.node_mut(id)?.clear_dirty();
        }

        visiting.remove(&id);
        Ok(written + 1)
    }

    /// Copy resident neighbors' current identities into this page's link
    /// RIDs before serializing it.
    fn refresh_link_rids(&mut self, id: NodeId) -> Result<()> {
        let (parent, left, right) = {
            let node = self.arena.node(id)?;
            (node.parent, node.left, node.right)
        };
        let parent_rid = match parent {
            Some(parent) => Some(self.arena.node(parent)?.self_rid),
            None => None,
        };
        let left_rid = match left {
            Some(left) => Some(self.arena.node(left)?.self_rid),
            None => None,
        };
        let right_rid = match right {
            Some(right) => Some(self.arena.node(right)?.self_rid),
            None => None,
        };

        let node = self.arena.node_mut(id)?;
        if let Some(rid) = parent_rid {
            node.parent_rid = rid;
        }
        if let Some(rid) = left_rid {
            node.left_rid = rid;
        }
        if let Some(rid) = right_rid {
            node.right_rid = rid;
        }
        Ok(())
    }

    /// After `id` received its final identity, patch resident neighbors that
    /// still reference the old provisional one and re-mark them dirty so the
    /// next pass rewrites them.
    fn propagate_final_rid(&mut self, id: NodeId, old: crate::rid::RecordId) -> Result<()> {
        let new = self.arena.node(id)?.self_rid;
        let (parent, left, right) = {
            let node = self.arena.node(id)?;
            (node.parent, node.left, node.right)
        };

        if let Some(parent) = parent {
            let mut changed = false;
            {
                let page = self.arena.node_mut(parent)?;
                if page.left_rid == old {
                    page.left_rid = new;
                    changed = true;
                }
                if page.right_rid == old {
                    page.right_rid = new;
                    changed = true;
                }
                if changed {
                    page.mark_dirty();
                }
            }
            if changed {
                self.pending.insert(parent);
            }
        }

        for child in [left, right].into_iter().flatten() {
            let mut changed = false;
            {
                let page = self.arena.node_mut(child)?;
                if page.parent_rid == old {
                    page.parent_rid = new;
                    page.mark_dirty();
                    changed = true;
                }
            }
            if changed {
                self.pending.insert(child);
            }
        }
        Ok(())
    }

    fn save_descriptor(&mut self) -> Result<()> {
        let bytes = self.descriptor.encode()?;
        match self.descriptor_rid {
            Some(rid) => {
                self.store
                    .update(rid, &bytes)
                    .wrap_err_with(|| format!("updating tree descriptor {}", rid))?;
            }
            None => {
                let rid = self
                    .store
                    .create(&bytes)
                    .wrap_err("creating tree descriptor record")?;
                self.descriptor_rid = Some(rid);
            }
        }
        Ok(())
    }

    /// Post-commit sweep: any cache entry still keyed by a provisional
    /// identity is rekeyed to the node's current one. Returns how many
    /// entries moved.
    pub(crate) fn rekey_provisional(&mut self) -> usize {
        let stale = self.cache.provisional_keys();
        let mut moved = 0;
        for old in stale {
            let current = self
                .cache
                .get(&old)
                .and_then(|id| self.arena.node(id).ok().map(|node| node.self_rid));
            match current {
                Some(rid) if !rid.is_provisional() => {
                    self.cache.rekey(old, rid);
                    moved += 1;
                }
                _ => warn!(%old, "cache entry still provisional after commit"),
            }
        }
        moved
    }
}
