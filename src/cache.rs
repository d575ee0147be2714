//! # Node Arena, Cache, and Entry Points
//!
//! The in-memory half of the tree. Resident pages live in a dense
//! [`NodeArena`] addressed by [`NodeId`]; pages refer to each other by
//! `Option<NodeId>` instead of owned handles, so there are no reference
//! cycles to manage and eviction is a slot reclaim.
//!
//! [`NodeCache`] maps record identities to arena slots: every lazy load
//! inserts, every page deletion evicts, and a flush rekeys entries whose
//! provisional identity just became final.
//!
//! [`EntryPoints`] is the second cache level: a short list of resident
//! anchor nodes sorted by first key. A lookup either lands inside an
//! anchor's key range (zero reads) or picks the closest anchor as a finger
//! for the descent to start from.

use eyre::{ensure, eyre, Result};
use hashbrown::HashMap;
use std::fmt;

use crate::codec::Codec;
use crate::config::BINARY_SEARCH_THRESHOLD;
use crate::page::NodePage;
use crate::rid::RecordId;

/// Arena index of a resident page.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(u32);

impl NodeId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Dense slab of resident pages with slot reuse.
pub struct NodeArena<K, V> {
    slots: Vec<Option<NodePage<K, V>>>,
    free: Vec<u32>,
}

impl<K, V> NodeArena<K, V> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }

    pub fn insert(&mut self, page: NodePage<K, V>) -> NodeId {
        match self.free.pop() {
            Some(index) => {
                self.slots[index as usize] = Some(page);
                NodeId(index)
            }
            None => {
                self.slots.push(Some(page));
                NodeId((self.slots.len() - 1) as u32)
            }
        }
    }

    pub fn node(&self, id: NodeId) -> Result<&NodePage<K, V>> {
        self.slots
            .get(id.index())
            .and_then(Option::as_ref)
            .ok_or_else(|| eyre!("node {:?} is not resident", id))
    }

    pub fn node_mut(&mut self, id: NodeId) -> Result<&mut NodePage<K, V>> {
        self.slots
            .get_mut(id.index())
            .and_then(Option::as_mut)
            .ok_or_else(|| eyre!("node {:?} is not resident", id))
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.slots
            .get(id.index())
            .map(Option::is_some)
            .unwrap_or(false)
    }

    pub fn remove(&mut self, id: NodeId) -> Result<NodePage<K, V>> {
        let page = self
            .slots
            .get_mut(id.index())
            .and_then(Option::take)
            .ok_or_else(|| eyre!("node {:?} is not resident", id))?;
        self.free.push(id.0);
        Ok(page)
    }

    /// Number of resident pages.
    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
    }
}

impl<K, V> Default for NodeArena<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

/// Identity-to-slot map for resident pages.
pub struct NodeCache {
    map: HashMap<RecordId, NodeId>,
}

impl NodeCache {
    pub fn new() -> Self {
        Self {
            map: HashMap::new(),
        }
    }

    pub fn insert(&mut self, rid: RecordId, id: NodeId) {
        self.map.insert(rid, id);
    }

    pub fn get(&self, rid: &RecordId) -> Option<NodeId> {
        self.map.get(rid).copied()
    }

    pub fn remove(&mut self, rid: &RecordId) -> Option<NodeId> {
        self.map.remove(rid)
    }

    /// Move an entry from a provisional key to its freshly assigned final
    /// identity.
    pub fn rekey(&mut self, old: RecordId, new: RecordId) {
        if let Some(id) = self.map.remove(&old) {
            self.map.insert(new, id);
        }
    }

    /// Entries still keyed by a provisional identity. The post-commit hook
    /// uses this to verify the flush left none behind.
    pub fn provisional_keys(&self) -> Vec<RecordId> {
        self.map
            .keys()
            .filter(|rid| rid.is_provisional())
            .copied()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn clear(&mut self) {
        self.map.clear();
    }
}

impl Default for NodeCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Where a lookup should enter the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Anchor {
    /// No entry points; start at the root.
    None,
    /// The key lies inside this node's own slot range.
    RangeHit(NodeId),
    /// Closest anchor; the descent fingers up from here first.
    Finger(NodeId),
}

/// Sorted list of anchor nodes. Small by construction (`entry_points_size`).
pub struct EntryPoints {
    ids: Vec<NodeId>,
}

impl EntryPoints {
    pub fn new() -> Self {
        Self { ids: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.ids.contains(&id)
    }

    pub fn ids(&self) -> &[NodeId] {
        &self.ids
    }

    pub fn remove(&mut self, id: NodeId) {
        self.ids.retain(|candidate| *candidate != id);
    }

    pub fn clear(&mut self) {
        self.ids.clear();
    }

    /// Add `id` keeping the list sorted by first key. No-op when already a
    /// member or when the node has no slots to anchor on.
    pub fn promote<K, V>(
        &mut self,
        id: NodeId,
        arena: &mut NodeArena<K, V>,
        codec: &dyn Codec<K>,
    ) -> Result<bool>
    where
        K: Ord + Clone,
    {
        if self.contains(id) {
            return Ok(false);
        }
        if arena.node(id)?.count() == 0 {
            return Ok(false);
        }
        let first = arena.node_mut(id)?.key_at(0, codec)?.clone();

        let mut position = self.ids.len();
        for (index, candidate) in self.ids.iter().enumerate() {
            let candidate_first = arena.node(*candidate)?.key_cloned(0, codec)?;
            if first < candidate_first {
                position = index;
                break;
            }
        }
        self.ids.insert(position, id);
        Ok(true)
    }

    /// Re-sort after splits or deletes changed members' first keys.
    pub fn resort<K, V>(&mut self, arena: &NodeArena<K, V>, codec: &dyn Codec<K>) -> Result<()>
    where
        K: Ord + Clone,
    {
        let mut keyed = Vec::with_capacity(self.ids.len());
        for id in &self.ids {
            ensure!(
                arena.contains(*id),
                "entry point {:?} is not resident",
                *id
            );
            let node = arena.node(*id)?;
            if node.count() == 0 {
                continue;
            }
            keyed.push((node.key_cloned(0, codec)?, *id));
        }
        keyed.sort_by(|a, b| a.0.cmp(&b.0));
        self.ids = keyed.into_iter().map(|(_, id)| id).collect();
        Ok(())
    }

    /// Pick the best anchor for `key`: a range hit when some anchor's
    /// `[first, last]` contains it, otherwise the largest anchor whose first
    /// key is below it (falling back to the smallest anchor). Linear scan
    /// below the threshold, binary search above it.
    pub fn best_anchor<K, V>(
        &self,
        key: &K,
        arena: &NodeArena<K, V>,
        codec: &dyn Codec<K>,
    ) -> Result<Anchor>
    where
        K: Ord + Clone,
    {
        if self.ids.is_empty() {
            return Ok(Anchor::None);
        }

        if self.ids.len() < BINARY_SEARCH_THRESHOLD {
            let mut best: Option<NodeId> = None;
            for id in &self.ids {
                let node = arena.node(*id)?;
                if node.count() == 0 {
                    continue;
                }
                let first = node.key_cloned(0, codec)?;
                if *key < first {
                    return Ok(Anchor::Finger(best.unwrap_or(*id)));
                }
                let last = node.key_cloned(node.count() - 1, codec)?;
                if *key <= last {
                    return Ok(Anchor::RangeHit(*id));
                }
                best = Some(*id);
            }
            return Ok(match best {
                Some(id) => Anchor::Finger(id),
                None => Anchor::None,
            });
        }

        // Binary search for the largest anchor with first key <= key.
        let mut low = 0usize;
        let mut high = self.ids.len();
        while low < high {
            let mid = (low + high) / 2;
            let first = arena.node(self.ids[mid])?.key_cloned(0, codec)?;
            if first <= *key {
                low = mid + 1;
            } else {
                high = mid;
            }
        }
        if low == 0 {
            return Ok(Anchor::Finger(self.ids[0]));
        }
        let id = self.ids[low - 1];
        let node = arena.node(id)?;
        let last = node.key_cloned(node.count() - 1, codec)?;
        if *key <= last {
            Ok(Anchor::RangeHit(id))
        } else {
            Ok(Anchor::Finger(id))
        }
    }
}

impl Default for EntryPoints {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::I64Codec;
    use crate::page::Color;

    fn page_with_keys(keys: &[i64]) -> NodePage<i64, i64> {
        let mut page = NodePage::new(RecordId::provisional(-2), 64, 8, Color::Black);
        for (index, key) in keys.iter().enumerate() {
            page.insert_at(index, *key, *key * 10).unwrap();
        }
        page
    }

    #[test]
    fn arena_reuses_freed_slots() {
        let mut arena: NodeArena<i64, i64> = NodeArena::new();
        let a = arena.insert(page_with_keys(&[1]));
        let b = arena.insert(page_with_keys(&[2]));
        assert_eq!(arena.len(), 2);

        arena.remove(a).unwrap();
        assert_eq!(arena.len(), 1);
        assert!(!arena.contains(a));

        let c = arena.insert(page_with_keys(&[3]));
        assert_eq!(c, a, "freed slot should be reused");
        assert!(arena.contains(b));
        assert_eq!(arena.len(), 2);
    }

    #[test]
    fn arena_reports_missing_nodes() {
        let mut arena: NodeArena<i64, i64> = NodeArena::new();
        let id = arena.insert(page_with_keys(&[1]));
        arena.remove(id).unwrap();
        assert!(arena.node(id).is_err());
        assert!(arena.remove(id).is_err());
    }

    #[test]
    fn cache_rekey_moves_entry() {
        let mut cache = NodeCache::new();
        let mut arena: NodeArena<i64, i64> = NodeArena::new();
        let id = arena.insert(page_with_keys(&[1]));

        let provisional = RecordId::provisional(-2);
        cache.insert(provisional, id);
        assert_eq!(cache.provisional_keys(), vec![provisional]);

        let final_rid = RecordId::new(1, 0);
        cache.rekey(provisional, final_rid);
        assert_eq!(cache.get(&final_rid), Some(id));
        assert_eq!(cache.get(&provisional), None);
        assert!(cache.provisional_keys().is_empty());
    }

    fn build_anchors(ranges: &[&[i64]]) -> (NodeArena<i64, i64>, EntryPoints) {
        let mut arena = NodeArena::new();
        let mut entries = EntryPoints::new();
        for keys in ranges {
            let id = arena.insert(page_with_keys(keys));
            entries.promote(id, &mut arena, &I64Codec).unwrap();
        }
        (arena, entries)
    }

    #[test]
    fn promote_keeps_sorted_order() {
        let (arena, entries) = build_anchors(&[&[50, 60], &[10, 20], &[30, 40]]);
        let firsts: Vec<i64> = entries
            .ids()
            .iter()
            .map(|id| arena.node(*id).unwrap().key_cloned(0, &I64Codec).unwrap())
            .collect();
        assert_eq!(firsts, vec![10, 30, 50]);
    }

    #[test]
    fn promote_is_idempotent() {
        let mut arena = NodeArena::new();
        let mut entries = EntryPoints::new();
        let id = arena.insert(page_with_keys(&[1, 2]));
        assert!(entries.promote(id, &mut arena, &I64Codec).unwrap());
        assert!(!entries.promote(id, &mut arena, &I64Codec).unwrap());
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn best_anchor_range_hit() {
        let (arena, entries) = build_anchors(&[&[10, 20], &[30, 40], &[50, 60]]);
        match entries.best_anchor(&35, &arena, &I64Codec).unwrap() {
            Anchor::RangeHit(id) => {
                assert_eq!(
                    arena.node(id).unwrap().key_cloned(0, &I64Codec).unwrap(),
                    30
                );
            }
            other => panic!("expected range hit, got {:?}", other),
        }
    }

    #[test]
    fn best_anchor_between_ranges_fingers_predecessor() {
        let (arena, entries) = build_anchors(&[&[10, 20], &[30, 40]]);
        match entries.best_anchor(&25, &arena, &I64Codec).unwrap() {
            Anchor::Finger(id) => {
                assert_eq!(
                    arena.node(id).unwrap().key_cloned(0, &I64Codec).unwrap(),
                    10
                );
            }
            other => panic!("expected finger, got {:?}", other),
        }
    }

    #[test]
    fn best_anchor_below_all_fingers_first() {
        let (arena, entries) = build_anchors(&[&[10, 20], &[30, 40]]);
        match entries.best_anchor(&5, &arena, &I64Codec).unwrap() {
            Anchor::Finger(id) => {
                assert_eq!(
                    arena.node(id).unwrap().key_cloned(0, &I64Codec).unwrap(),
                    10
                );
            }
            other => panic!("expected finger, got {:?}", other),
        }
    }

    #[test]
    fn best_anchor_binary_path_matches_linear() {
        // Enough anchors to cross BINARY_SEARCH_THRESHOLD.
        let ranges: Vec<Vec<i64>> = (0..16).map(|i| vec![i * 100, i * 100 + 50]).collect();
        let slices: Vec<&[i64]> = ranges.iter().map(|r| r.as_slice()).collect();
        let (arena, entries) = build_anchors(&slices);

        for (key, expected_first) in [(125i64, 100), (150, 100), (199, 100), (1550, 1500)] {
            let anchor = entries.best_anchor(&key, &arena, &I64Codec).unwrap();
            let id = match anchor {
                Anchor::RangeHit(id) | Anchor::Finger(id) => id,
                Anchor::None => panic!("expected an anchor for {}", key),
            };
            assert_eq!(
                arena.node(id).unwrap().key_cloned(0, &I64Codec).unwrap(),
                expected_first,
                "key {}",
                key
            );
        }
    }

    #[test]
    fn empty_entry_points_return_none() {
        let arena: NodeArena<i64, i64> = NodeArena::new();
        let entries = EntryPoints::new();
        assert_eq!(
            entries.best_anchor(&1, &arena, &I64Codec).unwrap(),
            Anchor::None
        );
    }
}
