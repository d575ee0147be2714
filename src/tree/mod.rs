//! # Persistent Tree
//!
//! [`PersistentTree`] is the public face of the engine: a sorted map over a
//! record store, backed by the paged red-black core in [`core`], with the
//! two-level cache, commit buffer, and optimize pass behind it.
//!
//! ## Locking
//!
//! One `parking_lot::RwLock` guards the whole core, single-writer
//! many-reader. `get` and `contains_key` first run a read-locked probe that
//! never mutates — unmaterialized slots are decoded ephemerally — and only
//! restart under the write lock when the path leaves memory. Every mutating
//! operation takes the write lock for its full duration, so intermediate
//! states are never observable from another thread.
//!
//! ## Counters
//!
//! Two relaxed atomics live outside the lock: the usage counter that
//! triggers the optimize pass every `optimize_threshold` public calls, and
//! the update counter that drives the lazy-save cadence
//! (`max_updates_before_save`).

pub mod check;
pub mod core;
pub mod descriptor;
pub mod optimize;
pub mod rebalance;

use eyre::Result;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::codec::Codec;
use crate::commit::FlushStats;
use crate::config::TreeConfig;
use crate::lifecycle::TxObserver;
use crate::rid::RecordId;
use crate::store::RecordStore;
use crate::tree::core::{Probe, TreeCore};

pub struct PersistentTree<K, V> {
    core: RwLock<TreeCore<K, V>>,
    usage: AtomicU64,
    updates: AtomicU64,
}

impl<K, V> PersistentTree<K, V>
where
    K: Ord + Clone,
    V: Clone,
{
    /// New empty tree. Nothing is written until the first flush.
    pub fn create(
        store: Arc<dyn RecordStore>,
        config: TreeConfig,
        key_codec: Arc<dyn Codec<K>>,
        value_codec: Arc<dyn Codec<V>>,
    ) -> Result<Self> {
        Ok(Self {
            core: RwLock::new(TreeCore::new(store, config, key_codec, value_codec)?),
            usage: AtomicU64::new(0),
            updates: AtomicU64::new(0),
        })
    }

    /// Reopen a stored tree from its descriptor record. The root page loads
    /// lazily on first access.
    pub fn open(
        store: Arc<dyn RecordStore>,
        config: TreeConfig,
        descriptor_rid: RecordId,
        key_codec: Arc<dyn Codec<K>>,
        value_codec: Arc<dyn Codec<V>>,
    ) -> Result<Self> {
        Ok(Self {
            core: RwLock::new(TreeCore::open(
                store,
                config,
                descriptor_rid,
                key_codec,
                value_codec,
            )?),
            usage: AtomicU64::new(0),
            updates: AtomicU64::new(0),
        })
    }

    pub fn get(&self, key: &K) -> Result<Option<V>> {
        self.bump_usage()?;
        {
            let core = self.core.read();
            if let Probe::Resident(value) = core.get_resident(key)? {
                return Ok(value);
            }
        }
        self.core.write().get(key)
    }

    pub fn contains_key(&self, key: &K) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Insert or overwrite, returning the previous value.
    pub fn put(&self, key: K, value: V) -> Result<Option<V>> {
        self.bump_usage()?;
        let old = {
            let mut core = self.core.write();
            let old = core.put(key, value)?;
            if core.config.runtime_checks {
                core.check_structure()?;
            }
            old
        };
        self.note_updates(1)?;
        Ok(old)
    }

    /// Bulk insert under one lock acquisition.
    pub fn put_all<I>(&self, entries: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
    {
        self.bump_usage()?;
        let mut count = 0u64;
        {
            let mut core = self.core.write();
            for (key, value) in entries {
                core.put(key, value)?;
                count += 1;
            }
            if core.config.runtime_checks {
                core.check_structure()?;
            }
        }
        self.note_updates(count)?;
        Ok(())
    }

    /// Remove a key, returning its value.
    pub fn remove(&self, key: &K) -> Result<Option<V>> {
        self.bump_usage()?;
        let old = {
            let mut core = self.core.write();
            let old = core.remove(key)?;
            if core.config.runtime_checks {
                core.check_structure()?;
            }
            old
        };
        self.note_updates(1)?;
        Ok(old)
    }

    pub fn size(&self) -> i64 {
        self.core.read().descriptor.size
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub fn first_key(&self) -> Result<Option<K>> {
        let mut core = self.core.write();
        match core.first_entry()? {
            Some(entry) => Ok(Some(core.key_at_entry(entry)?)),
            None => Ok(None),
        }
    }

    pub fn last_key(&self) -> Result<Option<K>> {
        let mut core = self.core.write();
        match core.last_entry()? {
            Some(entry) => Ok(Some(core.key_at_entry(entry)?)),
            None => Ok(None),
        }
    }

    /// Smallest key strictly greater than `key`.
    pub fn successor(&self, key: &K) -> Result<Option<K>> {
        self.core.write().successor(key)
    }

    /// Largest key strictly smaller than `key`.
    pub fn predecessor(&self, key: &K) -> Result<Option<K>> {
        self.core.write().predecessor(key)
    }

    /// All keys in ascending order.
    pub fn keys(&self) -> Result<Vec<K>> {
        self.core.write().keys()
    }

    /// Delete every page from the record store and reset to empty, flushing
    /// the (now empty) tree state.
    pub fn clear(&self) -> Result<()> {
        let mut core = self.core.write();
        core.clear()?;
        core.flush()?;
        Ok(())
    }

    /// Write all dirty pages and, if the shape changed, the descriptor.
    pub fn flush(&self) -> Result<FlushStats> {
        self.core.write().flush()
    }

    /// Run the eviction pass and reset the usage counter.
    pub fn optimize(&self) -> Result<usize> {
        self.usage.store(0, Ordering::Relaxed);
        self.core.write().optimize()
    }

    /// Flush then optimize, the lazy-save combination.
    pub fn lazy_save(&self) -> Result<()> {
        self.usage.store(0, Ordering::Relaxed);
        let mut core = self.core.write();
        core.flush()?;
        core.optimize()?;
        Ok(())
    }

    /// Drop all buffered and resident state and reload the descriptor from
    /// the store. The rollback path.
    pub fn unload(&self) -> Result<()> {
        self.core.write().unload()
    }

    /// Identity of the descriptor record, once it has been written.
    pub fn descriptor_rid(&self) -> Option<RecordId> {
        self.core.read().descriptor_rid
    }

    pub fn root_rid(&self) -> RecordId {
        self.core.read().descriptor.root_rid
    }

    /// Resident page count (arena occupancy).
    pub fn resident_pages(&self) -> usize {
        self.core.read().arena.len()
    }

    pub fn cached_pages(&self) -> usize {
        self.core.read().cache.len()
    }

    pub fn entry_point_count(&self) -> usize {
        self.core.read().entry_points.len()
    }

    /// Pages sitting in the commit buffer.
    pub fn pending_pages(&self) -> usize {
        self.core.read().pending.len()
    }

    /// Cache entries still keyed by a provisional identity. Zero after a
    /// healthy flush.
    pub fn provisional_cached(&self) -> usize {
        self.core.read().cache.provisional_keys().len()
    }

    /// Full red-black validation, loading the entire tree. Test support.
    pub fn verify(&self) -> Result<()> {
        let mut core = self.core.write();
        core.check_structure()?;
        core.verify_red_black()?;
        Ok(())
    }

    fn bump_usage(&self) -> Result<()> {
        let threshold = self.core.read().config.optimize_threshold;
        let count = self.usage.fetch_add(1, Ordering::Relaxed) + 1;
        if threshold > 0 && count > threshold {
            self.usage.store(0, Ordering::Relaxed);
            self.core.write().optimize()?;
        }
        Ok(())
    }

    fn note_updates(&self, count: u64) -> Result<()> {
        let max = self.core.read().config.max_updates_before_save;
        if max == 0 || count == 0 {
            return Ok(());
        }
        let total = self.updates.fetch_add(count, Ordering::Relaxed) + count;
        if total >= max as u64 {
            self.updates.store(0, Ordering::Relaxed);
            self.lazy_save()?;
        }
        Ok(())
    }
}

impl<K, V> TxObserver for PersistentTree<K, V>
where
    K: Ord + Clone + Send + Sync,
    V: Clone + Send + Sync,
{
    fn on_before_commit(&self) -> Result<()> {
        self.flush()?;
        Ok(())
    }

    fn on_after_commit(&self) -> Result<()> {
        self.core.write().rekey_provisional();
        Ok(())
    }

    fn on_rollback(&self) -> Result<()> {
        self.unload()
    }

    fn on_close(&self) -> Result<()> {
        let mut core = self.core.write();
        core.flush()?;
        core.forget();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{I64Codec, StringCodec};
    use crate::store::MemoryRecordStore;
    use std::collections::BTreeMap;

    fn small_config(page_size: u16) -> TreeConfig {
        TreeConfig {
            node_page_size: page_size,
            entry_points_size: 8,
            optimize_threshold: 0,
            runtime_checks: true,
            ..TreeConfig::default()
        }
    }

    fn new_tree(page_size: u16) -> PersistentTree<i64, String> {
        let store = Arc::new(MemoryRecordStore::new());
        PersistentTree::create(
            store,
            small_config(page_size),
            Arc::new(I64Codec),
            Arc::new(StringCodec),
        )
        .unwrap()
    }

    #[test]
    fn empty_tree_reads_nothing() {
        let tree = new_tree(4);
        assert_eq!(tree.get(&1).unwrap(), None);
        assert_eq!(tree.size(), 0);
        assert_eq!(tree.first_key().unwrap(), None);
        assert_eq!(tree.last_key().unwrap(), None);
    }

    #[test]
    fn put_get_overwrite() {
        let tree = new_tree(4);
        assert_eq!(tree.put(1, "a".into()).unwrap(), None);
        assert_eq!(tree.put(1, "b".into()).unwrap(), Some("a".into()));
        assert_eq!(tree.get(&1).unwrap(), Some("b".into()));
        assert_eq!(tree.size(), 1);
    }

    #[test]
    fn split_shape_matches_median_promotion() {
        // page_size 4, keys 1..=5: one split, root keeps the median 3,
        // left leaf {1,2}, right leaf {4,5}.
        let tree = new_tree(4);
        for (key, value) in [(1, "a"), (2, "b"), (3, "c"), (4, "d"), (5, "e")] {
            tree.put(key, value.into()).unwrap();
        }

        assert_eq!(tree.get(&4).unwrap(), Some("d".into()));
        assert_eq!(tree.size(), 5);
        assert_eq!(tree.resident_pages(), 3);

        let core = tree.core.read();
        let root = core.root.unwrap();
        let root_page = core.arena.node(root).unwrap();
        assert_eq!(root_page.count(), 1);
        assert_eq!(root_page.key_cloned(0, &I64Codec).unwrap(), 3);

        let left = core.arena.node(root_page.left.unwrap()).unwrap();
        assert_eq!(
            (0..left.count())
                .map(|i| left.key_cloned(i, &I64Codec).unwrap())
                .collect::<Vec<_>>(),
            vec![1, 2]
        );
        let right = core.arena.node(root_page.right.unwrap()).unwrap();
        assert_eq!(
            (0..right.count())
                .map(|i| right.key_cloned(i, &I64Codec).unwrap())
                .collect::<Vec<_>>(),
            vec![4, 5]
        );
    }

    #[test]
    fn sorted_map_law_against_reference() {
        let tree = new_tree(4);
        let mut reference = BTreeMap::new();

        // Deterministic mixed workload.
        let mut state = 0x2545F4914F6CDD1Du64;
        for _ in 0..600 {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            let key = (state % 120) as i64;
            if state % 5 == 0 {
                assert_eq!(
                    tree.remove(&key).unwrap(),
                    reference.remove(&key),
                    "remove {}",
                    key
                );
            } else {
                let value = format!("v{}", state % 1000);
                assert_eq!(
                    tree.put(key, value.clone()).unwrap(),
                    reference.insert(key, value),
                    "put {}",
                    key
                );
            }
        }

        assert_eq!(tree.size() as usize, reference.len());
        for (key, value) in &reference {
            assert_eq!(tree.get(key).unwrap().as_ref(), Some(value), "get {}", key);
        }
        let keys: Vec<i64> = reference.keys().copied().collect();
        assert_eq!(tree.keys().unwrap(), keys);
        tree.verify().unwrap();
    }

    #[test]
    fn red_black_properties_hold_after_bulk_insert() {
        let tree = new_tree(4);
        for key in 0..500 {
            tree.put(key, format!("v{}", key)).unwrap();
        }
        tree.verify().unwrap();

        let tree = new_tree(4);
        for key in (0..500).rev() {
            tree.put(key, format!("v{}", key)).unwrap();
        }
        tree.verify().unwrap();
    }

    #[test]
    fn no_page_exceeds_its_page_size() {
        let tree = new_tree(4);
        for key in 0..300 {
            tree.put(key, "x".into()).unwrap();
        }
        let core = tree.core.read();
        let mut stack = vec![core.root.unwrap()];
        while let Some(id) = stack.pop() {
            let node = core.arena.node(id).unwrap();
            assert!(node.count() <= node.page_size() as usize);
            assert!(node.count() > 0);
            stack.extend(node.left);
            stack.extend(node.right);
        }
    }

    #[test]
    fn successor_and_predecessor() {
        let tree = new_tree(4);
        for key in [10, 20, 30, 40, 50] {
            tree.put(key, format!("v{}", key)).unwrap();
        }

        assert_eq!(tree.successor(&10).unwrap(), Some(20));
        assert_eq!(tree.successor(&15).unwrap(), Some(20));
        assert_eq!(tree.successor(&50).unwrap(), None);
        assert_eq!(tree.successor(&5).unwrap(), Some(10));
        assert_eq!(tree.predecessor(&50).unwrap(), Some(40));
        assert_eq!(tree.predecessor(&35).unwrap(), Some(30));
        assert_eq!(tree.predecessor(&10).unwrap(), None);
        assert_eq!(tree.first_key().unwrap(), Some(10));
        assert_eq!(tree.last_key().unwrap(), Some(50));
    }

    #[test]
    fn remove_everything_empties_the_tree() {
        let tree = new_tree(4);
        for key in 0..100 {
            tree.put(key, "x".into()).unwrap();
        }
        for key in 0..100 {
            assert!(tree.remove(&key).unwrap().is_some(), "remove {}", key);
            tree.verify().unwrap();
        }
        assert_eq!(tree.size(), 0);
        assert_eq!(tree.first_key().unwrap(), None);
        assert_eq!(tree.resident_pages(), 0);
    }

    #[test]
    fn clear_deletes_stored_pages() {
        let store = Arc::new(MemoryRecordStore::new());
        let tree: PersistentTree<i64, String> = PersistentTree::create(
            store.clone(),
            small_config(4),
            Arc::new(I64Codec),
            Arc::new(StringCodec),
        )
        .unwrap();

        for key in 0..50 {
            tree.put(key, "x".into()).unwrap();
        }
        tree.flush().unwrap();
        assert!(store.len() > 1);

        tree.clear().unwrap();
        assert_eq!(tree.size(), 0);
        // Only the descriptor remains.
        assert_eq!(store.len(), 1);
        assert_eq!(tree.get(&7).unwrap(), None);
    }

    #[test]
    fn read_path_answers_from_residency() {
        let tree = new_tree(4);
        for key in 0..20 {
            tree.put(key, format!("v{}", key)).unwrap();
        }
        // Everything resident: the read probe must answer without the write
        // path (observable as no change in residency).
        let before = tree.resident_pages();
        assert_eq!(tree.get(&13).unwrap(), Some("v13".into()));
        assert_eq!(tree.resident_pages(), before);
    }

    #[test]
    fn lazy_save_cadence_flushes_every_n_updates() {
        let store = Arc::new(MemoryRecordStore::new());
        let config = TreeConfig {
            max_updates_before_save: 5,
            ..small_config(4)
        };
        let tree: PersistentTree<i64, String> = PersistentTree::create(
            store.clone(),
            config,
            Arc::new(I64Codec),
            Arc::new(StringCodec),
        )
        .unwrap();

        for key in 0..4 {
            tree.put(key, "x".into()).unwrap();
        }
        assert_eq!(store.len(), 0, "below the cadence nothing is written");

        tree.put(4, "x".into()).unwrap();
        assert!(store.len() > 0, "fifth update triggers the lazy save");
        assert_eq!(tree.pending_pages(), 0);
    }

    #[test]
    fn put_all_is_one_batch() {
        let tree = new_tree(4);
        tree.put_all((0..50).map(|k| (k, format!("v{}", k)))).unwrap();
        assert_eq!(tree.size(), 50);
        assert_eq!(tree.get(&49).unwrap(), Some("v49".into()));
        tree.verify().unwrap();
    }
}
