//! # Node Pages
//!
//! A [`NodePage`] is one persistent node of the tree: up to `page_size`
//! key/value slots plus the parent/left/right links, a color bit, and the
//! slot count. The page is the unit of I/O — the tree never reads or writes
//! anything smaller.
//!
//! ## Wire Layout
//!
//! Big-endian, fixed prefix followed by length-prefixed blobs:
//!
//! ```text
//! offset  size  field
//! 0       2     page_size
//! 2       10    parent_rid
//! 12      10    left_rid
//! 22      10    right_rid
//! 32      1     color (1 = red, 0 = black)
//! 33      2     count
//! 35      var   count key blobs, each varint-length-prefixed
//! ...     var   count value blobs, each varint-length-prefixed
//! ```
//!
//! ## Lazy Slots
//!
//! Deserializing fills only the header fields and the raw blob vectors. A
//! slot's key or value is decoded on first access and cached; the raw blob is
//! kept so an unchanged slot re-serializes without re-encoding. Overwriting a
//! value drops its blob, which is what forces re-encoding at write-out.
//! For any slot, at least one of (decoded, blob) is present; a slot with
//! neither is corruption.

use eyre::{bail, ensure, eyre, Result, WrapErr};
use zerocopy::big_endian::U16;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::cache::NodeId;
use crate::codec::Codec;
use crate::config::NODE_HEADER_SIZE;
use crate::encoding::varint::{read_prefixed, write_prefixed};
use crate::rid::{RecordId, RID_SIZE};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Color {
    Red,
    Black,
}

/// Outcome of an in-node key search, carrying the slot or insertion index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchResult {
    Found(usize),
    NotFound(usize),
}

/// One slot's worth of state, moved between pages during a split.
pub struct Slot<K, V> {
    pub key: Option<K>,
    pub value: Option<V>,
    pub raw_key: Option<Vec<u8>>,
    pub raw_value: Option<Vec<u8>>,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
struct NodeHeader {
    page_size: U16,
    parent_rid: [u8; RID_SIZE],
    left_rid: [u8; RID_SIZE],
    right_rid: [u8; RID_SIZE],
    color: u8,
    count: U16,
}

const _: () = assert!(std::mem::size_of::<NodeHeader>() == NODE_HEADER_SIZE);

#[derive(Debug)]
pub struct NodePage<K, V> {
    pub self_rid: RecordId,
    pub parent_rid: RecordId,
    pub left_rid: RecordId,
    pub right_rid: RecordId,
    pub color: Color,
    page_size: u16,
    keys: Vec<Option<K>>,
    values: Vec<Option<V>>,
    raw_keys: Vec<Option<Vec<u8>>>,
    raw_values: Vec<Option<Vec<u8>>>,
    pub parent: Option<NodeId>,
    pub left: Option<NodeId>,
    pub right: Option<NodeId>,
    dirty: bool,
}

impl<K, V> NodePage<K, V> {
    /// Fresh in-memory page. Starts dirty: it exists nowhere else yet.
    pub fn new(self_rid: RecordId, page_size: u16, slot_capacity: usize, color: Color) -> Self {
        Self {
            self_rid,
            parent_rid: RecordId::INVALID,
            left_rid: RecordId::INVALID,
            right_rid: RecordId::INVALID,
            color,
            page_size,
            keys: Vec::with_capacity(slot_capacity),
            values: Vec::with_capacity(slot_capacity),
            raw_keys: Vec::with_capacity(slot_capacity),
            raw_values: Vec::with_capacity(slot_capacity),
            parent: None,
            left: None,
            right: None,
            dirty: true,
        }
    }

    pub fn count(&self) -> usize {
        self.keys.len()
    }

    pub fn page_size(&self) -> u16 {
        self.page_size
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    fn check_slot(&self, index: usize) -> Result<()> {
        ensure!(
            index < self.count(),
            "slot index {} out of bounds in node {} (count={})",
            index,
            self.self_rid,
            self.count()
        );
        Ok(())
    }

    /// Insert a decoded key/value pair at `index`, shifting later slots.
    pub fn insert_at(&mut self, index: usize, key: K, value: V) -> Result<()> {
        ensure!(
            index <= self.count(),
            "insert index {} out of bounds in node {} (count={})",
            index,
            self.self_rid,
            self.count()
        );
        self.keys.insert(index, Some(key));
        self.values.insert(index, Some(value));
        self.raw_keys.insert(index, None);
        self.raw_values.insert(index, None);
        self.dirty = true;
        Ok(())
    }

    /// Remove the slot at `index`, shifting later slots left.
    pub fn remove_at(&mut self, index: usize) -> Result<Slot<K, V>> {
        self.check_slot(index)?;
        let slot = Slot {
            key: self.keys.remove(index),
            value: self.values.remove(index),
            raw_key: self.raw_keys.remove(index),
            raw_value: self.raw_values.remove(index),
        };
        self.dirty = true;
        Ok(slot)
    }

    /// Move the slots in `range` out of this page, preserving blobs so the
    /// receiving page can skip re-encoding.
    pub fn take_range(&mut self, range: std::ops::Range<usize>) -> Result<Vec<Slot<K, V>>> {
        ensure!(
            range.end <= self.count() && range.start <= range.end,
            "slot range {}..{} out of bounds in node {} (count={})",
            range.start,
            range.end,
            self.self_rid,
            self.count()
        );
        let keys: Vec<_> = self.keys.drain(range.clone()).collect();
        let values: Vec<_> = self.values.drain(range.clone()).collect();
        let raw_keys: Vec<_> = self.raw_keys.drain(range.clone()).collect();
        let raw_values: Vec<_> = self.raw_values.drain(range).collect();
        self.dirty = true;

        Ok(keys
            .into_iter()
            .zip(values)
            .zip(raw_keys.into_iter().zip(raw_values))
            .map(|((key, value), (raw_key, raw_value))| Slot {
                key,
                value,
                raw_key,
                raw_value,
            })
            .collect())
    }

    /// Append a slot moved from another page.
    pub fn push_slot(&mut self, slot: Slot<K, V>) {
        self.keys.push(slot.key);
        self.values.push(slot.value);
        self.raw_keys.push(slot.raw_key);
        self.raw_values.push(slot.raw_value);
        self.dirty = true;
    }

    /// Replace this page's slots with `slots` (red-black delete moves a
    /// successor page's content into the vacated page).
    pub fn replace_slots(&mut self, slots: Vec<Slot<K, V>>) {
        self.keys.clear();
        self.values.clear();
        self.raw_keys.clear();
        self.raw_values.clear();
        for slot in slots {
            self.push_slot(slot);
        }
        self.dirty = true;
    }

    /// Key at `index`, decoding and caching it on first access.
    pub fn key_at(&mut self, index: usize, codec: &dyn Codec<K>) -> Result<&K> {
        self.check_slot(index)?;
        if self.keys[index].is_none() {
            let raw = self.raw_keys[index].as_deref().ok_or_else(|| {
                eyre!(
                    "key slot {} of node {} has neither a decoded value nor a blob",
                    index,
                    self.self_rid
                )
            })?;
            let decoded = codec
                .decode(raw)
                .wrap_err_with(|| format!("decoding key slot {} of node {}", index, self.self_rid))?;
            self.keys[index] = Some(decoded);
        }
        Ok(self.keys[index].as_ref().expect("materialized above")) // INVARIANT: slot filled in the branch above
    }

    /// Key at `index` without touching the cache; decodes an ephemeral copy
    /// when the slot is unmaterialized. Used by the shared-lock read path.
    pub fn key_cloned(&self, index: usize, codec: &dyn Codec<K>) -> Result<K>
    where
        K: Clone,
    {
        self.check_slot(index)?;
        if let Some(key) = &self.keys[index] {
            return Ok(key.clone());
        }
        let raw = self.raw_keys[index].as_deref().ok_or_else(|| {
            eyre!(
                "key slot {} of node {} has neither a decoded value nor a blob",
                index,
                self.self_rid
            )
        })?;
        codec
            .decode(raw)
            .wrap_err_with(|| format!("decoding key slot {} of node {}", index, self.self_rid))
    }

    /// Value at `index`, decoding and caching it on first access.
    pub fn value_at(&mut self, index: usize, codec: &dyn Codec<V>) -> Result<&V> {
        self.check_slot(index)?;
        if self.values[index].is_none() {
            let raw = self.raw_values[index].as_deref().ok_or_else(|| {
                eyre!(
                    "value slot {} of node {} has neither a decoded value nor a blob",
                    index,
                    self.self_rid
                )
            })?;
            let decoded = codec.decode(raw).wrap_err_with(|| {
                format!("decoding value slot {} of node {}", index, self.self_rid)
            })?;
            self.values[index] = Some(decoded);
        }
        Ok(self.values[index].as_ref().expect("materialized above")) // INVARIANT: slot filled in the branch above
    }

    /// Value at `index` without touching the cache.
    pub fn value_cloned(&self, index: usize, codec: &dyn Codec<V>) -> Result<V>
    where
        V: Clone,
    {
        self.check_slot(index)?;
        if let Some(value) = &self.values[index] {
            return Ok(value.clone());
        }
        let raw = self.raw_values[index].as_deref().ok_or_else(|| {
            eyre!(
                "value slot {} of node {} has neither a decoded value nor a blob",
                index,
                self.self_rid
            )
        })?;
        codec
            .decode(raw)
            .wrap_err_with(|| format!("decoding value slot {} of node {}", index, self.self_rid))
    }

    /// Overwrite the value at `index`. Drops the cached blob so the slot is
    /// re-encoded at the next write-out, and marks the page dirty.
    pub fn set_value_at(&mut self, index: usize, value: V) -> Result<()> {
        self.check_slot(index)?;
        self.values[index] = Some(value);
        self.raw_values[index] = None;
        self.dirty = true;
        Ok(())
    }

    /// Binary search for `key`, materializing only the probed slots.
    pub fn search(&mut self, key: &K, codec: &dyn Codec<K>) -> Result<SearchResult>
    where
        K: Ord,
    {
        let mut low = 0usize;
        let mut high = self.count();
        while low < high {
            let mid = (low + high) / 2;
            match key.cmp(self.key_at(mid, codec)?) {
                std::cmp::Ordering::Equal => return Ok(SearchResult::Found(mid)),
                std::cmp::Ordering::Less => high = mid,
                std::cmp::Ordering::Greater => low = mid + 1,
            }
        }
        Ok(SearchResult::NotFound(low))
    }

    /// Read-only counterpart of [`NodePage::search`].
    pub fn search_cloned(&self, key: &K, codec: &dyn Codec<K>) -> Result<SearchResult>
    where
        K: Ord + Clone,
    {
        let mut low = 0usize;
        let mut high = self.count();
        while low < high {
            let mid = (low + high) / 2;
            match key.cmp(&self.key_cloned(mid, codec)?) {
                std::cmp::Ordering::Equal => return Ok(SearchResult::Found(mid)),
                std::cmp::Ordering::Less => high = mid,
                std::cmp::Ordering::Greater => low = mid + 1,
            }
        }
        Ok(SearchResult::NotFound(low))
    }

    /// Serialize to the wire layout. Only slots without a cached blob are
    /// re-encoded. Does not clear the dirty flag; that happens once the
    /// record store has acknowledged the write.
    pub fn serialize(
        &mut self,
        key_codec: &dyn Codec<K>,
        value_codec: &dyn Codec<V>,
    ) -> Result<Vec<u8>> {
        let count = self.count();
        ensure!(
            count <= self.page_size as usize,
            "node {} holds {} slots but its page size is {}",
            self.self_rid,
            count,
            self.page_size
        );

        for index in 0..count {
            if self.raw_keys[index].is_none() {
                let key = self.keys[index].as_ref().ok_or_else(|| {
                    eyre!("key slot {} of node {} is empty", index, self.self_rid)
                })?;
                let encoded = key_codec
                    .encode(key)
                    .wrap_err_with(|| format!("encoding key slot {} of node {}", index, self.self_rid))?;
                self.raw_keys[index] = Some(encoded);
            }
            if self.raw_values[index].is_none() {
                let value = self.values[index].as_ref().ok_or_else(|| {
                    eyre!("value slot {} of node {} is empty", index, self.self_rid)
                })?;
                let encoded = value_codec.encode(value).wrap_err_with(|| {
                    format!("encoding value slot {} of node {}", index, self.self_rid)
                })?;
                self.raw_values[index] = Some(encoded);
            }
        }

        let header = NodeHeader {
            page_size: U16::new(self.page_size),
            parent_rid: self.parent_rid.to_bytes(),
            left_rid: self.left_rid.to_bytes(),
            right_rid: self.right_rid.to_bytes(),
            color: match self.color {
                Color::Red => 1,
                Color::Black => 0,
            },
            count: U16::new(count as u16),
        };

        let payload: usize = self
            .raw_keys
            .iter()
            .chain(self.raw_values.iter())
            .map(|raw| raw.as_ref().map(|b| b.len() + 2).unwrap_or(0))
            .sum();
        let mut out = Vec::with_capacity(NODE_HEADER_SIZE + payload);
        out.extend_from_slice(header.as_bytes());
        for index in 0..count {
            write_prefixed(&mut out, self.raw_keys[index].as_deref().unwrap_or(&[]));
        }
        for index in 0..count {
            write_prefixed(&mut out, self.raw_values[index].as_deref().unwrap_or(&[]));
        }
        Ok(out)
    }

    /// Parse a page read back from the record store. Slots stay
    /// unmaterialized; links start disconnected.
    pub fn deserialize(bytes: &[u8], self_rid: RecordId) -> Result<Self> {
        ensure!(
            bytes.len() >= NODE_HEADER_SIZE,
            "record {} too short for a node header: {} < {}",
            self_rid,
            bytes.len(),
            NODE_HEADER_SIZE
        );
        let header = NodeHeader::ref_from_bytes(&bytes[..NODE_HEADER_SIZE])
            .map_err(|e| eyre!("record {}: malformed node header: {:?}", self_rid, e))?;

        let page_size = header.page_size.get();
        let count = header.count.get() as usize;
        ensure!(
            count <= page_size as usize,
            "record {} declares {} slots but its page size is {}",
            self_rid,
            count,
            page_size
        );
        let color = match header.color {
            0 => Color::Black,
            1 => Color::Red,
            other => bail!("record {}: invalid color byte {}", self_rid, other),
        };

        let parent_rid = RecordId::from_bytes(&header.parent_rid)?;
        let left_rid = RecordId::from_bytes(&header.left_rid)?;
        let right_rid = RecordId::from_bytes(&header.right_rid)?;

        let mut cursor = NODE_HEADER_SIZE;
        let mut raw_keys = Vec::with_capacity(count);
        for index in 0..count {
            let (blob, used) = read_prefixed(&bytes[cursor..])
                .wrap_err_with(|| format!("record {}: key blob {}", self_rid, index))?;
            raw_keys.push(Some(blob.to_vec()));
            cursor += used;
        }
        let mut raw_values = Vec::with_capacity(count);
        for index in 0..count {
            let (blob, used) = read_prefixed(&bytes[cursor..])
                .wrap_err_with(|| format!("record {}: value blob {}", self_rid, index))?;
            raw_values.push(Some(blob.to_vec()));
            cursor += used;
        }

        Ok(Self {
            self_rid,
            parent_rid,
            left_rid,
            right_rid,
            color,
            page_size,
            keys: (0..count).map(|_| None).collect(),
            values: (0..count).map(|_| None).collect(),
            raw_keys,
            raw_values,
            parent: None,
            left: None,
            right: None,
            dirty: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{I64Codec, StringCodec};

    fn sample_page() -> NodePage<i64, String> {
        let mut page = NodePage::new(RecordId::new(1, 7), 8, 5, Color::Red);
        page.parent_rid = RecordId::new(1, 3);
        page.left_rid = RecordId::new(1, 4);
        page.insert_at(0, 10, "ten".to_string()).unwrap();
        page.insert_at(1, 20, "twenty".to_string()).unwrap();
        page.insert_at(1, 15, "fifteen".to_string()).unwrap();
        page
    }

    #[test]
    fn insert_keeps_slot_order() {
        let mut page = sample_page();
        assert_eq!(page.count(), 3);
        assert_eq!(*page.key_at(0, &I64Codec).unwrap(), 10);
        assert_eq!(*page.key_at(1, &I64Codec).unwrap(), 15);
        assert_eq!(*page.key_at(2, &I64Codec).unwrap(), 20);
    }

    #[test]
    fn serialize_round_trip_preserves_observable_state() {
        let mut page = sample_page();
        let bytes = page.serialize(&I64Codec, &StringCodec).unwrap();
        let mut loaded: NodePage<i64, String> =
            NodePage::deserialize(&bytes, RecordId::new(1, 7)).unwrap();

        assert_eq!(loaded.count(), 3);
        assert_eq!(loaded.page_size(), 8);
        assert_eq!(loaded.color, Color::Red);
        assert_eq!(loaded.parent_rid, RecordId::new(1, 3));
        assert_eq!(loaded.left_rid, RecordId::new(1, 4));
        assert_eq!(loaded.right_rid, RecordId::INVALID);
        assert!(!loaded.is_dirty());

        for (index, expected) in [(0usize, "ten"), (1, "fifteen"), (2, "twenty")] {
            assert_eq!(loaded.value_at(index, &StringCodec).unwrap(), expected);
        }

        // A second serialization must be byte-identical.
        let again = loaded.serialize(&I64Codec, &StringCodec).unwrap();
        assert_eq!(bytes, again);
    }

    #[test]
    fn deserialized_slots_are_lazy() {
        let mut page = sample_page();
        let bytes = page.serialize(&I64Codec, &StringCodec).unwrap();
        let loaded: NodePage<i64, String> =
            NodePage::deserialize(&bytes, RecordId::new(1, 7)).unwrap();

        // Ephemeral decode does not mutate the page.
        assert_eq!(loaded.key_cloned(1, &I64Codec).unwrap(), 15);
        assert!(loaded.keys.iter().all(|k| k.is_none()));
    }

    #[test]
    fn set_value_invalidates_blob_and_dirties() {
        let mut page = sample_page();
        let bytes = page.serialize(&I64Codec, &StringCodec).unwrap();
        let mut loaded: NodePage<i64, String> =
            NodePage::deserialize(&bytes, RecordId::new(1, 7)).unwrap();

        loaded.set_value_at(1, "FIFTEEN".to_string()).unwrap();
        assert!(loaded.is_dirty());
        assert!(loaded.raw_values[1].is_none());
        assert_eq!(loaded.value_at(1, &StringCodec).unwrap(), "FIFTEEN");

        let rewritten = loaded.serialize(&I64Codec, &StringCodec).unwrap();
        let mut reread: NodePage<i64, String> =
            NodePage::deserialize(&rewritten, RecordId::new(1, 7)).unwrap();
        assert_eq!(reread.value_at(1, &StringCodec).unwrap(), "FIFTEEN");
    }

    #[test]
    fn search_finds_and_positions() {
        let mut page = sample_page();
        assert_eq!(
            page.search(&15, &I64Codec).unwrap(),
            SearchResult::Found(1)
        );
        assert_eq!(
            page.search(&12, &I64Codec).unwrap(),
            SearchResult::NotFound(1)
        );
        assert_eq!(
            page.search(&99, &I64Codec).unwrap(),
            SearchResult::NotFound(3)
        );
        assert_eq!(
            page.search_cloned(&5, &I64Codec).unwrap(),
            SearchResult::NotFound(0)
        );
    }

    #[test]
    fn take_range_moves_blobs() {
        let mut page = sample_page();
        page.serialize(&I64Codec, &StringCodec).unwrap();

        let upper = page.take_range(2..3).unwrap();
        assert_eq!(page.count(), 2);
        assert_eq!(upper.len(), 1);
        assert!(upper[0].raw_key.is_some());

        let mut sibling: NodePage<i64, String> =
            NodePage::new(RecordId::provisional(-2), 8, 5, Color::Red);
        for slot in upper {
            sibling.push_slot(slot);
        }
        assert_eq!(*sibling.key_at(0, &I64Codec).unwrap(), 20);
    }

    #[test]
    fn deserialize_rejects_overflowing_count() {
        let mut page = sample_page();
        let mut bytes = page.serialize(&I64Codec, &StringCodec).unwrap();
        // Corrupt the declared count (offset 33, big-endian u16).
        bytes[33] = 0xFF;
        bytes[34] = 0xFF;
        let err =
            NodePage::<i64, String>::deserialize(&bytes, RecordId::new(1, 7)).unwrap_err();
        assert!(err.to_string().contains("declares"));
    }

    #[test]
    fn deserialize_rejects_truncated_blobs() {
        let mut page = sample_page();
        let bytes = page.serialize(&I64Codec, &StringCodec).unwrap();
        let err = NodePage::<i64, String>::deserialize(&bytes[..bytes.len() - 3], RecordId::new(1, 7))
            .unwrap_err();
        assert!(err.to_string().contains("value blob"));
    }

    #[test]
    fn deserialize_rejects_bad_color() {
        let mut page = sample_page();
        let mut bytes = page.serialize(&I64Codec, &StringCodec).unwrap();
        bytes[32] = 9;
        let err =
            NodePage::<i64, String>::deserialize(&bytes, RecordId::new(1, 7)).unwrap_err();
        assert!(err.to_string().contains("color"));
    }

    #[test]
    fn remove_at_shifts_left() {
        let mut page = sample_page();
        page.remove_at(1).unwrap();
        assert_eq!(page.count(), 2);
        assert_eq!(*page.key_at(0, &I64Codec).unwrap(), 10);
        assert_eq!(*page.key_at(1, &I64Codec).unwrap(), 20);
    }
}
