//! # Tree Core
//!
//! The single-threaded heart of the engine: descent, insertion with the
//! median split, deletion, and in-order navigation over an arena of resident
//! pages. The public wrapper in [`crate::tree`] owns the lock; everything
//! here assumes exclusive access except the explicitly read-only probes.
//!
//! ## Descent
//!
//! A lookup does not start at the root. The entry-point list either answers
//! with a node whose slot range contains the key (no I/O at all) or supplies
//! the closest anchor, from which the walk first climbs parent links until
//! the key provably lies inside the current subtree, then descends normally.
//! Pages are pulled from the record store on demand at every step.
//!
//! ## Split
//!
//! A page that reaches its slot capacity after an insert keeps only the
//! median slot; the lower and upper halves move into two fresh red siblings
//! spliced into the adjacent in-order leaf positions, each followed by the
//! standard insert fixup. The median therefore ends up as the structural
//! parent of both halves, and interior-node splits preserve global key order.

use eyre::{bail, ensure, Result, WrapErr};
use std::sync::Arc;

use crate::cache::{Anchor, EntryPoints, NodeArena, NodeCache, NodeId};
use crate::codec::Codec;
use crate::commit::CommitBuffer;
use crate::config::TreeConfig;
use crate::page::{Color, NodePage, SearchResult};
use crate::rid::RecordId;
use crate::store::RecordStore;
use crate::tree::descriptor::TreeDescriptor;

/// Which side of a parent a child hangs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Side {
    Left,
    Right,
}

impl Side {
    pub(crate) fn opposite(self) -> Side {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }
}

/// Where a key lives, or where it would be inserted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Location {
    Found { node: NodeId, index: usize },
    Missing { node: NodeId, index: usize },
    EmptyTree,
}

/// Result of a read-only probe that may need I/O to finish.
pub(crate) enum Probe<T> {
    Resident(T),
    NeedsIo,
}

pub(crate) struct TreeCore<K, V> {
    pub(crate) config: TreeConfig,
    pub(crate) store: Arc<dyn RecordStore>,
    pub(crate) key_codec: Arc<dyn Codec<K>>,
    pub(crate) value_codec: Arc<dyn Codec<V>>,
    pub(crate) arena: NodeArena<K, V>,
    pub(crate) cache: NodeCache,
    pub(crate) entry_points: EntryPoints,
    pub(crate) pending: CommitBuffer,
    pub(crate) root: Option<NodeId>,
    pub(crate) descriptor: TreeDescriptor,
    pub(crate) descriptor_rid: Option<RecordId>,
    pub(crate) descriptor_dirty: bool,
    next_provisional: i64,
}

impl<K, V> TreeCore<K, V>
where
    K: Ord + Clone,
    V: Clone,
{
    pub(crate) fn new(
        store: Arc<dyn RecordStore>,
        config: TreeConfig,
        key_codec: Arc<dyn Codec<K>>,
        value_codec: Arc<dyn Codec<V>>,
    ) -> Result<Self> {
        config.validate()?;
        let descriptor = TreeDescriptor::new(
            key_codec.name(),
            value_codec.name(),
            config.node_page_size,
        );
        Ok(Self {
            config,
            store,
            key_codec,
            value_codec,
            arena: NodeArena::new(),
            cache: NodeCache::new(),
            entry_points: EntryPoints::new(),
            pending: CommitBuffer::new(),
            root: None,
            descriptor,
            descriptor_rid: None,
            descriptor_dirty: false,
            next_provisional: -1,
        })
    }

    pub(crate) fn open(
        store: Arc<dyn RecordStore>,
        config: TreeConfig,
        descriptor_rid: RecordId,
        key_codec: Arc<dyn Codec<K>>,
        value_codec: Arc<dyn Codec<V>>,
    ) -> Result<Self> {
        config.validate()?;
        let bytes = store
            .read(descriptor_rid)
            .wrap_err_with(|| format!("loading tree descriptor {}", descriptor_rid))?;
        let descriptor = TreeDescriptor::decode(&bytes)
            .wrap_err_with(|| format!("decoding tree descriptor {}", descriptor_rid))?;

        ensure!(
            descriptor.key_codec_name == key_codec.name(),
            "tree {} was written with key codec '{}' but '{}' was supplied",
            descriptor_rid,
            descriptor.key_codec_name,
            key_codec.name()
        );
        ensure!(
            descriptor.value_codec_name == value_codec.name(),
            "tree {} was written with value codec '{}' but '{}' was supplied",
            descriptor_rid,
            descriptor.value_codec_name,
            value_codec.name()
        );

        Ok(Self {
            config,
            store,
            key_codec,
            value_codec,
            arena: NodeArena::new(),
            cache: NodeCache::new(),
            entry_points: EntryPoints::new(),
            pending: CommitBuffer::new(),
            root: None,
            descriptor,
            descriptor_rid: Some(descriptor_rid),
            descriptor_dirty: false,
            next_provisional: -1,
        })
    }

    // ------------------------------------------------------------------
    // Node management
    // ------------------------------------------------------------------

    fn provisional_rid(&mut self) -> RecordId {
        self.next_provisional -= 1;
        RecordId::provisional(self.next_provisional)
    }

    /// Create a fresh page and register it with the cache and commit buffer.
    fn alloc_node(&mut self, color: Color) -> Result<NodeId> {
        let rid = self.provisional_rid();
        let page = NodePage::new(
            rid,
            self.config.node_page_size,
            self.config.slot_capacity(),
            color,
        );
        let id = self.arena.insert(page);
        self.cache.insert(rid, id);
        self.pending.insert(id);
        Ok(id)
    }

    /// Satisfy `rid` from the cache or read it from the record store.
    pub(crate) fn load_node(&mut self, rid: RecordId) -> Result<NodeId> {
        ensure!(rid.is_valid(), "cannot load the invalid record id");
        if let Some(id) = self.cache.get(&rid) {
            return Ok(id);
        }
        if rid.is_provisional() {
            bail!("provisional node {} is not resident; the tree is corrupt", rid);
        }

        let bytes = self
            .store
            .read(rid)
            .wrap_err_with(|| format!("loading tree node {}", rid))?;
        let page = NodePage::deserialize(&bytes, rid)?;
        let id = self.arena.insert(page);
        self.cache.insert(rid, id);

        if self.entry_points.len() < self.config.entry_points_size {
            let codec = Arc::clone(&self.key_codec);
            self.entry_points.promote(id, &mut self.arena, &*codec)?;
        }
        Ok(id)
    }

    /// In-memory child on `side`, lazily loading through the stored RID.
    pub(crate) fn child_of(&mut self, id: NodeId, side: Side) -> Result<Option<NodeId>> {
        let (link, rid) = {
            let node = self.arena.node(id)?;
            match side {
                Side::Left => (node.left, node.left_rid),
                Side::Right => (node.right, node.right_rid),
            }
        };
        if let Some(child) = link {
            return Ok(Some(child));
        }
        if !rid.is_valid() {
            return Ok(None);
        }

        let child = self.load_node(rid)?;
        {
            let node = self.arena.node_mut(id)?;
            match side {
                Side::Left => node.left = Some(child),
                Side::Right => node.right = Some(child),
            }
        }
        self.arena.node_mut(child)?.parent = Some(id);
        Ok(Some(child))
    }

    /// In-memory parent, lazily loading through the stored RID and wiring the
    /// parent's child link back to this node.
    pub(crate) fn parent_of(&mut self, id: NodeId) -> Result<Option<NodeId>> {
        let (link, parent_rid, self_rid) = {
            let node = self.arena.node(id)?;
            (node.parent, node.parent_rid, node.self_rid)
        };
        if let Some(parent) = link {
            return Ok(Some(parent));
        }
        if !parent_rid.is_valid() {
            return Ok(None);
        }

        let parent = self.load_node(parent_rid)?;
        let side = {
            let p = self.arena.node(parent)?;
            if p.left_rid == self_rid {
                Side::Left
            } else if p.right_rid == self_rid {
                Side::Right
            } else {
                bail!(
                    "node {} names parent {} but the parent links {} and {}",
                    self_rid,
                    parent_rid,
                    p.left_rid,
                    p.right_rid
                );
            }
        };
        {
            let p = self.arena.node_mut(parent)?;
            match side {
                Side::Left => p.left = Some(id),
                Side::Right => p.right = Some(id),
            }
        }
        self.arena.node_mut(id)?.parent = Some(parent);
        Ok(Some(parent))
    }

    pub(crate) fn side_of(&self, parent: NodeId, child: NodeId) -> Result<Side> {
        let p = self.arena.node(parent)?;
        if p.left == Some(child) {
            Ok(Side::Left)
        } else if p.right == Some(child) {
            Ok(Side::Right)
        } else {
            let child_rid = self.arena.node(child)?.self_rid;
            if p.left_rid == child_rid {
                Ok(Side::Left)
            } else if p.right_rid == child_rid {
                Ok(Side::Right)
            } else {
                bail!(
                    "node {} is not a child of {}",
                    child_rid,
                    p.self_rid
                )
            }
        }
    }

    /// Resident root, loading it from the descriptor RID when necessary.
    pub(crate) fn root_id(&mut self) -> Result<Option<NodeId>> {
        if let Some(root) = self.root {
            return Ok(Some(root));
        }
        if !self.descriptor.root_rid.is_valid() {
            return Ok(None);
        }
        let root = self.load_node(self.descriptor.root_rid)?;
        self.root = Some(root);
        Ok(Some(root))
    }

    pub(crate) fn mark_pending(&mut self, id: NodeId) {
        self.pending.insert(id);
    }

    fn first_key_of(&mut self, id: NodeId) -> Result<K> {
        let codec = Arc::clone(&self.key_codec);
        Ok(self.arena.node_mut(id)?.key_at(0, &*codec)?.clone())
    }

    fn last_key_of(&mut self, id: NodeId) -> Result<K> {
        let codec = Arc::clone(&self.key_codec);
        let node = self.arena.node_mut(id)?;
        let last = node.count() - 1;
        Ok(node.key_at(last, &*codec)?.clone())
    }

    // ------------------------------------------------------------------
    // Descent
    // ------------------------------------------------------------------

    pub(crate) fn locate(&mut self, key: &K) -> Result<Location> {
        let anchor = {
            let codec = Arc::clone(&self.key_codec);
            self.entry_points.best_anchor(key, &self.arena, &*codec)?
        };
        let start = match anchor {
            Anchor::RangeHit(id) => {
                let codec = Arc::clone(&self.key_codec);
                let result = self.arena.node_mut(id)?.search(key, &*codec)?;
                return Ok(match result {
                    SearchResult::Found(index) => Location::Found { node: id, index },
                    SearchResult::NotFound(index) => Location::Missing { node: id, index },
                });
            }
            Anchor::Finger(id) => self.ascend_to_cover(id, key)?,
            Anchor::None => match self.root_id()? {
                Some(root) => root,
                None => return Ok(Location::EmptyTree),
            },
        };
        self.descend(start, key)
    }

    /// Climb parent links from `start` until the key provably lies inside the
    /// current node's subtree, loading parents on demand.
    fn ascend_to_cover(&mut self, start: NodeId, key: &K) -> Result<NodeId> {
        let mut cur = start;
        loop {
            if self.arena.node(cur)?.count() == 0 {
                return Ok(cur);
            }
            let first = self.first_key_of(cur)?;
            let last = self.last_key_of(cur)?;

            if *key >= first && *key <= last {
                return Ok(cur);
            }

            let parent = match self.parent_of(cur)? {
                Some(parent) => parent,
                None => return Ok(cur),
            };
            let side = self.side_of(parent, cur)?;

            if *key > last {
                // Larger keys sit above a right child; from a left child only
                // until the parent's own slots pass the key.
                if side == Side::Left && *key < self.first_key_of(parent)? {
                    return Ok(cur);
                }
                cur = parent;
            } else {
                if side == Side::Right && *key > self.last_key_of(parent)? {
                    return Ok(cur);
                }
                cur = parent;
            }
        }
    }

    fn descend(&mut self, start: NodeId, key: &K) -> Result<Location> {
        let mut cur = start;
        loop {
            if self.arena.node(cur)?.count() == 0 {
                return Ok(Location::Missing {
                    node: cur,
                    index: 0,
                });
            }
            let first = self.first_key_of(cur)?;
            if *key < first {
                match self.child_of(cur, Side::Left)? {
                    Some(child) => {
                        cur = child;
                        continue;
                    }
                    None => {
                        return Ok(Location::Missing {
                            node: cur,
                            index: 0,
                        })
                    }
                }
            }
            let last = self.last_key_of(cur)?;
            if *key > last {
                let count = self.arena.node(cur)?.count();
                match self.child_of(cur, Side::Right)? {
                    Some(child) => {
                        cur = child;
                        continue;
                    }
                    None => {
                        return Ok(Location::Missing {
                            node: cur,
                            index: count,
                        })
                    }
                }
            }

            let codec = Arc::clone(&self.key_codec);
            let result = self.arena.node_mut(cur)?.search(key, &*codec)?;
            return Ok(match result {
                SearchResult::Found(index) => Location::Found { node: cur, index },
                SearchResult::NotFound(index) => Location::Missing { node: cur, index },
            });
        }
    }

    // ------------------------------------------------------------------
    // Public operations (under the exclusive lock)
    // ------------------------------------------------------------------

    pub(crate) fn get(&mut self, key: &K) -> Result<Option<V>> {
        match self.locate(key)? {
            Location::Found { node, index } => {
                let codec = Arc::clone(&self.value_codec);
                Ok(Some(
                    self.arena.node_mut(node)?.value_at(index, &*codec)?.clone(),
                ))
            }
            _ => Ok(None),
        }
    }

    /// Read-only lookup that never mutates: resident pages only, ephemeral
    /// decodes. Reports [`Probe::NeedsIo`] as soon as the path leaves memory.
    pub(crate) fn get_resident(&self, key: &K) -> Result<Probe<Option<V>>> {
        let mut cur = match self.root {
            Some(root) => root,
            None => {
                return Ok(if self.descriptor.root_rid.is_valid() {
                    Probe::NeedsIo
                } else {
                    Probe::Resident(None)
                });
            }
        };

        loop {
            let node = self.arena.node(cur)?;
            if node.count() == 0 {
                return Ok(Probe::Resident(None));
            }
            let first = node.key_cloned(0, &*self.key_codec)?;
            if *key < first {
                match node.left {
                    Some(child) => {
                        cur = child;
                        continue;
                    }
                    None => {
                        return Ok(if node.left_rid.is_valid() {
                            Probe::NeedsIo
                        } else {
                            Probe::Resident(None)
                        });
                    }
                }
            }
            let last = node.key_cloned(node.count() - 1, &*self.key_codec)?;
            if *key > last {
                match node.right {
                    Some(child) => {
                        cur = child;
                        continue;
                    }
                    None => {
                        return Ok(if node.right_rid.is_valid() {
                            Probe::NeedsIo
                        } else {
                            Probe::Resident(None)
                        });
                    }
                }
            }

            return Ok(match node.search_cloned(key, &*self.key_codec)? {
                SearchResult::Found(index) => {
                    Probe::Resident(Some(node.value_cloned(index, &*self.value_codec)?))
                }
                SearchResult::NotFound(_) => Probe::Resident(None),
            });
        }
    }

    pub(crate) fn put(&mut self, key: K, value: V) -> Result<Option<V>> {
        match self.locate(&key)? {
            Location::EmptyTree => {
                let root = self.alloc_node(Color::Black)?;
                self.arena.node_mut(root)?.insert_at(0, key, value)?;
                self.root = Some(root);
                self.descriptor.root_rid = self.arena.node(root)?.self_rid;
                self.descriptor.size += 1;
                self.descriptor_dirty = true;
                Ok(None)
            }
            Location::Found { node, index } => {
                let codec = Arc::clone(&self.value_codec);
                let page = self.arena.node_mut(node)?;
                let old = page.value_at(index, &*codec)?.clone();
                page.set_value_at(index, value)?;
                self.mark_pending(node);
                Ok(Some(old))
            }
            Location::Missing { node, index } => {
                self.arena.node_mut(node)?.insert_at(index, key, value)?;
                self.mark_pending(node);
                self.descriptor.size += 1;
                self.descriptor_dirty = true;

                if index == 0 && self.entry_points.contains(node) {
                    let codec = Arc::clone(&self.key_codec);
                    self.entry_points.resort(&self.arena, &*codec)?;
                }

                let (count, page_size) = {
                    let page = self.arena.node(node)?;
                    (page.count(), page.page_size() as usize)
                };
                if count >= page_size {
                    self.split(node)?;
                }
                Ok(None)
            }
        }
    }

    /// Three-way median split of a full page. The page keeps the median; the
    /// halves become fresh red siblings at the adjacent in-order leaf
    /// positions, each rebalanced like a plain insertion.
    fn split(&mut self, node: NodeId) -> Result<()> {
        let count = self.arena.node(node)?.count();
        let median = count / 2;

        let (lower, upper) = {
            let page = self.arena.node_mut(node)?;
            let upper = page.take_range(median + 1..count)?;
            let lower = page.take_range(0..median)?;
            (lower, upper)
        };
        self.mark_pending(node);

        let mut created = [None, None];

        if !lower.is_empty() {
            let sibling = self.alloc_node(Color::Red)?;
            {
                let page = self.arena.node_mut(sibling)?;
                for slot in lower {
                    page.push_slot(slot);
                }
            }
            let (attach, side) = self.rightmost_attach_point(node)?;
            self.set_child(attach, side, Some(sibling))?;
            self.fix_after_insert(sibling)?;
            created[0] = Some(sibling);
        }

        if !upper.is_empty() {
            let sibling = self.alloc_node(Color::Red)?;
            {
                let page = self.arena.node_mut(sibling)?;
                for slot in upper {
                    page.push_slot(slot);
                }
            }
            let (attach, side) = self.leftmost_attach_point(node)?;
            self.set_child(attach, side, Some(sibling))?;
            self.fix_after_insert(sibling)?;
            created[1] = Some(sibling);
        }

        let codec = Arc::clone(&self.key_codec);
        for sibling in created.into_iter().flatten() {
            if self.entry_points.len() < self.config.entry_points_size {
                self.entry_points
                    .promote(sibling, &mut self.arena, &*codec)?;
            }
        }
        // The split node kept only its median, so first keys moved around.
        self.entry_points.resort(&self.arena, &*codec)?;
        Ok(())
    }

    /// In-order predecessor leaf position of `node`'s slots: the rightmost
    /// spot in its left subtree, or the left link itself.
    fn rightmost_attach_point(&mut self, node: NodeId) -> Result<(NodeId, Side)> {
        let mut cur = match self.child_of(node, Side::Left)? {
            Some(child) => child,
            None => return Ok((node, Side::Left)),
        };
        loop {
            match self.child_of(cur, Side::Right)? {
                Some(child) => cur = child,
                None => return Ok((cur, Side::Right)),
            }
        }
    }

    /// In-order successor leaf position of `node`'s slots.
    fn leftmost_attach_point(&mut self, node: NodeId) -> Result<(NodeId, Side)> {
        let mut cur = match self.child_of(node, Side::Right)? {
            Some(child) => child,
            None => return Ok((node, Side::Right)),
        };
        loop {
            match self.child_of(cur, Side::Left)? {
                Some(child) => cur = child,
                None => return Ok((cur, Side::Left)),
            }
        }
    }

    pub(crate) fn remove(&mut self, key: &K) -> Result<Option<V>> {
        let (node, index) = match self.locate(key)? {
            Location::Found { node, index } => (node, index),
            _ => return Ok(None),
        };

        let old = {
            let codec = Arc::clone(&self.value_codec);
            self.arena.node_mut(node)?.value_at(index, &*codec)?.clone()
        };
        self.arena.node_mut(node)?.remove_at(index)?;
        self.mark_pending(node);
        self.descriptor.size -= 1;
        self.descriptor_dirty = true;

        if self.arena.node(node)?.count() == 0 {
            self.delete_page(node)?;
        } else if index == 0 {
            let codec = Arc::clone(&self.key_codec);
            self.entry_points.resort(&self.arena, &*codec)?;
        }
        Ok(Some(old))
    }

    /// Unlink an empty page with the classic red-black node deletion and
    /// delete its record from the store.
    fn delete_page(&mut self, z: NodeId) -> Result<()> {
        let left = self.child_of(z, Side::Left)?;
        let right = self.child_of(z, Side::Right)?;

        // Two children: the successor page's slots move into the vacated
        // page, and the successor is the node that actually leaves the tree.
        let target = if left.is_some() && right.is_some() {
            let mut successor = right.expect("checked above"); // INVARIANT: right is Some in this branch
            while let Some(next) = self.child_of(successor, Side::Left)? {
                successor = next;
            }
            let slots = {
                let count = self.arena.node(successor)?.count();
                self.arena.node_mut(successor)?.take_range(0..count)?
            };
            self.arena.node_mut(z)?.replace_slots(slots);
            self.mark_pending(z);
            successor
        } else {
            z
        };

        let target_left = self.child_of(target, Side::Left)?;
        let target_right = self.child_of(target, Side::Right)?;
        let child = target_left.or(target_right);
        let target_color = self.arena.node(target)?.color;
        let parent = self.parent_of(target)?;
        let side = match parent {
            Some(parent) => Some(self.side_of(parent, target)?),
            None => None,
        };

        match (parent, side) {
            (Some(parent), Some(side)) => self.set_child(parent, side, child)?,
            _ => {
                self.root = child;
                match child {
                    Some(child) => {
                        {
                            let page = self.arena.node_mut(child)?;
                            page.parent = None;
                            page.parent_rid = RecordId::INVALID;
                            page.mark_dirty();
                        }
                        self.mark_pending(child);
                        self.descriptor.root_rid = self.arena.node(child)?.self_rid;
                    }
                    None => self.descriptor.root_rid = RecordId::INVALID,
                }
                self.descriptor_dirty = true;
            }
        }

        self.discard_page(target)?;

        if target_color == Color::Black {
            match (parent, side) {
                (Some(parent), Some(side)) => self.fix_after_delete(child, parent, side)?,
                _ => {
                    if let Some(child) = child {
                        self.set_color(child, Color::Black)?;
                    }
                }
            }
        }

        let codec = Arc::clone(&self.key_codec);
        self.entry_points.resort(&self.arena, &*codec)?;
        Ok(())
    }

    /// Drop a page from every in-memory structure and from the record store.
    fn discard_page(&mut self, id: NodeId) -> Result<()> {
        self.entry_points.remove(id);
        self.pending.remove(id);
        let page = self.arena.remove(id)?;
        self.cache.remove(&page.self_rid);
        if page.self_rid.is_persistent() {
            self.store
                .delete(page.self_rid)
                .wrap_err_with(|| format!("deleting tree node {}", page.self_rid))?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Navigation
    // ------------------------------------------------------------------

    pub(crate) fn first_entry(&mut self) -> Result<Option<(NodeId, usize)>> {
        let mut cur = match self.root_id()? {
            Some(root) => root,
            None => return Ok(None),
        };
        while let Some(child) = self.child_of(cur, Side::Left)? {
            cur = child;
        }
        Ok(Some((cur, 0)))
    }

    pub(crate) fn last_entry(&mut self) -> Result<Option<(NodeId, usize)>> {
        let mut cur = match self.root_id()? {
            Some(root) => root,
            None => return Ok(None),
        };
        while let Some(child) = self.child_of(cur, Side::Right)? {
            cur = child;
        }
        let count = self.arena.node(cur)?.count();
        ensure!(count > 0, "reached an empty page during last-entry walk");
        Ok(Some((cur, count - 1)))
    }

    /// In-order slot after `(node, index)`.
    pub(crate) fn next_entry(&mut self, node: NodeId, index: usize) -> Result<Option<(NodeId, usize)>> {
        let count = self.arena.node(node)?.count();
        if index + 1 < count {
            return Ok(Some((node, index + 1)));
        }
        if let Some(mut cur) = self.child_of(node, Side::Right)? {
            while let Some(child) = self.child_of(cur, Side::Left)? {
                cur = child;
            }
            return Ok(Some((cur, 0)));
        }
        let mut cur = node;
        loop {
            match self.parent_of(cur)? {
                None => return Ok(None),
                Some(parent) => {
                    if self.side_of(parent, cur)? == Side::Left {
                        return Ok(Some((parent, 0)));
                    }
                    cur = parent;
                }
            }
        }
    }

    /// In-order slot before `(node, index)`.
    pub(crate) fn prev_entry(&mut self, node: NodeId, index: usize) -> Result<Option<(NodeId, usize)>> {
        if index > 0 {
            return Ok(Some((node, index - 1)));
        }
        if let Some(mut cur) = self.child_of(node, Side::Left)? {
            while let Some(child) = self.child_of(cur, Side::Right)? {
                cur = child;
            }
            let count = self.arena.node(cur)?.count();
            ensure!(count > 0, "reached an empty page during predecessor walk");
            return Ok(Some((cur, count - 1)));
        }
        let mut cur = node;
        loop {
            match self.parent_of(cur)? {
                None => return Ok(None),
                Some(parent) => {
                    if self.side_of(parent, cur)? == Side::Right {
                        let count = self.arena.node(parent)?.count();
                        return Ok(Some((parent, count - 1)));
                    }
                    cur = parent;
                }
            }
        }
    }

    pub(crate) fn key_at_entry(&mut self, entry: (NodeId, usize)) -> Result<K> {
        let codec = Arc::clone(&self.key_codec);
        Ok(self
            .arena
            .node_mut(entry.0)?
            .key_at(entry.1, &*codec)?
            .clone())
    }

    pub(crate) fn successor(&mut self, key: &K) -> Result<Option<K>> {
        let entry = match self.locate(key)? {
            Location::EmptyTree => return Ok(None),
            Location::Found { node, index } => self.next_entry(node, index)?,
            Location::Missing { node, index } => {
                let count = self.arena.node(node)?.count();
                if index < count {
                    Some((node, index))
                } else if count == 0 {
                    None
                } else {
                    self.next_entry(node, count - 1)?
                }
            }
        };
        match entry {
            Some(entry) => Ok(Some(self.key_at_entry(entry)?)),
            None => Ok(None),
        }
    }

    pub(crate) fn predecessor(&mut self, key: &K) -> Result<Option<K>> {
        let entry = match self.locate(key)? {
            Location::EmptyTree => return Ok(None),
            Location::Found { node, index } => self.prev_entry(node, index)?,
            Location::Missing { node, index } => {
                if index > 0 {
                    Some((node, index - 1))
                } else {
                    self.prev_entry(node, 0)?
                }
            }
        };
        match entry {
            Some(entry) => Ok(Some(self.key_at_entry(entry)?)),
            None => Ok(None),
        }
    }

    /// All keys in order. Loads whatever part of the tree is not resident.
    pub(crate) fn keys(&mut self) -> Result<Vec<K>> {
        let mut out = Vec::with_capacity(self.descriptor.size.max(0) as usize);
        let mut cursor = self.first_entry()?;
        while let Some(entry) = cursor {
            out.push(self.key_at_entry(entry)?);
            cursor = self.next_entry(entry.0, entry.1)?;
        }
        Ok(out)
    }

    // ------------------------------------------------------------------
    // Whole-tree operations
    // ------------------------------------------------------------------

    /// Delete every reachable page from the record store and reset the tree
    /// to empty.
    pub(crate) fn clear(&mut self) -> Result<()> {
        if let Some(root) = self.root_id()? {
            let mut stack = vec![root];
            let mut rids = Vec::new();
            while let Some(id) = stack.pop() {
                if let Some(left) = self.child_of(id, Side::Left)? {
                    stack.push(left);
                }
                if let Some(right) = self.child_of(id, Side::Right)? {
                    stack.push(right);
                }
                rids.push(self.arena.node(id)?.self_rid);
            }
            for rid in rids {
                if rid.is_persistent() {
                    self.store
                        .delete(rid)
                        .wrap_err_with(|| format!("deleting tree node {}", rid))?;
                }
            }
        }

        self.arena.clear();
        self.cache.clear();
        self.entry_points.clear();
        self.pending.clear();
        self.root = None;
        self.descriptor.root_rid = RecordId::INVALID;
        self.descriptor.size = 0;
        self.descriptor_dirty = true;
        Ok(())
    }

    /// Rollback-path teardown: drop everything buffered and resident, then
    /// restore the descriptor from its stored state. The root reloads lazily.
    pub(crate) fn unload(&mut self) -> Result<()> {
        self.arena.clear();
        self.cache.clear();
        self.entry_points.clear();
        self.pending.clear();
        self.root = None;
        self.descriptor_dirty = false;

        match self.descriptor_rid {
            Some(rid) => {
                let bytes = self
                    .store
                    .read(rid)
                    .wrap_err_with(|| format!("reloading tree descriptor {}", rid))?;
                self.descriptor = TreeDescriptor::decode(&bytes)?;
            }
            None => {
                self.descriptor = TreeDescriptor::new(
                    self.key_codec.name(),
                    self.value_codec.name(),
                    self.config.node_page_size,
                );
            }
        }
        Ok(())
    }

    /// Close-path teardown: drop resident state but keep the in-memory
    /// descriptor as-is. The caller flushes first.
    pub(crate) fn forget(&mut self) {
        self.arena.clear();
        self.cache.clear();
        self.entry_points.clear();
        self.pending.clear();
        self.root = None;
    }
}

impl<K, V> TreeCore<K, V> {
    /// Color of a possibly-absent node; nil is black.
    pub(crate) fn color_of(&self, id: Option<NodeId>) -> Color {
        id.and_then(|id| self.arena.node(id).ok())
            .map(|node| node.color)
            .unwrap_or(Color::Black)
    }

    pub(crate) fn set_color(&mut self, id: NodeId, color: Color) -> Result<()> {
        {
            let node = self.arena.node_mut(id)?;
            if node.color == color {
                return Ok(());
            }
            node.color = color;
            node.mark_dirty();
        }
        self.pending.insert(id);
        Ok(())
    }

    /// Wire `child` under `parent` on `side`, updating links and RIDs on
    /// both ends and marking both dirty.
    pub(crate) fn set_child(
        &mut self,
        parent: NodeId,
        side: Side,
        child: Option<NodeId>,
    ) -> Result<()> {
        let child_rid = match child {
            Some(child) => self.arena.node(child)?.self_rid,
            None => RecordId::INVALID,
        };
        let parent_rid = self.arena.node(parent)?.self_rid;
        {
            let page = self.arena.node_mut(parent)?;
            match side {
                Side::Left => {
                    page.left = child;
                    page.left_rid = child_rid;
                }
                Side::Right => {
                    page.right = child;
                    page.right_rid = child_rid;
                }
            }
            page.mark_dirty();
        }
        self.pending.insert(parent);

        if let Some(child) = child {
            {
                let page = self.arena.node_mut(child)?;
                page.parent = Some(parent);
                page.parent_rid = parent_rid;
                page.mark_dirty();
            }
            self.pending.insert(child);
        }
        Ok(())
    }
}
