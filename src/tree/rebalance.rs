//! # Red-Black Rebalancing
//!
//! Rotations and the insert/delete fixups, expressed over arena node ids.
//! Every touched page picks up a dirty mark and lands in the commit buffer:
//! the color bit is persistent state, and a rotation rewrites link RIDs on
//! three pages.
//!
//! The walks here go through `parent_of`/`child_of`, so a fixup transparently
//! pulls evicted ancestors or siblings back in from the record store.

use eyre::{eyre, Result};

use crate::cache::NodeId;
use crate::page::Color;
use crate::rid::RecordId;
use crate::tree::core::{Side, TreeCore};

impl<K, V> TreeCore<K, V>
where
    K: Ord + Clone,
    V: Clone,
{
    fn promote_to_root(&mut self, id: NodeId) -> Result<()> {
        {
            let page = self.arena.node_mut(id)?;
            page.parent = None;
            page.parent_rid = RecordId::INVALID;
            page.mark_dirty();
        }
        self.pending.insert(id);
        self.root = Some(id);
        self.descriptor.root_rid = self.arena.node(id)?.self_rid;
        self.descriptor_dirty = true;
        Ok(())
    }

    pub(crate) fn rotate_left(&mut self, x: NodeId) -> Result<()> {
        let parent = self.parent_of(x)?;
        let parent_side = match parent {
            Some(parent) => Some(self.side_of(parent, x)?),
            None => None,
        };
        let y = self
            .child_of(x, Side::Right)?
            .ok_or_else(|| eyre!("rotate_left on a node without a right child"))?;
        let inner = self.child_of(y, Side::Left)?;

        self.set_child(x, Side::Right, inner)?;
        self.set_child(y, Side::Left, Some(x))?;
        match (parent, parent_side) {
            (Some(parent), Some(side)) => self.set_child(parent, side, Some(y))?,
            _ => self.promote_to_root(y)?,
        }
        Ok(())
    }

    pub(crate) fn rotate_right(&mut self, x: NodeId) -> Result<()> {
        let parent = self.parent_of(x)?;
        let parent_side = match parent {
            Some(parent) => Some(self.side_of(parent, x)?),
            None => None,
        };
        let y = self
            .child_of(x, Side::Left)?
            .ok_or_else(|| eyre!("rotate_right on a node without a left child"))?;
        let inner = self.child_of(y, Side::Right)?;

        self.set_child(x, Side::Left, inner)?;
        self.set_child(y, Side::Right, Some(x))?;
        match (parent, parent_side) {
            (Some(parent), Some(side)) => self.set_child(parent, side, Some(y))?,
            _ => self.promote_to_root(y)?,
        }
        Ok(())
    }

    /// Restore the red-black properties after `z` was linked in red.
    pub(crate) fn fix_after_insert(&mut self, z: NodeId) -> Result<()> {
        let mut z = z;
        loop {
            let parent = match self.parent_of(z)? {
                Some(parent) => parent,
                None => break,
            };
            if self.color_of(Some(parent)) != Color::Red {
                break;
            }
            let grandparent = match self.parent_of(parent)? {
                Some(grandparent) => grandparent,
                None => break,
            };
            let parent_side = self.side_of(grandparent, parent)?;
            let uncle = self.child_of(grandparent, parent_side.opposite())?;

            if self.color_of(uncle) == Color::Red {
                self.set_color(parent, Color::Black)?;
                if let Some(uncle) = uncle {
                    self.set_color(uncle, Color::Black)?;
                }
                self.set_color(grandparent, Color::Red)?;
                z = grandparent;
                continue;
            }

            if self.side_of(parent, z)? != parent_side {
                // Inner grandchild: rotate it outward first.
                match parent_side {
                    Side::Left => self.rotate_left(parent)?,
                    Side::Right => self.rotate_right(parent)?,
                }
                z = parent;
                continue;
            }

            self.set_color(parent, Color::Black)?;
            self.set_color(grandparent, Color::Red)?;
            match parent_side {
                Side::Left => self.rotate_right(grandparent)?,
                Side::Right => self.rotate_left(grandparent)?,
            }
            break;
        }

        if let Some(root) = self.root {
            self.set_color(root, Color::Black)?;
        }
        Ok(())
    }

    /// Restore the red-black properties after a black page was spliced out.
    /// `x` is the spliced page's replacement (possibly nil), hanging on
    /// `side` of `parent`.
    pub(crate) fn fix_after_delete(
        &mut self,
        x: Option<NodeId>,
        parent: NodeId,
        side: Side,
    ) -> Result<()> {
        let mut x = x;
        let mut parent = parent;
        let mut side = side;
        loop {
            if let Some(node) = x {
                if Some(node) == self.root || self.color_of(Some(node)) == Color::Red {
                    break;
                }
            }

            let mut sibling = self.child_of(parent, side.opposite())?;
            if self.color_of(sibling) == Color::Red {
                let s = sibling
                    .ok_or_else(|| eyre!("red sibling not resident during delete fixup"))?;
                self.set_color(s, Color::Black)?;
                self.set_color(parent, Color::Red)?;
                match side {
                    Side::Left => self.rotate_left(parent)?,
                    Side::Right => self.rotate_right(parent)?,
                }
                sibling = self.child_of(parent, side.opposite())?;
            }

            let s = match sibling {
                Some(s) => s,
                None => {
                    // Nothing to borrow from; push the deficit upward.
                    x = Some(parent);
                    match self.parent_of(parent)? {
                        Some(grandparent) => {
                            side = self.side_of(grandparent, parent)?;
                            parent = grandparent;
                        }
                        None => break,
                    }
                    continue;
                }
            };

            let near = self.child_of(s, side)?;
            let far = self.child_of(s, side.opposite())?;
            if self.color_of(near) == Color::Black && self.color_of(far) == Color::Black {
                self.set_color(s, Color::Red)?;
                x = Some(parent);
                match self.parent_of(parent)? {
                    Some(grandparent) => {
                        side = self.side_of(grandparent, parent)?;
                        parent = grandparent;
                    }
                    None => break,
                }
                continue;
            }

            let s = if self.color_of(far) == Color::Black {
                // The near nephew is red: rotate it into the far position.
                if let Some(near) = near {
                    self.set_color(near, Color::Black)?;
                }
                self.set_color(s, Color::Red)?;
                match side {
                    Side::Left => self.rotate_right(s)?,
                    Side::Right => self.rotate_left(s)?,
                }
                self.child_of(parent, side.opposite())?
                    .ok_or_else(|| eyre!("sibling vanished during delete fixup"))?
            } else {
                s
            };

            let parent_color = self.color_of(Some(parent));
            self.set_color(s, parent_color)?;
            self.set_color(parent, Color::Black)?;
            if let Some(far) = self.child_of(s, side.opposite())? {
                self.set_color(far, Color::Black)?;
            }
            match side {
                Side::Left => self.rotate_left(parent)?,
                Side::Right => self.rotate_right(parent)?,
            }
            x = self.root;
            break;
        }

        if let Some(x) = x {
            self.set_color(x, Color::Black)?;
        }
        Ok(())
    }
}
