//! # Structural Verification
//!
//! Two levels of checking:
//!
//! - [`TreeCore::check_structure`] inspects the *resident* portion only and
//!   performs no I/O. With `runtime_checks` enabled the wrapper runs it after
//!   every mutation: per-node key order, link/RID parity in both directions,
//!   self-references, and red-red violations.
//! - [`TreeCore::verify_red_black`] loads the whole tree and validates the
//!   black-height invariant. Too expensive for the mutation path; the test
//!   suites call it.

use eyre::{ensure, Result};

use crate::cache::NodeId;
use crate::page::Color;
use crate::tree::core::{Side, TreeCore};

impl<K, V> TreeCore<K, V>
where
    K: Ord + Clone,
    V: Clone,
{
    /// Verify the invariants of every resident node. Read-only.
    pub(crate) fn check_structure(&self) -> Result<()> {
        let root = match self.root {
            Some(root) => root,
            None => return Ok(()),
        };
        ensure!(
            self.arena.node(root)?.parent.is_none(),
            "root {} has a resident parent link",
            self.arena.node(root)?.self_rid
        );

        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            self.check_node(id)?;
            let node = self.arena.node(id)?;
            if let Some(left) = node.left {
                stack.push(left);
            }
            if let Some(right) = node.right {
                stack.push(right);
            }
        }
        Ok(())
    }

    fn check_node(&self, id: NodeId) -> Result<()> {
        let codec = &*self.key_codec;
        let node = self.arena.node(id)?;
        let rid = node.self_rid;

        for index in 1..node.count() {
            ensure!(
                node.key_cloned(index - 1, codec)? < node.key_cloned(index, codec)?,
                "node {} has out-of-order or duplicate keys at slot {}",
                rid,
                index
            );
        }

        ensure!(
            node.left != Some(id) && node.right != Some(id),
            "node {} links to itself",
            rid
        );
        if node.left.is_some() {
            ensure!(
                node.left != node.right,
                "node {} has identical left and right children",
                rid
            );
        }
        if rid.is_valid() {
            ensure!(
                node.left_rid != rid && node.right_rid != rid && node.parent_rid != rid,
                "node {} carries a link rid pointing to itself",
                rid
            );
        }

        if let Some(left) = node.left {
            let child = self.arena.node(left)?;
            ensure!(
                child.parent == Some(id),
                "left child {} of {} has a mismatched parent link",
                child.self_rid,
                rid
            );
            ensure!(
                child.self_rid == node.left_rid,
                "left child of {} is {} but the page records {}",
                rid,
                child.self_rid,
                node.left_rid
            );
            ensure!(
                child.parent_rid == rid,
                "left child {} of {} records parent rid {}",
                child.self_rid,
                rid,
                child.parent_rid
            );
            if child.count() > 0 && node.count() > 0 {
                ensure!(
                    child.key_cloned(child.count() - 1, codec)? < node.key_cloned(0, codec)?,
                    "left child {} of {} overlaps its parent's key range",
                    child.self_rid,
                    rid
                );
            }
            ensure!(
                !(node.color == Color::Red && child.color == Color::Red),
                "red node {} has a red left child {}",
                rid,
                child.self_rid
            );
        }

        if let Some(right) = node.right {
            let child = self.arena.node(right)?;
            ensure!(
                child.parent == Some(id),
                "right child {} of {} has a mismatched parent link",
                child.self_rid,
                rid
            );
            ensure!(
                child.self_rid == node.right_rid,
                "right child of {} is {} but the page records {}",
                rid,
                child.self_rid,
                node.right_rid
            );
            ensure!(
                child.parent_rid == rid,
                "right child {} of {} records parent rid {}",
                child.self_rid,
                rid,
                child.parent_rid
            );
            if child.count() > 0 && node.count() > 0 {
                ensure!(
                    child.key_cloned(0, codec)? > node.key_cloned(node.count() - 1, codec)?,
                    "right child {} of {} overlaps its parent's key range",
                    child.self_rid,
                    rid
                );
            }
            ensure!(
                !(node.color == Color::Red && child.color == Color::Red),
                "red node {} has a red right child {}",
                rid,
                child.self_rid
            );
        }

        Ok(())
    }

    /// Load the full tree and verify the red-black path properties.
    /// Returns the black height.
    pub(crate) fn verify_red_black(&mut self) -> Result<usize> {
        let root = match self.root_id()? {
            Some(root) => root,
            None => return Ok(1),
        };
        ensure!(
            self.arena.node(root)?.color == Color::Black,
            "root {} is red",
            self.arena.node(root)?.self_rid
        );
        self.black_height(Some(root))
    }

    fn black_height(&mut self, id: Option<NodeId>) -> Result<usize> {
        let id = match id {
            Some(id) => id,
            None => return Ok(1),
        };
        let color = self.arena.node(id)?.color;
        let left = self.child_of(id, Side::Left)?;
        let right = self.child_of(id, Side::Right)?;

        if color == Color::Red {
            ensure!(
                self.color_of(left) == Color::Black && self.color_of(right) == Color::Black,
                "red node {} has a red child",
                self.arena.node(id)?.self_rid
            );
        }

        let left_height = self.black_height(left)?;
        let right_height = self.black_height(right)?;
        ensure!(
            left_height == right_height,
            "black-height mismatch under node {}: {} vs {}",
            self.arena.node(id)?.self_rid,
            left_height,
            right_height
        );
        Ok(left_height + usize::from(color == Color::Black))
    }
}
