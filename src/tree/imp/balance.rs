//! Underfill repair: borrow from a sibling when it has keys to spare, merge
//! into it otherwise, and keep subtree minima and parent separators honest
//! on the way up.

use super::Tree;
use crate::{
    error::Result,
    storage::{NodeId, NodeStore},
};
use log::trace;
use std::{collections::VecDeque, mem};

impl<K, V, S> Tree<K, V, S>
where
    K: Ord + Clone,
    V: Clone,
    S: NodeStore<K, V>,
{
    /// Walks from `start` to the root. On each level an underfull non-root
    /// node is repaired in policy order borrow-left, borrow-right,
    /// merge-left, merge-right, each restricted to a sibling under the same
    /// parent; any other node gets its subtree minimum recomputed and its
    /// parent separator realigned, so key removals at the leaf level
    /// propagate. Nodes whose buffers ran over while absorbing a sibling's
    /// messages are queued for a flush re-check.
    pub(super) fn rebalance_up(&self, start: NodeId, queue: &mut VecDeque<NodeId>) -> Result<()> {
        let mut id = start;
        loop {
            let (parent, underfull) = {
                let node = self.store.get(id)?;
                let node = node.read();
                (node.parent, node.is_underfull(self.params.min_keys()))
            };
            if parent.is_some() && underfull {
                let _ = self.try_borrow_left(id, queue)?
                    || self.try_borrow_right(id, queue)?
                    || self.try_merge_left(id, queue)?
                    || self.try_merge_right(id, queue)?;
                // All four can fail only while the parent has no second
                // child, which the root collapse resolves afterwards.
            } else {
                self.refresh_min(id)?;
                self.repair_parent_separator(id)?;
            }
            match parent {
                Some(parent_id) => id = parent_id,
                None => return Ok(()),
            }
        }
    }

    /// Recomputes `subtree_min_key`: first child's minimum (internal) or
    /// first key (leaf), folded with the first buffered key.
    fn refresh_min(&self, id: NodeId) -> Result<()> {
        let first_child = {
            let node = self.store.get(id)?;
            let node = node.read();
            if node.is_leaf() {
                None
            } else {
                node.children.first().copied()
            }
        };
        let structural = match first_child {
            Some(child) => self.store.get(child)?.read().subtree_min_key.clone(),
            None => None,
        };
        let node = self.store.get_mut(id)?;
        let mut node = node.write();
        let min = match (structural, node.local_min().cloned()) {
            (Some(a), Some(b)) => Some(if a <= b { a } else { b }),
            (a, b) => a.or(b),
        };
        node.subtree_min_key = min;
        Ok(())
    }

    /// Realigns the parent separator left of `id` with `id`'s subtree
    /// minimum. The first child has no separator of its own; its minimum
    /// surfaces as the parent's once the walk reaches it.
    fn repair_parent_separator(&self, id: NodeId) -> Result<()> {
        let (parent, min) = {
            let node = self.store.get(id)?;
            let node = node.read();
            (node.parent, node.subtree_min_key.clone())
        };
        let (Some(parent_id), Some(min)) = (parent, min) else {
            return Ok(());
        };
        let parent_ref = self.store.get_mut(parent_id)?;
        let mut parent = parent_ref.write();
        if let Some(ix) = parent.child_position(id) {
            if ix > 0 {
                parent.keys[ix - 1] = min;
            }
        }
        Ok(())
    }

    /// Whether `sibling` shares `parent` and can give up a key.
    fn is_borrowable(&self, sibling: Option<NodeId>, parent: Option<NodeId>) -> Result<bool> {
        let Some(sibling) = sibling else {
            return Ok(false);
        };
        let node = self.store.get(sibling)?;
        let node = node.read();
        Ok(node.parent == parent && node.keys.len() > self.params.min_keys())
    }

    fn try_borrow_left(&self, id: NodeId, queue: &mut VecDeque<NodeId>) -> Result<bool> {
        let (parent, left) = {
            let node = self.store.get(id)?;
            let node = node.read();
            (node.parent, node.left_sibling)
        };
        if !self.is_borrowable(left, parent)? {
            return Ok(false);
        }
        let left_id = left.expect("borrowable sibling vanished");

        let mut moved_child = None;
        let now_full = {
            let node_ref = self.store.get_mut(id)?;
            let left_ref = self.store.get_mut(left_id)?;
            let mut node = node_ref.write();
            let mut left = left_ref.write();
            if node.is_leaf() {
                let key = left.keys.pop().expect("borrowable leaf is empty");
                let value = left.values.pop().expect("leaf arity broken");
                let run = left.buffer.drain_from(&key);
                node.keys.insert(0, key.clone());
                node.values.insert(0, value);
                node.buffer.splice_front(run);
                node.subtree_min_key = Some(key);
            } else {
                let moved = left.children.pop().expect("borrowable node has no children");
                left.keys.pop();
                let moved_min = self
                    .store
                    .get(moved)?
                    .read()
                    .subtree_min_key
                    .clone()
                    .expect("live subtree without a minimum");
                // The old first child's minimum becomes the separator in
                // front of it, read fresh since the cached node minimum may
                // lag behind a leaf-level removal.
                let sep = self
                    .store
                    .get(node.children[0])?
                    .read()
                    .subtree_min_key
                    .clone()
                    .expect("live subtree without a minimum");
                let run = left.buffer.drain_from(&moved_min);
                node.keys.insert(0, sep);
                node.children.insert(0, moved);
                node.buffer.splice_front(run);
                node.subtree_min_key = Some(moved_min);
                moved_child = Some(moved);
            }
            node.buffer_full(self.params.buffer_capacity)
        };
        if let Some(child) = moved_child {
            let node = self.store.get_mut(child)?;
            node.write().parent = Some(id);
        }
        self.repair_parent_separator(id)?;
        if now_full {
            queue.push_back(id);
        }
        trace!("{}: borrowed from left sibling {}", id, left_id);
        Ok(true)
    }

    fn try_borrow_right(&self, id: NodeId, queue: &mut VecDeque<NodeId>) -> Result<bool> {
        let (parent, right) = {
            let node = self.store.get(id)?;
            let node = node.read();
            (node.parent, node.right_sibling)
        };
        if !self.is_borrowable(right, parent)? {
            return Ok(false);
        }
        let right_id = right.expect("borrowable sibling vanished");

        let mut moved_child = None;
        let now_full = {
            let node_ref = self.store.get_mut(id)?;
            let right_ref = self.store.get_mut(right_id)?;
            let mut node = node_ref.write();
            let mut right = right_ref.write();
            if node.is_leaf() {
                let key = right.keys.remove(0);
                let value = right.values.remove(0);
                // Everything below the sibling's new minimum moves along.
                let threshold = right.keys[0].clone();
                let run = right.buffer.drain_upto(&threshold);
                node.keys.push(key);
                node.values.push(value);
                node.buffer.splice_back(run);
                let min = node.local_min().cloned();
                node.subtree_min_key = min;
                right.subtree_min_key = Some(threshold);
            } else {
                let moved = right.children.remove(0);
                let sep = self
                    .store
                    .get(moved)?
                    .read()
                    .subtree_min_key
                    .clone()
                    .expect("live subtree without a minimum");
                let threshold = right.keys.remove(0);
                let run = right.buffer.drain_upto(&threshold);
                node.keys.push(sep);
                node.children.push(moved);
                node.buffer.splice_back(run);
                right.subtree_min_key = Some(threshold);
                moved_child = Some(moved);
            }
            node.buffer_full(self.params.buffer_capacity)
        };
        if let Some(child) = moved_child {
            let node = self.store.get_mut(child)?;
            node.write().parent = Some(id);
        }
        self.repair_parent_separator(id)?;
        self.repair_parent_separator(right_id)?;
        if now_full {
            queue.push_back(id);
        }
        trace!("{}: borrowed from right sibling {}", id, right_id);
        Ok(true)
    }

    /// Whether `sibling` exists and hangs under the same parent as the
    /// (parented) node being repaired. Leaf chains cross parent boundaries,
    /// so this gate is what keeps merges inside one parent.
    fn shares_parent(&self, sibling: Option<NodeId>, parent: Option<NodeId>) -> Result<bool> {
        let Some(sibling) = sibling else {
            return Ok(false);
        };
        Ok(self.store.get(sibling)?.read().parent == parent)
    }

    fn try_merge_left(&self, id: NodeId, queue: &mut VecDeque<NodeId>) -> Result<bool> {
        let (parent, left, right) = {
            let node = self.store.get(id)?;
            let node = node.read();
            (node.parent, node.left_sibling, node.right_sibling)
        };
        if !self.shares_parent(left, parent)? {
            return Ok(false);
        }
        let left_id = left.expect("sibling vanished");
        let parent_id = parent.expect("merge on a parentless node");

        let mut moved_children = Vec::new();
        let now_full = {
            let node_ref = self.store.get_mut(id)?;
            let left_ref = self.store.get_mut(left_id)?;
            let mut node = node_ref.write();
            let mut left = left_ref.write();
            if node.is_leaf() {
                left.keys.append(&mut node.keys);
                left.values.append(&mut node.values);
            } else {
                let sep = self
                    .store
                    .get(node.children[0])?
                    .read()
                    .subtree_min_key
                    .clone()
                    .expect("live subtree without a minimum");
                left.keys.push(sep);
                left.keys.append(&mut node.keys);
                moved_children = mem::take(&mut node.children);
                left.children.extend(moved_children.iter().copied());
            }
            left.buffer.splice_back(node.buffer.take());
            left.right_sibling = node.right_sibling;
            left.buffer_full(self.params.buffer_capacity)
        };
        for child in moved_children {
            let node = self.store.get_mut(child)?;
            node.write().parent = Some(left_id);
        }
        if let Some(sibling) = right {
            let node = self.store.get_mut(sibling)?;
            node.write().left_sibling = Some(left_id);
        }
        {
            let parent_ref = self.store.get_mut(parent_id)?;
            let mut parent = parent_ref.write();
            let ix = parent
                .child_position(id)
                .expect("merged child not under its parent");
            parent.children.remove(ix);
            parent.keys.remove(ix - 1);
        }
        self.store.remove(id)?;
        trace!("{}: merged into left sibling {}", id, left_id);

        if now_full {
            queue.push_back(left_id);
        }
        Ok(true)
    }

    fn try_merge_right(&self, id: NodeId, queue: &mut VecDeque<NodeId>) -> Result<bool> {
        let (parent, left, right) = {
            let node = self.store.get(id)?;
            let node = node.read();
            (node.parent, node.left_sibling, node.right_sibling)
        };
        if !self.shares_parent(right, parent)? {
            return Ok(false);
        }
        let right_id = right.expect("sibling vanished");
        let parent_id = parent.expect("merge on a parentless node");

        let mut moved_children = Vec::new();
        let now_full = {
            let node_ref = self.store.get_mut(id)?;
            let right_ref = self.store.get_mut(right_id)?;
            let mut node = node_ref.write();
            let mut right = right_ref.write();
            if node.is_leaf() {
                let mut keys = mem::take(&mut node.keys);
                keys.append(&mut right.keys);
                right.keys = keys;
                let mut values = mem::take(&mut node.values);
                values.append(&mut right.values);
                right.values = values;
            } else {
                let sep = self
                    .store
                    .get(right.children[0])?
                    .read()
                    .subtree_min_key
                    .clone()
                    .expect("live subtree without a minimum");
                let mut keys = mem::take(&mut node.keys);
                keys.push(sep);
                keys.append(&mut right.keys);
                right.keys = keys;
                moved_children = mem::take(&mut node.children);
                let mut children = moved_children.clone();
                children.append(&mut right.children);
                right.children = children;
            }
            right.buffer.splice_front(node.buffer.take());
            // A fully emptied node has no minimum left to hand over.
            if let Some(min) = node.subtree_min_key.take() {
                right.subtree_min_key = Some(min);
            }
            right.left_sibling = node.left_sibling;
            right.buffer_full(self.params.buffer_capacity)
        };
        for child in moved_children {
            let node = self.store.get_mut(child)?;
            node.write().parent = Some(right_id);
        }
        if let Some(sibling) = left {
            let node = self.store.get_mut(sibling)?;
            node.write().right_sibling = Some(right_id);
        }
        {
            let parent_ref = self.store.get_mut(parent_id)?;
            let mut parent = parent_ref.write();
            let ix = parent
                .child_position(id)
                .expect("merged child not under its parent");
            parent.children.remove(ix);
            parent.keys.remove(ix);
        }
        self.store.remove(id)?;
        trace!("{}: merged into right sibling {}", id, right_id);

        if now_full {
            queue.push_back(right_id);
        }
        Ok(true)
    }
}
