//! Node splits and the upward split cascade.

use super::Tree;
use crate::{
    error::Result,
    storage::{NodeId, NodeStore},
    tree::{MessageBuffer, Node},
};
use log::{debug, trace};
use std::collections::VecDeque;

impl<K, V, S> Tree<K, V, S>
where
    K: Ord + Clone,
    V: Clone,
    S: NodeStore<K, V>,
{
    /// Splits `start` and then every ancestor the promoted separators
    /// overfill, allocating a fresh root when the cascade outgrows the
    /// current one. Newly created nodes inherit part of the split buffer and
    /// are queued for a fullness re-check.
    pub(super) fn split_up(&self, start: NodeId, queue: &mut VecDeque<NodeId>) -> Result<()> {
        let mut id = start;
        loop {
            let (overfull, parent) = {
                let node = self.store.get(id)?;
                let node = node.read();
                (node.is_overfull(self.params.fanout), node.parent)
            };
            if !overfull {
                return Ok(());
            }
            let parent_id = match parent {
                Some(parent_id) => parent_id,
                None => self.grow_root(id)?,
            };
            let right_id = self.split_child(parent_id, id)?;
            queue.push_back(id);
            queue.push_back(right_id);
            id = parent_id;
        }
    }

    /// Puts a fresh, empty internal root above the current one.
    fn grow_root(&self, child: NodeId) -> Result<NodeId> {
        let child_min = self.store.get(child)?.read().subtree_min_key.clone();
        let root_id = self
            .store
            .allocate(Node::internal_above(child, child_min))?;
        {
            let node = self.store.get_mut(child)?;
            node.write().parent = Some(root_id);
        }
        *self.root.write() = Some(root_id);
        debug!("tree grew new root {}", root_id);
        Ok(root_id)
    }

    /// Splits `child`, a child of `parent`, around the fanout midpoint.
    ///
    /// The upper half moves into a new right sibling which is threaded into
    /// the sibling chain between `child` and its old right neighbor. A leaf
    /// promotes a copy of the right half's first key as the new separator;
    /// an internal node promotes its median outright. Buffered messages
    /// whose keys are covered by the new right subtree move with it.
    fn split_child(&self, parent_id: NodeId, child_id: NodeId) -> Result<NodeId> {
        let mid = self.params.fanout / 2;
        let (right, old_right, moved_children, separator) = {
            let node_ref = self.store.get_mut(child_id)?;
            let mut node = node_ref.write();
            let mut right: Node<K, V> = Node {
                is_leaf: node.is_leaf,
                parent: Some(parent_id),
                right_sibling: node.right_sibling,
                left_sibling: Some(child_id),
                subtree_min_key: None,
                keys: Vec::new(),
                values: Vec::new(),
                children: Vec::new(),
                buffer: MessageBuffer::new(),
            };
            let separator;
            if node.is_leaf {
                right.keys = node.keys.split_off(mid);
                right.values = node.values.split_off(mid);
                separator = right.keys[0].clone();
            } else {
                let mut upper = node.keys.split_off(mid);
                separator = upper.remove(0);
                right.keys = upper;
                right.children = node.children.split_off(mid + 1);
            }
            right.subtree_min_key = Some(separator.clone());
            right.buffer = MessageBuffer::from_sorted(node.buffer.drain_from(&separator));
            let moved = right.children.clone();
            (right, node.right_sibling, moved, separator)
        };

        let right_id = self.store.allocate(right)?;
        {
            let node = self.store.get_mut(child_id)?;
            node.write().right_sibling = Some(right_id);
        }
        if let Some(sibling) = old_right {
            let node = self.store.get_mut(sibling)?;
            node.write().left_sibling = Some(right_id);
        }
        for grandchild in moved_children {
            let node = self.store.get_mut(grandchild)?;
            node.write().parent = Some(right_id);
        }
        {
            let parent_ref = self.store.get_mut(parent_id)?;
            let mut parent = parent_ref.write();
            let ix = parent
                .child_position(child_id)
                .expect("split child not under its parent");
            parent.keys.insert(ix, separator);
            parent.children.insert(ix + 1, right_id);
        }
        trace!("{}: split off right sibling {}", child_id, right_id);
        Ok(right_id)
    }
}
