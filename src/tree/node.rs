use super::buffer::MessageBuffer;
use crate::storage::NodeId;
use serde::{Deserialize, Serialize};

/// One tree page.
///
/// A leaf carries `keys` and the matching `values`; an internal node carries
/// `keys` as separators between `children` (`children.len() == keys.len() +
/// 1`, every key below `children[i]` is smaller than `keys[i]`, and
/// `keys[i]` equals the subtree minimum of `children[i + 1]`). Every node
/// additionally buffers pending messages for its subtree.
///
/// All links are store handles. `children` is the owning chain; `parent`,
/// `left_sibling` and `right_sibling` are back-references. Leaves are
/// threaded into a doubly-linked chain in key order; internal nodes carry
/// the same links, but structural operations only act on a sibling that
/// shares the node's parent.
///
/// The field order is the serialization contract: the store's codec writes
/// fields in declaration order, collections as length-prefixed runs and
/// handles as integers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node<K, V> {
    pub(crate) is_leaf: bool,
    pub(crate) parent: Option<NodeId>,
    pub(crate) right_sibling: Option<NodeId>,
    pub(crate) left_sibling: Option<NodeId>,
    /// Minimum key anywhere in this subtree, pending messages included.
    pub(crate) subtree_min_key: Option<K>,
    pub(crate) keys: Vec<K>,
    pub(crate) values: Vec<V>,
    pub(crate) children: Vec<NodeId>,
    pub(crate) buffer: MessageBuffer<K, V>,
}

impl<K: Ord, V> Node<K, V> {
    pub(crate) fn empty_leaf() -> Self {
        Node {
            is_leaf: true,
            parent: None,
            right_sibling: None,
            left_sibling: None,
            subtree_min_key: None,
            keys: Vec::new(),
            values: Vec::new(),
            children: Vec::new(),
            buffer: MessageBuffer::new(),
        }
    }

    /// Builds the internal node placed above an old root before a root
    /// split.
    pub(crate) fn internal_above(child: NodeId, child_min: Option<K>) -> Self {
        Node {
            is_leaf: false,
            parent: None,
            right_sibling: None,
            left_sibling: None,
            subtree_min_key: child_min,
            keys: Vec::new(),
            values: Vec::new(),
            children: vec![child],
            buffer: MessageBuffer::new(),
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.is_leaf
    }

    /// A node transiently holds `fanout` keys only between overfill and the
    /// split that resolves it.
    pub(crate) fn is_overfull(&self, fanout: usize) -> bool {
        self.keys.len() >= fanout
    }

    pub(crate) fn is_underfull(&self, min_keys: usize) -> bool {
        self.keys.len() < min_keys
    }

    /// Index of the child whose separator range covers `key`: the number of
    /// separators not exceeding it.
    pub(crate) fn child_index_for(&self, key: &K) -> usize {
        self.keys.partition_point(|sep| sep <= key)
    }

    pub(crate) fn child_position(&self, id: NodeId) -> Option<usize> {
        self.children.iter().position(|c| *c == id)
    }

    /// Binary search among a leaf's keys.
    pub(crate) fn leaf_slot(&self, key: &K) -> Result<usize, usize> {
        self.keys.binary_search(key)
    }

    /// Lowers the subtree minimum to cover a message entering this node's
    /// buffer. Only ever lowers: raising the minimum requires looking at the
    /// node's content and is done by the rebalance pass.
    pub(crate) fn fold_min(&mut self, key: &K)
    where
        K: Clone,
    {
        match &self.subtree_min_key {
            Some(min) if min <= key => {}
            _ => self.subtree_min_key = Some(key.clone()),
        }
    }

    /// The minimum derivable from this node alone: first leaf key and first
    /// buffered key. For internal nodes the first child's minimum has to be
    /// folded in by the caller.
    pub(crate) fn local_min(&self) -> Option<&K> {
        let structural = if self.is_leaf {
            self.keys.first()
        } else {
            None
        };
        match (structural, self.buffer.first_key()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    pub(crate) fn buffer_full(&self, capacity: usize) -> bool {
        self.buffer.len() >= capacity
    }
}

impl<K: Ord + Clone, V> Node<K, V> {
    /// Applies one insert to a leaf. Returns the entry-count delta: 1 for a
    /// new key, 0 for a replacement.
    pub(crate) fn leaf_insert(&mut self, key: K, value: V) -> isize {
        debug_assert!(self.is_leaf);
        match self.leaf_slot(&key) {
            Ok(ix) => {
                self.values[ix] = value;
                0
            }
            Err(ix) => {
                self.keys.insert(ix, key);
                self.values.insert(ix, value);
                1
            }
        }
    }

    /// Applies one delete to a leaf. Returns the entry-count delta: -1 if
    /// the key was present, 0 otherwise.
    pub(crate) fn leaf_delete(&mut self, key: &K) -> isize {
        debug_assert!(self.is_leaf);
        match self.leaf_slot(key) {
            Ok(ix) => {
                self.keys.remove(ix);
                self.values.remove(ix);
                -1
            }
            Err(_) => 0,
        }
    }
}
