//! Whole-tree consistency walk, for tests and debugging.

use super::Tree;
use crate::{
    error::Result,
    storage::{NodeId, NodeStore},
};
use itertools::Itertools;
use std::fmt::Debug;

impl<K, V, S> Tree<K, V, S>
where
    K: Ord + Clone + Debug,
    V: Clone,
    S: NodeStore<K, V>,
{
    /// Checks every structural invariant the tree relies on and panics on
    /// the first violation:
    ///
    /// * keys strictly ascending per node, leaf arity (`|keys| == |values|`)
    ///   and internal arity (`|children| == |keys| + 1`),
    /// * every separator equal to the subtree minimum of the child right of
    ///   it, and every subtree minimum a lower bound on everything in its
    ///   subtree, pending messages included,
    /// * every key and buffered message inside its node's separator range,
    /// * buffers sorted, unique by key and within capacity,
    /// * occupancy between `(fanout - 1) / 2` and `fanout - 1` for every
    ///   non-root node,
    /// * all leaves at the same depth, threaded into one doubly-linked
    ///   chain whose traversal yields all entries in ascending order,
    /// * the entry count equal to the number of materialized entries.
    ///
    /// I/O errors from the store are returned, not panicked.
    pub fn verify(&self) -> Result<()> {
        let Some(root) = *self.root.read() else {
            assert_eq!(self.len(), 0, "entries counted in an empty tree");
            return Ok(());
        };
        {
            let node = self.store.get(root)?;
            let node = node.read();
            assert_eq!(node.parent, None, "root has a parent");
            if !node.is_leaf() {
                assert!(
                    node.children.len() >= 2,
                    "internal root left with a single child"
                );
            }
        }

        let mut walk = Walk {
            leaves: Vec::new(),
            leaf_depth: None,
        };
        self.verify_node(root, None, None, None, 1, &mut walk)?;

        // The leaf chain must thread the DFS leaf order exactly, both ways.
        for (a, b) in walk.leaves.iter().tuple_windows() {
            assert_eq!(
                self.store.get(*a)?.read().right_sibling,
                Some(*b),
                "broken right leaf link at {}",
                a
            );
            assert_eq!(
                self.store.get(*b)?.read().left_sibling,
                Some(*a),
                "broken left leaf link at {}",
                b
            );
        }
        if let Some(first) = walk.leaves.first() {
            assert_eq!(
                self.store.get(*first)?.read().left_sibling,
                None,
                "leftmost leaf has a left sibling"
            );
        }
        if let Some(last) = walk.leaves.last() {
            assert_eq!(
                self.store.get(*last)?.read().right_sibling,
                None,
                "rightmost leaf has a right sibling"
            );
        }

        let mut chained: Vec<K> = Vec::new();
        for leaf in &walk.leaves {
            chained.extend(self.store.get(*leaf)?.read().keys.iter().cloned());
        }
        assert!(
            chained.windows(2).all(|w| w[0] < w[1]),
            "leaf chain yields keys out of order"
        );
        assert_eq!(chained.len(), self.len(), "entry count drifted");
        Ok(())
    }

    fn verify_node(
        &self,
        id: NodeId,
        expected_parent: Option<NodeId>,
        lo: Option<&K>,
        hi: Option<&K>,
        depth: u32,
        walk: &mut Walk,
    ) -> Result<()> {
        let node_ref = self.store.get(id)?;
        let node = node_ref.read();

        assert_eq!(node.parent, expected_parent, "parent link astray at {}", id);
        assert!(
            node.keys.iter().tuple_windows().all(|(a, b)| a < b),
            "keys out of order in {}",
            id
        );
        assert!(node.buffer.is_well_formed(), "buffer disordered in {}", id);
        assert!(
            node.buffer.len() <= self.params.buffer_capacity,
            "buffer over capacity in {}",
            id
        );
        if expected_parent.is_some() {
            assert!(
                node.keys.len() >= self.params.min_keys()
                    && node.keys.len() <= self.params.fanout - 1,
                "occupancy {} outside bounds in {}",
                node.keys.len(),
                id
            );
        }

        let in_range =
            |key: &K| lo.map_or(true, |lo| lo <= key) && hi.map_or(true, |hi| key < hi);
        for key in &node.keys {
            assert!(in_range(key), "key {:?} strayed outside {}", key, id);
        }
        for msg in node.buffer.iter() {
            assert!(
                in_range(msg.key()),
                "message for {:?} strayed outside {}",
                msg.key(),
                id
            );
            assert!(
                node.subtree_min_key.as_ref().map_or(false, |min| min <= msg.key()),
                "message for {:?} below the subtree minimum of {}",
                msg.key(),
                id
            );
        }

        if node.is_leaf() {
            assert_eq!(
                node.keys.len(),
                node.values.len(),
                "leaf arity broken in {}",
                id
            );
            assert!(node.children.is_empty(), "leaf {} has children", id);
            match walk.leaf_depth {
                Some(expected) => assert_eq!(depth, expected, "leaf {} at odd depth", id),
                None => walk.leaf_depth = Some(depth),
            }
            walk.leaves.push(id);
            // The minimum is a lower bound: message collapse may leave it
            // below the exact content minimum until the next leaf apply.
            if let Some(content_min) = node.local_min() {
                assert!(
                    node.subtree_min_key.as_ref().map_or(false, |min| min <= content_min),
                    "subtree minimum above leaf content in {}",
                    id
                );
            }
            return Ok(());
        }

        assert_eq!(
            node.children.len(),
            node.keys.len() + 1,
            "internal arity broken in {}",
            id
        );
        assert!(node.values.is_empty(), "internal {} holds values", id);

        let separators = node.keys.clone();
        for (ix, child) in node.children.iter().enumerate() {
            let child_lo = if ix == 0 { lo } else { Some(&separators[ix - 1]) };
            let child_hi = separators.get(ix).or(hi);
            self.verify_node(*child, Some(id), child_lo, child_hi, depth + 1, walk)?;
        }

        for (ix, sep) in separators.iter().enumerate() {
            let child_min = self
                .store
                .get(node.children[ix + 1])?
                .read()
                .subtree_min_key
                .clone();
            assert_eq!(
                child_min.as_ref(),
                Some(sep),
                "separator {:?} drifted from its child minimum in {}",
                sep,
                id
            );
        }

        let child0_min = self
            .store
            .get(node.children[0])?
            .read()
            .subtree_min_key
            .clone();
        match (&node.subtree_min_key, &child0_min) {
            (Some(min), Some(child_min)) => assert!(
                min <= child_min,
                "subtree minimum above first child in {}",
                id
            ),
            (min, child_min) => panic!(
                "missing subtree minimum around {}: {:?} vs child {:?}",
                id, min, child_min
            ),
        }

        for (a, b) in node.children.iter().tuple_windows() {
            assert_eq!(
                self.store.get(*a)?.read().right_sibling,
                Some(*b),
                "adjacent children of {} not right-linked",
                id
            );
            assert_eq!(
                self.store.get(*b)?.read().left_sibling,
                Some(*a),
                "adjacent children of {} not left-linked",
                id
            );
        }
        Ok(())
    }
}

struct Walk {
    leaves: Vec<NodeId>,
    leaf_depth: Option<u32>,
}
