//! Buffer flush: the only path on which messages move downward or become
//! key/value entries.

use super::Tree;
use crate::{
    error::Result,
    storage::{NodeId, NodeStore},
    tree::{Message, MessageBuffer},
};
use log::trace;
use std::collections::VecDeque;

impl<K, V, S> Tree<K, V, S>
where
    K: Ord + Clone,
    V: Clone,
    S: NodeStore<K, V>,
{
    /// Drains full buffers starting at `id` until no full buffer is left.
    ///
    /// Runs over a FIFO worklist of node handles instead of recursing:
    /// structural changes mid-flush (splits, merges, nodes deleted outright)
    /// invalidate any state a recursive caller would have kept, so every
    /// dequeued handle is re-checked for liveness and fullness before it is
    /// processed. Internal flushes enqueue their children left to right;
    /// termination follows because every processed buffer either empties
    /// into the next level or materializes at a leaf.
    ///
    /// Returns the entry-count delta from everything that reached a leaf.
    pub(super) fn flush(&self, id: NodeId) -> Result<isize> {
        let mut delta = 0;
        let mut queue = VecDeque::new();
        queue.push_back(id);
        while let Some(id) = queue.pop_front() {
            if !self.store.contains(id) {
                // merged away after it was enqueued
                continue;
            }
            let (is_leaf, full) = {
                let node = self.store.get(id)?;
                let node = node.read();
                (
                    node.is_leaf(),
                    node.buffer_full(self.params.buffer_capacity),
                )
            };
            if !full {
                continue;
            }
            if is_leaf {
                delta += self.flush_leaf(id, &mut queue)?;
            } else {
                self.flush_internal(id, &mut queue)?;
            }
        }
        Ok(delta)
    }

    /// Routes the whole buffer of an internal node into its children, one
    /// run per separator range, collapsing against messages already pending
    /// there. The children are then queued for their own fullness check.
    fn flush_internal(&self, id: NodeId, queue: &mut VecDeque<NodeId>) -> Result<()> {
        let (runs, children) = {
            let node = self.store.get_mut(id)?;
            let mut node = node.write();
            let separators = node.keys.clone();
            (node.buffer.partition_by(&separators), node.children.clone())
        };
        trace!("{}: routing buffer into {} children", id, children.len());
        for (child_id, run) in children.iter().zip(runs) {
            if run.is_empty() {
                continue;
            }
            let child = self.store.get_mut(*child_id)?;
            let mut child = child.write();
            for msg in run {
                child.fold_min(msg.key());
                child.buffer.inject(msg);
            }
        }
        queue.extend(children);
        Ok(())
    }

    /// Materializes a leaf's buffer: every delete first, then the inserts in
    /// key order for as long as the leaf has room. Unapplied inserts stay
    /// buffered for a later flush. Afterwards the leaf is re-split or
    /// re-balanced as its new occupancy demands.
    fn flush_leaf(&self, id: NodeId, queue: &mut VecDeque<NodeId>) -> Result<isize> {
        let mut delta = 0;
        let overfull = {
            let node_ref = self.store.get_mut(id)?;
            let mut node = node_ref.write();

            let mut pending = Vec::new();
            for msg in node.buffer.take() {
                match msg {
                    Message::Delete { key } => delta += node.leaf_delete(&key),
                    Message::Insert { key, value } => pending.push((key, value)),
                }
            }
            let mut unapplied = Vec::new();
            for (key, value) in pending {
                if !unapplied.is_empty() || node.is_overfull(self.params.fanout) {
                    unapplied.push(Message::Insert { key, value });
                } else {
                    delta += node.leaf_insert(key, value);
                }
            }
            node.buffer = MessageBuffer::from_sorted(unapplied);

            let min = node.local_min().cloned();
            node.subtree_min_key = min;
            node.is_overfull(self.params.fanout)
        };
        trace!("{}: applied leaf buffer, delta {}", id, delta);

        if overfull {
            self.split_up(id, queue)?;
        }
        self.rebalance_up(id, queue)?;

        // Leftover inserts may still exceed the buffer bound; with the leaf
        // split back below the fanout the next round makes progress.
        if self.store.contains(id) {
            let full = {
                let node = self.store.get(id)?;
                let node = node.read();
                node.buffer_full(self.params.buffer_capacity)
            };
            if full {
                queue.push_back(id);
            }
        }
        Ok(delta)
    }
}
