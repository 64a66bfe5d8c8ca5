//! Tree implementation: façade operations and root management. The
//! structure-changing passes live in the submodules (`flush`, `split`,
//! `balance`, `verify`).

use super::{message::Message, node::Node};
use crate::{
    config::{TreeConfig, TreeParams},
    error::Result,
    size::StaticSize,
    storage::{NodeId, NodeStore},
};
use log::trace;
use parking_lot::RwLock;
use std::{
    marker::PhantomData,
    sync::atomic::{AtomicUsize, Ordering},
};

/// The B^ε-tree over a node store `S`.
///
/// All operations take `&self`; node access is mediated by the store and the
/// root handle sits behind its own lock. Operations are not atomic against
/// each other, the tree expects a single writer at a time.
pub struct Tree<K, V, S> {
    store: S,
    root: RwLock<Option<NodeId>>,
    /// Number of materialized entries. Pending buffer messages do not count
    /// until a leaf applies them.
    entries: AtomicUsize,
    params: TreeParams,
    marker: PhantomData<(K, V)>,
}

impl<K, V, S> Tree<K, V, S>
where
    K: Ord + Clone,
    V: Clone,
    S: NodeStore<K, V>,
{
    /// Returns a new, empty tree sized for `K` and `V` per `config`.
    pub fn new(store: S, config: TreeConfig) -> Result<Self>
    where
        K: StaticSize,
        V: StaticSize,
    {
        let params = config.params::<K, V>()?;
        Ok(Self::with_params(store, params))
    }

    /// Returns a new, empty tree with explicitly chosen sizing constants.
    pub fn with_params(store: S, params: TreeParams) -> Self {
        Tree {
            store,
            root: RwLock::new(None),
            entries: AtomicUsize::new(0),
            params,
            marker: PhantomData,
        }
    }

    /// Opens a tree identified by the root handle of a previous
    /// [`sync`](Tree::sync). The entry count is rebuilt from the leaf chain.
    pub fn open(store: S, params: TreeParams, root: NodeId) -> Result<Self> {
        let tree = Tree {
            store,
            root: RwLock::new(Some(root)),
            entries: AtomicUsize::new(0),
            params,
            marker: PhantomData,
        };
        let count = tree.count_entries()?;
        tree.entries.store(count, Ordering::Relaxed);
        Ok(tree)
    }

    /// Returns the store backing this tree.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Number of present entries, reflecting materialized state: a write
    /// still sitting in a buffer is counted once a flush applies it at a
    /// leaf.
    pub fn len(&self) -> usize {
        self.entries.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Upserts `value` under `key`. Inserting over a present key replaces
    /// its value and leaves [`len`](Tree::len) unchanged.
    pub fn insert(&self, key: K, value: V) -> Result<()> {
        let delta = self.inject(Message::Insert { key, value })?;
        self.note_entries(delta);
        Ok(())
    }

    /// Removes `key`. Removing an absent key is a silent no-op.
    pub fn remove(&self, key: K) -> Result<()> {
        if self.root.read().is_none() {
            return Ok(());
        }
        let delta = self.inject(Message::Delete { key })?;
        self.note_entries(delta);
        self.collapse_root()
    }

    /// Point query. A buffered message shadows the data below it, so the
    /// first message found on the way down is authoritative; completed
    /// writes are always visible.
    pub fn get(&self, key: &K) -> Result<Option<V>> {
        let Some(mut cur) = *self.root.read() else {
            return Ok(None);
        };
        loop {
            let next = {
                let node = self.store.get(cur)?;
                let node = node.read();
                if let Some(msg) = node.buffer.lookup(key) {
                    return Ok(match msg {
                        Message::Insert { value, .. } => Some(value.clone()),
                        Message::Delete { .. } => None,
                    });
                }
                if node.is_leaf() {
                    return Ok(node.leaf_slot(key).ok().map(|ix| node.values[ix].clone()));
                }
                node.children[node.child_index_for(key)]
            };
            cur = next;
        }
    }

    pub fn contains(&self, key: &K) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Number of levels, leaves included. 0 for a tree that never held a
    /// key.
    pub fn depth(&self) -> Result<u32> {
        let Some(mut cur) = *self.root.read() else {
            return Ok(0);
        };
        let mut depth = 1;
        loop {
            let next = {
                let node = self.store.get(cur)?;
                let node = node.read();
                if node.is_leaf() {
                    return Ok(depth);
                }
                node.children[0]
            };
            depth += 1;
            cur = next;
        }
    }

    /// Persists every dirty node through the store and returns the root
    /// handle for a later [`open`](Tree::open).
    pub fn sync(&self) -> Result<Option<NodeId>> {
        trace!("sync");
        self.store.sync()?;
        Ok(*self.root.read())
    }

    /// Enqueues a message at the root and flushes if the buffer ran full.
    /// Returns the entry-count delta materialized by the flush.
    fn inject(&self, msg: Message<K, V>) -> Result<isize> {
        let root_id = self.ensure_root()?;
        let full = {
            let node = self.store.get_mut(root_id)?;
            let mut node = node.write();
            node.fold_min(msg.key());
            node.buffer.inject(msg);
            node.buffer_full(self.params.buffer_capacity)
        };
        if full {
            self.flush(root_id)
        } else {
            Ok(0)
        }
    }

    fn ensure_root(&self) -> Result<NodeId> {
        if let Some(id) = *self.root.read() {
            return Ok(id);
        }
        let id = self.store.allocate(Node::empty_leaf())?;
        *self.root.write() = Some(id);
        trace!("allocated root leaf {}", id);
        Ok(id)
    }

    /// While the root is an internal node with a single child, that child
    /// takes over as root.
    fn collapse_root(&self) -> Result<()> {
        loop {
            let Some(root_id) = *self.root.read() else {
                return Ok(());
            };
            let lone_child = {
                let node = self.store.get(root_id)?;
                let node = node.read();
                if !node.is_leaf() && node.children.len() == 1 {
                    Some(node.children[0])
                } else {
                    None
                }
            };
            let Some(child) = lone_child else {
                return Ok(());
            };
            {
                let node = self.store.get_mut(child)?;
                node.write().parent = None;
            }
            self.store.remove(root_id)?;
            *self.root.write() = Some(child);
            trace!("root collapsed into {}", child);
        }
    }

    fn note_entries(&self, delta: isize) {
        if delta >= 0 {
            self.entries.fetch_add(delta as usize, Ordering::Relaxed);
        } else {
            self.entries.fetch_sub(delta.unsigned_abs(), Ordering::Relaxed);
        }
    }

    fn count_entries(&self) -> Result<usize> {
        let Some(root) = *self.root.read() else {
            return Ok(0);
        };
        let mut cur = root;
        let leftmost = loop {
            let next = {
                let node = self.store.get(cur)?;
                let node = node.read();
                if node.is_leaf() {
                    None
                } else {
                    Some(node.children[0])
                }
            };
            match next {
                Some(child) => cur = child,
                None => break cur,
            }
        };
        let mut count = 0;
        let mut walk = Some(leftmost);
        while let Some(id) = walk {
            let node = self.store.get(id)?;
            let node = node.read();
            count += node.keys.len();
            walk = node.right_sibling;
        }
        Ok(count)
    }
}

mod balance;
mod flush;
mod split;
mod verify;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SwapStore;

    fn tiny_tree(dir: &tempfile::TempDir) -> Tree<i64, i64, SwapStore<i64, i64>> {
        let store = SwapStore::open(dir.path(), 32).unwrap();
        Tree::with_params(store, TreeParams::new(3, 2).unwrap())
    }

    #[test]
    fn empty_tree_answers_without_a_root() {
        let dir = tempfile::tempdir().unwrap();
        let tree = tiny_tree(&dir);
        assert_eq!(tree.get(&1).unwrap(), None);
        assert_eq!(tree.depth().unwrap(), 0);
        assert!(tree.is_empty());
        tree.remove(1).unwrap();
        tree.verify().unwrap();
    }

    #[test]
    fn first_insert_allocates_a_leaf_root() {
        let dir = tempfile::tempdir().unwrap();
        let tree = tiny_tree(&dir);
        tree.insert(1, 2).unwrap();
        assert_eq!(tree.depth().unwrap(), 1);
        assert_eq!(tree.get(&1).unwrap(), Some(2));
    }

    #[test]
    fn buffered_write_shadows_the_leaf() {
        let dir = tempfile::tempdir().unwrap();
        let tree = tiny_tree(&dir);
        // Capacity 2: the first two writes flush into the leaf, the
        // replacement stays buffered and must shadow the applied value.
        tree.insert(1, 10).unwrap();
        tree.insert(2, 20).unwrap();
        tree.insert(1, 11).unwrap();
        assert_eq!(tree.get(&1).unwrap(), Some(11));
        assert_eq!(tree.get(&2).unwrap(), Some(20));
        tree.verify().unwrap();
    }

    #[test]
    fn root_grows_and_collapses() {
        let dir = tempfile::tempdir().unwrap();
        let tree = tiny_tree(&dir);
        for i in 0..40 {
            tree.insert(i, i).unwrap();
        }
        assert!(tree.depth().unwrap() >= 2);
        tree.verify().unwrap();

        for i in 0..40 {
            tree.remove(i).unwrap();
            assert!(!tree.contains(&i).unwrap());
        }
        tree.verify().unwrap();
    }
}
