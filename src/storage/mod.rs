//! The node paging boundary.
//!
//! The tree never owns its nodes directly. Every node lives behind a
//! [`NodeId`] handle that a [`NodeStore`] resolves to a scoped, lockable
//! [`NodeRef`]. Parent, child and sibling links between nodes are all
//! handles, so the cyclic shape of the tree never turns into cyclic
//! ownership; the store is the single owner of every node object.

use crate::{error::Result, size::StaticSize, tree::Node};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use serde::{Deserialize, Serialize};
use std::{fmt, sync::Arc};

mod swap;

pub use swap::SwapStore;

/// Opaque identifier of a node object. Serialized as the store-assigned
/// integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId(u64);

impl NodeId {
    pub(crate) fn from_raw(raw: u64) -> Self {
        NodeId(raw)
    }

    pub(crate) fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{:#x}", self.0)
    }
}

impl StaticSize for NodeId {
    fn static_size() -> usize {
        std::mem::size_of::<u64>()
    }
}

/// A materialized node, pinned in the store's cache for as long as this
/// reference is alive.
///
/// The reference itself is only a pin; access goes through [`read`] and
/// [`write`] guards. Guards for distinct nodes may be held simultaneously
/// (merges and borrows do), but a node must never be locked twice by the
/// same operation.
///
/// [`read`]: NodeRef::read
/// [`write`]: NodeRef::write
#[derive(Debug)]
pub struct NodeRef<K, V> {
    node: Arc<RwLock<Node<K, V>>>,
}

impl<K, V> Clone for NodeRef<K, V> {
    fn clone(&self) -> Self {
        NodeRef {
            node: Arc::clone(&self.node),
        }
    }
}

impl<K, V> NodeRef<K, V> {
    pub(crate) fn new(node: Arc<RwLock<Node<K, V>>>) -> Self {
        NodeRef { node }
    }

    /// Locks the node for reading.
    pub fn read(&self) -> RwLockReadGuard<'_, Node<K, V>> {
        self.node.read()
    }

    /// Locks the node for writing. Mutations are only persisted if the
    /// reference was obtained through [`NodeStore::get_mut`].
    pub fn write(&self) -> RwLockWriteGuard<'_, Node<K, V>> {
        self.node.write()
    }
}

/// Object store for tree nodes.
///
/// The tree is generic over this trait and treats it as opaque: handles in,
/// scoped node references out. All methods take `&self`; implementations
/// supply their own interior locking.
pub trait NodeStore<K, V> {
    /// Takes ownership of a freshly built node and returns its handle.
    fn allocate(&self, node: Node<K, V>) -> Result<NodeId>;

    /// Resolves a handle for reading. May block on backing-store I/O.
    fn get(&self, id: NodeId) -> Result<NodeRef<K, V>>;

    /// Resolves a handle for mutation and marks the node dirty.
    fn get_mut(&self, id: NodeId) -> Result<NodeRef<K, V>>;

    /// Whether the handle refers to a live node.
    fn contains(&self, id: NodeId) -> bool;

    /// Destroys a node. Called when a merge drains it.
    fn remove(&self, id: NodeId) -> Result<()>;

    /// Persists every dirty node to the backing store.
    fn sync(&self) -> Result<()>;
}
