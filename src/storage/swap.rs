//! Swap-managed node store: a bounded cache of materialized nodes over an
//! object-per-file backing directory.
//!
//! Every node object is one file, named by its handle. The cache keeps the
//! most recently used nodes materialized; once it runs over capacity, the
//! least recently used unpinned node is written back (if dirty) and dropped.
//! A node is pinned while any [`NodeRef`] for it is alive, so eviction can
//! never pull a page out from under an operation that still holds it.

use super::{NodeId, NodeRef, NodeStore};
use crate::{
    error::{Error, Result},
    tree::Node,
};
use log::warn;
use parking_lot::{Mutex, RwLock};
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{de::DeserializeOwned, Serialize};
use std::{
    fs,
    io::{BufReader, BufWriter},
    path::{Path, PathBuf},
    sync::Arc,
};

pub struct SwapStore<K, V> {
    dir: PathBuf,
    capacity: usize,
    inner: Mutex<Inner<K, V>>,
}

struct Inner<K, V> {
    cached: FxHashMap<u64, Slot<K, V>>,
    /// Ids whose only copy currently lives in the backing directory.
    spilled: FxHashSet<u64>,
    next_id: u64,
    tick: u64,
}

struct Slot<K, V> {
    node: Arc<RwLock<Node<K, V>>>,
    dirty: bool,
    last_used: u64,
}

const OBJECT_SUFFIX: &str = ".node";

impl<K, V> SwapStore<K, V>
where
    K: Serialize + DeserializeOwned,
    V: Serialize + DeserializeOwned,
{
    /// Opens a store over `dir`, creating the directory if necessary. An
    /// existing directory is adopted: its objects stay spilled until
    /// requested, and the id allocator resumes above the highest id found.
    ///
    /// `capacity` bounds the number of materialized nodes.
    pub fn open<P: AsRef<Path>>(dir: P, capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::InvalidConfig("zero cache capacity".to_string()));
        }
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let mut spilled = FxHashSet::default();
        let mut next_id = 0;
        for entry in fs::read_dir(&dir)? {
            let name = entry?.file_name();
            let Some(raw) = name
                .to_str()
                .and_then(|n| n.strip_suffix(OBJECT_SUFFIX))
                .and_then(|stem| u64::from_str_radix(stem, 16).ok())
            else {
                continue;
            };
            spilled.insert(raw);
            next_id = next_id.max(raw + 1);
        }

        Ok(SwapStore {
            dir,
            capacity,
            inner: Mutex::new(Inner {
                cached: FxHashMap::default(),
                spilled,
                next_id,
                tick: 0,
            }),
        })
    }

    fn object_path(&self, raw: u64) -> PathBuf {
        self.dir.join(format!("{:016x}{}", raw, OBJECT_SUFFIX))
    }

    fn write_object(&self, raw: u64, node: &Node<K, V>) -> Result<()> {
        let file = fs::File::create(self.object_path(raw))?;
        let mut writer = BufWriter::new(file);
        bincode::serialize_into(&mut writer, node)?;
        Ok(())
    }

    fn read_object(&self, raw: u64) -> Result<Node<K, V>> {
        let file = match fs::File::open(self.object_path(raw)) {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::DanglingHandle(NodeId::from_raw(raw)))
            }
            Err(err) => return Err(err.into()),
        };
        Ok(bincode::deserialize_from(BufReader::new(file))?)
    }

    /// Writes back and drops least recently used unpinned slots until the
    /// cache is within capacity again.
    fn evict_overflow(&self, inner: &mut Inner<K, V>) -> Result<()> {
        while inner.cached.len() > self.capacity {
            let victim = inner
                .cached
                .iter()
                .filter(|(_, slot)| Arc::strong_count(&slot.node) == 1)
                .min_by_key(|(_, slot)| slot.last_used)
                .map(|(raw, _)| *raw);
            let Some(raw) = victim else {
                warn!(
                    "node cache over capacity ({} > {}) with every slot pinned",
                    inner.cached.len(),
                    self.capacity
                );
                return Ok(());
            };
            let slot = inner.cached.remove(&raw).expect("victim vanished");
            if slot.dirty {
                self.write_object(raw, &slot.node.read())?;
            }
            inner.spilled.insert(raw);
        }
        Ok(())
    }

    fn fetch(&self, id: NodeId, mark_dirty: bool) -> Result<NodeRef<K, V>> {
        let mut inner = self.inner.lock();
        inner.tick += 1;
        let tick = inner.tick;

        if let Some(slot) = inner.cached.get_mut(&id.as_u64()) {
            slot.last_used = tick;
            slot.dirty |= mark_dirty;
            return Ok(NodeRef::new(Arc::clone(&slot.node)));
        }
        if !inner.spilled.remove(&id.as_u64()) {
            return Err(Error::DanglingHandle(id));
        }

        let node = Arc::new(RwLock::new(self.read_object(id.as_u64())?));
        inner.cached.insert(
            id.as_u64(),
            Slot {
                node: Arc::clone(&node),
                dirty: mark_dirty,
                last_used: tick,
            },
        );
        self.evict_overflow(&mut inner)?;
        Ok(NodeRef::new(node))
    }
}

impl<K, V> NodeStore<K, V> for SwapStore<K, V>
where
    K: Serialize + DeserializeOwned,
    V: Serialize + DeserializeOwned,
{
    fn allocate(&self, node: Node<K, V>) -> Result<NodeId> {
        let mut inner = self.inner.lock();
        inner.tick += 1;
        let tick = inner.tick;
        let raw = inner.next_id;
        inner.next_id += 1;
        inner.cached.insert(
            raw,
            Slot {
                node: Arc::new(RwLock::new(node)),
                dirty: true,
                last_used: tick,
            },
        );
        self.evict_overflow(&mut inner)?;
        Ok(NodeId::from_raw(raw))
    }

    fn get(&self, id: NodeId) -> Result<NodeRef<K, V>> {
        self.fetch(id, false)
    }

    fn get_mut(&self, id: NodeId) -> Result<NodeRef<K, V>> {
        self.fetch(id, true)
    }

    fn contains(&self, id: NodeId) -> bool {
        let inner = self.inner.lock();
        inner.cached.contains_key(&id.as_u64()) || inner.spilled.contains(&id.as_u64())
    }

    fn remove(&self, id: NodeId) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.cached.remove(&id.as_u64());
        inner.spilled.remove(&id.as_u64());
        match fs::remove_file(self.object_path(id.as_u64())) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn sync(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        let dirty: Vec<u64> = inner
            .cached
            .iter()
            .filter(|(_, slot)| slot.dirty)
            .map(|(raw, _)| *raw)
            .collect();
        for raw in dirty {
            let slot = inner.cached.get_mut(&raw).expect("dirty slot vanished");
            slot.dirty = false;
            let node = Arc::clone(&slot.node);
            self.write_object(raw, &node.read())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(capacity: usize) -> (tempfile::TempDir, SwapStore<i32, i32>) {
        let dir = tempfile::tempdir().expect("no tmpdir");
        let store = SwapStore::open(dir.path(), capacity).unwrap();
        (dir, store)
    }

    fn leaf_with(keys: Vec<i32>) -> Node<i32, i32> {
        let mut node = Node::empty_leaf();
        node.values = keys.iter().map(|k| k * 10).collect();
        node.subtree_min_key = keys.first().copied();
        node.keys = keys;
        node
    }

    #[test]
    fn allocate_then_get() {
        let (_dir, store) = store(4);
        let id = store.allocate(leaf_with(vec![1, 2, 3])).unwrap();
        let node = store.get(id).unwrap();
        assert_eq!(node.read().keys, vec![1, 2, 3]);
        assert!(store.contains(id));
    }

    #[test]
    fn dangling_handle_is_reported() {
        let (_dir, store) = store(4);
        let err = store.get(NodeId::from_raw(42)).unwrap_err();
        assert!(matches!(err, Error::DanglingHandle(_)));
    }

    #[test]
    fn eviction_spills_and_reloads() {
        let (dir, store) = store(2);
        let ids: Vec<NodeId> = (0..5)
            .map(|i| store.allocate(leaf_with(vec![i])).unwrap())
            .collect();

        // Three of the five must have gone to disk.
        let files = fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(files, 3);

        for (i, id) in ids.iter().enumerate() {
            let node = store.get(*id).unwrap();
            assert_eq!(node.read().keys, vec![i as i32]);
        }
    }

    #[test]
    fn pinned_nodes_survive_pressure() {
        let (_dir, store) = store(1);
        let id = store.allocate(leaf_with(vec![7])).unwrap();
        let pinned = store.get(id).unwrap();
        for i in 0..3 {
            store.allocate(leaf_with(vec![i])).unwrap();
        }
        assert_eq!(pinned.read().keys, vec![7]);
    }

    #[test]
    fn mutations_survive_eviction() {
        let (_dir, store) = store(2);
        let id = store.allocate(leaf_with(vec![1])).unwrap();
        {
            let node = store.get_mut(id).unwrap();
            node.write().keys.push(9);
        }
        // Push the node out and back in.
        for i in 0..4 {
            store.allocate(leaf_with(vec![i])).unwrap();
        }
        let node = store.get(id).unwrap();
        assert_eq!(node.read().keys, vec![1, 9]);
    }

    #[test]
    fn remove_destroys_the_object() {
        let (dir, store) = store(1);
        let id = store.allocate(leaf_with(vec![1])).unwrap();
        store.allocate(leaf_with(vec![2])).unwrap();
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);

        store.remove(id).unwrap();
        assert!(!store.contains(id));
        assert!(matches!(store.get(id), Err(Error::DanglingHandle(_))));
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn reopen_adopts_existing_objects() {
        let dir = tempfile::tempdir().expect("no tmpdir");
        let first: SwapStore<i32, i32> = SwapStore::open(dir.path(), 4).unwrap();
        let id = first.allocate(leaf_with(vec![3, 4])).unwrap();
        first.sync().unwrap();
        drop(first);

        let second: SwapStore<i32, i32> = SwapStore::open(dir.path(), 4).unwrap();
        assert!(second.contains(id));
        let node = second.get(id).unwrap();
        assert_eq!(node.read().keys, vec![3, 4]);

        // Fresh allocations must not collide with adopted ids.
        let fresh = second.allocate(leaf_with(vec![9])).unwrap();
        assert_ne!(fresh, id);
    }
}
