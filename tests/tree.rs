//! Workload tests: bulk insert/delete sweeps, read-your-writes through
//! buffers, and consistency checks after every phase.

use beptree::{storage::SwapStore, Tree, TreeParams};
use quickcheck_macros::quickcheck;
use rand::{seq::SliceRandom, Rng, SeedableRng};
use rand_xorshift::XorShiftRng;
use std::collections::{BTreeMap, BTreeSet};

type IntTree = Tree<i64, i64, SwapStore<i64, i64>>;

fn tree_in(dir: &tempfile::TempDir, fanout: usize, capacity: usize) -> IntTree {
    let store = SwapStore::open(dir.path(), 128).expect("store did not open");
    Tree::with_params(store, TreeParams::new(fanout, capacity).expect("bad test params"))
}

#[test]
fn small_batch_flushes_and_queries() {
    let dir = tempfile::tempdir().unwrap();
    let tree = tree_in(&dir, 3, 3);
    tree.insert(1, 10).unwrap();
    tree.insert(2, 20).unwrap();
    tree.insert(3, 30).unwrap();

    assert_eq!(tree.get(&2).unwrap(), Some(20));
    assert_eq!(tree.len(), 3);
    assert!(tree.depth().unwrap() >= 2);
    tree.verify().unwrap();
}

#[test]
fn ascending_inserts_are_all_retrievable() {
    let dir = tempfile::tempdir().unwrap();
    let tree = tree_in(&dir, 3, 4);
    for i in 0..300 {
        tree.insert(i, i * 2).unwrap();
    }
    for i in 0..300 {
        assert!(tree.contains(&i).unwrap(), "lost key {}", i);
    }
    assert!(!tree.contains(&300).unwrap());
    assert!(tree.depth().unwrap() >= 2);
    tree.verify().unwrap();
}

#[test]
fn delete_ascending_until_empty() {
    let dir = tempfile::tempdir().unwrap();
    let tree = tree_in(&dir, 3, 1);
    for i in 0..800 {
        tree.insert(i, i).unwrap();
    }
    assert_eq!(tree.len(), 800);

    let mut i = 0;
    while !tree.is_empty() {
        assert!(tree.contains(&i).unwrap());
        tree.remove(i).unwrap();
        assert!(!tree.contains(&i).unwrap());
        i += 1;
    }
    assert_eq!(i, 800);
    assert_eq!(tree.depth().unwrap(), 1);
    tree.verify().unwrap();
}

#[test]
fn delete_descending_until_empty() {
    let dir = tempfile::tempdir().unwrap();
    let tree = tree_in(&dir, 3, 1);
    for i in 0..800 {
        tree.insert(i, i).unwrap();
    }

    let mut i = 799;
    while !tree.is_empty() {
        assert!(tree.contains(&i).unwrap());
        tree.remove(i).unwrap();
        assert!(!tree.contains(&i).unwrap());
        i -= 1;
    }
    assert_eq!(i, -1);
    tree.verify().unwrap();
}

#[test]
fn buffered_deletes_shadow_entries() {
    let dir = tempfile::tempdir().unwrap();
    let tree = tree_in(&dir, 4, 6);
    for i in 0..500 {
        tree.insert(i, i).unwrap();
    }
    for i in 0..500 {
        tree.remove(i).unwrap();
        // The delete may still sit in a buffer; it must shadow regardless.
        assert!(!tree.contains(&i).unwrap());
    }
    for i in 0..500 {
        assert!(!tree.contains(&i).unwrap());
    }
    tree.verify().unwrap();
}

#[test]
fn random_deletes_over_large_tree() {
    let dir = tempfile::tempdir().unwrap();
    let tree = tree_in(&dir, 16, 1);
    const N: i64 = 80_000;
    for i in 0..N {
        tree.insert(i, i).unwrap();
    }
    assert_eq!(tree.len(), N as usize);

    let mut rng = XorShiftRng::seed_from_u64(0xbe75);
    let mut deleted = BTreeSet::new();
    for _ in 0..1_000 {
        let key = rng.gen_range(0..N);
        tree.remove(key).unwrap();
        deleted.insert(key);
        assert!(!tree.contains(&key).unwrap());
    }
    assert_eq!(tree.len(), N as usize - deleted.len());

    for key in &deleted {
        assert!(!tree.contains(key).unwrap());
    }
    for key in (0..N).step_by(97) {
        assert_eq!(tree.contains(&key).unwrap(), !deleted.contains(&key));
    }
    tree.verify().unwrap();
}

#[test]
fn reinsert_replaces_the_value() {
    let dir = tempfile::tempdir().unwrap();
    let store: SwapStore<i64, String> = SwapStore::open(dir.path(), 16).unwrap();
    let tree = Tree::with_params(store, TreeParams::new(3, 1).unwrap());

    tree.insert(5, "a".to_string()).unwrap();
    tree.insert(5, "b".to_string()).unwrap();
    assert_eq!(tree.get(&5).unwrap().as_deref(), Some("b"));
    assert_eq!(tree.len(), 1);
    tree.verify().unwrap();
}

#[test]
fn repeated_insert_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let tree = tree_in(&dir, 3, 1);
    tree.insert(42, 1).unwrap();
    tree.insert(42, 1).unwrap();
    assert_eq!(tree.len(), 1);
    assert_eq!(tree.get(&42).unwrap(), Some(1));
}

#[test]
fn delete_after_insert_restores_absence() {
    let dir = tempfile::tempdir().unwrap();
    let tree = tree_in(&dir, 3, 1);
    for i in 0..50 {
        tree.insert(i, i).unwrap();
    }
    let before = tree.len();

    tree.insert(1000, 1).unwrap();
    assert_eq!(tree.len(), before + 1);
    tree.remove(1000).unwrap();
    assert_eq!(tree.get(&1000).unwrap(), None);
    assert_eq!(tree.len(), before);

    // Removing an absent key stays a no-op.
    tree.remove(1000).unwrap();
    assert_eq!(tree.len(), before);
}

#[test]
fn shuffled_inserts_keep_global_order() {
    let dir = tempfile::tempdir().unwrap();
    let tree = tree_in(&dir, 4, 5);
    let mut keys: Vec<i64> = (0..1000).collect();
    keys.shuffle(&mut XorShiftRng::seed_from_u64(7));
    for key in &keys {
        tree.insert(*key, key * 7).unwrap();
    }
    for key in 0..1000 {
        assert_eq!(tree.get(&key).unwrap(), Some(key * 7));
    }
    // The leaf-chain walk inside asserts the global key order.
    tree.verify().unwrap();
}

#[quickcheck]
fn matches_a_map_when_eager(ops: Vec<(bool, u8)>) -> bool {
    let dir = tempfile::tempdir().unwrap();
    let tree = tree_in(&dir, 3, 1);
    let mut model = BTreeMap::new();
    for (insert, key) in ops {
        let key = key as i64;
        if insert {
            tree.insert(key, key * 3).unwrap();
            model.insert(key, key * 3);
        } else {
            tree.remove(key).unwrap();
            model.remove(&key);
        }
    }
    tree.verify().unwrap();
    model.iter().all(|(k, v)| tree.get(k).unwrap() == Some(*v))
        && (0..256i64).all(|k| tree.contains(&k).unwrap() == model.contains_key(&k))
        && tree.len() == model.len()
}

#[quickcheck]
fn buffered_inserts_read_back(keys: Vec<u16>) -> bool {
    let dir = tempfile::tempdir().unwrap();
    let tree = tree_in(&dir, 4, 6);
    for key in &keys {
        tree.insert(*key as i64, *key as i64 + 1).unwrap();
    }
    tree.verify().unwrap();
    keys.iter()
        .all(|key| tree.get(&(*key as i64)).unwrap() == Some(*key as i64 + 1))
}
