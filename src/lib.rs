//! A write-optimized ordered index.
//!
//! The central structure is a B^ε-tree: a B+tree whose nodes each reserve a
//! fraction ε of their page budget for a buffer of pending write messages.
//! `insert` and `remove` enqueue a message at the root and return; full
//! buffers are pushed one level down in batches, so the per-update I/O cost
//! is amortized over many writes. Point lookups consult each buffer on the
//! way down and therefore always observe completed writes.
//!
//! Nodes live behind a swap-managed store ([`storage::SwapStore`]) which
//! keeps a bounded number of them materialized and spills the rest to one
//! file per node. The tree itself only speaks [`storage::NodeStore`], so any
//! store with allocate/get/put semantics can back it.
//!
//! ```
//! use beptree::{storage::SwapStore, Tree, TreeConfig};
//!
//! # fn main() -> Result<(), beptree::Error> {
//! let dir = tempfile::tempdir().unwrap();
//! let store: SwapStore<u32, u64> = SwapStore::open(dir.path(), 256)?;
//! let tree = Tree::new(store, TreeConfig::default())?;
//!
//! tree.insert(7, 700)?;
//! assert_eq!(tree.get(&7)?, Some(700));
//! tree.remove(7)?;
//! assert_eq!(tree.get(&7)?, None);
//! # Ok(())
//! # }
//! ```

pub mod config;
mod error;
pub mod size;
pub mod storage;
pub mod tree;

pub use self::{
    config::{TreeConfig, TreeParams},
    error::{Error, Result},
    tree::{Message, Tree},
};

/// Initialize `env_logger` for binaries and tests that do not set up their
/// own logging. Safe to call more than once.
#[cfg(feature = "init_env_logger")]
pub fn init_env_logger() {
    let _ = env_logger::builder().is_test(false).try_init();
}
