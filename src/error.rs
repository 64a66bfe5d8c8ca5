use crate::storage::NodeId;
use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors surfaced by the tree and its node store.
///
/// Store failures are fatal to the operation that hit them and leave the
/// tree in an undefined state; the store owns crash semantics, the tree does
/// not catch or convert them.
#[derive(Debug, Error)]
pub enum Error {
    /// Rejected configuration, e.g. a fanout below 3 or ε outside `(0, 1)`.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// Reserved for range operations, which are not part of the core API.
    #[error("invalid key range")]
    InvalidKeyRange,
    /// The backing store failed to read or write a node object.
    #[error("store i/o failure: {0}")]
    StoreIo(#[from] std::io::Error),
    /// A node object could not be encoded or decoded.
    #[error("node codec failure: {0}")]
    NodeCodec(#[from] bincode::Error),
    /// A handle that resolves to no live node.
    #[error("dangling node handle {0}")]
    DanglingHandle(NodeId),
}
