use crate::size::StaticSize;
use serde::{Deserialize, Serialize};

/// A pending write, carried in node buffers from the root toward the leaf
/// that will materialize it.
///
/// Within one buffer at most one message per key exists; injecting a second
/// message for the same key collapses the pair (see
/// [`MessageBuffer::inject`](super::MessageBuffer::inject)).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message<K, V> {
    /// Insert `value` under `key`, replacing any present value.
    Insert { key: K, value: V },
    /// Remove `key` if present.
    Delete { key: K },
}

impl<K, V> Message<K, V> {
    pub fn key(&self) -> &K {
        match self {
            Message::Insert { key, .. } => key,
            Message::Delete { key } => key,
        }
    }

    pub fn is_delete(&self) -> bool {
        matches!(self, Message::Delete { .. })
    }
}

impl<K: StaticSize, V: StaticSize> StaticSize for Message<K, V> {
    fn static_size() -> usize {
        // Opcode tag plus the widest payload.
        1 + K::static_size() + V::static_size()
    }
}
