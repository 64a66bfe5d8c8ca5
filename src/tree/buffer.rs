use super::message::Message;
use serde::{Deserialize, Serialize};
use std::mem;

/// A node's pending-write buffer: messages sorted by key, at most one per
/// key.
///
/// The single-message-per-key rule is what bounds the buffer by distinct
/// keys and makes the first hit during a root-to-leaf descent authoritative.
/// It is maintained by [`inject`](MessageBuffer::inject); the bulk splice
/// operations used by splits, borrows and merges assume the incoming run is
/// disjoint from the retained messages, which holds because those runs are
/// cut along separator keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageBuffer<K, V> {
    msgs: Vec<Message<K, V>>,
}

impl<K, V> Default for MessageBuffer<K, V> {
    fn default() -> Self {
        MessageBuffer { msgs: Vec::new() }
    }
}

impl<K: Ord, V> MessageBuffer<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds a buffer from a run that is already sorted and unique by
    /// key.
    pub(crate) fn from_sorted(msgs: Vec<Message<K, V>>) -> Self {
        let buffer = MessageBuffer { msgs };
        debug_assert!(buffer.is_well_formed());
        buffer
    }

    pub fn len(&self) -> usize {
        self.msgs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.msgs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Message<K, V>> {
        self.msgs.iter()
    }

    pub(crate) fn first_key(&self) -> Option<&K> {
        self.msgs.first().map(Message::key)
    }

    fn position(&self, key: &K) -> Result<usize, usize> {
        self.msgs.binary_search_by(|m| m.key().cmp(key))
    }

    /// Exact-key search for the pending message shadowing `key`, if any.
    pub fn lookup(&self, key: &K) -> Option<&Message<K, V>> {
        self.position(key).ok().map(|ix| &self.msgs[ix])
    }

    /// Adds a message, collapsing it against an existing message for the
    /// same key:
    ///
    /// * insert over delete replaces the delete (revival),
    /// * delete over insert erases both (the pair annihilates, the state
    ///   below the buffer applies again),
    /// * a repeated opcode overwrites (the later write wins).
    pub fn inject(&mut self, msg: Message<K, V>) {
        match self.position(msg.key()) {
            Ok(ix) => {
                if msg.is_delete() && !self.msgs[ix].is_delete() {
                    self.msgs.remove(ix);
                } else {
                    self.msgs[ix] = msg;
                }
            }
            Err(ix) => self.msgs.insert(ix, msg),
        }
    }

    /// Removes and returns every message with key `>= bound`, in order.
    pub(crate) fn drain_from(&mut self, bound: &K) -> Vec<Message<K, V>> {
        let ix = self.msgs.partition_point(|m| m.key() < bound);
        self.msgs.split_off(ix)
    }

    /// Removes and returns every message with key `< bound`, in order.
    pub(crate) fn drain_upto(&mut self, bound: &K) -> Vec<Message<K, V>> {
        let ix = self.msgs.partition_point(|m| m.key() < bound);
        let tail = self.msgs.split_off(ix);
        mem::replace(&mut self.msgs, tail)
    }

    /// Drains the buffer into one run per child slot of an internal node
    /// with the given separators: run `i` holds the keys in
    /// `[separators[i - 1], separators[i])`.
    pub(crate) fn partition_by(&mut self, separators: &[K]) -> Vec<Vec<Message<K, V>>> {
        let mut runs = Vec::with_capacity(separators.len() + 1);
        let mut rest = mem::take(&mut self.msgs);
        for sep in separators {
            let tail = rest.split_off(rest.partition_point(|m| m.key() < sep));
            runs.push(rest);
            rest = tail;
        }
        runs.push(rest);
        runs
    }

    /// Splices a run whose keys all precede the buffered ones.
    pub(crate) fn splice_front(&mut self, mut run: Vec<Message<K, V>>) {
        debug_assert!(match (run.last(), self.msgs.first()) {
            (Some(a), Some(b)) => a.key() < b.key(),
            _ => true,
        });
        run.append(&mut self.msgs);
        self.msgs = run;
    }

    /// Splices a run whose keys all follow the buffered ones.
    pub(crate) fn splice_back(&mut self, mut run: Vec<Message<K, V>>) {
        debug_assert!(match (self.msgs.last(), run.first()) {
            (Some(a), Some(b)) => a.key() < b.key(),
            _ => true,
        });
        self.msgs.append(&mut run);
    }

    pub(crate) fn take(&mut self) -> Vec<Message<K, V>> {
        mem::take(&mut self.msgs)
    }

    /// Sorted, unique by key.
    pub(crate) fn is_well_formed(&self) -> bool {
        self.msgs.windows(2).all(|w| w[0].key() < w[1].key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn insert(key: i32) -> Message<i32, i32> {
        Message::Insert {
            key,
            value: key * 10,
        }
    }

    fn delete(key: i32) -> Message<i32, i32> {
        Message::Delete { key }
    }

    fn keys(buffer: &MessageBuffer<i32, i32>) -> Vec<i32> {
        buffer.iter().map(|m| *m.key()).collect()
    }

    #[test]
    fn inject_keeps_sorted_order() {
        let mut buffer = MessageBuffer::new();
        for key in [5, 1, 9, 3, 7] {
            buffer.inject(insert(key));
        }
        assert_eq!(keys(&buffer), vec![1, 3, 5, 7, 9]);
        assert!(buffer.is_well_formed());
    }

    #[test]
    fn repeated_opcode_overwrites() {
        let mut buffer = MessageBuffer::new();
        buffer.inject(insert(4));
        buffer.inject(Message::Insert { key: 4, value: 99 });
        assert_eq!(buffer.len(), 1);
        assert_eq!(
            buffer.lookup(&4),
            Some(&Message::Insert { key: 4, value: 99 })
        );

        buffer.inject(delete(4));
        buffer.inject(delete(4));
        assert_eq!(buffer.lookup(&4), Some(&delete(4)));
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn delete_annihilates_pending_insert() {
        let mut buffer = MessageBuffer::new();
        buffer.inject(insert(4));
        buffer.inject(delete(4));
        assert!(buffer.is_empty());
    }

    #[test]
    fn insert_revives_pending_delete() {
        let mut buffer = MessageBuffer::new();
        buffer.inject(delete(4));
        buffer.inject(insert(4));
        assert_eq!(buffer.lookup(&4), Some(&insert(4)));
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn drains_split_at_the_bound() {
        let mut buffer = MessageBuffer::new();
        for key in 0..6 {
            buffer.inject(insert(key));
        }
        let high = buffer.drain_from(&3);
        assert_eq!(high.iter().map(Message::key).copied().collect::<Vec<_>>(), vec![3, 4, 5]);
        assert_eq!(keys(&buffer), vec![0, 1, 2]);

        let low = buffer.drain_upto(&2);
        assert_eq!(low.iter().map(Message::key).copied().collect::<Vec<_>>(), vec![0, 1]);
        assert_eq!(keys(&buffer), vec![2]);
    }

    #[test]
    fn partition_respects_separator_ranges() {
        let mut buffer = MessageBuffer::new();
        for key in [0, 2, 3, 4, 8, 9] {
            buffer.inject(insert(key));
        }
        let runs = buffer.partition_by(&[3, 9]);
        assert!(buffer.is_empty());
        let as_keys: Vec<Vec<i32>> = runs
            .iter()
            .map(|run| run.iter().map(|m| *m.key()).collect())
            .collect();
        // A key equal to a separator belongs to the child right of it.
        assert_eq!(as_keys, vec![vec![0, 2], vec![3, 4, 8], vec![9]]);
    }

    #[test]
    fn splices_preserve_order() {
        let mut buffer = MessageBuffer::new();
        for key in [4, 5] {
            buffer.inject(insert(key));
        }
        buffer.splice_front(vec![insert(1), insert(2)]);
        buffer.splice_back(vec![insert(7), insert(9)]);
        assert_eq!(keys(&buffer), vec![1, 2, 4, 5, 7, 9]);
        assert!(buffer.is_well_formed());
    }
}
