//! Tree sizing configuration.
//!
//! A node is budgeted `node_size` bytes. The fraction `epsilon` of that
//! budget is reserved for the message buffer, the remainder (minus the fixed
//! node metadata) holds key slots. Both derived quantities are functions of
//! the concrete key and value types, so the derivation happens at tree
//! construction, where those types are known.

use crate::{
    error::{Error, Result},
    size::StaticSize,
    storage::NodeId,
    tree::Message,
};
use serde::{Deserialize, Serialize};

#[cfg(feature = "figment_config")]
use figment::{
    providers::{Env, Serialized},
    Figment,
};

/// Page byte budget and buffer fraction, fixed at construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeConfig {
    /// Byte budget of a single node page.
    pub node_size: usize,
    /// Fraction of the page budget reserved for the message buffer.
    /// Must lie strictly between 0 and 1.
    pub epsilon: f64,
}

impl Default for TreeConfig {
    fn default() -> Self {
        TreeConfig {
            node_size: 4096,
            epsilon: 0.3,
        }
    }
}

impl TreeConfig {
    /// Reads the configuration from `BEPTREE_*` environment variables,
    /// falling back to the defaults for anything unset.
    #[cfg(feature = "figment_config")]
    pub fn from_env() -> Result<Self, figment::Error> {
        Figment::from(Serialized::defaults(TreeConfig::default()))
            .merge(Env::prefixed("BEPTREE_"))
            .extract()
    }

    /// Derives the fanout and buffer capacity for the given key and value
    /// types.
    pub fn params<K, V>(&self) -> Result<TreeParams>
    where
        K: StaticSize,
        V: StaticSize,
    {
        if !(self.epsilon > 0.0 && self.epsilon < 1.0) {
            return Err(Error::InvalidConfig(format!(
                "epsilon {} outside (0, 1)",
                self.epsilon
            )));
        }
        let buffer_budget = (self.epsilon * self.node_size as f64) as usize;
        let buffer_capacity = buffer_budget / Message::<K, V>::static_size();

        // Fixed per-node metadata: leaf flag, three sibling/parent handles
        // and the subtree minimum.
        let metadata = bool::static_size()
            + 3 * Option::<NodeId>::static_size()
            + Option::<K>::static_size();
        let key_budget = ((1.0 - self.epsilon) * self.node_size as f64) as usize;
        let per_key_slot = K::static_size() + V::static_size() + NodeId::static_size();
        let fanout = key_budget.saturating_sub(metadata) / per_key_slot;

        TreeParams::new(fanout, buffer_capacity)
    }
}

/// Derived sizing constants. May also be constructed directly, which is the
/// intended route for tests that want a tiny fanout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeParams {
    /// Fanout `B`: maximum child count; nodes hold at most `B - 1` keys at
    /// rest and at least `B / 2` unless they are the root.
    pub fanout: usize,
    /// Maximum number of pending messages per node buffer.
    pub buffer_capacity: usize,
}

impl TreeParams {
    /// Validates the pair; a fanout below 3 cannot sustain the split
    /// midpoint, an empty buffer cannot accept any message.
    pub fn new(fanout: usize, buffer_capacity: usize) -> Result<Self> {
        if fanout < 3 {
            return Err(Error::InvalidConfig(format!("fanout {} below 3", fanout)));
        }
        if buffer_capacity == 0 {
            return Err(Error::InvalidConfig("zero buffer capacity".to_string()));
        }
        Ok(TreeParams {
            fanout,
            buffer_capacity,
        })
    }

    /// Minimum key count of a non-root node. Chosen so that both halves of
    /// a split at `fanout / 2` land on or above it: the right half of an
    /// internal split keeps exactly `(fanout - 1) / 2` keys after the median
    /// is promoted.
    pub(crate) fn min_keys(&self) -> usize {
        (self.fanout - 1) / 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_derives_sane_params() {
        let params = TreeConfig::default().params::<u64, u64>().unwrap();
        assert!(params.fanout >= 3);
        assert!(params.buffer_capacity >= 1);
        // 30% of 4096 bytes over 17-byte messages.
        assert_eq!(params.buffer_capacity, 1228 / 17);
    }

    #[test]
    fn epsilon_bounds_are_enforced() {
        for eps in [0.0, 1.0, -0.5, 3.2] {
            let cfg = TreeConfig {
                node_size: 4096,
                epsilon: eps,
            };
            assert!(matches!(
                cfg.params::<u64, u64>(),
                Err(Error::InvalidConfig(_))
            ));
        }
    }

    #[test]
    fn tiny_pages_are_rejected() {
        let cfg = TreeConfig {
            node_size: 64,
            epsilon: 0.3,
        };
        assert!(matches!(
            cfg.params::<u64, u64>(),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn direct_params_validate() {
        assert!(TreeParams::new(2, 8).is_err());
        assert!(TreeParams::new(3, 0).is_err());
        let p = TreeParams::new(3, 4).unwrap();
        assert_eq!(p.min_keys(), 1);
    }
}
