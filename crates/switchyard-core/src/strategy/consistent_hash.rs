//! Consistent-hash selection.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::backend::Backend;

use super::{SelectError, Strategy};

/// Virtual nodes per candidate. More replicas smooth the distribution at the
/// cost of ring size.
const RING_REPLICAS: usize = 100;

struct Ring {
    /// Sorted member names; detects membership changes cheaply.
    members: Vec<String>,
    /// `(hash, member index)` sorted by hash.
    nodes: Vec<(u32, usize)>,
}

impl Ring {
    fn empty() -> Self {
        Self {
            members: Vec::new(),
            nodes: Vec::new(),
        }
    }

    fn build(members: Vec<String>) -> Self {
        let mut nodes = Vec::with_capacity(members.len() * RING_REPLICAS);
        for (index, name) in members.iter().enumerate() {
            for replica in 0..RING_REPLICAS {
                nodes.push((hash_label(&format!("{name}-{replica}")), index));
            }
        }
        nodes.sort_unstable();
        Self { members, nodes }
    }

    /// First ring node with hash >= the key hash, wrapping at the end.
    fn locate(&self, key: &str) -> Option<&str> {
        if self.nodes.is_empty() {
            return None;
        }
        let hash = hash_label(key);
        let position = self.nodes.partition_point(|(h, _)| *h < hash);
        let (_, index) = self.nodes[position % self.nodes.len()];
        Some(&self.members[index])
    }
}

/// Maps keys to backends through a ring of hashed virtual nodes, so the same
/// key lands on the same backend and membership changes move as few keys as
/// possible.
///
/// The ring is keyed by member *names* (sorted), which makes the mapping
/// independent of candidate order. It is rebuilt only when the member set
/// changes.
pub struct ConsistentHashStrategy {
    ring: RwLock<Ring>,
}

impl ConsistentHashStrategy {
    /// Create a strategy with an empty ring.
    #[must_use]
    pub fn new() -> Self {
        Self {
            ring: RwLock::new(Ring::empty()),
        }
    }

    fn ensure_ring(&self, candidates: &[Arc<Backend>]) {
        let mut members: Vec<String> =
            candidates.iter().map(|b| b.name().to_owned()).collect();
        members.sort_unstable();

        {
            let ring = self.ring.read();
            if ring.members == members {
                return;
            }
        }

        let mut ring = self.ring.write();
        // Another selector may have rebuilt while we waited for the lock.
        if ring.members != members {
            *ring = Ring::build(members);
        }
    }
}

impl Default for ConsistentHashStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl Strategy for ConsistentHashStrategy {
    fn select(
        &self,
        candidates: &[Arc<Backend>],
        key: &str,
        _size: i64,
    ) -> Result<Arc<Backend>, SelectError> {
        if candidates.is_empty() {
            return Err(SelectError::NoCandidates);
        }

        self.ensure_ring(candidates);

        let ring = self.ring.read();
        let name = ring.locate(key).ok_or(SelectError::NoCandidates)?;
        candidates
            .iter()
            .find(|b| b.name() == name)
            .cloned()
            .ok_or(SelectError::NoCandidates)
    }

    fn name(&self) -> &'static str {
        "consistent-hash"
    }
}

/// MD5 of the label, truncated to the first four bytes, big-endian.
fn hash_label(label: &str) -> u32 {
    let digest = md5::compute(label.as_bytes());
    u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
}

#[cfg(test)]
mod tests {
    use super::super::testutil::backend;
    use super::*;

    #[test]
    fn test_should_pick_deterministically() {
        let strategy = ConsistentHashStrategy::new();
        let candidates = vec![
            backend("b1", 0, 0, 0),
            backend("b2", 0, 0, 0),
            backend("b3", 0, 0, 0),
        ];

        let first = strategy
            .select(&candidates, "user/42/avatar.png", 0)
            .expect("pick")
            .name()
            .to_owned();
        for _ in 0..10 {
            let again = strategy
                .select(&candidates, "user/42/avatar.png", 0)
                .expect("pick");
            assert_eq!(again.name(), first);
        }
    }

    #[test]
    fn test_should_ignore_candidate_order() {
        let strategy = ConsistentHashStrategy::new();
        let forward = vec![
            backend("b1", 0, 0, 0),
            backend("b2", 0, 0, 0),
            backend("b3", 0, 0, 0),
        ];
        let reversed: Vec<_> = forward.iter().rev().cloned().collect();

        for key in ["a", "b/c", "user/42/avatar.png", "zzz", "0001"] {
            let with_forward = strategy.select(&forward, key, 0).expect("pick");
            let with_reversed = strategy.select(&reversed, key, 0).expect("pick");
            assert_eq!(with_forward.name(), with_reversed.name(), "key {key}");
        }
    }

    #[test]
    fn test_should_keep_picks_stable_when_unselected_member_leaves() {
        let strategy = ConsistentHashStrategy::new();
        let all = vec![
            backend("b1", 0, 0, 0),
            backend("b2", 0, 0, 0),
            backend("b3", 0, 0, 0),
        ];

        let key = "user/42/avatar.png";
        let original = strategy.select(&all, key, 0).expect("pick").name().to_owned();

        // Drop one member that was not picked for this key.
        let removed = all
            .iter()
            .map(|b| b.name().to_owned())
            .find(|n| *n != original)
            .expect("at least two members");
        let reduced: Vec<_> = all.iter().filter(|b| b.name() != removed).cloned().collect();

        let after = strategy.select(&reduced, key, 0).expect("pick");
        assert_eq!(after.name(), original);
    }

    #[test]
    fn test_should_respread_keys_of_removed_member_only() {
        let strategy = ConsistentHashStrategy::new();
        let all = vec![
            backend("b1", 0, 0, 0),
            backend("b2", 0, 0, 0),
            backend("b3", 0, 0, 0),
        ];

        let keys: Vec<String> = (0..200).map(|i| format!("obj/{i}.bin")).collect();
        let before: Vec<String> = keys
            .iter()
            .map(|k| strategy.select(&all, k, 0).expect("pick").name().to_owned())
            .collect();

        let reduced: Vec<_> = all.iter().filter(|b| b.name() != "b2").cloned().collect();
        for (key, owner) in keys.iter().zip(before.iter()) {
            let after = strategy.select(&reduced, key, 0).expect("pick");
            if owner != "b2" {
                assert_eq!(after.name(), owner, "key {key} moved unnecessarily");
            } else {
                assert_ne!(after.name(), "b2");
            }
        }
    }

    #[test]
    fn test_should_spread_replica_labels_across_the_ring() {
        // Replica labels of one member must not collapse onto one point.
        let hashes: std::collections::HashSet<u32> =
            (0..RING_REPLICAS).map(|i| hash_label(&format!("b1-{i}"))).collect();
        assert!(hashes.len() > RING_REPLICAS / 2);
        // And the hash is stable across calls.
        assert_eq!(hash_label("b1-0"), hash_label("b1-0"));
    }

    #[test]
    fn test_should_fail_on_empty_candidates() {
        let strategy = ConsistentHashStrategy::new();
        assert_eq!(
            strategy.select(&[], "k", 0).unwrap_err(),
            SelectError::NoCandidates
        );
    }
}
