//! Round-robin selection.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::backend::Backend;

use super::{SelectError, Strategy};

/// Rotates through candidates with one monotone counter shared across all
/// keys; the candidate order decides the rotation.
pub struct RoundRobinStrategy {
    counter: AtomicU64,
}

impl RoundRobinStrategy {
    /// Create a fresh rotation starting at the second candidate (the first
    /// increment lands on index 1, matching a counter that starts at zero).
    #[must_use]
    pub fn new() -> Self {
        Self {
            counter: AtomicU64::new(0),
        }
    }
}

impl Default for RoundRobinStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl Strategy for RoundRobinStrategy {
    fn select(
        &self,
        candidates: &[Arc<Backend>],
        _key: &str,
        _size: i64,
    ) -> Result<Arc<Backend>, SelectError> {
        if candidates.is_empty() {
            return Err(SelectError::NoCandidates);
        }

        let index = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        let index = (index % candidates.len() as u64) as usize;
        Ok(Arc::clone(&candidates[index]))
    }

    fn name(&self) -> &'static str {
        "round-robin"
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::backend;
    use super::*;

    #[test]
    fn test_should_rotate_in_candidate_order() {
        let strategy = RoundRobinStrategy::new();
        let candidates = vec![
            backend("b1", 0, 0, 0),
            backend("b2", 0, 0, 0),
            backend("b3", 0, 0, 0),
        ];

        let picks: Vec<String> = (0..6)
            .map(|_| {
                strategy
                    .select(&candidates, "any", 0)
                    .expect("non-empty")
                    .name()
                    .to_owned()
            })
            .collect();

        assert_eq!(picks, ["b2", "b3", "b1", "b2", "b3", "b1"]);
    }

    #[test]
    fn test_should_fail_on_empty_candidates() {
        let strategy = RoundRobinStrategy::new();
        assert_eq!(
            strategy.select(&[], "k", 0).unwrap_err(),
            SelectError::NoCandidates
        );
    }

    #[test]
    fn test_should_ignore_key_and_size() {
        let strategy = RoundRobinStrategy::new();
        let candidates = vec![backend("b1", 0, 0, 0), backend("b2", 0, 0, 0)];
        let first = strategy.select(&candidates, "k1", 10).expect("pick");
        let second = strategy.select(&candidates, "k1", 10).expect("pick");
        assert_ne!(first.name(), second.name());
    }
}
