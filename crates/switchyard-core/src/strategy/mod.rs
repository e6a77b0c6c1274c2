//! The load-balancing strategy set.
//!
//! All strategies implement [`Strategy`]: given the candidate list the
//! balancer already filtered (real, available, within capacity), pick one
//! backend. Candidates arrive in registry order and every strategy's
//! tie-break is deterministic for an unchanged candidate order.

use std::sync::Arc;

use crate::backend::Backend;

mod consistent_hash;
mod least_space;
mod round_robin;
mod weighted;

pub use consistent_hash::ConsistentHashStrategy;
pub use least_space::LeastSpaceStrategy;
pub use round_robin::RoundRobinStrategy;
pub use weighted::WeightedStrategy;

/// Selection failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SelectError {
    /// The candidate list was empty.
    #[error("no candidate backends available")]
    NoCandidates,
}

/// A backend-selection policy.
pub trait Strategy: Send + Sync {
    /// Pick one backend from the (already filtered) candidates.
    ///
    /// # Errors
    ///
    /// Returns [`SelectError::NoCandidates`] when `candidates` is empty.
    fn select(
        &self,
        candidates: &[Arc<Backend>],
        key: &str,
        size: i64,
    ) -> Result<Arc<Backend>, SelectError>;

    /// The strategy's configuration name.
    fn name(&self) -> &'static str;
}

/// Instantiate a strategy by its configuration name.
#[must_use]
pub fn build_strategy(name: &str) -> Option<Arc<dyn Strategy>> {
    match name {
        "round-robin" => Some(Arc::new(RoundRobinStrategy::new())),
        "least-space" => Some(Arc::new(LeastSpaceStrategy)),
        "weighted" => Some(Arc::new(WeightedStrategy)),
        "consistent-hash" => Some(Arc::new(ConsistentHashStrategy::new())),
        _ => None,
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;
    use crate::config::BucketConfig;

    /// Build a test backend with the given name, used bytes, capacity, and
    /// weight.
    pub fn backend(name: &str, used: i64, max: i64, weight: u32) -> Arc<Backend> {
        let b = Backend::for_tests(BucketConfig {
            name: name.to_owned(),
            max_size_bytes: max,
            weight,
            ..BucketConfig::default()
        });
        b.set_usage(used, 0);
        Arc::new(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_build_all_known_strategies() {
        for name in ["round-robin", "least-space", "weighted", "consistent-hash"] {
            let strategy = build_strategy(name).expect("known strategy");
            assert_eq!(strategy.name(), name);
        }
        assert!(build_strategy("fastest").is_none());
    }
}
