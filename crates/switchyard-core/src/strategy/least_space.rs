//! Least-space selection.

use std::sync::Arc;

use crate::backend::Backend;

use super::{SelectError, Strategy};

/// Picks the candidate with the most available space. The sort is stable, so
/// candidates with equal space keep their registry order.
pub struct LeastSpaceStrategy;

impl Strategy for LeastSpaceStrategy {
    fn select(
        &self,
        candidates: &[Arc<Backend>],
        _key: &str,
        _size: i64,
    ) -> Result<Arc<Backend>, SelectError> {
        if candidates.is_empty() {
            return Err(SelectError::NoCandidates);
        }

        let mut sorted: Vec<&Arc<Backend>> = candidates.iter().collect();
        sorted.sort_by_key(|b| std::cmp::Reverse(b.available_space()));
        Ok(Arc::clone(sorted[0]))
    }

    fn name(&self) -> &'static str {
        "least-space"
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::backend;
    use super::*;

    #[test]
    fn test_should_pick_emptiest_backend() {
        let ten_gb = 10_i64 << 30;
        let candidates = vec![
            backend("b1", 0, ten_gb, 0),
            backend("b2", 5 << 30, ten_gb, 0),
        ];

        let picked = LeastSpaceStrategy
            .select(&candidates, "file.bin", 1 << 20)
            .expect("pick");
        assert_eq!(picked.name(), "b1");
    }

    #[test]
    fn test_should_prefer_unlimited_backends() {
        let candidates = vec![
            backend("capped", 0, 10 << 30, 0),
            backend("unlimited", 50 << 30, 0, 0),
        ];
        let picked = LeastSpaceStrategy.select(&candidates, "k", 0).expect("pick");
        assert_eq!(picked.name(), "unlimited");
    }

    #[test]
    fn test_should_keep_candidate_order_on_ties() {
        let candidates = vec![
            backend("first", 100, 1000, 0),
            backend("second", 100, 1000, 0),
        ];
        for _ in 0..5 {
            let picked = LeastSpaceStrategy.select(&candidates, "k", 0).expect("pick");
            assert_eq!(picked.name(), "first");
        }
    }

    #[test]
    fn test_should_fail_on_empty_candidates() {
        assert_eq!(
            LeastSpaceStrategy.select(&[], "k", 0).unwrap_err(),
            SelectError::NoCandidates
        );
    }
}
