//! Weighted-random selection.

use std::sync::Arc;

use rand::Rng;

use crate::backend::Backend;

use super::{SelectError, Strategy};

/// Draws uniformly in `[0, Σweight)` and walks the candidates accumulating
/// weights; the first candidate whose cumulative weight exceeds the draw
/// wins. With all weights zero the pick degrades to uniform.
pub struct WeightedStrategy;

impl Strategy for WeightedStrategy {
    fn select(
        &self,
        candidates: &[Arc<Backend>],
        _key: &str,
        _size: i64,
    ) -> Result<Arc<Backend>, SelectError> {
        if candidates.is_empty() {
            return Err(SelectError::NoCandidates);
        }

        let total: u64 = candidates.iter().map(|b| u64::from(b.config.weight)).sum();
        let mut rng = rand::thread_rng();

        if total == 0 {
            let index = rng.gen_range(0..candidates.len());
            return Ok(Arc::clone(&candidates[index]));
        }

        let draw = rng.gen_range(0..total);
        let mut cumulative = 0_u64;
        for candidate in candidates {
            cumulative += u64::from(candidate.config.weight);
            if draw < cumulative {
                return Ok(Arc::clone(candidate));
            }
        }

        // Unreachable with a correct total; keep the last candidate as the
        // safe answer.
        Ok(Arc::clone(candidates.last().expect("non-empty")))
    }

    fn name(&self) -> &'static str {
        "weighted"
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::backend;
    use super::*;

    #[test]
    fn test_should_never_pick_zero_weight_when_others_exist() {
        let candidates = vec![
            backend("heavy", 0, 0, 5),
            backend("zero", 0, 0, 0),
        ];
        for _ in 0..200 {
            let picked = WeightedStrategy.select(&candidates, "k", 0).expect("pick");
            assert_eq!(picked.name(), "heavy");
        }
    }

    #[test]
    fn test_should_fall_back_to_uniform_when_all_weights_zero() {
        let candidates = vec![
            backend("a", 0, 0, 0),
            backend("b", 0, 0, 0),
        ];
        let mut seen_a = false;
        let mut seen_b = false;
        for _ in 0..500 {
            match WeightedStrategy.select(&candidates, "k", 0).expect("pick").name() {
                "a" => seen_a = true,
                "b" => seen_b = true,
                other => panic!("unexpected pick {other}"),
            }
            if seen_a && seen_b {
                break;
            }
        }
        assert!(seen_a && seen_b, "uniform fallback should reach both");
    }

    #[test]
    fn test_should_roughly_follow_weights() {
        let candidates = vec![
            backend("w1", 0, 0, 1),
            backend("w9", 0, 0, 9),
        ];
        let mut heavy = 0;
        let rounds = 2000;
        for _ in 0..rounds {
            if WeightedStrategy.select(&candidates, "k", 0).expect("pick").name() == "w9" {
                heavy += 1;
            }
        }
        let share = f64::from(heavy) / f64::from(rounds);
        assert!(share > 0.8, "expected ~0.9 share for weight 9, got {share}");
    }

    #[test]
    fn test_should_fail_on_empty_candidates() {
        assert_eq!(
            WeightedStrategy.select(&[], "k", 0).unwrap_err(),
            SelectError::NoCandidates
        );
    }
}
