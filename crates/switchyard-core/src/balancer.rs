//! The balancer: candidate filtering, strategy invocation, and retries.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::backend::{Backend, Registry};
use crate::config::BalancerConfig;
use crate::metrics::Metrics;
use crate::strategy::{Strategy, build_strategy};

pub use crate::strategy::SelectError;

/// A strategy name that is not in the closed set.
#[derive(Debug, thiserror::Error)]
#[error("unknown balancer strategy: {0}")]
pub struct UnknownStrategy(pub String);

struct RetryPolicy {
    attempts: u32,
    delay: Duration,
}

/// Picks a backend for each new object.
///
/// Each attempt re-snapshots the candidate list from the registry (backends
/// may have recovered between attempts), drops candidates without room for
/// the payload, and hands the rest to the strategy. The strategy slot is
/// swappable at runtime; an in-flight pick uses whichever strategy it read,
/// never a mix.
pub struct Balancer {
    registry: Arc<Registry>,
    strategy: RwLock<Arc<dyn Strategy>>,
    retry: RwLock<RetryPolicy>,
    metrics: Option<Arc<Metrics>>,
}

impl Balancer {
    /// Build a balancer with the configured strategy.
    ///
    /// # Errors
    ///
    /// Returns [`UnknownStrategy`] when the configured name is not one of
    /// `round-robin`, `least-space`, `weighted`, `consistent-hash`.
    pub fn new(
        registry: Arc<Registry>,
        config: &BalancerConfig,
        metrics: Option<Arc<Metrics>>,
    ) -> Result<Self, UnknownStrategy> {
        let strategy = build_strategy(&config.strategy)
            .ok_or_else(|| UnknownStrategy(config.strategy.clone()))?;

        Ok(Self {
            registry,
            strategy: RwLock::new(strategy),
            retry: RwLock::new(RetryPolicy {
                attempts: config.retry_attempts.max(1),
                delay: config.retry_delay(),
            }),
            metrics,
        })
    }

    /// The active strategy's name.
    #[must_use]
    pub fn strategy_name(&self) -> &'static str {
        self.strategy.read().name()
    }

    /// Swap the strategy. The new strategy starts with fresh internal state
    /// (rotation counter, hash ring).
    ///
    /// # Errors
    ///
    /// Returns [`UnknownStrategy`] and leaves the current strategy in place
    /// when the name is not recognized.
    pub fn set_strategy(&self, name: &str) -> Result<(), UnknownStrategy> {
        let strategy = build_strategy(name).ok_or_else(|| UnknownStrategy(name.to_owned()))?;
        *self.strategy.write() = strategy;
        Ok(())
    }

    /// Update retry knobs from new config.
    pub fn set_retry_policy(&self, config: &BalancerConfig) {
        *self.retry.write() = RetryPolicy {
            attempts: config.retry_attempts.max(1),
            delay: config.retry_delay(),
        };
    }

    /// Pick a backend with room for `size` bytes of `key`.
    ///
    /// # Errors
    ///
    /// Returns [`SelectError::NoCandidates`] after the retry budget is
    /// exhausted with no backend available.
    pub async fn pick(&self, key: &str, size: i64) -> Result<Arc<Backend>, SelectError> {
        let (attempts, delay) = {
            let retry = self.retry.read();
            (retry.attempts, retry.delay)
        };

        let mut last_err = SelectError::NoCandidates;
        for attempt in 0..attempts {
            match self.pick_once(key, size) {
                Ok(backend) => return Ok(backend),
                Err(e) => {
                    last_err = e;
                    if attempt + 1 < attempts {
                        debug!(key, attempt, "no backend available, retrying");
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        warn!(key, size, "balancer exhausted retries");
        Err(last_err)
    }

    fn pick_once(&self, key: &str, size: i64) -> Result<Arc<Backend>, SelectError> {
        let candidates: Vec<Arc<Backend>> = self
            .registry
            .candidates()
            .into_iter()
            .filter(|b| b.available_space() >= size)
            .collect();

        if candidates.is_empty() {
            return Err(SelectError::NoCandidates);
        }

        let strategy = Arc::clone(&*self.strategy.read());
        let selected = strategy.select(&candidates, key, size)?;

        if let Some(metrics) = &self.metrics {
            metrics.record_balancer_decision(strategy.name(), selected.name());
        }

        Ok(selected)
    }
}
