//! The reporter seam between monitors, registry, metrics, and the store.
//!
//! Monitors never hold a back-pointer into the component that owns them;
//! they call the [`HealthReporter`] / [`StatsReporter`] / [`OperationRecorder`]
//! traits, and [`Reporter`] implements all three over the registry, the
//! metric set, and (when present) the persistent counter store. The request
//! dispatcher uses the same [`OperationRecorder`] path for quota accounting.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::backend::{OperationClass, Registry};
use crate::metrics::Metrics;

/// Boxed error from the persistence layer; the reporter only logs it.
pub type CounterStoreError = Box<dyn std::error::Error + Send + Sync>;

/// Persistent operation counters, implemented by the store crate.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Atomically increment a bucket's class counter, returning the exact
    /// post-increment value.
    async fn increment_operation(
        &self,
        bucket: &str,
        class: OperationClass,
    ) -> Result<i64, CounterStoreError>;

    /// All persisted counters as `bucket → (count_a, count_b)`.
    async fn operation_counts(&self) -> Result<HashMap<String, (i64, i64)>, CounterStoreError>;

    /// Zero both counters for a bucket.
    async fn reset_operation_counts(&self, bucket: &str) -> Result<(), CounterStoreError>;
}

/// Receives health-probe outcomes.
pub trait HealthReporter: Send + Sync {
    /// Report one probe result for a backend.
    fn report_health(&self, backend: &str, healthy: bool, checked_at: DateTime<Utc>);
}

/// Receives stats-scan outcomes.
pub trait StatsReporter: Send + Sync {
    /// Report scanned usage for a backend.
    fn report_stats(&self, backend: &str, used_bytes: i64, object_count: i64);
}

/// Receives backend-operation events for quota accounting.
#[async_trait]
pub trait OperationRecorder: Send + Sync {
    /// Count one operation of the given class against a backend.
    async fn record_operation(&self, backend: &str, class: OperationClass);
}

/// The concrete reporter wiring registry + metrics + persistent counters.
pub struct Reporter {
    registry: Arc<Registry>,
    metrics: Arc<Metrics>,
    counters: Option<Arc<dyn CounterStore>>,
}

impl Reporter {
    /// Wire up a reporter.
    #[must_use]
    pub fn new(
        registry: Arc<Registry>,
        metrics: Arc<Metrics>,
        counters: Option<Arc<dyn CounterStore>>,
    ) -> Self {
        Self {
            registry,
            metrics,
            counters,
        }
    }

    /// The registry this reporter feeds.
    #[must_use]
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Load persisted counters into the registry, re-evaluating quota trips.
    /// Called at startup and after every backend rebuild.
    pub async fn load_persisted_counts(&self) {
        let Some(counters) = &self.counters else {
            return;
        };

        let counts = match counters.operation_counts().await {
            Ok(counts) => counts,
            Err(e) => {
                warn!(error = %e, "failed to load persisted operation counts");
                return;
            }
        };

        for backend in self.registry.real() {
            let Some((count_a, count_b)) = counts.get(backend.name()) else {
                continue;
            };
            if backend.set_operation_count(OperationClass::A, *count_a) {
                info!(backend = backend.name(), "disabled by persisted class-A quota");
            }
            if backend.set_operation_count(OperationClass::B, *count_b) {
                info!(backend = backend.name(), "disabled by persisted class-B quota");
            }
        }
    }

    /// Zero a backend's counters in store and memory and clear the quota trip.
    ///
    /// # Errors
    ///
    /// Returns the store error when persistence fails; memory is reset
    /// regardless so the pool can recover.
    pub async fn reset_operations(&self, backend: &str) -> Result<(), CounterStoreError> {
        if let Some(b) = self.registry.get(backend) {
            b.reset_operation_counts();
        }
        if let Some(counters) = &self.counters {
            counters.reset_operation_counts(backend).await?;
        }
        Ok(())
    }
}

impl HealthReporter for Reporter {
    fn report_health(&self, backend: &str, healthy: bool, checked_at: DateTime<Utc>) {
        let Some(b) = self.registry.get(backend) else {
            return;
        };
        b.set_health(healthy, checked_at);
        self.metrics
            .set_backend_health(backend, &b.config.endpoint, healthy);
    }
}

impl StatsReporter for Reporter {
    fn report_stats(&self, backend: &str, used_bytes: i64, object_count: i64) {
        let Some(b) = self.registry.get(backend) else {
            return;
        };
        b.set_usage(used_bytes, object_count);
        self.metrics
            .set_backend_usage(backend, used_bytes, object_count);
    }
}

#[async_trait]
impl OperationRecorder for Reporter {
    async fn record_operation(&self, backend: &str, class: OperationClass) {
        let Some(b) = self.registry.get(backend) else {
            return;
        };

        self.metrics.record_backend_operation(backend, class);

        let newly_disabled = match &self.counters {
            Some(counters) => match counters.increment_operation(backend, class).await {
                Ok(new_count) => b.set_operation_count(class, new_count),
                Err(e) => {
                    // Persistence failure must not lose the quota signal: the
                    // in-memory counter still advances so limits can fire.
                    warn!(backend, error = %e, "failed to persist operation count");
                    b.record_operation(class)
                }
            },
            None => b.record_operation(class),
        };

        if newly_disabled {
            info!(
                backend,
                class = class.as_str(),
                "backend disabled after exceeding operation limit"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicI64, Ordering};

    use super::*;
    use crate::config::{BucketConfig, Config, OperationLimits};

    struct MemoryCounters {
        count: AtomicI64,
        fail: bool,
    }

    #[async_trait]
    impl CounterStore for MemoryCounters {
        async fn increment_operation(
            &self,
            _bucket: &str,
            _class: OperationClass,
        ) -> Result<i64, CounterStoreError> {
            if self.fail {
                return Err("store down".into());
            }
            Ok(self.count.fetch_add(1, Ordering::SeqCst) + 1)
        }

        async fn operation_counts(
            &self,
        ) -> Result<HashMap<String, (i64, i64)>, CounterStoreError> {
            let mut map = HashMap::new();
            map.insert("b1".to_owned(), (self.count.load(Ordering::SeqCst), 0));
            Ok(map)
        }

        async fn reset_operation_counts(&self, _bucket: &str) -> Result<(), CounterStoreError> {
            self.count.store(0, Ordering::SeqCst);
            Ok(())
        }
    }

    fn registry_with_limit(limit_a: i64) -> Arc<Registry> {
        let config = Config {
            buckets: vec![BucketConfig {
                name: "b1".to_owned(),
                endpoint: "http://minio:9000".to_owned(),
                access_key_id: "AK".to_owned(),
                secret_access_key: "SK".to_owned(),
                operation_limits: OperationLimits {
                    type_a: limit_a,
                    type_b: 0,
                },
                ..BucketConfig::default()
            }],
            ..Config::default()
        };
        Arc::new(Registry::new(&config, reqwest::Client::new()).expect("registry"))
    }

    #[tokio::test]
    async fn test_should_track_counts_through_store() {
        let registry = registry_with_limit(3);
        let counters = Arc::new(MemoryCounters {
            count: AtomicI64::new(0),
            fail: false,
        });
        let reporter = Reporter::new(
            Arc::clone(&registry),
            Arc::new(Metrics::new()),
            Some(counters),
        );

        for _ in 0..2 {
            reporter.record_operation("b1", OperationClass::A).await;
        }
        let backend = registry.get("b1").expect("b1");
        assert!(backend.is_available());

        reporter.record_operation("b1", OperationClass::A).await;
        assert!(!backend.is_available());
        assert!(backend.operation_limit_reached());
        assert_eq!(backend.operation_count(OperationClass::A), 3);
    }

    #[tokio::test]
    async fn test_should_fall_back_to_memory_on_store_failure() {
        let registry = registry_with_limit(2);
        let counters = Arc::new(MemoryCounters {
            count: AtomicI64::new(0),
            fail: true,
        });
        let reporter = Reporter::new(
            Arc::clone(&registry),
            Arc::new(Metrics::new()),
            Some(counters),
        );

        reporter.record_operation("b1", OperationClass::A).await;
        reporter.record_operation("b1", OperationClass::A).await;

        let backend = registry.get("b1").expect("b1");
        assert_eq!(backend.operation_count(OperationClass::A), 2);
        assert!(!backend.is_available(), "limits still fire when the store is down");
    }

    #[tokio::test]
    async fn test_should_reload_persisted_counts() {
        let registry = registry_with_limit(5);
        let counters = Arc::new(MemoryCounters {
            count: AtomicI64::new(7),
            fail: false,
        });
        let reporter = Reporter::new(
            Arc::clone(&registry),
            Arc::new(Metrics::new()),
            Some(counters),
        );

        reporter.load_persisted_counts().await;
        let backend = registry.get("b1").expect("b1");
        assert_eq!(backend.operation_count(OperationClass::A), 7);
        assert!(!backend.is_available(), "persisted count over limit disables");

        reporter.reset_operations("b1").await.expect("reset");
        assert!(backend.is_available());
        assert_eq!(backend.operation_count(OperationClass::A), 0);
    }
}
