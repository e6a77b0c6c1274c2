//! The backend registry: one entry per configured bucket, real or virtual.
//!
//! A [`Backend`] pairs its immutable [`BucketConfig`] with runtime state fed
//! by the monitors: availability, last-checked timestamp, used bytes, object
//! count, and per-class operation counters. Counters are atomics; the
//! availability pair is guarded by the per-backend lock, so a health
//! transition and a quota trip never interleave halfway.
//!
//! The registry itself is a snapshot table behind an `RwLock`. Hot
//! reconfiguration builds a complete replacement table first and swaps it in
//! only when every client constructed, so a bad config never tears down a
//! working pool.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tracing::{info, warn};

use crate::client::BackendClient;
use crate::config::{BucketConfig, Config};

/// Sentinel for "no capacity limit": large enough to dwarf any real object,
/// small enough to never overflow arithmetic against real sizes.
const UNLIMITED_SPACE: i64 = 1 << 62;

/// Operation class for quota accounting: A = mutating/listing, B = reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationClass {
    /// Mutating or listing operations.
    A,
    /// Reading operations.
    B,
}

impl OperationClass {
    /// Label used in metrics and the store.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::A => "A",
            Self::B => "B",
        }
    }
}

/// Errors from registry construction or rebuild.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// An S3 client could not be constructed for a backend.
    #[error("cannot build client for backend {name}: {source}")]
    ClientConstruction {
        /// The backend name.
        name: String,
        /// The underlying failure.
        #[source]
        source: crate::client::ClientError,
    },
}

/// Mutable availability state, guarded together.
#[derive(Debug)]
struct Availability {
    available: bool,
    last_checked: DateTime<Utc>,
    operation_limit_reached: bool,
}

/// One registered bucket: a real S3 backend or a virtual front.
pub struct Backend {
    /// The configuration this backend was built from.
    pub config: BucketConfig,
    client: Option<BackendClient>,
    state: Mutex<Availability>,
    used_bytes: AtomicI64,
    object_count: AtomicI64,
    op_count_a: AtomicI64,
    op_count_b: AtomicI64,
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backend")
            .field("name", &self.config.name)
            .field("virtual", &self.config.virtual_bucket)
            .field("available", &self.is_available())
            .field("used_bytes", &self.used_bytes())
            .finish_non_exhaustive()
    }
}

impl Backend {
    /// Build a backend from config. Real backends get a client; virtual
    /// buckets carry none.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::ClientConstruction`] when the HTTP client for
    /// a real backend cannot be built.
    pub fn from_config(
        config: BucketConfig,
        http: &reqwest::Client,
    ) -> Result<Self, BackendError> {
        let client = if config.virtual_bucket {
            None
        } else {
            Some(
                BackendClient::new(http.clone(), &config).map_err(|source| {
                    BackendError::ClientConstruction {
                        name: config.name.clone(),
                        source,
                    }
                })?,
            )
        };

        Ok(Self {
            config,
            client,
            state: Mutex::new(Availability {
                available: true,
                last_checked: Utc::now(),
                operation_limit_reached: false,
            }),
            used_bytes: AtomicI64::new(0),
            object_count: AtomicI64::new(0),
            op_count_a: AtomicI64::new(0),
            op_count_b: AtomicI64::new(0),
        })
    }

    /// Test-only constructor without a client.
    #[must_use]
    pub fn for_tests(config: BucketConfig) -> Self {
        Self {
            config,
            client: None,
            state: Mutex::new(Availability {
                available: true,
                last_checked: Utc::now(),
                operation_limit_reached: false,
            }),
            used_bytes: AtomicI64::new(0),
            object_count: AtomicI64::new(0),
            op_count_a: AtomicI64::new(0),
            op_count_b: AtomicI64::new(0),
        }
    }

    /// Backend name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// The S3 client for a real backend; `None` for virtual buckets.
    #[must_use]
    pub fn client(&self) -> Option<&BackendClient> {
        self.client.as_ref()
    }

    /// Whether this is a virtual (client-facing) bucket.
    #[must_use]
    pub fn is_virtual(&self) -> bool {
        self.config.virtual_bucket
    }

    /// Current availability as last decided by health checks and quotas.
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.state.lock().available
    }

    /// When the backend was last probed.
    #[must_use]
    pub fn last_checked(&self) -> DateTime<Utc> {
        self.state.lock().last_checked
    }

    /// Whether the quota tripped the backend offline.
    #[must_use]
    pub fn operation_limit_reached(&self) -> bool {
        self.state.lock().operation_limit_reached
    }

    /// Record a health-probe outcome. A backend disabled by quota stays
    /// disabled regardless of probe results.
    pub fn set_health(&self, healthy: bool, checked_at: DateTime<Utc>) {
        let mut state = self.state.lock();
        if !state.operation_limit_reached {
            state.available = healthy;
        }
        state.last_checked = checked_at;
    }

    /// Bytes currently attributed to this backend.
    #[must_use]
    pub fn used_bytes(&self) -> i64 {
        self.used_bytes.load(Ordering::Relaxed)
    }

    /// Objects currently attributed to this backend.
    #[must_use]
    pub fn object_count(&self) -> i64 {
        self.object_count.load(Ordering::Relaxed)
    }

    /// Overwrite usage from a stats scan.
    pub fn set_usage(&self, used_bytes: i64, object_count: i64) {
        self.used_bytes.store(used_bytes, Ordering::Relaxed);
        self.object_count.store(object_count, Ordering::Relaxed);
    }

    /// Add to used bytes after a successful write.
    pub fn add_used_bytes(&self, delta: i64) {
        self.used_bytes.fetch_add(delta, Ordering::Relaxed);
    }

    /// Remaining capacity; effectively unbounded when no limit is set.
    #[must_use]
    pub fn available_space(&self) -> i64 {
        if self.config.max_size_bytes == 0 {
            return UNLIMITED_SPACE;
        }
        self.config.max_size_bytes - self.used_bytes()
    }

    /// Current counter for an operation class.
    #[must_use]
    pub fn operation_count(&self, class: OperationClass) -> i64 {
        match class {
            OperationClass::A => self.op_count_a.load(Ordering::Relaxed),
            OperationClass::B => self.op_count_b.load(Ordering::Relaxed),
        }
    }

    fn limit_for(&self, class: OperationClass) -> i64 {
        match class {
            OperationClass::A => self.config.operation_limits.type_a,
            OperationClass::B => self.config.operation_limits.type_b,
        }
    }

    /// Atomically increment the class counter. Returns `true` exactly once:
    /// when the increment first reaches the configured limit and disables the
    /// backend.
    pub fn record_operation(&self, class: OperationClass) -> bool {
        if self.config.virtual_bucket {
            return false;
        }

        let counter = match class {
            OperationClass::A => &self.op_count_a,
            OperationClass::B => &self.op_count_b,
        };
        let value = counter.fetch_add(1, Ordering::Relaxed) + 1;

        self.check_limit(class, value)
    }

    /// Overwrite the class counter with a persisted cumulative value and
    /// re-evaluate the limit. Returns `true` when this write newly disables
    /// the backend.
    pub fn set_operation_count(&self, class: OperationClass, value: i64) -> bool {
        if self.config.virtual_bucket {
            return false;
        }

        match class {
            OperationClass::A => self.op_count_a.store(value, Ordering::Relaxed),
            OperationClass::B => self.op_count_b.store(value, Ordering::Relaxed),
        }

        self.check_limit(class, value)
    }

    fn check_limit(&self, class: OperationClass, value: i64) -> bool {
        let limit = self.limit_for(class);
        if limit <= 0 || value < limit {
            return false;
        }

        let mut state = self.state.lock();
        if state.operation_limit_reached {
            return false;
        }
        state.operation_limit_reached = true;
        state.available = false;
        true
    }

    /// Clear the quota trip and both counters (administrative reset). The
    /// next health probe decides availability again.
    pub fn reset_operation_counts(&self) {
        self.op_count_a.store(0, Ordering::Relaxed);
        self.op_count_b.store(0, Ordering::Relaxed);
        let mut state = self.state.lock();
        state.operation_limit_reached = false;
        state.available = true;
    }
}

struct RegistryTable {
    by_name: HashMap<String, Arc<Backend>>,
    ordered: Vec<Arc<Backend>>,
}

impl RegistryTable {
    fn build(config: &Config, http: &reqwest::Client) -> Result<Self, BackendError> {
        let mut by_name = HashMap::new();
        let mut ordered = Vec::new();

        for bucket in &config.buckets {
            if !bucket.enabled {
                continue;
            }
            let backend = Arc::new(Backend::from_config(bucket.clone(), http)?);
            by_name.insert(bucket.name.clone(), Arc::clone(&backend));
            ordered.push(backend);
        }

        Ok(Self { by_name, ordered })
    }
}

/// The name → backend table. Candidate enumeration preserves configuration
/// order so strategy tie-breaks stay deterministic.
pub struct Registry {
    table: RwLock<RegistryTable>,
    http: reqwest::Client,
}

impl Registry {
    /// Build the registry from config.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] if any enabled real backend's client cannot
    /// be constructed.
    pub fn new(config: &Config, http: reqwest::Client) -> Result<Self, BackendError> {
        let table = RegistryTable::build(config, &http)?;
        info!(backends = table.ordered.len(), "backend registry initialized");
        Ok(Self {
            table: RwLock::new(table),
            http,
        })
    }

    /// Look up a backend by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<Backend>> {
        self.table.read().by_name.get(name).cloned()
    }

    /// All registered backends in configuration order.
    #[must_use]
    pub fn all(&self) -> Vec<Arc<Backend>> {
        self.table.read().ordered.clone()
    }

    /// Real (non-virtual) backends in configuration order.
    #[must_use]
    pub fn real(&self) -> Vec<Arc<Backend>> {
        self.table
            .read()
            .ordered
            .iter()
            .filter(|b| !b.is_virtual())
            .cloned()
            .collect()
    }

    /// Virtual buckets in configuration order.
    #[must_use]
    pub fn virtual_buckets(&self) -> Vec<Arc<Backend>> {
        self.table
            .read()
            .ordered
            .iter()
            .filter(|b| b.is_virtual())
            .cloned()
            .collect()
    }

    /// Balancer candidates: real, available, and within capacity.
    #[must_use]
    pub fn candidates(&self) -> Vec<Arc<Backend>> {
        self.table
            .read()
            .ordered
            .iter()
            .filter(|b| {
                !b.is_virtual()
                    && b.is_available()
                    && (b.config.max_size_bytes == 0
                        || b.used_bytes() < b.config.max_size_bytes)
            })
            .cloned()
            .collect()
    }

    /// Replace the whole table from new config. The replacement is built
    /// completely before the swap; on any client failure the old table stays
    /// in place and the error is returned.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] from client construction; the registry is
    /// unchanged in that case.
    pub fn rebuild(&self, config: &Config) -> Result<(), BackendError> {
        let replacement = match RegistryTable::build(config, &self.http) {
            Ok(table) => table,
            Err(e) => {
                warn!(error = %e, "backend rebuild failed, keeping previous table");
                return Err(e);
            }
        };

        let count = replacement.ordered.len();
        *self.table.write() = replacement;
        info!(backends = count, "backend registry rebuilt");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OperationLimits;

    fn backend_with_limit(limit_a: i64) -> Backend {
        Backend::for_tests(BucketConfig {
            name: "b1".to_owned(),
            operation_limits: OperationLimits {
                type_a: limit_a,
                type_b: 0,
            },
            ..BucketConfig::default()
        })
    }

    #[test]
    fn test_should_report_newly_disabled_exactly_once() {
        let backend = backend_with_limit(3);

        assert!(!backend.record_operation(OperationClass::A));
        assert!(!backend.record_operation(OperationClass::A));
        // Third increment reaches the limit.
        assert!(backend.record_operation(OperationClass::A));
        assert!(!backend.is_available());
        assert!(backend.operation_limit_reached());
        // Further increments never re-report.
        assert!(!backend.record_operation(OperationClass::A));
        assert_eq!(backend.operation_count(OperationClass::A), 4);
    }

    #[test]
    fn test_should_ignore_limit_when_unset() {
        let backend = backend_with_limit(0);
        for _ in 0..100 {
            assert!(!backend.record_operation(OperationClass::A));
        }
        assert!(backend.is_available());
    }

    #[test]
    fn test_should_not_count_operations_on_virtual_buckets() {
        let backend = Backend::for_tests(BucketConfig {
            name: "media".to_owned(),
            virtual_bucket: true,
            operation_limits: OperationLimits { type_a: 1, type_b: 1 },
            ..BucketConfig::default()
        });
        assert!(!backend.record_operation(OperationClass::A));
        assert_eq!(backend.operation_count(OperationClass::A), 0);
    }

    #[test]
    fn test_should_disable_on_persisted_count_reload() {
        let backend = backend_with_limit(10);
        assert!(backend.set_operation_count(OperationClass::A, 12));
        assert!(!backend.is_available());
        // Reloading again does not re-report.
        assert!(!backend.set_operation_count(OperationClass::A, 13));
    }

    #[test]
    fn test_should_keep_quota_disable_through_health_success() {
        let backend = backend_with_limit(1);
        assert!(backend.record_operation(OperationClass::A));
        assert!(!backend.is_available());

        backend.set_health(true, Utc::now());
        assert!(
            !backend.is_available(),
            "healthy probe must not resurrect a quota-disabled backend"
        );

        backend.reset_operation_counts();
        assert!(backend.is_available());
        assert_eq!(backend.operation_count(OperationClass::A), 0);
    }

    #[test]
    fn test_should_compute_available_space() {
        let backend = Backend::for_tests(BucketConfig {
            name: "b1".to_owned(),
            max_size_bytes: 1000,
            ..BucketConfig::default()
        });
        backend.set_usage(400, 4);
        assert_eq!(backend.available_space(), 600);

        let unlimited = Backend::for_tests(BucketConfig {
            name: "b2".to_owned(),
            ..BucketConfig::default()
        });
        unlimited.set_usage(1 << 40, 100);
        assert!(unlimited.available_space() > 1 << 61);
    }

    #[test]
    fn test_should_exclude_full_backends_from_candidates() {
        let config = Config {
            buckets: vec![
                BucketConfig {
                    name: "full".to_owned(),
                    virtual_bucket: true, // avoid client construction
                    ..BucketConfig::default()
                },
            ],
            ..Config::default()
        };
        let registry = Registry::new(&config, reqwest::Client::new()).expect("registry");
        // Virtual buckets never become candidates.
        assert!(registry.candidates().is_empty());
        assert_eq!(registry.virtual_buckets().len(), 1);
    }
}
