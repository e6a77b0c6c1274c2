//! The health monitor.
//!
//! Every `health_check_period` the monitor probes each real backend in
//! parallel and waits for the whole round before the next tick. A probe is a
//! one-key `ListObjectsV2` — the cheapest request that proves the bucket is
//! reachable and the credentials still work. Each probe attempt is a class-A
//! operation, so monitoring spends from the same quota as real traffic.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::backend::{Backend, OperationClass, Registry};
use crate::reporter::{HealthReporter, OperationRecorder};

/// Delay between probe attempts on the same backend.
const RETRY_PAUSE: Duration = Duration::from_secs(1);

/// Health-probe knobs.
#[derive(Debug, Clone)]
pub struct HealthConfig {
    /// Time between probe rounds.
    pub period: Duration,
    /// Deadline per probe attempt.
    pub timeout: Duration,
    /// Extra attempts after the first failure.
    pub retries: u32,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            period: Duration::from_secs(30),
            timeout: Duration::from_secs(5),
            retries: 1,
        }
    }
}

/// Handle to a running monitor; dropping it does not stop the task, call
/// [`MonitorHandle::stop`].
pub struct MonitorHandle {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl MonitorHandle {
    pub(crate) fn new(stop_tx: watch::Sender<bool>, task: JoinHandle<()>) -> Self {
        Self { stop_tx, task }
    }

    /// Signal the monitor and wait for its loop to finish.
    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        let _ = self.task.await;
    }
}

/// Periodic prober for all real backends.
pub struct HealthMonitor<R> {
    registry: Arc<Registry>,
    reporter: Arc<R>,
    config: HealthConfig,
}

impl<R> HealthMonitor<R>
where
    R: HealthReporter + OperationRecorder + 'static,
{
    /// Create a monitor; it does nothing until [`HealthMonitor::spawn`].
    #[must_use]
    pub fn new(registry: Arc<Registry>, reporter: Arc<R>, config: HealthConfig) -> Self {
        Self {
            registry,
            reporter,
            config,
        }
    }

    /// Start the probe loop. The first round runs immediately.
    #[must_use]
    pub fn spawn(self) -> MonitorHandle {
        let (stop_tx, mut stop_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.config.period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        self.probe_round().await;
                    }
                    _ = stop_rx.changed() => {
                        debug!("health monitor stopping");
                        return;
                    }
                }
            }
        });

        MonitorHandle::new(stop_tx, task)
    }

    /// Probe every real backend in parallel and join the round.
    async fn probe_round(&self) {
        let backends = self.registry.real();
        let mut probes = Vec::with_capacity(backends.len());

        for backend in backends {
            let reporter = Arc::clone(&self.reporter);
            let config = self.config.clone();
            probes.push(tokio::spawn(async move {
                probe_backend(&backend, reporter.as_ref(), &config).await;
            }));
        }

        for probe in probes {
            let _ = probe.await;
        }
    }
}

/// Probe one backend, reporting the outcome and each attempt's quota cost.
async fn probe_backend<R>(backend: &Backend, reporter: &R, config: &HealthConfig)
where
    R: HealthReporter + OperationRecorder,
{
    let Some(client) = backend.client() else {
        return;
    };

    let attempts = config.retries + 1;
    let mut healthy = false;

    for attempt in 0..attempts {
        if attempt > 0 {
            tokio::time::sleep(RETRY_PAUSE).await;
        }

        let result = client
            .list_objects_page(None, Some(1), Some(config.timeout))
            .await;

        // The probe itself is billable traffic.
        reporter
            .record_operation(backend.name(), OperationClass::A)
            .await;

        match result {
            Ok(_) => {
                healthy = true;
                break;
            }
            Err(e) => {
                warn!(
                    backend = backend.name(),
                    attempt,
                    error = %e,
                    "health probe failed"
                );
            }
        }
    }

    reporter.report_health(backend.name(), healthy, Utc::now());
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::{DateTime, Utc};

    use super::*;

    #[derive(Default)]
    struct RecordingReporter {
        health: Mutex<Vec<(String, bool)>>,
        operations: Mutex<Vec<(String, OperationClass)>>,
    }

    impl HealthReporter for RecordingReporter {
        fn report_health(&self, backend: &str, healthy: bool, _at: DateTime<Utc>) {
            self.health.lock().unwrap().push((backend.to_owned(), healthy));
        }
    }

    #[async_trait]
    impl OperationRecorder for RecordingReporter {
        async fn record_operation(&self, backend: &str, class: OperationClass) {
            self.operations
                .lock()
                .unwrap()
                .push((backend.to_owned(), class));
        }
    }

    #[tokio::test]
    async fn test_should_mark_unreachable_backend_unhealthy() {
        // 127.0.0.1:1 refuses connections immediately.
        let config = crate::config::Config {
            buckets: vec![crate::config::BucketConfig {
                name: "dead".to_owned(),
                endpoint: "http://127.0.0.1:1".to_owned(),
                access_key_id: "AK".to_owned(),
                secret_access_key: "SK".to_owned(),
                path_style: true,
                ..crate::config::BucketConfig::default()
            }],
            ..crate::config::Config::default()
        };
        let registry =
            Arc::new(Registry::new(&config, reqwest::Client::new()).expect("registry"));
        let reporter = Arc::new(RecordingReporter::default());

        let monitor = HealthMonitor::new(
            Arc::clone(&registry),
            Arc::clone(&reporter),
            HealthConfig {
                period: Duration::from_secs(3600),
                timeout: Duration::from_millis(500),
                retries: 0,
            },
        );
        monitor.probe_round().await;

        let health = reporter.health.lock().unwrap();
        assert_eq!(health.as_slice(), &[("dead".to_owned(), false)]);

        // The failed probe still cost one class-A operation.
        let operations = reporter.operations.lock().unwrap();
        assert_eq!(operations.len(), 1);
        assert_eq!(operations[0].1, OperationClass::A);
    }

    #[tokio::test]
    async fn test_should_skip_virtual_buckets() {
        let config = crate::config::Config {
            buckets: vec![crate::config::BucketConfig {
                name: "media".to_owned(),
                virtual_bucket: true,
                ..crate::config::BucketConfig::default()
            }],
            ..crate::config::Config::default()
        };
        let registry =
            Arc::new(Registry::new(&config, reqwest::Client::new()).expect("registry"));
        let reporter = Arc::new(RecordingReporter::default());

        let monitor = HealthMonitor::new(
            Arc::clone(&registry),
            Arc::clone(&reporter),
            HealthConfig::default(),
        );
        monitor.probe_round().await;

        assert!(reporter.health.lock().unwrap().is_empty());
        assert!(reporter.operations.lock().unwrap().is_empty());
    }
}
