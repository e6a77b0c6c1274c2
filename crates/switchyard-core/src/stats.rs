//! The statistics monitor.
//!
//! Every `update_stats_period` the monitor walks each real backend's full
//! object listing (paginated `ListObjectsV2`), sums sizes and counts, and
//! reports the totals. Every page fetched is a class-A operation. A failed
//! scan leaves the previous figures in place.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, warn};

use crate::backend::{Backend, OperationClass, Registry};
use crate::health::MonitorHandle;
use crate::reporter::{OperationRecorder, StatsReporter};

/// Stats-scan knobs.
#[derive(Debug, Clone)]
pub struct StatsConfig {
    /// Time between scan rounds.
    pub period: Duration,
    /// Deadline per page fetch.
    pub timeout: Duration,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            period: Duration::from_secs(60),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Periodic usage scanner for all real backends.
pub struct StatsMonitor<R> {
    registry: Arc<Registry>,
    reporter: Arc<R>,
    config: StatsConfig,
}

impl<R> StatsMonitor<R>
where
    R: StatsReporter + OperationRecorder + 'static,
{
    /// Create a monitor; it does nothing until [`StatsMonitor::spawn`].
    #[must_use]
    pub fn new(registry: Arc<Registry>, reporter: Arc<R>, config: StatsConfig) -> Self {
        Self {
            registry,
            reporter,
            config,
        }
    }

    /// Start the scan loop. The first round runs immediately.
    #[must_use]
    pub fn spawn(self) -> MonitorHandle {
        let (stop_tx, mut stop_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.config.period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        self.scan_round().await;
                    }
                    _ = stop_rx.changed() => {
                        debug!("stats monitor stopping");
                        return;
                    }
                }
            }
        });

        MonitorHandle::new(stop_tx, task)
    }

    /// Scan every real backend in parallel and join the round.
    async fn scan_round(&self) {
        let backends = self.registry.real();
        let mut scans = Vec::with_capacity(backends.len());

        for backend in backends {
            let reporter = Arc::clone(&self.reporter);
            let timeout = self.config.timeout;
            scans.push(tokio::spawn(async move {
                scan_backend(&backend, reporter.as_ref(), timeout).await;
            }));
        }

        for scan in scans {
            let _ = scan.await;
        }
    }
}

/// Walk one backend's full listing; report totals only on success.
async fn scan_backend<R>(backend: &Backend, reporter: &R, timeout: Duration)
where
    R: StatsReporter + OperationRecorder,
{
    let Some(client) = backend.client() else {
        return;
    };

    let mut total_size = 0_i64;
    let mut object_count = 0_i64;
    let mut continuation: Option<String> = None;

    loop {
        let result = client
            .list_objects_page(continuation.as_deref(), None, Some(timeout))
            .await;

        // Every page fetch is billable traffic.
        reporter
            .record_operation(backend.name(), OperationClass::A)
            .await;

        let page = match result {
            Ok(page) => page,
            Err(e) => {
                warn!(backend = backend.name(), error = %e, "stats scan failed");
                return;
            }
        };

        for (_, size) in &page.objects {
            object_count += 1;
            total_size += size;
        }

        if !page.is_truncated {
            break;
        }
        match page.next_continuation_token {
            Some(token) => continuation = Some(token),
            None => break,
        }
    }

    reporter.report_stats(backend.name(), total_size, object_count);
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;

    #[derive(Default)]
    struct RecordingReporter {
        stats: Mutex<Vec<(String, i64, i64)>>,
        operations: Mutex<usize>,
    }

    impl StatsReporter for RecordingReporter {
        fn report_stats(&self, backend: &str, used_bytes: i64, object_count: i64) {
            self.stats
                .lock()
                .unwrap()
                .push((backend.to_owned(), used_bytes, object_count));
        }
    }

    #[async_trait]
    impl OperationRecorder for RecordingReporter {
        async fn record_operation(&self, _backend: &str, _class: OperationClass) {
            *self.operations.lock().unwrap() += 1;
        }
    }

    #[tokio::test]
    async fn test_should_leave_previous_values_on_failure() {
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
        registry.get("dead").expect("backend").set_usage(999, 9);

        let reporter = Arc::new(RecordingReporter::default());
        let monitor = StatsMonitor::new(
            Arc::clone(&registry),
            Arc::clone(&reporter),
            StatsConfig {
                period: Duration::from_secs(3600),
                timeout: Duration::from_millis(500),
            },
        );
        monitor.scan_round().await;

        // No stats reported on failure: previous figures stay.
        assert!(reporter.stats.lock().unwrap().is_empty());
        assert_eq!(registry.get("dead").expect("backend").used_bytes(), 999);
        // The failed page fetch still cost one class-A operation.
        assert_eq!(*reporter.operations.lock().unwrap(), 1);
    }
}
