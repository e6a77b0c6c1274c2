//! Prometheus metrics.
//!
//! All collectors hang off one owned [`prometheus::Registry`] passed around
//! as a dependency, so test fixtures can run components in isolation without
//! fighting over a process-global registry.

use prometheus::{
    Encoder, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder,
};

use crate::backend::OperationClass;

/// The gateway's metric set.
pub struct Metrics {
    registry: Registry,
    backend_up: IntGaugeVec,
    backend_used_bytes: IntGaugeVec,
    backend_object_count: IntGaugeVec,
    backend_operations: IntCounterVec,
    balancer_decisions: IntCounterVec,
    s3_operations: IntCounterVec,
    s3_operation_duration: HistogramVec,
}

impl Metrics {
    /// Create and register all collectors.
    ///
    /// # Panics
    ///
    /// Panics if collector registration fails, which only happens on
    /// duplicate registration within the same registry.
    #[must_use]
    pub fn new() -> Self {
        let registry = Registry::new();

        let backend_up = IntGaugeVec::new(
            Opts::new("switchyard_backend_up", "Backend availability (0/1)"),
            &["backend", "endpoint"],
        )
        .expect("valid metric definition");

        let backend_used_bytes = IntGaugeVec::new(
            Opts::new("switchyard_backend_used_bytes", "Bytes stored per backend"),
            &["backend"],
        )
        .expect("valid metric definition");

        let backend_object_count = IntGaugeVec::new(
            Opts::new("switchyard_backend_objects", "Objects stored per backend"),
            &["backend"],
        )
        .expect("valid metric definition");

        let backend_operations = IntCounterVec::new(
            Opts::new(
                "switchyard_backend_operations_total",
                "Backend operations by quota class",
            ),
            &["backend", "class"],
        )
        .expect("valid metric definition");

        let balancer_decisions = IntCounterVec::new(
            Opts::new(
                "switchyard_balancer_decisions_total",
                "Balancer picks by strategy and chosen backend",
            ),
            &["strategy", "backend"],
        )
        .expect("valid metric definition");

        let s3_operations = IntCounterVec::new(
            Opts::new(
                "switchyard_s3_operations_total",
                "Client-facing S3 operations",
            ),
            &["method", "bucket", "status"],
        )
        .expect("valid metric definition");

        let s3_operation_duration = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "switchyard_s3_operation_duration_seconds",
                "Client-facing S3 operation duration",
            )
            .buckets(vec![
                0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
            ]),
            &["method", "bucket"],
        )
        .expect("valid metric definition");

        for collector in [
            Box::new(backend_up.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(backend_used_bytes.clone()),
            Box::new(backend_object_count.clone()),
            Box::new(backend_operations.clone()),
            Box::new(balancer_decisions.clone()),
            Box::new(s3_operations.clone()),
            Box::new(s3_operation_duration.clone()),
        ] {
            registry
                .register(collector)
                .expect("collectors register once");
        }

        Self {
            registry,
            backend_up,
            backend_used_bytes,
            backend_object_count,
            backend_operations,
            balancer_decisions,
            s3_operations,
            s3_operation_duration,
        }
    }

    /// Record a health transition.
    pub fn set_backend_health(&self, backend: &str, endpoint: &str, healthy: bool) {
        self.backend_up
            .with_label_values(&[backend, endpoint])
            .set(i64::from(healthy));
    }

    /// Record a usage scan result.
    pub fn set_backend_usage(&self, backend: &str, used_bytes: i64, object_count: i64) {
        self.backend_used_bytes
            .with_label_values(&[backend])
            .set(used_bytes);
        self.backend_object_count
            .with_label_values(&[backend])
            .set(object_count);
    }

    /// Count one backend operation in its quota class.
    pub fn record_backend_operation(&self, backend: &str, class: OperationClass) {
        self.backend_operations
            .with_label_values(&[backend, class.as_str()])
            .inc();
    }

    /// Count one balancer decision.
    pub fn record_balancer_decision(&self, strategy: &str, backend: &str) {
        self.balancer_decisions
            .with_label_values(&[strategy, backend])
            .inc();
    }

    /// Count one client-facing S3 operation and observe its duration.
    pub fn record_s3_operation(&self, method: &str, bucket: &str, status: u16, seconds: f64) {
        self.s3_operations
            .with_label_values(&[method, bucket, &status.to_string()])
            .inc();
        self.s3_operation_duration
            .with_label_values(&[method, bucket])
            .observe(seconds);
    }

    /// Render the registry in the Prometheus text exposition format.
    #[must_use]
    pub fn render(&self) -> String {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buf) {
            tracing::error!(error = %e, "failed to encode metrics");
            return String::new();
        }
        String::from_utf8(buf).unwrap_or_default()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_render_recorded_metrics() {
        let metrics = Metrics::new();
        metrics.set_backend_health("b1", "https://minio:9000", true);
        metrics.set_backend_usage("b1", 1024, 3);
        metrics.record_backend_operation("b1", OperationClass::A);
        metrics.record_balancer_decision("least-space", "b1");
        metrics.record_s3_operation("PUT", "media", 200, 0.05);

        let text = metrics.render();
        assert!(text.contains("switchyard_backend_up"));
        assert!(text.contains("switchyard_backend_used_bytes{backend=\"b1\"} 1024"));
        assert!(text.contains(
            "switchyard_backend_operations_total{backend=\"b1\",class=\"A\"} 1"
        ));
        assert!(text.contains("switchyard_balancer_decisions_total"));
        assert!(text.contains("switchyard_s3_operation_duration_seconds"));
    }

    #[test]
    fn test_should_keep_registries_isolated() {
        let a = Metrics::new();
        let b = Metrics::new();
        a.record_backend_operation("b1", OperationClass::B);
        assert!(a.render().contains("class=\"B\""));
        assert!(!b.render().contains("class=\"B\""));
    }
}
