//! The gateway handler: shared dependencies and cross-cutting helpers.
//!
//! One [`Gateway`] instance serves every request. Handlers for the
//! individual S3 operations live in `object_ops`, `bucket_ops`, and
//! `multipart`; the admin API in `admin`. Everything mutable at runtime is
//! behind either the registry (rebuilt on reconfiguration) or the
//! [`GatewaySettings`] snapshot (swapped atomically on config reload).

use std::sync::Arc;

use parking_lot::RwLock;
use switchyard_auth::credentials::Credentials;
use switchyard_auth::presign::{PresignRequest, Presigner};
use switchyard_core::backend::{Backend, OperationClass, Registry};
use switchyard_core::balancer::Balancer;
use switchyard_core::config::Config;
use switchyard_core::manager::ConfigManager;
use switchyard_core::metrics::Metrics;
use switchyard_core::reporter::{OperationRecorder, Reporter};
use switchyard_model::{S3Error, S3ErrorCode};
use switchyard_store::Store;

/// Client-facing settings snapshot, replaced wholesale on config reload so a
/// request sees one consistent view.
#[derive(Debug, Clone)]
pub struct GatewaySettings {
    /// Credentials clients sign with.
    pub credentials: Credentials,
    /// Stream object bodies through the gateway instead of redirecting.
    pub proxy_mode: bool,
    /// Require SigV4 on every S3 request.
    pub auth_required: bool,
    /// Resolve `<bucket>.<host>` addressing.
    pub virtual_host: bool,
    /// Canonical host pinned for signature verification; empty = use the
    /// request's Host.
    pub canonical_host: String,
    /// Whether /metrics is served.
    pub metrics_enabled: bool,
    /// Metrics exposition path.
    pub metrics_path: String,
    /// Whether the admin API is served.
    pub admin_enabled: bool,
    /// Bearer token guarding the admin API.
    pub admin_token: String,
}

impl GatewaySettings {
    /// Project the relevant sections out of a full config.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            credentials: Credentials::new(
                config.s3api.access_key.clone(),
                config.s3api.secret_key.clone(),
            ),
            proxy_mode: config.s3api.proxy_mode,
            auth_required: config.s3api.auth_required,
            virtual_host: config.s3api.virtual_host,
            canonical_host: config.s3api.host.clone(),
            metrics_enabled: config.metrics.enabled,
            metrics_path: config.metrics.path.clone(),
            admin_enabled: config.api.enabled,
            admin_token: config.api.token.clone(),
        }
    }
}

/// Shared state behind every request handler.
pub struct Gateway {
    pub(crate) registry: Arc<Registry>,
    pub(crate) balancer: Arc<Balancer>,
    pub(crate) store: Arc<Store>,
    pub(crate) reporter: Arc<Reporter>,
    pub(crate) presigner: Presigner,
    pub(crate) http: reqwest::Client,
    pub(crate) metrics: Arc<Metrics>,
    pub(crate) config_manager: Arc<ConfigManager>,
    settings: RwLock<Arc<GatewaySettings>>,
}

impl Gateway {
    /// Wire up the gateway.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<Registry>,
        balancer: Arc<Balancer>,
        store: Arc<Store>,
        reporter: Arc<Reporter>,
        metrics: Arc<Metrics>,
        config_manager: Arc<ConfigManager>,
        http: reqwest::Client,
    ) -> Self {
        let settings = GatewaySettings::from_config(&config_manager.current());
        Self {
            registry,
            balancer,
            store,
            reporter,
            presigner: Presigner::default(),
            http,
            metrics,
            config_manager,
            settings: RwLock::new(Arc::new(settings)),
        }
    }

    /// The current settings snapshot.
    #[must_use]
    pub fn settings(&self) -> Arc<GatewaySettings> {
        Arc::clone(&self.settings.read())
    }

    /// Swap in settings from a new config (hot reload).
    pub fn update_settings(&self, config: &Config) {
        *self.settings.write() = Arc::new(GatewaySettings::from_config(config));
    }

    /// Resolve a client-addressable (virtual) bucket, or the S3 error the
    /// surface must return: unknown and real-flagged buckets are both
    /// `NoSuchBucket` — real backends are never addressable.
    pub(crate) fn virtual_bucket(&self, name: &str) -> Result<Arc<Backend>, S3Error> {
        let backend = self
            .registry
            .get(name)
            .ok_or_else(|| S3Error::no_such_bucket(name))?;
        if !backend.is_virtual() {
            return Err(S3Error::no_such_bucket(name));
        }
        Ok(backend)
    }

    /// Resolve the real backend a mapping points at.
    pub(crate) fn real_backend(&self, name: &str, resource: &str) -> Result<Arc<Backend>, S3Error> {
        self.registry
            .get(name)
            .filter(|b| !b.is_virtual())
            .ok_or_else(|| S3Error::internal("Mapped real backend not found", resource))
    }

    /// Account one backend operation: metrics, persistent counter, quota.
    pub(crate) async fn record_backend_operation(&self, backend: &str, class: OperationClass) {
        self.reporter.record_operation(backend, class).await;
    }

    /// The presign input for one backend object.
    pub(crate) fn presign_request<'a>(
        &self,
        backend: &'a Backend,
        method: &'a str,
        key: &'a str,
        extra_query: &'a [(String, String)],
    ) -> PresignRequest<'a> {
        PresignRequest {
            method,
            endpoint: &backend.config.endpoint,
            region: &backend.config.region,
            bucket: &backend.config.name,
            key,
            path_style: backend.config.path_style,
            credentials: backend_credentials(backend),
            extra_query,
        }
    }
}

/// The credential pair a backend's presigned URLs are signed with.
fn backend_credentials(backend: &Backend) -> &Credentials {
    // Safe: BackendClient construction requires non-virtual config, which in
    // turn requires credentials; virtual backends never reach presigning.
    backend
        .client()
        .map(switchyard_core::client::BackendClient::credentials)
        .expect("presigning requires a real backend")
}

/// A fresh opaque ETag in the quoted-hex shape clients expect.
#[must_use]
pub(crate) fn fresh_etag() -> String {
    let nanos = chrono::Utc::now()
        .timestamp_nanos_opt()
        .unwrap_or_default();
    format!("\"{nanos:x}\"")
}

/// Build a download URL on a backend's custom public host, optionally
/// stripping the bucket segment. Each key segment is re-escaped so
/// pre-encoded client keys come out normalized.
pub(crate) fn custom_host_url(
    custom_host: &str,
    bucket: &str,
    key: &str,
    remove_bucket: bool,
) -> Result<String, S3Error> {
    let host = custom_host.trim();
    if host.is_empty() {
        return Err(S3Error::new(
            S3ErrorCode::InternalError,
            "custom host is empty",
            key,
        ));
    }

    let base = if host.contains("://") {
        host.trim_end_matches('/').to_owned()
    } else {
        format!("https://{}", host.trim_end_matches('/'))
    };

    let mut segments: Vec<String> = Vec::new();
    if !remove_bucket {
        segments.push(escape_segment(bucket));
    }
    for part in key.trim_start_matches('/').split('/') {
        let decoded = if part.contains('%') {
            percent_encoding::percent_decode_str(part)
                .decode_utf8_lossy()
                .into_owned()
        } else {
            part.to_owned()
        };
        segments.push(escape_segment(&decoded));
    }

    Ok(format!("{base}/{}", segments.join("/")))
}

/// Escape one path segment, keeping the sub-delims S3 object keys commonly
/// carry readable.
fn escape_segment(segment: &str) -> String {
    const KEEP: &[char] = &[
        '!', '$', '&', '\'', '(', ')', '*', '+', ',', ';', '=', ':', '@',
    ];
    let escaped = switchyard_auth::canonical::uri_encode(segment);
    let mut out = escaped;
    for &c in KEEP {
        let code = format!("%{:02X}", c as u32);
        out = out.replace(&code, &c.to_string());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_build_custom_host_url_with_bucket() {
        let url = custom_host_url("cdn.example.com", "pool-a", "img/a b.png", false)
            .expect("url");
        assert_eq!(url, "https://cdn.example.com/pool-a/img/a%20b.png");
    }

    #[test]
    fn test_should_strip_bucket_segment_when_requested() {
        let url = custom_host_url("https://cdn.example.com/", "pool-a", "img/a.png", true)
            .expect("url");
        assert_eq!(url, "https://cdn.example.com/img/a.png");
    }

    #[test]
    fn test_should_normalize_pre_encoded_keys() {
        let url = custom_host_url("cdn.example.com", "pool-a", "img/a%20b.png", true)
            .expect("url");
        assert_eq!(url, "https://cdn.example.com/img/a%20b.png");
    }

    #[test]
    fn test_should_keep_common_key_punctuation_readable() {
        let url = custom_host_url("cdn.example.com", "pool-a", "v=1/a+b:c.png", true)
            .expect("url");
        assert_eq!(url, "https://cdn.example.com/v=1/a+b:c.png");
    }

    #[test]
    fn test_should_reject_empty_custom_host() {
        assert!(custom_host_url("  ", "pool-a", "k", false).is_err());
    }

    #[test]
    fn test_should_emit_quoted_hex_etags() {
        let etag = fresh_etag();
        assert!(etag.starts_with('"') && etag.ends_with('"'));
        assert!(etag[1..etag.len() - 1]
            .chars()
            .all(|c| c.is_ascii_hexdigit()));
    }
}
