//! The hyper service tying the gateway together.
//!
//! Request lifecycle:
//!
//! 1. Metrics endpoint interception (`GET /metrics` when enabled)
//! 2. Admin API (`/api/...`, bearer-token gated)
//! 3. S3 routing (virtual-host resolution + operation identification)
//! 4. Optional SigV4 verification against the gateway credentials
//! 5. Body collection and dispatch to the operation handler
//! 6. Error rendering, S3 operation metrics, asynchronous access logging
//! 7. Common response headers (`x-amz-request-id`, `Server`)

use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use http::{Method, StatusCode};
use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::service::Service;
use switchyard_auth::AuthError;
use switchyard_model::{GatewayOperation, S3Error, S3ErrorCode};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::access_log::{self, RequestInfo};
use crate::body::GatewayBody;
use crate::handler::Gateway;
use crate::response::error_response;
use crate::router::{self, RoutingContext};

/// The gateway as a hyper service.
pub struct GatewayService {
    gateway: Arc<Gateway>,
}

impl GatewayService {
    /// Wrap a gateway.
    #[must_use]
    pub fn new(gateway: Arc<Gateway>) -> Self {
        Self { gateway }
    }
}

impl Clone for GatewayService {
    fn clone(&self) -> Self {
        Self {
            gateway: Arc::clone(&self.gateway),
        }
    }
}

impl Service<http::Request<Incoming>> for GatewayService {
    type Response = http::Response<GatewayBody>;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn call(&self, req: http::Request<Incoming>) -> Self::Future {
        let gateway = Arc::clone(&self.gateway);

        Box::pin(async move {
            let request_id = Uuid::new_v4().to_string();
            let response = process_request(&gateway, req, &request_id).await;
            Ok(add_common_headers(response, &request_id))
        })
    }
}

async fn process_request(
    gateway: &Arc<Gateway>,
    req: http::Request<Incoming>,
    request_id: &str,
) -> http::Response<GatewayBody> {
    let settings = gateway.settings();
    let method = req.method().clone();
    let path = req.uri().path().to_owned();

    debug!(%method, path, request_id, "incoming request");

    // Prometheus exposition.
    if settings.metrics_enabled && method == Method::GET && path == settings.metrics_path {
        return metrics_response(&gateway.metrics.render());
    }

    // Admin surface.
    if path == "/api" || path.starts_with("/api/") {
        return admin_request(gateway, req, &settings.admin_token, settings.admin_enabled)
            .await;
    }

    // S3 surface.
    let started = Instant::now();

    let routing = router::resolve(&req, settings.virtual_host, |bucket| {
        gateway.registry.get(bucket).is_some()
    });
    let ctx = match routing {
        Ok(ctx) => ctx,
        Err(err) => {
            warn!(%method, path, error = %err, request_id, "failed to route request");
            return error_response(&err, request_id);
        }
    };

    let (parts, incoming) = req.into_parts();
    let info = RequestInfo::capture(&parts);

    // SigV4 gate, optionally pinned to the configured canonical host.
    if settings.auth_required {
        let canonical_host = if settings.canonical_host.is_empty() {
            None
        } else {
            Some(settings.canonical_host.as_str())
        };
        if let Err(err) =
            switchyard_auth::verify_request(&parts, &settings.credentials, canonical_host)
        {
            let s3_err = auth_error(&err, &path);
            let response = error_response(&s3_err, request_id);
            finish_request(gateway, &ctx, &info, &response, started);
            return response;
        }
    }

    let body = match incoming.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(err) => {
            warn!(error = %err, request_id, "failed to read request body");
            let s3_err = S3Error::internal("Failed to read request body", &path);
            return error_response(&s3_err, request_id);
        }
    };

    let response = match dispatch(gateway, &parts, &ctx, body).await {
        Ok(response) => response,
        Err(err) => {
            debug!(operation = %ctx.operation, error = %err, request_id, "operation failed");
            error_response(&err, request_id)
        }
    };

    finish_request(gateway, &ctx, &info, &response, started);
    response
}

/// Dispatch a routed request to its handler.
async fn dispatch(
    gateway: &Gateway,
    parts: &http::request::Parts,
    ctx: &RoutingContext,
    body: Bytes,
) -> Result<http::Response<GatewayBody>, S3Error> {
    let bucket = ctx.bucket.as_deref().unwrap_or("");
    let key = ctx.key.as_deref().unwrap_or("");

    match ctx.operation {
        GatewayOperation::ListBuckets => gateway.list_buckets(),
        GatewayOperation::ListObjects => gateway.list_objects(ctx, bucket).await,
        GatewayOperation::HeadBucket => gateway.head_bucket(bucket),
        GatewayOperation::CreateBucket => gateway.create_bucket(bucket),
        GatewayOperation::DeleteBucket => gateway.delete_bucket(bucket).await,
        GatewayOperation::GetObject => gateway.get_object(bucket, key).await,
        GatewayOperation::HeadObject => gateway.head_object(bucket, key).await,
        GatewayOperation::PutObject => gateway.put_object(parts, bucket, key, body).await,
        GatewayOperation::CopyObject => gateway.copy_object(parts, bucket, key).await,
        GatewayOperation::DeleteObject => gateway.delete_object(bucket, key).await,
        GatewayOperation::CreateMultipartUpload => {
            gateway.create_multipart_upload(bucket, key).await
        }
        GatewayOperation::ListMultipartUploads => {
            gateway.list_multipart_uploads(ctx, bucket).await
        }
        GatewayOperation::UploadPart => gateway.upload_part(parts, ctx, bucket, key, body).await,
        GatewayOperation::ListParts => gateway.list_parts(ctx, bucket, key).await,
        GatewayOperation::CompleteMultipartUpload => {
            gateway.complete_multipart_upload(ctx, bucket, key, body).await
        }
        GatewayOperation::AbortMultipartUpload => {
            gateway.abort_multipart_upload(ctx, bucket, key).await
        }
    }
}

/// Record metrics and queue the access log once the response is decided.
fn finish_request(
    gateway: &Arc<Gateway>,
    ctx: &RoutingContext,
    info: &RequestInfo,
    response: &http::Response<GatewayBody>,
    started: Instant,
) {
    let bucket = ctx.bucket.as_deref().unwrap_or("");
    let key = ctx.key.as_deref().unwrap_or("");
    let status = response.status().as_u16();
    let elapsed = started.elapsed();

    gateway.metrics.record_s3_operation(
        ctx.operation.as_str(),
        bucket,
        status,
        elapsed.as_secs_f64(),
    );

    let error_code = response
        .headers()
        .get("X-Amz-Error-Code")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_owned();
    let response_size = response
        .headers()
        .get(http::header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);

    access_log::record(
        &gateway.store,
        ctx.operation,
        bucket,
        key,
        info,
        status,
        &error_code,
        elapsed,
        response_size,
    );
}

/// Handle an `/api` request: availability, token, then routing.
async fn admin_request(
    gateway: &Arc<Gateway>,
    req: http::Request<Incoming>,
    token: &str,
    enabled: bool,
) -> http::Response<GatewayBody> {
    if !enabled {
        return json_error(StatusCode::NOT_FOUND, "admin API disabled");
    }

    let presented = req
        .headers()
        .get(http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.strip_prefix("Bearer ").unwrap_or(v).to_owned());
    match presented {
        Some(presented) if !token.is_empty() && presented == token => {}
        _ => return json_error(StatusCode::UNAUTHORIZED, "invalid token"),
    }

    let method = req.method().clone();
    let path = req.uri().path().to_owned();
    let query: Vec<(String, String)> = req
        .uri()
        .query()
        .unwrap_or("")
        .split('&')
        .filter(|s| !s.is_empty())
        .map(|pair| match pair.find('=') {
            Some(pos) => (
                router::decode_key(&pair[..pos]),
                router::decode_key(&pair[pos + 1..]),
            ),
            None => (router::decode_key(pair), String::new()),
        })
        .collect();

    let body = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(_) => return json_error(StatusCode::BAD_REQUEST, "failed to read request body"),
    };

    gateway
        .handle_admin(&method, &path, &query, body)
        .await
        .unwrap_or_else(|e| json_error(StatusCode::INTERNAL_SERVER_ERROR, &e.message))
}

fn json_error(status: StatusCode, message: &str) -> http::Response<GatewayBody> {
    let body = serde_json::json!({ "error": message }).to_string();
    http::Response::builder()
        .status(status)
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(GatewayBody::from_string(body))
        .unwrap_or_else(|_| {
            let mut fallback = http::Response::new(GatewayBody::empty());
            *fallback.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            fallback
        })
}

fn metrics_response(rendered: &str) -> http::Response<GatewayBody> {
    http::Response::builder()
        .status(StatusCode::OK)
        .header(
            http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )
        .body(GatewayBody::from_string(rendered))
        .unwrap_or_else(|_| http::Response::new(GatewayBody::empty()))
}

fn auth_error(err: &AuthError, resource: &str) -> S3Error {
    let code = match err.s3_code() {
        "InvalidAccessKeyId" => S3ErrorCode::InvalidAccessKeyId,
        "AccessDenied" => S3ErrorCode::AccessDenied,
        _ => S3ErrorCode::SignatureDoesNotMatch,
    };
    S3Error::new(code, err.to_string(), resource)
}

fn add_common_headers(
    mut response: http::Response<GatewayBody>,
    request_id: &str,
) -> http::Response<GatewayBody> {
    let headers = response.headers_mut();
    if let Ok(value) = http::header::HeaderValue::from_str(request_id) {
        headers.insert("x-amz-request-id", value.clone());
        headers.insert("x-amz-id-2", value);
    }
    headers.insert(
        http::header::SERVER,
        http::header::HeaderValue::from_static("Switchyard"),
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_add_request_id_and_server_headers() {
        let response = http::Response::builder()
            .status(StatusCode::OK)
            .body(GatewayBody::empty())
            .expect("response");
        let response = add_common_headers(response, "req-42");

        assert_eq!(
            response
                .headers()
                .get("x-amz-request-id")
                .and_then(|v| v.to_str().ok()),
            Some("req-42")
        );
        assert_eq!(
            response
                .headers()
                .get(http::header::SERVER)
                .and_then(|v| v.to_str().ok()),
            Some("Switchyard")
        );
    }

    #[test]
    fn test_should_map_auth_errors_to_s3_codes() {
        let err = auth_error(&AuthError::UnknownAccessKey("AK".to_owned()), "/b/k");
        assert_eq!(err.code, S3ErrorCode::InvalidAccessKeyId);

        let err = auth_error(&AuthError::SignatureMismatch, "/b/k");
        assert_eq!(err.code, S3ErrorCode::SignatureDoesNotMatch);

        let err = auth_error(&AuthError::MissingAuthHeader, "/b/k");
        assert_eq!(err.code, S3ErrorCode::AccessDenied);
    }

    #[test]
    fn test_should_render_metrics_content_type() {
        let response = metrics_response("switchyard_backend_up 1\n");
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response
            .headers()
            .get(http::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("text/plain")));
    }
}
