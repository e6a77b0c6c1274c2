//! Asynchronous access logging.
//!
//! Log rows are assembled after the response is decided and written on a
//! spawned task, so persistence latency (or failure) never blocks or fails
//! the client response.

use std::sync::Arc;
use std::time::Duration;

use switchyard_model::GatewayOperation;
use switchyard_store::{AccessLogEntry, Store};
use tracing::debug;

/// Everything the log row needs, captured before the request parts are
/// consumed.
#[derive(Debug, Clone, Default)]
pub struct RequestInfo {
    /// Forwarded-for / peer address.
    pub client_ip: String,
    /// User-Agent header.
    pub user_agent: String,
    /// Host header.
    pub host: String,
    /// Request Content-Length for uploads.
    pub request_size: i64,
}

impl RequestInfo {
    /// Capture the loggable request attributes.
    #[must_use]
    pub fn capture(parts: &http::request::Parts) -> Self {
        let header = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("")
                .to_owned()
        };

        let client_ip = {
            let forwarded = header("x-forwarded-for");
            let first = forwarded.split(',').next().unwrap_or("").trim().to_owned();
            if first.is_empty() {
                header("x-real-ip")
            } else {
                first
            }
        };

        Self {
            client_ip,
            user_agent: header("user-agent"),
            host: header("host"),
            request_size: parts
                .headers
                .get(http::header::CONTENT_LENGTH)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),
        }
    }
}

/// Queue one access-log row; returns immediately.
pub fn record(
    store: &Arc<Store>,
    operation: GatewayOperation,
    bucket: &str,
    key: &str,
    info: &RequestInfo,
    status: u16,
    error_code: &str,
    elapsed: Duration,
    response_size: i64,
) {
    let is_upload = matches!(
        operation,
        GatewayOperation::PutObject
            | GatewayOperation::CopyObject
            | GatewayOperation::UploadPart
            | GatewayOperation::CompleteMultipartUpload
    );
    let size = if is_upload {
        info.request_size
    } else {
        response_size
    };

    let entry = AccessLogEntry {
        action: operation.access_action().to_owned(),
        key: key.to_owned(),
        bucket: bucket.to_owned(),
        client_ip: info.client_ip.clone(),
        user_agent: info.user_agent.clone(),
        host: info.host.clone(),
        size,
        success: status < 400,
        error: if status < 400 {
            String::new()
        } else {
            error_code.to_owned()
        },
        response_ms: elapsed.as_millis().min(i64::MAX as u128) as i64,
    };

    let store = Arc::clone(store);
    tokio::spawn(async move {
        if let Err(e) = store.record_access(&entry).await {
            debug!(error = %e, "failed to record access log");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_prefer_forwarded_for_ip() {
        let req = http::Request::builder()
            .method(http::Method::GET)
            .uri("/media/a.txt")
            .header("x-forwarded-for", "203.0.113.9, 10.0.0.1")
            .header("x-real-ip", "10.0.0.2")
            .header("user-agent", "aws-cli/2.0")
            .header("host", "gw.example.com")
            .header(http::header::CONTENT_LENGTH, "123")
            .body(())
            .expect("request");
        let (parts, ()) = req.into_parts();

        let info = RequestInfo::capture(&parts);
        assert_eq!(info.client_ip, "203.0.113.9");
        assert_eq!(info.user_agent, "aws-cli/2.0");
        assert_eq!(info.host, "gw.example.com");
        assert_eq!(info.request_size, 123);
    }

    #[test]
    fn test_should_fall_back_to_real_ip() {
        let req = http::Request::builder()
            .method(http::Method::GET)
            .uri("/")
            .header("x-real-ip", "198.51.100.4")
            .body(())
            .expect("request");
        let (parts, ()) = req.into_parts();
        assert_eq!(RequestInfo::capture(&parts).client_ip, "198.51.100.4");
    }
}
