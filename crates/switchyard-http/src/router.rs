//! Request routing: virtual-host resolution, key decoding, and operation
//! identification.
//!
//! Path-style requests address `/{bucket}/{key}` (the key may contain `/`).
//! With virtual-host mode on, a request whose leading hostname label names a
//! known bucket is rewritten to path style first; unknown labels pass
//! through untouched so health checks and admin traffic keep working.
//!
//! Object keys are percent-decoded iteratively (at most three rounds) until
//! the form is stable, which tolerates clients that double-encode.

use http::Method;
use percent_encoding::percent_decode_str;
use switchyard_model::{GatewayOperation, S3Error, S3ErrorCode};

/// Maximum percent-decode rounds applied to object keys.
const MAX_DECODE_ROUNDS: usize = 3;

/// The outcome of routing one request.
#[derive(Debug, Clone)]
pub struct RoutingContext {
    /// The resolved bucket name, if any.
    pub bucket: Option<String>,
    /// The resolved object key, if any.
    pub key: Option<String>,
    /// The identified operation.
    pub operation: GatewayOperation,
    /// Parsed query parameters.
    pub query: Vec<(String, String)>,
}

impl RoutingContext {
    /// Look up a query parameter's value.
    #[must_use]
    pub fn query_value(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Whether a query parameter is present (with or without a value).
    #[must_use]
    pub fn query_has(&self, name: &str) -> bool {
        self.query.iter().any(|(k, _)| k == name)
    }
}

/// Resolve an HTTP request into a [`RoutingContext`].
///
/// `bucket_exists` gates virtual-host rewriting: a leading hostname label is
/// only treated as a bucket when the registry knows it.
///
/// # Errors
///
/// Returns `MethodNotAllowed` for verbs outside the S3 surface.
pub fn resolve<B>(
    req: &http::Request<B>,
    virtual_host: bool,
    bucket_exists: impl Fn(&str) -> bool,
) -> Result<RoutingContext, S3Error> {
    let method = req.method();
    let uri = req.uri();
    let headers = req.headers();

    let query = parse_query(uri.query().unwrap_or(""));

    let path = uri.path();
    let (mut bucket, mut key) = split_path(path);

    if virtual_host && bucket.as_deref().map_or(true, |b| !bucket_exists(b)) {
        if let Some(host_bucket) = bucket_from_host(headers, &bucket_exists) {
            // Host names the bucket: the whole path is the key.
            let full_key = path.trim_start_matches('/');
            key = if full_key.is_empty() {
                None
            } else {
                Some(decode_key(full_key))
            };
            bucket = Some(host_bucket);
        }
    }

    let operation = identify_operation(method, bucket.as_deref(), key.as_deref(), &query, headers)?;

    Ok(RoutingContext {
        bucket,
        key,
        operation,
        query,
    })
}

/// Extract a bucket name from the leading hostname label.
fn bucket_from_host(
    headers: &http::HeaderMap,
    bucket_exists: &impl Fn(&str) -> bool,
) -> Option<String> {
    let host = headers
        .get(http::header::HOST)
        .and_then(|v| v.to_str().ok())?;
    let hostname = host.split(':').next().unwrap_or(host);
    let label = hostname.split('.').next()?;
    if label.is_empty() || !bucket_exists(label) {
        return None;
    }
    Some(label.to_owned())
}

/// Split `/{bucket}/{key...}` into its components, decoding the key.
fn split_path(path: &str) -> (Option<String>, Option<String>) {
    let trimmed = path.strip_prefix('/').unwrap_or(path);
    if trimmed.is_empty() {
        return (None, None);
    }

    match trimmed.find('/') {
        Some(pos) => {
            let bucket = decode_key(&trimmed[..pos]);
            let raw_key = &trimmed[pos + 1..];
            let key = if raw_key.is_empty() {
                None
            } else {
                Some(decode_key(raw_key))
            };
            (Some(bucket), key)
        }
        None => (Some(decode_key(trimmed)), None),
    }
}

/// Percent-decode until stable, at most [`MAX_DECODE_ROUNDS`] rounds.
#[must_use]
pub fn decode_key(raw: &str) -> String {
    let mut current = raw.to_owned();
    for _ in 0..MAX_DECODE_ROUNDS {
        let decoded = percent_decode_str(&current).decode_utf8_lossy().into_owned();
        if decoded == current {
            break;
        }
        current = decoded;
    }
    current
}

fn parse_query(query: &str) -> Vec<(String, String)> {
    if query.is_empty() {
        return Vec::new();
    }
    query
        .split('&')
        .filter(|s| !s.is_empty())
        .map(|pair| match pair.find('=') {
            Some(pos) => (
                decode_key(&pair[..pos]),
                decode_key(&pair[pos + 1..]),
            ),
            None => (decode_key(pair), String::new()),
        })
        .collect()
}

fn query_has(query: &[(String, String)], name: &str) -> bool {
    query.iter().any(|(k, _)| k == name)
}

fn identify_operation(
    method: &Method,
    bucket: Option<&str>,
    key: Option<&str>,
    query: &[(String, String)],
    headers: &http::HeaderMap,
) -> Result<GatewayOperation, S3Error> {
    match (bucket, key) {
        (None, _) => match *method {
            Method::GET => Ok(GatewayOperation::ListBuckets),
            _ => Err(method_not_allowed(method)),
        },
        (Some(_), None) => identify_bucket_operation(method, query),
        (Some(_), Some(_)) => identify_object_operation(method, query, headers),
    }
}

fn identify_bucket_operation(
    method: &Method,
    query: &[(String, String)],
) -> Result<GatewayOperation, S3Error> {
    match *method {
        Method::GET => {
            if query_has(query, "uploads") {
                Ok(GatewayOperation::ListMultipartUploads)
            } else {
                Ok(GatewayOperation::ListObjects)
            }
        }
        Method::HEAD => Ok(GatewayOperation::HeadBucket),
        Method::PUT => Ok(GatewayOperation::CreateBucket),
        Method::DELETE => Ok(GatewayOperation::DeleteBucket),
        _ => Err(method_not_allowed(method)),
    }
}

fn identify_object_operation(
    method: &Method,
    query: &[(String, String)],
    headers: &http::HeaderMap,
) -> Result<GatewayOperation, S3Error> {
    let has_upload_id = query_has(query, "uploadId");
    match *method {
        Method::GET => {
            if query_has(query, "uploads") {
                Ok(GatewayOperation::ListMultipartUploads)
            } else if has_upload_id {
                Ok(GatewayOperation::ListParts)
            } else {
                Ok(GatewayOperation::GetObject)
            }
        }
        Method::HEAD => Ok(GatewayOperation::HeadObject),
        Method::PUT => {
            if has_upload_id && query_has(query, "partNumber") {
                Ok(GatewayOperation::UploadPart)
            } else if headers.contains_key("x-amz-copy-source") {
                Ok(GatewayOperation::CopyObject)
            } else {
                Ok(GatewayOperation::PutObject)
            }
        }
        Method::DELETE => {
            if has_upload_id {
                Ok(GatewayOperation::AbortMultipartUpload)
            } else {
                Ok(GatewayOperation::DeleteObject)
            }
        }
        Method::POST => {
            if query_has(query, "uploads") {
                Ok(GatewayOperation::CreateMultipartUpload)
            } else if has_upload_id {
                Ok(GatewayOperation::CompleteMultipartUpload)
            } else {
                Err(method_not_allowed(method))
            }
        }
        _ => Err(method_not_allowed(method)),
    }
}

fn method_not_allowed(method: &Method) -> S3Error {
    S3Error::new(
        S3ErrorCode::MethodNotAllowed,
        format!("The {method} method is not allowed against this resource"),
        "",
    )
}
