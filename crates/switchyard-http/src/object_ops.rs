//! Object handlers: GET, HEAD, PUT, server-side copy, DELETE.

use std::time::Duration;

use bytes::Bytes;
use futures_util::TryStreamExt;
use http::StatusCode;
use switchyard_core::backend::OperationClass;
use switchyard_model::types::CopyObjectResult;
use switchyard_model::{S3Error, S3ErrorCode};
use switchyard_store::StoreError;
use tracing::{info, warn};

use crate::body::GatewayBody;
use crate::handler::{Gateway, custom_host_url, fresh_etag};
use crate::response::{empty_response, redirect_response, xml_response};
use crate::router::decode_key;

/// Whole-object uploads may be large; give the reverse proxy a wide window.
const UPLOAD_TIMEOUT: Duration = Duration::from_secs(30 * 60);
/// Backend deletes are small control operations.
const DELETE_TIMEOUT: Duration = Duration::from_secs(30);

/// Response headers copied verbatim from the backend in proxy mode.
const PROXY_HEADERS: &[http::header::HeaderName] = &[
    http::header::CONTENT_TYPE,
    http::header::CONTENT_LENGTH,
    http::header::LAST_MODIFIED,
    http::header::ETAG,
    http::header::CONTENT_ENCODING,
    http::header::CACHE_CONTROL,
];

impl Gateway {
    /// `GET /{bucket}/{key}`: resolve the mapping and either redirect to a
    /// presigned (or custom-host) URL or stream the object through.
    pub async fn get_object(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<http::Response<GatewayBody>, S3Error> {
        self.virtual_bucket(bucket)?;

        let mapping = self
            .store
            .get_mapping(bucket, key)
            .await
            .map_err(|e| store_error(&e, key))?
            .ok_or_else(|| S3Error::no_such_key(key))?;

        let target = self.real_backend(&mapping.real_bucket, key)?;
        self.record_backend_operation(target.name(), OperationClass::B)
            .await;

        let download_url = if target.config.custom_host.is_empty() {
            let query = [];
            let request = self.presign_request(&target, "GET", &mapping.real_key, &query);
            self.presigner
                .download_url(&request, chrono::Utc::now())
                .map_err(|e| S3Error::internal(format!("failed to presign download: {e}"), key))?
        } else {
            custom_host_url(
                &target.config.custom_host,
                &target.config.name,
                &mapping.real_key,
                target.config.remove_bucket,
            )?
        };

        if self.settings().proxy_mode {
            self.proxy_download(&download_url, key).await
        } else {
            redirect_response(&download_url)
        }
    }

    /// Stream a backend response through, copying the standard headers.
    async fn proxy_download(
        &self,
        url: &str,
        key: &str,
    ) -> Result<http::Response<GatewayBody>, S3Error> {
        let backend_response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| S3Error::internal(format!("failed to fetch object: {e}"), key))?;

        let status = StatusCode::from_u16(backend_response.status().as_u16())
            .unwrap_or(StatusCode::BAD_GATEWAY);

        let mut builder = http::Response::builder().status(status);
        for name in PROXY_HEADERS {
            if let Some(value) = backend_response.headers().get(name.as_str()) {
                if let Ok(value) = http::header::HeaderValue::from_bytes(value.as_bytes()) {
                    builder = builder.header(name, value);
                }
            }
        }

        let stream = backend_response
            .bytes_stream()
            .map_err(|e| std::io::Error::other(e.to_string()));

        builder
            .body(GatewayBody::streaming(Box::pin(stream)))
            .map_err(|e| S3Error::internal(format!("failed to build proxy response: {e}"), key))
    }

    /// `HEAD /{bucket}/{key}`: answered entirely from the object records, no
    /// backend round trip.
    pub async fn head_object(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<http::Response<GatewayBody>, S3Error> {
        self.virtual_bucket(bucket)
            .map_err(|_| S3Error::no_such_bucket(bucket))?;

        let mapping = self
            .store
            .get_mapping(bucket, key)
            .await
            .map_err(|e| store_error(&e, key))?
            .ok_or_else(|| S3Error::no_such_key(key))?;

        let object = self
            .store
            .get_object(&mapping.real_key)
            .await
            .map_err(|e| store_error(&e, key))?
            .ok_or_else(|| S3Error::no_such_key(key))?;

        let etag = if object.etag.is_empty() {
            format!("\"{:x}\"", md5::compute(object.object_key.as_bytes()))
        } else {
            object.etag.clone()
        };
        let content_type = if object.content_type.is_empty() {
            "application/octet-stream"
        } else {
            &object.content_type
        };

        http::Response::builder()
            .status(StatusCode::OK)
            .header(http::header::CONTENT_LENGTH, object.size)
            .header(
                http::header::LAST_MODIFIED,
                object.updated().format("%a, %d %b %Y %H:%M:%S GMT").to_string(),
            )
            .header(http::header::ETAG, etag)
            .header(http::header::CONTENT_TYPE, content_type)
            .body(GatewayBody::empty())
            .map_err(|e| S3Error::internal(format!("failed to build response: {e}"), key))
    }

    /// `PUT /{bucket}/{key}`: pick (or reuse) a backend, create the mapping,
    /// and reverse-proxy the payload to a presigned URL. The gateway stays
    /// on the write path — no redirect for PUT.
    pub async fn put_object(
        &self,
        parts: &http::request::Parts,
        bucket: &str,
        key: &str,
        body: Bytes,
    ) -> Result<http::Response<GatewayBody>, S3Error> {
        self.virtual_bucket(bucket)?;

        let content_length = content_length(parts).ok_or_else(|| missing_content_length(key))?;

        // Reuse the existing mapping's backend; otherwise ask the balancer
        // and record the new mapping. A lost create race means another PUT
        // got there first — upload to the winner's backend.
        let (target, real_key) = match self
            .store
            .get_mapping(bucket, key)
            .await
            .map_err(|e| store_error(&e, key))?
        {
            Some(mapping) => (
                self.real_backend(&mapping.real_bucket, key)?,
                mapping.real_key,
            ),
            None => {
                let picked = self
                    .balancer
                    .pick(key, content_length)
                    .await
                    .map_err(|_| S3Error::insufficient_storage(key))?;

                match self
                    .store
                    .create_mapping(bucket, key, picked.name(), key)
                    .await
                {
                    Ok(()) => (picked, key.to_owned()),
                    Err(StoreError::MappingExists { .. }) => {
                        let winner = self
                            .store
                            .get_mapping(bucket, key)
                            .await
                            .map_err(|e| store_error(&e, key))?
                            .ok_or_else(|| {
                                S3Error::internal("mapping vanished during create race", key)
                            })?;
                        (
                            self.real_backend(&winner.real_bucket, key)?,
                            winner.real_key,
                        )
                    }
                    Err(e) => return Err(store_error(&e, key)),
                }
            }
        };

        self.record_backend_operation(target.name(), OperationClass::A)
            .await;

        let query = [];
        let request = self.presign_request(&target, "PUT", &real_key, &query);
        let upload_url = self
            .presigner
            .upload_url(&request, chrono::Utc::now())
            .map_err(|e| S3Error::internal(format!("failed to presign upload: {e}"), key))?;

        let content_type = header_str(parts, http::header::CONTENT_TYPE.as_str());
        let mut upload = self
            .http
            .put(&upload_url)
            .timeout(UPLOAD_TIMEOUT)
            .body(body);
        if let Some(ct) = &content_type {
            upload = upload.header(reqwest::header::CONTENT_TYPE, ct);
        }

        let backend_response = upload
            .send()
            .await
            .map_err(|e| S3Error::internal(format!("failed to upload object: {e}"), key))?;
        let status = backend_response.status();

        if !status.is_success() {
            let detail = backend_response.text().await.unwrap_or_default();
            warn!(key, status = status.as_u16(), detail, "backend upload failed");
            return Err(S3Error::internal(
                format!("Upload failed with status {}", status.as_u16()),
                key,
            ));
        }

        let etag = fresh_etag();
        let metadata = collect_metadata(parts);
        self.store
            .record_object(
                &real_key,
                target.name(),
                content_length,
                metadata.as_ref(),
                content_type.as_deref().unwrap_or(""),
                &etag,
            )
            .await
            .map_err(|e| store_error(&e, key))?;
        target.add_used_bytes(content_length);

        http::Response::builder()
            .status(StatusCode::OK)
            .header(http::header::ETAG, etag)
            .body(GatewayBody::empty())
            .map_err(|e| S3Error::internal(format!("failed to build response: {e}"), key))
    }

    /// `PUT /{bucket}/{key}` with `x-amz-copy-source`: zero-copy copy. Only
    /// a new mapping row is created, pointing at the source's real object.
    pub async fn copy_object(
        &self,
        parts: &http::request::Parts,
        dest_bucket: &str,
        dest_key: &str,
    ) -> Result<http::Response<GatewayBody>, S3Error> {
        let copy_source = header_str(parts, "x-amz-copy-source")
            .ok_or_else(|| S3Error::new(S3ErrorCode::InvalidArgument, "missing copy source", dest_key))?;

        let (source_bucket, source_key) = parse_copy_source(&copy_source)?;

        self.virtual_bucket(dest_bucket)?;
        if self.registry.get(&source_bucket).is_none() {
            return Err(S3Error::no_such_bucket(source_bucket));
        }

        let source_mapping = self
            .store
            .get_mapping(&source_bucket, &source_key)
            .await
            .map_err(|e| store_error(&e, &source_key))?
            .ok_or_else(|| S3Error::no_such_key(&source_key))?;

        // Copy onto an existing destination key overwrites: last writer wins.
        self.store
            .delete_mapping(dest_bucket, dest_key)
            .await
            .map_err(|e| store_error(&e, dest_key))?;
        self.store
            .create_mapping(
                dest_bucket,
                dest_key,
                &source_mapping.real_bucket,
                &source_mapping.real_key,
            )
            .await
            .map_err(|e| store_error(&e, dest_key))?;

        if let Ok(target) = self.real_backend(&source_mapping.real_bucket, dest_key) {
            self.record_backend_operation(target.name(), OperationClass::A)
                .await;
        }

        // REPLACE metadata lands on the shared object record.
        if header_str(parts, "x-amz-metadata-directive").as_deref() == Some("REPLACE") {
            if let Some(metadata) = collect_metadata(parts) {
                if let Some(object) = self
                    .store
                    .get_object(&source_mapping.real_key)
                    .await
                    .map_err(|e| store_error(&e, dest_key))?
                {
                    self.store
                        .record_object(
                            &object.object_key,
                            &object.bucket_name,
                            object.size,
                            Some(&metadata),
                            &object.content_type,
                            &object.etag,
                        )
                        .await
                        .map_err(|e| store_error(&e, dest_key))?;
                }
            }
        }

        let last_modified = self
            .store
            .get_object(&source_mapping.real_key)
            .await
            .map_err(|e| store_error(&e, dest_key))?
            .map_or_else(chrono::Utc::now, |o| o.updated());

        info!(
            source = %format!("{source_bucket}/{source_key}"),
            dest = %format!("{dest_bucket}/{dest_key}"),
            "object copied (zero-copy mapping)"
        );

        xml_response(
            StatusCode::OK,
            "CopyObjectResult",
            &CopyObjectResult {
                last_modified,
                etag: fresh_etag(),
            },
        )
    }

    /// `DELETE /{bucket}/{key}`: remove the mapping first; the backend
    /// object is deleted only when no other mapping references it. Always
    /// answers 204.
    pub async fn delete_object(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<http::Response<GatewayBody>, S3Error> {
        let requested = self
            .registry
            .get(bucket)
            .ok_or_else(|| S3Error::no_such_bucket(bucket))?;
        if !requested.is_virtual() {
            // Real backends are not client-addressable; deleting is a no-op.
            return empty_response(StatusCode::NO_CONTENT);
        }

        let Some(mapping) = self
            .store
            .get_mapping(bucket, key)
            .await
            .map_err(|e| store_error(&e, key))?
        else {
            // Idempotent delete.
            return empty_response(StatusCode::NO_CONTENT);
        };

        let target = self.real_backend(&mapping.real_bucket, key)?;

        self.store
            .delete_mapping(bucket, key)
            .await
            .map_err(|e| store_error(&e, key))?;

        let remaining = self
            .store
            .count_mappings_to(&mapping.real_bucket, &mapping.real_key)
            .await
            .map_err(|e| store_error(&e, key))?;

        if remaining == 0 {
            self.record_backend_operation(target.name(), OperationClass::A)
                .await;

            let query = [];
            let request = self.presign_request(&target, "DELETE", &mapping.real_key, &query);
            match self.presigner.delete_url(&request, chrono::Utc::now()) {
                Ok(url) => {
                    if let Err(e) = self.http.delete(&url).timeout(DELETE_TIMEOUT).send().await {
                        warn!(key, error = %e, "backend delete failed");
                    }
                }
                Err(e) => warn!(key, error = %e, "failed to presign delete"),
            }

            if let Err(e) = self.store.delete_object(&mapping.real_key).await {
                warn!(key, error = %e, "failed to delete object record");
            }
        }

        empty_response(StatusCode::NO_CONTENT)
    }
}

/// Translate a store failure into the wire error.
pub(crate) fn store_error(err: &StoreError, resource: &str) -> S3Error {
    S3Error::internal(format!("storage error: {err}"), resource)
}

pub(crate) fn missing_content_length(resource: &str) -> S3Error {
    S3Error::new(
        S3ErrorCode::MissingContentLength,
        "Content-Length header is required",
        resource,
    )
}

/// The declared Content-Length. `None` when the header is absent,
/// unparseable, or negative — all of which fail the request as
/// `MissingContentLength` before any state changes.
pub(crate) fn content_length(parts: &http::request::Parts) -> Option<i64> {
    parts
        .headers
        .get(http::header::CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .parse::<i64>()
        .ok()
        .filter(|n| *n >= 0)
}

pub(crate) fn header_str(parts: &http::request::Parts, name: &str) -> Option<String> {
    parts
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(ToOwned::to_owned)
}

/// Collect `x-amz-meta-*` headers into a JSON document.
pub(crate) fn collect_metadata(parts: &http::request::Parts) -> Option<serde_json::Value> {
    let mut map = serde_json::Map::new();
    for (name, value) in &parts.headers {
        let name = name.as_str();
        if let Some(meta_key) = name.strip_prefix("x-amz-meta-") {
            if let Ok(value) = value.to_str() {
                map.insert(
                    meta_key.to_owned(),
                    serde_json::Value::String(value.to_owned()),
                );
            }
        }
    }
    if map.is_empty() {
        None
    } else {
        Some(serde_json::Value::Object(map))
    }
}

/// Parse `[/]<bucket>/<key>` from `x-amz-copy-source`, URL-decoding the key.
pub(crate) fn parse_copy_source(raw: &str) -> Result<(String, String), S3Error> {
    let trimmed = raw.trim_start_matches('/');
    let (bucket, key) = trimmed.split_once('/').ok_or_else(|| {
        S3Error::new(S3ErrorCode::InvalidArgument, "Invalid copy source format", raw)
    })?;
    if bucket.is_empty() || key.is_empty() {
        return Err(S3Error::new(
            S3ErrorCode::InvalidArgument,
            "Invalid copy source format",
            raw,
        ));
    }
    Ok((bucket.to_owned(), decode_key(key)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_parse_copy_source_with_and_without_slash() {
        assert_eq!(
            parse_copy_source("/media/dir/a.txt").expect("parse"),
            ("media".to_owned(), "dir/a.txt".to_owned())
        );
        assert_eq!(
            parse_copy_source("media/a%20b.txt").expect("parse"),
            ("media".to_owned(), "a b.txt".to_owned())
        );
    }

    #[test]
    fn test_should_reject_copy_source_without_key() {
        assert!(parse_copy_source("/media").is_err());
        assert!(parse_copy_source("media/").is_err());
        assert!(parse_copy_source("/").is_err());
    }

    #[test]
    fn test_should_require_content_length_header() {
        let req = http::Request::builder()
            .method(http::Method::PUT)
            .uri("/media/a")
            .body(())
            .expect("request");
        let (parts, ()) = req.into_parts();
        assert_eq!(content_length(&parts), None);
    }

    #[test]
    fn test_should_reject_negative_content_length() {
        let req = http::Request::builder()
            .method(http::Method::PUT)
            .uri("/media/a")
            .header(http::header::CONTENT_LENGTH, "-3")
            .body(())
            .expect("request");
        let (parts, ()) = req.into_parts();
        assert_eq!(content_length(&parts), None);

        let req = http::Request::builder()
            .method(http::Method::PUT)
            .uri("/media/a")
            .header(http::header::CONTENT_LENGTH, "1048576")
            .body(())
            .expect("request");
        let (parts, ()) = req.into_parts();
        assert_eq!(content_length(&parts), Some(1_048_576));
    }

    #[test]
    fn test_should_collect_amz_metadata() {
        let req = http::Request::builder()
            .method(http::Method::PUT)
            .uri("/media/a")
            .header("x-amz-meta-owner", "ops")
            .header("x-amz-meta-tier", "gold")
            .header("content-type", "text/plain")
            .body(())
            .expect("request");
        let (parts, ()) = req.into_parts();
        let metadata = collect_metadata(&parts).expect("metadata");
        assert_eq!(metadata["owner"], "ops");
        assert_eq!(metadata["tier"], "gold");
        assert!(metadata.get("content-type").is_none());
    }
}
