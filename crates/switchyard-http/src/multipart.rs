//! The multipart engine.
//!
//! Session state machine per upload ID:
//!
//! ```text
//!               initiate                 upload-part ≥1
//! pending ────────────────► pending ──────────────────► pending
//!    │ abort / expiry                                 │ complete
//!    ▼                                                ▼
//! aborted                                         completed
//! ```
//!
//! The mapping row created at initiate is authoritative for which backend
//! owns the upload, so a gateway restart between initiate and complete still
//! resolves to the same backend. Capacity is enforced per part: a projected
//! overrun aborts the whole upload backend-side and fails the part with
//! `EntityTooLarge`.

use std::time::Duration;

use bytes::Bytes;
use http::StatusCode;
use switchyard_core::backend::{Backend, OperationClass};
use switchyard_model::types::{
    CompleteMultipartUploadResult, InitiateMultipartUploadResult, ListMultipartUploadsResult,
    ListPartsResult, MultipartUploadEntry, Owner, PartSummary,
};
use switchyard_model::{S3Error, S3ErrorCode};
use switchyard_store::{SessionStatus, StoreError};
use tracing::{info, warn};

use crate::body::GatewayBody;
use crate::handler::Gateway;
use crate::object_ops::{content_length, header_str, missing_content_length, store_error};
use crate::response::{empty_response, xml_response};
use crate::router::RoutingContext;

/// Part uploads may be large; match the whole-object window.
const PART_UPLOAD_TIMEOUT: Duration = Duration::from_secs(30 * 60);
/// Defaults per S3.
const DEFAULT_MAX_UPLOADS: i32 = 1000;
const DEFAULT_MAX_PARTS: i32 = 1000;

impl Gateway {
    /// `POST /{bucket}/{key}?uploads`: pick a backend (size hint 0), record
    /// the mapping and session, and pass the backend's upload ID through.
    pub async fn create_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<http::Response<GatewayBody>, S3Error> {
        self.virtual_bucket(bucket)?;

        let target = match self
            .store
            .get_mapping(bucket, key)
            .await
            .map_err(|e| store_error(&e, key))?
        {
            // Re-initiating an existing key sticks with its backend.
            Some(mapping) => self.real_backend(&mapping.real_bucket, key)?,
            None => {
                let picked = self
                    .balancer
                    .pick(key, 0)
                    .await
                    .map_err(|_| S3Error::insufficient_storage(key))?;
                match self
                    .store
                    .create_mapping(bucket, key, picked.name(), key)
                    .await
                {
                    Ok(()) => picked,
                    Err(StoreError::MappingExists { .. }) => {
                        let winner = self
                            .store
                            .get_mapping(bucket, key)
                            .await
                            .map_err(|e| store_error(&e, key))?
                            .ok_or_else(|| {
                                S3Error::internal("mapping vanished during create race", key)
                            })?;
                        self.real_backend(&winner.real_bucket, key)?
                    }
                    Err(e) => return Err(store_error(&e, key)),
                }
            }
        };

        self.record_backend_operation(target.name(), OperationClass::A)
            .await;

        let client = backend_client(&target, key)?;
        let upload_id = client.create_multipart_upload(key).await.map_err(|e| {
            S3Error::internal(format!("failed to initiate multipart upload: {e}"), key)
        })?;

        if let Err(e) = self.store.create_session(&upload_id, key, target.name()).await {
            // The backend upload exists either way; losing the session only
            // degrades capacity checks and listings.
            warn!(upload_id, error = %e, "failed to record upload session");
        }

        xml_response(
            StatusCode::OK,
            "InitiateMultipartUploadResult",
            &InitiateMultipartUploadResult {
                bucket: bucket.to_owned(),
                key: key.to_owned(),
                upload_id,
            },
        )
    }

    /// `PUT /{bucket}/{key}?uploadId&partNumber`: capacity-check the
    /// projected size, then reverse-proxy the part to a presigned URL.
    pub async fn upload_part(
        &self,
        parts: &http::request::Parts,
        ctx: &RoutingContext,
        bucket: &str,
        key: &str,
        body: Bytes,
    ) -> Result<http::Response<GatewayBody>, S3Error> {
        self.virtual_bucket(bucket)?;

        let upload_id = require_upload_id(ctx, key)?;
        let part_number: i32 = ctx
            .query_value("partNumber")
            .and_then(|v| v.parse().ok())
            .filter(|n| *n > 0)
            .ok_or_else(|| S3Error::new(S3ErrorCode::InvalidArgument, "Invalid part number", key))?;

        let part_size = content_length(parts).ok_or_else(|| missing_content_length(key))?;

        // The mapping normally exists from initiate; create one for
        // out-of-order clients that send parts first.
        let target = match self
            .store
            .get_mapping(bucket, key)
            .await
            .map_err(|e| store_error(&e, key))?
        {
            Some(mapping) => self.real_backend(&mapping.real_bucket, key)?,
            None => {
                let picked = self
                    .balancer
                    .pick(key, part_size)
                    .await
                    .map_err(|_| S3Error::insufficient_storage(key))?;
                match self
                    .store
                    .create_mapping(bucket, key, picked.name(), key)
                    .await
                {
                    Ok(()) => picked,
                    Err(StoreError::MappingExists { .. }) => {
                        let winner = self
                            .store
                            .get_mapping(bucket, key)
                            .await
                            .map_err(|e| store_error(&e, key))?
                            .ok_or_else(|| {
                                S3Error::internal("mapping vanished during create race", key)
                            })?;
                        self.real_backend(&winner.real_bucket, key)?
                    }
                    Err(e) => return Err(store_error(&e, key)),
                }
            }
        };

        self.record_backend_operation(target.name(), OperationClass::A)
            .await;

        // Capacity enforcement across parts: session size so far plus this
        // part must fit the backend's remaining space.
        let current_size = match self.store.get_session(upload_id).await {
            Ok(Some(session)) => session.size,
            Ok(None) => 0,
            Err(e) => {
                warn!(upload_id, error = %e, "failed to read upload session size");
                0
            }
        };

        let projected = current_size + part_size;
        let available = target.available_space();
        if projected > available {
            warn!(
                key,
                upload_id,
                current_size,
                part_size,
                available,
                "part would exceed backend capacity, aborting upload"
            );
            self.abort_backend_upload(&target, key, upload_id).await;
            return Err(S3Error::new(
                S3ErrorCode::EntityTooLarge,
                format!(
                    "Upload would exceed backend capacity. Current: {current_size} bytes, \
                     Part: {part_size} bytes, Available: {available} bytes"
                ),
                key,
            ));
        }

        let extra_query = vec![
            ("partNumber".to_owned(), part_number.to_string()),
            ("uploadId".to_owned(), upload_id.to_owned()),
        ];
        let request = self.presign_request(&target, "PUT", key, &extra_query);
        let part_url = self
            .presigner
            .upload_url(&request, chrono::Utc::now())
            .map_err(|e| S3Error::internal(format!("failed to presign part upload: {e}"), key))?;

        let mut upload = self
            .http
            .put(&part_url)
            .timeout(PART_UPLOAD_TIMEOUT)
            .body(body);
        if let Some(ct) = header_str(parts, http::header::CONTENT_TYPE.as_str()) {
            upload = upload.header(reqwest::header::CONTENT_TYPE, ct);
        }

        let backend_response = upload
            .send()
            .await
            .map_err(|e| S3Error::internal(format!("failed to upload part: {e}"), key))?;
        let status = backend_response.status();

        if !status.is_success() {
            let detail = backend_response.text().await.unwrap_or_default();
            warn!(key, part_number, status = status.as_u16(), detail, "part upload failed");
            return Err(S3Error::internal(
                format!("Upload part failed with status {}", status.as_u16()),
                key,
            ));
        }

        let etag = backend_response
            .headers()
            .get(reqwest::header::ETAG)
            .and_then(|v| v.to_str().ok())
            .map(ToOwned::to_owned);

        if let Err(e) = self.store.add_session_part(upload_id, part_size).await {
            warn!(upload_id, error = %e, "failed to account uploaded part");
        }

        let mut builder = http::Response::builder().status(StatusCode::OK);
        if let Some(etag) = etag {
            builder = builder.header(http::header::ETAG, etag);
        }
        builder
            .body(GatewayBody::empty())
            .map_err(|e| S3Error::internal(format!("failed to build response: {e}"), key))
    }

    /// `GET /{bucket}/{key}?uploadId`: direct backend passthrough.
    pub async fn list_parts(
        &self,
        ctx: &RoutingContext,
        bucket: &str,
        key: &str,
    ) -> Result<http::Response<GatewayBody>, S3Error> {
        self.virtual_bucket(bucket)?;

        let upload_id = require_upload_id(ctx, key)?;
        let part_number_marker = ctx
            .query_value("part-number-marker")
            .and_then(|v| v.parse::<i32>().ok())
            .unwrap_or(0);
        let max_parts = ctx
            .query_value("max-parts")
            .and_then(|v| v.parse::<i32>().ok())
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_MAX_PARTS);

        // The mapping identifies the owning backend; without it, probe every
        // real backend for the upload.
        let target = match self
            .store
            .get_mapping(bucket, key)
            .await
            .map_err(|e| store_error(&e, key))?
        {
            Some(mapping) => self.real_backend(&mapping.real_bucket, key)?,
            None => {
                let mut found = None;
                for candidate in self.registry.real() {
                    let Some(client) = candidate.client() else {
                        continue;
                    };
                    self.record_backend_operation(candidate.name(), OperationClass::B)
                        .await;
                    if client.list_parts(key, upload_id, 0, 1).await.is_ok() {
                        found = Some(candidate);
                        break;
                    }
                }
                found.ok_or_else(|| S3Error::no_such_upload(upload_id))?
            }
        };

        self.record_backend_operation(target.name(), OperationClass::B)
            .await;

        let client = backend_client(&target, key)?;
        let page = client
            .list_parts(key, upload_id, part_number_marker, max_parts)
            .await
            .map_err(|_| S3Error::no_such_upload(upload_id))?;

        xml_response(
            StatusCode::OK,
            "ListPartsResult",
            &ListPartsResult {
                bucket: bucket.to_owned(),
                key: key.to_owned(),
                upload_id: upload_id.to_owned(),
                part_number_marker,
                next_part_number_marker: page.next_part_number_marker,
                max_parts,
                is_truncated: page.is_truncated,
                parts: page
                    .parts
                    .into_iter()
                    .map(|p| PartSummary {
                        part_number: p.part_number,
                        last_modified: p.last_modified,
                        etag: p.etag,
                        size: p.size,
                    })
                    .collect(),
            },
        )
    }

    /// `GET /{bucket}?uploads`: pending sessions from the store, with a
    /// backend-scan fallback when the store is unavailable.
    pub async fn list_multipart_uploads(
        &self,
        ctx: &RoutingContext,
        bucket: &str,
    ) -> Result<http::Response<GatewayBody>, S3Error> {
        self.virtual_bucket(bucket)?;

        let prefix = ctx.query_value("prefix").unwrap_or("").to_owned();
        let key_marker = ctx.query_value("key-marker").unwrap_or("").to_owned();
        let upload_id_marker = ctx
            .query_value("upload-id-marker")
            .unwrap_or("")
            .to_owned();
        let max_uploads = ctx
            .query_value("max-uploads")
            .and_then(|v| v.parse::<i32>().ok())
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_MAX_UPLOADS);

        let mut is_truncated = false;
        let uploads = match self
            .store
            .pending_sessions(
                &prefix,
                &key_marker,
                &upload_id_marker,
                i64::from(max_uploads) + 1,
            )
            .await
        {
            Ok(mut sessions) => {
                if sessions.len() > max_uploads as usize {
                    sessions.truncate(max_uploads as usize);
                    is_truncated = true;
                }
                sessions
                    .into_iter()
                    .map(|session| MultipartUploadEntry {
                        key: session.object_key.clone(),
                        upload_id: session.upload_id.clone(),
                        initiator: Owner::gateway(),
                        owner: Owner::gateway(),
                        storage_class: "STANDARD".to_owned(),
                        initiated: session.created(),
                    })
                    .collect()
            }
            Err(e) => {
                // Degraded path: ask every real backend directly.
                warn!(error = %e, "pending-session query failed, scanning backends");
                let mut aggregated = Vec::new();
                for candidate in self.registry.real() {
                    let Some(client) = candidate.client() else {
                        continue;
                    };
                    self.record_backend_operation(candidate.name(), OperationClass::B)
                        .await;
                    match client.list_multipart_uploads(&prefix, max_uploads).await {
                        Ok(backend_uploads) => {
                            aggregated.extend(backend_uploads.into_iter().map(|u| {
                                MultipartUploadEntry {
                                    key: u.key,
                                    upload_id: u.upload_id,
                                    initiator: Owner::gateway(),
                                    owner: Owner::gateway(),
                                    storage_class: "STANDARD".to_owned(),
                                    initiated: u.initiated,
                                }
                            }));
                        }
                        Err(e) => {
                            warn!(backend = candidate.name(), error = %e, "backend upload listing failed");
                        }
                    }
                }
                aggregated
            }
        };

        let (next_key_marker, next_upload_id_marker) = if is_truncated {
            uploads
                .last()
                .map(|u: &MultipartUploadEntry| (u.key.clone(), u.upload_id.clone()))
                .unwrap_or_default()
        } else {
            (String::new(), String::new())
        };

        xml_response(
            StatusCode::OK,
            "ListMultipartUploadsResult",
            &ListMultipartUploadsResult {
                bucket: bucket.to_owned(),
                key_marker,
                upload_id_marker,
                next_key_marker,
                next_upload_id_marker,
                max_uploads,
                is_truncated,
                uploads,
            },
        )
    }

    /// `POST /{bucket}/{key}?uploadId`: final capacity check, then complete
    /// on the backend, learn the true size via HEAD, and record the object.
    pub async fn complete_multipart_upload(
        &self,
        ctx: &RoutingContext,
        bucket: &str,
        key: &str,
        body: Bytes,
    ) -> Result<http::Response<GatewayBody>, S3Error> {
        self.virtual_bucket(bucket)?;
        let upload_id = require_upload_id(ctx, key)?;

        let mapping = self
            .store
            .get_mapping(bucket, key)
            .await
            .map_err(|e| store_error(&e, key))?
            .ok_or_else(|| S3Error::no_such_key(key))?;
        let target = self.real_backend(&mapping.real_bucket, key)?;

        let mut parts = switchyard_xml::parse_complete_multipart_upload(&body).map_err(|e| {
            warn!(key, upload_id, error = %e, "malformed CompleteMultipartUpload body");
            S3Error::new(
                S3ErrorCode::MalformedXML,
                "The XML you provided was not well-formed",
                key,
            )
        })?;

        // Final check against the accumulated session size before asking the
        // backend to assemble the object.
        let total_size = match self.store.get_session(upload_id).await {
            Ok(Some(session)) => session.size,
            Ok(None) | Err(_) => 0,
        };
        if total_size > 0 {
            let available = target.available_space();
            if total_size > available {
                warn!(
                    key,
                    upload_id, total_size, available,
                    "completed size exceeds backend capacity, aborting upload"
                );
                self.abort_backend_upload(&target, key, upload_id).await;
                return Err(S3Error::new(
                    S3ErrorCode::EntityTooLarge,
                    format!(
                        "Upload size exceeds backend capacity. Total: {total_size} bytes, \
                         Available: {available} bytes"
                    ),
                    key,
                ));
            }
        }

        parts.sort_by_key(|p| p.part_number);
        let backend_parts: Vec<(i32, String)> = parts
            .iter()
            .map(|p| (p.part_number, p.etag.clone()))
            .collect();

        self.record_backend_operation(target.name(), OperationClass::A)
            .await;

        let client = backend_client(&target, key)?;
        let etag = client
            .complete_multipart_upload(key, upload_id, &backend_parts)
            .await
            .map_err(|e| match e.api_code() {
                // Surface the backend's own error vocabulary.
                Some(code) => S3Error::new(
                    switchyard_model::S3ErrorCode::from_backend_code(code),
                    e.to_string(),
                    key,
                ),
                None => S3Error::internal("Failed to complete multipart upload", key),
            })?;

        // The session's accumulated size undercounts when parts were retried;
        // HEAD gives the authoritative figure.
        self.record_backend_operation(target.name(), OperationClass::B)
            .await;
        let object_size = match client.head_object(key).await {
            Ok(size) => size,
            Err(e) => {
                warn!(key, error = %e, "failed to size completed object");
                0
            }
        };

        if let Err(e) = self
            .store
            .record_object(key, target.name(), object_size, None, "", &etag)
            .await
        {
            warn!(key, error = %e, "failed to record completed object");
        }
        if object_size > 0 {
            target.add_used_bytes(object_size);
        }
        if let Err(e) = self
            .store
            .set_session_status(upload_id, SessionStatus::Completed)
            .await
        {
            warn!(upload_id, error = %e, "failed to mark session completed");
        }

        info!(bucket, key, upload_id, size = object_size, "multipart upload completed");

        xml_response(
            StatusCode::OK,
            "CompleteMultipartUploadResult",
            &CompleteMultipartUploadResult {
                location: format!("/{bucket}/{key}"),
                bucket: bucket.to_owned(),
                key: key.to_owned(),
                etag,
            },
        )
    }

    /// `DELETE /{bucket}/{key}?uploadId`: abort backend-side (best effort),
    /// mark the session aborted, drop the mapping. Always 204.
    pub async fn abort_multipart_upload(
        &self,
        ctx: &RoutingContext,
        bucket: &str,
        key: &str,
    ) -> Result<http::Response<GatewayBody>, S3Error> {
        self.virtual_bucket(bucket)?;
        let upload_id = require_upload_id(ctx, key)?;

        let Some(mapping) = self
            .store
            .get_mapping(bucket, key)
            .await
            .map_err(|e| store_error(&e, key))?
        else {
            // Already aborted or never initiated; idempotent.
            return empty_response(StatusCode::NO_CONTENT);
        };
        let target = self.real_backend(&mapping.real_bucket, key)?;

        self.abort_backend_upload(&target, key, upload_id).await;

        if let Err(e) = self.store.delete_mapping(bucket, key).await {
            warn!(bucket, key, error = %e, "failed to delete mapping on abort");
        }

        empty_response(StatusCode::NO_CONTENT)
    }

    /// Abort an upload on its backend (best effort) and mark the session
    /// aborted.
    pub(crate) async fn abort_backend_upload(&self, target: &Backend, key: &str, upload_id: &str) {
        self.record_backend_operation(target.name(), OperationClass::A)
            .await;

        if let Some(client) = target.client() {
            if let Err(e) = client.abort_multipart_upload(key, upload_id).await {
                warn!(key, upload_id, error = %e, "backend abort failed");
            }
        }

        if let Err(e) = self
            .store
            .set_session_status(upload_id, SessionStatus::Aborted)
            .await
        {
            warn!(upload_id, error = %e, "failed to mark session aborted");
        }
    }

    /// Hourly garbage collection: purge expired pending sessions and abort
    /// their backend uploads where the owning backend is still known.
    pub async fn cleanup_expired_uploads(&self) {
        let expired = match self.store.purge_expired_sessions().await {
            Ok(expired) => expired,
            Err(e) => {
                warn!(error = %e, "failed to purge expired upload sessions");
                return;
            }
        };

        for session in expired {
            info!(
                upload_id = %session.upload_id,
                key = %session.object_key,
                backend = %session.bucket_name,
                "expired upload session purged"
            );
            if let Some(backend) = self.registry.get(&session.bucket_name) {
                if let Some(client) = backend.client() {
                    if let Err(e) = client
                        .abort_multipart_upload(&session.object_key, &session.upload_id)
                        .await
                    {
                        warn!(
                            upload_id = %session.upload_id,
                            error = %e,
                            "failed to abort orphaned backend upload"
                        );
                    }
                }
            }
        }
    }
}

fn require_upload_id<'a>(ctx: &'a RoutingContext, key: &str) -> Result<&'a str, S3Error> {
    ctx.query_value("uploadId")
        .filter(|v| !v.is_empty())
        .ok_or_else(|| S3Error::new(S3ErrorCode::InvalidArgument, "Missing uploadId", key))
}

fn backend_client<'a>(
    backend: &'a Backend,
    resource: &str,
) -> Result<&'a switchyard_core::client::BackendClient, S3Error> {
    backend
        .client()
        .ok_or_else(|| S3Error::internal("backend has no client", resource))
}
