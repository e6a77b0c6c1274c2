//! Bucket handlers: ListBuckets, ListObjects, HEAD/PUT/DELETE bucket.
//!
//! Clients only ever see the virtual namespace. Real backends answer
//! `NoSuchBucket` (or the degraded 404/204 forms on HEAD/DELETE) no matter
//! what they hold.

use http::StatusCode;
use switchyard_model::S3Error;
use switchyard_model::types::{
    BucketEntry, ListAllMyBucketsResult, ListBucketResult, ObjectSummary, Owner,
};
use tracing::debug;

use crate::body::GatewayBody;
use crate::handler::Gateway;
use crate::object_ops::store_error;
use crate::response::{empty_response, xml_response};
use crate::router::RoutingContext;

/// Default and maximum `max-keys` per S3.
const DEFAULT_MAX_KEYS: i32 = 1000;

impl Gateway {
    /// `GET /`: the virtual, enabled, available buckets.
    pub fn list_buckets(&self) -> Result<http::Response<GatewayBody>, S3Error> {
        let buckets = self
            .registry
            .virtual_buckets()
            .into_iter()
            .filter(|b| b.config.enabled && b.is_available())
            .map(|b| BucketEntry {
                name: b.config.name.clone(),
                creation_date: chrono::Utc::now() - chrono::Duration::hours(24),
            })
            .collect();

        xml_response(
            StatusCode::OK,
            "ListAllMyBucketsResult",
            &ListAllMyBucketsResult {
                owner: Owner::gateway(),
                buckets,
            },
        )
    }

    /// `GET /{bucket}`: list a virtual bucket by joining its mappings with
    /// the object records, honoring `prefix`, `marker`, and `max-keys`.
    pub async fn list_objects(
        &self,
        ctx: &RoutingContext,
        bucket: &str,
    ) -> Result<http::Response<GatewayBody>, S3Error> {
        self.virtual_bucket(bucket)?;

        let prefix = ctx.query_value("prefix").unwrap_or("").to_owned();
        let marker = ctx.query_value("marker").unwrap_or("").to_owned();
        let max_keys = ctx
            .query_value("max-keys")
            .and_then(|v| v.parse::<i32>().ok())
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_MAX_KEYS);

        let mappings = self
            .store
            .mappings_in(bucket)
            .await
            .map_err(|e| store_error(&e, bucket))?;

        let real_keys: Vec<String> = mappings.iter().map(|m| m.real_key.clone()).collect();
        let records = self
            .store
            .objects_by_keys(&real_keys)
            .await
            .map_err(|e| store_error(&e, bucket))?;

        // Mappings arrive ordered by virtual key; filter and cut to size.
        let mut contents = Vec::new();
        let mut matched = 0_i64;
        for mapping in &mappings {
            if !prefix.is_empty() && !mapping.object_key.starts_with(&prefix) {
                continue;
            }
            if !marker.is_empty() && mapping.object_key.as_str() <= marker.as_str() {
                continue;
            }
            matched += 1;
            if matched > i64::from(max_keys) {
                continue;
            }

            let Some(record) = records.get(&mapping.real_key) else {
                debug!(
                    bucket,
                    key = %mapping.object_key,
                    "mapping without object record, skipping in listing"
                );
                matched -= 1;
                continue;
            };

            let etag = if record.etag.is_empty() {
                format!("\"{:x}\"", md5::compute(record.object_key.as_bytes()))
            } else {
                record.etag.clone()
            };

            contents.push(ObjectSummary {
                key: mapping.object_key.clone(),
                last_modified: record.updated(),
                etag,
                size: record.size,
                storage_class: "STANDARD".to_owned(),
            });
        }

        xml_response(
            StatusCode::OK,
            "ListBucketResult",
            &ListBucketResult {
                name: bucket.to_owned(),
                prefix,
                marker,
                max_keys,
                is_truncated: matched > i64::from(max_keys),
                contents,
            },
        )
    }

    /// `HEAD /{bucket}`: 200 for virtual buckets, 404 otherwise.
    pub fn head_bucket(&self, bucket: &str) -> Result<http::Response<GatewayBody>, S3Error> {
        match self.registry.get(bucket) {
            Some(b) if b.is_virtual() => empty_response(StatusCode::OK),
            _ => empty_response(StatusCode::NOT_FOUND),
        }
    }

    /// `PUT /{bucket}`: buckets are preconfigured, so creating an existing
    /// virtual bucket is an idempotent no-op. A real backend's name is
    /// reserved and conflicts. Unknown names are accepted as a no-op so
    /// create-then-upload clients keep working; the upload itself will 404.
    pub fn create_bucket(&self, bucket: &str) -> Result<http::Response<GatewayBody>, S3Error> {
        match self.registry.get(bucket) {
            Some(b) if !b.is_virtual() => Err(S3Error::new(
                switchyard_model::S3ErrorCode::BucketAlreadyExists,
                "The requested bucket name is not available",
                bucket,
            )),
            _ => http::Response::builder()
                .status(StatusCode::OK)
                .header(http::header::LOCATION, format!("/{bucket}"))
                .body(GatewayBody::empty())
                .map_err(|e| S3Error::internal(format!("failed to build response: {e}"), bucket)),
        }
    }

    /// `DELETE /{bucket}`: removing a virtual bucket drops all of its
    /// mappings; anything else is a 204 no-op.
    pub async fn delete_bucket(
        &self,
        bucket: &str,
    ) -> Result<http::Response<GatewayBody>, S3Error> {
        if let Some(b) = self.registry.get(bucket) {
            if b.is_virtual() {
                self.store
                    .delete_bucket_mappings(bucket)
                    .await
                    .map_err(|e| store_error(&e, bucket))?;
            }
        }
        empty_response(StatusCode::NO_CONTENT)
    }
}
