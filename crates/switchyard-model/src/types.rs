//! XML response body types.
//!
//! These mirror the AWS S3 RestXml response documents the gateway emits,
//! namespace `http://s3.amazonaws.com/doc/2006-03-01/`. Serialization is
//! implemented in `switchyard-xml`; the structs here stay plain data.

use chrono::{DateTime, Utc};

/// `<Owner>` element used in listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Owner {
    /// Owner ID.
    pub id: String,
    /// Display name.
    pub display_name: String,
}

impl Owner {
    /// The owner identity the gateway reports for everything it serves.
    #[must_use]
    pub fn gateway() -> Self {
        Self {
            id: "switchyard".to_owned(),
            display_name: "Switchyard Gateway".to_owned(),
        }
    }
}

/// One `<Bucket>` entry in a `ListAllMyBucketsResult`.
#[derive(Debug, Clone)]
pub struct BucketEntry {
    /// Virtual bucket name.
    pub name: String,
    /// Reported creation date.
    pub creation_date: DateTime<Utc>,
}

/// `ListAllMyBucketsResult` response body.
#[derive(Debug, Clone)]
pub struct ListAllMyBucketsResult {
    /// Bucket owner.
    pub owner: Owner,
    /// The virtual buckets visible to clients.
    pub buckets: Vec<BucketEntry>,
}

/// One `<Contents>` entry in a `ListBucketResult`.
#[derive(Debug, Clone)]
pub struct ObjectSummary {
    /// Object key (virtual).
    pub key: String,
    /// Last modification time.
    pub last_modified: DateTime<Utc>,
    /// Quoted entity tag.
    pub etag: String,
    /// Object size in bytes.
    pub size: i64,
    /// Storage class reported to clients.
    pub storage_class: String,
}

/// `ListBucketResult` response body (ListObjects v1).
#[derive(Debug, Clone)]
pub struct ListBucketResult {
    /// Bucket name as requested (virtual).
    pub name: String,
    /// Prefix filter echoed back.
    pub prefix: String,
    /// Marker echoed back.
    pub marker: String,
    /// Effective max-keys.
    pub max_keys: i32,
    /// Whether more results were available than returned.
    pub is_truncated: bool,
    /// The matched objects, sorted lexicographically by key.
    pub contents: Vec<ObjectSummary>,
}

/// `InitiateMultipartUploadResult` response body.
#[derive(Debug, Clone)]
pub struct InitiateMultipartUploadResult {
    /// The virtual bucket name (real backends are never exposed).
    pub bucket: String,
    /// Object key.
    pub key: String,
    /// Upload ID issued by the chosen backend, passed through as-is.
    pub upload_id: String,
}

/// One `<Upload>` entry in a `ListMultipartUploadsResult`.
#[derive(Debug, Clone)]
pub struct MultipartUploadEntry {
    /// Object key.
    pub key: String,
    /// Upload ID.
    pub upload_id: String,
    /// Upload initiator.
    pub initiator: Owner,
    /// Object owner.
    pub owner: Owner,
    /// Storage class.
    pub storage_class: String,
    /// When the upload was initiated.
    pub initiated: DateTime<Utc>,
}

/// `ListMultipartUploadsResult` response body.
#[derive(Debug, Clone)]
pub struct ListMultipartUploadsResult {
    /// Bucket name (virtual).
    pub bucket: String,
    /// Key marker echoed back.
    pub key_marker: String,
    /// Upload-id marker echoed back.
    pub upload_id_marker: String,
    /// Next key marker when truncated.
    pub next_key_marker: String,
    /// Next upload-id marker when truncated.
    pub next_upload_id_marker: String,
    /// Effective max-uploads.
    pub max_uploads: i32,
    /// Whether the listing was truncated.
    pub is_truncated: bool,
    /// Pending uploads.
    pub uploads: Vec<MultipartUploadEntry>,
}

/// One `<Part>` entry in a `ListPartsResult`.
#[derive(Debug, Clone)]
pub struct PartSummary {
    /// Part number.
    pub part_number: i32,
    /// Last modification time.
    pub last_modified: DateTime<Utc>,
    /// Quoted entity tag from the backend.
    pub etag: String,
    /// Part size in bytes.
    pub size: i64,
}

/// `ListPartsResult` response body.
#[derive(Debug, Clone)]
pub struct ListPartsResult {
    /// Bucket name (virtual).
    pub bucket: String,
    /// Object key.
    pub key: String,
    /// Upload ID.
    pub upload_id: String,
    /// Part-number marker echoed back.
    pub part_number_marker: i32,
    /// Next part-number marker when truncated.
    pub next_part_number_marker: i32,
    /// Effective max-parts.
    pub max_parts: i32,
    /// Whether the listing was truncated.
    pub is_truncated: bool,
    /// The listed parts.
    pub parts: Vec<PartSummary>,
}

/// `CompleteMultipartUploadResult` response body.
#[derive(Debug, Clone)]
pub struct CompleteMultipartUploadResult {
    /// Virtual path of the completed object.
    pub location: String,
    /// Bucket name (virtual).
    pub bucket: String,
    /// Object key.
    pub key: String,
    /// Entity tag from the backend.
    pub etag: String,
}

/// `CopyObjectResult` response body.
#[derive(Debug, Clone)]
pub struct CopyObjectResult {
    /// Last-modified time of the source object.
    pub last_modified: DateTime<Utc>,
    /// Fresh entity tag for the copy.
    pub etag: String,
}

/// A part reference supplied by the client in a `CompleteMultipartUpload`
/// request body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPart {
    /// Part number.
    pub part_number: i32,
    /// Entity tag returned by the matching `UploadPart`.
    pub etag: String,
}

/// `<Error>` response body.
#[derive(Debug, Clone)]
pub struct ErrorDocument {
    /// The S3 error code string.
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// The resource the request addressed.
    pub resource: String,
    /// Request ID for correlation.
    pub request_id: String,
}
