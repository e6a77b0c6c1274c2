//! Row types.

use chrono::{DateTime, TimeZone, Utc};

/// Convert an epoch-seconds column to `DateTime<Utc>`.
#[must_use]
pub fn from_epoch(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0)
        .single()
        .unwrap_or(DateTime::UNIX_EPOCH)
}

/// Current time as epoch seconds.
#[must_use]
pub fn now_epoch() -> i64 {
    Utc::now().timestamp()
}

/// A virtual-to-real mapping row. At most one row exists per
/// `(virtual_bucket, object_key)`; many rows may point at the same
/// `(real_bucket, real_key)` — that is how zero-copy copies are represented.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Mapping {
    /// Client-visible bucket.
    pub virtual_bucket: String,
    /// Client-visible key.
    pub object_key: String,
    /// Backend holding the bytes.
    pub real_bucket: String,
    /// Key on the backend.
    pub real_key: String,
    /// Creation time (epoch seconds).
    pub created_at: i64,
    /// Last update time (epoch seconds).
    pub updated_at: i64,
}

impl Mapping {
    /// Creation time as a `DateTime`.
    #[must_use]
    pub fn created(&self) -> DateTime<Utc> {
        from_epoch(self.created_at)
    }

    /// Update time as a `DateTime`.
    #[must_use]
    pub fn updated(&self) -> DateTime<Utc> {
        from_epoch(self.updated_at)
    }
}

/// An object record, used to answer HEAD and listings without a backend
/// round trip.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ObjectRecord {
    /// Real object key.
    pub object_key: String,
    /// Backend bucket holding the object.
    pub bucket_name: String,
    /// Size in bytes.
    pub size: i64,
    /// User metadata as a JSON document.
    pub metadata: String,
    /// Content type, empty when unknown.
    pub content_type: String,
    /// Entity tag, empty when unknown.
    pub etag: String,
    /// Creation time (epoch seconds).
    pub created_at: i64,
    /// Last update time (epoch seconds).
    pub updated_at: i64,
}

impl ObjectRecord {
    /// Update time as a `DateTime`.
    #[must_use]
    pub fn updated(&self) -> DateTime<Utc> {
        from_epoch(self.updated_at)
    }

    /// Parsed metadata document; empty map when the column is empty or
    /// malformed.
    #[must_use]
    pub fn metadata_map(&self) -> serde_json::Map<String, serde_json::Value> {
        serde_json::from_str(&self.metadata).unwrap_or_default()
    }
}

/// Upload-session lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// Parts are still being uploaded.
    Pending,
    /// CompleteMultipartUpload succeeded.
    Completed,
    /// Aborted by the client, by capacity enforcement, or by expiry.
    Aborted,
}

impl SessionStatus {
    /// Column representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Aborted => "aborted",
        }
    }
}

/// A multipart upload session.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UploadSession {
    /// Backend-issued upload ID, recorded verbatim.
    pub upload_id: String,
    /// Object key (virtual key equals real key for multipart).
    pub object_key: String,
    /// Backend bucket chosen at initiate time.
    pub bucket_name: String,
    /// Parts uploaded so far.
    pub completed_parts: i64,
    /// Accumulated size of uploaded parts.
    pub size: i64,
    /// Lifecycle state: pending, completed, or aborted.
    pub status: String,
    /// Expiry time (epoch seconds), defaults to created + 24h.
    pub expires_at: i64,
    /// Creation time (epoch seconds).
    pub created_at: i64,
    /// Last update time (epoch seconds).
    pub updated_at: i64,
}

impl UploadSession {
    /// Whether the session is past its expiry.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now.timestamp() > self.expires_at
    }

    /// Creation time as a `DateTime`.
    #[must_use]
    pub fn created(&self) -> DateTime<Utc> {
        from_epoch(self.created_at)
    }
}

/// A monthly archive row: per-month *increments*, not cumulative totals.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MonthlyStats {
    /// Bucket name.
    pub bucket_name: String,
    /// Calendar year.
    pub year: i64,
    /// Calendar month, 1-12.
    pub month: i64,
    /// Class-A operations during the month.
    pub operation_count_a: i64,
    /// Class-B operations during the month.
    pub operation_count_b: i64,
}

/// A bucket-stats row snapshot.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct BucketStats {
    /// Bucket name.
    pub bucket_name: String,
    /// Objects attributed to the bucket.
    pub object_count: i64,
    /// Bytes attributed to the bucket.
    pub total_size: i64,
    /// Cumulative class-A operations.
    pub operation_count_a: i64,
    /// Cumulative class-B operations.
    pub operation_count_b: i64,
    /// Last scan time (epoch seconds).
    pub last_checked_at: i64,
}
