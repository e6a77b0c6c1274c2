//! The store: every query the gateway issues.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{Datelike, Utc};
use sqlx::any::{AnyPoolOptions, install_default_drivers};
use sqlx::{AnyPool, Row};
use tracing::{debug, info, warn};

use switchyard_core::backend::OperationClass;
use switchyard_core::config::DatabaseConfig;
use switchyard_core::reporter::{CounterStore, CounterStoreError};

use crate::migrations;
use crate::models::{
    BucketStats, Mapping, MonthlyStats, ObjectRecord, SessionStatus, UploadSession, now_epoch,
};

/// Upload sessions expire this long after creation.
const SESSION_TTL_SECS: i64 = 24 * 60 * 60;

/// Keep IN-lists bounded; engines differ on placeholder limits.
const IN_CHUNK: usize = 500;

/// Database engine behind the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    /// Embedded sqlite.
    Sqlite,
    /// MySQL / MariaDB.
    MySql,
    /// PostgreSQL.
    Postgres,
}

/// Errors from the persistence layer.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Any database failure.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// An insert hit the `(virtual_bucket, object_key)` uniqueness
    /// constraint; the caller lost a create race and should re-read.
    #[error("mapping already exists for {bucket}/{key}")]
    MappingExists {
        /// Virtual bucket of the losing insert.
        bucket: String,
        /// Object key of the losing insert.
        key: String,
    },

    /// The configured database type is not supported.
    #[error("unsupported database type: {0}")]
    UnsupportedType(String),
}

/// Fields of one access-log row.
#[derive(Debug, Clone, Default)]
pub struct AccessLogEntry {
    /// Operation label (`upload_object`, `download_object`, ...).
    pub action: String,
    /// Object key, empty for bucket-level operations.
    pub key: String,
    /// Virtual bucket name.
    pub bucket: String,
    /// Peer address or forwarded-for value.
    pub client_ip: String,
    /// User-Agent header.
    pub user_agent: String,
    /// Host header.
    pub host: String,
    /// Request or response payload size.
    pub size: i64,
    /// Whether the response was < 400.
    pub success: bool,
    /// Error code for failures.
    pub error: String,
    /// Wall time in milliseconds.
    pub response_ms: i64,
}

/// The persistent store.
#[derive(Clone)]
pub struct Store {
    pool: AnyPool,
    kind: StoreKind,
}

impl Store {
    /// Connect per config and optionally migrate the schema.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the type is unknown, the pool cannot be
    /// opened, or migration fails.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, StoreError> {
        install_default_drivers();

        let kind = match config.r#type.as_str() {
            "sqlite" => StoreKind::Sqlite,
            "mysql" => StoreKind::MySql,
            "postgres" => StoreKind::Postgres,
            other => return Err(StoreError::UnsupportedType(other.to_owned())),
        };

        let url = build_url(kind, &config.dsn);

        // An in-memory sqlite database exists per connection; more than one
        // connection would each see an empty schema.
        let max_connections = if kind == StoreKind::Sqlite && config.dsn.contains(":memory:") {
            1
        } else {
            config.max_open_conns.max(1)
        };

        let pool = AnyPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(config.max_idle_conns.min(max_connections))
            .max_lifetime(std::time::Duration::from_secs(config.conn_max_lifetime))
            .connect(&url)
            .await?;

        let store = Self { pool, kind };

        if config.auto_migrate {
            store.migrate().await?;
        }

        info!(db = %config.r#type, "store connected");
        Ok(store)
    }

    /// Create or upgrade the schema.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when a DDL statement fails.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        for statement in migrations::statements(self.kind) {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        debug!("schema migration complete");
        Ok(())
    }

    /// Close the pool, flushing outstanding work.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Rewrite `?` placeholders to `$N` for Postgres.
    fn q(&self, sql: &str) -> String {
        if self.kind != StoreKind::Postgres {
            return sql.to_owned();
        }
        let mut out = String::with_capacity(sql.len() + 8);
        let mut n = 0;
        for c in sql.chars() {
            if c == '?' {
                n += 1;
                out.push('$');
                out.push_str(&n.to_string());
            } else {
                out.push(c);
            }
        }
        out
    }

    // -----------------------------------------------------------------
    // Virtual bucket mappings
    // -----------------------------------------------------------------

    /// Insert one mapping. The PK on `(virtual_bucket, object_key)` makes
    /// concurrent creates resolve to exactly one row; losers get
    /// [`StoreError::MappingExists`] and should re-read.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::MappingExists`] on the uniqueness constraint or
    /// [`StoreError::Database`] otherwise.
    pub async fn create_mapping(
        &self,
        virtual_bucket: &str,
        object_key: &str,
        real_bucket: &str,
        real_key: &str,
    ) -> Result<(), StoreError> {
        let now = now_epoch();
        let result = sqlx::query(&self.q(
            "INSERT INTO virtual_bucket_mappings \
             (virtual_bucket, object_key, real_bucket, real_key, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        ))
        .bind(virtual_bucket)
        .bind(object_key)
        .bind(real_bucket)
        .bind(real_key)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(StoreError::MappingExists {
                    bucket: virtual_bucket.to_owned(),
                    key: object_key.to_owned(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Look up the mapping for a virtual object.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on query failure.
    pub async fn get_mapping(
        &self,
        virtual_bucket: &str,
        object_key: &str,
    ) -> Result<Option<Mapping>, StoreError> {
        let mapping = sqlx::query_as::<_, Mapping>(&self.q(
            "SELECT virtual_bucket, object_key, real_bucket, real_key, created_at, updated_at \
             FROM virtual_bucket_mappings WHERE virtual_bucket = ? AND object_key = ?",
        ))
        .bind(virtual_bucket)
        .bind(object_key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(mapping)
    }

    /// How many mappings reference one real object. Zero means the last
    /// reference is gone and the backend object can be deleted.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on query failure.
    pub async fn count_mappings_to(
        &self,
        real_bucket: &str,
        real_key: &str,
    ) -> Result<i64, StoreError> {
        let count: i64 = sqlx::query_scalar(&self.q(
            "SELECT COUNT(*) FROM virtual_bucket_mappings \
             WHERE real_bucket = ? AND real_key = ?",
        ))
        .bind(real_bucket)
        .bind(real_key)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    /// Delete one mapping.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on query failure.
    pub async fn delete_mapping(
        &self,
        virtual_bucket: &str,
        object_key: &str,
    ) -> Result<(), StoreError> {
        sqlx::query(&self.q(
            "DELETE FROM virtual_bucket_mappings \
             WHERE virtual_bucket = ? AND object_key = ?",
        ))
        .bind(virtual_bucket)
        .bind(object_key)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Delete every mapping under a virtual bucket (delete-bucket semantics).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on query failure.
    pub async fn delete_bucket_mappings(&self, virtual_bucket: &str) -> Result<(), StoreError> {
        sqlx::query(&self.q(
            "DELETE FROM virtual_bucket_mappings WHERE virtual_bucket = ?",
        ))
        .bind(virtual_bucket)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// All mappings under a virtual bucket, ordered by object key.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on query failure.
    pub async fn mappings_in(&self, virtual_bucket: &str) -> Result<Vec<Mapping>, StoreError> {
        let mappings = sqlx::query_as::<_, Mapping>(&self.q(
            "SELECT virtual_bucket, object_key, real_bucket, real_key, created_at, updated_at \
             FROM virtual_bucket_mappings WHERE virtual_bucket = ? ORDER BY object_key",
        ))
        .bind(virtual_bucket)
        .fetch_all(&self.pool)
        .await?;
        Ok(mappings)
    }

    // -----------------------------------------------------------------
    // Object records
    // -----------------------------------------------------------------

    /// Upsert an object record. A soft-deleted row under the same key is
    /// purged first so the upsert lands on a live row. Bucket stats are
    /// recomputed afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on query failure.
    pub async fn record_object(
        &self,
        object_key: &str,
        bucket_name: &str,
        size: i64,
        metadata: Option<&serde_json::Value>,
        content_type: &str,
        etag: &str,
    ) -> Result<(), StoreError> {
        let now = now_epoch();
        let metadata = metadata
            .map(ToString::to_string)
            .unwrap_or_else(|| "{}".to_owned());

        let mut tx = self.pool.begin().await?;

        sqlx::query(&self.q(
            "DELETE FROM objects WHERE object_key = ? AND deleted_at IS NOT NULL",
        ))
        .bind(object_key)
        .execute(&mut *tx)
        .await?;

        let updated = sqlx::query(&self.q(
            "UPDATE objects SET bucket_name = ?, size = ?, metadata = ?, \
             content_type = ?, etag = ?, updated_at = ? \
             WHERE object_key = ? AND deleted_at IS NULL",
        ))
        .bind(bucket_name)
        .bind(size)
        .bind(&metadata)
        .bind(content_type)
        .bind(etag)
        .bind(now)
        .bind(object_key)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            sqlx::query(&self.q(
                "INSERT INTO objects \
                 (object_key, bucket_name, size, metadata, content_type, etag, \
                  created_at, updated_at, deleted_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, NULL)",
            ))
            .bind(object_key)
            .bind(bucket_name)
            .bind(size)
            .bind(&metadata)
            .bind(content_type)
            .bind(etag)
            .bind(now)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        self.refresh_bucket_stats(bucket_name).await?;
        Ok(())
    }

    /// A live object record by real key.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on query failure.
    pub async fn get_object(&self, object_key: &str) -> Result<Option<ObjectRecord>, StoreError> {
        let object = sqlx::query_as::<_, ObjectRecord>(&self.q(
            "SELECT object_key, bucket_name, size, metadata, content_type, etag, \
             created_at, updated_at \
             FROM objects WHERE object_key = ? AND deleted_at IS NULL",
        ))
        .bind(object_key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(object)
    }

    /// Soft-delete an object record and refresh its bucket's stats.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on query failure.
    pub async fn delete_object(&self, object_key: &str) -> Result<(), StoreError> {
        let bucket: Option<String> = sqlx::query_scalar(&self.q(
            "SELECT bucket_name FROM objects WHERE object_key = ? AND deleted_at IS NULL",
        ))
        .bind(object_key)
        .fetch_optional(&self.pool)
        .await?;

        sqlx::query(&self.q(
            "UPDATE objects SET deleted_at = ? WHERE object_key = ? AND deleted_at IS NULL",
        ))
        .bind(now_epoch())
        .bind(object_key)
        .execute(&self.pool)
        .await?;

        if let Some(bucket) = bucket {
            self.refresh_bucket_stats(&bucket).await?;
        }
        Ok(())
    }

    /// Live records for a set of real keys, chunked to bound the IN-list.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on query failure.
    pub async fn objects_by_keys(
        &self,
        keys: &[String],
    ) -> Result<HashMap<String, ObjectRecord>, StoreError> {
        let mut found = HashMap::with_capacity(keys.len());

        for chunk in keys.chunks(IN_CHUNK) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let sql = self.q(&format!(
                "SELECT object_key, bucket_name, size, metadata, content_type, etag, \
                 created_at, updated_at \
                 FROM objects WHERE deleted_at IS NULL AND object_key IN ({placeholders})"
            ));
            let mut query = sqlx::query_as::<_, ObjectRecord>(&sql);
            for key in chunk {
                query = query.bind(key);
            }
            for record in query.fetch_all(&self.pool).await? {
                found.insert(record.object_key.clone(), record);
            }
        }

        Ok(found)
    }

    // -----------------------------------------------------------------
    // Bucket stats and operation counters
    // -----------------------------------------------------------------

    /// Recompute a bucket's object count and total size from live records.
    async fn refresh_bucket_stats(&self, bucket_name: &str) -> Result<(), StoreError> {
        let row = sqlx::query(&self.q(
            "SELECT COUNT(*), COALESCE(SUM(size), 0) FROM objects \
             WHERE bucket_name = ? AND deleted_at IS NULL",
        ))
        .bind(bucket_name)
        .fetch_one(&self.pool)
        .await?;
        let count: i64 = row.try_get(0)?;
        let total: i64 = row.try_get(1)?;

        self.ensure_bucket_stats(bucket_name).await?;
        sqlx::query(&self.q(
            "UPDATE bucket_stats SET object_count = ?, total_size = ?, last_checked_at = ? \
             WHERE bucket_name = ?",
        ))
        .bind(count)
        .bind(total)
        .bind(now_epoch())
        .bind(bucket_name)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Create the stats row if missing; a racing insert losing on the PK is
    /// treated as success.
    async fn ensure_bucket_stats(&self, bucket_name: &str) -> Result<(), StoreError> {
        let exists: Option<i64> = sqlx::query_scalar(&self.q(
            "SELECT 1 FROM bucket_stats WHERE bucket_name = ?",
        ))
        .bind(bucket_name)
        .fetch_optional(&self.pool)
        .await?;
        if exists.is_some() {
            return Ok(());
        }

        let result = sqlx::query(&self.q(
            "INSERT INTO bucket_stats \
             (bucket_name, object_count, total_size, operation_count_a, operation_count_b, \
              last_checked_at) \
             VALUES (?, 0, 0, 0, 0, ?)",
        ))
        .bind(bucket_name)
        .bind(now_epoch())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Atomically increment a class counter and return the post-increment
    /// value, in one transaction so the read cannot see another writer's
    /// increment in between.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on query failure.
    pub async fn increment_operation_count(
        &self,
        bucket_name: &str,
        class: OperationClass,
    ) -> Result<i64, StoreError> {
        self.ensure_bucket_stats(bucket_name).await?;

        let column = match class {
            OperationClass::A => "operation_count_a",
            OperationClass::B => "operation_count_b",
        };

        let mut tx = self.pool.begin().await?;
        sqlx::query(&self.q(&format!(
            "UPDATE bucket_stats SET {column} = {column} + 1 WHERE bucket_name = ?"
        )))
        .bind(bucket_name)
        .execute(&mut *tx)
        .await?;

        let value: i64 = sqlx::query_scalar(&self.q(&format!(
            "SELECT {column} FROM bucket_stats WHERE bucket_name = ?"
        )))
        .bind(bucket_name)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(value)
    }

    /// All persisted counters.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on query failure.
    pub async fn all_operation_counts(
        &self,
    ) -> Result<HashMap<String, (i64, i64)>, StoreError> {
        let rows = sqlx::query(&self.q(
            "SELECT bucket_name, operation_count_a, operation_count_b FROM bucket_stats",
        ))
        .fetch_all(&self.pool)
        .await?;

        let mut counts = HashMap::with_capacity(rows.len());
        for row in rows {
            let name: String = row.try_get(0)?;
            let a: i64 = row.try_get(1)?;
            let b: i64 = row.try_get(2)?;
            counts.insert(name, (a, b));
        }
        Ok(counts)
    }

    /// Zero both counters for a bucket.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on query failure.
    pub async fn reset_operation_count(&self, bucket_name: &str) -> Result<(), StoreError> {
        sqlx::query(&self.q(
            "UPDATE bucket_stats SET operation_count_a = 0, operation_count_b = 0 \
             WHERE bucket_name = ?",
        ))
        .bind(bucket_name)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Every bucket-stats row.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on query failure.
    pub async fn bucket_stats(&self) -> Result<Vec<BucketStats>, StoreError> {
        let rows = sqlx::query_as::<_, BucketStats>(&self.q(
            "SELECT bucket_name, object_count, total_size, operation_count_a, \
             operation_count_b, last_checked_at FROM bucket_stats",
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    // -----------------------------------------------------------------
    // Upload sessions
    // -----------------------------------------------------------------

    /// Record a new pending session; expiry defaults to creation + 24 h.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on query failure.
    pub async fn create_session(
        &self,
        upload_id: &str,
        object_key: &str,
        bucket_name: &str,
    ) -> Result<(), StoreError> {
        let now = now_epoch();
        sqlx::query(&self.q(
            "INSERT INTO upload_sessions \
             (upload_id, object_key, bucket_name, completed_parts, size, status, \
              expires_at, created_at, updated_at) \
             VALUES (?, ?, ?, 0, 0, 'pending', ?, ?, ?)",
        ))
        .bind(upload_id)
        .bind(object_key)
        .bind(bucket_name)
        .bind(now + SESSION_TTL_SECS)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Fetch a session by upload ID.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on query failure.
    pub async fn get_session(
        &self,
        upload_id: &str,
    ) -> Result<Option<UploadSession>, StoreError> {
        let session = sqlx::query_as::<_, UploadSession>(&self.q(
            "SELECT upload_id, object_key, bucket_name, completed_parts, size, status, \
             expires_at, created_at, updated_at \
             FROM upload_sessions WHERE upload_id = ?",
        ))
        .bind(upload_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(session)
    }

    /// Account one uploaded part: `completed_parts += 1` and
    /// `size += part_size` in a single statement.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on query failure.
    pub async fn add_session_part(
        &self,
        upload_id: &str,
        part_size: i64,
    ) -> Result<(), StoreError> {
        sqlx::query(&self.q(
            "UPDATE upload_sessions \
             SET completed_parts = completed_parts + 1, size = size + ?, updated_at = ? \
             WHERE upload_id = ?",
        ))
        .bind(part_size)
        .bind(now_epoch())
        .bind(upload_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Move a session to a terminal (or back to pending) state.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on query failure.
    pub async fn set_session_status(
        &self,
        upload_id: &str,
        status: SessionStatus,
    ) -> Result<(), StoreError> {
        sqlx::query(&self.q(
            "UPDATE upload_sessions SET status = ?, updated_at = ? WHERE upload_id = ?",
        ))
        .bind(status.as_str())
        .bind(now_epoch())
        .bind(upload_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Pending sessions with S3 listing semantics: prefix filter, key /
    /// upload-id markers, ordered by `(object_key, upload_id)`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on query failure.
    pub async fn pending_sessions(
        &self,
        prefix: &str,
        key_marker: &str,
        upload_id_marker: &str,
        limit: i64,
    ) -> Result<Vec<UploadSession>, StoreError> {
        let mut sql = String::from(
            "SELECT upload_id, object_key, bucket_name, completed_parts, size, status, \
             expires_at, created_at, updated_at \
             FROM upload_sessions WHERE status = 'pending'",
        );
        if !prefix.is_empty() {
            sql.push_str(" AND object_key LIKE ?");
        }
        if !key_marker.is_empty() {
            if upload_id_marker.is_empty() {
                sql.push_str(" AND object_key > ?");
            } else {
                sql.push_str(" AND (object_key > ? OR (object_key = ? AND upload_id > ?))");
            }
        }
        sql.push_str(" ORDER BY object_key, upload_id");
        if limit > 0 {
            sql.push_str(" LIMIT ?");
        }
        let sql = self.q(&sql);

        let mut query = sqlx::query_as::<_, UploadSession>(&sql);
        let like = format!("{prefix}%");
        if !prefix.is_empty() {
            query = query.bind(like);
        }
        if !key_marker.is_empty() {
            if upload_id_marker.is_empty() {
                query = query.bind(key_marker);
            } else {
                query = query.bind(key_marker).bind(key_marker).bind(upload_id_marker);
            }
        }
        if limit > 0 {
            query = query.bind(limit);
        }

        Ok(query.fetch_all(&self.pool).await?)
    }

    /// Drop pending sessions past expiry; returns the victims for
    /// backend-side cleanup.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on query failure.
    pub async fn purge_expired_sessions(&self) -> Result<Vec<UploadSession>, StoreError> {
        let now = now_epoch();
        let expired = sqlx::query_as::<_, UploadSession>(&self.q(
            "SELECT upload_id, object_key, bucket_name, completed_parts, size, status, \
             expires_at, created_at, updated_at \
             FROM upload_sessions WHERE status = 'pending' AND expires_at < ?",
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        if !expired.is_empty() {
            sqlx::query(&self.q(
                "DELETE FROM upload_sessions WHERE status = 'pending' AND expires_at < ?",
            ))
            .bind(now)
            .execute(&self.pool)
            .await?;
            warn!(count = expired.len(), "purged expired upload sessions");
        }

        Ok(expired)
    }

    // -----------------------------------------------------------------
    // Monthly archive
    // -----------------------------------------------------------------

    /// Archive one calendar month: for each bucket, delta = current
    /// cumulative − Σ(all archived months strictly before this one), clamped
    /// at zero, upserted on `(bucket, year, month)`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on query failure.
    pub async fn archive_month(&self, year: i32, month: u32) -> Result<(), StoreError> {
        let current = self.bucket_stats().await?;
        let prior = self.cumulative_before(year, month).await?;

        for stats in current {
            let (prior_a, prior_b) = prior
                .get(&stats.bucket_name)
                .copied()
                .unwrap_or((0, 0));
            // Negative deltas mean the archive and the live counters
            // disagree; clamp rather than poison the history.
            let delta_a = (stats.operation_count_a - prior_a).max(0);
            let delta_b = (stats.operation_count_b - prior_b).max(0);

            self.upsert_monthly(&stats.bucket_name, year, month, delta_a, delta_b)
                .await?;
        }

        Ok(())
    }

    /// Σ archived increments strictly before `(year, month)` per bucket.
    async fn cumulative_before(
        &self,
        year: i32,
        month: u32,
    ) -> Result<HashMap<String, (i64, i64)>, StoreError> {
        let rows = sqlx::query(&self.q(
            "SELECT bucket_name, \
             COALESCE(SUM(operation_count_a), 0), COALESCE(SUM(operation_count_b), 0) \
             FROM bucket_monthly_stats \
             WHERE year < ? OR (year = ? AND month < ?) \
             GROUP BY bucket_name",
        ))
        .bind(i64::from(year))
        .bind(i64::from(year))
        .bind(i64::from(month))
        .fetch_all(&self.pool)
        .await?;

        let mut cumulative = HashMap::with_capacity(rows.len());
        for row in rows {
            let name: String = row.try_get(0)?;
            let a: i64 = row.try_get(1)?;
            let b: i64 = row.try_get(2)?;
            cumulative.insert(name, (a, b));
        }
        Ok(cumulative)
    }

    async fn upsert_monthly(
        &self,
        bucket_name: &str,
        year: i32,
        month: u32,
        count_a: i64,
        count_b: i64,
    ) -> Result<(), StoreError> {
        let updated = sqlx::query(&self.q(
            "UPDATE bucket_monthly_stats \
             SET operation_count_a = ?, operation_count_b = ?, updated_at = ? \
             WHERE bucket_name = ? AND year = ? AND month = ?",
        ))
        .bind(count_a)
        .bind(count_b)
        .bind(now_epoch())
        .bind(bucket_name)
        .bind(i64::from(year))
        .bind(i64::from(month))
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            sqlx::query(&self.q(
                "INSERT INTO bucket_monthly_stats \
                 (bucket_name, year, month, operation_count_a, operation_count_b, updated_at) \
                 VALUES (?, ?, ?, ?, ?, ?)",
            ))
            .bind(bucket_name)
            .bind(i64::from(year))
            .bind(i64::from(month))
            .bind(count_a)
            .bind(count_b)
            .bind(now_epoch())
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    /// Archived rows for one month.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on query failure.
    pub async fn monthly_stats(
        &self,
        year: i32,
        month: u32,
    ) -> Result<Vec<MonthlyStats>, StoreError> {
        let rows = sqlx::query_as::<_, MonthlyStats>(&self.q(
            "SELECT bucket_name, year, month, operation_count_a, operation_count_b \
             FROM bucket_monthly_stats WHERE year = ? AND month = ? ORDER BY bucket_name",
        ))
        .bind(i64::from(year))
        .bind(i64::from(month))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Archived rows across an inclusive month range.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on query failure.
    pub async fn monthly_range(
        &self,
        start_year: i32,
        start_month: u32,
        end_year: i32,
        end_month: u32,
    ) -> Result<Vec<MonthlyStats>, StoreError> {
        let rows = sqlx::query_as::<_, MonthlyStats>(&self.q(
            "SELECT bucket_name, year, month, operation_count_a, operation_count_b \
             FROM bucket_monthly_stats \
             WHERE (year > ? OR (year = ? AND month >= ?)) \
               AND (year < ? OR (year = ? AND month <= ?)) \
             ORDER BY year, month, bucket_name",
        ))
        .bind(i64::from(start_year))
        .bind(i64::from(start_year))
        .bind(i64::from(start_month))
        .bind(i64::from(end_year))
        .bind(i64::from(end_year))
        .bind(i64::from(end_month))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// The running month's increments, computed live from bucket stats minus
    /// everything already archived before this month.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on query failure.
    pub async fn current_month_stats(&self) -> Result<Vec<MonthlyStats>, StoreError> {
        let now = Utc::now();
        let (year, month) = (now.year(), now.month());

        let current = self.bucket_stats().await?;
        let prior = self.cumulative_before(year, month).await?;

        Ok(current
            .into_iter()
            .map(|stats| {
                let (prior_a, prior_b) =
                    prior.get(&stats.bucket_name).copied().unwrap_or((0, 0));
                MonthlyStats {
                    bucket_name: stats.bucket_name,
                    year: i64::from(year),
                    month: i64::from(month),
                    operation_count_a: (stats.operation_count_a - prior_a).max(0),
                    operation_count_b: (stats.operation_count_b - prior_b).max(0),
                }
            })
            .collect())
    }

    /// The most recent `months` archive rows for one bucket.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on query failure.
    pub async fn bucket_history(
        &self,
        bucket_name: &str,
        months: i64,
    ) -> Result<Vec<MonthlyStats>, StoreError> {
        let rows = sqlx::query_as::<_, MonthlyStats>(&self.q(
            "SELECT bucket_name, year, month, operation_count_a, operation_count_b \
             FROM bucket_monthly_stats WHERE bucket_name = ? \
             ORDER BY year DESC, month DESC LIMIT ?",
        ))
        .bind(bucket_name)
        .bind(months)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    // -----------------------------------------------------------------
    // Access logs
    // -----------------------------------------------------------------

    /// Append one access-log row.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on query failure.
    pub async fn record_access(&self, entry: &AccessLogEntry) -> Result<(), StoreError> {
        sqlx::query(&self.q(
            "INSERT INTO access_logs \
             (action, object_key, bucket_name, client_ip, user_agent, host, size, \
              success, error_msg, response_ms, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        ))
        .bind(&entry.action)
        .bind(&entry.key)
        .bind(&entry.bucket)
        .bind(&entry.client_ip)
        .bind(&entry.user_agent)
        .bind(&entry.host)
        .bind(entry.size)
        .bind(i64::from(entry.success))
        .bind(&entry.error)
        .bind(entry.response_ms)
        .bind(now_epoch())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl CounterStore for Store {
    async fn increment_operation(
        &self,
        bucket: &str,
        class: OperationClass,
    ) -> Result<i64, CounterStoreError> {
        Ok(self.increment_operation_count(bucket, class).await?)
    }

    async fn operation_counts(&self) -> Result<HashMap<String, (i64, i64)>, CounterStoreError> {
        Ok(self.all_operation_counts().await?)
    }

    async fn reset_operation_counts(&self, bucket: &str) -> Result<(), CounterStoreError> {
        Ok(self.reset_operation_count(bucket).await?)
    }
}

fn build_url(kind: StoreKind, dsn: &str) -> String {
    match kind {
        StoreKind::Sqlite => {
            if dsn.contains(":memory:") {
                "sqlite::memory:".to_owned()
            } else {
                if let Some(parent) = std::path::Path::new(dsn).parent() {
                    if !parent.as_os_str().is_empty() {
                        let _ = std::fs::create_dir_all(parent);
                    }
                }
                format!("sqlite://{dsn}?mode=rwc")
            }
        }
        StoreKind::MySql => {
            if dsn.starts_with("mysql://") {
                dsn.to_owned()
            } else {
                format!("mysql://{dsn}")
            }
        }
        StoreKind::Postgres => {
            if dsn.starts_with("postgres://") || dsn.starts_with("postgresql://") {
                dsn.to_owned()
            } else {
                format!("postgres://{dsn}")
            }
        }
    }
}
