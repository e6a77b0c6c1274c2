//! Schema migration.
//!
//! The DDL sticks to the type vocabulary all three supported engines share
//! (TEXT, BIGINT) and natural primary keys, so one statement set works
//! everywhere. Secondary indexes use `IF NOT EXISTS`, which MySQL does not
//! support; those statements are skipped there (InnoDB's PK coverage keeps
//! the hot queries indexed).

use crate::store::StoreKind;

/// Tables shared by every engine.
const TABLES: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS virtual_bucket_mappings (
        virtual_bucket  TEXT NOT NULL,
        object_key      TEXT NOT NULL,
        real_bucket     TEXT NOT NULL,
        real_key        TEXT NOT NULL,
        created_at      BIGINT NOT NULL,
        updated_at      BIGINT NOT NULL,
        PRIMARY KEY (virtual_bucket, object_key)
    )",
    "CREATE TABLE IF NOT EXISTS objects (
        object_key      TEXT NOT NULL,
        bucket_name     TEXT NOT NULL,
        size            BIGINT NOT NULL DEFAULT 0,
        metadata        TEXT NOT NULL DEFAULT '{}',
        content_type    TEXT NOT NULL DEFAULT '',
        etag            TEXT NOT NULL DEFAULT '',
        created_at      BIGINT NOT NULL,
        updated_at      BIGINT NOT NULL,
        deleted_at      BIGINT,
        PRIMARY KEY (object_key)
    )",
    "CREATE TABLE IF NOT EXISTS bucket_stats (
        bucket_name         TEXT NOT NULL,
        object_count        BIGINT NOT NULL DEFAULT 0,
        total_size          BIGINT NOT NULL DEFAULT 0,
        operation_count_a   BIGINT NOT NULL DEFAULT 0,
        operation_count_b   BIGINT NOT NULL DEFAULT 0,
        last_checked_at     BIGINT NOT NULL DEFAULT 0,
        PRIMARY KEY (bucket_name)
    )",
    "CREATE TABLE IF NOT EXISTS bucket_monthly_stats (
        bucket_name         TEXT NOT NULL,
        year                BIGINT NOT NULL,
        month               BIGINT NOT NULL,
        operation_count_a   BIGINT NOT NULL DEFAULT 0,
        operation_count_b   BIGINT NOT NULL DEFAULT 0,
        updated_at          BIGINT NOT NULL,
        PRIMARY KEY (bucket_name, year, month)
    )",
    "CREATE TABLE IF NOT EXISTS upload_sessions (
        upload_id       TEXT NOT NULL,
        object_key      TEXT NOT NULL,
        bucket_name     TEXT NOT NULL,
        completed_parts BIGINT NOT NULL DEFAULT 0,
        size            BIGINT NOT NULL DEFAULT 0,
        status          TEXT NOT NULL DEFAULT 'pending',
        expires_at      BIGINT NOT NULL,
        created_at      BIGINT NOT NULL,
        updated_at      BIGINT NOT NULL,
        PRIMARY KEY (upload_id)
    )",
    "CREATE TABLE IF NOT EXISTS access_logs (
        action          TEXT NOT NULL,
        object_key      TEXT NOT NULL,
        bucket_name     TEXT NOT NULL,
        client_ip       TEXT NOT NULL DEFAULT '',
        user_agent      TEXT NOT NULL DEFAULT '',
        host            TEXT NOT NULL DEFAULT '',
        size            BIGINT NOT NULL DEFAULT 0,
        success         BIGINT NOT NULL DEFAULT 1,
        error_msg       TEXT NOT NULL DEFAULT '',
        response_ms     BIGINT NOT NULL DEFAULT 0,
        created_at      BIGINT NOT NULL
    )",
];

/// Secondary indexes; skipped on MySQL (no `IF NOT EXISTS`).
const INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_mappings_real
        ON virtual_bucket_mappings (real_bucket, real_key)",
    "CREATE INDEX IF NOT EXISTS idx_objects_bucket ON objects (bucket_name)",
    "CREATE INDEX IF NOT EXISTS idx_sessions_status ON upload_sessions (status, expires_at)",
    "CREATE INDEX IF NOT EXISTS idx_access_logs_created ON access_logs (created_at)",
];

/// The migration statements for an engine, in execution order.
#[must_use]
pub fn statements(kind: StoreKind) -> Vec<&'static str> {
    let mut all: Vec<&'static str> = TABLES.to_vec();
    if kind != StoreKind::MySql {
        all.extend_from_slice(INDEXES);
    }
    all
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_skip_indexes_on_mysql() {
        assert_eq!(statements(StoreKind::MySql).len(), TABLES.len());
        assert_eq!(
            statements(StoreKind::Sqlite).len(),
            TABLES.len() + INDEXES.len()
        );
        assert_eq!(
            statements(StoreKind::Postgres).len(),
            TABLES.len() + INDEXES.len()
        );
    }
}
