//! Persistent state for the switchyard gateway.
//!
//! One [`Store`] owns a `sqlx::AnyPool` speaking sqlite, MySQL, or Postgres
//! (chosen by configuration) and carries six tables: virtual bucket
//! mappings, object records, bucket stats with operation counters, monthly
//! archives, upload sessions, and access logs.
//!
//! Timestamps are stored as epoch seconds; the HTTP layer converts to wire
//! formats. Queries are written once with `?` placeholders and rewritten to
//! `$N` for Postgres at one choke point.

pub mod archiver;
pub mod migrations;
pub mod models;
pub mod store;

pub use archiver::MonthlyArchiver;
pub use models::{Mapping, MonthlyStats, ObjectRecord, SessionStatus, UploadSession};
pub use store::{AccessLogEntry, Store, StoreError, StoreKind};
