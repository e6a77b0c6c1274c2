//! AWS Signature Version 4 for the switchyard gateway, in both directions.
//!
//! The gateway sits between S3 clients and S3 backends, so it needs SigV4
//! twice:
//!
//! - **Inbound**: verifying the `Authorization` header of client requests
//!   against the gateway's configured credentials ([`verify_request`]).
//! - **Outbound**: generating presigned URLs the gateway (acting as an HTTP
//!   client) uses to move bytes to and from real backends ([`Presigner`]),
//!   and signing direct REST calls to backends ([`sign_headers`]).
//!
//! Both directions share the canonical-request and key-derivation primitives
//! in [`canonical`] and [`sigv4`].

pub mod canonical;
pub mod credentials;
pub mod error;
pub mod presign;
pub mod sigv4;

pub use credentials::Credentials;
pub use error::AuthError;
pub use presign::{PresignRequest, Presigner};
pub use sigv4::{sign_headers, verify_request};
