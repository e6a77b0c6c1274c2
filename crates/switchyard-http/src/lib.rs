//! The S3 request dispatcher of the switchyard gateway.
//!
//! [`service::GatewayService`] is a hyper service that terminates the S3
//! wire protocol: it resolves virtual-host addressing, identifies the
//! operation, optionally verifies SigV4, and dispatches to the handlers in
//! [`handler::Gateway`]. The handlers translate the client-visible virtual
//! namespace into real backend operations through the mapping store, the
//! balancer, and presigned URLs.

pub mod access_log;
pub mod admin;
pub mod body;
pub mod bucket_ops;
pub mod handler;
pub mod multipart;
pub mod object_ops;
pub mod response;
pub mod router;
pub mod service;

pub use body::GatewayBody;
pub use handler::{Gateway, GatewaySettings};
pub use service::GatewayService;
