//! Response construction helpers.

use http::StatusCode;
use http::header::HeaderValue;
use switchyard_model::S3Error;
use switchyard_xml::{S3Serialize, error_to_xml, to_xml};

use crate::body::GatewayBody;

/// An XML response with the given status and serialized document.
///
/// # Errors
///
/// Returns `S3Error` when serialization or response construction fails.
pub fn xml_response<T: S3Serialize>(
    status: StatusCode,
    root: &str,
    value: &T,
) -> Result<http::Response<GatewayBody>, S3Error> {
    let xml = to_xml(root, value)
        .map_err(|e| S3Error::internal(format!("failed to serialize response: {e}"), ""))?;
    http::Response::builder()
        .status(status)
        .header(http::header::CONTENT_TYPE, "application/xml")
        .body(GatewayBody::from_xml(xml))
        .map_err(|e| S3Error::internal(format!("failed to build response: {e}"), ""))
}

/// An empty response with the given status.
///
/// # Errors
///
/// Returns `S3Error` when response construction fails.
pub fn empty_response(status: StatusCode) -> Result<http::Response<GatewayBody>, S3Error> {
    http::Response::builder()
        .status(status)
        .body(GatewayBody::empty())
        .map_err(|e| S3Error::internal(format!("failed to build response: {e}"), ""))
}

/// A `302 Found` redirect to `location`.
///
/// # Errors
///
/// Returns `S3Error` when the location is not a valid header value.
pub fn redirect_response(location: &str) -> Result<http::Response<GatewayBody>, S3Error> {
    http::Response::builder()
        .status(StatusCode::FOUND)
        .header(http::header::LOCATION, location)
        .body(GatewayBody::empty())
        .map_err(|e| S3Error::internal(format!("failed to build redirect: {e}"), ""))
}

/// Render an [`S3Error`] as the standard `<Error>` document with the
/// `X-Amz-Error-Code` / `X-Amz-Error-Message` headers.
#[must_use]
pub fn error_response(err: &S3Error, request_id: &str) -> http::Response<GatewayBody> {
    let xml = error_to_xml(err.code.as_str(), &err.message, &err.resource, request_id);

    let mut builder = http::Response::builder()
        .status(err.status_code())
        .header(http::header::CONTENT_TYPE, "application/xml");

    if let Ok(code) = HeaderValue::from_str(err.code.as_str()) {
        builder = builder.header("X-Amz-Error-Code", code);
    }
    if let Ok(message) = HeaderValue::from_str(&err.message) {
        builder = builder.header("X-Amz-Error-Message", message);
    }

    builder
        .body(GatewayBody::from_xml(xml))
        .unwrap_or_else(|_| {
            let mut fallback = http::Response::new(GatewayBody::empty());
            *fallback.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            fallback
        })
}

/// A JSON response for the admin API.
///
/// # Errors
///
/// Returns `S3Error` when response construction fails.
pub fn json_response(
    status: StatusCode,
    body: &impl serde::Serialize,
) -> Result<http::Response<GatewayBody>, S3Error> {
    let payload = serde_json::to_vec(body)
        .map_err(|e| S3Error::internal(format!("failed to serialize JSON: {e}"), ""))?;
    http::Response::builder()
        .status(status)
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(GatewayBody::from_bytes(payload))
        .map_err(|e| S3Error::internal(format!("failed to build response: {e}"), ""))
}
