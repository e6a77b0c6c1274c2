//! S3 error codes and the gateway error type.
//!
//! The code set is the subset of the AWS S3 error vocabulary this gateway
//! actually produces. Each code carries a default HTTP status; the response
//! layer renders the standard `<Error>` XML body plus the
//! `X-Amz-Error-Code` / `X-Amz-Error-Message` headers.

use std::fmt;

/// Well-known S3 error codes emitted by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum S3ErrorCode {
    /// AccessDenied error.
    AccessDenied,
    /// BucketAlreadyExists error.
    BucketAlreadyExists,
    /// EntityTooLarge error.
    EntityTooLarge,
    /// InternalError error.
    InternalError,
    /// InsufficientStorage error (all backends full or unavailable).
    InsufficientStorage,
    /// InvalidAccessKeyId error.
    InvalidAccessKeyId,
    /// InvalidArgument error.
    InvalidArgument,
    /// MalformedXML error.
    MalformedXML,
    /// MethodNotAllowed error.
    MethodNotAllowed,
    /// MissingContentLength error.
    MissingContentLength,
    /// NoSuchBucket error.
    NoSuchBucket,
    /// NoSuchKey error.
    NoSuchKey,
    /// NoSuchUpload error.
    NoSuchUpload,
    /// SignatureDoesNotMatch error.
    SignatureDoesNotMatch,
    /// A code not in the standard set, passed through from a backend.
    Custom(&'static str),
}

impl S3ErrorCode {
    /// Returns the error code as the string rendered into the XML body.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AccessDenied => "AccessDenied",
            Self::BucketAlreadyExists => "BucketAlreadyExists",
            Self::EntityTooLarge => "EntityTooLarge",
            Self::InternalError => "InternalError",
            Self::InsufficientStorage => "InsufficientStorage",
            Self::InvalidAccessKeyId => "InvalidAccessKeyId",
            Self::InvalidArgument => "InvalidArgument",
            Self::MalformedXML => "MalformedXML",
            Self::MethodNotAllowed => "MethodNotAllowed",
            Self::MissingContentLength => "MissingContentLength",
            Self::NoSuchBucket => "NoSuchBucket",
            Self::NoSuchKey => "NoSuchKey",
            Self::NoSuchUpload => "NoSuchUpload",
            Self::SignatureDoesNotMatch => "SignatureDoesNotMatch",
            Self::Custom(s) => s,
        }
    }

    /// Returns the default HTTP status code for this error.
    #[must_use]
    pub fn default_status_code(&self) -> http::StatusCode {
        match self {
            Self::NoSuchBucket | Self::NoSuchKey | Self::NoSuchUpload => {
                http::StatusCode::NOT_FOUND
            }
            Self::BucketAlreadyExists => http::StatusCode::CONFLICT,
            Self::AccessDenied | Self::InvalidAccessKeyId | Self::SignatureDoesNotMatch => {
                http::StatusCode::FORBIDDEN
            }
            Self::InsufficientStorage => http::StatusCode::INSUFFICIENT_STORAGE,
            Self::EntityTooLarge => http::StatusCode::PAYLOAD_TOO_LARGE,
            Self::InternalError => http::StatusCode::INTERNAL_SERVER_ERROR,
            Self::InvalidArgument
            | Self::MalformedXML
            | Self::MethodNotAllowed
            | Self::MissingContentLength
            | Self::Custom(_) => http::StatusCode::BAD_REQUEST,
        }
    }

    /// Resolve a backend-supplied code string to a known variant when possible.
    ///
    /// Unknown codes surface as `InternalError`; the original message is kept
    /// by the caller, so no detail is lost.
    #[must_use]
    pub fn from_backend_code(code: &str) -> Self {
        match code {
            "AccessDenied" => Self::AccessDenied,
            "EntityTooLarge" => Self::EntityTooLarge,
            "InvalidArgument" => Self::InvalidArgument,
            "MalformedXML" => Self::MalformedXML,
            "NoSuchBucket" => Self::NoSuchBucket,
            "NoSuchKey" => Self::NoSuchKey,
            "NoSuchUpload" => Self::NoSuchUpload,
            "InvalidPart" => Self::Custom("InvalidPart"),
            "InvalidPartOrder" => Self::Custom("InvalidPartOrder"),
            _ => Self::InternalError,
        }
    }
}

impl fmt::Display for S3ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An S3 protocol error: code, human-readable message, and the resource the
/// request addressed (rendered into `<Resource>`).
#[derive(Debug, Clone, thiserror::Error)]
#[error("{code}: {message}")]
pub struct S3Error {
    /// The S3 error code.
    pub code: S3ErrorCode,
    /// Human-readable message for the XML body.
    pub message: String,
    /// The bucket or key the request addressed.
    pub resource: String,
}

impl S3Error {
    /// Create an error with an explicit message and resource.
    #[must_use]
    pub fn new(
        code: S3ErrorCode,
        message: impl Into<String>,
        resource: impl Into<String>,
    ) -> Self {
        Self {
            code,
            message: message.into(),
            resource: resource.into(),
        }
    }

    /// `NoSuchBucket` with the standard message.
    #[must_use]
    pub fn no_such_bucket(bucket: impl Into<String>) -> Self {
        Self::new(
            S3ErrorCode::NoSuchBucket,
            "The specified bucket does not exist",
            bucket,
        )
    }

    /// `NoSuchKey` with the standard message.
    #[must_use]
    pub fn no_such_key(key: impl Into<String>) -> Self {
        Self::new(
            S3ErrorCode::NoSuchKey,
            "The specified key does not exist",
            key,
        )
    }

    /// `NoSuchUpload` with the standard message.
    #[must_use]
    pub fn no_such_upload(upload_id: impl Into<String>) -> Self {
        Self::new(
            S3ErrorCode::NoSuchUpload,
            "The specified multipart upload does not exist",
            upload_id,
        )
    }

    /// `InternalError` with a caller-supplied message.
    #[must_use]
    pub fn internal(message: impl Into<String>, resource: impl Into<String>) -> Self {
        Self::new(S3ErrorCode::InternalError, message, resource)
    }

    /// `InsufficientStorage` with the standard message.
    #[must_use]
    pub fn insufficient_storage(resource: impl Into<String>) -> Self {
        Self::new(
            S3ErrorCode::InsufficientStorage,
            "No backend has enough space for this object",
            resource,
        )
    }

    /// The HTTP status this error maps to.
    #[must_use]
    pub fn status_code(&self) -> http::StatusCode {
        self.code.default_status_code()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_map_codes_to_s3_statuses() {
        assert_eq!(
            S3ErrorCode::NoSuchBucket.default_status_code(),
            http::StatusCode::NOT_FOUND
        );
        assert_eq!(
            S3ErrorCode::NoSuchKey.default_status_code(),
            http::StatusCode::NOT_FOUND
        );
        assert_eq!(
            S3ErrorCode::BucketAlreadyExists.default_status_code(),
            http::StatusCode::CONFLICT
        );
        assert_eq!(
            S3ErrorCode::SignatureDoesNotMatch.default_status_code(),
            http::StatusCode::FORBIDDEN
        );
        assert_eq!(
            S3ErrorCode::InsufficientStorage.default_status_code(),
            http::StatusCode::INSUFFICIENT_STORAGE
        );
        assert_eq!(
            S3ErrorCode::EntityTooLarge.default_status_code(),
            http::StatusCode::PAYLOAD_TOO_LARGE
        );
        assert_eq!(
            S3ErrorCode::InternalError.default_status_code(),
            http::StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            S3ErrorCode::InvalidArgument.default_status_code(),
            http::StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_should_keep_unknown_backend_codes_as_internal() {
        assert_eq!(
            S3ErrorCode::from_backend_code("SlowDown"),
            S3ErrorCode::InternalError
        );
        assert_eq!(
            S3ErrorCode::from_backend_code("NoSuchUpload"),
            S3ErrorCode::NoSuchUpload
        );
    }

    #[test]
    fn test_should_render_custom_code_string() {
        let code = S3ErrorCode::from_backend_code("InvalidPartOrder");
        assert_eq!(code.as_str(), "InvalidPartOrder");
        assert_eq!(code.default_status_code(), http::StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_should_build_standard_errors() {
        let err = S3Error::no_such_bucket("photos");
        assert_eq!(err.code, S3ErrorCode::NoSuchBucket);
        assert_eq!(err.resource, "photos");
        assert_eq!(err.status_code(), http::StatusCode::NOT_FOUND);
    }
}
