//! Authentication and signing errors.

/// Errors produced while verifying or generating SigV4 signatures.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The `Authorization` header is absent.
    #[error("missing Authorization header")]
    MissingAuthHeader,

    /// The `Authorization` header does not follow the SigV4 format.
    #[error("malformed Authorization header")]
    InvalidAuthHeader,

    /// The credential scope is not `AKID/date/region/service/aws4_request`.
    #[error("malformed credential scope")]
    InvalidCredential,

    /// The signing algorithm is not `AWS4-HMAC-SHA256`.
    #[error("unsupported signing algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// The access key does not match the configured key.
    #[error("unknown access key id: {0}")]
    UnknownAccessKey(String),

    /// A header listed in `SignedHeaders` is missing from the request.
    #[error("signed header missing from request: {0}")]
    MissingSignedHeader(String),

    /// The request timestamp is absent or unparseable.
    #[error("missing or invalid x-amz-date")]
    InvalidDate,

    /// The computed signature does not match the provided one.
    #[error("signature mismatch")]
    SignatureMismatch,

    /// The backend endpoint URL could not be interpreted.
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),
}

impl AuthError {
    /// The S3 error code string this auth failure maps to.
    #[must_use]
    pub fn s3_code(&self) -> &'static str {
        match self {
            Self::UnknownAccessKey(_) => "InvalidAccessKeyId",
            Self::MissingAuthHeader => "AccessDenied",
            _ => "SignatureDoesNotMatch",
        }
    }
}
