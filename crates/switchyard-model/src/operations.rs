//! The set of S3 operations the gateway serves.
//!
//! Routing maps an HTTP request (method + path shape + query discriminators
//! + headers) to exactly one of these. The set is intentionally closed: the
//! gateway fronts object traffic and multipart uploads, not the long tail of
//! bucket-configuration sub-resources.

use std::fmt;

/// An S3 operation identified by the router.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GatewayOperation {
    /// `GET /` - list the virtual buckets.
    ListBuckets,
    /// `GET /{bucket}` - list objects in a virtual bucket.
    ListObjects,
    /// `HEAD /{bucket}`.
    HeadBucket,
    /// `PUT /{bucket}`.
    CreateBucket,
    /// `DELETE /{bucket}`.
    DeleteBucket,
    /// `GET /{bucket}/{key}`.
    GetObject,
    /// `HEAD /{bucket}/{key}`.
    HeadObject,
    /// `PUT /{bucket}/{key}`.
    PutObject,
    /// `PUT /{bucket}/{key}` with `x-amz-copy-source`.
    CopyObject,
    /// `DELETE /{bucket}/{key}`.
    DeleteObject,
    /// `POST /{bucket}/{key}?uploads`.
    CreateMultipartUpload,
    /// `GET /{bucket}?uploads` (also tolerated on the key path).
    ListMultipartUploads,
    /// `PUT /{bucket}/{key}?uploadId&partNumber`.
    UploadPart,
    /// `GET /{bucket}/{key}?uploadId`.
    ListParts,
    /// `POST /{bucket}/{key}?uploadId`.
    CompleteMultipartUpload,
    /// `DELETE /{bucket}/{key}?uploadId`.
    AbortMultipartUpload,
}

impl GatewayOperation {
    /// Operation name as used in logs and metrics labels.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ListBuckets => "ListBuckets",
            Self::ListObjects => "ListObjects",
            Self::HeadBucket => "HeadBucket",
            Self::CreateBucket => "CreateBucket",
            Self::DeleteBucket => "DeleteBucket",
            Self::GetObject => "GetObject",
            Self::HeadObject => "HeadObject",
            Self::PutObject => "PutObject",
            Self::CopyObject => "CopyObject",
            Self::DeleteObject => "DeleteObject",
            Self::CreateMultipartUpload => "CreateMultipartUpload",
            Self::ListMultipartUploads => "ListMultipartUploads",
            Self::UploadPart => "UploadPart",
            Self::ListParts => "ListParts",
            Self::CompleteMultipartUpload => "CompleteMultipartUpload",
            Self::AbortMultipartUpload => "AbortMultipartUpload",
        }
    }

    /// The access-log action label for this operation.
    #[must_use]
    pub fn access_action(&self) -> &'static str {
        match self {
            Self::ListBuckets => "list_buckets",
            Self::ListObjects => "list_objects",
            Self::HeadBucket => "head_bucket",
            Self::CreateBucket => "create_bucket",
            Self::DeleteBucket => "delete_bucket",
            Self::GetObject => "download_object",
            Self::HeadObject => "head_object",
            Self::PutObject => "upload_object",
            Self::CopyObject => "copy_object",
            Self::DeleteObject => "delete_object",
            Self::CreateMultipartUpload => "initiate_multipart_upload",
            Self::ListMultipartUploads => "list_multipart_uploads",
            Self::UploadPart => "upload_part",
            Self::ListParts => "list_multipart_parts",
            Self::CompleteMultipartUpload => "complete_multipart_upload",
            Self::AbortMultipartUpload => "abort_multipart_upload",
        }
    }
}

impl fmt::Display for GatewayOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_expose_stable_names() {
        assert_eq!(GatewayOperation::PutObject.as_str(), "PutObject");
        assert_eq!(GatewayOperation::PutObject.access_action(), "upload_object");
        assert_eq!(
            GatewayOperation::CompleteMultipartUpload.access_action(),
            "complete_multipart_upload"
        );
    }
}
