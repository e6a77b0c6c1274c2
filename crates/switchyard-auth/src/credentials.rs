//! Credential material used for signing and verification.

/// An access-key / secret-key pair.
///
/// The gateway carries one pair for its client-facing surface and one pair
/// per real backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Access key ID.
    pub access_key: String,
    /// Secret access key.
    pub secret_key: String,
}

impl Credentials {
    /// Create a credential pair.
    #[must_use]
    pub fn new(access_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            access_key: access_key.into(),
            secret_key: secret_key.into(),
        }
    }
}
