use thiserror::Error;

#[derive(Debug, Error)]
pub enum SignerError {
    #[error("unsupported signing algorithm: {0}")]
    UnsupportedAlgorithm(String),
    #[error("signing key must not be empty")]
    EmptyKey,
    #[error("unsupported claims version: {0}")]
    UnsupportedVersion(u8),
    #[error("malformed claims: {0}")]
    MalformedClaims(&'static str),
    #[error("failed to encode token: {0}")]
    Encode(#[source] jsonwebtoken::errors::Error),
    #[error("invalid token: {0}")]
    Invalid(#[source] jsonwebtoken::errors::Error),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("token store i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("token store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Failures in the signer or store that the caller must never see the details of
#[derive(Debug, Error)]
pub enum InternalError {
    #[error(transparent)]
    Signer(#[from] SignerError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Grant failures
#[derive(Debug, Error)]
pub enum AuthError {
    /// Unknown client or wrong secret. Deliberately the same error for both.
    #[error("invalid client credentials")]
    InvalidClient,
    #[error("internal error: {0}")]
    Internal(#[from] InternalError),
}

/// Bearer token rejections
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("token is malformed or its signature does not verify")]
    BadSignature,
    #[error("token is not known to this server")]
    Unknown,
    #[error("token has expired")]
    Expired,
    #[error("token is not valid yet")]
    NotYetValid,
    #[error("internal error: {0}")]
    Internal(#[from] InternalError),
}

impl ValidationError {
    /// Stable code reported to callers
    pub fn code(&self) -> &'static str {
        match self {
            ValidationError::BadSignature => "bad_signature",
            ValidationError::Unknown => "unknown_token",
            ValidationError::Expired => "expired_token",
            ValidationError::NotYetValid => "token_not_yet_valid",
            ValidationError::Internal(_) => "server_error",
        }
    }

    pub fn is_internal(&self) -> bool {
        matches!(self, ValidationError::Internal(_))
    }
}
