//! Error taxonomy shared by every transport and middleware.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Boxed error used for codec failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Shared business error. Keeps the caller's concrete type for downcasting.
pub type SharedError = Arc<dyn std::error::Error + Send + Sync>;

// ---------------------------------------------------------------------------
// AuthError
// ---------------------------------------------------------------------------

/// Bearer token validation failures. These are never retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("token up for parsing was not passed through the context")]
    TokenMissing,
    #[error("JWT Token is malformed")]
    TokenMalformed,
    #[error("JWT Token is expired")]
    TokenExpired,
    #[error("token is not valid yet")]
    TokenNotYetActive,
    #[error("unexpected signing method")]
    UnexpectedSigningMethod,
    #[error("JWT Token was invalid")]
    TokenInvalid,
}

// ---------------------------------------------------------------------------
// EndpointError
// ---------------------------------------------------------------------------

/// Errors returned by endpoints, middleware and transport codecs.
///
/// The `Err` channel of an endpoint carries infrastructure failures. A
/// business-level failure travels as an `Ok` response implementing
/// [`Failer`](crate::capability::Failer) and only becomes
/// [`EndpointError::Failed`] at the encode boundary.
#[derive(Debug, thiserror::Error)]
pub enum EndpointError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("cannot cast request")]
    CastRequest,
    #[error("cannot cast response")]
    CastResponse,
    #[error("error parsing claims")]
    ClaimsUnparseable,
    #[error("unauthorized")]
    Unauthorized,
    #[error("malformed request: {0}")]
    Decode(#[source] BoxError),
    #[error("failed to encode response: {0}")]
    Encode(#[source] BoxError),
    #[error("operation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    #[error("no endpoints available")]
    NoEndpoints,
    #[error("request cancelled")]
    Cancelled,
    #[error("{0}")]
    Failed(SharedError),
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl EndpointError {
    /// Wraps a business error.
    pub fn failed<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Failed(Arc::new(err))
    }

    /// Wraps a request decoding failure.
    pub fn decode<E>(err: E) -> Self
    where
        E: Into<BoxError>,
    {
        Self::Decode(err.into())
    }

    /// Wraps a response encoding failure.
    pub fn encode<E>(err: E) -> Self
    where
        E: Into<BoxError>,
    {
        Self::Encode(err.into())
    }

    /// Whether this error came out of token validation.
    #[must_use]
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth(_))
    }

    /// Returns the authentication failure, if this is one.
    #[must_use]
    pub fn auth_error(&self) -> Option<AuthError> {
        match self {
            Self::Auth(err) => Some(*err),
            _ => None,
        }
    }

    /// Downcasts a business failure to the caller's concrete error type.
    #[must_use]
    pub fn business_error<E>(&self) -> Option<&E>
    where
        E: std::error::Error + 'static,
    {
        match self {
            Self::Failed(err) => err.downcast_ref::<E>(),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// ErrorBody
// ---------------------------------------------------------------------------

/// Uniform wire representation of a failure: `{"error": "<message>"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

impl ErrorBody {
    /// Renders any error through its `Display` implementation.
    #[must_use]
    pub fn from_error(err: &(dyn std::error::Error + '_)) -> Self {
        Self {
            error: err.to_string(),
        }
    }

    /// Serializes the body to JSON bytes.
    #[must_use]
    pub fn to_json(&self) -> Vec<u8> {
        // A struct with a single string field always serializes.
        serde_json::to_vec(self).unwrap_or_else(|_| b"{\"error\":\"\"}".to_vec())
    }
}
