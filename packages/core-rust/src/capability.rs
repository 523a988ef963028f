//! Optional response capabilities checked at the encode boundary.
//!
//! A response type opts into a capability by implementing the trait and
//! overriding its method; the default methods mean "not supported". Encoders
//! take these traits as bounds, so there is no base response type.

use std::sync::Arc;

use http::{HeaderMap, StatusCode};

use crate::error::SharedError;

/// Exposes a business-level failure carried inside a successful response.
pub trait Failer {
    /// The business error, if the call succeeded but its outcome is a failure.
    fn failed(&self) -> Option<SharedError> {
        None
    }
}

/// Lets a response choose the status code of transports that have one.
pub trait StatusCoder {
    /// `None` means the encoder's default (200 for HTTP).
    fn status_code(&self) -> Option<StatusCode> {
        None
    }
}

/// Lets a response contribute headers on transports that have them.
pub trait Headerer {
    fn headers(&self) -> HeaderMap {
        HeaderMap::new()
    }
}

impl Failer for () {}
impl StatusCoder for () {}
impl Headerer for () {}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// Embeddable business-error slot for response types.
///
/// ```
/// use courier_core::capability::{Failer, Outcome};
///
/// #[derive(Debug, thiserror::Error)]
/// #[error("pet not found")]
/// struct NotFound;
///
/// struct GetPetResponse {
///     name: Option<String>,
///     outcome: Outcome,
/// }
///
/// impl Failer for GetPetResponse {
///     fn failed(&self) -> Option<courier_core::SharedError> {
///         self.outcome.failed()
///     }
/// }
///
/// let resp = GetPetResponse { name: None, outcome: Outcome::failed(NotFound) };
/// assert_eq!(resp.failed().unwrap().to_string(), "pet not found");
/// ```
#[derive(Debug, Clone, Default)]
pub struct Outcome {
    err: Option<SharedError>,
}

impl Outcome {
    /// A successful business outcome.
    #[must_use]
    pub fn ok() -> Self {
        Self::default()
    }

    /// A failed business outcome.
    pub fn failed<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self {
            err: Some(Arc::new(err)),
        }
    }

    /// Builds an outcome from an already shared error.
    #[must_use]
    pub fn from_shared(err: Option<SharedError>) -> Self {
        Self { err }
    }

    /// Whether the outcome carries an error.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.err.is_some()
    }
}

impl Failer for Outcome {
    fn failed(&self) -> Option<SharedError> {
        self.err.clone()
    }
}

impl<T: Failer> Failer for Box<T> {
    fn failed(&self) -> Option<SharedError> {
        (**self).failed()
    }
}

impl<T: StatusCoder> StatusCoder for Box<T> {
    fn status_code(&self) -> Option<StatusCode> {
        (**self).status_code()
    }
}

impl<T: Headerer> Headerer for Box<T> {
    fn headers(&self) -> HeaderMap {
        (**self).headers()
    }
}
