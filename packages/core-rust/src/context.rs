//! Typed per-call execution context.
//!
//! A [`Context`] is created fresh for every inbound HTTP request, gRPC call or
//! bus message and threaded through hooks, middleware and the endpoint. Every
//! slot is set-once: the first value attached to a slot wins for the rest of
//! the call, and later attempts to replace it are ignored.

use std::any::Any;
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// RequestId
// ---------------------------------------------------------------------------

/// Identifier correlating the incoming and outgoing log records of one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(Uuid);

impl RequestId {
    /// Generates a new random request id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wraps an existing UUID.
    #[must_use]
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for RequestId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

/// Ambient, read-mostly values for a single call.
///
/// Cloning is cheap: string values and claims are reference counted, and
/// clones share the same cancellation token.
#[derive(Clone, Default)]
pub struct Context {
    request_id: Option<RequestId>,
    correlation_id: Option<Arc<str>>,
    token: Option<Arc<str>>,
    claims: Option<Arc<dyn Any + Send + Sync>>,
    partition_key: Option<Arc<str>>,
    peer_addr: Option<SocketAddr>,
    cancellation: CancellationToken,
}

impl Context {
    /// Creates an empty context with a fresh cancellation token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches the request id. Ignored if one is already attached.
    #[must_use]
    pub fn with_request_id(mut self, request_id: RequestId) -> Self {
        set_once(&mut self.request_id, request_id, "request_id");
        self
    }

    /// Returns the request id, if a transport hook attached one.
    #[must_use]
    pub fn request_id(&self) -> Option<RequestId> {
        self.request_id
    }

    /// Attaches the correlation id. Ignored if one is already attached.
    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: impl Into<Arc<str>>) -> Self {
        set_once(&mut self.correlation_id, correlation_id.into(), "correlation_id");
        self
    }

    /// Returns the correlation id carried by the inbound message or request.
    #[must_use]
    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    /// Attaches the raw, not yet validated bearer token.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<Arc<str>>) -> Self {
        set_once(&mut self.token, token.into(), "token");
        self
    }

    /// Returns the raw bearer token placed here by a transport hook.
    #[must_use]
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// Attaches validated claims. Ignored if claims are already attached.
    #[must_use]
    pub fn with_claims<C>(mut self, claims: C) -> Self
    where
        C: Send + Sync + 'static,
    {
        let claims: Arc<dyn Any + Send + Sync> = Arc::new(claims);
        set_once(&mut self.claims, claims, "claims");
        self
    }

    /// Returns the validated claims if they were attached with type `C`.
    #[must_use]
    pub fn claims<C>(&self) -> Option<&C>
    where
        C: Send + Sync + 'static,
    {
        self.claims.as_deref().and_then(|c| c.downcast_ref::<C>())
    }

    /// Whether any claims were attached, regardless of their type.
    #[must_use]
    pub fn has_claims(&self) -> bool {
        self.claims.is_some()
    }

    /// Attaches the bus partition key.
    #[must_use]
    pub fn with_partition_key(mut self, key: impl Into<Arc<str>>) -> Self {
        set_once(&mut self.partition_key, key.into(), "partition_key");
        self
    }

    /// Returns the bus partition key.
    #[must_use]
    pub fn partition_key(&self) -> Option<&str> {
        self.partition_key.as_deref()
    }

    /// Attaches the remote peer address. Ignored if one is already attached.
    #[must_use]
    pub fn with_peer_addr(mut self, addr: SocketAddr) -> Self {
        set_once(&mut self.peer_addr, addr, "peer_addr");
        self
    }

    /// Returns the remote peer address, when the transport knows it.
    #[must_use]
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    /// Token cancelled when this call's processing ends or is abandoned.
    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Cancels this context and every child derived from it.
    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    /// Whether this context has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Derives a context with the same values and a child cancellation token.
    ///
    /// Cancelling the child does not cancel `self`; cancelling `self` cancels
    /// the child.
    #[must_use]
    pub fn child(&self) -> Self {
        Self {
            cancellation: self.cancellation.child_token(),
            ..self.clone()
        }
    }
}

fn set_once<T>(slot: &mut Option<T>, value: T, name: &'static str) {
    if slot.is_some() {
        tracing::debug!(slot = name, "context slot already set, keeping first value");
    } else {
        *slot = Some(value);
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("request_id", &self.request_id)
            .field("correlation_id", &self.correlation_id)
            .field("has_token", &self.token.is_some())
            .field("has_claims", &self.claims.is_some())
            .field("partition_key", &self.partition_key)
            .field("peer_addr", &self.peer_addr)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
